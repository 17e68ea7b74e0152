use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(
    name = "cryptochat",
    version,
    about = "Decentralized LAN chat with trust-on-first-use peer identity"
)]
pub struct Cli {
    /// Path to the node database file
    #[arg(long, env = "CRYPTOCHAT_DB", default_value = "cryptochat.db")]
    pub db: PathBuf,

    /// Peer API listen address (mutually authenticated TLS)
    #[arg(long, env = "CRYPTOCHAT_ADDR", default_value = "0.0.0.0:9443")]
    pub addr: SocketAddr,

    /// Frontend/UI listen address (plaintext HTTP, keep on loopback)
    #[arg(long, env = "CRYPTOCHAT_UI_ADDR", default_value = "127.0.0.1:8080")]
    pub ui_addr: SocketAddr,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "CRYPTOCHAT_LOG", default_value = "info")]
    pub log_level: String,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to file (in addition to stderr)
    #[arg(long, env = "CRYPTOCHAT_LOG_FILE", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}
