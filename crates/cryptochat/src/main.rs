mod cli;
mod dispatch;
mod pending;
mod server;
mod state;
mod trust;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cryptochat_crypto::{Identity, CERT_VALIDITY, DEFAULT_KEY_BITS};
use cryptochat_discovery::DiscoveryCore;
use cryptochat_events::Broker;
use cryptochat_store::Store;

use cli::Cli;
use state::AppState;
use trust::TrustStore;

/// Maximum time to wait for orderly shutdown before forcing exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// Brief pause after cancellation to let in-flight requests complete.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Hold the non-blocking guards for the lifetime of main so logs flush on exit.
    let _log_guards = init_logging(env_filter, cli.log_file.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&cli.db).context("failed to open node database")?);

    if store.created() {
        tracing::info!("Generating {DEFAULT_KEY_BITS} bit RSA key and certificate");
        let identity = cryptochat_crypto::generate(
            DEFAULT_KEY_BITS,
            &Uuid::new_v4().to_string(),
            CERT_VALIDITY,
        )
        .context("failed to generate node identity")?;
        store
            .save_identity(identity.cert_der(), identity.key_pkcs1_der())
            .context("failed to persist node identity")?;
    }

    let (cert_der, key_der) = store
        .load_identity()
        .context("failed to load node identity")?;
    let identity = Arc::new(
        Identity::from_der(cert_der, key_der).context("failed to parse stored node identity")?,
    );

    tracing::info!(
        uuid = %identity.uuid(),
        fingerprint = %identity.fingerprint(),
        "Loaded node certificate"
    );

    let events = Arc::new(Broker::new());
    let trust = TrustStore::new(store.clone(), events.clone(), identity.clone());
    let discovery = Arc::new(DiscoveryCore::new(identity.uuid()));

    let state = AppState {
        store,
        identity,
        trust,
        discovery: discovery.clone(),
        events,
    };

    let api_listener = TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind peer API listener on {}", cli.addr))?;
    let ui_listener = TcpListener::bind(cli.ui_addr)
        .await
        .with_context(|| format!("failed to bind UI listener on {}", cli.ui_addr))?;
    let api_port = api_listener.local_addr()?.port();

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    {
        let state = state.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server::peer::serve(state, api_listener, token).await {
                tracing::error!(error = %e, "Peer API failed");
            }
        }));
    }

    {
        let state = state.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server::ui::serve(state, ui_listener, token).await {
                tracing::error!(error = %e, "UI server failed");
            }
        }));
    }

    {
        let discovery = discovery.clone();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = discovery.run(api_port, token).await {
                tracing::error!(error = %e, "Discovery failed");
            }
        }));
    }

    tracing::info!("Ready.");

    shutdown_signal().await;
    tracing::info!("Shutting down...");

    // Ordered shutdown with hard timeout
    let shutdown = async {
        cancel.cancel();
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        for task in tasks {
            let _ = task.await;
        }
        discovery.shutdown();
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
        tracing::warn!(
            "Shutdown timed out after {:?} — forcing exit",
            SHUTDOWN_TIMEOUT
        );
    }

    Ok(())
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
}

/// Initialize tracing with stderr + optional file output.
/// Returns guards that must be held for the lifetime of the program
/// to ensure the non-blocking writers flush on shutdown.
fn init_logging(
    env_filter: tracing_subscriber::EnvFilter,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Vec<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(nb_stderr);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (nb_file, file_guard) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer().with_writer(nb_file);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();

        Ok(vec![stderr_guard, file_guard])
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();

        Ok(vec![stderr_guard])
    }
}
