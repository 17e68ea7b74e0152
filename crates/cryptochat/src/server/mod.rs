//! The node's two HTTP surfaces: the mutually authenticated peer API and
//! the plaintext loopback UI.

pub mod peer;
pub mod spa;
pub mod ui;
