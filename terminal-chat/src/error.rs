use std::{io, net::SocketAddr};

use thiserror::Error;

/// Failures of the server lifecycle. Per-connection I/O errors never surface
/// here; sessions and broadcasts handle those in place.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server is already running")]
    AlreadyRunning,
}
