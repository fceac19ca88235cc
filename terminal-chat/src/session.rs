//! Per-connection receive loop.
//!
//! A session reads whatever the socket hands back into one fixed-size
//! buffer and broadcasts each chunk unchanged. There is no framing: a line
//! longer than the buffer goes out as several broadcasts, and two short
//! writes from a client may arrive as one.

use std::sync::Arc;

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    select,
};
use tracing::{info, warn};

use crate::{
    broadcast::Dispatcher,
    registry::{Peer, Registry},
};

/// Why a receive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed its side (zero-length read).
    PeerClosed,
    /// The transport reported an error.
    ReadFailed,
    /// The peer was closed locally, e.g. by server shutdown.
    Closed,
}

pub struct Session {
    peer: Arc<Peer>,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    buffer_size: usize,
}

impl Session {
    pub fn new(
        peer: Arc<Peer>,
        registry: Arc<Registry>,
        dispatcher: Dispatcher,
        buffer_size: usize,
    ) -> Self {
        Self {
            peer,
            registry,
            dispatcher,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Reads until the connection ends, then unregisters and closes the peer.
    ///
    /// Reads are strictly sequential: the next read is only issued after the
    /// previous chunk has been broadcast.
    pub async fn run<R>(self, mut reader: R) -> SessionEnd
    where
        R: AsyncRead + Unpin,
    {
        let Session {
            peer,
            registry,
            dispatcher,
            buffer_size,
        } = self;
        let mut buffer = vec![0u8; buffer_size];

        let end = loop {
            let read = select! {
                _ = peer.closed() => break SessionEnd::Closed,
                read = reader.read(&mut buffer) => read,
            };

            match read {
                Ok(0) => {
                    info!(peer = %peer.addr(), session = %peer.id(), "client disconnected");
                    break SessionEnd::PeerClosed;
                }
                Ok(len) => {
                    let chunk = &buffer[..len];
                    info!(
                        peer = %peer.addr(),
                        session = %peer.id(),
                        text = %String::from_utf8_lossy(chunk),
                        "message received"
                    );
                    dispatcher.broadcast(chunk, Some(peer.id())).await;
                }
                Err(error) => {
                    warn!(
                        peer = %peer.addr(),
                        session = %peer.id(),
                        ?error,
                        "failed to receive; closing connection"
                    );
                    break SessionEnd::ReadFailed;
                }
            }
        };

        // Unregister first so no new broadcast picks the peer up, then close.
        registry.remove(peer.id());
        peer.close().await;
        end
    }
}
