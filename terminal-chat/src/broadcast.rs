//! Fan-out of one message to every registered peer but its sender.

use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::registry::{Registry, SessionId};

/// Outcome of one broadcast call, counted per recipient.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
    /// Recipients that were already closed when their turn came.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    write_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    /// Sends `bytes` to every registered peer except `excluded`.
    ///
    /// Recipients are written one after another in registry order, each
    /// bounded by the write timeout. A failed or timed-out write is logged
    /// and abandoned; it is never retried, never reported to the sender and
    /// does not unregister the recipient.
    pub async fn broadcast(&self, bytes: &[u8], excluded: Option<SessionId>) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for peer in self.registry.snapshot_except(excluded) {
            if peer.is_closed() {
                report.skipped += 1;
                continue;
            }

            match timeout(self.write_timeout, peer.send(bytes)).await {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(error)) => {
                    warn!(
                        peer = %peer.addr(),
                        session = %peer.id(),
                        ?error,
                        "failed to deliver message"
                    );
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(
                        peer = %peer.addr(),
                        session = %peer.id(),
                        timeout = ?self.write_timeout,
                        "delivery timed out; message dropped for this recipient"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(?excluded, ?report, "broadcast finished");
        report
    }
}
