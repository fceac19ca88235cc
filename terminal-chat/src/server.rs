//! Accept loop and server lifecycle.

use std::{future::Future, net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::{BroadcastReport, Dispatcher},
    config::ServerConfig,
    error::ServerError,
    registry::{Peer, Registry, SessionId},
    session::Session,
};

/// Owns the registry and, while running, the listener and its accept task.
///
/// `start` and `stop` may be called in any order and any number of times;
/// `stop` on a server that never started simply has nothing to close.
pub struct ChatServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    running: Option<Running>,
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), config.write_timeout);
        Self {
            config,
            registry,
            dispatcher,
            running: None,
        }
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested. A bind failure leaves the server stopped.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = self.config.listen;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let acceptor = Acceptor {
            listener,
            registry: Arc::clone(&self.registry),
            dispatcher: self.dispatcher.clone(),
            read_buffer: self.config.read_buffer,
        };
        let accept_task = tokio::spawn(acceptor.run(shutdown_rx));

        info!("server listening on {}", local_addr);
        self.running = Some(Running {
            local_addr,
            shutdown,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Closes the listener, then every registered connection, then clears
    /// the registry. Sessions that are tearing themselves down at the same
    /// time are tolerated: closing a closed peer is a no-op.
    pub async fn stop(&mut self) {
        if let Some(Running {
            shutdown,
            accept_task,
            ..
        }) = self.running.take()
        {
            info!("server shutting down");
            let _ = shutdown.send(true);
            if let Err(error) = accept_task.await {
                warn!(?error, "accept loop ended abnormally");
            }
        }

        for peer in self.registry.clear() {
            if peer.close().await {
                debug!(peer = %peer.addr(), session = %peer.id(), "closed connection");
            }
        }
    }

    /// Starts the server, waits for `shutdown`, then stops it.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        self.start().await?;
        shutdown.await;
        self.stop().await;
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// True while the accept loop has been started and not stopped. An accept
    /// failure ends the loop without changing this.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Server-originated broadcast; `None` reaches every connection.
    pub async fn broadcast(&self, bytes: &[u8], excluded: Option<SessionId>) -> BroadcastReport {
        self.dispatcher.broadcast(bytes, excluded).await
    }
}

struct Acceptor {
    listener: TcpListener,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    read_buffer: usize,
}

impl Acceptor {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.start_session(stream, peer),
                        Err(error) => {
                            // Not retried: the loop stops on the first failure.
                            warn!(?error, "accepting a connection failed; no longer accepting");
                            break;
                        }
                    }
                }
            }
        }
        debug!("accept loop finished");
    }

    /// Registers the connection and spawns its receive loop. Never waits on
    /// the new session, so the caller can re-arm `accept` right away.
    fn start_session(&self, stream: TcpStream, addr: SocketAddr) {
        let (reader, writer) = stream.into_split();
        let peer = Arc::new(Peer::new(self.registry.next_id(), addr, writer));
        self.registry.add(Arc::clone(&peer));

        let session = Session::new(
            Arc::clone(&peer),
            Arc::clone(&self.registry),
            self.dispatcher.clone(),
            self.read_buffer,
        );
        tokio::spawn(async move {
            let end = session.run(reader).await;
            debug!(peer = %addr, ?end, "session ended");
        });

        info!(peer = %addr, session = %peer.id(), "client connected");
    }
}
