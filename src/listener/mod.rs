//! TCP acceptor for incoming client connections.
//!
//! One accept loop per listener; every accepted socket gets a processor from
//! the factory and a spawned session task. Stopping the listener only stops
//! accepting; live sessions are torn down by the coordinator.

mod session;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, warn, Instrument, Level};

use crate::processor::{ProcessorFactory, SessionHandle};

/// Per-session outbound queue depth.
const SESSION_QUEUE: usize = 128;

/// Accepting side of the simulator.
///
/// `start` binds and spawns the accept loop; `stop` closes the accept loop
/// and waits for it, after which no new sessions can appear.
pub struct SmscListener {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl SmscListener {
    /// Bind `addr` and start accepting connections.
    pub async fn start(addr: SocketAddr, factory: Arc<ProcessorFactory>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!(address = %local_addr, "listener started");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, factory, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown,
            accept_task: Some(accept_task),
        })
    }

    /// The bound address; useful when started on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "accept loop join failed");
            }
        }
        info!(address = %self.local_addr, "listener stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    factory: Arc<ProcessorFactory>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow_and_update() {
                    debug!("accept loop shutting down");
                    break;
                }
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(peer = %peer_addr, error = %e, "socket configuration failed");
                        }

                        let span = span!(Level::INFO, "session", peer = %peer_addr);
                        let (handle, receivers) = SessionHandle::channel(SESSION_QUEUE);
                        // The processor joins the group before the session
                        // starts reading, so a listing never misses a live
                        // connection.
                        let processor = factory.create(handle).await;

                        debug!(peer = %peer_addr, "connection accepted");
                        tokio::spawn(
                            session::run(stream, processor, receivers).instrument(span),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        }
    }
}
