//! The simulator coordinator: one object owning the listener, the processor
//! group, the message store, the delivery worker and the users table, with
//! the operator commands on top.
//!
//! Everything a running simulator needs lives in [`Running`], so start and
//! stop are a single `Option` flip and no command can observe a half-built
//! state.

pub mod console;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::delivery::DeliveryInfoSender;
use crate::listener::SmscListener;
use crate::pdu::{self, DeliverSm, Pdu};
use crate::processor::{BindState, PduProcessor, ProcessorFactory, ProcessorGroup, SendError};
use crate::store::{ShortMessage, ShortMessageStore};
use crate::users::{UserTable, UserTableError};

/// Operator command failures, one variant per distinct outcome the console
/// reports.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("listener is not running, start it first")]
    NotStarted,

    #[error("listener already running on port {0}")]
    AlreadyStarted(u16),

    #[error("no client bound as {0}")]
    NoSuchClient(String),

    #[error("client {0} is no longer active")]
    ClientInactive(String),

    #[error(transparent)]
    BadMessage(#[from] pdu::Error),

    #[error("could not queue message: {0}")]
    Send(#[from] SendError),

    #[error(transparent)]
    Users(#[from] UserTableError),

    #[error("listener failed to start: {0}")]
    Io(#[from] io::Error),
}

/// One listing row from `list_clients`.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub system_id: Option<String>,
    pub state: BindState,
    pub active: bool,
}

/// Everything that exists only while the simulator is started.
struct Running {
    listener: SmscListener,
    group: Arc<ProcessorGroup>,
    store: Arc<ShortMessageStore>,
    delivery: DeliveryInfoSender,
    users: Arc<UserTable>,
}

/// The simulator's control surface. Single owner; the console task drives it.
pub struct Simulator {
    port: u16,
    users_path: PathBuf,
    display_info: Arc<AtomicBool>,
    running: Option<Running>,
}

impl Simulator {
    pub fn new(port: u16, users_path: impl Into<PathBuf>) -> Self {
        Self {
            port,
            users_path: users_path.into(),
            display_info: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.listener.local_addr())
    }

    fn running(&self) -> Result<&Running, CommandError> {
        self.running.as_ref().ok_or(CommandError::NotStarted)
    }

    /// Build the shared state and start accepting connections.
    ///
    /// A missing users file is a warning and an empty table, not a failure;
    /// a listener bind failure aborts the start and leaves the simulator
    /// stopped. Returns the bound address.
    pub async fn start(&mut self) -> Result<SocketAddr, CommandError> {
        if let Some(running) = &self.running {
            return Err(CommandError::AlreadyStarted(
                running.listener.local_addr().port(),
            ));
        }

        let users = match UserTable::load(&self.users_path) {
            Ok(table) => Arc::new(table),
            Err(e) => {
                warn!(error = %e, "users file unavailable, starting with no users");
                Arc::new(UserTable::empty(&self.users_path))
            }
        };

        let group = ProcessorGroup::new();
        let store = Arc::new(ShortMessageStore::new());
        let mut delivery = DeliveryInfoSender::new();
        delivery.start();

        let factory = Arc::new(ProcessorFactory::new(
            group.clone(),
            users.clone(),
            store.clone(),
            delivery.handle(),
            self.display_info.clone(),
        ));

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        let listener = match SmscListener::start(addr, factory).await {
            Ok(listener) => listener,
            Err(e) => {
                delivery.stop().await;
                return Err(e.into());
            }
        };

        let local_addr = listener.local_addr();
        info!(address = %local_addr, users = users.count(), "simulator started");

        self.running = Some(Running {
            listener,
            group,
            store,
            delivery,
            users,
        });
        Ok(local_addr)
    }

    /// Stop accepting, tear down every live session and join the workers.
    ///
    /// Membership is drained under one exclusive guard so no concurrent
    /// attach or listing interleaves with shutdown. Session tasks observe
    /// their close signal and exit on their own; a racing self-termination
    /// finds itself already drained and removes nothing.
    pub async fn stop(&mut self) -> Result<(), CommandError> {
        let Some(mut running) = self.running.take() else {
            return Err(CommandError::NotStarted);
        };

        running.listener.stop().await;

        let drained = {
            let mut guard = running.group.exclusive().await;
            guard.drain()
        };
        for proc in &drained {
            proc.core().take_group();
            proc.core().shut_down();
        }
        info!(sessions = drained.len(), "sessions torn down");

        running.delivery.stop().await;
        info!("simulator stopped");
        Ok(())
    }

    /// Snapshot of the connected clients, in connection order.
    pub async fn list_clients(&self) -> Result<Vec<ClientInfo>, CommandError> {
        let running = self.running()?;
        let guard = running.group.exclusive().await;
        Ok(guard
            .iter()
            .map(|proc| {
                let core = proc.core();
                ClientInfo {
                    system_id: core.system_id(),
                    state: core.state(),
                    active: core.is_active(),
                }
            })
            .collect())
    }

    /// Push a deliver_sm carrying `text` to the client bound as `system_id`.
    /// Returns the assigned sequence number.
    pub async fn send_message(
        &self,
        system_id: &str,
        source_addr: &str,
        dest_addr: &str,
        text: &str,
    ) -> Result<u32, CommandError> {
        let running = self.running()?;

        let proc = running
            .group
            .find(system_id)
            .await
            .ok_or_else(|| CommandError::NoSuchClient(system_id.to_string()))?;
        if !proc.is_active() {
            return Err(CommandError::ClientInactive(system_id.to_string()));
        }

        let message = DeliverSm::with_text(source_addr, dest_addr, text)?;
        let sequence = proc.send_request(Pdu::DeliverSm(message))?;

        info!(system_id, sequence, "message queued for delivery");
        Ok(sequence)
    }

    /// All messages the simulator has accepted this run, in arrival order.
    pub fn message_list(&self) -> Result<Vec<ShortMessage>, CommandError> {
        Ok(self.running()?.store.all())
    }

    /// Re-read the users file in place. Bound sessions are unaffected.
    pub fn reload_users(&self) -> Result<usize, CommandError> {
        let count = self.running()?.users.reload()?;
        info!(users = count, "users reloaded");
        Ok(count)
    }

    /// Flip per-PDU logging for current and future sessions. Returns the new
    /// setting.
    pub async fn toggle_logging(&self) -> Result<bool, CommandError> {
        let running = self.running()?;
        let verbose = !self.display_info.load(Ordering::Relaxed);
        self.display_info.store(verbose, Ordering::Relaxed);

        let guard = running.group.exclusive().await;
        for proc in guard.iter() {
            proc.core().set_verbose(verbose);
        }

        info!(verbose, "pdu logging toggled");
        Ok(verbose)
    }
}
