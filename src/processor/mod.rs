//! Per-connection PDU processors and their shared lifecycle bookkeeping.
//!
//! A [`PduProcessor`] handles the four message directions for one connection:
//! requests and responses arriving from the remote peer, and requests and
//! responses pushed out on behalf of the simulator. Concrete processors embed
//! a [`ProcessorCore`] so group membership, activity tracking and outbound
//! sequencing are implemented once.

mod group;
mod simulator;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::pdu::{Header, Pdu, PduFrame, Status};

pub use group::{GroupGuard, ProcessorGroup};
pub use simulator::{ProcessorFactory, SimulatorProcessor};

/// Errors from the outbound send path.
///
/// An inactive processor is a normal, checked condition, not a protocol
/// failure; callers report it and move on.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("processor is inactive")]
    Inactive,

    #[error("session outbound channel closed")]
    Closed,

    #[error("session outbound channel full")]
    Full,
}

/// Bind-level state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    /// Connected, not yet authenticated.
    Open,
    /// Bound as transmitter.
    BoundTx,
    /// Bound as receiver.
    BoundRx,
    /// Bound as transceiver.
    BoundTrx,
    /// Session over.
    Closed,
}

impl BindState {
    /// Whether the peer may push submit_sm to us in this state.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::BoundTx | Self::BoundTrx)
    }

    /// Whether we may push deliver_sm to the peer in this state.
    pub fn can_receive(&self) -> bool {
        matches!(self, Self::BoundRx | Self::BoundTrx)
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Self::BoundTx | Self::BoundRx | Self::BoundTrx)
    }
}

/// Handle to a session's transport: outbound PDU queue plus a close signal.
///
/// Cloneable and cheap; the session I/O loop holds the receiving ends.
#[derive(Clone)]
pub struct SessionHandle {
    outbound: mpsc::Sender<(Header, Pdu)>,
    close: watch::Sender<bool>,
}

/// Receiving ends of a [`SessionHandle`], owned by the session I/O loop.
pub struct SessionReceivers {
    pub outbound: mpsc::Receiver<(Header, Pdu)>,
    pub close: watch::Receiver<bool>,
}

impl SessionHandle {
    /// Create a connected handle/receiver pair.
    pub fn channel(capacity: usize) -> (Self, SessionReceivers) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (close_tx, close_rx) = watch::channel(false);
        (
            Self {
                outbound: outbound_tx,
                close: close_tx,
            },
            SessionReceivers {
                outbound: outbound_rx,
                close: close_rx,
            },
        )
    }

    /// Queue a PDU for the writer without blocking.
    pub fn send(&self, header: Header, pdu: Pdu) -> Result<(), SendError> {
        self.outbound.try_send((header, pdu)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Tell the session loop to wind down.
    pub fn signal_close(&self) {
        let _ = self.close.send(true);
    }
}

/// Shared per-processor state: lifecycle flag, group back-reference,
/// identity, verbosity and outbound sequencing.
pub struct ProcessorCore {
    active: AtomicBool,
    group: Mutex<Option<Arc<ProcessorGroup>>>,
    system_id: RwLock<Option<String>>,
    state: RwLock<BindState>,
    verbose: AtomicBool,
    sequence: AtomicU32,
    session: SessionHandle,
}

impl ProcessorCore {
    pub fn new(session: SessionHandle, verbose: bool) -> Self {
        Self {
            active: AtomicBool::new(true),
            group: Mutex::new(None),
            system_id: RwLock::new(None),
            state: RwLock::new(BindState::Open),
            verbose: AtomicBool::new(verbose),
            sequence: AtomicU32::new(1),
            session,
        }
    }

    /// Point-in-time activity snapshot; may go stale immediately.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Identity label, set once after a successful bind.
    pub fn system_id(&self) -> Option<String> {
        self.system_id.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_system_id(&self, system_id: String) {
        *self.system_id.write().unwrap_or_else(|e| e.into_inner()) = Some(system_id);
    }

    pub fn state(&self) -> BindState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_state(&self, state: BindState) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        debug!(from = ?*guard, to = ?state, "bind state transition");
        *guard = state;
    }

    pub fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Next outbound sequence number for server-initiated requests.
    pub fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Current group attachment, if any.
    pub fn group(&self) -> Option<Arc<ProcessorGroup>> {
        self.group.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Clear and return the group back-reference.
    ///
    /// Callers own the matching registry mutation; the two are only ever
    /// changed together (attach, terminate, or a coordinator drain).
    pub fn take_group(&self) -> Option<Arc<ProcessorGroup>> {
        self.group.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn set_group(&self, group: Arc<ProcessorGroup>) {
        *self.group.lock().unwrap_or_else(|e| e.into_inner()) = Some(group);
    }

    /// Terminal flip: inactive, closed, transport told to stop.
    ///
    /// Safe to call repeatedly; only the first call changes anything
    /// observable.
    pub fn shut_down(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!(system_id = ?self.system_id(), "processor shut down");
        }
        self.set_state(BindState::Closed);
        self.session.signal_close();
    }
}

/// The four-direction message contract every connection handler implements.
///
/// `handle_request`/`handle_response` run on the session task for PDUs read
/// off the wire; `send_request`/`send_response` are called by other
/// components (coordinator, delivery worker) to push PDUs toward the peer.
#[async_trait]
pub trait PduProcessor: Send + Sync {
    /// Shared lifecycle state.
    fn core(&self) -> &ProcessorCore;

    /// Process a request received from the remote peer.
    async fn handle_request(&self, frame: PduFrame);

    /// Process a response received from the remote peer. Unmatched or
    /// malformed correlation is logged, never an error.
    async fn handle_response(&self, frame: PduFrame);

    /// Push a server-initiated request to the peer. Assigns the sequence
    /// number and returns it.
    fn send_request(&self, pdu: Pdu) -> Result<u32, SendError> {
        let core = self.core();
        if !core.is_active() {
            return Err(SendError::Inactive);
        }
        let sequence = core.next_sequence();
        let header = Header::new(pdu.command(), sequence);
        core.session().send(header, pdu)?;
        Ok(sequence)
    }

    /// Push a response to the peer, echoing the request's sequence number.
    fn send_response(&self, sequence: u32, status: Status, pdu: Pdu) -> Result<(), SendError> {
        let core = self.core();
        if !core.is_active() {
            return Err(SendError::Inactive);
        }
        let header = Header::with_status(pdu.command(), sequence, status);
        core.session().send(header, pdu)
    }

    /// Activity snapshot; callers must tolerate staleness.
    fn is_active(&self) -> bool {
        self.core().is_active()
    }
}

/// Detach `proc` from its current group (if any) and attach it to `group`
/// (`None` means detach only). Each group's membership update is atomic on
/// its own lock; the move between two groups is not one global step.
pub async fn rebind(proc: &Arc<dyn PduProcessor>, group: Option<Arc<ProcessorGroup>>) {
    if let Some(old) = proc.core().take_group() {
        old.remove(proc).await;
    }
    if let Some(new) = group {
        new.add(Arc::clone(proc)).await;
        proc.core().set_group(new);
    }
}

/// Irreversible terminal transition: detach from the group (no-op when
/// already detached) and mark inactive. Idempotent in effect.
pub async fn terminate(proc: &Arc<dyn PduProcessor>) {
    if let Some(group) = proc.core().take_group() {
        group.remove(proc).await;
    }
    proc.core().shut_down();
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Minimal processor for group/lifecycle tests.
    pub struct StubProcessor {
        core: ProcessorCore,
    }

    impl StubProcessor {
        pub fn new(system_id: &str) -> Arc<dyn PduProcessor> {
            let (handle, _receivers) = SessionHandle::channel(16);
            let core = ProcessorCore::new(handle, false);
            core.set_system_id(system_id.to_string());
            Arc::new(Self { core })
        }
    }

    #[async_trait]
    impl PduProcessor for StubProcessor {
        fn core(&self) -> &ProcessorCore {
            &self.core
        }

        async fn handle_request(&self, _frame: PduFrame) {}

        async fn handle_response(&self, _frame: PduFrame) {}
    }
}
