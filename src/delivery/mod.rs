//! Asynchronous delivery receipt sender.
//!
//! Decouples "this submit wants a delivery receipt" from the session task
//! that accepted it: receipts are queued here and a dedicated worker task
//! formats and dispatches each one through the originating processor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pdu::{DeliverSm, Pdu};
use crate::processor::{PduProcessor, SendError};

const QUEUE_CAPACITY: usize = 10_000;

/// A pending delivery receipt.
pub struct DeliveryInfo {
    /// Processor of the session the receipt goes back to.
    pub processor: Arc<dyn PduProcessor>,
    /// Message id assigned at submit time.
    pub message_id: String,
    /// Source address of the original message.
    pub source_addr: String,
    /// Destination address of the original message.
    pub dest_addr: String,
    pub submitted_at: DateTime<Utc>,
}

impl DeliveryInfo {
    /// Standard receipt text for this message, DELIVRD status.
    fn receipt_text(&self, done_at: DateTime<Utc>) -> String {
        format!(
            "id:{} sub:001 dlvrd:001 submit date:{} done date:{} stat:DELIVRD err:000 text:",
            self.message_id,
            self.submitted_at.format("%y%m%d%H%M"),
            done_at.format("%y%m%d%H%M"),
        )
    }
}

/// Cloneable handle for queueing receipts from session tasks.
#[derive(Clone)]
pub struct DeliveryHandle {
    tx: mpsc::Sender<DeliveryInfo>,
}

impl DeliveryHandle {
    /// Queue a receipt without blocking; drops with a log line on overflow.
    pub fn enqueue(&self, info: DeliveryInfo) {
        if let Err(e) = self.tx.try_send(info) {
            warn!(error = %e, "delivery receipt dropped");
        }
    }
}

/// Background worker with an explicit start/enqueue/stop lifecycle.
///
/// `start` is idempotent, `enqueue` never blocks the caller, and `stop`
/// returns only after the worker task has exited so no receipt can be
/// dispatched into a torn-down session set.
pub struct DeliveryInfoSender {
    tx: mpsc::Sender<DeliveryInfo>,
    rx: Option<mpsc::Receiver<DeliveryInfo>>,
    shutdown: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl DeliveryInfoSender {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            tx,
            rx: Some(rx),
            shutdown,
            worker: None,
        }
    }

    /// Spawn the worker loop. Starting twice is a no-op.
    pub fn start(&mut self) {
        let Some(rx) = self.rx.take() else {
            return;
        };

        let shutdown_rx = self.shutdown.subscribe();
        self.worker = Some(tokio::spawn(run_worker(rx, shutdown_rx)));
        debug!("delivery info sender started");
    }

    /// Queue a receipt for dispatch. Fire-and-forget: a full or closed
    /// queue drops the receipt with a log line rather than blocking.
    pub fn enqueue(&self, info: DeliveryInfo) {
        if let Err(e) = self.tx.try_send(info) {
            warn!(error = %e, "delivery receipt dropped");
        }
    }

    /// Signal the worker to finish its current item and exit, then wait
    /// for the task to actually end.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "delivery worker join failed");
            }
        }
    }

    /// Whether the worker task is currently running.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Handle for queueing receipts from other tasks.
    pub fn handle(&self) -> DeliveryHandle {
        DeliveryHandle {
            tx: self.tx.clone(),
        }
    }
}

impl Default for DeliveryInfoSender {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<DeliveryInfo>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("delivery worker started");

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                // A dropped sender counts as shutdown too.
                if changed.is_err() || *shutdown_rx.borrow_and_update() {
                    break;
                }
            }

            item = rx.recv() => {
                let Some(info) = item else {
                    break;
                };
                dispatch(info);
            }
        }
    }

    info!("delivery worker stopped");
}

fn dispatch(info: DeliveryInfo) {
    let text = info.receipt_text(Utc::now());

    // Receipt direction is reversed relative to the original message.
    let receipt = match DeliverSm::delivery_receipt(&info.dest_addr, &info.source_addr, &text) {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!(message_id = %info.message_id, error = %e, "receipt build failed");
            return;
        }
    };

    match info.processor.send_request(Pdu::DeliverSm(receipt)) {
        Ok(sequence) => {
            debug!(
                message_id = %info.message_id,
                sequence,
                "delivery receipt dispatched"
            );
        }
        Err(SendError::Inactive) => {
            debug!(
                message_id = %info.message_id,
                "session gone before receipt, skipping"
            );
        }
        Err(e) => {
            warn!(
                message_id = %info.message_id,
                error = %e,
                "delivery receipt send failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::time::{timeout, Duration};

    use crate::pdu::{Command, PduFrame};
    use crate::processor::{ProcessorCore, SessionHandle, SessionReceivers};

    use super::*;

    struct RecordingProcessor {
        core: ProcessorCore,
    }

    #[async_trait]
    impl PduProcessor for RecordingProcessor {
        fn core(&self) -> &ProcessorCore {
            &self.core
        }
        async fn handle_request(&self, _frame: PduFrame) {}
        async fn handle_response(&self, _frame: PduFrame) {}
    }

    fn recording_processor() -> (Arc<dyn PduProcessor>, SessionReceivers) {
        let (handle, receivers) = SessionHandle::channel(16);
        (
            Arc::new(RecordingProcessor {
                core: ProcessorCore::new(handle, false),
            }),
            receivers,
        )
    }

    fn info_for(proc: Arc<dyn PduProcessor>) -> DeliveryInfo {
        DeliveryInfo {
            processor: proc,
            message_id: "42".into(),
            source_addr: "1000".into(),
            dest_addr: "2000".into(),
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_receipt_dispatched_to_processor() {
        let (proc, mut receivers) = recording_processor();
        let mut sender = DeliveryInfoSender::new();
        sender.start();

        sender.enqueue(info_for(proc));

        let (header, pdu) = timeout(Duration::from_secs(5), receivers.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(header.command, Command::DeliverSm);

        match pdu {
            Pdu::DeliverSm(receipt) => {
                assert!(receipt.is_delivery_receipt());
                // Direction is reversed: receipt goes back toward the source.
                assert_eq!(receipt.source_addr, "2000");
                assert_eq!(receipt.dest_addr, "1000");
                assert!(receipt.text().contains("id:42"));
                assert!(receipt.text().contains("stat:DELIVRD"));
            }
            other => panic!("unexpected pdu: {other:?}"),
        }

        sender.stop().await;
    }

    #[tokio::test]
    async fn test_stop_joins_worker() {
        let mut sender = DeliveryInfoSender::new();
        sender.start();
        assert!(sender.is_running());

        sender.stop().await;
        assert!(!sender.is_running());
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let mut sender = DeliveryInfoSender::new();
        sender.start();
        assert!(sender.rx.is_none());
        assert!(sender.is_running());

        // Second start has no receiver to hand a new worker.
        sender.start();
        assert!(sender.is_running());
        sender.stop().await;
        assert!(!sender.is_running());
    }

    #[tokio::test]
    async fn test_inactive_processor_is_skipped() {
        let (proc, receivers) = recording_processor();
        proc.core().shut_down();
        drop(receivers);

        let mut sender = DeliveryInfoSender::new();
        sender.start();
        sender.enqueue(info_for(proc));
        sender.stop().await;
    }
}
