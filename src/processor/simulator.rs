//! The simulator's concrete PDU processor.
//!
//! Authenticates binds against the users table, records accepted messages,
//! schedules delivery receipts and answers the housekeeping PDUs. One
//! instance per connection, created by [`ProcessorFactory`] and attached to
//! the shared group before the session loop starts reading.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::delivery::{DeliveryHandle, DeliveryInfo};
use crate::pdu::{BindFields, BindRespFields, Pdu, PduFrame, Status, SubmitSm, SubmitSmResp};
use crate::store::ShortMessageStore;
use crate::users::UserTable;

use super::{rebind, BindState, PduProcessor, ProcessorCore, ProcessorGroup, SendError, SessionHandle};

/// System id the simulator reports in bind responses.
const SMSC_SYSTEM_ID: &str = "smscsim";

/// Per-connection protocol handler for the simulated SMSC.
pub struct SimulatorProcessor {
    core: ProcessorCore,
    users: Arc<UserTable>,
    store: Arc<ShortMessageStore>,
    delivery: DeliveryHandle,
    weak_self: Weak<SimulatorProcessor>,
}

impl SimulatorProcessor {
    fn new(
        session: SessionHandle,
        users: Arc<UserTable>,
        store: Arc<ShortMessageStore>,
        delivery: DeliveryHandle,
        verbose: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            core: ProcessorCore::new(session, verbose),
            users,
            store,
            delivery,
            weak_self: weak.clone(),
        })
    }

    async fn handle_bind(&self, sequence: u32, bind: BindFields, mode: BindState) {
        if self.core.state() != BindState::Open {
            warn!(system_id = %bind.system_id, "bind while already bound");
            self.send_bind_resp(sequence, Status::AlreadyBound, "", mode);
            return;
        }

        let status = match self.users.lookup(&bind.system_id) {
            None => {
                warn!(system_id = %bind.system_id, "bind from unknown system id");
                Status::InvalidSystemId
            }
            Some(record) if record.password() != Some(bind.password.as_str()) => {
                warn!(system_id = %bind.system_id, "bind with wrong password");
                Status::InvalidPassword
            }
            Some(_) => Status::Ok,
        };

        if status.is_ok() {
            self.core.set_system_id(bind.system_id.clone());
            self.core.set_state(mode);
            info!(system_id = %bind.system_id, state = ?mode, "client bound");
        }

        let smsc_id = if status.is_ok() { SMSC_SYSTEM_ID } else { "" };
        self.send_bind_resp(sequence, status, smsc_id, mode);
    }

    fn send_bind_resp(&self, sequence: u32, status: Status, system_id: &str, mode: BindState) {
        let fields = BindRespFields {
            system_id: system_id.to_string(),
        };
        let pdu = match mode {
            BindState::BoundTx => Pdu::BindTransmitterResp(fields),
            BindState::BoundRx => Pdu::BindReceiverResp(fields),
            _ => Pdu::BindTransceiverResp(fields),
        };
        self.report_send(self.send_response(sequence, status, pdu));
    }

    async fn handle_submit_sm(&self, sequence: u32, submit: SubmitSm) {
        if !self.core.state().can_send() {
            self.report_send(self.send_response(
                sequence,
                Status::InvalidBindStatus,
                Pdu::SubmitSmResp(SubmitSmResp::default()),
            ));
            return;
        }

        let system_id = self.core.system_id().unwrap_or_default();
        let message_id = self.store.record(
            &system_id,
            &submit.source_addr,
            &submit.dest_addr,
            submit.text(),
        );

        if self.core.verbose() {
            info!(
                system_id = %system_id,
                source = %submit.source_addr,
                dest = %submit.dest_addr,
                message_id = %message_id,
                "submit_sm accepted"
            );
        }

        self.report_send(self.send_response(
            sequence,
            Status::Ok,
            Pdu::SubmitSmResp(SubmitSmResp {
                message_id: message_id.clone(),
            }),
        ));

        if submit.registered_delivery != 0 {
            if let Some(proc) = self.weak_self.upgrade() {
                self.delivery.enqueue(DeliveryInfo {
                    processor: proc,
                    message_id,
                    source_addr: submit.source_addr,
                    dest_addr: submit.dest_addr,
                    submitted_at: Utc::now(),
                });
            }
        }
    }

    async fn handle_unbind(&self, sequence: u32) {
        info!(system_id = ?self.core.system_id(), "unbind request");
        self.report_send(self.send_response(sequence, Status::Ok, Pdu::UnbindResp));
        self.core.shut_down();
    }

    /// Send failures here mean the session is going away; log, never escalate.
    fn report_send(&self, result: Result<(), SendError>) {
        if let Err(e) = result {
            debug!(error = %e, "outbound send skipped");
        }
    }
}

#[async_trait]
impl PduProcessor for SimulatorProcessor {
    fn core(&self) -> &ProcessorCore {
        &self.core
    }

    async fn handle_request(&self, frame: PduFrame) {
        if self.core.verbose() {
            info!(
                command = %frame.command(),
                sequence = frame.sequence(),
                system_id = ?self.core.system_id(),
                "request received"
            );
        }

        let sequence = frame.sequence();
        match frame.pdu {
            Pdu::BindTransmitter(bind) => {
                self.handle_bind(sequence, bind, BindState::BoundTx).await
            }
            Pdu::BindReceiver(bind) => self.handle_bind(sequence, bind, BindState::BoundRx).await,
            Pdu::BindTransceiver(bind) => {
                self.handle_bind(sequence, bind, BindState::BoundTrx).await
            }
            Pdu::SubmitSm(submit) => self.handle_submit_sm(sequence, submit).await,
            Pdu::Unbind => self.handle_unbind(sequence).await,
            Pdu::EnquireLink => {
                self.report_send(self.send_response(sequence, Status::Ok, Pdu::EnquireLinkResp));
            }
            other => {
                warn!(command = %other.command(), "unsupported request");
                self.report_send(self.send_response(
                    sequence,
                    Status::InvalidCommandId,
                    Pdu::GenericNack,
                ));
            }
        }
    }

    async fn handle_response(&self, frame: PduFrame) {
        // The simulator keeps no pending-request table; responses are
        // acknowledgements for deliver_sm and are only ever logged.
        match &frame.pdu {
            Pdu::DeliverSmResp(_) => {
                debug!(
                    sequence = frame.sequence(),
                    status = %frame.status(),
                    "deliver_sm acknowledged"
                );
            }
            Pdu::GenericNack => {
                warn!(
                    sequence = frame.sequence(),
                    status = %frame.status(),
                    "peer rejected a request"
                );
            }
            _ => {
                debug!(
                    command = %frame.command(),
                    sequence = frame.sequence(),
                    "unexpected response ignored"
                );
            }
        }
    }
}

/// Builds one attached [`SimulatorProcessor`] per accepted connection.
///
/// Holds the shared display flag so toggling verbosity applies to future
/// sessions as well as current ones.
pub struct ProcessorFactory {
    group: Arc<ProcessorGroup>,
    users: Arc<UserTable>,
    store: Arc<ShortMessageStore>,
    delivery: DeliveryHandle,
    display_info: Arc<AtomicBool>,
}

impl ProcessorFactory {
    pub fn new(
        group: Arc<ProcessorGroup>,
        users: Arc<UserTable>,
        store: Arc<ShortMessageStore>,
        delivery: DeliveryHandle,
        display_info: Arc<AtomicBool>,
    ) -> Self {
        Self {
            group,
            users,
            store,
            delivery,
            display_info,
        }
    }

    /// Construct a processor for a new session, already attached to the
    /// group, inheriting the current display setting.
    pub async fn create(&self, session: SessionHandle) -> Arc<dyn PduProcessor> {
        let proc: Arc<dyn PduProcessor> = SimulatorProcessor::new(
            session,
            self.users.clone(),
            self.store.clone(),
            self.delivery.clone(),
            self.display_info.load(Ordering::Relaxed),
        );
        rebind(&proc, Some(self.group.clone())).await;
        proc
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio::time::{timeout, Duration};

    use crate::delivery::DeliveryInfoSender;
    use crate::pdu::{Command, Header};
    use crate::processor::SessionReceivers;

    use super::*;

    const USERS: &str = "name=alice\npassword=secret\n\nname=bob\npassword=hunter2\n";

    fn user_table() -> (Arc<UserTable>, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(USERS.as_bytes()).unwrap();
        file.flush().unwrap();
        let table = Arc::new(UserTable::load(file.path()).unwrap());
        (table, file)
    }

    struct Fixture {
        proc: Arc<SimulatorProcessor>,
        receivers: SessionReceivers,
        store: Arc<ShortMessageStore>,
        sender: DeliveryInfoSender,
        _users_file: tempfile::NamedTempFile,
    }

    fn fixture() -> Fixture {
        let (users, users_file) = user_table();
        let store = Arc::new(ShortMessageStore::new());
        let sender = DeliveryInfoSender::new();
        let (session, receivers) = SessionHandle::channel(16);
        let proc = SimulatorProcessor::new(session, users, store.clone(), sender.handle(), false);
        Fixture {
            proc,
            receivers,
            store,
            sender,
            _users_file: users_file,
        }
    }

    fn request(command: Command, sequence: u32, pdu: Pdu) -> PduFrame {
        PduFrame::new(Header::new(command, sequence), pdu)
    }

    async fn next_outbound(receivers: &mut SessionReceivers) -> (Header, Pdu) {
        timeout(Duration::from_secs(5), receivers.outbound.recv())
            .await
            .expect("timed out waiting for outbound pdu")
            .expect("outbound channel closed")
    }

    async fn bind(fx: &mut Fixture, system_id: &str, password: &str) -> (Header, Pdu) {
        fx.proc
            .handle_request(request(
                Command::BindTransceiver,
                1,
                Pdu::BindTransceiver(BindFields::new(system_id, password)),
            ))
            .await;
        next_outbound(&mut fx.receivers).await
    }

    #[tokio::test]
    async fn test_bind_with_valid_credentials() {
        let mut fx = fixture();
        let (header, pdu) = bind(&mut fx, "alice", "secret").await;

        assert_eq!(header.command, Command::BindTransceiverResp);
        assert_eq!(header.status, Status::Ok);
        assert_eq!(header.sequence, 1);
        match pdu {
            Pdu::BindTransceiverResp(fields) => assert_eq!(fields.system_id, "smscsim"),
            other => panic!("unexpected pdu: {other:?}"),
        }
        assert_eq!(fx.proc.core().state(), BindState::BoundTrx);
        assert_eq!(fx.proc.core().system_id().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_bind_rejects_unknown_system_id() {
        let mut fx = fixture();
        let (header, _) = bind(&mut fx, "mallory", "secret").await;

        assert_eq!(header.status, Status::InvalidSystemId);
        assert_eq!(fx.proc.core().state(), BindState::Open);
        assert_eq!(fx.proc.core().system_id(), None);
    }

    #[tokio::test]
    async fn test_bind_rejects_wrong_password() {
        let mut fx = fixture();
        let (header, _) = bind(&mut fx, "alice", "wrong").await;

        assert_eq!(header.status, Status::InvalidPassword);
        assert_eq!(fx.proc.core().state(), BindState::Open);
    }

    #[tokio::test]
    async fn test_second_bind_is_rejected() {
        let mut fx = fixture();
        bind(&mut fx, "alice", "secret").await;

        fx.proc
            .handle_request(request(
                Command::BindTransmitter,
                2,
                Pdu::BindTransmitter(BindFields::new("bob", "hunter2")),
            ))
            .await;
        let (header, _) = next_outbound(&mut fx.receivers).await;

        assert_eq!(header.command, Command::BindTransmitterResp);
        assert_eq!(header.status, Status::AlreadyBound);
        // The original bind is untouched.
        assert_eq!(fx.proc.core().system_id().as_deref(), Some("alice"));
        assert_eq!(fx.proc.core().state(), BindState::BoundTrx);
    }

    #[tokio::test]
    async fn test_submit_sm_records_and_acks() {
        let mut fx = fixture();
        bind(&mut fx, "alice", "secret").await;

        let submit = SubmitSm::with_text("1000", "2000", "hello").unwrap();
        fx.proc
            .handle_request(request(Command::SubmitSm, 2, Pdu::SubmitSm(submit)))
            .await;
        let (header, pdu) = next_outbound(&mut fx.receivers).await;

        assert_eq!(header.command, Command::SubmitSmResp);
        assert_eq!(header.status, Status::Ok);
        let message_id = match pdu {
            Pdu::SubmitSmResp(resp) => resp.message_id,
            other => panic!("unexpected pdu: {other:?}"),
        };

        let all = fx.store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message_id, message_id);
        assert_eq!(all[0].system_id, "alice");
        assert_eq!(all[0].text, "hello");
    }

    #[tokio::test]
    async fn test_submit_sm_before_bind_is_rejected() {
        let mut fx = fixture();

        let submit = SubmitSm::with_text("1000", "2000", "hello").unwrap();
        fx.proc
            .handle_request(request(Command::SubmitSm, 1, Pdu::SubmitSm(submit)))
            .await;
        let (header, _) = next_outbound(&mut fx.receivers).await;

        assert_eq!(header.command, Command::SubmitSmResp);
        assert_eq!(header.status, Status::InvalidBindStatus);
        assert_eq!(fx.store.count(), 0);
    }

    #[tokio::test]
    async fn test_registered_delivery_triggers_receipt() {
        let mut fx = fixture();
        fx.sender.start();
        bind(&mut fx, "alice", "secret").await;

        let mut submit = SubmitSm::with_text("1000", "2000", "hello").unwrap();
        submit.registered_delivery = 1;
        fx.proc
            .handle_request(request(Command::SubmitSm, 2, Pdu::SubmitSm(submit)))
            .await;

        let (header, _) = next_outbound(&mut fx.receivers).await;
        assert_eq!(header.command, Command::SubmitSmResp);

        // The delivery worker pushes the receipt back through this session.
        let (header, pdu) = next_outbound(&mut fx.receivers).await;
        assert_eq!(header.command, Command::DeliverSm);
        match pdu {
            Pdu::DeliverSm(receipt) => {
                assert!(receipt.is_delivery_receipt());
                assert_eq!(receipt.source_addr, "2000");
                assert_eq!(receipt.dest_addr, "1000");
                assert!(receipt.text().contains("stat:DELIVRD"));
            }
            other => panic!("unexpected pdu: {other:?}"),
        }

        fx.sender.stop().await;
    }

    #[tokio::test]
    async fn test_unbind_acks_then_shuts_down() {
        let mut fx = fixture();
        bind(&mut fx, "alice", "secret").await;

        fx.proc
            .handle_request(request(Command::Unbind, 2, Pdu::Unbind))
            .await;
        let (header, pdu) = next_outbound(&mut fx.receivers).await;

        assert_eq!(header.command, Command::UnbindResp);
        assert_eq!(pdu, Pdu::UnbindResp);
        assert!(!fx.proc.core().is_active());
        assert_eq!(fx.proc.core().state(), BindState::Closed);
    }

    #[tokio::test]
    async fn test_enquire_link_is_answered() {
        let mut fx = fixture();
        fx.proc
            .handle_request(request(Command::EnquireLink, 7, Pdu::EnquireLink))
            .await;
        let (header, pdu) = next_outbound(&mut fx.receivers).await;

        assert_eq!(header.command, Command::EnquireLinkResp);
        assert_eq!(header.status, Status::Ok);
        assert_eq!(header.sequence, 7);
        assert_eq!(pdu, Pdu::EnquireLinkResp);
    }

    #[tokio::test]
    async fn test_unknown_command_gets_generic_nack() {
        let mut fx = fixture();
        fx.proc
            .handle_request(request(Command::Other(0x0102), 9, Pdu::Other))
            .await;
        let (header, pdu) = next_outbound(&mut fx.receivers).await;

        assert_eq!(header.command, Command::GenericNack);
        assert_eq!(header.status, Status::InvalidCommandId);
        assert_eq!(pdu, Pdu::GenericNack);
    }

    #[tokio::test]
    async fn test_factory_attaches_new_processors() {
        let (users, _file) = user_table();
        let group = ProcessorGroup::new();
        let sender = DeliveryInfoSender::new();
        let factory = ProcessorFactory::new(
            group.clone(),
            users,
            Arc::new(ShortMessageStore::new()),
            sender.handle(),
            Arc::new(AtomicBool::new(false)),
        );

        let (session, _receivers) = SessionHandle::channel(16);
        let proc = factory.create(session).await;

        assert_eq!(group.count().await, 1);
        let found = group.exclusive().await;
        assert!(Arc::ptr_eq(found.at(0).unwrap(), &proc));
    }
}
