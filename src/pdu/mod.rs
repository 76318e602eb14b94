//! SMPP PDU subset used by the simulator.
//!
//! Only the commands an ESME exchanges with an SMSC during a test session are
//! modelled: the bind family, submit_sm, deliver_sm, unbind, enquire_link and
//! generic_nack. Optional TLV parameters are not parsed; trailing body bytes
//! are ignored on decode.

mod codec;

use std::fmt;

use thiserror::Error;

pub use codec::SmppCodec;

/// Fixed SMPP header size in bytes.
pub const HEADER_LEN: usize = 16;

/// Upper bound on a single PDU, enforced by the decoder.
pub const MAX_PDU_LEN: usize = 64 * 1024;

/// Maximum short_message length (length field is a single octet; 254 per spec).
pub const MAX_SHORT_MESSAGE_LEN: usize = 254;

/// esm_class bit marking a deliver_sm as a delivery receipt.
pub const ESM_CLASS_DELIVERY_RECEIPT: u8 = 0x04;

/// PDU encode/decode errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("declared PDU length {0} out of range")]
    BadLength(u32),

    #[error("PDU body truncated while reading {0}")]
    Truncated(&'static str),

    #[error("unterminated or oversized C-string field {0}")]
    BadCString(&'static str),

    #[error("short message of {0} bytes exceeds the {MAX_SHORT_MESSAGE_LEN} byte limit")]
    MessageTooLong(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// SMPP command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    BindReceiver,
    BindReceiverResp,
    BindTransmitter,
    BindTransmitterResp,
    BindTransceiver,
    BindTransceiverResp,
    SubmitSm,
    SubmitSmResp,
    DeliverSm,
    DeliverSmResp,
    Unbind,
    UnbindResp,
    EnquireLink,
    EnquireLinkResp,
    GenericNack,
    /// Command id we do not implement; kept for nack responses.
    Other(u32),
}

impl Command {
    /// Numeric command_id for the wire.
    pub fn id(self) -> u32 {
        match self {
            Command::BindReceiver => 0x0000_0001,
            Command::BindReceiverResp => 0x8000_0001,
            Command::BindTransmitter => 0x0000_0002,
            Command::BindTransmitterResp => 0x8000_0002,
            Command::BindTransceiver => 0x0000_0009,
            Command::BindTransceiverResp => 0x8000_0009,
            Command::SubmitSm => 0x0000_0004,
            Command::SubmitSmResp => 0x8000_0004,
            Command::DeliverSm => 0x0000_0005,
            Command::DeliverSmResp => 0x8000_0005,
            Command::Unbind => 0x0000_0006,
            Command::UnbindResp => 0x8000_0006,
            Command::EnquireLink => 0x0000_0015,
            Command::EnquireLinkResp => 0x8000_0015,
            Command::GenericNack => 0x8000_0000,
            Command::Other(id) => id,
        }
    }

    /// Map a wire command_id back to a command.
    pub fn from_id(id: u32) -> Self {
        match id {
            0x0000_0001 => Command::BindReceiver,
            0x8000_0001 => Command::BindReceiverResp,
            0x0000_0002 => Command::BindTransmitter,
            0x8000_0002 => Command::BindTransmitterResp,
            0x0000_0009 => Command::BindTransceiver,
            0x8000_0009 => Command::BindTransceiverResp,
            0x0000_0004 => Command::SubmitSm,
            0x8000_0004 => Command::SubmitSmResp,
            0x0000_0005 => Command::DeliverSm,
            0x8000_0005 => Command::DeliverSmResp,
            0x0000_0006 => Command::Unbind,
            0x8000_0006 => Command::UnbindResp,
            0x0000_0015 => Command::EnquireLink,
            0x8000_0015 => Command::EnquireLinkResp,
            0x8000_0000 => Command::GenericNack,
            other => Command::Other(other),
        }
    }

    /// True for response-direction commands (high bit set).
    pub fn is_response(self) -> bool {
        self.id() & 0x8000_0000 != 0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Other(id) => write!(f, "unknown(0x{id:08x})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// SMPP command_status values the simulator produces or checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    InvalidMsgLength,
    InvalidCommandId,
    InvalidBindStatus,
    AlreadyBound,
    SystemError,
    BindFailed,
    InvalidPassword,
    InvalidSystemId,
    Other(u32),
}

impl Status {
    pub fn to_u32(self) -> u32 {
        match self {
            Status::Ok => 0x0000_0000,
            Status::InvalidMsgLength => 0x0000_0001,
            Status::InvalidCommandId => 0x0000_0003,
            Status::InvalidBindStatus => 0x0000_0004,
            Status::AlreadyBound => 0x0000_0005,
            Status::SystemError => 0x0000_0008,
            Status::BindFailed => 0x0000_000D,
            Status::InvalidPassword => 0x0000_000E,
            Status::InvalidSystemId => 0x0000_000F,
            Status::Other(v) => v,
        }
    }

    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0000_0000 => Status::Ok,
            0x0000_0001 => Status::InvalidMsgLength,
            0x0000_0003 => Status::InvalidCommandId,
            0x0000_0004 => Status::InvalidBindStatus,
            0x0000_0005 => Status::AlreadyBound,
            0x0000_0008 => Status::SystemError,
            0x0000_000D => Status::BindFailed,
            0x0000_000E => Status::InvalidPassword,
            0x0000_000F => Status::InvalidSystemId,
            other => Status::Other(other),
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.to_u32())
    }
}

/// The fixed 16-byte PDU header (length excluded; the codec owns it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: Command,
    pub status: Status,
    pub sequence: u32,
}

impl Header {
    /// Header for a request PDU (status zero).
    pub fn new(command: Command, sequence: u32) -> Self {
        Self {
            command,
            status: Status::Ok,
            sequence,
        }
    }

    /// Header carrying an explicit command_status, for responses.
    pub fn with_status(command: Command, sequence: u32, status: Status) -> Self {
        Self {
            command,
            status,
            sequence,
        }
    }
}

/// Fields shared by all three bind request variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindFields {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

impl BindFields {
    pub fn new(system_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            password: password.into(),
            interface_version: 0x34,
            ..Default::default()
        }
    }
}

/// Fields shared by all three bind response variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindRespFields {
    pub system_id: String,
}

/// submit_sm request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitSm {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub dest_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Vec<u8>,
}

impl SubmitSm {
    /// Build a submit_sm carrying `text`, rejecting oversized payloads.
    pub fn with_text(
        source: impl Into<String>,
        dest: impl Into<String>,
        text: &str,
    ) -> Result<Self, Error> {
        if text.len() > MAX_SHORT_MESSAGE_LEN {
            return Err(Error::MessageTooLong(text.len()));
        }
        Ok(Self {
            source_addr: source.into(),
            dest_addr: dest.into(),
            short_message: text.as_bytes().to_vec(),
            ..Default::default()
        })
    }

    /// short_message decoded leniently for display.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.short_message).into_owned()
    }
}

/// submit_sm_resp body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitSmResp {
    pub message_id: String,
}

/// deliver_sm request body (same layout as submit_sm).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverSm {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub dest_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Vec<u8>,
}

impl DeliverSm {
    /// Build a deliver_sm carrying `text`, rejecting oversized payloads.
    pub fn with_text(
        source: impl Into<String>,
        dest: impl Into<String>,
        text: &str,
    ) -> Result<Self, Error> {
        if text.len() > MAX_SHORT_MESSAGE_LEN {
            return Err(Error::MessageTooLong(text.len()));
        }
        Ok(Self {
            source_addr: source.into(),
            dest_addr: dest.into(),
            short_message: text.as_bytes().to_vec(),
            ..Default::default()
        })
    }

    /// Build a delivery receipt with the standard text format.
    pub fn delivery_receipt(
        source: impl Into<String>,
        dest: impl Into<String>,
        receipt_text: &str,
    ) -> Result<Self, Error> {
        let mut pdu = Self::with_text(source, dest, receipt_text)?;
        pdu.esm_class = ESM_CLASS_DELIVERY_RECEIPT;
        Ok(pdu)
    }

    /// True when the esm_class marks this PDU as a delivery receipt.
    pub fn is_delivery_receipt(&self) -> bool {
        self.esm_class & ESM_CLASS_DELIVERY_RECEIPT != 0
    }

    /// short_message decoded leniently for display.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.short_message).into_owned()
    }
}

/// deliver_sm_resp body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverSmResp {
    pub message_id: String,
}

/// Decoded PDU body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    BindReceiver(BindFields),
    BindReceiverResp(BindRespFields),
    BindTransmitter(BindFields),
    BindTransmitterResp(BindRespFields),
    BindTransceiver(BindFields),
    BindTransceiverResp(BindRespFields),
    SubmitSm(SubmitSm),
    SubmitSmResp(SubmitSmResp),
    DeliverSm(DeliverSm),
    DeliverSmResp(DeliverSmResp),
    Unbind,
    UnbindResp,
    EnquireLink,
    EnquireLinkResp,
    GenericNack,
    /// Body of an unimplemented command, bytes discarded.
    Other,
}

impl Pdu {
    /// The command this body belongs to.
    pub fn command(&self) -> Command {
        match self {
            Pdu::BindReceiver(_) => Command::BindReceiver,
            Pdu::BindReceiverResp(_) => Command::BindReceiverResp,
            Pdu::BindTransmitter(_) => Command::BindTransmitter,
            Pdu::BindTransmitterResp(_) => Command::BindTransmitterResp,
            Pdu::BindTransceiver(_) => Command::BindTransceiver,
            Pdu::BindTransceiverResp(_) => Command::BindTransceiverResp,
            Pdu::SubmitSm(_) => Command::SubmitSm,
            Pdu::SubmitSmResp(_) => Command::SubmitSmResp,
            Pdu::DeliverSm(_) => Command::DeliverSm,
            Pdu::DeliverSmResp(_) => Command::DeliverSmResp,
            Pdu::Unbind => Command::Unbind,
            Pdu::UnbindResp => Command::UnbindResp,
            Pdu::EnquireLink => Command::EnquireLink,
            Pdu::EnquireLinkResp => Command::EnquireLinkResp,
            Pdu::GenericNack => Command::GenericNack,
            Pdu::Other => Command::Other(0),
        }
    }
}

/// A decoded header/body pair as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduFrame {
    pub header: Header,
    pub pdu: Pdu,
}

impl PduFrame {
    pub fn new(header: Header, pdu: Pdu) -> Self {
        Self { header, pdu }
    }

    pub fn command(&self) -> Command {
        self.header.command
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn status(&self) -> Status {
        self.header.status
    }

    pub fn is_response(&self) -> bool {
        self.header.command.is_response()
    }
}
