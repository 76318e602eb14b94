//! Length-prefixed frame codec for SMPP PDUs.
//!
//! Wire layout: command_length (u32, includes itself), command_id, command_status,
//! sequence_number, then the command-specific body. All integers big-endian,
//! strings NUL-terminated ("C-octet strings").

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{
    BindFields, BindRespFields, Command, DeliverSm, DeliverSmResp, Error, Header, Pdu, PduFrame,
    Status, SubmitSm, SubmitSmResp, HEADER_LEN, MAX_PDU_LEN, MAX_SHORT_MESSAGE_LEN,
};

/// Codec for use with `tokio_util::codec::Framed`.
#[derive(Debug, Default)]
pub struct SmppCodec {
    _private: (),
}

impl SmppCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for SmppCodec {
    type Item = PduFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PduFrame>, Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let declared = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if (declared as usize) < HEADER_LEN || declared as usize > MAX_PDU_LEN {
            return Err(Error::BadLength(declared));
        }

        let total = declared as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        frame.advance(4);

        let command = Command::from_id(frame.get_u32());
        let status = Status::from_u32(frame.get_u32());
        let sequence = frame.get_u32();
        let header = Header {
            command,
            status,
            sequence,
        };

        let mut body = Reader::new(&frame);
        let pdu = decode_body(command, &mut body)?;

        Ok(Some(PduFrame::new(header, pdu)))
    }
}

impl Encoder<(Header, Pdu)> for SmppCodec {
    type Error = Error;

    fn encode(&mut self, item: (Header, Pdu), dst: &mut BytesMut) -> Result<(), Error> {
        let (header, pdu) = item;

        let mut body = BytesMut::new();
        encode_body(&pdu, &mut body)?;

        let total = HEADER_LEN + body.len();
        dst.reserve(total);
        dst.put_u32(total as u32);
        dst.put_u32(header.command.id());
        dst.put_u32(header.status.to_u32());
        dst.put_u32(header.sequence);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

impl Encoder<PduFrame> for SmppCodec {
    type Error = Error;

    fn encode(&mut self, frame: PduFrame, dst: &mut BytesMut) -> Result<(), Error> {
        self.encode((frame.header, frame.pdu), dst)
    }
}

fn decode_body(command: Command, body: &mut Reader<'_>) -> Result<Pdu, Error> {
    let pdu = match command {
        Command::BindReceiver => Pdu::BindReceiver(decode_bind(body)?),
        Command::BindTransmitter => Pdu::BindTransmitter(decode_bind(body)?),
        Command::BindTransceiver => Pdu::BindTransceiver(decode_bind(body)?),
        Command::BindReceiverResp => Pdu::BindReceiverResp(decode_bind_resp(body)?),
        Command::BindTransmitterResp => Pdu::BindTransmitterResp(decode_bind_resp(body)?),
        Command::BindTransceiverResp => Pdu::BindTransceiverResp(decode_bind_resp(body)?),
        Command::SubmitSm => Pdu::SubmitSm(decode_submit_sm(body)?),
        Command::SubmitSmResp => Pdu::SubmitSmResp(SubmitSmResp {
            message_id: body.c_string("message_id", 65)?,
        }),
        Command::DeliverSm => Pdu::DeliverSm(decode_deliver_sm(body)?),
        Command::DeliverSmResp => Pdu::DeliverSmResp(DeliverSmResp {
            message_id: body.c_string("message_id", 65)?,
        }),
        Command::Unbind => Pdu::Unbind,
        Command::UnbindResp => Pdu::UnbindResp,
        Command::EnquireLink => Pdu::EnquireLink,
        Command::EnquireLinkResp => Pdu::EnquireLinkResp,
        Command::GenericNack => Pdu::GenericNack,
        Command::Other(_) => Pdu::Other,
    };
    Ok(pdu)
}

fn decode_bind(body: &mut Reader<'_>) -> Result<BindFields, Error> {
    Ok(BindFields {
        system_id: body.c_string("system_id", 16)?,
        password: body.c_string("password", 9)?,
        system_type: body.c_string("system_type", 13)?,
        interface_version: body.u8("interface_version")?,
        addr_ton: body.u8("addr_ton")?,
        addr_npi: body.u8("addr_npi")?,
        address_range: body.c_string("address_range", 41)?,
    })
}

fn decode_bind_resp(body: &mut Reader<'_>) -> Result<BindRespFields, Error> {
    Ok(BindRespFields {
        system_id: body.c_string("system_id", 16)?,
    })
}

fn decode_submit_sm(body: &mut Reader<'_>) -> Result<SubmitSm, Error> {
    Ok(SubmitSm {
        service_type: body.c_string("service_type", 6)?,
        source_addr_ton: body.u8("source_addr_ton")?,
        source_addr_npi: body.u8("source_addr_npi")?,
        source_addr: body.c_string("source_addr", 21)?,
        dest_addr_ton: body.u8("dest_addr_ton")?,
        dest_addr_npi: body.u8("dest_addr_npi")?,
        dest_addr: body.c_string("dest_addr", 21)?,
        esm_class: body.u8("esm_class")?,
        protocol_id: body.u8("protocol_id")?,
        priority_flag: body.u8("priority_flag")?,
        schedule_delivery_time: body.c_string("schedule_delivery_time", 17)?,
        validity_period: body.c_string("validity_period", 17)?,
        registered_delivery: body.u8("registered_delivery")?,
        replace_if_present: body.u8("replace_if_present")?,
        data_coding: body.u8("data_coding")?,
        sm_default_msg_id: body.u8("sm_default_msg_id")?,
        short_message: body.short_message()?,
    })
}

fn decode_deliver_sm(body: &mut Reader<'_>) -> Result<DeliverSm, Error> {
    let sm = decode_submit_sm(body)?;
    Ok(DeliverSm {
        service_type: sm.service_type,
        source_addr_ton: sm.source_addr_ton,
        source_addr_npi: sm.source_addr_npi,
        source_addr: sm.source_addr,
        dest_addr_ton: sm.dest_addr_ton,
        dest_addr_npi: sm.dest_addr_npi,
        dest_addr: sm.dest_addr,
        esm_class: sm.esm_class,
        protocol_id: sm.protocol_id,
        priority_flag: sm.priority_flag,
        schedule_delivery_time: sm.schedule_delivery_time,
        validity_period: sm.validity_period,
        registered_delivery: sm.registered_delivery,
        replace_if_present: sm.replace_if_present,
        data_coding: sm.data_coding,
        sm_default_msg_id: sm.sm_default_msg_id,
        short_message: sm.short_message,
    })
}

fn encode_body(pdu: &Pdu, dst: &mut BytesMut) -> Result<(), Error> {
    match pdu {
        Pdu::BindReceiver(b) | Pdu::BindTransmitter(b) | Pdu::BindTransceiver(b) => {
            put_c_string(dst, &b.system_id);
            put_c_string(dst, &b.password);
            put_c_string(dst, &b.system_type);
            dst.put_u8(b.interface_version);
            dst.put_u8(b.addr_ton);
            dst.put_u8(b.addr_npi);
            put_c_string(dst, &b.address_range);
        }
        Pdu::BindReceiverResp(r) | Pdu::BindTransmitterResp(r) | Pdu::BindTransceiverResp(r) => {
            put_c_string(dst, &r.system_id);
        }
        Pdu::SubmitSm(s) => {
            encode_sm_fields(
                dst,
                &s.service_type,
                s.source_addr_ton,
                s.source_addr_npi,
                &s.source_addr,
                s.dest_addr_ton,
                s.dest_addr_npi,
                &s.dest_addr,
                s.esm_class,
                s.protocol_id,
                s.priority_flag,
                &s.schedule_delivery_time,
                &s.validity_period,
                s.registered_delivery,
                s.replace_if_present,
                s.data_coding,
                s.sm_default_msg_id,
                &s.short_message,
            )?;
        }
        Pdu::DeliverSm(s) => {
            encode_sm_fields(
                dst,
                &s.service_type,
                s.source_addr_ton,
                s.source_addr_npi,
                &s.source_addr,
                s.dest_addr_ton,
                s.dest_addr_npi,
                &s.dest_addr,
                s.esm_class,
                s.protocol_id,
                s.priority_flag,
                &s.schedule_delivery_time,
                &s.validity_period,
                s.registered_delivery,
                s.replace_if_present,
                s.data_coding,
                s.sm_default_msg_id,
                &s.short_message,
            )?;
        }
        Pdu::SubmitSmResp(r) => put_c_string(dst, &r.message_id),
        Pdu::DeliverSmResp(r) => put_c_string(dst, &r.message_id),
        Pdu::Unbind
        | Pdu::UnbindResp
        | Pdu::EnquireLink
        | Pdu::EnquireLinkResp
        | Pdu::GenericNack
        | Pdu::Other => {}
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn encode_sm_fields(
    dst: &mut BytesMut,
    service_type: &str,
    source_addr_ton: u8,
    source_addr_npi: u8,
    source_addr: &str,
    dest_addr_ton: u8,
    dest_addr_npi: u8,
    dest_addr: &str,
    esm_class: u8,
    protocol_id: u8,
    priority_flag: u8,
    schedule_delivery_time: &str,
    validity_period: &str,
    registered_delivery: u8,
    replace_if_present: u8,
    data_coding: u8,
    sm_default_msg_id: u8,
    short_message: &[u8],
) -> Result<(), Error> {
    if short_message.len() > MAX_SHORT_MESSAGE_LEN {
        return Err(Error::MessageTooLong(short_message.len()));
    }

    put_c_string(dst, service_type);
    dst.put_u8(source_addr_ton);
    dst.put_u8(source_addr_npi);
    put_c_string(dst, source_addr);
    dst.put_u8(dest_addr_ton);
    dst.put_u8(dest_addr_npi);
    put_c_string(dst, dest_addr);
    dst.put_u8(esm_class);
    dst.put_u8(protocol_id);
    dst.put_u8(priority_flag);
    put_c_string(dst, schedule_delivery_time);
    put_c_string(dst, validity_period);
    dst.put_u8(registered_delivery);
    dst.put_u8(replace_if_present);
    dst.put_u8(data_coding);
    dst.put_u8(sm_default_msg_id);
    dst.put_u8(short_message.len() as u8);
    dst.extend_from_slice(short_message);
    Ok(())
}

fn put_c_string(dst: &mut BytesMut, s: &str) {
    dst.extend_from_slice(s.as_bytes());
    dst.put_u8(0);
}

/// Cursor over a PDU body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, Error> {
        let b = *self.buf.get(self.pos).ok_or(Error::Truncated(field))?;
        self.pos += 1;
        Ok(b)
    }

    fn c_string(&mut self, field: &'static str, max: usize) -> Result<String, Error> {
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::BadCString(field))?;
        if nul >= max {
            return Err(Error::BadCString(field));
        }
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    fn short_message(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.u8("sm_length")? as usize;
        let rest = &self.buf[self.pos.min(self.buf.len())..];
        if rest.len() < len {
            return Err(Error::Truncated("short_message"));
        }
        self.pos += len;
        Ok(rest[..len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(header: Header, pdu: Pdu) -> PduFrame {
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::new();
        codec.encode((header, pdu), &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn test_bind_round_trip() {
        let bind = BindFields::new("alice", "secret");
        let frame = round_trip(
            Header::new(Command::BindTransceiver, 7),
            Pdu::BindTransceiver(bind.clone()),
        );

        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.command(), Command::BindTransceiver);
        assert_eq!(frame.pdu, Pdu::BindTransceiver(bind));
    }

    #[test]
    fn test_submit_sm_round_trip() {
        let submit = SubmitSm::with_text("1234", "5678", "hello world").unwrap();
        let frame = round_trip(
            Header::new(Command::SubmitSm, 42),
            Pdu::SubmitSm(submit.clone()),
        );

        match frame.pdu {
            Pdu::SubmitSm(decoded) => {
                assert_eq!(decoded.source_addr, "1234");
                assert_eq!(decoded.dest_addr, "5678");
                assert_eq!(decoded.text(), "hello world");
            }
            other => panic!("unexpected pdu: {other:?}"),
        }
    }

    #[test]
    fn test_deliver_sm_resp_status() {
        let header = Header::with_status(Command::SubmitSmResp, 3, Status::InvalidBindStatus);
        let frame = round_trip(
            header,
            Pdu::SubmitSmResp(SubmitSmResp {
                message_id: "msg1".into(),
            }),
        );

        assert_eq!(frame.status(), Status::InvalidBindStatus);
        assert!(frame.is_response());
    }

    #[test]
    fn test_partial_frame_needs_more_data() {
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                (Header::new(Command::EnquireLink, 1), Pdu::EnquireLink),
                &mut buf,
            )
            .unwrap();

        // Feed all but the last byte: decoder must wait.
        let last = buf.split_off(buf.len() - 1);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&last);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.command(), Command::EnquireLink);
    }

    #[test]
    fn test_bad_declared_length_rejected() {
        let mut codec = SmppCodec::new();

        let mut buf = BytesMut::new();
        buf.put_u32(8); // shorter than a header
        buf.put_u32(Command::EnquireLink.id());
        assert!(matches!(codec.decode(&mut buf), Err(Error::BadLength(8))));

        let mut buf = BytesMut::new();
        buf.put_u32((MAX_PDU_LEN + 1) as u32);
        assert!(matches!(codec.decode(&mut buf), Err(Error::BadLength(_))));
    }

    #[test]
    fn test_unknown_command_decodes_as_other() {
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(HEADER_LEN as u32);
        buf.put_u32(0x0000_00AB);
        buf.put_u32(0);
        buf.put_u32(9);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.command(), Command::Other(0x0000_00AB));
        assert_eq!(frame.pdu, Pdu::Other);
        assert_eq!(frame.sequence(), 9);
    }

    #[test]
    fn test_truncated_body_is_error() {
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::new();
        // bind_transceiver with an empty body: c_string read must fail.
        buf.put_u32(HEADER_LEN as u32);
        buf.put_u32(Command::BindTransceiver.id());
        buf.put_u32(0);
        buf.put_u32(1);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::BadCString("system_id"))
        ));
    }
}
