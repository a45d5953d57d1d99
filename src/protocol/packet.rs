//! Top-level packet enum and incremental-buffer framing.
//!
//! Mirrors the teacher's `(packet, consumed_bytes)` framing shape used by
//! protocol readers that sit in front of a socket buffer: [`Packet::parse`]
//! returns `Ok(None)` when the buffer doesn't yet hold a whole packet rather
//! than erroring, so the caller just keeps reading.

use std::io::Cursor;

use super::ack::PacketIdAck;
use super::connect::{ConnAck, Connect};
use super::header::FixedHeader;
use super::packet_type::PacketType;
use super::publish::Publish;
use super::subscribe::{SubAck, Subscribe, UnsubAck, Unsubscribe};
use super::traits::{ReadError, ReadType, WriteError, WriteType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PacketIdAck),
    PubRec(PacketIdAck),
    PubRel(PacketIdAck),
    PubComp(PacketIdAck),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// Parses the next whole packet out of `buf`, returning it and the number
    /// of bytes consumed, or `None` if `buf` does not yet contain a complete
    /// packet (the caller should read more bytes and retry).
    ///
    /// `max_packet_size` is `message_size_limit` (spec §6 settings); a
    /// remaining length beyond it is a protocol error, not "need more data".
    pub fn parse(buf: &[u8], max_packet_size: usize) -> Result<Option<(Packet, usize)>, ReadError> {
        let mut head_cursor = Cursor::new(buf);
        let header = match FixedHeader::read(&mut head_cursor) {
            Ok(h) => h,
            Err(ReadError::IO(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let header_len = head_cursor.position() as usize;
        let remaining = header.remaining_length as usize;
        if remaining > max_packet_size {
            return Err(ReadError::Malformed(
                format!("packet of {remaining} bytes exceeds max_packet_size {max_packet_size}").into(),
            ));
        }
        let total = header_len + remaining;
        if buf.len() < total {
            return Ok(None);
        }
        let body = &buf[header_len..total];
        let packet = Self::from_header_and_body(&header, body)?;
        Ok(Some((packet, total)))
    }

    fn from_header_and_body(header: &FixedHeader, body: &[u8]) -> Result<Packet, ReadError> {
        let mut cursor = Cursor::new(body);
        Ok(match header.packet_type {
            PacketType::Connect => Packet::Connect(Connect::read(&mut cursor)?),
            PacketType::Publish => Packet::Publish(Publish::read_body(header, body)?),
            PacketType::PubAck => Packet::PubAck(PacketIdAck::read(&mut cursor)?),
            PacketType::PubRec => Packet::PubRec(PacketIdAck::read(&mut cursor)?),
            PacketType::PubRel => Packet::PubRel(PacketIdAck::read(&mut cursor)?),
            PacketType::PubComp => Packet::PubComp(PacketIdAck::read(&mut cursor)?),
            PacketType::Subscribe => Packet::Subscribe(Subscribe::read_body(body)?),
            PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::read_body(body)?),
            PacketType::PingReq => Packet::PingReq,
            PacketType::Disconnect => Packet::Disconnect,
            other => {
                return Err(ReadError::Malformed(
                    format!("unexpected packet type from client: {other:?}").into(),
                ))
            }
        })
    }

    /// Serializes a packet that the broker sends to a client
    /// (CONNACK/PUBLISH/PUBACK/.../SUBACK/UNSUBACK/PINGRESP).
    pub fn serialize(&self) -> Result<Vec<u8>, WriteError> {
        let mut body = Vec::new();
        let (packet_type, flags) = match self {
            Packet::ConnAck(p) => {
                p.write(&mut body)?;
                (PacketType::ConnAck, 0)
            }
            Packet::Publish(p) => {
                p.write_body(&mut body)?;
                (PacketType::Publish, p.flags())
            }
            Packet::PubAck(p) => {
                p.write(&mut body)?;
                (PacketType::PubAck, 0)
            }
            Packet::PubRec(p) => {
                p.write(&mut body)?;
                (PacketType::PubRec, 0)
            }
            Packet::PubRel(p) => {
                p.write(&mut body)?;
                (PacketType::PubRel, 0x02)
            }
            Packet::PubComp(p) => {
                p.write(&mut body)?;
                (PacketType::PubComp, 0)
            }
            Packet::SubAck(p) => {
                p.write(&mut body)?;
                (PacketType::SubAck, 0)
            }
            Packet::UnsubAck(p) => {
                p.write(&mut body)?;
                (PacketType::UnsubAck, 0)
            }
            Packet::PingResp => (PacketType::PingResp, 0),
            Packet::Disconnect => (PacketType::Disconnect, 0),
            Packet::Connect(p) => {
                p.write(&mut body)?;
                (PacketType::Connect, 0)
            }
            Packet::Subscribe(p) => {
                p.write_body(&mut body)?;
                (PacketType::Subscribe, 0x02)
            }
            Packet::Unsubscribe(p) => {
                p.write_body(&mut body)?;
                (PacketType::Unsubscribe, 0x02)
            }
            Packet::PingReq => (PacketType::PingReq, 0),
        };

        let header = FixedHeader {
            packet_type,
            flags,
            remaining_length: body.len() as u32,
        };
        let mut out = Vec::with_capacity(body.len() + 5);
        header.write(&mut out)?;
        out.extend_from_slice(&body);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::connect::{ConnAckReturnCode, ConnectFlags, ProtocolLevel, ProtocolName};
    use crate::protocol::packet_type::QoS;
    use bytes::Bytes;

    #[test]
    fn parse_reports_incomplete_not_error() {
        let connect = Packet::Connect(Connect {
            protocol_name: ProtocolName::V311,
            protocol_level: ProtocolLevel { revision: 4, is_bridge: false },
            flags: ConnectFlags { clean_session: true, ..Default::default() },
            keepalive: 30,
            client_id: "c1".into(),
            will_topic: None,
            will_message: None,
            username: None,
            password: None,
        });
        let wire = connect.serialize().unwrap();
        assert_eq!(Packet::parse(&wire[..wire.len() - 1], 4096).unwrap(), None);
        let (packet, consumed) = Packet::parse(&wire, 4096).unwrap().unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(packet, connect);
    }

    #[test]
    fn parse_rejects_over_max_size() {
        let publish = Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "t".into(),
            packet_id: None,
            payload: Bytes::from(vec![0u8; 1000]),
        });
        let wire = publish.serialize().unwrap();
        assert!(Packet::parse(&wire, 16).is_err());
    }

    #[test]
    fn connack_serializes_with_zero_remaining_state() {
        let ack = Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ConnAckReturnCode::Accepted,
        });
        let wire = ack.serialize().unwrap();
        assert_eq!(wire, vec![0x20, 0x02, 0x00, 0x00]);
    }
}
