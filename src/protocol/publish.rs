//! PUBLISH.

use std::io::{Cursor, Read, Write};

use bytes::Bytes;

use super::header::FixedHeader;
use super::packet_type::QoS;
use super::traits::{ReadError, ReadType, WriteError, WriteType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present iff `qos != AtMostOnce` (MQTT 3.1.1 section 3.3.2.2).
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

impl Publish {
    pub fn flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.dup {
            flags |= 0x08;
        }
        flags |= (u8::from(self.qos)) << 1;
        if self.retain {
            flags |= 0x01;
        }
        flags
    }

    /// Reads the variable header + payload given a fixed header already consumed.
    pub fn read_body(header: &FixedHeader, body: &[u8]) -> Result<Self, ReadError> {
        let qos = QoS::try_from((header.flags >> 1) & 0x03)
            .map_err(|e| ReadError::Malformed(Box::new(e)))?;
        let mut cursor = Cursor::new(body);
        let topic = String::read(&mut cursor)?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(u16::read(&mut cursor)?)
        } else {
            None
        };
        let consumed = cursor.position() as usize;
        let payload = Bytes::copy_from_slice(&body[consumed..]);
        Ok(Publish {
            dup: header.flags & 0x08 != 0,
            qos,
            retain: header.flags & 0x01 != 0,
            topic,
            packet_id,
            payload,
        })
    }

    pub fn write_body<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        self.topic.clone().write(writer)?;
        if let Some(id) = self.packet_id {
            id.write(writer)?;
        }
        writer.write_all(&self.payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet_type::PacketType;

    #[test]
    fn roundtrip_qos1() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: "foo/bar".into(),
            packet_id: Some(42),
            payload: Bytes::from_static(b"hello"),
        };
        let mut body = Vec::new();
        publish.write_body(&mut body).unwrap();
        let header = FixedHeader {
            packet_type: PacketType::Publish,
            flags: publish.flags(),
            remaining_length: body.len() as u32,
        };
        let back = Publish::read_body(&header, &body).unwrap();
        assert_eq!(back, publish);
    }

    #[test]
    fn qos0_has_no_packet_id() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "a/b".into(),
            packet_id: None,
            payload: Bytes::from_static(b"p"),
        };
        let mut body = Vec::new();
        publish.write_body(&mut body).unwrap();
        let header = FixedHeader {
            packet_type: PacketType::Publish,
            flags: publish.flags(),
            remaining_length: body.len() as u32,
        };
        let back = Publish::read_body(&header, &body).unwrap();
        assert_eq!(back.packet_id, None);
    }
}
