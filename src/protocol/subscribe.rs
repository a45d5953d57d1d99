//! SUBSCRIBE / SUBACK / UNSUBSCRIBE / UNSUBACK.

use std::io::{Cursor, Read, Write};

use super::packet_type::QoS;
use super::traits::{ReadError, ReadType, WriteError, WriteType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

impl Subscribe {
    pub fn read_body(body: &[u8]) -> Result<Self, ReadError> {
        let mut cursor = Cursor::new(body);
        let packet_id = u16::read(&mut cursor)?;
        let mut filters = Vec::new();
        while (cursor.position() as usize) < body.len() {
            let topic = String::read(&mut cursor)?;
            let qos_byte = u8::read(&mut cursor)?;
            let qos = QoS::try_from(qos_byte & 0x03).map_err(|e| ReadError::Malformed(Box::new(e)))?;
            filters.push((topic, qos));
        }
        Ok(Subscribe { packet_id, filters })
    }

    pub fn write_body<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        self.packet_id.write(writer)?;
        for (topic, qos) in &self.filters {
            topic.clone().write(writer)?;
            u8::from(*qos).write(writer)?;
        }
        Ok(())
    }
}

/// 0x80 marks subscribe failure (MQTT 3.1.1 section 3.9.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAckReasonCode {
    Success(QoS),
    Failure,
}

impl From<SubAckReasonCode> for u8 {
    fn from(code: SubAckReasonCode) -> Self {
        match code {
            SubAckReasonCode::Success(qos) => qos.into(),
            SubAckReasonCode::Failure => 0x80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    pub reason_codes: Vec<SubAckReasonCode>,
}

impl<W: Write> WriteType<W> for SubAck {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.packet_id.write(writer)?;
        for code in &self.reason_codes {
            u8::from(*code).write(writer)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub packet_id: u16,
    pub topics: Vec<String>,
}

impl Unsubscribe {
    pub fn read_body(body: &[u8]) -> Result<Self, ReadError> {
        let mut cursor = Cursor::new(body);
        let packet_id = u16::read(&mut cursor)?;
        let mut topics = Vec::new();
        while (cursor.position() as usize) < body.len() {
            topics.push(String::read(&mut cursor)?);
        }
        Ok(Unsubscribe { packet_id, topics })
    }

    pub fn write_body<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        self.packet_id.write(writer)?;
        for topic in &self.topics {
            topic.clone().write(writer)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub packet_id: u16,
}

impl<W: Write> WriteType<W> for UnsubAck {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.packet_id.write(writer)
    }
}
