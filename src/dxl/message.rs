//! DXL message envelope, carried as the MQTT PUBLISH payload.
//!
//! # References
//! - spec §6 ("DXL message envelope"), §9 ("Exceptions for control flow at
//!   the DXL message parse boundary become `Result<DxlMessage, ParseError>`
//!   ... parse failure must not close the connection, only suppress
//!   DXL-level handling")

use std::io::{Cursor, Read, Write};

use bytes::Bytes;
use uuid::Uuid;

use crate::protocol::primitives::Binary;
use crate::protocol::traits::{ReadError, ReadType, WriteError, WriteType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Response,
    Event,
    ErrorResponse,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown dxl message type byte: {0}")]
pub struct UnknownMessageType(pub u8);

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::Event),
            3 => Ok(MessageType::ErrorResponse),
            other => Err(UnknownMessageType(other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(ty: MessageType) -> Self {
        match ty {
            MessageType::Request => 0,
            MessageType::Response => 1,
            MessageType::Event => 2,
            MessageType::ErrorResponse => 3,
        }
    }
}

/// Thrown on any malformed DXL envelope. Per spec §9 this must never close
/// the MQTT connection: the caller catches it and simply skips DXL-level
/// handling of that one publish.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("unknown message type: {0}")]
    UnknownType(#[from] UnknownMessageType),
}

fn read_uuid<R: Read>(reader: &mut R) -> Result<Uuid, ReadError> {
    let mut bytes = [0u8; 16];
    reader.read_exact(&mut bytes)?;
    Ok(Uuid::from_bytes(bytes))
}

fn write_uuid<W: Write>(writer: &mut W, id: &Uuid) -> Result<(), WriteError> {
    writer.write_all(id.as_bytes())?;
    Ok(())
}

fn read_uuid_vec<R: Read>(reader: &mut R) -> Result<Vec<Uuid>, ReadError> {
    let count = u16::read(reader)?;
    (0..count).map(|_| read_uuid(reader)).collect()
}

fn write_uuid_vec<W: Write>(writer: &mut W, ids: &[Uuid]) -> Result<(), WriteError> {
    let count: u16 = ids.len().try_into()?;
    count.write(writer)?;
    for id in ids {
        write_uuid(writer, id)?;
    }
    Ok(())
}

const FLAG_MULTI_SERVICE: u8 = 0x01;
const FLAG_HAS_DESTINATION_SERVICE: u8 = 0x02;
const FLAG_HAS_REPLY_TO: u8 = 0x04;
const FLAG_HAS_SOURCE_TENANT: u8 = 0x08;

/// Frame carried in the MQTT payload of every DXL-bearing PUBLISH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DxlMessage {
    pub version: u8,
    pub message_type: MessageType,
    pub message_id: Uuid,
    pub source_client_id: String,
    pub source_broker_guid: Uuid,
    pub destination_client_guids: Vec<Uuid>,
    pub destination_broker_guids: Vec<Uuid>,
    pub destination_service_id: Option<Uuid>,
    pub reply_to_topic: Option<String>,
    pub source_tenant_guid: Option<Uuid>,
    pub multi_service_flag: bool,
    pub payload: Bytes,
    /// Only meaningful when `message_type == ErrorResponse`.
    pub error_code: Option<u32>,
}

impl DxlMessage {
    /// Parses `bytes` as a DXL envelope. Never panics; every malformed
    /// input maps to [`ParseError`] for the caller to log and drop (spec §9).
    pub fn parse(bytes: &[u8]) -> Result<DxlMessage, ParseError> {
        let mut cursor = Cursor::new(bytes);
        let version = u8::read(&mut cursor)?;
        let message_type = MessageType::try_from(u8::read(&mut cursor)?)?;
        let message_id = read_uuid(&mut cursor)?;
        let source_client_id = String::read(&mut cursor)?;
        let source_broker_guid = read_uuid(&mut cursor)?;
        let destination_client_guids = read_uuid_vec(&mut cursor)?;
        let destination_broker_guids = read_uuid_vec(&mut cursor)?;

        let flags = u8::read(&mut cursor)?;
        let destination_service_id = if flags & FLAG_HAS_DESTINATION_SERVICE != 0 {
            Some(read_uuid(&mut cursor)?)
        } else {
            None
        };
        let reply_to_topic = if flags & FLAG_HAS_REPLY_TO != 0 {
            Some(String::read(&mut cursor)?)
        } else {
            None
        };
        let source_tenant_guid = if flags & FLAG_HAS_SOURCE_TENANT != 0 {
            Some(read_uuid(&mut cursor)?)
        } else {
            None
        };

        let payload = Binary::read(&mut cursor)?.0.into();

        let error_code = if message_type == MessageType::ErrorResponse {
            Some(u32::read(&mut cursor)?)
        } else {
            None
        };

        Ok(DxlMessage {
            version,
            message_type,
            message_id,
            source_client_id,
            source_broker_guid,
            destination_client_guids,
            destination_broker_guids,
            destination_service_id,
            reply_to_topic,
            source_tenant_guid,
            multi_service_flag: flags & FLAG_MULTI_SERVICE != 0,
            payload,
            error_code,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>, WriteError> {
        let mut out = Vec::new();
        self.version.write(&mut out)?;
        u8::from(self.message_type).write(&mut out)?;
        write_uuid(&mut out, &self.message_id)?;
        self.source_client_id.clone().write(&mut out)?;
        write_uuid(&mut out, &self.source_broker_guid)?;
        write_uuid_vec(&mut out, &self.destination_client_guids)?;
        write_uuid_vec(&mut out, &self.destination_broker_guids)?;

        let mut flags = 0u8;
        if self.multi_service_flag {
            flags |= FLAG_MULTI_SERVICE;
        }
        if self.destination_service_id.is_some() {
            flags |= FLAG_HAS_DESTINATION_SERVICE;
        }
        if self.reply_to_topic.is_some() {
            flags |= FLAG_HAS_REPLY_TO;
        }
        if self.source_tenant_guid.is_some() {
            flags |= FLAG_HAS_SOURCE_TENANT;
        }
        flags.write(&mut out)?;

        if let Some(id) = &self.destination_service_id {
            write_uuid(&mut out, id)?;
        }
        if let Some(topic) = &self.reply_to_topic {
            topic.clone().write(&mut out)?;
        }
        if let Some(id) = &self.source_tenant_guid {
            write_uuid(&mut out, id)?;
        }

        Binary(self.payload.to_vec()).write(&mut out)?;

        if let Some(code) = self.error_code {
            code.write(&mut out)?;
        }

        Ok(out)
    }
}

/// Fabric service-unavailable error code (spec §4.7, §6).
pub const FABRIC_SERVICE_UNAVAILABLE: u32 = 0x8000_0001;
