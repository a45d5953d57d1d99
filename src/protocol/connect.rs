//! CONNECT / CONNACK.
//!
//! # References
//! - spec §4.9 (connection state machine), §6 (wire protocol deviations)

use std::io::{Read, Write};

use super::primitives::Binary;
use super::traits::{ReadError, ReadType, WriteError, WriteType};

/// `PROTOCOL_NAME` must be `MQIsdp` (v3.1) or `MQTT` (v3.1.1); anything else
/// is a protocol error (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolName {
    V31,
    V311,
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported protocol name: {0:?}")]
pub struct UnsupportedProtocolName(pub String);

impl ProtocolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolName::V31 => "MQIsdp",
            ProtocolName::V311 => "MQTT",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnsupportedProtocolName> {
        match s {
            "MQIsdp" => Ok(ProtocolName::V31),
            "MQTT" => Ok(ProtocolName::V311),
            other => Err(UnsupportedProtocolName(other.to_owned())),
        }
    }
}

/// The CONNECT protocol-level byte. The high bit (`0x80`) marks a bridge
/// connection (spec §4.9, §6); the low 7 bits are the protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolLevel {
    pub revision: u8,
    pub is_bridge: bool,
}

impl ProtocolLevel {
    pub const BRIDGE_BIT: u8 = 0x80;
}

impl From<u8> for ProtocolLevel {
    fn from(byte: u8) -> Self {
        ProtocolLevel {
            revision: byte & !Self::BRIDGE_BIT,
            is_bridge: byte & Self::BRIDGE_BIT != 0,
        }
    }
}

impl From<ProtocolLevel> for u8 {
    fn from(level: ProtocolLevel) -> Self {
        level.revision | if level.is_bridge { ProtocolLevel::BRIDGE_BIT } else { 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectFlags {
    pub username: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: u8,
    pub will_flag: bool,
    pub clean_session: bool,
}

impl From<u8> for ConnectFlags {
    fn from(byte: u8) -> Self {
        ConnectFlags {
            username: byte & 0x80 != 0,
            password: byte & 0x40 != 0,
            will_retain: byte & 0x20 != 0,
            will_qos: (byte >> 3) & 0x03,
            will_flag: byte & 0x04 != 0,
            clean_session: byte & 0x02 != 0,
        }
    }
}

impl From<ConnectFlags> for u8 {
    fn from(flags: ConnectFlags) -> Self {
        let mut byte = 0u8;
        if flags.username {
            byte |= 0x80;
        }
        if flags.password {
            byte |= 0x40;
        }
        if flags.will_retain {
            byte |= 0x20;
        }
        byte |= (flags.will_qos & 0x03) << 3;
        if flags.will_flag {
            byte |= 0x04;
        }
        if flags.clean_session {
            byte |= 0x02;
        }
        byte
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_name: ProtocolName,
    pub protocol_level: ProtocolLevel,
    pub flags: ConnectFlags,
    pub keepalive: u16,
    /// Sent in CONNECT; `canonical_id` (cert-derived) is layered on top by `context.rs`.
    pub client_id: String,
    pub will_topic: Option<String>,
    pub will_message: Option<Binary>,
    pub username: Option<String>,
    pub password: Option<Binary>,
}

impl<R: Read> ReadType<R> for Connect {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let protocol_name_raw = String::read(reader)?;
        let protocol_name = ProtocolName::parse(&protocol_name_raw)
            .map_err(|e| ReadError::Malformed(Box::new(e)))?;
        let protocol_level = ProtocolLevel::from(u8::read(reader)?);
        let flags = ConnectFlags::from(u8::read(reader)?);
        let keepalive = u16::read(reader)?;
        let client_id = String::read(reader)?;

        let (will_topic, will_message) = if flags.will_flag {
            (Some(String::read(reader)?), Some(Binary::read(reader)?))
        } else {
            (None, None)
        };
        let username = if flags.username {
            Some(String::read(reader)?)
        } else {
            None
        };
        let password = if flags.password {
            Some(Binary::read(reader)?)
        } else {
            None
        };

        Ok(Connect {
            protocol_name,
            protocol_level,
            flags,
            keepalive,
            client_id,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl<W: Write> WriteType<W> for Connect {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.protocol_name.as_str().to_owned().write(writer)?;
        u8::from(self.protocol_level).write(writer)?;
        u8::from(self.flags).write(writer)?;
        self.keepalive.write(writer)?;
        self.client_id.clone().write(writer)?;
        if let (Some(topic), Some(message)) = (&self.will_topic, &self.will_message) {
            topic.clone().write(writer)?;
            message.write(writer)?;
        }
        if let Some(username) = &self.username {
            username.clone().write(writer)?;
        }
        if let Some(password) = &self.password {
            password.write(writer)?;
        }
        Ok(())
    }
}

/// CONNACK return codes. `IdentifierRejected` is what a `clean_session=0`
/// CONNECT is refused with (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAckReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUsernameOrPassword,
    NotAuthorized,
}

impl From<ConnAckReturnCode> for u8 {
    fn from(code: ConnAckReturnCode) -> Self {
        match code {
            ConnAckReturnCode::Accepted => 0,
            ConnAckReturnCode::UnacceptableProtocolVersion => 1,
            ConnAckReturnCode::IdentifierRejected => 2,
            ConnAckReturnCode::ServerUnavailable => 3,
            ConnAckReturnCode::BadUsernameOrPassword => 4,
            ConnAckReturnCode::NotAuthorized => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    /// Always false: spec treats all sessions as clean (no persistence).
    pub session_present: bool,
    pub return_code: ConnAckReturnCode,
}

impl<W: Write> WriteType<W> for ConnAck {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let flags = if self.session_present { 0x01 } else { 0x00 };
        flags.write(writer)?;
        u8::from(self.return_code).write(writer)
    }
}
