//! The MQTT fixed header: packet type, flags, and remaining length.

use std::io::{Read, Write};

use super::packet_type::PacketType;
use super::primitives::RemainingLength;
use super::traits::{ReadError, ReadType, WriteError, WriteType};

/// First byte of the fixed header plus the decoded remaining length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    /// Low nibble of byte 1: DUP/QoS/RETAIN for PUBLISH, fixed values otherwise.
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    /// High bit of the CONNECT protocol-level byte denotes a bridge CONNECT
    /// (spec §4.9, §6). Not part of the fixed header itself, but every call
    /// site that reads a CONNECT's variable header needs this mask.
    pub const BRIDGE_VERSION_BIT: u8 = 0x80;
}

impl<R: Read> ReadType<R> for FixedHeader {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let byte0 = u8::read(reader)?;
        let packet_type = PacketType::from(byte0 >> 4);
        let flags = byte0 & 0x0F;
        let remaining_length = RemainingLength::read(reader)?.0;
        Ok(FixedHeader {
            packet_type,
            flags,
            remaining_length,
        })
    }
}

impl<W: Write> WriteType<W> for FixedHeader {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let byte0 = (u8::from(self.packet_type) << 4) | (self.flags & 0x0F);
        byte0.write(writer)?;
        RemainingLength(self.remaining_length).write(writer)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn roundtrip() {
        let header = FixedHeader {
            packet_type: PacketType::Publish,
            flags: 0b0000_1101, // dup=1 qos=2 retain=1
            remaining_length: 16_384,
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let back = FixedHeader::read(&mut cursor).unwrap();
        assert_eq!(back, header);
    }
}
