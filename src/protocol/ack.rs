//! PUBACK / PUBREC / PUBREL / PUBCOMP.
//!
//! All four share the same wire shape (a bare packet id), so one struct
//! serves all of them; the outer [`super::packet::Packet`] enum is what
//! distinguishes which one it is.

use std::io::{Read, Write};

use super::traits::{ReadError, ReadType, WriteError, WriteType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketIdAck {
    pub packet_id: u16,
}

impl<R: Read> ReadType<R> for PacketIdAck {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        Ok(PacketIdAck {
            packet_id: u16::read(reader)?,
        })
    }
}

impl<W: Write> WriteType<W> for PacketIdAck {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.packet_id.write(writer)
    }
}
