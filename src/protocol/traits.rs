//! Read/write primitives for wire-format (de)serialization.
//!
//! Mirrors the `ReadType`/`WriteType` split used throughout this crate's
//! ancestor: every wire-level type implements `ReadType<R>`/`WriteType<W>`
//! over anything that is `Read`/`Write`, so the same impls work for an
//! in-memory `Cursor<&[u8]>` during tests and a socket buffer during real
//! I/O.

use std::io::{Read, Write};

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReadError {
    #[error("cannot read data: {0}")]
    IO(#[from] std::io::Error),

    #[error("overflow converting integer: {0}")]
    Overflow(#[from] std::num::TryFromIntError),

    #[error("malformed data: {0}")]
    Malformed(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub trait ReadType<R>: Sized
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError>;
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WriteError {
    #[error("cannot write data: {0}")]
    IO(#[from] std::io::Error),

    #[error("overflow converting integer: {0}")]
    Overflow(#[from] std::num::TryFromIntError),

    #[error("malformed data: {0}")]
    Malformed(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub trait WriteType<W>: Sized
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError>;
}
