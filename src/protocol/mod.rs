//! MQTT 3.1.1 (with 3.1 CONNECT compatibility) wire protocol.
//!
//! Layout mirrors the ancestor crate: `traits` defines the `ReadType`/
//! `WriteType` seam, `primitives` implements it for the base wire types,
//! and each packet kind gets its own module. `packet` ties them together
//! behind one [`packet::Packet`] enum with incremental-buffer framing.

pub mod ack;
pub mod connect;
pub mod header;
pub mod packet;
pub mod packet_type;
pub mod primitives;
pub mod publish;
pub mod subscribe;
pub mod traits;
