//! Crate-wide error taxonomy.
//!
//! Individual modules define their own narrow error enums (see
//! [`crate::protocol::traits::ReadError`], [`crate::dxl::message::ParseError`],
//! [`crate::registry::service::ServiceError`], ...) and this module gives the
//! seven error *kinds* from the design doc (Protocol/Auth/Resource/TlsHandshake/
//! BridgeUnreachable/NotFound/Config) a single place to be classified for
//! logging and for the caller-visible effect (disconnect, drop, or abort).

use thiserror::Error;

/// The effect a [`Kind`] has on the connection/process that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Close the offending connection.
    Disconnect,
    /// Drop the offending message, connection stays up.
    Drop,
    /// Drop the message and also disconnect.
    DropAndDisconnect,
    /// Retry silently, no user-visible effect.
    SilentRetry,
    /// Abort the process (startup only).
    Abort,
}

/// Coarse error kind, matching spec §7.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Kind {
    /// Malformed frame or disallowed protocol combination.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Topic authorization policy denial.
    #[error("authorization denied: {0}")]
    Auth(String),

    /// Queue full, tenant over limit, or other resource exhaustion.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// TLS handshake failure (severity depends on whether handshake is still in flight).
    #[error("tls handshake error: {0}")]
    TlsHandshake(String),

    /// Bridge peer unreachable; always retried silently.
    #[error("bridge unreachable: {0}")]
    BridgeUnreachable(String),

    /// Service/broker lookup failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// Startup-only configuration failure.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Kind {
    /// The effect this error kind has per spec §7 propagation rules.
    pub fn effect(&self) -> Effect {
        match self {
            Kind::Protocol(_) => Effect::Disconnect,
            Kind::Auth(_) => Effect::Drop,
            Kind::Resource(_) => Effect::DropAndDisconnect,
            Kind::TlsHandshake(_) => Effect::Disconnect,
            Kind::BridgeUnreachable(_) => Effect::SilentRetry,
            Kind::NotFound(_) => Effect::Drop,
            Kind::Config(_) => Effect::Abort,
        }
    }
}

pub type Result<T, E = Kind> = std::result::Result<T, E>;
