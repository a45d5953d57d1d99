//! Certificate-derived identity (component C12).
//!
//! # References
//! - spec §1 ("the core consumes `(is_bridge, peer_cert_sha1_chain,
//!   client_guid, tenant_guid)` extracted from certificates"), §4.12

use std::collections::HashSet;

use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use uuid::Uuid;

/// SHA-1 hex digest of a DER-encoded certificate, the stable identity unit
/// used throughout the core (canonical id, revocation, bridge auth).
pub fn cert_sha1(der: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

/// Decoded certificate-derived facts the TLS layer hands to the core on
/// every new connection (spec §1, §4.12). The OID parsing that produces
/// `client_guid`/`tenant_guid` is outside the core's scope; this is the
/// post-extraction shape.
#[derive(Debug, Clone, Default)]
pub struct CertIdentity {
    pub is_bridge: bool,
    pub cert_chain_sha1: Vec<String>,
    pub client_guid: Option<Uuid>,
    pub tenant_guid: Option<Uuid>,
}

impl CertIdentity {
    pub fn canonical_id(&self) -> Option<&str> {
        self.cert_chain_sha1.first().map(String::as_str)
    }
}

/// External collaborator: the policy engine answers "is this cert
/// revoked?" (SPEC_FULL.md "Policy file line format" — the embedder parses
/// `topicauth.policy`'s revocation list and feeds it through this trait,
/// mirroring how [`crate::auth::TopicAuthorizationState`] is fed).
/// [`IdentityVerifier`] is the in-core implementation.
pub trait RevocationState {
    fn is_revoked(&self, cert_sha1: &str) -> bool;
}

/// Revocation-aware, atomically-swappable set of accepted broker cert
/// hashes, guarded during the swap at `restart_listeners` (spec §4.12:
/// "swaps the accepted broker-cert set atomically; an in-flight handshake
/// that no longer matches fails closed").
#[derive(Default)]
pub struct IdentityVerifier {
    revoked: RwLock<HashSet<String>>,
    accepted_broker_certs: RwLock<HashSet<String>>,
}

impl IdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `sha1` must fail TLS verify (spec §4.12: "if the hash is in
    /// the revoked set, fail verify").
    pub fn is_revoked(&self, sha1: &str) -> bool {
        self.revoked.read().contains(sha1)
    }

    pub fn revoke(&self, hashes: impl IntoIterator<Item = String>) {
        self.revoked.write().extend(hashes);
    }

    /// True iff `sha1` is a recognized broker cert, i.e. a bridge-inbound
    /// CONNECT from this peer is allowed (spec §4.9: "the peer cert SHA-1
    /// must be a known broker cert — otherwise reject with NOT_AUTHORIZED").
    pub fn is_known_broker_cert(&self, sha1: &str) -> bool {
        self.accepted_broker_certs.read().contains(sha1)
    }

    /// Atomically replaces the accepted broker-cert set. Any handshake
    /// already in flight re-checks against the new set and fails closed if
    /// it no longer matches (spec §4.12).
    pub fn restart_listeners(&self, managed_hashes: HashSet<String>) {
        *self.accepted_broker_certs.write() = managed_hashes;
    }
}

impl RevocationState for IdentityVerifier {
    fn is_revoked(&self, cert_sha1: &str) -> bool {
        IdentityVerifier::is_revoked(self, cert_sha1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_cert_fails_verify() {
        let verifier = IdentityVerifier::new();
        assert!(!verifier.is_revoked("AAAA"));
        verifier.revoke(["AAAA".to_string()]);
        assert!(verifier.is_revoked("AAAA"));
    }

    #[test]
    fn restart_listeners_swap_is_atomic_and_total() {
        let verifier = IdentityVerifier::new();
        verifier.restart_listeners(["AAAA".to_string()].into_iter().collect());
        assert!(verifier.is_known_broker_cert("AAAA"));
        verifier.restart_listeners(["BBBB".to_string()].into_iter().collect());
        assert!(!verifier.is_known_broker_cert("AAAA"));
        assert!(verifier.is_known_broker_cert("BBBB"));
    }

    #[test]
    fn canonical_id_is_the_first_chain_entry() {
        let identity = CertIdentity {
            is_bridge: false,
            cert_chain_sha1: vec!["AAAA".into(), "BBBB".into()],
            client_guid: None,
            tenant_guid: None,
        };
        assert_eq!(identity.canonical_id(), Some("AAAA"));
    }
}
