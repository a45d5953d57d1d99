//! Connection context & session state machine (component C4).
//!
//! # References
//! - spec §3 ("Context (C4)"), §4.3 (queue insertion rules), §4.9, §5

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, warn};

use crate::protocol::packet_type::QoS;
use crate::store::{MessageStore, StoreEntryRef};

pub type ContextId = u64;

/// Connection lifecycle states (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    ConnectPending,
    ConnectAsync,
    Connected,
    Disconnecting,
    /// Half-closed websocket awaiting the next writeable callback.
    WsDead,
    Closed,
}

/// Cert-derived and CONNECT-supplied identity (spec §3, §4.9, §4.12).
#[derive(Debug, Clone, Default)]
pub struct Identity {
    /// As sent in CONNECT.
    pub client_id: String,
    /// Peer cert SHA-1, stable across reconnects.
    pub canonical_id: String,
    /// Semicolon-joined SHA-1 chain.
    pub cert_chain: Vec<String>,
    pub client_guid: Option<uuid::Uuid>,
    pub tenant_guid: Option<uuid::Uuid>,
}

impl Identity {
    /// `id = canonical_id + ":" + client_id` (spec §4.9).
    pub fn composite_id(&self) -> String {
        format!("{}:{}", self.canonical_id, self.client_id)
    }

    pub fn cert_chain_joined(&self) -> String {
        self.cert_chain.join(";")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RoleFlags {
    pub is_bridge: bool,
    pub ops: bool,
    pub managed: bool,
    pub admin: bool,
    pub local: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionInfo {
    /// Always true: persistent sessions are a Non-goal.
    pub clean_session: bool,
    pub keepalive: u16,
    pub last_msg_in: Instant,
    pub last_msg_out: Instant,
    pub ping_t: Option<Instant>,
}

impl SessionInfo {
    pub fn new(keepalive: u16, now: Instant) -> Self {
        SessionInfo {
            clean_session: true,
            keepalive,
            last_msg_in: now,
            last_msg_out: now,
            ping_t: None,
        }
    }

    /// `now - last_msg_in > keepalive * 1.5` (spec §4.9, §5).
    pub fn keepalive_expired(&self, now: Instant) -> bool {
        if self.keepalive == 0 {
            return false;
        }
        let limit = (self.keepalive as u64 * 3) / 2;
        now.duration_since(self.last_msg_in).as_secs() > limit
    }
}

/// Mirrored send/receive states for QoS 1/2 in-flight messages (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    PublishQos0,
    PublishQos1,
    PublishQos2,
    /// Outbound QoS 2: PUBLISH sent, waiting for the peer's PUBREC.
    WaitForPubrec,
    /// Inbound QoS 2: PUBREC sent, waiting for the peer's PUBREL.
    WaitForPubrel,
    /// Outbound QoS 2: PUBREL sent, waiting for the peer's PUBCOMP.
    WaitForPubcomp,
    /// Past `max_inflight`, parked until room frees up.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub direction: Direction,
    pub qos: QoS,
    pub mid: u16,
    pub state: QueueState,
    pub dup: bool,
    pub retain: bool,
    pub timestamp: Instant,
    pub store_ref: StoreEntryRef,
}

/// Per-socket connection state: identity, role, session bookkeeping, and the
/// inflight/queued message bookkeeping described in spec §3/§4.3.
pub struct Context {
    pub id: ContextId,
    pub state: ConnectionState,
    pub identity: Identity,
    pub role: RoleFlags,
    pub session: SessionInfo,
    pub sock_valid: bool,

    pub max_inflight: usize,
    pub max_queued: usize,
    pub max_packet_buffer_size: usize,
    pub queue_qos0_messages: bool,

    pub inflight: VecDeque<QueueEntry>,
    pub queued: VecDeque<QueueEntry>,
    pub is_dropping: bool,

    /// Cached count of trie leaves referencing this context; must equal
    /// `SubscriptionTrie::leaf_count_for(&context.id)` (spec §8 invariant).
    pub subscription_count: usize,
}

pub struct ContextLimits {
    pub max_inflight: usize,
    pub max_queued: usize,
    pub max_packet_buffer_size: usize,
    pub queue_qos0_messages: bool,
}

impl Context {
    pub fn new(id: ContextId, identity: Identity, keepalive: u16, limits: ContextLimits, now: Instant) -> Self {
        Context {
            id,
            state: ConnectionState::New,
            identity,
            role: RoleFlags::default(),
            session: SessionInfo::new(keepalive, now),
            sock_valid: true,
            max_inflight: limits.max_inflight,
            max_queued: limits.max_queued,
            max_packet_buffer_size: limits.max_packet_buffer_size,
            queue_qos0_messages: limits.queue_qos0_messages,
            inflight: VecDeque::new(),
            queued: VecDeque::new(),
            is_dropping: false,
            subscription_count: 0,
        }
    }

    pub fn outstanding_packet_count(&self) -> usize {
        self.inflight.len() + self.queued.len()
    }

    fn initial_state(direction: Direction, qos: QoS) -> QueueState {
        match (direction, qos) {
            (_, QoS::AtMostOnce) => QueueState::PublishQos0,
            (Direction::Out, QoS::AtLeastOnce) => QueueState::PublishQos1,
            (Direction::Out, QoS::ExactlyOnce) => QueueState::PublishQos2,
            (Direction::In, QoS::AtLeastOnce) => QueueState::PublishQos1,
            (Direction::In, QoS::ExactlyOnce) => QueueState::WaitForPubrel,
        }
    }

    /// Inserts an outbound message per the rules in spec §4.3. `overflow`
    /// is the pluggable `on_pre_insert_overflow` hook: if it returns `true`
    /// the message is dropped even though there is nominal room.
    pub fn insert_outbound(
        &mut self,
        store: &mut MessageStore,
        store_ref: StoreEntryRef,
        qos: QoS,
        mid: u16,
        retain: bool,
        now: Instant,
        overflow: impl FnOnce(&Self) -> bool,
    ) {
        if !self.sock_valid && qos == QoS::AtMostOnce && !self.queue_qos0_messages {
            debug!(context = self.id, "dropping qos0 publish: socket invalid, not queuing");
            return;
        }

        if self.outstanding_packet_count() >= self.max_packet_buffer_size {
            if overflow(self) {
                warn!(context = self.id, "dropping publish: packet buffer overflow");
                return;
            }
        }

        let entry = QueueEntry {
            direction: Direction::Out,
            qos,
            mid,
            state: Self::initial_state(Direction::Out, qos),
            dup: false,
            retain,
            timestamp: now,
            store_ref,
        };

        store.add_ref(store_ref);

        if self.inflight.len() < self.max_inflight {
            self.inflight.push_back(entry);
        } else if self.queued.len() < self.max_queued {
            let mut queued_entry = entry;
            queued_entry.state = QueueState::Queued;
            self.queued.push_back(queued_entry);
        } else {
            store.release_ref(store_ref);
            self.is_dropping = true;
            warn!(context = self.id, "dropping publish: max_queued exceeded");
        }
    }

    /// Accepts an inbound QoS 2 PUBLISH, entering `wait_for_pubrel`.
    pub fn insert_inbound_qos2(&mut self, store: &mut MessageStore, store_ref: StoreEntryRef, mid: u16, dup: bool, now: Instant) {
        store.add_ref(store_ref);
        self.inflight.push_back(QueueEntry {
            direction: Direction::In,
            qos: QoS::ExactlyOnce,
            mid,
            state: QueueState::WaitForPubrel,
            dup,
            retain: false,
            timestamp: now,
            store_ref,
        });
    }

    /// Handles an inbound PUBREL for `mid`. Per spec §9, a PUBREL with no
    /// matching stored message still "succeeds" (emits PUBCOMP) so that
    /// retried PUBRELs for an already-finalized/denied message are
    /// idempotent rather than erroring.
    pub fn complete_inbound_qos2(&mut self, store: &mut MessageStore, mid: u16) {
        if let Some(pos) = self
            .inflight
            .iter()
            .position(|e| e.direction == Direction::In && e.mid == mid && e.state == QueueState::WaitForPubrel)
        {
            let entry = self.inflight.remove(pos).unwrap();
            store.release_ref(entry.store_ref);
        }
        // else: no-op, still emit PUBCOMP at the call site.
    }

    /// Drains the front of `queued` into `inflight` as room frees up
    /// (spec §3 invariant: queued only drains as inflight empties).
    pub fn promote_queued(&mut self) {
        while self.inflight.len() < self.max_inflight {
            match self.queued.pop_front() {
                Some(mut entry) => {
                    entry.state = Self::initial_state(entry.direction, entry.qos);
                    self.inflight.push_back(entry);
                }
                None => break,
            }
        }
        if self.queued.is_empty() {
            self.is_dropping = false;
        }
    }

    /// Releases every queued/inflight store reference, e.g. on disconnect.
    pub fn drain_all(&mut self, store: &mut MessageStore) {
        for entry in self.inflight.drain(..).chain(self.queued.drain(..)) {
            store.release_ref(entry.store_ref);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewMessage;
    use bytes::Bytes;

    fn limits() -> ContextLimits {
        ContextLimits {
            max_inflight: 2,
            max_queued: 1,
            max_packet_buffer_size: 100,
            queue_qos0_messages: false,
        }
    }

    fn ctx(id: ContextId) -> Context {
        Context::new(id, Identity::default(), 60, limits(), Instant::now())
    }

    fn stored(store: &mut MessageStore) -> StoreEntryRef {
        store.store(NewMessage {
            source_id: "s".into(),
            source_mid: 0,
            topic: "t".into(),
            qos: QoS::AtMostOnce,
            payload: Bytes::from_static(b"x"),
            retain: false,
            client_payload: None,
        })
    }

    #[test]
    fn exceeding_max_queued_drops_exactly_the_overflow_message() {
        let mut store = MessageStore::new();
        let mut c = ctx(1);
        let now = Instant::now();
        // 2 inflight slots + 1 queued slot = 3 messages fit.
        for mid in 0..3u16 {
            let r = stored(&mut store);
            c.insert_outbound(&mut store, r, QoS::AtMostOnce, mid, false, now, |_| false);
        }
        assert!(!c.is_dropping);
        assert_eq!(c.outstanding_packet_count(), 3);

        // the 4th (N+1th) message is dropped and is_dropping is set.
        let r = stored(&mut store);
        c.insert_outbound(&mut store, r, QoS::AtMostOnce, 3, false, now, |_| false);
        assert!(c.is_dropping);
        assert_eq!(c.outstanding_packet_count(), 3);
    }

    #[test]
    fn promote_queued_moves_front_of_queue_into_inflight() {
        let mut store = MessageStore::new();
        let mut c = ctx(1);
        let now = Instant::now();
        for mid in 0..3u16 {
            let r = stored(&mut store);
            c.insert_outbound(&mut store, r, QoS::AtMostOnce, mid, false, now, |_| false);
        }
        assert_eq!(c.queued.len(), 1);
        c.inflight.pop_front();
        c.promote_queued();
        assert_eq!(c.inflight.len(), 2);
        assert!(c.queued.is_empty());
        assert!(!c.is_dropping);
    }

    #[test]
    fn qos0_dropped_when_socket_invalid_and_not_queuing() {
        let mut store = MessageStore::new();
        let mut c = ctx(1);
        c.sock_valid = false;
        let r = stored(&mut store);
        c.insert_outbound(&mut store, r, QoS::AtMostOnce, 0, false, Instant::now(), |_| false);
        assert_eq!(c.outstanding_packet_count(), 0);
        assert_eq!(store.ref_count(r), 0);
    }

    #[test]
    fn pubrel_replay_without_stored_message_is_idempotent() {
        let mut store = MessageStore::new();
        let mut c = ctx(1);
        // No matching inflight entry for mid=7: must not panic or error.
        c.complete_inbound_qos2(&mut store, 7);
        c.complete_inbound_qos2(&mut store, 7);
    }

    #[test]
    fn keepalive_expiry_uses_one_point_five_multiplier() {
        let now = Instant::now();
        let session = SessionInfo::new(10, now);
        assert!(!session.keepalive_expired(now + std::time::Duration::from_secs(14)));
        assert!(session.keepalive_expired(now + std::time::Duration::from_secs(16)));
    }
}
