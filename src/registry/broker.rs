//! Broker registry (component C6).
//!
//! # References
//! - spec §3 ("Broker", "BrokerState"), §4.5, §8 ("bridge link" invariant)

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

pub type BrokerId = Uuid;

/// Fields read by cross-thread work-queue producers (spec §5: "Broker
/// local-identity fields ... are protected by a small mutex").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub hostname: String,
    pub port: u16,
    pub hub: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broker {
    pub broker_id: BrokerId,
    pub hostname: String,
    pub port: u16,
    pub ws_port: Option<u16>,
    pub ttl_mins: u32,
    #[serde(skip, default = "Instant::now")]
    pub start_time: Instant,
    pub policy_hostname: Option<String>,
    pub policy_ip: Option<String>,
    pub policy_hub: Option<String>,
    pub policy_port: Option<u16>,
    pub version: String,
    pub connection_limit: Option<u32>,
    pub topic_routing_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerState {
    pub broker: BrokerStateData,
    pub counted_connections: HashMap<BrokerId, u32>,
    pub child_connections: HashSet<BrokerId>,
    pub subscriptions: HashSet<String>,
    pub subscriptions_wildcard_count: u32,
    pub pending_subscriptions: HashSet<String>,
    pub pending_subscriptions_wildcard_count: u32,
    pub subscriptions_change_count: u64,
    #[serde(skip)]
    pub registration_time: Option<Instant>,
}

/// Serializable projection of [`Broker`]; kept separate so `BrokerState`
/// derives `Default` without requiring one for `Broker` (which has no
/// sensible default `broker_id`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerStateData {
    pub broker_id: Option<BrokerId>,
    pub hostname: String,
    pub port: u16,
}

impl BrokerState {
    fn expired(&self, now: Instant, ttl_mins: u32, grace_mins: u32) -> bool {
        match self.registration_time {
            Some(t) => now.duration_since(t) > Duration::from_secs(((ttl_mins + grace_mins) as u64) * 60),
            None => false,
        }
    }
}

/// Set of peer brokers plus the local broker's mutex-guarded identity
/// fields. Owned by the single reactor thread; `local_identity` is the one
/// piece cross-thread producers read (spec §5).
pub struct BrokerRegistry {
    local_id: BrokerId,
    local_identity: Mutex<LocalIdentity>,
    brokers: HashMap<BrokerId, Broker>,
    states: HashMap<BrokerId, BrokerState>,
    grace_mins: u32,
}

impl BrokerRegistry {
    pub fn new(local_id: BrokerId, local_identity: LocalIdentity, grace_mins: u32) -> Self {
        BrokerRegistry {
            local_id,
            local_identity: Mutex::new(local_identity),
            brokers: HashMap::new(),
            states: HashMap::new(),
            grace_mins,
        }
    }

    pub fn local_id(&self) -> BrokerId {
        self.local_id
    }

    pub fn local_identity(&self) -> LocalIdentity {
        self.local_identity.lock().clone()
    }

    pub fn set_local_identity(&self, identity: LocalIdentity) {
        *self.local_identity.lock() = identity;
    }

    /// Adds or updates `broker`. Returns true if the topic cache (owned by
    /// the router) must be invalidated: always on a brand new entry or a
    /// `start_time` change (replacement), and whenever
    /// `topic_routing_enabled` flips even on an in-place update (spec §4.5).
    pub fn upsert(&mut self, broker: Broker) -> bool {
        match self.brokers.get(&broker.broker_id) {
            Some(existing) if existing.start_time == broker.start_time => {
                let routing_toggled = existing.topic_routing_enabled != broker.topic_routing_enabled;
                debug!(broker = %broker.broker_id, "updating broker fields in place");
                self.brokers.insert(broker.broker_id, broker);
                routing_toggled
            }
            Some(_) => {
                info!(broker = %broker.broker_id, "broker start_time changed, replacing entry");
                self.brokers.insert(broker.broker_id, broker);
                true
            }
            None => {
                info!(broker = %broker.broker_id, "new broker observed");
                self.brokers.insert(broker.broker_id, broker);
                true
            }
        }
    }

    /// Removes `id` and strips it from every other broker's
    /// `counted_connections` (spec §4.5).
    pub fn remove(&mut self, id: BrokerId) {
        self.brokers.remove(&id);
        self.states.remove(&id);
        for state in self.states.values_mut() {
            state.counted_connections.remove(&id);
            state.child_connections.remove(&id);
        }
    }

    pub fn get(&self, id: BrokerId) -> Option<&Broker> {
        self.brokers.get(&id)
    }

    pub fn state(&self, id: BrokerId) -> Option<&BrokerState> {
        self.states.get(&id)
    }

    pub fn state_mut_or_default(&mut self, id: BrokerId) -> &mut BrokerState {
        self.states.entry(id).or_default()
    }

    pub fn ids(&self) -> impl Iterator<Item = BrokerId> + '_ {
        self.brokers.keys().copied()
    }

    /// Successors of `id` in the fabric graph, i.e. brokers it is directly
    /// connected to, used by the DFS in `router.rs`.
    pub fn successors(&self, id: BrokerId) -> Vec<BrokerId> {
        self.states
            .get(&id)
            .map(|s| s.counted_connections.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Reference-counted: the same edge may be observed through independent
    /// gossip events, so repeated calls just bump the count (spec §4.5, §8).
    pub fn add_connection(&mut self, from: BrokerId, to: BrokerId) {
        let state = self.states.entry(from).or_default();
        *state.counted_connections.entry(to).or_insert(0) += 1;
        state.child_connections.insert(to);
    }

    pub fn remove_connection(&mut self, from: BrokerId, to: BrokerId) {
        if let Some(state) = self.states.get_mut(&from) {
            if let Some(count) = state.counted_connections.get_mut(&to) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.counted_connections.remove(&to);
                    state.child_connections.remove(&to);
                }
            }
        }
    }

    pub fn connection_count(&self, from: BrokerId, to: BrokerId) -> u32 {
        self.states
            .get(&from)
            .and_then(|s| s.counted_connections.get(&to))
            .copied()
            .unwrap_or(0)
    }

    /// Removes every peer whose registration has aged past `ttl + grace`.
    /// The local broker is exempt (spec §3, §4.5).
    pub fn expire(&mut self, now: Instant) -> Vec<BrokerId> {
        let grace = self.grace_mins;
        let expired: Vec<BrokerId> = self
            .brokers
            .iter()
            .filter(|(id, b)| {
                **id != self.local_id
                    && self
                        .states
                        .get(*id)
                        .map(|s| s.expired(now, b.ttl_mins, grace))
                        .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            info!(broker = %id, "broker expired by TTL");
            self.remove(*id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(id: BrokerId, routing: bool) -> Broker {
        Broker {
            broker_id: id,
            hostname: "h".into(),
            port: 8883,
            ws_port: None,
            ttl_mins: 60,
            start_time: Instant::now(),
            policy_hostname: None,
            policy_ip: None,
            policy_hub: None,
            policy_port: None,
            version: "1.0".into(),
            connection_limit: None,
            topic_routing_enabled: routing,
        }
    }

    fn registry() -> BrokerRegistry {
        BrokerRegistry::new(
            Uuid::nil(),
            LocalIdentity { hostname: "local".into(), port: 8883, hub: None },
            5,
        )
    }

    #[test]
    fn upsert_new_broker_requires_cache_invalidation() {
        let mut reg = registry();
        let id = Uuid::new_v4();
        assert!(reg.upsert(broker(id, true)));
    }

    #[test]
    fn toggling_topic_routing_on_in_place_update_requires_invalidation() {
        let mut reg = registry();
        let id = Uuid::new_v4();
        let mut b = broker(id, true);
        reg.upsert(b.clone());
        b.topic_routing_enabled = false;
        assert!(reg.upsert(b));
    }

    #[test]
    fn connection_edges_are_refcounted() {
        let mut reg = registry();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        reg.add_connection(a, b);
        reg.add_connection(a, b);
        assert_eq!(reg.connection_count(a, b), 2);
        reg.remove_connection(a, b);
        assert_eq!(reg.connection_count(a, b), 1);
        reg.remove_connection(a, b);
        assert_eq!(reg.connection_count(a, b), 0);
    }

    #[test]
    fn remove_strips_broker_from_every_others_counted_connections() {
        let mut reg = registry();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        reg.upsert(broker(a, true));
        reg.upsert(broker(b, true));
        reg.add_connection(a, b);
        reg.remove(b);
        assert_eq!(reg.connection_count(a, b), 0);
        assert!(reg.get(b).is_none());
    }

    #[test]
    fn local_broker_is_exempt_from_ttl_expiry() {
        let mut reg = registry();
        reg.upsert(broker(Uuid::nil(), true));
        reg.state_mut_or_default(Uuid::nil()).registration_time = Some(Instant::now() - Duration::from_secs(100_000));
        let expired = reg.expire(Instant::now());
        assert!(expired.is_empty());
    }
}
