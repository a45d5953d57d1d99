//! Core of a federated MQTT-compatible publish/subscribe broker.
//!
//! This crate is the single-threaded reactor's state machine (components
//! C1-C12 in the design doc): wire framing, the subscription trie, the
//! message store, per-connection context, the fabric/service registries,
//! the publish dispatcher and the bridge manager. Socket I/O, TLS, and
//! policy-file loading are out of scope (spec §1) and are the embedder's
//! job; this crate only owns the state transitions those layers drive.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod context;
pub mod dxl;
pub mod error;
pub mod identity;
pub mod policy;
pub mod protocol;
pub mod reactor;
pub mod registry;
pub mod store;
pub mod tenant;
pub mod topic;
pub mod trie;

pub mod dispatch;

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use uuid::Uuid;

use crate::bridge::BridgeManager;
use crate::config::BrokerSettings;
use crate::context::{Context, ContextId};
use crate::dispatch::{dispatch_publish, BridgeTopology, DispatchError, DispatchOutcome, PublishRequest};
use crate::identity::IdentityVerifier;
use crate::protocol::packet_type::QoS;
use crate::reactor::{MaintenanceScheduler, WorkQueue};
use crate::registry::broker::{BrokerRegistry, LocalIdentity};
use crate::registry::router::FabricRouter;
use crate::registry::service::ServiceRegistry;
use crate::store::MessageStore;
use crate::tenant::TenantAccounting;
use crate::trie::SubscriptionTrie;

/// The broker's entire in-memory state (spec §3 "State owned by the
/// core"), wired together the way `rskafka`'s `Client` wires a
/// `BrokerConnector` and a backoff policy: one struct holding everything,
/// built once from [`BrokerSettings`] and driven by the embedder's event
/// loop rather than owning that loop itself.
pub struct Core {
    settings: BrokerSettings,
    pub registry: BrokerRegistry,
    pub router: FabricRouter,
    pub services: ServiceRegistry,
    pub trie: SubscriptionTrie<ContextId>,
    pub store: MessageStore,
    pub contexts: HashMap<ContextId, Context>,
    pub tenant_accounting: TenantAccounting,
    pub identity: IdentityVerifier,
    pub bridges: BridgeManager,
    pub work_queue: WorkQueue,
    maintenance: MaintenanceScheduler,
    last_sys_tick: Instant,
    next_context_id: ContextId,
    started_at: Instant,
}

impl Core {
    pub fn new(settings: BrokerSettings, hostname: impl Into<String>, now: Instant) -> Self {
        let local_identity = LocalIdentity { hostname: hostname.into(), port: settings.listen_port, hub: None };
        let registry = BrokerRegistry::new(settings.guid, local_identity, settings.ttl_grace_mins);
        let services = ServiceRegistry::new(settings.guid, Default::default(), settings.ttl_grace_mins);
        let tenant_accounting =
            TenantAccounting::new(settings.tenant_byte_limit.unwrap_or(0), settings.tenant_connection_limit.unwrap_or(0));
        Core {
            settings,
            registry,
            router: FabricRouter::new(),
            services,
            trie: SubscriptionTrie::new(),
            store: MessageStore::new(),
            contexts: HashMap::new(),
            tenant_accounting,
            identity: IdentityVerifier::new(),
            bridges: BridgeManager::new(),
            work_queue: WorkQueue::new(),
            maintenance: MaintenanceScheduler::new(now),
            last_sys_tick: now,
            next_context_id: 1,
            started_at: now,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Allocates the next [`ContextId`] for a freshly-accepted connection.
    pub fn next_context_id(&mut self) -> ContextId {
        let id = self.next_context_id;
        self.next_context_id += 1;
        id
    }

    /// Runs a single PUBLISH through the dispatcher (spec §4.8), threading
    /// this core's owned state into [`dispatch_publish`].
    #[allow(clippy::too_many_arguments)]
    pub fn publish(
        &mut self,
        request: PublishRequest,
        auth: &dyn auth::TopicAuthorizationState,
        topology: &dyn BridgeTopology,
        on_store_message: impl FnOnce(&store::NewMessage) -> Option<Bytes>,
        now: Instant,
    ) -> Result<DispatchOutcome, DispatchError> {
        dispatch_publish(
            request,
            self.settings.topic_routing_enabled,
            auth,
            &mut self.tenant_accounting,
            &mut self.store,
            &mut self.trie,
            &mut self.contexts,
            &self.registry,
            &mut self.router,
            topology,
            on_store_message,
            now,
        )
    }

    /// Whether a maintenance pass (spec §4.4 item 2) is due.
    pub fn maintenance_due(&self, now: Instant) -> bool {
        self.maintenance.is_due(now)
    }

    /// Runs the periodic maintenance pass: broker/service TTL expiry,
    /// tenant byte-counter reset, and flushing the debounced topic-cache
    /// clear (spec §4.4 item 2, §4.11).
    pub fn run_maintenance(&mut self, now: Instant) {
        self.registry.expire(now);
        self.services.expire(now);
        self.tenant_accounting.reset_interval();
        self.router.tick(now);
        self.maintenance.mark_ran(now);
    }

    /// Drains a `RevokeCerts` work item (spec §4.4 item 4, §4.12): every
    /// connected context whose canonical id is now revoked is flagged
    /// `Disconnecting` and has its queues released, so the caller can close
    /// the socket before the next poll cycle completes. Returns the
    /// affected context ids.
    pub fn apply_revocations(&mut self, revoked: &std::collections::HashSet<String>) -> Vec<ContextId> {
        let mut disconnected = Vec::new();
        for (id, ctx) in self.contexts.iter_mut() {
            if revoked.contains(&ctx.identity.canonical_id) {
                ctx.state = context::ConnectionState::Disconnecting;
                ctx.drain_all(&mut self.store);
                disconnected.push(*id);
            }
        }
        disconnected
    }

    /// Publishes the `$SYS` broker-stats snapshot through the ordinary
    /// fan-out path once `sys_interval` has elapsed (spec §4.4 item 2,
    /// SPEC_FULL.md "`$SYS` periodic stats"). Stats are not retained:
    /// only currently-connected subscribers see a given snapshot.
    pub fn sys_tick(&mut self, now: Instant) {
        if now.duration_since(self.last_sys_tick) < self.settings.sys_interval {
            return;
        }
        self.last_sys_tick = now;

        let uptime_secs = now.duration_since(self.started_at).as_secs();
        let stats = [
            ("$SYS/broker/uptime".to_string(), uptime_secs.to_string()),
            ("$SYS/broker/clients/connected".to_string(), self.contexts.len().to_string()),
            ("$SYS/broker/messages/stored".to_string(), self.store.len().to_string()),
        ];
        for (topic, value) in stats {
            self.publish_system_message(&topic, Bytes::from(value), now);
        }
    }

    fn publish_system_message(&mut self, topic: &str, payload: Bytes, now: Instant) {
        let new_message = store::NewMessage {
            source_id: "$SYS".to_string(),
            source_mid: 0,
            topic: topic.to_string(),
            qos: QoS::AtMostOnce,
            payload,
            retain: false,
            client_payload: None,
        };
        let store_ref = self.store.store(new_message);
        for leaf in self.trie.search(topic) {
            let Some(ctx) = self.contexts.get_mut(&leaf.context) else { continue };
            let mid = (ctx.outstanding_packet_count() as u16).wrapping_add(1);
            ctx.insert_outbound(&mut self.store, store_ref, leaf.qos, mid, false, now, |_| false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BrokerSettings {
        config::BrokerSettingsBuilder::new(Uuid::new_v4())
            .sys_interval(std::time::Duration::from_secs(10))
            .build()
    }

    #[test]
    fn next_context_id_increments_from_one() {
        let mut core = Core::new(settings(), "localhost", Instant::now());
        assert_eq!(core.next_context_id(), 1);
        assert_eq!(core.next_context_id(), 2);
    }

    #[test]
    fn sys_tick_is_gated_by_sys_interval() {
        let now = Instant::now();
        let mut core = Core::new(settings(), "localhost", now);
        core.sys_tick(now);
        let after_first = core.store.len();
        assert_eq!(after_first, 3, "each stat is stored once regardless of subscribers");
        core.sys_tick(now + std::time::Duration::from_secs(1));
        assert_eq!(core.store.len(), after_first, "second tick inside the interval must be a no-op");
        core.sys_tick(now + std::time::Duration::from_secs(11));
        assert_eq!(core.store.len(), after_first * 2, "tick past the interval fires again");
    }

    #[test]
    fn maintenance_due_follows_the_reactor_cadence() {
        let now = Instant::now();
        let mut core = Core::new(settings(), "localhost", now);
        assert!(!core.maintenance_due(now + std::time::Duration::from_secs(1)));
        assert!(core.maintenance_due(now + reactor::MAINTENANCE_INTERVAL));
        core.run_maintenance(now + reactor::MAINTENANCE_INTERVAL);
        assert!(!core.maintenance_due(now + reactor::MAINTENANCE_INTERVAL + std::time::Duration::from_secs(1)));
    }
}
