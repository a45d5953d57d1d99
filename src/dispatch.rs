//! Publish dispatcher (component C9): the steps a single PUBLISH goes
//! through from wire receipt to per-destination queue insertion.
//!
//! # References
//! - spec §4.8, §8 scenarios 1-3

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{is_publish_authorized, TopicAuthorizationState};
use crate::context::{Context, ContextId};
use crate::protocol::packet_type::QoS;
use crate::registry::broker::{BrokerId, BrokerRegistry};
use crate::registry::router::FabricRouter;
use crate::store::{MessageStore, NewMessage, StoreEntryRef};
use crate::tenant::TenantAccounting;
use crate::topic::is_wildcard;
use crate::trie::SubscriptionTrie;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("empty topic")]
    EmptyTopic,
    #[error("wildcard not permitted in publish topic: {0}")]
    WildcardTopic(String),
    #[error("non-bridge publisher attempted qos {0:?}")]
    QosFromNonBridge(QoS),
    #[error("publisher not authorized for topic: {0}")]
    NotAuthorized(String),
    #[error("tenant byte limit exceeded")]
    TenantLimitExceeded,
}

pub struct PublishRequest {
    pub source_context: ContextId,
    pub source_is_bridge: bool,
    /// The broker this publish arrived from, if the source context is a
    /// bridge — used for loop prevention (spec §4.8 step 6).
    pub source_bridge_broker_id: Option<BrokerId>,
    pub source_tenant: Option<Uuid>,
    pub cert_chain: Vec<String>,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

pub struct DispatchOutcome {
    pub store_ref: StoreEntryRef,
    pub deliveries: usize,
}

/// Looks up the broker id a bridge destination context represents, if any.
/// Kept as a caller-supplied function rather than a `Context` field so C4
/// stays free of C9/C7-specific bookkeeping.
pub trait BridgeTopology {
    fn broker_for_context(&self, context: ContextId) -> Option<BrokerId>;
}

#[allow(clippy::too_many_arguments)]
pub fn dispatch_publish(
    request: PublishRequest,
    wildcards_enabled: bool,
    auth: &dyn TopicAuthorizationState,
    tenant_accounting: &mut TenantAccounting,
    store: &mut MessageStore,
    trie: &mut SubscriptionTrie<ContextId>,
    contexts: &mut HashMap<ContextId, Context>,
    registry: &BrokerRegistry,
    router: &mut FabricRouter,
    topology: &dyn BridgeTopology,
    on_store_message: impl FnOnce(&NewMessage) -> Option<Bytes>,
    now: Instant,
) -> Result<DispatchOutcome, DispatchError> {
    // Step 1: header validation. QoS==3 cannot occur: QoS::TryFrom<u8>
    // already rejects it at the wire layer.
    if request.topic.is_empty() {
        return Err(DispatchError::EmptyTopic);
    }
    if is_wildcard(&request.topic) {
        return Err(DispatchError::WildcardTopic(request.topic));
    }
    if request.qos != QoS::AtMostOnce && !request.source_is_bridge {
        warn!(context = request.source_context, qos = ?request.qos, "dropping qos>0 publish from non-bridge client");
        return Err(DispatchError::QosFromNonBridge(request.qos));
    }

    // Step 3: topic authorization via the cert chain.
    if !is_publish_authorized(auth, &request.cert_chain, &request.topic, wildcards_enabled) {
        return Err(DispatchError::NotAuthorized(request.topic));
    }

    // Step 4: tenant byte accounting.
    if let Some(tenant) = request.source_tenant {
        if tenant_accounting.update_sent_bytes(tenant, request.payload.len() as u64) {
            return Err(DispatchError::TenantLimitExceeded);
        }
    }

    // Step 5: store the message, allowing a rewrite hook to produce a
    // separate client-facing payload (spec §4.8 step 5, §3).
    let new_message = NewMessage {
        source_id: request.source_context.to_string(),
        source_mid: 0,
        topic: request.topic.clone(),
        qos: request.qos,
        payload: request.payload.clone(),
        retain: request.retain,
        client_payload: None,
    };
    let client_payload = on_store_message(&new_message);
    let store_ref = store.store(NewMessage { client_payload, ..new_message });

    if request.retain {
        trie.set_retained(&request.topic, Some(store_ref));
    }

    // Step 6: fan out to every matching trie leaf.
    let leaves = trie.search(&request.topic);
    let mut deliveries = 0usize;
    for leaf in leaves {
        if leaf.context == request.source_context {
            continue;
        }

        let dest_broker = topology.broker_for_context(leaf.context);
        if let (Some(dest_broker), Some(source_broker)) = (dest_broker, request.source_bridge_broker_id) {
            if dest_broker == source_broker {
                debug!(context = leaf.context, "skipping bridge leaf: loop back to source broker");
                continue;
            }
        }

        if let Some(dest_broker) = dest_broker {
            if !router.is_subscriber_in_hierarchy(registry, registry.local_id(), dest_broker, &request.topic) {
                debug!(context = leaf.context, broker = %dest_broker, "skipping: no subscriber downstream");
                continue;
            }
        }

        let Some(dest_ctx) = contexts.get_mut(&leaf.context) else { continue };
        let effective_qos = request.qos.min(leaf.qos);
        let mid = next_mid(dest_ctx);
        dest_ctx.insert_outbound(store, store_ref, effective_qos, mid, request.retain, now, |_| false);
        deliveries += 1;
    }

    Ok(DispatchOutcome { store_ref, deliveries })
}

fn next_mid(ctx: &Context) -> u16 {
    (ctx.outstanding_packet_count() as u16).wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTopicAuthorization;

    struct NoBridges;
    impl BridgeTopology for NoBridges {
        fn broker_for_context(&self, _context: ContextId) -> Option<BrokerId> {
            None
        }
    }

    fn test_registry() -> BrokerRegistry {
        BrokerRegistry::new(
            BrokerId::new_v4(),
            crate::registry::broker::LocalIdentity { hostname: "local".into(), port: 8883, hub: None },
            5,
        )
    }

    fn ctx(id: ContextId) -> Context {
        use crate::context::{ContextLimits, Identity};
        Context::new(
            id,
            Identity::default(),
            60,
            ContextLimits { max_inflight: 16, max_queued: 16, max_packet_buffer_size: 64, queue_qos0_messages: false },
            Instant::now(),
        )
    }

    #[test]
    fn wildcard_match_delivers_exactly_one_copy() {
        let mut store = MessageStore::new();
        let mut trie = SubscriptionTrie::new();
        let mut contexts = HashMap::new();
        contexts.insert(1, ctx(1));
        contexts.insert(2, ctx(2));
        trie.add(2, "foo/#", QoS::AtMostOnce, false);

        let mut auth = StaticTopicAuthorization::new();
        auth.allow("AAAA", "foo/bar/baz");
        let mut tenant_accounting = TenantAccounting::new(0, 0);
        let mut router = FabricRouter::new();
        let registry = test_registry();

        let request = PublishRequest {
            source_context: 1,
            source_is_bridge: false,
            source_bridge_broker_id: None,
            source_tenant: None,
            cert_chain: vec!["AAAA".into()],
            topic: "foo/bar/baz".into(),
            qos: QoS::AtMostOnce,
            retain: false,
            payload: Bytes::from_static(b"p"),
        };

        let outcome = dispatch_publish(
            request,
            true,
            &auth,
            &mut tenant_accounting,
            &mut store,
            &mut trie,
            &mut contexts,
            &registry,
            &mut router,
            &NoBridges,
            |_| None,
            Instant::now(),
        )
        .unwrap();

        assert_eq!(outcome.deliveries, 1);
        assert_eq!(contexts.get(&2).unwrap().outstanding_packet_count(), 1);
        assert_eq!(contexts.get(&1).unwrap().outstanding_packet_count(), 0);
    }

    #[test]
    fn empty_topic_is_rejected() {
        let mut store = MessageStore::new();
        let mut trie = SubscriptionTrie::new();
        let mut contexts = HashMap::new();
        let auth = StaticTopicAuthorization::new();
        let mut tenant_accounting = TenantAccounting::new(0, 0);
        let mut router = FabricRouter::new();

        let request = PublishRequest {
            source_context: 1,
            source_is_bridge: false,
            source_bridge_broker_id: None,
            source_tenant: None,
            cert_chain: vec![],
            topic: "".into(),
            qos: QoS::AtMostOnce,
            retain: false,
            payload: Bytes::new(),
        };

        let result = dispatch_publish(
            request,
            true,
            &auth,
            &mut tenant_accounting,
            &mut store,
            &mut trie,
            &mut contexts,
            &test_registry(),
            &mut router,
            &NoBridges,
            |_| None,
            Instant::now(),
        );
        assert!(matches!(result, Err(DispatchError::EmptyTopic)));
    }

    #[test]
    fn qos_above_zero_from_non_bridge_client_is_swallowed() {
        let mut store = MessageStore::new();
        let mut trie = SubscriptionTrie::new();
        let mut contexts = HashMap::new();
        let mut auth = StaticTopicAuthorization::new();
        auth.allow("AAAA", "t");
        let mut tenant_accounting = TenantAccounting::new(0, 0);
        let mut router = FabricRouter::new();

        let request = PublishRequest {
            source_context: 1,
            source_is_bridge: false,
            source_bridge_broker_id: None,
            source_tenant: None,
            cert_chain: vec!["AAAA".into()],
            topic: "t".into(),
            qos: QoS::AtLeastOnce,
            retain: false,
            payload: Bytes::new(),
        };

        let result = dispatch_publish(
            request,
            true,
            &auth,
            &mut tenant_accounting,
            &mut store,
            &mut trie,
            &mut contexts,
            &test_registry(),
            &mut router,
            &NoBridges,
            |_| None,
            Instant::now(),
        );
        assert!(matches!(result, Err(DispatchError::QosFromNonBridge(QoS::AtLeastOnce))));
    }

    #[test]
    fn effective_qos_is_the_minimum_of_publish_and_subscriber_qos() {
        let mut store = MessageStore::new();
        let mut trie = SubscriptionTrie::new();
        let mut contexts = HashMap::new();
        contexts.insert(1, ctx(1));
        contexts.insert(2, ctx(2));
        trie.add(2, "t", QoS::AtMostOnce, false);

        let mut auth = StaticTopicAuthorization::new();
        auth.allow("AAAA", "t");
        let mut tenant_accounting = TenantAccounting::new(0, 0);
        let mut router = FabricRouter::new();

        // Bridge source so qos=1 passes step 1.
        let request = PublishRequest {
            source_context: 1,
            source_is_bridge: true,
            source_bridge_broker_id: None,
            source_tenant: None,
            cert_chain: vec!["AAAA".into()],
            topic: "t".into(),
            qos: QoS::AtLeastOnce,
            retain: false,
            payload: Bytes::new(),
        };

        dispatch_publish(
            request,
            true,
            &auth,
            &mut tenant_accounting,
            &mut store,
            &mut trie,
            &mut contexts,
            &test_registry(),
            &mut router,
            &NoBridges,
            |_| None,
            Instant::now(),
        )
        .unwrap();

        let dest = contexts.get(&2).unwrap();
        assert_eq!(dest.inflight.front().unwrap().qos, QoS::AtMostOnce);
    }

    #[test]
    fn not_authorized_publisher_is_rejected() {
        let mut store = MessageStore::new();
        let mut trie = SubscriptionTrie::new();
        let mut contexts = HashMap::new();
        let auth = StaticTopicAuthorization::new();
        let mut tenant_accounting = TenantAccounting::new(0, 0);
        let mut router = FabricRouter::new();

        let request = PublishRequest {
            source_context: 1,
            source_is_bridge: false,
            source_bridge_broker_id: None,
            source_tenant: None,
            cert_chain: vec!["AAAA".into()],
            topic: "t".into(),
            qos: QoS::AtMostOnce,
            retain: false,
            payload: Bytes::new(),
        };

        let result = dispatch_publish(
            request,
            true,
            &auth,
            &mut tenant_accounting,
            &mut store,
            &mut trie,
            &mut contexts,
            &test_registry(),
            &mut router,
            &NoBridges,
            |_| None,
            Instant::now(),
        );
        assert!(matches!(result, Err(DispatchError::NotAuthorized(_))));
    }
}
