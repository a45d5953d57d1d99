//! Service registry (component C8): registration, zones, round-robin
//! selection, multi-service fan-out.
//!
//! # References
//! - spec §3 ("ServiceRegistration", "TopicServices"), §4.7, §8 scenarios 4-5

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::dxl::message::{DxlMessage, MessageType, FABRIC_SERVICE_UNAVAILABLE};
use crate::dxl::client_reply_topic;
use crate::registry::broker::BrokerId;
use crate::topic::matches as topic_matches;

pub type ServiceId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_id: ServiceId,
    pub service_type: String,
    pub broker_id: BrokerId,
    pub client_guid: Uuid,
    pub client_instance_guid: Uuid,
    pub ttl_mins: u32,
    pub request_channels: HashSet<String>,
    pub metadata: HashMap<String, String>,
    pub certificates: HashSet<String>,
    pub is_managed: bool,
    pub target_tenant_guids: HashSet<Uuid>,
    pub client_tenant_guid: Option<Uuid>,
    /// Matched against an event's topic (or a wildcard derivative of it) to
    /// synthesize a REQUEST for event->request transformation (spec §4.7).
    pub request_prefix_for_event: Option<String>,
    #[serde(skip)]
    pub registration_time: Option<Instant>,
}

impl ServiceRegistration {
    fn expired(&self, now: Instant, grace_mins: u32) -> bool {
        match self.registration_time {
            Some(t) => now.duration_since(t) > Duration::from_secs(((self.ttl_mins + grace_mins) as u64) * 60),
            None => false,
        }
    }

    fn eligible_for_tenant(&self, client_tenant_guid: Option<Uuid>, is_ops: bool, multi_tenant_mode: bool) -> bool {
        if !self.target_tenant_guids.is_empty() {
            let matches_target = client_tenant_guid.map(|g| self.target_tenant_guids.contains(&g)).unwrap_or(false);
            if !matches_target {
                return false;
            }
        }
        if multi_tenant_mode && !is_ops {
            return client_tenant_guid == self.client_tenant_guid;
        }
        true
    }
}

/// A named grouping of services used to steer selection toward locally
/// preferred instances (spec §3, §4.7). `None` is the unnamed terminal zone.
#[derive(Debug, Clone, Default)]
pub struct ZoneServices {
    pub zone: Option<String>,
    pub members: Vec<ServiceId>,
    cursor: usize,
}

impl ZoneServices {
    /// Round-robin pick among members matching `filter`, advancing the
    /// shared cursor exactly once per call regardless of how many members
    /// are filtered out (spec §4.7: "a round-robin cursor kept per
    /// ZoneServices").
    fn next(&mut self, filter: impl Fn(&ServiceId) -> bool) -> Option<ServiceId> {
        if self.members.is_empty() {
            return None;
        }
        let n = self.members.len();
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            if filter(&self.members[idx]) {
                self.cursor = (idx + 1) % n;
                return Some(self.members[idx]);
            }
        }
        None
    }
}

#[derive(Debug, Default)]
pub struct TopicServices {
    pub services: HashSet<ServiceId>,
    pub services_by_zone: Vec<ZoneServices>,
    pub service_types: Vec<String>,
}

pub struct ServiceRegistry {
    services: HashMap<ServiceId, ServiceRegistration>,
    by_topic: HashMap<String, TopicServices>,
    local_broker_id: BrokerId,
    /// zones the local broker participates in, used to order remote
    /// services ahead of the unnamed terminal zone (spec §4.7 step 1b).
    local_zones: HashSet<String>,
    grace_mins: u32,
}

impl ServiceRegistry {
    pub fn new(local_broker_id: BrokerId, local_zones: HashSet<String>, grace_mins: u32) -> Self {
        ServiceRegistry {
            services: HashMap::new(),
            by_topic: HashMap::new(),
            local_broker_id,
            local_zones,
            grace_mins,
        }
    }

    /// `register(service)`: replace on duplicate id, invalidate every
    /// affected `TopicServices`, then index the service under each of its
    /// own `request_channels` so it is visible to `next_service` without a
    /// separate `index_topic` call (spec §4.7).
    pub fn register(&mut self, service: ServiceRegistration) {
        if let Some(existing) = self.services.get(&service.service_id) {
            for topic in &existing.request_channels {
                self.by_topic.remove(topic);
            }
        }
        for topic in &service.request_channels {
            self.by_topic.remove(topic);
        }
        info!(service = %service.service_id, "service registered");
        let id = service.service_id;
        let channels = service.request_channels.clone();
        self.services.insert(id, service);
        for topic in channels {
            self.index_topic(&topic, id);
        }
    }

    pub fn unregister(&mut self, id: ServiceId) {
        if let Some(service) = self.services.remove(&id) {
            for topic in &service.request_channels {
                self.by_topic.remove(topic);
            }
        }
    }

    /// Removes `id`, used when a `FABRICSERVICEUNAVAILABLE` error response
    /// names a `destination_service_id` (spec §4.7).
    pub fn unregister_unavailable(&mut self, id: ServiceId) {
        self.unregister(id);
    }

    pub fn get(&self, id: ServiceId) -> Option<&ServiceRegistration> {
        self.services.get(&id)
    }

    pub fn expire(&mut self, now: Instant) -> Vec<ServiceId> {
        let grace = self.grace_mins;
        let expired: Vec<ServiceId> = self
            .services
            .values()
            .filter(|s| s.expired(now, grace))
            .map(|s| s.service_id)
            .collect();
        for id in &expired {
            self.unregister(*id);
        }
        expired
    }

    fn zones_for(&mut self, topic: &str) -> &mut TopicServices {
        let services = &self.services;
        let local_broker_id = self.local_broker_id;
        let local_zones = &self.local_zones;
        let entry = self.by_topic.entry(topic.to_string()).or_default();
        if entry.services_by_zone.is_empty() && !entry.services.is_empty() {
            Self::compute_zones(entry, services, local_broker_id, local_zones);
        }
        entry
    }

    fn compute_zones(
        entry: &mut TopicServices,
        services: &HashMap<ServiceId, ServiceRegistration>,
        local_broker_id: BrokerId,
        local_zones: &HashSet<String>,
    ) {
        let mut local = ZoneServices { zone: None, ..Default::default() };
        let mut by_zone: HashMap<String, ZoneServices> = HashMap::new();
        let mut terminal = ZoneServices::default();
        let mut types = Vec::new();

        for id in &entry.services {
            let Some(service) = services.get(id) else { continue };
            if !types.contains(&service.service_type) {
                types.push(service.service_type.clone());
            }
            if service.broker_id == local_broker_id {
                local.members.push(*id);
                continue;
            }
            // Zone membership for remote services isn't modeled on
            // ServiceRegistration directly; callers that track per-broker
            // zone membership feed it through `local_zones` intersection
            // at a higher layer. Absent that, remote services land in the
            // terminal zone.
            let _ = local_zones;
            terminal.members.push(*id);
        }

        entry.services_by_zone.clear();
        if !local.members.is_empty() {
            entry.services_by_zone.push(local);
        }
        for (_zone, zs) in by_zone.drain() {
            entry.services_by_zone.push(zs);
        }
        if !terminal.members.is_empty() {
            entry.services_by_zone.push(terminal);
        }
        entry.service_types = types;
    }

    /// Registers `service_id` as serving `topic`, lazily building the
    /// reverse index used by [`ServiceRegistry::next_service`].
    pub fn index_topic(&mut self, topic: &str, service_id: ServiceId) {
        let entry = self.by_topic.entry(topic.to_string()).or_default();
        entry.services.insert(service_id);
        entry.services_by_zone.clear();
    }

    /// `next_service(topic, client_tenant_guid, type)`: walk zones in order,
    /// filtering by type and tenant eligibility, returning the next member
    /// under that zone's round-robin cursor (spec §4.7).
    pub fn next_service(
        &mut self,
        topic: &str,
        client_tenant_guid: Option<Uuid>,
        service_type: Option<&str>,
        is_ops: bool,
        multi_tenant_mode: bool,
    ) -> Option<ServiceId> {
        let services = self.services.clone_keys_snapshot();
        let topic_services = self.zones_for(topic);

        for zone in topic_services.services_by_zone.iter_mut() {
            let found = zone.next(|id| {
                services
                    .get(id)
                    .map(|s| {
                        service_type.map(|t| s.service_type == t).unwrap_or(true)
                            && s.eligible_for_tenant(client_tenant_guid, is_ops, multi_tenant_mode)
                    })
                    .unwrap_or(false)
            });
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// One service per distinct type on `topic`, for multi-service requests
    /// (spec §4.7, §8 scenario 5). Empty if no service matched any type.
    pub fn next_service_per_type(
        &mut self,
        topic: &str,
        client_tenant_guid: Option<Uuid>,
        is_ops: bool,
        multi_tenant_mode: bool,
    ) -> Vec<(String, ServiceId)> {
        let types = self.zones_for(topic).service_types.clone();
        let mut out = Vec::new();
        for ty in types {
            if let Some(id) = self.next_service(topic, client_tenant_guid, Some(&ty), is_ops, multi_tenant_mode) {
                out.push((ty, id));
            }
        }
        out
    }

    /// Event->request transformation (spec §4.7): synthesizes a REQUEST for
    /// every registered service whose `request_prefix_for_event` matches
    /// `event_topic`, directly or as a wildcard derivative of it, with
    /// reply-to set to the publishing client's reply channel. The caller
    /// dispatches each returned message as an ordinary PUBLISH to the
    /// service's request channel.
    pub fn requests_for_event(
        &self,
        event_topic: &str,
        source_client_id: &str,
        source_broker_guid: Uuid,
        source_tenant_guid: Option<Uuid>,
        payload: Bytes,
    ) -> Vec<(ServiceId, DxlMessage)> {
        self.services
            .values()
            .filter_map(|service| {
                let prefix = service.request_prefix_for_event.as_deref()?;
                if !topic_matches(prefix, event_topic) {
                    return None;
                }
                Some((
                    service.service_id,
                    DxlMessage {
                        version: 1,
                        message_type: MessageType::Request,
                        message_id: Uuid::new_v4(),
                        source_client_id: source_client_id.to_string(),
                        source_broker_guid,
                        destination_client_guids: Vec::new(),
                        destination_broker_guids: Vec::new(),
                        destination_service_id: Some(service.service_id),
                        reply_to_topic: Some(client_reply_topic(source_client_id)),
                        source_tenant_guid,
                        multi_service_flag: false,
                        payload: payload.clone(),
                        error_code: None,
                    },
                ))
            })
            .collect()
    }

    /// Routes a multi-service REQUEST (spec §4.7, §8 scenario 5): clones
    /// `original` once per distinct service type registered on `topic`,
    /// each clone getting a fresh `message_id` so replies can be told
    /// apart, and returns a `mid -> service` map the caller keeps around to
    /// resolve each RESPONSE back to the service it came from. The
    /// `acknowledgement` is an immediate RESPONSE to the requester
    /// enumerating the services the request fanned out to, or a
    /// `FABRICSERVICEUNAVAILABLE` ERROR_RESPONSE if no service matched.
    pub fn route_multi_service_request(
        &mut self,
        topic: &str,
        original: &DxlMessage,
        client_tenant_guid: Option<Uuid>,
        is_ops: bool,
        multi_tenant_mode: bool,
    ) -> MultiServiceDispatch {
        let picks = self.next_service_per_type(topic, client_tenant_guid, is_ops, multi_tenant_mode);

        if picks.is_empty() {
            return MultiServiceDispatch {
                requests: Vec::new(),
                mid_to_service: HashMap::new(),
                acknowledgement: DxlMessage {
                    message_type: MessageType::ErrorResponse,
                    message_id: Uuid::new_v4(),
                    destination_service_id: None,
                    multi_service_flag: false,
                    payload: Bytes::new(),
                    error_code: Some(FABRIC_SERVICE_UNAVAILABLE),
                    ..original.clone()
                },
            };
        }

        let mut requests = Vec::with_capacity(picks.len());
        let mut mid_to_service = HashMap::with_capacity(picks.len());
        let mut dispatched = String::new();
        for (service_type, service_id) in &picks {
            let fresh_id = Uuid::new_v4();
            mid_to_service.insert(fresh_id, *service_id);
            requests.push(DxlMessage {
                message_id: fresh_id,
                destination_service_id: Some(*service_id),
                multi_service_flag: false,
                ..original.clone()
            });
            if !dispatched.is_empty() {
                dispatched.push(',');
            }
            dispatched.push_str(&format!("{service_type}={service_id}"));
        }

        let acknowledgement = DxlMessage {
            message_type: MessageType::Response,
            message_id: Uuid::new_v4(),
            destination_service_id: None,
            multi_service_flag: false,
            payload: Bytes::from(dispatched),
            error_code: None,
            ..original.clone()
        };

        MultiServiceDispatch { requests, mid_to_service, acknowledgement }
    }
}

/// Outcome of [`ServiceRegistry::route_multi_service_request`].
pub struct MultiServiceDispatch {
    /// One cloned REQUEST per matched service type, each carrying a fresh
    /// `message_id`.
    pub requests: Vec<DxlMessage>,
    /// Maps each cloned request's `message_id` back to the service it was
    /// sent to.
    pub mid_to_service: HashMap<Uuid, ServiceId>,
    /// RESPONSE (or `FABRICSERVICEUNAVAILABLE` ERROR_RESPONSE) to send back
    /// to the original requester.
    pub acknowledgement: DxlMessage,
}

/// Cheap snapshot used so `next_service`'s zone filter closure doesn't need
/// to hold `&self` while also mutably borrowing `self.by_topic`.
trait CloneKeysSnapshot {
    fn clone_keys_snapshot(&self) -> HashMap<ServiceId, ServiceRegistration>;
}

impl CloneKeysSnapshot for HashMap<ServiceId, ServiceRegistration> {
    fn clone_keys_snapshot(&self) -> HashMap<ServiceId, ServiceRegistration> {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: ServiceId, broker: BrokerId, ty: &str, topic: &str) -> ServiceRegistration {
        let mut channels = HashSet::new();
        channels.insert(topic.to_string());
        ServiceRegistration {
            service_id: id,
            service_type: ty.into(),
            broker_id: broker,
            client_guid: Uuid::new_v4(),
            client_instance_guid: Uuid::new_v4(),
            ttl_mins: 60,
            request_channels: channels,
            metadata: HashMap::new(),
            certificates: HashSet::new(),
            is_managed: false,
            target_tenant_guids: HashSet::new(),
            client_tenant_guid: None,
            request_prefix_for_event: None,
            registration_time: Some(Instant::now()),
        }
    }

    #[test]
    fn round_robin_visits_each_service_exactly_once_in_registration_order() {
        let broker = BrokerId::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        let ids: Vec<ServiceId> = (0..3).map(|_| ServiceId::new_v4()).collect();
        for id in &ids {
            reg.register(service(*id, broker, "T", "req/t"));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(reg.next_service("req/t", None, None, false, false).unwrap());
        }
        assert_eq!(seen, ids);
    }

    #[test]
    fn register_alone_indexes_its_own_request_channels() {
        let broker = BrokerId::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        let id = ServiceId::new_v4();
        reg.register(service(id, broker, "T", "req/t"));
        assert_eq!(reg.next_service("req/t", None, None, false, false), Some(id));
    }

    fn sample_request(source_client_id: &str) -> DxlMessage {
        DxlMessage {
            version: 1,
            message_type: MessageType::Request,
            message_id: Uuid::new_v4(),
            source_client_id: source_client_id.to_string(),
            source_broker_guid: Uuid::new_v4(),
            destination_client_guids: Vec::new(),
            destination_broker_guids: Vec::new(),
            destination_service_id: None,
            reply_to_topic: Some(client_reply_topic(source_client_id)),
            source_tenant_guid: None,
            multi_service_flag: true,
            payload: Bytes::from_static(b"{}"),
            error_code: None,
        }
    }

    #[test]
    fn multi_service_fan_out_picks_one_per_type() {
        let broker = BrokerId::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        let (s1, s2, s3) = (ServiceId::new_v4(), ServiceId::new_v4(), ServiceId::new_v4());
        reg.register(service(s1, broker, "T1", "req/t"));
        reg.register(service(s2, broker, "T1", "req/t"));
        reg.register(service(s3, broker, "T2", "req/t"));

        let picked = reg.next_service_per_type("req/t", None, false, false);
        assert_eq!(picked.len(), 2);
        let types: HashSet<&str> = picked.iter().map(|(t, _)| t.as_str()).collect();
        assert!(types.contains("T1"));
        assert!(types.contains("T2"));
    }

    #[test]
    fn multi_service_request_routing_clones_with_fresh_mids_and_acks_the_requester() {
        let broker = BrokerId::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        let (s1, s2) = (ServiceId::new_v4(), ServiceId::new_v4());
        reg.register(service(s1, broker, "T1", "req/t"));
        reg.register(service(s2, broker, "T2", "req/t"));

        let original = sample_request("client-1");
        let dispatch = reg.route_multi_service_request("req/t", &original, None, false, false);

        assert_eq!(dispatch.requests.len(), 2);
        assert_eq!(dispatch.mid_to_service.len(), 2);
        for cloned in &dispatch.requests {
            assert_ne!(cloned.message_id, original.message_id, "each clone needs a fresh mid");
            assert!(!cloned.multi_service_flag);
            let service_id = dispatch.mid_to_service[&cloned.message_id];
            assert_eq!(cloned.destination_service_id, Some(service_id));
        }
        let targeted: HashSet<ServiceId> = dispatch.mid_to_service.values().copied().collect();
        assert_eq!(targeted, HashSet::from([s1, s2]));

        assert_eq!(dispatch.acknowledgement.message_type, MessageType::Response);
        assert_eq!(dispatch.acknowledgement.reply_to_topic, original.reply_to_topic);
        assert!(dispatch.acknowledgement.error_code.is_none());
    }

    #[test]
    fn multi_service_request_with_no_match_yields_fabric_service_unavailable() {
        let broker = BrokerId::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        let original = sample_request("client-1");

        let dispatch = reg.route_multi_service_request("req/unknown", &original, None, false, false);

        assert!(dispatch.requests.is_empty());
        assert!(dispatch.mid_to_service.is_empty());
        assert_eq!(dispatch.acknowledgement.message_type, MessageType::ErrorResponse);
        assert_eq!(dispatch.acknowledgement.error_code, Some(FABRIC_SERVICE_UNAVAILABLE));
    }

    #[test]
    fn event_matching_a_services_request_prefix_synthesizes_a_request_with_reply_to() {
        let broker = BrokerId::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        let id = ServiceId::new_v4();
        let mut svc = service(id, broker, "T", "req/t");
        svc.request_prefix_for_event = Some("event/#".to_string());
        reg.register(svc);

        let requests =
            reg.requests_for_event("event/sensor/fired", "client-1", broker, None, Bytes::from_static(b"{}"));

        assert_eq!(requests.len(), 1);
        let (service_id, msg) = &requests[0];
        assert_eq!(*service_id, id);
        assert_eq!(msg.message_type, MessageType::Request);
        assert_eq!(msg.destination_service_id, Some(id));
        assert_eq!(msg.reply_to_topic, Some(client_reply_topic("client-1")));
    }

    #[test]
    fn event_not_matching_any_request_prefix_synthesizes_nothing() {
        let broker = BrokerId::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        let id = ServiceId::new_v4();
        let mut svc = service(id, broker, "T", "req/t");
        svc.request_prefix_for_event = Some("other/#".to_string());
        reg.register(svc);

        let requests =
            reg.requests_for_event("event/sensor/fired", "client-1", broker, None, Bytes::from_static(b"{}"));
        assert!(requests.is_empty());
    }

    #[test]
    fn no_matching_service_returns_none_for_unavailable_handling() {
        let broker = BrokerId::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        assert_eq!(reg.next_service("req/unknown", None, None, false, false), None);
    }

    #[test]
    fn tenant_eligibility_in_multi_tenant_mode_requires_exact_match_absent_ops() {
        let broker = BrokerId::new_v4();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        let id = ServiceId::new_v4();
        let mut svc = service(id, broker, "T", "req/t");
        svc.client_tenant_guid = Some(tenant_a);
        reg.register(svc);

        assert_eq!(reg.next_service("req/t", Some(tenant_b), None, false, true), None);
        assert_eq!(reg.next_service("req/t", Some(tenant_a), None, false, true), Some(id));
    }

    #[test]
    fn unregister_on_fabric_service_unavailable_removes_the_service() {
        let broker = BrokerId::new_v4();
        let mut reg = ServiceRegistry::new(broker, HashSet::new(), 5);
        let id = ServiceId::new_v4();
        reg.register(service(id, broker, "T", "req/t"));
        reg.unregister_unavailable(id);
        assert!(reg.get(id).is_none());
        assert_eq!(reg.next_service("req/t", None, None, false, false), None);
    }
}
