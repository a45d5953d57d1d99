//! Broker-wide settings (component: ambient configuration).
//!
//! Built through a chained-setter builder, the same shape `rskafka`'s
//! `ClientBuilder` uses: a plain value type built once and threaded through
//! [`crate::Core`] by value, never read back out of a global/singleton
//! (spec §6).

use std::time::Duration;

use uuid::Uuid;

/// Every setting spec §6 says is injected into the core at startup, plus
/// the MQTT tuning knobs carried over from `original_source/include/BrokerSettings.h`
/// that the distilled spec left implicit.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub guid: Uuid,
    pub tenant_guid: Uuid,
    pub listen_port: u16,
    pub ws_port: Option<u16>,
    pub message_size_limit: usize,
    pub max_packet_buffer_size: usize,
    pub ttl_mins: u32,
    pub ttl_grace_mins: u32,
    pub tenant_byte_limit: Option<u64>,
    pub tenant_connection_limit: Option<u32>,
    pub multi_tenant_mode: bool,
    pub topic_routing_enabled: bool,
    pub cert_identity_validation_enabled: bool,
    pub max_inflight_messages: usize,
    pub max_queued_messages: usize,
    pub retry_interval: Duration,
    pub sys_interval: Duration,
    pub persistent_client_expiration: Duration,
    pub autosave_interval: Duration,
}

/// Builds a [`BrokerSettings`], in the style of `rskafka`'s `ClientBuilder`:
/// one required value up front (`guid`), everything else defaulted and
/// overridable through chained setters.
pub struct BrokerSettingsBuilder {
    guid: Uuid,
    tenant_guid: Uuid,
    listen_port: u16,
    ws_port: Option<u16>,
    message_size_limit: usize,
    max_packet_buffer_size: usize,
    ttl_mins: u32,
    ttl_grace_mins: u32,
    tenant_byte_limit: Option<u64>,
    tenant_connection_limit: Option<u32>,
    multi_tenant_mode: bool,
    topic_routing_enabled: bool,
    cert_identity_validation_enabled: bool,
    max_inflight_messages: usize,
    max_queued_messages: usize,
    retry_interval: Duration,
    sys_interval: Duration,
    persistent_client_expiration: Duration,
    autosave_interval: Duration,
}

impl BrokerSettingsBuilder {
    /// Creates a new builder for the broker identified by `guid`.
    pub fn new(guid: Uuid) -> Self {
        BrokerSettingsBuilder {
            guid,
            tenant_guid: Uuid::nil(),
            listen_port: 8883,
            ws_port: None,
            message_size_limit: 1024 * 1024,
            max_packet_buffer_size: 10 * 1024 * 1024,
            ttl_mins: 20,
            ttl_grace_mins: 5,
            tenant_byte_limit: None,
            tenant_connection_limit: None,
            multi_tenant_mode: false,
            topic_routing_enabled: true,
            cert_identity_validation_enabled: true,
            max_inflight_messages: 20,
            max_queued_messages: 1000,
            retry_interval: Duration::from_secs(20),
            sys_interval: Duration::from_secs(10),
            persistent_client_expiration: Duration::from_secs(60 * 60 * 24),
            autosave_interval: Duration::from_secs(60 * 10),
        }
    }

    pub fn tenant_guid(mut self, tenant_guid: Uuid) -> Self {
        self.tenant_guid = tenant_guid;
        self
    }

    pub fn listen_port(mut self, listen_port: u16) -> Self {
        self.listen_port = listen_port;
        self
    }

    pub fn ws_port(mut self, ws_port: u16) -> Self {
        self.ws_port = Some(ws_port);
        self
    }

    pub fn message_size_limit(mut self, limit: usize) -> Self {
        self.message_size_limit = limit;
        self
    }

    pub fn max_packet_buffer_size(mut self, limit: usize) -> Self {
        self.max_packet_buffer_size = limit;
        self
    }

    pub fn ttl(mut self, ttl_mins: u32, grace_mins: u32) -> Self {
        self.ttl_mins = ttl_mins;
        self.ttl_grace_mins = grace_mins;
        self
    }

    pub fn tenant_byte_limit(mut self, limit: u64) -> Self {
        self.tenant_byte_limit = Some(limit);
        self
    }

    pub fn tenant_connection_limit(mut self, limit: u32) -> Self {
        self.tenant_connection_limit = Some(limit);
        self
    }

    pub fn multi_tenant_mode(mut self, enabled: bool) -> Self {
        self.multi_tenant_mode = enabled;
        self
    }

    pub fn topic_routing_enabled(mut self, enabled: bool) -> Self {
        self.topic_routing_enabled = enabled;
        self
    }

    pub fn cert_identity_validation_enabled(mut self, enabled: bool) -> Self {
        self.cert_identity_validation_enabled = enabled;
        self
    }

    pub fn max_inflight_messages(mut self, max: usize) -> Self {
        self.max_inflight_messages = max;
        self
    }

    pub fn max_queued_messages(mut self, max: usize) -> Self {
        self.max_queued_messages = max;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn sys_interval(mut self, interval: Duration) -> Self {
        self.sys_interval = interval;
        self
    }

    pub fn persistent_client_expiration(mut self, expiration: Duration) -> Self {
        self.persistent_client_expiration = expiration;
        self
    }

    pub fn autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    pub fn build(self) -> BrokerSettings {
        BrokerSettings {
            guid: self.guid,
            tenant_guid: self.tenant_guid,
            listen_port: self.listen_port,
            ws_port: self.ws_port,
            message_size_limit: self.message_size_limit,
            max_packet_buffer_size: self.max_packet_buffer_size,
            ttl_mins: self.ttl_mins,
            ttl_grace_mins: self.ttl_grace_mins,
            tenant_byte_limit: self.tenant_byte_limit,
            tenant_connection_limit: self.tenant_connection_limit,
            multi_tenant_mode: self.multi_tenant_mode,
            topic_routing_enabled: self.topic_routing_enabled,
            cert_identity_validation_enabled: self.cert_identity_validation_enabled,
            max_inflight_messages: self.max_inflight_messages,
            max_queued_messages: self.max_queued_messages,
            retry_interval: self.retry_interval,
            sys_interval: self.sys_interval,
            persistent_client_expiration: self.persistent_client_expiration,
            autosave_interval: self.autosave_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_when_unset() {
        let settings = BrokerSettingsBuilder::new(Uuid::nil()).build();
        assert_eq!(settings.listen_port, 8883);
        assert!(settings.topic_routing_enabled);
        assert_eq!(settings.max_inflight_messages, 20);
    }

    #[test]
    fn chained_setters_override_defaults() {
        let settings = BrokerSettingsBuilder::new(Uuid::nil())
            .listen_port(1883)
            .ws_port(8080)
            .multi_tenant_mode(true)
            .tenant_byte_limit(4096)
            .build();
        assert_eq!(settings.listen_port, 1883);
        assert_eq!(settings.ws_port, Some(8080));
        assert!(settings.multi_tenant_mode);
        assert_eq!(settings.tenant_byte_limit, Some(4096));
    }
}
