//! DXL envelope and the control-topic contracts built on top of MQTT
//! (spec §6 "Control topics").

pub mod message;

/// Periodic gossip of one broker's full `BrokerState` (spec §6).
pub const TOPIC_BROKER_STATE: &str = "/mcafee/event/dxl/brokerstate";
/// Service registration event; payload is a `ServiceRegistration` record.
pub const TOPIC_SVC_REGISTER: &str = "/mcafee/event/dxl/svcregistry/register";
/// Service unregistration event, by service id.
pub const TOPIC_SVC_UNREGISTER: &str = "/mcafee/event/dxl/svcregistry/unregister";
/// Prefix for topics handled locally and never multi-service-routed.
pub const PREFIX_BROKER_SERVICE: &str = "/mcafee/service/dxl/brokerservice/";
/// Prefix for per-client reply channels.
pub const PREFIX_CLIENT: &str = "/mcafee/client/";

pub fn is_local_broker_service_topic(topic: &str) -> bool {
    topic.starts_with(PREFIX_BROKER_SERVICE)
}

pub fn is_client_reply_topic(topic: &str) -> bool {
    topic.starts_with(PREFIX_CLIENT)
}

pub fn client_reply_topic(client_id: &str) -> String {
    format!("{PREFIX_CLIENT}{client_id}")
}
