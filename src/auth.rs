//! Topic authorization (consumed by the publish dispatcher, C9).
//!
//! # References
//! - spec §1 ("the core consumes a `TopicAuthorizationState` object"), §4.8 step 3

use std::collections::{HashMap, HashSet};

use crate::topic::iterate_wildcards;

/// External collaborator: the policy engine answers per-cert, per-topic
/// authorization questions. Populated from `topicauth.policy` by a layer
/// outside the core (spec §1 Non-goals, §6 "Persisted state").
pub trait TopicAuthorizationState {
    fn is_authorized(&self, cert_sha1: &str, topic: &str) -> bool;
}

/// True iff any cert in `cert_chain` is authorized for `topic` directly, or
/// (when `wildcards_enabled`) for any wildcard derivative of it (spec §4.8
/// step 3). A lookup failure (`state` has no opinion) falls back to deny
/// (spec §4.12 "Failure semantics").
pub fn is_publish_authorized(
    state: &dyn TopicAuthorizationState,
    cert_chain: &[String],
    topic: &str,
    wildcards_enabled: bool,
) -> bool {
    for cert in cert_chain {
        if state.is_authorized(cert, topic) {
            return true;
        }
        if wildcards_enabled {
            for wildcard in iterate_wildcards(topic) {
                if state.is_authorized(cert, &wildcard) {
                    return true;
                }
            }
        }
    }
    false
}

/// In-memory `TopicAuthorizationState`, the shape `policy::parse_kv_lines`
/// feeds once `topicauth.policy` is parsed (kept here since the core
/// consumes it as a plain map, not the file format).
#[derive(Debug, Default)]
pub struct StaticTopicAuthorization {
    allowed: HashMap<String, HashSet<String>>,
}

impl StaticTopicAuthorization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, cert_sha1: impl Into<String>, topic: impl Into<String>) {
        self.allowed.entry(cert_sha1.into()).or_default().insert(topic.into());
    }
}

impl TopicAuthorizationState for StaticTopicAuthorization {
    fn is_authorized(&self, cert_sha1: &str, topic: &str) -> bool {
        self.allowed.get(cert_sha1).map(|topics| topics.contains(topic)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_topic_grant_authorizes() {
        let mut state = StaticTopicAuthorization::new();
        state.allow("AAAA", "foo/bar");
        assert!(is_publish_authorized(&state, &["AAAA".into()], "foo/bar", true));
    }

    #[test]
    fn wildcard_grant_authorizes_when_enabled() {
        let mut state = StaticTopicAuthorization::new();
        state.allow("AAAA", "foo/#");
        assert!(is_publish_authorized(&state, &["AAAA".into()], "foo/bar/baz", true));
        assert!(!is_publish_authorized(&state, &["AAAA".into()], "foo/bar/baz", false));
    }

    #[test]
    fn no_grant_in_any_chain_cert_denies() {
        let state = StaticTopicAuthorization::new();
        assert!(!is_publish_authorized(&state, &["AAAA".into(), "BBBB".into()], "foo/bar", true));
    }
}
