//! Fabric router (component C7): next-hop DFS, route cache, topic cache.
//!
//! # References
//! - spec §3 ("Route cache", "Topic cache"), §4.6, §8, §9 (visitor → two callables)

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::registry::broker::{BrokerId, BrokerRegistry};
use crate::topic::{is_wildcard, matches};

/// `allow_visit(id)` gates whether the DFS may step into `id` at all;
/// `visit(id)` is called once per accepted node and may stop the walk
/// early. Replaces the original's `FabricVisitor` (spec §9).
pub enum Step {
    Continue,
    Stop,
}

fn depth_first_traversal(
    registry: &BrokerRegistry,
    start: BrokerId,
    allow_visit: impl Fn(BrokerId) -> bool,
    mut visit: impl FnMut(BrokerId) -> Step,
) {
    let mut seen: HashSet<BrokerId> = HashSet::new();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if !allow_visit(id) {
            continue;
        }
        if let Step::Stop = visit(id) {
            return;
        }
        for next in registry.successors(id) {
            if !seen.contains(&next) {
                stack.push(next);
            }
        }
    }
}

/// Finds a path from `start` to `target` via DFS, returning the full path
/// (inclusive of both ends) on success.
fn find_path(registry: &BrokerRegistry, start: BrokerId, target: BrokerId) -> Option<Vec<BrokerId>> {
    fn walk(
        registry: &BrokerRegistry,
        current: BrokerId,
        target: BrokerId,
        seen: &mut HashSet<BrokerId>,
        path: &mut Vec<BrokerId>,
    ) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        seen.insert(current);
        for next in registry.successors(current) {
            if !seen.contains(&next) && walk(registry, next, target, seen, path) {
                return true;
            }
        }
        path.pop();
        false
    }

    let mut seen = HashSet::new();
    let mut path = Vec::new();
    if walk(registry, start, target, &mut seen, &mut path) {
        Some(path)
    } else {
        None
    }
}

const TOPIC_CACHE_DEBOUNCE: Duration = Duration::from_millis(250);

pub struct FabricRouter {
    route_cache: HashMap<(BrokerId, BrokerId), BrokerId>,
    topic_cache: HashMap<(BrokerId, BrokerId, String), bool>,
    /// When the topic cache was last told to clear; a debounced clear is
    /// deferred until this elapses (spec §9 open question: "preserve the
    /// debounce but document each site's choice").
    pending_topic_clear_since: Option<Instant>,
}

impl Default for FabricRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl FabricRouter {
    pub fn new() -> Self {
        FabricRouter {
            route_cache: HashMap::new(),
            topic_cache: HashMap::new(),
            pending_topic_clear_since: None,
        }
    }

    /// `next_broker(from, to)`: cache hit short-circuits; on miss, DFS finds
    /// the path and the second element is the next hop (spec §4.6, §8).
    pub fn next_broker(&mut self, registry: &BrokerRegistry, from: BrokerId, to: BrokerId) -> Option<BrokerId> {
        if from == to {
            return Some(to);
        }
        if let Some(&hop) = self.route_cache.get(&(from, to)) {
            return Some(hop);
        }
        let path = find_path(registry, from, to)?;
        let hop = *path.get(1)?;
        self.route_cache.insert((from, to), hop);
        Some(hop)
    }

    /// Invalidates the route cache. Called unconditionally on any registry
    /// mutation (spec §4.5, §8: "after any registry mutation the cache is
    /// empty").
    pub fn invalidate_routes(&mut self) {
        self.route_cache.clear();
    }

    /// Clears the topic cache immediately. Used at call sites that the
    /// original invalidates unconditionally regardless of the debounce
    /// (spec §9 open question) — e.g. broker removal, since a removed
    /// broker's stale topic-cache entries must not ever be served.
    pub fn invalidate_topics_now(&mut self) {
        self.topic_cache.clear();
        self.pending_topic_clear_since = None;
    }

    /// Schedules a debounced topic-cache clear, the default path for
    /// subscription-set changes (spec §3: "cleared with a short debounce
    /// delay"). Call [`FabricRouter::tick`] on the maintenance cadence to
    /// actually flush once the debounce elapses.
    pub fn request_topic_clear(&mut self) {
        if self.pending_topic_clear_since.is_none() {
            self.pending_topic_clear_since = Some(Instant::now());
        }
    }

    pub fn tick(&mut self, now: Instant) {
        if let Some(since) = self.pending_topic_clear_since {
            if now.duration_since(since) >= TOPIC_CACHE_DEBOUNCE {
                self.invalidate_topics_now();
            }
        }
    }

    /// `is_subscriber_in_hierarchy(from, via, topic)`: DFS from `via`
    /// skipping `from` to avoid echoing back to the source; true if any
    /// visited broker has topic routing disabled or carries a matching
    /// subscription (spec §4.6).
    pub fn is_subscriber_in_hierarchy(
        &mut self,
        registry: &BrokerRegistry,
        from: BrokerId,
        via: BrokerId,
        topic: &str,
    ) -> bool {
        let key = (from, via, topic.to_string());
        if let Some(&answer) = self.topic_cache.get(&key) {
            return answer;
        }

        let mut found = false;
        depth_first_traversal(
            registry,
            via,
            |id| id != from,
            |id| {
                let routing_disabled = registry.get(id).map(|b| !b.topic_routing_enabled).unwrap_or(false);
                let has_topic = registry
                    .state(id)
                    .map(|s| {
                        s.subscriptions.contains(topic)
                            || s.subscriptions.iter().any(|sub| is_wildcard(sub) && matches(sub, topic))
                    })
                    .unwrap_or(false);
                if routing_disabled || has_topic {
                    found = true;
                    Step::Stop
                } else {
                    Step::Continue
                }
            },
        );

        self.topic_cache.insert(key, found);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::broker::{Broker, LocalIdentity};
    use std::time::Instant;

    fn broker(id: BrokerId) -> Broker {
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
            topic_routing_enabled: true,
        }
    }

    fn line_topology() -> (BrokerRegistry, BrokerId, BrokerId, BrokerId) {
        let a = BrokerId::new_v4();
        let b = BrokerId::new_v4();
        let c = BrokerId::new_v4();
        let mut reg = BrokerRegistry::new(a, LocalIdentity { hostname: "a".into(), port: 1, hub: None }, 5);
        reg.upsert(broker(a));
        reg.upsert(broker(b));
        reg.upsert(broker(c));
        reg.add_connection(a, b);
        reg.add_connection(b, a);
        reg.add_connection(b, c);
        reg.add_connection(c, b);
        (reg, a, b, c)
    }

    #[test]
    fn next_broker_on_a_line_is_the_middle_hop() {
        let (reg, a, b, c) = line_topology();
        let mut router = FabricRouter::new();
        assert_eq!(router.next_broker(&reg, a, c), Some(b));
        // Cache should now answer c -> a through b as well once queried independently.
        assert_eq!(router.next_broker(&reg, c, a), Some(b));
    }

    #[test]
    fn next_broker_from_equals_to_short_circuits() {
        let (reg, a, ..) = line_topology();
        let mut router = FabricRouter::new();
        assert_eq!(router.next_broker(&reg, a, a), Some(a));
    }

    #[test]
    fn subscriber_in_hierarchy_sees_matching_subscription_downstream() {
        let (reg, a, b, c) = line_topology();
        let mut router = FabricRouter::new();
        // No subscriptions anywhere yet.
        assert!(!router.is_subscriber_in_hierarchy(&reg, a, b, "t"));

        let mut reg = reg;
        reg.state_mut_or_default(c).subscriptions.insert("t".into());
        let mut router = FabricRouter::new();
        assert!(router.is_subscriber_in_hierarchy(&reg, a, b, "t"));
    }

    #[test]
    fn topic_clear_is_debounced_until_tick_elapses() {
        let mut router = FabricRouter::new();
        router.topic_cache.insert((BrokerId::nil(), BrokerId::nil(), "t".into()), true);
        router.request_topic_clear();
        router.tick(Instant::now());
        assert!(!router.topic_cache.is_empty(), "debounce window has not elapsed yet");
        router.tick(Instant::now() + Duration::from_millis(300));
        assert!(router.topic_cache.is_empty());
    }
}
