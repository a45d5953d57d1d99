//! Subscription trie (component C2).
//!
//! # References
//! - spec §3 ("Subscription trie"), §4.2, §8 boundary properties & scenarios 1-2

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::protocol::packet_type::QoS;
use crate::store::StoreEntryRef;
use crate::topic::tokenize;

/// One subscriber at a trie leaf.
#[derive(Debug, Clone)]
pub struct Leaf<Ctx> {
    pub context: Ctx,
    pub qos: QoS,
}

#[derive(Debug, Default)]
struct Node<Ctx> {
    children: HashMap<String, Node<Ctx>>,
    leaves: Vec<Leaf<Ctx>>,
    retained: Option<StoreEntryRef>,
    /// O(1) shortcuts so `search` can skip a hash lookup for the common case
    /// of a node with no wildcard children at all (spec §3).
    has_hash_wildcard: bool,
    has_plus_wildcard: bool,
}

impl<Ctx> Node<Ctx> {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.leaves.is_empty() && self.retained.is_none()
    }

    fn refresh_wildcard_flags(&mut self) {
        self.has_hash_wildcard = self.children.contains_key("#");
        self.has_plus_wildcard = self.children.contains_key("+");
    }
}

/// Outcome of [`SubscriptionTrie::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A brand new leaf was created; `first_on_node` is true if this was the
    /// first non-bridge leaf ever added at this node (spec §4.2:
    /// `topic_added_to_broker` fires exactly then).
    Added { first_on_node: bool },
    /// `context` already subscribed to `sub`; its qos was updated in place.
    DuplicateUpdated,
}

pub struct SubscriptionTrie<Ctx> {
    root: Node<Ctx>,
}

impl<Ctx> Default for SubscriptionTrie<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> SubscriptionTrie<Ctx>
where
    Ctx: Eq + Clone + Hash + Debug,
{
    /// The root owns two children, `""` and `$SYS` (spec §3); both are
    /// created lazily on first use so an empty trie stays cheap.
    pub fn new() -> Self {
        SubscriptionTrie { root: Node::default() }
    }

    pub fn add(&mut self, context: Ctx, sub: &str, qos: QoS, is_bridge: bool) -> AddOutcome {
        let tokens = tokenize(sub);
        let mut node = &mut self.root;
        for token in &tokens {
            node = node.children.entry((*token).to_owned()).or_default();
        }

        if let Some(leaf) = node.leaves.iter_mut().find(|l| l.context == context) {
            leaf.qos = qos;
            return AddOutcome::DuplicateUpdated;
        }

        let first_on_node = !is_bridge && !node.leaves.iter().any(|l| l.context != context);
        node.leaves.push(Leaf { context, qos });
        AddOutcome::Added { first_on_node }
    }

    /// Removes `context`'s subscription to `sub`, collapsing now-empty
    /// interior nodes back up to (but not including) the root.
    pub fn remove(&mut self, context: &Ctx, sub: &str) {
        let tokens: Vec<String> = tokenize(sub).into_iter().map(str::to_owned).collect();
        Self::remove_path(&mut self.root, &tokens, context);
    }

    fn remove_path(node: &mut Node<Ctx>, path: &[String], context: &Ctx) -> bool {
        if path.is_empty() {
            node.leaves.retain(|l| &l.context != context);
            return node.is_empty();
        }
        let (head, rest) = (&path[0], &path[1..]);
        let should_prune = if let Some(child) = node.children.get_mut(head) {
            let prune_child = Self::remove_path(child, rest, context);
            if prune_child {
                node.children.remove(head);
                node.refresh_wildcard_flags();
            }
            false
        } else {
            false
        };
        let _ = should_prune;
        node.is_empty()
    }

    /// Removes every subscription `context` holds, wherever in the trie it
    /// appears. Used when a clean-session client disconnects (spec §4.2,
    /// `clean_session` is always true per the Non-goals).
    pub fn remove_context(&mut self, context: &Ctx) {
        Self::remove_context_rec(&mut self.root, context);
    }

    fn remove_context_rec(node: &mut Node<Ctx>, context: &Ctx) -> bool {
        node.leaves.retain(|l| &l.context != context);
        let mut dead_children = Vec::new();
        for (seg, child) in node.children.iter_mut() {
            if Self::remove_context_rec(child, context) {
                dead_children.push(seg.clone());
            }
        }
        for seg in dead_children {
            node.children.remove(&seg);
        }
        node.refresh_wildcard_flags();
        node.is_empty()
    }

    /// Walks the trie collecting every leaf that should receive `topic`,
    /// trying `#`, `+`, then the literal child at each level (spec §4.2).
    pub fn search(&self, topic: &str) -> Vec<Leaf<Ctx>> {
        let tokens: Vec<&str> = tokenize(topic).collect::<Vec<_>>();
        let mut out = Vec::new();
        Self::search_rec(&self.root, &tokens, &mut out);
        out
    }

    fn search_rec(node: &Node<Ctx>, tokens: &[&str], out: &mut Vec<Leaf<Ctx>>) {
        if tokens.is_empty() {
            out.extend(node.leaves.iter().cloned());
            // `foo/#` must also match the exact parent topic `foo` (spec
            // §4.1, MQTT 3.1.1 §4.7.1.2).
            if let Some(hash_child) = node.children.get("#") {
                out.extend(hash_child.leaves.iter().cloned());
            }
            return;
        }

        if node.has_hash_wildcard {
            if let Some(hash_child) = node.children.get("#") {
                // '#' delivers immediately and stops descent on this branch.
                out.extend(hash_child.leaves.iter().cloned());
            }
        }

        if node.has_plus_wildcard {
            if let Some(plus_child) = node.children.get("+") {
                Self::search_rec(plus_child, &tokens[1..], out);
            }
        }

        if let Some(literal_child) = node.children.get(tokens[0]) {
            Self::search_rec(literal_child, &tokens[1..], out);
        }
    }

    /// Records (or replaces) the retained message at `topic`'s exact node.
    pub fn set_retained(&mut self, topic: &str, entry: Option<StoreEntryRef>) {
        let tokens: Vec<String> = tokenize(topic).into_iter().map(str::to_owned).collect();
        let mut node = &mut self.root;
        for token in &tokens {
            node = node.children.entry(token.clone()).or_default();
        }
        node.retained = entry;
    }

    /// Retained messages a new subscription to `sub` should receive: every
    /// retained message at or below `sub`'s matching subtree. Handles the
    /// edge case where subscribing to the literal `foo` must also see the
    /// retained message at `foo` even though other subscribers sit under
    /// `foo/#` (spec §4.2 edge cases).
    pub fn retained_for_subscribe(&self, sub: &str) -> Vec<StoreEntryRef> {
        let tokens: Vec<&str> = tokenize(sub).collect();
        let mut out = Vec::new();
        Self::retained_rec(&self.root, &tokens, &mut out);
        out
    }

    fn retained_rec(node: &Node<Ctx>, tokens: &[&str], out: &mut Vec<StoreEntryRef>) {
        match tokens.first() {
            None => {
                if let Some(r) = &node.retained {
                    out.push(r.clone());
                }
            }
            Some(&"#") => {
                Self::collect_all_retained(node, out);
            }
            Some(&"+") => {
                for child in node.children.values() {
                    Self::retained_rec(child, &tokens[1..], out);
                }
            }
            Some(seg) => {
                if let Some(child) = node.children.get(*seg) {
                    Self::retained_rec(child, &tokens[1..], out);
                }
            }
        }
    }

    fn collect_all_retained(node: &Node<Ctx>, out: &mut Vec<StoreEntryRef>) {
        if let Some(r) = &node.retained {
            out.push(r.clone());
        }
        for child in node.children.values() {
            Self::collect_all_retained(child, out);
        }
    }

    /// Number of distinct trie leaves referencing `context`, used to check
    /// the invariant in spec §8 (`context.subscription_count` equals this).
    pub fn leaf_count_for(&self, context: &Ctx) -> usize {
        Self::count_rec(&self.root, context)
    }

    fn count_rec(node: &Node<Ctx>, context: &Ctx) -> usize {
        let mut count = node.leaves.iter().filter(|l| &l.context == context).count();
        for child in node.children.values() {
            count += Self::count_rec(child, context);
        }
        count
    }
}
