//! Message store (component C3): reference-counted in-flight payloads.
//!
//! # References
//! - spec §3 ("Message store entry"), §4.3, §9 ("Manual ref counts ... map
//!   directly to an atomic-free reference count owned by the single reactor
//!   thread")

use std::collections::HashMap;

use bytes::Bytes;

use crate::protocol::packet_type::QoS;

pub type DbId = u64;

/// A cheap, cloneable handle to a store entry. Queue entries in `context.rs`
/// hold one of these rather than the entry itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreEntryRef(pub DbId);

impl StoreEntryRef {
    #[cfg(test)]
    pub fn for_test(id: DbId) -> Self {
        StoreEntryRef(id)
    }
}

#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub db_id: DbId,
    pub source_id: String,
    pub source_mid: u16,
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
    pub retain: bool,
    /// Rewritten payload delivered to non-bridge contexts, if `on_store_message`
    /// produced one (spec §3, §4.8 step 5).
    pub client_payload: Option<Bytes>,
    ref_count: u32,
}

impl StoreEntry {
    /// The payload a given destination should see: `client_payload` for
    /// ordinary clients, the original `payload` for bridges (spec §3).
    pub fn payload_for(&self, is_bridge_destination: bool) -> &Bytes {
        if is_bridge_destination {
            &self.payload
        } else {
            self.client_payload.as_ref().unwrap_or(&self.payload)
        }
    }
}

pub struct NewMessage {
    pub source_id: String,
    pub source_mid: u16,
    pub topic: String,
    pub qos: QoS,
    pub payload: Bytes,
    pub retain: bool,
    pub client_payload: Option<Bytes>,
}

/// Reference-counted store of in-flight payloads, shared by every per-context
/// queue entry that references them.
#[derive(Default)]
pub struct MessageStore {
    next_id: DbId,
    entries: HashMap<DbId, StoreEntry>,
    finalize_hooks: Vec<Box<dyn FnMut(DbId) + Send>>,
}

impl MessageStore {
    pub fn new() -> Self {
        MessageStore {
            next_id: 1,
            entries: HashMap::new(),
            finalize_hooks: Vec::new(),
        }
    }

    /// Registers a callback fired when a store entry's ref count reaches
    /// zero (spec §3: "used by C8 to retire pending multi-service requests").
    pub fn on_finalize(&mut self, hook: impl FnMut(DbId) + Send + 'static) {
        self.finalize_hooks.push(Box::new(hook));
    }

    /// Stores a newly-parsed PUBLISH with `ref_count=0` (spec §4.3).
    pub fn store(&mut self, msg: NewMessage) -> StoreEntryRef {
        let db_id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            db_id,
            StoreEntry {
                db_id,
                source_id: msg.source_id,
                source_mid: msg.source_mid,
                topic: msg.topic,
                qos: msg.qos,
                payload: msg.payload,
                retain: msg.retain,
                client_payload: msg.client_payload,
                ref_count: 0,
            },
        );
        StoreEntryRef(db_id)
    }

    pub fn get(&self, entry_ref: StoreEntryRef) -> Option<&StoreEntry> {
        self.entries.get(&entry_ref.0)
    }

    /// Called when a queue entry is created referencing this store entry.
    pub fn add_ref(&mut self, entry_ref: StoreEntryRef) {
        if let Some(entry) = self.entries.get_mut(&entry_ref.0) {
            entry.ref_count += 1;
        }
    }

    /// Called when a queue entry referencing this store entry is removed
    /// (delivered, dropped, or the context closed). At zero the entry is
    /// deleted and every finalize hook fires (spec §3).
    ///
    /// Per spec §9 ("`mqtt3_db_message_release` on a topic-null stored
    /// message returns success"), releasing a ref on an entry that was
    /// already finalized (or never existed, e.g. a denied QoS 2 message) is
    /// not an error: it is idempotent under PUBREL retry.
    pub fn release_ref(&mut self, entry_ref: StoreEntryRef) {
        let Some(entry) = self.entries.get_mut(&entry_ref.0) else {
            return;
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 {
            self.entries.remove(&entry_ref.0);
            for hook in &mut self.finalize_hooks {
                hook(entry_ref.0);
            }
        }
    }

    pub fn ref_count(&self, entry_ref: StoreEntryRef) -> u32 {
        self.entries.get(&entry_ref.0).map(|e| e.ref_count).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
