//! Reactor glue (component C5): work queue and maintenance cadence.
//!
//! The actual edge-polling primitive is out of scope (spec §1); this module
//! owns everything the single reactor thread does around that primitive:
//! draining the cross-thread work queue and deciding when a maintenance
//! pass is due (spec §4.4).

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::bridge::{BridgeConfig, BridgeId, ProbeResult};
use crate::context::ContextId;

pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10);
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Typed work-queue runnable variants (spec §9: "Provide a typed enum of
/// runnable variants ... rather than a virtual base with heap
/// allocations"). Produced by cross-thread actors (policy reloader, bridge
/// config updater, the probe worker) and consumed only by the reactor
/// thread.
#[derive(Debug, Clone)]
pub enum WorkItem {
    BridgeConfigChanged(BridgeConfig),
    SendMessage { context: ContextId, payload: Bytes },
    RevokeCerts(HashSet<String>),
    RestartListeners(HashSet<String>),
    SetConnectionLimit(Uuid, u32),
    SetBridgeKeepalive(BridgeId, u16),
    BridgeProbeResult(ProbeResult),
}

/// The cross-thread work queue: "protected by one mutex and holds
/// type-erased runnables" in the original (spec §5); here the runnables
/// are a closed enum so no virtual dispatch or heap-erased trait object is
/// needed.
#[derive(Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        WorkQueue { items: Mutex::new(VecDeque::new()) }
    }

    /// Called by cross-thread producers; never touches context state
    /// directly (spec §4.4).
    pub fn push(&self, item: WorkItem) {
        self.items.lock().push_back(item);
    }

    /// Drains everything currently queued, in FIFO order. Only the reactor
    /// thread calls this.
    pub fn drain(&self) -> Vec<WorkItem> {
        let mut guard = self.items.lock();
        guard.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Tracks whether a maintenance pass (bridge reconnect probes, keepalive
/// timeout, session cleanup, TTL checks, memory trim) is due, per the
/// 10-second cadence in spec §4.4. Polling itself (`POLL_TIMEOUT`) is the
/// event-loop primitive's job, out of scope here.
pub struct MaintenanceScheduler {
    last_run: Instant,
}

impl MaintenanceScheduler {
    pub fn new(now: Instant) -> Self {
        MaintenanceScheduler { last_run: now }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.duration_since(self.last_run) >= MAINTENANCE_INTERVAL
    }

    /// Marks a maintenance pass as having just run.
    pub fn mark_ran(&mut self, now: Instant) {
        self.last_run = now;
    }
}
