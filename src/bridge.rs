//! Bridge manager (component C10): outgoing peer connections, async
//! reachability probing, primary/secondary failover.
//!
//! # References
//! - spec §4.10, §5 ("the TCP-reachability probe worker is the only
//!   multi-threaded actor in the core")

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

pub type BridgeId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeAddress {
    pub host: String,
    pub port: u16,
}

/// Static per-bridge configuration: an address list partitioned into
/// `primary_address_count` primaries followed by secondaries (spec §4.10).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bridge_id: BridgeId,
    pub addresses: Vec<BridgeAddress>,
    pub primary_address_count: usize,
    pub keepalive: u16,
}

/// Request handed to the dedicated probe worker thread (spec §4.10, §5).
/// The worker "never touches broker state"; it only performs the blocking
/// `getaddrinfo`/`connect` and reports back through the work queue.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub bridge_id: BridgeId,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub bridge_id: BridgeId,
    pub host: String,
    pub port: u16,
    pub reachable: bool,
    pub getaddrinfo_errno: Option<i32>,
}

const PRIMARY_RETRY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Primary,
    Secondary,
}

struct BridgeState {
    config: BridgeConfig,
    connected: bool,
    connection_kind: Option<ConnectionKind>,
    cur_address: usize,
    cur_primary_address: usize,
    primary_retry_deadline: Option<Instant>,
}

impl BridgeState {
    fn new(config: BridgeConfig) -> Self {
        BridgeState {
            config,
            connected: false,
            connection_kind: None,
            cur_address: 0,
            cur_primary_address: 0,
            primary_retry_deadline: None,
        }
    }

    fn is_primary_index(&self, idx: usize) -> bool {
        idx < self.config.primary_address_count
    }
}

pub struct BridgeManager {
    bridges: HashMap<BridgeId, BridgeState>,
}

impl Default for BridgeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeManager {
    pub fn new() -> Self {
        BridgeManager { bridges: HashMap::new() }
    }

    pub fn register(&mut self, config: BridgeConfig) {
        self.bridges.insert(config.bridge_id, BridgeState::new(config));
    }

    pub fn unregister(&mut self, bridge_id: BridgeId) {
        self.bridges.remove(&bridge_id);
    }

    fn state_mut(&mut self, bridge_id: BridgeId) -> Option<&mut BridgeState> {
        self.bridges.get_mut(&bridge_id)
    }

    /// Current candidate address this bridge should try to connect to.
    pub fn current_address(&self, bridge_id: BridgeId) -> Option<&BridgeAddress> {
        let state = self.bridges.get(&bridge_id)?;
        state.config.addresses.get(state.cur_address)
    }

    /// `cur_address` advances on failure; once past the primary count a
    /// primary-retry timer is armed so the bridge keeps trying to fail back
    /// to a primary even while parked on a secondary (spec §4.10).
    pub fn on_connect_failure(&mut self, bridge_id: BridgeId, now: Instant) {
        let Some(state) = self.state_mut(bridge_id) else { return };
        state.connected = false;
        state.connection_kind = None;
        if state.config.addresses.is_empty() {
            return;
        }
        state.cur_address = (state.cur_address + 1) % state.config.addresses.len();
        if !state.is_primary_index(state.cur_address) && state.primary_retry_deadline.is_none() {
            state.primary_retry_deadline = Some(now + PRIMARY_RETRY_INTERVAL);
        }
        warn!(bridge = %bridge_id, next_address = state.cur_address, "bridge connect failed, advancing address");
    }

    pub fn on_connected(&mut self, bridge_id: BridgeId) {
        let Some(state) = self.state_mut(bridge_id) else { return };
        let kind = if state.is_primary_index(state.cur_address) {
            ConnectionKind::Primary
        } else {
            ConnectionKind::Secondary
        };
        state.connected = true;
        state.connection_kind = Some(kind);
        info!(bridge = %bridge_id, ?kind, "bridge connected");
    }

    pub fn is_connected(&self, bridge_id: BridgeId) -> bool {
        self.bridges.get(&bridge_id).map(|s| s.connected).unwrap_or(false)
    }

    /// True once `now` passes the armed primary-retry deadline for a bridge
    /// currently parked on a secondary connection.
    pub fn due_for_primary_retry(&self, bridge_id: BridgeId, now: Instant) -> bool {
        self.bridges
            .get(&bridge_id)
            .map(|s| {
                s.connection_kind == Some(ConnectionKind::Secondary)
                    && s.primary_retry_deadline.map(|d| now >= d).unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Builds the probe requests for every primary address, starting from
    /// `cur_primary_address`, for the reconnect loop's maintenance pass.
    pub fn next_primary_probe(&self, bridge_id: BridgeId) -> Option<ProbeRequest> {
        let state = self.bridges.get(&bridge_id)?;
        if state.config.primary_address_count == 0 {
            return None;
        }
        let addr = state.config.addresses.get(state.cur_primary_address)?;
        Some(ProbeRequest { bridge_id, host: addr.host.clone(), port: addr.port })
    }

    /// Handles a `ProbeResult` from the worker thread. On success, the
    /// caller should close any current secondary connection and reconnect
    /// using the probed primary; on failure this advances
    /// `cur_primary_address` and keeps the current (secondary) connection
    /// (spec §4.10).
    pub fn on_probe_result(&mut self, result: ProbeResult) -> bool {
        let Some(state) = self.state_mut(result.bridge_id) else { return false };
        if result.reachable {
            debug!(bridge = %result.bridge_id, host = %result.host, "primary reachable, failing back");
            state.cur_address = state.cur_primary_address;
            state.primary_retry_deadline = None;
            true
        } else {
            let count = state.config.primary_address_count.max(1);
            state.cur_primary_address = (state.cur_primary_address + 1) % count;
            false
        }
    }
}
