//! Multi-tenant accounting (component C11).
//!
//! # References
//! - spec §3 ("Tenant accounting"), §4.11

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
struct TenantCounters {
    bytes_sent_this_interval: u64,
    active_connections: u32,
}

pub struct TenantAccounting {
    counters: HashMap<Uuid, TenantCounters>,
    byte_limit: u64,
    connection_limit: u32,
}

impl TenantAccounting {
    pub fn new(byte_limit: u64, connection_limit: u32) -> Self {
        TenantAccounting {
            counters: HashMap::new(),
            byte_limit,
            connection_limit,
        }
    }

    /// Adds `n` bytes to `tenant`'s interval counter, returning true if the
    /// tenant is now over its byte limit. Per spec §4.11 / §4.12, the
    /// caller disconnects the offending connection on `true`.
    pub fn update_sent_bytes(&mut self, tenant: Uuid, n: u64) -> bool {
        let counters = self.counters.entry(tenant).or_default();
        counters.bytes_sent_this_interval = counters.bytes_sent_this_interval.saturating_add(n);
        self.byte_limit != 0 && counters.bytes_sent_this_interval > self.byte_limit
    }

    /// Resets every tenant's interval byte counter; called on the
    /// maintenance cadence.
    pub fn reset_interval(&mut self) {
        for counters in self.counters.values_mut() {
            counters.bytes_sent_this_interval = 0;
        }
    }

    /// Only non-ops, non-bridge, tenant-tagged contexts count (spec §4.11).
    /// Checked both at CONNECT and at TLS handshake, so a breach can
    /// disconnect mid-handshake.
    pub fn is_connection_allowed(&self, tenant: Uuid, is_managed: bool) -> bool {
        if is_managed {
            return true;
        }
        self.connection_limit == 0
            || self.counters.get(&tenant).map(|c| c.active_connections).unwrap_or(0) < self.connection_limit
    }

    pub fn on_client_connected(&mut self, tenant: Uuid) {
        self.counters.entry(tenant).or_default().active_connections += 1;
    }

    pub fn on_client_disconnected(&mut self, tenant: Uuid) {
        if let Some(counters) = self.counters.get_mut(&tenant) {
            counters.active_connections = counters.active_connections.saturating_sub(1);
        }
    }

    pub fn active_connections(&self, tenant: Uuid) -> u32 {
        self.counters.get(&tenant).map(|c| c.active_connections).unwrap_or(0)
    }
}
