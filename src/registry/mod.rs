//! Broker registry, fabric router, and service registry (components
//! C6-C8): the federation half of the core.

pub mod broker;
pub mod router;
pub mod service;
