//! Shared data model and host-side plumbing for the sever workspace.
//!
//! Everything here is consumed by both the core engine and the CLI:
//! interface enumeration, IP ranges, the device table model, vendor
//! lookups, privilege detection, configuration and the error taxonomy.

pub mod config;
pub mod error;
pub mod network;
pub mod privilege;
