//! Low-level discovery primitives: OS neighbour-table reads and bounded
//! reachability/port probes. The [`crate::discovery`] module orchestrates
//! these into full scans.

pub mod neighbors;
pub mod probe;
