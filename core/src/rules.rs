//! # Rule Orchestrator
//!
//! Owns every OS-level blocking side effect: firewall drops, blackhole
//! routes, poisoned static ARP entries and resolver overrides. Tags are
//! a pure function of (technique, address), so a crashed process can
//! recompute them on restart and clean up idempotently. Every `block` is
//! paired with a `release`; shutdown releases everything outstanding,
//! and a release that keeps failing is surfaced loudly because a
//! leftover block rule is the dangerous direction to fail in.

pub mod backend;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use tracing::{info, warn};

use sever_common::error::RuleOrchestrationFailure;

pub use backend::{LinuxCommandBackend, RuleBackend};

/// Attempts at removing a rule before declaring it leaked.
const RELEASE_RETRIES: u32 = 3;

/// The OS primitives a block can be built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTechnique {
    /// Drop rules in the packet filter, both directions.
    Firewall,
    /// Null route for the target address.
    BlackholeRoute,
    /// Static address-table entry pointing the target at a dead MAC.
    StaticArpEntry,
    /// Resolver-table override pinning the target's name to loopback.
    ResolverOverride,
}

impl BlockTechnique {
    pub const ALL: [BlockTechnique; 4] = [
        Self::Firewall,
        Self::BlackholeRoute,
        Self::StaticArpEntry,
        Self::ResolverOverride,
    ];

    fn slug(&self) -> &'static str {
        match self {
            Self::Firewall => "fw",
            Self::BlackholeRoute => "route",
            Self::StaticArpEntry => "arp",
            Self::ResolverOverride => "resolver",
        }
    }
}

impl std::fmt::Display for BlockTechnique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Firewall => "firewall",
            Self::BlackholeRoute => "blackhole route",
            Self::StaticArpEntry => "static arp entry",
            Self::ResolverOverride => "resolver override",
        };
        write!(f, "{label}")
    }
}

/// Deterministic identifier of one applied rule. Derivable from the
/// technique and address alone, never random.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleTag(String);

impl RuleTag {
    pub fn derive(technique: BlockTechnique, addr: IpAddr) -> Self {
        Self(format!("sever-{}-{}", technique.slug(), addr))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RuleTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a backend needs to apply or remove one rule.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub technique: BlockTechnique,
    pub addr: IpAddr,
    pub tag: RuleTag,
}

impl RuleSpec {
    pub fn new(technique: BlockTechnique, addr: IpAddr) -> Self {
        Self {
            technique,
            addr,
            tag: RuleTag::derive(technique, addr),
        }
    }
}

pub struct RuleOrchestrator {
    backend: Box<dyn RuleBackend>,
    active: Mutex<HashMap<RuleTag, RuleSpec>>,
    /// Tags whose release exhausted its retries; they need manual
    /// cleanup and are reported at shutdown.
    leaked: Mutex<Vec<RuleTag>>,
}

impl RuleOrchestrator {
    pub fn new(backend: Box<dyn RuleBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(HashMap::new()),
            leaked: Mutex::new(Vec::new()),
        }
    }

    /// Applies one blocking rule. Idempotent per tag: blocking an
    /// already-blocked (technique, address) returns the existing tag
    /// without touching the OS again.
    pub fn block(
        &self,
        addr: IpAddr,
        technique: BlockTechnique,
    ) -> Result<RuleTag, RuleOrchestrationFailure> {
        let spec = RuleSpec::new(technique, addr);
        {
            let active = self.active.lock().expect("rule table poisoned");
            if active.contains_key(&spec.tag) {
                return Ok(spec.tag);
            }
        }

        self.backend.apply(&spec)?;
        info!(tag = %spec.tag, "block rule applied");

        let tag = spec.tag.clone();
        let mut active = self.active.lock().expect("rule table poisoned");
        active.insert(tag.clone(), spec);
        Ok(tag)
    }

    /// Removes one rule, retrying a bounded number of times. On
    /// exhaustion the tag is recorded as leaked and the failure
    /// returned; the caller logs and carries on.
    pub fn release(&self, tag: &RuleTag) -> Result<(), RuleOrchestrationFailure> {
        let spec = {
            let mut active = self.active.lock().expect("rule table poisoned");
            active.remove(tag)
        };
        let Some(spec) = spec else {
            // Unknown tag: recompute-and-remove is still valid after a
            // restart, so removal is attempted best-effort.
            return Ok(());
        };

        let mut last_failure: Option<RuleOrchestrationFailure> = None;
        for attempt in 1..=RELEASE_RETRIES {
            match self.backend.remove(&spec) {
                Ok(()) => {
                    info!(tag = %spec.tag, "block rule released");
                    return Ok(());
                }
                Err(failure) => {
                    warn!(tag = %spec.tag, attempt, "release failed: {failure}");
                    last_failure = Some(failure);
                }
            }
        }

        warn!(tag = %spec.tag, "rule could not be released, manual cleanup required");
        self.leaked
            .lock()
            .expect("leak list poisoned")
            .push(spec.tag.clone());
        Err(last_failure.expect("retries imply a failure"))
    }

    /// Releases every rule held for one address.
    pub fn release_all_for(&self, addr: IpAddr) {
        let tags: Vec<RuleTag> = {
            let active = self.active.lock().expect("rule table poisoned");
            active
                .values()
                .filter(|spec| spec.addr == addr)
                .map(|spec| spec.tag.clone())
                .collect()
        };
        for tag in tags {
            let _ = self.release(&tag);
        }
    }

    /// Releases everything; the shutdown path.
    pub fn release_all(&self) {
        let tags: Vec<RuleTag> = {
            let active = self.active.lock().expect("rule table poisoned");
            active.keys().cloned().collect()
        };
        for tag in tags {
            let _ = self.release(&tag);
        }
    }

    /// Best-effort cleanup for rules a previous process run may have
    /// left behind: recomputes every derivable tag for `addr` and asks
    /// the backend to remove each.
    pub fn scrub(&self, addr: IpAddr) {
        for technique in BlockTechnique::ALL {
            let spec = RuleSpec::new(technique, addr);
            if self.backend.remove(&spec).is_ok() {
                info!(tag = %spec.tag, "stale rule scrubbed");
            }
        }
    }

    pub fn outstanding(&self) -> Vec<RuleTag> {
        let active = self.active.lock().expect("rule table poisoned");
        active.keys().cloned().collect()
    }

    pub fn leaked(&self) -> Vec<RuleTag> {
        self.leaked.lock().expect("leak list poisoned").clone()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuleBackend;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    fn rig() -> (RuleOrchestrator, Arc<FakeRuleBackend>) {
        let backend = Arc::new(FakeRuleBackend::new());
        let orchestrator = RuleOrchestrator::new(Box::new(FakeRuleBackend::share(&backend)));
        (orchestrator, backend)
    }

    #[test]
    fn tags_are_deterministic() {
        let a = RuleTag::derive(BlockTechnique::Firewall, addr(50));
        let b = RuleTag::derive(BlockTechnique::Firewall, addr(50));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "sever-fw-192.168.1.50");
        assert_ne!(a, RuleTag::derive(BlockTechnique::BlackholeRoute, addr(50)));
    }

    #[test]
    fn every_block_paired_with_release_leaves_nothing_outstanding() {
        let (orchestrator, backend) = rig();
        let tags: Vec<RuleTag> = [
            BlockTechnique::Firewall,
            BlockTechnique::BlackholeRoute,
            BlockTechnique::StaticArpEntry,
        ]
        .into_iter()
        .map(|technique| orchestrator.block(addr(50), technique).unwrap())
        .collect();

        for tag in &tags {
            orchestrator.release(tag).unwrap();
        }
        assert!(orchestrator.outstanding().is_empty());
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn blocking_twice_applies_once() {
        let (orchestrator, backend) = rig();
        let first = orchestrator.block(addr(50), BlockTechnique::Firewall).unwrap();
        let second = orchestrator.block(addr(50), BlockTechnique::Firewall).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.applied_count(), 1);
    }

    #[test]
    fn release_all_for_only_touches_that_address() {
        let (orchestrator, backend) = rig();
        orchestrator.block(addr(50), BlockTechnique::Firewall).unwrap();
        orchestrator.block(addr(50), BlockTechnique::BlackholeRoute).unwrap();
        orchestrator.block(addr(60), BlockTechnique::Firewall).unwrap();

        orchestrator.release_all_for(addr(50));

        assert_eq!(orchestrator.outstanding().len(), 1);
        assert_eq!(backend.outstanding(), 1);
    }

    #[test]
    fn failing_release_is_retried_then_reported_leaked() {
        let (orchestrator, backend) = rig();
        let tag = orchestrator.block(addr(50), BlockTechnique::Firewall).unwrap();

        backend.fail_removals();
        assert!(orchestrator.release(&tag).is_err());
        assert_eq!(backend.remove_attempts(), RELEASE_RETRIES as usize);
        assert_eq!(orchestrator.leaked(), vec![tag]);
    }

    #[test]
    fn transient_release_failure_recovers_within_the_retry_budget() {
        let (orchestrator, backend) = rig();
        let tag = orchestrator.block(addr(50), BlockTechnique::Firewall).unwrap();

        backend.fail_next_removals(2);
        orchestrator.release(&tag).expect("third attempt succeeds");
        assert!(orchestrator.leaked().is_empty());
        assert_eq!(backend.outstanding(), 0);
    }

    #[test]
    fn scrub_recomputes_tags_without_bookkeeping() {
        let (orchestrator, backend) = rig();
        // Simulate a rule left behind by a previous process run.
        backend.preload(RuleSpec::new(BlockTechnique::Firewall, addr(50)));
        assert_eq!(backend.outstanding(), 1);

        orchestrator.scrub(addr(50));
        assert_eq!(backend.outstanding(), 0);
    }
}
