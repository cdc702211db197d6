//! Typed failure taxonomy for the engine.
//!
//! Per-host probe failures are recovered where they happen and never
//! surface here; everything below is a structured rejection the caller
//! is expected to branch on, not an exception used for control flow.

use thiserror::Error;

use crate::network::device::DeviceKey;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A method needs elevation the process does not hold. The engine
    /// excludes the method and keeps going with the rest.
    #[error("method {method} requires elevated privileges")]
    PrivilegeDenied { method: String },

    /// The OS primitive behind a method is gone for good (raw sockets
    /// disallowed, missing tool). Latched for the process lifetime.
    #[error("method {method} unavailable: {reason}")]
    MethodUnavailable { method: String, reason: String },

    /// The target failed the health gate. Every violated threshold is
    /// enumerated so the caller can report specifics.
    #[error("target {key} failed the health gate: {}", format_violations(.reasons))]
    HealthGateRejected {
        key: DeviceKey,
        reasons: Vec<GateViolation>,
    },

    /// No session exists for the given target.
    #[error("no active session for {key}")]
    NoSuchSession { key: DeviceKey },

    /// The target's session is mid-teardown; retry once it is idle.
    #[error("session for {key} is already stopping")]
    SessionStopping { key: DeviceKey },

    /// The target has never been seen by discovery.
    #[error("unknown device {addr}")]
    UnknownDevice { addr: std::net::IpAddr },

    /// Disruption crafts IPv4 packets only.
    #[error("disruption supports IPv4 targets only, got {addr}")]
    UnsupportedAddressFamily { addr: std::net::IpAddr },

    /// Refusing to target the gateway or the local host.
    #[error("refusing to disrupt protected device {key}")]
    ProtectedDevice { key: DeviceKey },

    /// Every requested method was excluded; nothing to start.
    #[error("no achievable disruption methods: {0:?}")]
    NoAchievableMethods(Vec<String>),

    #[error(transparent)]
    RuleOrchestration(#[from] RuleOrchestrationFailure),
}

/// One threshold the target violated, with the measured value attached so
/// rejections read like a diagnosis instead of a generic failure.
#[derive(Debug, Clone, PartialEq)]
pub enum GateViolation {
    ScoreBelowMinimum { score: f64, minimum: f64 },
    LatencyTooHigh { millis: f64, max_millis: f64 },
    LossTooHigh { fraction: f64, max_fraction: f64 },
    TooManyErrors { count: u32, max_count: u32 },
    NotMonitored,
}

impl std::fmt::Display for GateViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScoreBelowMinimum { score, minimum } => {
                write!(f, "health score {score:.0} below minimum {minimum:.0}")
            }
            Self::LatencyTooHigh { millis, max_millis } => {
                write!(f, "latency {millis:.1}ms exceeds {max_millis:.0}ms")
            }
            Self::LossTooHigh { fraction, max_fraction } => {
                write!(
                    f,
                    "packet loss {:.1}% exceeds {:.1}%",
                    fraction * 100.0,
                    max_fraction * 100.0
                )
            }
            Self::TooManyErrors { count, max_count } => {
                write!(f, "{count} recent errors exceed {max_count}")
            }
            Self::NotMonitored => write!(f, "target is not under health monitoring"),
        }
    }
}

fn format_violations(reasons: &[GateViolation]) -> String {
    reasons
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure applying or removing an OS-level blocking rule. Elevation
/// problems are split out so the engine can decide between retrying with
/// a different technique and dropping the method.
#[derive(Debug, Error)]
pub enum RuleOrchestrationFailure {
    #[error("rule backend needs elevation: {0}")]
    NeedsElevation(String),
    #[error("rule backend failed: {0}")]
    Backend(String),
}

impl RuleOrchestrationFailure {
    pub fn needs_elevation(&self) -> bool {
        matches!(self, Self::NeedsElevation(_))
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
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn gate_rejection_names_every_violated_threshold() {
        let key = DeviceKey::from_addr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7)));
        let err = CoreError::HealthGateRejected {
            key,
            reasons: vec![
                GateViolation::LatencyTooHigh { millis: 150.0, max_millis: 100.0 },
                GateViolation::LossTooHigh { fraction: 0.08, max_fraction: 0.05 },
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("latency 150.0ms"));
        assert!(rendered.contains("packet loss 8.0%"));
    }

    #[test]
    fn elevation_failures_are_distinguishable() {
        let e = RuleOrchestrationFailure::NeedsElevation("iptables".into());
        assert!(e.needs_elevation());
        let e = RuleOrchestrationFailure::Backend("exit code 2".into());
        assert!(!e.needs_elevation());
    }
}
