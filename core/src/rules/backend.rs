//! Platform rule backends.
//!
//! The orchestrator's logic (tagging, pairing, idempotent cleanup) is
//! platform-independent; everything that actually shells out lives
//! behind this trait, one implementation per OS family plus the
//! recording fake used by tests.

use std::fs;
use std::io::Write;
use std::process::Command;

use tracing::debug;

use sever_common::error::RuleOrchestrationFailure;
use sever_common::privilege;

use super::{BlockTechnique, RuleSpec};

pub trait RuleBackend: Send + Sync {
    fn apply(&self, spec: &RuleSpec) -> Result<(), RuleOrchestrationFailure>;
    fn remove(&self, spec: &RuleSpec) -> Result<(), RuleOrchestrationFailure>;
}

/// iptables / ip route / arp / hosts-file backend.
pub struct LinuxCommandBackend {
    hosts_path: String,
}

impl LinuxCommandBackend {
    pub fn new() -> Self {
        Self {
            hosts_path: "/etc/hosts".to_string(),
        }
    }

    /// Firewall rules carry the tag as an iptables comment, so the
    /// delete replays the identical argument list.
    fn firewall_args(spec: &RuleSpec, action: &str) -> Vec<Vec<String>> {
        let addr = spec.addr.to_string();
        let tag = spec.tag.to_string();
        [("-s", "INPUT"), ("-d", "OUTPUT"), ("-s", "FORWARD"), ("-d", "FORWARD")]
            .into_iter()
            .map(|(direction, chain)| {
                vec![
                    action.to_string(),
                    chain.to_string(),
                    direction.to_string(),
                    addr.clone(),
                    "-m".to_string(),
                    "comment".to_string(),
                    "--comment".to_string(),
                    tag.clone(),
                    "-j".to_string(),
                    "DROP".to_string(),
                ]
            })
            .collect()
    }

    fn run(program: &str, args: &[String]) -> Result<(), RuleOrchestrationFailure> {
        if !privilege::has_elevated_privileges() {
            return Err(RuleOrchestrationFailure::NeedsElevation(format!(
                "{program} requires root"
            )));
        }

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| RuleOrchestrationFailure::Backend(format!("{program}: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(%program, ?args, %stderr, "rule command failed");
        if stderr.contains("Permission denied") || stderr.contains("Operation not permitted") {
            Err(RuleOrchestrationFailure::NeedsElevation(stderr.into_owned()))
        } else {
            Err(RuleOrchestrationFailure::Backend(stderr.into_owned()))
        }
    }

    fn hosts_append(&self, spec: &RuleSpec) -> Result<(), RuleOrchestrationFailure> {
        let entry = format!("127.0.0.1 {} # {}\n", spec.addr, spec.tag);
        fs::OpenOptions::new()
            .append(true)
            .open(&self.hosts_path)
            .and_then(|mut file| file.write_all(entry.as_bytes()))
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    RuleOrchestrationFailure::NeedsElevation(e.to_string())
                }
                _ => RuleOrchestrationFailure::Backend(e.to_string()),
            })
    }

    /// Removes by tag: any line carrying the tag comment goes, which
    /// makes cleanup idempotent even across restarts.
    fn hosts_strip(&self, spec: &RuleSpec) -> Result<(), RuleOrchestrationFailure> {
        let contents = fs::read_to_string(&self.hosts_path)
            .map_err(|e| RuleOrchestrationFailure::Backend(e.to_string()))?;
        let kept: String = contents
            .lines()
            .filter(|line| !line.contains(spec.tag.as_str()))
            .map(|line| format!("{line}\n"))
            .collect();
        fs::write(&self.hosts_path, kept).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                RuleOrchestrationFailure::NeedsElevation(e.to_string())
            }
            _ => RuleOrchestrationFailure::Backend(e.to_string()),
        })
    }
}

impl Default for LinuxCommandBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleBackend for LinuxCommandBackend {
    fn apply(&self, spec: &RuleSpec) -> Result<(), RuleOrchestrationFailure> {
        match spec.technique {
            BlockTechnique::Firewall => {
                for args in Self::firewall_args(spec, "-I") {
                    Self::run("iptables", &args)?;
                }
                Ok(())
            }
            BlockTechnique::BlackholeRoute => {
                let args: Vec<String> = ["route", "add", "blackhole", &spec.addr.to_string()]
                    .into_iter()
                    .map(String::from)
                    .collect();
                Self::run("ip", &args)
            }
            BlockTechnique::StaticArpEntry => {
                let args: Vec<String> =
                    ["-s", &spec.addr.to_string(), "00:00:00:00:00:00"]
                        .into_iter()
                        .map(String::from)
                        .collect();
                Self::run("arp", &args)
            }
            BlockTechnique::ResolverOverride => self.hosts_append(spec),
        }
    }

    fn remove(&self, spec: &RuleSpec) -> Result<(), RuleOrchestrationFailure> {
        match spec.technique {
            BlockTechnique::Firewall => {
                for args in Self::firewall_args(spec, "-D") {
                    Self::run("iptables", &args)?;
                }
                Ok(())
            }
            BlockTechnique::BlackholeRoute => {
                let args: Vec<String> = ["route", "del", "blackhole", &spec.addr.to_string()]
                    .into_iter()
                    .map(String::from)
                    .collect();
                Self::run("ip", &args)
            }
            BlockTechnique::StaticArpEntry => {
                let args: Vec<String> = ["-d", &spec.addr.to_string()]
                    .into_iter()
                    .map(String::from)
                    .collect();
                Self::run("arp", &args)
            }
            BlockTechnique::ResolverOverride => self.hosts_strip(spec),
        }
    }
}
