//! # Disruption Engine
//!
//! One session per target, one periodic worker per active method. The
//! engine consults the privilege detector once at construction and the
//! health monitor at every start; the monitor can preempt a session at
//! any time through the same stop path an explicit call uses.
//!
//! Per-target lifecycle: Idle -> Starting -> Active -> Stopping -> Idle.
//! `stop` joins every worker before returning, so once the caller hears
//! that disruption ended, no further packets are in flight.

pub mod methods;
pub mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use sever_common::error::CoreError;
use sever_common::network::device::DeviceKey;

use crate::events::{Event, EventBus};
use crate::health::HealthMonitor;
use crate::inject::{InjectorError, InjectorFactory};
use crate::rules::{BlockTechnique, RuleOrchestrator};
use methods::DisruptMethod;
use worker::TargetContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
        };
        write!(f, "{label}")
    }
}

/// Externally visible view of one target's session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SessionState,
    pub active_methods: Vec<DisruptMethod>,
    /// Methods that were requested but excluded, with the reason.
    pub excluded: Vec<(DisruptMethod, String)>,
    pub elapsed: Duration,
}

impl SessionStatus {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            active_methods: Vec::new(),
            excluded: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Why a session ended; carried on the stop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    HealthPreempted,
    DurationElapsed,
    Shutdown,
}

struct Session {
    ctx: TargetContext,
    state: SessionState,
    workers: HashMap<DisruptMethod, JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    started: Instant,
    excluded: Vec<(DisruptMethod, String)>,
    /// Methods whose rules must be released on stop.
    rule_methods: HashSet<DisruptMethod>,
}

pub struct DisruptionEngine {
    sessions: Mutex<HashMap<DeviceKey, Session>>,
    /// Methods latched unusable for the rest of the process.
    unavailable: RwLock<HashMap<DisruptMethod, String>>,
    privileged: bool,
    injectors: Arc<dyn InjectorFactory>,
    health: Arc<HealthMonitor>,
    rules: Arc<RuleOrchestrator>,
    events: EventBus,
}

impl DisruptionEngine {
    pub fn new(
        privileged: bool,
        injectors: Arc<dyn InjectorFactory>,
        health: Arc<HealthMonitor>,
        rules: Arc<RuleOrchestrator>,
        events: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            unavailable: RwLock::new(HashMap::new()),
            privileged,
            injectors,
            health,
            rules,
            events,
        })
    }

    /// Starts (or augments) disruption of one target. Fails fast with
    /// enumerated reasons when the health gate rejects the target or the
    /// achievable method set comes up empty.
    pub fn start(
        self: &Arc<Self>,
        ctx: TargetContext,
        requested: Option<Vec<DisruptMethod>>,
        duration: Option<Duration>,
    ) -> Result<SessionStatus, CoreError> {
        let key = ctx.target;
        let requested = requested.unwrap_or_else(|| DisruptMethod::ALL.to_vec());

        // Starting: health gate first.
        self.health
            .gate(&key)
            .map_err(|reasons| CoreError::HealthGateRejected { key, reasons })?;

        // Privilege and availability filtering.
        let mut achievable: Vec<DisruptMethod> = Vec::new();
        let mut excluded: Vec<(DisruptMethod, String)> = Vec::new();
        {
            let unavailable = self.unavailable.read().expect("latch poisoned");
            for method in requested {
                if let Some(reason) = unavailable.get(&method) {
                    excluded.push((method, format!("unavailable: {reason}")));
                } else if method.requires_elevation() && !self.privileged {
                    excluded.push((method, "requires elevated privileges".to_string()));
                } else {
                    achievable.push(method);
                }
            }
        }
        if achievable.is_empty() {
            return Err(CoreError::NoAchievableMethods(
                excluded
                    .iter()
                    .map(|(m, why)| format!("{m}: {why}"))
                    .collect(),
            ));
        }

        let mut sessions = self.sessions.lock().expect("session table poisoned");
        if let Some(existing) = sessions.get_mut(&key) {
            return match existing.state {
                SessionState::Stopping => Err(CoreError::SessionStopping { key }),
                // Re-entrant start: augment, never duplicate a worker.
                _ => {
                    achievable.retain(|m| !existing.workers.contains_key(m));
                    let added = self.activate_methods(existing, &achievable);
                    info!(device = %key, ?added, "augmented disruption session");
                    Ok(status_of(existing))
                }
            };
        }

        let mut session = Session {
            ctx,
            state: SessionState::Starting,
            workers: HashMap::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            excluded,
            rule_methods: HashSet::new(),
        };

        let activated = self.activate_methods(&mut session, &achievable);
        if activated.is_empty() {
            // Channel-open failures ate every candidate after the
            // privilege filter; surface the collected reasons.
            return Err(CoreError::NoAchievableMethods(
                session
                    .excluded
                    .iter()
                    .map(|(m, why)| format!("{m}: {why}"))
                    .collect(),
            ));
        }

        session.state = SessionState::Active;
        let status = status_of(&session);
        sessions.insert(key, session);
        drop(sessions);

        self.events.emit(Event::SessionStarted {
            key,
            methods: activated.clone(),
        });
        info!(device = %key, methods = ?activated, "disruption session started");

        if let Some(duration) = duration {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                if let Err(e) = engine.stop(&key, StopReason::DurationElapsed).await {
                    // Session already gone is the normal race here.
                    info!(device = %key, "timed stop found no session: {e}");
                }
            });
        }

        Ok(status)
    }

    /// Spawns workers (and applies rules) for each method; returns the
    /// methods that actually came up. Failures move methods into the
    /// session's excluded list and, where permanent, the process latch.
    fn activate_methods(
        self: &Arc<Self>,
        session: &mut Session,
        methods: &[DisruptMethod],
    ) -> Vec<DisruptMethod> {
        let mut activated: Vec<DisruptMethod> = Vec::new();

        for &method in methods {
            // Rule-backed methods mutate OS tables before any worker runs.
            if let Err(why) = self.apply_rules_for(session, method) {
                session.excluded.push((method, why));
                continue;
            }

            match worker::spawn(
                method,
                &session.ctx,
                self.injectors.as_ref(),
                self.privileged,
                Arc::clone(&session.cancel),
            ) {
                Ok(handle) => {
                    session.workers.insert(method, handle);
                    activated.push(method);
                }
                Err(InjectorError::NeedsElevation) => {
                    session
                        .excluded
                        .push((method, "requires elevated privileges".to_string()));
                }
                Err(InjectorError::Unavailable(reason)) => {
                    error!(%method, %reason, "OS primitive unavailable, latching method");
                    self.unavailable
                        .write()
                        .expect("latch poisoned")
                        .insert(method, reason.clone());
                    session.excluded.push((method, format!("unavailable: {reason}")));
                }
            }
        }
        activated
    }

    /// Applies the OS-table side of a method. Only `RuleBlock` and
    /// `DnsOverride` have one; packet methods return Ok immediately.
    fn apply_rules_for(&self, session: &mut Session, method: DisruptMethod) -> Result<(), String> {
        let techniques: &[BlockTechnique] = match method {
            DisruptMethod::RuleBlock => &[
                BlockTechnique::Firewall,
                BlockTechnique::BlackholeRoute,
                BlockTechnique::StaticArpEntry,
            ],
            DisruptMethod::DnsOverride => &[BlockTechnique::ResolverOverride],
            _ => return Ok(()),
        };

        let mut applied = 0usize;
        let mut last_error = String::new();
        for &technique in techniques {
            match self.rules.block(session.ctx.target.addr, technique) {
                Ok(_tag) => applied += 1,
                Err(failure) => {
                    // One technique failing does not sink the method as
                    // long as a sibling technique lands.
                    warn!(device = %session.ctx.target, %technique, "block failed: {failure}");
                    last_error = failure.to_string();
                }
            }
        }

        if applied == 0 {
            Err(last_error)
        } else {
            session.rule_methods.insert(method);
            Ok(())
        }
    }

    /// Stops the target's session: flags cancellation, joins every
    /// worker, releases any rules, then reports Idle. Join-before-return
    /// is the ordering guarantee callers rely on.
    pub async fn stop(&self, key: &DeviceKey, reason: StopReason) -> Result<(), CoreError> {
        let (cancel, handles, had_rules, target_addr) = {
            let mut sessions = self.sessions.lock().expect("session table poisoned");
            let session = sessions
                .get_mut(key)
                .ok_or(CoreError::NoSuchSession { key: *key })?;
            if session.state == SessionState::Stopping {
                return Err(CoreError::SessionStopping { key: *key });
            }
            session.state = SessionState::Stopping;
            (
                Arc::clone(&session.cancel),
                std::mem::take(&mut session.workers),
                !session.rule_methods.is_empty(),
                session.ctx.target.addr,
            )
        };

        cancel.store(true, Ordering::Relaxed);
        for (method, handle) in handles {
            if let Err(e) = handle.await {
                error!(%method, "worker join failed: {e}");
            }
        }

        if had_rules {
            self.rules.release_all_for(target_addr);
        }

        {
            let mut sessions = self.sessions.lock().expect("session table poisoned");
            sessions.remove(key);
        }

        let event = match reason {
            StopReason::HealthPreempted => Event::SessionAutoStopped {
                key: *key,
                reason: "health floor breached".to_string(),
            },
            _ => Event::SessionStopped { key: *key },
        };
        self.events.emit(event);
        info!(device = %key, ?reason, "disruption session stopped");
        Ok(())
    }

    pub fn status(&self, key: &DeviceKey) -> SessionStatus {
        let sessions = self.sessions.lock().expect("session table poisoned");
        sessions
            .get(key)
            .map(status_of)
            .unwrap_or_else(SessionStatus::idle)
    }

    pub fn active_targets(&self) -> Vec<DeviceKey> {
        let sessions = self.sessions.lock().expect("session table poisoned");
        sessions.keys().copied().collect()
    }

    pub fn has_session(&self, key: &DeviceKey) -> bool {
        let sessions = self.sessions.lock().expect("session table poisoned");
        sessions.contains_key(key)
    }

    /// Methods latched unusable for this process, with reasons.
    pub fn unavailable_methods(&self) -> Vec<(DisruptMethod, String)> {
        let latch = self.unavailable.read().expect("latch poisoned");
        latch.iter().map(|(m, r)| (*m, r.clone())).collect()
    }

    /// Force-stops every session; the shutdown path.
    pub async fn stop_all(&self, reason: StopReason) {
        for key in self.active_targets() {
            if let Err(e) = self.stop(&key, reason).await {
                warn!(device = %key, "stop during shutdown failed: {e}");
            }
        }
    }
}

fn status_of(session: &Session) -> SessionStatus {
    let mut active_methods: Vec<DisruptMethod> = session.workers.keys().copied().collect();
    active_methods.sort_by_key(|m| m.ordinal());
    SessionStatus {
        state: session.state,
        active_methods,
        excluded: session.excluded.clone(),
        elapsed: session.started.elapsed(),
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
    use crate::health::HealthSample;
    use crate::rules::RuleOrchestrator;
    use crate::testing::{FakeInjectorFactory, FakeRuleBackend, ScriptedProbe};
    use pnet::util::MacAddr;
    use std::net::{IpAddr, Ipv4Addr};

    fn healthy_sample() -> HealthSample {
        HealthSample {
            latency: Duration::from_millis(5),
            loss: 0.0,
            errors: 0,
            at: Instant::now(),
        }
    }

    fn target_ctx(last: u8) -> TargetContext {
        let target_v4 = Ipv4Addr::new(192, 168, 1, last);
        TargetContext {
            target: DeviceKey::from_addr(IpAddr::V4(target_v4)),
            target_v4,
            target_mac: Some(MacAddr::new(0x11, 0x22, 0x33, 0x44, 0x55, 0x66)),
            gateway_v4: Ipv4Addr::new(192, 168, 1, 1),
            gateway_mac: Some(MacAddr::new(0xa4, 0x2b, 0xb0, 0, 0, 1)),
            our_v4: Ipv4Addr::new(192, 168, 1, 2),
            our_mac: MacAddr::new(0xaa, 0xbb, 0xcc, 0, 0, 2),
            interface: "eth0".to_string(),
        }
    }

    struct Rig {
        engine: Arc<DisruptionEngine>,
        health: Arc<HealthMonitor>,
        injectors: Arc<FakeInjectorFactory>,
        backend: Arc<FakeRuleBackend>,
        _release_rx: tokio::sync::mpsc::UnboundedReceiver<DeviceKey>,
    }

    fn rig(privileged: bool) -> Rig {
        let (health, release_rx) =
            HealthMonitor::new(Arc::new(ScriptedProbe::unreachable()), EventBus::new());
        let injectors = FakeInjectorFactory::new();
        let backend = Arc::new(FakeRuleBackend::new());
        let rules = Arc::new(RuleOrchestrator::new(Box::new(FakeRuleBackend::share(
            &backend,
        ))));
        let engine = DisruptionEngine::new(
            privileged,
            injectors.clone(),
            Arc::clone(&health),
            rules,
            EventBus::new(),
        );
        Rig {
            engine,
            health,
            injectors,
            backend,
            _release_rx: release_rx,
        }
    }

    #[tokio::test]
    async fn gate_rejection_spawns_no_workers() {
        let rig = rig(true);
        let ctx = target_ctx(50);
        // Worked example: poor health, rejected.
        rig.health.record(
            ctx.target,
            HealthSample {
                latency: Duration::from_millis(150),
                loss: 0.08,
                errors: 3,
                at: Instant::now(),
            },
        );

        let err = rig.engine.start(ctx.clone(), None, None).unwrap_err();
        assert!(matches!(err, CoreError::HealthGateRejected { .. }));
        assert_eq!(rig.engine.status(&ctx.target).state, SessionState::Idle);
        assert_eq!(rig.injectors.opened(), 0, "no injector may be opened");
    }

    #[tokio::test]
    async fn unprivileged_start_activates_only_the_socket_methods() {
        let rig = rig(false);
        let ctx = target_ctx(51);
        rig.health.record(ctx.target, healthy_sample());

        let status = rig.engine.start(ctx.clone(), None, None).unwrap();

        assert_eq!(
            status.active_methods,
            vec![DisruptMethod::TcpReset, DisruptMethod::UdpFlood]
        );
        assert_eq!(status.excluded.len(), 4);
        for (method, why) in &status.excluded {
            assert!(method.requires_elevation(), "{method} wrongly excluded");
            assert!(why.contains("privileges"));
        }

        rig.engine
            .stop(&ctx.target, StopReason::Requested)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reentrant_start_augments_without_duplicating_workers() {
        let rig = rig(true);
        let ctx = target_ctx(52);
        rig.health.record(ctx.target, healthy_sample());

        let first = rig
            .engine
            .start(ctx.clone(), Some(vec![DisruptMethod::TcpReset]), None)
            .unwrap();
        assert_eq!(first.active_methods, vec![DisruptMethod::TcpReset]);

        let second = rig
            .engine
            .start(
                ctx.clone(),
                Some(vec![DisruptMethod::TcpReset, DisruptMethod::UdpFlood]),
                None,
            )
            .unwrap();
        assert_eq!(
            second.active_methods,
            vec![DisruptMethod::TcpReset, DisruptMethod::UdpFlood]
        );

        rig.engine
            .stop(&ctx.target, StopReason::Requested)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stop_joins_all_workers_and_releases_rules() {
        let rig = rig(true);
        let ctx = target_ctx(53);
        rig.health.record(ctx.target, healthy_sample());

        let status = rig
            .engine
            .start(
                ctx.clone(),
                Some(vec![
                    DisruptMethod::TcpReset,
                    DisruptMethod::UdpFlood,
                    DisruptMethod::RuleBlock,
                ]),
                None,
            )
            .unwrap();
        assert_eq!(status.active_methods.len(), 3);
        assert!(rig.backend.applied_count() >= 1);

        rig.engine
            .stop(&ctx.target, StopReason::Requested)
            .await
            .unwrap();

        assert_eq!(rig.engine.status(&ctx.target).state, SessionState::Idle);
        assert_eq!(rig.backend.outstanding(), 0, "all rule tags released");
        // Joined workers can no longer inject.
        let sent_after_stop = rig.injectors.sent_count();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(rig.injectors.sent_count(), sent_after_stop);
    }

    #[tokio::test]
    async fn workers_keep_running_after_a_single_send_failure() {
        let rig = rig(true);
        rig.injectors.fail_every(3);
        let ctx = target_ctx(54);
        rig.health.record(ctx.target, healthy_sample());

        rig.engine
            .start(ctx.clone(), Some(vec![DisruptMethod::ArpSpoof]), None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            rig.engine.status(&ctx.target).state,
            SessionState::Active,
            "a failed send must not kill the session"
        );
        assert!(rig.injectors.sent_count() > 0);

        rig.engine
            .stop(&ctx.target, StopReason::Requested)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_achievable_set_fails_with_reasons() {
        let rig = rig(false);
        let ctx = target_ctx(55);
        rig.health.record(ctx.target, healthy_sample());

        let err = rig
            .engine
            .start(ctx, Some(vec![DisruptMethod::ArpSpoof, DisruptMethod::RuleBlock]), None)
            .unwrap_err();
        match err {
            CoreError::NoAchievableMethods(reasons) => {
                assert_eq!(reasons.len(), 2);
                assert!(reasons.iter().all(|r| r.contains("privileges")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn timed_session_stops_itself() {
        let rig = rig(true);
        let ctx = target_ctx(56);
        rig.health.record(ctx.target, healthy_sample());

        rig.engine
            .start(
                ctx.clone(),
                Some(vec![DisruptMethod::UdpFlood]),
                Some(Duration::from_millis(50)),
            )
            .unwrap();
        assert_eq!(rig.engine.status(&ctx.target).state, SessionState::Active);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(rig.engine.status(&ctx.target).state, SessionState::Idle);
    }
}
