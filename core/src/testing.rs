//! Recording fakes for the engine's three outward seams: packet egress,
//! the rule backend, and the liveness probe. Unit tests in this crate,
//! the integration-tests crate and any embedding layer's tests drive the
//! engine through these instead of touching the network or the OS.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sever_common::error::RuleOrchestrationFailure;

use crate::inject::{Injector, InjectorError, InjectorFactory, TransportKind};
use crate::rules::{RuleBackend, RuleSpec};
use crate::scanner::probe::{LivenessProbe, Measurement};

// ---- Injectors ----

#[derive(Default)]
struct InjectorState {
    opened: usize,
    sent: Vec<(usize, SocketAddr)>,
    send_counter: u64,
    fail_every: Option<u64>,
    refuse_connections: bool,
}

/// Records every open and every send; can synthesize failures.
#[derive(Clone, Default)]
pub struct FakeInjectorFactory {
    state: Arc<Mutex<InjectorState>>,
}

impl FakeInjectorFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    pub fn sent_ports(&self) -> Vec<u16> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(_, dst)| dst.port())
            .collect()
    }

    /// Makes every `n`th send fail with a synthetic I/O error.
    pub fn fail_every(&self, n: u64) {
        self.state.lock().unwrap().fail_every = Some(n);
    }

    /// Makes stream-abort injectors report connection refused, the
    /// normal answer of a host with its ports closed.
    pub fn refuse_connections(&self) {
        self.state.lock().unwrap().refuse_connections = true;
    }

    fn open(&self, refuses: bool) -> Box<dyn Injector> {
        let mut state = self.state.lock().unwrap();
        state.opened += 1;
        Box::new(FakeInjector {
            state: Arc::clone(&self.state),
            is_stream_abort: refuses,
        })
    }
}

impl InjectorFactory for FakeInjectorFactory {
    fn layer2(&self, _interface: &str) -> Result<Box<dyn Injector>, InjectorError> {
        Ok(self.open(false))
    }

    fn layer4(&self, _kind: TransportKind) -> Result<Box<dyn Injector>, InjectorError> {
        Ok(self.open(false))
    }

    fn datagram(&self) -> Result<Box<dyn Injector>, InjectorError> {
        Ok(self.open(false))
    }

    fn stream_abort(&self, _timeout: Duration) -> Result<Box<dyn Injector>, InjectorError> {
        Ok(self.open(true))
    }
}

struct FakeInjector {
    state: Arc<Mutex<InjectorState>>,
    is_stream_abort: bool,
}

impl Injector for FakeInjector {
    fn inject(&mut self, payload: &[u8], dst: SocketAddr) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.send_counter += 1;

        if self.is_stream_abort && state.refuse_connections {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            ));
        }
        if let Some(n) = state.fail_every {
            if state.send_counter % n == 0 {
                return Err(io::Error::other("synthetic send failure"));
            }
        }
        state.sent.push((payload.len(), dst));
        Ok(())
    }
}

// ---- Rule backend ----

#[derive(Default)]
struct BackendState {
    applied: HashMap<String, RuleSpec>,
    apply_count: usize,
    remove_attempts: usize,
    fail_all_removals: bool,
    fail_next_removals: u32,
}

/// In-memory rule backend that counts applies and removals.
#[derive(Clone, Default)]
pub struct FakeRuleBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeRuleBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle sharing this backend's state, for passing into the
    /// orchestrator while the test keeps its own view.
    pub fn share(backend: &Arc<Self>) -> Self {
        Self {
            state: Arc::clone(&backend.state),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.state.lock().unwrap().apply_count
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().applied.len()
    }

    pub fn remove_attempts(&self) -> usize {
        self.state.lock().unwrap().remove_attempts
    }

    pub fn fail_removals(&self) {
        self.state.lock().unwrap().fail_all_removals = true;
    }

    pub fn fail_next_removals(&self, n: u32) {
        self.state.lock().unwrap().fail_next_removals = n;
    }

    /// Installs a rule as if a previous process run had applied it.
    pub fn preload(&self, spec: RuleSpec) {
        self.state
            .lock()
            .unwrap()
            .applied
            .insert(spec.tag.to_string(), spec);
    }
}

impl RuleBackend for FakeRuleBackend {
    fn apply(&self, spec: &RuleSpec) -> Result<(), RuleOrchestrationFailure> {
        let mut state = self.state.lock().unwrap();
        state.apply_count += 1;
        state.applied.insert(spec.tag.to_string(), spec.clone());
        Ok(())
    }

    fn remove(&self, spec: &RuleSpec) -> Result<(), RuleOrchestrationFailure> {
        let mut state = self.state.lock().unwrap();
        state.remove_attempts += 1;
        if state.fail_all_removals {
            return Err(RuleOrchestrationFailure::Backend("synthetic".into()));
        }
        if state.fail_next_removals > 0 {
            state.fail_next_removals -= 1;
            return Err(RuleOrchestrationFailure::Backend("synthetic".into()));
        }
        state.applied.remove(spec.tag.as_str());
        Ok(())
    }
}

// ---- Liveness probe ----

/// Probe returning a scripted sequence of measurements, then repeating
/// the last one.
pub struct ScriptedProbe {
    script: Mutex<Vec<Measurement>>,
    fallback: Measurement,
}

impl ScriptedProbe {
    pub fn from_script(script: Vec<Measurement>, fallback: Measurement) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: Mutex::new(script),
            fallback,
        }
    }

    /// Every measurement reports a perfectly healthy target.
    pub fn healthy() -> Self {
        Self::from_script(
            Vec::new(),
            Measurement {
                latency: Duration::from_millis(5),
                loss: 0.0,
                errors: 0,
            },
        )
    }

    /// Every measurement reports a silent target.
    pub fn unreachable() -> Self {
        Self::from_script(
            Vec::new(),
            Measurement {
                latency: Duration::from_millis(500),
                loss: 1.0,
                errors: 0,
            },
        )
    }
}

#[async_trait]
impl LivenessProbe for ScriptedProbe {
    async fn measure(&self, _addr: IpAddr) -> Measurement {
        let mut script = self.script.lock().unwrap();
        script.pop().unwrap_or(self.fallback)
    }
}
