//! # Target Health Monitor
//!
//! Samples liveness of every device under consideration for disruption,
//! keeps a bounded rolling window per device, and turns the latest
//! sample into a 0-100 score. Two jobs hang off that score: the
//! eligibility gate the disruption engine consults before starting, and
//! the auto-release trigger that stops a session when a target's health
//! craters. The auto-release path is a safety invariant: two consecutive
//! samples under the floor always fire the signal.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sever_common::error::GateViolation;
use sever_common::network::device::DeviceKey;

use crate::events::{Event, EventBus};
use crate::scanner::probe::{LivenessProbe, Measurement};

/// Samples kept per device.
const WINDOW_LEN: usize = 20;
/// Score floor below which a disrupted target must be released.
const AUTO_RELEASE_SCORE: f64 = 20.0;
/// Consecutive sub-floor samples before the release fires.
const AUTO_RELEASE_STRIKES: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Poor,
    Disconnected,
}

impl HealthStatus {
    /// Pure function of the score, per the threshold table.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Healthy
        } else if score >= 60.0 {
            Self::Degraded
        } else if score >= 30.0 {
            Self::Poor
        } else {
            Self::Disconnected
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Poor => "poor",
            Self::Disconnected => "disconnected",
        };
        write!(f, "{label}")
    }
}

/// One measurement appended to a device's window.
#[derive(Debug, Clone, Copy)]
pub struct HealthSample {
    pub latency: Duration,
    pub loss: f64,
    pub errors: u32,
    pub at: Instant,
}

impl From<Measurement> for HealthSample {
    fn from(m: Measurement) -> Self {
        Self {
            latency: m.latency,
            loss: m.loss,
            errors: m.errors,
            at: Instant::now(),
        }
    }
}

/// Deterministic 0-100 score.
///
/// Starts at 100 and subtracts three penalties: up to 30 for latency
/// (none at or under 10ms, full at 100ms and beyond), up to 40 for loss
/// (linear over 0-10%), up to 20 for errors (linear over 0-10). The
/// result is clamped to [0, 100].
pub fn score(latency: Duration, loss: f64, errors: u32) -> f64 {
    let latency_ms = latency.as_secs_f64() * 1000.0;
    let latency_penalty = 30.0 * ((latency_ms - 10.0) / 90.0).clamp(0.0, 1.0);
    let loss_penalty = 40.0 * (loss / 0.10).clamp(0.0, 1.0);
    let error_penalty = 20.0 * (f64::from(errors) / 10.0).clamp(0.0, 1.0);

    (100.0 - latency_penalty - loss_penalty - error_penalty).clamp(0.0, 100.0)
}

/// Thresholds for the eligibility gate, all configurable through
/// `set_health_thresholds`.
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    pub min_score: f64,
    pub max_latency: Duration,
    pub max_loss: f64,
    pub max_errors: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_score: 70.0,
            max_latency: Duration::from_millis(100),
            max_loss: 0.05,
            max_errors: 10,
        }
    }
}

/// What `check` hands back to callers.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub score: f64,
    pub status: HealthStatus,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

struct DeviceHealth {
    window: VecDeque<HealthSample>,
    low_strikes: u8,
    last_status: Option<HealthStatus>,
}

impl DeviceHealth {
    fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_LEN),
            low_strikes: 0,
            last_status: None,
        }
    }

    fn latest(&self) -> Option<&HealthSample> {
        self.window.back()
    }
}

/// The monitor proper. One periodic sampler task covers every monitored
/// device; `record` is also callable directly, which is how tests drive
/// the gate and auto-release deterministically.
pub struct HealthMonitor {
    devices: RwLock<HashMap<DeviceKey, DeviceHealth>>,
    thresholds: RwLock<HealthThresholds>,
    probe: Arc<dyn LivenessProbe>,
    release_tx: UnboundedSender<DeviceKey>,
    events: EventBus,
    sampler: Mutex<Option<JoinHandle<()>>>,
    sampling: Arc<AtomicBool>,
}

impl HealthMonitor {
    /// Returns the monitor and the channel on which auto-release
    /// signals arrive; the engine consumes that end.
    pub fn new(
        probe: Arc<dyn LivenessProbe>,
        events: EventBus,
    ) -> (Arc<Self>, UnboundedReceiver<DeviceKey>) {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(Self {
            devices: RwLock::new(HashMap::new()),
            thresholds: RwLock::new(HealthThresholds::default()),
            probe,
            release_tx,
            events,
            sampler: Mutex::new(None),
            sampling: Arc::new(AtomicBool::new(false)),
        });
        (monitor, release_rx)
    }

    pub fn add(&self, key: DeviceKey) {
        let mut devices = self.devices.write().expect("health table poisoned");
        devices.entry(key).or_insert_with(DeviceHealth::new);
    }

    pub fn remove(&self, key: &DeviceKey) {
        let mut devices = self.devices.write().expect("health table poisoned");
        devices.remove(key);
    }

    pub fn is_monitored(&self, key: &DeviceKey) -> bool {
        let devices = self.devices.read().expect("health table poisoned");
        devices.contains_key(key)
    }

    pub fn set_thresholds(&self, thresholds: HealthThresholds) {
        *self.thresholds.write().expect("thresholds poisoned") = thresholds;
    }

    pub fn thresholds(&self) -> HealthThresholds {
        *self.thresholds.read().expect("thresholds poisoned")
    }

    /// Appends a sample and updates the auto-release strike count. Fires
    /// the release signal on the second consecutive sub-floor sample.
    pub fn record(&self, key: DeviceKey, sample: HealthSample) -> HealthReport {
        let sample_score = score(sample.latency, sample.loss, sample.errors);
        let status = HealthStatus::from_score(sample_score);

        let mut devices = self.devices.write().expect("health table poisoned");
        let entry = devices.entry(key).or_insert_with(DeviceHealth::new);
        if entry.window.len() == WINDOW_LEN {
            entry.window.pop_front();
        }
        entry.window.push_back(sample);

        if entry.last_status != Some(status) {
            entry.last_status = Some(status);
            self.events.emit(Event::HealthChanged { key, status });
        }

        if sample_score < AUTO_RELEASE_SCORE {
            entry.low_strikes = entry.low_strikes.saturating_add(1);
            if entry.low_strikes == AUTO_RELEASE_STRIKES {
                warn!(
                    device = %key,
                    score = sample_score,
                    "health floor breached twice, signalling release"
                );
                // Receiver gone means shutdown is already in progress.
                let _ = self.release_tx.send(key);
            }
        } else {
            entry.low_strikes = 0;
        }
        drop(devices);

        self.report_for(sample, sample_score)
    }

    /// Measures the device now and records the result.
    pub async fn check(&self, key: DeviceKey) -> HealthReport {
        let measurement = self.probe.measure(key.addr).await;
        self.record(key, measurement.into())
    }

    /// Latest sample for a device, if any.
    pub fn latest(&self, key: &DeviceKey) -> Option<HealthSample> {
        let devices = self.devices.read().expect("health table poisoned");
        devices.get(key).and_then(|d| d.latest().copied())
    }

    /// The eligibility gate. Returns every violated threshold, not just
    /// the first.
    pub fn gate(&self, key: &DeviceKey) -> Result<(), Vec<GateViolation>> {
        let thresholds = self.thresholds();
        let Some(sample) = self.latest(key) else {
            return Err(vec![GateViolation::NotMonitored]);
        };

        let sample_score = score(sample.latency, sample.loss, sample.errors);
        let mut violations: Vec<GateViolation> = Vec::new();

        if sample_score < thresholds.min_score {
            violations.push(GateViolation::ScoreBelowMinimum {
                score: sample_score,
                minimum: thresholds.min_score,
            });
        }
        if sample.latency > thresholds.max_latency {
            violations.push(GateViolation::LatencyTooHigh {
                millis: sample.latency.as_secs_f64() * 1000.0,
                max_millis: thresholds.max_latency.as_secs_f64() * 1000.0,
            });
        }
        if sample.loss > thresholds.max_loss {
            violations.push(GateViolation::LossTooHigh {
                fraction: sample.loss,
                max_fraction: thresholds.max_loss,
            });
        }
        if sample.errors > thresholds.max_errors {
            violations.push(GateViolation::TooManyErrors {
                count: sample.errors,
                max_count: thresholds.max_errors,
            });
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Starts the periodic sampler covering every monitored device.
    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) {
        let mut sampler = self.sampler.lock().expect("sampler handle poisoned");
        if sampler.is_some() {
            return;
        }
        self.sampling.store(true, Ordering::Relaxed);

        let monitor = Arc::clone(self);
        let running = Arc::clone(&self.sampling);
        *sampler = Some(tokio::spawn(async move {
            info!("health monitoring started");
            while running.load(Ordering::Relaxed) {
                let keys: Vec<DeviceKey> = {
                    let devices = monitor.devices.read().expect("health table poisoned");
                    devices.keys().copied().collect()
                };
                for key in keys {
                    monitor.check(key).await;
                }
                tokio::time::sleep(interval).await;
            }
            info!("health monitoring stopped");
        }));
    }

    /// Stops the sampler and waits for it to exit.
    pub async fn stop_monitoring(&self) {
        self.sampling.store(false, Ordering::Relaxed);
        let handle = {
            let mut sampler = self.sampler.lock().expect("sampler handle poisoned");
            sampler.take()
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    fn report_for(&self, sample: HealthSample, sample_score: f64) -> HealthReport {
        let thresholds = self.thresholds();
        let mut warnings: Vec<String> = Vec::new();
        let mut recommendations: Vec<String> = Vec::new();

        let latency_ms = sample.latency.as_secs_f64() * 1000.0;
        if sample.latency > thresholds.max_latency {
            warnings.push(format!("High latency: {latency_ms:.1}ms"));
            recommendations.push("Check network congestion and router settings".to_string());
        }
        if sample.loss > thresholds.max_loss {
            warnings.push(format!("High packet loss: {:.1}%", sample.loss * 100.0));
            recommendations.push("Check cabling and wireless interference".to_string());
        }
        if sample.errors > thresholds.max_errors {
            warnings.push(format!("High error count: {}", sample.errors));
            recommendations.push("Restart the device and check for software issues".to_string());
        }
        if sample_score < 50.0 {
            warnings.push("Critical health score".to_string());
        }

        HealthReport {
            score: sample_score,
            status: HealthStatus::from_score(sample_score),
            warnings,
            recommendations,
        }
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
