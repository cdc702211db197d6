//! # Engine Facade
//!
//! The one surface the CLI (or a GUI layer) talks to: discovery and the
//! device table, health reports and thresholds, disruption start / stop
//! / status, and the notification stream. Also owns the wiring between
//! the health monitor's auto-release signal and the disruption engine's
//! stop path, and the shutdown sequence that force-stops every session
//! and releases every rule.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use pnet::util::MacAddr;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use sever_common::config::Config;
use sever_common::error::CoreError;
use sever_common::network::device::{Device, DeviceKey};
use sever_common::network::interface::{self, Interface};

use crate::discovery::{self, DeviceTable, ScanReport};
use crate::disrupt::{DisruptionEngine, SessionStatus, StopReason};
use crate::disrupt::methods::DisruptMethod;
use crate::disrupt::worker::TargetContext;
use crate::events::{Event, EventBus};
use crate::health::{HealthMonitor, HealthReport, HealthThresholds};
use crate::inject::InjectorFactory;
use crate::rules::{RuleBackend, RuleOrchestrator};
use crate::scanner::neighbors;
use crate::scanner::probe::LivenessProbe;

pub struct Engine {
    cfg: RwLock<Config>,
    table: DeviceTable,
    interfaces: RwLock<Vec<Interface>>,
    health: Arc<HealthMonitor>,
    disrupt: Arc<DisruptionEngine>,
    rules: Arc<RuleOrchestrator>,
    events: EventBus,
}

impl Engine {
    /// Wires the engine together. `privileged` comes from the privilege
    /// detector, checked once by the caller; everything downstream
    /// depends only on this boolean.
    pub fn new(
        cfg: Config,
        privileged: bool,
        injectors: Arc<dyn InjectorFactory>,
        backend: Box<dyn RuleBackend>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Arc<Self> {
        let events = EventBus::new();
        let (health, release_rx) = HealthMonitor::new(probe, events.clone());
        let rules = Arc::new(RuleOrchestrator::new(backend));
        let disrupt = DisruptionEngine::new(
            privileged,
            injectors,
            Arc::clone(&health),
            Arc::clone(&rules),
            events.clone(),
        );

        let engine = Arc::new(Self {
            cfg: RwLock::new(cfg),
            table: DeviceTable::new(),
            interfaces: RwLock::new(Vec::new()),
            health,
            disrupt,
            rules,
            events,
        });
        engine.spawn_auto_release(release_rx);
        engine
    }

    /// The health monitor's release signal uses the same stop path as an
    /// explicit stop; this task is the glue.
    fn spawn_auto_release(self: &Arc<Self>, mut release_rx: UnboundedReceiver<DeviceKey>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(key) = release_rx.recv().await {
                if !engine.disrupt.has_session(&key) {
                    continue;
                }
                warn!(device = %key, "auto-releasing target after health floor breach");
                if let Err(e) = engine.disrupt.stop(&key, StopReason::HealthPreempted).await {
                    warn!(device = %key, "auto-release stop failed: {e}");
                }
                engine.table.set_blocked(&key, false);
            }
        });
    }

    // ---- discovery ----

    /// Enumerates interfaces (or takes the caller's), scans them,
    /// enriches identities and folds the result into the device table.
    pub async fn rescan(&self, interfaces: Option<Vec<Interface>>) -> ScanReport {
        let cfg = self.cfg.read().expect("config poisoned").clone();
        let ifaces = interfaces.unwrap_or_else(interface::list_interfaces);

        let mut report = discovery::scan(&ifaces, &cfg).await;

        let gateway = ifaces.iter().find_map(interface::default_gateway);
        crate::identity::enrich(&mut report.devices, &cfg, gateway).await;

        *self.interfaces.write().expect("interfaces poisoned") = ifaces;
        self.ingest(&report);
        report
    }

    /// Folds an externally produced scan report into the device table,
    /// emitting appeared/disappeared notifications. `rescan` uses this
    /// internally; embedding layers with their own discovery source can
    /// call it directly.
    pub fn ingest(&self, report: &ScanReport) {
        let expiry = self.cfg.read().expect("config poisoned").expiry_misses;
        let delta = self.table.apply_scan(report, expiry);
        for key in delta.appeared {
            self.events.emit(Event::DeviceAppeared { key });
        }
        for key in delta.disappeared {
            self.events.emit(Event::DeviceDisappeared { key });
        }
        self.events.emit(Event::ScanCompleted {
            found: report.devices.len(),
            partial: report.partial,
        });
    }

    /// Current device table, refreshed first when the cache has gone
    /// stale. `rescan` is the explicit-refresh path.
    pub async fn list_devices(&self) -> Vec<Device> {
        let max_age = self.cfg.read().expect("config poisoned").cache_max_age;
        let stale = match self.table.last_scan() {
            Some(at) => at.elapsed() > max_age,
            None => true,
        };
        if stale {
            self.rescan(None).await;
        }
        self.table.list()
    }

    pub fn device(&self, addr: IpAddr) -> Option<Device> {
        let key = self.table.resolve(addr)?;
        self.table.get(&key)
    }

    // ---- health ----

    pub async fn health_report(&self, addr: IpAddr) -> Result<HealthReport, CoreError> {
        let key = self.resolve(addr)?;
        self.health.add(key);
        Ok(self.health.check(key).await)
    }

    pub fn set_health_thresholds(&self, thresholds: HealthThresholds) {
        self.health.set_thresholds(thresholds);
    }

    pub fn start_monitoring(&self, interval: Duration) {
        self.health.start_monitoring(interval);
    }

    pub async fn stop_monitoring(&self) {
        self.health.stop_monitoring().await;
    }

    /// Direct access for layers that record their own samples (and for
    /// tests scripting the monitor).
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    // ---- disruption ----

    pub async fn start_disruption(
        &self,
        addr: IpAddr,
        methods: Option<Vec<DisruptMethod>>,
        duration: Option<Duration>,
    ) -> Result<SessionStatus, CoreError> {
        let key = self.resolve(addr)?;
        let device = self
            .table
            .get(&key)
            .ok_or(CoreError::UnknownDevice { addr })?;
        if device.protected {
            return Err(CoreError::ProtectedDevice { key });
        }

        // The gate needs at least one sample; take one now if the
        // monitor has never seen this target.
        self.health.add(key);
        if self.health.latest(&key).is_none() {
            self.health.check(key).await;
        }

        let ctx = self.build_context(&key, &device)?;
        let status = self.disrupt.start(ctx, methods, duration)?;
        self.table.set_blocked(&key, true);
        Ok(status)
    }

    pub async fn stop_disruption(&self, addr: IpAddr) -> Result<(), CoreError> {
        let key = self.resolve(addr)?;
        self.disrupt.stop(&key, StopReason::Requested).await?;
        self.table.set_blocked(&key, false);
        Ok(())
    }

    pub fn disruption_status(&self, addr: IpAddr) -> SessionStatus {
        match self.table.resolve(addr) {
            Some(key) => self.disrupt.status(&key),
            None => self.disrupt.status(&DeviceKey::from_addr(addr)),
        }
    }

    /// Methods latched unusable for this process, with reasons.
    pub fn unavailable_methods(&self) -> Vec<(DisruptMethod, String)> {
        self.disrupt.unavailable_methods()
    }

    /// Best-effort removal of rules a crashed run may have left for
    /// `addr`; tags are deterministic, so they can be recomputed here.
    pub fn scrub_rules(&self, addr: IpAddr) {
        self.rules.scrub(addr);
    }

    // ---- notifications & lifecycle ----

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Force-stops every session, stops monitoring and releases every
    /// outstanding rule. Leaked tags (release kept failing) are named so
    /// the operator can clean up by hand.
    pub async fn shutdown(&self) {
        self.disrupt.stop_all(StopReason::Shutdown).await;
        self.health.stop_monitoring().await;
        self.rules.release_all();

        let leaked = self.rules.leaked();
        if leaked.is_empty() {
            info!("shutdown clean, no rules left behind");
        } else {
            for tag in leaked {
                warn!(%tag, "rule requires manual cleanup");
            }
        }
    }

    fn resolve(&self, addr: IpAddr) -> Result<DeviceKey, CoreError> {
        self.table
            .resolve(addr)
            .ok_or(CoreError::UnknownDevice { addr })
    }

    /// Assembles the per-target context workers run against, degrading
    /// gracefully when pieces (gateway MAC, interface MAC) are unknown.
    fn build_context(&self, key: &DeviceKey, device: &Device) -> Result<TargetContext, CoreError> {
        let IpAddr::V4(target_v4) = device.addr else {
            return Err(CoreError::UnsupportedAddressFamily { addr: device.addr });
        };

        let interfaces = self.interfaces.read().expect("interfaces poisoned");
        let intf = interfaces
            .iter()
            .find(|i| i.name == device.interface)
            .or_else(|| interfaces.iter().find(|i| i.contains(target_v4)));

        let (our_v4, our_mac, interface_name) = match intf {
            Some(i) => (i.addr, i.mac.unwrap_or_else(MacAddr::zero), i.name.clone()),
            None => (Ipv4Addr::UNSPECIFIED, MacAddr::zero(), device.interface.clone()),
        };

        let gateway_v4 = intf
            .and_then(interface::default_gateway)
            .unwrap_or_else(|| {
                let [a, b, c, _] = target_v4.octets();
                Ipv4Addr::new(a, b, c, 1)
            });
        let gateway_mac = neighbors::read_neighbor_table()
            .into_iter()
            .find(|entry| entry.addr == gateway_v4)
            .map(|entry| entry.mac);

        Ok(TargetContext {
            target: *key,
            target_v4,
            target_mac: device.mac,
            gateway_v4,
            gateway_mac,
            our_v4,
            our_mac,
            interface: interface_name,
        })
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
