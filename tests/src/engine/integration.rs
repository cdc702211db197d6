#![cfg(test)]
//! End-to-end exercises of the public engine surface: discovery against
//! the loopback, the health gate, privilege filtering and the full
//! session lifecycle, all through the same facade a GUI layer would use.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sever_common::config::Config;
use sever_common::error::{CoreError, GateViolation};
use sever_common::network::device::Device;
use sever_common::network::interface;
use sever_core::discovery::{self, ScanReport};
use sever_core::disrupt::SessionState;
use sever_core::disrupt::methods::DisruptMethod;
use sever_core::engine::Engine;
use sever_core::health::HealthSample;
use sever_core::testing::{FakeInjectorFactory, FakeRuleBackend, ScriptedProbe};

fn fast_config() -> Config {
    Config {
        probe_timeout: Duration::from_millis(200),
        fingerprint_ports: Vec::new(),
        no_dns: true,
        ..Config::default()
    }
}

fn engine(privileged: bool) -> (Arc<Engine>, Arc<FakeRuleBackend>) {
    let backend = Arc::new(FakeRuleBackend::new());
    let engine = Engine::new(
        fast_config(),
        privileged,
        FakeInjectorFactory::new(),
        Box::new(FakeRuleBackend::share(&backend)),
        Arc::new(ScriptedProbe::healthy()),
    );
    (engine, backend)
}

fn seeded(privileged: bool) -> (Arc<Engine>, Arc<FakeRuleBackend>, IpAddr) {
    let (engine, backend) = engine(privileged);
    let target = IpAddr::V4(Ipv4Addr::new(192, 168, 77, 50));
    engine.ingest(&ScanReport {
        devices: vec![Device::new(target, "eth0")],
        partial: false,
    });
    (engine, backend, target)
}

/// Discovery against a synthetic loopback subnet: every address in
/// 127.0.0.0/30 answers locally, so the sweep must find them without
/// touching a real network.
#[tokio::test]
async fn discovery_sweeps_a_loopback_subnet() {
    let intf = interface::from_parts(
        "lo-test",
        None,
        Ipv4Addr::new(127, 0, 0, 1),
        Ipv4Addr::new(255, 255, 255, 252),
    );

    let report = discovery::scan(std::slice::from_ref(&intf), &fast_config()).await;

    assert!(!report.partial);
    let found: Vec<IpAddr> = report.devices.iter().map(|d| d.addr).collect();
    assert!(
        found.contains(&IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
        "localhost missing from {found:?}"
    );
}

#[tokio::test]
async fn ingesting_the_same_report_twice_is_idempotent() {
    let (engine, _backend, target) = seeded(true);
    let before = engine.device(target).expect("seeded device");

    engine.ingest(&ScanReport {
        devices: vec![Device::new(target, "eth0")],
        partial: false,
    });
    let after = engine.device(target).expect("still present");

    assert_eq!(before.addr, after.addr);
    assert_eq!(before.mac, after.mac);
    assert_eq!(before.missed_scans, after.missed_scans);
}

#[tokio::test]
async fn health_gate_rejection_cites_latency_and_loss() {
    let (engine, _backend, target) = seeded(true);
    let key = engine.device(target).unwrap().key();

    // The worked example: 150ms, 8% loss, 3 errors => score 32.
    engine.health().record(
        key,
        HealthSample {
            latency: Duration::from_millis(150),
            loss: 0.08,
            errors: 3,
            at: Instant::now(),
        },
    );

    let err = engine.start_disruption(target, None, None).await.unwrap_err();
    let CoreError::HealthGateRejected { reasons, .. } = err else {
        panic!("expected a health-gate rejection");
    };
    assert!(reasons.iter().any(|r| matches!(r, GateViolation::LatencyTooHigh { .. })));
    assert!(reasons.iter().any(|r| matches!(r, GateViolation::LossTooHigh { .. })));
    assert_eq!(engine.disruption_status(target).state, SessionState::Idle);
}

#[tokio::test]
async fn unprivileged_request_for_everything_gets_the_socket_subset() {
    let (engine, _backend, target) = seeded(false);

    let status = engine
        .start_disruption(target, Some(DisruptMethod::ALL.to_vec()), None)
        .await
        .unwrap();

    assert_eq!(
        status.active_methods,
        vec![DisruptMethod::TcpReset, DisruptMethod::UdpFlood]
    );
    let excluded: Vec<DisruptMethod> = status.excluded.iter().map(|(m, _)| *m).collect();
    assert_eq!(excluded.len(), 4);
    assert!(excluded.contains(&DisruptMethod::ArpSpoof));
    assert!(excluded.contains(&DisruptMethod::IcmpDisrupt));
    assert!(excluded.contains(&DisruptMethod::DnsOverride));
    assert!(excluded.contains(&DisruptMethod::RuleBlock));

    engine.stop_disruption(target).await.unwrap();
}

#[tokio::test]
async fn full_lifecycle_joins_workers_and_releases_every_rule() {
    let (engine, backend, target) = seeded(true);

    let status = engine
        .start_disruption(
            target,
            Some(vec![
                DisruptMethod::TcpReset,
                DisruptMethod::UdpFlood,
                DisruptMethod::RuleBlock,
            ]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(status.state, SessionState::Active);
    assert_eq!(status.active_methods.len(), 3);
    assert!(backend.applied_count() >= 1, "rule-block must hit the backend");
    assert!(engine.device(target).unwrap().blocked);

    engine.stop_disruption(target).await.unwrap();

    assert_eq!(engine.disruption_status(target).state, SessionState::Idle);
    assert!(!engine.device(target).unwrap().blocked);
    assert_eq!(backend.outstanding(), 0, "every tag must be released");
}

#[tokio::test]
async fn auto_release_fires_without_an_explicit_stop() {
    let (engine, _backend, target) = seeded(true);
    engine
        .start_disruption(target, Some(vec![DisruptMethod::UdpFlood]), None)
        .await
        .unwrap();

    let key = engine.device(target).unwrap().key();
    let crater = HealthSample {
        latency: Duration::from_millis(500),
        loss: 1.0,
        errors: 50,
        at: Instant::now(),
    };
    engine.health().record(key, crater);
    engine.health().record(key, crater);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.disruption_status(target).state, SessionState::Idle);
}

#[tokio::test]
async fn shutdown_leaves_no_outstanding_rules() {
    let (engine, backend, target) = seeded(true);
    engine
        .start_disruption(target, Some(vec![DisruptMethod::RuleBlock]), None)
        .await
        .unwrap();
    assert!(backend.outstanding() >= 1);

    engine.shutdown().await;
    assert_eq!(backend.outstanding(), 0);
}
