use std::time::Duration;

/// Runtime knobs shared by discovery, the health monitor and the
/// disruption engine. Populated from CLI flags; nothing here is
/// persisted.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-probe timeout for reachability checks.
    pub probe_timeout: Duration,
    /// Upper bound on concurrently in-flight probes per scan.
    pub probe_concurrency: usize,
    /// Overall deadline for one scan; hitting it returns partial results.
    pub scan_deadline: Duration,
    /// Ports probed for service fingerprinting. Empty disables the pass.
    pub fingerprint_ports: Vec<u16>,
    /// Consecutive scans a device may be missing before it is dropped.
    pub expiry_misses: u8,
    /// Skips reverse-hostname lookups when set.
    pub no_dns: bool,
    /// Maximum age of a cached device table before `list_devices`
    /// triggers a fresh scan.
    pub cache_max_age: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(300),
            probe_concurrency: 128,
            scan_deadline: Duration::from_secs(30),
            fingerprint_ports: DEFAULT_FINGERPRINT_PORTS.to_vec(),
            expiry_misses: 2,
            no_dns: false,
            cache_max_age: Duration::from_secs(30),
        }
    }
}

/// Well-known ports worth knocking on during fingerprinting. The tail of
/// the list covers console services (PSN remote play, Xbox Live helper,
/// mDNS) the device-type guesser keys off.
pub const DEFAULT_FINGERPRINT_PORTS: [u16; 9] =
    [22, 80, 443, 445, 3389, 8080, 3074, 9295, 5353];
