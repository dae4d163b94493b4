//! Configuration file support for linkdiscd
//!
//! Loads and validates linkdiscd configuration from TOML files.
//! Default location: /etc/sonic/linkdiscd.toml
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-2: Baseline Configuration - Documented defaults for every setting
//! - CM-6: Configuration Settings - Settings are validated before use

use crate::error::{DiscoveryError, Result};
use crate::types::{Dpid, Endpoint, PortNo};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default configuration path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/linkdiscd.toml";

/// Probe and link timing parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Pause between consecutive periodic probes, in milliseconds
    #[serde(default = "default_send_guard_ms")]
    pub send_guard_ms: u64,

    /// Re-probe interval of each port, in milliseconds
    #[serde(default = "default_send_period_per_port_ms")]
    pub send_period_per_port_ms: u64,

    /// Link sweep interval, in milliseconds
    #[serde(default = "default_sweep_period_ms")]
    pub sweep_period_ms: u64,

    /// Age after which an unconfirmed link is a sweep candidate, in
    /// milliseconds. Defaults to twice the sweep period.
    #[serde(default)]
    pub link_timeout_ms: Option<u64>,

    /// Unanswered probes tolerated before a stale link is evicted
    #[serde(default = "default_link_drop_threshold")]
    pub link_drop_threshold: u32,

    /// TTL advertised in every probe, in seconds
    #[serde(default = "default_probe_ttl_secs")]
    pub probe_ttl_secs: u16,

    /// Ask the transport to consume handled discovery frames
    #[serde(default = "default_explicit_drop")]
    pub explicit_drop: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Switch in the simulated lab fabric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabSwitch {
    pub dpid: Dpid,
    pub ports: Vec<PortNo>,
}

/// Cable between two lab switch ports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabLink {
    pub a_dpid: Dpid,
    pub a_port: PortNo,
    pub b_dpid: Dpid,
    pub b_port: PortNo,
}

impl LabLink {
    pub fn endpoints(&self) -> (Endpoint, Endpoint) {
        (
            Endpoint::new(self.a_dpid, self.a_port),
            Endpoint::new(self.b_dpid, self.b_port),
        )
    }
}

/// Simulated topology driven by `linkdiscd run`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabConfig {
    #[serde(default)]
    pub switches: Vec<LabSwitch>,
    #[serde(default)]
    pub links: Vec<LabLink>,
}

/// Complete linkdiscd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkdiscConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub lab: LabConfig,
}

// Default functions
fn default_send_guard_ms() -> u64 {
    50
}

fn default_send_period_per_port_ms() -> u64 {
    900
}

fn default_sweep_period_ms() -> u64 {
    5000
}

fn default_link_drop_threshold() -> u32 {
    5
}

fn default_probe_ttl_secs() -> u16 {
    120
}

fn default_explicit_drop() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            send_guard_ms: default_send_guard_ms(),
            send_period_per_port_ms: default_send_period_per_port_ms(),
            sweep_period_ms: default_sweep_period_ms(),
            link_timeout_ms: None,
            link_drop_threshold: default_link_drop_threshold(),
            probe_ttl_secs: default_probe_ttl_secs(),
            explicit_drop: default_explicit_drop(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl DiscoveryConfig {
    pub fn send_guard(&self) -> Duration {
        Duration::from_millis(self.send_guard_ms)
    }

    pub fn send_period_per_port(&self) -> Duration {
        Duration::from_millis(self.send_period_per_port_ms)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_period_ms)
    }

    pub fn link_timeout(&self) -> Duration {
        Duration::from_millis(
            self.link_timeout_ms
                .unwrap_or(self.sweep_period_ms.saturating_mul(2)),
        )
    }

    /// Validate timing parameters
    pub fn validate(&self) -> Result<()> {
        if self.send_period_per_port_ms == 0 {
            return Err(DiscoveryError::Config(
                "send_period_per_port_ms must be > 0".to_string(),
            ));
        }

        if self.sweep_period_ms == 0 {
            return Err(DiscoveryError::Config(
                "sweep_period_ms must be > 0".to_string(),
            ));
        }

        if self.send_guard_ms >= self.send_period_per_port_ms {
            return Err(DiscoveryError::Config(
                "send_guard_ms must be smaller than send_period_per_port_ms".to_string(),
            ));
        }

        if self.link_timeout() < self.sweep_period() {
            return Err(DiscoveryError::Config(
                "link_timeout_ms must not be shorter than sweep_period_ms".to_string(),
            ));
        }

        Ok(())
    }
}

impl LabConfig {
    /// Every lab cable must join two declared ports
    pub fn validate(&self) -> Result<()> {
        for link in &self.links {
            let (a, b) = link.endpoints();
            for ep in [a, b] {
                let declared = self
                    .switches
                    .iter()
                    .any(|sw| sw.dpid == ep.dpid && sw.ports.contains(&ep.port_no));
                if !declared {
                    return Err(DiscoveryError::Config(format!(
                        "lab link endpoint {} is not a declared switch port",
                        ep
                    )));
                }
            }
            if a == b {
                return Err(DiscoveryError::Config(format!(
                    "lab link {} loops back onto itself",
                    a
                )));
            }
        }
        Ok(())
    }
}

impl LinkdiscConfig {
    /// Load configuration from a file that must exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(DiscoveryError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()?;
        self.lab.validate()
    }
}
