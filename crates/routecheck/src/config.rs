//! Configuration file support for route_check
//!
//! Loads route_check configuration from a TOML file.
//! Default location: /etc/sonic/route_check.toml
//!
//! Every field has a default, so an absent default file simply yields
//! [`RouteCheckConfig::default`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, RouteCheckError};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/route_check.toml";

/// Shortest accepted repeat interval
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Longest accepted repeat interval
pub const MAX_SCAN_INTERVAL: Duration = Duration::from_secs(3600);

/// Key in chassisdb.conf listing chassis-internal interfaces
const CHASSIS_INTERNAL_INTFS_KEY: &str = "chassis_internal_intfs";

/// Database connection settings for one namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Redis host
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Unix socket path; takes precedence over host/port when set
    #[serde(default)]
    pub unix_socket: Option<PathBuf>,

    /// Redis database number for APPL_DB
    #[serde(default = "default_appl_db_number")]
    pub appl_db_number: u32,

    /// Redis database number for ASIC_DB
    #[serde(default = "default_asic_db_number")]
    pub asic_db_number: u32,

    /// Redis database number for CONFIG_DB
    #[serde(default = "default_config_db_number")]
    pub config_db_number: u32,
}

/// Check cycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Hard deadline for one full cycle, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long late change notifications are still credited, in milliseconds
    #[serde(default = "default_subscribe_window_ms")]
    pub subscribe_window_ms: u64,

    /// Management/host interfaces whose routes are never programmed
    #[serde(default = "default_local_interfaces")]
    pub local_interfaces: Vec<String>,

    /// Loopback-style interface name patterns (regular expressions, fully anchored)
    #[serde(default = "default_local_interface_patterns")]
    pub local_interface_patterns: Vec<String>,

    /// Name prefix of fabric-internal (inband) interfaces on VOQ chassis
    #[serde(default = "default_fabric_interface_prefix")]
    pub fabric_interface_prefix: String,

    /// chassisdb.conf listing chassis-internal interfaces, if the platform has one
    #[serde(default)]
    pub chassisdb_conf: Option<PathBuf>,
}

impl CheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn subscribe_window(&self) -> Duration {
        Duration::from_millis(self.subscribe_window_ms)
    }
}

/// Control-plane (FRR) cross-check settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrrConfig {
    /// Enable the cross-check (still requires suppress-fib-pending in DEVICE_METADATA)
    #[serde(default)]
    pub enabled: bool,

    /// Number of reads; a route must be pending in all of them to be reported
    #[serde(default = "default_frr_retries")]
    pub retries: u32,

    /// Wait between reads, in seconds
    #[serde(default = "default_frr_retry_wait")]
    pub retry_wait_secs: u64,

    /// vtysh binary
    #[serde(default = "default_vtysh_path")]
    pub vtysh_path: PathBuf,
}

impl FrrConfig {
    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(self.retry_wait_secs)
    }
}

/// One ASIC namespace on a multi-ASIC device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Namespace name (e.g. "asic0"); empty for the host namespace
    pub name: String,

    /// Database settings; falls back to the top-level `[database]` section
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Complete route_check configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteCheckConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub check: CheckConfig,

    #[serde(default)]
    pub frr: FrrConfig,

    #[serde(default, rename = "namespace")]
    pub namespaces: Vec<NamespaceConfig>,
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_appl_db_number() -> u32 {
    0
}

fn default_asic_db_number() -> u32 {
    1
}

fn default_config_db_number() -> u32 {
    4
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_subscribe_window_ms() -> u64 {
    1000
}

fn default_local_interfaces() -> Vec<String> {
    vec!["eth0".to_string(), "eth1".to_string(), "docker0".to_string()]
}

fn default_local_interface_patterns() -> Vec<String> {
    vec!["tun0".to_string(), "lo".to_string(), r"Loopback\d+".to_string()]
}

fn default_fabric_interface_prefix() -> String {
    "Ethernet-IB".to_string()
}

fn default_frr_retries() -> u32 {
    3
}

fn default_frr_retry_wait() -> u64 {
    15
}

fn default_vtysh_path() -> PathBuf {
    PathBuf::from("/usr/bin/vtysh")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            unix_socket: None,
            appl_db_number: default_appl_db_number(),
            asic_db_number: default_asic_db_number(),
            config_db_number: default_config_db_number(),
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            subscribe_window_ms: default_subscribe_window_ms(),
            local_interfaces: default_local_interfaces(),
            local_interface_patterns: default_local_interface_patterns(),
            fabric_interface_prefix: default_fabric_interface_prefix(),
            chassisdb_conf: None,
        }
    }
}

impl Default for FrrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retries: default_frr_retries(),
            retry_wait_secs: default_frr_retry_wait(),
            vtysh_path: default_vtysh_path(),
        }
    }
}

impl RouteCheckConfig {
    /// Parses configuration from TOML text and validates it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RouteCheckError::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RouteCheckError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Loads an explicitly named file, or the default file if it exists.
    ///
    /// A missing explicit file is an error; a missing default file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            debug!(path = DEFAULT_CONFIG_PATH, "No config file, using defaults");
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Validates value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.check.timeout_secs == 0 {
            return Err(RouteCheckError::Config(
                "check.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.check.subscribe_window() >= self.check.timeout() {
            return Err(RouteCheckError::Config(
                "check.subscribe_window_ms must be shorter than check.timeout_secs".to_string(),
            ));
        }

        if self.frr.enabled && self.frr.retries == 0 {
            return Err(RouteCheckError::Config(
                "frr.retries must be at least 1".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for ns in &self.namespaces {
            if !seen.insert(ns.name.as_str()) {
                return Err(RouteCheckError::Config(format!(
                    "duplicate namespace '{}'",
                    ns.name
                )));
            }
        }

        Ok(())
    }

    /// Resolves the namespaces to check, each with its effective database settings.
    ///
    /// With no `[[namespace]]` entries the host namespace ("") is checked.
    pub fn resolve_namespaces(&self, only: Option<&str>) -> Result<Vec<(String, DatabaseConfig)>> {
        let all: Vec<(String, DatabaseConfig)> = if self.namespaces.is_empty() {
            vec![(String::new(), self.database.clone())]
        } else {
            self.namespaces
                .iter()
                .map(|ns| {
                    let db = ns.database.clone().unwrap_or_else(|| self.database.clone());
                    (ns.name.clone(), db)
                })
                .collect()
        };

        match only {
            None => Ok(all),
            Some(name) => {
                let selected: Vec<_> = all.into_iter().filter(|(ns, _)| ns == name).collect();
                if selected.is_empty() {
                    Err(RouteCheckError::Config(format!("unknown namespace '{}'", name)))
                } else {
                    Ok(selected)
                }
            }
        }
    }
}

/// Converts the CLI interval into a repeat period.
///
/// `0` means run once; any other value is clamped to
/// [`MIN_SCAN_INTERVAL`, `MAX_SCAN_INTERVAL`].
pub fn scan_interval(secs: u64) -> Option<Duration> {
    if secs == 0 {
        return None;
    }
    let requested = Duration::from_secs(secs);
    let clamped = requested.clamp(MIN_SCAN_INTERVAL, MAX_SCAN_INTERVAL);
    if clamped != requested {
        warn!(
            requested = secs,
            clamped = clamped.as_secs(),
            "Scan interval out of range, clamped"
        );
    }
    Some(clamped)
}

/// Reads the chassis-internal interface list from a chassisdb.conf file.
///
/// The file holds `key=value` lines; the list is the comma-separated value of
/// `chassis_internal_intfs`. A missing file yields an empty list.
pub fn load_chassis_local_interfaces(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    Ok(parse_chassis_local_interfaces(&content))
}

fn parse_chassis_local_interfaces(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .find(|(key, _)| key.trim() == CHASSIS_INTERNAL_INTFS_KEY)
        .map(|(_, value)| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}
