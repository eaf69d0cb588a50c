//! Control-plane cross-check against the FRR routing table.
//!
//! With `suppress-fib-pending` enabled, FRR only advertises a BGP route once
//! the forwarding plane confirms it and marks the route `offloaded`. A
//! selected BGP route that stays un-offloaded across several reads is stuck
//! between zebra and the hardware.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config::FrrConfig;
use crate::error::{Result, RouteCheckError};
use crate::reconciler::CheckStage;
use crate::store::{Database, KeyValueStore};
use crate::tables::{fields, CFG_DEVICE_METADATA_TABLE_NAME, DEVICE_METADATA_LOCALHOST_KEY};
use crate::watchdog::CycleContext;

/// vtysh commands dumping the IPv4 and IPv6 RIBs
const SHOW_ROUTE_COMMANDS: [&str; 2] = ["show ip route json", "show ipv6 route json"];

/// Fields that change between reads of the same route
const VOLATILE_FIELDS: [&str; 1] = ["uptime"];

/// Source of control-plane route records
#[async_trait]
pub trait ControlPlaneRoutes: Send + Sync {
    /// Returns every route record of every address family.
    async fn fetch(&self) -> Result<Vec<Value>>;
}

/// Reads routes from FRR through vtysh
#[derive(Debug, Clone)]
pub struct VtyshRoutes {
    vtysh_path: PathBuf,
    /// ASIC index for multi-ASIC devices (`vtysh -n <index>`)
    asic_index: Option<u32>,
}

impl VtyshRoutes {
    pub fn new(vtysh_path: impl Into<PathBuf>, namespace: &str) -> Self {
        Self {
            vtysh_path: vtysh_path.into(),
            asic_index: asic_index(namespace),
        }
    }

    fn args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if let Some(index) = self.asic_index {
            args.push("-n".to_string());
            args.push(index.to_string());
        }
        args.push("-c".to_string());
        args.push(command.to_string());
        args
    }

    async fn run(&self, command: &str) -> Result<Value> {
        let args = self.args(command);
        debug!(vtysh = %self.vtysh_path.display(), ?args, "Querying FRR");

        let output = Command::new(&self.vtysh_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                RouteCheckError::ControlPlane(format!(
                    "failed to run {}: {}",
                    self.vtysh_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RouteCheckError::ControlPlane(format!(
                "'{}' exited with {}: {}",
                command,
                output.status,
                stderr.trim()
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl ControlPlaneRoutes for VtyshRoutes {
    async fn fetch(&self) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        for command in SHOW_ROUTE_COMMANDS {
            let table = self.run(command).await?;
            records.extend(flatten_route_table(table));
        }
        Ok(records)
    }
}

/// Returns true if DEVICE_METADATA enables `suppress-fib-pending`.
///
/// Without it FRR never waits for offload, so the cross-check has nothing to find.
pub async fn suppress_fib_pending_enabled<S: KeyValueStore + ?Sized>(
    store: &mut S,
) -> Result<bool> {
    let metadata = store
        .get_entry(
            Database::ConfigDb,
            CFG_DEVICE_METADATA_TABLE_NAME,
            DEVICE_METADATA_LOCALHOST_KEY,
        )
        .await?;
    Ok(metadata
        .get(fields::SUPPRESS_FIB_PENDING)
        .is_some_and(|v| v == "enabled"))
}

/// `asic3` -> 3. The host namespace has no index.
fn asic_index(namespace: &str) -> Option<u32> {
    namespace.strip_prefix("asic")?.parse().ok()
}

/// Flattens `{"<prefix>": [record, ...], ...}` into the record list.
pub fn flatten_route_table(table: Value) -> Vec<Value> {
    match table {
        Value::Object(map) => map
            .into_iter()
            .flat_map(|(_, entries)| match entries {
                Value::Array(records) => records,
                other => vec![other],
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Returns true for a default-VRF BGP route that is selected but not offloaded.
pub fn is_pending(record: &Value) -> bool {
    let vrf = record
        .get("vrfName")
        .and_then(Value::as_str)
        .unwrap_or("default");
    let protocol = record.get("protocol").and_then(Value::as_str);
    let selected = record
        .get("selected")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let offloaded = record
        .get("offloaded")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    vrf == "default" && protocol == Some("bgp") && selected && !offloaded
}

/// Filters a record list down to pending routes.
pub fn pending_routes(records: Vec<Value>) -> Vec<Value> {
    records.into_iter().filter(is_pending).collect()
}

/// A record with its volatile fields removed, used to match records across reads.
fn stable_form(record: &Value) -> Value {
    let mut stable = record.clone();
    if let Value::Object(map) = &mut stable {
        for field in VOLATILE_FIELDS {
            map.remove(field);
        }
    }
    stable
}

/// Reads the control plane up to `config.retries` times and returns the
/// routes pending on every read.
///
/// Stops early once a read shows nothing pending. Records come from the last
/// read, verbatim.
#[instrument(skip_all, fields(retries = config.retries))]
pub async fn check_pending(
    source: &dyn ControlPlaneRoutes,
    config: &FrrConfig,
    ctx: &CycleContext,
) -> Result<Vec<Value>> {
    let mut stuck: Option<Vec<Value>> = None;

    for attempt in 1..=config.retries.max(1) {
        if attempt > 1 {
            ctx.sleep(config.retry_wait(), CheckStage::ControlPlane)
                .await?;
        }

        let pending = pending_routes(source.fetch().await?);
        let current = match stuck.take() {
            None => pending,
            Some(previous) => {
                let previous: Vec<Value> = previous.iter().map(stable_form).collect();
                pending
                    .into_iter()
                    .filter(|record| previous.contains(&stable_form(record)))
                    .collect()
            }
        };

        debug!(attempt, pending = current.len(), "FRR read");
        if current.is_empty() {
            info!("No routes pending in FRR");
            return Ok(current);
        }
        stuck = Some(current);
    }

    let stuck = stuck.unwrap_or_default();
    warn!(count = stuck.len(), "Routes pending in FRR on every read");
    Ok(stuck)
}
