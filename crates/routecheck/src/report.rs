//! Check outcomes and how they are reported.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use tracing::{error, info};

use crate::error::{Result, RouteCheckError};
use crate::types::RouteKey;

/// Result of one namespace's check cycle.
///
/// Serializes to the report format consumed by monitoring scripts; empty
/// buckets are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckOutcome {
    #[serde(rename = "missed_ROUTE_TABLE_routes", skip_serializing_if = "Vec::is_empty")]
    missed_routes: Vec<RouteKey>,

    #[serde(rename = "missed_INTF_TABLE_entries", skip_serializing_if = "Vec::is_empty")]
    missed_interfaces: Vec<RouteKey>,

    #[serde(
        rename = "Unaccounted_ROUTE_ENTRY_TABLE_entries",
        skip_serializing_if = "Vec::is_empty"
    )]
    unaccounted: Vec<RouteKey>,

    #[serde(rename = "missed_FRR_routes", skip_serializing_if = "Vec::is_empty")]
    missed_frr_routes: Vec<Value>,
}

impl CheckOutcome {
    pub fn new(
        missed_routes: Vec<RouteKey>,
        missed_interfaces: Vec<RouteKey>,
        unaccounted: Vec<RouteKey>,
        missed_frr_routes: Vec<Value>,
    ) -> Self {
        Self {
            missed_routes,
            missed_interfaces,
            unaccounted,
            missed_frr_routes,
        }
    }

    /// True when every bucket is empty.
    pub fn passed(&self) -> bool {
        self.missed_routes.is_empty()
            && self.missed_interfaces.is_empty()
            && self.unaccounted.is_empty()
            && self.missed_frr_routes.is_empty()
    }

    pub fn missed_routes(&self) -> &[RouteKey] {
        &self.missed_routes
    }

    pub fn missed_interfaces(&self) -> &[RouteKey] {
        &self.missed_interfaces
    }

    pub fn unaccounted(&self) -> &[RouteKey] {
        &self.unaccounted
    }

    pub fn missed_frr_routes(&self) -> &[Value] {
        &self.missed_frr_routes
    }
}

/// Outcomes of every namespace checked in one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    outcomes: BTreeMap<String, CheckOutcome>,
}

impl CycleReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, namespace: impl Into<String>, outcome: CheckOutcome) {
        self.outcomes.insert(namespace.into(), outcome);
    }

    pub fn get(&self, namespace: &str) -> Option<&CheckOutcome> {
        self.outcomes.get(namespace)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// True when every namespace passed.
    pub fn passed(&self) -> bool {
        self.outcomes.values().all(CheckOutcome::passed)
    }

    /// Renders the failing outcomes.
    ///
    /// A single host-namespace outcome is rendered flat; otherwise the
    /// failing outcomes are keyed by namespace.
    pub fn to_json(&self) -> Result<Value> {
        if self.outcomes.len() == 1 {
            if let Some(outcome) = self.outcomes.get("") {
                return Ok(serde_json::to_value(outcome)?);
            }
        }

        let mut failures = serde_json::Map::new();
        for (namespace, outcome) in self.outcomes.iter().filter(|(_, o)| !o.passed()) {
            failures.insert(namespace.clone(), serde_json::to_value(outcome)?);
        }
        Ok(Value::Object(failures))
    }
}

/// Verbosity selected with `--mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogMode {
    #[default]
    #[value(name = "ERR")]
    Err,
    #[value(name = "INFO")]
    Info,
    #[value(name = "DEBUG")]
    Debug,
}

impl LogMode {
    /// Returns the `EnvFilter` directive for this mode.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogMode::Err => "error",
            LogMode::Info => "info",
            LogMode::Debug => "debug",
        }
    }
}

impl fmt::Display for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogMode::Err => f.write_str("ERR"),
            LogMode::Info => f.write_str("INFO"),
            LogMode::Debug => f.write_str("DEBUG"),
        }
    }
}

/// How results and logs are emitted, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportingConfig {
    pub mode: LogMode,
    pub log_to_syslog: bool,
}

/// Emits cycle results
#[derive(Debug, Clone)]
pub struct Reporter {
    config: ReportingConfig,
}

impl Reporter {
    pub fn new(config: ReportingConfig) -> Self {
        Self { config }
    }

    /// Reports a completed cycle to stdout and returns whether it passed.
    pub fn report(&self, report: &CycleReport) -> bool {
        self.report_to(report, &mut io::stdout().lock())
    }

    /// Reports a completed cycle to `out` and returns whether it passed.
    ///
    /// A failing report is written as JSON and logged at error. A passing
    /// one writes a confirmation line unless the mode is `ERR`.
    pub fn report_to<W: Write>(&self, report: &CycleReport, out: &mut W) -> bool {
        if report.passed() {
            info!(namespaces = report.len(), "All good!");
            if self.config.mode != LogMode::Err {
                if let Err(e) = writeln!(out, "All good!") {
                    error!(error = %e, "Failed to write results");
                }
            }
            return true;
        }

        match report.to_json().and_then(|json| Ok(serde_json::to_string_pretty(&json)?)) {
            Ok(text) => {
                error!("Failure results: {}", text);
                if let Err(e) = writeln!(out, "{}", text) {
                    error!(error = %e, "Failed to write results");
                }
            }
            Err(e) => error!(error = %e, "Failed to render failure results"),
        }
        error!("Failed. Look at reported mismatches above");
        false
    }

    /// Reports a cycle that aborted before producing an outcome.
    pub fn report_error(&self, err: &RouteCheckError) {
        match err {
            RouteCheckError::Timeout { stage, timeout } => error!(
                %stage,
                timeout_secs = timeout.as_secs(),
                "route_check timed out"
            ),
            RouteCheckError::Cancelled { stage } => info!(%stage, "route_check cancelled"),
            other => error!(error = %other, "route_check failed"),
        }
    }
}
