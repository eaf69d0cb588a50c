//! One check cycle for one namespace.
//!
//! ```text
//! Idle -> Snapshotting -> Diffing -> Reconciling -> Filtering -> [ControlPlane] -> Passed | Failed
//!                            \
//!                             clean diff: straight to [ControlPlane]
//! ```
//!
//! The change-feed subscription is opened before any table is read, so a
//! route programmed between the scans and the drain is still credited.

use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, instrument, warn};

use crate::change_feed::ChangeFeedCollector;
use crate::config::{CheckConfig, FrrConfig};
use crate::diff::diff_sorted;
use crate::error::Result;
use crate::filters::{ExclusionPipeline, FilterContext, LocalInterfaces};
use crate::frr::{check_pending, suppress_fib_pending_enabled, ControlPlaneRoutes};
use crate::report::{CheckOutcome, LogMode, ReportingConfig};
use crate::snapshot::SnapshotReader;
use crate::store::KeyValueStore;
use crate::types::RouteKey;
use crate::watchdog::CycleContext;

/// Progress marker of a running cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CheckStage {
    #[default]
    Idle,
    Snapshotting,
    Diffing,
    Reconciling,
    Filtering,
    ControlPlane,
    Passed,
    Failed,
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Routing-daemon cross-check attached to a reconciler
struct ControlPlaneCheck {
    source: Box<dyn ControlPlaneRoutes>,
    config: FrrConfig,
}

/// Runs check cycles against one namespace's stores
pub struct Reconciler<S: KeyValueStore> {
    namespace: String,
    store: S,
    config: CheckConfig,
    local_interfaces: LocalInterfaces,
    pipeline: ExclusionPipeline,
    control_plane: Option<ControlPlaneCheck>,
    reporting: ReportingConfig,
}

impl<S: KeyValueStore> Reconciler<S> {
    /// Creates a reconciler with the standard exclusion pipeline.
    pub fn new(namespace: impl Into<String>, store: S, config: &CheckConfig) -> Result<Self> {
        Ok(Self {
            namespace: namespace.into(),
            store,
            config: config.clone(),
            local_interfaces: LocalInterfaces::from_config(config)?,
            pipeline: ExclusionPipeline::standard(),
            control_plane: None,
            reporting: ReportingConfig::default(),
        })
    }

    pub fn with_pipeline(mut self, pipeline: ExclusionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Enables the routing-daemon cross-check.
    pub fn with_control_plane(
        mut self,
        source: Box<dyn ControlPlaneRoutes>,
        config: FrrConfig,
    ) -> Self {
        self.control_plane = Some(ControlPlaneCheck { source, config });
        self
    }

    /// Sets the reporting mode; `DEBUG` dumps every snapshot and diff set.
    pub fn with_reporting(mut self, reporting: ReportingConfig) -> Self {
        self.reporting = reporting;
        self
    }

    fn dump_keys<'a>(&self, set: &str, keys: impl IntoIterator<Item = &'a RouteKey>) {
        if self.reporting.mode == LogMode::Debug {
            let keys: Vec<&str> = keys.into_iter().map(RouteKey::as_str).collect();
            debug!(set, count = keys.len(), "{}", keys.join(" "));
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Runs one full cycle.
    ///
    /// Discrepancies are returned in the outcome; an `Err` means the cycle
    /// was abandoned and nothing about the tables is known.
    #[instrument(skip_all, fields(namespace = %self.namespace))]
    pub async fn run_cycle(&mut self, ctx: &CycleContext) -> Result<CheckOutcome> {
        ctx.enter(CheckStage::Snapshotting)?;
        let feed = self.store.subscribe_programmed().await?;
        let mut collector = ChangeFeedCollector::new(feed);
        let snapshot = SnapshotReader::new(&mut self.store).take().await?;

        ctx.enter(CheckStage::Diffing)?;
        self.dump_keys("ROUTE_TABLE", snapshot.routes.keys());
        self.dump_keys("INTF_TABLE", &snapshot.interfaces);
        self.dump_keys("ASIC_ROUTE_ENTRY", &snapshot.programmed);

        let (missed_routes, unaccounted) =
            diff_sorted(snapshot.routes.keys(), &snapshot.programmed);
        let (missed_interfaces, _) = diff_sorted(&snapshot.interfaces, &snapshot.programmed);

        let mut missed_routes: BTreeSet<RouteKey> = missed_routes.into_iter().collect();
        // Interface host routes are accounted for by INTF_TABLE.
        let mut unaccounted: BTreeSet<RouteKey> = unaccounted
            .into_iter()
            .filter(|key| !snapshot.interfaces.contains(key))
            .collect();

        debug!(
            missed_routes = missed_routes.len(),
            missed_interfaces = missed_interfaces.len(),
            unaccounted = unaccounted.len(),
            "Initial diff"
        );

        let dirty =
            !missed_routes.is_empty() || !missed_interfaces.is_empty() || !unaccounted.is_empty();

        if dirty {
            ctx.enter(CheckStage::Reconciling)?;
            let window = self.config.subscribe_window().min(ctx.remaining());
            let drained = collector.drain(window).await?;
            missed_routes.retain(|key| !drained.adds.contains(key));
            unaccounted.retain(|key| !drained.removes.contains(key));
            self.dump_keys("missed after drain", &missed_routes);
            self.dump_keys("unaccounted after drain", &unaccounted);

            ctx.enter(CheckStage::Filtering)?;
            let filter_ctx = FilterContext::load(
                &mut self.store,
                snapshot.routes,
                self.local_interfaces.clone(),
                &self.config.fabric_interface_prefix,
            )
            .await?;
            missed_routes = self.pipeline.apply(missed_routes, &filter_ctx);
            unaccounted = self.pipeline.apply(unaccounted, &filter_ctx);
            self.dump_keys("missed after filters", &missed_routes);
            self.dump_keys("unaccounted after filters", &unaccounted);
        }
        drop(collector);

        let missed_frr_routes = match &self.control_plane {
            Some(check) => {
                if suppress_fib_pending_enabled(&mut self.store).await? {
                    ctx.enter(CheckStage::ControlPlane)?;
                    check_pending(check.source.as_ref(), &check.config, ctx).await?
                } else {
                    debug!("suppress-fib-pending disabled, skipping FRR check");
                    Vec::new()
                }
            }
            None => Vec::new(),
        };

        let outcome = CheckOutcome::new(
            missed_routes.into_iter().collect(),
            missed_interfaces,
            unaccounted.into_iter().collect(),
            missed_frr_routes,
        );

        if outcome.passed() {
            ctx.enter(CheckStage::Passed)?;
            info!("Route check passed");
        } else {
            ctx.enter(CheckStage::Failed)?;
            warn!(
                missed_routes = outcome.missed_routes().len(),
                missed_interfaces = outcome.missed_interfaces().len(),
                unaccounted = outcome.unaccounted().len(),
                missed_frr_routes = outcome.missed_frr_routes().len(),
                "Route check found mismatches"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, MemoryStore};
    use crate::tables::fields;
    use crate::types::ChangeEvent;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tracing::Level;

    fn key(s: &str) -> RouteKey {
        RouteKey::parse(s).unwrap()
    }

    fn keys(list: &[&str]) -> Vec<RouteKey> {
        list.iter().map(|s| key(s)).collect()
    }

    fn context() -> CycleContext {
        CycleContext::new(CancellationToken::new(), Duration::from_secs(120))
    }

    fn reconciler(store: &MemoryStore) -> Reconciler<MemoryStore> {
        let config = CheckConfig {
            subscribe_window_ms: 100,
            ..CheckConfig::default()
        };
        Reconciler::new("", store.clone(), &config).unwrap()
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    async fn cycle_log(mode: LogMode) -> String {
        let store = MemoryStore::new();
        store.add_intended_route("10.10.196.12/31", "Ethernet0", "10.0.0.1");
        store.add_programmed_route("20.10.196.12/31");

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut checker = reconciler(&store).with_reporting(ReportingConfig {
            mode,
            log_to_syslog: false,
        });
        let outcome = checker.run_cycle(&context()).await.unwrap();
        assert!(!outcome.passed());
        captured.text()
    }

    struct StaticRoutes(Vec<Value>);

    #[async_trait]
    impl ControlPlaneRoutes for StaticRoutes {
        async fn fetch(&self) -> Result<Vec<Value>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(CheckStage::Snapshotting.to_string(), "Snapshotting");
        assert_eq!(CheckStage::ControlPlane.to_string(), "ControlPlane");
    }

    #[tokio::test]
    async fn test_clean_cycle_skips_drain_and_filters() {
        let store = MemoryStore::new();
        store.add_intended_route("10.1.0.0/24", "Ethernet0", "10.0.0.1");
        store.add_interface_address("Ethernet0", "10.0.0.0/31");
        store.add_programmed_route("10.1.0.0/24");
        store.add_programmed_route("10.0.0.0/32");

        let ctx = context();
        let outcome = reconciler(&store).run_cycle(&ctx).await.unwrap();

        assert!(outcome.passed());
        assert_eq!(ctx.stage(), CheckStage::Passed);
        assert!(!store
            .operations()
            .iter()
            .any(|op| op.contains("VNET_ROUTE")));
    }

    #[tokio::test]
    async fn test_subscribes_before_reading_tables() {
        let store = MemoryStore::new();
        reconciler(&store).run_cycle(&context()).await.unwrap();

        let ops = store.operations();
        assert_eq!(ops.first().map(String::as_str), Some("subscribe"));
    }

    #[tokio::test]
    async fn test_missing_interface_reported() {
        let store = MemoryStore::new();
        store.add_interface_address("PortChannel0001", "10.0.0.56/31");

        let ctx = context();
        let outcome = reconciler(&store).run_cycle(&ctx).await.unwrap();

        assert_eq!(outcome.missed_interfaces(), keys(&["10.0.0.56/32"]).as_slice());
        assert_eq!(ctx.stage(), CheckStage::Failed);
    }

    #[tokio::test]
    async fn test_remove_event_credits_unaccounted_entry() {
        let store = MemoryStore::new();
        store.add_programmed_route("20.10.196.12/31");
        store.script_change(ChangeEvent::remove(key("20.10.196.12/31")));

        let outcome = reconciler(&store).run_cycle(&context()).await.unwrap();
        assert!(outcome.passed());
    }

    #[tokio::test]
    async fn test_store_failure_aborts_cycle() {
        let store = MemoryStore::new();
        store.fail(Database::AsicDb);

        let result = reconciler(&store).run_cycle(&context()).await;
        assert!(matches!(
            result,
            Err(crate::error::RouteCheckError::Store { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_before_snapshot() {
        let store = MemoryStore::new();
        let ctx = context();
        ctx.cancel();

        let result = reconciler(&store).run_cycle(&ctx).await;
        assert!(result.is_err());
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn test_debug_mode_dumps_key_sets() {
        let log = cycle_log(LogMode::Debug).await;
        assert!(log.contains("set=\"ROUTE_TABLE\""), "{}", log);
        assert!(log.contains("10.10.196.12/31"), "{}", log);
        assert!(log.contains("set=\"ASIC_ROUTE_ENTRY\""), "{}", log);
        assert!(log.contains("set=\"unaccounted after filters\""), "{}", log);
    }

    #[tokio::test]
    async fn test_default_mode_keeps_key_sets_out_of_log() {
        let log = cycle_log(LogMode::Err).await;
        assert!(log.contains("Initial diff"), "{}", log);
        assert!(!log.contains("set="), "{}", log);
    }

    #[tokio::test]
    async fn test_frr_check_requires_suppress_fib_pending() {
        let store = MemoryStore::new();
        let stuck = json!({
            "prefix": "10.1.0.0/24", "protocol": "bgp", "vrfName": "default",
            "selected": true, "offloaded": false
        });
        let frr = FrrConfig {
            enabled: true,
            retries: 1,
            ..FrrConfig::default()
        };

        let mut checker = reconciler(&store)
            .with_control_plane(Box::new(StaticRoutes(vec![stuck.clone()])), frr);

        let outcome = checker.run_cycle(&context()).await.unwrap();
        assert!(outcome.passed());

        store.set_device_metadata(fields::SUPPRESS_FIB_PENDING, "enabled");
        let outcome = checker.run_cycle(&context()).await.unwrap();
        assert_eq!(outcome.missed_frr_routes(), &[stuck]);
    }
}
