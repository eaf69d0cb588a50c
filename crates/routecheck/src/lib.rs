//! Route Consistency Checker for SONiC
//!
//! This crate provides `route_check`, which verifies that the routes the
//! control plane intends (APPL_DB `ROUTE_TABLE` and `INTF_TABLE`) match the
//! routes actually programmed into the switch ASIC (ASIC_DB route entries).
//!
//! A cycle snapshots both sides, diffs them, and only when the diff is not
//! empty waits briefly on the ASIC_DB change feed to credit routes that were
//! still in flight. What remains is run through the exclusion pipeline
//! (management interfaces, fabric neighbors, default routes, VNET routes and
//! dual-ToR standby neighbors) before it is reported.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AU-3 | Content of Audit Records | Structured logging with namespace and stage |
//! | AU-9 | Protection of Audit Information | Optional mirroring to syslog |
//! | CM-6 | Configuration Settings | Validated TOML configuration |
//! | SC-8 | Transmission Integrity | Redis access through connection managers |
//! | SI-4 | System Monitoring | Periodic consistency checks with a watchdog |
//! | SI-7 | Software and Information Integrity | Intended vs programmed route comparison |
//! | SI-10 | Input Validation | Route keys parsed and normalized before comparison |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────────────┐     ┌──────────────┐
//! │  APPL_DB        │     │       route_check        │     │  stdout      │
//! │  ROUTE_TABLE    │────▶│  SnapshotReader          │     │  (JSON)      │
//! │  INTF_TABLE     │     │        │                 │     └──────▲───────┘
//! │  VNET_*/NEIGH   │     │        ▼                 │            │
//! ├─────────────────┤     │   diff_sorted            │     ┌──────┴───────┐
//! │  ASIC_DB        │────▶│        │ (dirty only)    │     │  Reporter    │
//! │  ROUTE_ENTRY    │     │        ▼                 │────▶│  tracing /   │
//! │  keyspace feed  │────▶│  ChangeFeedCollector     │     │  syslog      │
//! ├─────────────────┤     │        │                 │     └──────────────┘
//! │  CONFIG_DB      │────▶│  ExclusionPipeline       │
//! │  DEVICE_METADATA│     │        │                 │
//! │  MUX_CABLE      │     │        ▼                 │
//! └─────────────────┘     │  FRR cross-check (vtysh) │
//!                         │                          │
//!                         │  Watchdog / Scheduler    │
//!                         └──────────────────────────┘
//! ```

pub mod change_feed;
pub mod config;
pub mod diff;
pub mod error;
pub mod filters;
pub mod frr;
pub mod logging;
pub mod reconciler;
pub mod report;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod tables;
pub mod types;
pub mod watchdog;

pub use change_feed::{ChangeFeed, ChangeFeedCollector, ChannelChangeFeed, DrainedChanges};
pub use config::{CheckConfig, DatabaseConfig, FrrConfig, RouteCheckConfig};
pub use error::{Result, RouteCheckError};
pub use filters::{ExclusionFilter, ExclusionPipeline, FilterContext, LocalInterfaces};
pub use frr::{ControlPlaneRoutes, VtyshRoutes};
pub use reconciler::{CheckStage, Reconciler};
pub use report::{CheckOutcome, CycleReport, LogMode, Reporter, ReportingConfig};
pub use scheduler::{CheckCycle, RouteChecker, Scheduler};
pub use snapshot::{Snapshot, SnapshotReader};
pub use store::{Database, KeyValueStore, MemoryStore, RedisStore};
pub use types::{ChangeEvent, ChangeOp, IntendedRoute, RouteKey};
pub use watchdog::{CycleContext, Watchdog};
