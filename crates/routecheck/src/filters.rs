//! Exclusion pipeline: removes expected mismatches from a diff result.
//!
//! Each stage is an [`ExclusionFilter`] that sees only the candidates left by
//! the stages before it. Stages decide per key, so the order of their input
//! never matters. The tables the stages need are loaded once per cycle into a
//! [`FilterContext`].

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::IpAddr;
use tracing::{debug, instrument, warn};

use crate::config::{load_chassis_local_interfaces, CheckConfig};
use crate::error::{Result, RouteCheckError};
use crate::store::{Database, KeyValueStore};
use crate::tables::{
    fields, APP_NEIGH_TABLE_NAME, APP_VNET_RT_TABLE_NAME, APP_VNET_RT_TUNNEL_TABLE_NAME,
    CFG_DEVICE_METADATA_TABLE_NAME, CFG_MUX_CABLE_TABLE_NAME, DEVICE_METADATA_LOCALHOST_KEY,
    DUAL_TOR_SUBTYPE,
};
use crate::types::{IntendedRoute, MacAddress, RouteKey};

/// Interfaces whose routes are never programmed into the forwarding table
#[derive(Debug, Clone, Default)]
pub struct LocalInterfaces {
    /// Exact names; a route over one of these is always benign
    names: HashSet<String>,
    /// Loopback-style patterns; benign only with an unspecified next-hop
    patterns: Vec<Regex>,
}

impl LocalInterfaces {
    /// Builds the interface set from configuration, including any
    /// chassis-internal interfaces listed in chassisdb.conf.
    pub fn from_config(config: &CheckConfig) -> Result<Self> {
        let mut names: HashSet<String> = config.local_interfaces.iter().cloned().collect();

        if let Some(path) = &config.chassisdb_conf {
            let chassis = load_chassis_local_interfaces(path)?;
            debug!(
                count = chassis.len(),
                path = %path.display(),
                "Loaded chassis-internal interfaces"
            );
            names.extend(chassis);
        }

        let patterns = config
            .local_interface_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
                    RouteCheckError::Config(format!("bad local interface pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { names, patterns })
    }

    pub fn is_management(&self, ifname: &str) -> bool {
        self.names.contains(ifname)
    }

    pub fn is_loopback_style(&self, ifname: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(ifname))
    }
}

/// Everything the filter stages consult, read once per cycle
#[derive(Debug, Clone, Default)]
pub struct FilterContext {
    /// Intended routes by key; stages 1 and 2 look up egress details here
    pub intended_routes: BTreeMap<RouteKey, IntendedRoute>,
    pub local_interfaces: LocalInterfaces,
    pub fabric_interface_prefix: String,
    /// Keys from VNET_ROUTE_TABLE and VNET_ROUTE_TUNNEL_TABLE
    pub vnet_routes: BTreeSet<RouteKey>,
    /// DEVICE_METADATA subtype is dual-ToR
    pub dual_tor: bool,
    /// Host keys of neighbors with the all-zero MAC
    pub standby_neighbors: BTreeSet<RouteKey>,
    /// MUX_CABLE SoC addresses
    pub soc_addresses: BTreeSet<RouteKey>,
}

impl FilterContext {
    /// Creates a context with no auxiliary tables loaded.
    pub fn new(
        intended_routes: BTreeMap<RouteKey, IntendedRoute>,
        local_interfaces: LocalInterfaces,
        fabric_interface_prefix: impl Into<String>,
    ) -> Self {
        Self {
            intended_routes,
            local_interfaces,
            fabric_interface_prefix: fabric_interface_prefix.into(),
            ..Self::default()
        }
    }

    /// Reads device metadata and the VNET, neighbor and mux tables.
    ///
    /// Neighbor and mux tables are only read on dual-ToR devices.
    #[instrument(skip_all)]
    pub async fn load<S: KeyValueStore + ?Sized>(
        store: &mut S,
        intended_routes: BTreeMap<RouteKey, IntendedRoute>,
        local_interfaces: LocalInterfaces,
        fabric_interface_prefix: &str,
    ) -> Result<Self> {
        let mut ctx = Self::new(intended_routes, local_interfaces, fabric_interface_prefix);

        let metadata = store
            .get_entry(
                Database::ConfigDb,
                CFG_DEVICE_METADATA_TABLE_NAME,
                DEVICE_METADATA_LOCALHOST_KEY,
            )
            .await?;
        ctx.dual_tor = metadata
            .get(fields::SUBTYPE)
            .is_some_and(|s| s.eq_ignore_ascii_case(DUAL_TOR_SUBTYPE));

        for table in [APP_VNET_RT_TABLE_NAME, APP_VNET_RT_TUNNEL_TABLE_NAME] {
            for row in store.scan_table(Database::ApplDb, table).await? {
                if let Some(key) = parse_vnet_route_key(&row.key) {
                    ctx.vnet_routes.insert(key);
                }
            }
        }

        if ctx.dual_tor {
            for row in store.scan_table(Database::ApplDb, APP_NEIGH_TABLE_NAME).await? {
                let zero_mac = row
                    .get(fields::NEIGH)
                    .and_then(MacAddress::parse)
                    .is_some_and(|mac| mac.is_zero());
                if !zero_mac {
                    continue;
                }
                if let Some(key) = parse_neighbor_key(&row.key) {
                    ctx.standby_neighbors.insert(key);
                }
            }

            for row in store
                .scan_table(Database::ConfigDb, CFG_MUX_CABLE_TABLE_NAME)
                .await?
            {
                for field in [fields::SOC_IPV4, fields::SOC_IPV6] {
                    let Some(value) = row.get(field) else {
                        continue;
                    };
                    match parse_soc_address(value) {
                        Some(key) => {
                            ctx.soc_addresses.insert(key);
                        }
                        None => warn!(port = %row.key, value, "Ignoring unparsable SoC address"),
                    }
                }
            }
        }

        debug!(
            dual_tor = ctx.dual_tor,
            vnet_routes = ctx.vnet_routes.len(),
            standby_neighbors = ctx.standby_neighbors.len(),
            soc_addresses = ctx.soc_addresses.len(),
            "Filter context loaded"
        );
        Ok(ctx)
    }
}

/// `<vnet>:<prefix>` to the prefix key.
fn parse_vnet_route_key(key: &str) -> Option<RouteKey> {
    let (_, prefix) = key.split_once(':')?;
    RouteKey::parse(prefix).ok()
}

/// `<ifname>:<ip>` to the neighbor's host key.
fn parse_neighbor_key(key: &str) -> Option<RouteKey> {
    let (_, ip) = key.split_once(':')?;
    ip.parse::<IpAddr>().ok().map(RouteKey::host)
}

/// `192.168.0.3/25` to `192.168.0.3/32`: the SoC address is installed as a
/// host route whatever mask MUX_CABLE carries.
fn parse_soc_address(value: &str) -> Option<RouteKey> {
    let addr = value.trim().split('/').next()?;
    addr.parse::<IpAddr>().ok().map(RouteKey::host)
}

/// One stage of the exclusion pipeline.
pub trait ExclusionFilter: Send + Sync {
    /// Stage name for logging.
    fn name(&self) -> &'static str;

    /// Returns false to skip the stage for this device.
    fn is_active(&self, _ctx: &FilterContext) -> bool {
        true
    }

    /// Returns true if `key` is an expected mismatch.
    fn is_benign(&self, key: &RouteKey, ctx: &FilterContext) -> bool;

    /// Returns the candidates this stage does not explain.
    fn apply(&self, candidates: BTreeSet<RouteKey>, ctx: &FilterContext) -> BTreeSet<RouteKey> {
        if !self.is_active(ctx) {
            return candidates;
        }
        candidates
            .into_iter()
            .filter(|key| {
                let benign = self.is_benign(key, ctx);
                if benign {
                    debug!(stage = self.name(), %key, "Excluded");
                }
                !benign
            })
            .collect()
    }
}

/// Routes over management interfaces, or over loopback-style interfaces
/// with an unspecified next-hop.
pub struct LocalInterfaceFilter;

impl ExclusionFilter for LocalInterfaceFilter {
    fn name(&self) -> &'static str {
        "local-interface"
    }

    fn is_benign(&self, key: &RouteKey, ctx: &FilterContext) -> bool {
        let Some(route) = ctx.intended_routes.get(key) else {
            return false;
        };
        let local = &ctx.local_interfaces;

        if route.ifnames.iter().any(|ifname| local.is_management(ifname)) {
            return true;
        }
        route.has_unspecified_nexthop()
            && route.ifnames.iter().any(|ifname| local.is_loopback_style(ifname))
    }
}

/// Host routes to VOQ chassis neighbors over fabric-internal interfaces.
pub struct FabricNeighborFilter;

impl ExclusionFilter for FabricNeighborFilter {
    fn name(&self) -> &'static str {
        "fabric-neighbor"
    }

    fn is_active(&self, ctx: &FilterContext) -> bool {
        !ctx.fabric_interface_prefix.is_empty()
    }

    fn is_benign(&self, key: &RouteKey, ctx: &FilterContext) -> bool {
        if !key.is_host() {
            return false;
        }
        let Some(route) = ctx.intended_routes.get(key) else {
            return false;
        };
        !route.nexthops.is_empty()
            && route.has_unspecified_nexthop()
            && route
                .ifnames
                .iter()
                .any(|ifname| ifname.starts_with(&ctx.fabric_interface_prefix))
    }
}

pub struct DefaultRouteFilter;

impl ExclusionFilter for DefaultRouteFilter {
    fn name(&self) -> &'static str {
        "default-route"
    }

    fn is_benign(&self, key: &RouteKey, _ctx: &FilterContext) -> bool {
        key.is_default_route()
    }
}

pub struct VnetRouteFilter;

impl ExclusionFilter for VnetRouteFilter {
    fn name(&self) -> &'static str {
        "vnet-route"
    }

    fn is_benign(&self, key: &RouteKey, ctx: &FilterContext) -> bool {
        ctx.vnet_routes.contains(key)
    }
}

/// Host routes of dual-ToR neighbors currently reachable only over the
/// standby tunnel (zero MAC in NEIGH_TABLE).
pub struct StandbyNeighborFilter;

impl ExclusionFilter for StandbyNeighborFilter {
    fn name(&self) -> &'static str {
        "standby-neighbor"
    }

    fn is_active(&self, ctx: &FilterContext) -> bool {
        ctx.dual_tor
    }

    fn is_benign(&self, key: &RouteKey, ctx: &FilterContext) -> bool {
        key.is_host() && ctx.standby_neighbors.contains(key)
    }
}

/// MUX_CABLE SoC addresses on dual-ToR devices.
pub struct SocAddressFilter;

impl ExclusionFilter for SocAddressFilter {
    fn name(&self) -> &'static str {
        "soc-address"
    }

    fn is_active(&self, ctx: &FilterContext) -> bool {
        ctx.dual_tor && !ctx.soc_addresses.is_empty()
    }

    fn is_benign(&self, key: &RouteKey, ctx: &FilterContext) -> bool {
        ctx.soc_addresses.contains(key)
    }
}

/// Ordered chain of exclusion stages
pub struct ExclusionPipeline {
    stages: Vec<Box<dyn ExclusionFilter>>,
}

impl ExclusionPipeline {
    pub fn new(stages: Vec<Box<dyn ExclusionFilter>>) -> Self {
        Self { stages }
    }

    /// The six standard stages in their required order.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(LocalInterfaceFilter),
            Box::new(FabricNeighborFilter),
            Box::new(DefaultRouteFilter),
            Box::new(VnetRouteFilter),
            Box::new(StandbyNeighborFilter),
            Box::new(SocAddressFilter),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage; the result is always a subset of `candidates`.
    pub fn apply(&self, candidates: BTreeSet<RouteKey>, ctx: &FilterContext) -> BTreeSet<RouteKey> {
        let before = candidates.len();
        let remaining = self
            .stages
            .iter()
            .fold(candidates, |set, stage| stage.apply(set, ctx));

        debug!(before, after = remaining.len(), "Exclusion pipeline applied");
        remaining
    }
}

impl Default for ExclusionPipeline {
    fn default() -> Self {
        Self::standard()
    }
}
