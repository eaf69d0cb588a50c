//! Point-in-time reads of the intended and programmed route tables.
//!
//! Every read is a full table scan. Keys are normalized into [`RouteKey`]s
//! here; link-local destinations are dropped on both sides because the
//! hardware never programs them.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::store::{Database, KeyValueStore, TableRow};
use crate::tables::{
    fields, APP_INTF_TABLE_NAME, APP_ROUTE_TABLE_NAME, ASIC_ROUTE_ENTRY_PREFIX,
    ASIC_STATE_TABLE_NAME, VRF_NAME_PREFIX,
};
use crate::types::{IntendedRoute, RouteKey};

/// Interfaces whose INTF_TABLE addresses are never installed as host routes
const UNPROGRAMMED_INTERFACES: [&str; 2] = ["eth0", "docker0"];

/// `ASIC_STATE:SAI_OBJECT_TYPE_ROUTE_ENTRY:`
static ASIC_ROUTE_KEY_PREFIX: Lazy<String> =
    Lazy::new(|| format!("{}:{}:", ASIC_STATE_TABLE_NAME, ASIC_ROUTE_ENTRY_PREFIX));

/// The three tables captured at the start of a cycle
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Intended routes keyed by destination
    pub routes: BTreeMap<RouteKey, IntendedRoute>,
    /// Host keys of locally owned interface addresses
    pub interfaces: BTreeSet<RouteKey>,
    /// Destinations programmed into the forwarding hardware
    pub programmed: BTreeSet<RouteKey>,
}

/// Reads snapshots from a store
pub struct SnapshotReader<'a, S: KeyValueStore + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: KeyValueStore + ?Sized> SnapshotReader<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Reads all three tables; any store error fails the whole snapshot.
    pub async fn take(&mut self) -> Result<Snapshot> {
        let programmed = self.read_programmed_routes().await?;
        let routes = self.read_intended_routes().await?;
        let interfaces = self.read_intended_interface_addresses().await?;

        debug!(
            routes = routes.len(),
            interfaces = interfaces.len(),
            programmed = programmed.len(),
            "Snapshot taken"
        );
        Ok(Snapshot {
            routes,
            interfaces,
            programmed,
        })
    }

    /// Scans APPL_DB ROUTE_TABLE.
    #[instrument(skip(self))]
    pub async fn read_intended_routes(&mut self) -> Result<BTreeMap<RouteKey, IntendedRoute>> {
        let rows = self
            .store
            .scan_table(Database::ApplDb, APP_ROUTE_TABLE_NAME)
            .await?;

        let mut routes = BTreeMap::new();
        for row in rows {
            let Some(key) = parse_route_table_key(&row.key) else {
                continue;
            };
            let route = intended_route_from_row(key, &row);
            routes.insert(route.key.clone(), route);
        }
        Ok(routes)
    }

    /// Scans APPL_DB INTF_TABLE, returning the host key of every address.
    #[instrument(skip(self))]
    pub async fn read_intended_interface_addresses(&mut self) -> Result<BTreeSet<RouteKey>> {
        let pattern = format!("{}:*", APP_INTF_TABLE_NAME);
        let keys = self.store.keys(Database::ApplDb, &pattern).await?;

        Ok(keys
            .iter()
            .filter_map(|k| k.strip_prefix(&pattern[..pattern.len() - 1]))
            .filter_map(parse_intf_table_key)
            .collect())
    }

    /// Scans ASIC_DB route entries.
    #[instrument(skip(self))]
    pub async fn read_programmed_routes(&mut self) -> Result<BTreeSet<RouteKey>> {
        let pattern = format!("{}*", ASIC_ROUTE_KEY_PREFIX.as_str());
        let keys = self.store.keys(Database::AsicDb, &pattern).await?;

        Ok(keys
            .iter()
            .filter_map(|k| parse_asic_route_key(k))
            .filter(|key| !key.is_link_local())
            .collect())
    }
}

/// Parses a ROUTE_TABLE key (without the table prefix).
///
/// Accepts `<prefix>` and `<Vrf...>:<prefix>`; the VRF qualifier is dropped.
/// Link-local and unparsable keys yield `None`.
pub fn parse_route_table_key(key: &str) -> Option<RouteKey> {
    let prefix = if key.starts_with(VRF_NAME_PREFIX) {
        key.split_once(':').map(|(_, rest)| rest)?
    } else {
        key
    };

    match RouteKey::parse(prefix) {
        Ok(route) if route.is_link_local() => None,
        Ok(route) => Some(route),
        Err(_) => {
            warn!(key, "Skipping unparsable ROUTE_TABLE key");
            None
        }
    }
}

fn intended_route_from_row(key: RouteKey, row: &TableRow) -> IntendedRoute {
    let mut route = IntendedRoute::new(key);

    route.ifnames = row
        .get(fields::IFNAME)
        .map(split_list)
        .unwrap_or_default()
        .into_iter()
        .map(String::from)
        .collect();

    route.nexthops = row
        .get(fields::NEXTHOP)
        .map(split_list)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|nh| match nh.parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(_) => {
                warn!(route = %route.key, nexthop = nh, "Ignoring unparsable next-hop");
                None
            }
        })
        .collect();

    route
}

fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parses an INTF_TABLE key (without the table prefix) into the host key of
/// the interface address.
///
/// `<ifname>` rows (no address) and management interfaces yield `None`.
pub fn parse_intf_table_key(key: &str) -> Option<RouteKey> {
    let (ifname, address) = key.split_once(':')?;
    if UNPROGRAMMED_INTERFACES.contains(&ifname) {
        return None;
    }

    let addr_part = address.split('/').next().unwrap_or(address);
    match addr_part.parse::<IpAddr>() {
        Ok(addr) => {
            let host = RouteKey::host(addr);
            (!host.is_link_local()).then_some(host)
        }
        Err(_) => {
            warn!(key, "Skipping unparsable INTF_TABLE key");
            None
        }
    }
}

#[derive(Deserialize)]
struct AsicRouteEntryKey {
    dest: String,
}

/// Extracts the destination from a full ASIC_DB route entry key
/// (`ASIC_STATE:SAI_OBJECT_TYPE_ROUTE_ENTRY:{"dest":...}`).
pub fn parse_asic_route_key(key: &str) -> Option<RouteKey> {
    let json = key.strip_prefix(ASIC_ROUTE_KEY_PREFIX.as_str())?;

    let entry: AsicRouteEntryKey = match serde_json::from_str(json) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(key, error = %e, "Skipping malformed ASIC route entry key");
            return None;
        }
    };

    match RouteKey::parse(&entry.dest) {
        Ok(route) => Some(route),
        Err(_) => {
            warn!(key, dest = %entry.dest, "Skipping ASIC route entry with bad destination");
            None
        }
    }
}
