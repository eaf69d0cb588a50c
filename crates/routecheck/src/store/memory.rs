//! In-memory store used by tests and dry runs.
//!
//! Cloning a [`MemoryStore`] yields another handle onto the same data, so a
//! test can keep one handle for seeding while the reconciler owns another.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::{Database, FieldValues, KeyValueStore};
use crate::change_feed::{ChangeFeed, ChannelChangeFeed};
use crate::error::{Result, RouteCheckError};
use crate::tables::{
    asic_route_entry_key, fields, APP_INTF_TABLE_NAME, APP_NEIGH_TABLE_NAME, APP_ROUTE_TABLE_NAME,
    APP_VNET_RT_TABLE_NAME, APP_VNET_RT_TUNNEL_TABLE_NAME, CFG_DEVICE_METADATA_TABLE_NAME,
    CFG_MUX_CABLE_TABLE_NAME, DEVICE_METADATA_LOCALHOST_KEY,
};
use crate::types::ChangeEvent;

#[derive(Default)]
struct MemoryInner {
    data: HashMap<Database, BTreeMap<String, FieldValues>>,
    /// Events handed to the next subscription
    scripted: Vec<ChangeEvent>,
    failing: HashSet<Database>,
    latency: Option<Duration>,
    /// Access log ("subscribe", "keys APPL_DB ROUTE_TABLE:*", ...)
    operations: Vec<String>,
}

/// Shared in-memory key-value store
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("keys", &inner.data.values().map(BTreeMap::len).sum::<usize>())
            .field("scripted", &inner.scripted.len())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a hash key, replacing any previous fields.
    pub fn insert<I, K, V>(&self, db: Database, key: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields: FieldValues = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.inner
            .lock()
            .data
            .entry(db)
            .or_default()
            .insert(key.into(), fields);
    }

    /// Deletes a hash key.
    pub fn remove(&self, db: Database, key: &str) {
        if let Some(table) = self.inner.lock().data.get_mut(&db) {
            table.remove(key);
        }
    }

    /// Adds an APPL_DB ROUTE_TABLE entry. `prefix` may carry a `Vrf*:` qualifier.
    pub fn add_intended_route(&self, prefix: &str, ifname: &str, nexthop: &str) {
        self.insert(
            Database::ApplDb,
            format!("{}:{}", APP_ROUTE_TABLE_NAME, prefix),
            [(fields::IFNAME, ifname), (fields::NEXTHOP, nexthop)],
        );
    }

    /// Adds an APPL_DB INTF_TABLE address entry.
    pub fn add_interface_address(&self, ifname: &str, address: &str) {
        self.insert(
            Database::ApplDb,
            format!("{}:{}:{}", APP_INTF_TABLE_NAME, ifname, address),
            [("scope", "global"), ("family", family_of(address))],
        );
    }

    /// Adds an ASIC_DB route entry for `dest`.
    pub fn add_programmed_route(&self, dest: &str) {
        self.insert(
            Database::AsicDb,
            asic_route_entry_key(dest),
            [("SAI_ROUTE_ENTRY_ATTR_PACKET_ACTION", "SAI_PACKET_ACTION_FORWARD")],
        );
    }

    /// Removes the ASIC_DB route entry for `dest`.
    pub fn remove_programmed_route(&self, dest: &str) {
        self.remove(Database::AsicDb, &asic_route_entry_key(dest));
    }

    /// Adds an APPL_DB VNET_ROUTE_TUNNEL_TABLE entry.
    pub fn add_vnet_tunnel_route(&self, vnet: &str, prefix: &str, endpoint: &str) {
        self.insert(
            Database::ApplDb,
            format!("{}:{}:{}", APP_VNET_RT_TUNNEL_TABLE_NAME, vnet, prefix),
            [("endpoint", endpoint)],
        );
    }

    /// Adds an APPL_DB VNET_ROUTE_TABLE entry.
    pub fn add_vnet_route(&self, vnet: &str, prefix: &str, ifname: &str) {
        self.insert(
            Database::ApplDb,
            format!("{}:{}:{}", APP_VNET_RT_TABLE_NAME, vnet, prefix),
            [(fields::IFNAME, ifname)],
        );
    }

    /// Sets one field of CONFIG_DB `DEVICE_METADATA|localhost`.
    pub fn set_device_metadata(&self, field: &str, value: &str) {
        let key = format!(
            "{}|{}",
            CFG_DEVICE_METADATA_TABLE_NAME, DEVICE_METADATA_LOCALHOST_KEY
        );
        self.inner
            .lock()
            .data
            .entry(Database::ConfigDb)
            .or_default()
            .entry(key)
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    /// Adds an APPL_DB NEIGH_TABLE entry.
    pub fn add_neighbor(&self, ifname: &str, ip: &str, mac: &str) {
        self.insert(
            Database::ApplDb,
            format!("{}:{}:{}", APP_NEIGH_TABLE_NAME, ifname, ip),
            [(fields::NEIGH, mac), ("family", family_of(ip))],
        );
    }

    /// Adds a CONFIG_DB MUX_CABLE entry with a SoC IPv4 address.
    pub fn add_mux_cable(&self, port: &str, soc_ipv4: &str) {
        self.insert(
            Database::ConfigDb,
            format!("{}|{}", CFG_MUX_CABLE_TABLE_NAME, port),
            [("state", "auto"), (fields::SOC_IPV4, soc_ipv4)],
        );
    }

    /// Queues a change notification for the next subscription.
    pub fn script_change(&self, event: ChangeEvent) {
        self.inner.lock().scripted.push(event);
    }

    /// Makes every access to `db` fail with a store error.
    pub fn fail(&self, db: Database) {
        self.inner.lock().failing.insert(db);
    }

    /// Clears injected failures and latency.
    pub fn heal(&self) {
        let mut inner = self.inner.lock();
        inner.failing.clear();
        inner.latency = None;
    }

    /// Delays every read by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = Some(latency);
    }

    /// Returns the access log.
    pub fn operations(&self) -> Vec<String> {
        self.inner.lock().operations.clone()
    }

    /// Logs an access and returns the configured latency, or fails.
    fn access(&self, db: Database, operation: String) -> Result<Option<Duration>> {
        let mut inner = self.inner.lock();
        if inner.failing.contains(&db) {
            return Err(RouteCheckError::store(
                operation,
                format!("{} unavailable", db),
            ));
        }
        inner.operations.push(operation);
        Ok(inner.latency)
    }
}

fn family_of(address: &str) -> &'static str {
    if address.contains(':') {
        "IPv6"
    } else {
        "IPv4"
    }
}

/// Matches the subset of redis globs the readers use: exact or trailing `*`.
fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn keys(&mut self, db: Database, pattern: &str) -> Result<Vec<String>> {
        if let Some(latency) = self.access(db, format!("keys {} {}", db, pattern))? {
            tokio::time::sleep(latency).await;
        }

        let inner = self.inner.lock();
        Ok(inner
            .data
            .get(&db)
            .map(|table| {
                table
                    .keys()
                    .filter(|key| glob_match(pattern, key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hgetall(&mut self, db: Database, key: &str) -> Result<FieldValues> {
        let inner = self.inner.lock();
        if inner.failing.contains(&db) {
            return Err(RouteCheckError::store("hgetall", format!("{} unavailable", db)));
        }
        Ok(inner
            .data
            .get(&db)
            .and_then(|table| table.get(key))
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe_programmed(&mut self) -> Result<Box<dyn ChangeFeed>> {
        self.access(Database::AsicDb, "subscribe".to_string())?;

        let events = std::mem::take(&mut self.inner.lock().scripted);
        Ok(Box::new(ChannelChangeFeed::closed_with(events)))
    }
}
