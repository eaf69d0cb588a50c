//! Key-value store access for the intended-state and programmed-state databases.
//!
//! # NIST Controls
//! - SC-8: Transmission Confidentiality - Database communication
//! - AC-3: Access Enforcement - Read-only access; route_check never writes
//!
//! The checker talks to three SONiC Redis databases:
//!
//! | database  | separator | tables read                                       |
//! |-----------|-----------|---------------------------------------------------|
//! | APPL_DB   | `:`       | ROUTE_TABLE, INTF_TABLE, NEIGH_TABLE, VNET_ROUTE_* |
//! | ASIC_DB   | `:`       | ASIC_STATE:SAI_OBJECT_TYPE_ROUTE_ENTRY             |
//! | CONFIG_DB | `\|`      | DEVICE_METADATA, MUX_CABLE                         |

mod memory;
mod redis_adapter;

pub use memory::MemoryStore;
pub use redis_adapter::{parse_keyspace_event, RedisChangeFeed, RedisStore};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

use crate::change_feed::ChangeFeed;
use crate::error::Result;

/// SONiC database selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Database {
    /// APPL_DB - intended state written by the routing and interface managers
    ApplDb,
    /// ASIC_DB - objects programmed into the forwarding hardware
    AsicDb,
    /// CONFIG_DB - device configuration
    ConfigDb,
}

impl Database {
    /// Separator between table name and key.
    pub fn separator(&self) -> char {
        match self {
            Database::ConfigDb => '|',
            Database::ApplDb | Database::AsicDb => ':',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Database::ApplDb => "APPL_DB",
            Database::AsicDb => "ASIC_DB",
            Database::ConfigDb => "CONFIG_DB",
        }
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field-value pairs of one hash entry.
pub type FieldValues = HashMap<String, String>;

/// One row of a table scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    /// Key with the `TABLE<sep>` prefix removed
    pub key: String,
    pub fields: FieldValues,
}

impl TableRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Read and subscribe access to one namespace's databases.
#[async_trait]
pub trait KeyValueStore: Send {
    /// Returns every key in `db` matching a glob pattern.
    async fn keys(&mut self, db: Database, pattern: &str) -> Result<Vec<String>>;

    /// Returns all fields of one hash key (empty if the key does not exist).
    async fn hgetall(&mut self, db: Database, key: &str) -> Result<FieldValues>;

    /// Opens a change-notification subscription on the programmed route table.
    ///
    /// Notifications are buffered from the moment this returns, so callers
    /// subscribe before scanning.
    async fn subscribe_programmed(&mut self) -> Result<Box<dyn ChangeFeed>>;

    /// Full scan of a logical table, sorted by key.
    async fn scan_table(&mut self, db: Database, table: &str) -> Result<Vec<TableRow>> {
        let prefix = format!("{}{}", table, db.separator());
        let mut keys = self.keys(db, &format!("{}*", prefix)).await?;
        keys.sort();

        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let fields = self.hgetall(db, &key).await?;
            let short_key = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
            rows.push(TableRow {
                key: short_key,
                fields,
            });
        }
        Ok(rows)
    }

    /// Reads a single entry of a logical table.
    async fn get_entry(&mut self, db: Database, table: &str, key: &str) -> Result<FieldValues> {
        let full_key = format!("{}{}{}", table, db.separator(), key);
        self.hgetall(db, &full_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators() {
        assert_eq!(Database::ApplDb.separator(), ':');
        assert_eq!(Database::AsicDb.separator(), ':');
        assert_eq!(Database::ConfigDb.separator(), '|');
    }

    #[tokio::test]
    async fn test_scan_table_strips_prefix_and_sorts() {
        let store = MemoryStore::new();
        store.insert(Database::ConfigDb, "MUX_CABLE|Ethernet8", [("state", "auto")]);
        store.insert(Database::ConfigDb, "MUX_CABLE|Ethernet4", [("state", "active")]);
        store.insert(Database::ConfigDb, "PORT|Ethernet4", [("mtu", "9100")]);

        let mut handle = store.clone();
        let rows = handle
            .scan_table(Database::ConfigDb, "MUX_CABLE")
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "Ethernet4");
        assert_eq!(rows[0].get("state"), Some("active"));
        assert_eq!(rows[1].key, "Ethernet8");
    }

    #[tokio::test]
    async fn test_get_entry() {
        let store = MemoryStore::new();
        store.insert(
            Database::ConfigDb,
            "DEVICE_METADATA|localhost",
            [("subtype", "DualToR")],
        );

        let mut handle = store.clone();
        let entry = handle
            .get_entry(Database::ConfigDb, "DEVICE_METADATA", "localhost")
            .await
            .unwrap();
        assert_eq!(entry.get("subtype").map(String::as_str), Some("DualToR"));

        let missing = handle
            .get_entry(Database::ConfigDb, "DEVICE_METADATA", "peer")
            .await
            .unwrap();
        assert!(missing.is_empty());
    }
}
