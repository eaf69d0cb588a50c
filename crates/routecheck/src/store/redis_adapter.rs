//! Redis-backed store for the SONiC databases
//!
//! One [`ConnectionManager`] per database index, opened on first use and kept
//! for later cycles. The programmed-route change feed is a keyspace
//! notification subscription on ASIC_DB (SONiC's redis runs with
//! `notify-keyspace-events AKE`).

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use super::{Database, FieldValues, KeyValueStore};
use crate::change_feed::ChangeFeed;
use crate::config::DatabaseConfig;
use crate::error::{Result, RouteCheckError};
use crate::snapshot::parse_asic_route_key;
use crate::tables::{ASIC_ROUTE_ENTRY_PREFIX, ASIC_STATE_TABLE_NAME};
use crate::types::ChangeEvent;

/// Redis store for one namespace
pub struct RedisStore {
    namespace: String,
    config: DatabaseConfig,
    connections: HashMap<Database, ConnectionManager>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .field("open_connections", &self.connections.len())
            .finish()
    }
}

impl RedisStore {
    /// Creates a store; no connection is made until the first read.
    pub fn new(namespace: impl Into<String>, config: DatabaseConfig) -> Self {
        Self {
            namespace: namespace.into(),
            config,
            connections: HashMap::new(),
        }
    }

    fn db_number(&self, db: Database) -> u32 {
        match db {
            Database::ApplDb => self.config.appl_db_number,
            Database::AsicDb => self.config.asic_db_number,
            Database::ConfigDb => self.config.config_db_number,
        }
    }

    /// Returns the connection URI for a database.
    fn url(&self, db: Database) -> String {
        let index = self.db_number(db);
        match &self.config.unix_socket {
            Some(path) => format!("redis+unix://{}?db={}", path.display(), index),
            None => format!(
                "redis://{}:{}/{}",
                self.config.redis_host, self.config.redis_port, index
            ),
        }
    }

    fn client(&self, db: Database) -> Result<Client> {
        let url = self.url(db);
        Client::open(url.as_str())
            .map_err(|e| RouteCheckError::store("open", format!("{} ({}): {}", db, url, e)))
    }

    async fn connection(&mut self, db: Database) -> Result<&mut ConnectionManager> {
        if !self.connections.contains_key(&db) {
            let client = self.client(db)?;
            let manager = ConnectionManager::new(client)
                .await
                .map_err(|e| RouteCheckError::store("connect", format!("{}: {}", db, e)))?;
            info!(namespace = %self.namespace, %db, "Connected to Redis");
            self.connections.insert(db, manager);
        }
        self.connections
            .get_mut(&db)
            .ok_or_else(|| RouteCheckError::store("connect", format!("{}: no connection", db)))
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn keys(&mut self, db: Database, pattern: &str) -> Result<Vec<String>> {
        let conn = self.connection(db).await?;
        let keys: Vec<String> = conn
            .keys(pattern)
            .await
            .map_err(|e| RouteCheckError::store("keys", format!("{} {}: {}", db, pattern, e)))?;
        debug!(count = keys.len(), "KEYS");
        Ok(keys)
    }

    async fn hgetall(&mut self, db: Database, key: &str) -> Result<FieldValues> {
        let conn = self.connection(db).await?;
        conn.hgetall(key)
            .await
            .map_err(|e| RouteCheckError::store("hgetall", format!("{} {}: {}", db, key, e)))
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn subscribe_programmed(&mut self) -> Result<Box<dyn ChangeFeed>> {
        let index = self.db_number(Database::AsicDb);
        let pattern = format!(
            "__keyspace@{}__:{}:{}:*",
            index, ASIC_STATE_TABLE_NAME, ASIC_ROUTE_ENTRY_PREFIX
        );

        let client = self.client(Database::AsicDb)?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| RouteCheckError::store("subscribe", e))?;
        pubsub
            .psubscribe(&pattern)
            .await
            .map_err(|e| RouteCheckError::store("psubscribe", e))?;

        debug!(pattern, "Subscribed to programmed route notifications");
        Ok(Box::new(RedisChangeFeed { pubsub }))
    }
}

/// Keyspace-notification feed over ASIC_DB route entries
pub struct RedisChangeFeed {
    pubsub: PubSub,
}

#[async_trait]
impl ChangeFeed for RedisChangeFeed {
    async fn next_event(&mut self) -> Result<Option<ChangeEvent>> {
        loop {
            let msg = {
                let mut stream = self.pubsub.on_message();
                stream.next().await
            };
            let Some(msg) = msg else {
                return Ok(None);
            };

            let operation: String = msg.get_payload()?;
            if let Some(event) = parse_keyspace_event(msg.get_channel_name(), &operation) {
                return Ok(Some(event));
            }
        }
    }
}

/// Turns a keyspace notification into a route change event.
///
/// The channel is `__keyspace@<db>__:ASIC_STATE:SAI_OBJECT_TYPE_ROUTE_ENTRY:<json>`
/// and the payload is the redis command (`hset`, `del`, ...). Notifications
/// for other commands, other tables or link-local destinations yield `None`.
pub fn parse_keyspace_event(channel: &str, operation: &str) -> Option<ChangeEvent> {
    let (_, key) = channel.split_once("__:")?;
    let route = parse_asic_route_key(key)?;
    if route.is_link_local() {
        return None;
    }

    match operation {
        "hset" | "hmset" | "hsetnx" => Some(ChangeEvent::add(route)),
        "del" => Some(ChangeEvent::remove(route)),
        other => {
            if other != "expire" {
                warn!(operation = other, key, "Ignoring unexpected keyspace operation");
            }
            None
        }
    }
}
