//! Database access for fcd.
//!
//! The daemon reads two logical stores:
//! - CONFIG_DB, through [`ConfigStore`]: the user's session rows and the
//!   PORT table.
//! - ASIC_DB, through [`StateStore`]: the SAI objects orchagent created,
//!   walked to find the path to the collector.
//!
//! [`RedisStore`] is the production implementation. [`MemoryDb`] keeps
//! everything in a map and is used by the tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::error::FcdResult;

/// Field/value pairs of one hash.
pub type FieldMap = HashMap<String, String>;

/// CONFIG_DB key separator.
pub const CONFIG_DB_SEPARATOR: char = '|';

/// Read access to the desired-config store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Lists the keys of `table` (without the table prefix).
    async fn get_keys(&self, table: &str) -> FcdResult<Vec<String>>;

    /// Reads one row. A missing row is an empty map.
    async fn get_entry(&self, table: &str, key: &str) -> FcdResult<FieldMap>;
}

/// Read access to the device-state store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Lists keys matching a Redis glob pattern.
    async fn keys(&self, pattern: &str) -> FcdResult<Vec<String>>;

    /// Reads all fields of a hash. A missing key is an empty map.
    async fn get_all(&self, key: &str) -> FcdResult<FieldMap>;
}

/// Normalizes CONFIG_DB list field names (`ports@` -> `ports`).
fn normalize_fields(raw: FieldMap) -> FieldMap {
    raw.into_iter()
        .map(|(field, value)| match field.strip_suffix('@') {
            Some(name) => (name.to_string(), value),
            None => (field, value),
        })
        .collect()
}

/// Redis-backed store bound to one database index.
#[derive(Clone)]
pub struct RedisStore {
    db: i64,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to database `db` on `host:port`.
    #[instrument(skip_all)]
    pub async fn connect(host: &str, port: u16, db: i64) -> FcdResult<Self> {
        let url = format!("redis://{}:{}/{}", host, port, db);
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(db, "Connected to Redis database");
        Ok(Self { db, conn })
    }

    /// Database index this store is bound to.
    pub fn db(&self) -> i64 {
        self.db
    }
}

#[async_trait]
impl ConfigStore for RedisStore {
    async fn get_keys(&self, table: &str) -> FcdResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}{}*", table, CONFIG_DB_SEPARATOR);
        let keys: Vec<String> = conn.keys(&pattern).await?;
        let prefix_len = table.len() + 1;
        Ok(keys.into_iter().map(|k| k[prefix_len..].to_string()).collect())
    }

    async fn get_entry(&self, table: &str, key: &str) -> FcdResult<FieldMap> {
        let mut conn = self.conn.clone();
        let full_key = format!("{}{}{}", table, CONFIG_DB_SEPARATOR, key);
        let raw: FieldMap = conn.hgetall(&full_key).await?;
        Ok(normalize_fields(raw))
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn keys(&self, pattern: &str) -> FcdResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn get_all(&self, key: &str) -> FcdResult<FieldMap> {
        let mut conn = self.conn.clone();
        let values: FieldMap = conn.hgetall(key).await?;
        Ok(values)
    }
}

/// Redis-style glob match supporting `*`, `?` and `\` escapes.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ki));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                '\\' if pi + 1 < p.len() && p[pi + 1] == k[ki] => {
                    pi += 2;
                    ki += 1;
                    continue;
                }
                c if c != '\\' && c == k[ki] => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                _ => {}
            }
        }
        match star {
            Some((sp, sk)) => {
                pi = sp + 1;
                ki = sk + 1;
                star = Some((sp, sk + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// In-memory hash store (tests and dry runs without Redis).
#[derive(Debug, Default)]
pub struct MemoryDb {
    data: RwLock<HashMap<String, FieldMap>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (merges) fields of a raw key.
    pub fn hset<K, V>(&self, key: &str, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut data = self.data.write();
        let entry = data.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert(field.into(), value.into());
        }
    }

    /// Replaces a CONFIG_DB row.
    pub fn set_entry<K, V>(&self, table: &str, key: &str, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let full_key = format!("{}{}{}", table, CONFIG_DB_SEPARATOR, key);
        self.del(&full_key);
        let fields: FieldMap = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.data.write().insert(full_key, fields);
    }

    /// Removes a CONFIG_DB row.
    pub fn del_entry(&self, table: &str, key: &str) {
        self.del(&format!("{}{}{}", table, CONFIG_DB_SEPARATOR, key));
    }

    /// Removes a raw key.
    pub fn del(&self, key: &str) {
        self.data.write().remove(key);
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl ConfigStore for MemoryDb {
    async fn get_keys(&self, table: &str) -> FcdResult<Vec<String>> {
        let prefix = format!("{}{}", table, CONFIG_DB_SEPARATOR);
        let mut keys: Vec<String> = self
            .data
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_entry(&self, table: &str, key: &str) -> FcdResult<FieldMap> {
        let full_key = format!("{}{}{}", table, CONFIG_DB_SEPARATOR, key);
        let raw = self.data.read().get(&full_key).cloned().unwrap_or_default();
        Ok(normalize_fields(raw))
    }
}

#[async_trait]
impl StateStore for MemoryDb {
    async fn keys(&self, pattern: &str) -> FcdResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .data
            .read()
            .keys()
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn get_all(&self, key: &str) -> FcdResult<FieldMap> {
        Ok(self.data.read().get(key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        let port = "ASIC_STATE:SAI_OBJECT_TYPE_PORT:oid:";
        let lag = "ASIC_STATE:SAI_OBJECT_TYPE_LAG:oid:";
        assert!(glob_match(&format!("{port}*"), &format!("{port}0x1")));
        assert!(!glob_match(&format!("{port}*"), &format!("{lag}0x1")));
        assert!(glob_match(&format!("{port}0x1"), &format!("{port}0x1")));
        assert!(!glob_match(&format!("{port}0x1"), &format!("{port}0x10")));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abcd"));
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
    }

    #[test]
    fn test_normalize_list_fields() {
        let mut raw = FieldMap::new();
        raw.insert("ports@".to_string(), "Ethernet0,Ethernet4".to_string());
        raw.insert("dip".to_string(), "10.0.0.1".to_string());

        let fields = normalize_fields(raw);
        assert_eq!(fields.get("ports").map(String::as_str), Some("Ethernet0,Ethernet4"));
        assert_eq!(fields.get("dip").map(String::as_str), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_memory_db_config_store() {
        let db = MemoryDb::new();
        db.set_entry("PORT", "Ethernet4", [("lanes", "5,6,7,8")]);
        db.set_entry("PORT", "Ethernet0", [("lanes", "1,2,3,4")]);
        db.set_entry("PORTCHANNEL", "PortChannel1", [("mtu", "9100")]);

        let keys = ConfigStore::get_keys(&db, "PORT").await.unwrap();
        assert_eq!(keys, vec!["Ethernet0", "Ethernet4"]);

        let entry = db.get_entry("PORT", "Ethernet4").await.unwrap();
        assert_eq!(entry.get("lanes").map(String::as_str), Some("5,6,7,8"));

        assert!(db.get_entry("PORT", "Ethernet8").await.unwrap().is_empty());

        db.del_entry("PORT", "Ethernet4");
        assert_eq!(ConfigStore::get_keys(&db, "PORT").await.unwrap(), vec!["Ethernet0"]);
    }

    #[tokio::test]
    async fn test_memory_db_state_store() {
        let db = MemoryDb::new();
        db.hset("ASIC_STATE:SAI_OBJECT_TYPE_SWITCH:oid:0x21", [("k", "v")]);
        db.hset("ASIC_STATE:SAI_OBJECT_TYPE_PORT:oid:0x1", [("k", "v")]);

        let keys = db.keys("ASIC_STATE:SAI_OBJECT_TYPE_SWITCH:oid:*").await.unwrap();
        assert_eq!(keys, vec!["ASIC_STATE:SAI_OBJECT_TYPE_SWITCH:oid:0x21"]);
        assert_eq!(db.len(), 2);
        assert!(db.get_all("missing").await.unwrap().is_empty());
    }
}
