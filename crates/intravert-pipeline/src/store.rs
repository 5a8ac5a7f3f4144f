//! In-memory storage engine backing the built-in handlers.
//!
//! Layout is keyspace -> column family -> row key -> columns, with columns
//! kept in name order so slices are range scans.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use intravert_types::{IntravertError, Result};

/// One stored column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub value: Value,
    /// Write time in microseconds since the epoch (0 when unset).
    pub timestamp: i64,
}

impl Column {
    pub fn new(name: impl Into<String>, value: Value, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
        }
    }

    /// Render only the requested components (`name`, `value`, `timestamp`).
    pub fn project(&self, components: &[String]) -> Value {
        let mut out = serde_json::Map::new();
        for component in components {
            match component.as_str() {
                "name" => {
                    out.insert("name".into(), Value::String(self.name.clone()));
                }
                "value" => {
                    out.insert("value".into(), self.value.clone());
                }
                "timestamp" => {
                    out.insert("timestamp".into(), Value::from(self.timestamp));
                }
                _ => {}
            }
        }
        Value::Object(out)
    }
}

type Row = BTreeMap<String, Column>;

#[derive(Debug, Default)]
struct ColumnFamily {
    rows: BTreeMap<String, Row>,
}

#[derive(Debug, Default)]
struct Keyspace {
    column_families: BTreeMap<String, ColumnFamily>,
}

#[derive(Debug, Default)]
struct StoreInner {
    keyspaces: BTreeMap<String, Keyspace>,
}

impl StoreInner {
    fn keyspace(&self, name: &str) -> Result<&Keyspace> {
        self.keyspaces
            .get(name)
            .ok_or_else(|| IntravertError::Storage(format!("keyspace '{}' does not exist", name)))
    }

    fn column_family(&self, keyspace: &str, cf: &str) -> Result<&ColumnFamily> {
        self.keyspace(keyspace)?.column_families.get(cf).ok_or_else(|| {
            IntravertError::Storage(format!(
                "column family '{}' does not exist in keyspace '{}'",
                cf, keyspace
            ))
        })
    }

    fn column_family_mut(&mut self, keyspace: &str, cf: &str) -> Result<&mut ColumnFamily> {
        self.keyspaces
            .get_mut(keyspace)
            .ok_or_else(|| IntravertError::Storage(format!("keyspace '{}' does not exist", keyspace)))?
            .column_families
            .get_mut(cf)
            .ok_or_else(|| {
                IntravertError::Storage(format!(
                    "column family '{}' does not exist in keyspace '{}'",
                    cf, keyspace
                ))
            })
    }
}

/// Shared handle to the in-memory store. Cloning yields another handle to
/// the same data.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    inner: Arc<tokio::sync::RwLock<StoreInner>>,
    system_keyspaces: Arc<BTreeSet<String>>,
}

impl MemoryStore {
    /// Create a store pre-populated with the given system keyspaces.
    pub fn new(system_keyspaces: &[String]) -> Self {
        let mut inner = StoreInner::default();
        for name in system_keyspaces {
            inner.keyspaces.insert(name.clone(), Keyspace::default());
        }
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(inner)),
            system_keyspaces: Arc::new(system_keyspaces.iter().cloned().collect()),
        }
    }

    pub fn is_system_keyspace(&self, name: &str) -> bool {
        self.system_keyspaces.contains(name)
    }

    pub async fn create_keyspace(&self, name: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.keyspaces.contains_key(name) {
            return Err(IntravertError::Storage(format!(
                "keyspace '{}' already exists",
                name
            )));
        }
        guard.keyspaces.insert(name.to_string(), Keyspace::default());
        Ok(())
    }

    pub async fn keyspace_exists(&self, name: &str) -> bool {
        self.inner.read().await.keyspaces.contains_key(name)
    }

    /// Names of all user keyspaces, sorted.
    pub async fn non_system_keyspaces(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .keyspaces
            .keys()
            .filter(|name| !self.is_system_keyspace(name))
            .cloned()
            .collect()
    }

    pub async fn create_column_family(&self, keyspace: &str, name: &str) -> Result<()> {
        let mut guard = self.inner.write().await;
        let ks = guard.keyspaces.get_mut(keyspace).ok_or_else(|| {
            IntravertError::Storage(format!("keyspace '{}' does not exist", keyspace))
        })?;
        if ks.column_families.contains_key(name) {
            return Err(IntravertError::Storage(format!(
                "column family '{}' already exists in keyspace '{}'",
                name, keyspace
            )));
        }
        ks.column_families
            .insert(name.to_string(), ColumnFamily::default());
        Ok(())
    }

    pub async fn column_family_exists(&self, keyspace: &str, name: &str) -> bool {
        self.inner
            .read()
            .await
            .column_family(keyspace, name)
            .is_ok()
    }

    /// Insert or overwrite a column.
    pub async fn put(&self, keyspace: &str, cf: &str, row: &str, column: Column) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard
            .column_family_mut(keyspace, cf)?
            .rows
            .entry(row.to_string())
            .or_default()
            .insert(column.name.clone(), column);
        Ok(())
    }

    pub async fn get(
        &self,
        keyspace: &str,
        cf: &str,
        row: &str,
        name: &str,
    ) -> Result<Option<Column>> {
        let guard = self.inner.read().await;
        Ok(guard
            .column_family(keyspace, cf)?
            .rows
            .get(row)
            .and_then(|cols| cols.get(name))
            .cloned())
    }

    /// Columns with `start <= name <= end`, in name order.
    pub async fn slice(
        &self,
        keyspace: &str,
        cf: &str,
        row: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<Column>> {
        if start > end {
            return Ok(Vec::new());
        }
        let guard = self.inner.read().await;
        let columns = guard
            .column_family(keyspace, cf)?
            .rows
            .get(row)
            .map(|cols| {
                cols.range(start.to_string()..=end.to_string())
                    .map(|(_, c)| c.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(columns)
    }

    /// Add `delta` to an integer counter column, creating it at zero.
    /// Returns the new count.
    pub async fn increment(
        &self,
        keyspace: &str,
        cf: &str,
        row: &str,
        name: &str,
        delta: i64,
        timestamp: i64,
    ) -> Result<i64> {
        let mut guard = self.inner.write().await;
        let cols = guard
            .column_family_mut(keyspace, cf)?
            .rows
            .entry(row.to_string())
            .or_default();
        let current = match cols.get(name) {
            None => 0,
            Some(col) => col.value.as_i64().ok_or_else(|| {
                IntravertError::Storage(format!("column '{}' is not a counter", name))
            })?,
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            IntravertError::Storage(format!("counter '{}' overflowed", name))
        })?;
        cols.insert(
            name.to_string(),
            Column::new(name, Value::from(next), timestamp),
        );
        Ok(next)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&[])
    }
}
