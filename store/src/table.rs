//! Ledger table interface (typed rows) and its key-value adapter.
//!
//! Tables hold rows of string and byte columns. Key columns identify a row.
//! `insert_row` and `replace_row` form an upsert pair: insert fails on an
//! existing key, replace fails on a missing one, so callers must decide
//! from an existence check which one to issue.
//!
//! Key layout used by [`KvTables`]:
//! - `tables/<name>` → bincode `Vec<ColumnDefinition>` (schema)
//! - `tables/<name>/rows/<k1>\x1f<k2>...` → bincode `Row`

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{decode, encode};
use crate::{LedgerKv, StoreError};

const KEY_SEPARATOR: char = '\u{1f}';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    String,
    Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub kind: ColumnKind,
    pub key: bool,
}

impl ColumnDefinition {
    pub fn key(name: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            key: true,
        }
    }

    pub fn value(name: &str, kind: ColumnKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            key: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Column {
    String(String),
    Bytes(Vec<u8>),
}

impl Column {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::String(_) => ColumnKind::String,
            Column::Bytes(_) => ColumnKind::Bytes,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Column::String(s) => s.as_bytes(),
            Column::Bytes(b) => b,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub columns: Vec<Column>,
}

impl Row {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }
}

/// Typed-row view of the ledger.
pub trait LedgerTable: Send + Sync {
    /// Declare a table. Re-declaring with an identical schema is a no-op;
    /// a different schema under the same name is `Duplicate`.
    fn create_table(&self, name: &str, columns: &[ColumnDefinition]) -> Result<(), StoreError>;

    /// Insert a new row. Fails with `Duplicate` if the key already exists.
    fn insert_row(&self, name: &str, row: &Row) -> Result<(), StoreError>;

    /// Replace an existing row. Fails with `NotFound` if the key is absent.
    fn replace_row(&self, name: &str, row: &Row) -> Result<(), StoreError>;

    /// Fetch a row by its key columns.
    fn get_row(&self, name: &str, key: &[Column]) -> Result<Option<Row>, StoreError>;

    fn delete_row(&self, name: &str, key: &[Column]) -> Result<(), StoreError>;

    fn row_exists(&self, name: &str, key: &[Column]) -> Result<bool, StoreError> {
        Ok(self.get_row(name, key)?.is_some())
    }
}

/// [`LedgerTable`] implemented over any [`LedgerKv`].
///
/// Insert/replace are check-then-write and not atomic against a concurrent
/// writer to the same row; callers serialize writes per row key.
pub struct KvTables<S> {
    kv: S,
}

impl<S: LedgerKv> KvTables<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    fn schema(&self, name: &str) -> Result<Vec<ColumnDefinition>, StoreError> {
        let bytes = self
            .kv
            .get(&schema_key(name))?
            .ok_or_else(|| StoreError::NotFound(format!("table '{name}'")))?;
        decode(&bytes)
    }

    /// Validate the row against the schema and return its storage key.
    fn row_key_checked(&self, name: &str, row: &Row) -> Result<String, StoreError> {
        let schema = self.schema(name)?;
        if schema.len() != row.columns.len() {
            return Err(StoreError::Schema(format!(
                "table '{name}' expects {} columns, got {}",
                schema.len(),
                row.columns.len()
            )));
        }
        let mut key_columns = Vec::new();
        for (def, col) in schema.iter().zip(&row.columns) {
            if def.kind != col.kind() {
                return Err(StoreError::Schema(format!(
                    "column '{}' of table '{name}' expects {:?}",
                    def.name, def.kind
                )));
            }
            if def.key {
                key_columns.push(col.clone());
            }
        }
        row_key(name, &key_columns)
    }

    fn key_for_lookup(&self, name: &str, key: &[Column]) -> Result<String, StoreError> {
        let schema = self.schema(name)?;
        let key_defs: Vec<&ColumnDefinition> = schema.iter().filter(|d| d.key).collect();
        if key_defs.len() != key.len()
            || key_defs.iter().zip(key).any(|(d, c)| d.kind != c.kind())
        {
            return Err(StoreError::Schema(format!(
                "lookup key does not match key columns of table '{name}'"
            )));
        }
        row_key(name, key)
    }
}

impl<S: LedgerKv> LedgerTable for KvTables<S> {
    fn create_table(&self, name: &str, columns: &[ColumnDefinition]) -> Result<(), StoreError> {
        if !columns.iter().any(|c| c.key) {
            return Err(StoreError::Schema(format!(
                "table '{name}' must declare at least one key column"
            )));
        }
        let key = schema_key(name);
        if let Some(existing) = self.kv.get(&key)? {
            let existing: Vec<ColumnDefinition> = decode(&existing)?;
            if existing == columns {
                return Ok(());
            }
            return Err(StoreError::Duplicate(format!(
                "table '{name}' already declared with a different schema"
            )));
        }
        debug!(table = name, columns = columns.len(), "creating table");
        self.kv.put(&key, &encode(&columns.to_vec())?)
    }

    fn insert_row(&self, name: &str, row: &Row) -> Result<(), StoreError> {
        let key = self.row_key_checked(name, row)?;
        if self.kv.exists(&key)? {
            return Err(StoreError::Duplicate(key));
        }
        self.kv.put(&key, &encode(row)?)
    }

    fn replace_row(&self, name: &str, row: &Row) -> Result<(), StoreError> {
        let key = self.row_key_checked(name, row)?;
        if !self.kv.exists(&key)? {
            return Err(StoreError::NotFound(key));
        }
        self.kv.put(&key, &encode(row)?)
    }

    fn get_row(&self, name: &str, key: &[Column]) -> Result<Option<Row>, StoreError> {
        let key = self.key_for_lookup(name, key)?;
        match self.kv.get(&key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete_row(&self, name: &str, key: &[Column]) -> Result<(), StoreError> {
        let key = self.key_for_lookup(name, key)?;
        self.kv.delete(&key)
    }
}

fn schema_key(name: &str) -> String {
    format!("tables/{name}")
}

fn row_key(name: &str, key_columns: &[Column]) -> Result<String, StoreError> {
    let mut parts = Vec::with_capacity(key_columns.len());
    for col in key_columns {
        match col {
            Column::String(s) => parts.push(s.clone()),
            Column::Bytes(_) => {
                return Err(StoreError::Schema(
                    "byte columns cannot be used as row keys".to_string(),
                ))
            }
        }
    }
    Ok(format!(
        "tables/{name}/rows/{}",
        parts.join(&KEY_SEPARATOR.to_string())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapKv(Mutex<BTreeMap<String, Vec<u8>>>);

    impl LedgerKv for MapKv {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }
        fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
            self.0.lock().unwrap().insert(key.to_string(), value.to_vec());
            Ok(())
        }
        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }
        fn fetch_add(&self, _key: &str, _delta: u64) -> Result<u64, StoreError> {
            unimplemented!("not used by table tests")
        }
        fn scan_prefix(&self, _prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
            unimplemented!("not used by table tests")
        }
    }

    fn tables() -> KvTables<MapKv> {
        let t = KvTables::new(MapKv::default());
        t.create_table(
            "Mailboxes",
            &[
                ColumnDefinition::key("participant", ColumnKind::String),
                ColumnDefinition::value("record", ColumnKind::Bytes),
            ],
        )
        .unwrap();
        t
    }

    fn row(id: &str, payload: &[u8]) -> Row {
        Row::new(vec![
            Column::String(id.to_string()),
            Column::Bytes(payload.to_vec()),
        ])
    }

    #[test]
    fn test_insert_then_get() {
        let t = tables();
        t.insert_row("Mailboxes", &row("u1", b"a")).unwrap();
        let fetched = t
            .get_row("Mailboxes", &[Column::String("u1".into())])
            .unwrap()
            .unwrap();
        assert_eq!(fetched, row("u1", b"a"));
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let t = tables();
        t.insert_row("Mailboxes", &row("u1", b"a")).unwrap();
        assert!(matches!(
            t.insert_row("Mailboxes", &row("u1", b"b")),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn test_replace_missing_fails() {
        let t = tables();
        assert!(matches!(
            t.replace_row("Mailboxes", &row("u1", b"a")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_replace_existing() {
        let t = tables();
        t.insert_row("Mailboxes", &row("u1", b"a")).unwrap();
        t.replace_row("Mailboxes", &row("u1", b"b")).unwrap();
        let fetched = t
            .get_row("Mailboxes", &[Column::String("u1".into())])
            .unwrap()
            .unwrap();
        assert_eq!(fetched.columns[1], Column::Bytes(b"b".to_vec()));
    }

    #[test]
    fn test_undeclared_table() {
        let t = KvTables::new(MapKv::default());
        assert!(matches!(
            t.insert_row("Nope", &row("u1", b"a")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_schema_mismatch() {
        let t = tables();
        let bad = Row::new(vec![Column::String("u1".into())]);
        assert!(matches!(
            t.insert_row("Mailboxes", &bad),
            Err(StoreError::Schema(_))
        ));
    }

    #[test]
    fn test_redeclare_same_schema_is_noop() {
        let t = tables();
        t.create_table(
            "Mailboxes",
            &[
                ColumnDefinition::key("participant", ColumnKind::String),
                ColumnDefinition::value("record", ColumnKind::Bytes),
            ],
        )
        .unwrap();
        assert!(matches!(
            t.create_table(
                "Mailboxes",
                &[ColumnDefinition::key("participant", ColumnKind::String)]
            ),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn test_delete_row() {
        let t = tables();
        t.insert_row("Mailboxes", &row("u1", b"a")).unwrap();
        t.delete_row("Mailboxes", &[Column::String("u1".into())])
            .unwrap();
        assert!(!t
            .row_exists("Mailboxes", &[Column::String("u1".into())])
            .unwrap());
    }
}
