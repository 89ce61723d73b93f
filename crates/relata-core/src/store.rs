//! # Flat Store
//!
//! The key-addressed storage region the host owns.
//!
//! Shape: `{ entity: { data: { index_id: flat_record } } }`. Entities of an
//! inheritance family share their root's table; a record's concrete entity is
//! recovered through its discriminator.
//!
//! All tables are `BTreeMap`s keyed by [`IndexId`], so iteration order is
//! deterministic.

use crate::discriminator;
use crate::primitives::INDEX_ID_FIELD;
use crate::schema::{PrimaryKey, Registry};
use crate::{IndexId, Record, RelataError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Rows of one storage entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub data: BTreeMap<IndexId, Record>,
}

impl Table {
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Largest numeric value of `field` in this table.
    #[must_use]
    pub fn max_integer(&self, field: &str) -> Option<i64> {
        self.data
            .values()
            .filter_map(|r| r.get(field).and_then(Value::as_i64))
            .max()
    }
}

/// The flat store: entity name to table.
///
/// Also used as the delta a normalize call produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Store {
    entities: BTreeMap<String, Table>,
}

impl Store {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty table for `entity` if it has none.
    pub fn allocate(&mut self, entity: &str) {
        self.entities.entry(entity.to_string()).or_default();
    }

    #[must_use]
    pub fn table(&self, entity: &str) -> Option<&Table> {
        self.entities.get(entity)
    }

    pub fn table_mut(&mut self, entity: &str) -> &mut Table {
        self.entities.entry(entity.to_string()).or_default()
    }

    /// Tables in entity-name order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.entities.iter().map(|(name, table)| (name.as_str(), table))
    }

    #[must_use]
    pub fn get(&self, entity: &str, id: &IndexId) -> Option<&Record> {
        self.entities.get(entity)?.data.get(id)
    }

    pub fn get_mut(&mut self, entity: &str, id: &IndexId) -> Option<&mut Record> {
        self.entities.get_mut(entity)?.data.get_mut(id)
    }

    /// Write a row, replacing any row with the same id. `$id` is (re)stamped.
    pub fn insert(&mut self, entity: &str, id: IndexId, record: Record) {
        let mut row = Record::new();
        row.insert(INDEX_ID_FIELD.to_string(), id.to_value());
        row.extend(record.into_iter().filter(|(k, _)| k != INDEX_ID_FIELD));
        self.table_mut(entity).data.insert(id, row);
    }

    /// Merge the fields of `patch` into the row `id`, creating it if absent.
    pub fn merge(&mut self, entity: &str, id: IndexId, patch: Record) {
        let table = self.table_mut(entity);
        match table.data.get_mut(&id) {
            Some(existing) => existing.extend(patch),
            None => {
                let mut record = Record::new();
                record.insert(INDEX_ID_FIELD.to_string(), id.to_value());
                record.extend(patch);
                table.data.insert(id, record);
            }
        }
    }

    pub fn remove(&mut self, entity: &str, id: &IndexId) -> Option<Record> {
        self.entities.get_mut(entity)?.data.remove(id)
    }

    /// Total number of rows across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.values().map(Table::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.values().all(Table::is_empty)
    }

    /// Rows readable as `entity`, in table order.
    ///
    /// Rows live in the family root's table; a derived entity sees only the
    /// rows whose concrete entity is it or one of its descendants.
    pub fn rows<'s>(
        &'s self,
        registry: &Registry,
        entity: &str,
    ) -> Result<Vec<(&'s IndexId, &'s Record)>, RelataError> {
        let root = registry.resolve_base(entity)?;
        let Some(table) = self.table(root.name()) else {
            return Ok(Vec::new());
        };
        if root.name() == entity {
            return Ok(table.data.iter().collect());
        }
        let mut rows = Vec::new();
        for (id, record) in &table.data {
            if belongs_to(registry, root.name(), entity, record)? {
                rows.push((id, record));
            }
        }
        Ok(rows)
    }

    /// Fetch one row readable as `entity`.
    pub fn find(
        &self,
        registry: &Registry,
        entity: &str,
        id: &IndexId,
    ) -> Result<Option<&Record>, RelataError> {
        let root = registry.resolve_base(entity)?;
        match self.get(root.name(), id) {
            Some(record) if belongs_to(registry, root.name(), entity, record)? => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    /// Remove every row of `entity` and of the entities deriving from it.
    ///
    /// Returns the number of removed rows. Other families are untouched.
    pub fn clear_family(&mut self, registry: &Registry, entity: &str) -> Result<usize, RelataError> {
        let root = registry.resolve_base(entity)?.name().to_string();
        let doomed: Vec<IndexId> = self
            .rows(registry, entity)?
            .into_iter()
            .map(|(id, _)| id.clone())
            .collect();
        let table = self.table_mut(&root);
        for id in &doomed {
            table.data.remove(id);
        }
        tracing::debug!(entity, root = %root, removed = doomed.len(), "cleared entity family");
        Ok(doomed.len())
    }
}

/// The value a record exposes under relation key `key`.
///
/// A record without a value for its own single primary key (or asked for
/// `$id` directly) answers with its index id, so synthetic ids stand in for
/// missing keys wherever the record is referenced.
#[must_use]
pub fn key_value(record: &Record, key: &str, primary: &PrimaryKey) -> Value {
    if let Some(value) = record.get(key).filter(|v| !v.is_null()) {
        return value.clone();
    }
    let is_own_key = key == INDEX_ID_FIELD || (!primary.is_composite() && primary.contains(key));
    if is_own_key {
        record.get(INDEX_ID_FIELD).cloned().unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}

/// Whether a row of `root`'s table is readable as `entity`.
fn belongs_to(
    registry: &Registry,
    root: &str,
    entity: &str,
    record: &Record,
) -> Result<bool, RelataError> {
    if root == entity {
        return Ok(true);
    }
    let concrete = discriminator::concrete_name(registry, root, record)?;
    registry.is_a(concrete, entity)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityDef, FieldDef};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            EntityDef::new("person")
                .subtype("ADULT", "adult")
                .field("id", FieldDef::attr(Value::Null))
                .field("type", FieldDef::attr(Value::Null)),
        );
        registry.register(EntityDef::new("adult").extends("person"));
        registry.register(EntityDef::new("post").field("id", FieldDef::attr(Value::Null)));
        registry
    }

    #[test]
    fn insert_stamps_index_id() {
        let mut store = Store::new();
        store.insert("post", IndexId::new("1"), record(json!({"id": 1})));

        let row = store.get("post", &IndexId::new("1")).expect("row");
        assert_eq!(row.get("$id"), Some(&json!("1")));
    }

    #[test]
    fn merge_keeps_unpatched_fields() {
        let mut store = Store::new();
        store.insert("post", IndexId::new("1"), record(json!({"id": 1, "title": "a"})));
        store.merge("post", IndexId::new("1"), record(json!({"body": "b"})));

        let row = store.get("post", &IndexId::new("1")).expect("row");
        assert_eq!(row.get("title"), Some(&json!("a")));
        assert_eq!(row.get("body"), Some(&json!("b")));
    }

    #[test]
    fn derived_rows_are_filtered_by_discriminator() {
        let registry = registry();
        let mut store = Store::new();
        store.insert("person", IndexId::new("1"), record(json!({"id": 1, "type": null})));
        store.insert("person", IndexId::new("2"), record(json!({"id": 2, "type": "ADULT"})));

        assert_eq!(store.rows(&registry, "person").expect("rows").len(), 2);
        let adults = store.rows(&registry, "adult").expect("rows");
        assert_eq!(adults.len(), 1);
        assert_eq!(adults[0].0, &IndexId::new("2"));

        assert!(store.find(&registry, "adult", &IndexId::new("1")).expect("find").is_none());
        assert!(store.find(&registry, "person", &IndexId::new("2")).expect("find").is_some());
    }

    #[test]
    fn clear_family_leaves_other_entities() {
        let registry = registry();
        let mut store = Store::new();
        store.insert("person", IndexId::new("1"), record(json!({"id": 1})));
        store.insert("person", IndexId::new("2"), record(json!({"id": 2, "type": "ADULT"})));
        store.insert("post", IndexId::new("1"), record(json!({"id": 1})));

        assert_eq!(store.clear_family(&registry, "adult").expect("clear"), 1);
        assert_eq!(store.table("person").map(Table::len), Some(1));

        assert_eq!(store.clear_family(&registry, "person").expect("clear"), 1);
        assert_eq!(store.table("person").map(Table::len), Some(0));
        assert_eq!(store.table("post").map(Table::len), Some(1));
    }

    #[test]
    fn serializes_in_host_shape() {
        let mut store = Store::new();
        store.insert("post", IndexId::new("1"), record(json!({"id": 1})));

        let value = serde_json::to_value(&store).expect("serialize");
        assert_eq!(value, json!({"post": {"data": {"1": {"id": 1, "$id": "1"}}}}));
    }

    #[test]
    fn key_value_falls_back_to_index_id() {
        let primary = PrimaryKey::from("id");
        let row = record(json!({"$id": "_no_key_1", "id": null, "code": null}));
        assert_eq!(key_value(&row, "id", &primary), json!("_no_key_1"));
        assert_eq!(key_value(&row, "code", &primary), Value::Null);

        let keyed = record(json!({"$id": "4", "id": 4}));
        assert_eq!(key_value(&keyed, "id", &primary), json!(4));
    }

    #[test]
    fn max_integer_ignores_non_numbers() {
        let mut store = Store::new();
        store.insert("post", IndexId::new("a"), record(json!({"n": 4})));
        store.insert("post", IndexId::new("b"), record(json!({"n": "x"})));
        assert_eq!(store.table("post").and_then(|t| t.max_integer("n")), Some(4));
    }
}
