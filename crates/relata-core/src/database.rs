//! # Database
//!
//! The repo façade a host talks to.
//!
//! A [`Database`] owns the three pieces of engine state explicitly:
//! - the schema [`Registry`]
//! - the flat [`Store`]
//! - the [`Hooks`] table and the uid counter
//!
//! Write path: input tree → [`Normalizer`] → delta → mutation hooks → store.
//! Read path: [`Database::query`] hands out a [`Query`] bound to the store
//! and the hook table.
//!
//! ## Write semantics
//!
//! - `create` clears the entity and every entity deriving from it, then inserts
//! - `insert` writes whole rows, overwriting rows with the same id
//! - `update` merges into stored rows and inserts rows that do not exist yet
//! - `update_where` patches stored rows only, recomputing `$id` on key changes
//! - `delete` removes selected rows; nothing cascades

use crate::discriminator;
use crate::hooks::{HookPoint, Hooks};
use crate::normalizer::{Normalized, Normalizer, WriteMode, root_items};
use crate::primitives::INDEX_ID_FIELD;
use crate::query::Query;
use crate::schema::{EntityDef, Registry};
use crate::store::Store;
use crate::{IndexId, Record, RelataError};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// WRITE RESULTS
// =============================================================================

/// Rows a write operation committed, per storage table.
///
/// Rows appear as stored after the write (or, for deletes, as they were
/// before removal), after the `after_*` hooks have seen them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Persisted {
    rows: BTreeMap<String, Vec<Record>>,
}

impl Persisted {
    /// Rows written to `entity`'s table.
    #[must_use]
    pub fn get(&self, entity: &str) -> &[Record] {
        self.rows.get(entity).map(Vec::as_slice).unwrap_or_default()
    }

    /// Tables touched, in name order.
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    /// Total number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn extend(&mut self, entity: &str, rows: Vec<Record>) {
        if !rows.is_empty() {
            self.rows.entry(entity.to_string()).or_default().extend(rows);
        }
    }
}

/// Which stored rows an `update_where` or `delete` targets.
pub enum Selector<'s> {
    /// The row with this primary key (an array for composite keys).
    Id(Value),
    /// The rows with these primary keys.
    Ids(Vec<Value>),
    /// Rows the predicate accepts.
    Filter(&'s dyn Fn(&Record) -> bool),
    /// Every row readable as the entity.
    All,
}

impl fmt::Debug for Selector<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => f.debug_tuple("Id").field(id).finish(),
            Self::Ids(ids) => f.debug_tuple("Ids").field(ids).finish(),
            Self::Filter(_) => f.write_str("Filter(..)"),
            Self::All => f.write_str("All"),
        }
    }
}

/// How `update_where` changes a selected row.
pub enum Patch<'p> {
    /// Overwrite these fields. Undeclared fields are ignored.
    Fields(Record),
    /// Edit a copy of the stored row in place.
    With(&'p dyn Fn(&mut Record)),
}

// =============================================================================
// DATABASE
// =============================================================================

/// Registry, store and hooks of one host.
#[derive(Default)]
pub struct Database {
    registry: Registry,
    store: Store,
    hooks: Hooks,
    uid_seed: u64,
}

impl Database {
    /// Create an empty database with no entities.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a database over an existing registry.
    #[must_use]
    pub fn with_registry(registry: Registry) -> Self {
        let mut store = Store::new();
        for name in registry.names() {
            if registry.resolve(name).is_ok_and(|def| def.base().is_none()) {
                store.allocate(name);
            }
        }
        Self {
            registry,
            store,
            ..Self::default()
        }
    }

    /// Register an entity and allocate its table.
    ///
    /// Derived entities store their rows in the family root's table and get
    /// none of their own. Rows already stored, for any entity, are kept.
    pub fn register(&mut self, definition: EntityDef) -> &mut Self {
        if definition.base().is_none() {
            self.store.allocate(definition.name());
        }
        self.registry.register(definition);
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Direct access to the rows, bypassing normalization and hooks.
    pub const fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    #[must_use]
    pub fn into_store(self) -> Store {
        self.store
    }

    /// The hook table. Registration goes through `&self`.
    #[must_use]
    pub const fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Normalize `input` without writing it.
    pub fn normalize(&self, input: &Value, entity: &str) -> Result<Normalized, RelataError> {
        self.normalizer(WriteMode::Insert).normalize(input, entity)
    }

    /// Start a query on `entity`, running the query hook points.
    pub fn query(&self, entity: &str) -> Result<Query<'_>, RelataError> {
        Ok(Query::new(&self.registry, &self.store, entity)?.with_hooks(&self.hooks))
    }

    fn normalizer(&self, mode: WriteMode) -> Normalizer<'_> {
        Normalizer::new(&self.registry)
            .with_store(&self.store)
            .with_mode(mode)
            .with_uid_seed(self.uid_seed)
    }

    // -------------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------------

    /// Replace every row of `entity` (and of the entities deriving from it)
    /// with `input`. Other entities are only touched by nested records.
    pub fn create(&mut self, entity: &str, input: &Value) -> Result<Persisted, RelataError> {
        self.registry.resolve(entity)?;
        root_items(input)?;
        let cleared = self.store.clear_family(&self.registry, entity)?;
        tracing::debug!(entity, cleared, "create cleared entity family");
        self.write(entity, input, WriteMode::Insert)
    }

    /// Add `input`, overwriting stored rows with the same ids.
    pub fn insert(&mut self, entity: &str, input: &Value) -> Result<Persisted, RelataError> {
        self.write(entity, input, WriteMode::Insert)
    }

    /// Merge `input` into stored rows; rows not yet stored are inserted.
    pub fn update(&mut self, entity: &str, input: &Value) -> Result<Persisted, RelataError> {
        self.write(entity, input, WriteMode::Update)
    }

    fn write(&mut self, entity: &str, input: &Value, mode: WriteMode) -> Result<Persisted, RelataError> {
        let normalized = self.normalizer(mode).normalize(input, entity)?;
        self.uid_seed = normalized.uid_seed;
        let (before, after) = match mode {
            WriteMode::Insert => (HookPoint::BeforeCreate, HookPoint::AfterCreate),
            WriteMode::Update => (HookPoint::BeforeUpdate, HookPoint::AfterUpdate),
        };
        let persisted = self.commit(&normalized, before, after)?;
        tracing::debug!(entity, ?mode, rows = persisted.len(), "write committed");
        Ok(persisted)
    }

    /// Move a delta into the store, table by table.
    fn commit(
        &mut self,
        normalized: &Normalized,
        before: HookPoint,
        after: HookPoint,
    ) -> Result<Persisted, RelataError> {
        let mut persisted = Persisted::default();
        for (table, rows) in normalized.delta.tables() {
            let records = rows.data.values().cloned().collect();
            let records = self.hooks.run(before, table, records)?;

            let mut written = Vec::with_capacity(records.len());
            for record in records {
                let Some(id) = index_id(&record) else {
                    tracing::warn!(table, "hook returned a record without `$id`; skipped");
                    continue;
                };
                if normalized.is_patch(table, &id) {
                    self.store.merge(table, id.clone(), record);
                } else {
                    self.store.insert(table, id.clone(), record);
                }
                if let Some(stored) = self.store.get(table, &id) {
                    written.push(stored.clone());
                }
            }
            persisted.extend(table, self.hooks.run(after, table, written)?);
        }
        Ok(persisted)
    }

    /// Patch the stored rows of `entity` chosen by `selector`.
    ///
    /// Only declared fields are written, cast to their kind; the
    /// discriminator is kept as given. Rows that do not exist are not created.
    pub fn update_where(
        &mut self,
        entity: &str,
        selector: Selector<'_>,
        patch: Patch<'_>,
    ) -> Result<Persisted, RelataError> {
        let root = self.registry.resolve_base(entity)?;
        let table = root.name().to_string();
        let discriminator_field = self.registry.discriminator_field(entity)?.to_string();

        let mut patched = Vec::new();
        for row in self.select(entity, &selector)? {
            let mut changes = match &patch {
                Patch::Fields(fields) => fields.clone(),
                Patch::With(edit) => {
                    let mut copy = row.clone();
                    edit(&mut copy);
                    copy
                }
            };
            changes.remove(INDEX_ID_FIELD);

            let mut record = row;
            if let Some(value) = changes.remove(&discriminator_field) {
                record.insert(discriminator_field.clone(), value);
            }
            let concrete = discriminator::resolve(&self.registry, entity, &record)?;
            for (name, field) in self.registry.fields(concrete.name())? {
                if let Some(value) = changes.remove(name) {
                    record.insert(name.to_string(), field.cast(value));
                }
            }
            if !changes.is_empty() {
                tracing::trace!(entity, ignored = changes.len(), "undeclared fields ignored by update");
            }
            patched.push(record);
        }

        let records = self.hooks.run(HookPoint::BeforeUpdate, &table, patched)?;
        let mut written = Vec::with_capacity(records.len());
        for mut record in records {
            let Some(old) = index_id(&record) else {
                continue;
            };
            let id = self
                .registry
                .resolve_base(entity)?
                .key()
                .index_id(&record)
                .unwrap_or_else(|| old.clone());
            if id != old {
                tracing::debug!(entity, old = %old, new = %id, "primary key changed; row re-keyed");
                self.store.remove(&table, &old);
            }
            record.insert(INDEX_ID_FIELD.to_string(), id.to_value());
            self.store.insert(&table, id, record.clone());
            written.push(record);
        }

        let mut persisted = Persisted::default();
        persisted.extend(&table, self.hooks.run(HookPoint::AfterUpdate, &table, written)?);
        tracing::debug!(entity, rows = persisted.len(), "update committed");
        Ok(persisted)
    }

    /// Remove the rows of `entity` chosen by `selector`.
    ///
    /// A `before_delete` hook that drops a row keeps it stored.
    pub fn delete(&mut self, entity: &str, selector: Selector<'_>) -> Result<Persisted, RelataError> {
        let table = self.registry.resolve_base(entity)?.name().to_string();
        let rows = self.select(entity, &selector)?;
        let rows = self.hooks.run(HookPoint::BeforeDelete, &table, rows)?;

        let mut removed = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(record) = index_id(&row).and_then(|id| self.store.remove(&table, &id)) {
                removed.push(record);
            }
        }

        let mut persisted = Persisted::default();
        persisted.extend(&table, self.hooks.run(HookPoint::AfterDelete, &table, removed)?);
        tracing::debug!(entity, rows = persisted.len(), "rows deleted");
        Ok(persisted)
    }

    /// Remove every row of `entity` and of the entities deriving from it.
    pub fn delete_all(&mut self, entity: &str) -> Result<Persisted, RelataError> {
        self.delete(entity, Selector::All)
    }

    /// Stored rows readable as `entity` that `selector` picks, cloned.
    fn select(&self, entity: &str, selector: &Selector<'_>) -> Result<Vec<Record>, RelataError> {
        let key = self.registry.resolve_base(entity)?.key();
        let by_ids = |ids: Vec<IndexId>| -> Result<Vec<Record>, RelataError> {
            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(row) = self.store.find(&self.registry, entity, &id)? {
                    rows.push(row.clone());
                }
            }
            Ok(rows)
        };

        match selector {
            Selector::Id(value) => by_ids(vec![key.id_for(value)?]),
            Selector::Ids(values) => by_ids(
                values
                    .iter()
                    .map(|value| key.id_for(value))
                    .collect::<Result<_, _>>()?,
            ),
            Selector::Filter(predicate) => Ok(self
                .store
                .rows(&self.registry, entity)?
                .into_iter()
                .filter(|(_, row)| predicate(row))
                .map(|(_, row)| row.clone())
                .collect()),
            Selector::All => Ok(self
                .store
                .rows(&self.registry, entity)?
                .into_iter()
                .map(|(_, row)| row.clone())
                .collect()),
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("entities", &self.registry.names().count())
            .field("rows", &self.store.len())
            .field("hooks", &self.hooks)
            .field("uid_seed", &self.uid_seed)
            .finish()
    }
}

fn index_id(record: &Record) -> Option<IndexId> {
    record.get(INDEX_ID_FIELD).and_then(IndexId::from_value)
}

// =============================================================================
// TESTS
// =============================================================================
