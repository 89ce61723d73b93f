//! # Normalizer
//!
//! Flattens nested input trees into a [`Store`] delta.
//!
//! - Every record is typed through the discriminator before its fields are read
//! - Related records are normalized depth-first, so their keys are known
//!   before the owner's foreign keys are written
//! - Records without a key get a synthetic `_no_key_N` id, counted per call
//! - Many-to-many edges become pivot rows with deterministic ids
//! - The input is only borrowed; nothing in it is ever modified

use crate::discriminator;
use crate::primitives::{INDEX_ID_FIELD, NO_KEY_PREFIX, PIVOT_FIELD, PIVOT_SEPARATOR, UID_PREFIX};
use crate::schema::{Descriptor, EntityDef, FieldDef, FieldKind, Registry, RelationDef};
use crate::store::{Store, key_value};
use crate::{IndexId, Record, RelataError};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

/// How rows that already exist in the store are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Every row is written whole, with defaults filled.
    #[default]
    Insert,
    /// Rows already stored receive only the fields present in the input.
    Update,
}

/// Result of one normalize call.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    /// Flat rows per storage table.
    pub delta: Store,
    /// Storage table and id of each top-level input record, in input order.
    pub roots: Vec<(String, IndexId)>,
    /// Rows of `delta` that are partial patches of stored rows.
    pub patches: BTreeSet<(String, IndexId)>,
    /// Uid counter after this call.
    pub uid_seed: u64,
}

impl Normalized {
    /// Whether the delta row `entity`/`id` is a patch rather than a whole row.
    #[must_use]
    pub fn is_patch(&self, entity: &str, id: &IndexId) -> bool {
        self.patches.contains(&(entity.to_string(), id.clone()))
    }
}

/// Normalizes input trees against a registry.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    registry: &'a Registry,
    store: Option<&'a Store>,
    mode: WriteMode,
    uid_seed: u64,
}

impl<'a> Normalizer<'a> {
    #[must_use]
    pub const fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            store: None,
            mode: WriteMode::Insert,
            uid_seed: 0,
        }
    }

    /// Consult `store` for existing rows and increment counters.
    #[must_use]
    pub const fn with_store(mut self, store: &'a Store) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Continue uid numbering after `seed`.
    #[must_use]
    pub const fn with_uid_seed(mut self, seed: u64) -> Self {
        self.uid_seed = seed;
        self
    }

    /// Normalize `input` (an object or an array of objects) as `entity`.
    pub fn normalize(&self, input: &Value, entity: &str) -> Result<Normalized, RelataError> {
        self.registry.resolve(entity)?;
        let items = root_items(input)?;

        let mut pass = Pass {
            registry: self.registry,
            store: self.store,
            mode: self.mode,
            delta: Store::new(),
            patches: BTreeSet::new(),
            synthetic: 0,
            uid_seed: self.uid_seed,
            issued: BTreeMap::new(),
        };

        let mut roots = Vec::with_capacity(items.len());
        for item in items {
            let placed = pass.visit(entity, item)?;
            roots.push((placed.table, placed.id));
        }

        tracing::debug!(
            entity,
            records = roots.len(),
            rows = pass.delta.len(),
            synthetic = pass.synthetic,
            "normalized input"
        );

        Ok(Normalized {
            delta: pass.delta,
            roots,
            patches: pass.patches,
            uid_seed: pass.uid_seed,
        })
    }
}

/// Normalize `input` as `entity` into a fresh delta.
pub fn normalize(registry: &Registry, input: &Value, entity: &str) -> Result<Store, RelataError> {
    Normalizer::new(registry)
        .normalize(input, entity)
        .map(|normalized| normalized.delta)
}

pub(crate) fn root_items(input: &Value) -> Result<Vec<&Record>, RelataError> {
    match input {
        Value::Object(record) => Ok(vec![record]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object().ok_or_else(|| {
                    RelataError::InvalidArgument(format!("expected an object record, got `{item}`"))
                })
            })
            .collect(),
        other => Err(RelataError::InvalidArgument(format!(
            "expected an object or an array of objects, got `{other}`"
        ))),
    }
}

/// A record written to the delta.
struct Placed {
    /// Concrete entity chosen by the discriminator.
    entity: String,
    /// Storage table (the family root).
    table: String,
    id: IndexId,
}

/// The owner side of a relation being attached.
struct Owner<'r> {
    concrete: &'r str,
    root: &'r EntityDef,
    input: &'r Record,
}

impl Owner<'_> {
    fn key(&self, record: &Record, key: Option<&str>) -> Value {
        key_value(
            record,
            key.unwrap_or_else(|| self.root.default_join_key()),
            self.root.key(),
        )
    }
}

/// State of one normalize call.
struct Pass<'a> {
    registry: &'a Registry,
    store: Option<&'a Store>,
    mode: WriteMode,
    delta: Store,
    patches: BTreeSet<(String, IndexId)>,
    synthetic: u64,
    uid_seed: u64,
    issued: BTreeMap<(String, String), i64>,
}

impl Pass<'_> {
    fn visit(&mut self, entity: &str, input: &Record) -> Result<Placed, RelataError> {
        let registry = self.registry;
        let (typed, stored) = self.typing_record(entity, input)?;
        let concrete = discriminator::resolve(registry, entity, &typed)?;
        let root = registry.resolve_base(concrete.name())?;
        let table = root.name();
        let attributes = registry.attributes(concrete.name())?;

        let mut values = Record::new();
        for (name, descriptor) in &attributes {
            if let (Descriptor::Field(field), Some(value)) = (descriptor, input.get(*name)) {
                values.insert((*name).to_string(), field.cast(value.clone()));
            }
        }
        if !root.types().is_empty() {
            // Discriminators round-trip exactly as given, never cast.
            let field = registry.discriminator_field(table)?;
            let given = typed.get(field).filter(|v| !v.is_null());
            let stamped = if stored { None } else { root.value_for(concrete.name()) };
            if let Some(value) = given.or(stamped) {
                values.insert(field.to_string(), value.clone());
            }
        }

        let id = self.index_id(root, &attributes, &mut values);
        let exists = self.mode == WriteMode::Update
            && self.store.is_some_and(|s| s.get(table, &id).is_some());

        let mut record = Record::new();
        record.insert(INDEX_ID_FIELD.to_string(), id.to_value());
        for (name, descriptor) in &attributes {
            let value = match (descriptor, values.remove(*name)) {
                (Descriptor::Field(_), Some(value)) => value,
                (Descriptor::Field(_), None) if exists => continue,
                (Descriptor::Field(field), None) => self.fill(root, name, field),
                (Descriptor::Relation(relation), _) => {
                    if exists && !input.contains_key(*name) {
                        continue;
                    }
                    relation.kind().empty_value()
                }
            };
            record.insert((*name).to_string(), value);
        }
        // Undeclared discriminator fields still travel with the row.
        record.extend(values);

        let owner = Owner {
            concrete: concrete.name(),
            root,
            input,
        };
        for (name, descriptor) in &attributes {
            let Descriptor::Relation(relation) = descriptor else {
                continue;
            };
            match input.get(*name) {
                None | Some(Value::Null) => {}
                Some(value) => self.attach(&owner, &mut record, relation, value)?,
            }
        }

        tracing::trace!(entity = concrete.name(), id = %id, patch = exists, "record normalized");
        if exists {
            self.patches.insert((table.to_string(), id.clone()));
        }
        self.delta.merge(table, id.clone(), record);

        Ok(Placed {
            entity: concrete.name().to_string(),
            table: table.to_string(),
            id,
        })
    }

    /// The record the discriminator is read from, and whether it patches a
    /// stored row.
    ///
    /// An update that names no discriminator keeps the stored row's, so a
    /// partial patch never retypes a derived row.
    fn typing_record<'i>(
        &self,
        entity: &str,
        input: &'i Record,
    ) -> Result<(Cow<'i, Record>, bool), RelataError> {
        let (WriteMode::Update, Some(store)) = (self.mode, self.store) else {
            return Ok((Cow::Borrowed(input), false));
        };
        let root = self.registry.resolve_base(entity)?;
        let Some(row) = root
            .key()
            .index_id(input)
            .and_then(|id| store.get(root.name(), &id))
        else {
            return Ok((Cow::Borrowed(input), false));
        };
        if root.types().is_empty() {
            return Ok((Cow::Borrowed(input), true));
        }

        let field = self.registry.discriminator_field(root.name())?;
        let named = input.get(field).is_some_and(|v| !v.is_null());
        match row.get(field).filter(|v| !v.is_null()) {
            Some(value) if !named => {
                let mut typed = input.clone();
                typed.insert(field.to_string(), value.clone());
                Ok((Cow::Owned(typed), true))
            }
            _ => Ok((Cow::Borrowed(input), true)),
        }
    }

    /// Derive the index id, generating missing key values where the key field
    /// is a generated kind and falling back to a synthetic id otherwise.
    fn index_id(
        &mut self,
        root: &EntityDef,
        attributes: &[(&str, &Descriptor)],
        values: &mut Record,
    ) -> IndexId {
        let key = root.key();
        if let Some(id) = key.index_id(values) {
            return id;
        }

        for (name, descriptor) in attributes {
            let Descriptor::Field(field) = descriptor else {
                continue;
            };
            let missing = values.get(*name).is_none_or(Value::is_null);
            if key.contains(name) && field.is_generated() && missing {
                let generated = self.generate(root.name(), name, field);
                values.insert((*name).to_string(), generated);
            }
        }
        if let Some(id) = key.index_id(values) {
            return id;
        }

        self.synthetic += 1;
        let id = IndexId::new(format!("{NO_KEY_PREFIX}{}", self.synthetic));
        if self.mode == WriteMode::Update {
            tracing::warn!(entity = root.name(), id = %id, "update payload without a primary key; writing a new record");
        }
        id
    }

    /// Value of a field the input left out.
    fn fill(&mut self, root: &EntityDef, name: &str, field: &FieldDef) -> Value {
        if field.is_generated() {
            self.generate(root.name(), name, field)
        } else if root.key().contains(name) {
            // The record is keyed by a synthetic id; a default would not match it.
            Value::Null
        } else {
            field.default_value()
        }
    }

    fn generate(&mut self, table: &str, name: &str, field: &FieldDef) -> Value {
        if field.kind() == FieldKind::Increment {
            let slot = (table.to_string(), name.to_string());
            let stored = self
                .store
                .and_then(|s| s.table(table))
                .and_then(|t| t.max_integer(name));
            let pending = self.delta.table(table).and_then(|t| t.max_integer(name));
            let issued = self.issued.get(&slot).copied();
            let next = [stored, pending, issued]
                .into_iter()
                .flatten()
                .max()
                .unwrap_or(0)
                + 1;
            self.issued.insert(slot, next);
            return Value::from(next);
        }
        match field.generator() {
            Some(generator) => generator(),
            None => {
                self.uid_seed += 1;
                Value::String(format!("{UID_PREFIX}{}", self.uid_seed))
            }
        }
    }

    fn attach(
        &mut self,
        owner: &Owner<'_>,
        record: &mut Record,
        relation: &RelationDef,
        value: &Value,
    ) -> Result<(), RelataError> {
        match relation {
            RelationDef::HasOne {
                related,
                foreign_key,
                local_key,
            }
            | RelationDef::HasMany {
                related,
                foreign_key,
                local_key,
            } => {
                let local = owner.key(record, local_key.as_deref());
                for item in objects(value) {
                    let child = self.visit(related, item)?;
                    self.stamp(&child, foreign_key, local.clone());
                }
            }

            RelationDef::BelongsTo {
                parent,
                foreign_key,
                owner_key,
            } => {
                let key = match value {
                    Value::Object(item) => {
                        let placed = self.visit(parent, item)?;
                        self.key_of(&placed, owner_key.as_deref())?
                    }
                    Value::Array(_) => return Ok(()),
                    scalar => scalar.clone(),
                };
                record.insert(foreign_key.clone(), key);
            }

            RelationDef::HasManyBy {
                parent,
                foreign_key,
                owner_key,
            } => {
                let mut keys = Vec::new();
                for item in items(value) {
                    match item {
                        Value::Object(item) => {
                            let placed = self.visit(parent, item)?;
                            keys.push(self.key_of(&placed, owner_key.as_deref())?);
                        }
                        Value::Null => {}
                        scalar => keys.push(scalar.clone()),
                    }
                }
                record.insert(foreign_key.clone(), Value::Array(keys));
            }

            // The intermediate row is unknown here; the related records are
            // stored as they are.
            RelationDef::HasManyThrough { related, .. } => {
                for item in objects(value) {
                    self.visit(related, item)?;
                }
            }

            RelationDef::BelongsToMany {
                related,
                pivot,
                foreign_pivot_key,
                related_pivot_key,
                parent_key,
                related_key,
            } => {
                let local = owner.key(record, parent_key.as_deref());
                for item in items(value) {
                    let Some(edge) = self.related(related, item, related_key.as_deref())? else {
                        continue;
                    };
                    let mut row = Record::new();
                    row.insert(foreign_pivot_key.clone(), local.clone());
                    row.insert(related_pivot_key.clone(), edge.key.clone());
                    self.pivot(pivot, row, &[&edge.key, &local], edge.extra)?;
                }
            }

            RelationDef::MorphOne {
                related,
                id,
                type_field,
                local_key,
            }
            | RelationDef::MorphMany {
                related,
                id,
                type_field,
                local_key,
            } => {
                let local = owner.key(record, local_key.as_deref());
                let kind = Value::String(owner.concrete.to_string());
                for item in objects(value) {
                    let child = self.visit(related, item)?;
                    self.stamp(&child, id, local.clone());
                    self.stamp(&child, type_field, kind.clone());
                }
            }

            RelationDef::MorphTo { id, type_field } => {
                let target = owner.input.get(type_field).cloned().unwrap_or(Value::Null);
                match value {
                    Value::Object(item) => {
                        let Some(name) = target.as_str().filter(|n| self.registry.contains(n))
                        else {
                            tracing::warn!(
                                entity = owner.concrete,
                                type_field = type_field.as_str(),
                                target = %target,
                                "polymorphic parent names no registered entity; skipped"
                            );
                            return Ok(());
                        };
                        let placed = self.visit(name, item)?;
                        record.insert(id.clone(), self.key_of(&placed, None)?);
                    }
                    Value::Array(_) => return Ok(()),
                    scalar => {
                        record.insert(id.clone(), scalar.clone());
                    }
                }
                if !target.is_null() {
                    record.insert(type_field.clone(), target);
                }
            }

            RelationDef::MorphToMany {
                related,
                pivot,
                related_id,
                id,
                type_field,
                parent_key,
                related_key,
            } => {
                let local = owner.key(record, parent_key.as_deref());
                let kind = Value::String(owner.concrete.to_string());
                for item in items(value) {
                    let Some(edge) = self.related(related, item, related_key.as_deref())? else {
                        continue;
                    };
                    let mut row = Record::new();
                    row.insert(related_id.clone(), edge.key.clone());
                    row.insert(id.clone(), local.clone());
                    row.insert(type_field.clone(), kind.clone());
                    self.pivot(pivot, row, &[&edge.key, &local, &kind], edge.extra)?;
                }
            }

            // Same column layout as MorphToMany seen from the other side, so
            // both directions address the same pivot row.
            RelationDef::MorphedByMany {
                related,
                pivot,
                related_id,
                id,
                type_field,
                parent_key,
                related_key,
            } => {
                let local = owner.key(record, parent_key.as_deref());
                for item in items(value) {
                    let Some(edge) = self.related(related, item, related_key.as_deref())? else {
                        continue;
                    };
                    let kind = Value::String(edge.entity);
                    let mut row = Record::new();
                    row.insert(related_id.clone(), local.clone());
                    row.insert(id.clone(), edge.key.clone());
                    row.insert(type_field.clone(), kind.clone());
                    self.pivot(pivot, row, &[&local, &edge.key, &kind], edge.extra)?;
                }
            }
        }
        Ok(())
    }

    /// Resolve one many-to-many item: a nested record is normalized, a scalar
    /// is taken as the related key itself.
    fn related<'v>(
        &mut self,
        related: &str,
        item: &'v Value,
        related_key: Option<&str>,
    ) -> Result<Option<Edge<'v>>, RelataError> {
        match item {
            Value::Null | Value::Array(_) => Ok(None),
            Value::Object(record) => {
                let placed = self.visit(related, record)?;
                Ok(Some(Edge {
                    key: self.key_of(&placed, related_key)?,
                    entity: placed.entity,
                    extra: record.get(PIVOT_FIELD).and_then(Value::as_object),
                }))
            }
            scalar => Ok(Some(Edge {
                key: scalar.clone(),
                entity: related.to_string(),
                extra: None,
            })),
        }
    }

    /// Write a pivot row. Its id is the pivot entity's own key when the row
    /// carries it, otherwise `parts` joined by the pivot separator.
    fn pivot(
        &mut self,
        pivot: &str,
        keys: Record,
        parts: &[&Value],
        extra: Option<&Record>,
    ) -> Result<(), RelataError> {
        let registry = self.registry;
        let root = registry.resolve_base(pivot)?;
        let fields = registry.fields(root.name())?;

        let mut row = Record::new();
        if let Some(extra) = extra {
            for (name, value) in extra {
                let value = match fields.iter().find(|(n, _)| *n == name.as_str()) {
                    Some((_, field)) => field.cast(value.clone()),
                    None => value.clone(),
                };
                row.insert(name.clone(), value);
            }
        }
        row.extend(keys);

        let id = root.key().index_id(&row).unwrap_or_else(|| {
            let joined: Vec<String> = parts
                .iter()
                .map(|v| IndexId::from_value(v).map(|id| id.to_string()).unwrap_or_default())
                .collect();
            IndexId::new(joined.join(PIVOT_SEPARATOR))
        });

        if self.delta.get(root.name(), &id).is_none() {
            for (name, field) in &fields {
                if !row.contains_key(*name) {
                    let value = if field.is_generated() {
                        self.generate(root.name(), name, field)
                    } else {
                        field.default_value()
                    };
                    row.insert((*name).to_string(), value);
                }
            }
        }

        tracing::trace!(pivot = root.name(), id = %id, "pivot row");
        self.delta.merge(root.name(), id, row);
        Ok(())
    }

    /// Key `key` (or the entity's join key) of a record already in the delta.
    fn key_of(&self, placed: &Placed, key: Option<&str>) -> Result<Value, RelataError> {
        let root = self.registry.resolve(&placed.table)?;
        let key = key.unwrap_or_else(|| root.default_join_key());
        Ok(self
            .delta
            .get(&placed.table, &placed.id)
            .map(|row| key_value(row, key, root.key()))
            .unwrap_or(Value::Null))
    }

    fn stamp(&mut self, placed: &Placed, field: &str, value: Value) {
        if let Some(row) = self.delta.get_mut(&placed.table, &placed.id) {
            row.insert(field.to_string(), value);
        }
    }
}

/// A resolved many-to-many target.
struct Edge<'v> {
    key: Value,
    entity: String,
    extra: Option<&'v Record>,
}

fn items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Nested records of a relation value. Bare scalars name already-known keys
/// and are not normalized.
fn objects(value: &Value) -> Vec<&Record> {
    items(value).into_iter().filter_map(Value::as_object).collect()
}

// =============================================================================
// TESTS
// =============================================================================
