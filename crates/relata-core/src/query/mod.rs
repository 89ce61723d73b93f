//! # Query Engine
//!
//! Filters, orders and rebuilds records of one entity.
//!
//! ## Pipeline
//!
//! `get` runs these stages in order:
//! 1. candidate rows (a base entity reads its whole family)
//! 2. `before_select` hooks
//! 3. where/has predicates against the flat rows
//! 4. `after_where` hooks
//! 5. stable multi-key ordering, then `after_order_by` hooks
//! 6. offset and limit, then `after_limit` hooks
//! 7. hydration, loading the requested relations recursively
//!
//! Relation sub-queries (constraints of `with` and `where_has`) run the same
//! stages without hooks.

mod conditions;
mod item;
mod loader;
mod order;
mod relations;

pub use conditions::{Conditions, FieldTest, WhereFn, WhereVerdict};
pub use item::{Item, Slot};
pub use order::KeyFn;

use crate::discriminator;
use crate::hooks::{HookPoint, Hooks};
use crate::primitives::INDEX_ID_FIELD;
use crate::schema::{Descriptor, PrimaryKey, Registry, RelationDef};
use crate::store::Store;
use crate::{Comparator, Direction, IndexId, Record, RelataError};
use conditions::{CountRule, HasClause, group_by_entity};
use loader::{LoadNode, LoadTree};
use order::{Order, OrderKey};
use relations::{Related, related};
use serde_json::Value;
use std::sync::Arc;

/// A function refining a relation sub-query.
pub type Constraint = Arc<dyn for<'q> Fn(Query<'q>) -> Query<'q> + Send + Sync>;

/// Wrap a closure as a [`Constraint`].
pub fn constraint<F>(f: F) -> Constraint
where
    F: for<'q> Fn(Query<'q>) -> Query<'q> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a query reads.
#[derive(Clone, Copy)]
pub(crate) struct Env<'a> {
    pub registry: &'a Registry,
    pub store: &'a Store,
}

enum Source {
    Table,
    Scoped(Vec<IndexId>),
}

impl Source {
    /// Scope to `ids`, dropping repeats.
    fn scoped(mut ids: Vec<IndexId>) -> Self {
        let mut seen = Vec::with_capacity(ids.len());
        ids.retain(|id| {
            let fresh = !seen.contains(id);
            if fresh {
                seen.push(id.clone());
            }
            fresh
        });
        Self::Scoped(ids)
    }
}

/// A fluent query over one entity.
pub struct Query<'a> {
    env: Env<'a>,
    hooks: Option<&'a Hooks>,
    entity: String,
    source: Source,
    conditions: Conditions,
    orders: Vec<Order>,
    offset: usize,
    limit: Option<usize>,
    load: LoadTree,
}

impl<'a> Query<'a> {
    /// Query `entity` in `store`.
    pub fn new(registry: &'a Registry, store: &'a Store, entity: &str) -> Result<Self, RelataError> {
        registry.resolve(entity)?;
        Ok(Self::build(Env { registry, store }, entity, Source::Table))
    }

    /// Query a fixed set of rows, keeping their order.
    pub(crate) fn scoped(env: Env<'a>, entity: &str, ids: Vec<IndexId>) -> Self {
        Self::build(env, entity, Source::scoped(ids))
    }

    fn build(env: Env<'a>, entity: &str, source: Source) -> Self {
        Self {
            env,
            hooks: None,
            entity: entity.to_string(),
            source,
            conditions: Conditions::default(),
            orders: Vec::new(),
            offset: 0,
            limit: None,
            load: LoadTree::default(),
        }
    }

    /// Run the query pipeline's hook points from `hooks`.
    #[must_use]
    pub const fn with_hooks(mut self, hooks: &'a Hooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    // -------------------------------------------------------------------------
    // Predicates
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.where_eq(field, value);
        self
    }

    #[must_use]
    pub fn where_in<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.where_in(field, values);
        self
    }

    #[must_use]
    pub fn where_fn(
        mut self,
        field: &str,
        test: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.conditions.where_fn(field, test);
        self
    }

    /// Closure predicate; see [`WhereFn`].
    #[must_use]
    pub fn where_closure(
        mut self,
        closure: impl Fn(&Record, &mut Conditions, &Item) -> WhereVerdict + Send + Sync + 'static,
    ) -> Self {
        self.conditions.where_closure(closure);
        self
    }

    #[must_use]
    pub fn or_where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.or_where_eq(field, value);
        self
    }

    #[must_use]
    pub fn or_where_in<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.or_where_in(field, values);
        self
    }

    #[must_use]
    pub fn or_where_fn(
        mut self,
        field: &str,
        test: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.conditions.or_where_fn(field, test);
        self
    }

    #[must_use]
    pub fn or_where_closure(
        mut self,
        closure: impl Fn(&Record, &mut Conditions, &Item) -> WhereVerdict + Send + Sync + 'static,
    ) -> Self {
        self.conditions.or_where_closure(closure);
        self
    }

    /// Keep the record with primary key `key`.
    ///
    /// Composite keys take an array with one value per key field; any other
    /// shape is rejected before rows are scanned.
    pub fn where_id(mut self, key: impl Into<Value>) -> Result<Self, RelataError> {
        let id = self.primary_key()?.id_for(&key.into())?;
        self.conditions.ids(vec![id]);
        Ok(self)
    }

    /// Keep the records whose primary key is one of `keys` (an array).
    pub fn where_id_in(mut self, keys: impl Into<Value>) -> Result<Self, RelataError> {
        let keys = keys.into();
        let Value::Array(keys) = keys else {
            return Err(RelataError::InvalidArgument(format!(
                "where_id_in expects an array of keys, got `{keys}`"
            )));
        };
        let primary = self.primary_key()?;
        let ids = keys
            .iter()
            .map(|key| primary.id_for(key))
            .collect::<Result<Vec<_>, _>>()?;
        self.conditions.ids(ids);
        Ok(self)
    }

    fn primary_key(&self) -> Result<&'a PrimaryKey, RelataError> {
        Ok(self.env.registry.resolve_base(&self.entity)?.key())
    }

    // -------------------------------------------------------------------------
    // Relation existence
    // -------------------------------------------------------------------------

    fn has_clause(
        mut self,
        relation: &str,
        constraint: Option<Constraint>,
        rule: CountRule,
        negate: bool,
    ) -> Self {
        self.conditions.has(HasClause {
            relation: relation.to_string(),
            constraint,
            rule,
            negate,
        });
        self
    }

    /// Keep records with at least one related record.
    #[must_use]
    pub fn has(self, relation: &str) -> Self {
        self.has_clause(relation, None, CountRule::Exists, false)
    }

    /// Keep records with exactly `count` related records.
    #[must_use]
    pub fn has_count(self, relation: &str, count: usize) -> Self {
        self.has_clause(relation, None, CountRule::Compare(Comparator::Eq, count), false)
    }

    /// Keep records whose related count satisfies `operator count`
    /// (`=`, `>`, `>=`, `<`, `<=`). An unknown operator tests existence.
    #[must_use]
    pub fn has_compared(self, relation: &str, operator: &str, count: usize) -> Self {
        self.has_clause(relation, None, count_rule(operator, count), false)
    }

    #[must_use]
    pub fn has_not(self, relation: &str) -> Self {
        self.has_clause(relation, None, CountRule::Exists, true)
    }

    #[must_use]
    pub fn has_not_count(self, relation: &str, count: usize) -> Self {
        self.has_clause(relation, None, CountRule::Compare(Comparator::Eq, count), true)
    }

    #[must_use]
    pub fn has_not_compared(self, relation: &str, operator: &str, count: usize) -> Self {
        self.has_clause(relation, None, count_rule(operator, count), true)
    }

    /// Keep records with at least one related record matching `constraint`.
    #[must_use]
    pub fn where_has<F>(self, relation: &str, constraint: F) -> Self
    where
        F: for<'q> Fn(Query<'q>) -> Query<'q> + Send + Sync + 'static,
    {
        self.has_clause(relation, Some(Arc::new(constraint)), CountRule::Exists, false)
    }

    /// Keep records with no related record matching `constraint`.
    #[must_use]
    pub fn where_has_not<F>(self, relation: &str, constraint: F) -> Self
    where
        F: for<'q> Fn(Query<'q>) -> Query<'q> + Send + Sync + 'static,
    {
        self.has_clause(relation, Some(Arc::new(constraint)), CountRule::Exists, true)
    }

    // -------------------------------------------------------------------------
    // Ordering and paging
    // -------------------------------------------------------------------------

    /// Add a sort key. Earlier keys take precedence.
    #[must_use]
    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.orders.push(Order {
            key: OrderKey::Field(field.to_string()),
            direction,
        });
        self
    }

    /// Add a computed sort key.
    #[must_use]
    pub fn order_by_with(
        mut self,
        key: impl Fn(&Record) -> Value + Send + Sync + 'static,
        direction: Direction,
    ) -> Self {
        self.orders.push(Order {
            key: OrderKey::Computed(Arc::new(key)),
            direction,
        });
        self
    }

    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    // -------------------------------------------------------------------------
    // Eager loading
    // -------------------------------------------------------------------------

    /// Load the relations named by a path expression (`a.b`, `a.b|c`, `*`).
    #[must_use]
    pub fn with(mut self, path: &str) -> Self {
        self.load.add(path, None);
        self
    }

    /// Load a path, refining its last relation with `constraint`.
    #[must_use]
    pub fn with_where<F>(mut self, path: &str, constraint: F) -> Self
    where
        F: for<'q> Fn(Query<'q>) -> Query<'q> + Send + Sync + 'static,
    {
        self.load.add(path, Some(Arc::new(constraint)));
        self
    }

    /// Load every relation declared on the entity.
    #[must_use]
    pub fn with_all(self) -> Self {
        self.with("*")
    }

    /// Load every relation, refining each with `constraint`.
    #[must_use]
    pub fn with_all_where<F>(self, constraint: F) -> Self
    where
        F: for<'q> Fn(Query<'q>) -> Query<'q> + Send + Sync + 'static,
    {
        self.with_where("*", constraint)
    }

    /// Load every relation, and theirs, `depth` levels below the first.
    ///
    /// Depth is capped so cyclic schemas terminate.
    #[must_use]
    pub fn with_all_recursive(mut self, depth: usize) -> Self {
        self.load.recursive(depth.saturating_add(1));
        self
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Matching records, filtered, ordered, paged and hydrated.
    pub fn get(self) -> Result<Vec<Item>, RelataError> {
        if !self.load.is_empty() {
            self.load.validate(self.env.registry, &self.entity)?;
        }
        let records = self.select()?;
        tracing::debug!(entity = %self.entity, rows = records.len(), "query executed");
        records
            .iter()
            .map(|record| hydrate(self.env, &self.entity, record, &self.load, None))
            .collect()
    }

    pub fn first(self) -> Result<Option<Item>, RelataError> {
        Ok(self.get()?.into_iter().next())
    }

    pub fn last(self) -> Result<Option<Item>, RelataError> {
        Ok(self.get()?.pop())
    }

    /// Every row of the entity, hydrated with the requested relations.
    /// Predicates, ordering and paging are ignored.
    pub fn all(mut self) -> Result<Vec<Item>, RelataError> {
        self.conditions = Conditions::default();
        self.orders.clear();
        self.offset = 0;
        self.limit = None;
        self.get()
    }

    /// The record with primary key `key` (an array for composite keys).
    ///
    /// Addresses the row directly instead of scanning the table.
    pub fn find(mut self, key: impl Into<Value>) -> Result<Option<Item>, RelataError> {
        let id = self.primary_key()?.id_for(&key.into())?;
        self.source = Source::Scoped(vec![id]);
        self.first()
    }

    /// The records with the given primary keys, in the order given.
    pub fn find_in<I, V>(mut self, keys: I) -> Result<Vec<Item>, RelataError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let primary = self.primary_key()?;
        let ids = keys
            .into_iter()
            .map(|key| primary.id_for(&key.into()))
            .collect::<Result<Vec<_>, _>>()?;
        self.source = Source::scoped(ids);
        self.get()
    }

    /// Number of matching records (paging applies, hydration does not).
    pub fn count(self) -> Result<usize, RelataError> {
        Ok(self.select()?.len())
    }

    pub fn exists(self) -> Result<bool, RelataError> {
        Ok(self.count()? > 0)
    }

    /// Largest numeric value of `field` among matching rows; 0 when none.
    pub fn max(self, field: &str) -> Result<f64, RelataError> {
        let numbers = self.numbers(field)?;
        Ok(numbers.iter().copied().reduce(f64::max).unwrap_or(0.0))
    }

    /// Smallest numeric value of `field` among matching rows; 0 when none.
    pub fn min(self, field: &str) -> Result<f64, RelataError> {
        let numbers = self.numbers(field)?;
        Ok(numbers.iter().copied().reduce(f64::min).unwrap_or(0.0))
    }

    /// Sum of the numeric values of `field` among matching rows.
    pub fn sum(self, field: &str) -> Result<f64, RelataError> {
        Ok(self.numbers(field)?.iter().sum())
    }

    fn numbers(&self, field: &str) -> Result<Vec<f64>, RelataError> {
        Ok(self
            .select()?
            .iter()
            .filter_map(|record| record.get(field).and_then(Value::as_f64))
            .collect())
    }

    /// Run stages 1 to 6 of the pipeline.
    fn select(&self) -> Result<Vec<Record>, RelataError> {
        let registry = self.env.registry;
        let mut records: Vec<Record> = match &self.source {
            Source::Table => self
                .env
                .store
                .rows(registry, &self.entity)?
                .into_iter()
                .map(|(_, record)| record.clone())
                .collect(),
            Source::Scoped(ids) => {
                let mut records = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(record) = self.env.store.find(registry, &self.entity, id)? {
                        records.push(record.clone());
                    }
                }
                records
            }
        };

        records = self.run_hooks(HookPoint::BeforeSelect, records)?;
        if !self.conditions.is_empty() {
            let mut kept = Vec::with_capacity(records.len());
            for record in records {
                if let Some(record) = self.conditions.evaluate(self.env, &self.entity, record)? {
                    kept.push(record);
                }
            }
            records = kept;
        }
        records = self.run_hooks(HookPoint::AfterWhere, records)?;

        records = order::sort(records, &self.orders);
        records = self.run_hooks(HookPoint::AfterOrderBy, records)?;

        let records = records
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();
        self.run_hooks(HookPoint::AfterLimit, records)
    }

    fn run_hooks(&self, point: HookPoint, records: Vec<Record>) -> Result<Vec<Record>, RelataError> {
        match self.hooks {
            Some(hooks) => hooks.run(point, &self.entity, records),
            None => Ok(records),
        }
    }
}

fn count_rule(operator: &str, count: usize) -> CountRule {
    match Comparator::parse(operator) {
        Some(comparator) => CountRule::Compare(comparator, count),
        None => CountRule::Exists,
    }
}

// =============================================================================
// HYDRATION
// =============================================================================

/// Rebuild one flat row read as `entity`, loading the relations in `load`.
pub(crate) fn hydrate(
    env: Env<'_>,
    entity: &str,
    record: &Record,
    load: &LoadTree,
    pivot: Option<&Record>,
) -> Result<Item, RelataError> {
    let registry = env.registry;
    let concrete = discriminator::resolve(registry, entity, record)?;

    let mut fields = Vec::new();
    for (name, descriptor) in registry.attributes(concrete.name())? {
        let slot = match descriptor {
            Descriptor::Field(field) => {
                let stored = record.get(name).cloned();
                Slot::Value(field.hydrate(stored.unwrap_or_else(|| field.default_value())))
            }
            Descriptor::Relation(relation) => match load.child(name) {
                Some(node) => load_relation(env, concrete.name(), record, relation, &node)?,
                None => Slot::empty(relation.kind()),
            },
        };
        fields.push((name.to_string(), slot));
    }

    let id = record
        .get(INDEX_ID_FIELD)
        .and_then(IndexId::from_value)
        .unwrap_or_else(|| IndexId::new(""));
    Ok(Item::new(
        concrete.name().to_string(),
        id,
        fields,
        pivot.cloned(),
    ))
}

fn load_relation(
    env: Env<'_>,
    concrete: &str,
    record: &Record,
    relation: &RelationDef,
    node: &LoadNode,
) -> Result<Slot, RelataError> {
    let rows = related(env, concrete, record, relation)?;
    let mut items = Vec::with_capacity(rows.len());

    match &node.constraint {
        None => {
            for row in &rows {
                items.push(hydrate(env, &row.entity, row.record, &node.children, row.pivot)?);
            }
        }
        Some(constraint) => {
            for (target, ids) in group_by_entity(&rows) {
                let query = constraint(Query::scoped(env, target, ids));
                query.load.validate(env.registry, target)?;
                let mut load = query.load.clone();
                load.absorb(node.children.clone());
                for matched in query.select()? {
                    let pivot = pivot_of(&rows, target, &matched);
                    items.push(hydrate(env, target, &matched, &load, pivot)?);
                }
            }
        }
    }

    Ok(if relation.kind().is_plural() {
        Slot::Many(items)
    } else {
        Slot::One(items.into_iter().next().map(Box::new))
    })
}

fn pivot_of<'a>(rows: &[Related<'a>], entity: &str, record: &Record) -> Option<&'a Record> {
    let id = record.get(INDEX_ID_FIELD).and_then(IndexId::from_value)?;
    rows.iter()
        .find(|row| row.entity == entity && row.id == id)
        .and_then(|row| row.pivot)
}

// =============================================================================
// TESTS
// =============================================================================
