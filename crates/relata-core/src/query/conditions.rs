//! Predicate groups.
//!
//! Clauses are combined as `(every AND clause) OR (any OR clause)`: a record
//! matches when all AND-combined clauses hold, or when at least one
//! OR-combined clause does. An empty group matches everything.

use super::item::Item;
use super::relations::{Related, related, relation_for};
use super::{Constraint, Env, Query, hydrate};
use super::loader::LoadTree;
use crate::discriminator;
use crate::primitives::INDEX_ID_FIELD;
use crate::{Comparator, IndexId, Record, RelataError};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

static NULL: Value = Value::Null;

/// Predicate over one field value.
pub type FieldTest = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Closure predicate receiving the flat row, a nested predicate group and the
/// hydrated record.
pub type WhereFn = Arc<dyn Fn(&Record, &mut Conditions, &Item) -> WhereVerdict + Send + Sync>;

/// What a where-closure decided for one row.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereVerdict {
    Keep,
    Drop,
    /// Decide by the clauses the closure added to the nested group.
    Defer,
    /// Keep the row, substituting this record for it in the results.
    Replace(Record),
}

impl From<bool> for WhereVerdict {
    fn from(keep: bool) -> Self {
        if keep { Self::Keep } else { Self::Drop }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boolean {
    And,
    Or,
}

/// How a relation count is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CountRule {
    Exists,
    Compare(Comparator, usize),
}

impl CountRule {
    const fn test(self, count: usize) -> bool {
        match self {
            Self::Exists => count > 0,
            Self::Compare(comparator, target) => comparator.test(count, target),
        }
    }
}

#[derive(Clone)]
pub(crate) struct HasClause {
    pub relation: String,
    pub constraint: Option<Constraint>,
    pub rule: CountRule,
    pub negate: bool,
}

#[derive(Clone)]
enum Condition {
    Equals(String, Value),
    In(String, Vec<Value>),
    Test(String, FieldTest),
    Closure(WhereFn),
    Ids(Vec<IndexId>),
    Has(HasClause),
}

/// An ordered group of AND/OR combined clauses.
#[derive(Clone, Default)]
pub struct Conditions {
    clauses: Vec<(Boolean, Condition)>,
}

impl Conditions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    fn push(&mut self, boolean: Boolean, condition: Condition) -> &mut Self {
        self.clauses.push((boolean, condition));
        self
    }

    /// `field` equals `value`.
    pub fn where_eq(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Boolean::And, Condition::Equals(field.into(), value.into()))
    }

    /// `field` equals one of `values`.
    pub fn where_in<I, V>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(Boolean::And, Condition::In(field.into(), values))
    }

    /// `test` holds for the value of `field` (`null` when missing).
    pub fn where_fn(
        &mut self,
        field: &str,
        test: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.push(Boolean::And, Condition::Test(field.into(), Arc::new(test)))
    }

    pub fn where_closure(
        &mut self,
        closure: impl Fn(&Record, &mut Self, &Item) -> WhereVerdict + Send + Sync + 'static,
    ) -> &mut Self {
        self.push(Boolean::And, Condition::Closure(Arc::new(closure)))
    }

    pub fn or_where_eq(&mut self, field: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Boolean::Or, Condition::Equals(field.into(), value.into()))
    }

    pub fn or_where_in<I, V>(&mut self, field: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(Boolean::Or, Condition::In(field.into(), values))
    }

    pub fn or_where_fn(
        &mut self,
        field: &str,
        test: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.push(Boolean::Or, Condition::Test(field.into(), Arc::new(test)))
    }

    pub fn or_where_closure(
        &mut self,
        closure: impl Fn(&Record, &mut Self, &Item) -> WhereVerdict + Send + Sync + 'static,
    ) -> &mut Self {
        self.push(Boolean::Or, Condition::Closure(Arc::new(closure)))
    }

    pub(crate) fn ids(&mut self, ids: Vec<IndexId>) -> &mut Self {
        self.push(Boolean::And, Condition::Ids(ids))
    }

    pub(crate) fn has(&mut self, clause: HasClause) -> &mut Self {
        self.push(Boolean::And, Condition::Has(clause))
    }

    /// Evaluate the group against a flat row read as `entity`.
    ///
    /// Returns the row to keep, or `None` when the group rejects it. A
    /// closure may substitute the row; later clauses see the substitute.
    pub(crate) fn evaluate(
        &self,
        env: Env<'_>,
        entity: &str,
        mut record: Record,
    ) -> Result<Option<Record>, RelataError> {
        if self.clauses.is_empty() {
            return Ok(Some(record));
        }

        let mut all = None;
        let mut any = None;
        for (boolean, condition) in &self.clauses {
            let outcome = match boolean {
                Boolean::And if all == Some(false) => continue,
                Boolean::Or if any == Some(true) => continue,
                Boolean::And => &mut all,
                Boolean::Or => &mut any,
            };
            let held = match condition.test(env, entity, &record)? {
                WhereVerdict::Replace(replacement) => {
                    record = replacement;
                    true
                }
                verdict => verdict == WhereVerdict::Keep,
            };
            *outcome = Some(held);
        }
        Ok((all == Some(true) || any == Some(true)).then_some(record))
    }
}

impl fmt::Debug for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditions")
            .field("clauses", &self.clauses.len())
            .finish()
    }
}

impl Condition {
    fn test(
        &self,
        env: Env<'_>,
        entity: &str,
        record: &Record,
    ) -> Result<WhereVerdict, RelataError> {
        let value_of = |field: &String| record.get(field).unwrap_or(&NULL);
        let held = match self {
            Self::Equals(field, value) => value_of(field) == value,
            Self::In(field, values) => values.contains(value_of(field)),
            Self::Test(field, test) => test(value_of(field)),
            Self::Ids(ids) => record
                .get(INDEX_ID_FIELD)
                .and_then(IndexId::from_value)
                .is_some_and(|id| ids.contains(&id)),
            Self::Closure(closure) => {
                let item = hydrate(env, entity, record, &LoadTree::default(), None)?;
                let mut nested = Conditions::default();
                return match closure(record, &mut nested, &item) {
                    WhereVerdict::Defer => Ok(match nested.evaluate(env, entity, record.clone())? {
                        Some(kept) if kept != *record => WhereVerdict::Replace(kept),
                        Some(_) => WhereVerdict::Keep,
                        None => WhereVerdict::Drop,
                    }),
                    verdict => Ok(verdict),
                };
            }
            Self::Has(clause) => {
                let count = count_related(env, entity, record, clause)?;
                clause.rule.test(count) != clause.negate
            }
        };
        Ok(held.into())
    }
}

fn count_related(
    env: Env<'_>,
    entity: &str,
    record: &Record,
    clause: &HasClause,
) -> Result<usize, RelataError> {
    let concrete = discriminator::concrete_name(env.registry, entity, record)?;
    let Some(relation) = relation_for(env.registry, entity, concrete, &clause.relation)? else {
        return Ok(0);
    };
    let rows = related(env, concrete, record, relation)?;
    match &clause.constraint {
        None => Ok(rows.len()),
        Some(constraint) => {
            let mut count = 0;
            for (target, ids) in group_by_entity(&rows) {
                count += constraint(Query::scoped(env, target, ids)).select()?.len();
            }
            Ok(count)
        }
    }
}

/// Related row ids grouped per entity, in order of first appearance.
pub(crate) fn group_by_entity<'r>(rows: &'r [Related<'_>]) -> Vec<(&'r str, Vec<IndexId>)> {
    let mut groups: Vec<(&str, Vec<IndexId>)> = Vec::new();
    for row in rows {
        match groups.iter_mut().find(|(entity, _)| *entity == row.entity) {
            Some((_, ids)) => ids.push(row.id.clone()),
            None => groups.push((row.entity.as_str(), vec![row.id.clone()])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityDef, FieldDef, Registry};
    use crate::store::Store;
    use serde_json::json;

    fn fixture() -> (Registry, Store) {
        let mut registry = Registry::new();
        registry.register(
            EntityDef::new("users")
                .field("id", FieldDef::attr(Value::Null))
                .field("name", FieldDef::string(""))
                .field("age", FieldDef::number(0)),
        );
        (registry, Store::new())
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn run(conditions: &Conditions, value: Value) -> Option<Record> {
        let (registry, store) = fixture();
        let env = Env {
            registry: &registry,
            store: &store,
        };
        conditions
            .evaluate(env, "users", record(value))
            .expect("evaluate")
    }

    fn check(conditions: &Conditions, value: Value) -> bool {
        run(conditions, value).is_some()
    }

    #[test]
    fn and_clauses_all_hold() {
        let mut conditions = Conditions::default();
        conditions.where_eq("name", "jo").where_fn("age", |v| v.as_i64() > Some(20));

        assert!(check(&conditions, json!({"name": "jo", "age": 30})));
        assert!(!check(&conditions, json!({"name": "jo", "age": 10})));
    }

    #[test]
    fn or_clauses_widen_the_group() {
        let mut conditions = Conditions::default();
        conditions.where_eq("name", "jo").or_where_in("age", [1, 2]);

        assert!(check(&conditions, json!({"name": "jo", "age": 9})));
        assert!(check(&conditions, json!({"name": "al", "age": 2})));
        assert!(!check(&conditions, json!({"name": "al", "age": 9})));
    }

    #[test]
    fn only_or_clauses() {
        let mut conditions = Conditions::default();
        conditions.or_where_eq("name", "jo");
        assert!(!check(&conditions, json!({"name": "al"})));
        assert!(check(&conditions, json!({"name": "jo"})));
    }

    #[test]
    fn missing_fields_compare_as_null() {
        let mut conditions = Conditions::default();
        conditions.where_eq("nickname", Value::Null);
        assert!(check(&conditions, json!({"name": "jo"})));
    }

    #[test]
    fn closure_verdicts_and_nested_groups() {
        let mut verdict = Conditions::default();
        verdict.where_closure(|record, _, _| (record.get("age") == Some(&json!(3))).into());
        assert!(check(&verdict, json!({"age": 3})));
        assert!(!check(&verdict, json!({"age": 4})));

        let mut nested = Conditions::default();
        nested.where_closure(|_, group, item| {
            assert_eq!(item.entity(), "users");
            group.where_eq("name", "jo").or_where_eq("name", "al");
            WhereVerdict::Defer
        });
        assert!(check(&nested, json!({"name": "al"})));
        assert!(!check(&nested, json!({"name": "ed"})));

        let mut empty = Conditions::default();
        empty.where_closure(|_, _, _| WhereVerdict::Defer);
        assert!(check(&empty, json!({})));
    }

    #[test]
    fn closure_sees_hydrated_values() {
        let mut conditions = Conditions::default();
        conditions.where_closure(|_, _, item| (item.value("age") == Some(&json!(0))).into());
        assert!(check(&conditions, json!({"name": "jo"})));
    }

    #[test]
    fn closure_substitutes_the_kept_row() {
        let mut conditions = Conditions::default();
        conditions
            .where_closure(|record, _, _| {
                let mut shouted = record.clone();
                shouted.insert("name".into(), json!("JO"));
                WhereVerdict::Replace(shouted)
            })
            .where_eq("name", "JO");

        let kept = run(&conditions, json!({"name": "jo", "age": 3})).expect("kept");
        assert_eq!(kept.get("name"), Some(&json!("JO")));
        assert_eq!(kept.get("age"), Some(&json!(3)));
    }

    #[test]
    fn substitutes_from_a_deferred_group_are_kept() {
        let mut conditions = Conditions::default();
        conditions.where_closure(|_, group, _| {
            group.where_closure(|record, _, _| {
                let mut tagged = record.clone();
                tagged.insert("tag".into(), json!(true));
                WhereVerdict::Replace(tagged)
            });
            WhereVerdict::Defer
        });

        let kept = run(&conditions, json!({"name": "al"})).expect("kept");
        assert_eq!(kept.get("tag"), Some(&json!(true)));

        let mut rejecting = Conditions::default();
        rejecting
            .where_closure(|record, _, _| WhereVerdict::Replace(record.clone()))
            .where_eq("name", "jo");
        assert!(run(&rejecting, json!({"name": "al"})).is_none());
    }

    #[test]
    fn id_clauses_read_index_ids() {
        let mut conditions = Conditions::default();
        conditions.ids(vec![IndexId::new("2")]);
        assert!(check(&conditions, json!({"$id": "2"})));
        assert!(!check(&conditions, json!({"$id": "3"})));
    }

    #[test]
    fn count_rules() {
        assert!(CountRule::Exists.test(1));
        assert!(!CountRule::Exists.test(0));
        assert!(CountRule::Compare(Comparator::Ge, 2).test(2));
        assert!(!CountRule::Compare(Comparator::Eq, 2).test(3));
    }
}
