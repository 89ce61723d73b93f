//! Relation resolution against flat rows.
//!
//! Given an owner row and one of its relation descriptors, find the related
//! rows in the store. Keys are compared loosely (`1` matches `"1"`), and a
//! reference to a missing row resolves to nothing rather than an error.

use super::Env;
use crate::discriminator;
use crate::primitives::INDEX_ID_FIELD;
use crate::schema::{Registry, RelationDef, RelationKind};
use crate::store::key_value;
use crate::{IndexId, Record, RelataError, keys_match};
use serde_json::Value;

/// One related row.
#[derive(Debug, Clone)]
pub(crate) struct Related<'a> {
    /// Entity the row is read as.
    pub entity: String,
    pub id: IndexId,
    pub record: &'a Record,
    /// Pivot row of a many-to-many edge.
    pub pivot: Option<&'a Record>,
}

/// The relation `name` of a record whose concrete entity is `concrete`, read
/// through a query on `entity`.
///
/// `None` means the record's own type does not declare the relation while
/// another member of the family does; such records have nothing related.
pub(crate) fn relation_for<'r>(
    registry: &'r Registry,
    entity: &str,
    concrete: &str,
    name: &str,
) -> Result<Option<&'r RelationDef>, RelataError> {
    if let Ok(relation) = registry.relation(concrete, name) {
        return Ok(Some(relation));
    }
    family_relation(registry, entity, name).map(|_| None)
}

/// Find `name` on `entity` or on any entity deriving from it.
pub(crate) fn family_relation<'r>(
    registry: &'r Registry,
    entity: &str,
    name: &str,
) -> Result<&'r RelationDef, RelataError> {
    for member in registry.family(entity)? {
        if let Ok(relation) = registry.relation(&member, name) {
            return Ok(relation);
        }
    }
    Err(RelataError::RelationNotFound {
        entity: entity.to_string(),
        relation: name.to_string(),
    })
}

/// Rows related to `owner` through `relation`, in relation order.
pub(crate) fn related<'a>(
    env: Env<'a>,
    concrete: &str,
    owner: &Record,
    relation: &RelationDef,
) -> Result<Vec<Related<'a>>, RelataError> {
    let mut rows = match relation {
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
            let local = owner_key(env, concrete, owner, local_key.as_deref())?;
            if local.is_null() {
                return Ok(Vec::new());
            }
            scan(env, related, |row| column_matches(row, foreign_key, &local))?
        }

        RelationDef::BelongsTo {
            parent,
            foreign_key,
            owner_key,
        } => lookup(env, parent, owner_key.as_deref(), column(owner, foreign_key))?,

        RelationDef::HasManyBy {
            parent,
            foreign_key,
            owner_key,
        } => {
            let mut rows = Vec::new();
            let keys = owner.get(foreign_key).and_then(Value::as_array);
            for key in keys.into_iter().flatten() {
                rows.extend(lookup(env, parent, owner_key.as_deref(), key)?.into_iter().take(1));
            }
            rows
        }

        RelationDef::HasManyThrough {
            related,
            through,
            first_key,
            second_key,
            local_key,
            second_local_key,
        } => {
            let local = owner_key(env, concrete, owner, local_key.as_deref())?;
            if local.is_null() {
                return Ok(Vec::new());
            }
            let through_root = env.registry.resolve_base(through)?;
            let via_key = second_local_key
                .as_deref()
                .unwrap_or_else(|| through_root.default_join_key());

            let mut rows: Vec<Related<'a>> = Vec::new();
            for hop in scan(env, through, |row| column_matches(row, first_key, &local))? {
                let via = key_value(hop.record, via_key, through_root.key());
                if via.is_null() {
                    continue;
                }
                for row in scan(env, related, |row| column_matches(row, second_key, &via))? {
                    if !rows.iter().any(|r| r.id == row.id) {
                        rows.push(row);
                    }
                }
            }
            rows
        }

        RelationDef::BelongsToMany {
            related,
            pivot,
            foreign_pivot_key,
            related_pivot_key,
            parent_key,
            related_key,
        } => {
            let local = owner_key(env, concrete, owner, parent_key.as_deref())?;
            let pivots = scan(env, pivot, |row| column_matches(row, foreign_pivot_key, &local))?;
            through_pivots(env, related, related_key.as_deref(), &pivots, related_pivot_key, None)?
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
            let local = owner_key(env, concrete, owner, local_key.as_deref())?;
            if local.is_null() {
                return Ok(Vec::new());
            }
            scan(env, related, |row| {
                column_matches(row, id, &local) && names(row, type_field, concrete)
            })?
        }

        RelationDef::MorphTo { id, type_field } => {
            let target = owner.get(type_field).and_then(Value::as_str);
            match target.filter(|name| env.registry.contains(name)) {
                Some(target) => lookup(env, target, None, column(owner, id))?,
                None => {
                    tracing::trace!(type_field = type_field.as_str(), "polymorphic parent names no registered entity");
                    Vec::new()
                }
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
            let local = owner_key(env, concrete, owner, parent_key.as_deref())?;
            let pivots = scan(env, pivot, |row| {
                column_matches(row, id, &local) && names(row, type_field, concrete)
            })?;
            through_pivots(env, related, related_key.as_deref(), &pivots, related_id, None)?
        }

        RelationDef::MorphedByMany {
            related,
            pivot,
            related_id,
            id,
            type_field,
            parent_key,
            related_key,
        } => {
            let local = owner_key(env, concrete, owner, parent_key.as_deref())?;
            let pivots = scan(env, pivot, |row| column_matches(row, related_id, &local))?;
            through_pivots(env, related, related_key.as_deref(), &pivots, id, Some(type_field))?
        }
    };

    if !relation.kind().is_plural() {
        rows.truncate(1);
    }
    if rows.is_empty() && relation.kind() == RelationKind::BelongsTo {
        tracing::trace!(entity = concrete, "belongs-to reference resolves to no row");
    }
    Ok(rows)
}

fn owner_key(
    env: Env<'_>,
    concrete: &str,
    owner: &Record,
    key: Option<&str>,
) -> Result<Value, RelataError> {
    let root = env.registry.resolve_base(concrete)?;
    Ok(key_value(
        owner,
        key.unwrap_or_else(|| root.default_join_key()),
        root.key(),
    ))
}

static NULL: Value = Value::Null;

fn column<'r>(record: &'r Record, field: &str) -> &'r Value {
    record.get(field).unwrap_or(&NULL)
}

fn column_matches(record: &Record, field: &str, value: &Value) -> bool {
    record.get(field).is_some_and(|v| keys_match(v, value))
}

fn names(record: &Record, field: &str, entity: &str) -> bool {
    record.get(field).and_then(Value::as_str) == Some(entity)
}

/// Every row readable as `entity` that satisfies `predicate`.
fn scan<'a>(
    env: Env<'a>,
    entity: &str,
    predicate: impl Fn(&Record) -> bool,
) -> Result<Vec<Related<'a>>, RelataError> {
    Ok(env
        .store
        .rows(env.registry, entity)?
        .into_iter()
        .filter(|(_, record)| predicate(record))
        .map(|(id, record)| Related {
            entity: entity.to_string(),
            id: id.clone(),
            record,
            pivot: None,
        })
        .collect())
}

/// Rows of `entity` whose `key` (default: its join key) equals `value`.
///
/// Primary-key lookups go straight to the table; other keys scan it.
fn lookup<'a>(
    env: Env<'a>,
    entity: &str,
    key: Option<&str>,
    value: &Value,
) -> Result<Vec<Related<'a>>, RelataError> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let root = env.registry.resolve_base(entity)?;
    let key = key.unwrap_or_else(|| root.default_join_key());
    let primary = root.key();

    let direct = key == INDEX_ID_FIELD || (!primary.is_composite() && primary.contains(key));
    if direct {
        let Some(id) = IndexId::from_value(value) else {
            return Ok(Vec::new());
        };
        let found = env.store.find(env.registry, entity, &id)?;
        return Ok(found
            .map(|record| Related {
                entity: entity.to_string(),
                id,
                record,
                pivot: None,
            })
            .into_iter()
            .collect());
    }
    scan(env, entity, |row| keys_match(&key_value(row, key, primary), value))
}

/// Follow pivot rows to the related rows named by their `column`.
///
/// With `type_field`, a pivot only reaches a row whose concrete entity is the
/// one the pivot names.
fn through_pivots<'a>(
    env: Env<'a>,
    related: &str,
    related_key: Option<&str>,
    pivots: &[Related<'a>],
    column_name: &str,
    type_field: Option<&str>,
) -> Result<Vec<Related<'a>>, RelataError> {
    let mut rows = Vec::new();
    for pivot in pivots {
        let Some(mut row) = lookup(env, related, related_key, column(pivot.record, column_name))?
            .into_iter()
            .next()
        else {
            continue;
        };
        if let Some(type_field) = type_field {
            let concrete = discriminator::concrete_name(env.registry, related, row.record)?;
            if !names(pivot.record, type_field, concrete) {
                continue;
            }
        }
        row.pivot = Some(pivot.record);
        rows.push(row);
    }
    Ok(rows)
}
