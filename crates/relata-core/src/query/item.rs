//! Hydrated records.

use crate::primitives::{INDEX_ID_FIELD, PIVOT_FIELD};
use crate::schema::{Registry, RelationKind};
use crate::{IndexId, Record};
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Content of one attribute of a hydrated record.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// A scalar field, cast and mutated.
    Value(Value),
    /// A singular relation; `None` when nothing is related or it was not loaded.
    One(Option<Box<Item>>),
    /// A plural relation; empty when nothing is related or it was not loaded.
    Many(Vec<Item>),
}

impl Slot {
    pub(crate) const fn empty(kind: RelationKind) -> Self {
        if kind.is_plural() {
            Self::Many(Vec::new())
        } else {
            Self::One(None)
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::One(item) => item.as_deref().map_or(Value::Null, Item::to_json),
            Self::Many(items) => Value::Array(items.iter().map(Item::to_json).collect()),
        }
    }
}

/// A record rebuilt from the store, typed by its discriminator.
///
/// Items are fresh values: changing one never touches the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    entity: String,
    id: IndexId,
    fields: Vec<(String, Slot)>,
    pivot: Option<Record>,
}

impl Item {
    pub(crate) const fn new(
        entity: String,
        id: IndexId,
        fields: Vec<(String, Slot)>,
        pivot: Option<Record>,
    ) -> Self {
        Self {
            entity,
            id,
            fields,
            pivot,
        }
    }

    /// The concrete entity the record was hydrated as.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    #[must_use]
    pub const fn id(&self) -> &IndexId {
        &self.id
    }

    /// Attributes in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[(String, Slot)] {
        &self.fields
    }

    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// A scalar field.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.slot(name)? {
            Slot::Value(value) => Some(value),
            Slot::One(_) | Slot::Many(_) => None,
        }
    }

    /// A singular relation.
    #[must_use]
    pub fn one(&self, name: &str) -> Option<&Self> {
        match self.slot(name)? {
            Slot::One(item) => item.as_deref(),
            Slot::Value(_) | Slot::Many(_) => None,
        }
    }

    /// A plural relation; empty for anything else.
    #[must_use]
    pub fn many(&self, name: &str) -> &[Self] {
        match self.slot(name) {
            Some(Slot::Many(items)) => items,
            _ => &[],
        }
    }

    /// The pivot row attached by a many-to-many relation.
    #[must_use]
    pub const fn pivot(&self) -> Option<&Record> {
        self.pivot.as_ref()
    }

    /// Whether the record's concrete entity is `entity` or derives from it.
    #[must_use]
    pub fn is_a(&self, registry: &Registry, entity: &str) -> bool {
        registry.is_a(&self.entity, entity).unwrap_or(false)
    }

    /// The record as a JSON object, `$id` first and the pivot row last.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut object = Record::new();
        object.insert(INDEX_ID_FIELD.to_string(), self.id.to_value());
        for (name, slot) in &self.fields {
            object.insert(name.clone(), slot.to_json());
        }
        if let Some(pivot) = &self.pivot {
            object.insert(PIVOT_FIELD.to_string(), Value::Object(pivot.clone()));
        }
        Value::Object(object)
    }
}

impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
