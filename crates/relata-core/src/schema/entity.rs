//! Entity definitions.

use super::field::FieldDef;
use super::relation::RelationDef;
use crate::primitives::INDEX_ID_FIELD;
use crate::{IndexId, Record, RelataError};
use serde_json::Value;

/// Primary key of an entity: one field, or an ordered list for composite keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKey {
    /// Field names in declared order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        match self {
            Self::Single(field) => std::slice::from_ref(field),
            Self::Composite(fields) => fields,
        }
    }

    #[must_use]
    pub const fn is_composite(&self) -> bool {
        matches!(self, Self::Composite(_))
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields().iter().any(|f| f == field)
    }

    /// The index id of a record, or `None` when any key value is absent.
    ///
    /// Composite ids follow declared order, never the record's field order.
    #[must_use]
    pub fn index_id(&self, record: &Record) -> Option<IndexId> {
        match self {
            Self::Single(field) => record.get(field).and_then(IndexId::from_value),
            Self::Composite(fields) => {
                let values = fields
                    .iter()
                    .map(|f| record.get(f).filter(|v| !v.is_null()).cloned())
                    .collect::<Option<Vec<_>>>()?;
                Some(IndexId::composite(&values))
            }
        }
    }

    /// The index id addressed by a lookup argument (`find`, `where_id`).
    ///
    /// Single keys take a scalar; composite keys take an array holding one
    /// value per key field.
    pub fn id_for(&self, value: &Value) -> Result<IndexId, RelataError> {
        match (self, value) {
            (Self::Single(_), Value::Array(_) | Value::Object(_)) => Err(
                RelataError::InvalidArgument(format!("expected a scalar key, got `{value}`")),
            ),
            (Self::Single(_), _) => IndexId::from_value(value).ok_or_else(|| {
                RelataError::InvalidArgument("a primary key value cannot be null".into())
            }),
            (Self::Composite(fields), Value::Array(values)) if values.len() == fields.len() => {
                Ok(IndexId::composite(values))
            }
            (Self::Composite(fields), _) => Err(RelataError::InvalidArgument(format!(
                "composite key ({}) requires an array of {} values, got `{value}`",
                fields.join(", "),
                fields.len()
            ))),
        }
    }
}

impl From<&str> for PrimaryKey {
    fn from(field: &str) -> Self {
        Self::Single(field.to_string())
    }
}

/// A field or relation declared on an entity.
#[derive(Debug, Clone)]
pub enum Descriptor {
    Field(FieldDef),
    Relation(RelationDef),
}

/// A named entity schema.
///
/// Inheritance is data, not types: a derived entity names its `base`, and the
/// root of the family maps discriminator values to entity names.
#[derive(Debug, Clone)]
pub struct EntityDef {
    name: String,
    primary_key: PrimaryKey,
    attributes: Vec<(String, Descriptor)>,
    base: Option<String>,
    discriminator: Option<String>,
    types: Vec<(Value, String)>,
}

impl EntityDef {
    /// Create an entity keyed by `id`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: PrimaryKey::Single("id".to_string()),
            attributes: Vec::new(),
            base: None,
            discriminator: None,
            types: Vec::new(),
        }
    }

    #[must_use]
    pub fn primary_key(mut self, field: impl Into<String>) -> Self {
        self.primary_key = PrimaryKey::Single(field.into());
        self
    }

    #[must_use]
    pub fn composite_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = PrimaryKey::Composite(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Declare a field. Redeclaring a name replaces it in place.
    #[must_use]
    pub fn field(self, name: impl Into<String>, field: FieldDef) -> Self {
        self.attribute(name.into(), Descriptor::Field(field))
    }

    /// Declare a relation. Redeclaring a name replaces it in place.
    #[must_use]
    pub fn relation(self, name: impl Into<String>, relation: RelationDef) -> Self {
        self.attribute(name.into(), Descriptor::Relation(relation))
    }

    fn attribute(mut self, name: String, descriptor: Descriptor) -> Self {
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = descriptor,
            None => self.attributes.push((name, descriptor)),
        }
        self
    }

    /// Derive this entity from `base`.
    #[must_use]
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Name the discriminator field of this (root) entity.
    #[must_use]
    pub fn discriminator(mut self, field: impl Into<String>) -> Self {
        self.discriminator = Some(field.into());
        self
    }

    /// Map a discriminator value to a concrete entity of this family.
    #[must_use]
    pub fn subtype(mut self, value: impl Into<Value>, entity: impl Into<String>) -> Self {
        let value = value.into();
        let entity = entity.into();
        match self.types.iter_mut().find(|(v, _)| *v == value) {
            Some(slot) => slot.1 = entity,
            None => self.types.push((value, entity)),
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    /// The key relations join on when none is named: the single primary key
    /// field, or `$id` for composite keys.
    #[must_use]
    pub fn default_join_key(&self) -> &str {
        match &self.primary_key {
            PrimaryKey::Single(field) => field,
            PrimaryKey::Composite(_) => INDEX_ID_FIELD,
        }
    }

    /// Attributes declared on this entity only, in declaration order.
    #[must_use]
    pub fn own_attributes(&self) -> &[(String, Descriptor)] {
        &self.attributes
    }

    #[must_use]
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    #[must_use]
    pub fn discriminator_field(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    /// Declared discriminator mapping, in declaration order.
    #[must_use]
    pub fn types(&self) -> &[(Value, String)] {
        &self.types
    }

    /// Entity mapped to a discriminator value. Matching is exact: `1` and `"1"`
    /// are different discriminators.
    #[must_use]
    pub fn type_for(&self, value: &Value) -> Option<&str> {
        self.types
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, e)| e.as_str())
    }

    /// Discriminator value mapped to `entity`, if any.
    #[must_use]
    pub fn value_for(&self, entity: &str) -> Option<&Value> {
        self.types
            .iter()
            .find(|(_, e)| e == entity)
            .map(|(v, _)| v)
    }
}
