//! # Schema Files
//!
//! Entity declarations written in TOML and translated into a
//! [`Registry`].
//!
//! ```toml
//! [[entity]]
//! name = "users"
//!
//! [[entity.field]]
//! name = "id"
//!
//! [[entity.field]]
//! name = "age"
//! kind = "number"
//! default = 0
//!
//! [[entity.relation]]
//! name = "posts"
//! kind = "has_many"
//! related = "posts"
//! foreign_key = "user_id"
//! ```
//!
//! Keys accepted by a relation depend on its kind; every kind names the
//! keys its constructor takes, plus the optional `local_key`, `owner_key`
//! and `second_local_key` overrides.

use crate::error::{CliError, CliResult, read_file};
use relata_core::{EntityDef, FieldDef, FieldKind, Registry, RelationDef};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

// =============================================================================
// FILE FORMAT
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityConfig>,
}

/// A single field name or an ordered list of fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeyConfig {
    Single(String),
    Composite(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    pub name: String,
    pub primary_key: Option<KeyConfig>,
    pub base: Option<String>,
    pub discriminator: Option<String>,
    #[serde(default, rename = "subtype")]
    pub subtypes: Vec<SubtypeConfig>,
    #[serde(default, rename = "field")]
    pub fields: Vec<FieldConfig>,
    #[serde(default, rename = "relation")]
    pub relations: Vec<RelationConfig>,
}

/// Discriminator value to concrete entity. The value keeps its TOML type.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubtypeConfig {
    pub value: Value,
    pub entity: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub default: Option<Value>,
    #[serde(default)]
    pub nullable: bool,
}

fn default_kind() -> String {
    "attr".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationConfig {
    pub name: String,
    pub kind: String,
    pub related: Option<String>,
    pub parent: Option<String>,
    pub through: Option<String>,
    pub pivot: Option<String>,
    pub foreign_key: Option<String>,
    pub first_key: Option<String>,
    pub second_key: Option<String>,
    pub foreign_pivot_key: Option<String>,
    pub related_pivot_key: Option<String>,
    pub related_id: Option<String>,
    pub id: Option<String>,
    pub type_field: Option<String>,
    pub local_key: Option<String>,
    pub owner_key: Option<String>,
    pub second_local_key: Option<String>,
}

// =============================================================================
// LOADING
// =============================================================================

/// Read, translate and validate a schema file.
pub fn load_schema(path: &Path) -> CliResult<Registry> {
    let text = read_file(path)?;
    let registry = parse_schema(&text)?;
    tracing::debug!(path = %path.display(), "schema loaded");
    Ok(registry)
}

/// Translate schema text into a validated registry.
pub fn parse_schema(text: &str) -> CliResult<Registry> {
    let file: SchemaFile = toml::from_str(text)?;
    if file.entities.is_empty() {
        return Err(CliError::Config("no [[entity]] declared".to_string()));
    }

    let mut registry = Registry::new();
    for entity in &file.entities {
        if registry.contains(&entity.name) {
            return Err(CliError::Config(format!(
                "entity `{}` is declared twice",
                entity.name
            )));
        }
        registry.register(entity.to_definition()?);
    }
    registry.validate()?;
    Ok(registry)
}

impl EntityConfig {
    pub fn to_definition(&self) -> CliResult<EntityDef> {
        let mut def = EntityDef::new(&self.name);
        match &self.primary_key {
            Some(KeyConfig::Single(field)) => def = def.primary_key(field),
            Some(KeyConfig::Composite(fields)) => def = def.composite_key(fields),
            None => {}
        }
        if let Some(base) = &self.base {
            def = def.extends(base);
        }
        if let Some(field) = &self.discriminator {
            def = def.discriminator(field);
        }
        for subtype in &self.subtypes {
            def = def.subtype(subtype.value.clone(), &subtype.entity);
        }
        for field in &self.fields {
            def = def.field(&field.name, field.to_definition(&self.name)?);
        }
        for relation in &self.relations {
            def = def.relation(&relation.name, relation.to_definition(&self.name)?);
        }
        Ok(def)
    }
}

impl FieldConfig {
    pub fn to_definition(&self, entity: &str) -> CliResult<FieldDef> {
        let kind = FieldKind::parse(&self.kind).ok_or_else(|| {
            CliError::Config(format!(
                "field `{entity}.{}` has unknown kind `{}`",
                self.name, self.kind
            ))
        })?;
        let default = self.default.clone().unwrap_or(Value::Null);
        let field = FieldDef::of_kind(kind, default);
        Ok(if self.nullable { field.nullable() } else { field })
    }
}

impl RelationConfig {
    fn key(&self, value: &Option<String>, key: &str, entity: &str) -> CliResult<String> {
        value.clone().ok_or_else(|| {
            CliError::Config(format!(
                "relation `{entity}.{}` ({}) needs `{key}`",
                self.name, self.kind
            ))
        })
    }

    pub fn to_definition(&self, entity: &str) -> CliResult<RelationDef> {
        let k = |value: &Option<String>, key: &str| self.key(value, key, entity);
        let relation = match self.kind.as_str() {
            "has_one" => RelationDef::has_one(
                k(&self.related, "related")?,
                k(&self.foreign_key, "foreign_key")?,
            ),
            "belongs_to" => RelationDef::belongs_to(
                k(&self.parent, "parent")?,
                k(&self.foreign_key, "foreign_key")?,
            ),
            "has_many" => RelationDef::has_many(
                k(&self.related, "related")?,
                k(&self.foreign_key, "foreign_key")?,
            ),
            "has_many_by" => RelationDef::has_many_by(
                k(&self.parent, "parent")?,
                k(&self.foreign_key, "foreign_key")?,
            ),
            "has_many_through" => RelationDef::has_many_through(
                k(&self.related, "related")?,
                k(&self.through, "through")?,
                k(&self.first_key, "first_key")?,
                k(&self.second_key, "second_key")?,
            ),
            "belongs_to_many" => RelationDef::belongs_to_many(
                k(&self.related, "related")?,
                k(&self.pivot, "pivot")?,
                k(&self.foreign_pivot_key, "foreign_pivot_key")?,
                k(&self.related_pivot_key, "related_pivot_key")?,
            ),
            "morph_one" => RelationDef::morph_one(
                k(&self.related, "related")?,
                k(&self.id, "id")?,
                k(&self.type_field, "type_field")?,
            ),
            "morph_many" => RelationDef::morph_many(
                k(&self.related, "related")?,
                k(&self.id, "id")?,
                k(&self.type_field, "type_field")?,
            ),
            "morph_to" => RelationDef::morph_to(k(&self.id, "id")?, k(&self.type_field, "type_field")?),
            "morph_to_many" => RelationDef::morph_to_many(
                k(&self.related, "related")?,
                k(&self.pivot, "pivot")?,
                k(&self.related_id, "related_id")?,
                k(&self.id, "id")?,
                k(&self.type_field, "type_field")?,
            ),
            "morphed_by_many" => RelationDef::morphed_by_many(
                k(&self.related, "related")?,
                k(&self.pivot, "pivot")?,
                k(&self.related_id, "related_id")?,
                k(&self.id, "id")?,
                k(&self.type_field, "type_field")?,
            ),
            other => {
                return Err(CliError::Config(format!(
                    "relation `{entity}.{}` has unknown kind `{other}`",
                    self.name
                )));
            }
        };

        let mut relation = relation;
        if let Some(key) = &self.local_key {
            relation = relation.local_key(key);
        }
        if let Some(key) = &self.owner_key {
            relation = relation.owner_key(key);
        }
        if let Some(key) = &self.second_local_key {
            relation = relation.second_local_key(key);
        }
        Ok(relation)
    }
}

// =============================================================================
// TESTS
// =============================================================================
