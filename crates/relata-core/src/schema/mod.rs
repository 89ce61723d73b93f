//! # Schema Model
//!
//! Entity definitions as data values:
//! - `FieldDef`: one scalar attribute (default, mutator, kind)
//! - `RelationDef`: one of eleven relation kinds, targets referenced by name
//! - `EntityDef`: primary key, attributes, inheritance links
//! - `Registry`: name-keyed definitions with lazy inheritance resolution

mod entity;
mod field;
mod registry;
mod relation;

pub use entity::{Descriptor, EntityDef, PrimaryKey};
pub use field::{DefaultValue, FieldDef, FieldKind, Mutator, ValueFactory};
pub use registry::Registry;
pub use relation::{RelationDef, RelationKind};
