//! # Discriminator Resolver
//!
//! Picks the concrete entity definition governing a record.
//!
//! The record's discriminator field (named by the family root, `type` by
//! default) is looked up in the root's type map. A mapped, registered entity
//! wins. A value that maps to nothing degrades to the family root. A record
//! without a value keeps the entity the caller asked for when that entity has
//! a mapped value of its own, and is typed as the root otherwise.
//!
//! Normalization, row filtering and hydration all call [`resolve`], so a
//! record always reads back under the definition it was written with.

use crate::schema::{EntityDef, Registry};
use crate::{Record, RelataError};

/// Resolve the concrete definition of `record` read as `entity`.
///
/// Unmapped discriminator values degrade to the family root; they are never
/// an error.
pub fn resolve<'r>(
    registry: &'r Registry,
    entity: &str,
    record: &Record,
) -> Result<&'r EntityDef, RelataError> {
    let current = registry.resolve(entity)?;
    let root = registry.resolve_base(entity)?;
    if root.types().is_empty() {
        return Ok(current);
    }

    let field = registry.discriminator_field(entity)?;
    let Some(value) = record.get(field).filter(|v| !v.is_null()) else {
        let typed = current.name() == root.name() || root.value_for(current.name()).is_some();
        return Ok(if typed { current } else { root });
    };

    match root.type_for(value) {
        Some(mapped) if registry.contains(mapped) => registry.resolve(mapped),
        Some(mapped) => {
            tracing::warn!(
                entity,
                discriminator = %value,
                mapped,
                "discriminator maps to an unregistered entity; using root definition"
            );
            Ok(root)
        }
        None => {
            tracing::warn!(
                entity,
                discriminator = %value,
                "unmapped discriminator value; using root definition"
            );
            Ok(root)
        }
    }
}

/// Name of the concrete entity of `record` read as `entity`.
pub fn concrete_name<'r>(
    registry: &'r Registry,
    entity: &str,
    record: &Record,
) -> Result<&'r str, RelataError> {
    resolve(registry, entity, record).map(EntityDef::name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use serde_json::{Value, json};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            EntityDef::new("person")
                .discriminator("kind")
                .subtype("ADULT", "adult")
                .subtype(3, "child")
                .subtype("GHOST", "ghost")
                .field("id", FieldDef::attr(Value::Null))
                .field("kind", FieldDef::attr(Value::Null)),
        );
        registry.register(EntityDef::new("adult").extends("person"));
        registry.register(EntityDef::new("child").extends("person"));
        registry
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn mapped_value_selects_subtype() {
        let registry = registry();
        let name = concrete_name(&registry, "person", &record(json!({"kind": "ADULT"})));
        assert_eq!(name.expect("resolve"), "adult");
    }

    #[test]
    fn numeric_discriminator_is_exact() {
        let registry = registry();
        let child = concrete_name(&registry, "person", &record(json!({"kind": 3})));
        assert_eq!(child.expect("resolve"), "child");

        let text = concrete_name(&registry, "person", &record(json!({"kind": "3"})));
        assert_eq!(text.expect("resolve"), "person");
    }

    #[test]
    fn unmapped_or_missing_falls_back() {
        let registry = registry();
        for value in [json!({"kind": "ALIEN"}), json!({}), json!({"kind": null})] {
            let name = concrete_name(&registry, "person", &record(value));
            assert_eq!(name.expect("resolve"), "person");
        }
    }

    #[test]
    fn unregistered_mapping_falls_back() {
        let registry = registry();
        let name = concrete_name(&registry, "person", &record(json!({"kind": "GHOST"})));
        assert_eq!(name.expect("resolve"), "person");
    }

    #[test]
    fn missing_value_keeps_mapped_requested_entity() {
        let registry = registry();
        let name = concrete_name(&registry, "adult", &record(json!({})));
        assert_eq!(name.expect("resolve"), "adult");
    }

    #[test]
    fn unmapped_value_read_as_subtype_falls_back_to_root() {
        let registry = registry();
        let name = concrete_name(&registry, "adult", &record(json!({"kind": "ALIEN"})));
        assert_eq!(name.expect("resolve"), "person");
        let ghost = concrete_name(&registry, "child", &record(json!({"kind": "GHOST"})));
        assert_eq!(ghost.expect("resolve"), "person");
    }

    #[test]
    fn missing_value_of_unmapped_subtype_is_root() {
        let mut registry = registry();
        registry.register(EntityDef::new("teen").extends("child"));
        let name = concrete_name(&registry, "teen", &record(json!({})));
        assert_eq!(name.expect("resolve"), "person");
    }

    #[test]
    fn unknown_entity_is_an_error() {
        let registry = registry();
        assert!(resolve(&registry, "robot", &Record::new()).is_err());
    }
}
