//! The schema registry.

use super::entity::{Descriptor, EntityDef};
use super::field::FieldDef;
use super::relation::RelationDef;
use crate::RelataError;
use crate::primitives::{DEFAULT_DISCRIMINATOR, MAX_INHERITANCE_DEPTH};
use std::collections::{BTreeMap, BTreeSet};

/// Registry of entity definitions keyed by entity name.
///
/// Registration order is irrelevant: `base` links and relation targets are
/// resolved by name when they are used.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: BTreeMap<String, EntityDef>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition, replacing any previous one with the same name.
    pub fn register(&mut self, definition: EntityDef) -> &mut Self {
        tracing::debug!(entity = definition.name(), "registering entity");
        self.entities
            .insert(definition.name().to_string(), definition);
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Registered entity names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Look up a definition.
    pub fn resolve(&self, name: &str) -> Result<&EntityDef, RelataError> {
        self.entities
            .get(name)
            .ok_or_else(|| RelataError::EntityNotFound(name.to_string()))
    }

    /// Walk `base` links up to the root ancestor of `name`.
    pub fn resolve_base(&self, name: &str) -> Result<&EntityDef, RelataError> {
        let mut current = self.resolve(name)?;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            match current.base() {
                Some(base) => current = self.resolve(base)?,
                None => return Ok(current),
            }
        }
        Err(RelataError::InvalidSchema(format!(
            "inheritance chain of `{name}` does not reach a root entity"
        )))
    }

    /// Ancestors of `name`, root first, ending with `name` itself.
    fn lineage(&self, name: &str) -> Result<Vec<&EntityDef>, RelataError> {
        let mut current = self.resolve(name)?;
        let mut chain = vec![current];
        while let Some(base) = current.base() {
            if chain.len() > MAX_INHERITANCE_DEPTH {
                return Err(RelataError::InvalidSchema(format!(
                    "inheritance chain of `{name}` does not reach a root entity"
                )));
            }
            current = self.resolve(base)?;
            chain.push(current);
        }
        chain.reverse();
        Ok(chain)
    }

    /// Fields and relations of `name`, merged over its ancestors.
    ///
    /// Ancestor attributes come first; a redeclared name keeps the ancestor's
    /// position and takes the derived declaration.
    pub fn attributes(&self, name: &str) -> Result<Vec<(&str, &Descriptor)>, RelataError> {
        let mut merged: Vec<(&str, &Descriptor)> = Vec::new();
        for def in self.lineage(name)? {
            for (attr, descriptor) in def.own_attributes() {
                match merged.iter_mut().find(|(n, _)| *n == attr.as_str()) {
                    Some(slot) => slot.1 = descriptor,
                    None => merged.push((attr.as_str(), descriptor)),
                }
            }
        }
        Ok(merged)
    }

    /// Scalar fields of `name`, merged over its ancestors.
    pub fn fields(&self, name: &str) -> Result<Vec<(&str, &FieldDef)>, RelataError> {
        Ok(self
            .attributes(name)?
            .into_iter()
            .filter_map(|(n, d)| match d {
                Descriptor::Field(f) => Some((n, f)),
                Descriptor::Relation(_) => None,
            })
            .collect())
    }

    /// Relations of `name`, merged over its ancestors.
    pub fn relations(&self, name: &str) -> Result<Vec<(&str, &RelationDef)>, RelataError> {
        Ok(self
            .attributes(name)?
            .into_iter()
            .filter_map(|(n, d)| match d {
                Descriptor::Relation(r) => Some((n, r)),
                Descriptor::Field(_) => None,
            })
            .collect())
    }

    /// One relation of `name`.
    pub fn relation(&self, name: &str, relation: &str) -> Result<&RelationDef, RelataError> {
        self.relations(name)?
            .into_iter()
            .find(|(n, _)| *n == relation)
            .map(|(_, r)| r)
            .ok_or_else(|| RelataError::RelationNotFound {
                entity: name.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Discriminator field of the family `name` belongs to.
    pub fn discriminator_field(&self, name: &str) -> Result<&str, RelataError> {
        Ok(self
            .resolve_base(name)?
            .discriminator_field()
            .unwrap_or(DEFAULT_DISCRIMINATOR))
    }

    /// Whether `name` is `ancestor` or derives from it.
    pub fn is_a(&self, name: &str, ancestor: &str) -> Result<bool, RelataError> {
        Ok(self.lineage(name)?.iter().any(|d| d.name() == ancestor))
    }

    /// `name` plus every entity deriving from it, directly or transitively.
    pub fn family(&self, name: &str) -> Result<BTreeSet<String>, RelataError> {
        self.resolve(name)?;
        let mut family = BTreeSet::new();
        for candidate in self.entities.keys() {
            // Entities with a broken chain cannot be members of any family.
            if self.is_a(candidate, name).unwrap_or(false) {
                family.insert(candidate.clone());
            }
        }
        Ok(family)
    }

    /// Check that every entity referenced by a `base` link or relation is
    /// registered and that every primary key names at least one field.
    pub fn validate(&self) -> Result<(), RelataError> {
        for def in self.entities.values() {
            if def.key().fields().is_empty() {
                return Err(RelataError::InvalidSchema(format!(
                    "entity `{}` declares an empty composite key",
                    def.name()
                )));
            }
            self.resolve_base(def.name())?;
            for (_, relation) in self.relations(def.name())? {
                for target in relation.referenced_entities() {
                    self.resolve(target)?;
                }
            }
            for (_, entity) in def.types() {
                self.resolve(entity)?;
            }
        }
        Ok(())
    }
}
