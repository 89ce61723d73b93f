//! Relation descriptors.
//!
//! Related entities are referenced by name and resolved through the
//! [`Registry`](super::Registry) at call time, so mutually recursive schemas
//! can be declared in any order.
//!
//! Optional key names default at use: a local/parent key defaults to the
//! owner's primary key, an owner/related key to the related primary key.

use serde_json::Value;

/// Kind tag of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    HasOne,
    BelongsTo,
    HasMany,
    HasManyBy,
    HasManyThrough,
    BelongsToMany,
    MorphOne,
    MorphMany,
    MorphTo,
    MorphToMany,
    MorphedByMany,
}

impl RelationKind {
    /// Whether the relation hydrates to a list.
    #[must_use]
    pub const fn is_plural(self) -> bool {
        !matches!(
            self,
            Self::HasOne | Self::BelongsTo | Self::MorphOne | Self::MorphTo
        )
    }

    /// The value a relation field holds when nothing is related.
    #[must_use]
    pub fn empty_value(self) -> Value {
        if self.is_plural() {
            Value::Array(Vec::new())
        } else {
            Value::Null
        }
    }
}

/// Describes one relation of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationDef {
    /// The related record holds `foreign_key` = owner's `local_key`.
    HasOne {
        related: String,
        foreign_key: String,
        local_key: Option<String>,
    },
    /// The owner holds `foreign_key` = parent's `owner_key`.
    BelongsTo {
        parent: String,
        foreign_key: String,
        owner_key: Option<String>,
    },
    /// Each related record holds `foreign_key` = owner's `local_key`.
    HasMany {
        related: String,
        foreign_key: String,
        local_key: Option<String>,
    },
    /// The owner holds an ordered array of parent `owner_key`s in `foreign_key`.
    HasManyBy {
        parent: String,
        foreign_key: String,
        owner_key: Option<String>,
    },
    /// Related records reached through an intermediate entity.
    ///
    /// `through.first_key` = owner's `local_key`, and
    /// `related.second_key` = through's `second_local_key`.
    HasManyThrough {
        related: String,
        through: String,
        first_key: String,
        second_key: String,
        local_key: Option<String>,
        second_local_key: Option<String>,
    },
    /// Many-to-many through pivot rows holding both sides' keys.
    BelongsToMany {
        related: String,
        pivot: String,
        foreign_pivot_key: String,
        related_pivot_key: String,
        parent_key: Option<String>,
        related_key: Option<String>,
    },
    /// The related record holds `id` = owner's `local_key` and
    /// `type_field` = owner's entity name.
    MorphOne {
        related: String,
        id: String,
        type_field: String,
        local_key: Option<String>,
    },
    /// Plural form of [`RelationDef::MorphOne`].
    MorphMany {
        related: String,
        id: String,
        type_field: String,
        local_key: Option<String>,
    },
    /// The owner holds the related entity name in `type_field` and its key in `id`.
    MorphTo { id: String, type_field: String },
    /// Polymorphic many-to-many seen from the polymorphic side.
    ///
    /// Pivot rows hold `related_id` = related key, `id` = owner key and
    /// `type_field` = owner entity name.
    MorphToMany {
        related: String,
        pivot: String,
        related_id: String,
        id: String,
        type_field: String,
        parent_key: Option<String>,
        related_key: Option<String>,
    },
    /// Polymorphic many-to-many seen from the shared side.
    ///
    /// Pivot rows hold `related_id` = owner key, `id` = related key and
    /// `type_field` = related entity name.
    MorphedByMany {
        related: String,
        pivot: String,
        related_id: String,
        id: String,
        type_field: String,
        parent_key: Option<String>,
        related_key: Option<String>,
    },
}

impl RelationDef {
    #[must_use]
    pub fn has_one(related: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::HasOne {
            related: related.into(),
            foreign_key: foreign_key.into(),
            local_key: None,
        }
    }

    #[must_use]
    pub fn belongs_to(parent: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::BelongsTo {
            parent: parent.into(),
            foreign_key: foreign_key.into(),
            owner_key: None,
        }
    }

    #[must_use]
    pub fn has_many(related: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::HasMany {
            related: related.into(),
            foreign_key: foreign_key.into(),
            local_key: None,
        }
    }

    #[must_use]
    pub fn has_many_by(parent: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self::HasManyBy {
            parent: parent.into(),
            foreign_key: foreign_key.into(),
            owner_key: None,
        }
    }

    #[must_use]
    pub fn has_many_through(
        related: impl Into<String>,
        through: impl Into<String>,
        first_key: impl Into<String>,
        second_key: impl Into<String>,
    ) -> Self {
        Self::HasManyThrough {
            related: related.into(),
            through: through.into(),
            first_key: first_key.into(),
            second_key: second_key.into(),
            local_key: None,
            second_local_key: None,
        }
    }

    #[must_use]
    pub fn belongs_to_many(
        related: impl Into<String>,
        pivot: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        Self::BelongsToMany {
            related: related.into(),
            pivot: pivot.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
            parent_key: None,
            related_key: None,
        }
    }

    #[must_use]
    pub fn morph_one(
        related: impl Into<String>,
        id: impl Into<String>,
        type_field: impl Into<String>,
    ) -> Self {
        Self::MorphOne {
            related: related.into(),
            id: id.into(),
            type_field: type_field.into(),
            local_key: None,
        }
    }

    #[must_use]
    pub fn morph_many(
        related: impl Into<String>,
        id: impl Into<String>,
        type_field: impl Into<String>,
    ) -> Self {
        Self::MorphMany {
            related: related.into(),
            id: id.into(),
            type_field: type_field.into(),
            local_key: None,
        }
    }

    #[must_use]
    pub fn morph_to(id: impl Into<String>, type_field: impl Into<String>) -> Self {
        Self::MorphTo {
            id: id.into(),
            type_field: type_field.into(),
        }
    }

    #[must_use]
    pub fn morph_to_many(
        related: impl Into<String>,
        pivot: impl Into<String>,
        related_id: impl Into<String>,
        id: impl Into<String>,
        type_field: impl Into<String>,
    ) -> Self {
        Self::MorphToMany {
            related: related.into(),
            pivot: pivot.into(),
            related_id: related_id.into(),
            id: id.into(),
            type_field: type_field.into(),
            parent_key: None,
            related_key: None,
        }
    }

    #[must_use]
    pub fn morphed_by_many(
        related: impl Into<String>,
        pivot: impl Into<String>,
        related_id: impl Into<String>,
        id: impl Into<String>,
        type_field: impl Into<String>,
    ) -> Self {
        Self::MorphedByMany {
            related: related.into(),
            pivot: pivot.into(),
            related_id: related_id.into(),
            id: id.into(),
            type_field: type_field.into(),
            parent_key: None,
            related_key: None,
        }
    }

    /// Override the owner-side key (`local_key` or `parent_key`).
    #[must_use]
    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        match &mut self {
            Self::HasOne { local_key, .. }
            | Self::HasMany { local_key, .. }
            | Self::HasManyThrough { local_key, .. }
            | Self::MorphOne { local_key, .. }
            | Self::MorphMany { local_key, .. } => *local_key = Some(key.into()),
            Self::BelongsToMany { parent_key, .. }
            | Self::MorphToMany { parent_key, .. }
            | Self::MorphedByMany { parent_key, .. } => *parent_key = Some(key.into()),
            Self::BelongsTo { .. } | Self::HasManyBy { .. } | Self::MorphTo { .. } => {}
        }
        self
    }

    /// Override the related-side key (`owner_key` or `related_key`).
    #[must_use]
    pub fn owner_key(mut self, key: impl Into<String>) -> Self {
        match &mut self {
            Self::BelongsTo { owner_key, .. } | Self::HasManyBy { owner_key, .. } => {
                *owner_key = Some(key.into());
            }
            Self::BelongsToMany { related_key, .. }
            | Self::MorphToMany { related_key, .. }
            | Self::MorphedByMany { related_key, .. } => *related_key = Some(key.into()),
            _ => {}
        }
        self
    }

    /// Override the through-side key matched by `second_key`.
    #[must_use]
    pub fn second_local_key(mut self, key: impl Into<String>) -> Self {
        if let Self::HasManyThrough {
            second_local_key, ..
        } = &mut self
        {
            *second_local_key = Some(key.into());
        }
        self
    }

    #[must_use]
    pub const fn kind(&self) -> RelationKind {
        match self {
            Self::HasOne { .. } => RelationKind::HasOne,
            Self::BelongsTo { .. } => RelationKind::BelongsTo,
            Self::HasMany { .. } => RelationKind::HasMany,
            Self::HasManyBy { .. } => RelationKind::HasManyBy,
            Self::HasManyThrough { .. } => RelationKind::HasManyThrough,
            Self::BelongsToMany { .. } => RelationKind::BelongsToMany,
            Self::MorphOne { .. } => RelationKind::MorphOne,
            Self::MorphMany { .. } => RelationKind::MorphMany,
            Self::MorphTo { .. } => RelationKind::MorphTo,
            Self::MorphToMany { .. } => RelationKind::MorphToMany,
            Self::MorphedByMany { .. } => RelationKind::MorphedByMany,
        }
    }

    /// The statically known related entity. `None` for `MorphTo`, whose target
    /// is chosen per record.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::HasOne { related, .. }
            | Self::HasMany { related, .. }
            | Self::HasManyThrough { related, .. }
            | Self::BelongsToMany { related, .. }
            | Self::MorphOne { related, .. }
            | Self::MorphMany { related, .. }
            | Self::MorphToMany { related, .. }
            | Self::MorphedByMany { related, .. } => Some(related),
            Self::BelongsTo { parent, .. } | Self::HasManyBy { parent, .. } => Some(parent),
            Self::MorphTo { .. } => None,
        }
    }

    /// Every entity this relation refers to, including pivot and through entities.
    #[must_use]
    pub fn referenced_entities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.target().into_iter().collect();
        match self {
            Self::HasManyThrough { through, .. } => names.push(through),
            Self::BelongsToMany { pivot, .. }
            | Self::MorphToMany { pivot, .. }
            | Self::MorphedByMany { pivot, .. } => names.push(pivot),
            _ => {}
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plural_kinds() {
        assert!(RelationKind::HasMany.is_plural());
        assert!(RelationKind::MorphedByMany.is_plural());
        assert!(!RelationKind::MorphTo.is_plural());
        assert_eq!(RelationKind::HasOne.empty_value(), Value::Null);
        assert_eq!(RelationKind::HasManyBy.empty_value(), Value::Array(vec![]));
    }

    #[test]
    fn key_overrides_apply_to_matching_variants() {
        let rel = RelationDef::has_many("posts", "author_id").local_key("uuid");
        assert_eq!(
            rel,
            RelationDef::HasMany {
                related: "posts".into(),
                foreign_key: "author_id".into(),
                local_key: Some("uuid".into()),
            }
        );

        let rel = RelationDef::belongs_to_many("roles", "role_user", "user_id", "role_id")
            .local_key("uid")
            .owner_key("code");
        let RelationDef::BelongsToMany {
            parent_key,
            related_key,
            ..
        } = rel
        else {
            unreachable!("constructor builds BelongsToMany");
        };
        assert_eq!(parent_key.as_deref(), Some("uid"));
        assert_eq!(related_key.as_deref(), Some("code"));
    }

    #[test]
    fn referenced_entities_include_pivots() {
        let rel = RelationDef::morph_to_many("tags", "taggables", "tag_id", "taggable_id", "taggable_type");
        assert_eq!(rel.referenced_entities(), vec!["tags", "taggables"]);
        assert!(RelationDef::morph_to("commentable_id", "commentable_type")
            .referenced_entities()
            .is_empty());
    }
}
