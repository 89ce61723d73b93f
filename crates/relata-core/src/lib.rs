//! # relata-core
//!
//! The normalization and query engine for Relata.
//!
//! Nested domain objects go in, flat key-addressed rows are stored, and a
//! relational query interface rebuilds the nested objects on read.
//!
//! ## Components
//!
//! - `schema`: entity, field and relation descriptors plus the [`Registry`]
//! - `normalizer`: nested input trees to flat rows and pivot rows
//! - `query`: filtering, ordering, relation checks and eager loading
//! - `discriminator`: picks the concrete entity of a record in a family
//! - `hooks`: host callbacks at named points of the read and write pipelines
//! - `database`: the façade owning registry, store and hooks
//!
//! ## Architectural Constraints
//!
//! - Pure and synchronous: no async, no I/O, no network dependencies
//! - Every piece of state (registry, store, hooks, counters) is an explicit
//!   value owned by the host; there are no globals
//! - Deterministic: tables iterate in index-id order, synthetic ids are
//!   counted per normalize call
//!
//! ## Example
//!
//! ```
//! use relata_core::{Database, EntityDef, FieldDef, RelationDef};
//! use serde_json::json;
//!
//! let mut db = Database::new();
//! db.register(
//!     EntityDef::new("users")
//!         .field("id", FieldDef::attr(json!(null)))
//!         .relation("posts", RelationDef::has_many("posts", "user_id")),
//! )
//! .register(
//!     EntityDef::new("posts")
//!         .field("id", FieldDef::attr(json!(null)))
//!         .field("user_id", FieldDef::attr(json!(null))),
//! );
//!
//! db.insert("users", &json!({"id": 1, "posts": [{"id": 10}, {"id": 11}]}))?;
//!
//! let user = db.query("users")?.with("posts").find(1)?;
//! assert_eq!(user.map(|u| u.many("posts").len()), Some(2));
//! # Ok::<(), relata_core::RelataError>(())
//! ```

// =============================================================================
// MODULES
// =============================================================================

pub mod database;
pub mod discriminator;
pub mod hooks;
pub mod normalizer;
pub mod primitives;
pub mod query;
pub mod schema;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Comparator, Direction, IndexId, Record, RelataError, keys_match};

// =============================================================================
// RE-EXPORTS: Schema
// =============================================================================

pub use schema::{
    DefaultValue, Descriptor, EntityDef, FieldDef, FieldKind, PrimaryKey, Registry, RelationDef,
    RelationKind,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use database::{Database, Patch, Persisted, Selector};
pub use hooks::{HookContext, HookDecision, HookFn, HookId, HookPoint, Hooks};
pub use normalizer::{Normalized, Normalizer, WriteMode, normalize};
pub use query::{Conditions, Constraint, Item, Query, Slot, WhereVerdict, constraint};
pub use store::{Store, Table, key_value};
