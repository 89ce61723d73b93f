//! # Engine Primitives
//!
//! Fixed names and limits of the Relata engine.
//!
//! These are compiled into the engine and are immutable at runtime. The host
//! configures schemas, never these conventions.

/// Field that every flat record carries with its own index id.
pub const INDEX_ID_FIELD: &str = "$id";

/// Prefix of the placeholder index id used when a record has no primary key.
///
/// The counter behind it is scoped to a single normalize call.
pub const NO_KEY_PREFIX: &str = "_no_key_";

/// Prefix of generated `uid` field values.
pub const UID_PREFIX: &str = "$uid";

/// Separator joining the parts of a derived pivot index id.
pub const PIVOT_SEPARATOR: &str = "_";

/// Side-channel field carrying pivot data on many-to-many related records.
///
/// On write, extra fields found under this key are copied into the pivot row.
/// On read, the matching pivot row is attached under this key.
pub const PIVOT_FIELD: &str = "pivot";

/// Discriminator field used when a root entity does not name its own.
pub const DEFAULT_DISCRIMINATOR: &str = "type";

/// Prefix carried by every engine error message.
pub const ERROR_PREFIX: &str = "[relata]";

/// Depth used by `with_all_recursive` when the host has no preference.
pub const DEFAULT_RECURSION_DEPTH: usize = 3;

/// Upper bound for recursive eager loading.
///
/// Cyclic schemas (A has many B, B belongs to A) would otherwise expand
/// without end.
pub const MAX_RECURSION_DEPTH: usize = 16;

/// Upper bound for `base` chains when resolving inheritance.
pub const MAX_INHERITANCE_DEPTH: usize = 64;
