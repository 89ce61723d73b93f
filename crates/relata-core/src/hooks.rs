//! # Hook Registry
//!
//! Named extension points where host code intercepts records.
//!
//! The registry is an explicit value owned by the host (the [`Database`]
//! holds one) rather than a process global. Callbacks run per record, in
//! registration order:
//! - `Keep` passes the record on to the next callback,
//! - `Drop` removes the record and skips the remaining callbacks for it,
//! - `Replace` substitutes the record seen by later callbacks and the caller.
//!
//! One-shot callbacks are removed once the pass that invoked them completes,
//! so they see every record of that pass.
//!
//! [`Database`]: crate::Database

use crate::{Record, RelataError};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// An extension point in the query or write pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookPoint {
    /// Raw candidate rows, before any predicate (pre-filter).
    BeforeSelect,
    /// Rows that passed the predicates (post-filter).
    AfterWhere,
    AfterOrderBy,
    AfterLimit,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl HookPoint {
    pub const ALL: [Self; 10] = [
        Self::BeforeSelect,
        Self::AfterWhere,
        Self::AfterOrderBy,
        Self::AfterLimit,
        Self::BeforeCreate,
        Self::AfterCreate,
        Self::BeforeUpdate,
        Self::AfterUpdate,
        Self::BeforeDelete,
        Self::AfterDelete,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeSelect => "before_select",
            Self::AfterWhere => "after_where",
            Self::AfterOrderBy => "after_order_by",
            Self::AfterLimit => "after_limit",
            Self::BeforeCreate => "before_create",
            Self::AfterCreate => "after_create",
            Self::BeforeUpdate => "before_update",
            Self::AfterUpdate => "after_update",
            Self::BeforeDelete => "before_delete",
            Self::AfterDelete => "after_delete",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookPoint {
    type Err = RelataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| RelataError::InvalidArgument(format!("unknown hook point `{s}`")))
    }
}

/// What a callback decided for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    Keep,
    Drop,
    Replace(Record),
}

impl From<bool> for HookDecision {
    fn from(keep: bool) -> Self {
        if keep { Self::Keep } else { Self::Drop }
    }
}

/// Call context handed to every callback.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub point: HookPoint,
    /// The entity being queried or written.
    pub entity: &'a str,
}

/// A hook callback.
pub type HookFn =
    Arc<dyn Fn(&Record, &HookContext<'_>) -> Result<HookDecision, RelataError> + Send + Sync>;

/// Handle returned by [`Hooks::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookId(pub u64);

#[derive(Clone)]
struct HookEntry {
    id: HookId,
    point: HookPoint,
    once: bool,
    callback: HookFn,
}

/// The hook table.
///
/// Mutation goes through `&self` so a query holding a shared borrow of the
/// database can still retire one-shot entries.
#[derive(Default)]
pub struct Hooks {
    entries: RefCell<Vec<HookEntry>>,
    next_id: Cell<u64>,
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback at `point`. `once` entries fire for one pass only.
    pub fn on<F>(&self, point: HookPoint, once: bool, callback: F) -> HookId
    where
        F: Fn(&Record, &HookContext<'_>) -> Result<HookDecision, RelataError>
            + Send
            + Sync
            + 'static,
    {
        let id = HookId(self.next_id.get().saturating_add(1));
        self.next_id.set(id.0);
        self.entries.borrow_mut().push(HookEntry {
            id,
            point,
            once,
            callback: Arc::new(callback),
        });
        tracing::debug!(point = %point, id = id.0, once, "hook registered");
        id
    }

    /// Remove a callback. Returns whether an entry was removed.
    pub fn off(&self, id: HookId) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Remove every callback and restart id numbering.
    pub fn reset(&self) {
        self.entries.borrow_mut().clear();
        self.next_id.set(0);
    }

    /// Number of callbacks registered at `point`.
    #[must_use]
    pub fn count(&self, point: HookPoint) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.point == point)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Run one pass of `point` over `records`.
    ///
    /// A callback error aborts the pass and is returned as is. One-shot
    /// entries that fired are retired either way.
    pub fn run(
        &self,
        point: HookPoint,
        entity: &str,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, RelataError> {
        let active: Vec<HookEntry> = self
            .entries
            .borrow()
            .iter()
            .filter(|e| e.point == point)
            .cloned()
            .collect();
        if active.is_empty() || records.is_empty() {
            return Ok(records);
        }

        let context = HookContext { point, entity };
        let mut fired = BTreeSet::new();
        let result = Self::pass(&active, &context, records, &mut fired);

        if !fired.is_empty() {
            self.entries.borrow_mut().retain(|e| !fired.contains(&e.id));
        }
        result
    }

    fn pass(
        active: &[HookEntry],
        context: &HookContext<'_>,
        records: Vec<Record>,
        fired: &mut BTreeSet<HookId>,
    ) -> Result<Vec<Record>, RelataError> {
        let mut kept = Vec::with_capacity(records.len());
        'records: for mut record in records {
            for entry in active {
                if entry.once {
                    fired.insert(entry.id);
                }
                match (entry.callback)(&record, context)? {
                    HookDecision::Keep => {}
                    HookDecision::Drop => {
                        tracing::trace!(point = %context.point, hook = entry.id.0, "record dropped");
                        continue 'records;
                    }
                    HookDecision::Replace(replacement) => record = replacement,
                }
            }
            kept.push(record);
        }
        Ok(kept)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("entries", &self.entries.borrow().len())
            .field("next_id", &self.next_id.get())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
