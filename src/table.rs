//! Scoped value table.
//!
//! Every host-visible value occupies one entry of a single contiguous table.
//! Scopes are checkpoints into that table: opening a scope records the table
//! length, closing it truncates the table back to that length, releasing every
//! entry added since in one step.
//!
//! A [`ValueRef`] names an entry by index together with the scope that was
//! current when the entry was added. Indices are reused after a scope closes,
//! so a reference is only honoured if replaying the checkpoint stack for its
//! index yields the same scope id it was minted with.

use std::fmt;

/// Identifier of a value scope.
///
/// Ids are handed out in strictly increasing order by a [`ValueTable`] and
/// are never reused while that table lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ScopeId(u64);

impl ScopeId {
    /// The scope that is open when a table is created. It has no checkpoint
    /// and can never be popped.
    pub const ROOT: ScopeId = ScopeId(0);

    pub const fn from_raw(raw: u64) -> Self {
        ScopeId(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Capability token for a value held in a [`ValueTable`].
///
/// Plain data: copying it is free and it owns nothing. It is meaningful only
/// for the table (context) that minted it, and only until its scope or one of
/// that scope's ancestors is popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef {
    pub scope: ScopeId,
    pub index: usize,
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.scope)
    }
}

/// State saved when a scope opens and restored when it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Scope that was current before the push.
    pub parent: ScopeId,
    /// Table length at the time of the push.
    pub base: usize,
}

/// Append-only table of keep-alive entries with nested, bulk-released scopes.
///
/// The entry type is opaque to the table; dropping an entry is how it gets
/// released. The table does no locking of its own.
pub struct ValueTable<E> {
    entries: Vec<E>,
    checkpoints: Vec<Checkpoint>,
    current: ScopeId,
    latest: ScopeId,
}

impl<E> ValueTable<E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            checkpoints: Vec::new(),
            current: ScopeId::ROOT,
            latest: ScopeId::ROOT,
        }
    }

    /// Append an entry under the current scope.
    pub fn add(&mut self, entry: E) -> ValueRef {
        let index = self.entries.len();
        self.entries.push(entry);
        ValueRef {
            scope: self.current,
            index,
        }
    }

    /// Look up the entry for `r`, or `None` if the reference is stale or out
    /// of range.
    pub fn get(&self, r: ValueRef) -> Option<&E> {
        if self.owner_of(r.index)? != r.scope {
            return None;
        }
        self.entries.get(r.index)
    }

    /// Scope that owns the entry at `index`, recovered by walking the
    /// checkpoint stack from the innermost scope outwards.
    pub fn owner_of(&self, index: usize) -> Option<ScopeId> {
        if index >= self.entries.len() {
            return None;
        }
        let mut scope = self.current;
        for checkpoint in self.checkpoints.iter().rev() {
            if index >= checkpoint.base {
                break;
            }
            scope = checkpoint.parent;
        }
        Some(scope)
    }

    /// Open a nested scope and make it current.
    pub fn push_scope(&mut self) -> ScopeId {
        self.checkpoints.push(Checkpoint {
            parent: self.current,
            base: self.entries.len(),
        });
        self.current = self.next_id();
        self.current
    }

    /// Close the innermost scope, releasing every entry added while it (or
    /// any scope nested in it) was open.
    ///
    /// Returns `false` and changes nothing unless `id` is the current scope
    /// and a checkpoint exists for it.
    pub fn pop_scope(&mut self, id: ScopeId) -> bool {
        if id != self.current {
            return false;
        }
        let Some(checkpoint) = self.checkpoints.pop() else {
            return false;
        };
        self.current = checkpoint.parent;
        self.entries.truncate(checkpoint.base);
        true
    }

    /// Release every entry and checkpoint.
    ///
    /// The table moves to a fresh root scope so references minted before the
    /// clear cannot alias entries added after it.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.checkpoints.clear();
        self.current = self.next_id();
    }

    pub fn current_scope(&self) -> ScopeId {
        self.current
    }

    /// Number of open scopes above the root.
    pub fn depth(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_id(&mut self) -> ScopeId {
        // u64 ids: wraparound needs 2^64 pushes on one table.
        self.latest = ScopeId(self.latest.0.wrapping_add(1));
        self.latest
    }
}

impl<E> Default for ValueTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ValueTable<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueTable")
            .field("len", &self.entries.len())
            .field("current", &self.current)
            .field("checkpoints", &self.checkpoints)
            .finish()
    }
}
