//! Cache scopes.
//!
//! A [`Scope`] accumulates the cache metadata of one memoized computation: the
//! invalidation tags it depends on, the smallest lifetime any part of it tolerates,
//! and whether it may be cached at all. Scopes live on the [`ScopeRegistry`] stack,
//! which mirrors the synchronous call stack of nested `remember` calls.
//!
//! Every announcement is applied to the active scope *and* to every scope beneath
//! it, so an enclosing computation always depends on what its nested computations
//! discovered.

use std::cell::RefCell;
use std::collections::BTreeSet;

use tracing::{trace, warn};

/// Accumulated cache metadata of one computation and its descendants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    tags: BTreeSet<String>,
    ttl: Option<u64>,
    enabled: bool,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            tags: BTreeSet::new(),
            ttl: None,
            enabled: true,
        }
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Smallest announced lifetime in seconds; `None` means unlimited.
    pub fn ttl(&self) -> Option<u64> {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn add_tag(&mut self, tag: &str) {
        self.tags.insert(tag.to_owned());
    }

    fn lower_ttl(&mut self, ttl: u64) {
        self.ttl = Some(self.ttl.map_or(ttl, |current| current.min(ttl)));
    }

    fn restrict(&mut self, enabled: bool) {
        self.enabled &= enabled;
    }

    /// Fold a finished child scope into this one.
    ///
    /// Tags are unioned, the ttl becomes the minimum of both, and `enabled` is
    /// ANDed. Once disabled, a scope never becomes cacheable again.
    pub fn merge(&mut self, child: &Scope) {
        for tag in &child.tags {
            self.add_tag(tag);
        }
        if let Some(ttl) = child.ttl {
            self.lower_ttl(ttl);
        }
        self.restrict(child.enabled);
    }
}

/// A finished scope together with the value its computation produced.
#[derive(Debug)]
pub struct Scoped<T> {
    pub scope: Scope,
    pub result: T,
}

/// Per-request stack of active scopes.
///
/// Not `Sync`: the stack is only valid while it mirrors a single call stack.
#[derive(Debug, Default)]
pub struct ScopeRegistry {
    stack: RefCell<Vec<Scope>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open scopes.
    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Snapshot of the innermost open scope.
    pub fn current(&self) -> Option<Scope> {
        self.stack.borrow().last().cloned()
    }

    /// Record a tag on the active scope and all enclosing scopes.
    ///
    /// Without an open scope the call is ignored.
    pub fn announce_tag(&self, tag: impl AsRef<str>) {
        let tag = tag.as_ref();
        for scope in self.stack.borrow_mut().iter_mut() {
            scope.add_tag(tag);
        }
    }

    pub fn announce_tags<I, S>(&self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            self.announce_tag(tag);
        }
    }

    /// Lower the lifetime of the active scope and all enclosing scopes.
    pub fn announce_ttl(&self, ttl: u64) {
        for scope in self.stack.borrow_mut().iter_mut() {
            scope.lower_ttl(ttl);
        }
    }

    /// AND `enabled` into the active scope and all enclosing scopes.
    pub fn announce_enabled(&self, enabled: bool) {
        if enabled {
            return;
        }
        for scope in self.stack.borrow_mut().iter_mut() {
            scope.restrict(false);
        }
    }

    /// Run `f` inside a fresh scope.
    ///
    /// The scope is popped and merged into its parent whether `f` returns `Ok`,
    /// returns `Err`, or panics. On success the popped scope (not the merged
    /// parent) is returned alongside the result.
    pub fn run_in_scope<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<Scoped<T>, E> {
        let guard = ScopeGuard::enter(self);
        let outcome = f();
        let scope = guard.exit();
        outcome.map(|result| Scoped { scope, result })
    }

    /// Open a scope that no guard will close.
    #[cfg(test)]
    pub(crate) fn open_detached(&self) {
        self.push();
    }

    fn push(&self) -> usize {
        let mut stack = self.stack.borrow_mut();
        stack.push(Scope::new());
        let depth = stack.len();
        trace!(cache = "scope", depth, "scope entered");
        depth
    }

    fn pop_and_merge(&self, depth: usize) -> Scope {
        let mut stack = self.stack.borrow_mut();
        if stack.len() > depth {
            warn!(
                cache = "scope",
                expected_depth = depth,
                actual_depth = stack.len(),
                "discarding scopes left open by nested computation"
            );
            stack.truncate(depth);
        }
        let popped = if stack.len() == depth {
            stack.pop()
        } else {
            None
        };
        let Some(scope) = popped else {
            warn!(
                cache = "scope",
                expected_depth = depth,
                actual_depth = stack.len(),
                "scope already removed from stack"
            );
            return Scope::new();
        };
        if let Some(parent) = stack.last_mut() {
            parent.merge(&scope);
        }
        trace!(
            cache = "scope",
            depth,
            tags = scope.tags.len(),
            ttl = ?scope.ttl,
            enabled = scope.enabled,
            "scope exited"
        );
        scope
    }
}

struct ScopeGuard<'a> {
    registry: &'a ScopeRegistry,
    depth: usize,
    open: bool,
}

impl<'a> ScopeGuard<'a> {
    fn enter(registry: &'a ScopeRegistry) -> Self {
        let depth = registry.push();
        Self {
            registry,
            depth,
            open: true,
        }
    }

    fn exit(mut self) -> Scope {
        self.open = false;
        self.registry.pop_and_merge(self.depth)
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.open {
            self.registry.pop_and_merge(self.depth);
        }
    }
}
