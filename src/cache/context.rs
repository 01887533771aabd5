//! Request-scoped cache state.
//!
//! Everything that would otherwise be a process-wide flag (forced refresh, "already
//! flushed during this lifecycle") lives here and is threaded through the engine
//! explicitly.

use std::cell::Cell;

use tracing::warn;

use super::error::CacheError;
use super::keys::Environment;
use super::scope::ScopeRegistry;

/// Cache state for one request or execution context.
///
/// Holds `RefCell`/`Cell` state and is therefore neither `Sync` nor meant to be
/// shared between threads.
#[derive(Debug)]
pub struct RequestContext {
    scopes: ScopeRegistry,
    environment: Environment,
    force_update: bool,
    flushed_all: Cell<bool>,
}

impl RequestContext {
    pub fn new(environment: Environment) -> Self {
        Self {
            scopes: ScopeRegistry::new(),
            environment,
            force_update: false,
            flushed_all: Cell::new(false),
        }
    }

    /// Skip store lookups and recompute every entry during this request.
    pub fn with_force_update(mut self, force_update: bool) -> Self {
        self.force_update = force_update;
        self
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn force_update(&self) -> bool {
        self.force_update
    }

    /// Whether a full flush already ran during this lifecycle.
    pub fn flushed_all(&self) -> bool {
        self.flushed_all.get()
    }

    pub(crate) fn mark_flushed_all(&self) {
        self.flushed_all.set(true);
    }

    /// Close the request, failing if any scope is still open.
    pub fn finish(self) -> Result<(), CacheError> {
        let depth = self.scopes.depth();
        if depth == 0 {
            return Ok(());
        }
        warn!(
            cache = "context",
            depth,
            site = self.environment.site(),
            "request finished with open cache scopes"
        );
        Err(CacheError::ResidualScopes { depth })
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Environment::default())
    }
}
