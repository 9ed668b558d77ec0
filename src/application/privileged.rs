//! Internal reads that bypass the store's audited public path.
//!
//! Entry introspection, cache configuration and placement info are read under
//! an [`ExecutionContext`]. The context can only be built here, so a handler
//! cannot reach the internal read functions without going through
//! [`PrivilegedAccessor`].

use std::sync::Arc;

use tracing::trace;

use crate::domain::entry::{Entry, Key};

use super::store::{CacheConfiguration, CacheStore, Distribution, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scope {
    /// Runs under a configured elevated principal.
    Elevated(String),
    /// Runs as the protocol layer itself.
    Service,
}

/// Capability handed to the store's internal read functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    scope: Scope,
}

impl ExecutionContext {
    fn new(elevated: Option<String>) -> Self {
        let scope = match elevated {
            Some(principal) => Scope::Elevated(principal),
            None => Scope::Service,
        };
        Self { scope }
    }

    pub fn principal(&self) -> Option<&str> {
        match &self.scope {
            Scope::Elevated(principal) => Some(principal),
            Scope::Service => None,
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self.scope, Scope::Elevated(_))
    }
}

#[derive(Clone)]
pub struct PrivilegedAccessor {
    store: Arc<dyn CacheStore>,
    context: ExecutionContext,
}

impl PrivilegedAccessor {
    pub fn new(store: Arc<dyn CacheStore>, elevated: Option<String>) -> Self {
        Self {
            store,
            context: ExecutionContext::new(elevated),
        }
    }

    /// Entry with its metadata, without recording an access.
    pub async fn internal_entry(&self, cache: &str, key: &Key) -> Result<Option<Entry>, StoreError> {
        trace!(
            target = "restcache::privileged",
            cache,
            elevated = self.context.is_elevated(),
            "internal entry read"
        );
        self.store.internal_entry(&self.context, cache, key).await
    }

    pub async fn configuration(&self, cache: &str) -> Result<CacheConfiguration, StoreError> {
        self.store.configuration(&self.context, cache).await
    }

    pub async fn distribution(&self, cache: &str, key: &Key) -> Result<Distribution, StoreError> {
        self.store.distribution(&self.context, cache, key).await
    }
}
