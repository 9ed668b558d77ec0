//! Seam between the protocol layer and the distributed store.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::{
    entry::{Entry, EntryMetadata, Expiration, Key},
    media::MediaType,
};

use super::{exchange::Subject, privileged::ExecutionContext};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache `{0}` does not exist")]
    UnknownCache(String),
    #[error("cannot convert from `{from}` to `{to}`")]
    Encoding { from: MediaType, to: MediaType },
    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Formats a cache can hand out for its stored values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueConversion {
    /// Declared storage format; `None` stores whatever the client sent.
    pub storage: Option<MediaType>,
    /// Formats producible from storage. Empty means values pass through
    /// unconverted and any requested type is accepted.
    pub readable: Vec<MediaType>,
}

impl ValueConversion {
    pub fn passthrough() -> Self {
        Self::default()
    }

    pub fn is_conversion_supported(&self, requested: &MediaType) -> bool {
        if requested.is_wildcard() || self.readable.is_empty() {
            return true;
        }
        self.readable
            .iter()
            .any(|candidate| candidate.matches(requested))
    }

    /// Whether a value declared as `content_type` may be written.
    pub fn accepts(&self, content_type: &MediaType) -> bool {
        content_type.is_concrete() && self.is_conversion_supported(content_type)
    }
}

/// Per-cache settings visible to the protocol layer.
#[derive(Debug, Clone, Default)]
pub struct CacheConfiguration {
    pub lifespan: Expiration,
    pub max_idle: Expiration,
    pub value_conversion: ValueConversion,
}

/// Where an entry lives in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub primary_owner: String,
    pub node_name: String,
    pub server_address: String,
}

#[derive(Debug, Clone)]
pub struct PutEntryParams {
    pub key: Key,
    pub value: Bytes,
    pub media_type: MediaType,
    pub metadata: EntryMetadata,
}

/// Async operations of the distributed store.
///
/// Public operations take the caller's [`Subject`]. Internal reads take an
/// [`ExecutionContext`], which only the privileged accessor can build, and
/// must not touch access times.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Audited read that records the access and converts the value.
    async fn get(
        &self,
        subject: &Subject,
        cache: &str,
        key: &Key,
        media_type: &MediaType,
    ) -> Result<Option<Bytes>, StoreError>;

    async fn put(
        &self,
        subject: &Subject,
        cache: &str,
        params: PutEntryParams,
    ) -> Result<(), StoreError>;

    async fn remove(&self, subject: &Subject, cache: &str, key: &Key) -> Result<bool, StoreError>;

    async fn clear(&self, subject: &Subject, cache: &str) -> Result<(), StoreError>;

    async fn keys(&self, subject: &Subject, cache: &str) -> Result<Vec<Key>, StoreError>;

    async fn internal_entry(
        &self,
        context: &ExecutionContext,
        cache: &str,
        key: &Key,
    ) -> Result<Option<Entry>, StoreError>;

    async fn configuration(
        &self,
        context: &ExecutionContext,
        cache: &str,
    ) -> Result<CacheConfiguration, StoreError>;

    async fn distribution(
        &self,
        context: &ExecutionContext,
        cache: &str,
        key: &Key,
    ) -> Result<Distribution, StoreError>;
}
