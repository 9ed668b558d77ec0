//! In-process reference implementation of [`CacheStore`].
//!
//! Entries expire lazily: an expired entry is dropped the next time anything
//! looks at it. Cluster membership is simulated from configuration so the
//! placement headers have something real to report.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::{
    application::{
        exchange::Subject,
        privileged::ExecutionContext,
        store::{
            CacheConfiguration, CacheStore, Distribution, PutEntryParams, StoreError,
            ValueConversion,
        },
    },
    domain::{
        entry::{Entry, EntryMetadata, Expiration, Key},
        media::MediaType,
    },
};

const SOURCE: &str = "infra::memory";

/// Static definition of one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDefinition {
    pub name: String,
    pub lifespan: Expiration,
    pub max_idle: Expiration,
    pub storage: Option<MediaType>,
}

impl CacheDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifespan: Expiration::Unlimited,
            max_idle: Expiration::Unlimited,
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: MediaType) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_lifespan(mut self, lifespan: Expiration) -> Self {
        self.lifespan = lifespan;
        self
    }

    pub fn with_max_idle(mut self, max_idle: Expiration) -> Self {
        self.max_idle = max_idle;
        self
    }
}

/// How this node sees the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterView {
    pub node_name: String,
    pub server_address: String,
    /// Member names; the local node is added if missing.
    pub members: Vec<String>,
}

impl ClusterView {
    pub fn single(node_name: impl Into<String>, server_address: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            server_address: server_address.into(),
            members: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Bytes,
    media_type: MediaType,
    metadata: EntryMetadata,
    created: OffsetDateTime,
    last_used: OffsetDateTime,
}

impl StoredEntry {
    fn snapshot(&self) -> Entry {
        Entry {
            value: self.value.clone(),
            media_type: self.media_type.clone(),
            metadata: self.metadata,
            created: Some(self.created),
            last_used: Some(self.last_used),
        }
    }

    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.metadata.can_expire() && self.snapshot().is_expired(now)
    }
}

struct MemoryCache {
    configuration: CacheConfiguration,
    entries: DashMap<Key, StoredEntry>,
}

impl MemoryCache {
    /// Live entry under `key`, evicting it first if it has expired.
    fn live(&self, key: &Key, now: OffsetDateTime) -> Option<StoredEntry> {
        let entry = self.entries.get(key).map(|entry| entry.value().clone())?;
        if entry.is_expired(now) {
            self.entries
                .remove_if(key, |_, stored| stored.is_expired(now));
            trace!(target = SOURCE, key = %key.display_text(), "evicted expired entry");
            return None;
        }
        Some(entry)
    }
}

pub struct InMemoryStore {
    caches: DashMap<String, Arc<MemoryCache>>,
    cluster: ClusterView,
}

impl InMemoryStore {
    pub fn new(
        mut cluster: ClusterView,
        definitions: impl IntoIterator<Item = CacheDefinition>,
    ) -> Self {
        if !cluster.members.contains(&cluster.node_name) {
            cluster.members.push(cluster.node_name.clone());
        }
        cluster.members.sort();
        cluster.members.dedup();

        let caches = DashMap::new();
        for definition in definitions {
            debug!(
                target = SOURCE,
                cache = %definition.name,
                storage = ?definition.storage.as_ref().map(ToString::to_string),
                "defining cache"
            );
            let configuration = CacheConfiguration {
                lifespan: definition.lifespan,
                max_idle: definition.max_idle,
                value_conversion: conversion_for(definition.storage),
            };
            caches.insert(
                definition.name,
                Arc::new(MemoryCache {
                    configuration,
                    entries: DashMap::new(),
                }),
            );
        }

        Self { caches, cluster }
    }

    fn cache(&self, name: &str) -> Result<Arc<MemoryCache>, StoreError> {
        self.caches
            .get(name)
            .map(|cache| Arc::clone(cache.value()))
            .ok_or_else(|| StoreError::UnknownCache(name.to_string()))
    }

    fn primary_owner(&self, key: &Key) -> String {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let members = &self.cluster.members;
        let index = usize::try_from(hasher.finish() % members.len().max(1) as u64).unwrap_or(0);
        members
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.cluster.node_name.clone())
    }
}

/// Formats producible from each storage format. `None` passes values through.
fn conversion_for(storage: Option<MediaType>) -> ValueConversion {
    let Some(storage) = storage.map(|storage| storage.essence()) else {
        return ValueConversion::passthrough();
    };

    let readable = if storage == MediaType::application_object() {
        vec![
            MediaType::application_object(),
            MediaType::text_plain(),
            MediaType::application_json(),
            MediaType::octet_stream(),
        ]
    } else if storage == MediaType::protostream() {
        vec![
            MediaType::protostream(),
            MediaType::application_json(),
            MediaType::octet_stream(),
        ]
    } else if storage == MediaType::application_json() {
        vec![
            MediaType::application_json(),
            MediaType::text_plain(),
            MediaType::octet_stream(),
        ]
    } else if storage == MediaType::text_plain() {
        vec![MediaType::text_plain(), MediaType::octet_stream()]
    } else if storage == MediaType::octet_stream() {
        vec![MediaType::octet_stream(), MediaType::text_plain()]
    } else {
        vec![storage.clone(), MediaType::octet_stream()]
    };

    ValueConversion {
        storage: Some(storage),
        readable,
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(
        &self,
        subject: &Subject,
        cache: &str,
        key: &Key,
        media_type: &MediaType,
    ) -> Result<Option<Bytes>, StoreError> {
        let store = self.cache(cache)?;
        let now = OffsetDateTime::now_utc();
        let Some(entry) = store.live(key, now) else {
            return Ok(None);
        };

        let conversion = &store.configuration.value_conversion;
        if !conversion.is_conversion_supported(media_type) {
            return Err(StoreError::Encoding {
                from: conversion.storage.clone().unwrap_or(entry.media_type),
                to: media_type.clone(),
            });
        }

        if let Some(mut stored) = store.entries.get_mut(key) {
            stored.last_used = now;
        }
        trace!(
            target = SOURCE,
            cache,
            subject = subject.name().unwrap_or("anonymous"),
            "get"
        );
        Ok(Some(entry.value))
    }

    async fn put(
        &self,
        subject: &Subject,
        cache: &str,
        params: PutEntryParams,
    ) -> Result<(), StoreError> {
        let store = self.cache(cache)?;
        let now = OffsetDateTime::now_utc();
        trace!(
            target = SOURCE,
            cache,
            subject = subject.name().unwrap_or("anonymous"),
            bytes = params.value.len(),
            "put"
        );
        store.entries.insert(
            params.key,
            StoredEntry {
                value: params.value,
                media_type: params.media_type,
                metadata: params.metadata,
                created: now,
                last_used: now,
            },
        );
        Ok(())
    }

    async fn remove(&self, _subject: &Subject, cache: &str, key: &Key) -> Result<bool, StoreError> {
        let store = self.cache(cache)?;
        let now = OffsetDateTime::now_utc();
        Ok(store
            .entries
            .remove(key)
            .is_some_and(|(_, stored)| !stored.is_expired(now)))
    }

    async fn clear(&self, subject: &Subject, cache: &str) -> Result<(), StoreError> {
        let store = self.cache(cache)?;
        debug!(
            target = SOURCE,
            cache,
            subject = subject.name().unwrap_or("anonymous"),
            entries = store.entries.len(),
            "clearing cache"
        );
        store.entries.clear();
        Ok(())
    }

    async fn keys(&self, _subject: &Subject, cache: &str) -> Result<Vec<Key>, StoreError> {
        let store = self.cache(cache)?;
        let now = OffsetDateTime::now_utc();
        store.entries.retain(|_, stored| !stored.is_expired(now));
        Ok(store.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn internal_entry(
        &self,
        context: &ExecutionContext,
        cache: &str,
        key: &Key,
    ) -> Result<Option<Entry>, StoreError> {
        let store = self.cache(cache)?;
        trace!(
            target = SOURCE,
            cache,
            principal = context.principal().unwrap_or("service"),
            "internal entry"
        );
        Ok(store
            .live(key, OffsetDateTime::now_utc())
            .map(|stored| stored.snapshot()))
    }

    async fn configuration(
        &self,
        _context: &ExecutionContext,
        cache: &str,
    ) -> Result<CacheConfiguration, StoreError> {
        Ok(self.cache(cache)?.configuration.clone())
    }

    async fn distribution(
        &self,
        _context: &ExecutionContext,
        cache: &str,
        key: &Key,
    ) -> Result<Distribution, StoreError> {
        self.cache(cache)?;
        Ok(Distribution {
            primary_owner: self.primary_owner(key),
            node_name: self.cluster.node_name.clone(),
            server_address: self.cluster.server_address.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use crate::application::privileged::PrivilegedAccessor;

    use super::*;

    fn store(definitions: Vec<CacheDefinition>) -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new(
            ClusterView {
                node_name: "node-b".to_string(),
                server_address: "127.0.0.1:11222".to_string(),
                members: vec!["node-a".to_string(), "node-c".to_string()],
            },
            definitions,
        ))
    }

    fn key(name: &str) -> Key {
        Key::new(name.to_string(), MediaType::text_plain())
    }

    fn put_params(name: &str, value: &'static [u8], metadata: EntryMetadata) -> PutEntryParams {
        PutEntryParams {
            key: key(name),
            value: Bytes::from_static(value),
            media_type: MediaType::text_plain(),
            metadata,
        }
    }

    #[tokio::test]
    async fn unknown_cache_is_reported() {
        let store = store(vec![]);
        let err = store
            .keys(&Subject::anonymous(), "missing")
            .await
            .expect_err("unknown cache");
        assert!(matches!(err, StoreError::UnknownCache(name) if name == "missing"));
    }

    #[tokio::test]
    async fn put_get_remove_roundtrip() {
        let store = store(vec![CacheDefinition::new("c1")]);
        let subject = Subject::named("alice");
        store
            .put(&subject, "c1", put_params("k", b"v1", EntryMetadata::default()))
            .await
            .expect("put");

        let value = store
            .get(&subject, "c1", &key("k"), &MediaType::text_plain())
            .await
            .expect("get");
        assert_eq!(value, Some(Bytes::from_static(b"v1")));

        assert!(store.remove(&subject, "c1", &key("k")).await.expect("remove"));
        assert!(!store.remove(&subject, "c1", &key("k")).await.expect("remove"));
    }

    #[tokio::test]
    async fn internal_reads_do_not_touch_last_used() {
        let store = store(vec![CacheDefinition::new("c1")]);
        let accessor = PrivilegedAccessor::new(store.clone(), None);
        store
            .put(&Subject::anonymous(), "c1", put_params("k", b"v1", EntryMetadata::default()))
            .await
            .expect("put");

        let first = accessor
            .internal_entry("c1", &key("k"))
            .await
            .expect("read")
            .expect("present");
        let second = accessor
            .internal_entry("c1", &key("k"))
            .await
            .expect("read")
            .expect("present");
        assert_eq!(first.last_used, second.last_used);
    }

    #[test]
    fn expired_entries_are_evicted_lazily() {
        let cache = MemoryCache {
            configuration: CacheConfiguration::default(),
            entries: DashMap::new(),
        };
        let now = OffsetDateTime::now_utc();
        cache.entries.insert(
            key("k"),
            StoredEntry {
                value: Bytes::from_static(b"v"),
                media_type: MediaType::text_plain(),
                metadata: EntryMetadata {
                    lifespan: Expiration::Seconds(10),
                    max_idle: Expiration::Unlimited,
                },
                created: now,
                last_used: now,
            },
        );

        assert!(cache.live(&key("k"), now + Duration::seconds(5)).is_some());
        assert!(cache.live(&key("k"), now + Duration::seconds(10)).is_none());
        assert!(cache.entries.is_empty());
    }

    #[tokio::test]
    async fn conversion_follows_storage_format() {
        let store = store(vec![
            CacheDefinition::new("proto").with_storage(MediaType::protostream()),
        ]);
        let accessor = PrivilegedAccessor::new(store.clone(), None);
        let configuration = accessor.configuration("proto").await.expect("configured");
        let conversion = configuration.value_conversion;
        assert_eq!(conversion.storage, Some(MediaType::protostream()));
        assert!(conversion.is_conversion_supported(&MediaType::application_json()));
        assert!(!conversion.is_conversion_supported(&MediaType::text_plain()));

        store
            .put(&Subject::anonymous(), "proto", put_params("k", b"{}", EntryMetadata::default()))
            .await
            .expect("put");
        let err = store
            .get(&Subject::anonymous(), "proto", &key("k"), &MediaType::text_plain())
            .await
            .expect_err("not convertible");
        assert!(matches!(err, StoreError::Encoding { .. }));
    }

    #[tokio::test]
    async fn configured_defaults_are_exposed() {
        let store = store(vec![
            CacheDefinition::new("c1")
                .with_lifespan(Expiration::Seconds(60))
                .with_max_idle(Expiration::Seconds(30)),
        ]);
        let accessor = PrivilegedAccessor::new(store, Some("admin".to_string()));
        let configuration = accessor.configuration("c1").await.expect("configured");
        assert_eq!(configuration.lifespan, Expiration::Seconds(60));
        assert_eq!(configuration.max_idle, Expiration::Seconds(30));
    }

    #[tokio::test]
    async fn primary_owner_is_a_stable_cluster_member() {
        let store = store(vec![CacheDefinition::new("c1")]);
        let accessor = PrivilegedAccessor::new(store, None);
        let first = accessor.distribution("c1", &key("k")).await.expect("placed");
        let second = accessor.distribution("c1", &key("k")).await.expect("placed");

        assert_eq!(first, second);
        assert!(["node-a", "node-b", "node-c"].contains(&first.primary_owner.as_str()));
        assert_eq!(first.node_name, "node-b");
        assert_eq!(first.server_address, "127.0.0.1:11222");
    }

    #[tokio::test]
    async fn clear_and_keys() {
        let store = store(vec![CacheDefinition::new("c1")]);
        let subject = Subject::anonymous();
        for name in ["a", "b"] {
            store
                .put(&subject, "c1", put_params(name, b"v", EntryMetadata::default()))
                .await
                .expect("put");
        }
        let mut keys: Vec<String> = store
            .keys(&subject, "c1")
            .await
            .expect("keys")
            .iter()
            .map(Key::display_text)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        store.clear(&subject, "c1").await.expect("clear");
        assert!(store.keys(&subject, "c1").await.expect("keys").is_empty());
    }
}
