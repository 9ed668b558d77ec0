//! Request handlers for cache entries and whole caches.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use axum::http::{
    Method, StatusCode,
    header::{CACHE_CONTROL, ETAG, EXPIRES, LAST_MODIFIED},
};
use metrics::histogram;
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::{
    entry::{Entry, Key},
    etag::EntityTag,
    media::MediaType,
};

use super::{
    coordinator::WorkerPool,
    error::AccessError,
    exchange::{CacheRequest, CacheResponse, headers},
    metadata,
    negotiation::{self, Charset, KeysFormat},
    preconditions::{self, Conditions, ReadEvaluation, Verdict},
    privileged::PrivilegedAccessor,
    store::{CacheStore, PutEntryParams, StoreError},
};

pub(crate) const METRIC_KEYS_SERIALIZE_MS: &str = "restcache_keys_serialize_ms";

const CONFLICT_MESSAGE: &str = "An entry already exists";

/// Reads re-evaluated this many times while concurrent writes keep moving the entry.
const READ_ATTEMPTS: u32 = 3;

/// Whether reads may expose cluster placement headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtendedHeaders {
    #[default]
    Never,
    /// Only when the request asks with `?extended=true`.
    OnDemand,
}

/// Executes the `search` action. Query languages live outside this crate.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn search(
        &self,
        cache: &str,
        request: &CacheRequest,
    ) -> Result<CacheResponse, AccessError>;
}

/// Answers every search with 501.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedQueries;

#[async_trait]
impl QueryHandler for UnsupportedQueries {
    async fn search(
        &self,
        cache: &str,
        _request: &CacheRequest,
    ) -> Result<CacheResponse, AccessError> {
        Ok(CacheResponse::new(StatusCode::NOT_IMPLEMENTED)
            .diagnostic(format!("search is not available for cache `{cache}`")))
    }
}

#[derive(Clone)]
pub struct CacheResource {
    store: Arc<dyn CacheStore>,
    privileged: PrivilegedAccessor,
    workers: WorkerPool,
    queries: Arc<dyn QueryHandler>,
    extended_headers: ExtendedHeaders,
}

impl CacheResource {
    pub fn new(
        store: Arc<dyn CacheStore>,
        privileged: PrivilegedAccessor,
        workers: WorkerPool,
        extended_headers: ExtendedHeaders,
    ) -> Self {
        Self {
            store,
            privileged,
            workers,
            queries: Arc::new(UnsupportedQueries),
            extended_headers,
        }
    }

    pub fn with_query_handler(mut self, queries: Arc<dyn QueryHandler>) -> Self {
        self.queries = queries;
        self
    }

    /// GET and HEAD on an entry.
    ///
    /// Freshness headers come from a metadata snapshot while the body comes
    /// from an audited read. The snapshot is taken again after the body is
    /// fetched; when its tag moved, the read is evaluated anew on the newer
    /// snapshot so `ETag` always describes the body that is sent.
    pub async fn read(
        &self,
        request: &CacheRequest,
        cache: &str,
        raw_key: &str,
    ) -> Result<CacheResponse, AccessError> {
        let key = entry_key(request, raw_key)?;
        let configuration = self.privileged.configuration(cache).await?;
        let conversion = &configuration.value_conversion;
        let negotiated = negotiation::negotiate(request.accept(), conversion)?;
        let conditions = Conditions::from_request(request);

        let mut snapshot = self.privileged.internal_entry(cache, &key).await?;
        for attempt in 1..=READ_ATTEMPTS {
            let Some(entry) = snapshot else {
                return Ok(CacheResponse::new(StatusCode::NOT_FOUND));
            };

            let now = OffsetDateTime::now_utc();
            let evaluation = preconditions::evaluate_read(&entry, &conditions, now);
            debug!(
                target = "restcache::resource",
                cache,
                attempt,
                verdict = evaluation.verdict.label(),
                "evaluated read"
            );
            if let Some(status) = evaluation.verdict.status() {
                return Ok(CacheResponse::new(status));
            }

            let media_type = negotiation::settle(
                negotiated.clone(),
                conversion.storage.as_ref(),
                &entry.value,
                request.accept(),
            )?;
            let Some(value) = self
                .store
                .get(&request.subject, cache, &key, &media_type)
                .await?
            else {
                return Ok(CacheResponse::new(StatusCode::NOT_FOUND));
            };

            snapshot = self.privileged.internal_entry(cache, &key).await?;
            let unchanged = snapshot
                .as_ref()
                .is_some_and(|current| EntityTag::of(&current.value) == evaluation.etag);
            if !unchanged {
                debug!(target = "restcache::resource", cache, attempt, "entry changed during read");
                continue;
            }

            let mut response =
                freshness_headers(CacheResponse::new(StatusCode::OK), &entry, &evaluation, now);
            if self.extended_headers == ExtendedHeaders::OnDemand
                && request.extended().is_some_and(is_truthy)
            {
                let distribution = self.privileged.distribution(cache, &key).await?;
                response.set_header(headers::CLUSTER_PRIMARY_OWNER, distribution.primary_owner);
                response.set_header(headers::CLUSTER_NODE_NAME, distribution.node_name);
                response.set_header(headers::CLUSTER_SERVER_ADDRESS, distribution.server_address);
            }

            let response = response.entity(&media_type, value);
            if request.method == Method::HEAD {
                return Ok(CacheResponse {
                    body: Default::default(),
                    ..response
                });
            }
            return Ok(response);
        }

        Err(StoreError::backend(format!(
            "entry in cache `{cache}` changed on each of {READ_ATTEMPTS} read attempts"
        ))
        .into())
    }

    /// PUT and POST on an entry.
    pub async fn write(
        &self,
        request: &CacheRequest,
        cache: &str,
        raw_key: &str,
    ) -> Result<CacheResponse, AccessError> {
        let key = entry_key(request, raw_key)?;
        let body = request
            .body
            .clone()
            .filter(|body| !body.is_empty())
            .ok_or(AccessError::NoBody)?;

        let configuration = self.privileged.configuration(cache).await?;
        let conversion = &configuration.value_conversion;
        let content_type = match request.content_type()? {
            Some(content_type) => content_type,
            None => conversion
                .storage
                .clone()
                .unwrap_or_else(MediaType::octet_stream),
        };
        if !conversion.accepts(&content_type) {
            return Err(AccessError::UnsupportedContentType(content_type.to_string()));
        }

        let metadata = metadata::resolve(request, &configuration)?;
        let existing = self.privileged.internal_entry(cache, &key).await?;
        let verdict = preconditions::evaluate_write(
            existing.as_ref(),
            &Conditions::from_request(request),
            request.method == Method::POST,
        );
        debug!(
            target = "restcache::resource",
            cache,
            key_type = %key.media_type(),
            verdict = verdict.label(),
            "evaluated write"
        );

        match verdict {
            Verdict::Serve => {}
            Verdict::Conflict => {
                return Ok(CacheResponse::new(StatusCode::CONFLICT).diagnostic(CONFLICT_MESSAGE));
            }
            other => {
                return Ok(CacheResponse::new(
                    other.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                ));
            }
        }

        let etag = EntityTag::of(&body);
        self.store
            .put(
                &request.subject,
                cache,
                PutEntryParams {
                    key,
                    value: body,
                    media_type: content_type,
                    metadata,
                },
            )
            .await?;

        let status = if existing.is_some() {
            StatusCode::OK
        } else {
            StatusCode::CREATED
        };
        Ok(CacheResponse::new(status).header(ETAG, etag))
    }

    /// DELETE on an entry.
    pub async fn delete(
        &self,
        request: &CacheRequest,
        cache: &str,
        raw_key: &str,
    ) -> Result<CacheResponse, AccessError> {
        let key = entry_key(request, raw_key)?;
        let existing = self.privileged.internal_entry(cache, &key).await?;
        let verdict =
            preconditions::evaluate_delete(existing.as_ref(), &Conditions::from_request(request));
        debug!(
            target = "restcache::resource",
            cache,
            verdict = verdict.label(),
            "evaluated delete"
        );

        if let Some(status) = verdict.status() {
            return Ok(CacheResponse::new(status));
        }

        let removed = self.store.remove(&request.subject, cache, &key).await?;
        Ok(CacheResponse::new(if removed {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        }))
    }

    /// DELETE on a cache.
    pub async fn clear(
        &self,
        request: &CacheRequest,
        cache: &str,
    ) -> Result<CacheResponse, AccessError> {
        self.store.clear(&request.subject, cache).await?;
        Ok(CacheResponse::new(StatusCode::OK))
    }

    /// GET on a cache: list its keys.
    pub async fn keys(
        &self,
        request: &CacheRequest,
        cache: &str,
    ) -> Result<CacheResponse, AccessError> {
        let configuration = self.privileged.configuration(cache).await?;
        let (format, charset) =
            negotiation::negotiate_keys(request.accept(), &configuration.value_conversion)?;
        let keys = self.store.keys(&request.subject, cache).await?;
        let count = keys.len();

        let started = Instant::now();
        let body = self
            .workers
            .dispatch(move || serialize_keys(&keys, format, charset))
            .await??;
        histogram!(METRIC_KEYS_SERIALIZE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        debug!(target = "restcache::resource", cache, count, ?format, "listed keys");
        let content_type = format.media_type().with_param("charset", charset.name());
        Ok(CacheResponse::new(StatusCode::OK)
            .header(CACHE_CONTROL, "no-cache")
            .entity(&content_type, body))
    }

    pub async fn search(
        &self,
        request: &CacheRequest,
        cache: &str,
    ) -> Result<CacheResponse, AccessError> {
        self.queries.search(cache, request).await
    }
}

fn entry_key(request: &CacheRequest, raw_key: &str) -> Result<Key, AccessError> {
    if raw_key.is_empty() {
        return Err(AccessError::NoKey);
    }
    Ok(Key::new(raw_key.to_string(), request.key_content_type()?))
}

fn is_truthy(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

fn freshness_headers(
    mut response: CacheResponse,
    entry: &Entry,
    evaluation: &ReadEvaluation,
    now: OffsetDateTime,
) -> CacheResponse {
    response.set_header(ETAG, evaluation.etag);
    response.set_header(
        LAST_MODIFIED,
        preconditions::format_http_date(evaluation.last_modified),
    );
    if let Some(expires_at) = evaluation.expires_at {
        response.set_header(EXPIRES, preconditions::format_http_date(expires_at));
    }
    if let Some(cache_control) = preconditions::cache_control(evaluation.expires_at, now) {
        response.set_header(CACHE_CONTROL, cache_control);
    }
    response.set_header(
        headers::TIME_TO_LIVE_SECONDS,
        entry.metadata.lifespan.header_value(),
    );
    response.set_header(
        headers::MAX_IDLE_TIME_SECONDS,
        entry.metadata.max_idle.header_value(),
    );
    response.set_header(headers::CREATED, epoch_millis(entry.created));
    response.set_header(headers::LAST_USED, epoch_millis(entry.last_used));
    response
}

fn epoch_millis(stamp: Option<OffsetDateTime>) -> i128 {
    stamp.map_or(-1, |stamp| stamp.unix_timestamp_nanos() / 1_000_000)
}

fn serialize_keys(
    keys: &[Key],
    format: KeysFormat,
    charset: Charset,
) -> Result<Vec<u8>, AccessError> {
    let names: Vec<String> = keys.iter().map(Key::display_text).collect();
    let text = match format {
        KeysFormat::Json => serde_json::to_string(&names)
            .map_err(|err| AccessError::worker_pool(format!("failed to encode keys: {err}")))?,
        KeysFormat::Text => names.iter().map(|name| format!("{name}\n")).collect(),
        KeysFormat::Xml => {
            let mut xml = String::from("<?xml version=\"1.0\"?><keys>");
            for name in &names {
                xml.push_str("<key>");
                xml.push_str(&escape_xml(name));
                xml.push_str("</key>");
            }
            xml.push_str("</keys>");
            xml
        }
    };
    Ok(charset.encode(&text))
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
