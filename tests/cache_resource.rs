use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use axum::{
    Extension, Router,
    body::{Body, to_bytes},
    http::{
        Method, Request, Response, StatusCode,
        header::{ACCEPT, ALLOW, CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_MATCH, IF_NONE_MATCH},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use restcache::{
    application::{
        coordinator::WorkerPool,
        error::AccessError,
        exchange::{CacheRequest, CacheResponse, Subject},
        privileged::{ExecutionContext, PrivilegedAccessor},
        resource::{CacheResource, ExtendedHeaders, QueryHandler},
        router::CacheRouter,
        store::{CacheConfiguration, CacheStore, Distribution, PutEntryParams, StoreError},
    },
    domain::{
        entry::{Entry, Expiration, Key},
        etag::EntityTag,
        media::MediaType,
    },
    infra::{
        http::{HttpState, build_router},
        memory::{CacheDefinition, ClusterView, InMemoryStore},
    },
};
use tower::ServiceExt;

const PREFIX: &str = "/rest/v2/caches";

fn resource_with(definitions: Vec<CacheDefinition>, extended: ExtendedHeaders) -> CacheResource {
    let store: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new(
        ClusterView::single("node-1", "127.0.0.1:11222"),
        definitions,
    ));
    let privileged = PrivilegedAccessor::new(Arc::clone(&store), None);
    let workers = WorkerPool::new(NonZeroUsize::new(2).expect("non-zero"));
    CacheResource::new(store, privileged, workers, extended)
}

fn mount(resource: CacheResource) -> Router {
    build_router(
        HttpState {
            router: CacheRouter::new(resource),
        },
        PREFIX,
    )
}

fn app_with(definitions: Vec<CacheDefinition>, extended: ExtendedHeaders) -> Router {
    mount(resource_with(definitions, extended))
}

fn app() -> Router {
    app_with(
        vec![
            CacheDefinition::new("c1"),
            CacheDefinition::new("proto").with_storage(MediaType::protostream()),
            CacheDefinition::new("objects").with_storage(MediaType::application_object()),
            CacheDefinition::new("short").with_lifespan(Expiration::Seconds(3600)),
        ],
        ExtendedHeaders::OnDemand,
    )
}

fn request(method: Method, path: &str) -> axum::http::request::Builder {
    Request::builder().method(method).uri(format!("{PREFIX}{path}"))
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.expect("router responds")
}

async fn put(app: &Router, path: &str, value: &'static str) -> Response<Body> {
    send(
        app,
        request(Method::PUT, path)
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from(value))
            .expect("request"),
    )
    .await
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body collects");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

fn header(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn tag(value: &str) -> String {
    EntityTag::of(value.as_bytes()).to_string()
}

#[tokio::test]
async fn conditional_lifecycle_of_a_single_key() {
    let app = app();

    let created = put(&app, "/c1/k", "v1").await;
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(header(&created, "etag"), Some(tag("v1")));

    let cached = send(
        &app,
        request(Method::GET, "/c1/k")
            .header(IF_NONE_MATCH, tag("v1"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(cached.status(), StatusCode::NOT_MODIFIED);
    assert!(body_text(cached).await.is_empty());

    let replaced = put(&app, "/c1/k", "v2").await;
    assert_eq!(replaced.status(), StatusCode::OK);
    assert_eq!(header(&replaced, "etag"), Some(tag("v2")));

    let stale_delete = send(
        &app,
        request(Method::DELETE, "/c1/k")
            .header(IF_NONE_MATCH, tag("v1"))
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(stale_delete.status(), StatusCode::PRECONDITION_FAILED);

    let still_there = send(
        &app,
        request(Method::GET, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(still_there.status(), StatusCode::OK);
    assert_eq!(body_text(still_there).await, "v2");

    let deleted = send(
        &app,
        request(Method::DELETE, "/c1/k")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(deleted.status(), StatusCode::OK);

    let gone = send(
        &app,
        request(Method::GET, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn read_carries_freshness_headers() {
    let app = app();
    put(&app, "/short/k", "v1").await;

    let response = send(
        &app,
        request(Method::GET, "/short/k")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "etag"), Some(tag("v1")));
    assert_eq!(header(&response, "timetoliveseconds").as_deref(), Some("3600"));
    assert_eq!(header(&response, "maxidletimeseconds").as_deref(), Some("-1"));
    assert!(header(&response, "last-modified").is_some_and(|v| v.ends_with("GMT")));
    assert!(header(&response, "expires").is_some());
    assert!(
        header(&response, "cache-control").is_some_and(|v| v.starts_with("max-age=")),
        "fresh entries advertise max-age"
    );
    assert!(header(&response, "created").is_some_and(|v| v.parse::<i64>().is_ok()));
    assert!(header(&response, "last-used").is_some());
    assert_eq!(header(&response, "content-type").as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn immortal_entries_omit_cache_control() {
    let app = app();
    put(&app, "/c1/k", "v1").await;

    let response = send(
        &app,
        request(Method::GET, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(response.headers().get(CACHE_CONTROL), None);
    assert_eq!(response.headers().get("expires"), None);
    assert_eq!(header(&response, "timetoliveseconds").as_deref(), Some("-1"));
}

#[tokio::test]
async fn ttl_override_applies_to_the_written_entry() {
    let app = app();
    let response = send(
        &app,
        request(Method::PUT, "/c1/k")
            .header(CONTENT_TYPE, "text/plain")
            .header("timeToLiveSeconds", "120")
            .body(Body::from("v1"))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let read = send(
        &app,
        request(Method::GET, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(header(&read, "timetoliveseconds").as_deref(), Some("120"));
}

#[tokio::test]
async fn head_returns_headers_without_body() {
    let app = app();
    put(&app, "/c1/k", "v1").await;

    let response = send(
        &app,
        request(Method::HEAD, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "etag"), Some(tag("v1")));
    assert!(body_text(response).await.is_empty());
}

#[tokio::test]
async fn mismatched_if_match_fails_every_operation() {
    let app = app();
    put(&app, "/c1/k", "v1").await;

    for method in [Method::GET, Method::PUT, Method::DELETE] {
        let mut builder = request(method.clone(), "/c1/k").header(IF_MATCH, tag("v0"));
        let body = if method == Method::PUT {
            builder = builder.header(CONTENT_TYPE, "text/plain");
            Body::from("v9")
        } else {
            Body::empty()
        };
        let response = send(&app, builder.body(body).expect("request")).await;
        assert_eq!(
            response.status(),
            StatusCode::PRECONDITION_FAILED,
            "{method} with stale If-Match"
        );
    }

    let current = send(
        &app,
        request(Method::GET, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(body_text(current).await, "v1");
}

#[tokio::test]
async fn post_over_existing_key_conflicts_and_keeps_value() {
    let app = app();
    put(&app, "/c1/k", "v1").await;

    let response = send(
        &app,
        request(Method::POST, "/c1/k")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("v2"))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_text(response).await, "An entry already exists");

    let current = send(
        &app,
        request(Method::GET, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(body_text(current).await, "v1");
}

#[tokio::test]
async fn post_creates_missing_key() {
    let app = app();
    let response = send(
        &app,
        request(Method::POST, "/c1/fresh")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("v1"))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn put_with_matching_if_none_match_is_a_no_op() {
    let app = app();
    put(&app, "/c1/k", "v1").await;

    let response = send(
        &app,
        request(Method::PUT, "/c1/k")
            .header(CONTENT_TYPE, "text/plain")
            .header(IF_NONE_MATCH, tag("v1"))
            .body(Body::from("v2"))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let current = send(
        &app,
        request(Method::GET, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(body_text(current).await, "v1");
}

#[tokio::test]
async fn protostream_cache_answers_wildcard_with_json() {
    let app = app();
    let written = send(
        &app,
        request(Method::PUT, "/proto/k")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{\"a\":1}"))
            .expect("request"),
    )
    .await;
    assert_eq!(written.status(), StatusCode::CREATED);

    let read = send(
        &app,
        request(Method::GET, "/proto/k")
            .header(ACCEPT, "*/*")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(read.status(), StatusCode::OK);
    assert_eq!(header(&read, "content-type").as_deref(), Some("application/json"));
}

#[tokio::test]
async fn object_cache_answers_wildcard_with_text() {
    let app = app();
    put(&app, "/objects/k", "hello").await;

    let read = send(
        &app,
        request(Method::GET, "/objects/k")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(header(&read, "content-type").as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn unproducible_accept_is_not_acceptable() {
    let app = app();
    let response = send(
        &app,
        request(Method::GET, "/proto/k")
            .header(ACCEPT, "image/png")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn subtype_ranges_resolve_to_a_concrete_content_type() {
    let app = app();
    put(&app, "/c1/k", "{}").await;
    let text = send(
        &app,
        request(Method::GET, "/c1/k")
            .header(ACCEPT, "text/*")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(text.status(), StatusCode::OK);
    assert_eq!(header(&text, "content-type").as_deref(), Some("text/plain"));
    assert_eq!(body_text(text).await, "{}");

    let written = send(
        &app,
        request(Method::PUT, "/proto/k")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .expect("request"),
    )
    .await;
    assert_eq!(written.status(), StatusCode::CREATED);
    let proto = send(
        &app,
        request(Method::GET, "/proto/k")
            .header(ACCEPT, "application/*")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(proto.status(), StatusCode::OK);
    assert_eq!(
        header(&proto, "content-type").as_deref(),
        Some("application/x-protostream")
    );
}

#[tokio::test]
async fn subtype_range_outside_the_value_rendering_is_not_acceptable() {
    let app = app();
    put(&app, "/c1/k", "plain text").await;
    let response = send(
        &app,
        request(Method::GET, "/c1/k")
            .header(ACCEPT, "image/*")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn unstorable_content_type_is_unsupported() {
    let app = app();
    let response = send(
        &app,
        request(Method::PUT, "/proto/k")
            .header(CONTENT_TYPE, "image/png")
            .body(Body::from("png"))
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn request_shape_errors() {
    let app = app();

    let no_key = send(
        &app,
        request(Method::GET, "/c1/").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(no_key.status(), StatusCode::BAD_REQUEST);

    let no_body = send(
        &app,
        request(Method::PUT, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(no_body.status(), StatusCode::BAD_REQUEST);

    let declared_empty = send(
        &app,
        request(Method::PUT, "/c1/e")
            .header(CONTENT_TYPE, "text/plain")
            .header("content-length", "0")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(declared_empty.status(), StatusCode::BAD_REQUEST);
    let never_stored = send(
        &app,
        request(Method::GET, "/c1/e").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(never_stored.status(), StatusCode::NOT_FOUND);

    let bad_ttl = send(
        &app,
        request(Method::PUT, "/c1/k")
            .header("timeToLiveSeconds", "later")
            .body(Body::from("v"))
            .expect("request"),
    )
    .await;
    assert_eq!(bad_ttl.status(), StatusCode::BAD_REQUEST);

    let missing = send(
        &app,
        request(Method::GET, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_cache_and_wrong_method() {
    let app = app();

    let unknown = send(
        &app,
        request(Method::GET, "/nope/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let wrong = send(
        &app,
        request(Method::PATCH, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(wrong.headers().get(ALLOW).is_some());
}

#[tokio::test]
async fn keys_listing_and_clear() {
    let app = app();
    put(&app, "/c1/a", "1").await;
    put(&app, "/c1/b", "2").await;

    let listing = send(
        &app,
        request(Method::GET, "/c1").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(listing.status(), StatusCode::OK);
    assert_eq!(header(&listing, "cache-control").as_deref(), Some("no-cache"));
    assert_eq!(
        header(&listing, "content-type").as_deref(),
        Some("application/json; charset=utf-8")
    );
    let mut keys: Vec<String> =
        serde_json::from_str(&body_text(listing).await).expect("json array");
    keys.sort();
    assert_eq!(keys, vec!["a", "b"]);

    let text = send(
        &app,
        request(Method::GET, "/c1")
            .header(ACCEPT, "text/plain")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    let body = body_text(text).await;
    assert_eq!(body.lines().count(), 2);

    let bad_charset = send(
        &app,
        request(Method::GET, "/c1")
            .header(ACCEPT, "text/plain; charset=koi8-r")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(bad_charset.status(), StatusCode::NOT_ACCEPTABLE);

    let cleared = send(
        &app,
        request(Method::DELETE, "/c1").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(cleared.status(), StatusCode::OK);

    let empty = send(
        &app,
        request(Method::GET, "/c1").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(body_text(empty).await, "[]");
}

#[tokio::test]
async fn keys_listing_follows_the_cache_value_format() {
    let app = app();
    put(&app, "/objects/a", "1").await;

    let objects = send(
        &app,
        request(Method::GET, "/objects").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(objects.status(), StatusCode::OK);
    assert_eq!(
        header(&objects, "content-type").as_deref(),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(body_text(objects).await, "a\n");

    let proto_xml = send(
        &app,
        request(Method::GET, "/proto")
            .header(ACCEPT, "application/xml")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(proto_xml.status(), StatusCode::NOT_ACCEPTABLE);

    let proto_default = send(
        &app,
        request(Method::GET, "/proto").body(Body::empty()).expect("request"),
    )
    .await;
    assert_eq!(
        header(&proto_default, "content-type").as_deref(),
        Some("application/json; charset=utf-8")
    );
}

#[tokio::test]
async fn extended_headers_only_on_demand() {
    let app = app();
    put(&app, "/c1/k", "v1").await;

    let plain = send(
        &app,
        request(Method::GET, "/c1/k").body(Body::empty()).expect("request"),
    )
    .await;
    assert!(plain.headers().get("cluster-primary-owner").is_none());

    let extended = send(
        &app,
        request(Method::GET, "/c1/k?extended=true")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(
        header(&extended, "cluster-primary-owner").as_deref(),
        Some("node-1")
    );
    assert_eq!(header(&extended, "cluster-node-name").as_deref(), Some("node-1"));
    assert_eq!(
        header(&extended, "cluster-server-address").as_deref(),
        Some("127.0.0.1:11222")
    );

    let never = app_with(vec![CacheDefinition::new("c1")], ExtendedHeaders::Never);
    put(&never, "/c1/k", "v1").await;
    let refused = send(
        &never,
        request(Method::GET, "/c1/k?extended=true")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert!(refused.headers().get("cluster-primary-owner").is_none());
}

#[tokio::test]
async fn search_is_not_implemented_by_default() {
    let app = app();
    let response = send(
        &app,
        request(Method::GET, "/c1?action=search")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);

    let unknown = send(
        &app,
        request(Method::GET, "/c1?action=rebalance")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = app();
    let response = send(
        &app,
        request(Method::GET, "/c1")
            .header("x-request-id", "req-42")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(header(&response, "x-request-id").as_deref(), Some("req-42"));
    assert!(response.headers().get(ETAG).is_none());
}

struct EchoQuery;

#[async_trait]
impl QueryHandler for EchoQuery {
    async fn search(
        &self,
        cache: &str,
        request: &CacheRequest,
    ) -> Result<CacheResponse, AccessError> {
        let query = request.query.get("query").cloned().unwrap_or_default();
        Ok(CacheResponse::new(StatusCode::OK).entity(
            &MediaType::text_plain(),
            format!("{cache}:{query}"),
        ))
    }
}

#[tokio::test]
async fn search_is_delegated_to_the_query_handler() {
    let resource = resource_with(vec![CacheDefinition::new("c1")], ExtendedHeaders::Never)
        .with_query_handler(Arc::new(EchoQuery));
    let app = mount(resource);

    for method in [Method::GET, Method::POST] {
        let response = send(
            &app,
            request(method, "/c1?action=search&query=from%20Person")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "c1:from Person");
    }

    let wrong = send(
        &app,
        request(Method::DELETE, "/c1?action=search")
            .body(Body::empty())
            .expect("request"),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::METHOD_NOT_ALLOWED);
}

/// Delegates to the in-memory store and remembers who wrote.
struct RecordingStore {
    inner: InMemoryStore,
    writers: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn get(
        &self,
        subject: &Subject,
        cache: &str,
        key: &Key,
        media_type: &MediaType,
    ) -> Result<Option<Bytes>, StoreError> {
        self.inner.get(subject, cache, key, media_type).await
    }

    async fn put(
        &self,
        subject: &Subject,
        cache: &str,
        params: PutEntryParams,
    ) -> Result<(), StoreError> {
        self.writers
            .lock()
            .expect("writers lock")
            .push(subject.name().map(str::to_string));
        self.inner.put(subject, cache, params).await
    }

    async fn remove(&self, subject: &Subject, cache: &str, key: &Key) -> Result<bool, StoreError> {
        self.inner.remove(subject, cache, key).await
    }

    async fn clear(&self, subject: &Subject, cache: &str) -> Result<(), StoreError> {
        self.inner.clear(subject, cache).await
    }

    async fn keys(&self, subject: &Subject, cache: &str) -> Result<Vec<Key>, StoreError> {
        self.inner.keys(subject, cache).await
    }

    async fn internal_entry(
        &self,
        context: &ExecutionContext,
        cache: &str,
        key: &Key,
    ) -> Result<Option<Entry>, StoreError> {
        self.inner.internal_entry(context, cache, key).await
    }

    async fn configuration(
        &self,
        context: &ExecutionContext,
        cache: &str,
    ) -> Result<CacheConfiguration, StoreError> {
        self.inner.configuration(context, cache).await
    }

    async fn distribution(
        &self,
        context: &ExecutionContext,
        cache: &str,
        key: &Key,
    ) -> Result<Distribution, StoreError> {
        self.inner.distribution(context, cache, key).await
    }
}

#[tokio::test]
async fn subject_extension_reaches_the_store() {
    let recording = Arc::new(RecordingStore {
        inner: InMemoryStore::new(
            ClusterView::single("node-1", "127.0.0.1:11222"),
            [CacheDefinition::new("c1")],
        ),
        writers: Mutex::new(Vec::new()),
    });
    let store: Arc<dyn CacheStore> = recording.clone();
    let privileged = PrivilegedAccessor::new(Arc::clone(&store), None);
    let resource = CacheResource::new(
        store,
        privileged,
        WorkerPool::new(NonZeroUsize::MIN),
        ExtendedHeaders::Never,
    );

    let authenticated = mount(resource.clone()).layer(Extension(Subject::named("alice")));
    assert_eq!(put(&authenticated, "/c1/a", "v").await.status(), StatusCode::CREATED);

    let unauthenticated = mount(resource);
    assert_eq!(put(&unauthenticated, "/c1/b", "v").await.status(), StatusCode::CREATED);

    let writers = recording.writers.lock().expect("writers lock").clone();
    assert_eq!(writers, vec![Some("alice".to_string()), None]);
}
