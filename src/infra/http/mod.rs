//! axum adapter: decodes HTTP into [`CacheRequest`] and encodes the
//! [`CacheResponse`] back. All protocol decisions live in `application`.

mod middleware;

use std::collections::HashMap;

use axum::{
    Extension, Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    middleware as axum_middleware,
    response::Response,
    routing::any,
};

use crate::application::{
    exchange::{CacheRequest, CacheResponse, Subject},
    router::CacheRouter,
};

pub use middleware::RequestContext;

#[derive(Clone)]
pub struct HttpState {
    pub router: CacheRouter,
}

/// Build the cache routes mounted under `context_path` (e.g. `/rest/v2/caches`).
///
/// Authentication is not handled here. An upstream layer is expected to insert
/// an [`Extension<Subject>`] for the caller; requests without one reach the
/// store as the anonymous subject.
pub fn build_router(state: HttpState, context_path: &str) -> Router {
    let cache_routes = Router::new()
        .route("/{*path}", any(dispatch))
        .with_state(state);

    let context_path = context_path.trim_end_matches('/');
    let routes = if context_path.is_empty() {
        cache_routes
    } else {
        Router::new().nest(context_path, cache_routes)
    };

    routes
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

async fn dispatch(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    subject: Option<Extension<Subject>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = (!body.is_empty()).then_some(body);

    let request = CacheRequest {
        method,
        path,
        query,
        headers,
        body,
        subject: subject.map(|Extension(subject)| subject).unwrap_or_default(),
    };

    into_http(state.router.dispatch(request).await)
}

fn into_http(response: CacheResponse) -> Response {
    let CacheResponse {
        status,
        headers,
        body,
        report,
    } = response;

    let mut http = Response::new(Body::from(body));
    *http.status_mut() = status;
    *http.headers_mut() = headers;
    if let Some(report) = report {
        report.attach(&mut http);
    }
    http
}
