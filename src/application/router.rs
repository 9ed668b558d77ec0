//! Binds method, path and action to a cache handler.

use axum::http::{Method, StatusCode, header::ALLOW};
use metrics::counter;
use tracing::debug;

use super::{
    error::AccessError,
    exchange::{CacheRequest, CacheResponse},
    resource::CacheResource,
};

pub(crate) const METRIC_REQUESTS_TOTAL: &str = "restcache_requests_total";

const SEARCH_ACTION: &str = "search";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Delete,
    Clear,
    Keys,
    Search,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
            Operation::Clear => "clear",
            Operation::Keys => "keys",
            Operation::Search => "search",
        }
    }
}

/// A resolved route. `key` is set for entry paths only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<'a> {
    pub operation: Operation,
    pub cache: &'a str,
    pub key: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    NotFound,
    MethodNotAllowed(&'static [Method]),
    NoKey,
    UnknownAction(String),
}

const ENTRY_METHODS: &[Method] = &[
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::POST,
    Method::DELETE,
];
const CACHE_METHODS: &[Method] = &[Method::GET, Method::DELETE];
const ACTION_METHODS: &[Method] = &[Method::GET, Method::POST];

/// Pure route lookup; never touches the store.
///
/// The first path segment names the cache; everything after the first `/` is
/// the key, so keys may themselves contain slashes.
pub fn resolve<'a>(
    method: &Method,
    path: &'a str,
    action: Option<&str>,
) -> Result<Route<'a>, RouteError> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let (cache, key) = match path.split_once('/') {
        Some((cache, key)) => (cache, Some(key)),
        None => (path, None),
    };
    if cache.is_empty() {
        return Err(RouteError::NotFound);
    }

    match key {
        Some(key) => {
            let operation = match *method {
                Method::GET | Method::HEAD => Operation::Read,
                Method::PUT | Method::POST => Operation::Write,
                Method::DELETE => Operation::Delete,
                _ => return Err(RouteError::MethodNotAllowed(ENTRY_METHODS)),
            };
            if key.is_empty() {
                return Err(RouteError::NoKey);
            }
            Ok(Route {
                operation,
                cache,
                key: Some(key),
            })
        }
        None => {
            let operation = match (action, method) {
                (Some(SEARCH_ACTION), &Method::GET | &Method::POST) => Operation::Search,
                (Some(SEARCH_ACTION), _) => {
                    return Err(RouteError::MethodNotAllowed(ACTION_METHODS));
                }
                (Some(other), _) => return Err(RouteError::UnknownAction(other.to_string())),
                (None, &Method::GET) => Operation::Keys,
                (None, &Method::DELETE) => Operation::Clear,
                (None, _) => return Err(RouteError::MethodNotAllowed(CACHE_METHODS)),
            };
            Ok(Route {
                operation,
                cache,
                key: None,
            })
        }
    }
}

/// Routes requests to [`CacheResource`] and records request metrics.
#[derive(Clone)]
pub struct CacheRouter {
    resource: CacheResource,
}

impl CacheRouter {
    pub fn new(resource: CacheResource) -> Self {
        Self { resource }
    }

    pub async fn dispatch(&self, request: CacheRequest) -> CacheResponse {
        let route = match resolve(&request.method, &request.path, request.action()) {
            Ok(route) => route,
            Err(err) => {
                let response = route_failure(err);
                record("unrouted", &response, None);
                return response;
            }
        };

        debug!(
            target = "restcache::router",
            method = %request.method,
            cache = route.cache,
            operation = route.operation.as_str(),
            "dispatching cache request"
        );

        let key = route.key.unwrap_or_default();
        let result = match route.operation {
            Operation::Read => self.resource.read(&request, route.cache, key).await,
            Operation::Write => self.resource.write(&request, route.cache, key).await,
            Operation::Delete => self.resource.delete(&request, route.cache, key).await,
            Operation::Clear => self.resource.clear(&request, route.cache).await,
            Operation::Keys => self.resource.keys(&request, route.cache).await,
            Operation::Search => self.resource.search(&request, route.cache).await,
        };

        match result {
            Ok(response) => {
                record(route.operation.as_str(), &response, None);
                response
            }
            Err(err) => {
                let outcome = err.outcome();
                let response = CacheResponse::from(err);
                record(route.operation.as_str(), &response, Some(outcome));
                response
            }
        }
    }
}

fn route_failure(err: RouteError) -> CacheResponse {
    match err {
        RouteError::NotFound => CacheResponse::new(StatusCode::NOT_FOUND),
        RouteError::MethodNotAllowed(allowed) => {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            CacheResponse::new(StatusCode::METHOD_NOT_ALLOWED).header(ALLOW, allow)
        }
        RouteError::NoKey => AccessError::NoKey.into(),
        RouteError::UnknownAction(action) => AccessError::UnknownAction(action).into(),
    }
}

fn record(operation: &'static str, response: &CacheResponse, error: Option<&'static str>) {
    let outcome = error.unwrap_or_else(|| status_outcome(response.status));
    counter!(METRIC_REQUESTS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
}

fn status_outcome(status: StatusCode) -> &'static str {
    match status {
        StatusCode::OK | StatusCode::CREATED => "ok",
        StatusCode::NOT_MODIFIED => "not_modified",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::CONFLICT => "conflict",
        StatusCode::PRECONDITION_FAILED => "precondition_failed",
        StatusCode::METHOD_NOT_ALLOWED => "method_not_allowed",
        StatusCode::NOT_IMPLEMENTED => "not_implemented",
        status if status.is_client_error() => "client_error",
        _ => "server_error",
    }
}
