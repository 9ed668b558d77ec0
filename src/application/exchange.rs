//! Transport-neutral request and response carried through the protocol layer.

use std::{collections::HashMap, fmt};

use axum::http::{
    HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
    header::{ACCEPT, AsHeaderName, CONTENT_TYPE},
};
use bytes::Bytes;
use tracing::warn;

use crate::domain::media::MediaType;

use super::error::{AccessError, ErrorReport};

/// Non-standard header names used by the cache protocol.
pub mod headers {
    use axum::http::HeaderName;

    pub const KEY_CONTENT_TYPE: HeaderName = HeaderName::from_static("key-content-type");
    pub const TIME_TO_LIVE_SECONDS: HeaderName = HeaderName::from_static("timetoliveseconds");
    pub const MAX_IDLE_TIME_SECONDS: HeaderName = HeaderName::from_static("maxidletimeseconds");
    pub const CREATED: HeaderName = HeaderName::from_static("created");
    pub const LAST_USED: HeaderName = HeaderName::from_static("last-used");
    pub const CLUSTER_PRIMARY_OWNER: HeaderName = HeaderName::from_static("cluster-primary-owner");
    pub const CLUSTER_NODE_NAME: HeaderName = HeaderName::from_static("cluster-node-name");
    pub const CLUSTER_SERVER_ADDRESS: HeaderName =
        HeaderName::from_static("cluster-server-address");
}

/// Query parameter carrying the extended-metadata opt-in.
pub const EXTENDED_PARAM: &str = "extended";
/// Query parameter selecting an action on a cache path.
pub const ACTION_PARAM: &str = "action";

/// Caller identity. Passed to the store untouched; this layer never inspects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    name: Option<String>,
}

impl Subject {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct CacheRequest {
    pub method: Method,
    /// Path relative to the cache context, e.g. `c1/k`.
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    /// `None` when the client sent no content at all.
    pub body: Option<Bytes>,
    pub subject: Subject,
}

impl CacheRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            headers: HeaderMap::new(),
            body: None,
            subject: Subject::anonymous(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header_str<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn accept(&self) -> Option<&str> {
        self.header_str(ACCEPT)
    }

    pub fn action(&self) -> Option<&str> {
        self.query.get(ACTION_PARAM).map(String::as_str)
    }

    pub fn extended(&self) -> Option<&str> {
        self.query.get(EXTENDED_PARAM).map(String::as_str)
    }

    pub fn content_type(&self) -> Result<Option<MediaType>, AccessError> {
        self.header_str(CONTENT_TYPE)
            .map(|raw| {
                raw.parse()
                    .map_err(|err| AccessError::invalid_header("Content-Type", err))
            })
            .transpose()
    }

    /// Declared key media type; keys default to plain text.
    pub fn key_content_type(&self) -> Result<MediaType, AccessError> {
        match self.header_str(headers::KEY_CONTENT_TYPE) {
            Some(raw) => raw
                .parse()
                .map_err(|err| AccessError::invalid_header("Key-Content-Type", err)),
            None => Ok(MediaType::text_plain()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub report: Option<ErrorReport>,
}

impl CacheResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            report: None,
        }
    }

    pub fn set_header(&mut self, name: HeaderName, value: impl fmt::Display) {
        let rendered = value.to_string();
        match HeaderValue::from_str(&rendered) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => warn!(
                target = "restcache::exchange",
                header = %name,
                value = %rendered,
                "dropping header with non-visible characters"
            ),
        }
    }

    pub fn header(mut self, name: HeaderName, value: impl fmt::Display) -> Self {
        self.set_header(name, value);
        self
    }

    /// Attach a body. The content type must be concrete.
    pub fn entity(mut self, content_type: &MediaType, body: impl Into<Bytes>) -> Self {
        debug_assert!(content_type.is_concrete());
        self.set_header(CONTENT_TYPE, content_type);
        self.body = body.into();
        self
    }

    /// Short diagnostic body for error and conflict outcomes.
    pub fn diagnostic(mut self, message: impl Into<String>) -> Self {
        self.set_header(CONTENT_TYPE, MediaType::text_plain());
        self.body = Bytes::from(message.into());
        self
    }

    pub fn header_str<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}
