//! Media types as they appear in `Accept`, `Content-Type` and `Key-Content-Type`.
//!
//! The "match anything" range is its own variant rather than a `*/*` string so
//! negotiation code can pattern-match on it.

use std::{cmp::Ordering, fmt, str::FromStr};

use thiserror::Error;

const WILDCARD: &str = "*";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MediaTypeError {
    #[error("empty media type")]
    Empty,
    #[error("media type `{0}` is missing a subtype")]
    MissingSubtype(String),
    #[error("invalid media type parameter `{0}`")]
    InvalidParameter(String),
    #[error("invalid quality value `{0}`")]
    InvalidQuality(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    /// `*/*`: matches any concrete type.
    Wildcard,
    Concrete {
        primary: String,
        sub: String,
        params: Vec<(String, String)>,
    },
}

impl MediaType {
    pub fn new(primary: &str, sub: &str) -> Self {
        Self::Concrete {
            primary: primary.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    pub fn application_json() -> Self {
        Self::new("application", "json")
    }

    pub fn application_xml() -> Self {
        Self::new("application", "xml")
    }

    pub fn octet_stream() -> Self {
        Self::new("application", "octet-stream")
    }

    pub fn application_object() -> Self {
        Self::new("application", "x-java-object")
    }

    pub fn protostream() -> Self {
        Self::new("application", "x-protostream")
    }

    pub fn with_param(self, name: &str, value: &str) -> Self {
        match self {
            Self::Wildcard => Self::Wildcard,
            Self::Concrete {
                primary,
                sub,
                mut params,
            } => {
                params.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
                params.push((name.to_ascii_lowercase(), value.to_string()));
                Self::Concrete {
                    primary,
                    sub,
                    params,
                }
            }
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }

    /// True when neither the type nor the subtype is a `*` range.
    pub fn is_concrete(&self) -> bool {
        match self {
            Self::Wildcard => false,
            Self::Concrete { primary, sub, .. } => primary != WILDCARD && sub != WILDCARD,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        match self {
            Self::Wildcard => None,
            Self::Concrete { params, .. } => params
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
        }
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    /// Same media type without parameters.
    pub fn essence(&self) -> Self {
        match self {
            Self::Wildcard => Self::Wildcard,
            Self::Concrete { primary, sub, .. } => Self::new(primary, sub),
        }
    }

    /// Structural match ignoring parameters. `type/*` ranges match any subtype of
    /// their primary type; the relation is symmetric.
    pub fn matches(&self, other: &MediaType) -> bool {
        match (self, other) {
            (Self::Wildcard, _) | (_, Self::Wildcard) => true,
            (
                Self::Concrete {
                    primary: left_primary,
                    sub: left_sub,
                    ..
                },
                Self::Concrete {
                    primary: right_primary,
                    sub: right_sub,
                    ..
                },
            ) => {
                left_primary == right_primary
                    && (left_sub == WILDCARD || right_sub == WILDCARD || left_sub == right_sub)
            }
        }
    }

    /// Parse an `Accept` header into candidates in client-preference order.
    ///
    /// Candidates are ordered by their `q` weight (highest first) and keep
    /// header order among equal weights. `q=0` entries are refused outright.
    pub fn parse_list(header: &str) -> Result<Vec<MediaType>, MediaTypeError> {
        let mut ranked = Vec::new();
        for (position, raw) in header.split(',').enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            let (media_type, quality) = parse_range(raw)?;
            if quality <= 0.0 {
                continue;
            }
            ranked.push((quality, position, media_type));
        }

        if ranked.is_empty() {
            return Err(MediaTypeError::Empty);
        }

        ranked.sort_by(|(left_q, left_pos, _), (right_q, right_pos, _)| {
            right_q
                .partial_cmp(left_q)
                .unwrap_or(Ordering::Equal)
                .then(left_pos.cmp(right_pos))
        });

        Ok(ranked.into_iter().map(|(_, _, media)| media).collect())
    }
}

/// Parse one range, splitting off its `q` weight.
fn parse_range(raw: &str) -> Result<(MediaType, f32), MediaTypeError> {
    let (essence, mut params) = split_params(raw)?;
    let quality = match params.iter().position(|(name, _)| name == "q") {
        None => 1.0,
        Some(index) => {
            let (_, value) = params.remove(index);
            value
                .parse::<f32>()
                .ok()
                .filter(|q| (0.0..=1.0).contains(q))
                .ok_or(MediaTypeError::InvalidQuality(value))?
        }
    };
    Ok((build(essence, params)?, quality))
}

fn split_params(raw: &str) -> Result<(&str, Vec<(String, String)>), MediaTypeError> {
    let mut parts = raw.split(';');
    let essence = parts.next().map(str::trim).unwrap_or_default();
    if essence.is_empty() {
        return Err(MediaTypeError::Empty);
    }

    let mut params = Vec::new();
    for param in parts {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let (name, value) = param
            .split_once('=')
            .ok_or_else(|| MediaTypeError::InvalidParameter(param.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(MediaTypeError::InvalidParameter(param.to_string()));
        }
        let value = value.trim().trim_matches('"');
        params.push((name.to_ascii_lowercase(), value.to_string()));
    }
    Ok((essence, params))
}

fn build(essence: &str, params: Vec<(String, String)>) -> Result<MediaType, MediaTypeError> {
    if essence == WILDCARD || essence == "*/*" {
        return Ok(MediaType::Wildcard);
    }

    let (primary, sub) = essence
        .split_once('/')
        .map(|(primary, sub)| (primary.trim(), sub.trim()))
        .filter(|(primary, sub)| !primary.is_empty() && !sub.is_empty())
        .ok_or_else(|| MediaTypeError::MissingSubtype(essence.to_string()))?;

    Ok(MediaType::Concrete {
        primary: primary.to_ascii_lowercase(),
        sub: sub.to_ascii_lowercase(),
        params,
    })
}

impl FromStr for MediaType {
    type Err = MediaTypeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (essence, params) = split_params(raw)?;
        build(essence, params)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str("*/*"),
            Self::Concrete {
                primary,
                sub,
                params,
            } => {
                write!(f, "{primary}/{sub}")?;
                for (name, value) in params {
                    write!(f, "; {name}={value}")?;
                }
                Ok(())
            }
        }
    }
}
