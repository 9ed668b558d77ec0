//! Freshness computation and conditional-request evaluation.
//!
//! Everything here is pure: the caller supplies the entry snapshot and the
//! current time.

use axum::http::{
    StatusCode,
    header::{CACHE_CONTROL, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE},
};
use time::{
    OffsetDateTime, PrimitiveDateTime, UtcOffset, format_description::BorrowedFormatItem,
    macros::format_description,
};

use crate::domain::{entry::Entry, etag::EntityTag};

use super::exchange::CacheRequest;

const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Outcome of a conditional evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Serve,
    NotModified,
    PreconditionFailed,
    NotFound,
    Conflict,
}

impl Verdict {
    /// Status for a terminal verdict. `Serve` has no fixed status.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Verdict::Serve => None,
            Verdict::NotModified => Some(StatusCode::NOT_MODIFIED),
            Verdict::PreconditionFailed => Some(StatusCode::PRECONDITION_FAILED),
            Verdict::NotFound => Some(StatusCode::NOT_FOUND),
            Verdict::Conflict => Some(StatusCode::CONFLICT),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Serve => "served",
            Verdict::NotModified => "not_modified",
            Verdict::PreconditionFailed => "precondition_failed",
            Verdict::NotFound => "not_found",
            Verdict::Conflict => "conflict",
        }
    }
}

/// Conditional headers of one request. Unparsable dates and directives are
/// treated as absent.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<OffsetDateTime>,
    pub if_unmodified_since: Option<OffsetDateTime>,
    pub min_fresh: Option<i64>,
}

impl Conditions {
    pub fn from_request(request: &CacheRequest) -> Self {
        Self {
            if_match: request.header_str(IF_MATCH).map(str::to_string),
            if_none_match: request.header_str(IF_NONE_MATCH).map(str::to_string),
            if_modified_since: request.header_str(IF_MODIFIED_SINCE).and_then(parse_http_date),
            if_unmodified_since: request
                .header_str(IF_UNMODIFIED_SINCE)
                .and_then(parse_http_date),
            min_fresh: request.header_str(CACHE_CONTROL).and_then(min_fresh),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEvaluation {
    pub verdict: Verdict,
    pub etag: EntityTag,
    pub last_modified: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

pub fn evaluate_read(entry: &Entry, conditions: &Conditions, now: OffsetDateTime) -> ReadEvaluation {
    let expires_at = entry.expires_at();
    let etag = EntityTag::of(&entry.value);
    let last_modified = entry.last_modified(now);

    let verdict = if fails_min_fresh(expires_at, conditions.min_fresh, now) {
        Verdict::NotFound
    } else if conditions
        .if_none_match
        .as_deref()
        .is_some_and(|header| etag.matches_header(header))
    {
        Verdict::NotModified
    } else if conditions
        .if_match
        .as_deref()
        .is_some_and(|header| !etag.matches_header(header))
    {
        Verdict::PreconditionFailed
    } else if conditions
        .if_unmodified_since
        .is_some_and(|since| since < last_modified)
    {
        Verdict::PreconditionFailed
    } else if conditions
        .if_modified_since
        .is_some_and(|since| since >= last_modified)
    {
        Verdict::NotModified
    } else {
        Verdict::Serve
    };

    ReadEvaluation {
        verdict,
        etag,
        last_modified,
        expires_at,
    }
}

/// `Serve` means the write may proceed.
pub fn evaluate_write(existing: Option<&Entry>, conditions: &Conditions, is_post: bool) -> Verdict {
    let Some(existing) = existing else {
        return Verdict::Serve;
    };
    if is_post {
        return Verdict::Conflict;
    }

    // Same precedence as reads: a matching If-None-Match wins over If-Match.
    let etag = EntityTag::of(&existing.value);
    if conditions
        .if_none_match
        .as_deref()
        .is_some_and(|header| etag.matches_header(header))
    {
        return Verdict::NotModified;
    }
    if conditions
        .if_match
        .as_deref()
        .is_some_and(|header| !etag.matches_header(header))
    {
        return Verdict::PreconditionFailed;
    }
    Verdict::Serve
}

/// `Serve` means the entry may be removed.
pub fn evaluate_delete(existing: Option<&Entry>, conditions: &Conditions) -> Verdict {
    let Some(existing) = existing else {
        return Verdict::NotFound;
    };

    let etag = EntityTag::of(&existing.value);
    if conditions
        .if_match
        .as_deref()
        .is_some_and(|header| !etag.matches_header(header))
    {
        return Verdict::PreconditionFailed;
    }
    match conditions.if_none_match.as_deref() {
        None => Verdict::Serve,
        Some(header) if etag.matches_header(header) => Verdict::Serve,
        Some(_) => Verdict::PreconditionFailed,
    }
}

/// `max-age` while fresh, `no-cache` once expired, nothing for immortal entries.
pub fn cache_control(expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> Option<String> {
    let remaining = (expires_at? - now).whole_seconds();
    if remaining > 0 {
        Some(format!("max-age={remaining}"))
    } else {
        Some("no-cache".to_string())
    }
}

fn fails_min_fresh(
    expires_at: Option<OffsetDateTime>,
    min_fresh: Option<i64>,
    now: OffsetDateTime,
) -> bool {
    match (expires_at, min_fresh) {
        (Some(expires_at), Some(min_fresh)) => (expires_at - now).whole_seconds() < min_fresh,
        _ => false,
    }
}

fn min_fresh(cache_control: &str) -> Option<i64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("min-fresh") {
            return None;
        }
        value.trim().trim_matches('"').parse().ok()
    })
}

pub fn format_http_date(value: OffsetDateTime) -> String {
    value
        .to_offset(UtcOffset::UTC)
        .format(HTTP_DATE)
        .unwrap_or_default()
}

pub fn parse_http_date(raw: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(raw.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}
