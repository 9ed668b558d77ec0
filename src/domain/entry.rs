//! Keys, entries and their expiration metadata as seen by the protocol layer.

use std::hash::{Hash, Hasher};

use bytes::Bytes;
use time::{Duration, OffsetDateTime};

use super::media::MediaType;

/// Opaque key content plus the media type it was declared with.
///
/// Equality and hashing look at the bytes only; two keys sent with different
/// `Key-Content-Type` headers but identical content address the same entry.
#[derive(Debug, Clone)]
pub struct Key {
    content: Bytes,
    media_type: MediaType,
}

impl Key {
    pub fn new(content: impl Into<Bytes>, media_type: MediaType) -> Self {
        Self {
            content: content.into(),
            media_type,
        }
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    /// Lossy text rendering used for key listings and logs.
    pub fn display_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.content.hash(state);
    }
}

/// Lifespan or max-idle setting. `Unlimited` is a sentinel, never a zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    #[default]
    Unlimited,
    Seconds(u64),
}

impl Expiration {
    pub fn from_seconds(seconds: Option<u64>) -> Self {
        seconds.map_or(Self::Unlimited, Self::Seconds)
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Unlimited => None,
            Self::Seconds(seconds) => {
                Some(Duration::seconds(i64::try_from(*seconds).unwrap_or(i64::MAX)))
            }
        }
    }

    /// Value echoed in `timeToLiveSeconds` / `maxIdleTimeSeconds`; `-1` is unlimited.
    pub fn header_value(&self) -> i64 {
        match self {
            Self::Unlimited => -1,
            Self::Seconds(seconds) => i64::try_from(*seconds).unwrap_or(i64::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryMetadata {
    pub lifespan: Expiration,
    pub max_idle: Expiration,
}

impl EntryMetadata {
    pub fn can_expire(&self) -> bool {
        self.lifespan != Expiration::Unlimited || self.max_idle != Expiration::Unlimited
    }
}

/// An entry read from the store. Never retained beyond one request.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Bytes,
    pub media_type: MediaType,
    pub metadata: EntryMetadata,
    pub created: Option<OffsetDateTime>,
    pub last_used: Option<OffsetDateTime>,
}

impl Entry {
    /// Earliest of `created + lifespan` and `last_used + max_idle`.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        let by_lifespan = self
            .created
            .zip(self.metadata.lifespan.duration())
            .and_then(|(created, lifespan)| created.checked_add(lifespan));
        let by_idle = self
            .last_used
            .zip(self.metadata.max_idle.duration())
            .and_then(|(used, idle)| used.checked_add(idle));

        match (by_lifespan, by_idle) {
            (Some(left), Some(right)) => Some(left.min(right)),
            (left, right) => left.or(right),
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_some_and(|expires| expires <= now)
    }

    /// Creation time, else last access, else `now`; truncated to whole seconds
    /// because HTTP dates carry no sub-second precision.
    pub fn last_modified(&self, now: OffsetDateTime) -> OffsetDateTime {
        let stamp = self.created.or(self.last_used).unwrap_or(now);
        stamp.replace_nanosecond(0).unwrap_or(stamp)
    }
}
