//! Resolution of per-entry lifespan and max-idle from request overrides and
//! cache defaults.

use crate::domain::entry::{EntryMetadata, Expiration};

use super::{
    error::AccessError,
    exchange::{CacheRequest, headers},
    store::CacheConfiguration,
};

/// Raw override as it arrived on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Override {
    Absent,
    UseDefault,
    Unlimited,
    Seconds(u64),
}

impl Override {
    fn parse(header: &'static str, raw: Option<&str>) -> Result<Self, AccessError> {
        let Some(raw) = raw else {
            return Ok(Override::Absent);
        };
        let seconds: i64 = raw
            .parse()
            .map_err(|_| AccessError::invalid_header(header, format!("`{raw}` is not a number")))?;
        Ok(match seconds {
            0 => Override::UseDefault,
            negative if negative < 0 => Override::Unlimited,
            positive => Override::Seconds(positive.unsigned_abs()),
        })
    }

    fn resolve(self, default: Expiration) -> Expiration {
        match self {
            Override::Absent | Override::UseDefault => default,
            Override::Unlimited => Expiration::Unlimited,
            Override::Seconds(seconds) => Expiration::Seconds(seconds),
        }
    }
}

/// Metadata for a write: overrides win, the cache defaults fill the gaps.
pub fn resolve(
    request: &CacheRequest,
    configuration: &CacheConfiguration,
) -> Result<EntryMetadata, AccessError> {
    let lifespan = Override::parse(
        "timeToLiveSeconds",
        request.header_str(headers::TIME_TO_LIVE_SECONDS),
    )?;
    let max_idle = Override::parse(
        "maxIdleTimeSeconds",
        request.header_str(headers::MAX_IDLE_TIME_SECONDS),
    )?;

    Ok(EntryMetadata {
        lifespan: lifespan.resolve(configuration.lifespan),
        max_idle: max_idle.resolve(configuration.max_idle),
    })
}
