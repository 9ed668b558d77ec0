//! Content negotiation for entry reads and key listings.

use crate::domain::media::MediaType;

use super::{error::AccessError, store::ValueConversion};

/// Pick the response format for an entry read.
///
/// A `type/*` range resolves to the first readable format it matches. The
/// result stays non-concrete only when the client accepts anything the
/// storage has no preferred rendering for, or when the cache has no
/// conversion table; [`settle`] finishes the job once the value is known.
pub fn negotiate(
    accept: Option<&str>,
    conversion: &ValueConversion,
) -> Result<MediaType, AccessError> {
    let candidates = candidates(accept)?;
    let chosen = candidates
        .into_iter()
        .find(|candidate| conversion.is_conversion_supported(candidate))
        .ok_or_else(|| AccessError::unacceptable(accept))?;
    let chosen = narrow(chosen, conversion.storage.as_ref());
    if chosen.is_wildcard() || chosen.is_concrete() {
        return Ok(chosen);
    }
    Ok(conversion
        .readable
        .iter()
        .find(|readable| readable.matches(&chosen))
        .cloned()
        .unwrap_or(chosen))
}

/// Replace a wildcard with the natural rendering of two storage formats.
pub fn narrow(chosen: MediaType, storage: Option<&MediaType>) -> MediaType {
    if !chosen.is_wildcard() {
        return chosen;
    }
    match storage.map(MediaType::essence) {
        Some(storage) if storage == MediaType::application_object() => MediaType::text_plain(),
        Some(storage) if storage == MediaType::protostream() => MediaType::application_json(),
        _ => MediaType::Wildcard,
    }
}

/// Concrete response type for a read once the stored value is at hand.
///
/// A range left by [`negotiate`] takes the value's default rendering when that
/// rendering falls inside it; otherwise the read is not acceptable.
pub fn settle(
    negotiated: MediaType,
    storage: Option<&MediaType>,
    value: &[u8],
    accept: Option<&str>,
) -> Result<MediaType, AccessError> {
    if negotiated.is_concrete() {
        return Ok(negotiated);
    }
    let default = default_for_value(storage, value);
    if negotiated.matches(&default) {
        Ok(default)
    } else {
        Err(AccessError::unacceptable(accept))
    }
}

fn default_for_value(storage: Option<&MediaType>, value: &[u8]) -> MediaType {
    match storage {
        Some(storage) if storage.is_concrete() => storage.clone(),
        _ if std::str::from_utf8(value).is_err() => MediaType::octet_stream(),
        _ => MediaType::text_plain(),
    }
}

fn candidates(accept: Option<&str>) -> Result<Vec<MediaType>, AccessError> {
    match accept {
        None => Ok(vec![MediaType::Wildcard]),
        Some(header) => {
            MediaType::parse_list(header).map_err(|_| AccessError::unacceptable(Some(header)))
        }
    }
}

/// Renderings offered for a key listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysFormat {
    Json,
    Text,
    Xml,
}

impl KeysFormat {
    const ALL: [KeysFormat; 3] = [KeysFormat::Json, KeysFormat::Text, KeysFormat::Xml];

    pub fn media_type(&self) -> MediaType {
        match self {
            KeysFormat::Json => MediaType::application_json(),
            KeysFormat::Text => MediaType::text_plain(),
            KeysFormat::Xml => MediaType::application_xml(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Iso8859_1,
}

impl Charset {
    pub fn from_param(param: Option<&str>) -> Result<Self, AccessError> {
        let Some(name) = param else {
            return Ok(Charset::Utf8);
        };
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "latin1" | "iso_8859_1" => Ok(Charset::Iso8859_1),
            _ => Err(AccessError::UnsupportedCharset(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "utf-8",
            Charset::Iso8859_1 => "iso-8859-1",
        }
    }

    /// Encode text; characters outside Latin-1 become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Iso8859_1 => text
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

/// Pick the listing format and charset.
///
/// Candidates go through the same conversion filter and narrowing as entry
/// reads; a wildcard that survives narrowing yields JSON.
pub fn negotiate_keys(
    accept: Option<&str>,
    conversion: &ValueConversion,
) -> Result<(KeysFormat, Charset), AccessError> {
    for candidate in candidates(accept)? {
        if !conversion.is_conversion_supported(&candidate) {
            continue;
        }
        let candidate = narrow(candidate, conversion.storage.as_ref());
        let format = if candidate.is_wildcard() {
            Some(KeysFormat::Json)
        } else {
            KeysFormat::ALL
                .into_iter()
                .find(|format| format.media_type().matches(&candidate))
        };
        if let Some(format) = format {
            let charset = Charset::from_param(candidate.charset())?;
            return Ok((format, charset));
        }
    }
    Err(AccessError::unacceptable(accept))
}
