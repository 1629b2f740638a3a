//! Byte encoding of envelopes and tag-membership records.
//!
//! # Envelope Format
//!
//! `[magic: 4 bytes "TGv1"][json {"value": .., "tags": [..]}]`
//!
//! Anything without the magic is a plain JSON value and carries no tags.
//! Key-tags records are a bare JSON array of tag names.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entry::{CacheEntry, StoredValue};
use crate::error::CodecError;
use crate::tag::Tag;

/// Leading bytes identifying an envelope record.
pub const ENVELOPE_MAGIC: &[u8; 4] = b"TGv1";

/// Encode an envelope for storage under `key`.
pub fn encode_entry<T: Serialize>(key: &str, entry: &CacheEntry<T>) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(entry).map_err(|e| CodecError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(ENVELOPE_MAGIC.len() + json.len());
    bytes.extend_from_slice(ENVELOPE_MAGIC);
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Encode a plain (non-enveloped) value.
pub fn encode_plain<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a backend record into either an envelope or a plain value.
pub fn decode_entry<T: DeserializeOwned>(
    key: &str,
    bytes: &[u8],
) -> Result<StoredValue<T>, CodecError> {
    let decode_err = |e: serde_json::Error| CodecError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    };

    match bytes.strip_prefix(ENVELOPE_MAGIC.as_slice()) {
        Some(json) => serde_json::from_slice::<CacheEntry<T>>(json)
            .map(StoredValue::Tagged)
            .map_err(decode_err),
        None => serde_json::from_slice::<T>(bytes)
            .map(StoredValue::Plain)
            .map_err(decode_err),
    }
}

/// Envelope view that skips over the value.
#[derive(Deserialize)]
struct TagsOnly {
    tags: Vec<Tag>,
}

/// Read only the tags of a record without materializing its value.
///
/// Never fails: plain values and undecodable records have no tags.
pub fn decode_tags(bytes: &[u8]) -> Vec<Tag> {
    let Some(json) = bytes.strip_prefix(ENVELOPE_MAGIC.as_slice()) else {
        return Vec::new();
    };
    match serde_json::from_slice::<TagsOnly>(json) {
        Ok(parsed) => parsed.tags,
        Err(e) => {
            tracing::trace!(error = %e, "envelope tags undecodable, treating as untagged");
            Vec::new()
        }
    }
}

/// Encode a key-tags record.
pub fn encode_tag_list(key: &str, tags: &[Tag]) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(tags).map_err(|e| CodecError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Decode a key-tags record. Undecodable records count as "no tags".
pub fn decode_tag_list(bytes: &[u8]) -> Vec<Tag> {
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        tracing::trace!(error = %e, "key-tags record undecodable, treating as untagged");
        Vec::new()
    })
}
