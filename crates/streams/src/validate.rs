//! Identifier, pattern and metadata validation.
//!
//! Every public operation runs its inputs through these checks before building
//! a store key, so keys always stay inside their namespace and bounded in
//! length.

use crate::error::ValidationError;

/// Maximum length of a stream ID.
pub const MAX_STREAM_ID_LEN: usize = 128;

/// Maximum length of a lock ID.
pub const MAX_LOCK_ID_LEN: usize = 64;

/// Maximum length of a cleanup pattern.
pub const MAX_PATTERN_LEN: usize = 256;

/// Maximum length of a key prefix.
pub const MAX_PREFIX_LEN: usize = 64;

/// Maximum length of a metadata key.
pub const MAX_METADATA_KEY_LEN: usize = 100;

/// Maximum length, in characters, of a metadata value.
pub const MAX_METADATA_VALUE_LEN: usize = 1000;

// Structural names that could alias a shared base object in a dynamic runtime
// reading the same records.
const RESERVED_METADATA_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

const fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

const fn is_pattern_char(c: char) -> bool {
    is_identifier_char(c) || c == '*' || c == ':'
}

const fn is_prefix_char(c: char) -> bool {
    is_identifier_char(c) || c == ':'
}

fn validate_identifier<'a>(
    field: &'static str,
    s: &'a str,
    max_len: usize,
    allowed: fn(char) -> bool,
) -> Result<&'a str, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidIdentifier { field, reason };

    if s.is_empty() {
        return Err(invalid("must not be empty".to_string()));
    }
    if s.len() > max_len {
        return Err(invalid(format!(
            "length {} exceeds maximum of {max_len}",
            s.len()
        )));
    }
    if let Some(c) = s.chars().find(|&c| !allowed(c)) {
        return Err(invalid(format!("character {c:?} is not allowed")));
    }

    Ok(s)
}

/// Checks a stream ID: 1–128 characters from `[A-Za-z0-9_-]`.
///
/// Returns the input unchanged on success.
///
/// # Errors
///
/// Returns `ValidationError::InvalidIdentifier` otherwise.
pub fn validate_stream_id(s: &str) -> Result<&str, ValidationError> {
    validate_identifier("stream id", s, MAX_STREAM_ID_LEN, is_identifier_char)
}

/// Checks a lock ID: 1–64 characters from `[A-Za-z0-9_-]`.
///
/// # Errors
///
/// Returns `ValidationError::InvalidIdentifier` otherwise.
pub fn validate_lock_id(s: &str) -> Result<&str, ValidationError> {
    validate_identifier("lock id", s, MAX_LOCK_ID_LEN, is_identifier_char)
}

/// Checks a deployment key prefix: 1–64 characters from `[A-Za-z0-9_:-]`.
///
/// # Errors
///
/// Returns `ValidationError::InvalidIdentifier` otherwise.
pub fn validate_prefix(s: &str) -> Result<&str, ValidationError> {
    validate_identifier("key prefix", s, MAX_PREFIX_LEN, is_prefix_char)
}

/// Checks a cleanup pattern: at most 256 characters from `[A-Za-z0-9_*:-]`.
///
/// `*` is only meaningful here, where it narrows a sweep.
///
/// # Errors
///
/// Returns `ValidationError::InvalidPattern` otherwise.
pub fn validate_pattern(s: &str) -> Result<&str, ValidationError> {
    if s.len() > MAX_PATTERN_LEN {
        return Err(ValidationError::InvalidPattern {
            reason: format!("length {} exceeds maximum of {MAX_PATTERN_LEN}", s.len()),
        });
    }
    if let Some(c) = s.chars().find(|&c| !is_pattern_char(c)) {
        return Err(ValidationError::InvalidPattern {
            reason: format!("character {c:?} is not allowed"),
        });
    }

    Ok(s)
}

/// Whether `key` may be stored as a metadata key.
#[must_use]
pub fn is_allowed_metadata_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_METADATA_KEY_LEN
        && key.chars().all(is_identifier_char)
        && !RESERVED_METADATA_KEYS
            .iter()
            .any(|reserved| key.eq_ignore_ascii_case(reserved))
}

/// Whether `value` may be stored as a metadata value.
#[must_use]
pub fn is_allowed_metadata_value(value: &str) -> bool {
    value.chars().count() <= MAX_METADATA_VALUE_LEN
}
