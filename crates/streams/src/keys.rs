//! Store key layout.
//!
//! Locks live at `{prefix}:lock:{stream_id}` and state records at
//! `{prefix}:stream:{stream_id}`. Callers hand in already-validated IDs.

use crate::error::ValidationError;
use crate::validate::validate_prefix;

const LOCK_SEGMENT: &str = "lock";
const STREAM_SEGMENT: &str = "stream";

/// The deployment-level namespace all keys are built under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    /// Creates a key space under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidIdentifier` if the prefix is empty, longer
    /// than 64 characters, or contains characters outside `[A-Za-z0-9_:-]`.
    pub fn new<P: Into<String>>(prefix: P) -> Result<Self, ValidationError> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        Ok(Self { prefix })
    }

    /// The configured prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key holding the lock record for `stream_id`.
    #[must_use]
    pub fn lock_key(&self, stream_id: &str) -> String {
        format!("{}:{LOCK_SEGMENT}:{stream_id}", self.prefix)
    }

    /// Key holding the state record for `stream_id`.
    #[must_use]
    pub fn stream_key(&self, stream_id: &str) -> String {
        format!("{}:{STREAM_SEGMENT}:{stream_id}", self.prefix)
    }

    /// Scan pattern covering state records, optionally narrowed by a
    /// validated stream ID pattern. An empty pattern covers every record.
    #[must_use]
    pub fn stream_pattern(&self, pattern: Option<&str>) -> String {
        self.stream_key(pattern.filter(|p| !p.is_empty()).unwrap_or("*"))
    }

    /// Extracts the stream ID from a state record key, if the key belongs to
    /// this key space.
    #[must_use]
    pub fn stream_id_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?
            .strip_prefix(':')?
            .strip_prefix(STREAM_SEGMENT)?
            .strip_prefix(':')
    }
}
