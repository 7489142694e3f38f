use tether_store::StoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The store was switched offline with `MemoryStore::set_available(false)`.
    #[error("memory store is unavailable")]
    Unavailable,
}

impl StoreError for Error {}
