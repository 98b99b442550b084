//! Error types for history storage.

use thiserror::Error;

/// Failure modes of the durable history store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Low-level I/O error on the backing file.
    #[error("history storage failure: {0}")]
    Storage(#[from] std::io::Error),

    /// An event could not be encoded for storage.
    #[error("history encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),
}
