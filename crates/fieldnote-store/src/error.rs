//! Error types for fieldnote-store

use thiserror::Error;

/// Errors that can occur in the document store layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// No document exists under the requested id
    #[error("document not found: {id}")]
    NotFound { id: String },

    /// Optimistic-revision conflict: the supplied token is stale, or a
    /// create targeted an id that already exists
    #[error("revision conflict on document: {id}")]
    RevConflict { id: String },

    /// Transport-level failure reaching the backing database
    #[error("store request failed: {0}")]
    Http(String),

    /// The store answered with something other than a document
    #[error("unexpected response (status {status}) for document: {id}")]
    BadResponse { status: u16, id: String },

    /// Document body could not be serialized or deserialized
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Http(err.to_string())
    }
}
