//! Error taxonomy for the record/revision layer.
//!
//! Validation errors are rejected before any store mutation. Store I/O
//! failures pass through unchanged; this layer never retries. A head
//! compare-and-swap loss is surfaced as `HeadConflict` and converges
//! later through the head-multiplication-then-merge path. A true
//! content conflict is not an error at all: `merge_heads` reports it by
//! returning `false`.

use fieldnote_store::StoreError;
use thiserror::Error;

use crate::ident::RecordId;

/// Errors produced by the record/revision CRUD layer and merge engine.
#[derive(Debug, Error)]
pub enum DataError {
    /// A record id is required before anything can be saved
    #[error("record_id required to save record")]
    MissingRecordId,

    /// A client-supplied record id lacks the record prefix
    #[error("invalid record id, expected '{}' prefix: {id}", RecordId::PREFIX)]
    InvalidRecordId { id: String },

    /// Delete/undelete requested against a record with multiple heads
    #[error("too many head revisions, must choose a specific head: {record_id}")]
    AmbiguousHeads { record_id: String },

    /// Lost the record document compare-and-swap; re-read and reapply
    #[error("head update conflict for record {record_id}")]
    HeadConflict { record_id: String },

    /// A stored document failed to deserialize into its expected shape
    #[error("malformed {kind} document: {id}")]
    MalformedDocument { kind: &'static str, id: String },

    /// A head references a revision missing from the record's set
    #[error("record {record_id} references unknown revision {revision_id}")]
    UnknownRevision {
        record_id: String,
        revision_id: String,
    },

    /// Attachment payload could not be decoded
    #[error("invalid attachment encoding: {0}")]
    Attachment(String),

    /// Store failure, propagated unchanged
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Serialization failure assembling a document body
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for record/revision operations.
pub type Result<T> = std::result::Result<T, DataError>;
