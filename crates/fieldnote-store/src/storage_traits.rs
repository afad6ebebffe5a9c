//! Storage trait definitions for Fieldnote
//!
//! `DocumentStore` is the single seam between the revision/merge core
//! and the backing database. One instance corresponds to one project's
//! data database. The trait is async and backend-agnostic; an in-memory
//! fake is provided for testing via the `fakes` module and a CouchDB
//! backend via the `couch` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The store's native optimistic revision token for one document.
///
/// Opaque to callers: it is read together with a document and presented
/// back on the next write of that document. It is unrelated to the
/// application-level revision graph the core maintains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevToken(pub String);

impl std::fmt::Display for RevToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A document together with the revision token it was read at.
///
/// `rev` is `None` for a document that has not been written yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedDoc {
    /// Document id (application-assigned, unique within the database)
    pub id: String,
    /// Native revision token, absent for a first write
    pub rev: Option<RevToken>,
    /// JSON body, excluding the id/rev bookkeeping fields
    pub body: serde_json::Value,
}

impl VersionedDoc {
    /// A fresh document that does not exist in the store yet.
    pub fn new(id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            rev: None,
            body,
        }
    }
}

/// Per-project key-value document database.
///
/// Guarantees:
/// - `get` returns the body and current token of a stored document.
/// - `put` with `rev: None` creates the document, failing with
///   `StoreError::RevConflict` if the id already exists.
/// - `put` with `rev: Some(token)` replaces the document if and only if
///   `token` is still current (compare-and-swap), failing with
///   `StoreError::RevConflict` otherwise.
/// - `all_doc_ids` enumerates every document id in the database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id. Returns `StoreError::NotFound` if absent.
    async fn get(&self, id: &str) -> StoreResult<VersionedDoc>;

    /// Create or conditionally replace a document, returning the token
    /// of the written revision.
    async fn put(&self, doc: VersionedDoc) -> StoreResult<RevToken>;

    /// Enumerate all document ids.
    async fn all_doc_ids(&self) -> StoreResult<Vec<String>>;
}
