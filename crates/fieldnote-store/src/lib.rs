//! Document store adapter layer for Fieldnote.
//!
//! A record's revision graph lives in a per-project, key-value document
//! database with Couch-style optimistic revisioning: every document
//! carries a native revision token, and a write either creates a new
//! document or replaces an existing one by presenting the token it last
//! read (compare-and-swap). Replication between peers is the store's
//! own concern; this layer only abstracts get/put/bulk-read so the core
//! can run against CouchDB in production and an in-memory fake in tests.

pub mod couch;
pub mod error;
pub mod fakes;
pub mod storage_traits;

pub use couch::CouchDocumentStore;
pub use error::StoreError;
pub use fakes::MemoryDocumentStore;
pub use storage_traits::{DocumentStore, RevToken, StoreResult, VersionedDoc};
