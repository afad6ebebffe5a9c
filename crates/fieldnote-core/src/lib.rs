//! Fieldnote Core Library
//!
//! The record revision graph and automatic-merge engine for an
//! offline-first field-data-collection system. Every logical record is
//! an immutable revision DAG over a replicated document store; the
//! merge engine collapses divergent heads attribute by attribute,
//! leaving genuine conflicts for explicit resolution. UI, replication
//! transport, and project schema management are external collaborators.

pub mod attachments;
pub mod documents;
pub mod error;
pub mod ident;
pub mod merge;
pub mod obs;
pub mod records;
pub mod telemetry;

pub use attachments::{attachments_to_files, files_to_attachments, FileData};
pub use documents::{
    Attachment, AvpDoc, AvpValue, FieldValue, FullRecord, RecordDoc, RecordMetadata,
    RecordUpsert, RevisionDoc, REVISION_FORMAT_VERSION,
};
pub use error::{DataError, Result};
pub use ident::{AvpId, RecordId, RevisionId};
pub use merge::merge_heads;
pub use records::{
    delete_record, first_record_head, get_full_record_data, get_record, get_record_metadata,
    get_revision, list_project_revisions, list_record_revisions, set_record_deleted,
    set_record_undeleted, undelete_record, upsert_record, MERGE_AUTHOR,
};
pub use telemetry::init_tracing;

pub use fieldnote_store::{
    CouchDocumentStore, DocumentStore, MemoryDocumentStore, RevToken, StoreError, VersionedDoc,
};

/// Fieldnote version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
