//! Persisted document shapes and client-facing record types.
//!
//! Three document kinds share one database per project:
//!
//! - `RecordDoc`: one mutable document per logical record, tracking
//!   the set of known revisions and the current head set.
//! - `RevisionDoc`: one immutable document per edit; revisions form a
//!   DAG through `parents` (0 for a record's first revision, 1 for a
//!   normal edit, 2 for a merge).
//! - `AvpDoc`: one immutable attribute-value-pair document per
//!   distinct (revision, field) unless shared by reference.
//!
//! Only the record document is ever rewritten; revisions and AVPs are
//! write-once, so concurrent readers never observe a partial write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attachments::{self, FileData};
use crate::error::Result;
use crate::ident::{AvpId, RecordId, RevisionId};

/// Version tag written into every revision document.
pub const REVISION_FORMAT_VERSION: u32 = 1;

/// The record index: one mutable document per logical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDoc {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub created: DateTime<Utc>,
    pub created_by: String,
    /// Every revision id ever created for this record, in creation order.
    pub revisions: Vec<RevisionId>,
    /// Current unmerged tips; kept sorted, always a subset of `revisions`.
    pub heads: Vec<RevisionId>,
}

/// One immutable edit in a record's revision DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionDoc {
    #[serde(rename = "_id")]
    pub id: RevisionId,
    pub revision_format_version: u32,
    pub record_id: RecordId,
    /// The record's form/schema tag.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// 0, 1, or 2 parent revisions; 2 only for merge revisions.
    pub parents: Vec<RevisionId>,
    /// Field name to AVP reference, one entry per field that has a value.
    pub avps: BTreeMap<String, AvpId>,
    pub created: DateTime<Utc>,
    pub created_by: String,
    /// Tombstone flag; logical deletion never removes history.
    pub deleted: bool,
}

/// A named binary part stored inline on an AVP document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub content_type: String,
    /// Base64-encoded body, per the Couch inline-attachment convention.
    pub data: String,
}

/// One field's value in one revision, immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvpDoc {
    #[serde(rename = "_id")]
    pub id: AvpId,
    pub record_id: RecordId,
    pub revision_id: RevisionId,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub created: DateTime<Utc>,
    pub created_by: String,
    /// JSON value; `null` when the payload lives in `_attachments`.
    pub data: serde_json::Value,
    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attachments: Option<BTreeMap<String, Attachment>>,
}

impl AvpDoc {
    /// The content identity of this AVP, excluding provenance fields.
    pub fn value(&self) -> AvpValue {
        AvpValue {
            data: self.data.clone(),
            attachments: self.attachments.clone(),
        }
    }
}

/// Content identity of an AVP. Two AVP documents with equal `AvpValue`
/// hold the same field value, whatever their ids or provenance; the
/// merge engine compares these, never AVP ids.
#[derive(Debug, Clone, PartialEq)]
pub struct AvpValue {
    pub data: serde_json::Value,
    pub attachments: Option<BTreeMap<String, Attachment>>,
}

impl AvpValue {
    /// Encode a client-side field value into its persisted form.
    pub fn encode(value: &FieldValue) -> AvpValue {
        match value {
            FieldValue::Json(v) => AvpValue {
                data: v.clone(),
                attachments: None,
            },
            FieldValue::Files(files) => AvpValue {
                data: serde_json::Value::Null,
                attachments: Some(attachments::files_to_attachments(files)),
            },
        }
    }

    /// Decode the persisted form back into a client-side field value.
    pub fn decode(&self) -> Result<FieldValue> {
        match &self.attachments {
            Some(map) => Ok(FieldValue::Files(attachments::attachments_to_files(map)?)),
            None => Ok(FieldValue::Json(self.data.clone())),
        }
    }
}

/// A single field value as seen by the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Any JSON value.
    Json(serde_json::Value),
    /// Binary payloads, stored as attachments on the AVP document.
    Files(Vec<FileData>),
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        FieldValue::Json(v)
    }
}

/// Client-supplied record state for an upsert.
///
/// `revision_id` is `None` for the first write of a record id, and the
/// base head being edited otherwise.
#[derive(Debug, Clone)]
pub struct RecordUpsert {
    pub record_id: RecordId,
    pub revision_id: Option<RevisionId>,
    pub type_tag: String,
    pub data: BTreeMap<String, FieldValue>,
    pub created: DateTime<Utc>,
    pub created_by: String,
    pub updated_by: String,
}

/// A fully hydrated record at one revision.
#[derive(Debug, Clone)]
pub struct FullRecord {
    pub record_id: RecordId,
    pub revision_id: RevisionId,
    pub type_tag: String,
    pub data: BTreeMap<String, FieldValue>,
    pub created: DateTime<Utc>,
    pub created_by: String,
    pub updated: DateTime<Utc>,
    pub updated_by: String,
}

/// Lightweight projection for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub record_id: RecordId,
    pub revision_id: RevisionId,
    pub created: DateTime<Utc>,
    pub created_by: String,
    pub updated: DateTime<Utc>,
    pub updated_by: String,
    /// True while the record has more than one head.
    pub conflicts: bool,
}
