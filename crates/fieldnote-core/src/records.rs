//! Record/revision CRUD layer.
//!
//! Translates a client-supplied record state into immutable revision
//! and AVP documents, and keeps the record index's `revisions`/`heads`
//! sets consistent. Head replacement is a set operation persisted with
//! one compare-and-swap write of the record document; a lost CAS
//! surfaces as `DataError::HeadConflict` and is never retried here,
//! since divergence is resolved later by the merge engine rather than
//! prevented at write time.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use fieldnote_store::{DocumentStore, RevToken, StoreError, VersionedDoc};

use crate::documents::{
    AvpDoc, AvpValue, FullRecord, RecordDoc, RecordMetadata, RecordUpsert,
    RevisionDoc, REVISION_FORMAT_VERSION,
};
use crate::error::{DataError, Result};
use crate::ident::{AvpId, RecordId, RevisionId};
use crate::obs;

/// Author recorded on automatically created merge revisions.
pub const MERGE_AUTHOR: &str = "automerge";

// ---------------------------------------------------------------------------
// Document plumbing
// ---------------------------------------------------------------------------

fn parse_body<T: DeserializeOwned>(kind: &'static str, doc: VersionedDoc) -> Result<T> {
    let id = doc.id.clone();
    serde_json::from_value(doc.body).map_err(|err| {
        warn!(event = "data.malformed_document", kind, id = %id, error = %err);
        DataError::MalformedDocument { kind, id }
    })
}

async fn put_new<T: Serialize>(db: &dyn DocumentStore, id: &str, body: &T) -> Result<RevToken> {
    let body = serde_json::to_value(body)?;
    Ok(db.put(VersionedDoc::new(id, body)).await?)
}

pub(crate) async fn get_record_with_token(
    db: &dyn DocumentStore,
    record_id: &RecordId,
) -> Result<(RecordDoc, RevToken)> {
    let doc = db.get(record_id.as_str()).await?;
    let token = doc.rev.clone().ok_or_else(|| DataError::MalformedDocument {
        kind: "record",
        id: record_id.0.clone(),
    })?;
    Ok((parse_body("record", doc)?, token))
}

/// The record index document: known revisions and current head set.
pub async fn get_record(db: &dyn DocumentStore, record_id: &RecordId) -> Result<RecordDoc> {
    Ok(get_record_with_token(db, record_id).await?.0)
}

/// One immutable revision document.
pub async fn get_revision(db: &dyn DocumentStore, revision_id: &RevisionId) -> Result<RevisionDoc> {
    parse_body("revision", db.get(revision_id.as_str()).await?)
}

/// Bulk-fetch revisions into an arena keyed by revision id. The DAG is
/// reconstructed from the store on every operation; parent pointers are
/// looked up in this map, never held as in-memory references.
pub(crate) async fn get_revisions(
    db: &dyn DocumentStore,
    revision_ids: &[RevisionId],
) -> Result<HashMap<RevisionId, RevisionDoc>> {
    let revisions = try_join_all(revision_ids.iter().map(|id| get_revision(db, id))).await?;
    Ok(revisions.into_iter().map(|r| (r.id.clone(), r)).collect())
}

pub(crate) async fn get_avp(db: &dyn DocumentStore, avp_id: &AvpId) -> Result<AvpDoc> {
    parse_body("avp", db.get(avp_id.as_str()).await?)
}

pub(crate) async fn put_new_revision(db: &dyn DocumentStore, revision: &RevisionDoc) -> Result<()> {
    put_new(db, revision.id.as_str(), revision).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Record index maintenance
// ---------------------------------------------------------------------------

/// Advance heads: append the new revision to `revisions`, then replace
/// the base revision id(s) in `heads` with the new tip. One CAS write.
pub(crate) async fn update_heads(
    db: &dyn DocumentStore,
    record_id: &RecordId,
    base_revision_ids: &[RevisionId],
    new_revision_id: &RevisionId,
) -> Result<()> {
    let (mut record, token) = get_record_with_token(db, record_id).await?;

    if !record.revisions.contains(new_revision_id) {
        record.revisions.push(new_revision_id.clone());
    }
    record.heads.retain(|h| !base_revision_ids.contains(h));
    record.heads.push(new_revision_id.clone());
    record.heads.sort();
    record.heads.dedup();

    put_record_update(db, record, token).await
}

pub(crate) async fn put_record_update(
    db: &dyn DocumentStore,
    record: RecordDoc,
    token: RevToken,
) -> Result<()> {
    let record_id = record.id.0.clone();
    let doc = VersionedDoc {
        id: record_id.clone(),
        rev: Some(token),
        body: serde_json::to_value(&record)?,
    };
    match db.put(doc).await {
        Ok(_) => Ok(()),
        Err(StoreError::RevConflict { .. }) => Err(DataError::HeadConflict { record_id }),
        Err(err) => Err(err.into()),
    }
}

async fn create_new_record(
    db: &dyn DocumentStore,
    record: &RecordUpsert,
    revision_id: &RevisionId,
) -> Result<()> {
    let doc = RecordDoc {
        id: record.record_id.clone(),
        created: record.created,
        created_by: record.created_by.clone(),
        revisions: vec![revision_id.clone()],
        heads: vec![revision_id.clone()],
    };
    put_new(db, doc.id.as_str(), &doc).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Revision construction
// ---------------------------------------------------------------------------

/// Write the AVPs and the revision document for one edit.
///
/// Fields whose value is unchanged from the base revision reuse the
/// base's AVP reference; a changed value always mints a new immutable
/// AVP document. Fields absent from the new state are dropped from the
/// revision's mapping.
async fn add_new_revision(
    db: &dyn DocumentStore,
    record: &RecordUpsert,
    revision_id: &RevisionId,
    base_revision: Option<&RevisionDoc>,
) -> Result<()> {
    let now = Utc::now();
    let mut avps: BTreeMap<String, AvpId> = BTreeMap::new();

    for (field, value) in &record.data {
        let encoded = AvpValue::encode(value);

        if let Some(base) = base_revision {
            if let Some(base_avp_id) = base.avps.get(field) {
                let base_avp = get_avp(db, base_avp_id).await?;
                if base_avp.value() == encoded {
                    avps.insert(field.clone(), base_avp_id.clone());
                    continue;
                }
            }
        }

        let avp = AvpDoc {
            id: AvpId::generate(),
            record_id: record.record_id.clone(),
            revision_id: revision_id.clone(),
            type_tag: record.type_tag.clone(),
            created: now,
            created_by: record.updated_by.clone(),
            data: encoded.data,
            attachments: encoded.attachments,
        };
        put_new(db, avp.id.as_str(), &avp).await?;
        avps.insert(field.clone(), avp.id);
    }

    let revision = RevisionDoc {
        id: revision_id.clone(),
        revision_format_version: REVISION_FORMAT_VERSION,
        record_id: record.record_id.clone(),
        type_tag: record.type_tag.clone(),
        parents: base_revision.map(|b| vec![b.id.clone()]).unwrap_or_default(),
        avps,
        created: now,
        created_by: record.updated_by.clone(),
        deleted: false,
    };
    put_new_revision(db, &revision).await
}

// ---------------------------------------------------------------------------
// Public operations
// ---------------------------------------------------------------------------

/// Save a new record state, returning the id of the revision created.
///
/// A `None` base revision creates the record (zero-parent first
/// revision); otherwise a single-parent revision is appended and the
/// base head is replaced by the new tip.
pub async fn upsert_record(db: &dyn DocumentStore, record: &RecordUpsert) -> Result<RevisionId> {
    if record.record_id.0.is_empty() {
        return Err(DataError::MissingRecordId);
    }
    // Bulk enumeration discriminates record documents by this prefix;
    // an unprefixed id would be stored but invisible to listings.
    if !RecordId::matches(record.record_id.as_str()) {
        return Err(DataError::InvalidRecordId {
            id: record.record_id.0.clone(),
        });
    }
    let _span = obs::RecordSpan::enter(record.record_id.as_str());

    let new_revision_id = RevisionId::generate();
    match &record.revision_id {
        None => {
            create_new_record(db, record, &new_revision_id).await?;
            add_new_revision(db, record, &new_revision_id, None).await?;
        }
        Some(base_revision_id) => {
            let base_revision = get_revision(db, base_revision_id).await?;
            add_new_revision(db, record, &new_revision_id, Some(&base_revision)).await?;
            update_heads(
                db,
                &record.record_id,
                std::slice::from_ref(base_revision_id),
                &new_revision_id,
            )
            .await?;
        }
    }

    obs::emit_record_upserted(
        record.record_id.as_str(),
        new_revision_id.as_str(),
        record.revision_id.is_some(),
    );
    Ok(new_revision_id)
}

/// The first head of a record (callers on a linear history use this to
/// find the single current tip).
pub async fn first_record_head(
    db: &dyn DocumentStore,
    record_id: &RecordId,
) -> Result<RevisionId> {
    let record = get_record(db, record_id).await?;
    record
        .heads
        .first()
        .cloned()
        .ok_or_else(|| DataError::MalformedDocument {
            kind: "record",
            id: record_id.0.clone(),
        })
}

/// Hydrate a record at a specific revision. A tombstoned revision reads
/// back as `None` while remaining enumerable in listings.
pub async fn get_full_record_data(
    db: &dyn DocumentStore,
    record_id: &RecordId,
    revision_id: &RevisionId,
) -> Result<Option<FullRecord>> {
    let revision = get_revision(db, revision_id).await?;
    if revision.deleted {
        return Ok(None);
    }
    let record = get_record(db, record_id).await?;

    let fields: Vec<&String> = revision.avps.keys().collect();
    let avps = try_join_all(revision.avps.values().map(|id| get_avp(db, id))).await?;
    let mut data = BTreeMap::new();
    for (field, avp) in fields.into_iter().zip(avps) {
        data.insert(field.clone(), avp.value().decode()?);
    }

    Ok(Some(FullRecord {
        record_id: record_id.clone(),
        revision_id: revision_id.clone(),
        type_tag: revision.type_tag,
        data,
        created: record.created,
        created_by: record.created_by,
        updated: revision.created,
        updated_by: revision.created_by,
    }))
}

/// Listing projection; `conflicts` reports whether the record currently
/// has more than one head.
pub async fn get_record_metadata(
    db: &dyn DocumentStore,
    record_id: &RecordId,
    revision_id: &RevisionId,
) -> Result<RecordMetadata> {
    let record = get_record(db, record_id).await?;
    let revision = get_revision(db, revision_id).await?;
    Ok(RecordMetadata {
        record_id: record_id.clone(),
        revision_id: revision_id.clone(),
        created: record.created,
        created_by: record.created_by,
        updated: revision.created,
        updated_by: revision.created_by,
        conflicts: record.heads.len() > 1,
    })
}

/// All revision ids ever created for a record.
pub async fn list_record_revisions(
    db: &dyn DocumentStore,
    record_id: &RecordId,
) -> Result<Vec<RevisionId>> {
    let record = get_record(db, record_id).await?;
    Ok(record.revisions)
}

/// Revision listing for every record in the project database,
/// discriminating record documents by their id prefix.
pub async fn list_project_revisions(
    db: &dyn DocumentStore,
) -> Result<BTreeMap<RecordId, Vec<RevisionId>>> {
    let record_ids: Vec<RecordId> = db
        .all_doc_ids()
        .await?
        .into_iter()
        .filter(|id| RecordId::matches(id))
        .map(RecordId)
        .collect();

    let mut listing = BTreeMap::new();
    for record_id in record_ids {
        let revisions = list_record_revisions(db, &record_id).await?;
        listing.insert(record_id, revisions);
    }
    Ok(listing)
}

// ---------------------------------------------------------------------------
// Tombstones
// ---------------------------------------------------------------------------

async fn write_tombstone(
    db: &dyn DocumentStore,
    record_id: &RecordId,
    base_revision_id: &RevisionId,
    user: &str,
    deleted: bool,
) -> Result<RevisionId> {
    let base = get_revision(db, base_revision_id).await?;
    let new_revision_id = RevisionId::generate();
    let revision = RevisionDoc {
        id: new_revision_id.clone(),
        revision_format_version: REVISION_FORMAT_VERSION,
        record_id: record_id.clone(),
        type_tag: base.type_tag,
        parents: vec![base_revision_id.clone()],
        avps: base.avps,
        created: Utc::now(),
        created_by: user.to_string(),
        deleted,
    };
    put_new_revision(db, &revision).await?;
    update_heads(
        db,
        record_id,
        std::slice::from_ref(base_revision_id),
        &new_revision_id,
    )
    .await?;
    obs::emit_record_tombstoned(record_id.as_str(), new_revision_id.as_str(), deleted);
    Ok(new_revision_id)
}

/// Create a tombstone revision on top of an explicitly chosen head,
/// copying the base revision's AVP references.
pub async fn set_record_deleted(
    db: &dyn DocumentStore,
    record_id: &RecordId,
    base_revision_id: &RevisionId,
    user: &str,
) -> Result<RevisionId> {
    write_tombstone(db, record_id, base_revision_id, user, true).await
}

/// Reverse a tombstone on top of an explicitly chosen head.
pub async fn set_record_undeleted(
    db: &dyn DocumentStore,
    record_id: &RecordId,
    base_revision_id: &RevisionId,
    user: &str,
) -> Result<RevisionId> {
    write_tombstone(db, record_id, base_revision_id, user, false).await
}

async fn sole_head(db: &dyn DocumentStore, record_id: &RecordId) -> Result<RevisionId> {
    let record = get_record(db, record_id).await?;
    if record.heads.len() != 1 {
        return Err(DataError::AmbiguousHeads {
            record_id: record_id.0.clone(),
        });
    }
    Ok(record.heads[0].clone())
}

/// Logically delete a record by id. Fails while the record has more
/// than one head; the caller must merge or pick a head first.
pub async fn delete_record(
    db: &dyn DocumentStore,
    record_id: &RecordId,
    user: &str,
) -> Result<RevisionId> {
    let head = sole_head(db, record_id).await?;
    set_record_deleted(db, record_id, &head, user).await
}

/// Reverse a logical deletion by id, under the same single-head guard.
pub async fn undelete_record(
    db: &dyn DocumentStore,
    record_id: &RecordId,
    user: &str,
) -> Result<RevisionId> {
    let head = sole_head(db, record_id).await?;
    set_record_undeleted(db, record_id, &head, user).await
}
