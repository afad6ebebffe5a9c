//! Automatic merge engine.
//!
//! Collapses a record's divergent heads through attribute-level
//! three-way merging. Each clean pair of heads produces a two-parent
//! merge revision; a field changed to different values on both sides
//! relative to the pair's common ancestor is a true conflict, which is
//! not an error: the pair is simply left unmerged and the caller sees
//! `false` until a user resolves it.
//!
//! The revision DAG is reconstructed from the store as an arena keyed
//! by revision id; parent pointers are id lookups, never references.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;

use fieldnote_store::DocumentStore;

use crate::documents::{AvpValue, RecordDoc, RevisionDoc, REVISION_FORMAT_VERSION};
use crate::error::{DataError, Result};
use crate::ident::{AvpId, RecordId, RevisionId};
use crate::obs;
use crate::records::{self, MERGE_AUTHOR};

type Arena = HashMap<RevisionId, RevisionDoc>;

/// Attempt to converge a record's heads through automatic merging.
///
/// Runs pairwise merge passes to a fixed point, persisting each pass as
/// new merge-revision documents plus one CAS update of the record
/// document. Returns `true` once exactly one head remains, `false` if
/// genuine conflicts leave the record divergent. Idempotent: a record
/// with a single head is a no-op.
pub async fn merge_heads(db: &dyn DocumentStore, record_id: &RecordId) -> Result<bool> {
    let _span = obs::RecordSpan::enter(record_id.as_str());

    loop {
        let (record, token) = records::get_record_with_token(db, record_id).await?;
        if record.heads.len() <= 1 {
            obs::emit_merge_converged(record_id.as_str(), record.heads.len());
            return Ok(true);
        }

        let arena = records::get_revisions(db, &record.revisions).await?;
        let frontier = reduce_to_frontier(&arena, &record.heads)?;

        let pass = run_pass(db, &arena, record_id, &frontier).await?;
        let frontier_shrunk = frontier.len() < record.heads.len();

        if pass.merges.is_empty() && !frontier_shrunk {
            // Fixed point: nothing merged cleanly in a full pass.
            obs::emit_merge_pass(record_id.as_str(), record.heads.len(), pass.heads.len(), 0);
            return Ok(pass.heads.len() <= 1);
        }

        persist_pass(db, record, token, &pass).await?;
        obs::emit_merge_pass(
            record_id.as_str(),
            frontier.len(),
            pass.heads.len(),
            pass.merges.len(),
        );

        if pass.heads.len() <= 1 {
            obs::emit_merge_converged(record_id.as_str(), pass.heads.len());
            return Ok(true);
        }
        // Subsequent pass attempts to merge the results of this one.
    }
}

struct PassOutcome {
    /// Head set after this pass, sorted.
    heads: Vec<RevisionId>,
    /// Merge revisions synthesized by this pass, not yet persisted.
    merges: Vec<RevisionDoc>,
}

/// One pairwise scan over the frontier. Heads are matched first-fit and
/// consumed at most once per pass; merge results join the head set for
/// the next pass rather than cascading within this one.
async fn run_pass(
    db: &dyn DocumentStore,
    arena: &Arena,
    record_id: &RecordId,
    frontier: &[RevisionId],
) -> Result<PassOutcome> {
    let mut values = AvpValueCache::default();
    let mut consumed = vec![false; frontier.len()];
    let mut heads = Vec::new();
    let mut merges = Vec::new();

    for i in 0..frontier.len() {
        if consumed[i] {
            continue;
        }
        let head_a = revision(arena, record_id, &frontier[i])?;
        let mut merged = None;

        for j in (i + 1)..frontier.len() {
            if consumed[j] {
                continue;
            }
            let head_b = revision(arena, record_id, &frontier[j])?;
            if let Some(merge) = try_merge_pair(db, arena, &mut values, head_a, head_b).await? {
                consumed[j] = true;
                merged = Some(merge);
                break;
            }
        }

        match merged {
            Some(merge) => {
                heads.push(merge.id.clone());
                merges.push(merge);
            }
            None => heads.push(frontier[i].clone()),
        }
    }

    heads.sort();
    Ok(PassOutcome { heads, merges })
}

async fn persist_pass(
    db: &dyn DocumentStore,
    mut record: RecordDoc,
    token: fieldnote_store::RevToken,
    pass: &PassOutcome,
) -> Result<()> {
    for merge in &pass.merges {
        records::put_new_revision(db, merge).await?;
    }
    record
        .revisions
        .extend(pass.merges.iter().map(|m| m.id.clone()));
    record.heads = pass.heads.clone();
    records::put_record_update(db, record, token).await
}

fn revision<'a>(
    arena: &'a Arena,
    record_id: &RecordId,
    revision_id: &RevisionId,
) -> Result<&'a RevisionDoc> {
    arena
        .get(revision_id)
        .ok_or_else(|| DataError::UnknownRevision {
            record_id: record_id.0.clone(),
            revision_id: revision_id.0.clone(),
        })
}

// ---------------------------------------------------------------------------
// Frontier reduction
// ---------------------------------------------------------------------------

/// Drop heads that are ancestors of other heads.
///
/// A stale head left behind by bad integration code is reachable from
/// the true tip, so it collapses without a merge revision; pairwise
/// comparison only ever sees the true frontier.
fn reduce_to_frontier(arena: &Arena, heads: &[RevisionId]) -> Result<Vec<RevisionId>> {
    let mut unique: Vec<RevisionId> = heads.to_vec();
    unique.sort();
    unique.dedup();

    let ancestor_sets: Vec<HashSet<RevisionId>> = unique
        .iter()
        .map(|head| ancestors_of(arena, head))
        .collect();

    Ok(unique
        .iter()
        .enumerate()
        .filter(|(i, head)| {
            !ancestor_sets
                .iter()
                .enumerate()
                .any(|(j, set)| j != *i && set.contains(head))
        })
        .map(|(_, head)| head.clone())
        .collect())
}

/// All revisions reachable from `start` by following parent pointers,
/// excluding `start` itself.
fn ancestors_of(arena: &Arena, start: &RevisionId) -> HashSet<RevisionId> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<RevisionId> = match arena.get(start) {
        Some(rev) => rev.parents.iter().cloned().collect(),
        None => VecDeque::new(),
    };
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(rev) = arena.get(&id) {
            queue.extend(rev.parents.iter().cloned());
        }
    }
    seen
}

/// Nearest common ancestor of two heads, by ancestor-set membership:
/// collect A's ancestors, then walk breadth-first from B's side and
/// take the first hit. `None` when the heads share no history (two
/// zero-parent first revisions racing on the same record id).
fn common_ancestor<'a>(
    arena: &'a Arena,
    head_a: &RevisionDoc,
    head_b: &RevisionDoc,
) -> Option<&'a RevisionDoc> {
    let mut reachable_from_a = ancestors_of(arena, &head_a.id);
    reachable_from_a.insert(head_a.id.clone());

    let mut seen = HashSet::new();
    let mut queue: VecDeque<RevisionId> = head_b.parents.iter().cloned().collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if reachable_from_a.contains(&id) {
            return arena.get(&id);
        }
        if let Some(rev) = arena.get(&id) {
            queue.extend(rev.parents.iter().cloned());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Three-way attribute merge
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AvpValueCache {
    values: HashMap<AvpId, AvpValue>,
}

impl AvpValueCache {
    /// Field value behind an AVP reference; `None` models an absent field.
    async fn value(
        &mut self,
        db: &dyn DocumentStore,
        avp_id: Option<&AvpId>,
    ) -> Result<Option<AvpValue>> {
        let Some(avp_id) = avp_id else {
            return Ok(None);
        };
        if let Some(value) = self.values.get(avp_id) {
            return Ok(Some(value.clone()));
        }
        let value = records::get_avp(db, avp_id).await?.value();
        self.values.insert(avp_id.clone(), value.clone());
        Ok(Some(value))
    }
}

enum FieldResolution {
    /// Merged revision references this AVP (or drops the field).
    Take(Option<AvpId>),
    /// Changed differently on both sides; the pair cannot merge.
    Conflict,
}

/// Attribute-level three-way merge of one pair of heads.
///
/// Returns the synthesized two-parent merge revision, or `None` when
/// any field is a true conflict. Resolved fields reuse existing AVP
/// references; a merge never creates AVP documents.
async fn try_merge_pair(
    db: &dyn DocumentStore,
    arena: &Arena,
    values: &mut AvpValueCache,
    head_a: &RevisionDoc,
    head_b: &RevisionDoc,
) -> Result<Option<RevisionDoc>> {
    let ancestor = common_ancestor(arena, head_a, head_b);

    let mut fields: Vec<&String> = head_a.avps.keys().chain(head_b.avps.keys()).collect();
    fields.sort();
    fields.dedup();

    let mut merged_avps = std::collections::BTreeMap::new();
    for field in fields {
        let avp_a = head_a.avps.get(field);
        let avp_b = head_b.avps.get(field);
        let avp_c = ancestor.and_then(|c| c.avps.get(field));

        match resolve_field(db, values, avp_a, avp_b, avp_c).await? {
            FieldResolution::Take(Some(avp_id)) => {
                merged_avps.insert(field.clone(), avp_id);
            }
            FieldResolution::Take(None) => {}
            FieldResolution::Conflict => {
                obs::emit_merge_conflict(
                    head_a.record_id.as_str(),
                    field,
                    head_a.id.as_str(),
                    head_b.id.as_str(),
                );
                return Ok(None);
            }
        }
    }

    // A stale deletion loses to a concurrent edit; only two deleted
    // heads merge to a deleted result.
    let deleted = head_a.deleted && head_b.deleted;

    let merge = RevisionDoc {
        id: RevisionId::generate(),
        revision_format_version: REVISION_FORMAT_VERSION,
        record_id: head_a.record_id.clone(),
        type_tag: head_a.type_tag.clone(),
        parents: vec![head_a.id.clone(), head_b.id.clone()],
        avps: merged_avps,
        created: Utc::now(),
        created_by: MERGE_AUTHOR.to_string(),
        deleted,
    };
    obs::emit_merge_revision_created(
        merge.record_id.as_str(),
        merge.id.as_str(),
        head_a.id.as_str(),
        head_b.id.as_str(),
        deleted,
    );
    Ok(Some(merge))
}

/// Three-way resolution of one field, by deep structural equality of
/// the AVP *values* (an identical AVP reference short-circuits): equal
/// values converge silently; a side that matches the ancestor yields to
/// the other side, including field additions and removals.
async fn resolve_field(
    db: &dyn DocumentStore,
    values: &mut AvpValueCache,
    avp_a: Option<&AvpId>,
    avp_b: Option<&AvpId>,
    avp_c: Option<&AvpId>,
) -> Result<FieldResolution> {
    if avp_a == avp_b {
        return Ok(FieldResolution::Take(avp_a.cloned()));
    }

    let value_a = values.value(db, avp_a).await?;
    let value_b = values.value(db, avp_b).await?;
    if value_a == value_b {
        // The same change made independently on both sides.
        return Ok(FieldResolution::Take(avp_a.or(avp_b).cloned()));
    }

    let value_c = values.value(db, avp_c).await?;
    if value_a == value_c {
        return Ok(FieldResolution::Take(avp_b.cloned()));
    }
    if value_b == value_c {
        return Ok(FieldResolution::Take(avp_a.cloned()));
    }
    Ok(FieldResolution::Conflict)
}
