//! Automatic-merge behavior over the in-memory document store.
//!
//! Scenarios cover linear histories, stale heads left by bad
//! integration code, same-change convergence, disjoint-edit union,
//! true-conflict preservation, multi-head passes, and tombstone
//! resolution.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Value};

use fieldnote_core::*;

fn doc(
    record_id: &RecordId,
    base: Option<&RevisionId>,
    data: &[(&str, Value)],
) -> RecordUpsert {
    RecordUpsert {
        record_id: record_id.clone(),
        revision_id: base.cloned(),
        type_tag: "test::test".to_string(),
        data: data
            .iter()
            .map(|(field, value)| (field.to_string(), FieldValue::Json(value.clone())))
            .collect(),
        created: Utc::now(),
        created_by: "user".to_string(),
        updated_by: "user".to_string(),
    }
}

async fn field_values(
    db: &MemoryDocumentStore,
    record_id: &RecordId,
    revision_id: &RevisionId,
) -> BTreeMap<String, Value> {
    let full = get_full_record_data(db, record_id, revision_id)
        .await
        .unwrap()
        .expect("revision should not be tombstoned");
    full.data
        .into_iter()
        .map(|(field, value)| match value {
            FieldValue::Json(v) => (field, v),
            FieldValue::Files(_) => panic!("unexpected attachment field"),
        })
        .collect()
}

#[tokio::test]
async fn single_revision_is_trivially_converged() {
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();
    upsert_record(&db, &doc(&record_id, None, &[("avp1", json!(1))]))
        .await
        .unwrap();

    assert!(merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    assert_eq!(record.heads.len(), 1);
    assert_eq!(record.revisions.len(), 1);
}

#[tokio::test]
async fn linear_history_never_creates_merge_revisions() {
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let mut head = None;
    for n in 1..=4 {
        let rev = upsert_record(&db, &doc(&record_id, head.as_ref(), &[("avp1", json!(n))]))
            .await
            .unwrap();
        head = Some(rev);
    }

    assert!(merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    assert_eq!(record.heads, vec![head.unwrap()]);
    assert_eq!(record.revisions.len(), 4);
}

#[tokio::test]
async fn stale_ancestor_heads_collapse_without_merging() {
    // A linear history whose record document was corrupted so that every
    // revision is listed as a head (bad integration writing straight to
    // the replicated database).
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let mut head = None;
    for n in 1..=4 {
        let rev = upsert_record(&db, &doc(&record_id, head.as_ref(), &[("avp1", json!(n))]))
            .await
            .unwrap();
        head = Some(rev);
    }

    let mut raw = db.get(record_id.as_str()).await.unwrap();
    raw.body["heads"] = raw.body["revisions"].clone();
    db.put(raw).await.unwrap();

    assert!(merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    assert_eq!(record.heads, vec![head.unwrap()]);
    assert_eq!(record.revisions.len(), 4); // no merge revision was created
}

#[tokio::test]
async fn same_change_on_both_heads_converges_silently() {
    // Two heads independently set avp1 to the identical value through
    // structurally different revisions; value equality converges them
    // without a field-level conflict.
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let rev1 = upsert_record(&db, &doc(&record_id, None, &[("avp1", json!(1))]))
        .await
        .unwrap();
    upsert_record(&db, &doc(&record_id, Some(&rev1), &[("avp1", json!(2))]))
        .await
        .unwrap();
    let rev3 = upsert_record(&db, &doc(&record_id, Some(&rev1), &[("avp1", json!(3))]))
        .await
        .unwrap();
    upsert_record(&db, &doc(&record_id, Some(&rev3), &[("avp1", json!(2))]))
        .await
        .unwrap();

    assert!(merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    assert_eq!(record.heads.len(), 1);
    assert_eq!(record.revisions.len(), 5); // one merge revision

    let data = field_values(&db, &record_id, &record.heads[0]).await;
    assert_eq!(data["avp1"], json!(2));
}

#[tokio::test]
async fn conflicting_changes_leave_both_heads_untouched() {
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let rev1 = upsert_record(&db, &doc(&record_id, None, &[("avp1", json!(1))]))
        .await
        .unwrap();
    let rev2 = upsert_record(&db, &doc(&record_id, Some(&rev1), &[("avp1", json!(2))]))
        .await
        .unwrap();
    let rev3 = upsert_record(&db, &doc(&record_id, Some(&rev1), &[("avp1", json!(3))]))
        .await
        .unwrap();
    let rev4 = upsert_record(&db, &doc(&record_id, Some(&rev3), &[("avp1", json!(4))]))
        .await
        .unwrap();

    assert!(!merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    let mut expected = vec![rev2, rev4];
    expected.sort();
    assert_eq!(record.heads, expected);
    assert_eq!(record.revisions.len(), 4); // no merge revision
}

#[tokio::test]
async fn disjoint_edits_merge_to_the_union() {
    // Ancestor {avp1:1, avp2:1}; head A changes avp1, head B changes
    // avp2. The merged head carries both changes and reuses the heads'
    // AVP references rather than minting new documents.
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let rev1 = upsert_record(
        &db,
        &doc(&record_id, None, &[("avp1", json!(1)), ("avp2", json!(1))]),
    )
    .await
    .unwrap();
    let rev_a = upsert_record(
        &db,
        &doc(
            &record_id,
            Some(&rev1),
            &[("avp1", json!(2)), ("avp2", json!(1))],
        ),
    )
    .await
    .unwrap();
    let rev_b = upsert_record(
        &db,
        &doc(
            &record_id,
            Some(&rev1),
            &[("avp1", json!(1)), ("avp2", json!(2))],
        ),
    )
    .await
    .unwrap();

    assert!(merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    assert_eq!(record.heads.len(), 1);
    assert_eq!(record.revisions.len(), 4); // ancestor + A + B + merge

    let merged = get_revision(&db, &record.heads[0]).await.unwrap();
    let mut parents = merged.parents.clone();
    parents.sort();
    let mut expected_parents = vec![rev_a.clone(), rev_b.clone()];
    expected_parents.sort();
    assert_eq!(parents, expected_parents);
    assert_eq!(merged.created_by, MERGE_AUTHOR);

    // AVP references are reused, never re-created.
    let head_a = get_revision(&db, &rev_a).await.unwrap();
    let head_b = get_revision(&db, &rev_b).await.unwrap();
    assert_eq!(merged.avps["avp1"], head_a.avps["avp1"]);
    assert_eq!(merged.avps["avp2"], head_b.avps["avp2"]);

    let data = field_values(&db, &record_id, &record.heads[0]).await;
    assert_eq!(data["avp1"], json!(2));
    assert_eq!(data["avp2"], json!(2));
}

#[tokio::test]
async fn three_compatible_heads_converge_over_two_passes() {
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let rev1 = upsert_record(
        &db,
        &doc(&record_id, None, &[("avp1", json!(1)), ("avp2", json!(1))]),
    )
    .await
    .unwrap();
    for data in [
        [("avp1", json!(2)), ("avp2", json!(1))],
        [("avp1", json!(1)), ("avp2", json!(2))],
        [("avp1", json!(2)), ("avp2", json!(2))],
    ] {
        upsert_record(&db, &doc(&record_id, Some(&rev1), &data))
            .await
            .unwrap();
    }

    assert!(merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    assert_eq!(record.heads.len(), 1);
    // One pair merges per pass; two passes produce two merge revisions.
    assert_eq!(record.revisions.len(), 6);

    let data = field_values(&db, &record_id, &record.heads[0]).await;
    assert_eq!(data["avp1"], json!(2));
    assert_eq!(data["avp2"], json!(2));
}

#[tokio::test]
async fn four_heads_merge_pairwise_but_preserve_the_cross_conflict() {
    // Two independent pairs merge in one pass; their results disagree on
    // field "a" (2 vs 3 against ancestor 1), so the record stays at two
    // heads and no 4-way merge is ever attempted.
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let base = [
        ("a", json!(1)),
        ("b", json!(1)),
        ("c", json!(1)),
        ("d", json!(1)),
    ];
    let rev1 = upsert_record(&db, &doc(&record_id, None, &base)).await.unwrap();

    let heads_data: [&[(&str, Value)]; 4] = [
        &[
            ("a", json!(2)),
            ("b", json!(1)),
            ("c", json!(1)),
            ("d", json!(1)),
        ],
        &[
            ("a", json!(1)),
            ("b", json!(2)),
            ("c", json!(1)),
            ("d", json!(1)),
        ],
        &[
            ("a", json!(3)),
            ("b", json!(1)),
            ("c", json!(2)),
            ("d", json!(1)),
        ],
        &[
            ("a", json!(3)),
            ("b", json!(1)),
            ("c", json!(1)),
            ("d", json!(2)),
        ],
    ];
    for data in heads_data {
        upsert_record(&db, &doc(&record_id, Some(&rev1), data))
            .await
            .unwrap();
    }

    assert!(!merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    assert_eq!(record.heads.len(), 2);
    // Exactly two merge revisions were created, whatever the pairing order.
    assert_eq!(record.revisions.len(), 7);
}

#[tokio::test]
async fn merge_heads_is_idempotent() {
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let rev1 = upsert_record(&db, &doc(&record_id, None, &[("avp1", json!(1))]))
        .await
        .unwrap();
    upsert_record(&db, &doc(&record_id, Some(&rev1), &[("avp1", json!(2))]))
        .await
        .unwrap();
    upsert_record(&db, &doc(&record_id, Some(&rev1), &[("avp1", json!(3))]))
        .await
        .unwrap();

    assert!(!merge_heads(&db, &record_id).await.unwrap());
    let first = get_record(&db, &record_id).await.unwrap();

    assert!(!merge_heads(&db, &record_id).await.unwrap());
    let second = get_record(&db, &record_id).await.unwrap();

    assert_eq!(first.heads, second.heads);
    assert_eq!(first.revisions, second.revisions);
}

#[tokio::test]
async fn converged_record_merges_as_a_no_op() {
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let rev1 = upsert_record(
        &db,
        &doc(&record_id, None, &[("avp1", json!(1)), ("avp2", json!(1))]),
    )
    .await
    .unwrap();
    upsert_record(
        &db,
        &doc(
            &record_id,
            Some(&rev1),
            &[("avp1", json!(2)), ("avp2", json!(1))],
        ),
    )
    .await
    .unwrap();
    upsert_record(
        &db,
        &doc(
            &record_id,
            Some(&rev1),
            &[("avp1", json!(1)), ("avp2", json!(2))],
        ),
    )
    .await
    .unwrap();

    assert!(merge_heads(&db, &record_id).await.unwrap());
    let first = get_record(&db, &record_id).await.unwrap();

    assert!(merge_heads(&db, &record_id).await.unwrap());
    let second = get_record(&db, &record_id).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn edit_wins_over_stale_deletion() {
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let rev1 = upsert_record(
        &db,
        &doc(&record_id, None, &[("avp1", json!(1)), ("avp2", json!(1))]),
    )
    .await
    .unwrap();
    upsert_record(
        &db,
        &doc(
            &record_id,
            Some(&rev1),
            &[("avp1", json!(2)), ("avp2", json!(1))],
        ),
    )
    .await
    .unwrap();
    let rev3 = upsert_record(
        &db,
        &doc(
            &record_id,
            Some(&rev1),
            &[("avp1", json!(1)), ("avp2", json!(2))],
        ),
    )
    .await
    .unwrap();
    set_record_deleted(&db, &record_id, &rev3, "user")
        .await
        .unwrap();

    assert!(merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    assert_eq!(record.heads.len(), 1);
    assert_eq!(record.revisions.len(), 5); // one merge revision

    let head = get_revision(&db, &record.heads[0]).await.unwrap();
    assert!(!head.deleted);

    let data = field_values(&db, &record_id, &record.heads[0]).await;
    assert_eq!(data["avp1"], json!(2));
    assert_eq!(data["avp2"], json!(2));
}

#[tokio::test]
async fn two_deletions_merge_deleted() {
    let db = MemoryDocumentStore::new();
    let record_id = RecordId::generate();

    let rev1 = upsert_record(
        &db,
        &doc(&record_id, None, &[("avp1", json!(1)), ("avp2", json!(1))]),
    )
    .await
    .unwrap();
    let rev2 = upsert_record(
        &db,
        &doc(
            &record_id,
            Some(&rev1),
            &[("avp1", json!(2)), ("avp2", json!(1))],
        ),
    )
    .await
    .unwrap();
    let rev3 = upsert_record(
        &db,
        &doc(
            &record_id,
            Some(&rev1),
            &[("avp1", json!(1)), ("avp2", json!(2))],
        ),
    )
    .await
    .unwrap();
    set_record_deleted(&db, &record_id, &rev2, "user")
        .await
        .unwrap();
    set_record_deleted(&db, &record_id, &rev3, "user")
        .await
        .unwrap();

    assert!(merge_heads(&db, &record_id).await.unwrap());

    let record = get_record(&db, &record_id).await.unwrap();
    assert_eq!(record.heads.len(), 1);
    assert_eq!(record.revisions.len(), 6); // one merge revision

    let head = get_revision(&db, &record.heads[0]).await.unwrap();
    assert!(head.deleted);

    // A tombstoned head reads back as no data.
    let full = get_full_record_data(&db, &record_id, &record.heads[0])
        .await
        .unwrap();
    assert!(full.is_none());
}
