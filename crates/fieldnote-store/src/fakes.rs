//! In-memory fake for the document store trait (testing only)
//!
//! Provides `MemoryDocumentStore`, which satisfies the `DocumentStore`
//! contract, including compare-and-swap semantics on the revision
//! token, without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::storage_traits::*;

#[derive(Debug, Clone)]
struct StoredDoc {
    seq: u64,
    token: RevToken,
    body: serde_json::Value,
}

/// In-memory document store backed by a `HashMap<id, (token, body)>`.
///
/// Tokens follow the Couch convention of `"{generation}-{salt}"` so
/// tests exercise the same stale-token failure mode as the real store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<String, StoredDoc>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_token(seq: u64) -> RevToken {
        RevToken(format!("{}-{}", seq, uuid::Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, id: &str) -> StoreResult<VersionedDoc> {
        let docs = self.docs.lock().unwrap();
        docs.get(id)
            .map(|d| VersionedDoc {
                id: id.to_string(),
                rev: Some(d.token.clone()),
                body: d.body.clone(),
            })
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn put(&self, doc: VersionedDoc) -> StoreResult<RevToken> {
        let mut docs = self.docs.lock().unwrap();
        match (docs.get(&doc.id), &doc.rev) {
            // Create: id must be unused
            (Some(_), None) => Err(StoreError::RevConflict { id: doc.id }),
            (None, None) => {
                let token = Self::next_token(1);
                docs.insert(
                    doc.id,
                    StoredDoc {
                        seq: 1,
                        token: token.clone(),
                        body: doc.body,
                    },
                );
                Ok(token)
            }
            // Replace: token must still be current
            (Some(existing), Some(token)) if existing.token == *token => {
                let seq = existing.seq + 1;
                let token = Self::next_token(seq);
                docs.insert(
                    doc.id,
                    StoredDoc {
                        seq,
                        token: token.clone(),
                        body: doc.body,
                    },
                );
                Ok(token)
            }
            (Some(_), Some(_)) => Err(StoreError::RevConflict { id: doc.id }),
            (None, Some(_)) => Err(StoreError::NotFound { id: doc.id }),
        }
    }

    async fn all_doc_ids(&self) -> StoreResult<Vec<String>> {
        let docs = self.docs.lock().unwrap();
        let mut ids: Vec<String> = docs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
