//! CouchDB backend for the document store trait.
//!
//! Maps the trait onto Couch's native per-document revisioning: `_rev`
//! is the compare-and-swap token, a PUT with a stale `?rev=` answers
//! 409, and `_all_docs` provides bulk enumeration. Replication between
//! the device-local database and the server is configured outside this
//! crate; the adapter only talks to whichever database it is pointed at.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::StoreError;
use crate::storage_traits::*;

/// Document store backed by one CouchDB database.
#[derive(Debug, Clone)]
pub struct CouchDocumentStore {
    client: reqwest::Client,
    /// Base URL of the database, e.g. `http://localhost:5984/project-data`
    db_url: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

impl CouchDocumentStore {
    /// Create an adapter for the database at `db_url` (no trailing slash).
    pub fn new(client: reqwest::Client, db_url: impl Into<String>) -> Self {
        let db_url = db_url.into();
        let db_url = db_url.trim_end_matches('/').to_string();
        Self { client, db_url }
    }

    fn doc_url(&self, id: &str) -> String {
        format!("{}/{}", self.db_url, id)
    }
}

#[async_trait]
impl DocumentStore for CouchDocumentStore {
    async fn get(&self, id: &str) -> StoreResult<VersionedDoc> {
        let resp = self.client.get(self.doc_url(id)).send().await?;
        match resp.status().as_u16() {
            200 => {
                let mut body: serde_json::Value = resp.json().await?;
                // Lift `_rev` out as the CAS token; `_id` stays in the
                // body, where document shapes expect it.
                let rev = body
                    .as_object_mut()
                    .and_then(|o| o.remove("_rev"))
                    .and_then(|v| v.as_str().map(|s| RevToken(s.to_string())));
                Ok(VersionedDoc {
                    id: id.to_string(),
                    rev,
                    body,
                })
            }
            404 => Err(StoreError::NotFound { id: id.to_string() }),
            status => Err(StoreError::BadResponse {
                status,
                id: id.to_string(),
            }),
        }
    }

    async fn put(&self, doc: VersionedDoc) -> StoreResult<RevToken> {
        let mut req = self.client.put(self.doc_url(&doc.id)).json(&doc.body);
        if let Some(rev) = &doc.rev {
            req = req.query(&[("rev", rev.0.as_str())]);
        }
        let resp = req.send().await?;
        match resp.status().as_u16() {
            200 | 201 | 202 => {
                let put: PutResponse = resp.json().await?;
                debug!(event = "store.put", id = %doc.id, rev = %put.rev);
                Ok(RevToken(put.rev))
            }
            409 => Err(StoreError::RevConflict { id: doc.id }),
            404 => Err(StoreError::NotFound { id: doc.id }),
            status => Err(StoreError::BadResponse { status, id: doc.id }),
        }
    }

    async fn all_doc_ids(&self) -> StoreResult<Vec<String>> {
        let url = format!("{}/_all_docs", self.db_url);
        let resp = self.client.get(url).send().await?;
        match resp.status().as_u16() {
            200 => {
                let all: AllDocsResponse = resp.json().await?;
                Ok(all.rows.into_iter().map(|r| r.id).collect())
            }
            status => Err(StoreError::BadResponse {
                status,
                id: "_all_docs".to_string(),
            }),
        }
    }
}
