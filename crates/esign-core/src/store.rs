//! Signature request persistence
//!
//! [`SignatureStore`] is the source of truth for request state. Backends must
//! provide two guarantees the engine relies on:
//!
//! ## Active uniqueness
//!
//! `insert` rejects a request whose status is active when another active
//! request exists for the same `(document_id, signer_key)`, returning
//! [`StoreError::DuplicateActive`]. Two concurrent batches for the same
//! signer can both pass validation; only one insert wins.
//!
//! ## Optimistic concurrency
//!
//! `update` writes only if the stored `version` equals `expected_version`
//! and bumps it by one; otherwise it returns [`StoreError::StaleVersion`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::audit::SignatureEvent;
use crate::identity::SignerKey;
use crate::types::{SignatureRequest, SignatureStatus};

/// All errors a store backend can return
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("active signature request already exists for {signer_key} on document {document_id}")]
    DuplicateActive {
        document_id: String,
        signer_key: String,
    },

    #[error("stale version for signature request {id}: expected {expected}")]
    StaleVersion { id: String, expected: i64 },

    #[error("signature request not found: {0}")]
    NotFound(String),

    /// Connection, serialization, or other backend failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SignatureStore: Send + Sync + 'static {
    /// Persist a new request. See the module docs for the uniqueness rule.
    async fn insert(&self, request: &SignatureRequest) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<SignatureRequest>, StoreError>;

    /// Compare-and-swap write. Returns the stored record with its new version.
    async fn update(
        &self,
        request: &SignatureRequest,
        expected_version: i64,
    ) -> Result<SignatureRequest, StoreError>;

    /// All requests for a document, oldest first
    async fn list_by_document(&self, document_id: &str)
        -> Result<Vec<SignatureRequest>, StoreError>;

    /// The active request for a signer on a document, if any
    async fn find_active(
        &self,
        document_id: &str,
        signer_key: &SignerKey,
    ) -> Result<Option<SignatureRequest>, StoreError>;

    async fn count_active(&self, document_id: &str) -> Result<usize, StoreError>;

    /// Requests for a signer across documents, optionally filtered by status
    async fn list_by_signer(
        &self,
        signer_key: &SignerKey,
        status: Option<SignatureStatus>,
    ) -> Result<Vec<SignatureRequest>, StoreError>;

    /// PENDING or VIEWED requests whose expiry is before `now`, soonest first
    async fn list_expirable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SignatureRequest>, StoreError>;

    /// Append an event, linking it to the request's previous event
    async fn append_event(&self, event: SignatureEvent) -> Result<SignatureEvent, StoreError>;

    /// Events for a request in append order
    async fn list_events(&self, request_id: &str) -> Result<Vec<SignatureEvent>, StoreError>;
}

/// In-process store backed by a `RwLock`
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    requests: Vec<SignatureRequest>,
    by_id: HashMap<String, usize>,
    events: HashMap<String, Vec<SignatureEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_expirable(request: &SignatureRequest, now: DateTime<Utc>) -> bool {
    matches!(
        request.status,
        SignatureStatus::Pending | SignatureStatus::Viewed
    ) && request.expires_at.is_some_and(|expires_at| expires_at < now)
}

#[async_trait]
impl SignatureStore for MemoryStore {
    async fn insert(&self, request: &SignatureRequest) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if inner.by_id.contains_key(&request.id) {
            return Err(StoreError::Backend(format!(
                "duplicate signature request id: {}",
                request.id
            )));
        }

        if request.status.is_active() {
            let key = request.signer_key();
            let taken = inner.requests.iter().any(|existing| {
                existing.document_id == request.document_id
                    && existing.status.is_active()
                    && existing.signer_key() == key
            });
            if taken {
                return Err(StoreError::DuplicateActive {
                    document_id: request.document_id.clone(),
                    signer_key: key.to_string(),
                });
            }
        }

        let index = inner.requests.len();
        inner.by_id.insert(request.id.clone(), index);
        inner.requests.push(request.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SignatureRequest>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.by_id.get(id).map(|&i| inner.requests[i].clone()))
    }

    async fn update(
        &self,
        request: &SignatureRequest,
        expected_version: i64,
    ) -> Result<SignatureRequest, StoreError> {
        let mut inner = self.inner.write().await;
        let index = *inner
            .by_id
            .get(&request.id)
            .ok_or_else(|| StoreError::NotFound(request.id.clone()))?;

        let stored = &mut inner.requests[index];
        if stored.version != expected_version {
            return Err(StoreError::StaleVersion {
                id: request.id.clone(),
                expected: expected_version,
            });
        }

        let mut next = request.clone();
        next.version = expected_version + 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list_by_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<SignatureRequest>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .requests
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn find_active(
        &self,
        document_id: &str,
        signer_key: &SignerKey,
    ) -> Result<Option<SignatureRequest>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .requests
            .iter()
            .find(|r| {
                r.document_id == document_id && r.status.is_active() && &r.signer_key() == signer_key
            })
            .cloned())
    }

    async fn count_active(&self, document_id: &str) -> Result<usize, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .requests
            .iter()
            .filter(|r| r.document_id == document_id && r.status.is_active())
            .count())
    }

    async fn list_by_signer(
        &self,
        signer_key: &SignerKey,
        status: Option<SignatureStatus>,
    ) -> Result<Vec<SignatureRequest>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .requests
            .iter()
            .filter(|r| &r.signer_key() == signer_key)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    async fn list_expirable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SignatureRequest>, StoreError> {
        let inner = self.inner.read().await;
        let mut due: Vec<SignatureRequest> = inner
            .requests
            .iter()
            .filter(|r| is_expirable(r, now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.expires_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn append_event(&self, event: SignatureEvent) -> Result<SignatureEvent, StoreError> {
        let mut inner = self.inner.write().await;
        let events = inner.events.entry(event.request_id.clone()).or_default();
        let linked = event.linked_to(events.last());
        events.push(linked.clone());
        Ok(linked)
    }

    async fn list_events(&self, request_id: &str) -> Result<Vec<SignatureEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.events.get(request_id).cloned().unwrap_or_default())
    }
}
