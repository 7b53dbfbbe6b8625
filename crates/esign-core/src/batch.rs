//! Batch creation of signature requests
//!
//! A batch is 1..N signers for one document sharing one optional expiry.
//! Batch-level preconditions fail the whole call before anything is written;
//! after that every signer stands alone and failures are itemized in the
//! [`BatchResult`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::audit::{SignatureAction, SignatureEvent, ACTOR_SYSTEM};
use crate::config::EngineConfig;
use crate::dispatch::NotificationDispatcher;
use crate::error::{Result, SignatureError};
use crate::external::{Directory, DocumentCatalog};
use crate::identity::{IdentityResolver, ResolvedSigner, SignerKey, SignerSpec};
use crate::store::{SignatureStore, StoreError};
use crate::transition::record_event;
use crate::types::{BatchError, BatchResult, SignatureRequest};
use crate::validator::{
    active_conflict_message, validate_batch_size, validate_expiry, ConflictValidator,
};

/// Input to [`BatchOrchestrator::create_batch`]
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub document_id: String,
    pub signers: Vec<SignerSpec>,
    pub expires_at: Option<DateTime<Utc>>,
    pub send_email: bool,
}

pub struct BatchOrchestrator {
    store: Arc<dyn SignatureStore>,
    directory: Arc<dyn Directory>,
    documents: Arc<dyn DocumentCatalog>,
    dispatcher: NotificationDispatcher,
    config: EngineConfig,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn SignatureStore>,
        directory: Arc<dyn Directory>,
        documents: Arc<dyn DocumentCatalog>,
        dispatcher: NotificationDispatcher,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            directory,
            documents,
            dispatcher,
            config,
        }
    }

    /// Checks that reject the batch as a whole
    async fn check_preconditions(&self, request: &BatchRequest, now: DateTime<Utc>) -> Result<()> {
        validate_batch_size(request.signers.len(), self.config.max_signers_per_batch)?;
        validate_expiry(request.expires_at, now)?;

        let exists = self
            .documents
            .document_exists(&request.document_id)
            .await
            .map_err(|e| SignatureError::DownstreamProvider(e.to_string()))?;
        if !exists {
            return Err(SignatureError::DocumentNotFound(request.document_id.clone()));
        }
        Ok(())
    }

    pub async fn create_batch(&self, request: BatchRequest) -> Result<BatchResult> {
        let now = Utc::now();
        self.check_preconditions(&request, now).await?;

        let document_id = request.document_id.as_str();
        let total = request.signers.len();
        let mut errors: Vec<BatchError> = Vec::new();

        // Resolve everyone first so duplicates are visible before any insert
        let resolver = IdentityResolver::new(self.directory.as_ref());
        let mut resolved: Vec<Option<ResolvedSigner>> = Vec::with_capacity(total);
        for (index, spec) in request.signers.iter().enumerate() {
            match resolver.resolve(spec).await {
                Ok(signer) => resolved.push(Some(signer)),
                Err(error) => {
                    debug!("Signer {} of batch for {} unresolved: {}", index + 1, document_id, error);
                    errors.push(BatchError {
                        signer: index + 1,
                        signer_email: spec.contact.email.clone(),
                        error,
                    });
                    resolved.push(None);
                }
            }
        }

        let validator = ConflictValidator::new(self.store.as_ref());
        let mut active_count = match self.config.max_active_signers_per_document {
            Some(_) => self.store.count_active(document_id).await?,
            None => 0,
        };
        let mut created: Vec<(usize, SignatureRequest)> = Vec::new();

        for (index, signer) in resolved.iter().enumerate() {
            let Some(signer) = signer else { continue };
            let position = index + 1;

            let siblings: Vec<SignerKey> = resolved
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != index)
                .filter_map(|(_, s)| s.as_ref().map(|s| s.key.clone()))
                .collect();

            let outcome = match validator.validate(document_id, signer, &siblings).await {
                Ok(()) => self.check_signer_limit(active_count),
                Err(e) => Err(e),
            };
            let outcome = match outcome {
                Ok(()) => {
                    self.persist(document_id, signer, request.expires_at, now)
                        .await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(stored) => {
                    active_count += 1;
                    created.push((position, stored));
                }
                Err(error) => {
                    debug!("Signer {} of batch for {} rejected: {}", position, document_id, error);
                    errors.push(BatchError {
                        signer: position,
                        signer_email: signer.contact.email.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            "Created {}/{} signature requests for document {}",
            created.len(),
            total,
            document_id
        );

        if request.send_email && !created.is_empty() {
            created = self.dispatch_all(created, &mut errors).await;
        }

        errors.sort_by_key(|e| e.signer);
        Ok(BatchResult {
            total,
            success: created.len(),
            created: created.into_iter().map(|(_, r)| r).collect(),
            errors,
        })
    }

    fn check_signer_limit(&self, active_count: usize) -> Result<()> {
        match self.config.max_active_signers_per_document {
            Some(max) if active_count >= max => Err(SignatureError::Conflict(format!(
                "signer limit of {} reached for document",
                max
            ))),
            _ => Ok(()),
        }
    }

    /// Insert a PENDING request; a lost uniqueness race becomes a conflict
    async fn persist(
        &self,
        document_id: &str,
        signer: &ResolvedSigner,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<SignatureRequest> {
        let request = SignatureRequest::pending(document_id, signer, expires_at, now);

        match self.store.insert(&request).await {
            Ok(()) => {}
            Err(StoreError::DuplicateActive { .. }) => {
                let name = self
                    .store
                    .find_active(document_id, &signer.key)
                    .await?
                    .map(|existing| existing.contact.name)
                    .unwrap_or_else(|| signer.contact.name.clone());
                return Err(SignatureError::Conflict(active_conflict_message(&name)));
            }
            Err(e) => return Err(e.into()),
        }

        record_event(
            self.store.as_ref(),
            SignatureEvent::new(SignatureAction::Created, &request, ACTOR_SYSTEM, None),
        )
        .await;
        Ok(request)
    }

    /// Send every created request, overlapping provider calls.
    ///
    /// Failed sends stay in `created`; the request exists and awaits a
    /// manual retry.
    async fn dispatch_all(
        &self,
        created: Vec<(usize, SignatureRequest)>,
        errors: &mut Vec<BatchError>,
    ) -> Vec<(usize, SignatureRequest)> {
        let concurrency = self.config.dispatch_concurrency.max(1);
        let outcomes: Vec<_> = stream::iter(created)
            .map(|(position, request)| {
                let dispatcher = self.dispatcher.clone();
                async move {
                    let outcome = dispatcher.send(&request.id).await;
                    (position, request, outcome)
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        outcomes
            .into_iter()
            .map(|(position, request, outcome)| match outcome {
                Ok(receipt) => (position, receipt.request),
                Err(error) => {
                    warn!(
                        "Signature request {} created but not sent: {}",
                        request.id, error
                    );
                    errors.push(BatchError {
                        signer: position,
                        signer_email: request.contact.email.clone(),
                        error,
                    });
                    (position, request)
                }
            })
            .collect()
    }
}
