//! The signature engine facade
//!
//! Wires the store, identity resolution, conflict validation, dispatch and
//! expiry together. The HTTP layer and provider callbacks only talk to
//! [`SignatureEngine`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit::{SignatureEvent, ACTOR_PROVIDER, ACTOR_SYSTEM};
use crate::batch::{BatchOrchestrator, BatchRequest};
use crate::config::EngineConfig;
use crate::dispatch::{DispatchReceipt, NotificationDispatcher};
use crate::error::{Result, SignatureError};
use crate::expiration::{ExpirationEvaluator, ExpirationSweeper, SweepReport};
use crate::external::{Directory, DocumentCatalog, SigningProvider};
use crate::identity::IdentityQuery;
use crate::state_machine::{Transition, TransitionOutcome};
use crate::store::SignatureStore;
use crate::transition::apply_stored;
use crate::types::{BatchResult, SignatureRequest, SignatureStats, SignatureStatus};

/// Result of a status change
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReport {
    pub outcome: TransitionOutcome,
    /// The request after the call; `None` when an unknown id was ignored
    pub request: Option<SignatureRequest>,
}

pub struct SignatureEngine {
    store: Arc<dyn SignatureStore>,
    documents: Arc<dyn DocumentCatalog>,
    orchestrator: BatchOrchestrator,
    dispatcher: NotificationDispatcher,
    evaluator: Arc<ExpirationEvaluator>,
    config: EngineConfig,
}

impl SignatureEngine {
    pub fn new(
        store: Arc<dyn SignatureStore>,
        directory: Arc<dyn Directory>,
        documents: Arc<dyn DocumentCatalog>,
        provider: Arc<dyn SigningProvider>,
        config: EngineConfig,
    ) -> Self {
        let dispatcher =
            NotificationDispatcher::new(store.clone(), provider, config.transition_retries);
        let orchestrator = BatchOrchestrator::new(
            store.clone(),
            directory,
            documents.clone(),
            dispatcher.clone(),
            config.clone(),
        );
        let evaluator = Arc::new(ExpirationEvaluator::new(
            store.clone(),
            config.sweep_batch_limit,
            config.sweep_timeout,
            config.transition_retries,
        ));

        Self {
            store,
            documents,
            orchestrator,
            dispatcher,
            evaluator,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create one request per signer; see [`BatchOrchestrator`]
    pub async fn create_batch(&self, request: BatchRequest) -> Result<BatchResult> {
        self.orchestrator.create_batch(request).await
    }

    async fn ensure_document(&self, document_id: &str) -> Result<()> {
        let exists = self
            .documents
            .document_exists(document_id)
            .await
            .map_err(|e| SignatureError::DownstreamProvider(e.to_string()))?;
        if exists {
            Ok(())
        } else {
            Err(SignatureError::DocumentNotFound(document_id.to_string()))
        }
    }

    /// Every request for a document, oldest first
    pub async fn list_signatures(&self, document_id: &str) -> Result<Vec<SignatureRequest>> {
        self.ensure_document(document_id).await?;
        Ok(self.store.list_by_document(document_id).await?)
    }

    pub async fn get_stats(&self, document_id: &str) -> Result<SignatureStats> {
        let requests = self.list_signatures(document_id).await?;
        Ok(SignatureStats::from_requests(&requests))
    }

    pub async fn get_signature(&self, id: &str) -> Result<SignatureRequest> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SignatureError::NotFound(id.to_string()))
    }

    /// Requests addressed to a client, user or external email across documents
    pub async fn list_by_identity(
        &self,
        query: &IdentityQuery,
        status: Option<SignatureStatus>,
    ) -> Result<Vec<SignatureRequest>> {
        Ok(self.store.list_by_signer(&query.key(), status).await?)
    }

    /// Audit trail for a request, oldest first
    pub async fn history(&self, id: &str) -> Result<Vec<SignatureEvent>> {
        self.get_signature(id).await?;
        Ok(self.store.list_events(id).await?)
    }

    pub async fn send(&self, id: &str) -> Result<DispatchReceipt> {
        self.dispatcher.send(id).await
    }

    pub async fn resend(&self, id: &str) -> Result<DispatchReceipt> {
        self.dispatcher.resend(id).await
    }

    /// Administrative withdrawal of an active request
    pub async fn cancel(&self, id: &str) -> Result<SignatureRequest> {
        let (outcome, request) = apply_stored(
            self.store.as_ref(),
            id,
            &Transition::Cancel,
            ACTOR_SYSTEM,
            Utc::now(),
            self.config.transition_retries,
        )
        .await?;
        if outcome == TransitionOutcome::Applied {
            info!("Cancelled signature request {}", id);
        }
        Ok(request)
    }

    /// Provider callback: the signer opened the link
    pub async fn mark_viewed(&self, id: &str) -> Result<TransitionReport> {
        self.apply_callback(id, Transition::View).await
    }

    /// Provider callback: the signer signed
    pub async fn mark_signed(&self, id: &str) -> Result<TransitionReport> {
        self.apply_callback(id, Transition::Sign).await
    }

    /// Provider callback: the signer declined
    pub async fn mark_rejected(&self, id: &str, reason: &str) -> Result<TransitionReport> {
        self.apply_callback(
            id,
            Transition::Reject {
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Callbacks arrive late and out of order. Unknown ids and requests that
    /// already reached a terminal status are logged and ignored.
    async fn apply_callback(&self, id: &str, transition: Transition) -> Result<TransitionReport> {
        let result = apply_stored(
            self.store.as_ref(),
            id,
            &transition,
            ACTOR_PROVIDER,
            Utc::now(),
            self.config.transition_retries,
        )
        .await;

        match result {
            Ok((outcome, request)) => Ok(TransitionReport {
                outcome,
                request: Some(request),
            }),
            Err(SignatureError::NotFound(_)) => {
                warn!("Ignoring {:?} callback for unknown signature request {}", transition, id);
                Ok(TransitionReport {
                    outcome: TransitionOutcome::Ignored,
                    request: None,
                })
            }
            Err(SignatureError::InvalidTransition { from, to }) if from.is_terminal() => {
                warn!(
                    "Ignoring {} callback for signature request {} already {}",
                    to, id, from
                );
                Ok(TransitionReport {
                    outcome: TransitionOutcome::Ignored,
                    request: self.store.get(id).await?,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Run one expiration sweep now
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.evaluator.sweep(now).await
    }

    /// Start the periodic sweep; it stops when `shutdown` turns true
    pub fn spawn_sweeper(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        ExpirationSweeper::new(self.evaluator.clone(), self.config.sweep_interval).spawn(shutdown)
    }
}
