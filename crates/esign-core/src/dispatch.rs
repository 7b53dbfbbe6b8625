//! Sending and resending signing links
//!
//! `send` is the first dispatch and may happen once. `resend` re-delivers the
//! stored link and never asks the provider for a new one, since signers may
//! have bookmarked it. Neither call changes the request's status.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::audit::{SignatureAction, SignatureEvent, ACTOR_SYSTEM};
use crate::error::{Result, SignatureError};
use crate::external::SigningProvider;
use crate::store::{SignatureStore, StoreError};
use crate::transition::record_event;
use crate::types::{SignatureRequest, SignatureStatus};

/// Result of a successful send or resend
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReceipt {
    pub signature_url: String,
    pub request: SignatureRequest,
}

/// Whether `resend` is legal for this request
pub fn is_resendable(request: &SignatureRequest) -> bool {
    match request.status {
        SignatureStatus::Viewed | SignatureStatus::Expired => true,
        SignatureStatus::Pending => request.viewed_at.is_some(),
        _ => false,
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn SignatureStore>,
    provider: Arc<dyn SigningProvider>,
    retries: u32,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn SignatureStore>,
        provider: Arc<dyn SigningProvider>,
        retries: u32,
    ) -> Self {
        Self {
            store,
            provider,
            retries,
        }
    }

    async fn load(&self, id: &str) -> Result<SignatureRequest> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SignatureError::NotFound(id.to_string()))
    }

    /// First dispatch of the signing link.
    ///
    /// The send is claimed (count set to 1) before delivery so that of two
    /// racing calls exactly one delivers. A failed delivery releases the
    /// claim, keeping the provisioned URL for the retry.
    pub async fn send(&self, id: &str) -> Result<DispatchReceipt> {
        let mut current = self.load(id).await?;
        let mut provisioned: Option<String> = None;

        for _ in 0..=self.retries {
            if current.email_sent_count > 0 {
                return Err(SignatureError::AlreadySent(id.to_string()));
            }
            if current.status.is_terminal() {
                return Err(SignatureError::NotSendable(current.status));
            }

            let url = match current.signature_url.clone().or_else(|| provisioned.clone()) {
                Some(url) => url,
                None => {
                    let url = self
                        .provider
                        .provision_signature(&current)
                        .await
                        .map_err(|e| SignatureError::DownstreamProvider(e.to_string()))?;
                    provisioned = Some(url.clone());
                    url
                }
            };

            let now = Utc::now();
            let mut claimed = current.clone();
            claimed.signature_url = Some(url.clone());
            claimed.email_sent_count = 1;
            claimed.email_sent_at = Some(now);
            claimed.updated_at = now;

            match self.store.update(&claimed, current.version).await {
                Ok(stored) => return self.deliver_claimed(stored, url).await,
                Err(StoreError::StaleVersion { .. }) => {
                    current = self.load(id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SignatureError::Conflict(format!(
            "signature request {} is being modified concurrently",
            id
        )))
    }

    async fn deliver_claimed(
        &self,
        stored: SignatureRequest,
        url: String,
    ) -> Result<DispatchReceipt> {
        match self.provider.deliver_email(&url, &stored).await {
            Ok(()) => {
                info!(
                    "Sent signing link for request {} to {}",
                    stored.id, stored.contact.email
                );
                record_event(
                    self.store.as_ref(),
                    SignatureEvent::new(SignatureAction::Sent, &stored, ACTOR_SYSTEM, None),
                )
                .await;
                Ok(DispatchReceipt {
                    signature_url: url,
                    request: stored,
                })
            }
            Err(e) => {
                warn!("Delivery failed for signature request {}: {}", stored.id, e);
                self.release_claim(&stored.id).await;
                Err(SignatureError::DownstreamProvider(e.to_string()))
            }
        }
    }

    /// Undo a send claim after failed delivery so `send` can be retried
    async fn release_claim(&self, id: &str) {
        for _ in 0..=self.retries {
            let current = match self.store.get(id).await {
                Ok(Some(current)) => current,
                Ok(None) => return,
                Err(e) => {
                    warn!("Could not reload signature request {}: {}", id, e);
                    return;
                }
            };
            if current.email_sent_count == 0 {
                return;
            }

            let mut released = current.clone();
            released.email_sent_count -= 1;
            if released.email_sent_count == 0 {
                released.email_sent_at = None;
            }

            match self.store.update(&released, current.version).await {
                Ok(_) => return,
                Err(StoreError::StaleVersion { .. }) => continue,
                Err(e) => {
                    warn!("Could not release send claim on {}: {}", id, e);
                    return;
                }
            }
        }
        warn!("Gave up releasing send claim on signature request {}", id);
    }

    /// Re-deliver the stored signing link
    pub async fn resend(&self, id: &str) -> Result<DispatchReceipt> {
        let mut current = self.load(id).await?;
        if !is_resendable(&current) {
            return Err(SignatureError::NotResendable(current.status));
        }
        let url = current
            .signature_url
            .clone()
            .ok_or_else(|| SignatureError::NotYetSent(id.to_string()))?;

        self.provider
            .deliver_email(&url, &current)
            .await
            .map_err(|e| SignatureError::DownstreamProvider(e.to_string()))?;

        for _ in 0..=self.retries {
            let now = Utc::now();
            let mut next = current.clone();
            next.email_sent_count += 1;
            next.email_sent_at = Some(now);
            next.updated_at = now;

            match self.store.update(&next, current.version).await {
                Ok(stored) => {
                    info!(
                        "Resent signing link for request {} (send #{})",
                        stored.id, stored.email_sent_count
                    );
                    record_event(
                        self.store.as_ref(),
                        SignatureEvent::new(SignatureAction::Resent, &stored, ACTOR_SYSTEM, None),
                    )
                    .await;
                    return Ok(DispatchReceipt {
                        signature_url: url,
                        request: stored,
                    });
                }
                Err(StoreError::StaleVersion { .. }) => {
                    current = self.load(id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            "Resent signature request {} but could not record the send count",
            id
        );
        Ok(DispatchReceipt {
            signature_url: url,
            request: current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::ProviderError;
    use crate::identity::ResolvedSigner;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingProvider {
        provisioned: AtomicUsize,
        delivered: AtomicUsize,
        fail_delivery: AtomicBool,
    }

    #[async_trait]
    impl SigningProvider for CountingProvider {
        async fn provision_signature(
            &self,
            request: &SignatureRequest,
        ) -> std::result::Result<String, ProviderError> {
            let n = self.provisioned.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://sign.example.com/{}/{}", request.id, n))
        }

        async fn deliver_email(
            &self,
            _signature_url: &str,
            _request: &SignatureRequest,
        ) -> std::result::Result<(), ProviderError> {
            if self.fail_delivery.load(Ordering::SeqCst) {
                return Err(ProviderError::Status {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn setup() -> (Arc<MemoryStore>, Arc<CountingProvider>, NotificationDispatcher, String) {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(CountingProvider::default());
        let signer = ResolvedSigner::external("Ana", "ana@example.com");
        let request = SignatureRequest::pending("doc-1", &signer, None, Utc::now());
        store.insert(&request).await.unwrap();
        let dispatcher = NotificationDispatcher::new(store.clone(), provider.clone(), 3);
        (store, provider, dispatcher, request.id)
    }

    #[test]
    fn test_resend_eligibility() {
        let signer = ResolvedSigner::external("Ana", "ana@example.com");
        let mut request = SignatureRequest::pending("doc-1", &signer, None, Utc::now());
        assert!(!is_resendable(&request));
        request.viewed_at = Some(Utc::now());
        assert!(is_resendable(&request));
        for (status, expected) in [
            (SignatureStatus::Viewed, true),
            (SignatureStatus::Expired, true),
            (SignatureStatus::Signed, false),
            (SignatureStatus::Rejected, false),
            (SignatureStatus::Cancelled, false),
        ] {
            request.status = status;
            assert_eq!(is_resendable(&request), expected, "{}", status);
        }
    }

    #[tokio::test]
    async fn test_send_once() {
        let (store, provider, dispatcher, id) = setup().await;

        let receipt = dispatcher.send(&id).await.unwrap();
        assert_eq!(receipt.request.email_sent_count, 1);
        assert!(receipt.request.email_sent_at.is_some());
        assert_eq!(receipt.request.status, SignatureStatus::Pending);

        let err = dispatcher.send(&id).await.unwrap_err();
        assert_eq!(err, SignatureError::AlreadySent(id.clone()));
        assert_eq!(provider.delivered.load(Ordering::SeqCst), 1);

        let events = store.list_events(&id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, SignatureAction::Sent);
    }

    #[tokio::test]
    async fn test_failed_delivery_releases_claim_and_keeps_url() {
        let (store, provider, dispatcher, id) = setup().await;
        provider.fail_delivery.store(true, Ordering::SeqCst);

        let err = dispatcher.send(&id).await.unwrap_err();
        assert!(matches!(err, SignatureError::DownstreamProvider(_)));
        let after_failure = store.get(&id).await.unwrap().unwrap();
        assert_eq!(after_failure.email_sent_count, 0);
        assert_eq!(after_failure.email_sent_at, None);
        let url = after_failure.signature_url.clone().unwrap();

        provider.fail_delivery.store(false, Ordering::SeqCst);
        let receipt = dispatcher.send(&id).await.unwrap();
        assert_eq!(receipt.signature_url, url);
        assert_eq!(provider.provisioned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resend_reuses_url() {
        let (store, provider, dispatcher, id) = setup().await;
        let first = dispatcher.send(&id).await.unwrap();

        let mut viewed = store.get(&id).await.unwrap().unwrap();
        viewed.status = SignatureStatus::Viewed;
        viewed.viewed_at = Some(Utc::now());
        store.update(&viewed, viewed.version).await.unwrap();

        let second = dispatcher.resend(&id).await.unwrap();
        let third = dispatcher.resend(&id).await.unwrap();
        assert_eq!(first.signature_url, second.signature_url);
        assert_eq!(second.signature_url, third.signature_url);
        assert_eq!(third.request.email_sent_count, 3);
        assert_eq!(provider.provisioned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resend_rejected_for_unviewed_pending() {
        let (_store, _provider, dispatcher, id) = setup().await;
        dispatcher.send(&id).await.unwrap();
        let err = dispatcher.resend(&id).await.unwrap_err();
        assert_eq!(err, SignatureError::NotResendable(SignatureStatus::Pending));
    }

    #[tokio::test]
    async fn test_send_rejected_for_terminal_request() {
        let (store, _provider, dispatcher, id) = setup().await;
        let mut cancelled = store.get(&id).await.unwrap().unwrap();
        cancelled.status = SignatureStatus::Cancelled;
        store.update(&cancelled, 0).await.unwrap();

        let err = dispatcher.send(&id).await.unwrap_err();
        assert_eq!(err, SignatureError::NotSendable(SignatureStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_concurrent_sends_deliver_once() {
        let (_store, provider, dispatcher, id) = setup().await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dispatcher = dispatcher.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move { dispatcher.send(&id).await }));
        }

        let mut ok = 0;
        let mut already_sent = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(SignatureError::AlreadySent(_)) => already_sent += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(already_sent, 7);
        assert_eq!(provider.delivered.load(Ordering::SeqCst), 1);
    }
}
