//! End-to-end signature workflow tests against the in-memory store
//!
//! Each test drives the public `SignatureEngine` the way the API server does:
//! batch creation, dispatch, provider callbacks and expiry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use esign_core::{
    verify_chain, BatchRequest, Directory, DirectoryEntry, DocumentCatalog, EngineConfig,
    IdentityQuery, MemoryStore, ProviderError, SignatureAction, SignatureEngine, SignatureError,
    SignatureRequest, SignatureStatus, SignatureStore, SignerKey, SignerSpec, SigningProvider,
    TransitionOutcome,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

// ============================================================================
// Test Doubles
// ============================================================================

struct StaticDirectory {
    clients: HashMap<String, DirectoryEntry>,
    users: HashMap<String, DirectoryEntry>,
}

impl StaticDirectory {
    fn new() -> Self {
        let mut clients = HashMap::new();
        clients.insert(
            "c-1".to_string(),
            DirectoryEntry {
                name: "Ana Souza".to_string(),
                email: "ana@acme.com".to_string(),
                phone: Some("+55 11 5555-0101".to_string()),
                tax_id: Some("123.456.789-00".to_string()),
            },
        );
        let mut users = HashMap::new();
        users.insert(
            "u-1".to_string(),
            DirectoryEntry {
                name: "Bruno Lima".to_string(),
                email: "bruno@firm.com".to_string(),
                phone: None,
                tax_id: None,
            },
        );
        Self { clients, users }
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn resolve_client(&self, client_id: &str) -> Result<Option<DirectoryEntry>, ProviderError> {
        Ok(self.clients.get(client_id).cloned())
    }

    async fn resolve_user(&self, user_id: &str) -> Result<Option<DirectoryEntry>, ProviderError> {
        Ok(self.users.get(user_id).cloned())
    }
}

struct StaticCatalog(HashSet<String>);

#[async_trait]
impl DocumentCatalog for StaticCatalog {
    async fn document_exists(&self, document_id: &str) -> Result<bool, ProviderError> {
        Ok(self.0.contains(document_id))
    }
}

/// Records deliveries; emails listed in `failing` bounce
#[derive(Default)]
struct RecordingProvider {
    provisioned: AtomicUsize,
    delivered: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
    down: AtomicBool,
}

impl RecordingProvider {
    fn deliveries_to(&self, email: &str) -> usize {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, to)| to == email)
            .count()
    }
}

#[async_trait]
impl SigningProvider for RecordingProvider {
    async fn provision_signature(&self, request: &SignatureRequest) -> Result<String, ProviderError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ProviderError::Request("connection refused".to_string()));
        }
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://sign.example.com/{}", request.id))
    }

    async fn deliver_email(
        &self,
        signature_url: &str,
        request: &SignatureRequest,
    ) -> Result<(), ProviderError> {
        if self.failing.lock().unwrap().contains(&request.contact.email) {
            return Err(ProviderError::Status {
                status: 422,
                message: "mailbox unavailable".to_string(),
            });
        }
        self.delivered
            .lock()
            .unwrap()
            .push((signature_url.to_string(), request.contact.email.clone()));
        Ok(())
    }
}

struct Harness {
    engine: SignatureEngine,
    store: Arc<MemoryStore>,
    provider: Arc<RecordingProvider>,
}

fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(RecordingProvider::default());
    let documents = StaticCatalog(["doc-1", "doc-2"].iter().map(|d| d.to_string()).collect());
    let engine = SignatureEngine::new(
        store.clone(),
        Arc::new(StaticDirectory::new()),
        Arc::new(documents),
        provider.clone(),
        config,
    );
    Harness {
        engine,
        store,
        provider,
    }
}

fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

fn batch(document_id: &str, signers: Vec<SignerSpec>) -> BatchRequest {
    BatchRequest {
        document_id: document_id.to_string(),
        signers,
        expires_at: Some(Utc::now() + Duration::days(7)),
        send_email: false,
    }
}

fn active_count(requests: &[SignatureRequest], key: &SignerKey) -> usize {
    requests
        .iter()
        .filter(|r| r.status.is_active() && &r.signer_key() == key)
        .count()
}

// ============================================================================
// Batch Creation
// ============================================================================

#[tokio::test]
async fn test_batch_creates_one_pending_request_per_signer() {
    let h = harness();
    let result = h
        .engine
        .create_batch(batch(
            "doc-1",
            vec![
                SignerSpec::client("c-1"),
                SignerSpec::user("u-1"),
                SignerSpec::external("Carla Dias", "carla@example.com"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.success, 3);
    assert!(result.errors.is_empty());
    assert!(result
        .created
        .iter()
        .all(|r| r.status == SignatureStatus::Pending && r.email_sent_count == 0));

    let client = &result.created[0];
    assert_eq!(client.contact.name, "Ana Souza");
    assert_eq!(client.contact.email, "ana@acme.com");
    assert_eq!(client.contact.tax_id.as_deref(), Some("123.456.789-00"));

    let stats = h.engine.get_stats("doc-1").await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.pending, 3);
}

#[tokio::test]
async fn test_duplicate_signers_in_one_batch_all_fail() {
    let h = harness();
    let result = h
        .engine
        .create_batch(batch(
            "doc-1",
            vec![
                SignerSpec::external("Dan", "dan@example.com"),
                SignerSpec::external("Carla", "carla@example.com"),
                SignerSpec::external("Dan Again", " DAN@example.com "),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(result.success, 1);
    assert_eq!(result.created[0].contact.email, "carla@example.com");
    let failed: Vec<usize> = result.errors.iter().map(|e| e.signer).collect();
    assert_eq!(failed, vec![1, 3]);
    for error in &result.errors {
        assert_eq!(
            error.error,
            SignatureError::Conflict("duplicate signer in request".to_string())
        );
    }
    assert_eq!(h.engine.list_signatures("doc-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_active_request_blocks_second_request_for_same_signer() {
    let h = harness();
    let first = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::client("c-1")]))
        .await
        .unwrap();
    assert_eq!(first.success, 1);

    let second = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::client("c-1")]))
        .await
        .unwrap();
    assert_eq!(second.success, 0);
    assert_eq!(
        second.errors[0].error,
        SignatureError::Conflict("active signature already exists for Ana Souza".to_string())
    );

    // same signer on a different document is fine
    let other_doc = h
        .engine
        .create_batch(batch("doc-2", vec![SignerSpec::client("c-1")]))
        .await
        .unwrap();
    assert_eq!(other_doc.success, 1);

    h.engine.cancel(&first.created[0].id).await.unwrap();
    let after_cancel = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::client("c-1")]))
        .await
        .unwrap();
    assert_eq!(after_cancel.success, 1);
}

#[tokio::test]
async fn test_signed_and_rejected_requests_still_block() {
    let h = harness();
    let first = h
        .engine
        .create_batch(batch(
            "doc-1",
            vec![
                SignerSpec::user("u-1"),
                SignerSpec::external("Rita", "rita@x.com"),
            ],
        ))
        .await
        .unwrap();
    h.engine.mark_signed(&first.created[0].id).await.unwrap();
    h.engine
        .mark_rejected(&first.created[1].id, "not my contract")
        .await
        .unwrap();

    let second = h
        .engine
        .create_batch(batch(
            "doc-1",
            vec![
                SignerSpec::user("u-1"),
                SignerSpec::external("Rita", "rita@x.com"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(second.success, 0);
    assert_eq!(
        second.errors[0].error,
        SignatureError::Conflict("active signature already exists for Bruno Lima".to_string())
    );
}

#[tokio::test]
async fn test_partial_batch_reports_existing_duplicate() {
    let h = harness();
    h.engine
        .create_batch(batch("doc-1", vec![SignerSpec::external("Sam", "sam@x.com")]))
        .await
        .unwrap();

    let result = h
        .engine
        .create_batch(batch(
            "doc-1",
            vec![
                SignerSpec::external("Tia", "tia@x.com"),
                SignerSpec::external("Sam", "sam@x.com"),
                SignerSpec::external("Uma", "uma@x.com"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!((result.total, result.success), (3, 2));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].signer, 2);
    assert_eq!(h.engine.list_signatures("doc-1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_viewed_request_blocks_client() {
    let h = harness();
    let first = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::client("c-1")]))
        .await
        .unwrap();
    h.engine.mark_viewed(&first.created[0].id).await.unwrap();

    let second = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::client("c-1")]))
        .await
        .unwrap();
    assert_eq!((second.total, second.success), (1, 0));
    assert_eq!(
        second.errors[0].error,
        SignatureError::Conflict("active signature already exists for Ana Souza".to_string())
    );
}

#[tokio::test]
async fn test_per_signer_failures_do_not_abort_batch() {
    let h = harness();
    let result = h
        .engine
        .create_batch(batch(
            "doc-1",
            vec![
                SignerSpec::external("Eve", "not-an-email"),
                SignerSpec::client("c-missing"),
                SignerSpec::external("", "noname@example.com"),
                SignerSpec::external("Fay", "fay@example.com"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(result.total, 4);
    assert_eq!(result.success, 1);
    assert_eq!(result.errors.len(), 3);
    assert!(result
        .errors
        .iter()
        .all(|e| matches!(e.error, SignatureError::Validation(_))));
    assert_eq!(result.errors[0].signer_email, "not-an-email");
}

#[tokio::test]
async fn test_batch_preconditions_reject_whole_call() {
    let h = harness();

    let empty = h.engine.create_batch(batch("doc-1", vec![])).await;
    assert!(matches!(empty, Err(SignatureError::Precondition(_))));

    let missing = h
        .engine
        .create_batch(batch("doc-404", vec![SignerSpec::external("A", "a@x.com")]))
        .await;
    assert_eq!(
        missing.unwrap_err(),
        SignatureError::DocumentNotFound("doc-404".to_string())
    );

    let mut past = batch("doc-1", vec![SignerSpec::external("A", "a@x.com")]);
    past.expires_at = Some(Utc::now() - Duration::minutes(5));
    assert!(matches!(
        h.engine.create_batch(past).await,
        Err(SignatureError::Precondition(_))
    ));

    assert!(h.store.list_by_document("doc-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_configured_limits() {
    let h = harness_with(EngineConfig {
        max_signers_per_batch: Some(3),
        max_active_signers_per_document: Some(2),
        ..EngineConfig::default()
    });

    let too_many = (0..4)
        .map(|i| SignerSpec::external("S", &format!("s{}@x.com", i)))
        .collect();
    assert!(matches!(
        h.engine.create_batch(batch("doc-1", too_many)).await,
        Err(SignatureError::Precondition(_))
    ));

    let result = h
        .engine
        .create_batch(batch(
            "doc-1",
            vec![
                SignerSpec::external("A", "a@x.com"),
                SignerSpec::external("B", "b@x.com"),
                SignerSpec::external("C", "c@x.com"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(result.success, 2);
    assert_eq!(result.errors[0].signer, 3);
    assert!(matches!(result.errors[0].error, SignatureError::Conflict(_)));
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_batch_with_send_email_dispatches_each_signer() {
    let h = harness();
    h.provider
        .failing
        .lock()
        .unwrap()
        .insert("bounce@example.com".to_string());

    let mut request = batch(
        "doc-1",
        vec![
            SignerSpec::external("Gil", "gil@example.com"),
            SignerSpec::external("Bounce", "bounce@example.com"),
            SignerSpec::user("u-1"),
        ],
    );
    request.send_email = true;
    let result = h.engine.create_batch(request).await.unwrap();

    // the bounced request exists and can be sent later
    assert_eq!(result.success, 3);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].signer, 2);
    assert!(matches!(
        result.errors[0].error,
        SignatureError::DownstreamProvider(_)
    ));

    let sent: Vec<u32> = result.created.iter().map(|r| r.email_sent_count).collect();
    assert_eq!(sent, vec![1, 0, 1]);
    assert!(result.created[0].signature_url.is_some());
    assert_eq!(h.provider.deliveries_to("gil@example.com"), 1);
    assert_eq!(h.provider.deliveries_to("bruno@firm.com"), 1);

    h.provider.failing.lock().unwrap().clear();
    let retry = h.engine.send(&result.created[1].id).await.unwrap();
    assert_eq!(retry.request.email_sent_count, 1);
    assert_eq!(
        h.engine.send(&result.created[1].id).await.unwrap_err(),
        SignatureError::AlreadySent(result.created[1].id.clone())
    );
}

#[tokio::test]
async fn test_provider_outage_leaves_request_unsent() {
    let h = harness();
    let created = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::external("Hal", "hal@x.com")]))
        .await
        .unwrap();
    let id = created.created[0].id.clone();

    h.provider.down.store(true, Ordering::SeqCst);
    assert!(matches!(
        h.engine.send(&id).await,
        Err(SignatureError::DownstreamProvider(_))
    ));
    let stored = h.engine.get_signature(&id).await.unwrap();
    assert_eq!(stored.email_sent_count, 0);
    assert_eq!(stored.signature_url, None);
}

#[tokio::test]
async fn test_resend_after_view_reuses_link() {
    let h = harness();
    let created = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::external("Ivy", "ivy@x.com")]))
        .await
        .unwrap();
    let id = created.created[0].id.clone();

    assert_eq!(
        h.engine.resend(&id).await.unwrap_err(),
        SignatureError::NotResendable(SignatureStatus::Pending)
    );

    let first = h.engine.send(&id).await.unwrap();
    h.engine.mark_viewed(&id).await.unwrap();
    let again = h.engine.resend(&id).await.unwrap();

    assert_eq!(again.signature_url, first.signature_url);
    assert_eq!(again.request.email_sent_count, 2);
    assert_eq!(again.request.status, SignatureStatus::Viewed);

    let third = h.engine.resend(&id).await.unwrap();
    assert_eq!(third.signature_url, first.signature_url);
    assert_eq!(third.request.email_sent_count, 3);
    assert_eq!(h.provider.provisioned.load(Ordering::SeqCst), 1);
    assert_eq!(h.provider.deliveries_to("ivy@x.com"), 3);
}

#[tokio::test]
async fn test_resend_on_signed_request_rejected() {
    let h = harness();
    let created = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::external("Val", "val@x.com")]))
        .await
        .unwrap();
    let id = created.created[0].id.clone();
    h.engine.send(&id).await.unwrap();
    h.engine.mark_signed(&id).await.unwrap();

    assert_eq!(
        h.engine.resend(&id).await.unwrap_err(),
        SignatureError::NotResendable(SignatureStatus::Signed)
    );
}

#[tokio::test]
async fn test_resend_viewed_but_never_sent() {
    let h = harness();
    let created = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::external("Jo", "jo@x.com")]))
        .await
        .unwrap();
    let id = created.created[0].id.clone();
    h.engine.mark_viewed(&id).await.unwrap();

    assert_eq!(
        h.engine.resend(&id).await.unwrap_err(),
        SignatureError::NotYetSent(id.clone())
    );
}

// ============================================================================
// Provider Callbacks
// ============================================================================

#[tokio::test]
async fn test_callbacks_follow_lifecycle() {
    let h = harness();
    let created = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::client("c-1")]))
        .await
        .unwrap();
    let id = created.created[0].id.clone();

    let viewed = h.engine.mark_viewed(&id).await.unwrap();
    assert_eq!(viewed.outcome, TransitionOutcome::Applied);
    let again = h.engine.mark_viewed(&id).await.unwrap();
    assert_eq!(again.outcome, TransitionOutcome::Unchanged);

    let signed = h.engine.mark_signed(&id).await.unwrap();
    assert_eq!(signed.outcome, TransitionOutcome::Applied);
    let request = signed.request.unwrap();
    assert_eq!(request.status, SignatureStatus::Signed);
    assert!(request.viewed_at.unwrap() <= request.signed_at.unwrap());

    // late callbacks after a terminal status are ignored
    let late = h.engine.mark_viewed(&id).await.unwrap();
    assert_eq!(late.outcome, TransitionOutcome::Ignored);
    assert_eq!(late.request.unwrap().status, SignatureStatus::Signed);
    let late_reject = h.engine.mark_rejected(&id, "changed my mind").await.unwrap();
    assert_eq!(late_reject.outcome, TransitionOutcome::Ignored);

    let unknown = h.engine.mark_signed("no-such-request").await.unwrap();
    assert_eq!(unknown.outcome, TransitionOutcome::Ignored);
    assert_eq!(unknown.request, None);
}

#[tokio::test]
async fn test_rejection_requires_reason() {
    let h = harness();
    let created = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::external("Kim", "kim@x.com")]))
        .await
        .unwrap();
    let id = created.created[0].id.clone();

    assert!(matches!(
        h.engine.mark_rejected(&id, "   ").await,
        Err(SignatureError::Validation(_))
    ));
    let rejected = h.engine.mark_rejected(&id, "wrong amount").await.unwrap();
    let request = rejected.request.unwrap();
    assert_eq!(request.status, SignatureStatus::Rejected);
    assert_eq!(request.rejection_reason.as_deref(), Some("wrong amount"));
}

#[tokio::test]
async fn test_cancel_terminal_request_fails() {
    let h = harness();
    let created = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::external("Lu", "lu@x.com")]))
        .await
        .unwrap();
    let id = created.created[0].id.clone();
    h.engine.mark_signed(&id).await.unwrap();

    assert_eq!(
        h.engine.cancel(&id).await.unwrap_err(),
        SignatureError::InvalidTransition {
            from: SignatureStatus::Signed,
            to: SignatureStatus::Cancelled,
        }
    );
}

// ============================================================================
// Expiry, Queries and History
// ============================================================================

#[tokio::test]
async fn test_sweep_expires_and_frees_signer() {
    let h = harness();
    let created = h
        .engine
        .create_batch(batch(
            "doc-1",
            vec![
                SignerSpec::external("Mo", "mo@x.com"),
                SignerSpec::external("Ned", "ned@x.com"),
            ],
        ))
        .await
        .unwrap();
    h.engine.mark_signed(&created.created[1].id).await.unwrap();

    let report = h
        .engine
        .sweep_expired(Utc::now() + Duration::days(8))
        .await
        .unwrap();
    assert_eq!(report.expired, 1);

    let stats = h.engine.get_stats("doc-1").await.unwrap();
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.signed, 1);

    let again = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::external("Mo", "mo@x.com")]))
        .await
        .unwrap();
    assert_eq!(again.success, 1);
}

#[tokio::test]
async fn test_list_by_identity() {
    let h = harness();
    h.engine
        .create_batch(batch("doc-1", vec![SignerSpec::client("c-1")]))
        .await
        .unwrap();
    let second = h
        .engine
        .create_batch(batch("doc-2", vec![SignerSpec::client("c-1")]))
        .await
        .unwrap();
    h.engine.mark_signed(&second.created[0].id).await.unwrap();

    let query = IdentityQuery::Client("c-1".to_string());
    assert_eq!(h.engine.list_by_identity(&query, None).await.unwrap().len(), 2);
    let signed = h
        .engine
        .list_by_identity(&query, Some(SignatureStatus::Signed))
        .await
        .unwrap();
    assert_eq!(signed.len(), 1);
    assert_eq!(signed[0].document_id, "doc-2");

    // a client's email does not match an external-signer query
    let by_email = IdentityQuery::Email("ana@acme.com".to_string());
    assert!(h.engine.list_by_identity(&by_email, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_is_a_verifiable_chain() {
    let h = harness();
    let created = h
        .engine
        .create_batch(batch("doc-1", vec![SignerSpec::external("Oz", "oz@x.com")]))
        .await
        .unwrap();
    let id = created.created[0].id.clone();
    h.engine.send(&id).await.unwrap();
    h.engine.mark_viewed(&id).await.unwrap();
    h.engine.mark_rejected(&id, "not mine").await.unwrap();

    let history = h.engine.history(&id).await.unwrap();
    let actions: Vec<SignatureAction> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            SignatureAction::Created,
            SignatureAction::Sent,
            SignatureAction::Viewed,
            SignatureAction::Rejected,
        ]
    );
    assert_eq!(history[3].details.as_deref(), Some("not mine"));
    assert!(verify_chain(&history).is_ok());

    assert!(matches!(
        h.engine.history("nope").await,
        Err(SignatureError::NotFound(_))
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_create_one_active_request() {
    let h = Arc::new(harness());
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.engine
                .create_batch(batch("doc-1", vec![SignerSpec::client("c-1")]))
                .await
                .unwrap()
                .success
        }));
    }

    let mut created = 0;
    for task in tasks {
        created += task.await.unwrap();
    }
    assert_eq!(created, 1);

    let all = h.engine.list_signatures("doc-1").await.unwrap();
    assert_eq!(active_count(&all, &SignerKey::client("c-1")), 1);
}

// ============================================================================
// Property Tests
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Create(Vec<usize>),
    View(usize),
    Sign(usize),
    Cancel(usize),
    Sweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(0usize..4, 1..4).prop_map(Op::Create),
        (0usize..16).prop_map(Op::View),
        (0usize..16).prop_map(Op::Sign),
        (0usize..16).prop_map(Op::Cancel),
        Just(Op::Sweep),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: whatever happens, a signer never has two active requests on one document
    #[test]
    fn prop_at_most_one_active_request_per_signer(ops in prop::collection::vec(op_strategy(), 1..20)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let h = harness();
            let emails: Vec<String> = (0..4).map(|i| format!("p{}@x.com", i)).collect();

            for op in ops {
                let ids: Vec<String> = h
                    .store
                    .list_by_document("doc-1")
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|r| r.id)
                    .collect();
                let pick = |n: usize| ids.get(n % ids.len().max(1)).cloned();

                match op {
                    Op::Create(signers) => {
                        let specs = signers
                            .iter()
                            .map(|&i| SignerSpec::external("P", &emails[i]))
                            .collect();
                        h.engine.create_batch(batch("doc-1", specs)).await.unwrap();
                    }
                    Op::View(n) => {
                        if let Some(id) = pick(n) {
                            h.engine.mark_viewed(&id).await.unwrap();
                        }
                    }
                    Op::Sign(n) => {
                        if let Some(id) = pick(n) {
                            h.engine.mark_signed(&id).await.unwrap();
                        }
                    }
                    Op::Cancel(n) => {
                        if let Some(id) = pick(n) {
                            let _ = h.engine.cancel(&id).await;
                        }
                    }
                    Op::Sweep => {
                        h.engine
                            .sweep_expired(Utc::now() + Duration::days(30))
                            .await
                            .unwrap();
                    }
                }

                let all = h.store.list_by_document("doc-1").await.unwrap();
                for email in &emails {
                    assert!(active_count(&all, &SignerKey::email(email)) <= 1);
                }
            }
        });
    }
}
