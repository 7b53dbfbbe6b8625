//! Signature request workflow core
//!
//! This crate owns the lifecycle of e-signature requests: who must sign which
//! document, where each request is in its lifecycle, and which requests may
//! coexist. Storage, directories and the downstream signing provider are
//! abstracted behind traits so the API server can plug in SQLite and HTTP.
//!
//! ```text
//! create_batch ─▶ IdentityResolver ─▶ ConflictValidator ─▶ SignatureStore
//!                                                     └──▶ NotificationDispatcher ─▶ SigningProvider
//! provider callbacks ─▶ state_machine ─▶ SignatureStore (compare-and-swap)
//! ExpirationSweeper ─▶ ExpirationEvaluator ─▶ state_machine
//! ```

pub mod audit;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod expiration;
pub mod external;
pub mod identity;
pub mod state_machine;
pub mod store;
mod transition;
pub mod types;
pub mod validator;

pub use audit::{verify_chain, SignatureAction, SignatureEvent};
pub use batch::{BatchOrchestrator, BatchRequest};
pub use config::EngineConfig;
pub use dispatch::{is_resendable, DispatchReceipt, NotificationDispatcher};
pub use engine::{SignatureEngine, TransitionReport};
pub use error::{Result, SignatureError};
pub use expiration::{
    days_until_expiration, is_expired, ExpirationEvaluator, ExpirationInfo, ExpirationSweeper,
    SweepReport,
};
pub use external::{Directory, DirectoryEntry, DocumentCatalog, ProviderError, SigningProvider};
pub use identity::{
    normalize_email, IdentityQuery, IdentityResolver, ResolvedSigner, SignerContact,
    SignerIdentity, SignerKey, SignerSpec,
};
pub use state_machine::{Transition, TransitionOutcome};
pub use store::{MemoryStore, SignatureStore, StoreError};
pub use types::{
    BatchError, BatchResult, SignatureRequest, SignatureStats, SignatureStatus, ACTIVE_STATUSES,
};
pub use validator::ConflictValidator;
