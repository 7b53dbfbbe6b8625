//! Error types for the signature workflow engine

use thiserror::Error;

use crate::store::StoreError;
use crate::types::SignatureStatus;

/// Errors surfaced by engine operations.
///
/// Batch creation reports most of these per signer inside
/// [`BatchResult`](crate::types::BatchResult); only batch-level
/// preconditions fail the whole call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignatureError {
    /// Malformed signer, bad email, missing rejection reason
    #[error("{0}")]
    Validation(String),

    /// Duplicate active request, duplicate signer in batch, signer limit
    #[error("{0}")]
    Conflict(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SignatureStatus,
        to: SignatureStatus,
    },

    #[error("signature request {0} was already sent, use resend")]
    AlreadySent(String),

    #[error("signature request cannot be sent while {0}")]
    NotSendable(SignatureStatus),

    #[error("signature request cannot be resent while {0}")]
    NotResendable(SignatureStatus),

    #[error("signature request {0} has not been sent yet")]
    NotYetSent(String),

    #[error("signing provider error: {0}")]
    DownstreamProvider(String),

    /// Batch-level precondition; nothing was persisted
    #[error("{0}")]
    Precondition(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("signature request not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SignatureError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            SignatureError::Validation(_) => "VALIDATION_ERROR",
            SignatureError::Conflict(_) => "CONFLICT",
            SignatureError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SignatureError::AlreadySent(_) => "ALREADY_SENT",
            SignatureError::NotSendable(_) => "NOT_SENDABLE",
            SignatureError::NotResendable(_) => "NOT_RESENDABLE",
            SignatureError::NotYetSent(_) => "NOT_YET_SENT",
            SignatureError::DownstreamProvider(_) => "DOWNSTREAM_PROVIDER_ERROR",
            SignatureError::Precondition(_) => "PRECONDITION_FAILED",
            SignatureError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            SignatureError::NotFound(_) => "NOT_FOUND",
            SignatureError::Store(_) => "STORE_ERROR",
        }
    }
}

pub type Result<T, E = SignatureError> = std::result::Result<T, E>;
