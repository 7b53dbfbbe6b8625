//! Signature request data model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SignatureError;
use crate::identity::{ResolvedSigner, SignerContact, SignerIdentity, SignerKey};

/// Lifecycle status of a signature request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    Pending,
    Viewed,
    Signed,
    Rejected,
    Expired,
    Cancelled,
}

/// Statuses that block a new request for the same signer on the same document.
///
/// SIGNED and REJECTED are members: a signer who answered cannot be asked
/// again until the request expires or is cancelled.
pub const ACTIVE_STATUSES: [SignatureStatus; 4] = [
    SignatureStatus::Pending,
    SignatureStatus::Viewed,
    SignatureStatus::Signed,
    SignatureStatus::Rejected,
];

impl SignatureStatus {
    pub const ALL: [SignatureStatus; 6] = [
        SignatureStatus::Pending,
        SignatureStatus::Viewed,
        SignatureStatus::Signed,
        SignatureStatus::Rejected,
        SignatureStatus::Expired,
        SignatureStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::Pending => "PENDING",
            SignatureStatus::Viewed => "VIEWED",
            SignatureStatus::Signed => "SIGNED",
            SignatureStatus::Rejected => "REJECTED",
            SignatureStatus::Expired => "EXPIRED",
            SignatureStatus::Cancelled => "CANCELLED",
        }
    }

    /// Whether this status blocks re-solicitation of the same signer
    pub fn is_active(self) -> bool {
        ACTIVE_STATUSES.contains(&self)
    }

    /// Terminal statuses have no outgoing transitions
    pub fn is_terminal(self) -> bool {
        !matches!(self, SignatureStatus::Pending | SignatureStatus::Viewed)
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureStatus {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignatureStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SignatureError::Validation(format!("unknown signature status: {}", s)))
    }
}

/// One solicitation to one signer for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequest {
    pub id: String,
    pub document_id: String,
    pub signer: SignerIdentity,
    /// Copied at creation time; later directory edits do not apply
    pub contact: SignerContact,
    pub status: SignatureStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub signature_url: Option<String>,
    pub email_sent_at: Option<DateTime<Utc>>,
    pub email_sent_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency counter, bumped by the store on every update
    pub version: i64,
}

impl SignatureRequest {
    /// Build a fresh PENDING request for a resolved signer
    pub fn pending(
        document_id: &str,
        signer: &ResolvedSigner,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            signer: signer.identity.clone(),
            contact: signer.contact.clone(),
            status: SignatureStatus::Pending,
            expires_at,
            viewed_at: None,
            signed_at: None,
            rejected_at: None,
            rejection_reason: None,
            signature_url: None,
            email_sent_at: None,
            email_sent_count: 0,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn signer_key(&self) -> SignerKey {
        SignerKey::for_signer(&self.signer, &self.contact)
    }
}

/// Count-by-status projection over a document's requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureStats {
    pub total: usize,
    pub pending: usize,
    pub viewed: usize,
    pub signed: usize,
    pub rejected: usize,
    pub expired: usize,
    pub cancelled: usize,
}

impl SignatureStats {
    pub fn from_requests<'a>(requests: impl IntoIterator<Item = &'a SignatureRequest>) -> Self {
        let mut stats = Self::default();
        for request in requests {
            stats.record(request.status);
        }
        stats
    }

    fn record(&mut self, status: SignatureStatus) {
        self.total += 1;
        match status {
            SignatureStatus::Pending => self.pending += 1,
            SignatureStatus::Viewed => self.viewed += 1,
            SignatureStatus::Signed => self.signed += 1,
            SignatureStatus::Rejected => self.rejected += 1,
            SignatureStatus::Expired => self.expired += 1,
            SignatureStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// A signer that could not be created or notified
#[derive(Debug, Clone, PartialEq)]
pub struct BatchError {
    /// 1-based position of the signer in the submitted batch
    pub signer: usize,
    pub signer_email: String,
    pub error: SignatureError,
}

/// Itemized outcome of a batch creation call
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub total: usize,
    pub success: usize,
    /// Persisted requests, in submission order
    pub created: Vec<SignatureRequest>,
    pub errors: Vec<BatchError>,
}
