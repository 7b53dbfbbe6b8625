//! Data models for the e-signature API
//!
//! Wire shapes are camelCase and keep the flat signer layout
//! (`signerType`, `clientId`, `signerName`, ...) that back-office clients send.

use chrono::{DateTime, Utc};
use esign_core::{
    BatchError, ExpirationInfo, IdentityQuery, SignatureError, SignatureEvent, SignatureRequest,
    SignatureStatus, SignerContact, SignerIdentity, SignerSpec, TransitionOutcome,
};
use serde::{Deserialize, Serialize};

/// One signer in a create request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerPayload {
    pub signer_type: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub signer_name: Option<String>,
    #[serde(default)]
    pub signer_email: Option<String>,
    #[serde(default)]
    pub signer_phone: Option<String>,
    /// Tax document number
    #[serde(default)]
    pub signer_document: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl TryFrom<&SignerPayload> for SignerSpec {
    type Error = SignatureError;

    fn try_from(payload: &SignerPayload) -> Result<Self, Self::Error> {
        let client_id = present(&payload.client_id);
        let user_id = present(&payload.user_id);

        let identity = match payload.signer_type.trim().to_ascii_uppercase().as_str() {
            "CLIENT" => match (client_id, user_id) {
                (Some(id), None) => SignerIdentity::Client {
                    client_id: id.to_string(),
                },
                (None, _) => {
                    return Err(SignatureError::Validation(
                        "clientId is required for CLIENT signers".to_string(),
                    ))
                }
                (Some(_), Some(_)) => {
                    return Err(SignatureError::Validation(
                        "CLIENT signers cannot carry a userId".to_string(),
                    ))
                }
            },
            "USER" => match (user_id, client_id) {
                (Some(id), None) => SignerIdentity::User {
                    user_id: id.to_string(),
                },
                (None, _) => {
                    return Err(SignatureError::Validation(
                        "userId is required for USER signers".to_string(),
                    ))
                }
                (Some(_), Some(_)) => {
                    return Err(SignatureError::Validation(
                        "USER signers cannot carry a clientId".to_string(),
                    ))
                }
            },
            "EXTERNAL" => {
                if client_id.is_some() || user_id.is_some() {
                    return Err(SignatureError::Validation(
                        "EXTERNAL signers cannot carry a clientId or userId".to_string(),
                    ));
                }
                SignerIdentity::External
            }
            other => {
                return Err(SignatureError::Validation(format!(
                    "unknown signerType: {}",
                    other
                )))
            }
        };

        Ok(SignerSpec {
            identity,
            contact: SignerContact {
                name: payload.signer_name.clone().unwrap_or_default(),
                email: payload.signer_email.clone().unwrap_or_default(),
                phone: payload.signer_phone.clone(),
                tax_id: payload.signer_document.clone(),
            },
        })
    }
}

/// Body of `POST /api/documents/:document_id/signatures`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignaturesRequest {
    pub signers: Vec<SignerPayload>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub send_email: bool,
}

/// A signature request with derived expiry fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureView {
    pub id: String,
    pub document_id: String,
    pub signer_type: String,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub signer_name: String,
    pub signer_email: String,
    pub signer_phone: Option<String>,
    pub signer_document: Option<String>,
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
    pub is_expired: bool,
    pub days_until_expiration: Option<i64>,
}

impl SignatureView {
    pub fn at(request: SignatureRequest, now: DateTime<Utc>) -> Self {
        let expiry = ExpirationInfo::at(request.expires_at, now);
        let (client_id, user_id) = match &request.signer {
            SignerIdentity::Client { client_id } => (Some(client_id.clone()), None),
            SignerIdentity::User { user_id } => (None, Some(user_id.clone())),
            SignerIdentity::External => (None, None),
        };

        Self {
            signer_type: request.signer.kind().to_string(),
            client_id,
            user_id,
            id: request.id,
            document_id: request.document_id,
            signer_name: request.contact.name,
            signer_email: request.contact.email,
            signer_phone: request.contact.phone,
            signer_document: request.contact.tax_id,
            status: request.status,
            expires_at: request.expires_at,
            viewed_at: request.viewed_at,
            signed_at: request.signed_at,
            rejected_at: request.rejected_at,
            rejection_reason: request.rejection_reason,
            signature_url: request.signature_url,
            email_sent_at: request.email_sent_at,
            email_sent_count: request.email_sent_count,
            created_at: request.created_at,
            updated_at: request.updated_at,
            is_expired: expiry.is_expired,
            days_until_expiration: expiry.days_until_expiration,
        }
    }

    pub fn list(requests: Vec<SignatureRequest>, now: DateTime<Utc>) -> Vec<Self> {
        requests.into_iter().map(|r| Self::at(r, now)).collect()
    }
}

/// A per-signer failure inside a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerErrorView {
    /// 1-based position in the submitted list
    pub signer: usize,
    pub signer_email: String,
    pub error: String,
    pub code: String,
}

impl From<BatchError> for SignerErrorView {
    fn from(e: BatchError) -> Self {
        Self {
            signer: e.signer,
            signer_email: e.signer_email,
            code: e.error.code().to_string(),
            error: e.error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub total: usize,
    pub success: usize,
    pub created: Vec<SignatureView>,
    pub errors: Vec<SignerErrorView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub signature_url: String,
    pub signature: SignatureView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub request_id: String,
    pub chain_valid: bool,
    pub events: Vec<SignatureEvent>,
}

/// Query string of `GET /api/signatures`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureQuery {
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub status: Option<String>,
}

impl SignatureQuery {
    /// Exactly one of clientId, userId or email must be given
    pub fn identity(&self) -> Result<IdentityQuery, String> {
        match (
            present(&self.client_id),
            present(&self.user_id),
            present(&self.email),
        ) {
            (Some(id), None, None) => Ok(IdentityQuery::Client(id.to_string())),
            (None, Some(id), None) => Ok(IdentityQuery::User(id.to_string())),
            (None, None, Some(email)) => Ok(IdentityQuery::Email(email.to_string())),
            _ => Err("exactly one of clientId, userId or email is required".to_string()),
        }
    }

    pub fn status(&self) -> Result<Option<SignatureStatus>, String> {
        present(&self.status)
            .map(|s| s.parse::<SignatureStatus>().map_err(|e| e.to_string()))
            .transpose()
    }
}

/// Provider callback event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookEvent {
    Viewed,
    Signed,
    Rejected,
}

/// Body of `POST /api/webhooks/provider`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub request_id: String,
    pub event: WebhookEvent,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub outcome: String,
    pub status: Option<SignatureStatus>,
}

impl WebhookResponse {
    pub fn new(outcome: TransitionOutcome, status: Option<SignatureStatus>) -> Self {
        let outcome = match outcome {
            TransitionOutcome::Applied => "applied",
            TransitionOutcome::Unchanged => "unchanged",
            TransitionOutcome::Ignored => "ignored",
        };
        Self {
            outcome: outcome.to_string(),
            status,
        }
    }
}
