//! Conflict validation for batch signers
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. structure: name and email present, email well formed
//! 2. the signer duplicates another signer of the same batch
//! 3. the store already holds an active request for the signer
//!
//! The batch-level checks live in [`validate_batch_size`] and
//! [`validate_expiry`] and run once, before any signer is looked at.

use chrono::{DateTime, Utc};
use email_address::EmailAddress;

use crate::error::{Result, SignatureError};
use crate::identity::{ResolvedSigner, SignerContact, SignerKey};
use crate::store::SignatureStore;

/// Message for signers that appear more than once in a batch
pub const DUPLICATE_IN_BATCH: &str = "duplicate signer in request";

/// Validate email format (RFC 5322 shape)
pub fn is_valid_email(email: &str) -> bool {
    EmailAddress::is_valid(email.trim())
}

/// Structural checks on a resolved signer's contact fields
pub fn validate_contact(contact: &SignerContact) -> Result<()> {
    if contact.name.trim().is_empty() {
        return Err(SignatureError::Validation(
            "signer name is required".to_string(),
        ));
    }
    if contact.email.trim().is_empty() {
        return Err(SignatureError::Validation(
            "signer email is required".to_string(),
        ));
    }
    if !is_valid_email(&contact.email) {
        return Err(SignatureError::Validation(format!(
            "invalid signer email: {}",
            contact.email
        )));
    }
    Ok(())
}

/// Submitted signer count must be non-zero and within the configured cap
pub fn validate_batch_size(count: usize, max: Option<usize>) -> Result<()> {
    if count == 0 {
        return Err(SignatureError::Precondition(
            "at least one signer is required".to_string(),
        ));
    }
    match max {
        Some(max) if count > max => Err(SignatureError::Precondition(format!(
            "at most {} signers may be requested at once",
            max
        ))),
        _ => Ok(()),
    }
}

/// A batch-wide expiry must lie strictly in the future
pub fn validate_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<()> {
    match expires_at {
        Some(expires_at) if expires_at <= now => Err(SignatureError::Precondition(format!(
            "expiresAt must be in the future (got {})",
            expires_at.to_rfc3339()
        ))),
        _ => Ok(()),
    }
}

/// Message naming the signer that holds the active request
pub fn active_conflict_message(existing_name: &str) -> String {
    format!("active signature already exists for {}", existing_name)
}

pub struct ConflictValidator<'a> {
    store: &'a dyn SignatureStore,
}

impl<'a> ConflictValidator<'a> {
    pub fn new(store: &'a dyn SignatureStore) -> Self {
        Self { store }
    }

    /// Validate one signer against its batch siblings and the store.
    ///
    /// `siblings` holds the keys of every other signer in the batch.
    pub async fn validate(
        &self,
        document_id: &str,
        signer: &ResolvedSigner,
        siblings: &[SignerKey],
    ) -> Result<()> {
        validate_contact(&signer.contact)?;

        if siblings.contains(&signer.key) {
            return Err(SignatureError::Conflict(DUPLICATE_IN_BATCH.to_string()));
        }

        if let Some(existing) = self.store.find_active(document_id, &signer.key).await? {
            return Err(SignatureError::Conflict(active_conflict_message(
                &existing.contact.name,
            )));
        }

        Ok(())
    }
}
