//! Tamper-evident history of signature request events
//!
//! Every lifecycle step of a request is appended as a [`SignatureEvent`]
//! whose `previous_hash` links it to the request's prior event. Stores do the
//! linking when they append, so callers only build unlinked events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::state_machine::Transition;
use crate::types::SignatureRequest;

/// Actor recorded for engine-initiated events
pub const ACTOR_SYSTEM: &str = "system";
/// Actor recorded for provider callbacks
pub const ACTOR_PROVIDER: &str = "provider";
/// Actor recorded for the expiration sweep
pub const ACTOR_SWEEPER: &str = "expiration-sweeper";

/// Auditable steps in a request's life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureAction {
    Created,
    Sent,
    Resent,
    Viewed,
    Signed,
    Rejected,
    Expired,
    Cancelled,
}

impl SignatureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAction::Created => "CREATED",
            SignatureAction::Sent => "SENT",
            SignatureAction::Resent => "RESENT",
            SignatureAction::Viewed => "VIEWED",
            SignatureAction::Signed => "SIGNED",
            SignatureAction::Rejected => "REJECTED",
            SignatureAction::Expired => "EXPIRED",
            SignatureAction::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            SignatureAction::Created,
            SignatureAction::Sent,
            SignatureAction::Resent,
            SignatureAction::Viewed,
            SignatureAction::Signed,
            SignatureAction::Rejected,
            SignatureAction::Expired,
            SignatureAction::Cancelled,
        ]
        .into_iter()
        .find(|action| action.as_str() == s)
    }
}

impl From<&Transition> for SignatureAction {
    fn from(transition: &Transition) -> Self {
        match transition {
            Transition::View => SignatureAction::Viewed,
            Transition::Sign => SignatureAction::Signed,
            Transition::Reject { .. } => SignatureAction::Rejected,
            Transition::Expire => SignatureAction::Expired,
            Transition::Cancel => SignatureAction::Cancelled,
        }
    }
}

/// A single audit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureEvent {
    pub event_id: String,
    pub request_id: String,
    pub document_id: String,
    pub action: SignatureAction,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub details: Option<String>,
}

impl SignatureEvent {
    /// Create an unlinked event for `request`
    pub fn new(
        action: SignatureAction,
        request: &SignatureRequest,
        actor: &str,
        details: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            document_id: request.document_id.clone(),
            action,
            actor: actor.to_string(),
            timestamp: Utc::now(),
            previous_hash: None,
            details,
        }
    }

    /// Link this event after `previous` (the request's last event, if any)
    pub fn linked_to(mut self, previous: Option<&SignatureEvent>) -> Self {
        self.previous_hash = previous.map(SignatureEvent::compute_hash);
        self
    }

    /// Hash of this event, used as the next event's `previous_hash`
    ///
    /// Every variable-length field is length-prefixed and optional fields
    /// carry a presence byte, so distinct events never share an encoding.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, &self.event_id);
        hash_field(&mut hasher, &self.request_id);
        hash_field(&mut hasher, &self.document_id);
        hash_field(&mut hasher, self.action.as_str());
        hash_field(&mut hasher, &self.actor);
        hasher.update(self.timestamp.timestamp_micros().to_be_bytes());
        hash_optional(&mut hasher, self.previous_hash.as_deref());
        hash_optional(&mut hasher, self.details.as_deref());
        hex::encode(hasher.finalize())
    }
}

fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn hash_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(value) => {
            hasher.update([1u8]);
            hash_field(hasher, value);
        }
        None => hasher.update([0u8]),
    }
}

/// Verify that each event links to the hash of the one before it
pub fn verify_chain(events: &[SignatureEvent]) -> Result<(), String> {
    let mut expected_prev: Option<String> = None;

    for (i, event) in events.iter().enumerate() {
        if event.previous_hash != expected_prev {
            return Err(format!(
                "Chain broken at event {}: expected prev {:?}, got {:?}",
                i, expected_prev, event.previous_hash
            ));
        }
        expected_prev = Some(event.compute_hash());
    }

    Ok(())
}
