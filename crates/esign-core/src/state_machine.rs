//! Status transitions for a single signature request
//!
//! ```text
//! PENDING ──view──▶ VIEWED
//!    │                 │
//!    ├── sign ─────────┼──▶ SIGNED
//!    ├── reject ───────┼──▶ REJECTED
//!    ├── expire ───────┼──▶ EXPIRED
//!    └── cancel ───────┴──▶ CANCELLED
//! ```
//!
//! Pure: the only side effect is timestamp stamping on the request passed in.

use chrono::{DateTime, Utc};

use crate::error::{Result, SignatureError};
use crate::types::{SignatureRequest, SignatureStatus};

/// A requested status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Signer opened the link
    View,
    Sign,
    Reject { reason: String },
    /// Only the expiration evaluator emits this
    Expire,
    /// Administrative withdrawal
    Cancel,
}

impl Transition {
    pub fn target(&self) -> SignatureStatus {
        match self {
            Transition::View => SignatureStatus::Viewed,
            Transition::Sign => SignatureStatus::Signed,
            Transition::Reject { .. } => SignatureStatus::Rejected,
            Transition::Expire => SignatureStatus::Expired,
            Transition::Cancel => SignatureStatus::Cancelled,
        }
    }
}

/// What applying a transition did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The request was already in the target status
    Unchanged,
    /// A provider callback for an unknown request or a terminal status
    Ignored,
}

/// Apply `transition` to `request` at time `now`.
///
/// Re-applying the transition that produced the current status is
/// `Unchanged`. Anything else outside the transition table fails with
/// [`SignatureError::InvalidTransition`].
pub fn apply(
    request: &mut SignatureRequest,
    transition: &Transition,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome> {
    let from = request.status;
    let to = transition.target();

    if from == to {
        return Ok(TransitionOutcome::Unchanged);
    }
    if from.is_terminal() {
        return Err(SignatureError::InvalidTransition { from, to });
    }

    let stamp = forward_stamp(request, now);
    match transition {
        Transition::View => {
            // only PENDING reaches here
            request.viewed_at.get_or_insert(stamp);
        }
        Transition::Sign => {
            request.signed_at = Some(stamp);
        }
        Transition::Reject { reason } => {
            let reason = reason.trim();
            if reason.is_empty() {
                return Err(SignatureError::Validation(
                    "rejection reason is required".to_string(),
                ));
            }
            request.rejected_at = Some(stamp);
            request.rejection_reason = Some(reason.to_string());
        }
        Transition::Expire => match request.expires_at {
            Some(expires_at) if now > expires_at => {}
            Some(_) => {
                return Err(SignatureError::Precondition(format!(
                    "signature request {} has not reached its expiry",
                    request.id
                )))
            }
            None => {
                return Err(SignatureError::Precondition(format!(
                    "signature request {} has no expiry",
                    request.id
                )))
            }
        },
        Transition::Cancel => {}
    }

    request.status = to;
    request.updated_at = stamp.max(request.updated_at);
    Ok(TransitionOutcome::Applied)
}

/// `now`, clamped so lifecycle stamps never move backwards
fn forward_stamp(request: &SignatureRequest, now: DateTime<Utc>) -> DateTime<Utc> {
    [request.viewed_at, request.signed_at, request.rejected_at]
        .into_iter()
        .flatten()
        .fold(now.max(request.created_at), std::cmp::max)
}
