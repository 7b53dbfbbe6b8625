//! Applying state machine transitions to stored requests
//!
//! Reads the current record, runs the pure state machine on a copy, and
//! writes it back with compare-and-swap. A stale version means someone else
//! moved the request first; the loop re-reads and re-evaluates, so a
//! transition that raced a terminal one ends up as `InvalidTransition` or
//! `Unchanged` instead of overwriting it.

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::audit::{SignatureAction, SignatureEvent};
use crate::error::{Result, SignatureError};
use crate::state_machine::{self, Transition, TransitionOutcome};
use crate::store::{SignatureStore, StoreError};
use crate::types::SignatureRequest;

pub(crate) async fn apply_stored(
    store: &dyn SignatureStore,
    id: &str,
    transition: &Transition,
    actor: &str,
    now: DateTime<Utc>,
    retries: u32,
) -> Result<(TransitionOutcome, SignatureRequest)> {
    for attempt in 0..=retries {
        let current = store
            .get(id)
            .await?
            .ok_or_else(|| SignatureError::NotFound(id.to_string()))?;

        let mut next = current.clone();
        let outcome = state_machine::apply(&mut next, transition, now)?;
        if outcome != TransitionOutcome::Applied {
            return Ok((outcome, current));
        }

        match store.update(&next, current.version).await {
            Ok(stored) => {
                let details = match transition {
                    Transition::Reject { .. } => stored.rejection_reason.clone(),
                    _ => None,
                };
                record_event(
                    store,
                    SignatureEvent::new(SignatureAction::from(transition), &stored, actor, details),
                )
                .await;
                return Ok((outcome, stored));
            }
            Err(StoreError::StaleVersion { .. }) => {
                debug!(
                    "Signature request {} changed during {:?} (attempt {}), retrying",
                    id, transition, attempt
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(SignatureError::Conflict(format!(
        "signature request {} is being modified concurrently",
        id
    )))
}

/// Append an audit event; failures are logged, never propagated
pub(crate) async fn record_event(store: &dyn SignatureStore, event: SignatureEvent) {
    let request_id = event.request_id.clone();
    let action = event.action;
    if let Err(e) = store.append_event(event).await {
        error!(
            "Failed to record {:?} event for signature request {}: {}",
            action, request_id, e
        );
    }
}
