//! Request expiry: derived presentation values and the periodic sweep
//!
//! `days_until_expiration` and `is_expired` are computed at read time and
//! never stored. The sweep is the only code path that moves a request into
//! EXPIRED, and it goes through the state machine like any other transition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::ACTOR_SWEEPER;
use crate::error::{Result, SignatureError};
use crate::state_machine::{Transition, TransitionOutcome};
use crate::store::SignatureStore;
use crate::transition::apply_stored;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// `ceil((expires_at - now) / 1 day)`, or `None` without an expiry
pub fn days_until_expiration(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<i64> {
    expires_at.map(|expires_at| {
        let millis = (expires_at - now).num_milliseconds();
        let whole = millis.div_euclid(MILLIS_PER_DAY);
        if millis.rem_euclid(MILLIS_PER_DAY) == 0 {
            whole
        } else {
            whole + 1
        }
    })
}

/// `days_until_expiration <= 0`; requests without expiry never expire
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    days_until_expiration(expires_at, now).is_some_and(|days| days <= 0)
}

/// Derived expiry fields for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationInfo {
    pub is_expired: bool,
    pub days_until_expiration: Option<i64>,
}

impl ExpirationInfo {
    pub fn at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        Self {
            is_expired: is_expired(expires_at, now),
            days_until_expiration: days_until_expiration(expires_at, now),
        }
    }
}

/// What one sweep run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    /// Candidates that moved on (signed, cancelled, ...) before the sweep's write
    pub skipped: usize,
    pub failed: usize,
    /// The run hit its time budget before examining every candidate
    pub truncated: bool,
}

/// Moves overdue PENDING/VIEWED requests to EXPIRED
pub struct ExpirationEvaluator {
    store: Arc<dyn SignatureStore>,
    batch_limit: usize,
    timeout: Duration,
    retries: u32,
}

impl ExpirationEvaluator {
    pub fn new(
        store: Arc<dyn SignatureStore>,
        batch_limit: usize,
        timeout: Duration,
        retries: u32,
    ) -> Self {
        Self {
            store,
            batch_limit,
            timeout,
            retries,
        }
    }

    /// Run one bounded sweep as of `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let deadline = Instant::now() + self.timeout;
        let candidates = self.store.list_expirable(now, self.batch_limit).await?;
        let mut report = SweepReport::default();

        for candidate in candidates {
            if Instant::now() >= deadline {
                warn!(
                    "Expiration sweep hit its {:?} budget after {} requests",
                    self.timeout, report.examined
                );
                report.truncated = true;
                break;
            }
            report.examined += 1;

            match apply_stored(
                self.store.as_ref(),
                &candidate.id,
                &Transition::Expire,
                ACTOR_SWEEPER,
                now,
                self.retries,
            )
            .await
            {
                Ok((TransitionOutcome::Applied, _)) => {
                    debug!("Expired signature request {}", candidate.id);
                    report.expired += 1;
                }
                Ok(_) => report.skipped += 1,
                // signed or cancelled between listing and the write
                Err(SignatureError::InvalidTransition { .. }) | Err(SignatureError::NotFound(_)) => {
                    report.skipped += 1
                }
                Err(e) => {
                    warn!("Could not expire signature request {}: {}", candidate.id, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Background task running [`ExpirationEvaluator::sweep`] on an interval
pub struct ExpirationSweeper {
    evaluator: Arc<ExpirationEvaluator>,
    interval: Duration,
}

impl ExpirationSweeper {
    pub fn new(evaluator: Arc<ExpirationEvaluator>, interval: Duration) -> Self {
        Self {
            evaluator,
            interval,
        }
    }

    /// Spawn the sweep loop; it stops when `shutdown` turns true or its sender drops
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting expiration sweeper (interval: {:?})", self.interval);
            let mut ticker = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.evaluator.sweep(Utc::now()).await {
                            Ok(report) if report.expired > 0 || report.failed > 0 => {
                                info!(
                                    "Expiration sweep: {} expired, {} skipped, {} failed",
                                    report.expired, report.skipped, report.failed
                                );
                            }
                            Ok(_) => debug!("Expiration sweep: nothing to expire"),
                            Err(e) => error!("Expiration sweep failed, retrying next cycle: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Expiration sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
