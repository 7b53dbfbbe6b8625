//! HTTP handlers for the e-signature API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use esign_core::{
    validator::{validate_batch_size, validate_expiry},
    verify_chain, BatchError, BatchRequest, SignatureStats, SignerSpec,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::*;
use crate::state::AppState;

/// Health check endpoint; fails when the database is unreachable
pub async fn health(State(state): State<Arc<AppState>>) -> Result<&'static str, ApiError> {
    sqlx::query("SELECT 1").execute(&state.db).await?;
    Ok("OK")
}

/// Create one signature request per signer
pub async fn create_signatures(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    Json(req): Json<CreateSignaturesRequest>,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    let total = req.signers.len();
    // the cap applies to what was submitted, malformed entries included
    validate_batch_size(total, state.engine.config().max_signers_per_batch)?;

    let mut specs: Vec<SignerSpec> = Vec::with_capacity(total);
    // original 1-based position of each entry in `specs`
    let mut positions: Vec<usize> = Vec::with_capacity(total);
    let mut errors: Vec<BatchError> = Vec::new();

    for (index, payload) in req.signers.iter().enumerate() {
        match SignerSpec::try_from(payload) {
            Ok(spec) => {
                specs.push(spec);
                positions.push(index + 1);
            }
            Err(error) => errors.push(BatchError {
                signer: index + 1,
                signer_email: payload.signer_email.clone().unwrap_or_default(),
                error,
            }),
        }
    }

    let now = Utc::now();
    let (created, engine_errors) = if specs.is_empty() {
        // nothing reaches the engine; still report batch-level failures first
        validate_expiry(req.expires_at, now)?;
        state.engine.list_signatures(&document_id).await?;
        (Vec::new(), Vec::new())
    } else {
        let result = state
            .engine
            .create_batch(BatchRequest {
                document_id: document_id.clone(),
                signers: specs,
                expires_at: req.expires_at,
                send_email: req.send_email,
            })
            .await?;
        (result.created, result.errors)
    };

    errors.extend(engine_errors.into_iter().map(|mut e| {
        e.signer = positions.get(e.signer - 1).copied().unwrap_or(e.signer);
        e
    }));
    errors.sort_by_key(|e| e.signer);

    tracing::info!(
        "Signature batch for document {}: {}/{} created",
        document_id,
        created.len(),
        total
    );

    let status = if created.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(BatchResponse {
            total,
            success: created.len(),
            created: SignatureView::list(created, now),
            errors: errors.into_iter().map(SignerErrorView::from).collect(),
        }),
    ))
}

/// List every signature request on a document
pub async fn list_signatures(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<Vec<SignatureView>>, ApiError> {
    let requests = state.engine.list_signatures(&document_id).await?;
    Ok(Json(SignatureView::list(requests, Utc::now())))
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<SignatureStats>, ApiError> {
    Ok(Json(state.engine.get_stats(&document_id).await?))
}

/// Signature requests for one client, user or external email
pub async fn list_by_identity(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignatureQuery>,
) -> Result<Json<Vec<SignatureView>>, ApiError> {
    let identity = query.identity().map_err(ApiError::InvalidRequest)?;
    let status = query.status().map_err(ApiError::InvalidRequest)?;
    let requests = state.engine.list_by_identity(&identity, status).await?;
    Ok(Json(SignatureView::list(requests, Utc::now())))
}

pub async fn get_signature(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SignatureView>, ApiError> {
    let request = state.engine.get_signature(&id).await?;
    Ok(Json(SignatureView::at(request, Utc::now())))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let events = state.engine.history(&id).await?;
    let chain_valid = match verify_chain(&events) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Audit chain for signature request {} is broken: {}", id, e);
            false
        }
    };
    Ok(Json(HistoryResponse {
        request_id: id,
        chain_valid,
        events,
    }))
}

/// First delivery of the signing link
pub async fn send_signature(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DispatchResponse>, ApiError> {
    let receipt = state.engine.send(&id).await?;
    Ok(Json(DispatchResponse {
        signature_url: receipt.signature_url,
        signature: SignatureView::at(receipt.request, Utc::now()),
    }))
}

/// Re-deliver the existing signing link
pub async fn resend_signature(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DispatchResponse>, ApiError> {
    let receipt = state.engine.resend(&id).await?;
    Ok(Json(DispatchResponse {
        signature_url: receipt.signature_url,
        signature: SignatureView::at(receipt.request, Utc::now()),
    }))
}

pub async fn cancel_signature(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SignatureView>, ApiError> {
    let request = state.engine.cancel(&id).await?;
    Ok(Json(SignatureView::at(request, Utc::now())))
}

/// Provider callback. Unknown ids and late events are acknowledged and ignored.
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<WebhookResponse>, ApiError> {
    let report = match payload.event {
        WebhookEvent::Viewed => state.engine.mark_viewed(&payload.request_id).await?,
        WebhookEvent::Signed => state.engine.mark_signed(&payload.request_id).await?,
        WebhookEvent::Rejected => {
            let reason = payload.reason.as_deref().unwrap_or_default();
            state
                .engine
                .mark_rejected(&payload.request_id, reason)
                .await?
        }
    };

    tracing::debug!(
        "Webhook {:?} for {}: {:?}",
        payload.event,
        payload.request_id,
        report.outcome
    );
    Ok(Json(WebhookResponse::new(
        report.outcome,
        report.request.map(|r| r.status),
    )))
}
