//! E-signature API server
//!
//! REST endpoints over the signature request engine:
//! - Batch creation and listing of signature requests per document
//! - Sending and resending signing links
//! - Provider callbacks (viewed, signed, rejected)
//! - Cross-document lookup by client, user or email

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub mod config;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod models;
pub mod provider;
pub mod state;
pub mod store;

use state::AppState;

/// Build the router without middleware layers
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Per-document endpoints
        .route(
            "/api/documents/:document_id/signatures",
            post(handlers::create_signatures).get(handlers::list_signatures),
        )
        .route(
            "/api/documents/:document_id/signatures/stats",
            get(handlers::get_stats),
        )
        // Per-request endpoints
        .route("/api/signatures", get(handlers::list_by_identity))
        .route("/api/signatures/:id", get(handlers::get_signature))
        .route("/api/signatures/:id/history", get(handlers::get_history))
        .route("/api/signatures/:id/send", post(handlers::send_signature))
        .route("/api/signatures/:id/resend", post(handlers::resend_signature))
        .route("/api/signatures/:id/cancel", post(handlers::cancel_signature))
        // Provider callbacks
        .route("/api/webhooks/provider", post(handlers::provider_webhook))
        .with_state(state)
}
