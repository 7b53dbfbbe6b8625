//! Application state for the e-signature API

use anyhow::Result;
use esign_core::{SignatureEngine, SigningProvider, ACTIVE_STATUSES};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ApiConfig;
use crate::directory::SqliteDirectory;
use crate::provider::HostedSigningProvider;
use crate::store::SqliteStore;

pub struct AppState {
    pub db: SqlitePool,
    pub engine: SignatureEngine,
}

impl AppState {
    pub async fn new(config: &ApiConfig) -> Result<Self> {
        // Get database path from config or use default
        let db_path = config.database_url.clone().unwrap_or_else(|| {
            let data_dir = dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("esign-api");
            std::fs::create_dir_all(&data_dir).ok();
            format!("sqlite:{}/esign.db?mode=rwc", data_dir.display())
        });

        tracing::info!("Connecting to database: {}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_path)
            .await?;

        run_migrations(&pool).await?;

        let provider = Arc::new(HostedSigningProvider::from_config(config)?);
        Ok(Self::with_provider(pool, provider, config))
    }

    /// Build state over an already-migrated pool
    pub fn with_provider(
        pool: SqlitePool,
        provider: Arc<dyn SigningProvider>,
        config: &ApiConfig,
    ) -> Self {
        let directory = Arc::new(SqliteDirectory::new(pool.clone()));
        let engine = SignatureEngine::new(
            Arc::new(SqliteStore::new(pool.clone())),
            directory.clone(),
            directory,
            provider,
            config.engine.clone(),
        );
        Self { db: pool, engine }
    }
}

/// `'PENDING', 'VIEWED', ...` for SQL `IN` clauses
pub(crate) fn active_status_list() -> String {
    ACTIVE_STATUSES
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            tax_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signature_requests (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            signer_kind TEXT NOT NULL,
            client_id TEXT,
            user_id TEXT,
            signer_key TEXT NOT NULL,
            signer_name TEXT NOT NULL,
            signer_email TEXT NOT NULL,
            signer_phone TEXT,
            signer_tax_id TEXT,
            status TEXT NOT NULL,
            expires_at TEXT,
            viewed_at TEXT,
            signed_at TEXT,
            rejected_at TEXT,
            rejection_reason TEXT,
            signature_url TEXT,
            email_sent_at TEXT,
            email_sent_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one active request per signer and document
    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_signature_requests_active \
         ON signature_requests(document_id, signer_key) WHERE status IN ({})",
        active_status_list()
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_signature_requests_document ON signature_requests(document_id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_signature_requests_signer ON signature_requests(signer_key, status)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_signature_requests_expiry ON signature_requests(status, expires_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signature_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT NOT NULL UNIQUE,
            request_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            previous_hash TEXT,
            details TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_signature_events_request ON signature_events(request_id, seq)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Migrations complete");
    Ok(())
}

/// Get platform-specific data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}
