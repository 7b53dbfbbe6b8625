//! SQLite-backed signature store
//!
//! Active uniqueness is enforced by the partial unique index created in
//! [`crate::state::run_migrations`]; optimistic concurrency by
//! `UPDATE ... WHERE id = ? AND version = ?`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use esign_core::{
    SignatureAction, SignatureEvent, SignatureRequest, SignatureStatus, SignatureStore,
    SignerContact, SignerIdentity, SignerKey, StoreError,
};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use tokio::sync::Mutex;

const REQUEST_COLUMNS: &str = "id, document_id, signer_kind, client_id, user_id, signer_key, \
     signer_name, signer_email, signer_phone, signer_tax_id, status, expires_at, viewed_at, \
     signed_at, rejected_at, rejection_reason, signature_url, email_sent_at, email_sent_count, \
     created_at, updated_at, version";

/// Fixed-width UTC timestamps so TEXT comparison orders chronologically
pub(crate) fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Signature request row as stored
#[derive(Debug, Clone, FromRow)]
struct SignatureRow {
    id: String,
    document_id: String,
    signer_kind: String,
    client_id: Option<String>,
    user_id: Option<String>,
    signer_key: String,
    signer_name: String,
    signer_email: String,
    signer_phone: Option<String>,
    signer_tax_id: Option<String>,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    viewed_at: Option<DateTime<Utc>>,
    signed_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    signature_url: Option<String>,
    email_sent_at: Option<DateTime<Utc>>,
    email_sent_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<SignatureRow> for SignatureRequest {
    type Error = StoreError;

    fn try_from(row: SignatureRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| {
            StoreError::Backend(format!("signature request {} has {}", row.id, what))
        };

        let signer = match row.signer_kind.as_str() {
            "CLIENT" => SignerIdentity::Client {
                client_id: row.client_id.clone().ok_or_else(|| corrupt("no client_id"))?,
            },
            "USER" => SignerIdentity::User {
                user_id: row.user_id.clone().ok_or_else(|| corrupt("no user_id"))?,
            },
            "EXTERNAL" => SignerIdentity::External,
            other => return Err(corrupt(&format!("unknown signer kind {}", other))),
        };
        let status: SignatureStatus = row
            .status
            .parse()
            .map_err(|_| corrupt(&format!("unknown status {}", row.status)))?;

        let request = SignatureRequest {
            id: row.id,
            document_id: row.document_id,
            signer,
            contact: SignerContact {
                name: row.signer_name,
                email: row.signer_email,
                phone: row.signer_phone,
                tax_id: row.signer_tax_id,
            },
            status,
            expires_at: row.expires_at,
            viewed_at: row.viewed_at,
            signed_at: row.signed_at,
            rejected_at: row.rejected_at,
            rejection_reason: row.rejection_reason,
            signature_url: row.signature_url,
            email_sent_at: row.email_sent_at,
            email_sent_count: u32::try_from(row.email_sent_count).unwrap_or(0),
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        };

        if request.signer_key().as_str() != row.signer_key {
            tracing::warn!(
                "Signature request {} stored key {} differs from derived key {}",
                request.id,
                row.signer_key,
                request.signer_key()
            );
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, FromRow)]
struct EventRow {
    event_id: String,
    request_id: String,
    document_id: String,
    action: String,
    actor: String,
    timestamp: DateTime<Utc>,
    previous_hash: Option<String>,
    details: Option<String>,
}

impl TryFrom<EventRow> for SignatureEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let action = SignatureAction::parse(&row.action).ok_or_else(|| {
            StoreError::Backend(format!("event {} has unknown action {}", row.event_id, row.action))
        })?;
        Ok(SignatureEvent {
            event_id: row.event_id,
            request_id: row.request_id,
            document_id: row.document_id,
            action,
            actor: row.actor,
            timestamp: row.timestamp,
            previous_hash: row.previous_hash,
            details: row.details,
        })
    }
}

fn to_requests(rows: Vec<SignatureRow>) -> Result<Vec<SignatureRequest>, StoreError> {
    rows.into_iter().map(SignatureRequest::try_from).collect()
}

pub struct SqliteStore {
    pool: SqlitePool,
    /// Serializes event appends so each request's chain stays linear
    event_lock: Mutex<()>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            event_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SignatureStore for SqliteStore {
    async fn insert(&self, request: &SignatureRequest) -> Result<(), StoreError> {
        let (client_id, user_id) = match &request.signer {
            SignerIdentity::Client { client_id } => (Some(client_id.as_str()), None),
            SignerIdentity::User { user_id } => (None, Some(user_id.as_str())),
            SignerIdentity::External => (None, None),
        };
        let signer_key = request.signer_key();

        let result = sqlx::query(&format!(
            "INSERT INTO signature_requests ({}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            REQUEST_COLUMNS
        ))
        .bind(&request.id)
        .bind(&request.document_id)
        .bind(request.signer.kind())
        .bind(client_id)
        .bind(user_id)
        .bind(signer_key.as_str())
        .bind(&request.contact.name)
        .bind(&request.contact.email)
        .bind(&request.contact.phone)
        .bind(&request.contact.tax_id)
        .bind(request.status.as_str())
        .bind(request.expires_at.map(ts))
        .bind(request.viewed_at.map(ts))
        .bind(request.signed_at.map(ts))
        .bind(request.rejected_at.map(ts))
        .bind(&request.rejection_reason)
        .bind(&request.signature_url)
        .bind(request.email_sent_at.map(ts))
        .bind(i64::from(request.email_sent_count))
        .bind(ts(request.created_at))
        .bind(ts(request.updated_at))
        .bind(request.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db))
                if db.is_unique_violation() && db.message().contains("signer_key") =>
            {
                Err(StoreError::DuplicateActive {
                    document_id: request.document_id.clone(),
                    signer_key: signer_key.to_string(),
                })
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<SignatureRequest>, StoreError> {
        let row: Option<SignatureRow> = sqlx::query_as(&format!(
            "SELECT {} FROM signature_requests WHERE id = ?",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(SignatureRequest::try_from).transpose()
    }

    async fn update(
        &self,
        request: &SignatureRequest,
        expected_version: i64,
    ) -> Result<SignatureRequest, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE signature_requests
            SET status = ?, viewed_at = ?, signed_at = ?, rejected_at = ?, rejection_reason = ?,
                signature_url = ?, email_sent_at = ?, email_sent_count = ?, updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(request.status.as_str())
        .bind(request.viewed_at.map(ts))
        .bind(request.signed_at.map(ts))
        .bind(request.rejected_at.map(ts))
        .bind(&request.rejection_reason)
        .bind(&request.signature_url)
        .bind(request.email_sent_at.map(ts))
        .bind(i64::from(request.email_sent_count))
        .bind(ts(request.updated_at))
        .bind(&request.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return match self.get(&request.id).await? {
                Some(_) => Err(StoreError::StaleVersion {
                    id: request.id.clone(),
                    expected: expected_version,
                }),
                None => Err(StoreError::NotFound(request.id.clone())),
            };
        }

        let mut stored = request.clone();
        stored.version = expected_version + 1;
        Ok(stored)
    }

    async fn list_by_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<SignatureRequest>, StoreError> {
        let rows: Vec<SignatureRow> = sqlx::query_as(&format!(
            "SELECT {} FROM signature_requests WHERE document_id = ? ORDER BY created_at, rowid",
            REQUEST_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        to_requests(rows)
    }

    async fn find_active(
        &self,
        document_id: &str,
        signer_key: &SignerKey,
    ) -> Result<Option<SignatureRequest>, StoreError> {
        let row: Option<SignatureRow> = sqlx::query_as(&format!(
            "SELECT {} FROM signature_requests \
             WHERE document_id = ? AND signer_key = ? AND status IN ({}) LIMIT 1",
            REQUEST_COLUMNS,
            crate::state::active_status_list()
        ))
        .bind(document_id)
        .bind(signer_key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(SignatureRequest::try_from).transpose()
    }

    async fn count_active(&self, document_id: &str) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM signature_requests WHERE document_id = ? AND status IN ({})",
            crate::state::active_status_list()
        ))
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn list_by_signer(
        &self,
        signer_key: &SignerKey,
        status: Option<SignatureStatus>,
    ) -> Result<Vec<SignatureRequest>, StoreError> {
        let status = status.map(|s| s.as_str());
        let rows: Vec<SignatureRow> = sqlx::query_as(&format!(
            "SELECT {} FROM signature_requests \
             WHERE signer_key = ? AND (? IS NULL OR status = ?) ORDER BY created_at, rowid",
            REQUEST_COLUMNS
        ))
        .bind(signer_key.as_str())
        .bind(status)
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        to_requests(rows)
    }

    async fn list_expirable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SignatureRequest>, StoreError> {
        let rows: Vec<SignatureRow> = sqlx::query_as(&format!(
            "SELECT {} FROM signature_requests \
             WHERE status IN ('PENDING', 'VIEWED') AND expires_at IS NOT NULL AND expires_at < ? \
             ORDER BY expires_at LIMIT ?",
            REQUEST_COLUMNS
        ))
        .bind(ts(now))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        to_requests(rows)
    }

    async fn append_event(&self, event: SignatureEvent) -> Result<SignatureEvent, StoreError> {
        let _guard = self.event_lock.lock().await;

        let last: Option<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, request_id, document_id, action, actor, timestamp, previous_hash, details
            FROM signature_events
            WHERE request_id = ?
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(&event.request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let last = last.map(SignatureEvent::try_from).transpose()?;

        let linked = event.linked_to(last.as_ref());
        sqlx::query(
            r#"
            INSERT INTO signature_events
                (event_id, request_id, document_id, action, actor, timestamp, previous_hash, details)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&linked.event_id)
        .bind(&linked.request_id)
        .bind(&linked.document_id)
        .bind(linked.action.as_str())
        .bind(&linked.actor)
        .bind(ts(linked.timestamp))
        .bind(&linked.previous_hash)
        .bind(&linked.details)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(linked)
    }

    async fn list_events(&self, request_id: &str) -> Result<Vec<SignatureEvent>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT event_id, request_id, document_id, action, actor, timestamp, previous_hash, details
            FROM signature_events
            WHERE request_id = ?
            ORDER BY seq
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(SignatureEvent::try_from).collect()
    }
}
