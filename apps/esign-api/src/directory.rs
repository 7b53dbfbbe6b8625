//! Client/user directory and document catalog over the local database

use async_trait::async_trait;
use esign_core::{Directory, DirectoryEntry, DocumentCatalog, ProviderError};
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
struct ContactRow {
    name: String,
    email: String,
    phone: Option<String>,
    tax_id: Option<String>,
}

impl From<ContactRow> for DirectoryEntry {
    fn from(row: ContactRow) -> Self {
        DirectoryEntry {
            name: row.name,
            email: row.email,
            phone: row.phone,
            tax_id: row.tax_id,
        }
    }
}

fn lookup_failed(e: sqlx::Error) -> ProviderError {
    ProviderError::Request(format!("directory lookup failed: {}", e))
}

pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn resolve_client(
        &self,
        client_id: &str,
    ) -> Result<Option<DirectoryEntry>, ProviderError> {
        let row: Option<ContactRow> =
            sqlx::query_as("SELECT name, email, phone, tax_id FROM clients WHERE id = ?")
                .bind(client_id.trim())
                .fetch_optional(&self.pool)
                .await
                .map_err(lookup_failed)?;
        Ok(row.map(DirectoryEntry::from))
    }

    async fn resolve_user(&self, user_id: &str) -> Result<Option<DirectoryEntry>, ProviderError> {
        let row: Option<ContactRow> =
            sqlx::query_as("SELECT name, email, phone, NULL AS tax_id FROM users WHERE id = ?")
                .bind(user_id.trim())
                .fetch_optional(&self.pool)
                .await
                .map_err(lookup_failed)?;
        Ok(row.map(DirectoryEntry::from))
    }
}

#[async_trait]
impl DocumentCatalog for SqliteDirectory {
    async fn document_exists(&self, document_id: &str) -> Result<bool, ProviderError> {
        let found: Option<(String,)> = sqlx::query_as("SELECT id FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(lookup_failed)?;
        Ok(found.is_some())
    }
}
