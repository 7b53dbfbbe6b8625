//! Collaborators the engine consumes but does not own
//!
//! Directories, the document catalog, and the downstream signing provider
//! live outside this crate. The API layer supplies implementations.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::SignatureRequest;

/// Errors from external collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("provider misconfigured: {0}")]
    Config(String),
}

/// Contact fields held by a directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub tax_id: Option<String>,
}

/// Client and user directories
#[async_trait]
pub trait Directory: Send + Sync {
    async fn resolve_client(&self, client_id: &str)
        -> Result<Option<DirectoryEntry>, ProviderError>;

    /// Users carry no tax id; implementations leave it `None`
    async fn resolve_user(&self, user_id: &str) -> Result<Option<DirectoryEntry>, ProviderError>;
}

/// Document existence check
#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    async fn document_exists(&self, document_id: &str) -> Result<bool, ProviderError>;
}

/// The third-party system that issues signing links and captures signatures
#[async_trait]
pub trait SigningProvider: Send + Sync {
    /// Issue a signing link for the request's document and signer
    async fn provision_signature(&self, request: &SignatureRequest)
        -> Result<String, ProviderError>;

    /// Email the signing link to the request's signer
    async fn deliver_email(
        &self,
        signature_url: &str,
        request: &SignatureRequest,
    ) -> Result<(), ProviderError>;
}
