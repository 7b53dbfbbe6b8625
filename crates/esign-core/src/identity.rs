//! Signer identities and directory resolution
//!
//! A signer is one of three kinds: a system client, a system user, or an
//! external party known only by contact details. Duplicate detection works on
//! the [`SignerKey`] derived from the kind:
//!
//! - clients compare by `client_id`
//! - users compare by `user_id`
//! - external parties compare by trimmed, lower-cased email
//!
//! Keys of different kinds never compare equal, even when emails coincide.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignatureError};
use crate::external::Directory;

/// Which directory (if any) owns the signer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignerIdentity {
    Client {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    User {
        #[serde(rename = "userId")]
        user_id: String,
    },
    External,
}

impl SignerIdentity {
    pub fn kind(&self) -> &'static str {
        match self {
            SignerIdentity::Client { .. } => "CLIENT",
            SignerIdentity::User { .. } => "USER",
            SignerIdentity::External => "EXTERNAL",
        }
    }
}

/// Display and delivery fields stored on every request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    /// Document number (CPF/CNPJ, SSN, ...)
    pub tax_id: Option<String>,
}

impl SignerContact {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            phone: None,
            tax_id: None,
        }
    }
}

/// Trim and lower-case an email for identity comparison
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Identity key used for duplicate detection and store indexing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerKey(String);

impl SignerKey {
    pub fn client(client_id: &str) -> Self {
        Self(format!("client:{}", client_id.trim()))
    }

    pub fn user(user_id: &str) -> Self {
        Self(format!("user:{}", user_id.trim()))
    }

    pub fn email(email: &str) -> Self {
        Self(format!("email:{}", normalize_email(email)))
    }

    pub fn for_signer(identity: &SignerIdentity, contact: &SignerContact) -> Self {
        match identity {
            SignerIdentity::Client { client_id } => Self::client(client_id),
            SignerIdentity::User { user_id } => Self::user(user_id),
            SignerIdentity::External => Self::email(&contact.email),
        }
    }

    /// Rebuild a key read back from storage
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lookup key for `list_by_identity`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityQuery {
    Client(String),
    User(String),
    Email(String),
}

impl IdentityQuery {
    pub fn key(&self) -> SignerKey {
        match self {
            IdentityQuery::Client(id) => SignerKey::client(id),
            IdentityQuery::User(id) => SignerKey::user(id),
            IdentityQuery::Email(email) => SignerKey::email(email),
        }
    }
}

/// A signer as submitted in a batch.
///
/// For external signers `contact` is the identity. For clients and users it
/// only fills fields the directory leaves blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerSpec {
    pub identity: SignerIdentity,
    #[serde(default)]
    pub contact: SignerContact,
}

impl SignerSpec {
    pub fn client(client_id: &str) -> Self {
        Self {
            identity: SignerIdentity::Client {
                client_id: client_id.to_string(),
            },
            contact: SignerContact::default(),
        }
    }

    pub fn user(user_id: &str) -> Self {
        Self {
            identity: SignerIdentity::User {
                user_id: user_id.to_string(),
            },
            contact: SignerContact::default(),
        }
    }

    pub fn external(name: &str, email: &str) -> Self {
        Self {
            identity: SignerIdentity::External,
            contact: SignerContact::new(name, email),
        }
    }

    pub fn with_contact(mut self, contact: SignerContact) -> Self {
        self.contact = contact;
        self
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.contact.phone = Some(phone.to_string());
        self
    }

    pub fn with_tax_id(mut self, tax_id: &str) -> Self {
        self.contact.tax_id = Some(tax_id.to_string());
        self
    }
}

/// A signer whose contact fields are final and whose key is computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSigner {
    pub identity: SignerIdentity,
    pub contact: SignerContact,
    pub key: SignerKey,
}

impl ResolvedSigner {
    pub fn new(identity: SignerIdentity, contact: SignerContact) -> Self {
        let contact = SignerContact {
            name: contact.name.trim().to_string(),
            email: contact.email.trim().to_string(),
            phone: non_blank(contact.phone),
            tax_id: non_blank(contact.tax_id),
        };
        let key = SignerKey::for_signer(&identity, &contact);
        Self {
            identity,
            contact,
            key,
        }
    }

    pub fn external(name: &str, email: &str) -> Self {
        Self::new(SignerIdentity::External, SignerContact::new(name, email))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Prefer the directory's value, fall back to what the caller supplied
fn prefer(directory: String, supplied: String) -> String {
    if directory.trim().is_empty() {
        supplied
    } else {
        directory
    }
}

fn prefer_opt(directory: Option<String>, supplied: Option<String>) -> Option<String> {
    non_blank(directory).or_else(|| non_blank(supplied))
}

/// Resolves signer specs against the client and user directories
pub struct IdentityResolver<'a> {
    directory: &'a dyn Directory,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(directory: &'a dyn Directory) -> Self {
        Self { directory }
    }

    /// Copy directory fields into the signer's contact.
    ///
    /// Unknown client or user ids are validation errors for that signer.
    pub async fn resolve(&self, spec: &SignerSpec) -> Result<ResolvedSigner> {
        let entry = match &spec.identity {
            SignerIdentity::External => {
                return Ok(ResolvedSigner::new(
                    SignerIdentity::External,
                    spec.contact.clone(),
                ))
            }
            SignerIdentity::Client { client_id } => {
                if client_id.trim().is_empty() {
                    return Err(SignatureError::Validation(
                        "client id is required".to_string(),
                    ));
                }
                self.directory
                    .resolve_client(client_id)
                    .await
                    .map_err(|e| SignatureError::DownstreamProvider(e.to_string()))?
                    .ok_or_else(|| {
                        SignatureError::Validation(format!("client not found: {}", client_id))
                    })?
            }
            SignerIdentity::User { user_id } => {
                if user_id.trim().is_empty() {
                    return Err(SignatureError::Validation("user id is required".to_string()));
                }
                self.directory
                    .resolve_user(user_id)
                    .await
                    .map_err(|e| SignatureError::DownstreamProvider(e.to_string()))?
                    .ok_or_else(|| {
                        SignatureError::Validation(format!("user not found: {}", user_id))
                    })?
            }
        };

        let supplied = spec.contact.clone();
        let contact = SignerContact {
            name: prefer(entry.name, supplied.name),
            email: prefer(entry.email, supplied.email),
            phone: prefer_opt(entry.phone, supplied.phone),
            tax_id: prefer_opt(entry.tax_id, supplied.tax_id),
        };

        Ok(ResolvedSigner::new(spec.identity.clone(), contact))
    }
}
