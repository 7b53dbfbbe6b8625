//! Hosted signing links and signing-link emails
//!
//! Links are issued under `SIGNING_BASE_URL` with an unguessable token.
//! Emails go out through the Resend API (https://api.resend.com/emails);
//! without `RESEND_API_KEY` they are logged instead.

use std::time::Duration;

use async_trait::async_trait;
use esign_core::{ProviderError, SignatureRequest, SigningProvider};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ApiConfig;

/// Resend API endpoint
const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Resend API request payload
#[derive(Debug, Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: String,
    html: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<ResendTag<'a>>,
}

/// Resend tag for tracking
#[derive(Debug, Serialize)]
struct ResendTag<'a> {
    name: &'a str,
    value: &'a str,
}

/// Resend API error response
#[derive(Debug, Deserialize)]
struct ResendErrorResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

enum Mailer {
    Resend {
        http_client: reqwest::Client,
        api_key: String,
        from_address: String,
    },
    /// Development fallback: log the link
    Log,
}

pub struct HostedSigningProvider {
    base_url: String,
    mailer: Mailer,
}

impl HostedSigningProvider {
    pub fn from_config(config: &ApiConfig) -> Result<Self, ProviderError> {
        let mailer = match &config.resend_api_key {
            Some(api_key) => {
                let http_client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(15))
                    .build()
                    .map_err(|e| ProviderError::Config(format!("HTTP client: {}", e)))?;
                Mailer::Resend {
                    http_client,
                    api_key: api_key.clone(),
                    from_address: config.email_from.clone(),
                }
            }
            None => {
                warn!("RESEND_API_KEY not set; signing emails will only be logged");
                Mailer::Log
            }
        };
        Ok(Self {
            base_url: config.signing_base_url.clone(),
            mailer,
        })
    }

    /// Provider that never sends email
    pub fn log_only(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            mailer: Mailer::Log,
        }
    }
}

/// Opaque link token bound to the request id
fn signing_token(request: &SignatureRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.id.as_bytes());
    hasher.update(request.document_id.as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}

fn email_body(signature_url: &str, request: &SignatureRequest) -> (String, String, String) {
    let subject = "Document awaiting your signature".to_string();
    let text = format!(
        "Hello {},\n\nA document is waiting for your signature:\n{}\n",
        request.contact.name, signature_url
    );
    let html = format!(
        "<p>Hello {},</p><p>A document is waiting for your signature.</p>\
         <p><a href=\"{}\">Review and sign</a></p>",
        html_escape::encode_text(&request.contact.name),
        html_escape::encode_double_quoted_attribute(signature_url)
    );
    (subject, html, text)
}

/// User-facing message for a Resend error status
fn resend_error_message(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<ResendErrorResponse>(body)
        .ok()
        .and_then(|err| err.message.or(err.name))
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        401 => "Email service authentication failed.".to_string(),
        403 => "Email service access denied.".to_string(),
        422 => format!("Invalid email request: {}", detail),
        429 => "Email rate limit exceeded. Please try again later.".to_string(),
        500..=599 => "Email service temporarily unavailable.".to_string(),
        _ => detail,
    }
}

#[async_trait]
impl SigningProvider for HostedSigningProvider {
    async fn provision_signature(
        &self,
        request: &SignatureRequest,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/sign/{}", self.base_url, signing_token(request));
        debug!("Provisioned signing link for request {}", request.id);
        Ok(url)
    }

    async fn deliver_email(
        &self,
        signature_url: &str,
        request: &SignatureRequest,
    ) -> Result<(), ProviderError> {
        let (http_client, api_key, from_address) = match &self.mailer {
            Mailer::Log => {
                info!(
                    "[email disabled] signing link for {} <{}>: {}",
                    request.contact.name, request.contact.email, signature_url
                );
                return Ok(());
            }
            Mailer::Resend {
                http_client,
                api_key,
                from_address,
            } => (http_client, api_key, from_address),
        };

        let (subject, html, text) = email_body(signature_url, request);
        let payload = ResendPayload {
            from: from_address,
            to: vec![request.contact.email.as_str()],
            subject,
            html,
            text,
            tags: vec![ResendTag {
                name: "category",
                value: "signature_request",
            }],
        };

        debug!("Sending signing email via Resend to: {}", request.contact.email);
        let response = http_client
            .post(RESEND_API_URL)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                warn!("Resend request failed: {}", e);
                ProviderError::Request("Failed to connect to email service.".to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            info!("Signing email sent for request {}", request.id);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Resend error ({}): {}", status, body);
        Err(ProviderError::Status {
            status: status.as_u16(),
            message: resend_error_message(status.as_u16(), &body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use esign_core::ResolvedSigner;

    fn request() -> SignatureRequest {
        SignatureRequest::pending(
            "doc-1",
            &ResolvedSigner::external("Ana", "ana@example.com"),
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_links_are_unique_per_provisioning() {
        let provider = HostedSigningProvider::log_only("https://sign.acme.com/");
        let request = request();
        let a = provider.provision_signature(&request).await.unwrap();
        let b = provider.provision_signature(&request).await.unwrap();

        assert!(a.starts_with("https://sign.acme.com/sign/"));
        assert_eq!(a.len(), "https://sign.acme.com/sign/".len() + 64);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_log_mailer_always_delivers() {
        let provider = HostedSigningProvider::log_only("http://localhost");
        assert!(provider
            .deliver_email("http://localhost/sign/x", &request())
            .await
            .is_ok());
    }

    #[test]
    fn test_email_html_escapes_signer_name() {
        let request = SignatureRequest::pending(
            "doc-1",
            &ResolvedSigner::external("<a href=\"https://evil\">x</a>", "ana@example.com"),
            None,
            Utc::now(),
        );
        let (_, html, text) = email_body("https://sign.test/sign/\"abc", &request);

        assert!(html.contains("Hello &lt;a href=\"https://evil\"&gt;x&lt;/a&gt;,"));
        assert!(!html.contains("<a href=\"https://evil\">"));
        assert!(html.contains("href=\"https://sign.test/sign/&quot;abc\""));
        // plain-text part is not markup
        assert!(text.contains("<a href=\"https://evil\">x</a>"));
    }

    #[test]
    fn test_resend_payload_serialization() {
        let payload = ResendPayload {
            from: "sender@example.com",
            to: vec!["recipient@example.com"],
            subject: "Test Subject".to_string(),
            html: "<p>Hello</p>".to_string(),
            text: "Hello".to_string(),
            tags: vec![],
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("sender@example.com"));
        assert!(json.contains("recipient@example.com"));
        // Empty tags should be omitted
        assert!(!json.contains("\"tags\""));
    }

    #[test]
    fn test_resend_error_messages() {
        assert_eq!(
            resend_error_message(422, r#"{"name":"validation_error","message":"bad to"}"#),
            "Invalid email request: bad to"
        );
        assert_eq!(
            resend_error_message(503, ""),
            "Email service temporarily unavailable."
        );
        assert_eq!(resend_error_message(418, "teapot"), "HTTP 418");
    }
}
