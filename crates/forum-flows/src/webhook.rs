//! HTTP webhook sender with HMAC-SHA256 signing.

use async_trait::async_trait;
use futures::future::join_all;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use forum_core::{Error, Result, WebhookMessage, WebhookSender};

use crate::config::WebhookConfig;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the event name.
pub const EVENT_HEADER: &str = "X-Forum-Event";
/// Header carrying `sha256=<hex>` of the body.
pub const SIGNATURE_HEADER: &str = "X-Forum-Signature";

/// `sha256=<hex hmac>` of `body` under `secret`.
pub fn sign(secret: &str, body: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Webhook(format!("invalid signing key: {}", e)))?;
    mac.update(body.as_bytes());
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Posts every message as JSON to all configured endpoints concurrently.
pub struct HttpWebhookSender {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl HttpWebhookSender {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Webhook(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, message: &WebhookMessage) -> Result<()> {
        let body = serde_json::to_string(message)?;
        let signature = match &self.config.secret {
            Some(secret) => Some(sign(secret, &body)?),
            None => None,
        };

        let deliveries = self.config.urls.iter().map(|url| {
            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .header(EVENT_HEADER, &message.event);
            if let Some(signature) = &signature {
                request = request.header(SIGNATURE_HEADER, signature);
            }
            let body = body.clone();
            async move { (url, request.body(body).send().await) }
        });

        let mut failed = Vec::new();
        for (url, result) in join_all(deliveries).await {
            match result {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %url, event = %message.event, "Webhook delivered");
                }
                Ok(response) => {
                    warn!(url = %url, event = %message.event, status = %response.status(), "Webhook rejected");
                    failed.push(url.as_str());
                }
                Err(e) => {
                    warn!(url = %url, event = %message.event, error = %e, "Webhook request failed");
                    failed.push(url.as_str());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Webhook(format!(
                "{} of {} endpoints failed: {}",
                failed.len(),
                self.config.urls.len(),
                failed.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_format() {
        let sig = sign("my-secret", r#"{"event":"notify.bot_unknown"}"#).unwrap();
        assert!(sig.starts_with("sha256="));
        let hex_part = &sig["sha256=".len()..];
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_depends_on_secret_and_body() {
        let body = r#"{"event":"notify.human_help"}"#;
        assert_eq!(sign("a", body).unwrap(), sign("a", body).unwrap());
        assert_ne!(sign("a", body).unwrap(), sign("b", body).unwrap());
        assert_ne!(sign("a", body).unwrap(), sign("a", "{}").unwrap());
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2.
        let sig = sign("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[tokio::test]
    async fn test_no_endpoints_is_ok() {
        let sender = HttpWebhookSender::new(WebhookConfig::default()).unwrap();
        let message = WebhookMessage {
            event: "notify.bot_unknown".to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
            discussion_id: None,
        };
        assert!(sender.send(&message).await.is_ok());
    }
}
