//! Microsoft Teams incoming-webhook channel.
//!
//! Posts an Office 365 connector MessageCard; any non-2xx answer is a failure.

use std::sync::Arc;
use std::time::Duration;

use alerts_core::config::TeamsConfig;
use alerts_core::error::{AlertsError, Result};
use alerts_core::traits::NotifyChannel;
use alerts_core::types::{Audience, Event};
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::render::MessageRenderer;
use crate::retry::{Failure, RetryPolicy};

pub struct TeamsWebhookChannel {
    client: reqwest::Client,
    webhook_url: String,
    renderer: Arc<MessageRenderer>,
    retry: RetryPolicy,
}

impl TeamsWebhookChannel {
    pub fn new(config: &TeamsConfig, renderer: Arc<MessageRenderer>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("events-alerts/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AlertsError::Http(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            webhook_url: config.webhook_url.clone(),
            renderer,
            retry: RetryPolicy::new(config.max_attempts),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// POST a card, retrying network errors, 429 and 5xx.
    pub async fn post_card(&self, card: &Value) -> Result<()> {
        let client = &self.client;
        let url = self.webhook_url.as_str();
        self.retry
            .run("Teams webhook", move |_| async move {
                let response = match client.post(url).json(card).send().await {
                    Ok(response) => response,
                    Err(e) => {
                        return Err(Failure::Transient(AlertsError::channel(format!(
                            "Teams send failed: {e}"
                        ))));
                    }
                };

                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }
                let text = response.text().await.unwrap_or_default();
                let err = AlertsError::channel(format!("Teams webhook {status}: {text}"));
                if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    Err(Failure::Transient(err))
                } else {
                    Err(Failure::Permanent(err))
                }
            })
            .await
    }

    /// Send a fixed test card to check the webhook end to end.
    pub async fn send_test_card(&self) -> Result<()> {
        let company = &self.renderer.branding().company_name;
        let card = json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": "2EA9DE",
            "summary": "Webhook test",
            "title": format!("{} | Webhook test", self.renderer.branding().subject_prefix),
            "text": format!("Test message from {company} events-alerts. No action needed."),
        });
        self.post_card(&card).await
    }
}

#[async_trait]
impl NotifyChannel for TeamsWebhookChannel {
    fn name(&self) -> &str {
        "teams_webhook"
    }

    async fn send(&self, event: &Event, _audience: &Audience) -> Result<()> {
        let card = self.renderer.teams_card(event);
        self.post_card(&card).await?;
        tracing::info!(event_id = %event.id, channel = "teams_webhook", "Teams message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerts_core::config::BrandingConfig;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering every request with `status`.
    async fn serve(status: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;
                let response =
                    format!("HTTP/1.1 {status}\r\ncontent-length: 1\r\nconnection: close\r\n\r\n1");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/webhook"), hits)
    }

    /// Consume headers and a content-length body so the client sees a clean exchange.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let Ok(n) = socket.read(&mut buf).await else { return };
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= header_end + 4 + length {
                    return;
                }
            }
        }
    }

    fn channel(url: String, attempts: u32) -> TeamsWebhookChannel {
        let config = TeamsConfig {
            enabled: true,
            webhook_url: url,
            timeout_secs: 5,
            max_attempts: attempts,
        };
        TeamsWebhookChannel::new(&config, Arc::new(MessageRenderer::new(BrandingConfig::default())))
            .unwrap()
            .with_retry(RetryPolicy::new(attempts).with_base_delay(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_success_status_is_delivered() {
        let (url, hits) = serve("200 OK").await;
        let event = Event::new("101", "Hot work", Utc::now());
        channel(url, 2)
            .send(&event, &Audience::endpoint("teams"))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (url, hits) = serve("400 Bad Request").await;
        let event = Event::new("101", "Hot work", Utc::now());
        let result = channel(url, 3).send(&event, &Audience::endpoint("teams")).await;
        assert!(matches!(result, Err(AlertsError::Channel(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (url, hits) = serve("503 Service Unavailable").await;
        let result = channel(url, 2).send_test_card().await;
        assert!(result.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
