use anyhow::{anyhow, Result};
use serde_json::json;
use time::OffsetDateTime;

use crate::config::AppConfig;
use crate::domain::slot::{self, Locale};

/// Client for the transactional mail HTTP API. Only the worker talks to it;
/// the request path never sends mail directly.
#[derive(Clone)]
pub struct MailSender {
    http: reqwest::Client,
    endpoint: String,
    api_token: String,
    from: String,
}

impl MailSender {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.mail_api_endpoint.clone(),
            api_token: config.mail_api_token.clone(),
            from: config.mail_from.clone(),
        }
    }

    /// Deliveries are at-least-once; the mail API deduplicates on the
    /// idempotency key so a redelivered job does not mail twice.
    pub async fn send_cancellation_notice(
        &self,
        idempotency_key: &str,
        provider_email: &str,
        provider_name: &str,
        requester_name: &str,
        scheduled_at: OffsetDateTime,
        locale: Locale,
    ) -> Result<()> {
        let formatted = slot::format_for_display(scheduled_at, locale);
        let (subject, text) = match locale {
            Locale::Pt => (
                "Agendamento cancelado".to_string(),
                format!(
                    "Olá, {}! O agendamento de {} para {} foi cancelado.",
                    provider_name, requester_name, formatted
                ),
            ),
            Locale::En => (
                "Appointment canceled".to_string(),
                format!(
                    "Hello, {}! The appointment with {} for {} was canceled.",
                    provider_name, requester_name, formatted
                ),
            ),
        };

        let body = json!({
            "from": self.from,
            "to": [{ "email": provider_email, "name": provider_name }],
            "subject": subject,
            "text": text,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .header("Idempotency-Key", idempotency_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("mail API rejected message: {} {}", status, detail));
        }

        Ok(())
    }
}
