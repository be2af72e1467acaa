//! Outbound email delivery.
//!
//! Senders never return an error: provider failures come back as
//! [`EmailOutcome::Failed`] so each caller decides whether a failure is
//! fatal (clinic dispatch) or only logged (notifications, nurture).

pub mod templates;

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::circuit_breaker::{create_email_circuit_breaker, EmailCircuitBreaker};
use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub api_key: String,
    /// `Name <address>` sender.
    pub from: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub html: String,
}

impl OutgoingEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, html: String) -> Self {
        Self {
            to: vec![to.into()],
            cc: Vec::new(),
            subject: subject.into(),
            html,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailOutcome {
    Sent { id: Option<String> },
    Failed { reason: String },
}

impl EmailOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, EmailOutcome::Sent { .. })
    }
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> EmailOutcome;
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

/// Client for the Resend HTTP API.
#[derive(Clone)]
pub struct ResendEmailClient {
    client: reqwest::Client,
    settings: EmailSettings,
    breaker: EmailCircuitBreaker,
}

impl ResendEmailClient {
    pub fn new(settings: EmailSettings) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create email client: {}", e))
            })?;

        Ok(Self {
            client,
            settings,
            breaker: create_email_circuit_breaker(),
        })
    }

    async fn post(&self, email: &OutgoingEmail) -> Result<Option<String>, AppError> {
        let url = format!("{}/emails", self.settings.base_url.trim_end_matches('/'));
        let mut body = json!({
            "from": self.settings.from,
            "to": email.to,
            "subject": email.subject,
            "html": email.html,
        });
        if !email.cc.is_empty() {
            body["cc"] = json!(email.cc);
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Email request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Email provider returned {}: {}",
                status, error_text
            )));
        }

        let parsed: ResendResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse email provider response: {}", e))
        })?;
        Ok(parsed.id)
    }
}

#[async_trait]
impl EmailSender for ResendEmailClient {
    async fn send(&self, email: &OutgoingEmail) -> EmailOutcome {
        match self.breaker.call(self.post(email)).await {
            Ok(id) => {
                tracing::debug!("Email '{}' accepted by provider", email.subject);
                EmailOutcome::Sent { id }
            }
            Err(failsafe::Error::Inner(e)) => {
                tracing::warn!("Email '{}' failed: {}", email.subject, e);
                EmailOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Email '{}' skipped: circuit breaker open", email.subject);
                EmailOutcome::Failed {
                    reason: "email provider circuit open".to_string(),
                }
            }
        }
    }
}

/// Sender that only logs. Used by the command-line tools in dry-run mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlySender;

#[async_trait]
impl EmailSender for LogOnlySender {
    async fn send(&self, email: &OutgoingEmail) -> EmailOutcome {
        tracing::info!(
            "[dry-run] would send '{}' to {} recipient(s)",
            email.subject,
            email.to.len() + email.cc.len()
        );
        EmailOutcome::Sent { id: None }
    }
}
