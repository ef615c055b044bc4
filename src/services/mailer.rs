//! Outbound mail delivery through the mail relay collaborator.
//!
//! Delivery is best-effort: callers capture the per-message outcome as an
//! [`EmailStatus`](crate::models::EmailStatus) on the order instead of
//! failing the pipeline. A category without resolved settings is recorded
//! as skipped, never attempted.

use crate::config::{MailCategory, MailConfig, MailSettings};
use crate::errors::ServiceError;
use crate::models::EmailStatus;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{instrument, warn};

/// One outbound message, fully composed before send.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEmail {
    pub category_from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub subject: String,
    pub text_body: String,
}

/// Narrow send-mail interface over the relay.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, category: MailCategory, email: &OutboundEmail)
        -> Result<(), ServiceError>;

    /// Whether the category has settings at all; unconfigured categories are
    /// reported as skipped without an attempt.
    fn is_configured(&self, category: MailCategory) -> bool;
}

/// Sends one message and folds the outcome into a persistable status.
pub async fn send_with_status(
    mailer: &dyn MailSender,
    category: MailCategory,
    email: &OutboundEmail,
) -> EmailStatus {
    if !mailer.is_configured(category) {
        return EmailStatus::Skipped;
    }
    match mailer.send(category, email).await {
        Ok(()) => EmailStatus::Sent,
        Err(err) => {
            warn!(error = %err, to = %email.to, "email delivery failed");
            EmailStatus::Error(err.to_string())
        }
    }
}

/// HTTP mail relay client with per-category settings resolved once at
/// construction time.
pub struct HttpMailRelay {
    client: reqwest::Client,
    contact: Option<MailSettings>,
    order: Option<MailSettings>,
    low_stock: Option<MailSettings>,
}

impl HttpMailRelay {
    pub fn new(mail: &MailConfig, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::MailError(format!("client init failed: {}", e)))?;
        Ok(Self {
            client,
            contact: mail.resolve(MailCategory::Contact),
            order: mail.resolve(MailCategory::Order),
            low_stock: mail.resolve(MailCategory::LowStock),
        })
    }

    fn settings(&self, category: MailCategory) -> Option<&MailSettings> {
        match category {
            MailCategory::Contact => self.contact.as_ref(),
            MailCategory::Order => self.order.as_ref(),
            MailCategory::LowStock => self.low_stock.as_ref(),
        }
    }
}

#[derive(Serialize)]
struct RelayPayload<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    subject: &'a str,
    text: &'a str,
}

#[async_trait]
impl MailSender for HttpMailRelay {
    #[instrument(skip(self, email), fields(to = %email.to, subject = %email.subject))]
    async fn send(
        &self,
        category: MailCategory,
        email: &OutboundEmail,
    ) -> Result<(), ServiceError> {
        let settings = self
            .settings(category)
            .ok_or_else(|| ServiceError::MailError("mail category unconfigured".to_string()))?;

        let payload = RelayPayload {
            from: &settings.from_address,
            to: &email.to,
            reply_to: email.reply_to.as_deref(),
            subject: &email.subject,
            text: &email.text_body,
        };

        let mut request = self.client.post(&settings.relay_url).json(&payload);
        if let Some(token) = &settings.api_token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .map_err(|e| ServiceError::MailError(format!("relay send failed: {}", e)))?
            .error_for_status()
            .map_err(|e| ServiceError::MailError(format!("relay rejected message: {}", e)))?;

        Ok(())
    }

    fn is_configured(&self, category: MailCategory) -> bool {
        self.settings(category).is_some()
    }
}

/// Test double that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(MailCategory, OutboundEmail)>>,
    pub fail_with: Mutex<Option<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn fail_next_sends(&self, message: &str) {
        *self.fail_with.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }
}

#[async_trait]
impl MailSender for RecordingMailer {
    async fn send(
        &self,
        category: MailCategory,
        email: &OutboundEmail,
    ) -> Result<(), ServiceError> {
        if let Some(message) = self
            .fail_with
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(ServiceError::MailError(message));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((category, email.clone()));
        Ok(())
    }

    fn is_configured(&self, _category: MailCategory) -> bool {
        true
    }
}
