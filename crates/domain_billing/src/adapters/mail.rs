//! Transactional mail adapter
//!
//! Delivers rendered notices through an HTTP mail API that accepts
//! `{from, to, subject, text}` JSON authenticated with a bearer key.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use core_kernel::{DomainPort, PortError};

use crate::notification::OutboundMessage;
use crate::ports::NotificationChannel;

/// Mail API endpoint and credentials
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Full URL of the send endpoint
    pub endpoint: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMailBody<'a> {
    from: String,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// `NotificationChannel` that posts e-mail to an HTTP mail service
#[derive(Debug, Clone)]
pub struct HttpMailChannel {
    config: MailConfig,
    http: Client,
}

impl HttpMailChannel {
    pub fn new(config: MailConfig) -> Result<Self, PortError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PortError::connection(format!("cannot build mail client: {}", e)))?;
        Ok(Self { config, http })
    }
}

impl DomainPort for HttpMailChannel {}

#[async_trait]
impl NotificationChannel for HttpMailChannel {
    async fn send(&self, message: &OutboundMessage) -> Result<(), PortError> {
        let body = SendMailBody {
            from: format!("{} <{}>", message.sender.name, message.sender.email),
            to: &message.recipient,
            subject: &message.subject,
            text: &message.body,
        };

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortError::timeout("send_mail", Duration::from_secs(self.config.timeout_secs))
                } else {
                    PortError::Connection {
                        message: format!("mail request failed: {}", e),
                        source: Some(Box::new(e)),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PortError::remote(status.as_u16(), text));
        }

        tracing::debug!(recipient = %message.recipient, subject = %message.subject, "Mail accepted");
        Ok(())
    }
}
