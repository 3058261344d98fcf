//! The correspondence feed — inbound employer email delivery.
//!
//! Emails arrive either pre-parsed (HTTP surface) or as raw RFC 822 bytes.
//! A background consumer drains the feed channel and runs each mail through
//! the Secretary; a failed mail is logged and never blocks the feed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::SecretaryError;
use crate::secretary::classifier::Secretary;

/// One inbound employer email, addressed to a known application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEmail {
    pub application_id: Uuid,
    pub from: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    /// Parse a raw RFC 822 message into an inbound email.
    pub fn from_rfc822(application_id: Uuid, raw: &[u8]) -> Result<Self, SecretaryError> {
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| SecretaryError::Feed("unparsable RFC 822 message".to_string()))?;

        let from = message
            .from()
            .and_then(|a| a.first())
            .and_then(|addr| addr.address())
            .map(|s| s.to_string())
            .unwrap_or_default();
        let subject = message.subject().unwrap_or_default().to_string();
        let body = message
            .body_text(0)
            .map(|text| text.into_owned())
            .unwrap_or_default();
        let received_at = message
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or_else(Utc::now);

        Ok(Self {
            application_id,
            from,
            subject,
            body,
            received_at,
        })
    }
}

/// Spawn the feed consumer. Runs until the sender side is dropped.
pub fn spawn_feed_consumer(
    secretary: Arc<Secretary>,
    receiver: mpsc::Receiver<InboundEmail>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Correspondence feed consumer started");
        let mut stream = ReceiverStream::new(receiver);
        while let Some(email) = stream.next().await {
            match secretary.process_email(&email).await {
                Ok(outcome) => {
                    debug!(
                        application_id = %email.application_id,
                        from = %email.from,
                        ?outcome,
                        "Processed inbound email"
                    );
                }
                Err(e) => {
                    error!(
                        application_id = %email.application_id,
                        from = %email.from,
                        error = %e,
                        "Failed to process inbound email"
                    );
                }
            }
        }
        info!("Correspondence feed closed");
    })
}
