//! Provider notification delivery over NATS.
//!
//! `NatsPublisher` keeps the wire client swappable so tests can inspect what
//! would have gone out without a running server.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::common::ProviderId;
use crate::domains::bookings::models::BookingSummary;
use crate::kernel::BaseNotificationSink;

/// Subject a provider's devices listen on for new booking requests.
pub fn provider_requests_subject(provider_id: ProviderId) -> String {
    format!("providers.{}.requests", provider_id)
}

/// A published message.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

#[async_trait]
pub trait NatsPublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

/// Real NATS client publisher.
pub struct NatsClientPublisher {
    client: async_nats::Client,
}

impl NatsClientPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url).await?;
        info!(url = %url, "Connected to NATS");
        Ok(Self::new(client))
    }
}

#[async_trait]
impl NatsPublisher for NatsClientPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }
}

/// Mock NATS client that records published messages.
#[derive(Default)]
pub struct TestNats {
    published: RwLock<Vec<PublishedMessage>>,
}

impl TestNats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl NatsPublisher for TestNats {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { subject, payload });
        Ok(())
    }
}

#[derive(Serialize)]
struct RequestNotification<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    summary: &'a BookingSummary,
}

/// Notification sink that publishes one message per candidate.
pub struct NatsNotificationSink {
    publisher: Arc<dyn NatsPublisher>,
}

impl NatsNotificationSink {
    pub fn new(publisher: Arc<dyn NatsPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl BaseNotificationSink for NatsNotificationSink {
    async fn notify(&self, providers: &[ProviderId], summary: &BookingSummary) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(&RequestNotification {
            kind: "booking_request",
            summary,
        })?);

        for provider_id in providers {
            self.publisher
                .publish(provider_requests_subject(*provider_id), payload.clone())
                .await?;
        }

        debug!(
            booking_id = %summary.booking_id,
            count = providers.len(),
            "Published booking request notifications"
        );
        Ok(())
    }
}

/// Fallback sink when no NATS server is configured.
pub struct LogNotificationSink;

#[async_trait]
impl BaseNotificationSink for LogNotificationSink {
    async fn notify(&self, providers: &[ProviderId], summary: &BookingSummary) -> Result<()> {
        info!(
            booking_id = %summary.booking_id,
            category = %summary.category,
            providers = providers.len(),
            "Booking request notification (NATS disabled)"
        );
        Ok(())
    }
}
