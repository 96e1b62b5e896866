use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::common::{BookingId, LifecycleEventId};

/// Which part of the booking lifecycle produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    Request,
    Match,
    Accept,
    Status,
    Override,
    Expiry,
}

/// Append-only audit row for a booking
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LifecycleEvent {
    pub id: LifecycleEventId,
    pub booking_id: BookingId,
    pub phase: LifecyclePhase,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        booking_id: BookingId,
        phase: LifecyclePhase,
        event_type: impl Into<String>,
        event_data: serde_json::Value,
    ) -> Self {
        Self {
            id: LifecycleEventId::new(),
            booking_id,
            phase,
            event_type: event_type.into(),
            event_data,
            created_at: Utc::now(),
        }
    }

    pub async fn record(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO booking_lifecycle_events (id, booking_id, phase, event_type, event_data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(self.id)
        .bind(self.booking_id)
        .bind(self.phase)
        .bind(&self.event_type)
        .bind(&self.event_data)
        .bind(self.created_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_booking(booking_id: BookingId, pool: &PgPool) -> Result<Vec<Self>> {
        let events = sqlx::query_as::<_, Self>(
            "SELECT * FROM booking_lifecycle_events WHERE booking_id = $1 ORDER BY created_at ASC",
        )
        .bind(booking_id)
        .fetch_all(pool)
        .await?;
        Ok(events)
    }
}
