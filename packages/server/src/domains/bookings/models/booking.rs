use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;

use crate::common::{BookingId, CustomerId, GeoPoint, ProviderId};

/// Booking lifecycle status. Legal moves live in `BookingStateMachine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Requested,
    /// Seeking a provider: requests are fanned out, nobody has accepted yet.
    Pending,
    Confirmed,
    EnRoute,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 8] = [
        BookingStatus::Requested,
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::EnRoute,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "REQUESTED",
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::EnRoute => "EN_ROUTE",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }

    /// No provider may be bound in these states.
    pub fn is_pre_acceptance(&self) -> bool {
        matches!(self, BookingStatus::Requested | BookingStatus::Pending)
    }

    /// Statuses that only make sense with a provider bound.
    pub fn requires_provider(&self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed
                | BookingStatus::EnRoute
                | BookingStatus::InProgress
                | BookingStatus::Completed
        )
    }

    /// A provider is bound and the job is live; location may be published.
    pub fn is_trackable(&self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed | BookingStatus::EnRoute | BookingStatus::InProgress
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("Invalid booking status: {}", s))
    }
}

/// Whether the provider has to show up in person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMode {
    Local,
    Online,
}

/// Booking model - one customer job moving through the dispatch lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    pub id: BookingId,

    // Parties
    pub customer_id: CustomerId,
    pub provider_id: Option<ProviderId>,

    // Classification
    pub category: String,
    pub delivery_mode: DeliveryMode,

    // Lifecycle
    pub status: BookingStatus,
    pub status_reason: Option<String>,

    // Location
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,

    // Free-form request details and billing fields, carried but not interpreted
    pub details: serde_json::Value,
    pub financials: serde_json::Value,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a booking in `REQUESTED`
#[derive(Debug, Clone, TypedBuilder, Deserialize)]
pub struct NewBooking {
    pub customer_id: CustomerId,
    #[builder(setter(into))]
    pub category: String,
    pub delivery_mode: DeliveryMode,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[builder(default, setter(strip_option, into))]
    #[serde(default)]
    pub city: Option<String>,
    #[builder(default = serde_json::Value::Null)]
    #[serde(default)]
    pub details: serde_json::Value,
}

impl Booking {
    /// Build a fresh `REQUESTED` booking. Not persisted until `insert`.
    pub fn requested(input: NewBooking) -> Self {
        let now = Utc::now();
        Self {
            id: BookingId::new(),
            customer_id: input.customer_id,
            provider_id: None,
            category: input.category,
            delivery_mode: input.delivery_mode,
            status: BookingStatus::Requested,
            status_reason: None,
            latitude: input.location.map(|p| p.lat),
            longitude: input.location.map(|p| p.lng),
            city: input.city,
            details: input.details,
            financials: serde_json::Value::Null,
            created_at: now,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::from_parts(self.latitude, self.longitude)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Short summary handed to the notification sink and provider feeds.
    pub fn summary(&self) -> BookingSummary {
        BookingSummary {
            booking_id: self.id,
            category: self.category.clone(),
            delivery_mode: self.delivery_mode,
            location: self.location(),
            city: self.city.clone(),
        }
    }
}

/// What a candidate provider is told about a job before accepting it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingSummary {
    pub booking_id: BookingId,
    pub category: String,
    pub delivery_mode: DeliveryMode,
    pub location: Option<GeoPoint>,
    pub city: Option<String>,
}

// =============================================================================
// Conditional updates
// =============================================================================

/// Predicate a guarded update must satisfy against the current row.
///
/// Evaluated by the store in the same atomic step as the write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingGuard {
    pub status: Option<BookingStatus>,
    pub provider_unbound: bool,
    pub provider_is: Option<ProviderId>,
}

impl BookingGuard {
    pub fn status_is(status: BookingStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// The accept race predicate: still seeking, nobody bound.
    pub fn seeking_unbound() -> Self {
        Self {
            status: Some(BookingStatus::Pending),
            provider_unbound: true,
            provider_is: None,
        }
    }

    pub fn with_provider(mut self, provider_id: ProviderId) -> Self {
        self.provider_is = Some(provider_id);
        self
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        if let Some(status) = self.status {
            if booking.status != status {
                return false;
            }
        }
        if self.provider_unbound && booking.provider_id.is_some() {
            return false;
        }
        if let Some(provider_id) = self.provider_is {
            if booking.provider_id != Some(provider_id) {
                return false;
            }
        }
        true
    }
}

/// Fields written by a guarded update. `None` leaves the column as is.
///
/// `provider_id` can only be set on an unbound row; stores refuse to rebind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPatch {
    pub status: Option<BookingStatus>,
    pub provider_id: Option<ProviderId>,
    pub status_reason: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BookingPatch {
    /// Patch for moving to `status`, stamping the matching timestamp.
    pub fn status(status: BookingStatus) -> Self {
        let now = Utc::now();
        let mut patch = Self {
            status: Some(status),
            ..Default::default()
        };
        match status {
            BookingStatus::Confirmed => patch.accepted_at = Some(now),
            BookingStatus::InProgress => patch.started_at = Some(now),
            BookingStatus::Completed => patch.completed_at = Some(now),
            _ => {}
        }
        patch
    }

    pub fn with_provider(mut self, provider_id: ProviderId) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.status_reason = Some(reason.into());
        self
    }

    /// Apply to an in-memory row. Callers must have checked the guard.
    pub fn apply(&self, booking: &mut Booking) {
        if let Some(status) = self.status {
            booking.status = status;
        }
        if booking.provider_id.is_none() {
            booking.provider_id = self.provider_id;
        }
        if let Some(reason) = &self.status_reason {
            booking.status_reason = Some(reason.clone());
        }
        booking.accepted_at = self.accepted_at.or(booking.accepted_at);
        booking.started_at = self.started_at.or(booking.started_at);
        booking.completed_at = self.completed_at.or(booking.completed_at);
        booking.updated_at = Utc::now();
    }
}

/// Result of a guarded update.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub rows_affected: u64,
    /// The row after the write, when it happened.
    pub booking: Option<Booking>,
}

impl UpdateOutcome {
    pub fn success(&self) -> bool {
        self.rows_affected == 1
    }

    pub fn missed() -> Self {
        Self {
            rows_affected: 0,
            booking: None,
        }
    }
}

// =============================================================================
// Postgres queries
// =============================================================================

impl Booking {
    pub async fn insert(&self, pool: &PgPool) -> Result<Self> {
        let booking = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO bookings (
                id, customer_id, provider_id, category, delivery_mode, status,
                status_reason, latitude, longitude, city, details, financials,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(self.customer_id)
        .bind(self.provider_id)
        .bind(&self.category)
        .bind(self.delivery_mode)
        .bind(self.status)
        .bind(&self.status_reason)
        .bind(self.latitude)
        .bind(self.longitude)
        .bind(&self.city)
        .bind(&self.details)
        .bind(&self.financials)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(pool)
        .await?;

        Ok(booking)
    }

    pub async fn find_by_id_optional(id: BookingId, pool: &PgPool) -> Result<Option<Self>> {
        let booking = sqlx::query_as::<_, Self>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(booking)
    }

    /// Single-statement compare-and-set.
    ///
    /// The guard and the write are one `UPDATE ... WHERE`, so two racing
    /// callers are serialized by the row lock and at most one matches.
    pub async fn conditional_update(
        id: BookingId,
        guard: &BookingGuard,
        patch: &BookingPatch,
        pool: &PgPool,
    ) -> Result<UpdateOutcome> {
        let updated = sqlx::query_as::<_, Self>(
            r#"
            UPDATE bookings SET
                status = COALESCE($2, status),
                provider_id = COALESCE($3, provider_id),
                status_reason = COALESCE($4, status_reason),
                accepted_at = COALESCE($5, accepted_at),
                started_at = COALESCE($6, started_at),
                completed_at = COALESCE($7, completed_at),
                updated_at = NOW()
            WHERE id = $1
              AND ($8::text IS NULL OR status = $8)
              AND (NOT $9 OR provider_id IS NULL)
              AND ($10::uuid IS NULL OR provider_id = $10)
              AND ($3::uuid IS NULL OR provider_id IS NULL)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(patch.status)
        .bind(patch.provider_id)
        .bind(&patch.status_reason)
        .bind(patch.accepted_at)
        .bind(patch.started_at)
        .bind(patch.completed_at)
        .bind(guard.status)
        .bind(guard.provider_unbound)
        .bind(guard.provider_is)
        .fetch_optional(pool)
        .await?;

        Ok(match updated {
            Some(booking) => UpdateOutcome {
                rows_affected: 1,
                booking: Some(booking),
            },
            None => UpdateOutcome::missed(),
        })
    }

    /// `PENDING` bookings created before `cutoff`, oldest first.
    pub async fn find_pending_before(
        cutoff: DateTime<Utc>,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let bookings = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM bookings
            WHERE status = 'PENDING' AND provider_id IS NULL AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(bookings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking() -> Booking {
        Booking::requested(
            NewBooking::builder()
                .customer_id(CustomerId::new())
                .category("plumbing")
                .delivery_mode(DeliveryMode::Local)
                .location(GeoPoint::new(19.076, 72.877))
                .build(),
        )
    }

    #[test]
    fn test_status_parse_accepts_wire_names() {
        assert_eq!(
            "EN_ROUTE".parse::<BookingStatus>().unwrap(),
            BookingStatus::EnRoute
        );
        assert_eq!(
            "in_progress".parse::<BookingStatus>().unwrap(),
            BookingStatus::InProgress
        );
        assert!("LOST".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_requested_booking_has_no_provider() {
        let booking = booking();
        assert_eq!(booking.status, BookingStatus::Requested);
        assert!(booking.provider_id.is_none());
        assert_eq!(booking.location(), Some(GeoPoint::new(19.076, 72.877)));
    }

    #[test]
    fn test_seeking_guard_rejects_bound_booking() {
        let mut booking = booking();
        booking.status = BookingStatus::Pending;
        assert!(BookingGuard::seeking_unbound().matches(&booking));

        booking.provider_id = Some(ProviderId::new());
        assert!(!BookingGuard::seeking_unbound().matches(&booking));
    }

    #[test]
    fn test_patch_never_rebinds_provider() {
        let mut booking = booking();
        let first = ProviderId::new();
        BookingPatch::status(BookingStatus::Confirmed)
            .with_provider(first)
            .apply(&mut booking);
        assert_eq!(booking.provider_id, Some(first));
        assert!(booking.accepted_at.is_some());

        BookingPatch::default()
            .with_provider(ProviderId::new())
            .apply(&mut booking);
        assert_eq!(booking.provider_id, Some(first));
    }
}
