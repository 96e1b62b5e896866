use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::common::{BookingId, BookingRequestId, ProviderId};

/// Status of one provider's offer for a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "PENDING"),
            RequestStatus::Accepted => write!(f, "ACCEPTED"),
            RequestStatus::Rejected => write!(f, "REJECTED"),
            RequestStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Per-candidate fan-out row. Unique on (booking_id, provider_id).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BookingRequest {
    pub id: BookingRequestId,
    pub booking_id: BookingId,
    pub provider_id: ProviderId,
    pub status: RequestStatus,
    /// Position in the candidate ordering (0 = nearest)
    pub candidate_rank: i32,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl BookingRequest {
    /// One `PENDING` request per candidate, ranked in candidate order.
    pub fn fan_out(booking_id: BookingId, candidates: &[ProviderId]) -> Vec<Self> {
        let now = Utc::now();
        candidates
            .iter()
            .enumerate()
            .map(|(rank, provider_id)| Self {
                id: BookingRequestId::new(),
                booking_id,
                provider_id: *provider_id,
                status: RequestStatus::Pending,
                candidate_rank: rank as i32,
                created_at: now,
                responded_at: None,
            })
            .collect()
    }

    /// Insert all requests in one statement (all-or-nothing).
    pub async fn insert_batch(requests: &[BookingRequest], pool: &PgPool) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO booking_requests (id, booking_id, provider_id, status, candidate_rank, created_at) ",
        );
        builder.push_values(requests, |mut row, request| {
            row.push_bind(request.id)
                .push_bind(request.booking_id)
                .push_bind(request.provider_id)
                .push_bind(request.status)
                .push_bind(request.candidate_rank)
                .push_bind(request.created_at);
        });
        builder.build().execute(pool).await?;

        Ok(())
    }

    pub async fn find_for_provider(
        booking_id: BookingId,
        provider_id: ProviderId,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let request = sqlx::query_as::<_, Self>(
            "SELECT * FROM booking_requests WHERE booking_id = $1 AND provider_id = $2",
        )
        .bind(booking_id)
        .bind(provider_id)
        .fetch_optional(pool)
        .await?;
        Ok(request)
    }

    pub async fn find_by_booking(booking_id: BookingId, pool: &PgPool) -> Result<Vec<Self>> {
        let requests = sqlx::query_as::<_, Self>(
            "SELECT * FROM booking_requests WHERE booking_id = $1 ORDER BY candidate_rank ASC",
        )
        .bind(booking_id)
        .fetch_all(pool)
        .await?;
        Ok(requests)
    }

    /// Move one provider's request from `from` to `to`. Returns rows affected.
    pub async fn transition(
        booking_id: BookingId,
        provider_id: ProviderId,
        from: RequestStatus,
        to: RequestStatus,
        pool: &PgPool,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE booking_requests
            SET status = $4, responded_at = NOW()
            WHERE booking_id = $1 AND provider_id = $2 AND status = $3
            "#,
        )
        .bind(booking_id)
        .bind(provider_id)
        .bind(from)
        .bind(to)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Expire every still-`PENDING` request for a booking, optionally sparing one provider.
    pub async fn expire_outstanding(
        booking_id: BookingId,
        except: Option<ProviderId>,
        pool: &PgPool,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE booking_requests
            SET status = 'EXPIRED', responded_at = NOW()
            WHERE booking_id = $1
              AND status = 'PENDING'
              AND ($2::uuid IS NULL OR provider_id <> $2)
            "#,
        )
        .bind(booking_id)
        .bind(except)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete the fan-out of a booking that never left `REQUESTED`.
    ///
    /// Rows of a booking in any other status are untouched.
    pub async fn discard_unpublished(booking_id: BookingId, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM booking_requests r
            USING bookings b
            WHERE r.booking_id = b.id
              AND b.id = $1
              AND b.status = 'REQUESTED'
            "#,
        )
        .bind(booking_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_pending(booking_id: BookingId, pool: &PgPool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM booking_requests WHERE booking_id = $1 AND status = 'PENDING'",
        )
        .bind(booking_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_preserves_candidate_order() {
        let booking_id = BookingId::new();
        let candidates = vec![ProviderId::new(), ProviderId::new(), ProviderId::new()];
        let requests = BookingRequest::fan_out(booking_id, &candidates);

        assert_eq!(requests.len(), 3);
        for (i, request) in requests.iter().enumerate() {
            assert_eq!(request.provider_id, candidates[i]);
            assert_eq!(request.candidate_rank, i as i32);
            assert_eq!(request.status, RequestStatus::Pending);
            assert_eq!(request.booking_id, booking_id);
        }
    }
}
