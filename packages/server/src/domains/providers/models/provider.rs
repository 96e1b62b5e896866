use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, instrument};
use typed_builder::TypedBuilder;

use crate::common::{GeoPoint, ProviderId};
use crate::kernel::{DirectoryEntry, DirectoryQuery};

/// Provider model - professionals who can be dispatched to bookings
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Provider {
    pub id: ProviderId,

    // Profile
    pub name: String,
    /// Service categories this provider offers (e.g. "plumbing")
    pub services: Vec<String>,

    // Location
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    // Service modes
    pub offers_remote: bool,

    // Availability
    pub is_active: bool,
    pub is_available: bool,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new provider
#[derive(Debug, Clone, TypedBuilder)]
pub struct CreateProvider {
    #[builder(setter(into))]
    pub name: String,
    pub services: Vec<String>,
    #[builder(default, setter(strip_option, into))]
    pub city: Option<String>,
    #[builder(default, setter(strip_option))]
    pub location: Option<GeoPoint>,
    #[builder(default = false)]
    pub offers_remote: bool,
}

type DirectoryRow = (ProviderId, Option<f64>, bool);

fn to_entries(rows: Vec<DirectoryRow>) -> Vec<DirectoryEntry> {
    rows.into_iter()
        .map(|(provider_id, distance_km, is_active)| DirectoryEntry {
            provider_id,
            distance_km,
            is_active,
        })
        .collect()
}

impl Provider {
    pub async fn create(input: CreateProvider, pool: &PgPool) -> Result<Self> {
        let provider = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO providers (id, name, services, city, latitude, longitude, offers_remote)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(ProviderId::new())
        .bind(&input.name)
        .bind(&input.services)
        .bind(&input.city)
        .bind(input.location.map(|p| p.lat))
        .bind(input.location.map(|p| p.lng))
        .bind(input.offers_remote)
        .fetch_one(pool)
        .await?;
        Ok(provider)
    }

    pub async fn find_by_id_optional(id: ProviderId, pool: &PgPool) -> Result<Option<Self>> {
        let provider = sqlx::query_as::<_, Self>("SELECT * FROM providers WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(provider)
    }

    /// Toggle whether the provider is currently taking jobs
    pub async fn set_available(id: ProviderId, available: bool, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE providers SET is_available = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(available)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Run a directory query.
    ///
    /// Radius searches order by distance; city and online searches return
    /// providers oldest first with no distance. `is_active` folds the active
    /// and available flags together so callers filter on one field.
    #[instrument(skip(pool), fields(category = %query.category))]
    pub async fn search(query: &DirectoryQuery, pool: &PgPool) -> Result<Vec<DirectoryEntry>> {
        let limit = query.limit.map(|l| l as i64);

        let rows: Vec<DirectoryRow> = match (query.location, query.radius_km, &query.city) {
            (Some(point), Some(radius_km), _) => {
                sqlx::query_as(
                    r#"
                    SELECT id,
                           haversine_distance($2, $3, latitude, longitude) AS distance_km,
                           (is_active AND is_available) AS is_active
                    FROM providers
                    WHERE $1 = ANY(services)
                      AND latitude IS NOT NULL
                      AND longitude IS NOT NULL
                      AND haversine_distance($2, $3, latitude, longitude) <= $4
                    ORDER BY distance_km ASC
                    LIMIT $5
                    "#,
                )
                .bind(&query.category)
                .bind(point.lat)
                .bind(point.lng)
                .bind(radius_km)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            (_, _, Some(city)) => {
                sqlx::query_as(
                    r#"
                    SELECT id, NULL::float8 AS distance_km, (is_active AND is_available) AS is_active
                    FROM providers
                    WHERE $1 = ANY(services) AND LOWER(city) = LOWER($2)
                    ORDER BY created_at ASC
                    LIMIT $3
                    "#,
                )
                .bind(&query.category)
                .bind(city)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
            _ => {
                sqlx::query_as(
                    r#"
                    SELECT id, NULL::float8 AS distance_km, (is_active AND is_available) AS is_active
                    FROM providers
                    WHERE $1 = ANY(services) AND offers_remote = true
                    ORDER BY created_at ASC
                    LIMIT $2
                    "#,
                )
                .bind(&query.category)
                .bind(limit)
                .fetch_all(pool)
                .await?
            }
        };

        debug!(count = rows.len(), "Directory query returned providers");
        Ok(to_entries(rows))
    }
}
