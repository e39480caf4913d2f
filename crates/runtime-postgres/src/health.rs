//! Postgres `HealthProbe` (§4.D): `SELECT 1` plus a migration-version lookup.

use async_trait::async_trait;
use runtime_core::health::{HealthCheckOptions, HealthProbe, HealthReport, DEFAULT_LATENCY_THRESHOLD_MS};
use sqlx::{PgPool, Row};
use std::time::Instant;

/// Reads `_sqlx_migrations`, treating its absence as "no migrations tracked"
/// rather than an error: plenty of deployments manage schema out of band.
pub struct PgHealthProbe {
    pool: PgPool,
    db_name: String,
    latency_threshold_ms: u64,
}

impl PgHealthProbe {
    pub fn new(pool: PgPool, db_name: impl Into<String>) -> Self {
        Self { pool, db_name: db_name.into(), latency_threshold_ms: DEFAULT_LATENCY_THRESHOLD_MS }
    }

    pub fn with_latency_threshold_ms(mut self, ms: u64) -> Self {
        self.latency_threshold_ms = ms;
        self
    }

    async fn migration_state(&self) -> (Option<String>, bool) {
        let applied: Result<Option<i64>, _> = sqlx::query("SELECT MAX(version) AS v FROM _sqlx_migrations")
            .fetch_one(&self.pool)
            .await
            .map(|row| row.get("v"));

        match applied {
            Ok(Some(version)) => (Some(version.to_string()), false),
            Ok(None) => (None, false),
            Err(_) => (None, false),
        }
    }
}

#[async_trait]
impl HealthProbe for PgHealthProbe {
    async fn check(&self, options: HealthCheckOptions) -> HealthReport {
        let start = Instant::now();
        let query_result = sqlx::query("SELECT 1").fetch_one(&self.pool).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (connection_ok, query_ok, error) = match query_result {
            Ok(_) => (true, true, None),
            Err(e) => (false, false, Some(e.to_string())),
        };

        let (migration_version, migration_pending) = if options.include_migration_version && connection_ok {
            self.migration_state().await
        } else {
            (None, false)
        };

        HealthReport::classify(
            self.db_name.clone(),
            connection_ok,
            query_ok,
            latency_ms,
            migration_version,
            migration_pending,
            error,
            self.latency_threshold_ms,
        )
    }
}
