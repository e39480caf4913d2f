//! Health probe (§4.D): on-demand and scheduled checks producing
//! {healthy, degraded, unhealthy}.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCheckOptions {
    pub include_retry: bool,
    pub include_migration_version: bool,
}

/// Threshold above which `query_ok` latency demotes `healthy` to `degraded`.
pub const DEFAULT_LATENCY_THRESHOLD_MS: u64 = 1000;

/// Soft threshold for the local operation queue, used by `readiness()` (§6).
pub const DEFAULT_READINESS_QUEUE_THRESHOLD: usize = 1000;

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub db_name: String,
    pub status: HealthStatus,
    pub connection_ok: bool,
    pub query_ok: bool,
    pub latency_ms: u64,
    /// Absent on read-only databases.
    pub migration_version: Option<String>,
    /// Whether a migration is known to be pending (see the Open Question in §9).
    pub migration_pending: bool,
    pub error: Option<String>,
}

impl HealthReport {
    /// Classify a raw observation per the §4.D decision table, including the
    /// resolved Open Question: a pending migration degrades but never fails health.
    pub fn classify(
        db_name: impl Into<String>,
        connection_ok: bool,
        query_ok: bool,
        latency_ms: u64,
        migration_version: Option<String>,
        migration_pending: bool,
        error: Option<String>,
        latency_threshold_ms: u64,
    ) -> Self {
        let status = if !connection_ok {
            HealthStatus::Unhealthy
        } else if !query_ok {
            HealthStatus::Degraded
        } else if latency_ms > latency_threshold_ms {
            HealthStatus::Degraded
        } else if migration_pending {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            db_name: db_name.into(),
            status,
            connection_ok,
            query_ok,
            latency_ms,
            migration_version,
            migration_pending,
            error,
        }
    }
}

/// Implemented once per logical database. Never raises: a total failure is
/// still a populated `HealthReport` with `status = Unhealthy`.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, options: HealthCheckOptions) -> HealthReport;
}

#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub overall: HealthStatus,
    pub breakdown: Vec<HealthReport>,
    pub alerts: Vec<String>,
}

/// Batch form (§4.D): `overall` is the worst of the inputs; an alert per `unhealthy`.
pub fn summarize(reports: Vec<HealthReport>) -> HealthSummary {
    let overall = reports
        .iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(HealthStatus::Healthy);
    let alerts = reports
        .iter()
        .filter(|r| r.status == HealthStatus::Unhealthy)
        .map(|r| format!("database `{}` is unhealthy: {}", r.db_name, r.error.clone().unwrap_or_default()))
        .collect();
    HealthSummary { overall, breakdown: reports, alerts }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failure_is_unhealthy() {
        let r = HealthReport::classify("primary", false, false, 0, None, false, Some("refused".into()), 1000);
        assert_eq!(r.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn slow_but_connected_is_degraded() {
        let r = HealthReport::classify("primary", true, true, 5000, None, false, None, 1000);
        assert_eq!(r.status, HealthStatus::Degraded);
    }

    #[test]
    fn pending_migration_degrades_never_fails() {
        let r = HealthReport::classify("primary", true, true, 10, Some("0007".into()), true, None, 1000);
        assert_eq!(r.status, HealthStatus::Degraded);
    }

    #[test]
    fn fast_and_connected_is_healthy() {
        let r = HealthReport::classify("primary", true, true, 10, None, false, None, 1000);
        assert_eq!(r.status, HealthStatus::Healthy);
    }

    #[test]
    fn overall_is_worst_of_breakdown() {
        let healthy = HealthReport::classify("a", true, true, 1, None, false, None, 1000);
        let unhealthy = HealthReport::classify("b", false, false, 0, None, false, Some("down".into()), 1000);
        let summary = summarize(vec![healthy, unhealthy]);
        assert_eq!(summary.overall, HealthStatus::Unhealthy);
        assert_eq!(summary.alerts.len(), 1);
    }
}
