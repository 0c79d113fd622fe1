//! Health and status handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{trace, warn};

use crate::refresh::domain::Domain;
use crate::refresh::scheduler::SchedulerSnapshot;
use crate::refresh::selector::stale_cutoff;
use crate::state::{AppState, ServiceStatus};
use crate::utils::fmt_duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    name: String,
    status: ServiceStatus,
    updated_secs_ago: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
    #[serde(flatten)]
    scheduler: SchedulerSnapshot,
    /// Players currently past the domain's interval, `None` if the count failed.
    stale: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pending_calls: usize,
    domains: Vec<DomainStatus>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    services: BTreeMap<String, ServiceInfo>,
    refresh: Option<RefreshStatus>,
}

/// Health check endpoint; unhealthy when the database does not answer.
pub(super) async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    trace!("health check requested");
    match crate::data::health::ping(&state.db_pool).await {
        Ok(latency) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": fmt_duration(latency),
                "timestamp": Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            warn!(error = ?e, "health check database ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            )
        }
    }
}

/// Combined status of all services, with per-domain scheduler counters
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut services = BTreeMap::new();
    for (name, svc_status, age) in state.service_statuses.all() {
        services.insert(
            name.clone(),
            ServiceInfo {
                name,
                status: svc_status,
                updated_secs_ago: age.as_secs(),
            },
        );
    }
    let overall_status = overall(services.values().map(|s| s.status));

    let refresh = match &state.refresh {
        Some(handle) => {
            let mut domains = Vec::new();
            for scheduler in handle.scheduler_snapshots() {
                let stale = count_stale(&state, scheduler.domain, scheduler.interval).await;
                domains.push(DomainStatus { scheduler, stale });
            }
            Some(RefreshStatus {
                pending_calls: handle.pending_calls(),
                domains,
            })
        }
        None => None,
    };

    Json(StatusResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        services,
        refresh,
    })
}

async fn count_stale(state: &AppState, domain: Domain, interval: Duration) -> Option<i64> {
    let cutoff = stale_cutoff(Utc::now(), interval);
    match crate::data::players::count_stale(&state.db_pool, domain, cutoff).await {
        Ok(count) => Some(count),
        Err(e) => {
            warn!(%domain, error = ?e, "failed to count stale players");
            None
        }
    }
}

fn overall(statuses: impl Iterator<Item = ServiceStatus>) -> ServiceStatus {
    let statuses: Vec<_> = statuses.collect();
    if statuses.is_empty() {
        ServiceStatus::Disabled
    } else if statuses.contains(&ServiceStatus::Error) {
        ServiceStatus::Error
    } else if statuses.contains(&ServiceStatus::Starting) {
        ServiceStatus::Starting
    } else {
        ServiceStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_status_prefers_errors() {
        assert_eq!(overall(std::iter::empty()), ServiceStatus::Disabled);
        assert_eq!(
            overall([ServiceStatus::Active, ServiceStatus::Error].into_iter()),
            ServiceStatus::Error
        );
        assert_eq!(
            overall([ServiceStatus::Connected, ServiceStatus::Starting].into_iter()),
            ServiceStatus::Starting
        );
        assert_eq!(
            overall([ServiceStatus::Connected, ServiceStatus::Disabled].into_iter()),
            ServiceStatus::Active
        );
    }
}
