//! HTTP request handlers.

use super::AppState;
use crate::alerts::{health, Health};
use crate::hosts::{normalize_target, HostEntry};
use crate::stats::{HistorySample, HostStats};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parse an interval in seconds from a request body.
fn parse_interval(secs: f64) -> Result<Duration, String> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("Invalid interval: {}", secs));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

// ============================================================================
// Views
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HostView {
    pub target: String,
    pub alias: Option<String>,
    pub interval: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct StatsView {
    pub alias: Option<String>,
    #[serde(flatten)]
    pub stats: HostStats,
    pub loss_percent: f64,
    pub uptime_percent: f64,
    pub avg_latency_ms: Option<f64>,
}

impl StatsView {
    fn new(stats: HostStats, alias: Option<String>) -> Self {
        Self {
            alias,
            loss_percent: stats.loss_percent(),
            uptime_percent: stats.uptime_percent(),
            avg_latency_ms: stats.avg_latency_ms(),
            stats,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub health: Health,
    pub hosts: usize,
    pub dropped_updates: u64,
}

async fn alias_of(state: &AppState, target: &str) -> Option<String> {
    state.hosts.lock().await.get(target).and_then(|e| e.alias.clone())
}

// ============================================================================
// API: Hosts
// ============================================================================

pub async fn handle_list_hosts(State(state): State<AppState>) -> impl IntoResponse {
    let entries = state.hosts.lock().await.entries().to_vec();

    let mut views = Vec::with_capacity(entries.len());
    for entry in entries {
        let interval = state.manager.interval(&entry.target).await.map(|d| d.as_secs_f64());
        views.push(HostView {
            target: entry.target,
            alias: entry.alias,
            interval,
        });
    }

    Json(views)
}

#[derive(Debug, Deserialize)]
pub struct AddHostRequest {
    pub target: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub interval: Option<f64>,
}

pub async fn handle_add_host(
    State(state): State<AppState>,
    Json(req): Json<AddHostRequest>,
) -> impl IntoResponse {
    let Some(target) = normalize_target(&req.target) else {
        return (StatusCode::BAD_REQUEST, "Invalid target").into_response();
    };

    let interval = match req.interval {
        Some(secs) => match parse_interval(secs) {
            Ok(d) => d,
            Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
        },
        None => state.manager.config().default_interval,
    };

    {
        let mut hosts = state.hosts.lock().await;
        if !hosts.insert(HostEntry::new(&target).with_alias(req.alias)) {
            return (StatusCode::CONFLICT, "Target already monitored").into_response();
        }
    }

    if !state.manager.add_host(&target, interval).await {
        state.hosts.lock().await.remove(&target);
        return (StatusCode::CONFLICT, "Target already monitored").into_response();
    }

    if let Err(e) = state.save_hosts().await {
        tracing::error!("Failed to save host list: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    tracing::info!("Added host {}", target);
    let view = HostView {
        alias: alias_of(&state, &target).await,
        interval: state.manager.interval(&target).await.map(|d| d.as_secs_f64()),
        target,
    };
    (StatusCode::CREATED, Json(view)).into_response()
}

pub async fn handle_remove_host(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    let listed = state.hosts.lock().await.remove(&target);
    let stopped = state.manager.remove_host(&target).await;

    if !listed && !stopped {
        return StatusCode::NOT_FOUND.into_response();
    }

    if let Err(e) = state.save_hosts().await {
        tracing::error!("Failed to save host list: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    tracing::info!("Removed host {}", target);
    StatusCode::NO_CONTENT.into_response()
}

// ============================================================================
// API: Intervals
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub interval: f64,
}

pub async fn handle_update_interval(
    State(state): State<AppState>,
    Path(target): Path<String>,
    Json(req): Json<IntervalRequest>,
) -> impl IntoResponse {
    let interval = match parse_interval(req.interval) {
        Ok(d) => d,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    if !state.manager.update_interval(&target, interval).await {
        return StatusCode::NOT_FOUND.into_response();
    }

    StatusCode::NO_CONTENT.into_response()
}

pub async fn handle_set_interval_all(
    State(state): State<AppState>,
    Json(req): Json<IntervalRequest>,
) -> impl IntoResponse {
    let interval = match parse_interval(req.interval) {
        Ok(d) => d,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    state.manager.set_interval_all(interval).await;
    StatusCode::NO_CONTENT.into_response()
}

// ============================================================================
// API: Stats
// ============================================================================

pub async fn handle_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.manager.snapshot().await;
    let hosts = state.hosts.lock().await;

    let views: Vec<StatsView> = snapshot
        .into_values()
        .map(|stats| {
            let alias = hosts.get(stats.target()).and_then(|e| e.alias.clone());
            StatsView::new(stats, alias)
        })
        .collect();

    Json(views)
}

pub async fn handle_get_host(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match state.manager.stats(&target).await {
        Some(stats) => {
            let alias = alias_of(&state, &target).await;
            Json(StatsView::new(stats, alias)).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(target): Path<String>,
) -> impl IntoResponse {
    match state.manager.stats(&target).await {
        Some(stats) => {
            let samples: Vec<HistorySample> = stats.history().iter().cloned().collect();
            Json(samples).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.manager.snapshot().await;
    Json(HealthResponse {
        health: health(&snapshot),
        hosts: snapshot.len(),
        dropped_updates: state.manager.dropped_updates(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfig, ServerConfig};
    use crate::hosts::HostList;
    use crate::monitor::HostManager;
    use crate::probe::{ProbeOutcome, Prober};
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::response::Response;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct AlwaysUp;

    #[async_trait]
    impl Prober for AlwaysUp {
        async fn probe(&self, _target: &str) -> ProbeOutcome {
            ProbeOutcome::up(Some(1.0), "time=1 ms")
        }
    }

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let monitor = MonitorConfig {
            start_jitter: Duration::ZERO,
            ..MonitorConfig::default()
        };
        let config = ServerConfig {
            hosts_path: dir.path().join("hosts.json"),
            monitor: monitor.clone(),
            ..ServerConfig::default()
        };
        let (manager, _updates) = HostManager::new(monitor, Arc::new(AlwaysUp));
        AppState {
            config,
            manager: Arc::new(manager),
            hosts: Arc::new(Mutex::new(HostList::default())),
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn add_request(target: &str) -> Json<AddHostRequest> {
        Json(AddHostRequest {
            target: target.to_string(),
            alias: Some("web".to_string()),
            interval: None,
        })
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval(0.5).unwrap(), Duration::from_millis(500));
        assert!(parse_interval(0.0).is_err());
        assert!(parse_interval(-1.0).is_err());
        assert!(parse_interval(f64::NAN).is_err());
    }

    #[tokio::test]
    async fn test_add_host_normalizes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let resp = handle_add_host(State(state.clone()), add_request("https://example.com/x"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["target"], "example.com");
        assert_eq!(json["alias"], "web");

        assert!(state.manager.contains("example.com").await);
        let saved = HostList::load(&state.config.hosts_path).unwrap();
        assert_eq!(saved.get("example.com").unwrap().alias.as_deref(), Some("web"));

        state.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_add_host_rejects_bad_input_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let resp = handle_add_host(State(state.clone()), add_request("  ")).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = Json(AddHostRequest {
            target: "a.example".into(),
            alias: None,
            interval: Some(-2.0),
        });
        let resp = handle_add_host(State(state.clone()), req).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = handle_add_host(State(state.clone()), add_request("a.example")).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = handle_add_host(State(state.clone()), add_request("a.example")).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        state.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_remove_host() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        handle_add_host(State(state.clone()), add_request("a.example")).await;
        let resp = handle_remove_host(State(state.clone()), Path("a.example".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(!state.manager.contains("a.example").await);
        assert!(HostList::load(&state.config.hosts_path).unwrap().is_empty());

        let resp = handle_remove_host(State(state.clone()), Path("a.example".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_interval_clamps_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        handle_add_host(State(state.clone()), add_request("a.example")).await;

        let resp = handle_update_interval(
            State(state.clone()),
            Path("a.example".to_string()),
            Json(IntervalRequest { interval: 0.05 }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.manager.interval("a.example").await, Some(Duration::from_millis(200)));

        let resp = handle_update_interval(
            State(state.clone()),
            Path("missing".to_string()),
            Json(IntervalRequest { interval: 1.0 }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = handle_set_interval_all(State(state.clone()), Json(IntervalRequest { interval: 0.0 }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        state.manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_stats_and_health_views() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        handle_add_host(State(state.clone()), add_request("a.example")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let json = body_json(handle_get_host(State(state.clone()), Path("a.example".into())).await.into_response()).await;
        assert_eq!(json["target"], "a.example");
        assert_eq!(json["alias"], "web");
        assert_eq!(json["last_status"], "Up");
        assert_eq!(json["loss_percent"], 0.0);

        let json = body_json(handle_snapshot(State(state.clone())).await.into_response()).await;
        assert_eq!(json.as_array().unwrap().len(), 1);

        let json = body_json(handle_get_history(State(state.clone()), Path("a.example".into())).await.into_response()).await;
        assert!(!json.as_array().unwrap().is_empty());

        let json = body_json(handle_health(State(state.clone())).await.into_response()).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["hosts"], 1);

        let resp = handle_get_host(State(state.clone()), Path("missing".into())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        state.manager.stop_all().await;
    }
}
