//! Admin HTTP Integration Tests
//!
//! Builds the admin router the way the daemon does (tracker loaded from
//! disk, background services registered) and drives it with
//! `tower::ServiceExt::oneshot`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use pqs_tracker::{
    admin::{self, AdminState},
    query::{AggregateFunction, MeasureAggregator, QueryAggregators, SortColumn, SortRequest},
    services::tracker_services,
    Config, PqsTracker,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

// =============================================================================
// Helpers
// =============================================================================

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.data_dir = dir.path().to_path_buf();
    config.persistence.host_id = "qn-1".to_string();
    config
}

fn app(tracker: Arc<PqsTracker>) -> Router {
    let state = Arc::new(AdminState {
        tracker,
        services: None,
    });
    admin::router(state, &[])
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn post_json(app: &Router, uri: &str, body: Value) -> StatusCode {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

fn sorted_aggs() -> QueryAggregators {
    let mut aggs = QueryAggregators::group_by(
        &["service"],
        vec![MeasureAggregator::new("latency", AggregateFunction::Max)],
    );
    aggs.sort = Some(SortRequest {
        columns: vec![SortColumn {
            name: "service".to_string(),
            ascending: true,
        }],
    });
    aggs
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_recommendation_endpoint_reflects_usage_and_overrides() {
    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(PqsTracker::from_config(&config(&dir)));
    let tables = vec!["web".to_string()];
    for _ in 0..3 {
        tracker.record_aggs(&tables, &sorted_aggs(), "stats max(latency) by service | sort service");
    }
    let app = app(tracker.clone());

    let status = post_json(
        &app,
        "/api/pqs/aggs",
        json!({ "tableName": "web", "groupByColumns": ["region"], "measureColumns": ["bytes"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_json(&app, "/api/pqs/recommend/web").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["group_by_cols"], json!(["region", "service"]));
    assert_eq!(body["measure_cols"], json!(["bytes", "latency"]));
    assert_eq!(body["sort_cols"], json!(["service"]));
}

#[tokio::test]
async fn test_bad_override_bodies_are_rejected() {
    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(PqsTracker::from_config(&config(&dir)));
    let app = app(tracker.clone());

    let cases = [
        json!({ "tableName": "*", "groupByColumns": ["a"] }),
        json!({ "tableName": "t", "groupByColumns": [1, 2] }),
        json!({ "tableName": "t", "bogus": true }),
        json!(["not", "an", "object"]),
    ];
    for body in cases {
        assert_eq!(post_json(&app, "/api/pqs/aggs", body).await, StatusCode::BAD_REQUEST);
    }
    assert!(tracker.group_by_override("t").is_none());
}

#[tokio::test]
async fn test_state_served_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let pqid = {
        let tracker = PqsTracker::from_config(&config);
        let pqid = tracker
            .record_aggs(&["web".to_string()], &sorted_aggs(), "stats")
            .unwrap();
        tracker.flush().unwrap();
        pqid
    };

    let tracker = Arc::new(PqsTracker::from_config(&config));
    tracker.load();
    let app = app(tracker);

    let (status, body) = get_json(&app, &format!("/api/pqs/{}", pqid)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_usage"], 1);
    assert_eq!(body["virtual_tables"], json!(["web"]));
    assert!(body.get("search_aggs").is_some());

    let (_, summary) = get_json(&app, "/api/pqs").await;
    assert_eq!(summary["total_tracked_aggregations"], 1);
    assert_eq!(summary["promoted_aggregations"][pqid.as_str()], 1);
}

#[tokio::test]
async fn test_health_reports_running_services() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let tracker = Arc::new(PqsTracker::from_config(&config));
    let services = tracker_services(tracker.clone(), &config).unwrap();
    services.start_all().await.unwrap();

    let state = Arc::new(AdminState {
        tracker,
        services: Some(services.clone()),
    });
    let app = admin::router(state, &["http://localhost:3000".to_string()]);

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["flush"], "running");
    assert_eq!(body["services"]["stale_sweep"], "running");

    services.shutdown().await.unwrap();
    let (_, body) = get_json(&app, "/health").await;
    assert_eq!(body["status"], "degraded");
}
