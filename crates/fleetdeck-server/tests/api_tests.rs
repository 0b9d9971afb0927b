//! Router tests against an in-memory cluster and recorded tool calls

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use fleetdeck_core::pod::{ContainerObservation, PodObservation, PodPhase};
use fleetdeck_kube::{EventRecord, Invocation, MockCluster, NamespaceInfo, RecordingTool, ToolOutput};
use fleetdeck_repo::{GithubFeed, VersionCache, VersionCatalog};
use fleetdeck_server::{AppConfig, AppState, router};

/// Nothing listens here, so any feed request fails fast
const DEAD_FEED: &str = "http://127.0.0.1:9/releases";

struct Harness {
    cluster: MockCluster,
    tool: RecordingTool,
    app: Router,
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.kubernetes.delete_timeout_secs = 1;
    config.kubernetes.delete_poll_interval_ms = 10;
    config.versions.cache_file = None;
    config
}

fn catalog(cache: VersionCache) -> VersionCatalog {
    let feed = GithubFeed::new(DEAD_FEED, 100, Duration::from_secs(1)).unwrap();
    VersionCatalog::new(Arc::new(feed), None, ChronoDuration::hours(6)).with_cache(cache)
}

fn fresh_cache() -> VersionCache {
    VersionCache {
        versions: vec!["1.86.0".to_string(), "1.85.0".to_string()],
        last_check: Some(Utc::now()),
        newest: Some("1.86.0".to_string()),
    }
}

fn harness_with(tool: RecordingTool, cache: VersionCache) -> Harness {
    let cluster = MockCluster::new();
    let state = AppState::new(
        Arc::new(cluster.clone()),
        Arc::new(tool.clone()),
        Arc::new(catalog(cache)),
        &test_config(),
    );
    Harness {
        cluster,
        tool,
        app: router(state),
    }
}

fn harness(tool: RecordingTool) -> Harness {
    harness_with(tool, fresh_cache())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, JsonValue) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, headers, body)
}

async fn send_raw(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8_lossy(&bytes).into_owned())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::delete(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn ready_pod(name: &str) -> PodObservation {
    PodObservation::new(name, PodPhase::Running).with_container(ContainerObservation::ready("main"))
}

fn deployment_namespace(name: &str) -> NamespaceInfo {
    let mut ns = NamespaceInfo::new(name);
    ns.labels.insert("app".to_string(), "n8n".to_string());
    ns.created_at = Some(Utc::now() - ChronoDuration::minutes(5));
    ns
}

fn cache_control(headers: &HeaderMap) -> &str {
    headers
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn is_script(invocation: &Invocation, name: &str) -> bool {
    invocation.program.ends_with(name)
}

// ============ Versions, health, cluster ============

#[tokio::test]
async fn test_available_versions_served_from_cache() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, headers, body) = send(&h.app, get("/api/versions/available")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"versions": ["1.86.0", "1.85.0"]}));
    assert_eq!(cache_control(&headers), "public, max-age=300");
}

#[tokio::test]
async fn test_stale_versions_survive_feed_outage() {
    let stale = VersionCache {
        last_check: Some(Utc::now() - ChronoDuration::days(1)),
        ..fresh_cache()
    };
    let h = harness_with(RecordingTool::succeeding(""), stale);
    let (status, _, body) = send(&h.app, get("/api/versions/available")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["versions"], json!(["1.86.0", "1.85.0"]));
}

#[tokio::test]
async fn test_health() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, headers, body) = send(&h.app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
    assert_eq!(cache_control(&headers), "no-cache");

    h.cluster.set_unreachable(true);
    let (status, _, body) = send(&h.app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["error"], "Cannot reach Kubernetes cluster");
}

#[tokio::test]
async fn test_cluster_resources() {
    let h = harness(RecordingTool::succeeding(""));
    h.cluster.set_node_memory(Some(4096 * 1024 * 1024));
    h.cluster.add_namespace(deployment_namespace("n8n-v1-85-0"));
    h.cluster.add_footprint("n8n-v1-85-0", "n8n-main-0", 512 * 1024 * 1024);
    h.cluster.add_footprint("n8n-system", "redis-0", 512 * 1024 * 1024);

    let (status, headers, body) = send(&h.app, get("/api/cluster/resources")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_control(&headers), "public, max-age=10");
    assert_eq!(body["memory"]["allocatable_mi"], 4096);
    assert_eq!(body["memory"]["used_mi"], 1024);
    assert_eq!(body["memory"]["available_mi"], 3072);
    assert_eq!(body["memory"]["utilization_percent"], 25);
    assert_eq!(body["can_deploy"], json!({"queue_mode": true, "regular_mode": true}));
    assert_eq!(body["deployments"][0]["namespace"], "n8n-v1-85-0");
    assert_eq!(body["deployments"][0]["mode"], "regular");
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_cluster_resources_degrade() {
    let h = harness(RecordingTool::succeeding(""));
    h.cluster.set_unreachable(true);

    let (status, _, body) = send(&h.app, get("/api/cluster/resources")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["error"].is_string());
    assert!(body["memory"].is_null());
    assert_eq!(body["can_deploy"], json!({"queue_mode": false, "regular_mode": false}));
}

#[tokio::test]
async fn test_infrastructure_status() {
    let h = harness(RecordingTool::succeeding(""));
    let mut redis = ready_pod("redis-0");
    redis.labels.insert("app".to_string(), "redis".to_string());
    h.cluster.set_pods("n8n-system", vec![redis]);

    let (status, headers, body) = send(&h.app, get("/api/infrastructure/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_control(&headers), "public, max-age=5");
    assert_eq!(body["redis"], json!({"healthy": true, "status": "healthy"}));
    assert_eq!(body["backup"], json!({"healthy": false, "status": "unavailable"}));
}

// ============ Deploy ============

#[tokio::test]
async fn test_deploy() {
    let h = harness(RecordingTool::succeeding("Deployed n8n 1.85.0\n"));
    let (status, headers, body) = send(
        &h.app,
        post_json("/api/namespaces", json!({"version": "1.85.0", "mode": "queue"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_control(&headers), "");
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Deployment initiated");
    assert_eq!(body["namespace"], "n8n-v1-85-0");
    assert_eq!(body["url"], "http://localhost:30950");
    assert_eq!(body["output"], "Deployed n8n 1.85.0\n");

    let calls = h.tool.invocations();
    assert_eq!(calls.len(), 1);
    assert!(is_script(&calls[0], "deploy-version.sh"));
    assert_eq!(calls[0].args[..2], ["1.85.0".to_string(), "--queue".to_string()]);
}

#[tokio::test]
async fn test_deploy_with_custom_name_and_snapshot() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, _, body) = send(
        &h.app,
        post_json(
            "/api/namespaces",
            json!({"version": "1.85.0", "mode": "regular", "name": "customer-a", "snapshot": "seed"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["namespace"], "customer-a");
    let args = &h.tool.invocations()[0].args;
    assert!(args.windows(2).any(|w| w == ["--name", "customer-a"]));
    assert!(args.windows(2).any(|w| w == ["--snapshot", "seed"]));
}

#[tokio::test]
async fn test_deploy_version_without_access_port() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, _, body) = send(
        &h.app,
        post_json("/api/namespaces", json!({"version": "99999999.0.0", "mode": "regular"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["namespace"], "n8n-v99999999-0-0");
    assert_eq!(body["url"], JsonValue::Null);
}

#[tokio::test]
async fn test_deploy_rejects_invalid_input_before_running_tools() {
    let h = harness(RecordingTool::succeeding(""));

    let cases = [
        json!({"version": "1.85", "mode": "queue"}),
        json!({"version": "1.85.0", "mode": "cluster"}),
        json!({"version": "1.85.0", "mode": "queue", "name": "Bad_Name"}),
        json!({"version": "1.85.0", "mode": "queue", "snapshot": "../etc/passwd"}),
        json!({"mode": "queue"}),
    ];
    for request in cases {
        let (status, _, body) = send(&h.app, post_json("/api/namespaces", request.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", request);
        assert_eq!(body["status"], 400);
        assert!(body["message"].is_string());
    }
    assert!(h.tool.invocations().is_empty());
}

#[tokio::test]
async fn test_deploy_failure_reports_output() {
    let tool = RecordingTool::with_responder(|_| {
        Ok(ToolOutput {
            status: Some(1),
            stdout: "Installing chart\n".to_string(),
            stderr: "Error: chart not found\n".to_string(),
        })
    });
    let h = harness(tool);
    let (status, _, body) = send(
        &h.app,
        post_json("/api/namespaces", json!({"version": "1.85.0", "mode": "regular"})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Deployment failed: Error: chart not found");
    let details = body["details"].as_str().unwrap();
    assert!(details.contains("Installing chart"));
    assert!(details.contains("chart not found"));
}

#[tokio::test]
async fn test_deploy_terminating_namespace_race_is_success() {
    let h = harness(RecordingTool::failing(
        1,
        "Error: namespaces \"n8n-v1-85-0\" already exists",
    ));
    let (status, _, body) = send(
        &h.app,
        post_json("/api/namespaces", json!({"version": "1.85.0", "mode": "regular"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["namespace"], "n8n-v1-85-0");
}

// ============ Delete ============

#[tokio::test]
async fn test_delete_missing_namespace() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, _, body) = send(&h.app, delete("/api/namespaces/n8n-v9-9-9")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Namespace n8n-v9-9-9 not found");
    assert!(h.tool.invocations().is_empty());
}

#[tokio::test]
async fn test_delete_namespace() {
    let h = harness(RecordingTool::succeeding(""));
    h.cluster.add_namespace(deployment_namespace("n8n-v1-85-0"));

    let (status, _, body) = send(&h.app, delete("/api/namespaces/n8n-v1-85-0")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "message": "Namespace n8n-v1-85-0 removed"}));
    assert!(!h.cluster.has_namespace("n8n-v1-85-0"));

    let calls = h.tool.invocations();
    assert_eq!(calls[0].program, "helm");
    assert_eq!(calls[0].args[..2], ["uninstall".to_string(), "n8n-v1-85-0".to_string()]);
}

#[tokio::test]
async fn test_delete_waits_for_terminating_namespace() {
    let h = harness(RecordingTool::succeeding(""));
    h.cluster.add_namespace(deployment_namespace("n8n-v1-85-0"));
    h.cluster.set_deletion_delay(3);

    let (status, _, _) = send(&h.app, delete("/api/namespaces/n8n-v1-85-0")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.cluster.has_namespace("n8n-v1-85-0"));
}

#[tokio::test(start_paused = true)]
async fn test_delete_timeout() {
    let h = harness(RecordingTool::succeeding(""));
    h.cluster.add_namespace(deployment_namespace("n8n-v1-85-0"));
    h.cluster.set_deletion_delay(1_000_000);

    let (status, _, body) = send(&h.app, delete("/api/namespaces/n8n-v1-85-0")).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["message"], "Namespace deletion timed out");
}

#[tokio::test]
async fn test_delete_without_wait() {
    let h = harness(RecordingTool::succeeding(""));
    h.cluster.add_namespace(deployment_namespace("n8n-v1-85-0"));
    h.cluster.set_deletion_delay(1_000_000);

    let (status, _, _) = send(&h.app, delete("/api/namespaces/n8n-v1-85-0?wait=false")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.cluster.has_namespace("n8n-v1-85-0"));
}

// ============ Inspection ============

#[tokio::test]
async fn test_list_deployments() {
    let tool = RecordingTool::with_responder(|inv| {
        if inv.program == "helm" && inv.args.first().map(String::as_str) == Some("get") {
            Ok(ToolOutput::ok(
                r#"{"database":{"isolated":{"snapshot":{"enabled":true,"name":"seed.sql"}}}}"#,
            ))
        } else {
            Ok(ToolOutput::ok(""))
        }
    });
    let h = harness(tool);
    h.cluster.add_namespace(deployment_namespace("n8n-v1-85-0"));
    h.cluster.add_namespace(NamespaceInfo::new("kube-system"));
    h.cluster
        .set_pods("n8n-v1-85-0", vec![ready_pod("postgres-0"), ready_pod("n8n-main-7d9f")]);

    let (status, _, body) = send(&h.app, get("/api/namespaces")).await;
    assert_eq!(status, StatusCode::OK);

    let versions = body["versions"].as_array().unwrap();
    assert_eq!(versions.len(), 1);
    let deployment = &versions[0];
    assert_eq!(deployment["version"], "1.85.0");
    assert_eq!(deployment["namespace"], "n8n-v1-85-0");
    assert_eq!(deployment["mode"], "regular");
    assert_eq!(deployment["phase"], "running");
    assert_eq!(deployment["status"], "running");
    assert_eq!(deployment["url"], "http://localhost:30950");
    assert_eq!(deployment["isolated_db"], true);
    assert_eq!(deployment["snapshot"], "seed");
    assert_eq!(deployment["pods"], json!({"ready": 2, "total": 2}));
}

#[tokio::test]
async fn test_namespace_status() {
    let h = harness(RecordingTool::succeeding(""));
    let (_, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/status")).await;
    assert_eq!(body, json!({"exists": false, "namespace": "n8n-v1-85-0"}));

    h.cluster.add_namespace(deployment_namespace("n8n-v1-85-0"));
    let (_, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/status")).await;
    assert_eq!(body["exists"], true);

    let (status, _, _) = send(&h.app, get("/api/namespaces/Not_Valid/status")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_namespace_events() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/events")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"events": []}));

    let now = Utc::now();
    for (i, reason) in ["Scheduled", "Pulled", "Started"].iter().enumerate() {
        h.cluster.add_event(
            "n8n-v1-85-0",
            EventRecord {
                event_type: Some("Normal".to_string()),
                reason: Some(reason.to_string()),
                message: Some(format!("{} pod", reason)),
                object: "Pod/n8n-main-0".to_string(),
                count: Some(1),
                first_timestamp: Some(now + ChronoDuration::seconds(i as i64)),
                last_timestamp: Some(now + ChronoDuration::seconds(i as i64)),
            },
        );
    }

    let (_, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/events?limit=2")).await;
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["reason"], "Started");
    assert_eq!(events[0]["type"], "Normal");
}

#[tokio::test]
async fn test_namespace_pods() {
    let h = harness(RecordingTool::succeeding(""));
    h.cluster.set_pods("n8n-v1-85-0", vec![ready_pod("postgres-0")]);

    let (status, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/pods")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pods"][0]["name"], "postgres-0");
    assert_eq!(body["pods"][0]["phase"], "Running");
}

#[tokio::test]
async fn test_namespace_logs() {
    let h = harness(RecordingTool::succeeding(""));
    h.cluster
        .set_pods("n8n-v1-85-0", vec![ready_pod("postgres-0"), ready_pod("n8n-main-0")]);
    h.cluster.set_logs("n8n-v1-85-0", "postgres-0", "starting\ndatabase system is ready\n");
    h.cluster.break_logs("n8n-v1-85-0", "n8n-main-0");

    let (status, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/logs?tail=1")).await;
    assert_eq!(status, StatusCode::OK);
    let logs = body["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["pod"], "postgres-0");
    assert_eq!(logs[0]["logs"], "database system is ready");
    assert!(logs[0]["error"].is_null());
    assert_eq!(logs[1]["pod"], "n8n-main-0");
    assert!(logs[1]["error"].is_string());

    let (_, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/logs?pod=postgres-0")).await;
    assert_eq!(body["logs"].as_array().unwrap().len(), 1);

    let (status, _, _) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/logs?tail=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/logs?pod=bad%20pod")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_namespace_config() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"config": {}}));

    let data = BTreeMap::from([("EXECUTIONS_MODE".to_string(), "queue".to_string())]);
    h.cluster.set_config_map("n8n-v1-85-0", "n8n-config", data);
    let (_, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/config")).await;
    assert_eq!(body["config"]["EXECUTIONS_MODE"], "queue");
}

#[tokio::test]
async fn test_namespace_phase() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/phase")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "db-starting");

    h.cluster
        .set_pods("n8n-v1-85-0", vec![ready_pod("postgres-0"), ready_pod("n8n-main-0")]);
    let (_, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/phase")).await;
    assert_eq!(body["phase"], "running");
    assert_eq!(body["label"], "Running");

    // Queue mode also needs workers
    let data = BTreeMap::from([("EXECUTIONS_MODE".to_string(), "queue".to_string())]);
    h.cluster.set_config_map("n8n-v1-85-0", "n8n-config", data);
    let (_, _, body) = send(&h.app, get("/api/namespaces/n8n-v1-85-0/phase")).await;
    assert_eq!(body["phase"], "workers-starting");
}

#[tokio::test]
async fn test_phase_stream_completes_for_running_deployment() {
    let h = harness(RecordingTool::succeeding(""));
    h.cluster
        .set_pods("n8n-v1-85-0", vec![ready_pod("postgres-0"), ready_pod("n8n-main-0")]);

    let (status, headers, body) = send_raw(&h.app, get("/api/namespaces/n8n-v1-85-0/events/stream")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(cache_control(&headers), "no-cache");
    assert_eq!(
        headers.get("x-accel-buffering").and_then(|v| v.to_str().ok()),
        Some("no")
    );

    let connected = body.find("event: connected").unwrap();
    let phase = body.find("event: phase").unwrap();
    let complete = body.find("event: complete").unwrap();
    assert!(connected < phase && phase < complete);
    assert!(body.contains(r#"data: {"namespace":"n8n-v1-85-0"}"#));
    assert!(body.contains(r#""phase":"running""#));
}

#[tokio::test]
async fn test_phase_stream_rejects_invalid_namespace() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, _, body) = send(&h.app, get("/api/namespaces/INVALID/events/stream")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

// ============ Snapshots ============

const LISTING: &str = "n8n-20240115-093000.sql\nbefore-upgrade.sql\n";

fn listing_tool() -> RecordingTool {
    RecordingTool::with_responder(|inv| {
        if !inv.program.ends_with("list-snapshots.sh") {
            return Ok(ToolOutput::ok("done"));
        }
        if inv.args.iter().any(|a| a == "--named-only") {
            Ok(ToolOutput::ok("before-upgrade.sql\n"))
        } else {
            Ok(ToolOutput::ok(LISTING))
        }
    })
}

#[tokio::test]
async fn test_list_snapshots() {
    let h = harness(listing_tool());
    let (status, headers, body) = send(&h.app, get("/api/snapshots")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_control(&headers), "public, max-age=10");
    let snapshots = body["snapshots"].as_array().unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0]["type"], "auto");
    assert_eq!(snapshots[0]["timestamp"], "2024-01-15 09:30:00");
    assert_eq!(snapshots[1]["type"], "named");
    assert_eq!(snapshots[1]["name"], "before-upgrade");

    let (_, _, body) = send(&h.app, get("/api/snapshots/named")).await;
    assert_eq!(body["snapshots"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_snapshots_when_storage_unavailable() {
    let h = harness(RecordingTool::failing(1, "backup-storage not ready"));
    let (status, _, body) = send(&h.app, get("/api/snapshots")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"snapshots": []}));
}

#[tokio::test]
async fn test_create_snapshots() {
    let h = harness(listing_tool());
    let (status, _, body) = send(&h.app, post_json("/api/snapshots/create", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _, body) = send(
        &h.app,
        post_json("/api/snapshots/create-named", json!({"name": "before-upgrade", "source": "n8n-v1-85-0"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Named snapshot 'before-upgrade' created");

    let calls = h.tool.invocations();
    assert!(is_script(&calls[0], "create-snapshot.sh"));
    assert!(is_script(&calls[1], "create-named-snapshot.sh"));
    assert_eq!(calls[1].args, vec!["before-upgrade", "--source", "n8n-v1-85-0"]);
}

#[tokio::test]
async fn test_create_named_snapshot_validation() {
    let h = harness(listing_tool());
    let (status, _, _) = send(
        &h.app,
        post_json("/api/snapshots/create-named", json!({"name": "bad name!"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.tool.invocations().is_empty());
}

#[tokio::test]
async fn test_delete_snapshot() {
    let h = harness(listing_tool());
    let (status, _, body) = send(&h.app, delete("/api/snapshots/before-upgrade.sql")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Snapshot before-upgrade.sql deleted");
    assert_eq!(h.tool.invocations()[0].stdin.as_deref(), Some("yes\n"));

    let (status, _, _) = send(&h.app, delete("/api/snapshots/notes.txt")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.tool.invocations().len(), 1);
}

#[tokio::test]
async fn test_restore_failure_is_reported_in_body() {
    let h = harness(RecordingTool::failing(2, "psql: connection refused"));
    let (status, _, body) = send(
        &h.app,
        post_json("/api/snapshots/restore", json!({"snapshot": "before-upgrade.sql"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Restore failed");
    assert_eq!(body["error"], "psql: connection refused");
}

#[tokio::test]
async fn test_restore_to_deployment() {
    let h = harness(listing_tool());
    let (status, _, body) = send(
        &h.app,
        post_json(
            "/api/snapshots/restore-to-deployment",
            json!({"snapshot": "before-upgrade", "namespace": "n8n-v1-85-0"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(h.tool.invocations()[0].args, vec!["before-upgrade", "n8n-v1-85-0"]);

    let (status, _, _) = send(
        &h.app,
        post_json(
            "/api/snapshots/restore-to-deployment",
            json!({"snapshot": "before-upgrade", "namespace": "../kube-system"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

const BOUNDARY: &str = "fleetdeck-test-boundary";

fn upload_request(name: &str, filename: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\n{name}\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: application/sql\r\n\r\n{content}\r\n--{b}--\r\n",
        b = BOUNDARY,
    );
    Request::post("/api/snapshots/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn with_backup_pod(cluster: &MockCluster) {
    let mut pod = ready_pod("backup-storage-0");
    pod.labels.insert("app".to_string(), "backup-storage".to_string());
    cluster.set_pods("n8n-system", vec![pod]);
}

#[tokio::test]
async fn test_upload_snapshot() {
    let h = harness(RecordingTool::with_responder(|invocation| {
        let staged = std::fs::read_to_string(&invocation.args[1]).unwrap();
        assert_eq!(staged, "CREATE TABLE t();");
        Ok(ToolOutput::ok(""))
    }));
    with_backup_pod(&h.cluster);

    let (status, _, body) = send(&h.app, upload_request("seed", "dump.sql", "CREATE TABLE t();")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["filename"], "seed.sql");

    let calls = h.tool.invocations();
    assert_eq!(calls[0].program, "kubectl");
    assert_eq!(calls[0].args[0], "cp");
    assert_eq!(calls[0].args[2], "n8n-system/backup-storage-0:/backups/snapshots/seed.sql");
}

#[tokio::test]
async fn test_upload_validation() {
    let h = harness(RecordingTool::succeeding(""));
    with_backup_pod(&h.cluster);

    let (status, _, _) = send(&h.app, upload_request("seed", "dump.txt", "data")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&h.app, upload_request("bad/name", "dump.sql", "data")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&h.app, upload_request("seed", "dump.sql", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.tool.invocations().is_empty());
}

#[tokio::test]
async fn test_upload_without_backup_pod() {
    let h = harness(RecordingTool::succeeding(""));
    let (status, _, body) = send(&h.app, upload_request("seed", "dump.sql", "data")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Could not find backup-storage pod in n8n-system");
}
