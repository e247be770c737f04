//! Drives the axum router in-process with `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use lifeline_core::config::{EngineConfig, RoutingConfig};
use lifeline_core::Config;
use lifeline_engine::EngineRuntime;
use lifeline_graph::GraphSpec;
use lifeline_server::{build_router, startup};
use serde_json::{json, Value};
use tower::ServiceExt;

const SEED: &str = r#"
nodes:
  - id: st-marys
    kind: RequestSite
  - id: central-bank
    kind: BloodBank
    verified: true
    stock: { "O-": 6, "A+": 2 }
  - id: donor-17
    kind: Donor
    verified: true
    stock: { "O+": 1 }
edges:
  - { from: st-marys, to: central-bank, weight: 4.0 }
  - { from: st-marys, to: donor-17, weight: 1.5 }
"#;

fn config() -> Config {
    Config {
        engine: EngineConfig {
            tick_interval_secs: 0,
            cycle_interval_ms: 0,
            ..EngineConfig::default()
        },
        routing: RoutingConfig {
            worker_threads: 2,
            ..RoutingConfig::default()
        },
        ..Config::default()
    }
}

fn app() -> (Router, EngineRuntime) {
    let graph = GraphSpec::from_yaml_str(SEED).unwrap().into_graph().unwrap();
    let (state, runtime) = startup::build_app_state(&config(), graph).unwrap();
    (build_router(state, "*"), runtime)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn submission(id: &str, group: &str, units: u32, urgency: &str) -> Value {
    json!({
        "id": id,
        "patient_name": format!("Patient {id}"),
        "blood_group": group,
        "quantity_units": units,
        "urgency": urgency,
        "requester_type": "Hospital",
        "location_node_id": "st-marys",
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, runtime) = app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    runtime.shutdown().await;
}

#[tokio::test]
async fn submit_then_list_queue() {
    let (app, runtime) = app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/requests",
        Some(submission("REQ-1", "O-", 4, "Critical")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "REQ-1");

    let (status, body) = send(&app, Method::GET, "/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["request_id"], "REQ-1");
    assert_eq!(body[0]["priority_score"], 138);
    assert_eq!(body[0]["rank"], 1);

    let (_, filtered) = send(&app, Method::GET, "/queue?blood_group=O%2B", None).await;
    assert_eq!(filtered.as_array().unwrap().len(), 0);
    let (_, filtered) = send(&app, Method::GET, "/queue?urgency=Critical&search=req-1", None).await;
    assert_eq!(filtered.as_array().unwrap().len(), 1);

    let (status, stats) = send(&app, Method::GET, "/queue/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_active"], 1);
    assert_eq!(stats["critical"], 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn malformed_submission_is_rejected() {
    let (app, runtime) = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/requests",
        Some(submission("REQ-1", "Q+", 1, "High")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("blood group"));

    let (_, queue) = send(&app, Method::GET, "/queue", None).await;
    assert!(queue.as_array().unwrap().is_empty());
    runtime.shutdown().await;
}

#[tokio::test]
async fn undecodable_fields_get_json_400() {
    let (app, runtime) = app();

    let mut body = submission("REQ-1", "O-", 1, "Urgent");
    let (status, err) = send(&app, Method::POST, "/requests", Some(body.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].as_str().unwrap().contains("Urgent"));

    body["urgency"] = json!("High");
    body["quantity_units"] = json!(-2);
    let (status, err) = send(&app, Method::POST, "/requests", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].is_string());

    let (status, err) = send(
        &app,
        Method::PUT,
        "/inventory/donor-17/O%2B",
        Some(json!({ "units": -1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].is_string());

    let (status, err) = send(
        &app,
        Method::GET,
        "/donors/nearest?blood_group=O%2B&location=st-marys&limit=many",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(err["error"].is_string());

    let (_, queue) = send(&app, Method::GET, "/queue", None).await;
    assert!(queue.as_array().unwrap().is_empty());
    runtime.shutdown().await;
}

#[tokio::test]
async fn cycle_match_and_fulfil() {
    let (app, runtime) = app();
    send(
        &app,
        Method::POST,
        "/requests",
        Some(submission("REQ-1", "A+", 2, "High")),
    )
    .await;

    let (status, report) = send(&app, Method::POST, "/cycle", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["attempted"], 1);
    // donor-17 is nearer but holds a single O+ unit.
    assert_eq!(report["matched"][0]["chosen_node_id"], "central-bank");
    assert_eq!(report["matched"][0]["path_cost"], 4.0);

    let (status, request) = send(&app, Method::POST, "/requests/REQ-1/fulfill", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(request["status"], "Fulfilled");

    let (status, _) = send(&app, Method::POST, "/requests/REQ-1/fulfill", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    runtime.shutdown().await;
}

#[tokio::test]
async fn fulfilling_pending_request_conflicts() {
    let (app, runtime) = app();
    send(
        &app,
        Method::POST,
        "/requests",
        Some(submission("REQ-1", "A+", 1, "Normal")),
    )
    .await;
    let (status, _) = send(&app, Method::POST, "/requests/REQ-1/fulfill", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    runtime.shutdown().await;
}

#[tokio::test]
async fn cancel_and_override_lifecycle() {
    let (app, runtime) = app();
    send(
        &app,
        Method::POST,
        "/requests",
        Some(submission("REQ-1", "O-", 1, "Normal")),
    )
    .await;

    let (status, entry) = send(
        &app,
        Method::POST,
        "/requests/REQ-1/override",
        Some(json!({ "authorized_by": "DR-9", "reason": "multi-trauma" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entry["previous_score"], 72);
    assert_eq!(entry["new_score"], 122);

    let (_, audit) = send(&app, Method::GET, "/audit/overrides?limit=5", None).await;
    assert_eq!(audit[0]["authorized_by"], "DR-9");

    let (status, _) = send(&app, Method::DELETE, "/requests/REQ-1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, Method::DELETE, "/requests/REQ-1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        "/requests/REQ-404/override",
        Some(json!({ "authorized_by": "DR-9", "reason": "multi-trauma" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    runtime.shutdown().await;
}

#[tokio::test]
async fn nearest_donors_in_match_order() {
    let (app, runtime) = app();
    let (status, body) = send(
        &app,
        Method::GET,
        "/donors/nearest?blood_group=O+&location=st-marys&limit=5",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let candidates = body["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0]["node_id"], "donor-17");
    assert_eq!(candidates[1]["node_id"], "central-bank");
    assert_eq!(candidates[1]["blood_group"], "O-");
    assert!(body.get("no_match").is_none());

    let (status, body) = send(
        &app,
        Method::GET,
        "/donors/nearest?blood_group=AB-&location=st-marys&quantity=7",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["candidates"].as_array().unwrap().is_empty());
    assert_eq!(body["no_match"], "no_compatible_stock");

    let (status, _) = send(
        &app,
        Method::GET,
        "/donors/nearest?blood_group=O%2B&location=nowhere",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    runtime.shutdown().await;
}

#[tokio::test]
async fn stock_updates_and_graph_replacement() {
    let (app, runtime) = app();

    let (status, _) = send(
        &app,
        Method::PUT,
        "/inventory/donor-17/O%2B",
        Some(json!({ "units": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = send(
        &app,
        Method::GET,
        "/donors/nearest?blood_group=O%2B&location=st-marys",
        None,
    )
    .await;
    assert_eq!(body["candidates"][0]["node_id"], "central-bank");

    let (status, _) = send(
        &app,
        Method::PUT,
        "/inventory/ghost/O%2B",
        Some(json!({ "units": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::PUT,
        "/graph",
        Some(json!({
            "nodes": [
                { "id": "st-marys", "kind": "RequestSite" },
                { "id": "north-bank", "kind": "BloodBank", "verified": true, "stock": { "O+": 9 } }
            ],
            "edges": [ { "from": "st-marys", "to": "north-bank", "weight": 2.0 } ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = send(
        &app,
        Method::GET,
        "/donors/nearest?blood_group=O%2B&location=st-marys",
        None,
    )
    .await;
    assert_eq!(body["candidates"][0]["node_id"], "north-bank");

    let (status, _) = send(
        &app,
        Method::PUT,
        "/graph",
        Some(json!({
            "nodes": [ { "id": "a", "kind": "BloodBank" } ],
            "edges": [ { "from": "a", "to": "missing", "weight": 1.0 } ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    runtime.shutdown().await;
}

#[tokio::test]
async fn matches_and_metrics_after_cycle() {
    let (app, runtime) = app();
    send(
        &app,
        Method::POST,
        "/requests",
        Some(submission("REQ-1", "O-", 1, "Critical")),
    )
    .await;
    send(&app, Method::POST, "/cycle", None).await;

    let (status, metrics) = send(&app, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["matches_committed"], 1);
    assert_eq!(metrics["cycles_run"], 1);

    // The read model fills asynchronously; give the dispatcher a moment.
    let mut matches = Value::Null;
    for _ in 0..50 {
        let (_, body) = send(&app, Method::GET, "/matches", None).await;
        if body.as_array().is_some_and(|m| !m.is_empty()) {
            matches = body;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(matches[0]["request_id"], "REQ-1");
    assert_eq!(matches[0]["chosen_node_id"], "central-bank");

    runtime.shutdown().await;
}
