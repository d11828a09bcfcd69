//! Runs generated suites over real HTTP against a local axum server.

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use specprobe_core::{
    OutcomeStatus, ProbeConfig, ProbePipeline, ReportModel, ReqwestTransport, RunContext,
    TestOutcome,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn list_posts() -> Json<Value> {
    Json(json!([{"id": 1, "title": "Hello"}]))
}

async fn create_post(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::CREATED,
        Json(json!({"id": 2, "title": body.get("title").cloned().unwrap_or(Value::Null)})),
    )
}

async fn get_post(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    let id: u64 = id.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    if id == 0 {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(json!({"id": id, "title": "Hello"})))
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

async fn secure(headers: HeaderMap) -> StatusCode {
    match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        Some("secret") => StatusCode::OK,
        _ => StatusCode::UNAUTHORIZED,
    }
}

/// Fails loudly if any credential reaches it.
async fn public(headers: HeaderMap) -> StatusCode {
    if headers.contains_key("x-api-key") || headers.contains_key("authorization") {
        StatusCode::IM_A_TEAPOT
    } else {
        StatusCode::OK
    }
}

async fn spawn_target() -> SocketAddr {
    let app = Router::new()
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", get(get_post))
        .route("/broken", get(broken))
        .route("/slow", get(slow))
        .route("/secure", get(secure))
        .route("/public", get(public));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn description() -> Value {
    let ok = json!({"200": {"description": "ok"}});
    json!({
        "openapi": "3.0.3",
        "info": {"title": "Live", "version": "0.1.0"},
        "components": {
            "securitySchemes": {
                "ApiKeyAuth": {"type": "apiKey", "in": "header", "name": "X-API-Key"}
            }
        },
        "paths": {
            "/posts": {
                "get": {"responses": ok},
                "post": {
                    "requestBody": {
                        "required": true,
                        "content": {"application/json": {"schema": {
                            "type": "object",
                            "required": ["title"],
                            "properties": {"title": {"type": "string"}, "body": {"type": "string"}}
                        }}}
                    },
                    "responses": {"201": {"description": "created"}}
                }
            },
            "/posts/{id}": {
                "get": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}
                    ],
                    "responses": ok
                }
            },
            "/broken": {"get": {"responses": ok}},
            "/slow": {"get": {"responses": ok}},
            "/secure": {"get": {"security": [{"ApiKeyAuth": []}], "responses": ok}},
            "/public": {"get": {"responses": ok}}
        }
    })
}

async fn run_against(base_url: &str) -> ReportModel {
    let mut config = ProbeConfig::default();
    config.execution.unit_timeout_secs = 1;
    config.auth.api_key = Some("secret".to_string());
    let pipeline = ProbePipeline::new(None, Arc::new(ReqwestTransport::new().unwrap()));
    let ctx = RunContext::new(config).with_base_url(base_url);
    pipeline.run(&ctx, &description()).await.unwrap()
}

fn find<'a>(report: &'a ReportModel, unit_id: &str) -> &'a TestOutcome {
    report
        .outcomes
        .iter()
        .find(|o| o.unit_id == unit_id)
        .unwrap_or_else(|| panic!("no outcome for {}", unit_id))
}

#[tokio::test]
async fn test_live_run_classifies_outcomes() {
    let addr = spawn_target().await;
    let report = run_against(&format!("http://{}", addr)).await;

    assert_eq!(report.totals.total, 7 * 4);
    assert_eq!(report.outcomes.len(), report.totals.total);

    let created = find(&report, "post_posts.positive.1");
    assert_eq!(created.status, OutcomeStatus::Passed);
    assert_eq!(created.observed_status, Some(201));

    let broken = find(&report, "get_broken.positive.1");
    assert_eq!(broken.status, OutcomeStatus::Failed);
    assert_eq!(
        broken.detail.as_ref().unwrap().to_string(),
        "expected 200, got 500"
    );

    let slow = find(&report, "get_slow.positive.1");
    assert_eq!(slow.status, OutcomeStatus::Errored);
    assert!(slow.detail.as_ref().unwrap().to_string().contains("timed out"));
    assert!(slow.observed_status.is_none());

    assert_eq!(
        find(&report, "get_posts_id.negative.1").status,
        OutcomeStatus::Passed
    );
    assert_eq!(find(&report, "get_secure.positive.1").status, OutcomeStatus::Passed);
    assert_eq!(find(&report, "get_secure.security.1").observed_status, Some(401));
    assert_eq!(find(&report, "get_public.positive.1").status, OutcomeStatus::Passed);

    assert!(report.has_failures());
    assert!(
        report
            .failure_clusters
            .iter()
            .any(|c| c.key == "transport:timeout")
    );
    let latency = report.latency.as_ref().unwrap();
    assert!(latency.min_ms <= latency.max_ms);
}

#[tokio::test]
async fn test_unreachable_target_errors_every_unit() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let report = run_against(&format!("http://{}", addr)).await;

    assert_eq!(report.totals.errored, report.totals.total);
    assert!(report.latency.is_none());
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::Errored && o.attempts >= 1)
    );
}
