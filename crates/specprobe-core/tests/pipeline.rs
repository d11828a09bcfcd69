//! End-to-end runs of the pipeline over scripted oracle and transport doubles.

use serde_json::{Value, json};
use specprobe_core::testing::{ScriptedOracle, ScriptedReply, ScriptedTransport};
use specprobe_core::{
    Category, DropReason, OracleUnavailableError, OutcomeStatus, ProbeConfig, ProbePipeline,
    RunContext, ScenarioOrigin,
};
use std::sync::Arc;
use std::time::Duration;

fn blog_api() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {"title": "Blog", "version": "1.2.0"},
        "servers": [{"url": "http://blog.test/api"}],
        "paths": {
            "/posts/{id}": {
                "get": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}
                    ],
                    "responses": {"200": {"description": "a post"}, "404": {"description": "missing"}}
                }
            }
        }
    })
}

fn oracle_envelope() -> String {
    let envelope = json!({
        "scenarios": [
            {
                "category": "positive",
                "endpoint": "GET /posts/{id}",
                "description": "fetch an existing post",
                "request": {"path_params": {"id": 1}},
                "expected_status": 200,
                "assertions": {"json_body": true, "required_fields": ["id", "title"]}
            },
            {
                "category": "negative",
                "endpoint": "GET /posts/{id}",
                "description": "non-numeric id",
                "request": {"path_params": {"id": "abc"}},
                "expected_status": "4xx"
            },
            {
                "endpoint": "GET /posts/{id}",
                "request": {"path_params": {"id": 2}},
                "expected_status": 200
            },
            {
                "description": "no category either",
                "request": {"path_params": {"id": 3}},
                "expected_status": 200
            }
        ]
    });
    format!("Here are the scenarios:\n```json\n{}\n```", envelope)
}

fn blog_transport() -> ScriptedTransport {
    ScriptedTransport::new()
        .on("/posts/abc", ScriptedReply::text(400, "bad id"))
        .on("/posts/0", ScriptedReply::status(404))
        .on(
            "/posts/1",
            ScriptedReply::json(200, &json!({"id": 1, "title": "Hello"})),
        )
}

#[tokio::test]
async fn test_oracle_candidates_are_validated_and_topped_up() {
    let oracle = ScriptedOracle::new().with_response(oracle_envelope());
    let transport = blog_transport();
    let pipeline = ProbePipeline::new(Some(Arc::new(oracle.clone())), Arc::new(transport.clone()));
    let ctx = RunContext::new(ProbeConfig::default());

    let suite = pipeline.generate(&ctx, &blog_api()).await.unwrap();

    assert_eq!(oracle.call_count(), 1);
    assert_eq!(suite.synthesis.dropped_candidates.len(), 2);
    assert!(
        suite
            .synthesis
            .dropped_candidates
            .iter()
            .all(|d| d.reason == DropReason::MissingCategory)
    );
    assert_eq!(suite.synthesis.oracle_scenarios, 2);
    assert_eq!(suite.synthesis.fallback_scenarios, 2);
    assert!(suite.synthesis.fallback_endpoints.is_empty());

    let categories: Vec<Category> = suite.units.iter().map(|u| u.category).collect();
    assert_eq!(categories, Category::all().to_vec());
    assert_eq!(suite.units[0].origin, ScenarioOrigin::Oracle);
    assert_eq!(suite.units[2].origin, ScenarioOrigin::Fallback);
    assert_eq!(suite.units[0].id, "get_posts_id.positive.1");

    let report = pipeline.execute(&ctx, &suite).await;
    assert_eq!(report.totals.total, 4);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Passed);
    assert_eq!(report.outcomes[1].status, OutcomeStatus::Passed);
    assert_eq!(report.outcomes[2].status, OutcomeStatus::Passed);
    assert_eq!(report.outcomes[0].observed_status, Some(200));
    assert_eq!(report.synthesis.dropped_candidates.len(), 2);
    assert_eq!(report.api.title, "Blog");
}

#[tokio::test]
async fn test_oracle_failure_falls_back_for_every_endpoint() {
    let oracle = ScriptedOracle::new().with_error(OracleUnavailableError::Capacity(529));
    let pipeline = ProbePipeline::new(Some(Arc::new(oracle)), Arc::new(blog_transport()));
    let ctx = RunContext::new(ProbeConfig::default());

    let suite = pipeline.generate(&ctx, &blog_api()).await.unwrap();

    assert_eq!(suite.units.len(), 4);
    assert!(suite.units.iter().all(|u| u.origin == ScenarioOrigin::Fallback));
    assert_eq!(suite.synthesis.fallback_endpoints.len(), 1);

    let negative = &suite.units[1];
    assert!(negative.request.url.ends_with("/posts/not-a-number"));
    assert_eq!(negative.category, Category::Negative);
}

#[tokio::test(start_paused = true)]
async fn test_slow_oracle_times_out_into_fallback() {
    let oracle = ScriptedOracle::new()
        .with_response(oracle_envelope())
        .with_delay(Duration::from_secs(30));
    let mut config = ProbeConfig::default();
    config.oracle.timeout_secs = 2;
    let pipeline = ProbePipeline::new(Some(Arc::new(oracle)), Arc::new(blog_transport()));
    let ctx = RunContext::new(config);

    let suite = pipeline.generate(&ctx, &blog_api()).await.unwrap();

    assert!(suite.units.iter().all(|u| u.origin == ScenarioOrigin::Fallback));
    assert!(suite.synthesis.dropped_candidates.is_empty());
}

#[tokio::test]
async fn test_compiled_urls_have_no_placeholders() {
    let description = json!({
        "openapi": "3.0.0",
        "info": {"title": "Nested", "version": "1"},
        "paths": {
            "/users/{userId}/posts/{postId}": {
                "parameters": [
                    {"name": "userId", "in": "path", "required": true, "schema": {"type": "string"}}
                ],
                "get": {
                    "parameters": [
                        {"name": "postId", "in": "path", "required": true, "schema": {"type": "integer"}},
                        {"name": "expand", "in": "query", "required": true, "schema": {"type": "boolean"}}
                    ],
                    "responses": {"200": {"description": "ok"}}
                },
                "delete": {"responses": {"204": {"description": "gone"}}}
            }
        }
    });
    let pipeline = ProbePipeline::new(None, Arc::new(ScriptedTransport::new()));
    let ctx = RunContext::new(ProbeConfig::default()).with_base_url("http://127.0.0.1:9");

    let suite = pipeline.generate(&ctx, &description).await.unwrap();

    assert_eq!(suite.units.len(), 8);
    assert!(suite.synthesis.compile_defects.is_empty());
    for unit in &suite.units {
        assert!(!unit.request.url.contains('{'), "unresolved url {}", unit.request.url);
        assert!(unit.request.url.starts_with("http://127.0.0.1:9/users/"));
    }
}

#[tokio::test]
async fn test_suite_round_trips_through_json() {
    let pipeline = ProbePipeline::new(None, Arc::new(ScriptedTransport::new()));
    let ctx = RunContext::new(ProbeConfig::default());
    let suite = pipeline.generate(&ctx, &blog_api()).await.unwrap();

    let text = serde_json::to_string_pretty(&suite).unwrap();
    let parsed: specprobe_core::GeneratedSuite = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.units, suite.units);
    assert_eq!(parsed.run_id, ctx.run_id);
}
