//! Integration tests for the `specprobe` binary.

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use serde_json::{Value, json};
use std::path::Path;
use tempfile::TempDir;
use tokio::process::Command;

fn write_description(dir: &Path, paths: &Value) -> std::path::PathBuf {
    let path = dir.join("openapi.json");
    let description = json!({
        "openapi": "3.0.3",
        "info": {"title": "Ping", "version": "1.0.0"},
        "paths": paths
    });
    std::fs::write(&path, serde_json::to_string_pretty(&description).unwrap()).unwrap();
    path
}

async fn specprobe(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_specprobe"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("ANTHROPIC_API_KEY")
        .output()
        .await
        .expect("Failed to execute specprobe")
}

/// Answers the way a well-behaved API answers the deterministic scenarios.
async fn ping(headers: HeaderMap) -> StatusCode {
    match headers.get("accept").and_then(|v| v.to_str().ok()) {
        Some("application/x-unsupported") => StatusCode::NOT_ACCEPTABLE,
        _ => StatusCode::OK,
    }
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_endpoints_lists_operations() {
    let dir = TempDir::new().unwrap();
    let spec = write_description(
        dir.path(),
        &json!({
            "/ping": {"get": {"summary": "Liveness", "responses": {"200": {"description": "ok"}}}},
            "/items/{id}": {"delete": {"responses": {"204": {"description": "gone"}}}}
        }),
    );

    let output = specprobe(dir.path(), &["endpoints", "--spec", spec.to_str().unwrap()]).await;

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("/ping"));
    assert!(stdout.contains("/items/{id}"));
    assert!(stdout.contains("2 endpoint(s)"));
}

#[tokio::test]
async fn test_generate_writes_suite_without_network() {
    let dir = TempDir::new().unwrap();
    let spec = write_description(
        dir.path(),
        &json!({"/ping": {"get": {"responses": {"200": {"description": "ok"}}}}}),
    );

    let output = specprobe(
        dir.path(),
        &[
            "generate",
            "--spec",
            spec.to_str().unwrap(),
            "--no-oracle",
            "--base-url",
            "http://127.0.0.1:9",
            "--output-dir",
            "out",
        ],
    )
    .await;

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let suite: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("out/suite.json")).unwrap())
            .unwrap();
    assert_eq!(suite["api"]["title"], "Ping");
    assert_eq!(suite["base_url"], "http://127.0.0.1:9");
    assert_eq!(suite["units"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_run_exits_zero_when_everything_passes() {
    let base_url = spawn(Router::new().route("/ping", get(ping))).await;
    let dir = TempDir::new().unwrap();
    let spec = write_description(
        dir.path(),
        &json!({"/ping": {"get": {"responses": {"200": {"description": "ok"}}}}}),
    );

    let output = specprobe(
        dir.path(),
        &[
            "run",
            "--spec",
            spec.to_str().unwrap(),
            "--no-oracle",
            "--base-url",
            &base_url,
            "--output-dir",
            "reports",
            "--report",
            "both",
        ],
    )
    .await;

    assert_eq!(
        output.status.code(),
        Some(0),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let written: Vec<String> = std::fs::read_dir(dir.path().join("reports"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(written.len(), 2);
    assert!(written.iter().any(|name| name.ends_with(".json")));
    assert!(written.iter().any(|name| name.ends_with(".md")));
}

#[tokio::test]
async fn test_run_exits_one_on_failures() {
    let base_url = spawn(Router::new().route(
        "/ping",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    ))
    .await;
    let dir = TempDir::new().unwrap();
    let spec = write_description(
        dir.path(),
        &json!({"/ping": {"get": {"responses": {"200": {"description": "ok"}}}}}),
    );
    std::fs::write(
        dir.path().join("specprobe.yml"),
        "report:\n  format: json\n  output_dir: from-config\n",
    )
    .unwrap();

    let output = specprobe(
        dir.path(),
        &["run", "--spec", spec.to_str().unwrap(), "--no-oracle", "--base-url", &base_url],
    )
    .await;

    assert_eq!(output.status.code(), Some(1));
    let written: Vec<_> = std::fs::read_dir(dir.path().join("from-config"))
        .unwrap()
        .collect();
    assert_eq!(written.len(), 1);
}

#[tokio::test]
async fn test_invalid_description_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, r#"{"openapi": "3.0.0"}"#).unwrap();

    let output = specprobe(
        dir.path(),
        &["generate", "--spec", path.to_str().unwrap(), "--no-oracle"],
    )
    .await;

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("paths"));
}
