//! Integration tests for the background update check: the concurrent
//! spawn/finish protocol and the staleness gate against a live (mock)
//! release feed.

use cordon_core::update::{spawn_check, UpdateChecker, UpdateState};
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn clear_gating_env() {
    std::env::remove_var("CI");
    std::env::remove_var("CORDON_NO_UPDATE_CHECK");
}

fn release_body(tag: &str) -> serde_json::Value {
    serde_json::json!({
        "tag_name": tag,
        "html_url": "https://github.com/cordon-dev/cordon/releases/latest",
    })
}

#[tokio::test]
#[serial]
async fn background_check_delivers_after_the_command() {
    clear_gating_env();
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/cordon-dev/cordon/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_body("v9.9.9")))
        .mount(&server)
        .await;

    let checker = UpdateChecker::new(dir.path().join("state.json"), "1.0.0", "cordon-dev/cordon")
        .with_api_base(&server.uri());
    let cancel = CancellationToken::new();
    let background = spawn_check(checker, &cancel);

    // Simulated main command.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let update = background.finish().await.expect("newer release reported");
    assert_eq!(update.version, "9.9.9");
}

#[tokio::test]
#[serial]
async fn finish_cancels_a_slow_check() {
    clear_gating_env();
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(release_body("v9.9.9"))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let checker = UpdateChecker::new(dir.path().join("state.json"), "1.0.0", "cordon-dev/cordon")
        .with_api_base(&server.uri());
    let cancel = CancellationToken::new();
    let background = spawn_check(checker, &cancel);

    // The command finished before the feed answered; the in-flight request
    // is abandoned, not awaited.
    let started = std::time::Instant::now();
    assert!(background.finish().await.is_none());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
#[serial]
async fn fresh_state_suppresses_the_request_entirely() {
    clear_gating_env();
    let dir = TempDir::new().unwrap();
    let state_path = dir.path().join("state.json");
    std::fs::write(
        &state_path,
        serde_json::to_string(&UpdateState {
            checked_at: chrono::Utc::now(),
            latest_version: "1.0.0".into(),
            latest_url: "https://example.test".into(),
            current_version: "1.0.0".into(),
        })
        .unwrap(),
    )
    .unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(release_body("v9.9.9")))
        .expect(0)
        .mount(&server)
        .await;

    let checker = UpdateChecker::new(state_path, "1.0.0", "cordon-dev/cordon")
        .with_api_base(&server.uri());
    let cancel = CancellationToken::new();
    let background = spawn_check(checker, &cancel);
    assert!(background.finish().await.is_none());
    server.verify().await;
}
