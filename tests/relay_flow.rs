//! Integration tests for the relay delivery flow
//!
//! These tests exercise the full record-buffer-deliver pipeline through
//! the library API against a mock backend, using temporary directories
//! for the queue and credential files.

use tempfile::TempDir;
use tokio::runtime::Runtime;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pulse_cli::auth::credentials::{Credentials, CredentialsStore};
use pulse_cli::config::Config;
use pulse_cli::flush::FlushOutcome;
use pulse_cli::git;
use pulse_cli::relay::Relay;
use pulse_cli::store::{Heartbeat, TelemetryRecord};

// =============================================================================
// Test Helpers
// =============================================================================

/// Creates a relay backed by temp files, pointed at the given backend.
/// Returns the Relay and the temp directory (which must be kept alive).
fn create_test_relay(api_url: &str) -> (Relay, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let config = Config {
        api_url: api_url.to_string(),
        offline_store: dir.path().join("offline.jsonl"),
        ..Config::default()
    };
    let credentials = CredentialsStore::file_only(dir.path().join("credentials.json"));
    (Relay::with_credentials(config, credentials), dir)
}

/// Stores an identity token in the relay's credential file, bypassing
/// onboarding.
fn store_token(dir: &TempDir, api_url: &str, token: &str) {
    CredentialsStore::file_only(dir.path().join("credentials.json"))
        .store(&Credentials {
            api_token: token.to_string(),
            user_name: None,
            api_url: api_url.to_string(),
        })
        .expect("Failed to store test credentials");
}

/// Mounts a healthy connectivity probe endpoint.
fn mount_ping(rt: &Runtime, server: &MockServer) {
    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/users/ping"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server),
    );
}

// =============================================================================
// Delivery Tests
// =============================================================================

mod delivery_tests {
    use super::*;

    #[test]
    fn test_queue_survives_failed_attempt_and_delivers_later() {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());

        // First submission fails, the retry succeeds.
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/data/batch"))
                .respond_with(ResponseTemplate::new(503))
                .up_to_n_times(1)
                .mount(&server),
        );
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/data/batch"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server),
        );
        mount_ping(&rt, &server);

        let (relay, dir) = create_test_relay(&server.uri());
        store_token(&dir, &server.uri(), "tok-1");
        relay.record(&TelemetryRecord::new(serde_json::json!({"entity": "a.rs"})));
        relay.record(&TelemetryRecord::new(serde_json::json!({"entity": "b.rs"})));

        let first = relay.send_offline_data().expect("flush should not error");
        assert!(
            matches!(first, FlushOutcome::Deferred { .. }),
            "Got {first:?}"
        );
        assert_eq!(relay.queued_records(), 2, "Failed attempt must keep the queue");

        let second = relay.send_offline_data().expect("flush should not error");
        assert!(
            matches!(second, FlushOutcome::Flushed { records: 2 }),
            "Got {second:?}"
        );
        assert_eq!(relay.queued_records(), 0);

        // Both attempts carried the same two records, oldest first.
        let requests = rt.block_on(server.received_requests()).unwrap();
        let posts: Vec<_> = requests
            .iter()
            .filter(|r| r.url.path() == "/data/batch")
            .collect();
        assert_eq!(posts.len(), 2);
        for post in posts {
            let batch: Vec<serde_json::Value> = post.body_json().unwrap();
            assert_eq!(batch.len(), 2);
            assert_eq!(batch[0]["entity"], "a.rs");
            assert_eq!(batch[1]["entity"], "b.rs");
        }
    }

    #[test]
    fn test_heartbeat_payload_reaches_backend_intact() {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());

        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/data/batch"))
                .and(header("Authorization", "Bearer tok-1"))
                .and(body_partial_json(serde_json::json!([{
                    "entity": "src/main.rs",
                    "category": "coding",
                    "isWrite": true,
                }])))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server),
        );
        mount_ping(&rt, &server);

        let (relay, dir) = create_test_relay(&server.uri());
        store_token(&dir, &server.uri(), "tok-1");

        let mut beat = Heartbeat::new("src/main.rs", "coding", true);
        beat.project = Some("pulse".to_string());
        beat.branch = Some("main".to_string());
        relay.record(&beat.into());

        let outcome = relay.send_offline_data().expect("flush should not error");
        assert!(
            matches!(outcome, FlushOutcome::Flushed { records: 1 }),
            "Got {outcome:?}"
        );

        rt.block_on(server.verify());
    }

    #[test]
    fn test_deactivated_account_drops_queue_but_keeps_identity() {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());

        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/data/batch"))
                .respond_with(
                    ResponseTemplate::new(403).set_body_string("Account deactivated"),
                )
                .mount(&server),
        );
        mount_ping(&rt, &server);

        let (relay, dir) = create_test_relay(&server.uri());
        store_token(&dir, &server.uri(), "tok-1");
        relay.record(&TelemetryRecord::new(serde_json::json!({"n": 1})));

        let outcome = relay.send_offline_data().expect("flush should not error");
        assert!(
            matches!(outcome, FlushOutcome::Discarded { records: 1 }),
            "Got {outcome:?}"
        );
        assert_eq!(relay.queued_records(), 0, "Deactivation drains the queue");
        assert!(
            relay.has_identity(),
            "Deactivation is not a token problem; the identity stays"
        );
    }
}

// =============================================================================
// Identity Tests
// =============================================================================

mod identity_tests {
    use super::*;

    #[test]
    fn test_onboarding_provisions_token_exactly_once() {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());

        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/data/apptoken"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "data": {"token": "minted-token", "userId": null}
                })))
                .expect(1)
                .mount(&server),
        );
        mount_ping(&rt, &server);

        let (relay, _dir) = create_test_relay(&server.uri());
        assert!(!relay.has_identity());

        relay.ensure_identity();

        // Onboarding runs on a background thread; wait for the token.
        let mut provisioned = false;
        for _ in 0..100 {
            if relay.has_identity() {
                provisioned = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(provisioned, "Onboarding should store a token");

        // A second call sees the stored token and never asks again.
        relay.ensure_identity();
        std::thread::sleep(std::time::Duration::from_millis(200));
        rt.block_on(server.verify());

        relay.shutdown();
    }

    #[test]
    fn test_queued_records_deliver_after_onboarding() {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());

        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/data/apptoken"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "data": {"token": "minted-token", "userId": null}
                })))
                .mount(&server),
        );
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/data/batch"))
                .and(header("Authorization", "Bearer minted-token"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server),
        );
        mount_ping(&rt, &server);

        let (relay, _dir) = create_test_relay(&server.uri());

        // Buffered before any identity exists.
        relay.record(&TelemetryRecord::new(serde_json::json!({"n": 1})));
        let outcome = relay.send_offline_data().expect("flush should not error");
        assert!(matches!(outcome, FlushOutcome::Deferred { .. }), "Got {outcome:?}");

        relay.ensure_identity();
        for _ in 0..100 {
            if relay.has_identity() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(relay.has_identity(), "Onboarding should store a token");

        let outcome = relay.send_offline_data().expect("flush should not error");
        assert!(
            matches!(outcome, FlushOutcome::Flushed { records: 1 }),
            "Got {outcome:?}"
        );
        rt.block_on(server.verify());

        relay.shutdown();
    }
}

// =============================================================================
// Repository Detection Tests
// =============================================================================

mod repo_tests {
    use super::*;

    #[test]
    fn test_heartbeat_enriched_from_checkout() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let repo = git2::Repository::init(dir.path()).expect("Failed to init repo");
        repo.remote("origin", "https://example.com/acme/widgets.git")
            .expect("Failed to add remote");

        let info = git::repo_info(dir.path());

        let mut beat = Heartbeat::new("src/lib.rs", "coding", false);
        beat.project = info.project.clone();
        beat.repo_url = info.remote_url.clone();

        let record: TelemetryRecord = beat.into();
        assert_eq!(
            record.0["repoUrl"],
            "https://example.com/acme/widgets.git"
        );
        assert_eq!(
            record.0["project"],
            info.project.expect("workdir name should be detected")
        );
    }
}
