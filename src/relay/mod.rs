//! The relay context.
//!
//! One [`Relay`] owns everything a command or the daemon needs to move
//! telemetry: configuration, credential storage, the cached login
//! state, the offline queue, and the flush coordinator. Commands
//! construct it once and pass it around instead of reaching for
//! process-wide globals.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{ApiClient, ApiError, ConnectivityProbe};
use crate::auth::credentials::CredentialsStore;
use crate::auth::{onboard, AuthState, SessionAuthState};
use crate::config::Config;
use crate::flush::{FlushOutcome, OfflineFlushCoordinator};
use crate::retry::{CampaignPurpose, Clock, RetryScheduler, SystemClock};
use crate::store::{LocalRecordStore, TelemetryRecord};

pub struct Relay {
    config: Config,
    credentials: Arc<CredentialsStore>,
    auth: Arc<SessionAuthState>,
    scheduler: RetryScheduler,
    store: Arc<LocalRecordStore>,
    flusher: OfflineFlushCoordinator,
}

impl Relay {
    /// Creates a relay from explicit configuration.
    pub fn new(config: Config) -> Self {
        let credentials = CredentialsStore::with_keychain(config.use_keychain);
        Self::with_credentials(config, credentials)
    }

    /// Creates a relay with a specific credential store.
    pub fn with_credentials(config: Config, credentials: CredentialsStore) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(LocalRecordStore::new(config.offline_store.clone()));
        let probe = ConnectivityProbe::new(&config.api_url);

        Self {
            credentials: Arc::new(credentials),
            auth: Arc::new(SessionAuthState::new(clock.clone())),
            scheduler: RetryScheduler::new(clock),
            flusher: OfflineFlushCoordinator::new(store.clone(), probe),
            store,
            config,
        }
    }

    /// Creates a relay from the on-disk configuration.
    #[allow(dead_code)]
    pub fn from_default_config() -> Result<Self> {
        Ok(Self::new(Config::load()?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds an API client carrying the stored token, when present.
    fn api_client(&self) -> Result<ApiClient> {
        let client = ApiClient::with_url(&self.config.api_url);
        match self.credentials.load().context("Failed to load credentials")? {
            Some(creds) => Ok(client.with_token(&creds.api_token)),
            None => Ok(client),
        }
    }

    // ==================== Identity ====================

    /// True when an identity token is stored.
    pub fn has_identity(&self) -> bool {
        matches!(self.credentials.load(), Ok(Some(_)))
    }

    /// Provisions an identity token in the background if none exists.
    pub fn ensure_identity(&self) {
        onboard::ensure_identity(&self.scheduler, self.credentials.clone(), &self.config.api_url);
    }

    /// Starts the browser login flow, returning the URL to open.
    pub fn begin_login(&self) -> Result<String> {
        onboard::begin_login(
            &self.scheduler,
            self.auth.clone(),
            self.credentials.clone(),
            &self.config.api_url,
        )
    }

    /// True while the post-browser login recheck is still running.
    pub fn login_pending(&self) -> bool {
        self.scheduler.is_active(CampaignPurpose::LoginConfirmation)
    }

    /// Discards the stored identity and cached login state.
    pub fn logout(&self) -> Result<()> {
        self.scheduler.cancel(CampaignPurpose::LoginConfirmation);
        self.credentials
            .delete()
            .context("Failed to delete stored credentials")?;
        self.auth.clear();
        Ok(())
    }

    // ==================== Login state ====================

    /// Current login state, served from cache when fresh.
    pub fn login_state(&self) -> AuthState {
        match self.api_client() {
            Ok(client) => self.auth.refresh(&client, false),
            Err(_) => self.auth.get_cached(),
        }
    }

    /// Last known login state without touching the network.
    pub fn cached_login_state(&self) -> AuthState {
        self.auth.get_cached()
    }

    /// Forces the next login-state check to hit the backend.
    pub fn clear_cached_login_state(&self) {
        self.auth.clear();
    }

    pub fn is_authenticated(&self) -> bool {
        self.login_state().is_logged_in()
    }

    // ==================== Records ====================

    /// Buffers one record in the offline queue.
    pub fn record(&self, record: &TelemetryRecord) {
        self.store.append(record);
    }

    /// Number of records waiting in the offline queue.
    pub fn queued_records(&self) -> usize {
        self.store.len()
    }

    /// Attempts to drain the offline queue to the backend.
    ///
    /// A rejected token additionally rotates the identity: the dead
    /// token is discarded and onboarding starts over, so a later flush
    /// can deliver the still-queued records.
    pub fn send_offline_data(&self) -> Result<FlushOutcome> {
        let client = self.api_client()?;
        let outcome = self.flusher.flush_if_possible(&client);

        if let FlushOutcome::Deferred {
            error: ApiError::AuthExpired,
        } = &outcome
        {
            tracing::info!("Stored token was rejected, provisioning a fresh identity");
            self.clear_cached_login_state();
            if let Err(e) = self.credentials.delete() {
                tracing::warn!("Could not delete the rejected token: {}", e);
            }
            self.ensure_identity();
        }

        Ok(outcome)
    }

    /// Stops background campaigns before shutdown.
    pub fn shutdown(&self) {
        self.scheduler.cancel(CampaignPurpose::Onboarding);
        self.scheduler.cancel(CampaignPurpose::LoginConfirmation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::Credentials;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_relay(api_url: &str) -> (Relay, TempDir) {
        let temp = TempDir::new().unwrap();
        let config = Config {
            api_url: api_url.to_string(),
            offline_store: temp.path().join("offline.jsonl"),
            ..Config::default()
        };
        let credentials = CredentialsStore::file_only(temp.path().join("credentials.json"));
        (Relay::with_credentials(config, credentials), temp)
    }

    fn store_token(relay: &Relay, token: &str) {
        relay
            .credentials
            .store(&Credentials {
                api_token: token.to_string(),
                user_name: None,
                api_url: relay.config.api_url.clone(),
            })
            .unwrap();
    }

    #[test]
    fn test_record_buffers_locally() {
        let (relay, _temp) = test_relay("http://127.0.0.1:9");
        assert_eq!(relay.queued_records(), 0);

        relay.record(&TelemetryRecord::new(serde_json::json!({"n": 1})));
        relay.record(&TelemetryRecord::new(serde_json::json!({"n": 2})));

        assert_eq!(relay.queued_records(), 2);
    }

    #[test]
    fn test_flush_without_token_defers() {
        let (relay, _temp) = test_relay("http://127.0.0.1:9");
        relay.record(&TelemetryRecord::new(serde_json::json!({"n": 1})));

        let outcome = relay.send_offline_data().unwrap();
        assert!(
            matches!(outcome, FlushOutcome::Deferred { error: ApiError::MissingToken }),
            "Got {outcome:?}"
        );
        assert_eq!(relay.queued_records(), 1);
    }

    #[test]
    fn test_flush_delivers_with_token() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/data/batch"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server),
        );
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/users/ping"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server),
        );

        let (relay, _temp) = test_relay(&server.uri());
        store_token(&relay, "tok-1");
        relay.record(&TelemetryRecord::new(serde_json::json!({"n": 1})));

        let outcome = relay.send_offline_data().unwrap();
        assert!(matches!(outcome, FlushOutcome::Flushed { records: 1 }), "Got {outcome:?}");
        assert_eq!(relay.queued_records(), 0);
    }

    #[test]
    fn test_rejected_token_is_rotated() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/data/batch"))
                .respond_with(ResponseTemplate::new(401))
                .mount(&server),
        );
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/data/apptoken"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "data": {"token": "fresh-token", "userId": null}
                })))
                .mount(&server),
        );
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/users/ping"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server),
        );

        let (relay, _temp) = test_relay(&server.uri());
        store_token(&relay, "stale-token");
        relay.record(&TelemetryRecord::new(serde_json::json!({"n": 1})));

        let outcome = relay.send_offline_data().unwrap();
        assert!(
            matches!(outcome, FlushOutcome::Deferred { error: ApiError::AuthExpired }),
            "Got {outcome:?}"
        );
        assert_eq!(relay.queued_records(), 1, "Queue survives a rejected token");

        // Re-onboarding runs in the background; wait for the fresh token.
        let mut rotated = false;
        for _ in 0..100 {
            if let Ok(Some(creds)) = relay.credentials.load() {
                if creds.api_token == "fresh-token" {
                    rotated = true;
                    break;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(rotated, "A fresh identity token should replace the rejected one");
    }

    #[test]
    fn test_logout_discards_identity() {
        let (relay, _temp) = test_relay("http://127.0.0.1:9");
        store_token(&relay, "tok-1");
        assert!(relay.has_identity());

        relay.logout().unwrap();

        assert!(!relay.has_identity());
        assert_eq!(relay.cached_login_state(), AuthState::UnknownOrExpired);
    }

    #[test]
    fn test_login_state_without_backend_is_cached_value() {
        let (relay, _temp) = test_relay("http://127.0.0.1:9");
        store_token(&relay, "tok-1");

        assert_eq!(relay.login_state(), AuthState::UnknownOrExpired);
        assert!(!relay.is_authenticated());
    }
}
