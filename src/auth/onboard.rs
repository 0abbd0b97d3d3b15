//! Identity bootstrap and login confirmation.
//!
//! New installs provision an anonymous identity token so heartbeats
//! can flow before the user ever logs in. Logging in happens in the
//! browser; this module polls the backend afterwards until the token
//! shows up as registered.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::credentials::{Credentials, CredentialsStore};
use super::{AuthState, SessionAuthState};
use crate::api::ApiClient;
use crate::retry::{CampaignPurpose, CampaignSpec, CampaignStatus, RetryScheduler};

/// Attempt bound for anonymous identity provisioning.
const ONBOARD_MAX_ATTEMPTS: u32 = 5;

/// Backoff sequence for provisioning attempts; the last wait repeats.
const ONBOARD_INTERVALS: [Duration; 3] = [
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(120),
];

/// Attempt bound for the post-browser login recheck.
const LOGIN_MAX_ATTEMPTS: u32 = 12;

/// Wait between login rechecks.
const LOGIN_RECHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Makes sure an identity token exists, provisioning one if needed.
///
/// No-op when credentials are already stored. Otherwise starts a
/// bounded onboarding campaign in the background; until it succeeds,
/// records simply buffer locally.
pub fn ensure_identity(scheduler: &RetryScheduler, creds: Arc<CredentialsStore>, api_url: &str) {
    match creds.load() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("Could not check stored credentials: {}", e);
            return;
        }
    }

    let url = api_url.to_string();
    let started = scheduler.run_campaign(
        CampaignSpec::new(
            CampaignPurpose::Onboarding,
            ONBOARD_MAX_ATTEMPTS,
            ONBOARD_INTERVALS.to_vec(),
        ),
        move || match bootstrap_identity(&creds, &url) {
            Ok(()) => CampaignStatus::Complete,
            Err(e) => {
                tracing::debug!("Identity provisioning attempt failed: {}", e);
                CampaignStatus::Pending
            }
        },
        || {
            tracing::warn!(
                "Could not provision an identity token; records will buffer locally"
            );
        },
    );

    if started {
        tracing::info!("No identity token found, provisioning one");
    }
}

/// Requests an anonymous token, persists it, and confirms it works.
fn bootstrap_identity(creds: &CredentialsStore, api_url: &str) -> Result<()> {
    let client = ApiClient::with_url(api_url);
    let app_token = client
        .app_token()
        .context("Failed to request an identity token")?;

    creds
        .store(&Credentials {
            api_token: app_token.token.clone(),
            user_name: None,
            api_url: api_url.to_string(),
        })
        .context("Failed to store the identity token")?;

    // Confirm the stored token actually authenticates.
    ApiClient::with_url(api_url)
        .with_token(&app_token.token)
        .ping_user()
        .context("Backend did not accept the new token")?;

    tracing::info!("Provisioned an anonymous identity token");
    Ok(())
}

/// Starts the browser login flow.
///
/// Returns the URL the user must open. A background campaign rechecks
/// the login state until the backend reports the token as registered
/// or the attempts run out.
pub fn begin_login(
    scheduler: &RetryScheduler,
    auth: Arc<SessionAuthState>,
    creds: Arc<CredentialsStore>,
    api_url: &str,
) -> Result<String> {
    let token = creds
        .load()
        .context("Failed to load credentials")?
        .ok_or_else(|| {
            anyhow::anyhow!("No identity token yet. Wait for onboarding to finish, or check connectivity.")
        })?
        .api_token;

    if token.is_empty() {
        bail!("Stored identity token is empty");
    }

    let login_url = format!("{}/auth/login?token={}", api_url.trim_end_matches('/'), token);

    let url = api_url.to_string();
    scheduler.run_campaign(
        CampaignSpec::fixed(
            CampaignPurpose::LoginConfirmation,
            LOGIN_MAX_ATTEMPTS,
            LOGIN_RECHECK_INTERVAL,
        ),
        move || {
            let client = ApiClient::with_url(&url).with_token(&token);
            let state = auth.refresh(&client, true);
            if let AuthState::LoggedIn { name } = &state {
                tracing::info!("Login confirmed for {}", name.as_deref().unwrap_or("user"));
                remember_user_name(&creds, name.clone());
                CampaignStatus::Complete
            } else {
                CampaignStatus::Pending
            }
        },
        || {
            tracing::info!("Login not confirmed; run 'pulse status' after finishing in the browser");
        },
    );

    Ok(login_url)
}

/// Persists the confirmed user name next to the token.
fn remember_user_name(creds: &CredentialsStore, name: Option<String>) {
    match creds.load() {
        Ok(Some(mut stored)) => {
            stored.user_name = name;
            if let Err(e) = creds.store(&stored) {
                tracing::debug!("Could not persist user name: {}", e);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::debug!("Could not persist user name: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::SystemClock;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_response(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {"token": token, "userId": null}
        }))
    }

    #[test]
    fn test_bootstrap_provisions_and_confirms_token() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/data/apptoken"))
                .respond_with(token_response("fresh-token"))
                .expect(1)
                .mount(&server),
        );
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/users/ping"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server),
        );

        let temp = TempDir::new().unwrap();
        let creds = CredentialsStore::file_only(temp.path().join("credentials.json"));

        bootstrap_identity(&creds, &server.uri()).expect("Bootstrap should succeed");

        let stored = creds.load().unwrap().expect("Token should be stored");
        assert_eq!(stored.api_token, "fresh-token");
        assert_eq!(stored.api_url, server.uri());
        rt.block_on(server.verify());
    }

    #[test]
    fn test_bootstrap_fails_when_backend_is_down() {
        let temp = TempDir::new().unwrap();
        let creds = CredentialsStore::file_only(temp.path().join("credentials.json"));

        assert!(bootstrap_identity(&creds, "http://127.0.0.1:9").is_err());
        assert!(creds.load().unwrap().is_none(), "No token should be stored");
    }

    #[test]
    fn test_ensure_identity_is_noop_with_stored_token() {
        let temp = TempDir::new().unwrap();
        let creds = Arc::new(CredentialsStore::file_only(
            temp.path().join("credentials.json"),
        ));
        creds
            .store(&Credentials {
                api_token: "existing".to_string(),
                user_name: None,
                api_url: "http://127.0.0.1:9".to_string(),
            })
            .unwrap();

        let scheduler = RetryScheduler::new(Arc::new(SystemClock));
        ensure_identity(&scheduler, creds.clone(), "http://127.0.0.1:9");

        assert!(
            !scheduler.is_active(CampaignPurpose::Onboarding),
            "No campaign should start when a token exists"
        );
        assert_eq!(creds.load().unwrap().unwrap().api_token, "existing");
    }

    #[test]
    fn test_begin_login_requires_a_token() {
        let temp = TempDir::new().unwrap();
        let creds = Arc::new(CredentialsStore::file_only(
            temp.path().join("credentials.json"),
        ));
        let scheduler = RetryScheduler::new(Arc::new(SystemClock));
        let auth = Arc::new(SessionAuthState::new(Arc::new(SystemClock)));

        let result = begin_login(&scheduler, auth, creds, "http://127.0.0.1:9");
        assert!(result.is_err(), "Login needs a provisioned token first");
    }

    #[test]
    fn test_begin_login_returns_url_with_token() {
        let temp = TempDir::new().unwrap();
        let creds = Arc::new(CredentialsStore::file_only(
            temp.path().join("credentials.json"),
        ));
        creds
            .store(&Credentials {
                api_token: "tok-abc".to_string(),
                user_name: None,
                api_url: "http://127.0.0.1:9".to_string(),
            })
            .unwrap();

        let scheduler = RetryScheduler::new(Arc::new(SystemClock));
        let auth = Arc::new(SessionAuthState::new(Arc::new(SystemClock)));

        let url = begin_login(&scheduler, auth, creds, "http://127.0.0.1:9/")
            .expect("Login should start");
        assert_eq!(url, "http://127.0.0.1:9/auth/login?token=tok-abc");

        // The recheck campaign is live until cancelled.
        assert!(scheduler.is_active(CampaignPurpose::LoginConfirmation));
        scheduler.cancel(CampaignPurpose::LoginConfirmation);
    }
}
