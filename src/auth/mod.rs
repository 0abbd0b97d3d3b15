//! Identity and login state.
//!
//! `credentials` persists the identity token, `onboard` drives the
//! anonymous-bootstrap and login-confirmation campaigns, and this
//! module caches the backend's view of our login state so status
//! checks do not hammer the network.

pub mod credentials;
pub mod onboard;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[allow(unused_imports)]
pub use credentials::{Credentials, CredentialsStore};

use crate::api::{ApiClient, ApiError};
use crate::retry::Clock;

/// Keyring service name for stored credentials.
pub const KEYRING_SERVICE: &str = "pulse";

/// Keyring entry name for the identity token.
pub const KEYRING_TOKEN_USER: &str = "identity";

/// How long a fetched login state stays trustworthy.
pub const AUTH_CACHE_TTL: Duration = Duration::from_secs(300);

// ==================== Login State ====================

/// The backend's view of who we are.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Never fetched, or the last token was rejected.
    #[default]
    UnknownOrExpired,
    /// Valid token, not linked to a user account.
    Anonymous,
    /// Valid token linked to a registered user.
    LoggedIn { name: Option<String> },
}

impl AuthState {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, AuthState::LoggedIn { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            AuthState::UnknownOrExpired => "unknown",
            AuthState::Anonymous => "anonymous",
            AuthState::LoggedIn { .. } => "logged in",
        }
    }
}

#[derive(Debug, Clone)]
struct CachedState {
    state: AuthState,
    fetched_at: Instant,
}

// ==================== Session Cache ====================

/// Caches the login state for the lifetime of the process.
///
/// A fetched state is served from cache until the TTL passes. Failed
/// fetches never overwrite the cache, with one exception: a rejected
/// token invalidates it, since whatever we knew is now wrong.
pub struct SessionAuthState {
    cache: Mutex<Option<CachedState>>,
    clock: Arc<dyn Clock>,
}

impl SessionAuthState {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Mutex::new(None),
            clock,
        }
    }

    /// Last known state without touching the network.
    pub fn get_cached(&self) -> AuthState {
        self.cache
            .lock()
            .unwrap()
            .as_ref()
            .map(|cached| cached.state.clone())
            .unwrap_or_default()
    }

    /// Current login state, from cache when fresh.
    ///
    /// With `force` the cache is bypassed and the backend is asked
    /// directly. Network and server failures fall back to
    /// [`AuthState::UnknownOrExpired`] without disturbing the cache.
    pub fn refresh(&self, client: &ApiClient, force: bool) -> AuthState {
        if !force {
            if let Some(cached) = self.cache.lock().unwrap().as_ref() {
                if self.clock.now().duration_since(cached.fetched_at) < AUTH_CACHE_TTL {
                    return cached.state.clone();
                }
            }
        }

        match client.plugin_state() {
            Ok(state) => {
                let state = if state.registered {
                    AuthState::LoggedIn {
                        name: state.user_name,
                    }
                } else {
                    AuthState::Anonymous
                };

                *self.cache.lock().unwrap() = Some(CachedState {
                    state: state.clone(),
                    fetched_at: self.clock.now(),
                });
                state
            }
            Err(ApiError::AuthExpired) => {
                tracing::info!("Identity token rejected, clearing cached login state");
                self.clear();
                AuthState::UnknownOrExpired
            }
            Err(ApiError::MissingToken) => AuthState::UnknownOrExpired,
            Err(e) => {
                tracing::debug!("Login state check failed: {}", e);
                AuthState::UnknownOrExpired
            }
        }
    }

    /// Drops the cached state.
    pub fn clear(&self) {
        *self.cache.lock().unwrap() = None;
    }
}
