//! Auth session store
//!
//! Owns the logged-in user's credential/identity bundle and is the only
//! writer of the durable token store. State machine:
//! anonymous -> (login) -> authenticated -> (logout) -> anonymous, with
//! an anonymous-with-token limbo after `restore` until
//! `fetch_current_user` confirms the identity.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::http::{ApiClient, UserProfile};
use crate::token::{StoredCredentials, TokenStore};

/// The logged-in user's credential and identity bundle
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub token: String,
    pub refresh_token: String,
    pub username: String,
    pub user_id: String,
    /// True once the backend has confirmed the identity behind the token
    pub logged_in: bool,
}

/// State container for authentication
///
/// Injected wherever auth state is needed; there is no ambient global.
/// All mutation goes through the operations below.
pub struct AuthStore {
    api: Arc<ApiClient>,
    tokens: TokenStore,
    session: Session,
    last_error: Option<String>,
}

impl AuthStore {
    /// Create a new auth store
    pub fn new(api: Arc<ApiClient>, tokens: TokenStore) -> Self {
        Self {
            api,
            tokens,
            session: Session::default(),
            last_error: None,
        }
    }

    /// Current session snapshot
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether the identity has been confirmed
    pub fn is_logged_in(&self) -> bool {
        self.session.logged_in
    }

    /// Message of the last failed auth operation, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Reinstall a previously persisted token
    ///
    /// Leaves the store anonymous-with-token: the username may be
    /// prefilled but `logged_in` stays false until `fetch_current_user`
    /// confirms the token. Returns true when a token was found.
    pub fn restore(&mut self) -> bool {
        match self.tokens.load() {
            Some(creds) => {
                self.api.set_token(&creds.access_token);
                self.session.token = creds.access_token;
                self.session.refresh_token = creds.refresh_token;
                self.session.username = creds.username;
                debug!("restored persisted token");
                true
            }
            None => false,
        }
    }

    /// Log in and persist the session token
    ///
    /// On failure the prior session is left untouched and the error
    /// message is recorded for display.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<Session> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "username and password are required".to_string(),
            ));
        }

        match self.api.login(username, password).await {
            Ok(data) => {
                self.session = Session {
                    token: data.access_token.clone(),
                    refresh_token: data.refresh_token.clone().unwrap_or_default(),
                    username: data.user.username.clone(),
                    user_id: data.user.id.clone(),
                    logged_in: true,
                };
                self.api.set_token(&self.session.token);
                self.persist();
                self.last_error = None;
                info!(username = %self.session.username, "login succeeded");
                Ok(self.session.clone())
            }
            Err(e) => {
                // A 401 here means bad credentials, not an expired session.
                let e = match e {
                    Error::Unauthorized(message) => Error::InvalidCredentials(message),
                    other => other,
                };
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Create a new account; does not log in
    pub async fn register(
        &mut self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<String> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "username and password are required".to_string(),
            ));
        }

        match self.api.register(username, password, email).await {
            Ok(data) => {
                self.last_error = None;
                info!(username = %data.user.username, "registration succeeded");
                Ok(data.user.username)
            }
            Err(e) => {
                // The register route's only 4xx responses are conflicts
                // on an existing username or email.
                let e = match e {
                    Error::Api { code: 400, message } => Error::DuplicateUser(message),
                    other => other,
                };
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Rehydrate the user profile behind a restored token
    ///
    /// Success confirms the session. A rejected token forces a logout;
    /// network or server failures keep the token so a flaky connection
    /// at start-up does not destroy a valid session.
    pub async fn fetch_current_user(&mut self) -> Result<UserProfile> {
        match self.api.me().await {
            Ok(profile) => {
                self.session.user_id = profile.id.clone();
                self.session.username = profile.username.clone();
                self.session.logged_in = true;
                self.last_error = None;
                Ok(profile)
            }
            Err(e) if e.is_unauthorized() => {
                warn!("persisted token rejected by the backend, logging out");
                self.logout();
                self.last_error = Some(e.to_string());
                Err(e)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Exchange the refresh token for a new access token
    pub async fn refresh(&mut self) -> Result<()> {
        if self.session.refresh_token.is_empty() {
            return Err(Error::Validation("no refresh token available".to_string()));
        }

        let data = self.api.refresh(&self.session.refresh_token).await?;
        self.session.token = data.access_token;
        self.api.set_token(&self.session.token);
        self.persist();
        debug!("access token refreshed");
        Ok(())
    }

    /// Clear the session and the persisted token. No network call.
    pub fn logout(&mut self) {
        self.session = Session::default();
        self.api.clear_token();
        if let Err(e) = self.tokens.clear() {
            warn!("failed to remove persisted credentials: {}", e);
        }
        self.last_error = None;
        info!("logged out");
    }

    fn persist(&self) {
        let creds = StoredCredentials {
            access_token: self.session.token.clone(),
            refresh_token: self.session.refresh_token.clone(),
            username: self.session.username.clone(),
        };
        // Failing to write the file degrades to a session that does not
        // survive a restart; the in-memory login stays valid.
        if let Err(e) = self.tokens.save(&creds) {
            warn!("failed to persist credentials: {}", e);
        }
    }
}
