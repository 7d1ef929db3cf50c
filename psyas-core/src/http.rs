//! HTTP wrapper over the psyas backend API
//!
//! One `ApiClient` is shared by the auth store and the conversation
//! controller. It attaches the bearer token, unwraps the backend's
//! `{code, message, data}` response envelope, and classifies failures
//! into the client error taxonomy. No automatic retries.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Accept backend ids that arrive as either JSON strings or numbers
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

/// Profile of an authenticated user
#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// Payload of a successful login
#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub user: UserProfile,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Payload of a successful registration
#[derive(Debug, Deserialize)]
pub struct RegisterData {
    pub user: UserProfile,
}

/// Payload of a token refresh
#[derive(Debug, Deserialize)]
pub struct RefreshData {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Chat request body
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<&'a str>,
}

/// Payload of a chat turn
#[derive(Debug, Deserialize)]
pub struct ChatData {
    /// Backend-assigned conversation id; assigned on the first turn
    #[serde(alias = "conversation_id", deserialize_with = "string_or_number")]
    pub session_id: String,
    #[serde(default)]
    pub assistant_response: Option<String>,
}

/// A past conversation as returned by the history listing
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationSummary {
    #[serde(alias = "id", deserialize_with = "string_or_number")]
    pub session_id: String,
    /// The backend titles entries with the opening user message
    #[serde(default, alias = "user_input")]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Payload of the history listing
#[derive(Debug, Deserialize)]
pub struct HistoryData {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// HTTP client for the psyas backend
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    /// Install the bearer token attached to subsequent requests
    pub fn set_token(&self, token: impl Into<String>) {
        let mut slot = self.token.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(token.into());
    }

    /// Drop the bearer token
    pub fn clear_token(&self) {
        let mut slot = self.token.write().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }

    /// Whether a bearer token is currently installed
    pub fn has_token(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    fn current_token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Log in with username and password
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginData> {
        let body = serde_json::json!({ "username": username, "password": password });
        self.request(Method::POST, "/api/auth/login", None, Some(&body), None)
            .await
    }

    /// Register a new account
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<RegisterData> {
        let mut body = serde_json::json!({ "username": username, "password": password });
        if let Some(email) = email {
            body["email"] = Value::String(email.to_string());
        }
        self.request(Method::POST, "/api/auth/register", None, Some(&body), None)
            .await
    }

    /// Fetch the profile of the current token's user
    pub async fn me(&self) -> Result<UserProfile> {
        self.request(Method::GET, "/api/auth/me", None, None, None)
            .await
    }

    /// Exchange the refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshData> {
        self.request(
            Method::POST,
            "/api/auth/refresh",
            None,
            None,
            Some(refresh_token),
        )
        .await
    }

    /// Send one chat turn
    pub async fn chat(&self, request: &ChatRequest<'_>) -> Result<ChatData> {
        let body = serde_json::to_value(request)?;
        self.request(
            Method::POST,
            "/api/conversation/chat",
            None,
            Some(&body),
            None,
        )
        .await
    }

    /// List recent conversations
    pub async fn history(&self, limit: u32, user_id: Option<&str>) -> Result<HistoryData> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(user_id) = user_id {
            query.push(("user_id", user_id.to_string()));
        }
        self.request(
            Method::GET,
            "/api/conversation/history",
            Some(&query),
            None,
            None,
        )
        .await
    }

    /// Probe the conversation service health (no auth required)
    pub async fn status(&self) -> Result<Value> {
        self.request(Method::GET, "/api/conversation/status", None, None, None)
            .await
    }

    /// Issue a request and unwrap the response envelope
    ///
    /// `bearer_override` replaces the installed token for the one call
    /// that authenticates with the refresh token instead.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, String)]>,
        body: Option<&Value>,
        bearer_override: Option<&str>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method.clone(), &url);

        if let Some(query) = query {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let bearer = match bearer_override {
            Some(token) => Some(token.to_string()),
            None => self.current_token(),
        };
        if let Some(token) = bearer {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        debug!(%method, %url, "dispatching request");
        let response = builder.send().await.map_err(Error::from)?;
        let status = response.status();
        let text = response.text().await.map_err(Error::from)?;
        let value: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status == StatusCode::UNAUTHORIZED {
            // The session is over as far as the backend is concerned;
            // drop the token so callers fall back to the login flow.
            self.clear_token();
            return Err(Error::Unauthorized(extract_message(
                &value,
                "authentication required",
            )));
        }
        if status.is_client_error() {
            return Err(Error::Api {
                code: status.as_u16(),
                message: extract_message(&value, "request rejected"),
            });
        }
        if status.is_server_error() {
            warn!(%url, %status, "server error");
            return Err(Error::Server(extract_message(
                &value,
                "the service is temporarily unavailable",
            )));
        }

        // Most routes wrap their payload as {code, message, data}; the
        // refresh route returns its payload bare.
        let payload = match value.get("data") {
            Some(data) if !data.is_null() => data.clone(),
            _ => value,
        };
        serde_json::from_value(payload).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn extract_message(value: &Value, fallback: &str) -> String {
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .unwrap_or_else(|| fallback.to_string())
}
