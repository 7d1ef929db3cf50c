//! Conversation controller
//!
//! Owns the visible transcript and the history listing. Messages are
//! append-only; the user's side of a turn is inserted optimistically
//! and reconciled when the backend answers. At most one send may be in
//! flight per conversation.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::http::{ApiClient, ChatRequest};

pub use crate::http::ConversationSummary;

/// Assistant line used when the backend reply carries no text
pub const EMPTY_REPLY_FALLBACK: &str =
    "I'm here with you. Could you tell me a little more about that?";

/// Assistant bubble appended when the send request fails
pub const SEND_FAILURE_NOTICE: &str =
    "I couldn't reach the counseling service just now. Your message is kept above; \
please try again in a moment.";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Delivery state of an optimistically appended message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Inserted locally, awaiting backend confirmation
    Pending,
    /// Confirmed by the backend
    Sent,
    /// The send failed; the message stays in the transcript
    Failed,
}

/// What became of a `send_message` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input or a reply already in flight; nothing was sent
    Ignored,
    /// The assistant answered and the transcript grew by two entries
    Delivered,
    /// The request failed; an error bubble keeps the transcript intact
    Failed,
    /// The backend rejected the token; the caller must re-authenticate
    Unauthorized,
}

/// One entry of the transcript
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub delivery: Delivery,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            text: text.into(),
            delivery: Delivery::Pending,
            timestamp: Utc::now(),
        }
    }

    fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            text: text.into(),
            delivery: Delivery::Sent,
            timestamp: Utc::now(),
        }
    }
}

/// State container for the active conversation
pub struct ConversationController {
    api: Arc<ApiClient>,
    user_id: Option<String>,
    active_session_id: Option<String>,
    messages: Vec<Message>,
    history: Vec<ConversationSummary>,
    awaiting_reply: bool,
}

impl ConversationController {
    /// Create a controller with no active session
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self {
            api,
            user_id: None,
            active_session_id: None,
            messages: Vec::new(),
            history: Vec::new(),
            awaiting_reply: false,
        }
    }

    /// Attach the authenticated user's id, sent along with chat turns
    pub fn set_user(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
    }

    /// Ordered transcript of the active conversation
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// History listing in backend order
    pub fn history(&self) -> &[ConversationSummary] {
        &self.history
    }

    /// Backend id of the active conversation, once assigned
    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }

    /// Whether a send is currently in flight
    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    /// Send one user message and append the assistant's reply
    ///
    /// Blank input and sends issued while a reply is outstanding are
    /// no-ops. The optimistic user message is never discarded: on
    /// failure it is marked `Failed` and a fixed assistant bubble keeps
    /// the transcript intact. A 401 means the token is gone (the HTTP
    /// wrapper already dropped it); it is reported as `Unauthorized` so
    /// the view can fall back to the login entry point instead of
    /// retrying unauthenticated sends.
    pub async fn send_message(&mut self, text: &str) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Ignored;
        }
        if self.awaiting_reply {
            debug!("send ignored, a reply is still in flight");
            return SendOutcome::Ignored;
        }

        self.messages.push(Message::user(text));
        let user_index = self.messages.len() - 1;
        self.awaiting_reply = true;

        let request = ChatRequest {
            message: text,
            session_id: self.active_session_id.as_deref(),
            user_id: self.user_id.as_deref(),
        };
        let result = self.api.chat(&request).await;

        // The throttle releases before the outcome is inspected, on
        // both paths.
        self.awaiting_reply = false;

        match result {
            Ok(data) => {
                // The first turn of a fresh conversation assigns the id.
                if self.active_session_id.is_none() {
                    debug!(session_id = %data.session_id, "adopted new session");
                    self.active_session_id = Some(data.session_id);
                }
                self.messages[user_index].delivery = Delivery::Sent;
                let reply = data
                    .assistant_response
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| EMPTY_REPLY_FALLBACK.to_string());
                self.messages.push(Message::assistant(reply));
                SendOutcome::Delivered
            }
            Err(e) if e.is_unauthorized() => {
                warn!("chat send rejected, token no longer valid");
                self.messages[user_index].delivery = Delivery::Failed;
                SendOutcome::Unauthorized
            }
            Err(e) => {
                warn!("chat send failed: {}", e);
                self.messages[user_index].delivery = Delivery::Failed;
                self.messages.push(Message::assistant(SEND_FAILURE_NOTICE));
                SendOutcome::Failed
            }
        }
    }

    /// Fetch the history listing
    ///
    /// Failure is non-fatal for the view: the listing resets to empty
    /// and the error is reported for logging only.
    pub async fn load_history(&mut self, limit: u32) -> Result<usize> {
        match self.api.history(limit, self.user_id.as_deref()).await {
            Ok(data) => {
                self.history = data.conversations;
                Ok(self.history.len())
            }
            Err(e) => {
                warn!("history fetch failed, listing stays empty: {}", e);
                self.history.clear();
                Err(e)
            }
        }
    }

    /// Switch to a conversation from the history listing
    ///
    /// The backend exposes no per-session detail route, so the prior
    /// turns are not refetched; the transcript starts empty and new
    /// turns continue the chosen session.
    pub fn select_history(&mut self, summary: &ConversationSummary) {
        debug!(session_id = %summary.session_id, "switched to existing session");
        self.active_session_id = Some(summary.session_id.clone());
        self.messages.clear();
    }

    /// Start a fresh conversation; the next send obtains a new id
    pub fn new_chat(&mut self) {
        self.active_session_id = None;
        self.messages.clear();
    }

    /// Probe the conversation service health
    pub async fn status(&self) -> Result<serde_json::Value> {
        self.api.status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn controller_for(server: &mockito::ServerGuard) -> ConversationController {
        let api = Arc::new(ApiClient::new(server.url(), Duration::from_secs(5)).unwrap());
        ConversationController::new(api)
    }

    fn chat_reply(session_id: &str, text: &str) -> String {
        format!(
            r#"{{"code":200,"data":{{"session_id":"{}","assistant_response":"{}"}}}}"#,
            session_id, text
        )
    }

    #[tokio::test]
    async fn test_send_message_adopts_session_id() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/conversation/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_reply("s1", "hi there"))
            .create_async()
            .await;
        let mut controller = controller_for(&server);

        assert_eq!(
            controller.send_message("hello").await,
            SendOutcome::Delivered
        );
        assert_eq!(controller.active_session_id(), Some("s1"));

        let messages = controller.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[0].delivery, Delivery::Sent);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text, "hi there");
        assert!(!controller.is_awaiting_reply());
    }

    #[tokio::test]
    async fn test_send_message_keeps_existing_session_id() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/conversation/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_reply("s9", "ok"))
            .create_async()
            .await;
        let mut controller = controller_for(&server);
        controller.select_history(&ConversationSummary {
            session_id: "s1".to_string(),
            title: None,
            created_at: None,
        });

        controller.send_message("more").await;
        // The id adopted from history wins over the response body.
        assert_eq!(controller.active_session_id(), Some("s1"));
    }

    #[tokio::test]
    async fn test_blank_input_is_a_no_op() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/conversation/chat")
            .expect(0)
            .create_async()
            .await;
        let mut controller = controller_for(&server);

        assert_eq!(controller.send_message("").await, SendOutcome::Ignored);
        assert_eq!(controller.send_message("   ").await, SendOutcome::Ignored);
        assert!(controller.messages().is_empty());
        assert!(!controller.is_awaiting_reply());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_ignored_while_reply_in_flight() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/conversation/chat")
            .expect(0)
            .create_async()
            .await;
        let mut controller = controller_for(&server);
        controller.awaiting_reply = true;

        assert_eq!(controller.send_message("hello").await, SendOutcome::Ignored);
        assert!(controller.messages().is_empty());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_rejected_token_reported_for_reauth() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/conversation/chat")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":401,"message":"token expired"}"#)
            .create_async()
            .await;
        let api = Arc::new(ApiClient::new(server.url(), Duration::from_secs(5)).unwrap());
        api.set_token("stale");
        let mut controller = ConversationController::new(api.clone());

        assert_eq!(
            controller.send_message("hello").await,
            SendOutcome::Unauthorized
        );
        // The optimistic message survives, but no error bubble is
        // appended; the view leaves the transcript for the login flow.
        let messages = controller.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].delivery, Delivery::Failed);
        assert!(!controller.is_awaiting_reply());
        // The wrapper dropped the dead token.
        assert!(!api.has_token());
    }

    #[tokio::test]
    async fn test_send_failure_keeps_optimistic_message() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/conversation/chat")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":500,"message":"model unavailable"}"#)
            .create_async()
            .await;
        let mut controller = controller_for(&server);

        assert_eq!(controller.send_message("hello").await, SendOutcome::Failed);
        let messages = controller.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].delivery, Delivery::Failed);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].text, SEND_FAILURE_NOTICE);
        // The throttle released despite the failure.
        assert!(!controller.is_awaiting_reply());
        assert_eq!(controller.active_session_id(), None);
    }

    #[tokio::test]
    async fn test_empty_reply_uses_fallback_text() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/conversation/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":200,"data":{"session_id":"s1"}}"#)
            .create_async()
            .await;
        let mut controller = controller_for(&server);

        controller.send_message("hello").await;
        assert_eq!(controller.messages()[1].text, EMPTY_REPLY_FALLBACK);
    }

    #[tokio::test]
    async fn test_new_chat_resets_session() {
        let mut server = mockito::Server::new_async().await;
        let _m1 = server
            .mock("POST", "/api/conversation/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_reply("s1", "first"))
            .expect(1)
            .create_async()
            .await;
        let mut controller = controller_for(&server);

        controller.send_message("hello").await;
        assert_eq!(controller.active_session_id(), Some("s1"));

        controller.new_chat();
        assert_eq!(controller.active_session_id(), None);
        assert!(controller.messages().is_empty());

        // The next send adopts whatever fresh id the backend assigns.
        let _m2 = server
            .mock("POST", "/api/conversation/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_reply("s2", "second"))
            .create_async()
            .await;
        controller.send_message("again").await;
        assert_eq!(controller.active_session_id(), Some("s2"));
    }

    #[tokio::test]
    async fn test_load_history_preserves_backend_order() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/conversation/history")
            .match_query(mockito::Matcher::UrlEncoded("limit".into(), "10".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"code":200,"data":{"conversations":[
                    {"session_id":"s3","title":"third","created_at":"2025-08-28T10:00:00"},
                    {"session_id":"s1","title":"first","created_at":"2025-08-26T10:00:00"},
                    {"session_id":"s2","title":"second","created_at":"2025-08-27T10:00:00"}
                ],"total":3}}"#,
            )
            .create_async()
            .await;
        let mut controller = controller_for(&server);

        let count = controller.load_history(10).await.unwrap();
        assert_eq!(count, 3);
        let ids: Vec<&str> = controller
            .history()
            .iter()
            .map(|s| s.session_id.as_str())
            .collect();
        assert_eq!(ids, vec!["s3", "s1", "s2"]);
    }

    #[tokio::test]
    async fn test_load_history_failure_is_non_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/conversation/history")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let mut controller = controller_for(&server);

        assert!(controller.load_history(10).await.is_err());
        assert!(controller.history().is_empty());
    }

    #[tokio::test]
    async fn test_select_history_clears_transcript() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/conversation/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_reply("s1", "hi"))
            .create_async()
            .await;
        let mut controller = controller_for(&server);
        controller.send_message("hello").await;
        assert_eq!(controller.messages().len(), 2);

        controller.select_history(&ConversationSummary {
            session_id: "s7".to_string(),
            title: Some("older talk".to_string()),
            created_at: None,
        });
        assert_eq!(controller.active_session_id(), Some("s7"));
        assert!(controller.messages().is_empty());
    }

    #[tokio::test]
    async fn test_chat_request_includes_session_and_user() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/conversation/chat")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "message": "more",
                "session_id": "s1",
                "user_id": "7"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_reply("s1", "ok"))
            .create_async()
            .await;
        let mut controller = controller_for(&server);
        controller.set_user("7");
        controller.select_history(&ConversationSummary {
            session_id: "s1".to_string(),
            title: None,
            created_at: None,
        });

        controller.send_message("more").await;
        m.assert_async().await;
    }
}
