//! Streamed long-form book analysis reports over an OpenAI-compatible
//! chat-completions API.
//!
//! `folio` searches for a book and streams an AI-generated literary
//! analysis report, incrementally, from a remote backend. The interesting
//! machinery is the resilient streaming network client in [`net`]:
//! a retrying fetch wrapper with exponential backoff and resumption of
//! tracked requests, plus an incremental SSE parser that reconstructs
//! content deltas from raw byte chunks.
//!
//! # Getting started
//!
//! ```ignore
//! use folio::net::{BackoffPolicy, RequestTracker, ResilientClient};
//! use folio::prompt::ReportSubject;
//! use folio::report::start_report;
//! use folio::{ApiClient, config::AppConfig};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let config = AppConfig::from_env()?;
//!     let api = ApiClient::new(&config);
//!     let client = ResilientClient::new(RequestTracker::new(), BackoffPolicy::default())
//!         .map_err(|e| e.to_string())?;
//!
//!     let subject = ReportSubject::from_query("The Remains of the Day");
//!     let mut stream = start_report(client, api, subject).map_err(|e| e.to_string())?;
//!     while let Some(event) = stream.next().await {
//!         // Delta(text) | Done | Error(message)
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`net`] | Backoff policy, request tracker, resilient client, SSE parser |
//! | [`report`] | Background fetch+parse task and the [`ReportStream`](report::ReportStream) it feeds |
//! | [`books`] | Cached book-search client over a volumes catalog API |
//! | [`prompt`] | The single report prompt builder |
//! | [`config`] | Environment-based configuration |

pub mod books;
pub mod config;
pub mod net;
pub mod prompt;
pub mod report;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::net::RequestOptions;

// ── Constants ──────────────────────────────────────────────────────

/// Chat-completions endpoint path on the backend.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Health-check endpoint path.
pub const STATUS_PATH: &str = "/api/status";

/// Default model for report generation.
pub const DEFAULT_MODEL: &str = "deepseek-reasoner";

// ── Request types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Chat completion request body.
#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
}

// ── Client ─────────────────────────────────────────────────────────

/// Builds authenticated requests against the report backend.
///
/// The resilient transport lives in [`net::ResilientClient`]; this type
/// only knows URLs, headers, and body shapes.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    api_key: String,
    model: String,
}

impl ApiClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn auth_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".into(), format!("Bearer {}", self.api_key)),
            ("Content-Type".into(), "application/json".into()),
        ]
    }

    /// The (url, options) pair for a streaming completion of `prompt`.
    pub fn completion_request(&self, prompt: &str) -> Result<(String, RequestOptions), String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::user(prompt)],
            stream: true,
        };
        let body = serde_json::to_string(&body)
            .map_err(|e| format!("failed to serialize request: {e}"))?;
        let url = format!("{}{CHAT_COMPLETIONS_PATH}", self.base_url);
        Ok((url, RequestOptions::post_json(self.auth_headers(), body)))
    }

    /// The (url, options) pair for the backend health check. The response
    /// body is opaque JSON, forwarded to the caller verbatim.
    pub fn status_request(&self) -> (String, RequestOptions) {
        let url = format!("{}{STATUS_PATH}", self.base_url);
        (url, RequestOptions::get(self.auth_headers()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        AppConfig {
            api_base_url: "https://api.example.com/".into(),
            api_key: "sk-test".into(),
            books_base_url: "https://books.example.com/volumes".into(),
            books_api_key: None,
            model: DEFAULT_MODEL.into(),
        }
    }

    #[test]
    fn completion_request_shape() {
        let api = ApiClient::new(&config());
        let (url, options) = api.completion_request("analyze this").unwrap();
        assert_eq!(url, "https://api.example.com/v1/chat/completions");
        assert_eq!(options.method, "POST");

        let body: serde_json::Value = serde_json::from_str(options.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "analyze this");
    }

    #[test]
    fn requests_carry_bearer_auth() {
        let api = ApiClient::new(&config());
        let (url, options) = api.status_request();
        assert_eq!(url, "https://api.example.com/api/status");
        assert!(
            options
                .headers
                .iter()
                .any(|(k, v)| k == "Authorization" && v == "Bearer sk-test")
        );
    }
}
