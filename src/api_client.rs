//! # API Client
//!
//! The HTTP seam between the offline layer and the farm API. The sync engine
//! and the facade only ever talk to an [`ApiTransport`], so tests can script
//! responses while the application uses [`HttpTransport`].
//!
//! ## Failure Classification
//!
//! | Result                              | Class       |
//! |-------------------------------------|-------------|
//! | 2xx                                 | applied     |
//! | timeout, refused connection, I/O    | transient   |
//! | 5xx, 408, 429                       | transient   |
//! | any other status                    | permanent   |

use async_trait::async_trait;
use reqwest::{Client, Method as HttpMethod};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::shared::config::SyncConfig;
use crate::shared::error::FailureClass;

/// HTTP verb of an outgoing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request relative to the API base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub verb: Verb,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            verb: Verb::Get,
            path: path.into(),
            body: None,
        }
    }
}

/// Status and decoded body of a completed exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request never produced an HTTP status
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("network error: {0}")]
    Network(String),
}

/// Anything able to carry an [`ApiRequest`] to the server
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;

    /// Replace the bearer token; transports without auth ignore it
    async fn set_bearer_token(&self, _token: Option<String>) {}
}

/// Result of one exchange, as the engine sees it
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The server accepted the request
    Applied(ApiResponse),
    /// The request failed and must be retried or dead-lettered
    Failed {
        class: FailureClass,
        status: Option<u16>,
        reason: String,
    },
}

impl Delivery {
    pub fn is_applied(&self) -> bool {
        matches!(self, Delivery::Applied(_))
    }
}

/// Classify a transport result into applied, transient or permanent
pub fn classify(result: Result<ApiResponse, TransportError>) -> Delivery {
    match result {
        Ok(response) if response.is_success() => Delivery::Applied(response),
        Ok(response) => {
            let class = match response.status {
                408 | 429 | 500..=599 => FailureClass::Transient,
                _ => FailureClass::Permanent,
            };
            Delivery::Failed {
                class,
                status: Some(response.status),
                reason: describe_status(&response),
            }
        }
        Err(error) => Delivery::Failed {
            class: FailureClass::Transient,
            status: None,
            reason: error.to_string(),
        },
    }
}

fn describe_status(response: &ApiResponse) -> String {
    let detail = match &response.body {
        Some(Value::String(text)) if !text.is_empty() => Some(text.clone()),
        Some(Value::Object(map)) => ["error", "message", "detail"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    };

    match detail {
        Some(detail) => format!("HTTP {}: {}", response.status, detail),
        None => format!("HTTP {}", response.status),
    }
}

/// `reqwest` transport against the farm API
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: RwLock::new(config.auth_token.clone()),
            timeout: config.request_timeout,
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let method = match request.verb {
            Verb::Get => HttpMethod::GET,
            Verb::Post => HttpMethod::POST,
            Verb::Put => HttpMethod::PUT,
            Verb::Delete => HttpMethod::DELETE,
        };

        let mut builder = self
            .client
            .request(method, self.url_for(&request.path))
            .timeout(self.timeout);

        if let Some(token) = self.token.read().await.as_ref() {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;

        tracing::debug!("[Api] {} {} -> {}", request.verb, request.path, status);
        Ok(ApiResponse::new(status, decode_body(&text)))
    }

    async fn set_bearer_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }
}

fn transport_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Network(error.to_string())
    }
}

fn decode_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}
