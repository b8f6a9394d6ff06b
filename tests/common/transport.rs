//! Scripted API transport
//!
//! Replies are consumed in order; once the script runs out every request gets
//! the fallback reply (`200` with no body unless changed).

use async_trait::async_trait;
use farmsync::api_client::{ApiRequest, ApiResponse, ApiTransport, TransportError};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

pub type Reply = Result<ApiResponse, TransportError>;

pub struct FakeTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    seen: Mutex<Vec<ApiRequest>>,
    token: Mutex<Option<String>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ok(200)),
            seen: Mutex::new(Vec::new()),
            token: Mutex::new(None),
        }
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(replies: impl IntoIterator<Item = Reply>) -> Self {
        let transport = Self::default();
        transport.script.lock().unwrap().extend(replies);
        transport
    }

    /// Reply used once the script is exhausted
    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.seen.lock().unwrap().clone()
    }

    /// `"VERB path"` for every request seen, in order
    pub fn request_lines(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| format!("{} {}", request.verb, request.path))
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiTransport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Reply {
        self.seen.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => self.fallback.lock().unwrap().clone(),
        }
    }

    async fn set_bearer_token(&self, token: Option<String>) {
        *self.token.lock().unwrap() = token;
    }
}

pub fn ok(status: u16) -> Reply {
    Ok(ApiResponse::new(status, None))
}

pub fn ok_json(status: u16, body: Value) -> Reply {
    Ok(ApiResponse::new(status, Some(body)))
}

pub fn refused() -> Reply {
    Err(TransportError::Connect("connection refused".into()))
}
