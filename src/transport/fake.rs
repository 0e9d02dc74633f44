//! In-process fake transport for unit tests
//!
//! [`FakeTransport`] replays scripted responses in FIFO order and records
//! every request it receives, so tests can assert on exactly what the flow
//! sent without opening sockets.
//!
//! ```text
//! flow send() --> requests (recorded) ; responses.pop_front() --> flow
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AuthError, Result};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Scripted transport used by unit tests.
#[derive(Debug, Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every response by `delay` so tests can overlap calls.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, body: serde_json::Value) {
        self.responses
            .lock()
            .push_back(Ok(HttpResponse::new(status, body.to_string())));
    }

    /// Queues a network failure.
    pub fn push_transport_error(&self, message: &str) {
        self.responses
            .lock()
            .push_back(Err(AuthError::Transport(message.to_string())));
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Transport("no scripted response".to_string())))
    }
}
