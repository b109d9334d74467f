//! Transport layer abstraction for completion requests.

use crate::error::{ServerError, ServerResult};
use parking_lot::Mutex;
use segcommit_protocol::{CompletionRequest, RequestKind, Response};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Carries completion requests to a controller.
///
/// `base_url` is chosen per request: the split commit steps go to the VIP
/// address the controller handed out, not to the address the negotiation
/// started on.
pub trait CompletionTransport: Send + Sync {
    /// Sends `request` to the controller at `base_url`.
    fn send(&self, base_url: &str, request: &CompletionRequest) -> ServerResult<Response>;

    /// Sends `request` with a caller-chosen timeout.
    ///
    /// Transports without a notion of timeouts ignore it.
    fn send_with_timeout(
        &self,
        base_url: &str,
        request: &CompletionRequest,
        _timeout: Duration,
    ) -> ServerResult<Response> {
        self.send(base_url, request)
    }
}

/// A scripted reply.
#[derive(Debug, Clone)]
enum Scripted {
    Reply(Response),
    Unreachable(String),
}

/// A mock transport for testing.
///
/// Replies are scripted per request kind and consumed in order; when a
/// kind's script is empty the request fails with a protocol error.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    scripts: Mutex<HashMap<RequestKind, VecDeque<Scripted>>>,
    sent: Mutex<Vec<(String, CompletionRequest)>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            scripts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queues a reply to the next request of `kind`.
    pub fn push_response(&self, kind: RequestKind, response: Response) {
        self.scripts
            .lock()
            .entry(kind)
            .or_default()
            .push_back(Scripted::Reply(response));
    }

    /// Makes the next request of `kind` fail as if the controller were
    /// unreachable.
    pub fn push_unreachable(&self, kind: RequestKind, message: impl Into<String>) {
        self.scripts
            .lock()
            .entry(kind)
            .or_default()
            .push_back(Scripted::Unreachable(message.into()));
    }

    /// Sets the connected state. A disconnected transport fails every
    /// request with a non-retryable error.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns every request sent so far with the base URL it went to.
    pub fn sent(&self) -> Vec<(String, CompletionRequest)> {
        self.sent.lock().clone()
    }

    /// Returns the kinds of the requests sent so far, in order.
    pub fn sent_kinds(&self) -> Vec<RequestKind> {
        self.sent.lock().iter().map(|(_, r)| r.kind).collect()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionTransport for MockTransport {
    fn send(&self, base_url: &str, request: &CompletionRequest) -> ServerResult<Response> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ServerError::transport_fatal("mock transport disconnected"));
        }
        self.sent
            .lock()
            .push((base_url.to_string(), request.clone()));

        let next = self
            .scripts
            .lock()
            .get_mut(&request.kind)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Unreachable(message)) => Err(ServerError::transport_retryable(message)),
            None => Err(ServerError::Protocol(format!(
                "no mock response for {}",
                request.kind
            ))),
        }
    }
}
