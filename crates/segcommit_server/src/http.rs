//! HTTP transport implementation.
//!
//! Every request is a POST to `{base}{path}?{query}`; only segment uploads
//! carry a body. Responses are JSON. The HTTP client itself is a trait so
//! any HTTP library, or an in-process loopback, can be plugged in.

use crate::error::{ServerError, ServerResult};
use crate::transport::CompletionTransport;
use parking_lot::RwLock;
use segcommit_protocol::{CompletionRequest, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, String>;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based completion transport.
pub struct HttpTransport<C: HttpClient> {
    client: C,
    timeout: Duration,
    open: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport with a 30 second timeout.
    pub fn new(client: C) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(30),
            open: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the timeout used by `send`. Coordinators pass their own through
    /// `send_with_timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns true if the transport is open and the client is healthy.
    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Closes the transport. Later requests fail without being retried.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl<C: HttpClient> CompletionTransport for HttpTransport<C> {
    fn send(&self, base_url: &str, request: &CompletionRequest) -> ServerResult<Response> {
        self.send_with_timeout(base_url, request, self.timeout)
    }

    fn send_with_timeout(
        &self,
        base_url: &str,
        request: &CompletionRequest,
        timeout: Duration,
    ) -> ServerResult<Response> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ServerError::transport_fatal("transport closed"));
        }

        let url = request.url(base_url);
        let body = request.payload.clone().unwrap_or_default();

        let response_body = self.client.post(&url, body, timeout).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            ServerError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        // A garbled reply counts as a request that never got an answer.
        match Response::decode(&response_body) {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(url = %url, error = %e, "undecodable controller response");
                Ok(Response::not_sent())
            }
        }
    }
}

/// Trait for in-process servers reachable through `LoopbackClient`.
pub trait LoopbackServer {
    /// Handles a POST to `path_and_query` and returns the response body.
    fn handle_post(&self, path_and_query: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An HTTP client that hands requests directly to an in-process server.
///
/// The scheme and host of the URL are dropped.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a loopback client connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, String> {
        self.server.handle_post(path_and_query(url), &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Strips `scheme://host[:port]` from a URL.
fn path_and_query(url: &str) -> &str {
    match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => url,
    }
}
