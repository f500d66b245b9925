//! Transport layer abstraction.
//!
//! The engine only needs one capability from the network: perform a request
//! and return the status and body, or fail. Everything above that (routes,
//! retries, classification) is built on this trait.

use databay_protocol::{HttpRequest, HttpResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// Failure to obtain any response at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established or was lost.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request could not be sent at all.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Returns true if sending the request again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_))
    }
}

/// Executes HTTP requests against a DataBay server.
///
/// Implementations must honour [`HttpRequest::timeout`] when it is set.
pub trait Transport: Send + Sync {
    /// Sends a request and returns the response.
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).request(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).request(request)
    }
}

/// A scripted transport for testing.
///
/// Responses are returned in the order they were queued. Once the queue is
/// empty every request fails with [`TransportError::Connection`].
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: HttpResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a JSON response with status 200.
    pub fn push_json<T: serde::Serialize>(&self, body: &T) {
        let bytes = serde_json::to_vec(body).unwrap_or_default();
        self.push_response(HttpResponse::new(200, bytes));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: TransportError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Returns every request seen so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests seen so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the number of queued responses not yet consumed.
    pub fn pending(&self) -> usize {
        self.responses.lock().len()
    }
}

impl Transport for MockTransport {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connection("no scripted response".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use databay_protocol::ErrorCode;

    #[test]
    fn mock_transport_replays_in_order() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::error(ErrorCode::Unavailable, "busy"));
        transport.push_json(&serde_json::json!({"name": "cars"}));

        let request = HttpRequest::get("/v1/datasets/cars");
        assert_eq!(transport.request(&request).unwrap().status, 503);
        assert_eq!(transport.request(&request).unwrap().status, 200);
        assert_eq!(transport.request_count(), 2);
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn mock_transport_exhausted() {
        let transport = MockTransport::new();
        let result = transport.request(&HttpRequest::get("/v1/datasets"));
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }

    #[test]
    fn transport_error_classification() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Connection("reset".into()).is_retryable());
        assert!(!TransportError::InvalidRequest("bad url".into()).is_retryable());
    }

    #[test]
    fn shared_transport_records_requests() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::Timeout);
        let shared: Arc<dyn Transport> = transport.clone();
        assert_eq!(
            shared.request(&HttpRequest::get("/v1/datasets")),
            Err(TransportError::Timeout)
        );
        assert_eq!(transport.requests()[0].path, "/v1/datasets");
    }
}
