//! In-process HTTP transport.
//!
//! [`LoopbackTransport`] hands requests straight to a [`LoopbackServer`]
//! without touching the network, so the engine can be exercised end to end
//! against the reference server in tests.

use crate::transport::{Transport, TransportError};
use databay_protocol::{HttpRequest, HttpResponse, LoopbackServer};

/// A transport that calls a server in the same process.
#[derive(Debug, Clone)]
pub struct LoopbackTransport<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackTransport<S> {
    /// Creates a loopback transport.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> Transport for LoopbackTransport<S> {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(self.server.handle(request))
    }
}
