//! Transports that misbehave on purpose.
//!
//! [`FaultyTransport`] answers selected requests with an error status before
//! the real server sees them. [`GatedTransport`] parks part uploads until the
//! test opens the gate, which keeps an upload in flight for as long as the
//! test needs.

use databay_protocol::{ErrorCode, HttpRequest, HttpResponse, Method};
use databay_sync_engine::{Transport, TransportError};
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Which requests a fault applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultTarget {
    /// Uploads of part `n` of the first upload session that reaches it.
    Part(u32),
    /// Any request whose path contains the fragment.
    PathContains(String),
    /// Every request with this method.
    Method(Method),
}

#[derive(Debug)]
struct Fault {
    target: FaultTarget,
    code: ErrorCode,
    remaining: usize,
    /// Path a `Part` fault locked onto.
    bound: Option<String>,
}

impl Fault {
    fn matches(&mut self, request: &HttpRequest) -> bool {
        if self.remaining == 0 {
            return false;
        }
        match &self.target {
            FaultTarget::Part(n) => {
                if request.method != Method::Put {
                    return false;
                }
                if let Some(path) = &self.bound {
                    return *path == request.path;
                }
                let hit = request.path.ends_with(&format!("/parts/{n}"));
                if hit {
                    self.bound = Some(request.path.clone());
                }
                hit
            }
            FaultTarget::PathContains(fragment) => request.path.contains(fragment.as_str()),
            FaultTarget::Method(method) => request.method == *method,
        }
    }
}

/// Wraps a transport and injects error responses.
pub struct FaultyTransport<T> {
    inner: T,
    faults: Mutex<Vec<Fault>>,
    injected: Mutex<Vec<HttpRequest>>,
}

impl<T: Transport> FaultyTransport<T> {
    /// Wraps `inner` without any faults.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            injected: Mutex::new(Vec::new()),
        }
    }

    /// Answers the next `times` matching requests with `code`.
    pub fn inject(&self, target: FaultTarget, code: ErrorCode, times: usize) {
        self.faults.lock().push(Fault {
            target,
            code,
            remaining: times,
            bound: None,
        });
    }

    /// Builder form of [`inject`](Self::inject).
    pub fn with_fault(self, target: FaultTarget, code: ErrorCode, times: usize) -> Self {
        self.inject(target, code, times);
        self
    }

    /// Returns the requests that were answered with a fault.
    pub fn injected(&self) -> Vec<HttpRequest> {
        self.injected.lock().clone()
    }

    /// Returns the wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for FaultyTransport<T> {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let code = self.faults.lock().iter_mut().find_map(|fault| {
            fault.matches(request).then(|| {
                fault.remaining -= 1;
                fault.code
            })
        });
        match code {
            Some(code) => {
                self.injected.lock().push(request.clone());
                Ok(HttpResponse::error(code, "injected fault"))
            }
            None => self.inner.request(request),
        }
    }
}

#[derive(Debug, Default)]
struct Gate {
    open: bool,
    parked: usize,
}

/// Wraps a transport and holds part uploads until [`open`](Self::open).
pub struct GatedTransport<T> {
    inner: T,
    gate: Mutex<Gate>,
    changed: Condvar,
}

impl<T: Transport> GatedTransport<T> {
    /// Wraps `inner` with a closed gate.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            gate: Mutex::new(Gate::default()),
            changed: Condvar::new(),
        }
    }

    /// Lets every parked and future request through.
    pub fn open(&self) {
        self.gate.lock().open = true;
        self.changed.notify_all();
    }

    /// Waits until `count` requests are parked. Returns false on timeout.
    pub fn wait_for_parked(&self, count: usize, timeout: Duration) -> bool {
        let mut gate = self.gate.lock();
        let result = self
            .changed
            .wait_while_for(&mut gate, |g| g.parked < count, timeout);
        !result.timed_out()
    }

    /// Returns the number of requests waiting at the gate.
    pub fn parked(&self) -> usize {
        self.gate.lock().parked
    }
}

impl<T: Transport> Transport for GatedTransport<T> {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.method == Method::Put {
            let mut gate = self.gate.lock();
            gate.parked += 1;
            self.changed.notify_all();
            self.changed.wait_while(&mut gate, |g| !g.open);
            gate.parked -= 1;
        }
        self.inner.request(request)
    }
}
