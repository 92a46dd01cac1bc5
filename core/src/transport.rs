//! The network seam.
//!
//! # Design
//! A `Transport` takes an `HttpRequest` and a one-shot callback and returns a
//! cancel handle straight away; the round-trip happens elsewhere. The
//! callback must fire exactly once, with either the response or an error.
//! `CallbackSlot` enforces that: whichever of "response arrived" and
//! "cancel requested" gets there first resolves the slot, and the loser is
//! dropped.
//!
//! `UreqTransport` is the live implementation. ureq is blocking, so every
//! request runs on its own worker thread with its own agent, whose sockets
//! are opened through a `SocketSwitch`. Cancelling resolves the callback
//! immediately with `CANCELLED_CODE` and then shuts the request's sockets
//! down, so the worker unblocks and the connection closes. The worker's late
//! result is discarded.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, error};
use ureq::unversioned::resolver::DefaultResolver;
use ureq::unversioned::transport::{Connector, RustlsConnector};

use crate::config::NetworkingConfig;
use crate::error::{
    TransportError, BAD_URL_CODE, CANNOT_CONNECT_CODE, CANNOT_FIND_HOST_CODE, TIMED_OUT_CODE,
    UNKNOWN_CODE,
};
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse};
use crate::socket::{SocketConnector, SocketSwitch};

pub type TransportResult = Result<HttpResponse, TransportError>;
pub type TransportCallback = Box<dyn FnOnce(TransportResult) + Send + 'static>;

/// Asks an in-flight transport operation to stop.
pub trait CancelHandle: Send + Sync {
    fn cancel(&self);
}

/// Executes requests off the caller's thread.
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: HttpRequest,
        on_complete: TransportCallback,
    ) -> Arc<dyn CancelHandle>;
}

/// Holds a transport callback until the first of response or cancellation
/// resolves it.
pub struct CallbackSlot {
    callback: Mutex<Option<TransportCallback>>,
}

impl CallbackSlot {
    pub fn new(callback: TransportCallback) -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(Some(callback)),
        })
    }

    /// Fire the callback with `result`. Returns `false` if it already fired.
    pub fn resolve(&self, result: TransportResult) -> bool {
        // Take under the lock, call outside it: the callback may re-enter.
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl CancelHandle for CallbackSlot {
    fn cancel(&self) {
        self.resolve(Err(TransportError::cancelled()));
    }
}

/// Live transport backed by ureq.
#[derive(Clone)]
pub struct UreqTransport {
    config: ureq::config::Config,
}

impl UreqTransport {
    /// Status codes come back as data so the dispatcher can map them.
    pub fn new(config: &NetworkingConfig) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.request_timeout()))
            .build();
        Self { config }
    }

    /// An agent whose connections all go through `switch`.
    fn agent(&self, switch: &Arc<SocketSwitch>) -> ureq::Agent {
        let connector = SocketConnector::new(Arc::clone(switch)).chain(RustlsConnector::default());
        ureq::Agent::with_parts(self.config.clone(), connector, DefaultResolver::default())
    }
}

/// Cancel handle for a live request: resolve first, then cut the socket.
struct InFlight {
    slot: Arc<CallbackSlot>,
    switch: Arc<SocketSwitch>,
}

impl CancelHandle for InFlight {
    fn cancel(&self) {
        self.slot.cancel();
        self.switch.shut_down();
    }
}

impl Transport for UreqTransport {
    fn execute(
        &self,
        request: HttpRequest,
        on_complete: TransportCallback,
    ) -> Arc<dyn CancelHandle> {
        let slot = CallbackSlot::new(on_complete);
        let switch = SocketSwitch::new();
        let worker_slot = Arc::clone(&slot);
        let agent = self.agent(&switch);
        let spawned = thread::Builder::new()
            .name("networking-transport".to_string())
            .spawn(move || {
                let result = perform(&agent, &request);
                if !worker_slot.resolve(result) {
                    debug!(
                        method = %request.method, url = %request.url,
                        "discarding result of cancelled request"
                    );
                }
            });
        if let Err(err) = spawned {
            error!(error = %err, "failed to spawn transport worker");
            slot.resolve(Err(TransportError::new(UNKNOWN_CODE, err.to_string())));
        }
        Arc::new(InFlight { slot, switch })
    }
}

fn prepare<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &HttpRequest,
) -> ureq::RequestBuilder<B> {
    for (name, value) in request.headers.iter() {
        builder = builder.header(name, value);
    }
    for (key, value) in &request.query {
        builder = builder.query(key, value);
    }
    builder
}

fn perform(agent: &ureq::Agent, request: &HttpRequest) -> TransportResult {
    let url = request.url.as_str();
    let body = request.body.as_deref();
    let result = match (request.method, body) {
        (HttpMethod::Get, _) => prepare(agent.get(url), request).call(),
        (HttpMethod::Delete, _) => prepare(agent.delete(url), request).call(),
        (HttpMethod::Post, Some(body)) => prepare(agent.post(url), request).send(body),
        (HttpMethod::Post, None) => prepare(agent.post(url), request).send_empty(),
        (HttpMethod::Put, Some(body)) => prepare(agent.put(url), request).send(body),
        (HttpMethod::Put, None) => prepare(agent.put(url), request).send_empty(),
    };
    let mut response = result.map_err(TransportError::from)?;

    let status = response.status().as_u16();
    let headers: Headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();
    let body = response.body_mut().read_to_vec().map_err(TransportError::from)?;

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        let code = match &err {
            ureq::Error::Timeout(_) => TIMED_OUT_CODE,
            ureq::Error::HostNotFound => CANNOT_FIND_HOST_CODE,
            ureq::Error::ConnectionFailed => CANNOT_CONNECT_CODE,
            ureq::Error::BadUri(_) => BAD_URL_CODE,
            ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                CANNOT_CONNECT_CODE
            }
            ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => TIMED_OUT_CODE,
            _ => UNKNOWN_CODE,
        };
        TransportError::new(code, err.to_string())
    }
}
