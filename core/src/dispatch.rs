//! Fake-or-live dispatch.
//!
//! # Design
//! `DispatchEngine::dispatch` is the single funnel every verb method goes
//! through. A stub hit is answered from the `FakeResponseStore` without
//! touching the transport and without registering anything cancellable. A
//! miss builds an `HttpRequest`, hands it to the `Transport`, and registers
//! the returned cancel handle. Either way the outcome travels through the
//! `ExecutionModeController`, so each dispatch fires its completion exactly
//! once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::NetworkingConfig;
use crate::delivery::{Completion, ExecutionModeController};
use crate::error::NetworkingError;
use crate::fake::FakeResponseStore;
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse};
use crate::identity::RequestId;
use crate::registry::CancellationRegistry;
use crate::transport::{Transport, TransportCallback, TransportResult};
use crate::types::ResponseOutcome;

const JSON: &str = "application/json";

pub struct DispatchEngine {
    base_url: String,
    user_agent: String,
    header_fields: RwLock<Headers>,
    error_logging: Arc<AtomicBool>,
    transport: Arc<dyn Transport>,
    fakes: FakeResponseStore,
    registry: Arc<CancellationRegistry>,
    mode: ExecutionModeController,
}

impl DispatchEngine {
    pub fn new(base_url: &str, config: &NetworkingConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
            header_fields: RwLock::new(config.header_fields()),
            error_logging: Arc::new(AtomicBool::new(config.error_logging)),
            transport,
            fakes: FakeResponseStore::new(),
            registry: Arc::new(CancellationRegistry::new()),
            mode: ExecutionModeController::new(config.synchronous_timeout()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.is_empty() || path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    pub fn fakes(&self) -> &FakeResponseStore {
        &self.fakes
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    pub fn mode(&self) -> &ExecutionModeController {
        &self.mode
    }

    pub fn set_header_fields(&self, headers: Headers) {
        *self.header_fields.write().unwrap_or_else(PoisonError::into_inner) = headers;
    }

    pub fn set_error_logging(&self, enabled: bool) {
        self.error_logging.store(enabled, Ordering::SeqCst);
    }

    pub fn dispatch(
        &self,
        method: HttpMethod,
        path: &str,
        parameters: Option<&Value>,
        completion: Completion,
    ) -> RequestId {
        let id = RequestId::mint();

        if let Some(stub) = self.fakes.lookup(method, path) {
            debug!(%id, %method, path, status = stub.status_code, "serving fake response");
            self.mode.deliver(completion, stub.outcome());
            return id;
        }

        let request = match self.build_request(method, path, parameters) {
            Ok(request) => request,
            Err(error) => {
                self.log_failure(method, path, &error);
                self.mode.deliver(completion, ResponseOutcome::failure(error, Headers::new()));
                return id;
            }
        };
        debug!(%id, %method, url = %request.url, "dispatching request");

        let (sink, pending) = self.mode.prepare(completion);

        // Set by the callback before it deregisters, so a response that beats
        // `register` below is still cleaned up.
        let finished = Arc::new(AtomicBool::new(false));
        let on_complete: TransportCallback = {
            let finished = Arc::clone(&finished);
            let registry = Arc::clone(&self.registry);
            let error_logging = Arc::clone(&self.error_logging);
            let path = path.to_string();
            Box::new(move |result| {
                finished.store(true, Ordering::SeqCst);
                registry.deregister(id);
                let outcome = resolve(result);
                if let Some(error) = &outcome.error {
                    if error_logging.load(Ordering::SeqCst) && !error.is_cancelled() {
                        warn!(
                            %id, %method, path = %path, code = error.code(), error = %error,
                            "request failed"
                        );
                    }
                }
                sink(outcome);
            })
        };

        let handle = self.transport.execute(request, on_complete);
        self.registry.register(id, method, path, Arc::clone(&handle));
        if finished.load(Ordering::SeqCst) {
            self.registry.deregister(id);
        }
        self.mode.finish(pending, || handle.cancel());
        id
    }

    fn log_failure(&self, method: HttpMethod, path: &str, error: &NetworkingError) {
        if self.error_logging.load(Ordering::SeqCst) {
            warn!(%method, path, code = error.code(), error = %error, "request failed");
        }
    }

    pub fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        parameters: Option<&Value>,
    ) -> Result<HttpRequest, NetworkingError> {
        let mut headers = Headers::new();
        headers.insert("Accept", JSON);
        headers.insert("User-Agent", self.user_agent.as_str());
        headers.merge(&self.header_fields.read().unwrap_or_else(PoisonError::into_inner));
        headers.insert("Content-Type", JSON);

        let (query, body) = match parameters {
            None => (Vec::new(), None),
            Some(parameters) if method.sends_body() => {
                let body = serde_json::to_vec(parameters)
                    .map_err(|e| NetworkingError::Serialization(e.to_string()))?;
                (Vec::new(), Some(body))
            }
            Some(parameters) => (query_pairs(parameters), None),
        };

        Ok(HttpRequest {
            method,
            url: self.url_for(path),
            headers,
            query,
            body,
        })
    }
}

/// Flatten an object into query pairs. Strings go in verbatim, everything
/// else as its JSON text.
fn query_pairs(parameters: &Value) -> Vec<(String, String)> {
    match parameters {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect(),
        Value::Null => Vec::new(),
        other => {
            warn!(parameters = %other, "ignoring non-object query parameters");
            Vec::new()
        }
    }
}

/// Turn a transport result into the outcome a completion receives.
pub fn resolve(result: TransportResult) -> ResponseOutcome {
    match result {
        Err(error) => ResponseOutcome::failure(error.into(), Headers::new()),
        Ok(response) if response.is_error() => {
            let error = NetworkingError::Http {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            };
            ResponseOutcome::failure(error, response.headers)
        }
        Ok(response) => decode(response),
    }
}

fn decode(response: HttpResponse) -> ResponseOutcome {
    let HttpResponse { headers, body, .. } = response;
    if !headers.has_json_content_type() || body.is_empty() {
        return ResponseOutcome::success(None, headers, body);
    }
    match serde_json::from_slice(&body) {
        Ok(value) => ResponseOutcome::success(Some(value), headers, body),
        Err(e) => {
            ResponseOutcome::failure(NetworkingError::Deserialization(e.to_string()), headers)
        }
    }
}
