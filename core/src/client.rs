//! The public client.
//!
//! # Design
//! `Networking` is a thin, verb-per-method surface over `DispatchEngine`.
//! Each verb has five entry points: a dispatch whose completion gets the
//! decoded body, a `_with_headers` twin whose completion gets the whole
//! `ResponseOutcome`, a fake registration, a file-backed fake registration,
//! and cancel-by-path. `cancel` by identity is shared across verbs.
//!
//! All state (stubs, pending requests, mode) belongs to the instance, so
//! several clients in one test binary never see each other's fakes.

use std::sync::Arc;

use serde_json::Value;

use crate::config::NetworkingConfig;
use crate::dispatch::DispatchEngine;
use crate::error::{FixtureError, NetworkingError};
use crate::fake::Bundle;
use crate::http::{Headers, HttpMethod};
use crate::identity::RequestId;
use crate::transport::{Transport, UreqTransport};
use crate::types::ResponseOutcome;

/// What a body-only completion receives.
pub type JsonResult = Result<Option<Value>, NetworkingError>;

macro_rules! verb_methods {
    (
        $method:expr,
        $verb:literal,
        $call:ident,
        $call_with_headers:ident,
        $fake:ident,
        $fake_from_file:ident,
        $cancel:ident
    ) => {
        #[doc = concat!("Dispatch a `", $verb, "` to `path`. `completion` gets the decoded body.")]
        pub fn $call<F>(&self, path: &str, parameters: Option<Value>, completion: F) -> RequestId
        where
            F: FnOnce(JsonResult) + Send + 'static,
        {
            self.request($method, path, parameters, completion)
        }

        #[doc = concat!("Dispatch a `", $verb, "` to `path`. `completion` gets the full outcome.")]
        pub fn $call_with_headers<F>(
            &self,
            path: &str,
            parameters: Option<Value>,
            completion: F,
        ) -> RequestId
        where
            F: FnOnce(ResponseOutcome) + Send + 'static,
        {
            self.request_with_headers($method, path, parameters, completion)
        }

        #[doc = concat!("Answer every later `", $verb, "` to `path` with `response`.")]
        pub fn $fake(&self, path: &str, response: Option<Value>, status_code: u16) {
            self.fake($method, path, response, status_code);
        }

        #[doc = concat!("Answer every later `", $verb, "` to `path` with the JSON in `file_name`.")]
        pub fn $fake_from_file(
            &self,
            path: &str,
            file_name: &str,
            bundle: &Bundle,
        ) -> Result<(), FixtureError> {
            self.fake_from_file($method, path, file_name, bundle, 200)
        }

        #[doc = concat!("Cancel every in-flight `", $verb, "` to `path`.")]
        pub fn $cancel(&self, path: &str) {
            self.cancel_requests($method, path);
        }
    };
}

/// JSON HTTP client with per-path fakes and request cancellation.
pub struct Networking {
    engine: DispatchEngine,
}

impl Networking {
    pub fn new(base_url: &str) -> Self {
        Self::with_config(base_url, NetworkingConfig::default())
    }

    pub fn with_config(base_url: &str, config: NetworkingConfig) -> Self {
        let transport = Arc::new(UreqTransport::new(&config));
        Self::with_transport(base_url, config, transport)
    }

    pub fn with_transport(
        base_url: &str,
        config: NetworkingConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            engine: DispatchEngine::new(base_url, &config, transport),
        }
    }

    pub fn base_url(&self) -> &str {
        self.engine.base_url()
    }

    pub fn url_for(&self, path: &str) -> String {
        self.engine.url_for(path)
    }

    pub fn is_synchronous(&self) -> bool {
        self.engine.mode().is_synchronous()
    }

    /// In synchronous mode every dispatch returns only after its completion
    /// has run. Meant for tests; the default is asynchronous.
    pub fn set_synchronous(&self, synchronous: bool) {
        self.engine.mode().set_synchronous(synchronous);
    }

    /// Replace the extra headers sent with every live request.
    pub fn set_header_fields(&self, headers: Headers) {
        self.engine.set_header_fields(headers);
    }

    pub fn disable_error_logging(&self) {
        self.engine.set_error_logging(false);
    }

    pub fn request<F>(
        &self,
        method: HttpMethod,
        path: &str,
        parameters: Option<Value>,
        completion: F,
    ) -> RequestId
    where
        F: FnOnce(JsonResult) + Send + 'static,
    {
        self.request_with_headers(method, path, parameters, move |outcome: ResponseOutcome| {
            completion(outcome.into_result())
        })
    }

    pub fn request_with_headers<F>(
        &self,
        method: HttpMethod,
        path: &str,
        parameters: Option<Value>,
        completion: F,
    ) -> RequestId
    where
        F: FnOnce(ResponseOutcome) + Send + 'static,
    {
        self.engine
            .dispatch(method, path, parameters.as_ref(), Box::new(completion))
    }

    pub fn fake(&self, method: HttpMethod, path: &str, response: Option<Value>, status_code: u16) {
        self.engine.fakes().set_stub(method, path, response, status_code);
    }

    pub fn fake_from_file(
        &self,
        method: HttpMethod,
        path: &str,
        file_name: &str,
        bundle: &Bundle,
        status_code: u16,
    ) -> Result<(), FixtureError> {
        self.engine
            .fakes()
            .set_stub_from_file(method, path, file_name, bundle, status_code)
    }

    /// Cancel every in-flight `method` request on `path`.
    pub fn cancel_requests(&self, method: HttpMethod, path: &str) {
        self.engine.registry().cancel_by_path(method, path);
    }

    /// Cancel the request that returned `id`. Finished, fake, and unknown
    /// identities are ignored.
    pub fn cancel(&self, id: RequestId) {
        self.engine.registry().cancel_by_identity(id);
    }

    pub fn cancel_all_requests(&self) {
        self.engine.registry().cancel_all();
    }

    /// Number of live requests still waiting on the transport.
    pub fn pending_requests(&self) -> usize {
        self.engine.registry().pending_count()
    }

    verb_methods!(
        HttpMethod::Get,
        "GET",
        get,
        get_with_headers,
        fake_get,
        fake_get_from_file,
        cancel_get
    );
    verb_methods!(
        HttpMethod::Post,
        "POST",
        post,
        post_with_headers,
        fake_post,
        fake_post_from_file,
        cancel_post
    );
    verb_methods!(
        HttpMethod::Put,
        "PUT",
        put,
        put_with_headers,
        fake_put,
        fake_put_from_file,
        cancel_put
    );
    verb_methods!(
        HttpMethod::Delete,
        "DELETE",
        delete,
        delete_with_headers,
        fake_delete,
        fake_delete_from_file,
        cancel_delete
    );
}

impl Drop for Networking {
    fn drop(&mut self) {
        self.cancel_all_requests();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpRequest;
    use crate::transport::{CallbackSlot, CancelHandle, TransportCallback};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    /// Never answers; requests stay pending until cancelled.
    #[derive(Default)]
    struct Silent {
        slots: Mutex<Vec<Arc<CallbackSlot>>>,
    }

    impl Transport for Silent {
        fn execute(
            &self,
            _request: HttpRequest,
            on_complete: TransportCallback,
        ) -> Arc<dyn CancelHandle> {
            let slot = CallbackSlot::new(on_complete);
            self.slots.lock().unwrap().push(Arc::clone(&slot));
            slot
        }
    }

    fn silent_client() -> (Networking, Arc<Silent>) {
        let transport = Arc::new(Silent::default());
        let client = Networking::with_transport(
            "http://localhost:3000",
            NetworkingConfig::default(),
            transport.clone(),
        );
        (client, transport)
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let client = Networking::new("http://localhost:3000/");
        assert_eq!(client.base_url(), "http://localhost:3000");
        assert_eq!(client.url_for("/put"), "http://localhost:3000/put");
    }

    #[test]
    fn synchronous_fake_completes_before_returning() {
        let (client, _) = silent_client();
        client.set_synchronous(true);
        client.fake_put("/story", Some(json!([{"name": "Elvis"}])), 200);

        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);
        client.put("/story", None, move |result| {
            assert_eq!(result.unwrap().unwrap()[0]["name"], "Elvis");
            flag.store(true, Ordering::SeqCst);
        });
        assert!(completed.load(Ordering::SeqCst));
    }

    #[test]
    fn stubs_are_per_client() {
        let (first, _) = silent_client();
        let (second, second_transport) = silent_client();
        first.fake_get("/story", Some(json!({"from": "first"})), 200);

        second.get("/story", None, |_| {});
        assert_eq!(second_transport.slots.lock().unwrap().len(), 1);
        assert_eq!(second.pending_requests(), 1);
    }

    #[test]
    fn cancel_by_path_resolves_with_cancellation() {
        let (client, _) = silent_client();
        let (sender, receiver) = mpsc::channel();
        client.put("/put", Some(json!({"username": "jameson"})), move |result| {
            sender.send(result).unwrap();
        });
        assert_eq!(client.pending_requests(), 1);

        client.cancel_put("/put");
        let result = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.unwrap_err().code(), crate::error::CANCELLED_CODE);
        assert_eq!(client.pending_requests(), 0);
    }

    #[test]
    fn cancelling_a_fake_identity_is_a_no_op() {
        let (client, _) = silent_client();
        client.set_synchronous(true);
        client.fake_delete("/story", None, 204);
        let id = client.delete("/story", None, |result| assert_eq!(result, Ok(None)));
        client.cancel(id);
        assert_eq!(client.pending_requests(), 0);
    }

    #[test]
    fn drop_cancels_pending_requests() {
        let (client, _) = silent_client();
        let (sender, receiver) = mpsc::channel();
        client.get("/get", None, move |result| sender.send(result).unwrap());
        drop(client);
        let result = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }
}
