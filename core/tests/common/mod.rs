//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use networking_core::{
    Bundle, CallbackSlot, CancelHandle, HttpRequest, HttpResponse, Transport, TransportCallback,
};

static INIT_LOGGING: Once = Once::new();

/// Route `tracing` output through the test harness. The first call wins.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "networking_core=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Start the mock server on a random port and return its base URL.
pub fn spawn_server() -> String {
    init_logging();
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

pub fn fixtures() -> Bundle {
    Bundle::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures"))
}

/// Answers every request inline with `response` and remembers what it saw.
pub struct ScriptedTransport {
    response: HttpResponse,
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(response: HttpResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        request: HttpRequest,
        on_complete: TransportCallback,
    ) -> Arc<dyn CancelHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let slot = CallbackSlot::new(on_complete);
        slot.resolve(Ok(self.response.clone()));
        slot
    }
}
