//! JSON HTTP client with fake responses and request cancellation.
//!
//! # Overview
//! `Networking` issues GET/POST/PUT/DELETE requests against a base URL and
//! hands each completion a decoded JSON body, the response headers, or an
//! error. Any `(verb, path)` can be faked: a registered stub answers in place
//! of the network, which keeps tests deterministic.
//!
//! # Design
//! - `DispatchEngine` decides fake-versus-live per request and funnels both
//!   into one `ResponseOutcome`, so completions fire exactly once.
//! - `CancellationRegistry` indexes live requests by identity and by path.
//! - `ExecutionModeController` runs completions on a callback thread, or, in
//!   synchronous mode, on the caller's thread before the dispatch returns.
//! - The network sits behind the `Transport` trait; `UreqTransport` is the
//!   live implementation and tests substitute their own. Its sockets come
//!   from `socket`, so cancelling a request closes its connection.

pub mod client;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod fake;
pub mod http;
pub mod identity;
pub mod registry;
pub mod socket;
pub mod transport;
pub mod types;

pub use client::{JsonResult, Networking};
pub use config::NetworkingConfig;
pub use delivery::{Completion, ExecutionModeController};
pub use dispatch::DispatchEngine;
pub use error::{FixtureError, NetworkingError, TransportError, CANCELLED_CODE};
pub use fake::{Bundle, FakeResponseStore, FakeStub};
pub use http::{Headers, HttpMethod, HttpRequest, HttpResponse};
pub use identity::RequestId;
pub use registry::CancellationRegistry;
pub use transport::{
    CallbackSlot, CancelHandle, Transport, TransportCallback, TransportResult, UreqTransport,
};
pub use types::ResponseOutcome;
