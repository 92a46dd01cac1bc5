//! Fake responses substituted for the network.
//!
//! # Design
//! A `FakeResponseStore` maps `(method, path)` to a `FakeStub`. Lookups are
//! exact; the path is whatever the caller passed to the verb method, before
//! it is joined to the base URL. File-backed stubs are read and decoded once,
//! at registration, so a broken fixture fails the test setup instead of
//! masquerading as a request failure.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, error};

use crate::error::{FixtureError, NetworkingError};
use crate::http::{Headers, HttpMethod};
use crate::types::ResponseOutcome;

/// A directory that fixture files are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    root: PathBuf,
}

impl Bundle {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn load(&self, file_name: &str) -> Result<Vec<u8>, FixtureError> {
        let path = self.path_for(file_name);
        fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => FixtureError::NotFound { path },
            _ => FixtureError::Io { path, source },
        })
    }
}

/// A canned outcome for one `(method, path)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeStub {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub status_code: u16,
    /// The fixture file the body was loaded from, if any.
    pub source: Option<PathBuf>,
}

impl FakeStub {
    /// Build the outcome a dispatch hitting this stub receives.
    ///
    /// Statuses of 400 and above become an error with no body. Otherwise the
    /// body is delivered with a synthesized `Content-Type: application/json`
    /// and no other headers.
    pub fn outcome(&self) -> ResponseOutcome {
        let data = self
            .body
            .as_ref()
            .and_then(|body| serde_json::to_vec(body).ok())
            .unwrap_or_default();
        if self.status_code >= 400 {
            let error = NetworkingError::Http {
                status: self.status_code,
                body: String::from_utf8_lossy(&data).into_owned(),
            };
            return ResponseOutcome::failure(error, Headers::new());
        }
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        ResponseOutcome::success(self.body.clone(), headers, data)
    }
}

/// Per-client table of fake responses.
#[derive(Debug, Default)]
pub struct FakeResponseStore {
    stubs: Mutex<HashMap<(HttpMethod, String), FakeStub>>,
}

impl FakeResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or overwrite the stub for `(method, path)`.
    pub fn set_stub(&self, method: HttpMethod, path: &str, body: Option<Value>, status_code: u16) {
        self.insert(FakeStub {
            method,
            path: path.to_string(),
            body,
            status_code,
            source: None,
        });
    }

    /// Load `file_name` from `bundle` and register its decoded contents.
    pub fn set_stub_from_file(
        &self,
        method: HttpMethod,
        path: &str,
        file_name: &str,
        bundle: &Bundle,
        status_code: u16,
    ) -> Result<(), FixtureError> {
        let body = load_fixture(file_name, bundle).inspect_err(|err| {
            error!(%method, path, error = %err, "failed to register fake response");
        })?;
        self.insert(FakeStub {
            method,
            path: path.to_string(),
            body: Some(body),
            status_code,
            source: Some(bundle.path_for(file_name)),
        });
        Ok(())
    }

    pub fn lookup(&self, method: HttpMethod, path: &str) -> Option<FakeStub> {
        self.stubs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(method, path.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.stubs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, stub: FakeStub) {
        debug!(
            method = %stub.method, path = %stub.path, status = stub.status_code,
            "registered fake response"
        );
        self.stubs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((stub.method, stub.path.clone()), stub);
    }
}

fn load_fixture(file_name: &str, bundle: &Bundle) -> Result<Value, FixtureError> {
    let bytes = bundle.load(file_name)?;
    serde_json::from_slice(&bytes).map_err(|e| FixtureError::InvalidJson {
        path: bundle.path_for(file_name),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_bundle(name: &str, contents: &str) -> Bundle {
        let dir = std::env::temp_dir().join(format!("networking-core-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), contents).unwrap();
        Bundle::new(dir)
    }

    #[test]
    fn lookup_requires_exact_method_and_path() {
        let store = FakeResponseStore::new();
        store.set_stub(HttpMethod::Put, "/story", Some(json!([{"name": "Elvis"}])), 200);

        assert!(store.lookup(HttpMethod::Put, "/story").is_some());
        assert!(store.lookup(HttpMethod::Get, "/story").is_none());
        assert!(store.lookup(HttpMethod::Put, "/story?page=1").is_none());
        assert!(store.lookup(HttpMethod::Put, "/stories").is_none());
    }

    #[test]
    fn later_registration_overwrites_earlier() {
        let store = FakeResponseStore::new();
        store.set_stub(HttpMethod::Get, "/story", Some(json!({"v": 1})), 200);
        store.set_stub(HttpMethod::Get, "/story", Some(json!({"v": 2})), 201);

        let stub = store.lookup(HttpMethod::Get, "/story").unwrap();
        assert_eq!(stub.body, Some(json!({"v": 2})));
        assert_eq!(stub.status_code, 201);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn error_status_becomes_error_without_body() {
        let stub = FakeStub {
            method: HttpMethod::Put,
            path: "/story".to_string(),
            body: Some(json!({"reason": "nope"})),
            status_code: 401,
            source: None,
        };
        let outcome = stub.outcome();
        assert!(outcome.body.is_none());
        assert_eq!(outcome.error.as_ref().map(NetworkingError::code), Some(401));
        assert!(outcome.headers.is_empty());
    }

    #[test]
    fn success_synthesizes_only_content_type() {
        let stub = FakeStub {
            method: HttpMethod::Get,
            path: "/story".to_string(),
            body: Some(json!({"name": "Elvis"})),
            status_code: 200,
            source: None,
        };
        let outcome = stub.outcome();
        assert_eq!(outcome.body, Some(json!({"name": "Elvis"})));
        assert_eq!(outcome.headers.get("content-type"), Some("application/json"));
        assert_eq!(outcome.headers.len(), 1);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn file_stub_is_decoded_at_registration() {
        let bundle = temp_bundle("entries.json", r#"[{"title": "Entry 1"}]"#);
        let store = FakeResponseStore::new();
        store
            .set_stub_from_file(HttpMethod::Get, "/entries", "entries.json", &bundle, 200)
            .unwrap();

        let stub = store.lookup(HttpMethod::Get, "/entries").unwrap();
        assert_eq!(stub.body, Some(json!([{"title": "Entry 1"}])));
        assert_eq!(stub.source, Some(bundle.path_for("entries.json")));
    }

    #[test]
    fn missing_fixture_fails_registration() {
        let bundle = Bundle::new(std::env::temp_dir().join("networking-core-no-such-dir"));
        let store = FakeResponseStore::new();
        let err = store
            .set_stub_from_file(HttpMethod::Get, "/entries", "missing.json", &bundle, 200)
            .unwrap_err();
        assert!(matches!(err, FixtureError::NotFound { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_fixture_fails_registration() {
        let bundle = temp_bundle("broken.json", "{not json");
        let store = FakeResponseStore::new();
        let err = store
            .set_stub_from_file(HttpMethod::Get, "/entries", "broken.json", &bundle, 200)
            .unwrap_err();
        assert!(matches!(err, FixtureError::InvalidJson { .. }));
        assert!(store.lookup(HttpMethod::Get, "/entries").is_none());
    }
}
