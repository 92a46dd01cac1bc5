//! Bookkeeping for in-flight live requests.
//!
//! # Design
//! One backing map owns every `PendingRequest`, keyed by identity; a second
//! index groups identities by `(method, path)`. Both sit behind one mutex so
//! they never disagree. Cancel handles are collected under the lock and
//! invoked after it is released, because cancelling resolves the transport
//! callback, which in turn calls `deregister`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::http::HttpMethod;
use crate::identity::RequestId;
use crate::transport::CancelHandle;

struct PendingRequest {
    method: HttpMethod,
    path: String,
    handle: Arc<dyn CancelHandle>,
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<RequestId, PendingRequest>,
    by_path: HashMap<(HttpMethod, String), HashSet<RequestId>>,
}

impl Indices {
    fn remove(&mut self, id: RequestId) -> Option<PendingRequest> {
        let pending = self.by_id.remove(&id)?;
        let key = (pending.method, pending.path.clone());
        if let Some(ids) = self.by_path.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_path.remove(&key);
            }
        }
        Some(pending)
    }
}

/// Tracks live requests so they can be cancelled by identity or by path.
#[derive(Default)]
pub struct CancellationRegistry {
    inner: Mutex<Indices>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        id: RequestId,
        method: HttpMethod,
        path: &str,
        handle: Arc<dyn CancelHandle>,
    ) {
        let mut inner = self.lock();
        inner
            .by_path
            .entry((method, path.to_string()))
            .or_default()
            .insert(id);
        inner.by_id.insert(
            id,
            PendingRequest {
                method,
                path: path.to_string(),
                handle,
            },
        );
    }

    /// Cancel every pending `method` request on `path`. Returns how many were
    /// asked to stop.
    pub fn cancel_by_path(&self, method: HttpMethod, path: &str) -> usize {
        let handles: Vec<_> = {
            let mut inner = self.lock();
            let ids = inner
                .by_path
                .remove(&(method, path.to_string()))
                .unwrap_or_default();
            ids.into_iter()
                .filter_map(|id| inner.by_id.remove(&id))
                .map(|pending| pending.handle)
                .collect()
        };
        debug!(%method, path, count = handles.len(), "cancelling requests by path");
        for handle in &handles {
            handle.cancel();
        }
        handles.len()
    }

    /// Cancel the one request dispatched as `id`. Unknown or finished
    /// identities are ignored.
    pub fn cancel_by_identity(&self, id: RequestId) -> bool {
        let pending = self.lock().remove(id);
        match pending {
            Some(pending) => {
                debug!(%id, method = %pending.method, path = %pending.path, "cancelling request");
                pending.handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let handles: Vec<_> = {
            let mut inner = self.lock();
            inner.by_path.clear();
            inner.by_id.drain().map(|(_, pending)| pending.handle).collect()
        };
        for handle in &handles {
            handle.cancel();
        }
        handles.len()
    }

    /// Forget `id`. Safe to call any number of times.
    pub fn deregister(&self, id: RequestId) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.lock().by_id.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().by_id.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Indices> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
