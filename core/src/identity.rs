//! Per-dispatch request identities.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle returned by every dispatch and accepted by
/// `Networking::cancel`.
///
/// Fake responses get one too, so callers never have to special-case them;
/// cancelling such an identity is simply a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub(crate) fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
