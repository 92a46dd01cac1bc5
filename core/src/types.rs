//! The result shape handed to every completion.
//!
//! # Design
//! Fake and live requests both end in a `ResponseOutcome`, so a completion
//! cannot tell which path produced it. The constructors keep body and error
//! mutually exclusive.

use serde_json::Value;

use crate::error::NetworkingError;
use crate::http::Headers;

/// Decoded body, response headers, and error for one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseOutcome {
    /// The decoded JSON body. `None` for failures, empty bodies, and
    /// non-JSON responses.
    pub body: Option<Value>,
    pub headers: Headers,
    /// Raw response bytes, kept so non-JSON success bodies are not lost.
    pub data: Vec<u8>,
    pub error: Option<NetworkingError>,
}

impl ResponseOutcome {
    pub fn success(body: Option<Value>, headers: Headers, data: Vec<u8>) -> Self {
        Self {
            body,
            headers,
            data,
            error: None,
        }
    }

    pub fn failure(error: NetworkingError, headers: Headers) -> Self {
        Self {
            body: None,
            headers,
            data: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Drop the headers and collapse into the body-only completion shape.
    pub fn into_result(self) -> Result<Option<Value>, NetworkingError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_never_carries_a_body() {
        let outcome = ResponseOutcome::failure(NetworkingError::Cancelled, Headers::new());
        assert!(outcome.body.is_none());
        assert!(!outcome.is_success());
        assert_eq!(outcome.into_result(), Err(NetworkingError::Cancelled));
    }

    #[test]
    fn success_collapses_to_its_body() {
        let outcome =
            ResponseOutcome::success(Some(json!({"ok": true})), Headers::new(), Vec::new());
        assert_eq!(outcome.into_result(), Ok(Some(json!({"ok": true}))));
    }
}
