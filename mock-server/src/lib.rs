use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;

/// Longest delay `/delay/{seconds}` will honour.
pub const MAX_DELAY_SECS: u64 = 10;

/// What every echo endpoint reports back about the request it received.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub url: String,
    pub args: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub data: String,
    pub json: Option<Value>,
}

impl Echo {
    fn capture(
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        args: BTreeMap<String, String>,
        body: &[u8],
    ) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        Echo {
            method: method.to_string(),
            url: format!("http://{host}{target}"),
            args,
            headers: headers
                .iter()
                .filter_map(|(name, value)| {
                    value.to_str().ok().map(|v| (canonical_name(name.as_str()), v.to_string()))
                })
                .collect(),
            data: String::from_utf8_lossy(body).into_owned(),
            json: serde_json::from_slice(body).ok(),
        }
    }
}

pub fn app() -> Router {
    Router::new()
        .route("/get", get(echo))
        .route("/post", post(echo))
        .route("/put", put(echo))
        .route("/delete", delete(echo))
        .route("/anything", any(echo))
        .route("/delay/{seconds}", any(delay))
        .route("/status/{code}", any(status))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    tracing::debug!("listening on {:?}", listener.local_addr());
    axum::serve(listener, app()).await
}

async fn echo(
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(args): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Json<Echo> {
    Json(Echo::capture(&method, &uri, &headers, args, &body))
}

async fn delay(
    Path(seconds): Path<u64>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(args): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Json<Echo> {
    let seconds = seconds.min(MAX_DELAY_SECS);
    tracing::debug!(seconds, %method, "delaying response");
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    Json(Echo::capture(&method, &uri, &headers, args, &body))
}

async fn status(Path(code): Path<u16>) -> impl IntoResponse {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

/// `content-type` -> `Content-Type`, the way httpbin reports header names.
pub fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
