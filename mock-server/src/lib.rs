use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

/// Body returned by `/json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Greeting {
    pub test: String,
}

/// Error model returned by `/status/{code}` for non-2xx codes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
}

/// What `/echo` saw: method, decoded query items, raw query, headers and JSON body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub query: BTreeMap<String, String>,
    pub raw_query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

/// Body returned by `/cached`: a fresh id per network hit plus the hit count.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedHit {
    pub id: Uuid,
    pub hits: u64,
}

#[derive(Deserialize)]
pub struct SlowParams {
    #[serde(default = "default_delay_ms")]
    pub ms: u64,
}

fn default_delay_ms() -> u64 {
    1000
}

#[derive(Clone, Default)]
pub struct AppState {
    pub cached_hits: Arc<AtomicU64>,
}

pub fn app() -> Router {
    Router::new()
        .route("/json", get(json))
        .route("/malformed", get(malformed))
        .route("/empty", any(empty))
        .route("/status/{code}", any(status))
        .route("/echo", any(echo))
        .route("/slow", get(slow))
        .route("/cached", get(cached).delete(empty))
        .route("/hits", get(hits))
        .with_state(AppState::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn json() -> Json<Greeting> {
    Json(Greeting {
        test: "x".to_string(),
    })
}

async fn malformed() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"test": oops"#,
    )
}

async fn empty() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn status(Path(code): Path<u16>) -> Result<impl IntoResponse, StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    let body = ApiError {
        code,
        message: status.canonical_reason().unwrap_or("unknown").to_string(),
    };
    Ok((status, Json(body)))
}

async fn echo(
    method: Method,
    headers: HeaderMap,
    Query(query): Query<BTreeMap<String, String>>,
    uri: axum::http::Uri,
    body: Bytes,
) -> Json<Echo> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).ok()
    };
    Json(Echo {
        method: method.as_str().to_string(),
        query,
        raw_query: uri.query().map(str::to_string),
        headers,
        body,
    })
}

async fn slow(Query(params): Query<SlowParams>) -> Json<Greeting> {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    Json(Greeting {
        test: "slow".to_string(),
    })
}

async fn cached(State(state): State<AppState>) -> impl IntoResponse {
    let hits = state.cached_hits.fetch_add(1, Ordering::SeqCst) + 1;
    (
        [(header::CACHE_CONTROL, "max-age=60")],
        Json(CachedHit {
            id: Uuid::new_v4(),
            hits,
        }),
    )
}

async fn hits(State(state): State<AppState>) -> Json<u64> {
    Json(state.cached_hits.load(Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_serializes_to_json() {
        let greeting = Greeting {
            test: "x".to_string(),
        };
        let json = serde_json::to_string(&greeting).unwrap();
        assert_eq!(json, r#"{"test":"x"}"#);
    }

    #[test]
    fn api_error_roundtrips_through_json() {
        let err = ApiError {
            code: 409,
            message: "Conflict".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: ApiError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn slow_params_default_delay() {
        let params: SlowParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.ms, 1000);
    }

    #[test]
    fn echo_without_body_serializes_null() {
        let echo = Echo {
            method: "GET".to_string(),
            query: BTreeMap::new(),
            raw_query: None,
            headers: BTreeMap::new(),
            body: None,
        };
        let json = serde_json::to_value(&echo).unwrap();
        assert!(json["body"].is_null());
        assert_eq!(json["method"], "GET");
    }
}
