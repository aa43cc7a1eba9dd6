//! Request executor: one network call, one classified outcome.
//!
//! # Design
//! `execute` never returns a Rust error. Whatever happens (cache hit,
//! transport failure, any HTTP status) ends up as exactly one `RawOutcome`.
//! Classification is split into two pure functions, `classify_status` and
//! `classify_transport`, so it can be tested without a network.
//!
//! Only GET responses are cached. `clear_cache` drops the cached entry and
//! skips the cache read for this call, but a fresh response is still stored.
//! A successful write to a URL drops the cached GET for that URL.

use std::error::Error as StdError;
use std::io;
use std::time::Instant;

use bytes::Bytes;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{freshness, CachedResponse};
use crate::error::{ErrorKind, Failure};
use crate::http::{cache_key, FetchSource, Method, PreparedRequest, RawOutcome, Response, ResponseMeta};
use crate::session::Session;

/// Error kind for an HTTP status, or `None` for 2xx.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        200..=299 => None,
        401 | 403 => Some(ErrorKind::AuthenticationError),
        404 => Some(ErrorKind::NotFound),
        409 => Some(ErrorKind::Conflict),
        _ => Some(ErrorKind::ServerError),
    }
}

/// Error kind for a failure that produced no usable HTTP response.
///
/// Walks the error's source chain looking for the I/O cause.
pub fn classify_transport(err: &(dyn StdError + 'static), timed_out: bool) -> ErrorKind {
    if timed_out {
        return ErrorKind::Timeout;
    }
    let mut cause = Some(err);
    while let Some(e) = cause {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            match io.kind() {
                io::ErrorKind::TimedOut => return ErrorKind::Timeout,
                io::ErrorKind::NetworkUnreachable
                | io::ErrorKind::NetworkDown
                | io::ErrorKind::HostUnreachable => return ErrorKind::NoInternet,
                _ => {}
            }
        }
        cause = e.source();
    }
    ErrorKind::ClientError
}

/// Issue `request` over `session` and classify the result.
pub async fn execute(session: &Session, request: &PreparedRequest, clear_cache: bool) -> RawOutcome {
    let span = tracing::info_span!(
        "request",
        id = %Uuid::new_v4(),
        method = %request.method(),
        url = %request.url(),
    );
    run(session, request, clear_cache).instrument(span).await
}

async fn run(session: &Session, request: &PreparedRequest, clear_cache: bool) -> RawOutcome {
    let started = Instant::now();
    let key = request.cache_key();
    let cache = session
        .cache
        .as_ref()
        .filter(|_| request.method() == Method::Get);

    if let Some(cache) = cache {
        if clear_cache {
            cache.remove(&key);
        } else if let Some(hit) = cache.get(&key) {
            if hit.is_fresh() {
                let meta = ResponseMeta {
                    status: hit.status,
                    url: hit.url,
                    headers: hit.headers,
                    source: FetchSource::Cache,
                    elapsed: started.elapsed(),
                };
                log_transaction(request, &meta);
                return Ok(Response {
                    payload: non_empty(hit.body),
                    meta,
                });
            }
            cache.remove(&key);
        }
    }

    tracing::debug!(headers = ?request.headers(), "dispatch");
    if let Some(body) = request.body() {
        tracing::debug!(body = %String::from_utf8_lossy(body), "request body");
    }

    let mut outbound = session.http.request(request.method().into(), request.url());
    for (name, value) in request.headers() {
        outbound = outbound.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body() {
        outbound = outbound.body(body.clone());
    }

    let response = match outbound.send().await {
        Ok(response) => response,
        Err(e) => return Err(transport_failure(&e, 0)),
    };

    let status = response.status().as_u16();
    let url = response.url().to_string();
    let headers = header_pairs(response.headers());

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => return Err(transport_failure(&e, status)),
    };
    let text = String::from_utf8_lossy(&body).into_owned();
    tracing::debug!(status, body = %text, "response");

    if let Some(kind) = classify_status(status) {
        tracing::info!(
            method = %request.method(),
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            %kind,
            "request failed"
        );
        return Err(Failure {
            body: non_empty(body),
            kind,
            status,
            raw_body: text,
        });
    }

    if let Some(cache) = session.cache.as_ref() {
        match request.method() {
            Method::Get => {
                if let Some(max_age) = freshness(&headers) {
                    cache.put(
                        &key,
                        CachedResponse {
                            status,
                            url: url.clone(),
                            headers: headers.clone(),
                            body: body.clone(),
                            stored_at: Instant::now(),
                            max_age,
                        },
                    );
                }
            }
            _ => cache.remove(&cache_key(Method::Get, request.url())),
        }
    }

    let meta = ResponseMeta {
        status,
        url,
        headers,
        source: FetchSource::Network,
        elapsed: started.elapsed(),
    };
    log_transaction(request, &meta);
    Ok(Response {
        payload: non_empty(body),
        meta,
    })
}

/// Header pairs as text. Values that are not valid UTF-8 are kept lossily.
fn header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn transport_failure(err: &reqwest::Error, status: u16) -> Failure<Bytes> {
    let kind = classify_transport(err, err.is_timeout());
    tracing::info!(status, %kind, error = %err, "transport failure");
    Failure {
        body: None,
        kind,
        status,
        raw_body: String::new(),
    }
}

fn non_empty(body: Bytes) -> Option<Bytes> {
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

fn log_transaction(request: &PreparedRequest, meta: &ResponseMeta) {
    tracing::info!(
        method = %request.method(),
        status = meta.status,
        elapsed_ms = meta.elapsed.as_millis() as u64,
        source = meta.source.label(),
        "response"
    );
}
