//! HTTP request and response values.
//!
//! # Design
//! A `PreparedRequest` describes one outbound call as plain data: method,
//! absolute URL, headers and an optional body. It is built once (by the
//! request builder or by hand through `PreparedRequest::new`) and never
//! mutated afterwards; `with_header` returns a new value. The executor
//! consumes it and produces an `Outcome`, which is an ordinary `Result` whose
//! `Ok` side carries the payload plus response metadata and whose `Err` side
//! is a `Failure`.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Url;

use crate::error::{BuildError, Failure};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// Whether parameters travel in the query string rather than the body.
    pub fn uses_query(&self) -> bool {
        matches!(self, Method::Get | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A transport-ready request.
///
/// Header names are unique compared case-insensitively; setting a header
/// that already exists replaces its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl PreparedRequest {
    /// Start a request for `url`, which must be a valid absolute URL.
    pub fn new(method: Method, url: &str) -> Result<Self, BuildError> {
        let parsed = parse_absolute(url)?;
        Ok(Self {
            method,
            url: parsed.into(),
            headers: Vec::new(),
            body: None,
        })
    }

    pub(crate) fn from_parts(method: Method, url: Url, body: Option<Bytes>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Return a copy with `name` set to `value`, replacing any previous value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name.into(), value.into());
        self
    }

    /// Return a copy carrying `body`.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub(crate) fn set_header(&mut self, name: String, value: String) {
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(slot) => *slot = (name, value),
            None => self.headers.push((name, value)),
        }
    }

    /// Cache key for this request: method plus URL.
    pub fn cache_key(&self) -> String {
        cache_key(self.method, &self.url)
    }
}

pub(crate) fn cache_key(method: Method, url: &str) -> String {
    format!("{} {}", method.as_str(), url)
}

pub(crate) fn parse_absolute(url: &str) -> Result<Url, BuildError> {
    let parsed = Url::parse(url).map_err(|e| BuildError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.cannot_be_a_base() || !parsed.has_host() {
        return Err(BuildError::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
        });
    }
    Ok(parsed)
}

/// Where a successful response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Network,
    Cache,
}

impl FetchSource {
    pub fn label(&self) -> &'static str {
        match self {
            FetchSource::Network => "NETWORK",
            FetchSource::Cache => "LOCAL",
        }
    }
}

/// Response metadata attached to every success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub source: FetchSource,
    pub elapsed: Duration,
}

impl ResponseMeta {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The success half of an `Outcome`. An absent payload (empty body) is valid.
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub payload: Option<T>,
    pub meta: ResponseMeta,
}

/// Result of one call: exactly one of success or failure.
pub type Outcome<T, E> = Result<Response<T>, Failure<E>>;

/// Undecoded outcome produced by the executor.
pub type RawOutcome = Outcome<Bytes, Bytes>;
