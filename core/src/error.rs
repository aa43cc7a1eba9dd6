//! Error taxonomy for the HTTP client.
//!
//! # Design
//! Every way a call can fail collapses into exactly one `ErrorKind`. The kind
//! travels inside a `Failure`, which also keeps the HTTP status, the raw body
//! text and, when an error model was requested and decoded, the typed error
//! body. Status-driven kinds (`AuthenticationError`, `NotFound`, `Conflict`,
//! `ServerError`) get dedicated variants because callers branch on them;
//! everything the transport reports before a status exists lands in
//! `ClientError`, `NoInternet` or `Timeout`.

use std::fmt;

use thiserror::Error;

/// Why a call did not succeed. Exactly one kind attaches to every `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// 401 or 403.
    #[error("authentication error")]
    AuthenticationError,

    /// 404.
    #[error("not found")]
    NotFound,

    /// 409.
    #[error("conflict")]
    Conflict,

    /// Any other non-2xx status.
    #[error("server error")]
    ServerError,

    /// The transport failed for a reason not covered by `NoInternet` or `Timeout`.
    #[error("client error")]
    ClientError,

    #[error("no internet connection")]
    NoInternet,

    #[error("request timed out")]
    Timeout,

    /// A 2xx body could not be decoded into the requested response model.
    #[error("response body is not valid JSON for the requested model")]
    JsonParseError,

    #[error("response model is not decodable")]
    ResponseModelNotDecodable,

    /// The request could not be built; no network activity happened.
    #[error("request could not be created")]
    CreateRequestFailed,

    #[error("unknown error")]
    UnknownError,
}

/// The failure half of an `Outcome`.
///
/// `body` holds the decoded error model when one was requested and the error
/// body decoded cleanly, the raw bytes when no model was requested, and
/// `None` otherwise. `raw_body` always holds the body as text.
#[derive(Debug, Clone)]
pub struct Failure<E> {
    pub body: Option<E>,
    pub kind: ErrorKind,
    pub status: u16,
    pub raw_body: String,
}

impl<E> Failure<E> {
    /// A failure that never reached the network or carries no body.
    pub fn bare(kind: ErrorKind) -> Self {
        Self {
            body: None,
            kind,
            status: 0,
            raw_body: String::new(),
        }
    }

    /// Replace the typed body, keeping kind, status and raw text.
    pub fn map_body<F, U>(self, f: F) -> Failure<U>
    where
        F: FnOnce(E) -> Option<U>,
    {
        Failure {
            body: self.body.and_then(f),
            kind: self.kind,
            status: self.status,
            raw_body: self.raw_body,
        }
    }
}

impl<E> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status == 0 {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} (HTTP {})", self.kind, self.status)
        }
    }
}

impl<E: fmt::Debug> std::error::Error for Failure<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Why the request builder refused to produce a request.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid absolute URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("parameters could not be encoded: {0}")]
    Encode(String),
}

impl From<&BuildError> for ErrorKind {
    fn from(_: &BuildError) -> Self {
        ErrorKind::CreateRequestFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_failure_has_no_status_or_body() {
        let failure: Failure<()> = Failure::bare(ErrorKind::CreateRequestFailed);
        assert_eq!(failure.status, 0);
        assert!(failure.body.is_none());
        assert!(failure.raw_body.is_empty());
        assert_eq!(failure.to_string(), "request could not be created");
    }

    #[test]
    fn display_includes_status_when_present() {
        let failure: Failure<()> = Failure {
            body: None,
            kind: ErrorKind::NotFound,
            status: 404,
            raw_body: String::new(),
        };
        assert_eq!(failure.to_string(), "not found (HTTP 404)");
    }

    #[test]
    fn map_body_keeps_diagnostics() {
        let failure = Failure {
            body: Some("raw".to_string()),
            kind: ErrorKind::Conflict,
            status: 409,
            raw_body: "raw".to_string(),
        };
        let mapped: Failure<usize> = failure.map_body(|s| Some(s.len()));
        assert_eq!(mapped.body, Some(3));
        assert_eq!(mapped.kind, ErrorKind::Conflict);
        assert_eq!(mapped.status, 409);
        assert_eq!(mapped.raw_body, "raw");
    }

    #[test]
    fn build_errors_map_to_create_request_failed() {
        let err = BuildError::InvalidUrl {
            url: "test test".to_string(),
            reason: "relative URL without a base".to_string(),
        };
        assert_eq!(ErrorKind::from(&err), ErrorKind::CreateRequestFailed);
        let err = BuildError::Encode("boom".to_string());
        assert_eq!(ErrorKind::from(&err), ErrorKind::CreateRequestFailed);
    }
}
