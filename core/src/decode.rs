//! Response decoding.
//!
//! # Design
//! The response and error models of a call are types implementing `Model`:
//! `Raw` hands the body bytes through untouched, `Json<T>` decodes them with
//! serde. Decoding runs once over the executor's raw outcome:
//!
//! - a success whose body does not decode becomes a `JsonParseError`
//!   failure that keeps the status and the raw text;
//! - a failure whose body does not decode keeps its HTTP-level kind and
//!   simply has no typed body.
//!
//! Absent or empty bodies are never decoded; they are a valid "no payload".

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::{ErrorKind, Failure};
use crate::http::{Outcome, RawOutcome, Response};

#[derive(Debug, Error)]
#[error("body does not match the requested model: {message}")]
pub struct DecodeError {
    pub message: String,
    pub raw_body: String,
}

/// How a body is turned into a typed value.
pub trait Model: 'static {
    type Output: Send + 'static;

    fn decode(body: Bytes) -> Result<Self::Output, DecodeError>;
}

/// No model: the payload is the body bytes.
#[derive(Debug, Clone, Copy)]
pub struct Raw;

impl Model for Raw {
    type Output = Bytes;

    fn decode(body: Bytes) -> Result<Bytes, DecodeError> {
        Ok(body)
    }
}

/// JSON model decoded into `T`.
#[derive(Debug, Clone, Copy)]
pub struct Json<T>(PhantomData<fn() -> T>);

impl<T> Model for Json<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn decode(body: Bytes) -> Result<T, DecodeError> {
        serde_json::from_slice(&body).map_err(|e| DecodeError {
            message: e.to_string(),
            raw_body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Decode an optional body. Absent and empty bodies decode to `None`.
pub fn decode<M: Model>(body: Option<Bytes>) -> Result<Option<M::Output>, DecodeError> {
    match body {
        Some(body) if !body.is_empty() => M::decode(body).map(Some),
        _ => Ok(None),
    }
}

/// Apply the response model `T` and the error model `E` to a raw outcome.
pub fn decode_outcome<T: Model, E: Model>(raw: RawOutcome) -> Outcome<T::Output, E::Output> {
    match raw {
        Ok(Response { payload, meta }) => match decode::<T>(payload) {
            Ok(payload) => Ok(Response { payload, meta }),
            Err(e) => {
                tracing::warn!(status = meta.status, error = %e.message, "response body did not decode");
                Err(Failure {
                    body: None,
                    kind: ErrorKind::JsonParseError,
                    status: meta.status,
                    raw_body: e.raw_body,
                })
            }
        },
        Err(failure) => Err(failure.map_body(|body| match E::decode(body) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::debug!(error = %e.message, "error body did not decode");
                None
            }
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{FetchSource, ResponseMeta};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Wrapper {
        test: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct ApiError {
        code: u16,
    }

    fn success(status: u16, body: Option<&'static str>) -> RawOutcome {
        Ok(Response {
            payload: body.map(|b| Bytes::from_static(b.as_bytes())),
            meta: ResponseMeta {
                status,
                url: "https://test.com/".to_string(),
                headers: Vec::new(),
                source: FetchSource::Network,
                elapsed: Duration::ZERO,
            },
        })
    }

    fn failure(kind: ErrorKind, status: u16, body: &'static str) -> RawOutcome {
        Err(Failure {
            body: Some(Bytes::from_static(body.as_bytes())),
            kind,
            status,
            raw_body: body.to_string(),
        })
    }

    #[test]
    fn absent_body_is_empty_success() {
        assert!(decode::<Json<Wrapper>>(None).unwrap().is_none());
        assert!(decode::<Json<Wrapper>>(Some(Bytes::new())).unwrap().is_none());
    }

    #[test]
    fn valid_body_decodes() {
        let value = decode::<Json<Wrapper>>(Some(Bytes::from_static(br#"{"test":"x"}"#)))
            .unwrap()
            .unwrap();
        assert_eq!(value.test, "x");
    }

    #[test]
    fn invalid_body_keeps_raw_text() {
        let err = decode::<Json<Wrapper>>(Some(Bytes::from_static(b"not json"))).unwrap_err();
        assert_eq!(err.raw_body, "not json");
    }

    #[test]
    fn raw_model_passes_bytes_through() {
        let outcome = decode_outcome::<Raw, Raw>(success(200, Some("not json")));
        assert_eq!(outcome.unwrap().payload.unwrap(), "not json");
    }

    #[test]
    fn success_decodes_into_model() {
        let outcome = decode_outcome::<Json<Wrapper>, Raw>(success(200, Some(r#"{"test":"x"}"#)));
        let response = outcome.unwrap();
        assert_eq!(
            response.payload,
            Some(Wrapper {
                test: "x".to_string()
            })
        );
        assert_eq!(response.meta.status, 200);
    }

    #[test]
    fn undecodable_success_becomes_json_parse_error() {
        let outcome = decode_outcome::<Json<Wrapper>, Raw>(success(200, Some(r#"{"other":1}"#)));
        let failure = outcome.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::JsonParseError);
        assert_eq!(failure.status, 200);
        assert_eq!(failure.raw_body, r#"{"other":1}"#);
        assert!(failure.body.is_none());
    }

    #[test]
    fn empty_success_with_model_is_not_an_error() {
        let outcome = decode_outcome::<Json<Wrapper>, Raw>(success(204, None));
        assert!(outcome.unwrap().payload.is_none());
    }

    #[test]
    fn error_body_decodes_into_error_model() {
        let outcome = decode_outcome::<Raw, Json<ApiError>>(failure(
            ErrorKind::NotFound,
            404,
            r#"{"code":404}"#,
        ));
        let failure = outcome.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::NotFound);
        assert_eq!(failure.status, 404);
        assert_eq!(failure.body, Some(ApiError { code: 404 }));
    }

    #[test]
    fn undecodable_error_body_keeps_http_kind() {
        let outcome = decode_outcome::<Json<Wrapper>, Json<ApiError>>(failure(
            ErrorKind::Conflict,
            409,
            "<html>conflict</html>",
        ));
        let failure = outcome.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Conflict);
        assert_eq!(failure.status, 409);
        assert!(failure.body.is_none());
        assert_eq!(failure.raw_body, "<html>conflict</html>");
    }

    #[test]
    fn raw_error_model_keeps_bytes() {
        let outcome = decode_outcome::<Json<Wrapper>, Raw>(failure(ErrorKind::ServerError, 500, "oops"));
        assert_eq!(outcome.unwrap_err().body.unwrap(), "oops");
    }
}
