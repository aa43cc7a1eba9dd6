//! Request builder: turns a target, a method and per-call options into a
//! `PreparedRequest`.
//!
//! # Design
//! Reads (GET, DELETE) carry parameters as query items; writes (POST, PUT)
//! carry a typed parameter value as a JSON body. Typed query parameters are
//! encoded to JSON first and flattened one level, so nested structures end
//! up as their compact JSON text rather than being expanded.
//!
//! Query items are percent-encoded with a space as `%20`, and `+` is always
//! emitted as `%2B` so servers never read it as an encoded space.

use std::collections::BTreeMap;

use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::Value;

use crate::error::BuildError;
use crate::http::{parse_absolute, Method, PreparedRequest};

/// Characters left literal inside a query item. `&`, `=`, `+`, `#` and
/// space are always escaped.
const QUERY_ITEM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b',')
    .remove(b'/')
    .remove(b':')
    .remove(b';')
    .remove(b'?')
    .remove(b'@');

/// Request parameters: either string pairs or an arbitrary serializable value.
#[derive(Debug, Clone, PartialEq)]
pub struct Params(Repr);

#[derive(Debug, Clone, PartialEq)]
enum Repr {
    Map(BTreeMap<String, String>),
    Typed(Value),
    Unencodable(String),
}

impl Params {
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Params(Repr::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Encode `value` to JSON now. An encoding failure surfaces later as a
    /// build error, so the call still completes with a result.
    pub fn typed<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => Params(Repr::Typed(v)),
            Err(e) => Params(Repr::Unencodable(e.to_string())),
        }
    }

    /// Query items for a read request, in a stable order.
    pub fn query_items(&self) -> Result<Vec<(String, String)>, BuildError> {
        match &self.0 {
            Repr::Map(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            Repr::Typed(value) => flatten(value),
            Repr::Unencodable(msg) => Err(BuildError::Encode(msg.clone())),
        }
    }

    /// JSON body for a write request. String maps are not sent as bodies.
    fn json_body(&self) -> Result<Option<Bytes>, BuildError> {
        match &self.0 {
            Repr::Map(_) => {
                tracing::warn!("string parameters are not supported for request bodies; ignoring them");
                Ok(None)
            }
            Repr::Typed(value) => serde_json::to_vec(value)
                .map(|v| Some(Bytes::from(v)))
                .map_err(|e| BuildError::Encode(e.to_string())),
            Repr::Unencodable(msg) => Err(BuildError::Encode(msg.clone())),
        }
    }
}

impl From<BTreeMap<String, String>> for Params {
    fn from(map: BTreeMap<String, String>) -> Self {
        Params(Repr::Map(map))
    }
}

/// Per-call configuration. The response and error models are chosen by the
/// type parameters of the delivery call, not here.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    pub params: Option<Params>,
    pub clear_cache: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: impl Into<Params>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn typed_params<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.params = Some(Params::typed(value));
        self
    }

    pub fn clear_cache(mut self, clear: bool) -> Self {
        self.clear_cache = clear;
        self
    }
}

/// What a call is aimed at: a URL to build from, or a request built elsewhere.
#[derive(Debug, Clone)]
pub enum Target {
    Url(String),
    Request(PreparedRequest),
}

impl From<&str> for Target {
    fn from(url: &str) -> Self {
        Target::Url(url.to_string())
    }
}

impl From<String> for Target {
    fn from(url: String) -> Self {
        Target::Url(url)
    }
}

impl From<&String> for Target {
    fn from(url: &String) -> Self {
        Target::Url(url.clone())
    }
}

impl From<PreparedRequest> for Target {
    fn from(request: PreparedRequest) -> Self {
        Target::Request(request)
    }
}

/// Resolve a target into a request. A prepared request keeps its own method
/// and body; option headers are merged on top and parameters are ignored.
pub fn prepare(
    target: Target,
    method: Method,
    options: &RequestOptions,
) -> Result<PreparedRequest, BuildError> {
    match target {
        Target::Url(url) => build_request(&url, method, &options.headers, options.params.as_ref()),
        Target::Request(request) => {
            if options.params.is_some() {
                tracing::debug!(url = %request.url(), "parameters ignored for a prepared request");
            }
            Ok(add_headers(request, &options.headers))
        }
    }
}

/// Build a request from a URL string.
///
/// Fails only when `url` is not a valid absolute URL or when typed
/// parameters cannot be encoded.
pub fn build_request(
    url: &str,
    method: Method,
    headers: &BTreeMap<String, String>,
    params: Option<&Params>,
) -> Result<PreparedRequest, BuildError> {
    let mut parsed = parse_absolute(url)?;
    let mut body = None;
    let mut json = false;

    if let Some(params) = params {
        if method.uses_query() {
            let items = params.query_items()?;
            if !items.is_empty() {
                let encoded = encode_query(&items);
                let query = match parsed.query() {
                    Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
                    _ => encoded,
                };
                parsed.set_query(Some(&query));
            }
        } else {
            body = params.json_body()?;
            json = body.is_some();
        }
    }

    let mut request = PreparedRequest::from_parts(method, parsed, body);
    if json {
        request.set_header("content-type".to_string(), "application/json".to_string());
    }
    Ok(add_headers(request, headers))
}

/// Set every header in `headers` on `request`, replacing existing values.
pub fn add_headers(mut request: PreparedRequest, headers: &BTreeMap<String, String>) -> PreparedRequest {
    for (name, value) in headers {
        request.set_header(name.clone(), value.clone());
    }
    request
}

/// Percent-encode query items as `name=value` pairs joined by `&`.
pub fn encode_query(items: &[(String, String)]) -> String {
    items
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(name, QUERY_ITEM),
                utf8_percent_encode(value, QUERY_ITEM)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn flatten(value: &Value) -> Result<Vec<(String, String)>, BuildError> {
    let Value::Object(map) = value else {
        return Err(BuildError::Encode(
            "query parameters must encode to a JSON object".to_string(),
        ));
    };
    let mut items = Vec::with_capacity(map.len());
    for (name, value) in map {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            nested => nested.to_string(),
        };
        items.push((name.clone(), text));
    }
    Ok(items)
}
