//! Asynchronous HTTP client core.
//!
//! # Overview
//! One request pipeline shared by GET, POST, PUT and DELETE:
//! build a `PreparedRequest`, execute it over a session derived from the
//! `TransportPolicy` (timeout, cache store, certificate pinning), optionally
//! decode success and error bodies into typed models, and deliver exactly one
//! `Outcome` on the dispatch thread.
//!
//! # Design
//! - `Client` holds the policy and rebuilds its session lazily after any
//!   configuration change; in-flight calls keep the session they captured.
//! - `executor::execute` turns every transaction into one classified
//!   `RawOutcome`; `decode::decode_outcome` applies the models afterwards.
//! - The verb methods return a `Call`, delivered by `send().await`,
//!   `on_complete(callback)` or `publisher()` (whose `subscribe` runs on the
//!   dispatch thread).
//! - Response DTOs are never shared with the mock server crate; integration
//!   tests catch schema drift.

pub mod cache;
pub mod client;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod http;
pub mod pinning;
pub mod policy;
pub mod request;
pub mod session;

pub use cache::{CacheStore, CachedResponse, MemoryCache};
pub use client::{Call, Client, ClientBuilder, Publisher};
pub use decode::{DecodeError, Json, Model, Raw};
pub use dispatch::{DispatchLoop, Dispatcher};
pub use error::{BuildError, ErrorKind, Failure};
pub use http::{FetchSource, Method, Outcome, PreparedRequest, RawOutcome, Response, ResponseMeta};
pub use policy::{CacheSetting, PinSpec, PinningTable, TransportPolicy};
pub use request::{build_request, Params, RequestOptions, Target};
