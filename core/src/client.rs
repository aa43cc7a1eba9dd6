//! The public client: configuration plus the three delivery styles.
//!
//! # Design
//! A `Client` is a cheap handle (`Arc` inside) around a transport policy, a
//! lazily built `Session`, a runtime handle for network work and a
//! `Dispatcher` for completions. The verb methods only describe a call; the
//! `Call` they return picks how the outcome is delivered:
//!
//! - `send().await` returns it to the awaiting task;
//! - `on_complete(cb)` runs `cb` on the dispatch thread;
//! - `publisher()` yields it as a one-item stream; `Publisher::subscribe`
//!   receives it on the dispatch thread.
//!
//! All three run the same pipeline: prepare, capture the session, execute,
//! decode. A request that cannot be built fails with `CreateRequestFailed`
//! before anything touches the network.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinError;

use crate::decode::{decode_outcome, Model};
use crate::dispatch::Dispatcher;
use crate::error::{ErrorKind, Failure};
use crate::executor::execute;
use crate::http::{Method, Outcome};
use crate::policy::{CacheSetting, PinningTable, TransportPolicy};
use crate::request::{prepare, RequestOptions, Target};
use crate::session::{Session, SessionError};

/// HTTP client with a shared transport configuration.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    policy: Mutex<TransportPolicy>,
    session: Mutex<Option<Arc<Session>>>,
    dispatcher: Dispatcher,
    runtime: Handle,
}

/// Builder for an explicitly configured `Client`.
#[derive(Default)]
pub struct ClientBuilder {
    policy: TransportPolicy,
    dispatcher: Option<Dispatcher>,
    runtime: Option<Handle>,
}

impl ClientBuilder {
    pub fn policy(mut self, policy: TransportPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    pub fn cache(mut self, cache: CacheSetting) -> Self {
        self.policy.cache = cache;
        self
    }

    pub fn pinning(mut self, pinning: PinningTable) -> Self {
        self.policy.pinning = pinning;
        self
    }

    /// Deliver completions through `dispatcher` instead of the process-wide
    /// dispatch thread.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Run network work on `runtime` instead of the background runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> io::Result<Client> {
        let dispatcher = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => default_dispatcher()?,
        };
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => background_runtime()?,
        };
        Ok(Client {
            inner: Arc::new(Inner {
                policy: Mutex::new(self.policy),
                session: Mutex::new(None),
                dispatcher,
                runtime,
            }),
        })
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The process-wide client: in-memory cache, no timeout, no pinning.
    pub fn shared() -> io::Result<&'static Client> {
        static SHARED: OnceLock<Client> = OnceLock::new();
        if let Some(client) = SHARED.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .cache(CacheSetting::Store(Arc::new(crate::cache::MemoryCache::default())))
            .build()?;
        Ok(SHARED.get_or_init(|| client))
    }

    /// A snapshot of the current transport policy.
    pub fn policy(&self) -> TransportPolicy {
        lock(&self.inner.policy).clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn configure_timeout(&self, timeout: Option<Duration>) {
        self.reconfigure(|policy| policy.timeout = timeout);
    }

    pub fn configure_cache(&self, cache: CacheSetting) {
        self.reconfigure(|policy| policy.cache = cache);
    }

    pub fn configure_pinning(&self, pinning: PinningTable) {
        self.reconfigure(|policy| policy.pinning = pinning);
    }

    /// Empty the configured cache store, if any.
    pub fn clear_all_cache(&self) {
        if let Some(store) = lock(&self.inner.policy).cache.store() {
            store.clear();
        }
    }

    pub fn get(&self, target: impl Into<Target>, options: RequestOptions) -> Call {
        self.request(Method::Get, target, options)
    }

    pub fn post(&self, target: impl Into<Target>, options: RequestOptions) -> Call {
        self.request(Method::Post, target, options)
    }

    pub fn put(&self, target: impl Into<Target>, options: RequestOptions) -> Call {
        self.request(Method::Put, target, options)
    }

    pub fn delete(&self, target: impl Into<Target>, options: RequestOptions) -> Call {
        self.request(Method::Delete, target, options)
    }

    pub fn request(&self, method: Method, target: impl Into<Target>, options: RequestOptions) -> Call {
        Call {
            client: self.clone(),
            method,
            target: target.into(),
            options,
        }
    }

    /// Whether a session is currently built.
    pub fn has_session(&self) -> bool {
        lock(&self.inner.session).is_some()
    }

    fn reconfigure(&self, change: impl FnOnce(&mut TransportPolicy)) {
        let mut policy = lock(&self.inner.policy);
        let before = policy.clone();
        change(&mut policy);
        if *policy == before {
            return;
        }
        tracing::debug!(policy = ?*policy, "transport policy changed");
        drop(policy);
        *lock(&self.inner.session) = None;
    }

    fn session(&self) -> Result<Arc<Session>, SessionError> {
        let mut slot = lock(&self.inner.session);
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        let policy = lock(&self.inner.policy).clone();
        let session = Arc::new(Session::build(&policy)?);
        *slot = Some(session.clone());
        Ok(session)
    }
}

/// One described request, not yet started.
pub struct Call {
    client: Client,
    method: Method,
    target: Target,
    options: RequestOptions,
}

impl Call {
    /// Run the call and return its outcome to the awaiting task.
    pub async fn send<T: Model, E: Model>(self) -> Outcome<T::Output, E::Output> {
        let runtime = self.client.inner.runtime.clone();
        joined(runtime.spawn(self.run::<T, E>()).await)
    }

    /// Run the call and hand the outcome to `callback` on the dispatch
    /// thread. Never blocks the caller.
    pub fn on_complete<T, E, F>(self, callback: F)
    where
        T: Model,
        E: Model,
        F: FnOnce(Outcome<T::Output, E::Output>) + Send + 'static,
    {
        let dispatcher = self.client.inner.dispatcher.clone();
        let runtime = self.client.inner.runtime.clone();
        runtime.spawn(async move {
            let outcome = self.run::<T, E>().await;
            dispatcher.deliver(move || callback(outcome));
        });
    }

    /// Start the call now and expose its outcome as a single-item stream.
    pub fn publisher<T: Model, E: Model>(self) -> Publisher<Outcome<T::Output, E::Output>> {
        let dispatcher = self.client.inner.dispatcher.clone();
        let runtime = self.client.inner.runtime.clone();
        let task = runtime.spawn(self.run::<T, E>());
        Publisher {
            items: stream::once(async move { joined(task.await) }).boxed(),
            dispatcher,
            runtime,
        }
    }

    async fn run<T: Model, E: Model>(self) -> Outcome<T::Output, E::Output> {
        let request = match prepare(self.target, self.method, &self.options) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(method = %self.method, error = %e, "request could not be built");
                return Err(Failure::bare(ErrorKind::from(&e)));
            }
        };
        let session = match self.client.session() {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "transport session could not be built");
                return Err(Failure::bare(ErrorKind::ClientError));
            }
        };
        let raw = execute(&session, &request, self.options.clear_cache).await;
        decode_outcome::<T, E>(raw)
    }
}

/// Stream of a started call's outcomes.
///
/// `subscribe` delivers every item on the dispatch thread. Polling the
/// publisher directly as a `Stream` yields items to the polling task instead.
pub struct Publisher<T> {
    items: BoxStream<'static, T>,
    dispatcher: Dispatcher,
    runtime: Handle,
}

impl<T: Send + 'static> Publisher<T> {
    pub fn subscribe<F>(self, on_item: F)
    where
        F: FnMut(T) + Send + 'static,
    {
        self.dispatcher.forward(&self.runtime, self.items, on_item);
    }
}

impl<T> Stream for Publisher<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.items.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

fn joined<T, E>(result: Result<Outcome<T, E>, JoinError>) -> Outcome<T, E> {
    result.unwrap_or_else(|e| {
        tracing::error!(error = %e, "request task did not complete");
        Err(Failure::bare(ErrorKind::UnknownError))
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn default_dispatcher() -> io::Result<Dispatcher> {
    static DISPATCHER: OnceLock<Dispatcher> = OnceLock::new();
    if let Some(dispatcher) = DISPATCHER.get() {
        return Ok(dispatcher.clone());
    }
    let dispatcher = Dispatcher::spawn("courier-main")?;
    Ok(DISPATCHER.get_or_init(|| dispatcher).clone())
}

fn background_runtime() -> io::Result<Handle> {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    static INIT: Mutex<()> = Mutex::new(());
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }
    let _init = lock(&INIT);
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("courier-io")
        .enable_all()
        .build()?;
    Ok(RUNTIME.get_or_init(|| runtime).handle().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Raw;
    use std::sync::mpsc;

    fn client() -> Client {
        Client::builder().build().unwrap()
    }

    #[test]
    fn configuring_drops_the_session() {
        let client = client();
        client.session().unwrap();
        assert!(client.has_session());

        client.configure_timeout(Some(Duration::from_secs(5)));
        assert!(!client.has_session());
        assert_eq!(client.policy().timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn configuring_the_same_value_keeps_the_session() {
        let client = client();
        client.configure_timeout(Some(Duration::from_secs(5)));
        let first = client.session().unwrap();

        client.configure_timeout(Some(Duration::from_secs(5)));
        client.configure_pinning(PinningTable::new());
        client.configure_cache(CacheSetting::Disabled);
        assert!(client.has_session());
        assert!(Arc::ptr_eq(&first, &client.session().unwrap()));
    }

    #[test]
    fn pinning_and_cache_changes_drop_the_session() {
        let client = client();
        client.session().unwrap();
        client.configure_pinning(PinningTable::new().with("example.com", "hash"));
        assert!(!client.has_session());

        client.session().unwrap();
        client.configure_cache(CacheSetting::memory(1024));
        assert!(!client.has_session());
    }

    #[test]
    fn shared_client_is_one_instance_with_a_cache() {
        let a = Client::shared().unwrap();
        let b = Client::shared().unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        assert!(a.policy().cache.store().is_some());
    }

    #[test]
    fn invalid_url_is_delivered_on_the_dispatch_thread() {
        let client = client();
        let dispatch_thread = client.dispatcher().thread_id().unwrap();
        let (tx, rx) = mpsc::channel();

        client
            .get("not a url", RequestOptions::new())
            .on_complete::<Raw, Raw, _>(move |outcome| {
                tx.send((outcome.unwrap_err().kind, std::thread::current().id()))
                    .unwrap();
            });

        let (kind, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(kind, ErrorKind::CreateRequestFailed);
        assert_eq!(thread, dispatch_thread);
    }

    #[tokio::test]
    async fn invalid_url_fails_send_without_a_session() {
        let client = client();
        let failure = client
            .delete("/relative/path", RequestOptions::new())
            .send::<Raw, Raw>()
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::CreateRequestFailed);
        assert_eq!(failure.status, 0);
        assert!(!client.has_session());
    }

    #[tokio::test]
    async fn publisher_yields_exactly_one_item() {
        let client = client();
        let items: Vec<_> = client
            .post("::", RequestOptions::new())
            .publisher::<Raw, Raw>()
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].as_ref().unwrap_err().kind,
            ErrorKind::CreateRequestFailed
        );
    }

    #[test]
    fn subscriber_runs_on_the_dispatch_thread() {
        let dispatcher = Dispatcher::spawn("client-publisher").unwrap();
        let dispatch_thread = dispatcher.thread_id().unwrap();
        let client = Client::builder().dispatcher(dispatcher).build().unwrap();
        let (tx, rx) = mpsc::channel();

        client
            .put("::", RequestOptions::new())
            .publisher::<Raw, Raw>()
            .subscribe(move |outcome| {
                tx.send((outcome.unwrap_err().kind, std::thread::current().id()))
                    .unwrap();
            });

        let (kind, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(kind, ErrorKind::CreateRequestFailed);
        assert_eq!(thread, dispatch_thread);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn clear_all_cache_empties_the_store() {
        let store = Arc::new(crate::cache::MemoryCache::default());
        let client = Client::builder()
            .cache(CacheSetting::Store(store.clone()))
            .build()
            .unwrap();
        crate::cache::CacheStore::put(
            store.as_ref(),
            "GET https://test.com/",
            crate::cache::CachedResponse {
                status: 200,
                url: "https://test.com/".to_string(),
                headers: Vec::new(),
                body: bytes::Bytes::from_static(b"x"),
                stored_at: std::time::Instant::now(),
                max_age: Duration::from_secs(60),
            },
        );
        assert_eq!(store.len(), 1);
        client.clear_all_cache();
        assert!(store.is_empty());
    }
}
