//! Completion dispatcher: every result reaches the caller on one designated
//! thread.
//!
//! # Design
//! A `Dispatcher` is a cloneable handle onto a job queue drained by exactly
//! one thread, the dispatch thread. `Dispatcher::spawn` starts a dedicated
//! thread for it; `Dispatcher::with_loop` hands back a `DispatchLoop` so an
//! application can drain the queue from a thread it already owns (its UI or
//! main loop). Delivering from the dispatch thread itself runs the job
//! immediately instead of queueing it.

use std::io;
use std::pin::pin;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

use futures_util::{Stream, StreamExt};
use tokio::runtime::Handle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle for scheduling work on the dispatch thread.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
    thread: Arc<OnceLock<ThreadId>>,
}

/// The receiving end of a `Dispatcher`, drained by the thread that runs it.
pub struct DispatchLoop {
    rx: mpsc::Receiver<Job>,
    thread: Arc<OnceLock<ThreadId>>,
}

impl Dispatcher {
    /// A dispatcher whose loop the caller runs on a thread of its choice.
    pub fn with_loop() -> (Dispatcher, DispatchLoop) {
        let (tx, rx) = mpsc::channel();
        let thread = Arc::new(OnceLock::new());
        (
            Dispatcher {
                tx,
                thread: thread.clone(),
            },
            DispatchLoop { rx, thread },
        )
    }

    /// A dispatcher draining on a dedicated thread named `name`. The thread
    /// exits once every handle is dropped.
    pub fn spawn(name: &str) -> io::Result<Dispatcher> {
        let (dispatcher, dispatch_loop) = Dispatcher::with_loop();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || dispatch_loop.run())?;
        // The loop binds the same id when it starts; whichever runs first wins.
        let _ = dispatcher.thread.set(handle.thread().id());
        Ok(dispatcher)
    }

    /// The dispatch thread, once known.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread.get().copied()
    }

    pub fn is_current(&self) -> bool {
        self.thread_id() == Some(thread::current().id())
    }

    /// Run `job` on the dispatch thread, exactly once.
    pub fn deliver<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            job();
            return;
        }
        if self.tx.send(Box::new(job)).is_err() {
            tracing::error!("dispatch loop has stopped; completion dropped");
        }
    }

    /// Drive `stream` on `runtime` and run `on_item` on the dispatch thread
    /// for every item, in stream order.
    pub fn forward<S, F>(&self, runtime: &Handle, stream: S, on_item: F)
    where
        S: Stream + Send + 'static,
        S::Item: Send + 'static,
        F: FnMut(S::Item) + Send + 'static,
    {
        let dispatcher = self.clone();
        let on_item = Arc::new(Mutex::new(on_item));
        runtime.spawn(async move {
            let mut stream = pin!(stream);
            while let Some(item) = stream.next().await {
                let on_item = on_item.clone();
                dispatcher.deliver(move || {
                    let mut on_item = on_item.lock().unwrap_or_else(PoisonError::into_inner);
                    (*on_item)(item);
                });
            }
        });
    }
}

impl DispatchLoop {
    /// Make the calling thread the dispatch thread and run jobs until every
    /// `Dispatcher` handle is gone.
    pub fn run(self) {
        self.bind();
        while let Ok(job) = self.rx.recv() {
            job();
        }
    }

    /// Run the jobs queued so far without blocking, for callers that pump
    /// their own event loop. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        self.bind();
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    fn bind(&self) {
        let current = thread::current().id();
        let bound = *self.thread.get_or_init(|| current);
        if bound != current {
            tracing::warn!("dispatch loop is being drained from a second thread");
        }
    }
}
