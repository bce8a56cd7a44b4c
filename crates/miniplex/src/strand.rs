//! A serial execution domain ("strand"): a single task that owns some state
//! exclusively and drains an unbounded queue of jobs one at a time, in
//! submission order, running each to completion (including any `.await`s it
//! makes) before starting the next. Different strands run concurrently on
//! the shared Tokio runtime; work posted to the *same* strand never
//! overlaps or reorders.
//!
//! This generalizes the single in-flight request/response exchange pattern
//! to an open-ended job queue, which is what the socket and processing
//! domains need: each owns one piece of state (the buffer pool, the
//! endpoint directory) that must only ever be touched by one job at a time,
//! and the socket domain additionally needs its `send_to` calls themselves
//! (not just the buffer-pool bookkeeping around them) serialized in
//! submission order.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job<S> = Box<dyn FnOnce(&mut S) -> BoxFuture + Send>;

pub struct Strand<S> {
    tx: mpsc::UnboundedSender<Job<S>>,
}

impl<S> Clone for Strand<S> {
    fn clone(&self) -> Self {
        Strand { tx: self.tx.clone() }
    }
}

impl<S: Send + 'static> Strand<S> {
    /// Spawns the strand's consumer task and returns a handle to it.
    /// `make_state` receives a handle to the strand being constructed, so
    /// that the owned state can itself hold a way to post further work back
    /// onto its own strand (e.g. to re-arm a timer).
    pub fn new(make_state: impl FnOnce(Strand<S>) -> S) -> Strand<S> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<S>>();
        let handle = Strand { tx };
        let mut state = make_state(handle.clone());
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job(&mut state).await;
            }
        });
        handle
    }

    /// Enqueues a synchronous `job` to run on this strand. Silently dropped
    /// if the strand's consumer task has already shut down.
    pub fn post(&self, job: impl FnOnce(&mut S) + Send + 'static) {
        let _ = self.tx.send(Box::new(move |state: &mut S| {
            job(state);
            Box::pin(async {}) as BoxFuture
        }));
    }

    /// Enqueues a job that itself performs async work (e.g. a socket send).
    /// The whole job, including whatever it `.await`s, runs to completion
    /// before the next queued job (sync or async) starts — this is what
    /// lets the socket domain serialize actual `send_to` calls, not merely
    /// their submission.
    pub fn post_async<F>(&self, job: impl FnOnce(&mut S) -> F + Send + 'static)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.tx.send(Box::new(move |state: &mut S| Box::pin(job(state)) as BoxFuture));
    }
}
