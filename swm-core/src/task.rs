//! The task and shutdown primitives every long-running `swm-core` component
//! is built on: named, panic-propagating task handles, plus a single-fire
//! multi-consumer shutdown signal.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

/// A single-fire, multi-consumer shutdown signal. Cloning gives every holder
/// its own chance to observe the signal, even after it's already fired.
#[derive(Debug)]
pub struct Shutdown {
    inner: Arc<Semaphore>,
    have_recved: bool,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Semaphore::new(0)),
            have_recved: false,
        }
    }

    /// Fires the signal. Idempotent: calling this more than once is safe.
    pub fn send(&self) {
        self.inner.close();
    }

    /// Waits for the signal. A handle that has already observed the signal
    /// once will never resolve again on a second call — clone for a fresh
    /// waiter.
    pub async fn recv(&mut self) {
        if self.have_recved {
            std::future::pending().await
        } else {
            self.inner
                .acquire()
                .await
                .map_err(|_| ())
                .expect_err("semaphore should only close, never add permits");
            self.have_recved = true;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Clone for Shutdown {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            have_recved: false,
        }
    }
}

/// A named, panic-propagating wrapper around [`JoinHandle`]. Spawning through
/// this type (rather than bare `tokio::spawn`) keeps every background task
/// nameable and joinable, so a panic anywhere surfaces instead of vanishing
/// silently.
#[must_use]
pub struct SwmTask<T> {
    handle: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T> SwmTask<T> {
    pub fn spawn<F>(name: impl Into<Cow<'static, str>>, future: F) -> SwmTask<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        debug!(%name, "spawning task");
        Self {
            handle: tokio::spawn(future),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<T> Future for SwmTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(result) => result,
            Poll::Pending => return Poll::Pending,
        };
        match result {
            Ok(val) => Poll::Ready(Ok(val)),
            Err(join_err) => {
                let name = self.name().to_string();
                match join_err.try_into_panic() {
                    Ok(panic_reason) => {
                        error!(%name, "task panicked");
                        std::panic::resume_unwind(panic_reason)
                    }
                    Err(join_err) => Poll::Ready(Err(join_err)),
                }
            }
        }
    }
}

/// Waits for every static task to finish after `shutdown` fires, up to
/// `timeout`. A task that finishes on its own before shutdown is treated as
/// a premature failure — these tasks are meant to run for the process
/// lifetime.
pub async fn join_tasks_and_shutdown(
    static_tasks: Vec<SwmTask<()>>,
    mut shutdown: Shutdown,
    timeout: Duration,
) {
    if static_tasks.is_empty() {
        shutdown.recv().await;
        return;
    }

    let names: Vec<String> = static_tasks.iter().map(|t| t.name().to_string()).collect();
    let mut tasks = static_tasks.into_iter().collect::<FuturesUnordered<_>>();

    tokio::select! {
        biased;
        () = shutdown.recv() => {}
        Some(result) = tasks.next() => {
            if let Err(e) = result {
                warn!("static task exited before shutdown: {e:#}");
            } else {
                warn!("static task finished prematurely");
            }
            shutdown.send();
        }
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    while !tasks.is_empty() {
        tokio::select! {
            Some(_) = tasks.next() => {}
            () = &mut deadline => {
                error!(?names, "tasks hung past shutdown timeout");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn shutdown_fires_to_all_clones() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.clone();
        let mut b = shutdown.clone();
        shutdown.send();
        a.recv().await;
        b.recv().await;
    }

    #[tokio::test]
    async fn second_recv_on_same_handle_never_resolves_again() {
        let shutdown = Shutdown::new();
        let mut handle = shutdown.clone();
        shutdown.send();
        handle.recv().await;
        let second = tokio::time::timeout(Duration::from_millis(20), handle.recv()).await;
        assert!(second.is_err(), "second recv on the same handle must hang");
    }

    #[tokio::test]
    async fn swm_task_propagates_panics() {
        let task: SwmTask<()> = SwmTask::spawn("panicker", async { panic!("boom") });
        let result = std::panic::AssertUnwindSafe(task)
            .catch_unwind()
            .await;
        assert!(result.is_err());
    }
}
