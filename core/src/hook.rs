//! Consumer-facing request lifecycle.
//!
//! A [`RequestHook`] owns one parameterized request. It re-issues the request
//! when its dependency value changes, cancels whatever it superseded, and
//! publishes `{data, loading, error, is_offline}` through a
//! `tokio::sync::watch` channel so UI code can render from snapshots.
//!
//! The hook never classifies or retries; the fetcher it wraps (usually an
//! [`ApiClient`](crate::client::ApiClient) call) does. Every in-flight run
//! holds its own cancellation token, and results are only written while
//! holding the channel's lock after re-checking that token, so a run that was
//! superseded, reset or torn down cannot touch the state.
//!
//! State machine: Idle -> Loading -> (Success | Error) -> Loading on
//! refetch or dependency change, Idle on reset.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::connectivity::Connectivity;
use crate::error::{ClassifiedError, RequestFailure};

type Fetcher<D, T> = Arc<dyn Fn(D, CancellationToken) -> BoxFuture<'static, Result<T, RequestFailure>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct HookState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<ClassifiedError>,
    pub is_offline: bool,
}

impl<T> Default for HookState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            is_offline: false,
        }
    }
}

pub struct RequestHook<D, T> {
    fetcher: Fetcher<D, T>,
    connectivity: Arc<dyn Connectivity>,
    state: Arc<watch::Sender<HookState<T>>>,
    deps: Option<D>,
    inflight: Option<CancellationToken>,
}

impl<D, T> RequestHook<D, T>
where
    D: Clone + PartialEq + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(connectivity: Arc<dyn Connectivity>, fetcher: F) -> Self
    where
        F: Fn(D, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RequestFailure>> + Send + 'static,
    {
        let (state, _) = watch::channel(HookState::default());
        Self {
            fetcher: Arc::new(move |deps, cancel| fetcher(deps, cancel).boxed()),
            connectivity,
            state: Arc::new(state),
            deps: None,
            inflight: None,
        }
    }

    /// Declares the current dependencies. Issues a request (cancelling the
    /// previous one) only when they differ from the last value; tuples compare
    /// position by position. Returns whether a request was issued.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    pub fn set_deps(&mut self, deps: D) -> bool {
        if self.deps.as_ref() == Some(&deps) {
            return false;
        }
        self.deps = Some(deps);
        self.start();
        true
    }

    /// Runs the request again from its first attempt, dropping any previous
    /// error. Does nothing before dependencies were set.
    pub fn refetch(&mut self) -> bool {
        if self.deps.is_none() {
            return false;
        }
        self.start();
        true
    }

    /// Cancels any in-flight request and returns to the idle state.
    pub fn reset(&mut self) {
        self.cancel_inflight();
        self.state.send_modify(|state| {
            state.data = None;
            state.error = None;
            state.loading = false;
        });
    }

    pub fn snapshot(&self) -> HookState<T> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HookState<T>> {
        self.state.subscribe()
    }

    pub fn is_offline(&self) -> bool {
        self.state.borrow().is_offline
    }

    /// Cancels the in-flight request. Equivalent to dropping the hook.
    pub fn teardown(self) {}

    fn cancel_inflight(&mut self) {
        if let Some(token) = self.inflight.take() {
            token.cancel();
        }
    }

    fn start(&mut self) {
        self.cancel_inflight();
        let Some(deps) = self.deps.clone() else {
            return;
        };

        let token = CancellationToken::new();
        self.inflight = Some(token.clone());
        let offline = !self.connectivity.is_online();
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
            state.is_offline = offline;
        });

        let request = (self.fetcher)(deps, token.clone());
        let state = Arc::clone(&self.state);
        let connectivity = Arc::clone(&self.connectivity);
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                result = request => result,
            };
            let offline = !connectivity.is_online();
            state.send_if_modified(|current| {
                if token.is_cancelled() {
                    return false;
                }
                match result {
                    Ok(data) => {
                        current.data = Some(data);
                        current.error = None;
                    }
                    Err(RequestFailure::Failed(err)) => {
                        tracing::debug!(kind = ?err.kind(), "request hook settled with error");
                        current.data = None;
                        current.error = Some(err);
                    }
                    Err(RequestFailure::Cancelled) => return false,
                }
                current.loading = false;
                current.is_offline = offline;
                true
            });
        });
    }
}

impl<D, T> Drop for RequestHook<D, T> {
    fn drop(&mut self) {
        if let Some(token) = self.inflight.take() {
            token.cancel();
        }
    }
}
