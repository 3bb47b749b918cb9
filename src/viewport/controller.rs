//! Client-side orchestration of viewport fetches.
//!
//! The controller debounces viewport changes, keeps at most one authoritative
//! request outstanding, and publishes a [`FetchState`] through a watch channel.
//!
//! Every dispatched request gets a sequence number. A result is applied only
//! if its sequence is still the latest dispatched one, so a superseded
//! response that arrives late is dropped even when cancellation was not
//! honored by the transport. No retries: a failure waits for the next
//! viewport change or a manual [`ViewportFetchController::refetch`].

use crate::models::{PropertyView, ViewportRequest};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Quiet period a viewport must survive before it is fetched
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(400);

#[derive(Debug, Error)]
pub enum FetchError {
    /// Superseded or explicitly cancelled; never surfaced to the user
    #[error("request cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(String),

    #[error("{message} ({status})")]
    Server {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Network boundary the controller fetches through
#[async_trait]
pub trait ViewportSource: Send + Sync {
    async fn fetch(&self, request: &ViewportRequest) -> Result<Vec<PropertyView>, FetchError>;
}

/// What the map should show.
///
/// On failure the data is cleared and `error` is set, so stale results are
/// never presented as current.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchState {
    /// `None` until the first successful fetch, and after a failure
    pub data: Option<Arc<Vec<PropertyView>>>,
    /// Cleared as soon as the next request is dispatched
    pub error: Option<String>,
    pub loading: bool,
    /// Viewport the current `data` or `error` belongs to
    pub viewport: Option<ViewportRequest>,
}

/// Coarse UI phase derived from a [`FetchState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    /// No data yet, request outstanding
    Loading,
    /// Valid result with zero properties in view
    Empty,
    Loaded,
    Failed,
}

impl FetchState {
    pub fn phase(&self) -> FetchPhase {
        if self.error.is_some() {
            return FetchPhase::Failed;
        }
        match &self.data {
            None if self.loading => FetchPhase::Loading,
            None => FetchPhase::Idle,
            Some(data) if data.is_empty() => FetchPhase::Empty,
            Some(_) => FetchPhase::Loaded,
        }
    }
}

struct InFlight {
    seq: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Shared {
    last_viewport: Option<ViewportRequest>,
    pending: Option<JoinHandle<()>>,
    in_flight: Option<InFlight>,
    next_seq: u64,
}

struct Inner {
    source: Arc<dyn ViewportSource>,
    quiet_period: Duration,
    shared: Mutex<Shared>,
    state: watch::Sender<FetchState>,
}

/// Debounced, cancel-on-supersede viewport fetcher.
///
/// Entry points spawn onto the current Tokio runtime and must be called from
/// inside one.
#[derive(Clone)]
pub struct ViewportFetchController {
    inner: Arc<Inner>,
}

impl ViewportFetchController {
    pub fn new(source: Arc<dyn ViewportSource>, quiet_period: Duration) -> Self {
        let (state, _) = watch::channel(FetchState::default());
        Self {
            inner: Arc::new(Inner {
                source,
                quiet_period,
                shared: Mutex::new(Shared::default()),
                state,
            }),
        }
    }

    pub fn with_default_quiet_period(source: Arc<dyn ViewportSource>) -> Self {
        Self::new(source, DEFAULT_QUIET_PERIOD)
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> FetchState {
        self.inner.state.borrow().clone()
    }

    pub fn last_viewport(&self) -> Option<ViewportRequest> {
        self.inner.lock().last_viewport
    }

    /// Record a new viewport and (re)start the quiet-period timer.
    ///
    /// A viewport replaced before its timer fires is never fetched.
    pub fn viewport_changed(&self, request: ViewportRequest) {
        let mut shared = self.inner.lock();
        shared.last_viewport = Some(request);
        if let Some(timer) = shared.pending.take() {
            timer.abort();
        }

        let inner = Arc::clone(&self.inner);
        shared.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_period).await;
            inner.dispatch(request);
        }));
    }

    /// Fetch the last known viewport now, skipping the quiet period.
    ///
    /// Returns `false` when no viewport has been seen yet.
    pub fn refetch(&self) -> bool {
        let request = {
            let mut shared = self.inner.lock();
            if let Some(timer) = shared.pending.take() {
                timer.abort();
            }
            shared.last_viewport
        };

        match request {
            Some(request) => {
                self.inner.dispatch(request);
                true
            }
            None => false,
        }
    }

    /// Drop any pending timer and cancel the in-flight request.
    pub fn cancel(&self) {
        let mut shared = self.inner.lock();
        if let Some(timer) = shared.pending.take() {
            timer.abort();
        }
        if let Some(in_flight) = shared.in_flight.take() {
            in_flight.token.cancel();
        }
        self.inner.state.send_modify(|state| state.loading = false);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        // The guarded data stays consistent even if a holder panicked.
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Issue `request` immediately, superseding whatever is in flight.
    fn dispatch(self: &Arc<Self>, request: ViewportRequest) {
        let token = CancellationToken::new();
        let seq = {
            let mut shared = self.lock();
            shared.next_seq += 1;
            let seq = shared.next_seq;
            let previous = shared.in_flight.replace(InFlight {
                seq,
                token: token.clone(),
            });
            if let Some(previous) = previous {
                debug!("Cancelling viewport request #{}", previous.seq);
                previous.token.cancel();
            }
            seq
        };

        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
        debug!("Dispatching viewport request #{} z{}", seq, request.zoom);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(FetchError::Cancelled),
                result = inner.source.fetch(&request) => result,
            };
            inner.apply(seq, request, outcome);
        });
    }

    fn apply(
        &self,
        seq: u64,
        request: ViewportRequest,
        outcome: Result<Vec<PropertyView>, FetchError>,
    ) {
        let mut shared = self.lock();
        if shared.in_flight.as_ref().map(|f| f.seq) != Some(seq) {
            debug!("Discarding stale result for viewport request #{}", seq);
            return;
        }

        match outcome {
            Err(err) if err.is_cancelled() => {
                shared.in_flight = None;
                self.state.send_modify(|state| state.loading = false);
            }
            Ok(properties) => {
                shared.in_flight = None;
                self.state.send_modify(|state| {
                    state.data = Some(Arc::new(properties));
                    state.error = None;
                    state.loading = false;
                    state.viewport = Some(request);
                });
            }
            Err(err) => {
                shared.in_flight = None;
                warn!("Viewport request #{} failed: {}", seq, err);
                self.state.send_modify(|state| {
                    state.data = None;
                    state.error = Some(err.to_string());
                    state.loading = false;
                    state.viewport = Some(request);
                });
            }
        }
    }
}
