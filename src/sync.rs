//! The polling synchronizer.
//!
//! Wraps a caller-supplied asynchronous [`Producer`] and keeps a
//! [`SyncState`] fresh by polling it on a schedule. One engine task per
//! synchronizer owns the state; consumers read clone snapshots via
//! [`Synchronizer::state`] or subscribe with
//! [`Synchronizer::on_state_change`].
//!
//! Correctness rules, in order of priority:
//!
//! - at most one producer call is outstanding at any time (see
//!   [`FetchGuard`]); extra requests during that window are dropped, not
//!   queued;
//! - a fetched payload only replaces the stored one when its fingerprint
//!   differs, unless the fetch was forced (start, resume-refresh, explicit
//!   [`Synchronizer::refresh_now`]);
//! - a producer failure never clears the last good payload; consumers see
//!   stale data with an error flag, never a blank screen;
//! - after [`Synchronizer::stop`], a late-resolving fetch is discarded
//!   without touching state or listeners.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::task::{Context, Poll};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::fingerprint::FingerprintFn;
use crate::guard::{FetchGuard, FetchPermit};
use crate::scheduler::{FetchDirective, ScheduleConfig, Scheduler};
use crate::visibility::VisibilityMonitor;

/// Fetches one fresh payload.
///
/// Must be safe to call repeatedly (idempotent GET-like semantics). Query
/// parameters, headers, and caching behavior all belong to the
/// implementation, not the engine.
#[async_trait]
pub trait Producer<T>: Send + Sync {
    async fn produce(&self) -> Result<T>;
}

/// Adapter so plain async closures can act as producers.
pub struct FnProducer<F>(pub F);

#[async_trait]
impl<T, F, Fut> Producer<T> for FnProducer<F>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send,
{
    async fn produce(&self) -> Result<T> {
        (self.0)().await
    }
}

/// Engine errors surfaced to callers. Producer failures are not here;
/// they are absorbed into [`SyncState`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    /// `start()` called while already running.
    #[error("synchronizer already started")]
    AlreadyStarted,
    /// The synchronizer was stopped (or never started) before the
    /// requested refresh completed.
    #[error("refresh superseded by stop")]
    Superseded,
}

/// Lifecycle of the synchronized payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Created, never fetched.
    Idle,
    /// Exactly one producer call is outstanding.
    Fetching,
    /// Last attempt succeeded.
    Ready,
    /// Last attempt failed; `error_message` is set, payload retained.
    Failed,
}

/// Consumer-visible read model. Owned by one synchronizer; everything
/// handed out is a clone snapshot and must not be written back.
#[derive(Debug)]
pub struct SyncState<T> {
    /// Last accepted result. `None` until the first successful fetch.
    pub payload: Option<Arc<T>>,
    pub status: SyncStatus,
    /// Set only while `status == Failed`.
    pub error_message: Option<String>,
    /// Wall-clock time of the last *accepted* payload, not the last
    /// attempt. Unchanged-fingerprint fetches do not advance it.
    pub last_accepted_at: Option<DateTime<Utc>>,
    /// Fingerprint of `payload`, used to detect no-op fetches.
    pub fingerprint: Option<String>,
}

impl<T> Default for SyncState<T> {
    fn default() -> Self {
        Self {
            payload: None,
            status: SyncStatus::Idle,
            error_message: None,
            last_accepted_at: None,
            fingerprint: None,
        }
    }
}

impl<T> Clone for SyncState<T> {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            status: self.status,
            error_message: self.error_message.clone(),
            last_accepted_at: self.last_accepted_at,
            fingerprint: self.fingerprint.clone(),
        }
    }
}

type Listener<T> = Box<dyn Fn(&SyncState<T>) + Send + Sync>;

struct Shared<T> {
    state: RwLock<SyncState<T>>,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    next_listener_id: AtomicU64,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: RwLock::new(SyncState::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    fn read_state(&self) -> SyncState<T> {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, SyncState<T>> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, snapshot: &SyncState<T>) {
        let listeners = match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (id, listener) in listeners.iter() {
            // A broken listener must not take the scheduler down.
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(snapshot))).is_err() {
                tracing::warn!("State listener {} panicked, skipping it", id);
            }
        }
    }
}

/// Unsubscribe handle returned by [`Synchronizer::on_state_change`].
pub struct Subscription<T> {
    shared: Weak<Shared<T>>,
    id: u64,
}

impl<T> Subscription<T> {
    pub fn cancel(self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut listeners = match shared.listeners.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Resolves once the requested fetch (or the in-flight fetch it coalesced
/// behind) completes. Completion means the attempt finished: producer
/// success and failure both resolve `Ok(())`, and the outcome lives in
/// [`SyncState`]. Fails with [`SyncError::Superseded`] if the synchronizer
/// stops first.
pub struct RefreshHandle {
    rx: oneshot::Receiver<Result<(), SyncError>>,
}

impl Future for RefreshHandle {
    type Output = Result<(), SyncError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SyncError::Superseded)),
            Poll::Pending => Poll::Pending,
        }
    }
}

enum Command {
    Refresh {
        force: bool,
        done: oneshot::Sender<Result<(), SyncError>>,
    },
    Stop,
}

/// A polling synchronizer bound to one producer and one schedule.
///
/// Parameter changes (e.g. a filter the producer closes over) are the
/// caller's concern: update the parameter, then call `refresh_now(true)`.
/// Debounce rapid edits caller-side; around 300 ms works well for
/// keystroke-driven filters.
pub struct Synchronizer<T> {
    shared: Arc<Shared<T>>,
    producer: Arc<dyn Producer<T>>,
    fingerprint: FingerprintFn<T>,
    config: ScheduleConfig,
    visibility: VisibilityMonitor,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    disposed: Option<Arc<AtomicBool>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + Sync + 'static> Synchronizer<T> {
    /// Synchronizer for a host with no visibility signal (never hidden).
    pub fn new<P, F>(producer: P, fingerprint: F, config: ScheduleConfig) -> Self
    where
        P: Producer<T> + 'static,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self::with_visibility(producer, fingerprint, config, VisibilityMonitor::always_visible())
    }

    pub fn with_visibility<P, F>(
        producer: P,
        fingerprint: F,
        config: ScheduleConfig,
        visibility: VisibilityMonitor,
    ) -> Self
    where
        P: Producer<T> + 'static,
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared::new()),
            producer: Arc::new(producer),
            fingerprint: Arc::new(fingerprint),
            config,
            visibility,
            cmd_tx: None,
            disposed: None,
            task: None,
        }
    }

    /// Spawn the engine task: immediate forced fetch, then the repeating
    /// timer. Fails if already running; restarting after `stop()` is fine.
    pub fn start(&mut self) -> Result<(), SyncError> {
        if self.cmd_tx.is_some() {
            return Err(SyncError::AlreadyStarted);
        }
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let disposed = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run(
            Arc::clone(&self.shared),
            Arc::clone(&self.producer),
            Arc::clone(&self.fingerprint),
            Scheduler::new(self.config.clone()),
            self.visibility.clone(),
            Arc::clone(&disposed),
            cmd_rx,
        ));
        self.cmd_tx = Some(cmd_tx);
        self.disposed = Some(disposed);
        self.task = Some(task);
        Ok(())
    }
}

impl<T> Synchronizer<T> {
    pub fn is_running(&self) -> bool {
        self.cmd_tx.is_some()
    }

    /// Tear down the schedule. Idempotent. An in-flight producer call is
    /// not cancelled; its result is discarded on arrival without mutating
    /// state or notifying listeners.
    pub fn stop(&mut self) {
        // Flag first, synchronously: a result racing this call must lose.
        if let Some(disposed) = self.disposed.take() {
            disposed.store(true, Ordering::Release);
        }
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(Command::Stop);
        }
        // The task drains its in-flight fetch and exits on its own.
        self.task.take();
    }

    /// Request a fetch outside the timer cadence.
    ///
    /// Subject to the single-flight guard: if a fetch is already in flight
    /// no new producer call is made and the handle resolves when that
    /// fetch completes. `force` accepts the result regardless of
    /// fingerprint match.
    pub fn refresh_now(&self, force: bool) -> RefreshHandle {
        let (done, rx) = oneshot::channel();
        match &self.cmd_tx {
            Some(cmd_tx) => {
                if let Err(rejected) = cmd_tx.send(Command::Refresh { force, done }) {
                    if let Command::Refresh { done, .. } = rejected.0 {
                        let _ = done.send(Err(SyncError::Superseded));
                    }
                }
            }
            None => {
                let _ = done.send(Err(SyncError::Superseded));
            }
        }
        RefreshHandle { rx }
    }

    /// Snapshot of the current state. Never blocks on the engine.
    pub fn state(&self) -> SyncState<T> {
        self.shared.read_state()
    }

    /// Register a listener invoked once per committed state transition.
    /// Listeners are independent; a panicking listener is logged and
    /// skipped without disturbing the schedule.
    pub fn on_state_change<F>(&self, listener: F) -> Subscription<T>
    where
        F: Fn(&SyncState<T>) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = match self.shared.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push((id, Box::new(listener)));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }
}

impl<T> Drop for Synchronizer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct InFlight<T> {
    fut: BoxFuture<'static, Result<T>>,
    forced: bool,
    _permit: FetchPermit,
}

/// Resolves the in-flight fetch, or pends forever when there is none so
/// the select arm stays quiet.
async fn next_result<T>(slot: &mut Option<InFlight<T>>) -> Result<T> {
    match slot.as_mut() {
        Some(in_flight) => in_flight.fut.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn run<T: Send + Sync + 'static>(
    shared: Arc<Shared<T>>,
    producer: Arc<dyn Producer<T>>,
    fingerprint: FingerprintFn<T>,
    mut scheduler: Scheduler,
    mut visibility: VisibilityMonitor,
    disposed: Arc<AtomicBool>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let guard = FetchGuard::new();
    let mut in_flight: Option<InFlight<T>> = None;
    let mut waiters: Vec<oneshot::Sender<Result<(), SyncError>>> = Vec::new();
    // Monotonic acceptance clock for staleness math; the wall-clock
    // timestamp in SyncState is for display only.
    let mut accepted_at: Option<Instant> = None;
    let mut stopping = false;

    if scheduler.start() == FetchDirective::Forced {
        begin_fetch(&shared, &producer, &guard, true, &mut in_flight);
    }
    // Host already hidden: the initial fetch still runs, the timer does not.
    if !visibility.is_visible() {
        scheduler.suspend();
    }

    loop {
        tokio::select! {
            directive = scheduler.tick(), if !stopping => {
                if directive == FetchDirective::Unforced {
                    begin_fetch(&shared, &producer, &guard, false, &mut in_flight);
                }
            }
            visible = visibility.transition(), if !stopping => {
                if visible {
                    let age = accepted_at.map(|at| at.elapsed());
                    if scheduler.resume(age) == FetchDirective::Forced {
                        begin_fetch(&shared, &producer, &guard, true, &mut in_flight);
                    }
                } else {
                    scheduler.suspend();
                }
            }
            cmd = cmd_rx.recv(), if !stopping => {
                match cmd {
                    Some(Command::Refresh { force, done }) => {
                        if in_flight.is_some() {
                            // Coalesce behind the outstanding fetch; no
                            // second producer call.
                            waiters.push(done);
                        } else if begin_fetch(&shared, &producer, &guard, force, &mut in_flight) {
                            waiters.push(done);
                        } else {
                            // Guard refused with nothing recorded in
                            // flight; unreachable with a task-local guard.
                            let _ = done.send(Err(SyncError::Superseded));
                        }
                    }
                    Some(Command::Stop) | None => {
                        scheduler.stop();
                        stopping = true;
                        if in_flight.is_none() {
                            break;
                        }
                        // Keep looping only to drain the in-flight fetch.
                    }
                }
            }
            result = next_result(&mut in_flight), if in_flight.is_some() => {
                let forced = in_flight.take().map(|f| f.forced).unwrap_or(false);
                if disposed.load(Ordering::Acquire) {
                    // Zombie result after stop(): discard, fail waiters.
                    for done in waiters.drain(..) {
                        let _ = done.send(Err(SyncError::Superseded));
                    }
                    if stopping {
                        break;
                    }
                    continue;
                }
                commit(&shared, &fingerprint, forced, result, &mut accepted_at);
                for done in waiters.drain(..) {
                    let _ = done.send(Ok(()));
                }
                if stopping {
                    break;
                }
            }
        }
    }

    for done in waiters.drain(..) {
        let _ = done.send(Err(SyncError::Superseded));
    }
}

/// Claim the guard and launch a producer call. Returns false when another
/// fetch already holds the slot — the request is dropped, not queued.
fn begin_fetch<T: Send + Sync + 'static>(
    shared: &Arc<Shared<T>>,
    producer: &Arc<dyn Producer<T>>,
    guard: &FetchGuard,
    forced: bool,
    in_flight: &mut Option<InFlight<T>>,
) -> bool {
    let Some(permit) = guard.begin() else {
        return false;
    };

    let snapshot = {
        let mut state = shared.write_state();
        // Leaving Failed is optimistic: the error clears as soon as a new
        // attempt starts.
        state.status = SyncStatus::Fetching;
        state.error_message = None;
        state.clone()
    };
    shared.notify(&snapshot);

    let producer = Arc::clone(producer);
    *in_flight = Some(InFlight {
        fut: Box::pin(async move { producer.produce().await }),
        forced,
        _permit: permit,
    });
    true
}

fn commit<T>(
    shared: &Arc<Shared<T>>,
    fingerprint: &FingerprintFn<T>,
    forced: bool,
    result: Result<T>,
    accepted_at: &mut Option<Instant>,
) {
    let snapshot = {
        let mut state = shared.write_state();
        match result {
            Ok(payload) => {
                let fp = fingerprint(&payload);
                let changed = state.fingerprint.as_deref() != Some(fp.as_str());
                if forced || changed {
                    state.payload = Some(Arc::new(payload));
                    state.fingerprint = Some(fp);
                    state.last_accepted_at = Some(Utc::now());
                    *accepted_at = Some(Instant::now());
                }
                // Unchanged and unforced: drop the payload, keep the
                // acceptance timestamp where it was.
                state.status = SyncStatus::Ready;
                state.error_message = None;
            }
            Err(error) => {
                tracing::warn!("Producer fetch failed: {:#}", error);
                state.status = SyncStatus::Failed;
                state.error_message = Some(error.to_string());
                // Last good payload stays visible behind the error flag.
            }
        }
        state.clone()
    };
    shared.notify(&snapshot);
}
