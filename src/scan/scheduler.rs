// src/scan/scheduler.rs
//! Round-based polling scheduler.
//!
//! Each round fans out one poll task per source, folds results into the
//! per-source state as they complete and dispatches an event per completion.
//! Between rounds the scheduler waits out the rest of the interval; that wait
//! can be cut short by [`Scheduler::poll_now`] or [`Scheduler::stop`].
//!
//! Stopping cancels polls that are still in flight. Their results are dropped
//! without reaching observers, and `stop` only returns once every poll task
//! has been reaped and the round loop has exited.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::notify::{panic_message, Observer, ObserverId, ObserverRegistry, PollEvent};
use crate::scan::state::SourceState;
use crate::scan::types::{PollResult, Source};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    /// Target duration of one round including the wait after it.
    pub interval: Duration,
    /// Extra timeout layered over each poll. Sources enforce their own
    /// timeouts; this only guards against ones that do not.
    pub poll_timeout: Option<Duration>,
    /// Upper bound on concurrent polls. `None` polls every source at once.
    pub max_concurrency: Option<usize>,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            poll_timeout: None,
            max_concurrency: None,
        }
    }
}

impl SchedulerCfg {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Source paired with its current state.
#[derive(Clone)]
pub struct SourceSnapshot {
    pub source: Arc<dyn Source>,
    pub state: SourceState,
}

impl std::fmt::Debug for SourceSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSnapshot")
            .field("source", &self.source.name())
            .field("state", &self.state)
            .finish()
    }
}

enum RoundEnd {
    Completed,
    Interrupted,
}

/// Held by `run_once`: settles the phase when the round ends, including when
/// the caller drops the future mid-round.
struct SingleRound<'a>(&'a Shared);

impl Drop for SingleRound<'_> {
    fn drop(&mut self) {
        self.0.phase.send_if_modified(|p| match *p {
            Phase::Running => {
                *p = Phase::Idle;
                true
            }
            Phase::Stopping => {
                *p = Phase::Stopped;
                true
            }
            Phase::Idle | Phase::Stopped => false,
        });
    }
}

struct Shared {
    cfg: SchedulerCfg,
    sources: Vec<Arc<dyn Source>>,
    /// Replaced wholesale after every completion.
    states: RwLock<Arc<[SourceState]>>,
    observers: ObserverRegistry,
    limiter: Option<Arc<Semaphore>>,
    poll_now: Notify,
    shutdown: CancellationToken,
    phase: watch::Sender<Phase>,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(sources: Vec<Arc<dyn Source>>, cfg: SchedulerCfg) -> Self {
        crate::scan::ensure_metrics_described();
        let now = Utc::now();
        let states: Arc<[SourceState]> = sources.iter().map(|_| SourceState::new(now)).collect();
        let limiter = cfg
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let (phase, _) = watch::channel(Phase::Idle);

        Self {
            shared: Arc::new(Shared {
                cfg,
                sources,
                states: RwLock::new(states),
                observers: ObserverRegistry::new(),
                limiter,
                poll_now: Notify::new(),
                shutdown: CancellationToken::new(),
                phase,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerCfg {
        &self.shared.cfg
    }

    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.shared.sources
    }

    pub fn phase(&self) -> Phase {
        *self.shared.phase.borrow()
    }

    /// Current states, positionally aligned with [`Scheduler::sources`].
    pub fn states(&self) -> Arc<[SourceState]> {
        self.shared.current_states()
    }

    pub fn snapshot(&self) -> Vec<SourceSnapshot> {
        let states = self.shared.current_states();
        self.shared
            .sources
            .iter()
            .zip(states.iter())
            .map(|(source, state)| SourceSnapshot {
                source: Arc::clone(source),
                state: state.clone(),
            })
            .collect()
    }

    pub fn register_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        self.shared.observers.register(observer)
    }

    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.shared.observers.unregister(id)
    }

    /// Run a single round and return once every source reported.
    ///
    /// Only valid on an idle scheduler. The scheduler is `Running` for the
    /// duration of the round and returns to `Idle` afterwards, or to
    /// `Stopped` if [`Scheduler::stop`] was called meanwhile.
    pub async fn run_once(&self) -> Result<()> {
        self.shared.enter_running()?;
        let _phase = SingleRound(&self.shared);
        run_round(&self.shared, 1).await;
        Ok(())
    }

    /// Reset the error markers (`last_error_at`) of every source.
    /// Error counts are left alone: they describe the trailing run of
    /// results and reset on the next successful poll.
    pub fn clear_errors(&self) -> usize {
        let mut guard = self.shared.states.write().unwrap_or_else(|p| p.into_inner());
        let cleared = guard.iter().filter(|st| st.last_error_at.is_some()).count();
        if cleared > 0 {
            let next: Arc<[SourceState]> = guard
                .iter()
                .map(|st| SourceState {
                    last_error_at: None,
                    ..st.clone()
                })
                .collect();
            *guard = next;
        }
        cleared
    }

    /// Run rounds back to back until [`Scheduler::stop`] is called.
    pub async fn run_forever(&self) -> Result<()> {
        self.shared.enter_running()?;
        round_loop(Arc::clone(&self.shared)).await;
        Ok(())
    }

    /// Spawn the round loop as the scheduler's background task.
    pub fn start(&self) -> Result<()> {
        self.shared.enter_running()?;
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(round_loop(shared));
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    /// Skip the current (or next) inter-round wait. Never blocks.
    pub fn poll_now(&self) {
        tracing::debug!(target: "scan", "poll-now requested");
        self.shared.poll_now.notify_one();
    }

    /// Stop the round loop and wait until it has fully exited.
    ///
    /// Idempotent. On a scheduler that was never started this only moves it
    /// to `Stopped`.
    pub async fn stop(&self) {
        let mut was_idle = false;
        self.shared.phase.send_if_modified(|p| match *p {
            Phase::Idle => {
                was_idle = true;
                *p = Phase::Stopped;
                true
            }
            Phase::Running => {
                *p = Phase::Stopping;
                true
            }
            Phase::Stopping | Phase::Stopped => false,
        });
        self.shared.shutdown.cancel();

        if !was_idle {
            let mut rx = self.shared.phase.subscribe();
            // Sender lives in `shared`, so the channel cannot close under us.
            let _ = rx.wait_for(|p| *p == Phase::Stopped).await;
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(target: "scan", error = %e, "scheduler task failed");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Do not leave a detached loop polling forever.
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("cfg", &self.shared.cfg)
            .field("sources", &self.shared.sources.len())
            .field("observers", &self.shared.observers.len())
            .field("phase", &self.phase())
            .finish()
    }
}

impl Shared {
    fn current_states(&self) -> Arc<[SourceState]> {
        Arc::clone(&self.states.read().unwrap_or_else(|p| p.into_inner()))
    }

    fn enter_running(&self) -> Result<()> {
        let mut current = Phase::Idle;
        let entered = self.phase.send_if_modified(|p| {
            current = *p;
            if *p == Phase::Idle {
                *p = Phase::Running;
                true
            } else {
                false
            }
        });
        if !entered {
            bail!("scheduler cannot start from phase {current:?}");
        }
        Ok(())
    }

    /// Fold `result` into the state of source `index` and notify observers.
    fn complete(&self, index: usize, result: PollResult) {
        counter!("scan_polls_total").increment(1);
        if let Some(err) = result.error() {
            counter!("scan_poll_errors_total").increment(1);
            tracing::warn!(
                target: "scan",
                source = self.sources[index].name(),
                index,
                error = %err,
                "poll failed"
            );
        }

        let next = {
            let mut guard = self.states.write().unwrap_or_else(|p| p.into_inner());
            let mut states: Vec<SourceState> = guard.iter().cloned().collect();
            states[index] = states[index].advance(result);
            let next = states[index].clone();
            *guard = states.into();
            next
        };

        let event = PollEvent {
            index,
            source: self.sources[index].as_ref(),
            result: &next.last_result,
            last_stock: next.last_stock,
            consecutive_errors: next.consecutive_errors,
        };
        self.observers.dispatch(&event);
    }
}

async fn round_loop(shared: Arc<Shared>) {
    tracing::info!(
        target: "scan",
        sources = shared.sources.len(),
        interval_ms = shared.cfg.interval.as_millis() as u64,
        "scheduler started"
    );

    let mut round: u64 = 0;
    while !shared.shutdown.is_cancelled() {
        round += 1;
        let started = Instant::now();
        if let RoundEnd::Interrupted = run_round(&shared, round).await {
            break;
        }

        let elapsed = started.elapsed();
        if elapsed < shared.cfg.interval {
            tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                _ = shared.poll_now.notified() => {
                    tracing::debug!(target: "scan", round, "wait interrupted by poll-now");
                }
                _ = tokio::time::sleep(shared.cfg.interval - elapsed) => {}
            }
        }
    }

    shared.phase.send_replace(Phase::Stopped);
    tracing::info!(target: "scan", rounds = round, "scheduler stopped");
}

async fn run_round(shared: &Shared, round: u64) -> RoundEnd {
    let started = Instant::now();
    let mut set = JoinSet::new();
    let mut index_of = HashMap::with_capacity(shared.sources.len());

    for (index, source) in shared.sources.iter().enumerate() {
        let source = Arc::clone(source);
        let limiter = shared.limiter.clone();
        let timeout = shared.cfg.poll_timeout;
        let handle = set.spawn(async move {
            let _permit = match limiter {
                Some(sem) => Some(sem.acquire_owned().await),
                None => None,
            };
            poll_source(source.as_ref(), timeout).await
        });
        index_of.insert(handle.id(), index);
    }

    loop {
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                set.abort_all();
                while set.join_next().await.is_some() {}
                tracing::debug!(target: "scan", round, "round cancelled by shutdown");
                return RoundEnd::Interrupted;
            }
            joined = set.join_next_with_id() => match joined {
                None => break,
                Some(Ok((id, result))) => {
                    if let Some(&index) = index_of.get(&id) {
                        shared.complete(index, result);
                    }
                }
                Some(Err(e)) if e.is_cancelled() => {}
                Some(Err(e)) => {
                    let Some(&index) = index_of.get(&e.id()) else { continue };
                    let msg = if e.is_panic() {
                        format!("poll panicked: {}", panic_message(e.into_panic().as_ref()))
                    } else {
                        format!("poll task failed: {e}")
                    };
                    shared.complete(index, PollResult::failed(anyhow!(msg)));
                }
            }
        }
    }

    let ms = started.elapsed().as_secs_f64() * 1_000.0;
    counter!("scan_rounds_total").increment(1);
    histogram!("scan_round_duration_ms").record(ms);
    gauge!("scan_last_round_ts").set(Utc::now().timestamp() as f64);
    tracing::debug!(target: "scan", round, elapsed_ms = ms as u64, "round complete");
    RoundEnd::Completed
}

async fn poll_source(source: &dyn Source, timeout: Option<Duration>) -> PollResult {
    match timeout {
        None => source.poll().await,
        Some(limit) => match tokio::time::timeout(limit, source.poll()).await {
            Ok(res) => res,
            Err(_) => PollResult::failed(anyhow!("poll timed out after {limit:?}")),
        },
    }
}
