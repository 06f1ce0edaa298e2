use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};
use vibeload_common::{duration, LoadError, Result};
use vibeload_http::Transport;
use vibeload_metrics::{builtin, Metrics};

use crate::scenario::{HttpBuiltins, Scenario, VuContext};

pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub vus: usize,
    pub duration: Duration,
    pub sleep: Duration,
    pub graceful_stop: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub elapsed: Duration,
    pub iterations_per_vu: Vec<u64>,
    /// Iterations cut short once the graceful stop window closed.
    pub interrupted: u64,
    /// Virtual users whose task panicked.
    pub failed_vus: u64,
}

impl RunReport {
    pub fn total_iterations(&self) -> u64 {
        self.iterations_per_vu.iter().sum()
    }
}

/// Requests a graceful stop: no VU starts another iteration.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Default)]
struct VuState {
    completed: AtomicU64,
    busy: AtomicBool,
}

/// Virtual-user pool. Each VU runs iterations back to back until the
/// duration elapses or a stop is requested.
pub struct Runner {
    opts: RunOptions,
    transport: Arc<dyn Transport>,
    metrics: Metrics,
    stop: Arc<watch::Sender<bool>>,
}

impl Runner {
    pub fn new(opts: RunOptions, transport: Arc<dyn Transport>, metrics: Metrics) -> Result<Self> {
        if opts.vus == 0 {
            return Err(LoadError::Config("vus must be at least 1".into()));
        }
        if opts.duration.is_zero() {
            return Err(LoadError::Config("duration must be greater than zero".into()));
        }
        if opts
            .duration
            .checked_add(opts.graceful_stop)
            .and_then(|d| Instant::now().checked_add(d))
            .is_none()
        {
            return Err(LoadError::Config("duration plus graceful stop is out of range".into()));
        }
        let (tx, _rx) = watch::channel(false);
        Ok(Self { opts, transport, metrics, stop: Arc::new(tx) })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { tx: self.stop.clone() }
    }

    pub async fn run(self, scenario: Arc<dyn Scenario>) -> Result<RunReport> {
        let http = HttpBuiltins::new(&self.metrics)?;
        let iterations = self.metrics.counter(builtin::ITERATIONS)?;
        let iteration_duration = self.metrics.trend(builtin::ITERATION_DURATION)?;

        tracing::info!(
            target: "runner",
            "starting `{}`: {} VUs for {}, pause {}",
            scenario.name(),
            self.opts.vus,
            duration::format(self.opts.duration),
            duration::format(self.opts.sleep)
        );

        let start = Instant::now();
        let deadline = start
            .checked_add(self.opts.duration)
            .ok_or_else(|| LoadError::Config("duration is out of range".into()))?;
        let mut vus = Vec::with_capacity(self.opts.vus);
        for vu in 1..=self.opts.vus {
            let state = Arc::new(VuState::default());
            let st = state.clone();
            let scenario = scenario.clone();
            let stop_rx = self.stop.subscribe();
            let iterations = iterations.clone();
            let iteration_duration = iteration_duration.clone();
            let mut ctx = VuContext::new(vu, self.transport.clone(), self.metrics.clone(), http.clone(), self.opts.sleep);
            let handle = tokio::spawn(async move {
                loop {
                    let stopped = *stop_rx.borrow();
                    if stopped || Instant::now() >= deadline {
                        break;
                    }
                    st.busy.store(true, Ordering::SeqCst);
                    let began = Instant::now();
                    scenario.iteration(&ctx).await;
                    iteration_duration.add_duration(began.elapsed());
                    iterations.inc();
                    ctx.iteration += 1;
                    st.completed.fetch_add(1, Ordering::Relaxed);
                    st.busy.store(false, Ordering::SeqCst);
                    // zero-pause scenarios against an instant transport never yield otherwise
                    tokio::task::yield_now().await;
                }
            });
            vus.push((handle, state));
        }

        let mut stop_rx = self.stop.subscribe();
        tokio::select! {
            _ = time::sleep_until(deadline) => {}
            _ = stop_rx.wait_for(|stopped| *stopped) => {
                tracing::info!(target: "runner", "stop requested, finishing in-flight iterations");
            }
        }
        self.stop.send_replace(true);

        let hard_stop = Instant::now()
            .checked_add(self.opts.graceful_stop)
            .ok_or_else(|| LoadError::Config("graceful stop is out of range".into()))?;
        let mut interrupted = 0;
        let mut failed = 0;
        let mut iterations_per_vu = Vec::with_capacity(vus.len());
        for (vu, (mut handle, state)) in vus.into_iter().enumerate() {
            match time::timeout_at(hard_stop, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // panicked, not interrupted
                    state.busy.store(false, Ordering::SeqCst);
                    failed += 1;
                    tracing::error!(target: "runner", vu = vu + 1, "virtual user failed: {}", e);
                }
                Err(_) => {
                    handle.abort();
                    let _ = handle.await;
                }
            }
            if state.busy.load(Ordering::SeqCst) {
                interrupted += 1;
            }
            iterations_per_vu.push(state.completed.load(Ordering::Relaxed));
        }
        if interrupted > 0 {
            tracing::warn!(
                target: "runner",
                "{} iterations interrupted after graceful stop of {}",
                interrupted,
                duration::format(self.opts.graceful_stop)
            );
        }

        let report = RunReport { elapsed: start.elapsed(), iterations_per_vu, interrupted, failed_vus: failed };
        tracing::info!(
            target: "runner",
            "finished `{}` in {:.2}s: {} iterations",
            scenario.name(),
            report.elapsed.as_secs_f64(),
            report.total_iterations()
        );
        Ok(report)
    }
}
