use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{AgentOutcome, ProgressSnapshot, SimulationId, SimulationRequest};
use shared::protocol::{SimulationProgressResponse, STATUS_COMPLETED, STATUS_RUNNING};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

pub mod aggregate;
mod http;

pub use http::HttpJobService;

/// Interval between progress polls for a running simulation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Remote simulation service as the controller consumes it. The production
/// implementation is [`HttpJobService`]; tests script their own.
#[async_trait]
pub trait RemoteJobService: Send + Sync {
    /// Submits a simulation request, returning the id the service assigned.
    async fn submit(&self, request: &SimulationRequest) -> Result<SimulationId>;

    /// Fetches the current progress report for a submitted simulation.
    async fn fetch_progress(
        &self,
        simulation_id: &SimulationId,
    ) -> Result<SimulationProgressResponse>;

    /// Fetches the final agent outcomes for a completed simulation.
    async fn fetch_results(&self, simulation_id: &SimulationId) -> Result<Vec<AgentOutcome>>;
}

/// Persistence seam for completed runs. The sqlite-backed store in the
/// `storage` crate implements this.
#[async_trait]
pub trait ResultsStore: Send + Sync {
    async fn save_outcomes(&self, outcomes: &[AgentOutcome]) -> Result<()>;
}

/// Where a job currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobPhase {
    #[default]
    Idle,
    Submitting,
    Polling,
    FetchingResults,
    Completed,
    Failed,
}

/// Why a job ended without reaching [`JobPhase::Completed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("simulation submission failed: {0}")]
    SubmissionFailed(String),
    #[error("progress polling failed: {0}")]
    PollingFailed(String),
    #[error("unexpected simulation status {0:?}")]
    UnexpectedStatus(String),
    #[error("results fetch failed: {0}")]
    ResultsFetchFailed(String),
}

/// Notifications emitted as a job moves through its lifecycle.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Submitted { simulation_id: SimulationId },
    Progress { snapshot: ProgressSnapshot, percent: f64 },
    FetchingResults,
    Completed { agent_count: usize },
    Failed { error: JobError },
}

/// Point-in-time snapshot of the controller's observable state.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub phase: JobPhase,
    pub simulation_id: Option<SimulationId>,
    pub progress: Option<ProgressSnapshot>,
    pub percent: f64,
    pub last_error: Option<JobError>,
    pub simulation_completed: bool,
}

#[derive(Default)]
struct ControllerState {
    /// Runs are numbered so a late response from a cancelled or superseded
    /// run is recognized and dropped before it can touch newer state.
    epoch: u64,
    /// True from submission until the run reaches a terminal phase or is
    /// cancelled.
    active: bool,
    phase: JobPhase,
    simulation_id: Option<SimulationId>,
    progress: Option<ProgressSnapshot>,
    percent: f64,
    last_error: Option<JobError>,
    simulation_completed: bool,
    poll_task: Option<JoinHandle<()>>,
}

/// Drives a persona simulation from submission through polling to stored
/// results.
///
/// One job runs at a time: [`start`](Self::start) while a job is in flight is
/// a no-op, and [`cancel`](Self::cancel) stops polling without waiting for
/// the service. All transitions are epoch-guarded, so responses that arrive
/// after a cancel or a newer start are discarded rather than applied.
pub struct SimulationController {
    service: Arc<dyn RemoteJobService>,
    store: Arc<dyn ResultsStore>,
    poll_interval: Duration,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<JobEvent>,
}

impl SimulationController {
    pub fn new(service: Arc<dyn RemoteJobService>, store: Arc<dyn ResultsStore>) -> Arc<Self> {
        Self::with_poll_interval(service, store, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        service: Arc<dyn RemoteJobService>,
        store: Arc<dyn ResultsStore>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            service,
            store,
            poll_interval,
            inner: Mutex::new(ControllerState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> JobStatus {
        let state = self.inner.lock().await;
        JobStatus {
            phase: state.phase,
            simulation_id: state.simulation_id.clone(),
            progress: state.progress,
            percent: state.percent,
            last_error: state.last_error.clone(),
            simulation_completed: state.simulation_completed,
        }
    }

    pub async fn simulation_completed(&self) -> bool {
        self.inner.lock().await.simulation_completed
    }

    /// Submits a new simulation and starts polling its progress.
    ///
    /// Returns `Ok(false)` without touching any state while a job is already
    /// in flight, `Ok(true)` once the submission was accepted and the poll
    /// timer is running. A rejected submission is returned as
    /// [`JobError::SubmissionFailed`] and stays readable through
    /// [`status`](Self::status) until the next start.
    pub async fn start(self: &Arc<Self>, request: SimulationRequest) -> Result<bool, JobError> {
        let epoch = {
            let mut state = self.inner.lock().await;
            if state.active {
                debug!("job: start ignored, a simulation is already in flight");
                return Ok(false);
            }
            if let Some(task) = state.poll_task.take() {
                task.abort();
            }
            state.epoch += 1;
            state.active = true;
            state.phase = JobPhase::Submitting;
            state.simulation_id = None;
            state.progress = None;
            state.percent = 0.0;
            state.last_error = None;
            state.simulation_completed = false;
            state.epoch
        };

        info!(scenario = %request.scenario, "job: submitting simulation");
        let submitted = self.service.submit(&request).await;

        let mut state = self.inner.lock().await;
        if !state.active || state.epoch != epoch {
            debug!("job: dropping submission response from a superseded run");
            return Ok(false);
        }

        let simulation_id = match submitted {
            Ok(simulation_id) => simulation_id,
            Err(err) => {
                let error = JobError::SubmissionFailed(err.to_string());
                state.phase = JobPhase::Failed;
                state.active = false;
                state.last_error = Some(error.clone());
                drop(state);
                warn!(error = %error, "job: submission rejected");
                let _ = self.events.send(JobEvent::Failed { error: error.clone() });
                return Err(error);
            }
        };

        state.simulation_id = Some(simulation_id.clone());
        state.phase = JobPhase::Polling;
        let controller = Arc::clone(self);
        let poll_id = simulation_id.clone();
        state.poll_task = Some(tokio::spawn(async move {
            controller.poll_until_terminal(epoch, poll_id).await;
        }));
        drop(state);

        info!(simulation_id = %simulation_id, "job: submission accepted, polling started");
        let _ = self.events.send(JobEvent::Submitted { simulation_id });
        Ok(true)
    }

    /// Stops polling and invalidates every in-flight request for the current
    /// run. Safe to call repeatedly and in any phase; observable state stays
    /// whatever it was when the cancel landed.
    pub async fn cancel(&self) {
        let mut state = self.inner.lock().await;
        state.epoch += 1;
        state.active = false;
        if let Some(task) = state.poll_task.take() {
            task.abort();
            info!("job: polling cancelled");
        }
    }

    async fn poll_until_terminal(self: Arc<Self>, epoch: u64, simulation_id: SimulationId) {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // a tokio interval yields its first tick immediately; consume it so
        // the first poll lands one full interval after submission
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !self.run_is_current(epoch).await {
                return;
            }

            let report = match self.service.fetch_progress(&simulation_id).await {
                Ok(report) => report,
                Err(err) => {
                    self.fail(epoch, JobError::PollingFailed(err.to_string())).await;
                    return;
                }
            };

            match report.status.as_str() {
                STATUS_RUNNING => {
                    let snapshot = ProgressSnapshot {
                        completed: report.completed.unwrap_or(0),
                        total: report.total.unwrap_or(0),
                    };
                    self.update_progress(epoch, snapshot).await;
                }
                STATUS_COMPLETED => {
                    // leave the loop before fetching so no further tick can
                    // fire while results are in flight
                    self.finish(epoch, &simulation_id).await;
                    return;
                }
                other => {
                    warn!(simulation_id = %simulation_id, status = %other, "job: unexpected progress status");
                    self.fail(epoch, JobError::UnexpectedStatus(other.to_string())).await;
                    return;
                }
            }
        }
    }

    async fn run_is_current(&self, epoch: u64) -> bool {
        let state = self.inner.lock().await;
        state.active && state.epoch == epoch
    }

    async fn update_progress(&self, epoch: u64, snapshot: ProgressSnapshot) {
        let percent = snapshot.percent();
        {
            let mut state = self.inner.lock().await;
            if !state.active || state.epoch != epoch {
                return;
            }
            state.progress = Some(snapshot);
            state.percent = percent;
        }
        debug!(completed = snapshot.completed, total = snapshot.total, "job: progress update");
        let _ = self.events.send(JobEvent::Progress { snapshot, percent });
    }

    async fn finish(&self, epoch: u64, simulation_id: &SimulationId) {
        {
            let mut state = self.inner.lock().await;
            if !state.active || state.epoch != epoch {
                return;
            }
            state.percent = 100.0;
            state.phase = JobPhase::FetchingResults;
            state.poll_task = None;
        }
        info!(simulation_id = %simulation_id, "job: simulation complete, fetching results");
        let _ = self.events.send(JobEvent::FetchingResults);

        let outcomes = match self.service.fetch_results(simulation_id).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                self.fail(epoch, JobError::ResultsFetchFailed(err.to_string())).await;
                return;
            }
        };

        // a cancel or a newer start during the fetch supersedes this run;
        // its late results must stay out of the store
        if !self.run_is_current(epoch).await {
            debug!(simulation_id = %simulation_id, "job: dropping results from a superseded run");
            return;
        }

        if let Err(err) = self.store.save_outcomes(&outcomes).await {
            let error =
                JobError::ResultsFetchFailed(format!("failed to persist results: {err}"));
            self.fail(epoch, error).await;
            return;
        }

        {
            let mut state = self.inner.lock().await;
            if !state.active || state.epoch != epoch {
                return;
            }
            state.phase = JobPhase::Completed;
            state.active = false;
            state.simulation_completed = true;
        }
        info!(simulation_id = %simulation_id, agent_count = outcomes.len(), "job: results stored");
        let _ = self.events.send(JobEvent::Completed {
            agent_count: outcomes.len(),
        });
    }

    async fn fail(&self, epoch: u64, error: JobError) {
        {
            let mut state = self.inner.lock().await;
            if !state.active || state.epoch != epoch {
                debug!(error = %error, "job: dropping failure from a superseded run");
                return;
            }
            state.phase = JobPhase::Failed;
            state.active = false;
            state.last_error = Some(error.clone());
            state.poll_task = None;
        }
        warn!(error = %error, "job: run failed");
        let _ = self.events.send(JobEvent::Failed { error });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
