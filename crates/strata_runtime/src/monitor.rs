//! Job bookkeeping for a run.
//!
//! Tracks the status and timing of every job, produces the progress table
//! shown while a run is in flight, and the report handed back at the end.

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strata_core::{RunId, ViewKey};
use strata_plan::View;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, not started
    Pending,
    /// Dispatched to the pool
    Running,
    /// Finished without error
    Succeeded,
    /// Finished with an error
    Errored,
    /// Not run because an upstream view failed or was skipped
    Skipped,
}

impl JobStatus {
    /// Whether the status is final
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Errored | Self::Skipped)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCESS"),
            Self::Errored => write!(f, "ERRORED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// One view's job within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job status
    pub status: JobStatus,
    /// Whether the job was a cache hit
    pub cached: bool,
    /// Dispatch time
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time
    pub ended_at: Option<DateTime<Utc>>,
    /// Error message, when errored
    pub error: Option<String>,
}

impl Job {
    fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            cached: false,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    /// Wall time of the job; running jobs are measured up to `now`
    #[must_use]
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        match self.started_at {
            Some(start) => (self.ended_at.unwrap_or(now) - start)
                .to_std()
                .unwrap_or_default(),
            None => Duration::ZERO,
        }
    }
}

/// A row of the progress table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRow {
    /// Position in execution order, starting at 1
    pub index: usize,
    /// View
    pub key: ViewKey,
    /// Current status
    pub status: JobStatus,
    /// Duration rounded to whole seconds
    pub seconds: u64,
}

/// Per-run job tracker
#[derive(Debug, Default)]
pub struct Monitor {
    jobs: IndexMap<ViewKey, Job>,
    completion_order: Vec<ViewKey>,
    errored: usize,
}

impl Monitor {
    /// Create an empty monitor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatch
    pub fn start(&mut self, key: &ViewKey, cached: bool) {
        let job = self.transition(key, JobStatus::Running);
        job.cached = cached;
        job.started_at = Some(Utc::now());
    }

    /// Record a completion; `error` marks the job errored
    pub fn finish(&mut self, key: &ViewKey, error: Option<String>) {
        let status = if error.is_some() {
            JobStatus::Errored
        } else {
            JobStatus::Succeeded
        };
        let job = self.transition(key, status);
        job.ended_at = Some(Utc::now());
        job.error = error;
        self.completion_order.push(key.clone());
    }

    /// Record a skip
    pub fn skip(&mut self, key: &ViewKey) {
        self.transition(key, JobStatus::Skipped);
        self.completion_order.push(key.clone());
    }

    fn transition(&mut self, key: &ViewKey, status: JobStatus) -> &mut Job {
        let job = self.jobs.entry(key.clone()).or_insert_with(Job::pending);
        match (job.status == JobStatus::Errored, status == JobStatus::Errored) {
            (false, true) => self.errored += 1,
            (true, false) => self.errored -= 1,
            _ => {}
        }
        job.status = status;
        job
    }

    /// Status of a key, if it has a job
    #[must_use]
    pub fn status(&self, key: &ViewKey) -> Option<JobStatus> {
        self.jobs.get(key).map(|j| j.status)
    }

    /// Whether the key errored or was skipped
    #[must_use]
    pub fn is_poisoned(&self, key: &ViewKey) -> bool {
        matches!(
            self.status(key),
            Some(JobStatus::Errored | JobStatus::Skipped)
        )
    }

    /// Whether any job errored
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.errored > 0
    }

    /// Jobs in dispatch order
    #[must_use]
    pub fn jobs(&self) -> &IndexMap<ViewKey, Job> {
        &self.jobs
    }

    /// The last `show` rows of the progress table.
    ///
    /// Cache hits are left out; everything else appears in the order it
    /// was dispatched or skipped.
    #[must_use]
    pub fn progress_rows(&self, show: usize) -> Vec<ProgressRow> {
        let now = Utc::now();
        let rows: Vec<ProgressRow> = self
            .jobs
            .iter()
            .filter(|(_, job)| !job.cached)
            .enumerate()
            .map(|(i, (key, job))| ProgressRow {
                index: i + 1,
                key: key.clone(),
                status: job.status,
                seconds: job.duration(now).as_secs_f64().round() as u64,
            })
            .collect();
        let skip = rows.len().saturating_sub(show);
        rows.into_iter().skip(skip).collect()
    }

    /// Close the run and build its report
    #[must_use]
    pub fn into_report(
        self,
        run_id: RunId,
        excluded: usize,
        orphans: Vec<ViewKey>,
        elapsed: Duration,
    ) -> RunReport {
        RunReport {
            run_id,
            jobs: self.jobs,
            completion_order: self.completion_order,
            excluded,
            orphans,
            elapsed,
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,
    /// Every job, in dispatch order
    pub jobs: IndexMap<ViewKey, Job>,
    /// Keys in the order they reached a terminal status
    pub completion_order: Vec<ViewKey>,
    /// Number of managed views outside the selection
    pub excluded: usize,
    /// Tables without a managed view; deleted unless the run was dry
    pub orphans: Vec<ViewKey>,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl RunReport {
    fn with_status(&self, status: JobStatus) -> impl Iterator<Item = (&ViewKey, &Job)> {
        self.jobs.iter().filter(move |(_, j)| j.status == status)
    }

    /// Keys that succeeded, cache hits included
    #[must_use]
    pub fn succeeded(&self) -> IndexSet<ViewKey> {
        self.with_status(JobStatus::Succeeded)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Keys that were actually built (or displayed)
    #[must_use]
    pub fn built(&self) -> IndexSet<ViewKey> {
        self.with_status(JobStatus::Succeeded)
            .filter(|(_, j)| !j.cached)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Keys served from the cache
    #[must_use]
    pub fn cached(&self) -> IndexSet<ViewKey> {
        self.jobs
            .iter()
            .filter(|(_, j)| j.cached)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Errored keys with their messages
    #[must_use]
    pub fn errored(&self) -> Vec<(&ViewKey, &str)> {
        self.with_status(JobStatus::Errored)
            .map(|(k, j)| (k, j.error.as_deref().unwrap_or_default()))
            .collect()
    }

    /// Skipped keys
    #[must_use]
    pub fn skipped(&self) -> IndexSet<ViewKey> {
        self.with_status(JobStatus::Skipped)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Errored and skipped keys
    #[must_use]
    pub fn failed_or_skipped(&self) -> IndexSet<ViewKey> {
        self.jobs
            .iter()
            .filter(|(_, j)| matches!(j.status, JobStatus::Errored | JobStatus::Skipped))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// True when nothing errored or was skipped
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.jobs
            .values()
            .all(|j| !matches!(j.status, JobStatus::Errored | JobStatus::Skipped))
    }
}

/// Receives run progress.
///
/// Called from the controlling task only, so implementations need no
/// synchronization.
pub trait RunObserver: Send {
    /// The progress table changed or a poll interval passed
    fn on_progress(&mut self, _rows: &[ProgressRow]) {}

    /// A rendered view produced by a print-only run
    fn on_render(&mut self, _view: &View) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl RunObserver for NullObserver {}
