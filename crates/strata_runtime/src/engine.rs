//! Execution engine for view DAGs.
//!
//! A single controlling task owns the DAG's scheduling state. Each cycle it
//! hands newly ready views to the worker pool (or skips them), then waits
//! up to one poll interval for completions. Around the drain it reconciles
//! orphan tables and loads and saves the resumable cache.

use crate::executor::{Completion, Executor, JobKind, JobOutcome};
use crate::mapping::make_table_reference_mapping;
use crate::monitor::{Monitor, RunObserver, RunReport};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{CoreError, CoreResult, RunId, ViewKey};
use strata_plan::{Dag, without_reserved};
use strata_storage::{Backend, CacheStore, next_cache};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Selection patterns; empty selects every view
    pub select: Vec<String>,
    /// Only redirect selected views into the scoped namespace
    pub freeze_unselected: bool,
    /// Render and display views instead of materializing them
    pub print_views: bool,
    /// Walk the graph without doing any work
    pub dry_run: bool,
    /// Suppress progress reporting
    pub silent: bool,
    /// Ignore the cache left by a previous run
    pub fresh: bool,
    /// Maximum concurrent jobs
    pub threads: usize,
    /// Number of progress rows to report
    pub show: usize,
    /// Fail the run when any view errored
    pub fail_fast: bool,
    /// How long to wait for completions before refreshing progress
    pub poll_interval: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            select: Vec::new(),
            freeze_unselected: false,
            print_views: false,
            dry_run: false,
            silent: false,
            fresh: false,
            threads: 8,
            show: 20,
            fail_fast: false,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl RunConfig {
    /// Set selection patterns
    #[must_use]
    pub fn with_select<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set freeze-unselected
    #[must_use]
    pub fn with_freeze_unselected(mut self, freeze: bool) -> Self {
        self.freeze_unselected = freeze;
        self
    }

    /// Set print-only mode
    #[must_use]
    pub fn with_print_views(mut self, print: bool) -> Self {
        self.print_views = print;
        self
    }

    /// Set dry-run mode
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set silent mode
    #[must_use]
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Ignore the existing cache
    #[must_use]
    pub fn with_fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    /// Set the worker count
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the number of progress rows
    #[must_use]
    pub fn with_show(mut self, show: usize) -> Self {
        self.show = show;
        self
    }

    /// Set fail-fast
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether the run writes to the store and the cache
    #[must_use]
    pub const fn mutates(&self) -> bool {
        !self.dry_run && !self.print_views
    }
}

/// Run failure
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The run could not start or the scheduler broke down
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Views errored and fail-fast is on
    #[error("{count} view(s) failed")]
    ViewsFailed {
        /// Number of errored views
        count: usize,
        /// Report of the finished run
        report: Box<RunReport>,
    },
}

impl RunError {
    /// Report of the finished run, when it got that far
    #[must_use]
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::ViewsFailed { report, .. } => Some(report),
            Self::Core(_) => None,
        }
    }
}

/// Execution engine
pub struct ExecutionEngine {
    backend: Arc<dyn Backend>,
    cache: CacheStore,
    config: RunConfig,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("scope", &self.backend.scope())
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

impl ExecutionEngine {
    /// Create an engine
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, cache: CacheStore, config: RunConfig) -> Self {
        Self {
            backend,
            cache,
            config,
        }
    }

    /// Run configuration
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Backend in use
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Cache store in use
    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Open the views under `dir` and build their graph, leaving out the
    /// reserved schemas
    ///
    /// # Errors
    ///
    /// Returns error if discovery fails or the graph is invalid
    pub async fn load_dag(&self, dir: &Path) -> CoreResult<Dag> {
        let views = without_reserved(self.backend.open_views(dir).await?);
        Dag::from_views(views)
    }

    /// Run the graph to completion
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Core`] if the selection, backend or cache fails
    /// before or after the drain, and [`RunError::ViewsFailed`] when
    /// fail-fast is on and a view errored
    pub async fn run(
        &self,
        dag: &mut Dag,
        observer: &mut dyn RunObserver,
    ) -> Result<RunReport, RunError> {
        let run_id = RunId::new();
        let span = info_span!("run", run_id = %run_id);
        self.run_inner(run_id, dag, observer).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: RunId,
        dag: &mut Dag,
        observer: &mut dyn RunObserver,
    ) -> Result<RunReport, RunError> {
        if self.config.threads == 0 {
            return Err(CoreError::Validation {
                field: "threads".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        let started = Instant::now();
        let selected = dag.select(&self.config.select)?;
        let excluded = dag.len() - selected.len();
        info!(
            views = dag.len(),
            selected = selected.len(),
            dry_run = self.config.dry_run,
            print_views = self.config.print_views,
            "Starting run"
        );

        if self.config.freeze_unselected && self.config.select.is_empty() {
            warn!(
                "Freezing unselected views without a selection; every view is selected and nothing stays frozen"
            );
        }
        let mapping = make_table_reference_mapping(
            dag,
            self.backend.as_ref(),
            &selected,
            self.config.freeze_unselected,
        );
        let orphans = self.remove_orphans(dag).await?;
        if self.config.mutates() {
            self.create_schemas(&selected).await?;
        }
        let cached = self.cache.load(self.config.fresh)?;
        if !cached.is_empty() {
            info!(count = cached.len(), "Resuming from cache");
        }

        let (executor, mut rx) = Executor::new(
            Arc::clone(&self.backend),
            Arc::new(mapping),
            self.config.threads,
        );
        let mut state = RunState {
            config: &self.config,
            selected,
            cached,
            monitor: Monitor::new(),
            executor,
        };

        dag.prepare();
        let drained = self.drain(dag, &mut state, &mut rx, observer).await;
        state.executor.shutdown().await;
        drained?;

        let report = state
            .monitor
            .into_report(run_id, excluded, orphans, started.elapsed());
        if self.config.mutates() {
            let next = next_cache(&state.cached, &report.succeeded(), &report.failed_or_skipped());
            self.cache.save(&next)?;
        }

        let errored = report.errored().len();
        info!(
            succeeded = report.built().len(),
            cached = report.cached().len(),
            errored,
            skipped = report.skipped().len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run finished"
        );

        if self.config.fail_fast && errored > 0 {
            return Err(RunError::ViewsFailed {
                count: errored,
                report: Box::new(report),
            });
        }
        Ok(report)
    }

    async fn drain(
        &self,
        dag: &mut Dag,
        state: &mut RunState<'_>,
        rx: &mut UnboundedReceiver<Completion>,
        observer: &mut dyn RunObserver,
    ) -> CoreResult<()> {
        loop {
            loop {
                let ready = dag.get_ready();
                if ready.is_empty() {
                    break;
                }
                for key in ready {
                    state.advance(dag, key)?;
                }
            }

            if !self.config.silent {
                observer.on_progress(&state.monitor.progress_rows(self.config.show));
            }
            if !dag.is_active() {
                return Ok(());
            }
            if state.executor.in_flight() == 0 {
                return Err(CoreError::Internal {
                    message: "scheduler stalled with no job in flight".to_string(),
                });
            }

            match tokio::time::timeout(self.config.poll_interval, rx.recv()).await {
                Ok(Some(completion)) => state.complete(dag, completion, observer)?,
                Ok(None) => {
                    return Err(CoreError::Internal {
                        message: "completion channel closed".to_string(),
                    });
                }
                Err(_) => {}
            }
            while let Ok(completion) = rx.try_recv() {
                state.complete(dag, completion, observer)?;
            }
        }
    }

    async fn remove_orphans(&self, dag: &Dag) -> CoreResult<Vec<ViewKey>> {
        let mut orphans = Vec::new();
        for table in self.backend.list_tables().await? {
            let key = match self.backend.view_key(&table.reference) {
                Ok(key) => key,
                Err(e) => {
                    debug!(reference = %table.reference, error = %e, "Ignoring unmanaged table");
                    continue;
                }
            };
            if dag.contains(&key) {
                continue;
            }
            if self.config.mutates() {
                self.backend.delete(&key).await?;
                info!(view = %key, "Deleted orphan table");
            } else {
                info!(view = %key, "Orphan table would be deleted");
            }
            orphans.push(key);
        }
        Ok(orphans)
    }

    async fn create_schemas(&self, selected: &IndexSet<ViewKey>) -> CoreResult<()> {
        let schemas: IndexSet<&str> = selected.iter().map(ViewKey::schema).collect();
        for schema in schemas {
            self.backend.create_schema(schema).await?;
        }
        Ok(())
    }
}

/// Per-run controller state
struct RunState<'a> {
    config: &'a RunConfig,
    selected: IndexSet<ViewKey>,
    cached: IndexSet<ViewKey>,
    monitor: Monitor,
    executor: Executor,
}

impl RunState<'_> {
    fn advance(&mut self, dag: &mut Dag, key: ViewKey) -> CoreResult<()> {
        if !self.selected.contains(&key) {
            return dag.done(&key);
        }

        let upstream_failed = dag
            .dependencies_of(&key)
            .is_some_and(|deps| deps.iter().any(|d| self.monitor.is_poisoned(d)));
        if upstream_failed {
            debug!(view = %key, "Skipping, an upstream view failed or was skipped");
            self.monitor.skip(&key);
            return dag.done(&key);
        }
        if self.config.fail_fast && self.monitor.has_errors() {
            debug!(view = %key, "Skipping, fail-fast tripped");
            self.monitor.skip(&key);
            return dag.done(&key);
        }

        let view = dag.get(&key).cloned().ok_or_else(|| CoreError::NotFound {
            kind: "View".to_string(),
            id: key.to_string(),
        })?;
        let cached = self.cached.contains(&key);
        let kind = if self.config.dry_run || cached {
            JobKind::NoOp
        } else if self.config.print_views {
            JobKind::Display(view)
        } else {
            JobKind::Materialize(view)
        };

        self.monitor.start(&key, cached);
        self.executor.spawn(key, kind);
        Ok(())
    }

    fn complete(
        &mut self,
        dag: &mut Dag,
        completion: Completion,
        observer: &mut dyn RunObserver,
    ) -> CoreResult<()> {
        self.executor.completed();
        let Completion { key, outcome } = completion;
        let error = match outcome {
            JobOutcome::Succeeded => None,
            JobOutcome::Rendered(view) => {
                observer.on_render(&view);
                None
            }
            JobOutcome::Failed(message) => {
                error!(view = %key, error = %message, "View failed");
                Some(message)
            }
        };
        if self.config.fail_fast && error.is_some() && !self.monitor.has_errors() {
            warn!("Fail-fast: no further views will be dispatched");
        }
        self.monitor.finish(&key, error);
        dag.done(&key)
    }
}
