//! Job dispatch onto a bounded worker pool.
//!
//! Every dispatched job becomes a task on a [`JoinSet`] that first takes a
//! permit from a [`Semaphore`] sized to the worker count. Workers never
//! touch scheduling state; they report a [`Completion`] over an unbounded
//! channel which the controlling task drains.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use strata_core::{TableReferenceMapping, ViewKey};
use strata_plan::View;
use strata_storage::Backend;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// What a job does
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Nothing; dry runs and cache hits
    NoOp,
    /// Render the view and hand it back for display
    Display(View),
    /// Render the view and materialize it through the backend
    Materialize(View),
}

/// Result of a job
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The job did its work
    Succeeded,
    /// The rendered view, for display
    Rendered(View),
    /// The job failed with this message
    Failed(String),
}

/// A finished job
#[derive(Debug, Clone)]
pub struct Completion {
    /// View the job belonged to
    pub key: ViewKey,
    /// What happened
    pub outcome: JobOutcome,
}

/// Bounded pool of jobs
pub struct Executor {
    backend: Arc<dyn Backend>,
    mapping: Arc<TableReferenceMapping>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    tx: UnboundedSender<Completion>,
    in_flight: usize,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("available_permits", &self.permits.available_permits())
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Create a pool of `threads` workers and the receiving end of its
    /// completion channel
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        mapping: Arc<TableReferenceMapping>,
        threads: usize,
    ) -> (Self, UnboundedReceiver<Completion>) {
        let (tx, rx) = unbounded_channel();
        let executor = Self {
            backend,
            mapping,
            permits: Arc::new(Semaphore::new(threads.max(1))),
            tasks: JoinSet::new(),
            tx,
            in_flight: 0,
        };
        (executor, rx)
    }

    /// Dispatch a job
    pub fn spawn(&mut self, key: ViewKey, kind: JobKind) {
        let backend = Arc::clone(&self.backend);
        let mapping = Arc::clone(&self.mapping);
        let permits = Arc::clone(&self.permits);
        let tx = self.tx.clone();
        self.in_flight += 1;

        self.tasks.spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => AssertUnwindSafe(run_job(backend.as_ref(), &mapping, kind))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| JobOutcome::Failed(panic_message(panic.as_ref()))),
                Err(_) => JobOutcome::Failed("worker pool closed".to_string()),
            };
            if tx.send(Completion { key, outcome }).is_err() {
                debug!("Completion receiver dropped");
            }
        });
    }

    /// Account for a received completion
    pub fn completed(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Jobs dispatched and not yet reported
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Wait for every spawned task to exit
    pub async fn shutdown(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Worker task join error");
            }
        }
    }
}

async fn run_job(backend: &dyn Backend, mapping: &TableReferenceMapping, kind: JobKind) -> JobOutcome {
    match kind {
        JobKind::NoOp => JobOutcome::Succeeded,
        JobKind::Display(view) => JobOutcome::Rendered(view.render(mapping)),
        JobKind::Materialize(view) => match backend.materialize(&view.render(mapping)).await {
            Ok(()) => JobOutcome::Succeeded,
            Err(e) => JobOutcome::Failed(e.to_string()),
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use strata_core::CoreResult;
    use strata_storage::{MemoryBackend, TableInfo};

    fn key(s: &str) -> ViewKey {
        ViewKey::parse(s).unwrap()
    }

    struct PanickingBackend;

    #[async_trait]
    impl Backend for PanickingBackend {
        async fn list_tables(&self) -> CoreResult<Vec<TableInfo>> {
            Ok(Vec::new())
        }
        async fn create_schema(&self, _schema: &str) -> CoreResult<()> {
            Ok(())
        }
        async fn materialize(&self, _view: &View) -> CoreResult<()> {
            panic!("engine exploded")
        }
        async fn delete(&self, _key: &ViewKey) -> CoreResult<()> {
            Ok(())
        }
        fn scope(&self) -> Option<&str> {
            None
        }
    }

    #[tokio::test]
    async fn test_materialize_renders_first() {
        let backend = Arc::new(MemoryBackend::new());
        let mapping: TableReferenceMapping =
            [("raw.orders".to_string(), "raw_max.orders".to_string())].into_iter().collect();
        let (mut executor, mut rx) = Executor::new(backend.clone(), Arc::new(mapping), 2);

        let view = View::query(key("core.orders"), "o.sql", "SELECT * FROM raw.orders");
        executor.spawn(key("core.orders"), JobKind::Materialize(view));
        let completion = rx.recv().await.unwrap();
        executor.completed();
        executor.shutdown().await;

        assert!(matches!(completion.outcome, JobOutcome::Succeeded));
        assert_eq!(executor.in_flight(), 0);
        let table = backend.table("core.orders").unwrap();
        assert_eq!(table.definition, "SELECT * FROM raw_max.orders");
    }

    #[tokio::test]
    async fn test_display_returns_rendered_view() {
        let backend = Arc::new(MemoryBackend::new());
        let (mut executor, mut rx) = Executor::new(backend.clone(), Arc::default(), 1);
        let view = View::query(key("core.orders"), "o.sql", "SELECT 1");
        executor.spawn(key("core.orders"), JobKind::Display(view));

        let completion = rx.recv().await.unwrap();
        assert!(matches!(completion.outcome, JobOutcome::Rendered(_)));
        assert!(backend.materialized().is_empty());
    }

    #[tokio::test]
    async fn test_failure_and_panic_become_outcomes() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_on(key("core.orders"), "syntax error");
        let (mut executor, mut rx) = Executor::new(backend, Arc::default(), 1);
        executor.spawn(
            key("core.orders"),
            JobKind::Materialize(View::query(key("core.orders"), "o.sql", "SELECT 1")),
        );
        let completion = rx.recv().await.unwrap();
        assert!(matches!(completion.outcome, JobOutcome::Failed(ref m) if m.contains("syntax error")));

        let (mut executor, mut rx) = Executor::new(Arc::new(PanickingBackend), Arc::default(), 1);
        executor.spawn(
            key("core.orders"),
            JobKind::Materialize(View::query(key("core.orders"), "o.sql", "SELECT 1")),
        );
        let completion = rx.recv().await.unwrap();
        assert!(matches!(completion.outcome, JobOutcome::Failed(ref m) if m.contains("engine exploded")));
    }
}
