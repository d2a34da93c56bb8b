//! STRATA CLI
//!
//! Builds a directory of SQL and script views into a local catalog.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod output;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use std::path::PathBuf;
use std::sync::Arc;
use strata_plan::{Dag, discover, without_reserved};
use strata_runtime::{ExecutionEngine, RunConfig, RunError};
use strata_storage::{CacheStore, DEFAULT_CACHE_PATH, LocalBackend, LocalBackendConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "STRATA - build SQL and script views in dependency order", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CatalogArgs {
    /// Catalog file
    #[arg(long, env = "STRATA_CATALOG", default_value = "strata.redb")]
    catalog: PathBuf,
    /// Environment scope; tables are built into `<schema>_<username>`
    #[arg(long, env = "STRATA_USERNAME")]
    username: Option<String>,
}

impl CatalogArgs {
    fn config(&self) -> LocalBackendConfig {
        let config = LocalBackendConfig::new(&self.catalog);
        match &self.username {
            Some(username) => config.with_scope(username),
            None => config,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build views
    Run {
        /// Views directory
        #[arg(default_value = "views")]
        views: PathBuf,
        /// Selection patterns (repeatable)
        #[arg(short, long = "select")]
        select: Vec<String>,
        /// Read unselected views from their production tables
        #[arg(long)]
        freeze_unselected: bool,
        /// Print rendered views instead of building them
        #[arg(long)]
        print: bool,
        /// Walk the graph without building anything
        #[arg(long)]
        dry: bool,
        /// Only print errors
        #[arg(long)]
        silent: bool,
        /// Ignore the cache of the previous run
        #[arg(long)]
        fresh: bool,
        /// Concurrent jobs
        #[arg(long, default_value_t = 8)]
        threads: usize,
        /// Progress rows to display
        #[arg(long, default_value_t = 20)]
        show: usize,
        /// Exit with an error when any view fails
        #[arg(long)]
        fail_fast: bool,
        /// Cache file
        #[arg(long, default_value = DEFAULT_CACHE_PATH)]
        cache: PathBuf,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        catalog: CatalogArgs,
    },
    /// List views in build order
    Plan {
        /// Views directory
        #[arg(default_value = "views")]
        views: PathBuf,
        /// Selection patterns (repeatable)
        #[arg(short, long = "select")]
        select: Vec<String>,
    },
    /// Remove the catalog of a scope
    Teardown {
        #[command(flatten)]
        catalog: CatalogArgs,
    },
}

fn init_tracing(silent: bool) {
    let default = if silent { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            views,
            select,
            freeze_unselected,
            print,
            dry,
            silent,
            fresh,
            threads,
            show,
            fail_fast,
            cache,
            json,
            catalog,
        } => {
            init_tracing(silent || json);
            let config = RunConfig::default()
                .with_select(select)
                .with_freeze_unselected(freeze_unselected)
                .with_print_views(print)
                .with_dry_run(dry)
                .with_silent(silent || json)
                .with_fresh(fresh)
                .with_threads(threads)
                .with_show(show)
                .with_fail_fast(fail_fast);
            let backend = LocalBackend::open(catalog.config())?;
            let engine = ExecutionEngine::new(Arc::new(backend), CacheStore::new(cache), config);
            run(&engine, &views, json).await
        }
        Commands::Plan { views, select } => {
            init_tracing(true);
            plan(&views, &select)
        }
        Commands::Teardown { catalog } => {
            init_tracing(false);
            if catalog.username.is_none() {
                return Err(eyre!("teardown needs a username; refusing to remove the production catalog"));
            }
            let backend = LocalBackend::open(catalog.config())?;
            let path = backend.path().to_path_buf();
            backend.teardown()?;
            println!("Removed {}", path.display());
            Ok(())
        }
    }
}

async fn run(engine: &ExecutionEngine, views: &std::path::Path, json: bool) -> Result<()> {
    let silent = engine.config().silent;
    let mut dag = engine.load_dag(views).await?;
    let mut observer = output::ProgressObserver::new(silent);
    let result = engine.run(&mut dag, &mut observer).await;
    observer.finish();

    let report = match &result {
        Ok(report) => report,
        Err(RunError::ViewsFailed { report, .. }) => report.as_ref(),
        Err(RunError::Core(e)) => return Err(eyre!("{}", e)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        if !silent || !report.is_success() {
            print!("{}", output::render_summary(report));
        }
        eprint!("{}", output::render_errors(report));
    }

    match result {
        Ok(_) => Ok(()),
        Err(e) => Err(eyre!("{}", e)),
    }
}

fn plan(views: &std::path::Path, select: &[String]) -> Result<()> {
    let dag = Dag::from_views(without_reserved(discover(views)?))?;
    let selected = dag.select(select)?;
    for (i, key) in dag
        .topological_order()
        .into_iter()
        .filter(|k| selected.contains(k))
        .enumerate()
    {
        let Some(view) = dag.get(&key) else { continue };
        match view.description() {
            Some(description) => println!("{:>4}  {} [{}]  {}", i + 1, key, view.kind(), description),
            None => println!("{:>4}  {} [{}]", i + 1, key, view.kind()),
        }
    }
    Ok(())
}
