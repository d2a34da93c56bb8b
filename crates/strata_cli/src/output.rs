//! Terminal rendering: live progress table, printed views and the run
//! summary.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use strata_plan::View;
use strata_runtime::{JobStatus, ProgressRow, RunObserver, RunReport};

/// Observer drawing the progress table under a spinner
pub struct ProgressObserver {
    bar: Option<ProgressBar>,
}

impl ProgressObserver {
    /// Create; `silent` draws nothing
    pub fn new(silent: bool) -> Self {
        let bar = (!silent).then(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}]\n{msg}") {
                bar.set_style(template);
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Self { bar }
    }

    /// Remove the live display
    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl RunObserver for ProgressObserver {
    fn on_progress(&mut self, rows: &[ProgressRow]) {
        if let Some(bar) = &self.bar {
            bar.set_message(render_rows(rows));
        }
    }

    fn on_render(&mut self, view: &View) {
        let text = render_view(view);
        match &self.bar {
            Some(bar) => bar.suspend(|| println!("{}", text)),
            None => println!("{}", text),
        }
    }
}

fn styled_status(status: JobStatus) -> String {
    let label = format!("{:<7}", status.to_string());
    match status {
        JobStatus::Succeeded => style(label).green().to_string(),
        JobStatus::Errored => style(label).red().to_string(),
        JobStatus::Skipped => style(label).yellow().to_string(),
        JobStatus::Running | JobStatus::Pending => style(label).cyan().to_string(),
    }
}

/// Progress rows as a text table
pub fn render_rows(rows: &[ProgressRow]) -> String {
    let width = rows
        .iter()
        .map(|r| r.key.to_string().len())
        .max()
        .unwrap_or(0)
        .max(4);
    let mut out = format!("{:>4}  {:<width$}  {:<7}  {:>8}", "#", "View", "Status", "Duration");
    for row in rows {
        out.push('\n');
        out.push_str(&format!(
            "{:>4}  {:<width$}  {}  {:>7}s",
            row.index,
            row.key.to_string(),
            styled_status(row.status),
            row.seconds
        ));
    }
    out
}

/// A rendered view, headed by its key
pub fn render_view(view: &View) -> String {
    let comment = match view.kind() {
        strata_plan::ViewKind::Query => "--",
        strata_plan::ViewKind::Script => "#",
    };
    format!("{} {}\n{}\n", comment, view.key(), view.source())
}

/// End-of-run summary
pub fn render_summary(report: &RunReport) -> String {
    let mut out = format!("Finished in {:.1}s\n", report.elapsed.as_secs_f64());
    let counts = [
        ("SUCCESS", report.built().len()),
        ("CACHED", report.cached().len()),
        ("ERRORED", report.errored().len()),
        ("SKIPPED", report.skipped().len()),
        ("EXCLUDED", report.excluded),
        ("ORPHANS", report.orphans.len()),
    ];
    for (label, count) in counts {
        if count > 0 {
            out.push_str(&format!("  {:<8} {}\n", label, count));
        }
    }
    out
}

/// Detail for every errored view
pub fn render_errors(report: &RunReport) -> String {
    let mut out = String::new();
    for (key, message) in report.errored() {
        out.push_str(&format!("{} {}\n{}\n\n", style("ERRORED").red().bold(), key, message));
    }
    out
}
