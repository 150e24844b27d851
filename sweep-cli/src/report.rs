//! Terminal output for runs and plans.

use colored::*;
use sweep::{DispatchConfig, ExecutionError, Plan, ProgressSnapshot, RunSummary};

/// Maximum number of failed jobs listed individually in the summary.
const MAX_LISTED_FAILURES: usize = 20;

pub fn progress(snapshot: &ProgressSnapshot) {
    let failed = if snapshot.failed > 0 {
        format!("{} failed", snapshot.failed).red()
    } else {
        "0 failed".normal()
    };
    println!(
        "{} {}  {} completed, {} skipped, {}",
        "progress:".cyan(),
        snapshot,
        snapshot.completed,
        snapshot.skipped,
        failed
    );
}

pub fn summary(summary: &RunSummary) {
    println!();
    if summary.was_cancelled() {
        println!("{}", "run cancelled".yellow().bold());
    } else if summary.failed == 0 {
        println!("{}", "run finished".green().bold());
    } else {
        println!("{}", "run finished with failures".red().bold());
    }
    println!("  total:     {}", summary.total);
    println!("  completed: {}", summary.completed);
    println!("  skipped:   {}", summary.skipped);
    println!("  failed:    {}", summary.failed - summary.cancelled);
    if summary.cancelled > 0 {
        println!("  cancelled: {}", summary.cancelled);
    }

    let failures = summary
        .failures()
        .filter(|(_, e)| **e != ExecutionError::Cancelled)
        .collect::<Vec<_>>();
    if failures.is_empty() {
        return;
    }
    println!("\n{}", "failed jobs:".red());
    for (job, error) in failures.iter().take(MAX_LISTED_FAILURES) {
        println!("  {} {}", job.key().as_str().bold(), error);
    }
    if failures.len() > MAX_LISTED_FAILURES {
        println!("  ... and {} more", failures.len() - MAX_LISTED_FAILURES);
    }
}

pub fn plan(plan: &Plan, config: &DispatchConfig) {
    let order = if config.shuffle {
        format!("shuffled with seed {}", config.seed)
    } else {
        "in parameter space order".to_string()
    };
    println!(
        "{} {} of {} jobs, {}, {} at a time",
        "plan:".cyan(),
        plan.submit.len(),
        plan.total,
        order,
        config.width
    );
    println!("output directory: {}", config.output_dir.display());

    if !plan.submit.is_empty() {
        println!("\n{}", "to run:".green());
    }
    for (n, job) in plan.submit.iter().enumerate() {
        println!("  {:>5}  {}  {}", n + 1, job.key().as_str().bold(), job);
    }
    if !plan.skipped.is_empty() {
        println!("\n{}", "skipped, prior result found:".yellow());
    }
    for (job, output) in &plan.skipped {
        println!("  {}  {}", job.key().as_str().bold(), output.display());
    }
}
