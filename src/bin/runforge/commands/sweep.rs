use crate::cli::SweepArgs;
use runforge::config;
use runforge::core::daemon::RunnerCommand;
use runforge::core::sweep::{SweepOrchestrator, SweepOutcome, SweepPlan};
use runforge::exit_codes;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

pub(crate) async fn handle_sweep(config_path: Option<&PathBuf>, args: SweepArgs) -> i32 {
    if !args.plan.exists() {
        eprintln!("ERROR: Plan file not found: {}", args.plan.display());
        return exit_codes::MISSING_FILES;
    }

    let plan = match SweepPlan::load(&args.plan) {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("ERROR: Failed to parse plan: {err:#}");
            return exit_codes::INVALID_PLAN;
        }
    };
    let errors = plan.validate();
    if !errors.is_empty() {
        for error in errors {
            eprintln!("ERROR: {error}");
        }
        return exit_codes::INVALID_PLAN;
    }

    if args.dry_run {
        return dry_run(&plan);
    }

    // A valid plan can still expand to nothing (e.g. a parameter with an
    // empty value list).
    if plan.expand().is_empty() {
        eprintln!("ERROR: No runs to execute (empty expansion)");
        return exit_codes::INVALID_PLAN;
    }

    let workspace = PathBuf::from(&plan.workspace);
    if !workspace.exists() {
        eprintln!("ERROR: Workspace not found: {}", workspace.display());
        return exit_codes::MISSING_FILES;
    }

    let config = match config::load_config(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: Failed to load config: {err}");
            return exit_codes::INTERNAL_ERROR;
        }
    };

    println!("runforge sweep {}", runforge::core::version());
    println!("Plan: {}", args.plan.display());
    println!("Workspace: {}", workspace.display());
    println!("Group: {}", plan.group.name);

    let runner = RunnerCommand::from_config(&config.daemon);
    let orchestrator = SweepOrchestrator::new(plan, args.plan.clone(), runner);

    // Graceful cancel: the signal stops new submissions, in-flight runs are
    // awaited.
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nCancel requested, stopping remaining runs...");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    match orchestrator.execute().await {
        Ok(SweepOutcome::Completed) => exit_codes::SUCCESS,
        Ok(SweepOutcome::Failed) => exit_codes::FAILED,
        Ok(SweepOutcome::Canceled) => exit_codes::CANCELED,
        Err(err) => {
            eprintln!("ERROR: Sweep failed: {err:#}");
            exit_codes::INTERNAL_ERROR
        }
    }
}

/// Validate and print the expansion without touching the workspace.
fn dry_run(plan: &SweepPlan) -> i32 {
    let run_configs = plan.expand();
    if run_configs.is_empty() {
        eprintln!("ERROR: No runs to execute (empty expansion)");
        return exit_codes::INVALID_PLAN;
    }

    println!("Plan is valid.");
    println!("Group: {}", plan.group.name);
    println!(
        "Strategy: {} -> {} run(s), max_parallel={}",
        plan.strategy.kind,
        run_configs.len(),
        plan.execution.max_parallel
    );
    for rc in &run_configs {
        let overrides = serde_json::to_string(&rc.overrides).unwrap_or_default();
        println!("  {}  {overrides}", rc.run_id);
    }
    exit_codes::SUCCESS
}
