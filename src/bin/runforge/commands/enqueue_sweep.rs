use crate::cli::EnqueueSweepArgs;
use chrono::Utc;
use runforge::core::group::mark_runs_queued;
use runforge::core::queue::{QueueError, QueueStore};
use runforge::core::request::requires_gpu;
use runforge::core::sweep::{bootstrap_group, create_run_directory, generate_group_id, SweepPlan};
use runforge::core::WorkspaceLayout;
use runforge::exit_codes;
use runforge::tokens;
use std::path::PathBuf;

/// Expand a plan, create the group and run directories, then feed everything
/// to the daemon through the queue instead of executing directly.
pub(crate) fn handle_enqueue_sweep(args: EnqueueSweepArgs) -> i32 {
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

    // Use the workspace from the plan unless overridden.
    let workspace = args
        .workspace
        .unwrap_or_else(|| PathBuf::from(&plan.workspace));
    if !workspace.exists() {
        eprintln!("ERROR: Workspace not found: {}", workspace.display());
        return exit_codes::MISSING_FILES;
    }

    println!("runforge enqueue-sweep {}", runforge::core::version());
    println!("Plan: {}", args.plan.display());
    println!("Workspace: {}", workspace.display());
    println!("Group: {}", plan.group.name);

    let run_configs = plan.expand();
    if run_configs.is_empty() {
        eprintln!("ERROR: No runs to execute (empty expansion)");
        return exit_codes::INVALID_PLAN;
    }
    let total = run_configs.len();
    println!("Sweep plan: {total} runs");

    let layout = WorkspaceLayout::new(&workspace);
    let group_id = generate_group_id(&plan.group.name, Utc::now());
    if let Err(err) = bootstrap_group(&layout, &plan, &args.plan, &group_id, &run_configs) {
        eprintln!("ERROR: Failed to create group: {err:#}");
        return exit_codes::INTERNAL_ERROR;
    }
    println!("Group ID: {group_id}");
    println!("Group directory: {}", layout.group_dir(&group_id).display());

    for rc in &run_configs {
        if let Err(err) = create_run_directory(&layout, &plan, &group_id, rc) {
            eprintln!("ERROR: Failed to create run {}: {err:#}", rc.run_id);
            return exit_codes::INTERNAL_ERROR;
        }
    }

    // GPU demand comes from the shared base request.
    let needs_gpu = requires_gpu(&plan.base_request);
    let queue = QueueStore::new(layout.clone());
    let mut enqueued = Vec::new();
    let mut gpu_count = 0;
    for rc in &run_configs {
        match queue.enqueue(&rc.run_id, Some(&group_id), 0, needs_gpu) {
            Ok(_) => {
                enqueued.push(rc.run_id.clone());
                if needs_gpu {
                    gpu_count += 1;
                }
            }
            Err(QueueError::DuplicateRun { run_id }) => {
                eprintln!("Warning: Could not enqueue {run_id}: already queued or running");
            }
            Err(QueueError::Io(err)) => {
                eprintln!("Warning: Could not enqueue {}: {err:#}", rc.run_id);
            }
        }
    }

    if let Err(err) = mark_runs_queued(&layout, &group_id, &enqueued) {
        eprintln!("Warning: Could not update group status: {err:#}");
    }

    let gpu_info = if gpu_count > 0 {
        format!(" ({gpu_count} GPU)")
    } else {
        String::new()
    };
    println!("Enqueued {}/{total} runs{gpu_info}", enqueued.len());
    println!("{}", tokens::group_enqueued(&group_id, enqueued.len()));

    exit_codes::SUCCESS
}
