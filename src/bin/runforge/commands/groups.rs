use crate::cli::GroupArgs;
use runforge::core::group::PauseRegistry;
use runforge::core::queue::QueueStore;
use runforge::core::WorkspaceLayout;
use runforge::exit_codes;

pub(crate) fn handle_pause_group(args: GroupArgs, pause: bool) -> i32 {
    if !args.workspace.exists() {
        eprintln!("ERROR: Workspace not found: {}", args.workspace.display());
        return exit_codes::MISSING_FILES;
    }

    let registry = PauseRegistry::new(WorkspaceLayout::new(&args.workspace));
    let verb = if pause { "paused" } else { "resumed" };

    if registry.is_paused(&args.group_id) == pause {
        let already = if pause { "already paused" } else { "not paused" };
        println!("Group {} is {already}", args.group_id);
        return exit_codes::SUCCESS;
    }

    match registry.set_paused(&args.group_id, pause) {
        Ok(true) => {
            println!(
                "{} group {}",
                if pause { "Paused" } else { "Resumed" },
                args.group_id
            );
            exit_codes::SUCCESS
        }
        Ok(false) => {
            eprintln!("ERROR: Group not found: {}", args.group_id);
            exit_codes::FAILED
        }
        Err(err) => {
            eprintln!("ERROR: Failed to {verb} group: {err:#}");
            exit_codes::INTERNAL_ERROR
        }
    }
}

pub(crate) fn handle_cancel_group(args: GroupArgs) -> i32 {
    if !args.workspace.exists() {
        eprintln!("ERROR: Workspace not found: {}", args.workspace.display());
        return exit_codes::MISSING_FILES;
    }

    let queue = QueueStore::new(WorkspaceLayout::new(&args.workspace));
    match queue.cancel_group(&args.group_id) {
        Ok(count) if count > 0 => {
            println!("Canceled {count} queued runs in group {}", args.group_id);
            exit_codes::SUCCESS
        }
        Ok(_) => {
            println!("No queued runs to cancel in group {}", args.group_id);
            exit_codes::SUCCESS
        }
        Err(err) => {
            eprintln!("ERROR: Failed to cancel group: {err:#}");
            exit_codes::INTERNAL_ERROR
        }
    }
}

pub(crate) fn handle_retry_failed(args: GroupArgs) -> i32 {
    if !args.workspace.exists() {
        eprintln!("ERROR: Workspace not found: {}", args.workspace.display());
        return exit_codes::MISSING_FILES;
    }

    let queue = QueueStore::new(WorkspaceLayout::new(&args.workspace));
    match queue.retry_failed(&args.group_id) {
        Ok(jobs) if !jobs.is_empty() => {
            println!(
                "Re-enqueued {} failed runs in group {}",
                jobs.len(),
                args.group_id
            );
            for job in jobs {
                println!("  {} -> {} (attempt {})", job.run_id, job.job_id, job.attempt);
            }
            exit_codes::SUCCESS
        }
        Ok(_) => {
            println!("No failed runs to retry in group {}", args.group_id);
            exit_codes::SUCCESS
        }
        Err(err) => {
            eprintln!("ERROR: Failed to retry group: {err:#}");
            exit_codes::INTERNAL_ERROR
        }
    }
}
