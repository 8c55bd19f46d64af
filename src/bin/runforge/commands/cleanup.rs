use crate::cli::CleanupArgs;
use chrono::Duration;
use runforge::core::queue::QueueStore;
use runforge::core::WorkspaceLayout;
use runforge::exit_codes;

pub(crate) fn handle_cleanup(args: CleanupArgs) -> i32 {
    if !args.workspace.exists() {
        eprintln!("ERROR: Workspace not found: {}", args.workspace.display());
        return exit_codes::MISSING_FILES;
    }
    if args.max_age_days < 0 {
        eprintln!("ERROR: max-age-days must be >= 0");
        return exit_codes::INVALID_REQUEST;
    }

    let queue = QueueStore::new(WorkspaceLayout::new(&args.workspace));
    match queue.cleanup_old(Duration::days(args.max_age_days)) {
        Ok(removed) => {
            println!("Removed {removed} old jobs from the queue");
            exit_codes::SUCCESS
        }
        Err(err) => {
            eprintln!("ERROR: Cleanup failed: {err:#}");
            exit_codes::INTERNAL_ERROR
        }
    }
}
