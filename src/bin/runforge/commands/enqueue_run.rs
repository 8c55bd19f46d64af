use crate::cli::EnqueueRunArgs;
use runforge::core::queue::{QueueError, QueueStore};
use runforge::core::request::run_requires_gpu;
use runforge::core::WorkspaceLayout;
use runforge::exit_codes;

pub(crate) fn handle_enqueue_run(args: EnqueueRunArgs) -> i32 {
    if !args.workspace.exists() {
        eprintln!("ERROR: Workspace not found: {}", args.workspace.display());
        return exit_codes::MISSING_FILES;
    }

    let layout = WorkspaceLayout::new(&args.workspace);
    let run_dir = layout.run_dir(&args.run_id);
    if !run_dir.exists() {
        eprintln!("ERROR: Run directory not found: {}", run_dir.display());
        return exit_codes::MISSING_FILES;
    }
    let request_file = layout.request_file(&args.run_id);
    if !request_file.exists() {
        eprintln!("ERROR: request.json not found in {}", run_dir.display());
        return exit_codes::MISSING_FILES;
    }

    let requires_gpu = run_requires_gpu(&request_file);
    let queue = QueueStore::new(layout);

    match queue.enqueue(&args.run_id, args.group.as_deref(), args.priority, requires_gpu) {
        Ok(job) => {
            let gpu_tag = if requires_gpu { " [GPU]" } else { "" };
            println!("Enqueued run {} as job {}{gpu_tag}", args.run_id, job.job_id);
            exit_codes::SUCCESS
        }
        Err(QueueError::DuplicateRun { run_id }) => {
            eprintln!("ERROR: Run {run_id} is already queued or running");
            exit_codes::FAILED
        }
        Err(QueueError::Io(err)) => {
            eprintln!("ERROR: Failed to enqueue: {err:#}");
            exit_codes::INTERNAL_ERROR
        }
    }
}
