use crate::cli::Commands;
use std::path::PathBuf;

mod cleanup;
mod daemon;
mod enqueue_run;
mod enqueue_sweep;
mod groups;
mod status;
mod sweep;

pub async fn handle_commands(config: Option<&PathBuf>, command: Commands) -> i32 {
    match command {
        Commands::Daemon(args) => daemon::handle_daemon(config, args).await,
        Commands::EnqueueRun(args) => enqueue_run::handle_enqueue_run(args),
        Commands::EnqueueSweep(args) => enqueue_sweep::handle_enqueue_sweep(args),
        Commands::Sweep(args) => sweep::handle_sweep(config, args).await,
        Commands::PauseGroup(args) => groups::handle_pause_group(args, true),
        Commands::ResumeGroup(args) => groups::handle_pause_group(args, false),
        Commands::CancelGroup(args) => groups::handle_cancel_group(args),
        Commands::RetryFailed(args) => groups::handle_retry_failed(args),
        Commands::Status(args) => status::handle_status(args),
        Commands::Cleanup(args) => cleanup::handle_cleanup(args),
    }
}
