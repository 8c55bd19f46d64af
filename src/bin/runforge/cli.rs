use clap::Parser;
use runforge::utils::clap_styles;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "runforge",
    author,
    version,
    about = "A workspace-local job queue and execution daemon for ML training runs.",
    styles = clap_styles()
)]
pub struct RunForge {
    /// Sub Commands
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    #[arg(long, global = true, help = "Path to the config file")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Run the execution daemon
    Daemon(DaemonArgs),
    /// Add a single run to the queue
    #[command(name = "enqueue-run")]
    EnqueueRun(EnqueueRunArgs),
    /// Expand a sweep plan and enqueue all of its runs
    #[command(name = "enqueue-sweep")]
    EnqueueSweep(EnqueueSweepArgs),
    /// Execute a sweep plan in the foreground, without the daemon
    Sweep(SweepArgs),
    /// Pause a group so no new jobs from it start
    #[command(name = "pause-group")]
    PauseGroup(GroupArgs),
    /// Resume a paused group
    #[command(name = "resume-group")]
    ResumeGroup(GroupArgs),
    /// Cancel every queued job in a group
    #[command(name = "cancel-group")]
    CancelGroup(GroupArgs),
    /// Re-enqueue failed jobs in a group as fresh attempts
    #[command(name = "retry-failed")]
    RetryFailed(GroupArgs),
    /// Show queue, daemon and pause status
    Status(StatusArgs),
    /// Remove old finished jobs from the queue
    Cleanup(CleanupArgs),
}

#[derive(Debug, Parser)]
pub struct DaemonArgs {
    /// Workspace root path
    #[arg(long)]
    pub workspace: PathBuf,

    /// Maximum concurrent jobs
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Maximum concurrent GPU jobs
    #[arg(long)]
    pub gpu_slots: Option<u32>,

    /// Worker program to spawn for each job
    #[arg(long)]
    pub runner: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct EnqueueRunArgs {
    /// The run ID to enqueue
    pub run_id: String,

    /// Workspace root path
    #[arg(long)]
    pub workspace: PathBuf,

    /// Group to attach the job to
    #[arg(long)]
    pub group: Option<String>,

    /// Job priority (higher runs first within a group)
    #[arg(long, default_value_t = 0)]
    pub priority: i64,
}

#[derive(Debug, Parser)]
pub struct EnqueueSweepArgs {
    /// Path to sweep_plan.json
    pub plan: PathBuf,

    /// Override the workspace named in the plan
    #[arg(long)]
    pub workspace: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct SweepArgs {
    /// Path to sweep_plan.json
    pub plan: PathBuf,

    /// Validate and print the expansion without creating or running anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Parser)]
pub struct GroupArgs {
    /// The group ID
    pub group_id: String,

    /// Workspace root path
    #[arg(long)]
    pub workspace: PathBuf,
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Workspace root path
    #[arg(long)]
    pub workspace: PathBuf,
}

#[derive(Debug, Parser)]
pub struct CleanupArgs {
    /// Workspace root path
    #[arg(long)]
    pub workspace: PathBuf,

    /// Remove finished jobs older than this many days
    #[arg(long, default_value_t = 7)]
    pub max_age_days: i64,
}
