use crate::cli::StatusArgs;
use chrono::Utc;
use owo_colors::OwoColorize;
use runforge::core::group::PauseRegistry;
use runforge::core::job::{DaemonPhase, Job, JobState};
use runforge::core::queue::QueueStore;
use runforge::core::WorkspaceLayout;
use runforge::exit_codes;
use runforge::utils::format_duration;
use tabled::{builder::Builder, settings::style::Style};

pub(crate) fn handle_status(args: StatusArgs) -> i32 {
    if !args.workspace.exists() {
        eprintln!("ERROR: Workspace not found: {}", args.workspace.display());
        return exit_codes::MISSING_FILES;
    }

    let layout = WorkspaceLayout::new(&args.workspace);
    let queue = QueueStore::new(layout.clone());
    let state = queue.load_queue();
    let daemon = queue.load_daemon();

    println!("Queue Status");
    println!("  Max parallel: {}", state.max_parallel);
    println!("  GPU slots: {}", state.gpu_slots);
    println!("  Total jobs: {}", state.jobs.len());
    for job_state in [
        JobState::Queued,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Canceled,
    ] {
        let count = state.count_in(job_state);
        if count > 0 {
            let label = job_state.to_string();
            let mut label_chars = label.chars();
            let capitalized = match label_chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + label_chars.as_str(),
                None => label,
            };
            println!("  {capitalized}: {count}");
        }
    }

    if !state.jobs.is_empty() {
        let mut builder = Builder::default();
        builder.push_record(["JOB ID", "RUN", "GROUP", "STATE", "PRIO", "GPU", "TRY", "RUNTIME"]);
        for job in &state.jobs {
            builder.push_record([
                job.job_id.clone(),
                job.run_id.clone(),
                job.group_id.clone().unwrap_or_else(|| "-".into()),
                colored_state(job.state),
                job.priority.to_string(),
                if job.requires_gpu { "yes".into() } else { "-".into() },
                job.attempt.to_string(),
                runtime(job),
            ]);
        }
        println!();
        println!("{}", builder.build().with(Style::rounded()));
    }

    println!();
    println!("Daemon Status");
    println!("  State: {}", daemon.state);
    if daemon.state == DaemonPhase::Running {
        println!("  PID: {}", daemon.pid);
        println!(
            "  Active jobs: {} ({} GPU)",
            daemon.active_jobs, daemon.active_gpu_jobs
        );
        println!("  Last heartbeat: {}", daemon.last_heartbeat.to_rfc3339());
    }

    let paused = PauseRegistry::new(layout).paused_set();
    if !paused.is_empty() {
        println!();
        println!("Paused Groups");
        let mut paused: Vec<_> = paused.into_iter().collect();
        paused.sort();
        for group_id in paused {
            println!("  {group_id}");
        }
    }

    exit_codes::SUCCESS
}

fn colored_state(state: JobState) -> String {
    let label = state.to_string();
    match state {
        JobState::Queued => label.yellow().to_string(),
        JobState::Running => label.cyan().to_string(),
        JobState::Succeeded => label.green().to_string(),
        JobState::Failed => label.red().to_string(),
        JobState::Canceled => label.dimmed().to_string(),
    }
}

fn runtime(job: &Job) -> String {
    let end = match job.state {
        JobState::Running => Some(Utc::now()),
        _ => job.finished_at,
    };
    match (job.started_at, end) {
        (Some(start), Some(end)) if end > start => {
            let elapsed = (end - start).to_std().unwrap_or_default();
            format_duration(elapsed)
        }
        _ => "-".into(),
    }
}
