use crate::cli::DaemonArgs;
use runforge::config;
use runforge::core::daemon::{DaemonError, ExecutionDaemon};
use runforge::core::gpu::NvmlOracle;
use runforge::exit_codes;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) async fn handle_daemon(config_path: Option<&PathBuf>, args: DaemonArgs) -> i32 {
    if !args.workspace.exists() {
        eprintln!("ERROR: Workspace not found: {}", args.workspace.display());
        return exit_codes::MISSING_FILES;
    }

    let mut config = match config::load_config(config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: Failed to load config: {err}");
            return exit_codes::INTERNAL_ERROR;
        }
    };

    // CLI flags override the config file
    if let Some(max_parallel) = args.max_parallel {
        config.daemon.max_parallel = max_parallel;
    }
    if let Some(gpu_slots) = args.gpu_slots {
        config.daemon.gpu_slots = gpu_slots;
    }
    if let Some(runner) = args.runner {
        config.daemon.runner = Some(runner);
    }
    if config.daemon.max_parallel < 1 {
        eprintln!("ERROR: max-parallel must be >= 1");
        return exit_codes::INVALID_REQUEST;
    }

    // Workers receive absolute paths; resolve once up front.
    let workspace = args
        .workspace
        .canonicalize()
        .unwrap_or(args.workspace.clone());

    let mut daemon = ExecutionDaemon::new(workspace, &config.daemon, Arc::new(NvmlOracle::new()));
    match daemon.run().await {
        Ok(()) => exit_codes::SUCCESS,
        Err(DaemonError::AlreadyRunning { pid }) => {
            match pid {
                Some(pid) => eprintln!("ERROR: Another daemon is already running (PID: {pid})"),
                None => eprintln!("ERROR: Another daemon is already running"),
            }
            exit_codes::FAILED
        }
        Err(DaemonError::Other(err)) => {
            eprintln!("ERROR: Daemon failed: {err:#}");
            exit_codes::INTERNAL_ERROR
        }
    }
}
