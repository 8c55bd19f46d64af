use clap::{CommandFactory, Parser};
use cli::RunForge;
use commands::handle_commands;

mod cli;
mod commands;

#[tokio::main]
async fn main() {
    let runforge = RunForge::parse();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_max_level(runforge.verbose.tracing_level_filter())
        .init();

    tracing::debug!("Starting runforge with args: {:?}", runforge);

    let code = match runforge.command {
        Some(command) => handle_commands(runforge.config.as_ref(), command).await,
        None => {
            let _ = RunForge::command().print_help();
            runforge::exit_codes::SUCCESS
        }
    };
    std::process::exit(code);
}
