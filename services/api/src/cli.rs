use crate::demo::{run_cycle_command, run_demo, CycleRunArgs, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use hostel_allocation::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Hostel Allocation Engine",
    about = "Run priority-ranked hostel allocation cycles from the command line or over HTTP",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run allocation cycles against CSV exports
    Cycle {
        #[command(subcommand)]
        command: CycleCommand,
    },
    /// Walk through a cycle, an override and a release on sample data
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum CycleCommand {
    /// Score, match and (unless --dry-run) commit one cycle
    Run(CycleRunArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Room inventory CSV to seed the in-memory store
    #[arg(long)]
    pub(crate) rooms: Option<PathBuf>,
    /// Applicant CSV to seed the in-memory store
    #[arg(long)]
    pub(crate) applicants: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Cycle {
            command: CycleCommand::Run(args),
        } => run_cycle_command(args),
        Command::Demo(args) => run_demo(args),
    }
}
