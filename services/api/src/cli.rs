use crate::bypass::{run_bypass_evaluation, BypassEvaluateArgs};
use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use clinic_flow::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Clinic Flow",
    about = "Run the occupational health episode service or its tooling from the command line",
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
    /// Evaluate psychometric scores against bypass rules
    Bypass {
        #[command(subcommand)]
        command: BypassCommand,
    },
    /// Walk a sample episode through the lifecycle and print its milestones
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum BypassCommand {
    /// Evaluate a score sheet and print the per-test verdicts
    Evaluate(BypassEvaluateArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Bypass {
            command: BypassCommand::Evaluate(args),
        } => run_bypass_evaluation(args),
        Command::Demo(args) => run_demo(args),
    }
}
