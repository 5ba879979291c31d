use crate::demo::{run_demo, run_rules, DemoArgs, RulesArgs};
use crate::server;
use assessment_engine::error::AppError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Assessment Engine",
    about = "Classify and score research outputs per commission from the command line",
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
    /// Classify a seeded demo catalog and print the batch and researcher reports
    Demo(DemoArgs),
    /// Validate a rule registry and print its point tables and journal tiers
    Rules(RulesArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Journal ranking CSV export (series_id,year,edition,category,rank,total,impact_factor)
    #[arg(long)]
    pub(crate) rankings_csv: Option<PathBuf>,
    /// Seed the demo documents, rankings and conference classification
    #[arg(long)]
    pub(crate) seed_demo: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Rules(args) => run_rules(args),
    }
}
