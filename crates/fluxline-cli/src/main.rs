mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "fluxline",
    version,
    about = "Declarative message pipeline engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline, optionally feeding messages from a file
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Channel to inject input messages into
        #[arg(long, requires = "input")]
        entry: Option<String>,
        /// Newline-delimited JSON messages to inject
        #[arg(long, requires = "entry")]
        input: Option<PathBuf>,
    },
    /// Validate pipeline configuration and wiring
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// Print the resolved pipeline topology
    Describe {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            pipeline,
            entry,
            input,
        } => commands::run::execute(&pipeline, entry.as_deref(), input.as_deref()).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline),
        Commands::Describe { pipeline } => commands::describe::execute(&pipeline),
    }
}
