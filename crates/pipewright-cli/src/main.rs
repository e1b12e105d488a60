//! Pipewright CLI tool.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(about = "Synthesize self-mutating delivery pipelines", long_about = None)]
struct Cli {
    /// Pipeline definition file
    #[arg(
        long,
        short,
        global = true,
        env = "PIPEWRIGHT_CONFIG",
        default_value = "pipewright.kdl"
    )]
    config: PathBuf,

    /// Target account (overrides the definition's context)
    #[arg(long, global = true, env = "PIPEWRIGHT_ACCOUNT")]
    account: Option<String>,

    /// Target region (overrides the definition's context)
    #[arg(long, global = true, env = "PIPEWRIGHT_REGION")]
    region: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the pipeline and print the assembly as JSON
    Synth {
        /// Write the assembly to a file instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Validate a pipeline definition
    Validate,
    /// Check whether a source event would trigger a project
    CheckEvent(CheckEventArgs),
}

#[derive(Args)]
pub struct CheckEventArgs {
    /// Project name
    #[arg(long)]
    pub project: String,
    /// Event action (e.g. PULL_REQUEST_CREATED)
    #[arg(long, required_unless_present = "payload", conflicts_with = "payload")]
    pub action: Option<String>,
    /// Source (head) branch
    #[arg(long)]
    pub source_branch: Option<String>,
    /// Target (base) branch
    #[arg(long)]
    pub target_branch: Option<String>,
    /// Actor that caused the event
    #[arg(long)]
    pub actor: Option<String>,
    /// GitHub webhook payload file
    #[arg(long, requires = "github_event")]
    pub payload: Option<PathBuf>,
    /// GitHub event type (X-GitHub-Event header)
    #[arg(long)]
    pub github_event: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only command output
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let vars = commands::variables(cli.account, cli.region);

    match cli.command {
        Commands::Synth { out, pretty } => {
            commands::synth::run(&cli.config, vars, out.as_deref(), pretty)?;
        }
        Commands::Validate => {
            commands::validate(&cli.config, vars)?;
        }
        Commands::CheckEvent(args) => {
            commands::check_event::run(&cli.config, vars, &args)?;
        }
    }

    Ok(())
}
