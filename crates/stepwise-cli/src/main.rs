//! Stepwise CLI
//!
//! Command-line front end for the stepwise engine. Lambdas are read from
//! JSON files in the engine's expression-tree serialization.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod builtins;
mod commands;
mod config;
mod output;

#[derive(Parser)]
#[command(name = "stepwise")]
#[command(about = "Lower expression trees into resumable state machines", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine configuration file (TOML with an `[engine]` table)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log lowering and execution at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// When to use colors: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the construction checks on lambda files
    Check {
        /// Lambda JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Lower a lambda and print its state graph and linear form
    Lower {
        /// Lambda JSON file
        file: PathBuf,

        /// Print only the state graph
        #[arg(long, conflicts_with = "linear")]
        graph: bool,

        /// Print only the linear form
        #[arg(long)]
        linear: bool,

        /// Skip the optimizer
        #[arg(long)]
        unoptimized: bool,
    },

    /// Run a lambda to completion
    Run {
        /// Lambda JSON file
        file: PathBuf,

        /// Walk the tree instead of compiling it
        #[arg(long)]
        interpret: bool,

        /// Positional argument, parsed as JSON (bare words become strings)
        #[arg(long = "arg", value_name = "VALUE")]
        args: Vec<String>,

        /// Skip the optimizer
        #[arg(long)]
        unoptimized: bool,

        /// Maximum steps per resumption
        #[arg(long)]
        step_limit: Option<u64>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut out = output::StyledOutput::new(output::resolve_color_choice(Some(cli.color.as_str())));
    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { files } => {
            let ok = commands::check::execute(&files, &config, &mut out)?;
            if !ok {
                std::process::exit(1);
            }
        }

        Commands::Lower {
            file,
            graph,
            linear,
            unoptimized,
        } => {
            let args = commands::lower::LowerArgs {
                file,
                graph,
                linear,
                unoptimized,
            };
            commands::lower::execute(args, &config, &mut out)?;
        }

        Commands::Run {
            file,
            interpret,
            args,
            unoptimized,
            step_limit,
        } => {
            let args = commands::run::RunArgs {
                file,
                interpret,
                args,
                unoptimized,
                step_limit,
            };
            commands::run::execute(args, &config, &mut out)?;
        }
    }

    Ok(())
}
