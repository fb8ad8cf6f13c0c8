use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::config::{BridgeConfig, CONFIG_PATH_ENV};
use crate::console::{ConsoleHost, ConsoleRuntime};
use crate::host::HostTarget;
use crate::interpreter::python::PythonInterpreter;
use crate::paths::SearchPath;
use crate::types::Status;

#[derive(Parser)]
#[command(name = "pybridge")]
#[command(about = "pybridge - run Python payloads through the host stdio bridge", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides the search root's pybridge.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interpreter, run payloads, then stop it
    Run {
        /// Search root holding the bootstrap module and the stdlib archive
        #[arg(short = 'r', long = "root")]
        root: String,

        /// Source string to run (repeatable, runs in order)
        #[arg(short = 'c', long = "exec")]
        exec: Vec<String>,

        /// Python file to run after the -c payloads (repeatable)
        #[arg(short = 'f', long = "file")]
        file: Vec<PathBuf>,
    },

    /// Print the module search path for a root
    SearchPath {
        #[arg(short = 'r', long = "root")]
        root: String,
    },

    /// Print the effective configuration for a root
    Config {
        #[arg(short = 'r', long = "root")]
        root: String,
    },
}

/// Run the CLI by parsing process arguments
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

/// Run the CLI with provided arguments
pub fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Apply CLI overrides to environment before any config is loaded
    if let Some(config_path) = &cli.config {
        std::env::set_var(CONFIG_PATH_ENV, config_path);
    }

    match cli.command {
        Commands::Run { root, exec, file } => {
            let mut payloads = exec;
            for path in &file {
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                payloads.push(source);
            }
            run_payloads(&root, &payloads)
        }

        Commands::SearchPath { root } => {
            let config = BridgeConfig::load(root.as_ref())?;
            let path = SearchPath::build(
                &root,
                &config.interpreter.stdlib_archive,
                &config.interpreter.extra_search_paths,
            )?;
            for entry in path.entries() {
                println!("{}", entry.display());
            }
            Ok(())
        }

        Commands::Config { root } => {
            let config = BridgeConfig::load(root.as_ref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn run_payloads(root: &str, payloads: &[String]) -> Result<()> {
    let bridge = Bridge::new(Arc::new(ConsoleRuntime), PythonInterpreter::new()?);

    bridge
        .try_start(root, |config| {
            Ok(Arc::new(ConsoleHost::stdio(&config.input.completion_marker)) as Arc<dyn HostTarget>)
        })
        .context("Failed to start the interpreter")?;

    let mut failed = 0;
    for (index, payload) in payloads.iter().enumerate() {
        let status = bridge.call(payload);
        if status != Status::Ok {
            eprintln!("Payload {} finished with {}", index + 1, status);
            failed += 1;
        }
    }

    bridge.try_stop().context("Failed to stop the interpreter")?;

    if failed > 0 {
        bail!("{} of {} payloads failed", failed, payloads.len());
    }
    Ok(())
}
