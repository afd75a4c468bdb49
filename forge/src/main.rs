//! Iterative synthesis-and-verification orchestrator.
//!
//! `forge solve` runs one task end to end and prints the event stream as
//! JSON lines on stdout. `forge exec` runs a single program through the
//! sandbox, which is handy for checking the toolchain configuration.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;

use forge::core::types::Track;
use forge::events::Event;
use forge::exit_codes;
use forge::io::config::{ForgeConfig, load_config, write_config};
use forge::io::gateway::OpenAiGateway;
use forge::io::harness::{ProcessSandbox, Sandbox};
use forge::logging;
use forge::orchestrator::submit;

const DEFAULT_CONFIG: &str = "forge.toml";

#[derive(Parser)]
#[command(
    name = "forge",
    version,
    about = "Iterative code synthesis with sandboxed verification"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve a task and stream events as JSON lines.
    Solve {
        /// Read the task from this file instead of stdin.
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Run one program through the sandbox.
    Exec {
        #[arg(short, long, value_enum)]
        track: TrackArg,
        /// Source file to run.
        #[arg(short, long)]
        file: PathBuf,
        /// File whose contents are fed to stdin.
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Write a config file with default values.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TrackArg {
    Cpp,
    Python,
}

impl From<TrackArg> for Track {
    fn from(arg: TrackArg) -> Self {
        match arg {
            TrackArg::Cpp => Track::Cpp,
            TrackArg::Python => Track::Python,
        }
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Solve { file, config } => cmd_solve(file.as_deref(), &config).await,
        Command::Exec {
            track,
            file,
            input,
            config,
        } => cmd_exec(track.into(), &file, input.as_deref(), &config).await,
        Command::InitConfig { force, config } => cmd_init_config(&config, force),
    }
}

async fn cmd_solve(file: Option<&Path>, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let task = match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read task from stdin")?;
            buf
        }
    };
    if task.trim().is_empty() {
        bail!("task is empty");
    }

    let gateway = Arc::new(OpenAiGateway::new(&config.gateway)?);
    let sandbox = Arc::new(ProcessSandbox::new(config.harness));
    let mut events = pin!(submit(gateway, sandbox, config.orchestrator, task));

    let mut code = exit_codes::OK;
    while let Some(event) = events.next().await {
        if matches!(event, Event::FailureReport { .. }) {
            code = exit_codes::UNSOLVED;
        }
        let line = serde_json::to_string(&event).context("serialize event")?;
        println!("{line}");
    }
    Ok(code)
}

async fn cmd_exec(
    track: Track,
    file: &Path,
    input: Option<&Path>,
    config_path: &Path,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let code = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let stdin = match input {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
        }
        None => String::new(),
    };

    let sandbox = ProcessSandbox::new(config.harness);
    let result = sandbox.run(&code, track, &stdin).await;
    if !result.stdout.is_empty() {
        println!("{}", result.stdout);
    }
    if result.is_error() {
        eprintln!("{}", result.stderr);
        return Ok(exit_codes::INVALID);
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &ForgeConfig::default())?;
    Ok(exit_codes::OK)
}
