//! `deltashell`: run commands through one persistent session per phase.
//!
//! Every command goes through the phase's transformer chain and is written to
//! the same interpreter, so shell state carries from one command to the next.
//!
//! ```text
//! deltashell BUILD 'cd /srv/app' 'git pull' 'make'
//! ```

use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Parser;
use deltashell_core::{CommandOutcome, DeltaConfig, InterpreterCommand};
use deltashell_executor::{CommandBuilder, MERGE_STDERR, Target, TransformChain};
use deltashell_session::SessionManager;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "deltashell")]
#[command(about = "Run commands in a phase's persistent shell session")]
#[command(version)]
struct Cli {
    /// Config file (default: ./.deltarc.json, then ~/.deltarc.json)
    #[arg(short, long, env = "DELTASHELL_CONFIG")]
    config: Option<PathBuf>,

    /// Per-command timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Interpreter command line, overriding the phase's host
    #[arg(long)]
    interpreter: Option<String>,

    /// Skip the phase's transformer chain
    #[arg(long)]
    raw: bool,

    /// Phase to run in
    phase: String,

    /// Commands, run in order
    #[arg(required = true)]
    commands: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("deltashell: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every command completed.
async fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => DeltaConfig::load(path),
        None => DeltaConfig::discover(),
    }
    .context("Failed to load config")?;

    let Some(phase) = config.phase(&cli.phase) else {
        let known: Vec<&str> = config.phases.keys().map(String::as_str).collect();
        bail!("Unknown phase '{}' (known: {})", cli.phase, known.join(", "));
    };
    if let Some(gate) = config.gates.get(&cli.phase) {
        tracing::debug!(phase = %cli.phase, gate, "Phase has a logic gate");
    }

    let mut session_config = config.session.clone();
    if let Some(secs) = cli.timeout {
        session_config = session_config.with_command_timeout(Some(Duration::from_secs(secs)));
    }

    let command = interpreter_for(cli.interpreter.as_deref(), &phase.ssh)?;
    tracing::info!(phase = %cli.phase, interpreter = %command.display(), "Opening session");

    let manager = SessionManager::new(session_config);
    manager
        .open(&cli.phase, &command)
        .await
        .with_context(|| format!("Failed to open session for phase '{}'", cli.phase))?;

    let chain = if cli.raw {
        TransformChain::new()
    } else {
        TransformChain::standard(&cli.phase)
    };

    // Submit everything up front; the session runs them one at a time.
    let mut pending = Vec::with_capacity(cli.commands.len());
    for text in &cli.commands {
        let result = manager.submit(&cli.phase, &chain.apply(text)).await?;
        pending.push((text, result));
    }

    let mut all_ok = true;
    for (text, result) in pending {
        match result.await {
            CommandOutcome::Completed(output) => {
                if !output.is_empty() {
                    println!("{output}");
                }
            }
            failed => {
                all_ok = false;
                let reason = failed
                    .into_result()
                    .err()
                    .map_or_else(String::new, |err| err.to_string());
                eprintln!("[{}] {text}: {reason}", cli.phase);
            }
        }
    }

    manager.close_all().await;
    Ok(all_ok)
}

fn interpreter_for(override_line: Option<&str>, host: &str) -> Result<InterpreterCommand> {
    match override_line {
        Some(line) => CommandBuilder::new(line)
            .preamble_line(MERGE_STDERR)
            .build()
            .with_context(|| format!("Invalid interpreter '{line}'")),
        None => Ok(Target::from_host(host).interpreter_command()),
    }
}
