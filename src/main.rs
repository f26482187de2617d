// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use kestrel_core::{Session, SessionControl};
use kestrel_model::mock::EchoProvider;
use kestrel_versioning::AlwaysYes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = kestrel_config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { task, dir } => run_once(config, dir, &task, true).await,
        Commands::Resume { task, dir } => run_once(config, dir, &task, false).await,
        Commands::Revert { checkpoint_id, dir } => revert(config, dir, &checkpoint_id).await,
        Commands::Status { dir } => status(config, dir).await,
    }
}

/// Build a session bound to `dir` (defaulting to the current directory).
///
/// The model backend is a named interface (SPEC_FULL.md §1): no wire client
/// ships in this repository, so the CLI wires the always-available
/// `EchoProvider` until a concrete `ModelConfig.provider` is implemented.
fn open_session(config: kestrel_config::Config, dir: Option<std::path::PathBuf>) -> anyhow::Result<Session> {
    let working_dir = match dir {
        Some(d) => d,
        None => std::env::current_dir().context("resolving current directory")?,
    };
    let model: Arc<dyn kestrel_model::ModelProvider> = Arc::new(EchoProvider);
    Ok(Session::new(config, working_dir, model, None, Arc::new(AlwaysYes)))
}

async fn run_once(
    config: kestrel_config::Config,
    dir: Option<std::path::PathBuf>,
    task: &str,
    fresh: bool,
) -> anyhow::Result<()> {
    let mut session = open_session(config, dir)?;
    if fresh {
        session.git_new().await?;
    } else {
        session.git_load().await?;
    }
    session.submit(task).await?;
    print_event_log(&session);
    session.terminate().await
}

async fn revert(config: kestrel_config::Config, dir: Option<std::path::PathBuf>, checkpoint_id: &str) -> anyhow::Result<()> {
    let mut session = open_session(config, dir)?;
    session.git_load().await?;
    session.revert(checkpoint_id).await?;
    println!("reverted to checkpoint {checkpoint_id}");
    session.terminate().await
}

async fn status(config: kestrel_config::Config, dir: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let session = open_session(config, dir)?;
    println!("session {}  state={:?}", session.id, session.state);
    print_event_log(&session);
    Ok(())
}

fn print_event_log(session: &Session) {
    for event in session.event_log.iter() {
        println!("{:>4}  {:?}", event.id, event.event_type);
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(std::env::var("KESTREL_LOG").unwrap_or_else(|_| level.to_string())))
        .unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
