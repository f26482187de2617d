// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `kestrel`: a minimal command-line front end for the session runtime
/// (SPEC_FULL.md §10.5). Exercises the `SessionControl` surface end to end
/// without a TUI or HTTP transport — those remain named interfaces.
#[derive(Parser, Debug)]
#[command(
    name = "kestrel",
    about = "Runtime core of an interactive coding-assistant agent",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (overrides layered auto-discovery).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a fresh session on a new agent branch and submit one task.
    Run {
        /// The task description to submit.
        task: String,
        /// Working directory the session operates in (defaults to cwd).
        #[arg(long, short = 'd')]
        dir: Option<PathBuf>,
    },

    /// Resume the session on the reserved agent branch and submit one task.
    Resume {
        /// The task description to submit.
        task: String,
        #[arg(long, short = 'd')]
        dir: Option<PathBuf>,
    },

    /// Revert the working tree to a previous checkpoint.
    Revert {
        /// The checkpoint id to revert to.
        checkpoint_id: String,
        #[arg(long, short = 'd')]
        dir: Option<PathBuf>,
    },

    /// Print the event log and session state, then exit.
    Status {
        #[arg(long, short = 'd')]
        dir: Option<PathBuf>,
    },
}
