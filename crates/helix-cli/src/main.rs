#![deny(unsafe_code)]

mod commands;
mod exit_code;

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Command-line interface for Helix encrypted directory pairs
#[derive(Parser)]
#[command(name = "helix")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Initialize a pair
    helix init ~/notes /mnt/cloud/notes.encrypted

    # See what a sync would do
    helix status ~/notes /mnt/cloud/notes.encrypted

    # Reconcile both sides (pipe the passphrase from a secret manager)
    echo \"$SECRET\" | helix --passphrase-stdin sync ~/notes /mnt/cloud/notes.encrypted

    # Resolve conflicts in favor of the local tree
    helix sync ~/notes /mnt/cloud/notes.encrypted --prefer decrypted
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Pair passphrase (insecure; prefer --passphrase-stdin or HELIX_PASSPHRASE)
    #[arg(long, env = "HELIX_PASSPHRASE", hide_env_values = true, global = true)]
    passphrase: Option<String>,

    /// Read the passphrase from stdin (single line)
    #[arg(long, conflicts_with = "passphrase", global = true)]
    passphrase_stdin: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize a fresh pair over two existing directories
    Init {
        /// Plaintext directory
        decrypted: PathBuf,
        /// Encrypted mirror directory
        encrypted: PathBuf,
    },
    /// Classify pending changes without touching the disk
    Status {
        decrypted: PathBuf,
        encrypted: PathBuf,
    },
    /// Reconcile both sides
    Sync {
        decrypted: PathBuf,
        encrypted: PathBuf,
        /// Plan and report only; mutate nothing
        #[arg(long)]
        dry_run: bool,
        /// Side that wins conflicted entries
        #[arg(long, value_enum)]
        prefer: Option<commands::sync::Prefer>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            exit_code::from_error(&error)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let passphrase = read_passphrase(&cli)?;
    match cli.command {
        Command::Init {
            decrypted,
            encrypted,
        } => commands::init::run(&decrypted, &encrypted, &passphrase),
        Command::Status {
            decrypted,
            encrypted,
        } => commands::status::run(&decrypted, &encrypted, &passphrase),
        Command::Sync {
            decrypted,
            encrypted,
            dry_run,
            prefer,
        } => commands::sync::run(&decrypted, &encrypted, &passphrase, dry_run, prefer),
    }
}

fn read_passphrase(cli: &Cli) -> Result<String> {
    if let Some(passphrase) = &cli.passphrase {
        return Ok(passphrase.clone());
    }
    if cli.passphrase_stdin || !io::stdin().is_terminal() {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("reading passphrase from stdin")?;
        let line = raw.lines().next().unwrap_or("").to_string();
        if line.is_empty() {
            bail!("empty passphrase on stdin");
        }
        return Ok(line);
    }
    bail!("no passphrase: use --passphrase-stdin, HELIX_PASSPHRASE, or --passphrase");
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helix_core={default},helix_cli={default}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
