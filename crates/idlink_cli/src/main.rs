//! Process entry point for identity reconciliation.
//!
//! # Responsibility
//! - Own the contact store lifecycle for the whole process.
//! - Map command-line flags onto store/resolver options.
//! - Print canonical cluster views as JSON on stdout.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use idlink_core::{
    default_log_level, init_logging, ContactId, ContactStore, IdentifyRequest, IdentityResolver,
    ResolverOptions, StoreOptions,
};
use log::info;
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "idlink")]
#[command(about = "Resolve (email, phone) fragments into linked contact clusters", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file (in-memory store when omitted)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Absolute directory for rolling log files (logging disabled when omitted)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log level: trace|debug|info|warn|error
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Bounded wait on the database write lock, in milliseconds
    #[arg(long, global = true, default_value_t = 5_000)]
    busy_timeout_ms: u64,

    /// Attempts per resolution when the store reports a lock conflict
    #[arg(long, global = true, default_value_t = 3)]
    max_attempts: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve one fragment and print its cluster
    Identify(IdentifyArgs),

    /// Resolve newline-delimited JSON requests from stdin
    Batch,

    /// Print the cluster containing a contact id
    Show(ShowArgs),
}

#[derive(Args)]
struct IdentifyArgs {
    #[arg(long)]
    email: Option<String>,

    #[arg(long = "phone")]
    phone_number: Option<String>,
}

#[derive(Args)]
struct ShowArgs {
    #[arg(long)]
    id: ContactId,
}

#[derive(Serialize)]
struct ErrorLine {
    error: String,
    retryable: bool,
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("idlink: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Some(log_dir) = cli.log_dir.as_ref() {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir).context("failed to initialize logging")?;
    }

    let store_options = StoreOptions {
        busy_timeout: Duration::from_millis(cli.busy_timeout_ms),
        ..StoreOptions::default()
    };
    let store = match cli.db.as_ref() {
        Some(path) => ContactStore::open_file(path, store_options)
            .with_context(|| format!("failed to open contact store `{}`", path.display()))?,
        None => ContactStore::open_in_memory(store_options)
            .context("failed to open in-memory contact store")?,
    };
    let resolver = IdentityResolver::new(
        &store,
        ResolverOptions {
            max_attempts: cli.max_attempts,
            ..ResolverOptions::default()
        },
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Commands::Identify(args) => {
            let response = resolver
                .resolve(args.email.as_deref(), args.phone_number.as_deref())
                .context("identify failed")?;
            serde_json::to_writer(&mut out, &response)?;
            writeln!(out)?;
        }
        Commands::Show(args) => {
            let view = resolver.cluster_of(args.id).context("show failed")?;
            serde_json::to_writer(&mut out, &view)?;
            writeln!(out)?;
        }
        Commands::Batch => {
            let processed = run_batch(&resolver, io::stdin().lock(), &mut out)?;
            info!("event=batch_done module=cli status=ok processed={processed}");
        }
    }

    Ok(())
}

/// Resolves one request per input line; failures become error lines.
fn run_batch(
    resolver: &IdentityResolver<'_>,
    input: impl BufRead,
    out: &mut impl Write,
) -> Result<usize> {
    let mut processed = 0;
    for line in input.lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = serde_json::from_str::<IdentifyRequest>(&line)
            .map_err(|err| ErrorLine {
                error: format!("malformed request: {err}"),
                retryable: false,
            })
            .and_then(|request| {
                resolver.identify(&request).map_err(|err| ErrorLine {
                    retryable: err.is_retryable(),
                    error: err.to_string(),
                })
            });
        match outcome {
            Ok(response) => serde_json::to_writer(&mut *out, &response)?,
            Err(error_line) => serde_json::to_writer(&mut *out, &error_line)?,
        }
        writeln!(out)?;
        processed += 1;
    }

    Ok(processed)
}
