// Copyright 2026 Waitline Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use waitline_runtime::cli;
use waitline_runtime::config::RunConfig;

#[derive(Parser)]
#[command(
    name = "waitline",
    about = "Waitline: collects facility wait times into a status table",
    version,
    after_help = "Run 'waitline <command> --help' for details on each command.\nRun 'waitline' with no command to perform a collection run."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging and per-target progress
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Database file (overrides WAITLINE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every target once and store the results
    Run(RunArgs),
    /// Inspect, export or import target definitions
    Targets {
        #[command(subcommand)]
        action: TargetsAction,
    },
    /// Show stored facility status
    Status {
        /// Only this facility
        id: Option<String>,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[derive(Args, Default)]
struct RunArgs {
    /// Targets processed at once
    #[arg(long)]
    concurrency: Option<usize>,
    /// Read targets from a JSON file instead of the database
    #[arg(long)]
    targets_file: Option<PathBuf>,
    /// Collect without writing to the database
    #[arg(long)]
    dry_run: bool,
    /// Skip the downstream notification
    #[arg(long)]
    no_notify: bool,
}

#[derive(Subcommand)]
enum TargetsAction {
    /// List targets and whether they validate
    List {
        /// Read from a JSON file instead of the database
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Write stored targets to a JSON file
    Export { file: PathBuf },
    /// Load targets from a JSON file into the database
    Import { file: PathBuf },
}

fn init_tracing(verbose: bool, quiet: bool, log_json: bool) {
    let default_level = if verbose {
        "waitline_runtime=debug,waitline=debug"
    } else if quiet {
        "waitline_runtime=warn,waitline=warn"
    } else {
        "waitline_runtime=info,waitline=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("WAITLINE_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("WAITLINE_QUIET", "1");
    }
    if cli.verbose {
        std::env::set_var("WAITLINE_VERBOSE", "1");
    }
    init_tracing(cli.verbose, cli.quiet, cli.log_json);

    let mut config = RunConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let result = match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            if let Some(n) = args.concurrency {
                config.concurrency = n.max(1);
            }
            if args.targets_file.is_some() {
                config.targets_file = args.targets_file;
            }
            let options = cli::run_cmd::RunOptions {
                dry_run: args.dry_run,
                no_notify: args.no_notify,
            };
            cli::run_cmd::run(&config, options).await
        }
        Commands::Targets { action } => match action {
            TargetsAction::List { file } => cli::targets_cmd::list(
                &config.db_path,
                file.as_deref().or(config.targets_file.as_deref()),
            ),
            TargetsAction::Export { file } => cli::targets_cmd::export(&config.db_path, &file),
            TargetsAction::Import { file } => cli::targets_cmd::import(&config.db_path, &file),
        },
        Commands::Status { id } => cli::status_cmd::run(&config.db_path, id.as_deref()),
        Commands::Doctor => cli::doctor::run(&config),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "waitline", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !cli::output::is_quiet() && !cli::output::is_json() {
            eprintln!("  Error: {e:#}");
        }
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        }
        std::process::exit(1);
    }

    Ok(())
}
