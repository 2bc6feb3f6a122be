use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rust_sqlsecurity::synth::{exists_query, script_declares, VerifyTarget};
use rust_sqlsecurity::{load_manifest, plan_manifest, Capabilities};

#[derive(Parser)]
#[command(name = "rust-sqlsecurity")]
#[command(author, version, about = "Declarative SQL Server security principal management")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the statements that would create every object in a manifest
    Plan {
        /// Path to the manifest file
        #[arg(short, long)]
        manifest: PathBuf,

        /// Target SQL Server platform (Sql120, Sql130, Sql140, Sql150, Sql160, Azure)
        #[arg(short, long, default_value = "Sql160")]
        target_platform: String,

        /// Database compatibility level to assume
        #[arg(short, long)]
        compatibility_level: Option<u16>,
    },

    /// Print the existence query for a verification target such as "TABLE dbo.Users"
    VerifyQuery {
        #[arg(short, long)]
        target: String,
    },

    /// Check that a script creates or alters its verification target
    CheckScript {
        /// Path to the .sql script
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long)]
        target: String,
    },

    /// Converge a live server to a manifest (connection from SQL_SERVER_* variables)
    #[cfg(feature = "tds")]
    Apply {
        /// Path to the manifest file
        #[arg(short, long)]
        manifest: PathBuf,

        /// Re-apply passwords of existing contained users
        #[arg(long)]
        rotate_passwords: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "rust_sqlsecurity=debug" } else { "rust_sqlsecurity=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Plan {
            manifest,
            target_platform,
            compatibility_level,
        } => {
            let mut caps = Capabilities::for_target_platform(&target_platform)?;
            if let Some(level) = compatibility_level {
                caps = caps.with_compatibility_level(level);
            }
            let manifest = load_manifest(&manifest)?;
            if cli.verbose {
                eprintln!("Loaded manifest with {} objects", manifest.object_count());
            }

            for step in plan_manifest(&manifest, caps)? {
                println!("-- {} {}", step.kind, step.key);
                for statement in &step.statements {
                    println!("{}", statement.display());
                    println!("GO");
                }
                println!();
            }
        }
        Commands::VerifyQuery { target } => {
            let target = VerifyTarget::parse(&target)?;
            println!("{}", exists_query(Some(&target))?);
        }
        Commands::CheckScript { file, target } => {
            let target = VerifyTarget::parse(&target)?;
            let script = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read script file: {}", file.display()))?;
            if !script_declares(&script, &target)? {
                bail!("{} does not create or alter {}", file.display(), target);
            }
            println!("{} declares {}", file.display(), target);
        }
        #[cfg(feature = "tds")]
        Commands::Apply {
            manifest,
            rotate_passwords,
        } => apply(&manifest, rotate_passwords)?,
    }

    Ok(())
}

#[cfg(feature = "tds")]
fn apply(manifest: &std::path::Path, rotate_passwords: bool) -> Result<()> {
    use rust_sqlsecurity::config::ConnectionConfig;
    use rust_sqlsecurity::session::tds::TdsSession;
    use rust_sqlsecurity::{apply_manifest, ApplyOptions, Reconciler};

    let manifest = load_manifest(manifest)?;
    let config = ConnectionConfig::from_env()?;
    let timeout = config.timeout;
    let session = TdsSession::connect(config)?;
    let mut reconciler = Reconciler::connect(session)?.with_timeout(timeout);

    let summary = apply_manifest(&mut reconciler, &manifest, ApplyOptions { rotate_passwords })?;
    println!(
        "{} created, {} updated, {} unchanged, {} scripts run",
        summary.created, summary.updated, summary.unchanged, summary.scripts_run
    );
    Ok(())
}
