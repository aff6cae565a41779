//! Phar Compiler CLI
//!
//! Commands: compile, inspect
//! Outputs JSON to stdout, logs to stderr
//! Returns non-zero on failure, 2 when an archive signature or entry CRC does not verify

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use phar_compiler::{BuildConfig, Compiler, PharArchive, COMPILER_VERSION};

#[derive(Parser)]
#[command(name = "phar-compiler")]
#[command(about = "Phar Compiler - reproducible self-executing PHP archives")]
#[command(version = COMPILER_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the archive from a project checkout
    Compile {
        /// Output archive path (replaced if it exists)
        #[arg(default_value = "composer.phar")]
        output: PathBuf,

        /// Root of the project checkout
        #[arg(short, long, default_value = ".")]
        project_root: PathBuf,

        /// JSON build configuration (defaults to the Composer layout)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List the entries and signature of an existing archive
    Inspect {
        /// Archive to read
        archive: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Compile { output, project_root, config } => {
            cmd_compile(&output, project_root, config.as_deref())
        }
        Commands::Inspect { archive } => cmd_inspect(&archive),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn cmd_compile(output: &Path, project_root: PathBuf, config: Option<&Path>) -> ExitCode {
    let config = match config {
        Some(path) => match BuildConfig::load_from_file(path) {
            Ok(c) => c,
            Err(e) => return failure(&e.to_string()),
        },
        None => BuildConfig::default(),
    };

    match Compiler::new(project_root, config).compile(output) {
        Ok(report) => {
            let out = serde_json::json!({
                "success": true,
                "compiler_version": COMPILER_VERSION,
                "build": report,
            });
            println!("{}", serde_json::to_string_pretty(&out).unwrap());
            ExitCode::SUCCESS
        }
        Err(e) => failure(&e.to_string()),
    }
}

fn cmd_inspect(path: &Path) -> ExitCode {
    match PharArchive::open(path) {
        Ok(archive) => {
            println!("{}", serde_json::to_string_pretty(&archive).unwrap());
            if archive.is_intact() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)  // Signature or CRC mismatch
            }
        }
        Err(e) => failure(&e.to_string()),
    }
}

fn failure(message: &str) -> ExitCode {
    let out = serde_json::json!({
        "success": false,
        "error": message,
    });
    println!("{}", serde_json::to_string(&out).unwrap());
    ExitCode::FAILURE
}
