use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for de-colorize")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy, tests and doc in that order
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates, warnings denied
    Clippy,
    /// Run tests, optionally for a single package
    Test {
        #[arg(short, long)]
        package: Option<String>,
    },
    /// Build rustdoc for the workspace
    Doc,
    /// Build the entire workspace
    Build,
    /// Drive the decolorize binary through a scratch data directory
    Smoke,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            cargo("fmt", &["fmt", "--all", "--", "--check"])?;
            cargo("clippy", CLIPPY)?;
            cargo("test", &["test", "--workspace"])?;
            cargo("doc", DOC)?;
        }
        Commands::Fmt => cargo("fmt", &["fmt", "--all", "--", "--check"])?,
        Commands::Clippy => cargo("clippy", CLIPPY)?,
        Commands::Test { package } => match package {
            Some(package) => cargo("test", &["test", "-p", &package])?,
            None => cargo("test", &["test", "--workspace"])?,
        },
        Commands::Doc => cargo("doc", DOC)?,
        Commands::Build => cargo("build", &["build", "--workspace"])?,
        Commands::Smoke => smoke()?,
    }

    Ok(())
}

const CLIPPY: &[&str] = &[
    "clippy",
    "--workspace",
    "--all-targets",
    "--",
    "-D",
    "warnings",
];
const DOC: &[&str] = &["doc", "--workspace", "--no-deps"];

fn cargo(label: &str, args: &[&str]) -> Result<()> {
    println!("==> cargo {}", args.join(" "));
    let status = Command::new(env_cargo())
        .args(args)
        .status()
        .with_context(|| format!("failed to spawn cargo {label}"))?;
    if !status.success() {
        bail!("cargo {label} failed ({status})");
    }
    Ok(())
}

/// Add, select, list and remove a color against a fresh data directory.
fn smoke() -> Result<()> {
    let data_dir = PathBuf::from("target").join("xtask-smoke");
    if data_dir.exists() {
        std::fs::remove_dir_all(&data_dir)
            .with_context(|| format!("failed to clear {}", data_dir.display()))?;
    }
    let dir = data_dir.to_string_lossy().into_owned();
    let run = |extra: &[&str]| run_cli(&dir, extra);

    run(&["add", "Sunset", "#ff7f50"])?;
    run(&["add", "Moss", "#8a9a5b"])?;
    run(&["list", "--sort-by", "name"])?;
    run(&["dark-mode", "on"])?;
    run(&["history"])?;
    run(&["route", "/palette"])?;
    run(&["info"])?;

    let saved = data_dir.join("de-colorizer-store.json");
    if !saved.is_file() {
        bail!("expected persisted state at {}", saved.display());
    }
    println!("==> smoke run ok, state in {}", saved.display());
    Ok(())
}

fn run_cli(data_dir: &str, extra: &[&str]) -> Result<()> {
    let mut args = vec!["run", "-q", "-p", "decolorize-cli", "--", "--data-dir", data_dir];
    args.extend_from_slice(extra);
    cargo("run", &args)
}

fn env_cargo() -> String {
    std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string())
}
