use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

/// Target features the shared-memory worker split needs.
const WASM_RUSTFLAGS: &str = "-C target-feature=+atomics,+bulk-memory,+mutable-globals";
const WASM_TARGET: &str = "wasm32-unknown-unknown";

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for kiln")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: fmt, clippy, tests, doc
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Build the entire workspace
    Build,
    /// Build kiln-web for the browser and generate its JS bindings
    Web {
        /// Build without optimizations
        #[arg(long)]
        debug: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            run_fmt()?;
            run_clippy()?;
            run_tests()?;
            run_doc()?;
        }
        Commands::Fmt => run_fmt()?,
        Commands::Clippy => run_clippy()?,
        Commands::Test => run_tests()?,
        Commands::Doc => run_doc()?,
        Commands::Build => run_build()?,
        Commands::Web { debug } => run_web(!debug)?,
    }

    Ok(())
}

fn cargo(what: &str, args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {what} failed");
    }
    Ok(())
}

fn run_fmt() -> Result<()> {
    println!("==> Running cargo fmt --check");
    cargo("fmt check", &["fmt", "--all", "--", "--check"])
}

fn run_clippy() -> Result<()> {
    println!("==> Running cargo clippy");
    cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn run_tests() -> Result<()> {
    println!("==> Running cargo test");
    cargo("test", &["test", "--workspace"])
}

fn run_doc() -> Result<()> {
    println!("==> Running cargo doc");
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}

fn run_build() -> Result<()> {
    println!("==> Running cargo build");
    cargo("build", &["build", "--workspace"])
}

/// Shared memory needs std rebuilt with atomics, hence nightly `build-std`.
fn run_web(release: bool) -> Result<()> {
    println!("==> Building kiln-web for {WASM_TARGET}");
    let mut args = vec![
        "+nightly",
        "build",
        "-p",
        "kiln-web",
        "--target",
        WASM_TARGET,
        "-Z",
        "build-std=std,panic_abort",
    ];
    if release {
        args.push("--release");
    }
    let status = Command::new("cargo")
        .env("RUSTFLAGS", WASM_RUSTFLAGS)
        .args(&args)
        .status()?;
    if !status.success() {
        anyhow::bail!("wasm build failed");
    }

    println!("==> Running wasm-bindgen");
    let profile = if release { "release" } else { "debug" };
    let wasm = format!("target/{WASM_TARGET}/{profile}/kiln_web.wasm");
    let status = Command::new("wasm-bindgen")
        .args([
            wasm.as_str(),
            "--target",
            "web",
            "--out-dir",
            "crates/web/js/pkg",
        ])
        .status()?;
    if !status.success() {
        anyhow::bail!("wasm-bindgen failed");
    }
    Ok(())
}
