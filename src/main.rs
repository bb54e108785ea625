use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use streskit_patch::code::x64::{self, Bitness};
use streskit_patch::{patch_file, PatchPair, Pattern, SignaturePatcher, WriteMode};
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Patches the Linpack vendor check so the benchmark runs on non-Intel CPUs
#[derive(Parser, Debug)]
#[command(name = "streskit-patch", version, about)]
struct Args {
    /// Binary to patch in place
    path: PathBuf,
    /// Hex pattern to search for instead of the Linpack vendor check
    #[arg(long, value_name = "HEX", requires = "replacement")]
    signature: Option<Pattern>,
    /// Hex bytes written over the pattern
    #[arg(long, value_name = "HEX", requires = "signature")]
    replacement: Option<Pattern>,
    /// Print the offset of the patch site without writing
    #[arg(long)]
    dry_run: bool,
    /// Decoding mode used when logging the patch site
    #[arg(long, value_name = "BITS", default_value_t = Bitness::Bits64)]
    bitness: Bitness,
    /// More logging, repeatable
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,
    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Installs a stderr subscriber. `RUST_LOG` takes precedence over `-v`/`-q`
fn init_logging(args: &Args) {
    let level = match (args.quiet, args.verbose) {
        (true, _) => LevelFilter::ERROR,
        (false, 0) => LevelFilter::INFO,
        (false, 1) => LevelFilter::DEBUG,
        (false, _) => LevelFilter::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(args: &Args) -> Result<()> {
    let pair = match (&args.signature, &args.replacement) {
        (Some(signature), Some(replacement)) => {
            PatchPair::new(signature.clone(), replacement.clone()).context("invalid patch")?
        }
        _ => PatchPair::linpack_amd(),
    };
    let patcher = SignaturePatcher::new(pair);
    let mode = if args.dry_run {
        WriteMode::DryRun
    } else {
        WriteMode::InPlace
    };

    let report = patch_file(&args.path, &patcher, mode)?;

    let ip = report.offset as u64;
    let before = x64::describe(&report.before, ip, args.bitness);
    let after = x64::describe(&report.after, ip, args.bitness);
    info!(
        offset = format_args!("{:#x}", report.offset),
        before = before.as_deref().unwrap_or("(undecodable)"),
        after = after.as_deref().unwrap_or("(undecodable)"),
        "patch site"
    );
    if !report.written {
        println!("{:#x}", report.offset);
    }

    Ok(())
}
