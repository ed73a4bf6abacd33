//! Nativecheck - native call harness
//!
//! CLI entry point for running scenario files and making ad-hoc native calls.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nativecheck::config::HarnessConfig;
use nativecheck::ffi::{FaultRule, FunctionSignature, Value};
use nativecheck::logging;
use nativecheck::scenario::{ScenarioFile, ScenarioRunner};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "nck")]
#[command(version)]
#[command(about = "Bind, call and check functions in native shared libraries", long_about = None)]
struct Cli {
    /// Configuration file (default: nativecheck.toml in the working directory or a parent)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call one native function and print the result
    Call {
        /// Shared library path
        #[arg(long)]
        lib: PathBuf,

        /// C-style declaration, e.g. "int addition(int, int)"
        #[arg(long)]
        sig: String,

        /// Fault rule such as "zero_divisor:1" (repeatable)
        #[arg(long = "fault")]
        faults: Vec<String>,

        /// Arguments, parsed according to the declared parameter types
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run a scenario file
    Run {
        /// Scenario file (TOML)
        file: PathBuf,

        /// Print one JSON object per scenario instead of text
        #[arg(long)]
        json: bool,
    },

    /// Parse a declaration and print its normalised form
    Signature {
        /// C-style declaration
        decl: String,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HarnessConfig::load_from_cwd().context("Failed to load config")?,
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    // A subscriber may already be installed when embedded; that is not an error.
    let _ = logging::init(&config.logging);

    match cli.command {
        Commands::Call {
            lib,
            sig,
            faults,
            args,
        } => cmd_call(&config, lib, &sig, &faults, &args),
        Commands::Run { file, json } => cmd_run(config, file, json),
        Commands::Signature { decl } => {
            let sig = FunctionSignature::parse(&decl)?;
            println!("{}", sig);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_call(
    config: &HarnessConfig,
    lib: PathBuf,
    decl: &str,
    faults: &[String],
    raw_args: &[String],
) -> Result<ExitCode> {
    let mut sig = FunctionSignature::parse(decl)?;
    for rule in faults {
        sig = sig.with_fault(rule.parse::<FaultRule>()?);
    }
    sig.validate()?;

    if raw_args.len() != sig.params.len() {
        bail!(
            "{} expects {} arguments, got {}",
            sig.name,
            sig.params.len(),
            raw_args.len()
        );
    }
    let mut args = sig
        .params
        .iter()
        .zip(raw_args)
        .map(|(ty, raw)| {
            Value::parse_arg(*ty, raw).with_context(|| format!("Cannot parse '{}' as {}", raw, ty))
        })
        .collect::<Result<Vec<_>>>()?;

    let resolver = config.resolver();
    let function = resolver.resolve(&lib, sig)?;
    let value = function.invoke(&mut args)?;

    println!("{}", value);
    for (i, ty) in function.signature().params.iter().enumerate() {
        if ty.is_writable() {
            println!("  arg {} ({}) = {}", i, ty, args[i]);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_run(mut config: HarnessConfig, file: PathBuf, json: bool) -> Result<ExitCode> {
    let scenarios = ScenarioFile::load(&file)
        .with_context(|| format!("Failed to load scenarios {}", file.display()))?;

    if config.libraries.dir.is_none() {
        config.libraries.dir = file.parent().map(PathBuf::from);
    }
    let resolver = config.resolver();
    let report = ScenarioRunner::new(&resolver).run_all(&scenarios.scenarios);

    if json {
        for outcome in &report.outcomes {
            let record = serde_json::json!({
                "name": outcome.name,
                "passed": outcome.passed,
                "actual": outcome.actual.as_ref().map(|v| v.to_string()),
                "error": outcome.error.as_ref().map(|e| e.kind()),
                "mismatch": outcome.mismatch,
            });
            println!("{}", record);
        }
        return Ok(exit_code(report.all_passed()));
    }

    for outcome in &report.outcomes {
        println!("{}", outcome);
    }
    println!(
        "\n{} passed, {} failed ({} libraries loaded)",
        report.passed(),
        report.failed(),
        resolver.load_count()
    );

    Ok(exit_code(report.all_passed()))
}

fn exit_code(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
