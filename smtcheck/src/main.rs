//! Verification CLI
//!
//! Consumes the front end's typed AST as JSON and prints one diagnostic
//! per line. Exit code 1 means at least one warning was reported.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use smtcheck::ast::SourceUnit;
use smtcheck::encode::{encode_function, LoopMode};
use smtcheck::engine::{check_unit, CheckerSettings, EngineSelect};
use smtcheck::error::{report_error, CheckError, Result};
use smtcheck::solver::{Backend, Z3Backend};
use smtcheck::targets::{Engine, SummaryCache};

#[derive(Parser)]
#[command(name = "smtcheck", version, about = "SMT-based contract verifier")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify a typed AST and report findings
    Check {
        /// Typed AST as JSON
        file: PathBuf,
        /// Engine(s) to run
        #[arg(long, value_enum, default_value = "all")]
        engine: EngineSelect,
        /// Loop unrolling depth for the bounded engine
        #[arg(long, default_value_t = 3)]
        unroll: u32,
        /// Per-query solver timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u32,
        /// Do not ask the solver for counterexample models
        #[arg(long)]
        no_counterexample: bool,
        /// Check functions one at a time instead of on worker threads
        #[arg(long)]
        sequential: bool,
        /// Path to the z3 binary
        #[arg(long, default_value = "z3")]
        z3_path: String,
        /// Original source file, for rendering error locations
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Dump the Horn clause query scripts (debug)
    DumpHorn {
        /// Typed AST as JSON
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Check {
            file,
            engine,
            unroll,
            timeout,
            no_counterexample,
            sequential,
            z3_path,
            source,
        } => {
            let settings = CheckerSettings {
                engine,
                unroll_depth: unroll,
                timeout_secs: timeout,
                want_counterexample: !no_counterexample,
                parallel: !sequential,
            };
            check_file(&file, &settings, &z3_path, source.as_deref())
        }
        Command::DumpHorn { file } => dump_horn(&file),
    };

    match outcome {
        Ok(clean) => {
            if !clean {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}

fn load_unit(path: &PathBuf) -> Result<SourceUnit> {
    let json = std::fs::read_to_string(path)?;
    let unit: SourceUnit = serde_json::from_str(&json)?;
    Ok(unit)
}

fn check_file(
    path: &PathBuf,
    settings: &CheckerSettings,
    z3_path: &str,
    source: Option<&std::path::Path>,
) -> Result<bool> {
    let unit = load_unit(path)?;

    let backend = Z3Backend::new()
        .with_path(z3_path)
        .with_timeout(settings.timeout_secs);
    if !backend.is_available() {
        return Err(CheckError::solver(format!(
            "solver `{z3_path}` is not available"
        )));
    }

    let report = match check_unit(&unit, settings, &backend) {
        Ok(report) => report,
        Err(e) => {
            if let Some(source) = source {
                let text = std::fs::read_to_string(source)?;
                report_error(&source.display().to_string(), &text, &e);
                std::process::exit(2);
            }
            return Err(e);
        }
    };

    for diagnostic in &report.diagnostics {
        println!("{diagnostic}");
    }
    Ok(report.is_clean())
}

fn dump_horn(path: &PathBuf) -> Result<bool> {
    let unit = load_unit(path)?;

    for contract in &unit.contracts {
        let summaries = SummaryCache::new();
        for func in &contract.functions {
            let encoded = encode_function(contract, func, &summaries, LoopMode::Invariant)?;
            for target in &encoded.targets {
                if target.kind.code(Engine::Chc).is_none() {
                    continue;
                }
                println!(
                    "; {}.{}: {} at {}",
                    contract.name,
                    func.name,
                    target.kind.message(),
                    target.span
                );
                print!(
                    "{}",
                    encoded.horn.generate_query(
                        &target.condition,
                        &encoded.decls,
                        &encoded.fun_decls
                    )
                );
                println!();
            }
        }
    }
    Ok(true)
}
