//! Verification driver
//!
//! Runs the selected engine(s) over every function of every contract
//! and reconciles their findings into one report. Functions are
//! independent proof tasks, so they run on scoped worker threads; the
//! summary cache is the only shared state and computes each callee
//! summary at most once per contract.

pub mod bmc;
pub mod chc;

use std::sync::Mutex;

use crate::ast::{ContractDef, FunctionDef, SourceUnit};
use crate::diagnostics::{reconcile, EngineFinding, Report};
use crate::error::{CheckError, Result};
use crate::solver::Backend;
use crate::targets::SummaryCache;

/// Which engine(s) to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EngineSelect {
    Chc,
    Bmc,
    #[default]
    All,
}

impl EngineSelect {
    pub fn runs_chc(self) -> bool {
        matches!(self, EngineSelect::Chc | EngineSelect::All)
    }

    pub fn runs_bmc(self) -> bool {
        matches!(self, EngineSelect::Bmc | EngineSelect::All)
    }
}

#[derive(Debug, Clone)]
pub struct CheckerSettings {
    pub engine: EngineSelect,
    /// Loop unrolling depth for the bounded engine.
    pub unroll_depth: u32,
    /// Per-query solver timeout in seconds.
    pub timeout_secs: u32,
    /// Ask the solver for models and attach entry-state counterexamples.
    pub want_counterexample: bool,
    /// Run per-function proof tasks on worker threads.
    pub parallel: bool,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            engine: EngineSelect::All,
            unroll_depth: 3,
            timeout_secs: 10,
            want_counterexample: true,
            parallel: true,
        }
    }
}

/// Everything a proof task needs, threaded explicitly.
pub struct RunContext<'a> {
    pub settings: &'a CheckerSettings,
    pub summaries: &'a SummaryCache,
    pub backend: &'a dyn Backend,
}

/// Check a whole source unit and produce the reconciled report.
pub fn check_unit(
    unit: &SourceUnit,
    settings: &CheckerSettings,
    backend: &dyn Backend,
) -> Result<Report> {
    if let Err(span) = unit.validate() {
        return Err(CheckError::invalid_ast(
            "unresolved type left by the front end",
            span,
        ));
    }

    let mut findings: Vec<EngineFinding> = Vec::new();
    for contract in &unit.contracts {
        let summaries = SummaryCache::new();
        let ctx = RunContext {
            settings,
            summaries: &summaries,
            backend,
        };
        findings.extend(check_contract(contract, &ctx)?);
    }
    Ok(reconcile(findings))
}

fn check_contract(contract: &ContractDef, ctx: &RunContext<'_>) -> Result<Vec<EngineFinding>> {
    if !ctx.settings.parallel || contract.functions.len() <= 1 {
        let mut findings = Vec::new();
        for func in &contract.functions {
            findings.extend(check_function(contract, func, ctx)?);
        }
        return Ok(findings);
    }

    let results: Mutex<Vec<Result<Vec<EngineFinding>>>> = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for func in &contract.functions {
            let results = &results;
            scope.spawn(move || {
                let outcome = check_function(contract, func, ctx);
                let mut guard = match results.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.push(outcome);
            });
        }
    });

    let collected = match results.into_inner() {
        Ok(collected) => collected,
        Err(poisoned) => poisoned.into_inner(),
    };
    let mut findings = Vec::new();
    for outcome in collected {
        findings.extend(outcome?);
    }
    Ok(findings)
}

fn check_function(
    contract: &ContractDef,
    func: &FunctionDef,
    ctx: &RunContext<'_>,
) -> Result<Vec<EngineFinding>> {
    let mut findings = Vec::new();
    if ctx.settings.engine.runs_chc() {
        findings.extend(chc::check_function(contract, func, ctx)?);
    }
    if ctx.settings.engine.runs_bmc() {
        findings.extend(bmc::check_function(contract, func, ctx)?);
    }
    Ok(findings)
}
