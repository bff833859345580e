//! Bounded model checking engine
//!
//! Loops are unrolled to the configured depth, so every target's
//! condition is a single quantifier-free formula: satisfiable means the
//! violation is reachable within the bound, and a model is a concrete
//! entry state triggering it. Trivial-condition targets read the answer
//! the other way around: an unsatisfiable negated condition means the
//! condition can never be false.

use crate::ast::{ContractDef, FunctionDef};
use crate::diagnostics::{EngineFinding, Verdict};
use crate::encode::{encode_function, EncodedFunction, LoopMode};
use crate::error::Result;
use crate::smt::ScriptBuilder;
use crate::solver::{Counterexample, SolverResult};
use crate::targets::{Engine, VerificationTarget};

use super::RunContext;

pub fn check_function(
    contract: &ContractDef,
    func: &FunctionDef,
    ctx: &RunContext<'_>,
) -> Result<Vec<EngineFinding>> {
    let encoded = encode_function(
        contract,
        func,
        ctx.summaries,
        LoopMode::Unroll(ctx.settings.unroll_depth),
    )?;

    let mut findings = Vec::new();
    for target in &encoded.targets {
        let want_model = ctx.settings.want_counterexample && !target.kind.inverted();
        let script = target_script(&encoded, target, want_model);
        // A backend failure costs this one answer, not the run.
        let result = ctx
            .backend
            .solve(&script)
            .unwrap_or(SolverResult::Unknown);

        if target.kind.inverted() {
            // Only an unsatisfiable negation is worth reporting.
            if result == SolverResult::Unsat {
                findings.push(finding(&encoded, target, Verdict::Violated(None)));
            }
            continue;
        }

        let verdict = match result {
            SolverResult::Sat(model) => {
                let cex = model
                    .as_ref()
                    .map(Counterexample::from_model)
                    .filter(|c| !c.is_empty());
                Verdict::Violated(cex)
            }
            SolverResult::Unsat => Verdict::Safe,
            SolverResult::Unknown | SolverResult::Timeout => Verdict::Unknown,
        };
        findings.push(finding(&encoded, target, verdict));
    }
    Ok(findings)
}

/// Script asserting one target's violation condition, declaring only
/// what the condition mentions.
fn target_script(
    encoded: &EncodedFunction,
    target: &VerificationTarget,
    want_model: bool,
) -> String {
    let vars = target.condition.free_vars();
    let mut builder = ScriptBuilder::new().with_model(want_model);
    for fun in &encoded.fun_decls {
        builder.declare_fun(fun.name.clone(), fun.params.clone(), fun.ret.clone());
    }
    for decl in &encoded.decls {
        if vars.contains(&decl.name) {
            builder.declare(decl.name.clone(), decl.sort.clone());
        }
    }
    builder.assert(target.condition.clone());
    builder.generate()
}

fn finding(
    encoded: &EncodedFunction,
    target: &VerificationTarget,
    verdict: Verdict,
) -> EngineFinding {
    EngineFinding {
        engine: Engine::Bmc,
        kind: target.kind,
        span: target.span,
        function: target.function.clone(),
        verdict,
        approximated: target.approximated,
        truncated: encoded.truncated,
    }
}
