//! Unbounded engine over constrained Horn clauses
//!
//! Loops become invariant predicates instead of being unrolled, so a
//! safe answer is a real proof for any number of iterations. The
//! sat/unsat reading is inverted relative to the bounded engine: a model
//! assigns every predicate an interpretation under which no violation is
//! derivable, so sat means safe and unsat means the violation is
//! reachable. Trivial-condition targets are not checked here; they
//! belong to the bounded engine.

use crate::ast::{ContractDef, FunctionDef};
use crate::diagnostics::{EngineFinding, Verdict};
use crate::encode::{encode_function, LoopMode};
use crate::error::Result;
use crate::solver::SolverResult;
use crate::targets::Engine;

use super::RunContext;

pub fn check_function(
    contract: &ContractDef,
    func: &FunctionDef,
    ctx: &RunContext<'_>,
) -> Result<Vec<EngineFinding>> {
    let encoded = encode_function(contract, func, ctx.summaries, LoopMode::Invariant)?;

    let mut findings = Vec::new();
    for target in &encoded.targets {
        if target.kind.code(Engine::Chc).is_none() {
            continue;
        }
        let script = encoded
            .horn
            .generate_query(&target.condition, &encoded.decls, &encoded.fun_decls);
        // A backend failure costs this one answer, not the run.
        let result = ctx
            .backend
            .solve(&script)
            .unwrap_or(SolverResult::Unknown);
        let verdict = match result {
            SolverResult::Sat(_) => Verdict::Safe,
            SolverResult::Unsat => Verdict::Violated(None),
            SolverResult::Unknown | SolverResult::Timeout => Verdict::Unknown,
        };
        findings.push(EngineFinding {
            engine: Engine::Chc,
            kind: target.kind,
            span: target.span,
            function: target.function.clone(),
            verdict,
            approximated: target.approximated,
            truncated: encoded.truncated,
        });
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Expr, LValue, Span, Stmt, Ty, VarDecl};
    use crate::engine::testutil::Scripted;
    use crate::engine::CheckerSettings;
    use crate::targets::{SummaryCache, TargetKind};

    fn sp(start: usize, end: usize) -> Span {
        Span::new(start, end)
    }

    fn looping_contract() -> ContractDef {
        // while (x > 0) { x = x - 1; require(x >= 0) }
        let cond = Expr::binary(
            BinOp::Gt,
            Expr::var("x", Ty::uint(256), sp(10, 11)),
            Expr::num(0, Ty::uint(256), sp(14, 15)),
            Ty::Bool,
            sp(10, 15),
        );
        let body = vec![
            Stmt::Assign {
                target: LValue::Var {
                    name: "x".to_string(),
                    ty: Ty::uint(256),
                    span: sp(20, 21),
                },
                value: Expr::binary(
                    BinOp::Sub,
                    Expr::var("x", Ty::uint(256), sp(24, 25)),
                    Expr::num(1, Ty::uint(256), sp(28, 29)),
                    Ty::uint(256),
                    sp(24, 29),
                ),
                span: sp(20, 30),
            },
            Stmt::Require {
                cond: Expr::binary(
                    BinOp::Ge,
                    Expr::var("x", Ty::uint(256), sp(40, 41)),
                    Expr::num(0, Ty::uint(256), sp(45, 46)),
                    Ty::Bool,
                    sp(40, 46),
                ),
                span: sp(32, 47),
            },
        ];
        ContractDef {
            name: "C".to_string(),
            storage: vec![],
            functions: vec![FunctionDef {
                name: "f".to_string(),
                params: vec![VarDecl::new("x", Ty::uint(256), sp(0, 1))],
                ret: None,
                body: vec![Stmt::While {
                    cond,
                    body,
                    span: sp(5, 50),
                }],
                span: sp(0, 60),
            }],
            span: sp(0, 70),
        }
    }

    #[test]
    fn test_trivial_condition_targets_skipped() {
        let contract = looping_contract();
        let settings = CheckerSettings::default();
        let summaries = SummaryCache::new();
        let backend = Scripted(SolverResult::Sat(None));
        let ctx = RunContext {
            settings: &settings,
            summaries: &summaries,
            backend: &backend,
        };
        let findings = check_function(&contract, &contract.functions[0], &ctx).unwrap();
        assert!(findings
            .iter()
            .all(|f| f.kind != TargetKind::TrivialCondition));
        // the loop-body subtraction still produces an underflow check
        assert!(findings
            .iter()
            .any(|f| f.kind == TargetKind::Underflow));
    }

    #[test]
    fn test_solve_error_yields_unknown_verdict() {
        struct Failing;
        impl crate::solver::Backend for Failing {
            fn name(&self) -> &str {
                "failing"
            }

            fn is_available(&self) -> bool {
                true
            }

            fn solve(&self, _script: &str) -> Result<SolverResult> {
                Err(crate::error::CheckError::solver("broken pipe"))
            }
        }

        let contract = looping_contract();
        let settings = CheckerSettings::default();
        let summaries = SummaryCache::new();
        let ctx = RunContext {
            settings: &settings,
            summaries: &summaries,
            backend: &Failing,
        };
        let findings = check_function(&contract, &contract.functions[0], &ctx).unwrap();
        assert!(!findings.is_empty());
        assert!(findings.iter().all(|f| f.verdict == Verdict::Unknown));
    }

    #[test]
    fn test_unsat_means_violated() {
        let contract = looping_contract();
        let settings = CheckerSettings::default();
        let summaries = SummaryCache::new();
        let backend = Scripted(SolverResult::Unsat);
        let ctx = RunContext {
            settings: &settings,
            summaries: &summaries,
            backend: &backend,
        };
        let findings = check_function(&contract, &contract.functions[0], &ctx).unwrap();
        assert!(!findings.is_empty());
        assert!(findings
            .iter()
            .all(|f| f.verdict == Verdict::Violated(None)));
        // invariant mode never truncates
        assert!(findings.iter().all(|f| !f.truncated));
    }

    #[test]
    fn test_query_script_is_horn() {
        let contract = looping_contract();
        let summaries = SummaryCache::new();
        let encoded = encode_function(
            &contract,
            &contract.functions[0],
            &summaries,
            LoopMode::Invariant,
        )
        .unwrap();
        let target = encoded
            .targets
            .iter()
            .find(|t| t.kind == TargetKind::Underflow)
            .unwrap();
        let script = encoded
            .horn
            .generate_query(&target.condition, &encoded.decls, &encoded.fun_decls);
        assert!(script.starts_with("(set-logic HORN)\n"));
        assert!(script.contains("declare-fun inv_f!0"));
    }
}
