//! Integration tests for the verification pipeline
//!
//! Exercises the full path from typed AST to reconciled report:
//! - engine selection and sat/unsat readings
//! - diagnostic line format and ordering
//! - counterexample presentation
//! - real-solver runs, guarded on z3 being installed

use smtcheck::ast::{
    BinOp, ContractDef, Expr, FunctionDef, LValue, SourceUnit, Span, Stmt, Ty, VarDecl,
};
use smtcheck::engine::{check_unit, CheckerSettings, EngineSelect};
use smtcheck::solver::{Backend, Model, SolverResult, Z3Backend};
use smtcheck::Result;

fn sp(start: usize, end: usize) -> Span {
    Span::new(start, end)
}

/// One contract with one function, the common test shape.
fn unit_with(params: Vec<VarDecl>, body: Vec<Stmt>) -> SourceUnit {
    SourceUnit {
        contracts: vec![ContractDef {
            name: "C".to_string(),
            storage: vec![],
            functions: vec![FunctionDef {
                name: "f".to_string(),
                params,
                ret: None,
                body,
                span: sp(0, 100),
            }],
            span: sp(0, 120),
        }],
    }
}

fn assert_gt_zero_unit() -> SourceUnit {
    unit_with(
        vec![VarDecl::new("x", Ty::uint(256), sp(5, 6))],
        vec![Stmt::Assert {
            cond: Expr::binary(
                BinOp::Gt,
                Expr::var("x", Ty::uint(256), sp(40, 41)),
                Expr::num(0, Ty::uint(256), sp(44, 45)),
                Ty::Bool,
                sp(40, 45),
            ),
            span: sp(33, 46),
        }],
    )
}

fn assert_ge_zero_unit() -> SourceUnit {
    unit_with(
        vec![VarDecl::new("x", Ty::uint(256), sp(5, 6))],
        vec![Stmt::Assert {
            cond: Expr::binary(
                BinOp::Ge,
                Expr::var("x", Ty::uint(256), sp(40, 41)),
                Expr::num(0, Ty::uint(256), sp(45, 46)),
                Ty::Bool,
                sp(40, 46),
            ),
            span: sp(33, 47),
        }],
    )
}

fn report_lines(unit: &SourceUnit, settings: &CheckerSettings, backend: &dyn Backend) -> Vec<String> {
    let report = check_unit(unit, settings, backend).unwrap();
    report.diagnostics.iter().map(|d| d.to_string()).collect()
}

/// Answers Horn scripts and quantifier-free scripts differently, so one
/// backend can make both engines agree or disagree.
struct Split {
    horn: SolverResult,
    qf: SolverResult,
}

impl Backend for Split {
    fn name(&self) -> &str {
        "split"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn solve(&self, script: &str) -> Result<SolverResult> {
        if script.starts_with("(set-logic HORN)") {
            Ok(self.horn.clone())
        } else {
            Ok(self.qf.clone())
        }
    }
}

/// Sat with an entry-state model whenever the script asks for one.
struct WithModel;

impl Backend for WithModel {
    fn name(&self) -> &str {
        "with-model"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn solve(&self, script: &str) -> Result<SolverResult> {
        if script.contains("(get-model)") {
            Ok(SolverResult::Sat(Some(Model {
                assignments: vec![("x!0".to_string(), "0".to_string())],
            })))
        } else {
            Ok(SolverResult::Sat(None))
        }
    }
}

// ============================================
// Scripted-backend pipeline tests
// ============================================

#[test]
fn test_clean_report_counts_per_engine() {
    // CHC reads sat as safe, BMC reads unsat as safe.
    let backend = Split {
        horn: SolverResult::Sat(None),
        qf: SolverResult::Unsat,
    };
    let lines = report_lines(&assert_gt_zero_unit(), &CheckerSettings::default(), &backend);
    assert_eq!(
        lines,
        vec![
            "Info 1391: CHC: 1 verification condition(s) proved safe!",
            "Info 6002: BMC: 1 verification condition(s) proved safe!",
        ]
    );
}

#[test]
fn test_both_engines_violated_is_definite() {
    let backend = Split {
        horn: SolverResult::Unsat,
        qf: SolverResult::Sat(None),
    };
    let lines = report_lines(&assert_gt_zero_unit(), &CheckerSettings::default(), &backend);
    // one obligation, one line; the unbounded engine carries it
    assert_eq!(
        lines,
        vec!["Warning 6328: (33-46): CHC: Assertion violation happens here."]
    );
}

#[test]
fn test_engine_disagreement_is_might_happen() {
    // CHC proves safe, BMC finds a violation within the bound.
    let backend = Split {
        horn: SolverResult::Sat(None),
        qf: SolverResult::Sat(None),
    };
    let lines = report_lines(&assert_gt_zero_unit(), &CheckerSettings::default(), &backend);
    assert_eq!(
        lines,
        vec!["Warning 4661: (33-46): BMC: Assertion violation might happen here."]
    );
}

#[test]
fn test_counterexample_shown_with_bmc_only() {
    let settings = CheckerSettings {
        engine: EngineSelect::Bmc,
        ..CheckerSettings::default()
    };
    let lines = report_lines(&assert_gt_zero_unit(), &settings, &WithModel);
    assert_eq!(
        lines,
        vec![
            "Warning 4661: (33-46): BMC: Assertion violation happens here.\nCounterexample: x = 0"
        ]
    );
}

#[test]
fn test_unknown_everywhere_keeps_obligation_visible() {
    let backend = Split {
        horn: SolverResult::Unknown,
        qf: SolverResult::Timeout,
    };
    let lines = report_lines(&assert_gt_zero_unit(), &CheckerSettings::default(), &backend);
    assert_eq!(
        lines,
        vec!["Warning 6328: (33-46): CHC: Assertion violation might happen here."]
    );
}

#[test]
fn test_trivial_require_reported_once() {
    // require(x >= 0) on an unsigned value: the negated condition is
    // unsatisfiable, which is exactly the trivial-condition reading.
    let unit = unit_with(
        vec![VarDecl::new("x", Ty::uint(256), sp(5, 6))],
        vec![Stmt::Require {
            cond: Expr::binary(
                BinOp::Ge,
                Expr::var("x", Ty::uint(256), sp(20, 21)),
                Expr::num(0, Ty::uint(256), sp(25, 26)),
                Ty::Bool,
                sp(20, 26),
            ),
            span: sp(12, 27),
        }],
    );
    let backend = Split {
        horn: SolverResult::Sat(None),
        qf: SolverResult::Unsat,
    };
    let lines = report_lines(&unit, &CheckerSettings::default(), &backend);
    assert_eq!(
        lines,
        vec!["Warning 6838: (20-26): BMC: Condition is always true."]
    );
}

#[test]
fn test_multiple_obligations_sorted_by_span() {
    // x / y then assert: division targets come before the assertion in
    // source order and the report preserves that order.
    let div = Expr::binary(
        BinOp::Div,
        Expr::var("x", Ty::uint(256), sp(20, 21)),
        Expr::var("y", Ty::uint(256), sp(24, 25)),
        Ty::uint(256),
        sp(20, 25),
    );
    let unit = unit_with(
        vec![
            VarDecl::new("x", Ty::uint(256), sp(5, 6)),
            VarDecl::new("y", Ty::uint(256), sp(8, 9)),
        ],
        vec![
            Stmt::VarDecl {
                name: "z".to_string(),
                ty: Ty::uint(256),
                init: Some(div),
                span: sp(15, 26),
            },
            Stmt::Assert {
                cond: Expr::binary(
                    BinOp::Gt,
                    Expr::var("z", Ty::uint(256), sp(40, 41)),
                    Expr::num(0, Ty::uint(256), sp(44, 45)),
                    Ty::Bool,
                    sp(40, 45),
                ),
                span: sp(33, 46),
            },
        ],
    );
    let backend = Split {
        horn: SolverResult::Unsat,
        qf: SolverResult::Sat(None),
    };
    let lines = report_lines(&unit, &CheckerSettings::default(), &backend);
    assert_eq!(
        lines,
        vec![
            "Warning 4281: (20-25): CHC: Division by zero happens here.",
            "Warning 6328: (33-46): CHC: Assertion violation happens here.",
        ]
    );
}

#[test]
fn test_unchecked_block_has_no_overflow_obligation() {
    let add = |span_lo: usize| {
        Expr::binary(
            BinOp::Add,
            Expr::var("x", Ty::uint(8), sp(span_lo, span_lo + 1)),
            Expr::num(1, Ty::uint(8), sp(span_lo + 4, span_lo + 5)),
            Ty::uint(8),
            sp(span_lo, span_lo + 5),
        )
    };
    let assign = |span_lo: usize| Stmt::Assign {
        target: LValue::Var {
            name: "x".to_string(),
            ty: Ty::uint(8),
            span: sp(span_lo - 4, span_lo - 3),
        },
        value: add(span_lo),
        span: sp(span_lo - 4, span_lo + 5),
    };
    let checked = unit_with(
        vec![VarDecl::new("x", Ty::uint(8), sp(5, 6))],
        vec![assign(20)],
    );
    let unchecked = unit_with(
        vec![VarDecl::new("x", Ty::uint(8), sp(5, 6))],
        vec![Stmt::Unchecked {
            body: vec![assign(20)],
            span: sp(10, 30),
        }],
    );

    // every query answers "violated"; only the checked variant has an
    // overflow obligation to violate
    let backend = Split {
        horn: SolverResult::Unsat,
        qf: SolverResult::Sat(None),
    };
    let checked_lines = report_lines(&checked, &CheckerSettings::default(), &backend);
    assert_eq!(
        checked_lines,
        vec!["Warning 4984: (16-25): CHC: Arithmetic overflow happens here."]
    );
    let unchecked_lines = report_lines(&unchecked, &CheckerSettings::default(), &backend);
    assert!(unchecked_lines.is_empty());
}

#[test]
fn test_reentrancy_hazard_is_never_definite() {
    // external call, then a storage write: flagged at the call site even
    // when every solver query claims the path reachable
    let unit = SourceUnit {
        contracts: vec![ContractDef {
            name: "C".to_string(),
            storage: vec![VarDecl::new("balance", Ty::uint(256), sp(5, 12))],
            functions: vec![FunctionDef {
                name: "withdraw".to_string(),
                params: vec![],
                ret: None,
                body: vec![
                    Stmt::ExternalCall {
                        callee: "recipient".to_string(),
                        span: sp(30, 48),
                    },
                    Stmt::Assign {
                        target: LValue::Var {
                            name: "balance".to_string(),
                            ty: Ty::uint(256),
                            span: sp(55, 62),
                        },
                        value: Expr::num(0, Ty::uint(256), sp(65, 66)),
                        span: sp(55, 66),
                    },
                ],
                span: sp(20, 70),
            }],
            span: sp(0, 80),
        }],
    };
    let backend = Split {
        horn: SolverResult::Unsat,
        qf: SolverResult::Sat(None),
    };
    let lines = report_lines(&unit, &CheckerSettings::default(), &backend);
    assert!(
        lines
            .iter()
            .any(|l| l == "Warning 9889: (30-48): CHC: Reentrancy hazard might happen here."),
        "got: {lines:?}"
    );
}

#[test]
fn test_parallel_and_sequential_reports_match() {
    let mut unit = assert_gt_zero_unit();
    let mut g = unit.contracts[0].functions[0].clone();
    g.name = "g".to_string();
    unit.contracts[0].functions.push(g);

    let backend = Split {
        horn: SolverResult::Unsat,
        qf: SolverResult::Sat(None),
    };
    let parallel = report_lines(&unit, &CheckerSettings::default(), &backend);
    let sequential = report_lines(
        &unit,
        &CheckerSettings {
            parallel: false,
            ..CheckerSettings::default()
        },
        &backend,
    );
    assert_eq!(parallel, sequential);
}

// ============================================
// Real-solver tests (skipped without z3)
// ============================================

#[test]
fn test_z3_bmc_finds_assert_violation() {
    let backend = Z3Backend::new().with_timeout(10);
    if !backend.is_available() {
        return;
    }
    let settings = CheckerSettings {
        engine: EngineSelect::Bmc,
        ..CheckerSettings::default()
    };
    let report = check_unit(&assert_gt_zero_unit(), &settings, &backend).unwrap();
    assert!(!report.is_clean());
    let lines: Vec<String> = report.diagnostics.iter().map(|d| d.to_string()).collect();
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("Warning 4661: (33-46): BMC: Assertion violation")),
        "got: {lines:?}"
    );
}

#[test]
fn test_z3_bmc_proves_unsigned_nonnegative() {
    let backend = Z3Backend::new().with_timeout(10);
    if !backend.is_available() {
        return;
    }
    let settings = CheckerSettings {
        engine: EngineSelect::Bmc,
        want_counterexample: false,
        ..CheckerSettings::default()
    };
    let report = check_unit(&assert_ge_zero_unit(), &settings, &backend).unwrap();
    let lines: Vec<String> = report.diagnostics.iter().map(|d| d.to_string()).collect();
    assert_eq!(
        lines,
        vec!["Info 6002: BMC: 1 verification condition(s) proved safe!"]
    );
}

#[test]
fn test_z3_bmc_overflow_counterexample_is_entry_state() {
    let backend = Z3Backend::new().with_timeout(10);
    if !backend.is_available() {
        return;
    }
    // x: uint8; x = x + 1 overflows exactly at x = 255
    let unit = unit_with(
        vec![VarDecl::new("x", Ty::uint(8), sp(5, 6))],
        vec![Stmt::Assign {
            target: LValue::Var {
                name: "x".to_string(),
                ty: Ty::uint(8),
                span: sp(16, 17),
            },
            value: Expr::binary(
                BinOp::Add,
                Expr::var("x", Ty::uint(8), sp(20, 21)),
                Expr::num(1, Ty::uint(8), sp(24, 25)),
                Ty::uint(8),
                sp(20, 25),
            ),
            span: sp(16, 25),
        }],
    );
    let settings = CheckerSettings {
        engine: EngineSelect::Bmc,
        ..CheckerSettings::default()
    };
    let report = check_unit(&unit, &settings, &backend).unwrap();
    let lines: Vec<String> = report.diagnostics.iter().map(|d| d.to_string()).collect();
    assert_eq!(lines.len(), 1, "got: {lines:?}");
    assert!(lines[0].starts_with("Warning 2661: (16-25): BMC: Arithmetic overflow happens here."));
    assert!(lines[0].contains("Counterexample: x = 255"), "got: {lines:?}");
}

#[test]
fn test_z3_chc_loop_invariant_proves_assert() {
    let backend = Z3Backend::new().with_timeout(10);
    if !backend.is_available() {
        return;
    }
    // i := 0; while (i < 10) i := i + 1; assert(i <= 10)
    // BMC at depth 3 cannot reach the exit precisely; CHC proves it.
    let uint = Ty::uint(256);
    let unit = unit_with(
        vec![],
        vec![
            Stmt::VarDecl {
                name: "i".to_string(),
                ty: uint.clone(),
                init: Some(Expr::num(0, uint.clone(), sp(10, 11))),
                span: sp(5, 11),
            },
            Stmt::While {
                cond: Expr::binary(
                    BinOp::Lt,
                    Expr::var("i", uint.clone(), sp(20, 21)),
                    Expr::num(10, uint.clone(), sp(24, 26)),
                    Ty::Bool,
                    sp(20, 26),
                ),
                body: vec![Stmt::Assign {
                    target: LValue::Var {
                        name: "i".to_string(),
                        ty: uint.clone(),
                        span: sp(30, 31),
                    },
                    value: Expr::binary(
                        BinOp::Add,
                        Expr::var("i", uint.clone(), sp(34, 35)),
                        Expr::num(1, uint.clone(), sp(38, 39)),
                        uint.clone(),
                        sp(34, 39),
                    ),
                    span: sp(30, 39),
                }],
                span: sp(15, 40),
            },
            Stmt::Assert {
                cond: Expr::binary(
                    BinOp::Le,
                    Expr::var("i", uint.clone(), sp(52, 53)),
                    Expr::num(10, uint.clone(), sp(57, 59)),
                    Ty::Bool,
                    sp(52, 59),
                ),
                span: sp(45, 60),
            },
        ],
    );
    let settings = CheckerSettings {
        engine: EngineSelect::Chc,
        ..CheckerSettings::default()
    };
    let report = check_unit(&unit, &settings, &backend).unwrap();
    let lines: Vec<String> = report.diagnostics.iter().map(|d| d.to_string()).collect();
    assert!(report.is_clean(), "got: {lines:?}");
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("Info 1391: CHC:") && l.ends_with("proved safe!")),
        "got: {lines:?}"
    );
}
