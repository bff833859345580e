//! Verification targets and function summaries
//!
//! A target is one proof obligation at one source position: the encoder
//! emits them while walking a function body, and each engine discharges
//! the whole batch. Targets carry their full path-qualified violation
//! condition, so the collector is append-only and branch arms never need
//! reconciling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};

use crate::ast::Span;
use crate::smt::Term;

/// Which engine produced or owns a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Engine {
    Chc,
    Bmc,
}

impl Engine {
    /// Tag embedded verbatim in diagnostic lines.
    pub fn tag(self) -> &'static str {
        match self {
            Engine::Chc => "CHC",
            Engine::Bmc => "BMC",
        }
    }

    /// Code for the per-engine "proved safe" summary line.
    pub fn proved_safe_code(self) -> u32 {
        match self {
            Engine::Chc => 1391,
            Engine::Bmc => 6002,
        }
    }
}

/// The kinds of proof obligations, in report order.
///
/// The derived `Ord` is the tie-break order for diagnostics sharing a
/// source position, so variant order is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Assert,
    Overflow,
    Underflow,
    DivByZero,
    ModByZero,
    OutOfBounds,
    PopEmptyArray,
    /// `require`/branch condition that can never be false. Checked by the
    /// bounded engine only, with the sat/unsat reading inverted: the
    /// negated condition being unreachable is what gets reported.
    TrivialCondition,
    /// External call followed by a storage write in the same function.
    Reentrancy,
}

impl TargetKind {
    /// Per-engine diagnostic code, `None` when the engine does not check
    /// this kind.
    pub fn code(self, engine: Engine) -> Option<u32> {
        match (self, engine) {
            (TargetKind::Assert, Engine::Chc) => Some(6328),
            (TargetKind::Assert, Engine::Bmc) => Some(4661),
            (TargetKind::Overflow, Engine::Chc) => Some(4984),
            (TargetKind::Overflow, Engine::Bmc) => Some(2661),
            (TargetKind::Underflow, Engine::Chc) => Some(3944),
            (TargetKind::Underflow, Engine::Bmc) => Some(4144),
            (TargetKind::DivByZero, Engine::Chc) => Some(4281),
            (TargetKind::DivByZero, Engine::Bmc) => Some(3046),
            (TargetKind::ModByZero, Engine::Chc) => Some(1218),
            (TargetKind::ModByZero, Engine::Bmc) => Some(5118),
            (TargetKind::OutOfBounds, Engine::Chc) => Some(6368),
            (TargetKind::OutOfBounds, Engine::Bmc) => Some(6084),
            (TargetKind::PopEmptyArray, Engine::Chc) => Some(2529),
            (TargetKind::PopEmptyArray, Engine::Bmc) => Some(5782),
            (TargetKind::TrivialCondition, Engine::Chc) => None,
            (TargetKind::TrivialCondition, Engine::Bmc) => Some(6838),
            (TargetKind::Reentrancy, Engine::Chc) => Some(9889),
            (TargetKind::Reentrancy, Engine::Bmc) => Some(4338),
        }
    }

    /// Message stem; the reporter appends the confidence suffix.
    pub fn message(self) -> &'static str {
        match self {
            TargetKind::Assert => "Assertion violation",
            TargetKind::Overflow => "Arithmetic overflow",
            TargetKind::Underflow => "Arithmetic underflow",
            TargetKind::DivByZero => "Division by zero",
            TargetKind::ModByZero => "Modulo by zero",
            TargetKind::OutOfBounds => "Out of bounds access",
            TargetKind::PopEmptyArray => "Empty array pop",
            TargetKind::TrivialCondition => "Condition is always true",
            TargetKind::Reentrancy => "Reentrancy hazard",
        }
    }

    /// Trivial-condition results read sat/unsat backwards and never take
    /// a confidence suffix.
    pub fn inverted(self) -> bool {
        matches!(self, TargetKind::TrivialCondition)
    }
}

/// One proof obligation at one source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTarget {
    pub kind: TargetKind,
    pub span: Span,
    /// Violation condition including the path prefix it was emitted
    /// under; satisfiable means the violation is reachable (inverted for
    /// [`TargetKind::TrivialCondition`]).
    pub condition: Term,
    /// Set when an over-approximation (external-call havoc, loop
    /// truncation, call summaries) feeds this condition. Downgrades any
    /// violation verdict to "might happen".
    pub approximated: bool,
    /// Enclosing function, for counterexample labelling.
    pub function: String,
}

/// Append-only collector, one per encoded function.
#[derive(Debug, Default, Clone)]
pub struct TargetCollector {
    targets: Vec<VerificationTarget>,
}

impl TargetCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: VerificationTarget) {
        self.targets.push(target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[VerificationTarget] {
        &self.targets
    }

    pub fn into_targets(self) -> Vec<VerificationTarget> {
        self.targets
    }

    /// Mark every target emitted at or after `from` as approximated.
    /// Used when a later discovery (loop truncation) taints an already
    /// emitted prefix of the path.
    pub fn mark_approximated_from(&mut self, from: usize) {
        for target in self.targets.iter_mut().skip(from) {
            target.approximated = true;
        }
    }
}

/// Effect summary of one function, used at internal call sites instead
/// of clause inlining. Over-approximates: every listed slot is havocked
/// at the call site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSummary {
    /// Storage slots the function may write, in deterministic order.
    pub writes: Vec<String>,
    /// The function (transitively) calls external code.
    pub has_external_call: bool,
}

impl FunctionSummary {
    /// A call through this summary is always an over-approximation of
    /// the callee's effect when anything is havocked.
    pub fn is_approximation(&self) -> bool {
        !self.writes.is_empty() || self.has_external_call
    }
}

/// Run-scoped cache computing each function's summary at most once,
/// shared across per-function worker threads.
#[derive(Debug, Default)]
pub struct SummaryCache {
    cells: Mutex<HashMap<String, Arc<OnceLock<FunctionSummary>>>>,
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the summary for `name`, computing it with `compute` if this is
    /// the first request. Concurrent requests for the same name block on
    /// one computation instead of racing.
    pub fn get_or_compute(
        &self,
        name: &str,
        compute: impl FnOnce() -> FunctionSummary,
    ) -> FunctionSummary {
        let cell = {
            let mut cells = match self.cells.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(
                cells
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(OnceLock::new())),
            )
        };
        cell.get_or_init(compute).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_engine_tags_and_codes() {
        assert_eq!(Engine::Chc.tag(), "CHC");
        assert_eq!(Engine::Bmc.tag(), "BMC");
        assert_eq!(Engine::Chc.proved_safe_code(), 1391);
        assert_eq!(Engine::Bmc.proved_safe_code(), 6002);
    }

    #[test]
    fn test_target_codes_per_engine() {
        assert_eq!(TargetKind::Assert.code(Engine::Chc), Some(6328));
        assert_eq!(TargetKind::Assert.code(Engine::Bmc), Some(4661));
        assert_eq!(TargetKind::Overflow.code(Engine::Bmc), Some(2661));
        assert_eq!(TargetKind::TrivialCondition.code(Engine::Chc), None);
        assert_eq!(TargetKind::TrivialCondition.code(Engine::Bmc), Some(6838));
        assert_eq!(TargetKind::Reentrancy.code(Engine::Chc), Some(9889));
    }

    #[test]
    fn test_kind_order_is_report_order() {
        assert!(TargetKind::Assert < TargetKind::Overflow);
        assert!(TargetKind::Overflow < TargetKind::Underflow);
        assert!(TargetKind::PopEmptyArray < TargetKind::TrivialCondition);
    }

    #[test]
    fn test_mark_approximated_from() {
        let mut collector = TargetCollector::new();
        for i in 0..3 {
            collector.push(VerificationTarget {
                kind: TargetKind::Overflow,
                span: Span::new(i, i + 1),
                condition: Term::BoolLit(true),
                approximated: false,
                function: "f".to_string(),
            });
        }
        collector.mark_approximated_from(1);
        let targets = collector.targets();
        assert!(!targets[0].approximated);
        assert!(targets[1].approximated);
        assert!(targets[2].approximated);
    }

    #[test]
    fn test_summary_is_approximation() {
        assert!(!FunctionSummary::default().is_approximation());
        let summary = FunctionSummary {
            writes: vec!["total".to_string()],
            has_external_call: false,
        };
        assert!(summary.is_approximation());
    }

    #[test]
    fn test_summary_cache_computes_once() {
        let cache = SummaryCache::new();
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            FunctionSummary {
                writes: vec!["x".to_string()],
                has_external_call: false,
            }
        };
        let first = cache.get_or_compute("transfer", compute);
        let second = cache.get_or_compute("transfer", || {
            calls.fetch_add(1, Ordering::SeqCst);
            FunctionSummary::default()
        });
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_summary_cache_across_threads() {
        let cache = Arc::new(SummaryCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                scope.spawn(move || {
                    cache.get_or_compute("f", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        FunctionSummary::default()
                    });
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
