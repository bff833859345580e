//! Verdict reconciliation and report formatting
//!
//! Both engines hand their per-target findings to the reconciler, which
//! collapses them into one diagnostic per source obligation and decides
//! the confidence wording. The line format is fixed:
//!
//! ```text
//! <Severity> <Code>: (<startByte>-<endByte>): <EngineTag>: <Message>
//! ```
//!
//! Proved-safe obligations are not listed individually; each engine gets
//! one `Info` summary line counting them.

use serde::{Deserialize, Serialize};

use crate::ast::Span;
use crate::solver::Counterexample;
use crate::targets::{Engine, TargetKind};

/// Per-engine outcome for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Safe,
    Violated(Option<Counterexample>),
    Unknown,
}

/// One engine's answer for one obligation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFinding {
    pub engine: Engine,
    pub kind: TargetKind,
    pub span: Span,
    pub function: String,
    pub verdict: Verdict,
    /// The encoding over-approximated on the path to this target.
    pub approximated: bool,
    /// The function's loops were truncated by the unrolling bound.
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

/// How sure the checker is that a violation occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    DefinitelyHappens,
    MightHappen,
}

impl Confidence {
    fn suffix(self) -> &'static str {
        match self {
            Confidence::DefinitelyHappens => "happens here.",
            Confidence::MightHappen => "might happen here.",
        }
    }
}

/// A single output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: u32,
    pub span: Option<Span>,
    pub engine: Engine,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.span {
            Some(span) => write!(
                f,
                "{} {}: {}: {}: {}",
                self.severity,
                self.code,
                span,
                self.engine.tag(),
                self.message
            ),
            None => write!(
                f,
                "{} {}: {}: {}",
                self.severity,
                self.code,
                self.engine.tag(),
                self.message
            ),
        }
    }
}

/// The full reconciled report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub diagnostics: Vec<Diagnostic>,
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for diag in &self.diagnostics {
            writeln!(f, "{diag}")?;
        }
        Ok(())
    }
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.diagnostics
            .iter()
            .all(|d| d.severity == Severity::Info)
    }
}

/// Collapse both engines' findings into one report.
///
/// Per obligation (same span and kind):
/// - any violation with a fully precise path, and no engine claiming the
///   obligation safe, reads "happens here."
/// - a violation that crossed an approximation or truncation, or that the
///   other engine contradicts, reads "might happen here."
/// - nothing proved and nothing violated still produces a diagnostic;
///   truncation never silently hides an obligation
/// - proved-safe obligations are counted into per-engine summary lines
pub fn reconcile(findings: Vec<EngineFinding>) -> Report {
    // Group by obligation identity.
    let mut groups: Vec<(Span, TargetKind, Vec<EngineFinding>)> = Vec::new();
    for finding in findings {
        match groups
            .iter_mut()
            .find(|(span, kind, _)| *span == finding.span && *kind == finding.kind)
        {
            Some((_, _, group)) => group.push(finding),
            None => groups.push((finding.span, finding.kind, vec![finding])),
        }
    }

    let mut warnings: Vec<(Span, TargetKind, Diagnostic)> = Vec::new();
    let mut safe_counts: Vec<(Engine, usize)> = vec![(Engine::Chc, 0), (Engine::Bmc, 0)];

    for (span, kind, group) in &groups {
        let violated: Vec<&EngineFinding> = group
            .iter()
            .filter(|f| matches!(f.verdict, Verdict::Violated(_)))
            .collect();
        let any_safe = group.iter().any(|f| f.verdict == Verdict::Safe);

        if !violated.is_empty() {
            // Strongest finding wins the line: precise over approximated,
            // unbounded engine over bounded on ties.
            let best = violated
                .iter()
                .min_by_key(|f| (f.approximated || f.truncated, f.engine))
                .copied();
            let Some(best) = best else { continue };
            let precise = !best.approximated && !best.truncated;
            let confidence = if precise && !any_safe {
                Confidence::DefinitelyHappens
            } else {
                Confidence::MightHappen
            };
            warnings.push((*span, *kind, make_warning(*span, *kind, best, Some(confidence))));
            // The other engine proved nothing here; no safe count.
            continue;
        }

        if any_safe {
            for finding in group {
                if finding.verdict == Verdict::Safe {
                    if let Some(entry) = safe_counts
                        .iter_mut()
                        .find(|(engine, _)| *engine == finding.engine)
                    {
                        entry.1 += 1;
                    }
                }
            }
            continue;
        }

        // Every engine came back unknown: report the obligation as open.
        let best = group.iter().min_by_key(|f| f.engine).cloned();
        if let Some(best) = best {
            warnings.push((
                *span,
                *kind,
                make_warning(*span, *kind, &best, Some(Confidence::MightHappen)),
            ));
        }
    }

    warnings.sort_by(|a, b| {
        let key = |(span, kind, diag): &(Span, TargetKind, Diagnostic)| {
            (*span, *kind, diag.engine)
        };
        key(a).cmp(&key(b))
    });

    let mut diagnostics: Vec<Diagnostic> = warnings.into_iter().map(|(_, _, d)| d).collect();
    for (engine, count) in safe_counts {
        if count > 0 {
            diagnostics.push(Diagnostic {
                severity: Severity::Info,
                code: engine.proved_safe_code(),
                span: None,
                engine,
                message: format!("{count} verification condition(s) proved safe!"),
            });
        }
    }

    Report { diagnostics }
}

fn make_warning(
    span: Span,
    kind: TargetKind,
    finding: &EngineFinding,
    confidence: Option<Confidence>,
) -> Diagnostic {
    let code = kind
        .code(finding.engine)
        .unwrap_or_else(|| finding.engine.proved_safe_code());
    let mut message = if kind.inverted() {
        // Trivial conditions state a fact, never a possibility.
        format!("{}.", kind.message())
    } else {
        match confidence {
            Some(c) => format!("{} {}", kind.message(), c.suffix()),
            None => kind.message().to_string(),
        }
    };
    if let Verdict::Violated(Some(cex)) = &finding.verdict {
        if !cex.is_empty() {
            message.push_str(&format!("\nCounterexample: {cex}"));
        }
    }
    Diagnostic {
        severity: Severity::Warning,
        code,
        span: Some(span),
        engine: finding.engine,
        message,
    }
}
