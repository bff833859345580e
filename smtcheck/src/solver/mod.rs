//! Solver backends
//!
//! Engines talk to a [`Backend`] trait object, never to a process
//! directly, so tests can script verdicts and the checker degrades
//! gracefully when no solver is installed. The stock implementation
//! shells out to `z3 -in` with a hard timeout; a timeout is an Unknown
//! verdict, not an error.

use std::io::Write;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{CheckError, Result};

/// Variable assignments extracted from a sat model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub assignments: Vec<(String, String)>,
}

/// Outcome of one `(check-sat)` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverResult {
    /// Model present only when the script asked for one.
    Sat(Option<Model>),
    Unsat,
    Unknown,
    Timeout,
}

/// An SMT solver the engines can hand scripts to.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    fn solve(&self, script: &str) -> Result<SolverResult>;
}

/// Z3 subprocess backend.
pub struct Z3Backend {
    path: String,
    timeout_secs: u32,
}

impl Default for Z3Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Z3Backend {
    pub fn new() -> Self {
        Self {
            path: "z3".to_string(),
            timeout_secs: 10,
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_secs = seconds;
        self
    }
}

impl Backend for Z3Backend {
    fn name(&self) -> &str {
        "z3"
    }

    fn is_available(&self) -> bool {
        Command::new(&self.path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn solve(&self, script: &str) -> Result<SolverResult> {
        let mut child = Command::new(&self.path)
            .arg("-in")
            .arg(format!("-T:{}", self.timeout_secs))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CheckError::solver(format!("failed to start {}: {e}", self.path)))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(script.as_bytes())
                .map_err(|e| CheckError::solver(format!("failed to write script: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| CheckError::solver(format!("failed to read solver output: {e}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_solver_output(&stdout)
    }
}

/// Parse the solver's textual answer, including an optional model.
pub fn parse_solver_output(output: &str) -> Result<SolverResult> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(verdict) = lines.next() else {
        return Err(CheckError::solver("empty solver output"));
    };
    match verdict {
        "unsat" => Ok(SolverResult::Unsat),
        "unknown" => Ok(SolverResult::Unknown),
        "timeout" => Ok(SolverResult::Timeout),
        "sat" => {
            let rest: Vec<&str> = lines.collect();
            if rest.is_empty() {
                Ok(SolverResult::Sat(None))
            } else {
                Ok(SolverResult::Sat(Some(parse_model(&rest))))
            }
        }
        other => Err(CheckError::solver(format!(
            "unexpected solver answer: {other}"
        ))),
    }
}

/// Pull `(define-fun name () Sort value)` lines out of a model dump.
/// Entries spanning multiple lines (array values) are skipped.
fn parse_model(lines: &[&str]) -> Model {
    let mut assignments = Vec::new();
    for line in lines {
        let Some(rest) = line.trim_start_matches('(').strip_prefix("define-fun ") else {
            continue;
        };
        let Some((name, after_name)) = rest.split_once(' ') else {
            continue;
        };
        // only zero-arity definitions carry plain values
        let Some(after_args) = after_name.trim_start().strip_prefix("()") else {
            continue;
        };
        let mut parts = after_args.trim_start().splitn(2, ' ');
        let _sort = parts.next();
        let Some(raw_value) = parts.next() else {
            continue;
        };
        let value = normalize_value(raw_value.trim().trim_end_matches(')').trim());
        assignments.push((name.to_string(), value));
    }
    Model { assignments }
}

/// `(- 3)` prints as `-3`.
fn normalize_value(value: &str) -> String {
    let inner = value.trim();
    if let Some(stripped) = inner.strip_prefix("(-") {
        let digits = stripped.trim().trim_end_matches(')').trim();
        return format!("-{digits}");
    }
    inner.to_string()
}

/// Entry-state assignments presented to the user when a violation is
/// reachable: the version-0 value of every variable in the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterexample {
    pub assignments: Vec<(String, String)>,
}

impl Counterexample {
    pub fn from_model(model: &Model) -> Self {
        let mut assignments: Vec<(String, String)> = model
            .assignments
            .iter()
            .filter_map(|(name, value)| {
                let base = name.strip_suffix("!0")?;
                Some((base.to_string(), value.clone()))
            })
            .collect();
        assignments.sort();
        Self { assignments }
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl std::fmt::Display for Counterexample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .assignments
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}
