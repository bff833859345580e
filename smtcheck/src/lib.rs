//! Static verification of contract programs
//!
//! Takes a fully typed AST, encodes each function into SMT, and proves
//! or refutes assertion, arithmetic, and array-access safety with two
//! complementary engines: bounded model checking (loop unrolling) and
//! unbounded constrained Horn clauses (loop invariants).

pub mod ast;
pub mod diagnostics;
pub mod encode;
pub mod engine;
pub mod error;
pub mod horn;
pub mod smt;
pub mod solver;
pub mod state;
pub mod targets;

pub use ast::Span;
pub use diagnostics::Report;
pub use engine::{check_unit, CheckerSettings, EngineSelect};
pub use error::{CheckError, Result};
pub use solver::{Backend, Z3Backend};
