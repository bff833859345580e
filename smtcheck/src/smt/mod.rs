//! SMT-LIB2 term language and script assembly
//!
//! Terms are structural rather than strings so the encoder can build,
//! inspect, and reuse fragments before serialization. `ScriptBuilder`
//! assembles the final `(set-logic ...)` / declarations / assertions /
//! `(check-sat)` script handed to a solver backend.

use std::collections::HashSet;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// SMT-LIB2 sorts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sort {
    Bool,
    Int,
    /// Array sort: (Array Index Element)
    Array(Box<Sort>, Box<Sort>),
}

impl Sort {
    pub fn array(index: Sort, elem: Sort) -> Sort {
        Sort::Array(Box::new(index), Box::new(elem))
    }

    pub fn to_smt(&self) -> String {
        match self {
            Sort::Bool => "Bool".to_string(),
            Sort::Int => "Int".to_string(),
            Sort::Array(idx, elem) => format!("(Array {} {})", idx.to_smt(), elem.to_smt()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            // Euclidean division/remainder, matching the original engine's
            // integer semantics on the guarded (non-zero divisor) path.
            ArithOp::Div => "div",
            ArithOp::Mod => "mod",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// A first-order term over Int, Bool and Array sorts.
///
/// Numerals are decimal strings because 256-bit bounds exceed every
/// machine integer type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    BoolLit(bool),
    /// Decimal numeral, possibly negative
    Num(String),
    Var(String),
    /// Uninterpreted or defined function application
    App(String, Vec<Term>),
    Not(Box<Term>),
    And(Vec<Term>),
    Or(Vec<Term>),
    Implies(Box<Term>, Box<Term>),
    Ite(Box<Term>, Box<Term>, Box<Term>),
    Eq(Box<Term>, Box<Term>),
    Cmp(CmpOp, Box<Term>, Box<Term>),
    Arith(ArithOp, Box<Term>, Box<Term>),
    Neg(Box<Term>),
    Select(Box<Term>, Box<Term>),
    Store(Box<Term>, Box<Term>, Box<Term>),
}

impl Term {
    pub fn num(value: impl std::fmt::Display) -> Term {
        Term::Num(value.to_string())
    }

    pub fn var(name: impl Into<String>) -> Term {
        Term::Var(name.into())
    }

    /// Conjunction with unit/flattening simplification.
    pub fn and(terms: Vec<Term>) -> Term {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                Term::BoolLit(true) => {}
                Term::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Term::BoolLit(true),
            1 => flat.pop().unwrap_or(Term::BoolLit(true)),
            _ => Term::And(flat),
        }
    }

    pub fn or(terms: Vec<Term>) -> Term {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                Term::BoolLit(false) => {}
                Term::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Term::BoolLit(false),
            1 => flat.pop().unwrap_or(Term::BoolLit(false)),
            _ => Term::Or(flat),
        }
    }

    pub fn not(term: Term) -> Term {
        match term {
            Term::BoolLit(b) => Term::BoolLit(!b),
            Term::Not(inner) => *inner,
            other => Term::Not(Box::new(other)),
        }
    }

    pub fn implies(antecedent: Term, consequent: Term) -> Term {
        Term::Implies(Box::new(antecedent), Box::new(consequent))
    }

    pub fn ite(cond: Term, then_branch: Term, else_branch: Term) -> Term {
        Term::Ite(Box::new(cond), Box::new(then_branch), Box::new(else_branch))
    }

    pub fn eq(lhs: Term, rhs: Term) -> Term {
        Term::Eq(Box::new(lhs), Box::new(rhs))
    }

    pub fn cmp(op: CmpOp, lhs: Term, rhs: Term) -> Term {
        Term::Cmp(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn arith(op: ArithOp, lhs: Term, rhs: Term) -> Term {
        Term::Arith(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn neg(term: Term) -> Term {
        Term::Neg(Box::new(term))
    }

    pub fn select(array: Term, index: Term) -> Term {
        Term::Select(Box::new(array), Box::new(index))
    }

    pub fn store(array: Term, index: Term, value: Term) -> Term {
        Term::Store(Box::new(array), Box::new(index), Box::new(value))
    }

    /// Serialize to SMT-LIB2 concrete syntax.
    pub fn to_smt(&self) -> String {
        match self {
            Term::BoolLit(true) => "true".to_string(),
            Term::BoolLit(false) => "false".to_string(),
            Term::Num(n) => {
                if let Some(stripped) = n.strip_prefix('-') {
                    format!("(- {})", stripped)
                } else {
                    n.clone()
                }
            }
            Term::Var(name) => sanitize_name(name),
            Term::App(name, args) => {
                if args.is_empty() {
                    sanitize_name(name)
                } else {
                    let args: Vec<String> = args.iter().map(Term::to_smt).collect();
                    format!("({} {})", sanitize_name(name), args.join(" "))
                }
            }
            Term::Not(inner) => format!("(not {})", inner.to_smt()),
            Term::And(terms) => nary("and", terms),
            Term::Or(terms) => nary("or", terms),
            Term::Implies(a, b) => format!("(=> {} {})", a.to_smt(), b.to_smt()),
            Term::Ite(c, t, e) => {
                format!("(ite {} {} {})", c.to_smt(), t.to_smt(), e.to_smt())
            }
            Term::Eq(a, b) => format!("(= {} {})", a.to_smt(), b.to_smt()),
            Term::Cmp(op, a, b) => format!("({} {} {})", op.symbol(), a.to_smt(), b.to_smt()),
            Term::Arith(op, a, b) => {
                format!("({} {} {})", op.symbol(), a.to_smt(), b.to_smt())
            }
            Term::Neg(inner) => format!("(- {})", inner.to_smt()),
            Term::Select(arr, idx) => format!("(select {} {})", arr.to_smt(), idx.to_smt()),
            Term::Store(arr, idx, val) => {
                format!("(store {} {} {})", arr.to_smt(), idx.to_smt(), val.to_smt())
            }
        }
    }

    /// Collect every free variable name, via an explicit worklist.
    pub fn free_vars(&self) -> HashSet<String> {
        let mut vars = HashSet::new();
        let mut worklist: Vec<&Term> = vec![self];
        while let Some(term) = worklist.pop() {
            match term {
                Term::Var(name) => {
                    vars.insert(name.clone());
                }
                Term::App(_, args) => worklist.extend(args.iter()),
                Term::Not(a) | Term::Neg(a) => worklist.push(a),
                Term::And(terms) | Term::Or(terms) => worklist.extend(terms.iter()),
                Term::Implies(a, b)
                | Term::Eq(a, b)
                | Term::Cmp(_, a, b)
                | Term::Arith(_, a, b)
                | Term::Select(a, b) => {
                    worklist.push(a);
                    worklist.push(b);
                }
                Term::Ite(a, b, c) | Term::Store(a, b, c) => {
                    worklist.push(a);
                    worklist.push(b);
                    worklist.push(c);
                }
                Term::BoolLit(_) | Term::Num(_) => {}
            }
        }
        vars
    }
}

fn nary(op: &str, terms: &[Term]) -> String {
    match terms {
        [] => match op {
            "and" => "true".to_string(),
            _ => "false".to_string(),
        },
        [single] => single.to_smt(),
        many => {
            let parts: Vec<String> = many.iter().map(Term::to_smt).collect();
            format!("({} {})", op, parts.join(" "))
        }
    }
}

/// Sanitize identifiers for SMT-LIB2 (no dots, brackets or spaces).
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '!' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A declared constant in a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decl {
    pub name: String,
    pub sort: Sort,
}

/// A declared uninterpreted function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunDecl {
    pub name: String,
    pub params: Vec<Sort>,
    pub ret: Sort,
}

/// Assembles a complete SMT-LIB2 script.
#[derive(Debug, Default, Clone)]
pub struct ScriptBuilder {
    logic: Option<String>,
    decls: Vec<Decl>,
    fun_decls: Vec<FunDecl>,
    assertions: Vec<Term>,
    produce_model: bool,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logic(mut self, logic: impl Into<String>) -> Self {
        self.logic = Some(logic.into());
        self
    }

    pub fn with_model(mut self, produce_model: bool) -> Self {
        self.produce_model = produce_model;
        self
    }

    pub fn declare(&mut self, name: impl Into<String>, sort: Sort) {
        self.decls.push(Decl {
            name: name.into(),
            sort,
        });
    }

    pub fn declare_fun(&mut self, name: impl Into<String>, params: Vec<Sort>, ret: Sort) {
        self.fun_decls.push(FunDecl {
            name: name.into(),
            params,
            ret,
        });
    }

    pub fn assert(&mut self, term: Term) {
        // Asserting `true` is noise in the generated script.
        if term != Term::BoolLit(true) {
            self.assertions.push(term);
        }
    }

    pub fn decls(&self) -> &[Decl] {
        &self.decls
    }

    pub fn assertions(&self) -> &[Term] {
        &self.assertions
    }

    /// Render the full script, ending in `(check-sat)` and, when a model
    /// was requested, `(get-model)`.
    pub fn generate(&self) -> String {
        let mut out = String::new();
        if self.produce_model {
            let _ = writeln!(out, "(set-option :produce-models true)");
        }
        if let Some(logic) = &self.logic {
            let _ = writeln!(out, "(set-logic {})", logic);
        }
        for fun in &self.fun_decls {
            let params: Vec<String> = fun.params.iter().map(Sort::to_smt).collect();
            let _ = writeln!(
                out,
                "(declare-fun {} ({}) {})",
                sanitize_name(&fun.name),
                params.join(" "),
                fun.ret.to_smt()
            );
        }
        for decl in &self.decls {
            let _ = writeln!(
                out,
                "(declare-const {} {})",
                sanitize_name(&decl.name),
                decl.sort.to_smt()
            );
        }
        for assertion in &self.assertions {
            let _ = writeln!(out, "(assert {})", assertion.to_smt());
        }
        let _ = writeln!(out, "(check-sat)");
        if self.produce_model {
            let _ = writeln!(out, "(get-model)");
        }
        out
    }
}

/// `2^exp` as a decimal string, for widths up to 256 bits.
pub fn pow2(exp: u32) -> String {
    // Repeated doubling over decimal digits, least significant first.
    let mut digits: Vec<u8> = vec![1];
    for _ in 0..exp {
        let mut carry = 0u8;
        for d in digits.iter_mut() {
            let doubled = *d * 2 + carry;
            *d = doubled % 10;
            carry = doubled / 10;
        }
        if carry > 0 {
            digits.push(carry);
        }
    }
    digits.iter().rev().map(|d| (d + b'0') as char).collect()
}

/// `2^exp - 1` as a decimal string.
pub fn pow2_minus_one(exp: u32) -> String {
    let p = pow2(exp);
    decrement_decimal(&p)
}

fn decrement_decimal(value: &str) -> String {
    let mut digits: Vec<u8> = value.bytes().map(|b| b - b'0').collect();
    let mut i = digits.len();
    while i > 0 {
        i -= 1;
        if digits[i] > 0 {
            digits[i] -= 1;
            break;
        }
        digits[i] = 9;
    }
    let s: String = digits.iter().map(|d| (d + b'0') as char).collect();
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Inclusive maximum of an integer type, as a term.
pub fn int_max(bits: u16, signed: bool) -> Term {
    if signed {
        Term::Num(pow2_minus_one(bits as u32 - 1))
    } else {
        Term::Num(pow2_minus_one(bits as u32))
    }
}

/// Inclusive minimum of an integer type, as a term.
pub fn int_min(bits: u16, signed: bool) -> Term {
    if signed {
        Term::Num(format!("-{}", pow2(bits as u32 - 1)))
    } else {
        Term::Num("0".to_string())
    }
}
