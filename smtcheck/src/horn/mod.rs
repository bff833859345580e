//! Constrained Horn clause system
//!
//! The unbounded engine does not unroll loops: every loop head gets an
//! uninterpreted invariant predicate, and the function body becomes a
//! set of Horn clauses over those predicates. Predicates live in an
//! arena (`PredId` indices into a vector) so clauses form an explicit
//! graph; a predicate reachable from itself is a loop head.
//!
//! Scripts use `(set-logic HORN)`: each clause is a forall-quantified
//! implication whose head is a predicate application (or `false` for the
//! query), and the sat/unsat reading is the reverse of a reachability
//! query: sat means the solver found a model for every predicate, so no
//! violation is derivable.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt::Write;

use crate::smt::{sanitize_name, Decl, FunDecl, Sort, Term};

/// Index of a predicate in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PredId(pub usize);

/// An uninterpreted invariant predicate over a fixed state vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub name: String,
    pub params: Vec<Sort>,
}

/// One Horn clause: `constraint /\ body applications => head`.
/// `head: None` encodes the query clause (head `false`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HornClause {
    pub head: Option<(PredId, Vec<Term>)>,
    pub body_apps: Vec<(PredId, Vec<Term>)>,
    pub constraint: Term,
}

/// Arena of predicates plus the clauses connecting them.
#[derive(Debug, Clone, Default)]
pub struct HornSystem {
    preds: Vec<Predicate>,
    clauses: Vec<HornClause>,
}

impl HornSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.preds.is_empty() && self.clauses.is_empty()
    }

    pub fn fresh_pred(&mut self, name_hint: &str, params: Vec<Sort>) -> PredId {
        let id = PredId(self.preds.len());
        self.preds.push(Predicate {
            name: format!("{}!{}", name_hint, id.0),
            params,
        });
        id
    }

    pub fn pred(&self, id: PredId) -> &Predicate {
        &self.preds[id.0]
    }

    pub fn preds(&self) -> &[Predicate] {
        &self.preds
    }

    pub fn clauses(&self) -> &[HornClause] {
        &self.clauses
    }

    pub fn add_clause(&mut self, clause: HornClause) {
        self.clauses.push(clause);
    }

    /// Application term for a predicate, usable inside path constraints.
    pub fn app(&self, id: PredId, args: Vec<Term>) -> Term {
        Term::App(self.preds[id.0].name.clone(), args)
    }

    /// Direct clause edges: body predicate -> head predicate.
    pub fn edges(&self) -> Vec<(PredId, PredId)> {
        let mut edges = Vec::new();
        for clause in &self.clauses {
            if let Some((head, _)) = &clause.head {
                for (body, _) in &clause.body_apps {
                    edges.push((*body, *head));
                }
            }
        }
        edges
    }

    /// A predicate on a cycle in the clause graph is a loop head.
    pub fn is_loop_head(&self, id: PredId) -> bool {
        let edges = self.edges();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<PredId> = edges
            .iter()
            .filter(|(from, _)| *from == id)
            .map(|(_, to)| *to)
            .collect();
        while let Some(cur) = queue.pop_front() {
            if cur == id {
                return true;
            }
            if seen.insert(cur) {
                queue.extend(
                    edges
                        .iter()
                        .filter(|(from, _)| *from == cur)
                        .map(|(_, to)| *to),
                );
            }
        }
        false
    }

    /// Render one clause as a forall-quantified implication. Variable
    /// sorts are resolved from `decls`; unknown variables default to Int.
    fn clause_to_smt(&self, clause: &HornClause, sorts: &BTreeMap<&str, &Sort>) -> String {
        let mut body_parts: Vec<Term> = Vec::new();
        for (id, args) in &clause.body_apps {
            body_parts.push(self.app(*id, args.clone()));
        }
        body_parts.push(clause.constraint.clone());
        let body = Term::and(body_parts);

        let head = match &clause.head {
            Some((id, args)) => self.app(*id, args.clone()),
            None => Term::BoolLit(false),
        };
        let implication = Term::implies(body.clone(), head.clone());

        let mut vars: Vec<String> = implication.free_vars().into_iter().collect();
        vars.sort();
        if vars.is_empty() {
            return format!("(assert {})", implication.to_smt());
        }
        let bindings: Vec<String> = vars
            .iter()
            .map(|v| {
                let sort = sorts.get(v.as_str()).copied().unwrap_or(&Sort::Int);
                format!("({} {})", sanitize_name(v), sort.to_smt())
            })
            .collect();
        format!(
            "(assert (forall ({}) {}))",
            bindings.join(" "),
            implication.to_smt()
        )
    }

    /// Full `(set-logic HORN)` script querying one violation condition.
    /// Unsat means the violation is derivable.
    pub fn generate_query(&self, query: &Term, decls: &[Decl], fun_decls: &[FunDecl]) -> String {
        let sorts: BTreeMap<&str, &Sort> = decls
            .iter()
            .map(|d| (d.name.as_str(), &d.sort))
            .collect();

        let mut out = String::new();
        let _ = writeln!(out, "(set-logic HORN)");
        for fun in fun_decls {
            let params: Vec<String> = fun.params.iter().map(Sort::to_smt).collect();
            let _ = writeln!(
                out,
                "(declare-fun {} ({}) {})",
                sanitize_name(&fun.name),
                params.join(" "),
                fun.ret.to_smt()
            );
        }
        for pred in &self.preds {
            let params: Vec<String> = pred.params.iter().map(Sort::to_smt).collect();
            let _ = writeln!(
                out,
                "(declare-fun {} ({}) Bool)",
                sanitize_name(&pred.name),
                params.join(" ")
            );
        }
        for clause in &self.clauses {
            let _ = writeln!(out, "{}", self.clause_to_smt(clause, &sorts));
        }
        let query_clause = HornClause {
            head: None,
            body_apps: Vec::new(),
            constraint: query.clone(),
        };
        let _ = writeln!(out, "{}", self.clause_to_smt(&query_clause, &sorts));
        let _ = writeln!(out, "(check-sat)");
        out
    }
}
