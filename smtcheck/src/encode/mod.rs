//! Statement and expression encoder
//!
//! Walks a function body in a path-sensitive way, producing SMT terms
//! over the versioned state plus one [`VerificationTarget`] per proof
//! obligation. Each target's condition embeds the full path prefix it
//! was emitted under, so targets can be discharged independently.
//!
//! Branches fork the environment and merge with fresh versions
//! constrained by `ite(cond, then, else)`; the allocation counter is
//! passed sequentially through the arms so SSA names never collide.
//!
//! Loops depend on the mode:
//! - `Unroll(k)`: the bounded engine unrolls `k` iterations, then
//!   havocs everything the loop writes and assumes the exit condition.
//!   Hitting the bound marks the function truncated.
//! - `Invariant`: the unbounded engine introduces a loop-head predicate
//!   and emits entry/consecution Horn clauses instead of unrolling.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::ast::{
    BinOp, ContractDef, Expr, ExprKind, FunctionDef, LValue, Span, Stmt, Ty, UnOp,
};
use crate::error::{CheckError, Result};
use crate::horn::{HornClause, HornSystem};
use crate::smt::{
    int_max, int_min, pow2, ArithOp, CmpOp, Decl, FunDecl, Sort, Term,
};
use crate::state::{ssa_name, StateEnv, INNER_LENGTH_SUFFIX, LENGTH_SUFFIX};
use crate::targets::{
    FunctionSummary, SummaryCache, TargetCollector, TargetKind, VerificationTarget,
};

/// How loops are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Unroll up to the given depth, then truncate.
    Unroll(u32),
    /// Loop-head invariant predicates (Horn clauses).
    Invariant,
}

/// Everything the engines need about one encoded function.
#[derive(Debug, Clone)]
pub struct EncodedFunction {
    pub function: String,
    pub decls: Vec<Decl>,
    pub fun_decls: Vec<FunDecl>,
    pub horn: HornSystem,
    pub targets: Vec<VerificationTarget>,
    /// A loop hit the unrolling bound.
    pub truncated: bool,
}

/// Range constraint a slot's values obey, re-assumed after every havoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotRange {
    Int { bits: u16, signed: bool },
    NonNegative,
}

pub struct Encoder<'a> {
    contract: &'a ContractDef,
    summaries: &'a SummaryCache,
    mode: LoopMode,
    function: String,

    env: StateEnv,
    path: Vec<Term>,
    collector: TargetCollector,
    horn: HornSystem,
    fun_decls: Vec<FunDecl>,

    storage_roots: BTreeSet<String>,
    ranges: BTreeMap<String, SlotRange>,
    unchecked_depth: u32,
    approximated: bool,
    truncated: bool,
    /// Span of an external call not yet followed by a storage write.
    pending_external_call: Option<Span>,
    temp_counter: u32,
}

/// Encode one public function of a contract.
pub fn encode_function(
    contract: &ContractDef,
    func: &FunctionDef,
    summaries: &SummaryCache,
    mode: LoopMode,
) -> Result<EncodedFunction> {
    let mut enc = Encoder {
        contract,
        summaries,
        mode,
        function: func.name.clone(),
        env: StateEnv::new(),
        path: Vec::new(),
        collector: TargetCollector::new(),
        horn: HornSystem::new(),
        fun_decls: Vec::new(),
        storage_roots: contract.storage.iter().map(|d| d.name.clone()).collect(),
        ranges: BTreeMap::new(),
        unchecked_depth: 0,
        approximated: false,
        truncated: false,
        pending_external_call: None,
        temp_counter: 0,
    };

    // Storage holds an arbitrary well-typed state at entry.
    for decl in &contract.storage {
        enc.declare_var(&decl.name, &decl.ty)?;
    }
    for param in &func.params {
        enc.declare_var(&param.name, &param.ty)?;
    }

    enc.encode_block(&func.body)?;

    Ok(EncodedFunction {
        function: func.name.clone(),
        decls: enc.env.decls().to_vec(),
        fun_decls: enc.fun_decls,
        horn: enc.horn,
        targets: enc.collector.into_targets(),
        truncated: enc.truncated,
    })
}

impl<'a> Encoder<'a> {
    fn checked(&self) -> bool {
        self.unchecked_depth == 0
    }

    fn assume(&mut self, term: Term) {
        if term != Term::BoolLit(true) {
            self.path.push(term);
        }
    }

    fn emit(&mut self, kind: TargetKind, span: Span, violation: Term) {
        let mut parts = self.path.clone();
        parts.push(violation);
        self.collector.push(VerificationTarget {
            kind,
            span,
            condition: Term::and(parts),
            approximated: self.approximated || matches!(kind, TargetKind::Reentrancy),
            function: self.function.clone(),
        });
    }

    // ----- declarations and range assumptions -----

    fn declare_var(&mut self, name: &str, ty: &Ty) -> Result<()> {
        self.env.declare(name, ty)?;
        self.record_ranges(name, ty);
        for slot in self.slots_of(name) {
            self.assume_slot_range(&slot)?;
        }
        Ok(())
    }

    fn record_ranges(&mut self, name: &str, ty: &Ty) {
        match ty.erased() {
            Ty::Int { bits, signed } => {
                self.ranges.insert(
                    name.to_string(),
                    SlotRange::Int {
                        bits: *bits,
                        signed: *signed,
                    },
                );
            }
            Ty::Address => {
                self.ranges.insert(
                    name.to_string(),
                    SlotRange::Int {
                        bits: 160,
                        signed: false,
                    },
                );
            }
            Ty::Array { .. } => {
                self.ranges.insert(
                    format!("{name}{LENGTH_SUFFIX}"),
                    SlotRange::NonNegative,
                );
            }
            _ => {}
        }
    }

    /// Every env slot belonging to a source variable.
    fn slots_of(&self, name: &str) -> Vec<String> {
        let prefix = format!("{name}.");
        self.env
            .slot_names()
            .into_iter()
            .filter(|s| s == name || s.starts_with(&prefix))
            .collect()
    }

    fn assume_slot_range(&mut self, slot: &str) -> Result<()> {
        let Some(range) = self.ranges.get(slot).copied() else {
            return Ok(());
        };
        let cur = self.env.current(slot)?;
        match range {
            SlotRange::Int { bits, signed } => {
                self.assume(Term::cmp(CmpOp::Ge, cur.clone(), int_min(bits, signed)));
                self.assume(Term::cmp(CmpOp::Le, cur, int_max(bits, signed)));
            }
            SlotRange::NonNegative => {
                self.assume(Term::cmp(CmpOp::Ge, cur, Term::num(0)));
            }
        }
        Ok(())
    }

    /// Assume a freshly selected value is well-typed for its source type.
    fn assume_value_range(&mut self, term: &Term, ty: &Ty) {
        match ty.erased() {
            Ty::Int { bits, signed } => {
                self.assume(Term::cmp(CmpOp::Ge, term.clone(), int_min(*bits, *signed)));
                self.assume(Term::cmp(CmpOp::Le, term.clone(), int_max(*bits, *signed)));
            }
            Ty::Address => {
                self.assume(Term::cmp(CmpOp::Ge, term.clone(), Term::num(0)));
                self.assume(Term::cmp(
                    CmpOp::Le,
                    term.clone(),
                    Term::Num(crate::smt::pow2_minus_one(160)),
                ));
            }
            _ => {}
        }
    }

    fn havoc_slots(&mut self, slots: &[String]) -> Result<()> {
        self.env.havoc(slots)?;
        for slot in slots {
            self.assume_slot_range(slot)?;
        }
        Ok(())
    }

    fn storage_slots(&self) -> Vec<String> {
        let mut out = Vec::new();
        for root in &self.storage_roots {
            out.extend(self.slots_of(root));
        }
        out
    }

    fn fresh_temp(&mut self, hint: &str) -> String {
        let name = format!("{}%{}", hint, self.temp_counter);
        self.temp_counter += 1;
        name
    }

    // ----- statements -----

    /// Returns whether control falls through the end of the block.
    fn encode_block(&mut self, stmts: &[Stmt]) -> Result<bool> {
        for stmt in stmts {
            if !self.encode_stmt(stmt)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn encode_stmt(&mut self, stmt: &Stmt) -> Result<bool> {
        match stmt {
            Stmt::VarDecl {
                name, ty, init, ..
            } => {
                let init_term = match init {
                    Some(expr) => Some(self.encode_expr(expr)?),
                    None => None,
                };
                self.declare_var(name, ty)?;
                match init_term {
                    Some(value) => {
                        let cur = self.env.current(name)?;
                        self.assume(Term::eq(cur, value));
                    }
                    None => self.assume_default(name, ty)?,
                }
                Ok(true)
            }
            Stmt::Assign { target, value, .. } => {
                let value = self.encode_expr(value)?;
                self.encode_store(target, value)?;
                self.note_storage_write(target.root());
                Ok(true)
            }
            Stmt::Require { cond, span: _ } => {
                let c = self.encode_expr(cond)?;
                self.emit(TargetKind::TrivialCondition, cond.span, Term::not(c.clone()));
                self.assume(c);
                Ok(true)
            }
            Stmt::Assert { cond, span: _ } => {
                let c = self.encode_expr(cond)?;
                self.emit(TargetKind::Assert, cond.span, Term::not(c.clone()));
                // Execution continues past a proven-or-not assert.
                self.assume(c);
                Ok(true)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                let c = self.encode_expr(cond)?;
                self.emit(TargetKind::TrivialCondition, cond.span, Term::not(c.clone()));
                self.fork_merge(
                    c,
                    |enc| enc.encode_block(then_branch),
                    |enc| enc.encode_block(else_branch),
                )
            }
            Stmt::While { cond, body, span } => match self.mode {
                LoopMode::Unroll(depth) => self.encode_while_unrolled(cond, body, *span, depth),
                LoopMode::Invariant => self.encode_while_invariant(cond, body),
            },
            Stmt::Unchecked { body, .. } => {
                self.unchecked_depth += 1;
                let ft = self.encode_block(body);
                self.unchecked_depth -= 1;
                ft
            }
            Stmt::Push { array, value, .. } => {
                let value = self.encode_expr(value)?;
                self.encode_push(array, value)?;
                self.note_storage_write(array.root());
                Ok(true)
            }
            Stmt::Pop { array, span } => {
                self.encode_pop(array, *span)?;
                self.note_storage_write(array.root());
                Ok(true)
            }
            Stmt::ExternalCall { span, .. } => {
                // Unknown code runs: storage can be anything well-typed
                // afterwards, and a reentrant entry may race our writes.
                let slots = self.storage_slots();
                self.havoc_slots(&slots)?;
                self.approximated = true;
                self.pending_external_call = Some(*span);
                Ok(true)
            }
            Stmt::Expr { expr, .. } => {
                self.encode_expr(expr)?;
                Ok(true)
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    // Still encode for its side obligations.
                    self.encode_expr(value)?;
                }
                Ok(false)
            }
        }
    }

    fn assume_default(&mut self, name: &str, ty: &Ty) -> Result<()> {
        match ty.erased() {
            Ty::Bool => {
                let cur = self.env.current(name)?;
                self.assume(Term::eq(cur, Term::BoolLit(false)));
            }
            Ty::Int { .. } | Ty::Address => {
                let cur = self.env.current(name)?;
                self.assume(Term::eq(cur, Term::num(0)));
            }
            Ty::Array { .. } => {
                let len = self.env.current(&format!("{name}{LENGTH_SUFFIX}"))?;
                self.assume(Term::eq(len, Term::num(0)));
            }
            // Mapping defaults are total-zero, but locals of mapping type
            // do not occur and storage entry state is arbitrary.
            _ => {}
        }
        Ok(())
    }

    fn note_storage_write(&mut self, root: &str) {
        if self.storage_roots.contains(root) {
            if let Some(span) = self.pending_external_call.take() {
                self.emit(TargetKind::Reentrancy, span, Term::BoolLit(true));
            }
        }
    }

    // ----- fork / merge -----

    fn fork_merge<TF, EF>(&mut self, cond: Term, then_f: TF, else_f: EF) -> Result<bool>
    where
        TF: FnOnce(&mut Self) -> Result<bool>,
        EF: FnOnce(&mut Self) -> Result<bool>,
    {
        let base_env = self.env.clone();
        let prefix_len = self.path.len();
        let pre_call = self.pending_external_call;

        self.path.push(cond.clone());
        let then_ft = then_f(self)?;
        let then_env = std::mem::replace(&mut self.env, base_env.clone());
        let then_suffix: Vec<Term> = self.path.split_off(prefix_len);
        let then_call = self.pending_external_call;

        // The else arm continues the allocation counters where the then
        // arm left them; the external-call flag restarts from the
        // pre-branch state, the arms being mutually exclusive.
        self.env.adopt_counters(&then_env);
        self.pending_external_call = pre_call;
        self.path.push(Term::not(cond.clone()));
        let else_ft = else_f(self)?;
        let else_env = std::mem::replace(&mut self.env, base_env);
        let else_suffix: Vec<Term> = self.path.split_off(prefix_len);
        let else_call = self.pending_external_call;

        self.env.adopt_counters(&then_env);
        self.env.adopt_counters(&else_env);

        match (then_ft, else_ft) {
            (false, false) => Ok(false),
            (true, false) => {
                self.env.set_versions_from(&then_env);
                self.path.extend(then_suffix);
                self.pending_external_call = then_call;
                Ok(true)
            }
            (false, true) => {
                self.env.set_versions_from(&else_env);
                self.path.extend(else_suffix);
                self.pending_external_call = else_call;
                Ok(true)
            }
            (true, true) => {
                self.pending_external_call = then_call.or(else_call);
                let then_versions = then_env.versions();
                let else_versions = else_env.versions();
                let mut merge_eqs = Vec::new();
                for (slot, then_v) in &then_versions {
                    let Some(else_v) = else_versions.get(slot) else {
                        continue;
                    };
                    if then_v == else_v {
                        self.env.set_version(slot, *then_v)?;
                        continue;
                    }
                    let then_term = Term::var(ssa_name(slot, *then_v));
                    let else_term = Term::var(ssa_name(slot, *else_v));
                    let merged = self.env.fresh(slot)?;
                    merge_eqs.push(Term::eq(
                        merged,
                        Term::ite(cond.clone(), then_term, else_term),
                    ));
                }
                self.path.push(Term::or(vec![
                    Term::and(then_suffix),
                    Term::and(else_suffix),
                ]));
                for eq in merge_eqs {
                    self.assume(eq);
                }
                Ok(true)
            }
        }
    }

    // ----- loops -----

    fn encode_while_unrolled(
        &mut self,
        cond: &Expr,
        body: &[Stmt],
        span: Span,
        depth: u32,
    ) -> Result<bool> {
        if depth == 0 {
            // Bound reached: over-approximate the remaining iterations by
            // havocking everything the loop can write, then take the exit.
            let mut slots = BTreeSet::new();
            for root in written_roots(body) {
                if self.env.contains(&root) {
                    slots.extend(self.slots_of(&root));
                }
            }
            let slots: Vec<String> = slots.into_iter().collect();
            self.havoc_slots(&slots)?;
            let from = self.collector.len();
            self.truncated = true;
            self.approximated = true;
            let c = self.encode_expr(cond)?;
            self.collector.mark_approximated_from(from);
            self.assume(Term::not(c));
            return Ok(true);
        }
        let c = self.encode_expr(cond)?;
        self.fork_merge(
            c,
            |enc| {
                if !enc.encode_block(body)? {
                    return Ok(false);
                }
                enc.encode_while_unrolled(cond, body, span, depth - 1)
            },
            |_| Ok(true),
        )
    }

    fn encode_while_invariant(&mut self, cond: &Expr, body: &[Stmt]) -> Result<bool> {
        let slots = self.env.slot_names();
        let mut sorts = Vec::with_capacity(slots.len());
        for slot in &slots {
            let sort = self
                .env
                .sort_of(slot)
                .cloned()
                .ok_or_else(|| CheckError::unknown_variable(slot))?;
            sorts.push(sort);
        }
        let pred = self
            .horn
            .fresh_pred(&format!("inv_{}", self.function), sorts);

        // Entry clause: the state reaching the loop head satisfies the
        // invariant.
        let mut entry_args = Vec::with_capacity(slots.len());
        for slot in &slots {
            entry_args.push(self.env.current(slot)?);
        }
        self.horn.add_clause(HornClause {
            head: Some((pred, entry_args)),
            body_apps: Vec::new(),
            constraint: Term::and(self.path.clone()),
        });

        // Arbitrary iteration state constrained only by the invariant.
        let saved_path = std::mem::take(&mut self.path);
        for slot in &slots {
            self.env.fresh(slot)?;
        }
        let pre_versions = self.env.versions();
        let mut pre_args = Vec::with_capacity(slots.len());
        for slot in &slots {
            pre_args.push(self.env.current(slot)?);
        }
        let p_app = self.horn.app(pred, pre_args.clone());
        self.path.push(p_app.clone());
        for slot in &slots {
            self.assume_slot_range(slot)?;
        }

        let c = self.encode_expr(cond)?;
        let cond_done = self.path.len();

        // Consecution: one body pass from the invariant state.
        self.path.push(c.clone());
        if self.encode_block(body)? {
            let mut post_args = Vec::with_capacity(slots.len());
            for slot in &slots {
                post_args.push(self.env.current(slot)?);
            }
            // path[0] is the invariant application itself; the clause
            // carries it structurally instead.
            self.horn.add_clause(HornClause {
                head: Some((pred, post_args)),
                body_apps: vec![(pred, pre_args)],
                constraint: Term::and(self.path[1..].to_vec()),
            });
        }

        // Continuation: back at the invariant state, exit condition holds.
        let exit_prefix: Vec<Term> = self.path[..cond_done].to_vec();
        self.path = saved_path;
        self.path.extend(exit_prefix);
        self.path.push(Term::not(c));
        for (slot, version) in &pre_versions {
            self.env.set_version(slot, *version)?;
        }
        Ok(true)
    }

    // ----- expressions -----

    /// Encodes a sub-expression under a path guard. The guard is removed
    /// afterwards; any assumption the sub-expression pushed (in-range
    /// results, non-zero divisors) is kept, weakened to an implication
    /// from the guard.
    fn with_guard<T>(
        &mut self,
        guard: Term,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let prefix_len = self.path.len();
        self.path.push(guard.clone());
        let value = f(self)?;
        let learned: Vec<Term> = self.path.split_off(prefix_len + 1);
        self.path.pop();
        for fact in learned {
            self.path.push(Term::implies(guard.clone(), fact));
        }
        Ok(value)
    }

    fn encode_expr(&mut self, expr: &Expr) -> Result<Term> {
        match &expr.kind {
            ExprKind::BoolLit(b) => Ok(Term::BoolLit(*b)),
            ExprKind::NumLit(n) => Ok(Term::num(n)),
            ExprKind::Var(name) => self.env.current(name),
            ExprKind::Binary { op, lhs, rhs } => self.encode_binary(expr, *op, lhs, rhs),
            ExprKind::Unary { op, operand } => self.encode_unary(expr, *op, operand),
            ExprKind::Index { .. } => self.encode_index_read(expr),
            ExprKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.encode_expr(cond)?;
                let t = self.with_guard(c.clone(), |enc| enc.encode_expr(then_branch))?;
                let e =
                    self.with_guard(Term::not(c.clone()), |enc| enc.encode_expr(else_branch))?;
                Ok(Term::ite(c, t, e))
            }
            ExprKind::Call { callee, args } => self.encode_call(callee, args, expr),
            // UDVT wrap/unwrap are identities after type erasure.
            ExprKind::Wrap { inner } | ExprKind::Unwrap { inner } => self.encode_expr(inner),
            ExprKind::Cast { inner } => {
                let value = self.encode_expr(inner)?;
                match expr.ty.erased() {
                    Ty::Int { bits, signed } => Ok(wrap_term(value, *bits, *signed)),
                    Ty::Address => Ok(wrap_term(value, 160, false)),
                    Ty::Bool => Ok(value),
                    other => Err(CheckError::encoding(format!(
                        "cannot cast to {}",
                        other.describe()
                    ))),
                }
            }
            ExprKind::ArrayLen { base } => self.encode_array_len(base),
        }
    }

    fn encode_binary(
        &mut self,
        expr: &Expr,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Term> {
        // Short-circuit: the right operand's obligations only arise on
        // the path where it is evaluated.
        if op == BinOp::And {
            let l = self.encode_expr(lhs)?;
            let r = self.with_guard(l.clone(), |enc| enc.encode_expr(rhs))?;
            return Ok(Term::and(vec![l, r]));
        }
        if op == BinOp::Or {
            let l = self.encode_expr(lhs)?;
            let r = self.with_guard(Term::not(l.clone()), |enc| enc.encode_expr(rhs))?;
            return Ok(Term::or(vec![l, r]));
        }

        let l = self.encode_expr(lhs)?;
        let r = self.encode_expr(rhs)?;

        match op {
            BinOp::Eq => Ok(Term::eq(l, r)),
            BinOp::Ne => Ok(Term::not(Term::eq(l, r))),
            BinOp::Lt => Ok(Term::cmp(CmpOp::Lt, l, r)),
            BinOp::Le => Ok(Term::cmp(CmpOp::Le, l, r)),
            BinOp::Gt => Ok(Term::cmp(CmpOp::Gt, l, r)),
            BinOp::Ge => Ok(Term::cmp(CmpOp::Ge, l, r)),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                self.encode_arith(expr, op, l, r)
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn encode_arith(&mut self, expr: &Expr, op: BinOp, l: Term, r: Term) -> Result<Term> {
        let (bits, signed) = expr.ty.int_info().ok_or_else(|| {
            CheckError::encoding(format!(
                "arithmetic on non-integer type {}",
                expr.ty.describe()
            ))
        })?;
        let span = expr.span;

        // Division and modulo by zero are checked even in unchecked
        // blocks.
        if matches!(op, BinOp::Div | BinOp::Mod) {
            let kind = if op == BinOp::Div {
                TargetKind::DivByZero
            } else {
                TargetKind::ModByZero
            };
            self.emit(kind, span, Term::eq(r.clone(), Term::num(0)));
            self.assume(Term::not(Term::eq(r.clone(), Term::num(0))));
        }

        let arith_op = match op {
            BinOp::Add => ArithOp::Add,
            BinOp::Sub => ArithOp::Sub,
            BinOp::Mul => ArithOp::Mul,
            BinOp::Div => ArithOp::Div,
            BinOp::Mod => ArithOp::Mod,
            _ => return Err(CheckError::internal("non-arithmetic operator")),
        };
        let raw = Term::arith(arith_op, l, r);

        if !self.checked() {
            if matches!(op, BinOp::Div | BinOp::Mod) {
                // In-range whenever the operands are; no wrap needed.
                return Ok(raw);
            }
            return Ok(wrap_term(raw, bits, signed));
        }

        // Checked: emit the width-exact overflow obligations, then assume
        // the in-range result on the surviving path.
        let max = int_max(bits, signed);
        let min = int_min(bits, signed);
        let overflows = match (arith_op, signed) {
            (ArithOp::Add | ArithOp::Mul, false) => true,
            (_, false) => false,
            (ArithOp::Mod, true) => false,
            // int_min / -1 is the one signed division overflow.
            (_, true) => true,
        };
        let underflows = match (arith_op, signed) {
            (ArithOp::Sub, false) => true,
            (_, false) => false,
            (ArithOp::Div | ArithOp::Mod, true) => false,
            (_, true) => true,
        };
        if overflows {
            self.emit(
                TargetKind::Overflow,
                span,
                Term::cmp(CmpOp::Gt, raw.clone(), max.clone()),
            );
        }
        if underflows {
            self.emit(
                TargetKind::Underflow,
                span,
                Term::cmp(CmpOp::Lt, raw.clone(), min.clone()),
            );
        }
        if overflows {
            self.assume(Term::cmp(CmpOp::Le, raw.clone(), max));
        }
        if underflows {
            self.assume(Term::cmp(CmpOp::Ge, raw.clone(), min));
        }
        Ok(raw)
    }

    fn encode_unary(&mut self, expr: &Expr, op: UnOp, operand: &Expr) -> Result<Term> {
        let inner = self.encode_expr(operand)?;
        match op {
            UnOp::Not => Ok(Term::not(inner)),
            UnOp::Neg => {
                let (bits, signed) = expr.ty.int_info().ok_or_else(|| {
                    CheckError::encoding(format!(
                        "negation of non-integer type {}",
                        expr.ty.describe()
                    ))
                })?;
                let raw = Term::neg(inner);
                if self.checked() && signed {
                    // -int_min overflows.
                    let max = int_max(bits, signed);
                    self.emit(
                        TargetKind::Overflow,
                        expr.span,
                        Term::cmp(CmpOp::Gt, raw.clone(), max.clone()),
                    );
                    self.assume(Term::cmp(CmpOp::Le, raw.clone(), max));
                    Ok(raw)
                } else if !self.checked() {
                    Ok(wrap_term(raw, bits, signed))
                } else {
                    Ok(raw)
                }
            }
        }
    }

    /// Flatten an index chain down to its root variable. Each entry
    /// carries the span of its whole access level, so `a[i][j]` blames
    /// `a[i]` for the outer bound and `a[i][j]` for the inner one.
    fn flatten_index<'e>(expr: &'e Expr) -> (&'e Expr, Vec<(&'e Expr, Span)>) {
        let mut indices = Vec::new();
        let mut cur = expr;
        while let ExprKind::Index { base, index } = &cur.kind {
            indices.push((index.as_ref(), cur.span));
            cur = base;
        }
        indices.reverse();
        (cur, indices)
    }

    fn root_var_name(root: &Expr) -> Result<&str> {
        match &root.kind {
            ExprKind::Var(name) => Ok(name),
            _ => Err(CheckError::encoding(
                "indexed access must start at a named variable",
            )),
        }
    }

    /// Coerce a key term to the Int key space of mappings.
    fn key_term(&mut self, index: &Expr) -> Result<Term> {
        let term = self.encode_expr(index)?;
        match index.ty.erased() {
            Ty::Bool => Ok(Term::ite(term, Term::num(1), Term::num(0))),
            _ => Ok(term),
        }
    }

    fn encode_index_read(&mut self, expr: &Expr) -> Result<Term> {
        let (root, indices) = Self::flatten_index(expr);
        let name = Self::root_var_name(root)?.to_string();
        match root.ty.erased() {
            Ty::Mapping { .. } => {
                let mut term = self.env.current(&name)?;
                for (index, _) in &indices {
                    let key = self.key_term(index)?;
                    term = Term::select(term, key);
                }
                self.assume_value_range(&term, &expr.ty);
                Ok(term)
            }
            Ty::Array { .. } => {
                let selected = self.encode_array_access(&name, &indices)?;
                self.assume_value_range(&selected, &expr.ty);
                Ok(selected)
            }
            other => Err(CheckError::encoding(format!(
                "cannot index into {}",
                other.describe()
            ))),
        }
    }

    /// Bounds-checked element access for simple and two-level arrays.
    fn encode_array_access(
        &mut self,
        name: &str,
        indices: &[(&Expr, Span)],
    ) -> Result<Term> {
        let outer_len = self.env.current(&format!("{name}{LENGTH_SUFFIX}"))?;
        let elems = self.env.current(name)?;
        match indices {
            [(index, span)] => {
                let i = self.encode_expr(index)?;
                self.check_bounds(&i, &outer_len, *span);
                Ok(Term::select(elems, i))
            }
            [(outer, outer_span), (inner, inner_span)] => {
                let i = self.encode_expr(outer)?;
                self.check_bounds(&i, &outer_len, *outer_span);
                let inner_lens = self.env.current(&format!("{name}{INNER_LENGTH_SUFFIX}"))?;
                let inner_len = Term::select(inner_lens, i.clone());
                self.assume(Term::cmp(CmpOp::Ge, inner_len.clone(), Term::num(0)));
                let j = self.encode_expr(inner)?;
                self.check_bounds(&j, &inner_len, *inner_span);
                Ok(Term::select(Term::select(elems, i), j))
            }
            _ => Err(CheckError::encoding(
                "array access nested deeper than two levels",
            )),
        }
    }

    fn check_bounds(&mut self, index: &Term, length: &Term, span: Span) {
        self.emit(
            TargetKind::OutOfBounds,
            span,
            Term::or(vec![
                Term::cmp(CmpOp::Lt, index.clone(), Term::num(0)),
                Term::cmp(CmpOp::Ge, index.clone(), length.clone()),
            ]),
        );
        self.assume(Term::cmp(CmpOp::Ge, index.clone(), Term::num(0)));
        self.assume(Term::cmp(CmpOp::Lt, index.clone(), length.clone()));
    }

    fn encode_array_len(&mut self, base: &Expr) -> Result<Term> {
        let (root, indices) = Self::flatten_index(base);
        let name = Self::root_var_name(root)?.to_string();
        match indices.as_slice() {
            [] => self.env.current(&format!("{name}{LENGTH_SUFFIX}")),
            [(outer, span)] => {
                let outer_len = self.env.current(&format!("{name}{LENGTH_SUFFIX}"))?;
                let i = self.encode_expr(outer)?;
                self.check_bounds(&i, &outer_len, *span);
                let inner_lens = self.env.current(&format!("{name}{INNER_LENGTH_SUFFIX}"))?;
                let len = Term::select(inner_lens, i);
                self.assume(Term::cmp(CmpOp::Ge, len.clone(), Term::num(0)));
                Ok(len)
            }
            _ => Err(CheckError::encoding(
                "length of array nested deeper than two levels",
            )),
        }
    }

    // ----- writes -----

    fn flatten_lvalue<'l>(lvalue: &'l LValue) -> (&'l str, Vec<(&'l Expr, Span)>) {
        let mut indices = Vec::new();
        let mut cur = lvalue;
        loop {
            match cur {
                LValue::Var { name, .. } => {
                    indices.reverse();
                    return (name, indices);
                }
                LValue::Index {
                    base, index, span, ..
                } => {
                    indices.push((index, *span));
                    cur = base;
                }
            }
        }
    }

    fn encode_store(&mut self, target: &LValue, value: Term) -> Result<()> {
        let (name, indices) = Self::flatten_lvalue(target);
        let name = name.to_string();
        if indices.is_empty() {
            let new = self.env.fresh(&name)?;
            self.assume(Term::eq(new, value));
            return Ok(());
        }
        // Distinguish mapping vs array writes by the presence of a
        // length slot.
        let is_array = self.env.contains(&format!("{name}{LENGTH_SUFFIX}"));
        let old = self.env.current(&name)?;
        let updated = if is_array {
            let outer_len = self.env.current(&format!("{name}{LENGTH_SUFFIX}"))?;
            match indices.as_slice() {
                [(index, span)] => {
                    let i = self.encode_expr(index)?;
                    self.check_bounds(&i, &outer_len, *span);
                    Term::store(old, i, value)
                }
                [(outer, outer_span), (inner, inner_span)] => {
                    let i = self.encode_expr(outer)?;
                    self.check_bounds(&i, &outer_len, *outer_span);
                    let inner_lens =
                        self.env.current(&format!("{name}{INNER_LENGTH_SUFFIX}"))?;
                    let inner_len = Term::select(inner_lens, i.clone());
                    self.assume(Term::cmp(CmpOp::Ge, inner_len.clone(), Term::num(0)));
                    let j = self.encode_expr(inner)?;
                    self.check_bounds(&j, &inner_len, *inner_span);
                    let inner_arr = Term::select(old.clone(), i.clone());
                    Term::store(old, i, Term::store(inner_arr, j, value))
                }
                _ => {
                    return Err(CheckError::encoding(
                        "array write nested deeper than two levels",
                    ));
                }
            }
        } else {
            match indices.as_slice() {
                [(index, _)] => {
                    let key = self.key_term(index)?;
                    Term::store(old, key, value)
                }
                [(outer, _), (inner, _)] => {
                    let k1 = self.key_term(outer)?;
                    let k2 = self.key_term(inner)?;
                    let inner_map = Term::select(old.clone(), k1.clone());
                    Term::store(old, k1, Term::store(inner_map, k2, value))
                }
                _ => {
                    return Err(CheckError::encoding(
                        "mapping write nested deeper than two levels",
                    ));
                }
            }
        };
        let new = self.env.fresh(&name)?;
        self.assume(Term::eq(new, updated));
        Ok(())
    }

    fn encode_push(&mut self, array: &LValue, value: Term) -> Result<()> {
        let (name, indices) = Self::flatten_lvalue(array);
        if !indices.is_empty() {
            return Err(CheckError::encoding("push on a nested array element"));
        }
        let name = name.to_string();
        let len_slot = format!("{name}{LENGTH_SUFFIX}");
        let old_len = self.env.current(&len_slot)?;
        let old_elems = self.env.current(&name)?;
        let new_elems = self.env.fresh(&name)?;
        self.assume(Term::eq(
            new_elems,
            Term::store(old_elems, old_len.clone(), value),
        ));
        let new_len = self.env.fresh(&len_slot)?;
        self.assume(Term::eq(
            new_len,
            Term::arith(ArithOp::Add, old_len, Term::num(1)),
        ));
        Ok(())
    }

    fn encode_pop(&mut self, array: &LValue, span: Span) -> Result<()> {
        let (name, indices) = Self::flatten_lvalue(array);
        if !indices.is_empty() {
            return Err(CheckError::encoding("pop on a nested array element"));
        }
        let name = name.to_string();
        let len_slot = format!("{name}{LENGTH_SUFFIX}");
        let old_len = self.env.current(&len_slot)?;
        self.emit(
            TargetKind::PopEmptyArray,
            span,
            Term::cmp(CmpOp::Le, old_len.clone(), Term::num(0)),
        );
        self.assume(Term::cmp(CmpOp::Gt, old_len.clone(), Term::num(0)));
        // The element store keeps the popped slot's stale value; reads
        // past the new length are ruled out by bounds checks anyway.
        let new_len = self.env.fresh(&len_slot)?;
        self.assume(Term::eq(
            new_len,
            Term::arith(ArithOp::Sub, old_len, Term::num(1)),
        ));
        Ok(())
    }

    // ----- calls -----

    fn encode_call(&mut self, callee: &str, args: &[Expr], expr: &Expr) -> Result<Term> {
        let mut arg_terms = Vec::with_capacity(args.len());
        let mut scalar_args = true;
        for arg in args {
            let term = self.encode_expr(arg)?;
            if !matches!(
                arg.ty.erased(),
                Ty::Bool | Ty::Int { .. } | Ty::Address
            ) {
                scalar_args = false;
            }
            arg_terms.push(term);
        }

        let summary = self
            .summaries
            .get_or_compute(callee, || compute_summary(self.contract, callee));

        let result = if scalar_args && !matches!(expr.ty, Ty::Unresolved) {
            // A deterministic uninterpreted application: equal arguments
            // give equal results across call sites.
            let fun_name = format!("call_{callee}");
            if !self.fun_decls.iter().any(|f| f.name == fun_name) {
                let params: Vec<Sort> = args
                    .iter()
                    .map(|a| match a.ty.erased() {
                        Ty::Bool => Sort::Bool,
                        _ => Sort::Int,
                    })
                    .collect();
                let ret = match expr.ty.erased() {
                    Ty::Bool => Sort::Bool,
                    _ => Sort::Int,
                };
                self.fun_decls.push(FunDecl {
                    name: fun_name.clone(),
                    params,
                    ret,
                });
            }
            Term::App(fun_name, arg_terms)
        } else {
            let temp = self.fresh_temp(&format!("ret_{callee}"));
            let sort = match expr.ty.erased() {
                Ty::Bool => Sort::Bool,
                _ => Sort::Int,
            };
            self.fun_decls.push(FunDecl {
                name: temp.clone(),
                params: Vec::new(),
                ret: sort,
            });
            Term::App(temp, Vec::new())
        };
        self.assume_value_range(&result, &expr.ty);

        // Compose the callee's effect summary at the call site.
        if summary.has_external_call {
            let slots = self.storage_slots();
            self.havoc_slots(&slots)?;
            self.approximated = true;
            self.pending_external_call = Some(expr.span);
        } else if !summary.writes.is_empty() {
            let mut slots = Vec::new();
            for root in &summary.writes {
                if self.env.contains(root) {
                    slots.extend(self.slots_of(root));
                }
            }
            self.havoc_slots(&slots)?;
            self.approximated = true;
        }
        Ok(result)
    }
}

/// Modular wrap of a raw arithmetic result into a width's value range.
pub fn wrap_term(raw: Term, bits: u16, signed: bool) -> Term {
    let modulus = Term::Num(pow2(bits as u32));
    if !signed {
        Term::arith(ArithOp::Mod, raw, modulus)
    } else {
        let half = Term::Num(pow2(bits as u32 - 1));
        Term::arith(
            ArithOp::Sub,
            Term::arith(
                ArithOp::Mod,
                Term::arith(ArithOp::Add, raw, half.clone()),
                modulus,
            ),
            half,
        )
    }
}

/// Storage and local roots a statement list can write, syntactically.
fn written_roots(stmts: &[Stmt]) -> BTreeSet<String> {
    let mut roots = BTreeSet::new();
    let mut worklist: VecDeque<&Stmt> = stmts.iter().collect();
    while let Some(stmt) = worklist.pop_front() {
        match stmt {
            Stmt::Assign { target, .. } => {
                roots.insert(target.root().to_string());
            }
            Stmt::Push { array, .. } | Stmt::Pop { array, .. } => {
                roots.insert(array.root().to_string());
            }
            Stmt::VarDecl { name, .. } => {
                roots.insert(name.clone());
            }
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                worklist.extend(then_branch.iter());
                worklist.extend(else_branch.iter());
            }
            Stmt::While { body, .. } | Stmt::Unchecked { body, .. } => {
                worklist.extend(body.iter());
            }
            _ => {}
        }
    }
    roots
}

/// Syntactic effect summary: walks the call graph from `name` with a
/// visited set, so recursion terminates without touching the cache.
pub fn compute_summary(contract: &ContractDef, name: &str) -> FunctionSummary {
    let storage_roots: BTreeSet<&str> =
        contract.storage.iter().map(|d| d.name.as_str()).collect();
    let mut writes: BTreeSet<String> = BTreeSet::new();
    let mut has_external_call = false;

    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(name);

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        let Some(func) = contract.functions.iter().find(|f| f.name == current) else {
            continue;
        };
        let mut stmts: VecDeque<&Stmt> = func.body.iter().collect();
        while let Some(stmt) = stmts.pop_front() {
            match stmt {
                Stmt::Assign { target, value, .. } => {
                    if storage_roots.contains(target.root()) {
                        writes.insert(target.root().to_string());
                    }
                    queue_callees(value, &mut queue);
                }
                Stmt::Push { array, value, .. } => {
                    if storage_roots.contains(array.root()) {
                        writes.insert(array.root().to_string());
                    }
                    queue_callees(value, &mut queue);
                }
                Stmt::Pop { array, .. } => {
                    if storage_roots.contains(array.root()) {
                        writes.insert(array.root().to_string());
                    }
                }
                Stmt::ExternalCall { .. } => {
                    has_external_call = true;
                }
                Stmt::Require { cond, .. } | Stmt::Assert { cond, .. } => {
                    queue_callees(cond, &mut queue);
                }
                Stmt::VarDecl { init, .. } => {
                    if let Some(init) = init {
                        queue_callees(init, &mut queue);
                    }
                }
                Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                    ..
                } => {
                    queue_callees(cond, &mut queue);
                    stmts.extend(then_branch.iter());
                    stmts.extend(else_branch.iter());
                }
                Stmt::While { cond, body, .. } => {
                    queue_callees(cond, &mut queue);
                    stmts.extend(body.iter());
                }
                Stmt::Unchecked { body, .. } => {
                    stmts.extend(body.iter());
                }
                Stmt::Expr { expr, .. } => {
                    queue_callees(expr, &mut queue);
                }
                Stmt::Return { value, .. } => {
                    if let Some(value) = value {
                        queue_callees(value, &mut queue);
                    }
                }
            }
        }
    }

    if has_external_call {
        // External code can reenter and write anything.
        writes.extend(storage_roots.iter().map(|s| s.to_string()));
    }

    FunctionSummary {
        writes: writes.into_iter().collect(),
        has_external_call,
    }
}

fn queue_callees<'u>(expr: &'u Expr, queue: &mut VecDeque<&'u str>) {
    let mut exprs: VecDeque<&Expr> = VecDeque::new();
    exprs.push_back(expr);
    while let Some(expr) = exprs.pop_front() {
        match &expr.kind {
            ExprKind::Call { callee, args } => {
                queue.push_back(callee);
                exprs.extend(args.iter());
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                exprs.push_back(lhs);
                exprs.push_back(rhs);
            }
            ExprKind::Unary { operand, .. } => exprs.push_back(operand),
            ExprKind::Index { base, index } => {
                exprs.push_back(base);
                exprs.push_back(index);
            }
            ExprKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                exprs.push_back(cond);
                exprs.push_back(then_branch);
                exprs.push_back(else_branch);
            }
            ExprKind::Wrap { inner }
            | ExprKind::Unwrap { inner }
            | ExprKind::Cast { inner } => exprs.push_back(inner),
            ExprKind::ArrayLen { base } => exprs.push_back(base),
            ExprKind::BoolLit(_) | ExprKind::NumLit(_) | ExprKind::Var(_) => {}
        }
    }
}
