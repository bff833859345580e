//! Typed AST consumed by the model checker
//!
//! The front end (parser, name resolution, type checker) is an external
//! collaborator: it hands over a fully resolved, typed `SourceUnit`,
//! typically as JSON. The engine never mutates the AST and fails fast if
//! any type slot is still `Ty::Unresolved` (see [`SourceUnit::validate`]).
//!
//! Every expression carries its resolved type and source byte range, which
//! is all the encoder needs to produce sort-exact terms and
//! position-accurate verification targets.

mod span;

pub use span::Span;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Resolved type of a declaration or expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    Bool,
    /// Fixed-width integer, e.g. `uint256` is `{ bits: 256, signed: false }`
    Int { bits: u16, signed: bool },
    /// 160-bit account address
    Address,
    /// `mapping(K => V)` - total, no bounds obligations on reads
    Mapping { key: Box<Ty>, value: Box<Ty> },
    /// Dynamic array `T[]` - a length plus element store
    Array { elem: Box<Ty> },
    /// User-defined value type: a transparent wrapper over a value type.
    /// Erased to `underlying` for encoding, kept for diagnostics.
    UserValue { name: String, underlying: Box<Ty> },
    /// Left behind by a failed front-end pass. The engine refuses to run
    /// on an AST containing this.
    Unresolved,
}

impl Ty {
    pub fn uint(bits: u16) -> Ty {
        Ty::Int { bits, signed: false }
    }

    pub fn int(bits: u16) -> Ty {
        Ty::Int { bits, signed: true }
    }

    pub fn mapping(key: Ty, value: Ty) -> Ty {
        Ty::Mapping {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn array(elem: Ty) -> Ty {
        Ty::Array {
            elem: Box::new(elem),
        }
    }

    /// Peel user-defined value type wrappers down to the underlying type.
    pub fn erased(&self) -> &Ty {
        let mut ty = self;
        while let Ty::UserValue { underlying, .. } = ty {
            ty = underlying;
        }
        ty
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.erased(), Ty::Int { .. })
    }

    /// Bit width and signedness of the erased type, if it is an integer.
    pub fn int_info(&self) -> Option<(u16, bool)> {
        match self.erased() {
            Ty::Int { bits, signed } => Some((*bits, *signed)),
            _ => None,
        }
    }

    /// Human-readable name used in diagnostics. User-defined value types
    /// keep their source-level identity here even though the encoder
    /// erases them.
    pub fn describe(&self) -> String {
        match self {
            Ty::Bool => "bool".to_string(),
            Ty::Int { bits, signed: true } => format!("int{}", bits),
            Ty::Int {
                bits,
                signed: false,
            } => format!("uint{}", bits),
            Ty::Address => "address".to_string(),
            Ty::Mapping { key, value } => {
                format!("mapping({} => {})", key.describe(), value.describe())
            }
            Ty::Array { elem } => format!("{}[]", elem.describe()),
            Ty::UserValue { name, .. } => name.clone(),
            Ty::Unresolved => "<unresolved>".to_string(),
        }
    }
}

/// Binary operators (post-desugaring; compound assignments arrive as
/// plain assignments with a binary RHS)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Not,
    Neg,
}

/// Typed expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Ty,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprKind {
    BoolLit(bool),
    NumLit(i128),
    Var(String),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    /// `base[index]` - bounds obligation for arrays, none for mappings
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// `cond ? then : else`; the front end guarantees both branches have
    /// a compatible type
    Ternary {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    /// Internal function call
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    /// `T.wrap(x)` for a user-defined value type T; `ty` is the wrapper
    Wrap {
        inner: Box<Expr>,
    },
    /// `T.unwrap(x)`; `ty` is the underlying type
    Unwrap {
        inner: Box<Expr>,
    },
    /// Explicit or implicit integer conversion; `ty` is the target type
    Cast {
        inner: Box<Expr>,
    },
    /// `arr.length`
    ArrayLen {
        base: Box<Expr>,
    },
}

impl Expr {
    pub fn boolean(value: bool, span: Span) -> Expr {
        Expr {
            kind: ExprKind::BoolLit(value),
            ty: Ty::Bool,
            span,
        }
    }

    pub fn num(value: i128, ty: Ty, span: Span) -> Expr {
        Expr {
            kind: ExprKind::NumLit(value),
            ty,
            span,
        }
    }

    pub fn var(name: impl Into<String>, ty: Ty, span: Span) -> Expr {
        Expr {
            kind: ExprKind::Var(name.into()),
            ty,
            span,
        }
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr, ty: Ty, span: Span) -> Expr {
        Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            span,
        }
    }

    pub fn index(base: Expr, index: Expr, ty: Ty, span: Span) -> Expr {
        Expr {
            kind: ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
            ty,
            span,
        }
    }
}

/// Assignment target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LValue {
    Var {
        name: String,
        ty: Ty,
        span: Span,
    },
    Index {
        base: Box<LValue>,
        index: Expr,
        ty: Ty,
        span: Span,
    },
}

impl LValue {
    pub fn ty(&self) -> &Ty {
        match self {
            LValue::Var { ty, .. } | LValue::Index { ty, .. } => ty,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            LValue::Var { span, .. } | LValue::Index { span, .. } => *span,
        }
    }

    /// Name of the root variable being written.
    pub fn root(&self) -> &str {
        match self {
            LValue::Var { name, .. } => name,
            LValue::Index { base, .. } => base.root(),
        }
    }
}

/// Statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    VarDecl {
        name: String,
        ty: Ty,
        init: Option<Expr>,
        span: Span,
    },
    Assign {
        target: LValue,
        value: Expr,
        span: Span,
    },
    /// `require(cond)` - assumed on the surviving path; also checked for
    /// being trivially true
    Require {
        cond: Expr,
        span: Span,
    },
    /// `assert(cond)` - a proof obligation
    Assert {
        cond: Expr,
        span: Span,
    },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    /// `unchecked { ... }` - arithmetic wraps, no overflow obligations
    Unchecked {
        body: Vec<Stmt>,
        span: Span,
    },
    Push {
        array: LValue,
        value: Expr,
        span: Span,
    },
    Pop {
        array: LValue,
        span: Span,
    },
    /// Call into unknown external code; abstracted as worst-case storage
    /// mutation
    ExternalCall {
        callee: String,
        span: Span,
    },
    /// Expression statement (internal call for effect)
    Expr {
        expr: Expr,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDecl { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Require { span, .. }
            | Stmt::Assert { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Unchecked { span, .. }
            | Stmt::Push { span, .. }
            | Stmt::Pop { span, .. }
            | Stmt::ExternalCall { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::Return { span, .. } => *span,
        }
    }
}

/// A declared variable (storage slot, parameter, or local)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub ty: Ty,
    pub span: Span,
}

impl VarDecl {
    pub fn new(name: impl Into<String>, ty: Ty, span: Span) -> Self {
        Self {
            name: name.into(),
            ty,
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<VarDecl>,
    pub ret: Option<Ty>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDef {
    pub name: String,
    pub storage: Vec<VarDecl>,
    pub functions: Vec<FunctionDef>,
    pub span: Span,
}

/// Root of the typed AST handed over by the front end
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub contracts: Vec<ContractDef>,
}

impl SourceUnit {
    /// Reject an AST the front end failed to fully resolve.
    ///
    /// Walks every type slot with an explicit worklist (no call-stack
    /// recursion) and returns the span of the first `Ty::Unresolved`
    /// found, or `Ok(())` for a well-formed unit.
    pub fn validate(&self) -> Result<(), Span> {
        // Work items: a type plus the span to blame if it is unresolved.
        let mut worklist: VecDeque<(&Ty, Span)> = VecDeque::new();
        let mut stmts: VecDeque<&Stmt> = VecDeque::new();

        for contract in &self.contracts {
            for decl in &contract.storage {
                worklist.push_back((&decl.ty, decl.span));
            }
            for func in &contract.functions {
                for param in &func.params {
                    worklist.push_back((&param.ty, param.span));
                }
                if let Some(ret) = &func.ret {
                    worklist.push_back((ret, func.span));
                }
                for stmt in &func.body {
                    stmts.push_back(stmt);
                }
            }
        }

        while let Some(stmt) = stmts.pop_front() {
            match stmt {
                Stmt::VarDecl { ty, init, span, .. } => {
                    worklist.push_back((ty, *span));
                    if let Some(init) = init {
                        collect_expr_types(init, &mut worklist);
                    }
                }
                Stmt::Assign { target, value, .. } => {
                    collect_lvalue_types(target, &mut worklist);
                    collect_expr_types(value, &mut worklist);
                }
                Stmt::Require { cond, .. } | Stmt::Assert { cond, .. } => {
                    collect_expr_types(cond, &mut worklist);
                }
                Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                    ..
                } => {
                    collect_expr_types(cond, &mut worklist);
                    stmts.extend(then_branch.iter());
                    stmts.extend(else_branch.iter());
                }
                Stmt::While { cond, body, .. } => {
                    collect_expr_types(cond, &mut worklist);
                    stmts.extend(body.iter());
                }
                Stmt::Unchecked { body, .. } => {
                    stmts.extend(body.iter());
                }
                Stmt::Push { array, value, .. } => {
                    collect_lvalue_types(array, &mut worklist);
                    collect_expr_types(value, &mut worklist);
                }
                Stmt::Pop { array, .. } => {
                    collect_lvalue_types(array, &mut worklist);
                }
                Stmt::Expr { expr, .. } => {
                    collect_expr_types(expr, &mut worklist);
                }
                Stmt::Return { value, .. } => {
                    if let Some(value) = value {
                        collect_expr_types(value, &mut worklist);
                    }
                }
                Stmt::ExternalCall { .. } => {}
            }
        }

        while let Some((ty, span)) = worklist.pop_front() {
            match ty {
                Ty::Unresolved => return Err(span),
                Ty::Mapping { key, value } => {
                    worklist.push_back((key, span));
                    worklist.push_back((value, span));
                }
                Ty::Array { elem } => worklist.push_back((elem, span)),
                Ty::UserValue { underlying, .. } => worklist.push_back((underlying, span)),
                Ty::Bool | Ty::Int { .. } | Ty::Address => {}
            }
        }

        Ok(())
    }
}

fn collect_expr_types<'a>(expr: &'a Expr, worklist: &mut VecDeque<(&'a Ty, Span)>) {
    let mut queue: VecDeque<&'a Expr> = VecDeque::new();
    queue.push_back(expr);
    while let Some(expr) = queue.pop_front() {
        worklist.push_back((&expr.ty, expr.span));
        match &expr.kind {
            ExprKind::Binary { lhs, rhs, .. } => {
                queue.push_back(lhs);
                queue.push_back(rhs);
            }
            ExprKind::Unary { operand, .. } => queue.push_back(operand),
            ExprKind::Index { base, index } => {
                queue.push_back(base);
                queue.push_back(index);
            }
            ExprKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                queue.push_back(cond);
                queue.push_back(then_branch);
                queue.push_back(else_branch);
            }
            ExprKind::Call { args, .. } => queue.extend(args.iter()),
            ExprKind::Wrap { inner } | ExprKind::Unwrap { inner } | ExprKind::Cast { inner } => {
                queue.push_back(inner)
            }
            ExprKind::ArrayLen { base } => queue.push_back(base),
            ExprKind::BoolLit(_) | ExprKind::NumLit(_) | ExprKind::Var(_) => {}
        }
    }
}

fn collect_lvalue_types<'a>(lvalue: &'a LValue, worklist: &mut VecDeque<(&'a Ty, Span)>) {
    let mut cur = lvalue;
    loop {
        match cur {
            LValue::Var { ty, span, .. } => {
                worklist.push_back((ty, *span));
                break;
            }
            LValue::Index {
                base,
                index,
                ty,
                span,
            } => {
                worklist.push_back((ty, *span));
                collect_expr_types(index, worklist);
                cur = base;
            }
        }
    }
}
