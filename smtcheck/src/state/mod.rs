//! Versioned state abstraction over contract storage and locals
//!
//! Every program variable lowers to one or more SMT slots, each with its
//! own SSA version stream (`balances!0`, `balances!1`, ...). Writes never
//! mutate: they introduce a fresh version constrained against the old one
//! (`(store ...)` for mappings and array elements), so path conditions
//! can refer to any intermediate version.
//!
//! Lowering:
//! - scalars (ints, bool, address) and user-defined value types over them
//!   become a single `Int`/`Bool` slot; UDVTs are erased to the underlying
//!   type
//! - `mapping(K => V)` becomes one `(Array Int V')` slot, total over keys
//! - `T[]` becomes a length slot (`a.length : Int`) plus an element slot
//!   (`a : (Array Int Int)`); `T[][]` adds a per-outer-index inner-length
//!   slot (`a.inner_length : (Array Int Int)`). Deeper nesting is an
//!   encoding limitation and is rejected.

use std::collections::BTreeMap;

use crate::ast::Ty;
use crate::error::{CheckError, Result};
use crate::smt::{Decl, Sort, Term};

/// How a source-level variable maps onto SMT slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lowering {
    /// Single slot holding the value directly
    Scalar(Sort),
    /// Single array slot, total over keys
    Mapping(Sort),
    /// Length slot + element slot
    Array { elem: Sort },
    /// Outer length slot + inner-length array slot + nested element slot
    NestedArray,
}

/// Lower a source type to its slot shape. `span_owner` names the variable
/// for error messages.
pub fn lower_ty(ty: &Ty, span_owner: &str) -> Result<Lowering> {
    match ty.erased() {
        Ty::Bool => Ok(Lowering::Scalar(Sort::Bool)),
        Ty::Int { .. } | Ty::Address => Ok(Lowering::Scalar(Sort::Int)),
        Ty::Mapping { .. } => Ok(Lowering::Mapping(mapping_sort(ty, span_owner)?)),
        Ty::Array { elem } => match elem.erased() {
            Ty::Bool | Ty::Int { .. } | Ty::Address => Ok(Lowering::Array {
                elem: scalar_sort(elem),
            }),
            Ty::Array { elem: inner } => match inner.erased() {
                Ty::Bool | Ty::Int { .. } | Ty::Address => Ok(Lowering::NestedArray),
                _ => Err(CheckError::unsupported_type(span_owner, ty.describe())),
            },
            _ => Err(CheckError::unsupported_type(span_owner, ty.describe())),
        },
        Ty::Unresolved => Err(CheckError::unsupported_type(span_owner, ty.describe())),
        // erased() never returns UserValue
        Ty::UserValue { .. } => Err(CheckError::unsupported_type(span_owner, ty.describe())),
    }
}

fn scalar_sort(ty: &Ty) -> Sort {
    match ty.erased() {
        Ty::Bool => Sort::Bool,
        _ => Sort::Int,
    }
}

fn mapping_sort(ty: &Ty, span_owner: &str) -> Result<Sort> {
    match ty.erased() {
        Ty::Mapping { value, .. } => {
            let value_sort = match value.erased() {
                Ty::Bool => Sort::Bool,
                Ty::Int { .. } | Ty::Address => Sort::Int,
                Ty::Mapping { .. } => mapping_sort(value, span_owner)?,
                _ => {
                    return Err(CheckError::unsupported_type(span_owner, ty.describe()));
                }
            };
            Ok(Sort::array(Sort::Int, value_sort))
        }
        _ => Err(CheckError::unsupported_type(span_owner, ty.describe())),
    }
}

/// Suffixes distinguishing the slots of one variable.
pub const LENGTH_SUFFIX: &str = ".length";
pub const INNER_LENGTH_SUFFIX: &str = ".inner_length";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SlotState {
    sort: Sort,
    /// Version the slot currently reads as
    current: u32,
    /// Next version number to allocate. Kept separate from `current` so
    /// a discarded branch arm never causes SSA name reuse.
    next: u32,
}

/// SSA-versioned environment mapping slots to their current version.
///
/// `BTreeMap` keeps iteration deterministic, which keeps generated
/// scripts and havoc orders stable across runs.
#[derive(Debug, Clone, Default)]
pub struct StateEnv {
    slots: BTreeMap<String, SlotState>,
    decls: Vec<Decl>,
}

impl StateEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a source variable, creating its slots at version 0.
    pub fn declare(&mut self, name: &str, ty: &Ty) -> Result<()> {
        match lower_ty(ty, name)? {
            Lowering::Scalar(sort) | Lowering::Mapping(sort) => {
                self.add_slot(name, sort);
            }
            Lowering::Array { elem } => {
                self.add_slot(&format!("{name}{LENGTH_SUFFIX}"), Sort::Int);
                self.add_slot(name, Sort::array(Sort::Int, elem));
            }
            Lowering::NestedArray => {
                self.add_slot(&format!("{name}{LENGTH_SUFFIX}"), Sort::Int);
                self.add_slot(
                    &format!("{name}{INNER_LENGTH_SUFFIX}"),
                    Sort::array(Sort::Int, Sort::Int),
                );
                self.add_slot(
                    name,
                    Sort::array(Sort::Int, Sort::array(Sort::Int, Sort::Int)),
                );
            }
        }
        Ok(())
    }

    fn add_slot(&mut self, slot: &str, sort: Sort) {
        if let Some(state) = self.slots.get_mut(slot) {
            // Redeclaration, e.g. a loop-body local on a later unrolled
            // iteration: start a fresh version, never reuse names.
            state.current = state.next;
            state.next += 1;
            state.sort = sort.clone();
            self.decls.push(Decl {
                name: ssa_name(slot, state.current),
                sort,
            });
            return;
        }
        let ssa = ssa_name(slot, 0);
        self.decls.push(Decl {
            name: ssa,
            sort: sort.clone(),
        });
        self.slots.insert(
            slot.to_string(),
            SlotState {
                sort,
                current: 0,
                next: 1,
            },
        );
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    pub fn sort_of(&self, slot: &str) -> Option<&Sort> {
        self.slots.get(slot).map(|s| &s.sort)
    }

    /// Current SSA term for a slot.
    pub fn current(&self, slot: &str) -> Result<Term> {
        let state = self
            .slots
            .get(slot)
            .ok_or_else(|| CheckError::unknown_variable(slot))?;
        Ok(Term::var(ssa_name(slot, state.current)))
    }

    /// Bump a slot to a fresh version and return its new SSA term. The
    /// caller is responsible for constraining the new version.
    pub fn fresh(&mut self, slot: &str) -> Result<Term> {
        let state = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| CheckError::unknown_variable(slot))?;
        state.current = state.next;
        state.next += 1;
        let ssa = ssa_name(slot, state.current);
        let sort = state.sort.clone();
        self.decls.push(Decl {
            name: ssa.clone(),
            sort,
        });
        Ok(Term::var(ssa))
    }

    /// Current-version snapshot for fork/merge bookkeeping.
    pub fn versions(&self) -> BTreeMap<String, u32> {
        self.slots
            .iter()
            .map(|(name, s)| (name.clone(), s.current))
            .collect()
    }

    /// Slots whose current version differs between this environment and
    /// `other` (the two arms of a branch), in deterministic order.
    pub fn diverging_slots(&self, other: &StateEnv) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(name, s)| {
                other
                    .slots
                    .get(*name)
                    .is_some_and(|o| o.current != s.current)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Adopt allocation counters and declarations from a branch arm so
    /// subsequent fresh versions never collide with names used inside
    /// the arm. Does not change what any slot currently reads as.
    pub fn adopt_counters(&mut self, other: &StateEnv) {
        for (name, state) in &mut self.slots {
            if let Some(o) = other.slots.get(name) {
                if o.next > state.next {
                    state.next = o.next;
                }
            }
        }
        for decl in &other.decls {
            if !self.decls.contains(decl) {
                self.decls.push(decl.clone());
            }
        }
    }

    /// Make every slot read as it does in `other`. Used when exactly one
    /// branch arm falls through: the surviving state is that arm's.
    pub fn set_versions_from(&mut self, other: &StateEnv) {
        for (name, state) in &mut self.slots {
            if let Some(o) = other.slots.get(name) {
                state.current = o.current;
            }
        }
    }

    /// Set one slot's current version. The version must have been
    /// allocated already.
    pub fn set_version(&mut self, slot: &str, version: u32) -> Result<()> {
        let state = self
            .slots
            .get_mut(slot)
            .ok_or_else(|| CheckError::unknown_variable(slot))?;
        state.current = version;
        Ok(())
    }

    /// All declarations made so far, in creation order.
    pub fn decls(&self) -> &[Decl] {
        &self.decls
    }

    /// Havoc every slot in `names`: fresh, unconstrained versions.
    /// Used for external calls and loop-head abstraction.
    pub fn havoc(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            self.fresh(name)?;
        }
        Ok(())
    }

    /// Every slot name, in deterministic order.
    pub fn slot_names(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }
}

/// SSA symbol for a slot at a version.
pub fn ssa_name(slot: &str, version: u32) -> String {
    format!("{slot}!{version}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ty;

    #[test]
    fn test_lower_scalar_types() {
        assert_eq!(lower_ty(&Ty::uint(256), "x").unwrap(), Lowering::Scalar(Sort::Int));
        assert_eq!(lower_ty(&Ty::Bool, "b").unwrap(), Lowering::Scalar(Sort::Bool));
        assert_eq!(lower_ty(&Ty::Address, "a").unwrap(), Lowering::Scalar(Sort::Int));
    }

    #[test]
    fn test_lower_udvt_erases_to_underlying() {
        let udt = Ty::UserValue {
            name: "Price".to_string(),
            underlying: Box::new(Ty::uint(128)),
        };
        assert_eq!(lower_ty(&udt, "p").unwrap(), Lowering::Scalar(Sort::Int));
    }

    #[test]
    fn test_lower_mapping() {
        let ty = Ty::mapping(Ty::Address, Ty::uint(256));
        assert_eq!(
            lower_ty(&ty, "balances").unwrap(),
            Lowering::Mapping(Sort::array(Sort::Int, Sort::Int))
        );
    }

    #[test]
    fn test_lower_nested_mapping() {
        let ty = Ty::mapping(Ty::Address, Ty::mapping(Ty::Address, Ty::uint(256)));
        assert_eq!(
            lower_ty(&ty, "allowance").unwrap(),
            Lowering::Mapping(Sort::array(Sort::Int, Sort::array(Sort::Int, Sort::Int)))
        );
    }

    #[test]
    fn test_lower_array_and_nested_array() {
        assert_eq!(
            lower_ty(&Ty::array(Ty::uint(256)), "a").unwrap(),
            Lowering::Array { elem: Sort::Int }
        );
        assert_eq!(
            lower_ty(&Ty::array(Ty::array(Ty::uint(256))), "a").unwrap(),
            Lowering::NestedArray
        );
    }

    #[test]
    fn test_lower_rejects_triple_nesting() {
        let ty = Ty::array(Ty::array(Ty::array(Ty::uint(256))));
        assert!(lower_ty(&ty, "deep").is_err());
    }

    #[test]
    fn test_lower_rejects_array_of_mapping() {
        let ty = Ty::array(Ty::mapping(Ty::Address, Ty::uint(256)));
        assert!(lower_ty(&ty, "weird").is_err());
    }

    #[test]
    fn test_declare_scalar_and_fresh() {
        let mut env = StateEnv::new();
        env.declare("x", &Ty::uint(256)).unwrap();
        assert_eq!(env.current("x").unwrap(), Term::var("x!0"));
        assert_eq!(env.fresh("x").unwrap(), Term::var("x!1"));
        assert_eq!(env.current("x").unwrap(), Term::var("x!1"));
        assert_eq!(env.decls().len(), 2);
    }

    #[test]
    fn test_declare_array_creates_length_slot() {
        let mut env = StateEnv::new();
        env.declare("a", &Ty::array(Ty::uint(256))).unwrap();
        assert!(env.contains("a"));
        assert!(env.contains("a.length"));
        assert_eq!(env.current("a.length").unwrap(), Term::var("a.length!0"));
        assert_eq!(
            env.sort_of("a"),
            Some(&Sort::array(Sort::Int, Sort::Int))
        );
    }

    #[test]
    fn test_declare_nested_array_creates_inner_length() {
        let mut env = StateEnv::new();
        env.declare("a", &Ty::array(Ty::array(Ty::uint(8)))).unwrap();
        assert!(env.contains("a.inner_length"));
        assert_eq!(
            env.sort_of("a"),
            Some(&Sort::array(Sort::Int, Sort::array(Sort::Int, Sort::Int)))
        );
    }

    #[test]
    fn test_unknown_slot_is_error() {
        let env = StateEnv::new();
        assert!(env.current("nope").is_err());
    }

    #[test]
    fn test_diverging_slots_and_counter_passing() {
        let mut base = StateEnv::new();
        base.declare("x", &Ty::uint(256)).unwrap();
        base.declare("y", &Ty::uint(256)).unwrap();

        let mut then_env = base.clone();
        then_env.fresh("x").unwrap(); // x!1

        let mut else_env = base.clone();
        else_env.adopt_counters(&then_env);
        // counters were adopted but the else arm still reads the base version
        assert_eq!(else_env.current("x").unwrap(), Term::var("x!0"));
        else_env.fresh("x").unwrap(); // x!2, no collision with the then arm

        assert_eq!(else_env.current("x").unwrap(), Term::var("x!2"));
        assert_eq!(then_env.diverging_slots(&else_env), vec!["x".to_string()]);
        assert!(then_env.diverging_slots(&then_env.clone()).is_empty());
    }

    #[test]
    fn test_set_versions_from_surviving_arm() {
        let mut base = StateEnv::new();
        base.declare("x", &Ty::uint(256)).unwrap();

        let mut arm = base.clone();
        arm.fresh("x").unwrap(); // x!1

        base.adopt_counters(&arm);
        base.set_versions_from(&arm);
        assert_eq!(base.current("x").unwrap(), Term::var("x!1"));
        // next allocation continues past the arm's names
        assert_eq!(base.fresh("x").unwrap(), Term::var("x!2"));
    }

    #[test]
    fn test_redeclare_starts_fresh_version() {
        let mut env = StateEnv::new();
        env.declare("i", &Ty::uint(256)).unwrap();
        env.fresh("i").unwrap(); // i!1
        env.declare("i", &Ty::uint(256)).unwrap();
        assert_eq!(env.current("i").unwrap(), Term::var("i!2"));
    }

    #[test]
    fn test_havoc_bumps_all_named_slots() {
        let mut env = StateEnv::new();
        env.declare("x", &Ty::uint(256)).unwrap();
        env.declare("m", &Ty::mapping(Ty::Address, Ty::uint(256)))
            .unwrap();
        let names = env.slot_names();
        env.havoc(&names).unwrap();
        assert_eq!(env.current("x").unwrap(), Term::var("x!1"));
        assert_eq!(env.current("m").unwrap(), Term::var("m!1"));
    }
}
