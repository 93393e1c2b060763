use crate::{
    error::Fail,
    solver::store::{PropCtx, Store, VarId},
};

/// Human-readable identification of a constraint, used by the statistics
/// table and debug output.
#[derive(Debug, Clone)]
pub struct ConstraintDescriptor {
    pub name: String,
    pub description: String,
}

/// Either a variable of a store or an integer constant.
///
/// Propagators take operands rather than variables so that the specialized
/// constant forms (`X + C = Z` vs `X + Y = Z`) are a single implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Var(VarId),
    Const(i64),
}

impl Operand {
    pub fn min(&self, ctx: &PropCtx) -> i64 {
        match *self {
            Operand::Var(v) => ctx.min(v),
            Operand::Const(c) => c,
        }
    }

    pub fn max(&self, ctx: &PropCtx) -> i64 {
        match *self {
            Operand::Var(v) => ctx.max(v),
            Operand::Const(c) => c,
        }
    }

    /// The operand's value if it is grounded.
    pub fn value(&self, ctx: &PropCtx) -> Option<i64> {
        match *self {
            Operand::Var(v) => ctx.value(v),
            Operand::Const(c) => Some(c),
        }
    }

    /// Narrows a variable operand to `[lo, hi]`; checks a constant operand
    /// against the bounds.
    pub fn tighten(&self, ctx: &mut PropCtx, lo: i64, hi: i64) -> Result<(), Fail> {
        match *self {
            Operand::Var(v) => ctx.tighten(v, lo, hi),
            Operand::Const(c) => {
                if c < lo || c > hi {
                    Err(Fail)
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn remove(&self, ctx: &mut PropCtx, value: i64) -> Result<(), Fail> {
        match *self {
            Operand::Var(v) => ctx.remove(v, value),
            Operand::Const(c) => {
                if c == value {
                    Err(Fail)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Re-resolves this operand in `target`, looking the variable up by name
    /// and creating it with its current `source` domain if absent.
    pub fn clone_into(&self, source: &Store, target: &mut Store) -> Operand {
        match *self {
            Operand::Var(v) => Operand::Var(target.find_or_clone_from(source, v)),
            Operand::Const(c) => Operand::Const(c),
        }
    }

    pub fn as_var(&self) -> Option<VarId> {
        match *self {
            Operand::Var(v) => Some(v),
            Operand::Const(_) => None,
        }
    }
}

/// Collects the variables referenced by a slice of operands, preserving
/// order. Used by propagator constructors to precompute their scope.
pub fn scope_of(operands: &[Operand]) -> Vec<VarId> {
    let mut vars = Vec::new();
    for op in operands {
        if let Operand::Var(v) = *op {
            if !vars.contains(&v) {
                vars.push(v);
            }
        }
    }
    vars
}

/// An atomic propagator over finite-domain integer variables.
///
/// `propagate` tightens the domains of the referenced variables or signals
/// infeasibility by returning [`Fail`]; the store drives all propagators to a
/// fixpoint through its worklist. `clone_into` re-expresses the constraint
/// over variables of a different store, resolved by name:
///
/// * `Ok(Some(clone))` — the constraint still carries information;
/// * `Ok(None)` — the constraint is trivially satisfied in the target store
///   and needs no representation there;
/// * `Err(Fail)` — the constraint is trivially violated, so the whole clone
///   is infeasible.
pub trait Propagator: std::fmt::Debug + Send {
    fn variables(&self) -> &[VarId];

    fn descriptor(&self) -> ConstraintDescriptor;

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail>;

    fn clone_into(&self, source: &Store, target: &mut Store)
        -> Result<Option<Box<dyn Propagator>>, Fail>;
}
