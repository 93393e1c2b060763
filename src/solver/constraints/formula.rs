//! Logical connectives over binary relations, with three-valued evaluation.
//!
//! A [`Formula`] is the reified constraint tree the predicate compiler
//! produces for `not`/`and`/`or`/`xor`/`iff`. Cloning a formula into another
//! store simplifies it against that store's domains: subtrees that are
//! already entailed collapse to [`Cloned::True`], contradicted ones to
//! [`Cloned::False`], and the connectives combine those outcomes before any
//! propagator is built.

use crate::{
    error::Fail,
    solver::{
        constraint::{ConstraintDescriptor, Propagator},
        constraints::relation::Rel,
        store::{PropCtx, Store, VarId},
    },
};

#[derive(Debug, Clone)]
pub enum Formula {
    Rel(Rel),
    Not(Box<Formula>),
    And(Box<Formula>, Box<Formula>),
    Or(Box<Formula>, Box<Formula>),
    Xor(Box<Formula>, Box<Formula>),
    Iff(Box<Formula>, Box<Formula>),
}

/// The outcome of cloning a formula into another store.
#[derive(Debug)]
pub enum Cloned {
    True,
    False,
    Formula(Formula),
}

impl Formula {
    pub fn variables(&self, out: &mut Vec<VarId>) {
        match self {
            Formula::Rel(r) => r.variables(out),
            Formula::Not(a) => a.variables(out),
            Formula::And(a, b) | Formula::Or(a, b) | Formula::Xor(a, b) | Formula::Iff(a, b) => {
                a.variables(out);
                b.variables(out);
            }
        }
    }

    /// Three-valued evaluation against the current domains.
    pub fn truth(&self, ctx: &PropCtx) -> Option<bool> {
        match self {
            Formula::Rel(r) => r.truth(ctx),
            Formula::Not(a) => a.truth(ctx).map(|t| !t),
            Formula::And(a, b) => match (a.truth(ctx), b.truth(ctx)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Formula::Or(a, b) => match (a.truth(ctx), b.truth(ctx)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Formula::Xor(a, b) => match (a.truth(ctx), b.truth(ctx)) {
                (Some(x), Some(y)) => Some(x != y),
                _ => None,
            },
            Formula::Iff(a, b) => match (a.truth(ctx), b.truth(ctx)) {
                (Some(x), Some(y)) => Some(x == y),
                _ => None,
            },
        }
    }

    /// Narrows domains so the formula holds.
    pub fn enforce(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        match self {
            Formula::Rel(r) => r.enforce(ctx),
            Formula::Not(a) => a.enforce_not(ctx),
            Formula::And(a, b) => {
                a.enforce(ctx)?;
                b.enforce(ctx)
            }
            Formula::Or(a, b) => match (a.truth(ctx), b.truth(ctx)) {
                (Some(false), Some(false)) => Err(Fail),
                (Some(false), _) => b.enforce(ctx),
                (_, Some(false)) => a.enforce(ctx),
                _ => Ok(()),
            },
            Formula::Xor(a, b) => match (a.truth(ctx), b.truth(ctx)) {
                (Some(true), _) => b.enforce_not(ctx),
                (Some(false), _) => b.enforce(ctx),
                (_, Some(true)) => a.enforce_not(ctx),
                (_, Some(false)) => a.enforce(ctx),
                _ => Ok(()),
            },
            Formula::Iff(a, b) => match (a.truth(ctx), b.truth(ctx)) {
                (Some(true), _) => b.enforce(ctx),
                (Some(false), _) => b.enforce_not(ctx),
                (_, Some(true)) => a.enforce(ctx),
                (_, Some(false)) => a.enforce_not(ctx),
                _ => Ok(()),
            },
        }
    }

    /// Narrows domains so the formula cannot hold.
    pub fn enforce_not(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        match self {
            Formula::Rel(r) => r.enforce_not(ctx),
            Formula::Not(a) => a.enforce(ctx),
            // !(a && b) == !a || !b
            Formula::And(a, b) => match (a.truth(ctx), b.truth(ctx)) {
                (Some(true), Some(true)) => Err(Fail),
                (Some(true), _) => b.enforce_not(ctx),
                (_, Some(true)) => a.enforce_not(ctx),
                _ => Ok(()),
            },
            Formula::Or(a, b) => {
                a.enforce_not(ctx)?;
                b.enforce_not(ctx)
            }
            Formula::Xor(a, b) => Formula::Iff(a.clone(), b.clone()).enforce(ctx),
            Formula::Iff(a, b) => Formula::Xor(a.clone(), b.clone()).enforce(ctx),
        }
    }

    /// Clones into `target`, collapsing subtrees whose truth is already
    /// determined by the target store's domains.
    pub fn clone_into(&self, source: &Store, target: &mut Store) -> Cloned {
        match self {
            Formula::Rel(r) => {
                let cloned = r.clone_into(source, target);
                match cloned.truth_in(target) {
                    Some(true) => Cloned::True,
                    Some(false) => Cloned::False,
                    None => Cloned::Formula(Formula::Rel(cloned)),
                }
            }
            Formula::Not(a) => match Formula::clone_into(a, source, target) {
                Cloned::True => Cloned::False,
                Cloned::False => Cloned::True,
                Cloned::Formula(f) => Cloned::Formula(Formula::Not(Box::new(f))),
            },
            Formula::And(a, b) => match (Formula::clone_into(a, source, target), Formula::clone_into(b, source, target)) {
                (Cloned::False, _) | (_, Cloned::False) => Cloned::False,
                (Cloned::True, other) | (other, Cloned::True) => other,
                (Cloned::Formula(fa), Cloned::Formula(fb)) => {
                    Cloned::Formula(Formula::And(Box::new(fa), Box::new(fb)))
                }
            },
            Formula::Or(a, b) => match (Formula::clone_into(a, source, target), Formula::clone_into(b, source, target)) {
                (Cloned::True, _) | (_, Cloned::True) => Cloned::True,
                (Cloned::False, other) | (other, Cloned::False) => other,
                (Cloned::Formula(fa), Cloned::Formula(fb)) => {
                    Cloned::Formula(Formula::Or(Box::new(fa), Box::new(fb)))
                }
            },
            Formula::Xor(a, b) => match (Formula::clone_into(a, source, target), Formula::clone_into(b, source, target)) {
                (Cloned::True, Cloned::True) | (Cloned::False, Cloned::False) => Cloned::False,
                (Cloned::True, Cloned::False) | (Cloned::False, Cloned::True) => Cloned::True,
                (Cloned::True, Cloned::Formula(f)) | (Cloned::Formula(f), Cloned::True) => {
                    Cloned::Formula(Formula::Not(Box::new(f)))
                }
                (Cloned::False, Cloned::Formula(f)) | (Cloned::Formula(f), Cloned::False) => {
                    Cloned::Formula(f)
                }
                (Cloned::Formula(fa), Cloned::Formula(fb)) => {
                    Cloned::Formula(Formula::Xor(Box::new(fa), Box::new(fb)))
                }
            },
            Formula::Iff(a, b) => match (Formula::clone_into(a, source, target), Formula::clone_into(b, source, target)) {
                (Cloned::True, Cloned::True) | (Cloned::False, Cloned::False) => Cloned::True,
                (Cloned::True, Cloned::False) | (Cloned::False, Cloned::True) => Cloned::False,
                (Cloned::True, Cloned::Formula(f)) | (Cloned::Formula(f), Cloned::True) => {
                    Cloned::Formula(f)
                }
                (Cloned::False, Cloned::Formula(f)) | (Cloned::Formula(f), Cloned::False) => {
                    Cloned::Formula(Formula::Not(Box::new(f)))
                }
                (Cloned::Formula(fa), Cloned::Formula(fb)) => {
                    Cloned::Formula(Formula::Iff(Box::new(fa), Box::new(fb)))
                }
            },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Formula::Rel(r) => r.describe(),
            Formula::Not(a) => format!("!({})", a.describe()),
            Formula::And(a, b) => format!("({} && {})", a.describe(), b.describe()),
            Formula::Or(a, b) => format!("({} || {})", a.describe(), b.describe()),
            Formula::Xor(a, b) => format!("({} ^ {})", a.describe(), b.describe()),
            Formula::Iff(a, b) => format!("({} <-> {})", a.describe(), b.describe()),
        }
    }
}

/// A hard constraint enforcing a [`Formula`].
#[derive(Debug)]
pub struct FormulaConstraint {
    formula: Formula,
    vars: Vec<VarId>,
}

impl FormulaConstraint {
    pub fn new(formula: Formula) -> Self {
        let mut vars = Vec::new();
        formula.variables(&mut vars);
        Self { formula, vars }
    }
}

impl Propagator for FormulaConstraint {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "FormulaConstraint".to_owned(),
            description: self.formula.describe(),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        self.formula.enforce(ctx)
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        match self.formula.clone_into(source, target) {
            Cloned::True => Ok(None),
            Cloned::False => Err(Fail),
            Cloned::Formula(f) => Ok(Some(Box::new(FormulaConstraint::new(f)))),
        }
    }
}

/// A constraint never satisfiable; imposed when a predicate expression
/// reduces to the constant `false`.
#[derive(Debug)]
pub struct Contradiction {
    vars: Vec<VarId>,
}

impl Contradiction {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }
}

impl Default for Contradiction {
    fn default() -> Self {
        Self::new()
    }
}

impl Propagator for Contradiction {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "Contradiction".to_owned(),
            description: "false".to_owned(),
        }
    }

    fn propagate(&self, _ctx: &mut PropCtx) -> Result<(), Fail> {
        Err(Fail)
    }

    fn clone_into(
        &self,
        _source: &Store,
        _target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        Err(Fail)
    }
}

/// The conditional constraint `cond ? then : otherwise`.
///
/// As a constraint it requires `cond -> then` and `!cond -> otherwise`; the
/// functional `if` of the predicate language lowers to one of these linking
/// an auxiliary variable to the selected branch.
#[derive(Debug)]
pub struct IfThenElse {
    cond: Formula,
    then_f: Formula,
    else_f: Formula,
    vars: Vec<VarId>,
}

impl IfThenElse {
    pub fn new(cond: Formula, then_f: Formula, else_f: Formula) -> Self {
        let mut vars = Vec::new();
        cond.variables(&mut vars);
        then_f.variables(&mut vars);
        else_f.variables(&mut vars);
        Self { cond, then_f, else_f, vars }
    }
}

impl Propagator for IfThenElse {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "IfThenElse".to_owned(),
            description: format!(
                "if {} then {} else {}",
                self.cond.describe(),
                self.then_f.describe(),
                self.else_f.describe()
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        match self.cond.truth(ctx) {
            Some(true) => self.then_f.enforce(ctx),
            Some(false) => self.else_f.enforce(ctx),
            None => {
                if self.then_f.truth(ctx) == Some(false) {
                    self.cond.enforce_not(ctx)?;
                    self.else_f.enforce(ctx)?;
                }
                if self.else_f.truth(ctx) == Some(false) {
                    self.cond.enforce(ctx)?;
                    self.then_f.enforce(ctx)?;
                }
                Ok(())
            }
        }
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let cond = self.cond.clone_into(source, target);
        match cond {
            Cloned::True => match self.then_f.clone_into(source, target) {
                Cloned::True => Ok(None),
                Cloned::False => Err(Fail),
                Cloned::Formula(f) => Ok(Some(Box::new(FormulaConstraint::new(f)))),
            },
            Cloned::False => match self.else_f.clone_into(source, target) {
                Cloned::True => Ok(None),
                Cloned::False => Err(Fail),
                Cloned::Formula(f) => Ok(Some(Box::new(FormulaConstraint::new(f)))),
            },
            Cloned::Formula(cond) => {
                let then_c = self.then_f.clone_into(source, target);
                let else_c = self.else_f.clone_into(source, target);
                // (cond -> then) && (!cond -> else), with entailed branches
                // folded away.
                match (then_c, else_c) {
                    (Cloned::True, Cloned::True) => Ok(None),
                    (Cloned::False, Cloned::False) => Err(Fail),
                    (Cloned::True, Cloned::Formula(e)) => Ok(Some(Box::new(
                        FormulaConstraint::new(Formula::Or(Box::new(cond), Box::new(e))),
                    ))),
                    (Cloned::True, Cloned::False) => Ok(Some(Box::new(FormulaConstraint::new(cond)))),
                    (Cloned::False, Cloned::True) => Ok(Some(Box::new(FormulaConstraint::new(
                        Formula::Not(Box::new(cond)),
                    )))),
                    (Cloned::False, Cloned::Formula(e)) => {
                        Ok(Some(Box::new(FormulaConstraint::new(Formula::And(
                            Box::new(Formula::Not(Box::new(cond))),
                            Box::new(e),
                        )))))
                    }
                    (Cloned::Formula(t), Cloned::True) => {
                        Ok(Some(Box::new(FormulaConstraint::new(Formula::Or(
                            Box::new(Formula::Not(Box::new(cond))),
                            Box::new(t),
                        )))))
                    }
                    (Cloned::Formula(t), Cloned::False) => Ok(Some(Box::new(
                        FormulaConstraint::new(Formula::And(Box::new(cond), Box::new(t))),
                    ))),
                    (Cloned::Formula(t), Cloned::Formula(e)) => {
                        Ok(Some(Box::new(IfThenElse::new(cond, t, e))))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::solver::{
        constraint::Operand,
        constraints::relation::{Rel, RelOp},
        domain::IntDomain,
    };

    fn rel(x: Operand, op: RelOp, y: Operand) -> Formula {
        Formula::Rel(Rel::new(x, op, y))
    }

    #[test]
    fn or_enforces_remaining_branch() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 5));
        let y = store.new_variable("y", IntDomain::bounds(0, 5));

        // x > 9 || y == 2, with x > 9 impossible
        let f = Formula::Or(
            Box::new(rel(Operand::Var(x), RelOp::Gt, Operand::Const(9))),
            Box::new(rel(Operand::Var(y), RelOp::Eq, Operand::Const(2))),
        );
        store.with_ctx_for_tests(|ctx| f.enforce(ctx)).unwrap();
        assert_eq!(store.domain(y).singleton_value(), Some(2));
    }

    #[test]
    fn clone_simplifies_entailed_subtrees() {
        let mut source = Store::new();
        let x = source.new_variable("x", IntDomain::bounds(0, 5));
        let y = source.new_variable("y", IntDomain::bounds(0, 5));

        // (x >= 0) && (y == 3): the left side is entailed, only the right
        // side should survive the clone.
        let f = Formula::And(
            Box::new(rel(Operand::Var(x), RelOp::Ge, Operand::Const(0))),
            Box::new(rel(Operand::Var(y), RelOp::Eq, Operand::Const(3))),
        );
        let mut target = Store::new();
        match f.clone_into(&source, &mut target) {
            Cloned::Formula(Formula::Rel(r)) => assert_eq!(r.describe(), "?1 == 3"),
            other => panic!("expected a bare relation, got {:?}", other),
        }
    }

    #[test]
    fn clone_detects_contradiction() {
        let mut source = Store::new();
        let x = source.new_variable("x", IntDomain::bounds(0, 5));

        let f = rel(Operand::Var(x), RelOp::Gt, Operand::Const(10));
        let mut target = Store::new();
        assert!(matches!(f.clone_into(&source, &mut target), Cloned::False));
    }

    #[test]
    fn if_then_else_selects_branch() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::singleton(1));
        let y = store.new_variable("y", IntDomain::bounds(0, 9));

        let c = IfThenElse::new(
            rel(Operand::Var(x), RelOp::Eq, Operand::Const(1)),
            rel(Operand::Var(y), RelOp::Eq, Operand::Const(7)),
            rel(Operand::Var(y), RelOp::Eq, Operand::Const(0)),
        );
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(y).singleton_value(), Some(7));
    }
}
