//! Binary relational constraints over variable or constant operands.

use crate::{
    error::Fail,
    solver::{
        constraint::Operand,
        domain::IntDomain,
        store::{PropCtx, Store, VarId},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
}

impl RelOp {
    pub fn negated(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Le => RelOp::Gt,
            RelOp::Lt => RelOp::Ge,
            RelOp::Ge => RelOp::Lt,
            RelOp::Gt => RelOp::Le,
        }
    }

    /// The operator satisfying `a op b == b op.swapped() a`.
    pub fn swapped(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Eq,
            RelOp::Ne => RelOp::Ne,
            RelOp::Le => RelOp::Ge,
            RelOp::Lt => RelOp::Gt,
            RelOp::Ge => RelOp::Le,
            RelOp::Gt => RelOp::Lt,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Eq => "==",
            RelOp::Ne => "!=",
            RelOp::Le => "<=",
            RelOp::Lt => "<",
            RelOp::Ge => ">=",
            RelOp::Gt => ">",
        }
    }

    pub fn holds(self, a: i64, b: i64) -> bool {
        match self {
            RelOp::Eq => a == b,
            RelOp::Ne => a != b,
            RelOp::Le => a <= b,
            RelOp::Lt => a < b,
            RelOp::Ge => a >= b,
            RelOp::Gt => a > b,
        }
    }
}

/// A read-only view of one relational side, enough for entailment checks.
enum Side<'a> {
    Dom(&'a IntDomain),
    Const(i64),
}

impl Side<'_> {
    fn min(&self) -> i64 {
        match self {
            Side::Dom(d) => d.min().unwrap_or(i64::MAX),
            Side::Const(c) => *c,
        }
    }

    fn max(&self) -> i64 {
        match self {
            Side::Dom(d) => d.max().unwrap_or(i64::MIN),
            Side::Const(c) => *c,
        }
    }

    fn intersects(&self, other: &Side) -> bool {
        match (self, other) {
            (Side::Dom(a), Side::Dom(b)) => !a.intersection(b).is_empty(),
            (Side::Dom(d), Side::Const(c)) | (Side::Const(c), Side::Dom(d)) => d.contains(*c),
            (Side::Const(a), Side::Const(b)) => a == b,
        }
    }

    fn singleton(&self) -> Option<i64> {
        match self {
            Side::Dom(d) => d.singleton_value(),
            Side::Const(c) => Some(*c),
        }
    }
}

/// A binary relation `x op y`, the reifiable building block of predicate
/// formulas.
#[derive(Debug, Clone)]
pub struct Rel {
    pub x: Operand,
    pub op: RelOp,
    pub y: Operand,
}

impl Rel {
    pub fn new(x: Operand, op: RelOp, y: Operand) -> Self {
        Self { x, op, y }
    }

    pub fn negated(&self) -> Rel {
        Rel::new(self.x, self.op.negated(), self.y)
    }

    pub fn variables(&self, out: &mut Vec<VarId>) {
        for op in [self.x, self.y] {
            if let Operand::Var(v) = op {
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
    }

    fn truth_of(x: Side, op: RelOp, y: Side) -> Option<bool> {
        match op {
            RelOp::Eq => {
                if let (Some(a), Some(b)) = (x.singleton(), y.singleton()) {
                    Some(a == b)
                } else if !x.intersects(&y) {
                    Some(false)
                } else {
                    None
                }
            }
            RelOp::Ne => Self::truth_of(x, RelOp::Eq, y).map(|b| !b),
            RelOp::Le => {
                if x.max() <= y.min() {
                    Some(true)
                } else if x.min() > y.max() {
                    Some(false)
                } else {
                    None
                }
            }
            RelOp::Lt => {
                if x.max() < y.min() {
                    Some(true)
                } else if x.min() >= y.max() {
                    Some(false)
                } else {
                    None
                }
            }
            RelOp::Ge => Self::truth_of(y, RelOp::Le, x),
            RelOp::Gt => Self::truth_of(y, RelOp::Lt, x),
        }
    }

    /// Three-valued entailment against the current domains: `Some(true)` if
    /// the relation necessarily holds, `Some(false)` if it cannot hold,
    /// `None` if undetermined.
    pub fn truth(&self, ctx: &PropCtx) -> Option<bool> {
        let sx = match self.x {
            Operand::Var(v) => Side::Dom(ctx.domain(v)),
            Operand::Const(c) => Side::Const(c),
        };
        let sy = match self.y {
            Operand::Var(v) => Side::Dom(ctx.domain(v)),
            Operand::Const(c) => Side::Const(c),
        };
        Self::truth_of(sx, self.op, sy)
    }

    /// Entailment against a store's current (baseline) domains; used by the
    /// clone protocol's trivial-truth simplification.
    pub fn truth_in(&self, store: &Store) -> Option<bool> {
        let sx = match self.x {
            Operand::Var(v) => Side::Dom(store.domain(v)),
            Operand::Const(c) => Side::Const(c),
        };
        let sy = match self.y {
            Operand::Var(v) => Side::Dom(store.domain(v)),
            Operand::Const(c) => Side::Const(c),
        };
        Self::truth_of(sx, self.op, sy)
    }

    /// Narrows domains so the relation holds.
    pub fn enforce(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let (x, y) = (self.x, self.y);
        match self.op {
            RelOp::Eq => match (x, y) {
                (Operand::Var(a), Operand::Var(b)) => {
                    let db = ctx.domain(b).clone();
                    ctx.restrict(a, &db)?;
                    let da = ctx.domain(a).clone();
                    ctx.restrict(b, &da)
                }
                (Operand::Var(a), Operand::Const(c)) | (Operand::Const(c), Operand::Var(a)) => {
                    ctx.assign(a, c)
                }
                (Operand::Const(a), Operand::Const(b)) => {
                    if a == b {
                        Ok(())
                    } else {
                        Err(Fail)
                    }
                }
            },
            RelOp::Ne => {
                if let Some(b) = y.value(ctx) {
                    x.remove(ctx, b)?;
                }
                if let Some(a) = x.value(ctx) {
                    y.remove(ctx, a)?;
                }
                Ok(())
            }
            RelOp::Le => {
                x.tighten(ctx, i64::MIN, y.max(ctx))?;
                let lo = x.min(ctx);
                y.tighten(ctx, lo, i64::MAX)
            }
            RelOp::Lt => {
                x.tighten(ctx, i64::MIN, y.max(ctx).saturating_sub(1))?;
                let lo = x.min(ctx).saturating_add(1);
                y.tighten(ctx, lo, i64::MAX)
            }
            RelOp::Ge => Rel::new(y, RelOp::Le, x).enforce(ctx),
            RelOp::Gt => Rel::new(y, RelOp::Lt, x).enforce(ctx),
        }
    }

    /// Narrows domains so the relation cannot hold.
    pub fn enforce_not(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        self.negated().enforce(ctx)
    }

    /// Re-expresses the relation over the target store's variables.
    pub fn clone_into(&self, source: &Store, target: &mut Store) -> Rel {
        Rel::new(
            self.x.clone_into(source, target),
            self.op,
            self.y.clone_into(source, target),
        )
    }

    pub fn describe(&self) -> String {
        let fmt = |op: Operand| match op {
            Operand::Var(v) => format!("?{}", v),
            Operand::Const(c) => c.to_string(),
        };
        format!("{} {} {}", fmt(self.x), self.op.symbol(), fmt(self.y))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::solver::store::Store;

    fn store_xy() -> (Store, VarId, VarId) {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 5));
        let y = store.new_variable("y", IntDomain::bounds(3, 8));
        (store, x, y)
    }

    #[test]
    fn le_tightens_both_bounds() {
        let (mut store, x, y) = store_xy();
        let rel = Rel::new(Operand::Var(y), RelOp::Le, Operand::Var(x));
        store.with_ctx_for_tests(|ctx| rel.enforce(ctx)).unwrap();
        assert_eq!(store.domain(y).max(), Some(5));
        assert_eq!(store.domain(x).min(), Some(3));
    }

    #[test]
    fn eq_intersects_domains() {
        let (mut store, x, y) = store_xy();
        let rel = Rel::new(Operand::Var(x), RelOp::Eq, Operand::Var(y));
        store.with_ctx_for_tests(|ctx| rel.enforce(ctx)).unwrap();
        assert_eq!(store.domain(x).values(), vec![3, 4, 5]);
        assert_eq!(store.domain(y).values(), vec![3, 4, 5]);
    }

    #[test]
    fn truth_is_three_valued() {
        let (store, x, y) = store_xy();
        let lt = Rel::new(Operand::Var(x), RelOp::Lt, Operand::Const(6));
        assert_eq!(lt.truth_in(&store), Some(true));
        let gt = Rel::new(Operand::Var(x), RelOp::Gt, Operand::Const(10));
        assert_eq!(gt.truth_in(&store), Some(false));
        let eq = Rel::new(Operand::Var(x), RelOp::Eq, Operand::Var(y));
        assert_eq!(eq.truth_in(&store), None);
        let ne = Rel::new(Operand::Var(x), RelOp::Ne, Operand::Const(9));
        assert_eq!(ne.truth_in(&store), Some(true));
    }
}
