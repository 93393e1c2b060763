//! The weighted-sum constraint `Σ coef·term <op> rhs`.

use crate::{
    error::Fail,
    solver::{
        constraint::{scope_of, ConstraintDescriptor, Operand, Propagator},
        constraints::relation::RelOp,
        store::{PropCtx, Store, VarId},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinOp {
    Eq,
    Ne,
    Le,
}

/// A linear constraint over weighted operands. All six relational operators
/// are accepted; `<`, `>=` and `>` are normalized away at construction.
#[derive(Debug)]
pub struct LinearInt {
    terms: Vec<(i64, Operand)>,
    op: LinOp,
    rhs: i64,
    vars: Vec<VarId>,
}

impl LinearInt {
    pub fn new(terms: Vec<(i64, Operand)>, op: RelOp, rhs: i64) -> Self {
        let (terms, op, rhs) = match op {
            RelOp::Eq => (terms, LinOp::Eq, rhs),
            RelOp::Ne => (terms, LinOp::Ne, rhs),
            RelOp::Le => (terms, LinOp::Le, rhs),
            RelOp::Lt => (terms, LinOp::Le, rhs.saturating_sub(1)),
            RelOp::Ge => (Self::negate(terms), LinOp::Le, rhs.saturating_neg()),
            RelOp::Gt => (
                Self::negate(terms),
                LinOp::Le,
                rhs.saturating_neg().saturating_sub(1),
            ),
        };
        let operands: Vec<Operand> = terms.iter().map(|(_, o)| *o).collect();
        let vars = scope_of(&operands);
        Self { terms, op, rhs, vars }
    }

    fn negate(terms: Vec<(i64, Operand)>) -> Vec<(i64, Operand)> {
        terms
            .into_iter()
            .map(|(c, o)| (c.saturating_neg(), o))
            .collect()
    }

    /// The bounds of one weighted term.
    fn term_bounds(coef: i64, op: Operand, ctx: &PropCtx) -> (i64, i64) {
        let a = coef.saturating_mul(op.min(ctx));
        let b = coef.saturating_mul(op.max(ctx));
        (a.min(b), a.max(b))
    }

    /// Variable bounds such that `coef * var` stays within `[lo, hi]`. The
    /// unit coefficients bypass division, which also avoids `MIN / -1`.
    fn div_bounds(coef: i64, lo: i64, hi: i64) -> (i64, i64) {
        match coef {
            1 => (lo, hi),
            -1 => (hi.saturating_neg(), lo.saturating_neg()),
            c if c > 0 => (ceil_div(lo, c), floor_div(hi, c)),
            c => (ceil_div(hi, c), floor_div(lo, c)),
        }
    }
}

fn floor_div(a: i64, b: i64) -> i64 {
    let (q, r) = (a / b, a % b);
    if r != 0 && ((r < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn ceil_div(a: i64, b: i64) -> i64 {
    let (q, r) = (a / b, a % b);
    if r != 0 && ((r < 0) == (b < 0)) {
        q + 1
    } else {
        q
    }
}

impl Propagator for LinearInt {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        let terms = self
            .terms
            .iter()
            .map(|(c, o)| match o {
                Operand::Var(v) => format!("{}*?{}", c, v),
                Operand::Const(k) => format!("{}*{}", c, k),
            })
            .collect::<Vec<_>>()
            .join(" + ");
        let sym = match self.op {
            LinOp::Eq => "==",
            LinOp::Ne => "!=",
            LinOp::Le => "<=",
        };
        ConstraintDescriptor {
            name: "LinearInt".to_owned(),
            description: format!("{} {} {}", terms, sym, self.rhs),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let bounds: Vec<(i64, i64)> = self
            .terms
            .iter()
            .map(|&(c, o)| Self::term_bounds(c, o, ctx))
            .collect();
        let sum_lo: i64 = bounds.iter().map(|(l, _)| l).sum();
        let sum_hi: i64 = bounds.iter().map(|(_, h)| h).sum();

        match self.op {
            LinOp::Le => {
                if sum_lo > self.rhs {
                    return Err(Fail);
                }
                for (i, &(coef, op)) in self.terms.iter().enumerate() {
                    if coef == 0 {
                        continue;
                    }
                    if let Operand::Var(v) = op {
                        let others_lo = sum_lo - bounds[i].0;
                        let term_hi = self.rhs.saturating_sub(others_lo);
                        if coef > 0 {
                            let (_, hi) = Self::div_bounds(coef, i64::MIN, term_hi);
                            ctx.tighten(v, i64::MIN, hi)?;
                        } else {
                            let (lo, _) = Self::div_bounds(coef, i64::MIN, term_hi);
                            ctx.tighten(v, lo, i64::MAX)?;
                        }
                    }
                }
                Ok(())
            }
            LinOp::Eq => {
                if sum_lo > self.rhs || sum_hi < self.rhs {
                    return Err(Fail);
                }
                for (i, &(coef, op)) in self.terms.iter().enumerate() {
                    if coef == 0 {
                        continue;
                    }
                    if let Operand::Var(v) = op {
                        let others_lo = sum_lo - bounds[i].0;
                        let others_hi = sum_hi - bounds[i].1;
                        let term_lo = self.rhs.saturating_sub(others_hi);
                        let term_hi = self.rhs.saturating_sub(others_lo);
                        let (lo, hi) = Self::div_bounds(coef, term_lo, term_hi);
                        ctx.tighten(v, lo, hi)?;
                    }
                }
                Ok(())
            }
            LinOp::Ne => {
                // Only meaningful once at most one term is undecided.
                let mut open: Option<(i64, VarId)> = None;
                let mut ground_sum: i64 = 0;
                for &(coef, op) in &self.terms {
                    match op.value(ctx) {
                        Some(val) => ground_sum = ground_sum.saturating_add(coef.saturating_mul(val)),
                        None => {
                            let v = match op {
                                Operand::Var(v) => v,
                                Operand::Const(_) => unreachable!("constants are always grounded"),
                            };
                            if open.is_some() {
                                return Ok(());
                            }
                            open = Some((coef, v));
                        }
                    }
                }
                match open {
                    None => {
                        if ground_sum == self.rhs {
                            Err(Fail)
                        } else {
                            Ok(())
                        }
                    }
                    Some((coef, v)) => {
                        let residual = self.rhs.saturating_sub(ground_sum);
                        if coef != 0 && residual % coef == 0 {
                            ctx.remove(v, residual / coef)?;
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let terms: Vec<(i64, Operand)> = self
            .terms
            .iter()
            .map(|&(c, o)| (c, o.clone_into(source, target)))
            .collect();

        let all_ground: Option<i64> = terms
            .iter()
            .map(|&(c, o)| {
                let v = match o {
                    Operand::Const(k) => Some(k),
                    Operand::Var(v) => target.domain(v).singleton_value(),
                }?;
                Some(c.saturating_mul(v))
            })
            .sum::<Option<i64>>();

        if let Some(sum) = all_ground {
            let sat = match self.op {
                LinOp::Eq => sum == self.rhs,
                LinOp::Ne => sum != self.rhs,
                LinOp::Le => sum <= self.rhs,
            };
            return if sat { Ok(None) } else { Err(Fail) };
        }

        let op = match self.op {
            LinOp::Eq => RelOp::Eq,
            LinOp::Ne => RelOp::Ne,
            LinOp::Le => RelOp::Le,
        };
        Ok(Some(Box::new(LinearInt::new(terms, op, self.rhs))))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::solver::domain::IntDomain;

    #[test]
    fn eq_tightens_terms_to_residuals() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 9));
        let y = store.new_variable("y", IntDomain::bounds(0, 9));
        // 2x + y == 4
        let c = LinearInt::new(
            vec![(2, Operand::Var(x)), (1, Operand::Var(y))],
            RelOp::Eq,
            4,
        );
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(x).max(), Some(2));
        assert_eq!(store.domain(y).max(), Some(4));
    }

    #[test]
    fn le_prunes_upper_bounds() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 9));
        let c = LinearInt::new(vec![(3, Operand::Var(x))], RelOp::Le, 7);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(x).max(), Some(2));
    }

    #[test]
    fn gt_is_normalized_to_le() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 9));
        let c = LinearInt::new(vec![(1, Operand::Var(x))], RelOp::Gt, 6);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(x).min(), Some(7));
    }

    #[test]
    fn ne_removes_the_last_open_value() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 3));
        let c = LinearInt::new(vec![(1, Operand::Var(x))], RelOp::Ne, 2);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(x).values(), vec![0, 1, 3]);
    }
}
