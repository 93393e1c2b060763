//! Arithmetic equality propagators: `x + y = z`, `x * y = z`, `x / y = z`,
//! `x mod y = z`, `x ^ y = z`, `|x| = z`, `|x - y| = z`, `min`/`max`.
//!
//! Operands may be variables or constants, so each propagator covers all its
//! specialized constant forms. Bounds reasoning narrows where it is cheap
//! and sound; the remaining cases are checked once the operands are
//! grounded, which the propagation fixpoint guarantees to revisit.

use crate::{
    error::Fail,
    solver::{
        constraint::{scope_of, ConstraintDescriptor, Operand, Propagator},
        domain::IntDomain,
        store::{PropCtx, Store, VarId},
    },
};

fn describe(op: Operand) -> String {
    match op {
        Operand::Var(v) => format!("?{}", v),
        Operand::Const(c) => c.to_string(),
    }
}

fn value_in(op: Operand, store: &Store) -> Option<i64> {
    match op {
        Operand::Const(c) => Some(c),
        Operand::Var(v) => store.domain(v).singleton_value(),
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

/// Saturating integer power with truncating semantics for negative
/// exponents: `b^e` is 0 for `|b| > 1, e < 0`, and `0^e` is undefined for
/// `e < 0`.
fn ipow(base: i64, exp: i64) -> Result<i64, Fail> {
    if exp < 0 {
        return match base {
            0 => Err(Fail),
            1 => Ok(1),
            -1 => Ok(if exp % 2 == 0 { 1 } else { -1 }),
            _ => Ok(0),
        };
    }
    let mut result: i64 = 1;
    for _ in 0..exp {
        result = result.saturating_mul(base);
        if result == 0 || result == i64::MAX || result == i64::MIN {
            break;
        }
    }
    Ok(result)
}

/// The min and max over the four corner products of two intervals.
fn corner_products(xl: i64, xh: i64, yl: i64, yh: i64) -> (i64, i64) {
    let corners = [
        xl.saturating_mul(yl),
        xl.saturating_mul(yh),
        xh.saturating_mul(yl),
        xh.saturating_mul(yh),
    ];
    (
        *corners.iter().min().expect("corners is non-empty"),
        *corners.iter().max().expect("corners is non-empty"),
    )
}

macro_rules! ternary_propagator {
    ($name:ident) => {
        #[derive(Debug)]
        pub struct $name {
            x: Operand,
            y: Operand,
            z: Operand,
            vars: Vec<VarId>,
        }

        impl $name {
            pub fn new(x: Operand, y: Operand, z: Operand) -> Self {
                let vars = scope_of(&[x, y, z]);
                Self { x, y, z, vars }
            }
        }
    };
}

ternary_propagator!(AddEq);
ternary_propagator!(MulEq);
ternary_propagator!(DivEq);
ternary_propagator!(ModEq);
ternary_propagator!(PowEq);
ternary_propagator!(DistanceEq);

impl Propagator for AddEq {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "AddEq".to_owned(),
            description: format!(
                "{} + {} == {}",
                describe(self.x),
                describe(self.y),
                describe(self.z)
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let (x, y, z) = (self.x, self.y, self.z);
        z.tighten(
            ctx,
            x.min(ctx).saturating_add(y.min(ctx)),
            x.max(ctx).saturating_add(y.max(ctx)),
        )?;
        x.tighten(
            ctx,
            z.min(ctx).saturating_sub(y.max(ctx)),
            z.max(ctx).saturating_sub(y.min(ctx)),
        )?;
        y.tighten(
            ctx,
            z.min(ctx).saturating_sub(x.max(ctx)),
            z.max(ctx).saturating_sub(x.min(ctx)),
        )
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let (x, y, z) = (
            self.x.clone_into(source, target),
            self.y.clone_into(source, target),
            self.z.clone_into(source, target),
        );
        if let (Some(a), Some(b), Some(c)) =
            (value_in(x, target), value_in(y, target), value_in(z, target))
        {
            return if a.saturating_add(b) == c {
                Ok(None)
            } else {
                Err(Fail)
            };
        }
        Ok(Some(Box::new(AddEq::new(x, y, z))))
    }
}

impl Propagator for MulEq {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "MulEq".to_owned(),
            description: format!(
                "{} * {} == {}",
                describe(self.x),
                describe(self.y),
                describe(self.z)
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let (x, y, z) = (self.x, self.y, self.z);
        let (lo, hi) = corner_products(x.min(ctx), x.max(ctx), y.min(ctx), y.max(ctx));
        z.tighten(ctx, lo, hi)?;

        // Invert onto one factor once the other is grounded.
        for (factor, other) in [(x, y), (y, x)] {
            if let Some(c) = other.value(ctx) {
                if c == 0 {
                    z.tighten(ctx, 0, 0)?;
                } else {
                    let (zl, zh) = (z.min(ctx), z.max(ctx));
                    let (lo, hi) = if c > 0 {
                        (ceil_div(zl, c), floor_div(zh, c))
                    } else {
                        (ceil_div(zh, c), floor_div(zl, c))
                    };
                    factor.tighten(ctx, lo, hi)?;
                }
            }
        }
        Ok(())
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let (x, y, z) = (
            self.x.clone_into(source, target),
            self.y.clone_into(source, target),
            self.z.clone_into(source, target),
        );
        if let (Some(a), Some(b), Some(c)) =
            (value_in(x, target), value_in(y, target), value_in(z, target))
        {
            return if a.saturating_mul(b) == c {
                Ok(None)
            } else {
                Err(Fail)
            };
        }
        Ok(Some(Box::new(MulEq::new(x, y, z))))
    }
}

impl Propagator for DivEq {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "DivEq".to_owned(),
            description: format!(
                "{} / {} == {}",
                describe(self.x),
                describe(self.y),
                describe(self.z)
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let (x, y, z) = (self.x, self.y, self.z);

        // The divisor can never be zero.
        y.remove(ctx, 0)?;

        if let Some(c) = y.value(ctx) {
            let (xl, xh) = (x.min(ctx), x.max(ctx));
            if c > 0 {
                z.tighten(ctx, xl / c, xh / c)?;
            } else {
                z.tighten(ctx, xh / c, xl / c)?;
            }
            // x must lie within |c| - 1 of a multiple of c matching z.
            let (zl, zh) = (z.min(ctx), z.max(ctx));
            let pad = c.abs().saturating_sub(1);
            let p1 = c.saturating_mul(zl);
            let p2 = c.saturating_mul(zh);
            x.tighten(
                ctx,
                p1.min(p2).saturating_sub(pad),
                p1.max(p2).saturating_add(pad),
            )?;
        }
        Ok(())
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let (x, y, z) = (
            self.x.clone_into(source, target),
            self.y.clone_into(source, target),
            self.z.clone_into(source, target),
        );
        if let (Some(a), Some(b), Some(c)) =
            (value_in(x, target), value_in(y, target), value_in(z, target))
        {
            return if b != 0 && a / b == c { Ok(None) } else { Err(Fail) };
        }
        Ok(Some(Box::new(DivEq::new(x, y, z))))
    }
}

impl Propagator for ModEq {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "ModEq".to_owned(),
            description: format!(
                "{} mod {} == {}",
                describe(self.x),
                describe(self.y),
                describe(self.z)
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let (x, y, z) = (self.x, self.y, self.z);

        y.remove(ctx, 0)?;

        // |z| < max(|y|), and the sign of a truncated remainder follows x.
        let m = y.min(ctx).abs().max(y.max(ctx).abs());
        let (mut lo, mut hi) = (-(m - 1), m - 1);
        if x.min(ctx) >= 0 {
            lo = 0;
        }
        if x.max(ctx) <= 0 {
            hi = 0;
        }
        z.tighten(ctx, lo, hi)?;

        if let (Some(a), Some(b)) = (x.value(ctx), y.value(ctx)) {
            z.tighten(ctx, a % b, a % b)?;
        }
        Ok(())
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let (x, y, z) = (
            self.x.clone_into(source, target),
            self.y.clone_into(source, target),
            self.z.clone_into(source, target),
        );
        if let (Some(a), Some(b), Some(c)) =
            (value_in(x, target), value_in(y, target), value_in(z, target))
        {
            return if b != 0 && a % b == c { Ok(None) } else { Err(Fail) };
        }
        Ok(Some(Box::new(ModEq::new(x, y, z))))
    }
}

impl Propagator for PowEq {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "PowEq".to_owned(),
            description: format!(
                "{} ^ {} == {}",
                describe(self.x),
                describe(self.y),
                describe(self.z)
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let (x, y, z) = (self.x, self.y, self.z);

        if x.min(ctx) >= 0 && y.min(ctx) >= 0 {
            let lo = ipow(x.min(ctx), y.min(ctx))?;
            let hi = ipow(x.max(ctx), y.max(ctx))?;
            z.tighten(ctx, lo.min(hi), lo.max(hi))?;
        }

        if let (Some(a), Some(b)) = (x.value(ctx), y.value(ctx)) {
            let r = ipow(a, b)?;
            z.tighten(ctx, r, r)?;
        }
        Ok(())
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let (x, y, z) = (
            self.x.clone_into(source, target),
            self.y.clone_into(source, target),
            self.z.clone_into(source, target),
        );
        if let (Some(a), Some(b), Some(c)) =
            (value_in(x, target), value_in(y, target), value_in(z, target))
        {
            return if ipow(a, b)? == c { Ok(None) } else { Err(Fail) };
        }
        Ok(Some(Box::new(PowEq::new(x, y, z))))
    }
}

impl Propagator for DistanceEq {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "DistanceEq".to_owned(),
            description: format!(
                "|{} - {}| == {}",
                describe(self.x),
                describe(self.y),
                describe(self.z)
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let (x, y, z) = (self.x, self.y, self.z);
        let (xl, xh) = (x.min(ctx), x.max(ctx));
        let (yl, yh) = (y.min(ctx), y.max(ctx));

        let lo = 0.max(xl.saturating_sub(yh)).max(yl.saturating_sub(xh));
        let hi = xl
            .saturating_sub(yh)
            .abs()
            .max(xh.saturating_sub(yl).abs());
        z.tighten(ctx, lo, hi)?;

        let zh = z.max(ctx);
        x.tighten(ctx, yl.saturating_sub(zh), yh.saturating_add(zh))?;
        let (xl, xh) = (x.min(ctx), x.max(ctx));
        y.tighten(ctx, xl.saturating_sub(zh), xh.saturating_add(zh))?;

        if let (Some(a), Some(b)) = (x.value(ctx), y.value(ctx)) {
            z.tighten(ctx, (a - b).abs(), (a - b).abs())?;
        }
        Ok(())
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let (x, y, z) = (
            self.x.clone_into(source, target),
            self.y.clone_into(source, target),
            self.z.clone_into(source, target),
        );
        if let (Some(a), Some(b), Some(c)) =
            (value_in(x, target), value_in(y, target), value_in(z, target))
        {
            return if (a - b).abs() == c { Ok(None) } else { Err(Fail) };
        }
        Ok(Some(Box::new(DistanceEq::new(x, y, z))))
    }
}

/// `|x| = z`.
#[derive(Debug)]
pub struct AbsEq {
    x: Operand,
    z: Operand,
    vars: Vec<VarId>,
}

impl AbsEq {
    pub fn new(x: Operand, z: Operand) -> Self {
        let vars = scope_of(&[x, z]);
        Self { x, z, vars }
    }
}

impl Propagator for AbsEq {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "AbsEq".to_owned(),
            description: format!("|{}| == {}", describe(self.x), describe(self.z)),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let (x, z) = (self.x, self.z);
        let (xl, xh) = (x.min(ctx), x.max(ctx));

        let lo = if xl > 0 {
            xl
        } else if xh < 0 {
            -xh
        } else {
            0
        };
        z.tighten(ctx, lo, xl.abs().max(xh.abs()))?;

        let zh = z.max(ctx);
        x.tighten(ctx, zh.saturating_neg(), zh)?;

        if let Some(v) = z.value(ctx) {
            if let Operand::Var(xv) = x {
                ctx.restrict(xv, &IntDomain::from_values([v, -v]))?;
            }
        }
        Ok(())
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let (x, z) = (
            self.x.clone_into(source, target),
            self.z.clone_into(source, target),
        );
        if let (Some(a), Some(c)) = (value_in(x, target), value_in(z, target)) {
            return if a.abs() == c { Ok(None) } else { Err(Fail) };
        }
        Ok(Some(Box::new(AbsEq::new(x, z))))
    }
}

macro_rules! extremum_propagator {
    ($name:ident, $pick:ident, $label:expr, $is_min:expr) => {
        /// The extremum of a list of operands.
        #[derive(Debug)]
        pub struct $name {
            xs: Vec<Operand>,
            z: Operand,
            vars: Vec<VarId>,
        }

        impl $name {
            pub fn new(xs: Vec<Operand>, z: Operand) -> Self {
                let mut all = xs.clone();
                all.push(z);
                let vars = scope_of(&all);
                Self { xs, z, vars }
            }
        }

        impl Propagator for $name {
            fn variables(&self) -> &[VarId] {
                &self.vars
            }

            fn descriptor(&self) -> ConstraintDescriptor {
                ConstraintDescriptor {
                    name: stringify!($name).to_owned(),
                    description: format!(
                        "{}({}) == {}",
                        $label,
                        self.xs
                            .iter()
                            .map(|o| describe(*o))
                            .collect::<Vec<_>>()
                            .join(", "),
                        describe(self.z)
                    ),
                }
            }

            fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
                let lo = self
                    .xs
                    .iter()
                    .map(|o| o.min(ctx))
                    .$pick()
                    .ok_or(Fail)?;
                let hi = self
                    .xs
                    .iter()
                    .map(|o| o.max(ctx))
                    .$pick()
                    .ok_or(Fail)?;
                self.z.tighten(ctx, lo.min(hi), lo.max(hi))?;

                // Every term lies on the z side of the extremum.
                let (zl, zh) = (self.z.min(ctx), self.z.max(ctx));
                for x in &self.xs {
                    if $is_min {
                        x.tighten(ctx, zl, i64::MAX)?;
                    } else {
                        x.tighten(ctx, i64::MIN, zh)?;
                    }
                }
                Ok(())
            }

            fn clone_into(
                &self,
                source: &Store,
                target: &mut Store,
            ) -> Result<Option<Box<dyn Propagator>>, Fail> {
                let xs: Vec<Operand> = self
                    .xs
                    .iter()
                    .map(|o| o.clone_into(source, target))
                    .collect();
                let z = self.z.clone_into(source, target);
                let vals: Option<Vec<i64>> = xs.iter().map(|o| value_in(*o, target)).collect();
                if let (Some(vals), Some(c)) = (vals, value_in(z, target)) {
                    let ext = vals.into_iter().$pick().ok_or(Fail)?;
                    return if ext == c { Ok(None) } else { Err(Fail) };
                }
                Ok(Some(Box::new($name::new(xs, z))))
            }
        }
    };
}

extremum_propagator!(MinEq, min, "min", true);
extremum_propagator!(MaxEq, max, "max", false);

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::solver::store::Store;

    fn var(store: &mut Store, name: &str, lo: i64, hi: i64) -> Operand {
        Operand::Var(store.new_variable(name, IntDomain::bounds(lo, hi)))
    }

    #[test]
    fn add_eq_narrows_all_three_operands() {
        let mut store = Store::new();
        let x = var(&mut store, "x", 0, 4);
        let y = var(&mut store, "y", 0, 4);
        let z = var(&mut store, "z", 6, 10);
        let c = AddEq::new(x, y, z);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        let xv = x.as_var().expect("x is a variable");
        let zv = z.as_var().expect("z is a variable");
        assert_eq!(store.domain(zv).max(), Some(8));
        assert_eq!(store.domain(xv).min(), Some(2));
    }

    #[test]
    fn mul_eq_inverts_through_a_grounded_factor() {
        let mut store = Store::new();
        let x = var(&mut store, "x", 0, 10);
        let z = var(&mut store, "z", 6, 6);
        let c = MulEq::new(x, Operand::Const(3), z);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        let xv = x.as_var().expect("x is a variable");
        assert_eq!(store.domain(xv).singleton_value(), Some(2));
    }

    #[test]
    fn mul_eq_fails_on_indivisible_product() {
        let mut store = Store::new();
        let x = var(&mut store, "x", 0, 10);
        let z = var(&mut store, "z", 7, 7);
        let c = MulEq::new(x, Operand::Const(3), z);
        let result = store.with_ctx_for_tests(|ctx| c.propagate(ctx));
        assert_eq!(result, Err(Fail));
    }

    #[test]
    fn div_eq_removes_zero_divisor() {
        let mut store = Store::new();
        let x = var(&mut store, "x", 6, 6);
        let y = var(&mut store, "y", -1, 1);
        let z = var(&mut store, "z", -10, 10);
        let c = DivEq::new(x, y, z);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        let yv = y.as_var().expect("y is a variable");
        assert_eq!(store.domain(yv).values(), vec![-1, 1]);
    }

    #[test]
    fn mod_eq_grounds_remainder() {
        let mut store = Store::new();
        let x = var(&mut store, "x", 7, 7);
        let y = var(&mut store, "y", 3, 3);
        let z = var(&mut store, "z", -10, 10);
        let c = ModEq::new(x, y, z);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        let zv = z.as_var().expect("z is a variable");
        assert_eq!(store.domain(zv).singleton_value(), Some(1));
    }

    #[test]
    fn abs_eq_mirrors_bounds() {
        let mut store = Store::new();
        let x = var(&mut store, "x", -7, 3);
        let z = var(&mut store, "z", 0, 100);
        let c = AbsEq::new(x, z);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        let zv = z.as_var().expect("z is a variable");
        assert_eq!(store.domain(zv).max(), Some(7));
        assert_eq!(store.domain(zv).min(), Some(0));
    }

    #[test]
    fn distance_eq_grounds_from_both_sides() {
        let mut store = Store::new();
        let x = var(&mut store, "x", 2, 2);
        let y = var(&mut store, "y", 9, 9);
        let z = var(&mut store, "z", 0, 100);
        let c = DistanceEq::new(x, y, z);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        let zv = z.as_var().expect("z is a variable");
        assert_eq!(store.domain(zv).singleton_value(), Some(7));
    }

    #[test]
    fn min_eq_bounds_the_extremum() {
        let mut store = Store::new();
        let x = var(&mut store, "x", 2, 8);
        let y = var(&mut store, "y", 5, 9);
        let z = var(&mut store, "z", -10, 10);
        let c = MinEq::new(vec![x, y], z);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        let zv = z.as_var().expect("z is a variable");
        assert_eq!(store.domain(zv).min(), Some(2));
        assert_eq!(store.domain(zv).max(), Some(8));
    }

    #[test]
    fn pow_eq_grounds_nonnegative_base() {
        let mut store = Store::new();
        let x = var(&mut store, "x", 2, 2);
        let y = var(&mut store, "y", 5, 5);
        let z = var(&mut store, "z", 0, 100);
        let c = PowEq::new(x, y, z);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        let zv = z.as_var().expect("z is a variable");
        assert_eq!(store.domain(zv).singleton_value(), Some(32));
    }
}
