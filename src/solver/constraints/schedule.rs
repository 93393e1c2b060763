//! Scheduling and packing checks: cumulative and diff2.
//!
//! Both propagators defer until their variables are grounded and then check
//! the assignment, the same contract as the tuple table: propagation is
//! deliberately lazy and is revisited by the fixpoint as search grounds the
//! scope.

use std::collections::HashMap;

use crate::{
    error::Fail,
    solver::{
        constraint::{scope_of, ConstraintDescriptor, Operand, Propagator},
        store::{PropCtx, Store, VarId},
    },
};

/// A cumulative resource constraint over tasks `(origin, duration, height)`
/// and a resource limit. With `tight`, the peak usage must equal the limit.
#[derive(Debug)]
pub struct Cumulative {
    origins: Vec<Operand>,
    durations: Vec<Operand>,
    heights: Vec<Operand>,
    limit: Operand,
    tight: bool,
    vars: Vec<VarId>,
}

impl Cumulative {
    pub fn new(
        origins: Vec<Operand>,
        durations: Vec<Operand>,
        heights: Vec<Operand>,
        limit: Operand,
        tight: bool,
    ) -> Self {
        let mut all = origins.clone();
        all.extend_from_slice(&durations);
        all.extend_from_slice(&heights);
        all.push(limit);
        let vars = scope_of(&all);
        Self { origins, durations, heights, limit, tight, vars }
    }
}

impl Propagator for Cumulative {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "Cumulative".to_owned(),
            description: format!(
                "cumulative over {} tasks, {} limit",
                self.origins.len(),
                if self.tight { "tight" } else { "loose" }
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let mut profile: HashMap<i64, i64> = HashMap::new();
        for i in 0..self.origins.len() {
            let (Some(origin), Some(duration), Some(height)) = (
                self.origins[i].value(ctx),
                self.durations[i].value(ctx),
                self.heights[i].value(ctx),
            ) else {
                return Ok(()); // checked once everything is grounded
            };
            for t in origin..origin.saturating_add(duration) {
                *profile.entry(t).or_insert(0) += height;
            }
        }
        let Some(limit) = self.limit.value(ctx) else {
            return Ok(());
        };

        let peak = profile.values().copied().max().unwrap_or(0);
        if peak > limit || (self.tight && peak != limit) {
            return Err(Fail);
        }
        Ok(())
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let map = |ops: &[Operand], target: &mut Store| -> Vec<Operand> {
            ops.iter().map(|o| o.clone_into(source, target)).collect()
        };
        let origins = map(&self.origins, target);
        let durations = map(&self.durations, target);
        let heights = map(&self.heights, target);
        let limit = self.limit.clone_into(source, target);
        Ok(Some(Box::new(Cumulative::new(
            origins, durations, heights, limit, self.tight,
        ))))
    }
}

/// Pairwise non-overlap of rectangles `(x, y, width, height)`.
#[derive(Debug)]
pub struct Diff2 {
    rects: Vec<[Operand; 4]>,
    vars: Vec<VarId>,
}

impl Diff2 {
    pub fn new(rects: Vec<[Operand; 4]>) -> Self {
        let all: Vec<Operand> = rects.iter().flatten().copied().collect();
        let vars = scope_of(&all);
        Self { rects, vars }
    }
}

impl Propagator for Diff2 {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "Diff2".to_owned(),
            description: format!("diff2 over {} rectangles", self.rects.len()),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        let mut grounded = Vec::with_capacity(self.rects.len());
        for rect in &self.rects {
            let mut values = [0i64; 4];
            for (slot, op) in values.iter_mut().zip(rect.iter()) {
                match op.value(ctx) {
                    Some(v) => *slot = v,
                    None => return Ok(()),
                }
            }
            grounded.push(values);
        }

        for (i, a) in grounded.iter().enumerate() {
            for b in grounded.iter().skip(i + 1) {
                let disjoint = a[0] + a[2] <= b[0]
                    || b[0] + b[2] <= a[0]
                    || a[1] + a[3] <= b[1]
                    || b[1] + b[3] <= a[1];
                if !disjoint {
                    return Err(Fail);
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
        let rects: Vec<[Operand; 4]> = self
            .rects
            .iter()
            .map(|r| {
                [
                    r[0].clone_into(source, target),
                    r[1].clone_into(source, target),
                    r[2].clone_into(source, target),
                    r[3].clone_into(source, target),
                ]
            })
            .collect();
        Ok(Some(Box::new(Diff2::new(rects))))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::solver::domain::IntDomain;

    #[test]
    fn cumulative_rejects_an_overloaded_profile() {
        let mut store = Store::new();
        let s1 = store.new_variable("s1", IntDomain::singleton(0));
        let s2 = store.new_variable("s2", IntDomain::singleton(1));
        let c = Cumulative::new(
            vec![Operand::Var(s1), Operand::Var(s2)],
            vec![Operand::Const(3), Operand::Const(3)],
            vec![Operand::Const(2), Operand::Const(2)],
            Operand::Const(3),
            false,
        );
        let result = store.with_ctx_for_tests(|ctx| c.propagate(ctx));
        assert_eq!(result, Err(Fail));
    }

    #[test]
    fn cumulative_defers_until_grounded() {
        let mut store = Store::new();
        let s1 = store.new_variable("s1", IntDomain::bounds(0, 5));
        let c = Cumulative::new(
            vec![Operand::Var(s1)],
            vec![Operand::Const(3)],
            vec![Operand::Const(2)],
            Operand::Const(1),
            false,
        );
        assert_eq!(store.with_ctx_for_tests(|ctx| c.propagate(ctx)), Ok(()));
    }

    #[test]
    fn diff2_rejects_overlapping_rectangles() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::singleton(0));
        let c = Diff2::new(vec![
            [Operand::Var(x), Operand::Const(0), Operand::Const(2), Operand::Const(2)],
            [Operand::Const(1), Operand::Const(1), Operand::Const(2), Operand::Const(2)],
        ]);
        assert_eq!(store.with_ctx_for_tests(|ctx| c.propagate(ctx)), Err(Fail));
    }

    #[test]
    fn diff2_accepts_disjoint_rectangles() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::singleton(0));
        let c = Diff2::new(vec![
            [Operand::Var(x), Operand::Const(0), Operand::Const(2), Operand::Const(2)],
            [Operand::Const(2), Operand::Const(0), Operand::Const(2), Operand::Const(2)],
        ]);
        assert_eq!(store.with_ctx_for_tests(|ctx| c.propagate(ctx)), Ok(()));
    }
}
