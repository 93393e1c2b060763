//! The element global constraint: `list[index] == value`, with a 1-based
//! index.

use crate::{
    error::Fail,
    solver::{
        constraint::{scope_of, ConstraintDescriptor, Operand, Propagator},
        constraints::relation::{Rel, RelOp},
        store::{PropCtx, Store, VarId},
    },
};

#[derive(Debug)]
pub struct Element {
    index: Operand,
    list: Vec<Operand>,
    value: Operand,
    vars: Vec<VarId>,
}

impl Element {
    pub fn new(index: Operand, list: Vec<Operand>, value: Operand) -> Self {
        let mut all = vec![index, value];
        all.extend_from_slice(&list);
        let vars = scope_of(&all);
        Self { index, list, value, vars }
    }

    fn entry_feasible(&self, i: usize, ctx: &PropCtx) -> bool {
        let entry = self.list[i];
        let lo = entry.min(ctx).max(self.value.min(ctx));
        let hi = entry.max(ctx).min(self.value.max(ctx));
        lo <= hi
    }
}

impl Propagator for Element {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        let fmt = |op: &Operand| match op {
            Operand::Var(v) => format!("?{}", v),
            Operand::Const(c) => c.to_string(),
        };
        ConstraintDescriptor {
            name: "Element".to_owned(),
            description: format!(
                "[{}][{}] == {}",
                self.list.iter().map(fmt).collect::<Vec<_>>().join(", "),
                fmt(&self.index),
                fmt(&self.value)
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        self.index.tighten(ctx, 1, self.list.len() as i64)?;

        if let Some(i) = self.index.value(ctx) {
            let entry = self.list[(i - 1) as usize];
            return Rel::new(entry, RelOp::Eq, self.value).enforce(ctx);
        }

        // Remove indices whose entry cannot meet the value, then bound the
        // value by the surviving entries.
        let (mut lo, mut hi) = (i64::MAX, i64::MIN);
        for i in self.index.min(ctx)..=self.index.max(ctx) {
            let pos = (i - 1) as usize;
            if pos >= self.list.len() {
                break;
            }
            let in_dom = match self.index {
                Operand::Var(v) => ctx.domain(v).contains(i),
                Operand::Const(c) => c == i,
            };
            if !in_dom {
                continue;
            }
            if self.entry_feasible(pos, ctx) {
                lo = lo.min(self.list[pos].min(ctx));
                hi = hi.max(self.list[pos].max(ctx));
            } else {
                self.index.remove(ctx, i)?;
            }
        }
        if lo > hi {
            return Err(Fail);
        }
        self.value.tighten(ctx, lo, hi)
    }

    fn clone_into(
        &self,
        source: &Store,
        target: &mut Store,
    ) -> Result<Option<Box<dyn Propagator>>, Fail> {
        let index = self.index.clone_into(source, target);
        let list: Vec<Operand> = self
            .list
            .iter()
            .map(|o| o.clone_into(source, target))
            .collect();
        let value = self.value.clone_into(source, target);
        Ok(Some(Box::new(Element::new(index, list, value))))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::solver::domain::IntDomain;

    #[test]
    fn grounded_index_links_entry_and_value() {
        let mut store = Store::new();
        let i = store.new_variable("i", IntDomain::singleton(2));
        let v = store.new_variable("v", IntDomain::bounds(0, 100));
        let c = Element::new(
            Operand::Var(i),
            vec![Operand::Const(10), Operand::Const(20), Operand::Const(30)],
            Operand::Var(v),
        );
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(v).singleton_value(), Some(20));
    }

    #[test]
    fn infeasible_entries_are_pruned_from_the_index() {
        let mut store = Store::new();
        let i = store.new_variable("i", IntDomain::bounds(1, 3));
        let v = store.new_variable("v", IntDomain::bounds(15, 25));
        let c = Element::new(
            Operand::Var(i),
            vec![Operand::Const(10), Operand::Const(20), Operand::Const(30)],
            Operand::Var(v),
        );
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(i).singleton_value(), Some(2));
    }
}
