//! The allDifferent global constraint.

use crate::{
    error::Fail,
    solver::{
        constraint::{ConstraintDescriptor, Propagator},
        store::{PropCtx, Store, VarId},
    },
};

/// Requires all variables in a set to take pairwise distinct values.
///
/// Consistency is achieved by waiting for a variable to become a singleton
/// and pruning its value from the other domains. Stronger matching-based
/// filtering exists, but this simple propagator composes well with the
/// fixpoint loop.
#[derive(Debug)]
pub struct AllDifferent {
    vars: Vec<VarId>,
}

impl AllDifferent {
    pub fn new(vars: Vec<VarId>) -> Self {
        Self { vars }
    }
}

impl Propagator for AllDifferent {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        let vars = self
            .vars
            .iter()
            .map(|v| format!("?{}", v))
            .collect::<Vec<_>>()
            .join(", ");
        ConstraintDescriptor {
            name: "AllDifferent".to_owned(),
            description: format!("allDifferent({})", vars),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        for (i, &v) in self.vars.iter().enumerate() {
            if let Some(value) = ctx.value(v) {
                for (j, &other) in self.vars.iter().enumerate() {
                    if i != j {
                        ctx.remove(other, value)?;
                    }
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
        let vars: Vec<VarId> = self
            .vars
            .iter()
            .map(|&v| target.find_or_clone_from(source, v))
            .collect();

        // Trivially violated if two grounded variables already collide;
        // trivially satisfied once every variable is grounded and distinct.
        let values: Vec<Option<i64>> = vars
            .iter()
            .map(|&v| target.domain(v).singleton_value())
            .collect();
        let mut seen = std::collections::HashSet::new();
        let mut all_ground = true;
        for value in &values {
            match value {
                Some(v) => {
                    if !seen.insert(*v) {
                        return Err(Fail);
                    }
                }
                None => all_ground = false,
            }
        }
        if all_ground {
            return Ok(None);
        }
        Ok(Some(Box::new(AllDifferent::new(vars))))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::solver::domain::IntDomain;

    #[test]
    fn prunes_singleton_values_from_peers() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::singleton(1));
        let y = store.new_variable("y", IntDomain::bounds(1, 3));
        let z = store.new_variable("z", IntDomain::bounds(1, 3));
        let c = AllDifferent::new(vec![x, y, z]);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(y).values(), vec![2, 3]);
        assert_eq!(store.domain(z).values(), vec![2, 3]);
    }

    #[test]
    fn clone_fails_on_grounded_collision() {
        let mut source = Store::new();
        let x = source.new_variable("x", IntDomain::singleton(1));
        let y = source.new_variable("y", IntDomain::singleton(1));
        let c = AllDifferent::new(vec![x, y]);
        let mut target = Store::new();
        assert!(c.clone_into(&source, &mut target).is_err());
    }
}
