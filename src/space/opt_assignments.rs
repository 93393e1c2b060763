//! Conditional optimal assignments to projected variables.

use tracing::debug;

use crate::{
    solver::{
        search::DepthFirstSearch,
        store::VarId,
    },
    space::SolutionSpace,
};

/// The companion accessor of a projection: given an assignment to the
/// separator (the remaining free variables), recovers values of the
/// projected variables achieving the optimum.
///
/// Owns an independent clone of the pre-projection space, so queries never
/// contend with the projected space itself.
#[derive(Debug)]
pub struct OptAssignments {
    space: SolutionSpace,
    separator: Vec<String>,
    projected: Vec<String>,
}

impl OptAssignments {
    pub(crate) fn new(
        space: SolutionSpace,
        separator: Vec<String>,
        projected: Vec<String>,
    ) -> Self {
        Self { space, separator, projected }
    }

    pub fn projected_variables(&self) -> &[String] {
        &self.projected
    }

    /// Any value from each projected variable's domain; used when the
    /// separator assignment is infeasible and every witness is as good as
    /// any other.
    fn arbitrary_witness(&self) -> Vec<i64> {
        self.projected
            .iter()
            .map(|name| {
                self.space
                    .domain(name)
                    .or_else(|| self.space.projected_domain(name))
                    .and_then(|d| d.min())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// The optimal values of the projected variables under the given
    /// separator assignment (in separator order). Falls back to an arbitrary
    /// witness when the assignment is infeasible.
    pub fn optimal_assignments(&mut self, separator_values: &[i64]) -> Vec<i64> {
        if !self.space.ensure_consistent() {
            return self.arbitrary_witness();
        }

        let direction = self.space.direction();
        let total = self.space.total_var();
        let store = self.space.store_mut();

        let base_lvl = store.level();
        store.set_level(base_lvl + 1);

        let mut grounded = true;
        for (name, &value) in self.separator.iter().zip(separator_values) {
            let Some(v) = store.find_variable(name) else {
                grounded = false;
                break;
            };
            if store.domain(v).singleton_value() == Some(value) {
                continue;
            }
            if store.ground(v, value).is_err() {
                grounded = false;
                break;
            }
        }

        // Search over the requested projected variables plus any the space
        // had already projected before.
        let mut searched: Vec<VarId> = Vec::new();
        for name in &self.projected {
            if let Some(v) = store.find_variable(name) {
                searched.push(v);
            }
        }
        let already_projected: Vec<String> = self
            .space
            .projected_variables()
            .iter()
            .filter(|n| !self.projected.contains(*n))
            .cloned()
            .collect();

        let store = self.space.store_mut();
        for name in &already_projected {
            if let Some(v) = store.find_variable(name) {
                searched.push(v);
            }
        }

        let witness = if grounded && store.consistency() {
            let mut search = DepthFirstSearch::new(direction);
            search
                .optimize(store, &searched, total)
                .map(|(values, _)| values[..self.projected.len()].to_vec())
        } else {
            None
        };

        for lvl in (base_lvl + 1..=store.level()).rev() {
            store.remove_level(lvl);
        }
        store.set_level(base_lvl);

        match witness {
            Some(w) => w,
            None => {
                debug!("no feasible completion; returning an arbitrary witness");
                self.arbitrary_witness()
            }
        }
    }
}
