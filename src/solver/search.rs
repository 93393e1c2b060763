//! Depth-first branch-and-bound search over a store.
//!
//! The search grounds a set of decision variables, propagating at every
//! node, and treats a designated cost variable as the objective. An optional
//! bound restricts the search to solutions strictly better than the bound;
//! the bound tightens as solutions are found, which is what makes the lazy
//! iterator deliver strictly improving solutions.

use tracing::{debug, trace};

use crate::solver::{
    heuristics::{BestBoundFirst, SmallestDomain, ValueOrdering, VariableSelection},
    store::{Store, VarId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    /// Whether `a` is strictly better than `b`.
    pub fn better(self, a: i64, b: i64) -> bool {
        match self {
            Direction::Minimize => a < b,
            Direction::Maximize => a > b,
        }
    }

    pub fn flipped(self) -> Direction {
        match self {
            Direction::Minimize => Direction::Maximize,
            Direction::Maximize => Direction::Minimize,
        }
    }
}

/// The search was told to stop immediately; it unwinds all its levels and
/// returns without a result. Used by the lazy iterator for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort;

/// A solution listener's verdict after receiving a solution.
#[derive(Debug, Clone, Copy)]
pub enum SolutionControl {
    KeepBound,
    NewBound(i64),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    pub nodes_visited: u64,
    pub backtracks: u64,
    pub solutions: u64,
}

type Listener<'a> = dyn FnMut(&mut Store, i64) -> Result<SolutionControl, Abort> + 'a;

pub struct DepthFirstSearch {
    direction: Direction,
    variable_heuristic: Box<dyn VariableSelection>,
    value_heuristic: Box<dyn ValueOrdering>,
    pub stats: SearchStats,
}

impl DepthFirstSearch {
    pub fn new(direction: Direction) -> Self {
        Self::with_heuristics(direction, Box::new(SmallestDomain), Box::new(BestBoundFirst))
    }

    pub fn with_heuristics(
        direction: Direction,
        variable_heuristic: Box<dyn VariableSelection>,
        value_heuristic: Box<dyn ValueOrdering>,
    ) -> Self {
        Self {
            direction,
            variable_heuristic,
            value_heuristic,
            stats: SearchStats::default(),
        }
    }

    /// Finds an assignment of `vars` optimizing the cost variable. Returns
    /// the values of `vars` (in order) and the cost, or `None` if
    /// infeasible. The store is left exactly as it was: every level opened
    /// by the search is removed again.
    pub fn optimize(
        &mut self,
        store: &mut Store,
        vars: &[VarId],
        cost: VarId,
    ) -> Option<(Vec<i64>, i64)> {
        if !store.consistency() {
            return None;
        }

        let mut best: Option<(Vec<i64>, i64)> = None;
        let mut bound: Option<i64> = None;
        let vars_owned: Vec<VarId> = vars.to_vec();
        let result = self.dfs(store, vars, &[], cost, &mut bound, &mut |store, cost_val| {
            let values = vars_owned
                .iter()
                .map(|&v| {
                    store
                        .domain(v)
                        .singleton_value()
                        .expect("decision variables are grounded at a leaf")
                })
                .collect();
            best = Some((values, cost_val));
            Ok(SolutionControl::NewBound(cost_val))
        });
        debug_assert!(result.is_ok(), "optimize never aborts");
        best
    }

    /// Runs the search, reporting every solution strictly better than the
    /// current bound to `on_solution`. When `projected` is non-empty, each
    /// leaf launches an inner search grounding the projected variables at a
    /// deeper level to compute the best completion cost; that level is
    /// rolled back before the outer search resumes, so its own backtracking
    /// is unaffected.
    pub fn iterate(
        &mut self,
        store: &mut Store,
        vars: &[VarId],
        projected: &[VarId],
        cost: VarId,
        initial_bound: Option<i64>,
        on_solution: &mut Listener,
    ) -> Result<(), Abort> {
        if !store.consistency() {
            debug!("search space inconsistent before labeling");
            return Ok(());
        }
        let mut bound = initial_bound;
        self.dfs(store, vars, projected, cost, &mut bound, on_solution)
    }

    fn dfs(
        &mut self,
        store: &mut Store,
        vars: &[VarId],
        projected: &[VarId],
        cost: VarId,
        bound: &mut Option<i64>,
        on_solution: &mut Listener,
    ) -> Result<(), Abort> {
        self.stats.nodes_visited += 1;

        let Some(branch_var) = self.variable_heuristic.select(store, vars) else {
            return self.leaf(store, projected, cost, bound, on_solution);
        };

        let domain = store.domain(branch_var).clone();
        for value in self.value_heuristic.order(&domain, self.direction) {
            trace!(var = %store.name(branch_var), value, "branching");
            let lvl = store.new_level();
            let feasible = store.ground(branch_var, value).is_ok()
                && self.within_bound(store, cost, *bound)
                && store.consistency();

            let outcome = if feasible {
                self.dfs(store, vars, projected, cost, bound, on_solution)
            } else {
                Ok(())
            };

            store.remove_level(lvl);
            store.set_level(lvl - 1);
            self.stats.backtracks += 1;
            outcome?;
        }
        Ok(())
    }

    fn leaf(
        &mut self,
        store: &mut Store,
        projected: &[VarId],
        cost: VarId,
        bound: &mut Option<i64>,
        on_solution: &mut Listener,
    ) -> Result<(), Abort> {
        let cost_val = if projected.is_empty() {
            self.ground_cost(store, cost)
        } else {
            self.best_completion(store, projected, cost)
        };
        let Some(cost_val) = cost_val else {
            return Ok(()); // infeasible completion; resume the outer search
        };

        if let Some(b) = *bound {
            if !self.direction.better(cost_val, b) {
                return Ok(());
            }
        }

        self.stats.solutions += 1;
        match on_solution(store, cost_val)? {
            SolutionControl::KeepBound => {}
            SolutionControl::NewBound(nb) => *bound = Some(nb),
        }
        Ok(())
    }

    /// Grounds the cost variable to its best feasible value once all
    /// decision variables are fixed. The probing levels are rolled back; the
    /// value alone is returned.
    fn ground_cost(&mut self, store: &mut Store, cost: VarId) -> Option<i64> {
        if let Some(v) = store.domain(cost).singleton_value() {
            return Some(v);
        }
        let domain = store.domain(cost).clone();
        for value in self.value_heuristic.order(&domain, self.direction) {
            let lvl = store.new_level();
            let ok = store.ground(cost, value).is_ok() && store.consistency();
            store.remove_level(lvl);
            store.set_level(lvl - 1);
            if ok {
                return Some(value);
            }
        }
        None
    }

    /// The slave search of the two-phase protocol: optimizes the projected
    /// variables at a deeper level and reports the best cost, rolling
    /// everything back.
    fn best_completion(
        &mut self,
        store: &mut Store,
        projected: &[VarId],
        cost: VarId,
    ) -> Option<i64> {
        let lvl = store.new_level();
        let mut slave = DepthFirstSearch::new(self.direction);
        let result = slave.optimize(store, projected, cost).map(|(_, c)| c);
        store.remove_level(lvl);
        store.set_level(lvl - 1);
        result
    }

    /// Restricts the cost variable to values strictly better than the
    /// bound, at the current level.
    fn within_bound(&self, store: &mut Store, cost: VarId, bound: Option<i64>) -> bool {
        let Some(b) = bound else {
            return true;
        };
        let result = match self.direction {
            Direction::Minimize => store.tighten(cost, i64::MIN, b.saturating_sub(1)),
            Direction::Maximize => store.tighten(cost, b.saturating_add(1), i64::MAX),
        };
        result.is_ok()
    }
}

impl std::fmt::Debug for DepthFirstSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthFirstSearch")
            .field("direction", &self.direction)
            .field("stats", &self.stats)
            .finish()
    }
}
