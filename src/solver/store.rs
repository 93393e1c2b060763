//! The backtrackable constraint store.
//!
//! A [`Store`] is an arena of named finite-domain integer variables plus the
//! propagators imposed over them. Variables are identified by [`VarId`]
//! within one store and by *name* across stores: the clone protocol re-resolves
//! every variable by name in the target store, creating it with the same
//! domain if absent, so two stores never share mutable state.
//!
//! Backtracking is level-based: every domain narrowing performed at a level
//! greater than zero is recorded on a trail, and [`Store::remove_level`]
//! restores the replaced domains exactly. Level 0 is the permanent baseline.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, trace};

use crate::{
    error::Fail,
    solver::{constraint::Propagator, domain::IntDomain, work_list::WorkList},
};

pub type VarId = usize;
pub type ConstraintId = usize;

/// Propagation counters for one imposed constraint.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerConstraintStats {
    pub revisions: u64,
    pub prunings: u64,
    pub time_spent_micros: u64,
}

/// The mutable view of a store handed to propagators.
///
/// All domain narrowing goes through this context so that the trail records
/// every change and the worklist learns which variables moved.
pub struct PropCtx<'a> {
    domains: &'a mut im::HashMap<VarId, IntDomain>,
    trail: &'a mut Vec<(usize, VarId, IntDomain)>,
    level: usize,
    changed: Vec<VarId>,
}

impl<'a> PropCtx<'a> {
    pub fn domain(&self, v: VarId) -> &IntDomain {
        self.domains.get(&v).expect("variable not present in store")
    }

    pub fn min(&self, v: VarId) -> i64 {
        self.domain(v).min().unwrap_or(i64::MAX)
    }

    pub fn max(&self, v: VarId) -> i64 {
        self.domain(v).max().unwrap_or(i64::MIN)
    }

    pub fn is_singleton(&self, v: VarId) -> bool {
        self.domain(v).is_singleton()
    }

    /// The variable's value if its domain is a singleton.
    pub fn value(&self, v: VarId) -> Option<i64> {
        self.domain(v).singleton_value()
    }

    fn update(&mut self, v: VarId, new_dom: IntDomain) -> Result<(), Fail> {
        let old = self.domain(v).clone();
        if old == new_dom {
            return Ok(());
        }
        if self.level > 0 {
            self.trail.push((self.level, v, old));
        }
        let failed = new_dom.is_empty();
        let _ = self.domains.insert(v, new_dom);
        self.changed.push(v);
        if failed {
            Err(Fail)
        } else {
            Ok(())
        }
    }

    /// Narrows `v` to `[lo, hi]`.
    pub fn tighten(&mut self, v: VarId, lo: i64, hi: i64) -> Result<(), Fail> {
        let new_dom = self.domain(v).clamped(lo, hi);
        self.update(v, new_dom)
    }

    /// Grounds `v` to `value`.
    pub fn assign(&mut self, v: VarId, value: i64) -> Result<(), Fail> {
        self.tighten(v, value, value)
    }

    /// Removes a single value from the domain of `v`.
    pub fn remove(&mut self, v: VarId, value: i64) -> Result<(), Fail> {
        if !self.domain(v).contains(value) {
            return Ok(());
        }
        let new_dom = self.domain(v).without(value);
        self.update(v, new_dom)
    }

    /// Intersects the domain of `v` with `dom`.
    pub fn restrict(&mut self, v: VarId, dom: &IntDomain) -> Result<(), Fail> {
        let new_dom = self.domain(v).intersection(dom);
        self.update(v, new_dom)
    }
}

/// A backtrackable set of variables and imposed constraints.
pub struct Store {
    names: Vec<String>,
    lookup: HashMap<String, VarId>,
    domains: im::HashMap<VarId, IntDomain>,
    constraints: Vec<Box<dyn Propagator>>,
    watchers: HashMap<VarId, Vec<ConstraintId>>,
    stats: Vec<PerConstraintStats>,
    trail: Vec<(usize, VarId, IntDomain)>,
    level: usize,
    fresh_counter: usize,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("variables", &self.names.len())
            .field("constraints", &self.constraints.len())
            .field("level", &self.level)
            .finish()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            lookup: HashMap::new(),
            domains: im::HashMap::new(),
            constraints: Vec::new(),
            watchers: HashMap::new(),
            stats: Vec::new(),
            trail: Vec::new(),
            level: 0,
            fresh_counter: 0,
        }
    }

    /// Creates a variable with a unique name.
    pub fn new_variable(&mut self, name: impl Into<String>, domain: IntDomain) -> VarId {
        let name = name.into();
        assert!(
            !self.lookup.contains_key(&name),
            "a variable named `{}` already exists in this store",
            name
        );
        let id = self.names.len();
        let _ = self.lookup.insert(name.clone(), id);
        self.names.push(name);
        let _ = self.domains.insert(id, domain);
        id
    }

    /// A name of the form `{prefix}_{n}` not yet used by any variable. The
    /// counter is per-store, so auxiliary names never depend on global state.
    pub fn fresh_name(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("{}_{}", prefix, self.fresh_counter);
            self.fresh_counter += 1;
            if !self.lookup.contains_key(&name) {
                return name;
            }
        }
    }

    pub fn find_variable(&self, name: &str) -> Option<VarId> {
        self.lookup.get(name).copied()
    }

    /// Looks a variable up by name, creating it with the given domain if it
    /// does not exist yet.
    pub fn find_or_create(&mut self, name: &str, domain: &IntDomain) -> VarId {
        match self.find_variable(name) {
            Some(v) => v,
            None => self.new_variable(name.to_owned(), domain.clone()),
        }
    }

    /// The clone protocol's variable step: finds a variable with the same
    /// name as `v` has in `source`, creating it with `v`'s current domain if
    /// absent. Resolving twice for the same name yields the same variable.
    pub fn find_or_clone_from(&mut self, source: &Store, v: VarId) -> VarId {
        let name = source.name(v);
        match self.find_variable(name) {
            Some(mine) => mine,
            None => self.new_variable(name.to_owned(), source.domain(v).clone()),
        }
    }

    pub fn name(&self, v: VarId) -> &str {
        &self.names[v]
    }

    pub fn domain(&self, v: VarId) -> &IntDomain {
        self.domains.get(&v).expect("variable not present in store")
    }

    /// Replaces a variable's baseline domain. Only meaningful before any
    /// level has been opened.
    pub fn set_domain(&mut self, v: VarId, domain: IntDomain) {
        assert_eq!(self.level, 0, "baseline domains can only change at level 0");
        let _ = self.domains.insert(v, domain);
    }

    pub fn num_variables(&self) -> usize {
        self.names.len()
    }

    pub fn var_ids(&self) -> impl Iterator<Item = VarId> {
        0..self.names.len()
    }

    /// Registers a constraint and links it to its variables for
    /// notification-driven propagation.
    pub fn impose(&mut self, constraint: Box<dyn Propagator>) -> ConstraintId {
        let id = self.constraints.len();
        for &v in constraint.variables() {
            self.watchers.entry(v).or_default().push(id);
        }
        self.constraints.push(constraint);
        self.stats.push(PerConstraintStats::default());
        id
    }

    pub fn constraints(&self) -> &[Box<dyn Propagator>] {
        &self.constraints
    }

    pub fn constraint_stats(&self) -> &[PerConstraintStats] {
        &self.stats
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Moves the level pointer without undoing anything. Callers abandoning
    /// levels must `remove_level` each of them first.
    pub fn set_level(&mut self, level: usize) {
        self.level = level;
    }

    /// Opens a new level and returns it.
    pub fn new_level(&mut self) -> usize {
        self.level += 1;
        self.level
    }

    /// Undoes every domain narrowing recorded at `level` and deeper,
    /// restoring the replaced domains exactly.
    pub fn remove_level(&mut self, level: usize) {
        assert!(level >= 1, "level 0 is the permanent baseline");
        while let Some((l, _, _)) = self.trail.last() {
            if *l < level {
                break;
            }
            let (_, v, old) = self.trail.pop().expect("trail entry vanished");
            let _ = self.domains.insert(v, old);
        }
    }

    fn with_ctx<T>(&mut self, f: impl FnOnce(&mut PropCtx) -> T) -> T {
        let mut ctx = PropCtx {
            domains: &mut self.domains,
            trail: &mut self.trail,
            level: self.level,
            changed: Vec::new(),
        };
        f(&mut ctx)
    }

    /// Runs a closure against a fresh propagation context. Compiled for unit
    /// tests that exercise a single propagator in isolation.
    #[cfg(test)]
    pub(crate) fn with_ctx_for_tests<T>(&mut self, f: impl FnOnce(&mut PropCtx) -> T) -> T {
        self.with_ctx(f)
    }

    /// Grounds a variable at the current level.
    pub fn ground(&mut self, v: VarId, value: i64) -> Result<(), Fail> {
        self.with_ctx(|ctx| ctx.assign(v, value))
    }

    /// Narrows a variable to `[lo, hi]` at the current level.
    pub fn tighten(&mut self, v: VarId, lo: i64, hi: i64) -> Result<(), Fail> {
        self.with_ctx(|ctx| ctx.tighten(v, lo, hi))
    }

    /// Intersects a variable's domain with `dom` at the current level.
    pub fn restrict(&mut self, v: VarId, dom: &IntDomain) -> Result<(), Fail> {
        self.with_ctx(|ctx| ctx.restrict(v, dom))
    }

    /// Runs all propagators to a fixpoint.
    ///
    /// Returns `false` if any domain was wiped out. In that case domains may
    /// be left partially narrowed; the caller is expected to remove the
    /// levels it opened.
    pub fn consistency(&mut self) -> bool {
        let mut worklist = WorkList::new();
        for id in 0..self.constraints.len() {
            worklist.push_back(id);
        }

        while let Some(cid) = worklist.pop_front() {
            let start = Instant::now();
            self.stats[cid].revisions += 1;

            let mut ctx = PropCtx {
                domains: &mut self.domains,
                trail: &mut self.trail,
                level: self.level,
                changed: Vec::new(),
            };
            let outcome = self.constraints[cid].propagate(&mut ctx);
            let changed = ctx.changed;

            self.stats[cid].time_spent_micros += start.elapsed().as_micros() as u64;

            if outcome.is_err() {
                debug!(constraint = cid, "propagation wiped out a domain");
                return false;
            }

            if !changed.is_empty() {
                self.stats[cid].prunings += 1;
                for v in changed {
                    trace!(constraint = cid, var = %self.names[v], "domain narrowed");
                    if let Some(deps) = self.watchers.get(&v) {
                        for &dep in deps {
                            worklist.push_back(dep);
                        }
                    }
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::solver::domain::IntDomain;

    #[test]
    fn levels_restore_domains_exactly() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 9));

        let base = store.level();
        let lvl = store.new_level();
        store.tighten(x, 2, 7).unwrap();
        store.ground(x, 5).unwrap();
        assert_eq!(store.domain(x).singleton_value(), Some(5));

        store.remove_level(lvl);
        store.set_level(base);
        assert_eq!(store.domain(x).values(), IntDomain::bounds(0, 9).values());
    }

    #[test]
    fn nested_levels_unwind_independently() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 9));

        let l1 = store.new_level();
        store.tighten(x, 1, 8).unwrap();
        let l2 = store.new_level();
        store.tighten(x, 3, 4).unwrap();

        store.remove_level(l2);
        store.set_level(l1);
        assert_eq!(store.domain(x).min(), Some(1));
        assert_eq!(store.domain(x).max(), Some(8));

        store.remove_level(l1);
        store.set_level(0);
        assert_eq!(store.domain(x).min(), Some(0));
        assert_eq!(store.domain(x).max(), Some(9));
    }

    #[test]
    fn remove_level_unwinds_deeper_levels_too() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 9));

        let l1 = store.new_level();
        store.tighten(x, 1, 8).unwrap();
        let _l2 = store.new_level();
        store.tighten(x, 3, 4).unwrap();

        store.remove_level(l1);
        store.set_level(0);
        assert_eq!(store.domain(x).values(), IntDomain::bounds(0, 9).values());
    }

    #[test]
    fn grounding_outside_the_domain_fails_and_is_recoverable() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::from_values([1, 3]));

        let lvl = store.new_level();
        assert_eq!(store.ground(x, 2), Err(Fail));
        assert!(store.domain(x).is_empty());

        store.remove_level(lvl);
        store.set_level(0);
        assert_eq!(store.domain(x).values(), vec![1, 3]);
    }

    #[test]
    fn find_or_clone_is_idempotent_per_name() {
        let mut source = Store::new();
        let x = source.new_variable("x", IntDomain::bounds(0, 4));

        let mut target = Store::new();
        let a = target.find_or_clone_from(&source, x);
        let b = target.find_or_clone_from(&source, x);
        assert_eq!(a, b);
        assert_eq!(target.domain(a).values(), source.domain(x).values());
    }

    #[test]
    fn cloned_stores_are_independent() {
        let mut source = Store::new();
        let x = source.new_variable("x", IntDomain::bounds(0, 4));

        let mut target = Store::new();
        let tx = target.find_or_clone_from(&source, x);

        let lvl = target.new_level();
        target.ground(tx, 3).unwrap();
        assert_eq!(source.domain(x).size(), 5);

        target.remove_level(lvl);
        target.set_level(0);
        let _ = source.new_level();
        source.ground(x, 0).unwrap();
        assert_eq!(target.domain(tx).size(), 5);
    }

    #[test]
    fn fresh_names_never_collide() {
        let mut store = Store::new();
        let _ = store.new_variable("aux_0", IntDomain::singleton(0));
        let name = store.fresh_name("aux");
        assert_eq!(name, "aux_1");
    }
}
