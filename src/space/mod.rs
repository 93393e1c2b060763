//! The solution-space algebra.
//!
//! A [`SolutionSpace`] wraps an owned [`Store`] together with a partition of
//! its variables into *free* (the public scope), *projected* (existentially
//! optimized out) and *sliced* (grounded to a fixed value), plus a default
//! utility, an infeasible-utility sentinel and the optimization direction.
//! The algebra operations — [`join`](SolutionSpace::join),
//! [`project`](SolutionSpace::project), [`slice`](SolutionSpace::slice),
//! [`rescale`](SolutionSpace::rescale), [`resolve`](SolutionSpace::resolve)
//! — each build a *new* space whose store is an independent clone of the
//! operands', assembled through the by-name clone protocol.

pub mod external;
pub mod iter;
pub mod opt_assignments;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{Result, SolverError},
    parser::{ParsedConstraints, PredicateDef},
    solver::{
        constraint::Operand,
        constraints::{arithmetic::MulEq, linear::LinearInt, relation::RelOp},
        domain::{cross_product, IntDomain},
        search::{DepthFirstSearch, Direction},
        store::{Store, VarId},
    },
};

pub use iter::{BestFirstIter, IterState};
pub use opt_assignments::OptAssignments;

/// A utility value, with explicit infinities serving as the infeasible
/// sentinels (`+∞` for minimization, `-∞` for maximization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Utility {
    Finite(i64),
    PlusInfinity,
    MinusInfinity,
}

impl Utility {
    pub fn add(self, other: Utility) -> Utility {
        use Utility::*;
        match (self, other) {
            (Finite(a), Finite(b)) => Finite(a.saturating_add(b)),
            (PlusInfinity, _) | (_, PlusInfinity) => PlusInfinity,
            (MinusInfinity, _) | (_, MinusInfinity) => MinusInfinity,
        }
    }

    pub fn multiply(self, k: i64) -> Utility {
        use Utility::*;
        match self {
            Finite(a) => Finite(a.saturating_mul(k)),
            PlusInfinity if k < 0 => MinusInfinity,
            PlusInfinity if k == 0 => Finite(0),
            PlusInfinity => PlusInfinity,
            MinusInfinity if k < 0 => PlusInfinity,
            MinusInfinity if k == 0 => Finite(0),
            MinusInfinity => MinusInfinity,
        }
    }

    pub fn finite(self) -> Option<i64> {
        match self {
            Utility::Finite(v) => Some(v),
            _ => None,
        }
    }

    /// The infeasible sentinel for an optimization direction.
    pub fn infeasible_for(direction: Direction) -> Utility {
        match direction {
            Direction::Minimize => Utility::PlusInfinity,
            Direction::Maximize => Utility::MinusInfinity,
        }
    }
}

impl std::fmt::Display for Utility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Utility::Finite(v) => write!(f, "{}", v),
            Utility::PlusInfinity => write!(f, "infinity"),
            Utility::MinusInfinity => write!(f, "-infinity"),
        }
    }
}

/// The output of a projection: the reduced space, the projected-out
/// variable names, and the accessor recovering their optimal witnesses.
#[derive(Debug)]
pub struct ProjOutput {
    pub space: SolutionSpace,
    pub vars: Vec<String>,
    pub assignments: OptAssignments,
}

pub struct SolutionSpace {
    name: String,
    store: Store,
    /// Constraints `0..num_base` in the store were cloned directly; the rest
    /// were emitted by lowering `decomposed` and are re-created from those
    /// definitions when this space is cloned.
    num_base: usize,
    decomposed: Vec<PredicateDef>,
    util_var_names: Vec<String>,
    free: Vec<String>,
    projected: Vec<String>,
    sliced: Vec<String>,
    /// Bookkeeping domains for every scope variable (free, projected and
    /// sliced), keyed by name.
    all_doms: im::HashMap<String, IntDomain>,
    direction: Direction,
    default_util: Utility,
    infeasible_util: Utility,
    /// Tri-state consistency cache: unknown / consistent / inconsistent.
    consistency: Option<bool>,
    total_name: Option<String>,
}

impl std::fmt::Debug for SolutionSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolutionSpace")
            .field("name", &self.name)
            .field("free", &self.free)
            .field("projected", &self.projected)
            .field("sliced", &self.sliced)
            .field("direction", &self.direction)
            .field("default_util", &self.default_util)
            .finish()
    }
}

/// One source a new space is assembled from: base constraints cloned by
/// name out of their owning store, plus the predicate definitions re-lowered
/// afterwards.
struct SpacePart<'a> {
    store: &'a Store,
    constraints: &'a [Box<dyn crate::solver::constraint::Propagator>],
    decomposed: &'a [PredicateDef],
}

impl SolutionSpace {
    fn as_part(&self) -> SpacePart<'_> {
        SpacePart {
            store: &self.store,
            constraints: &self.store.constraints()[..self.num_base],
            decomposed: &self.decomposed,
        }
    }
}

impl SolutionSpace {
    /// Builds a space from a store populated by the parsers.
    ///
    /// The scope lists this space's public variables in order; everything
    /// else the parsers created (auxiliary and utility variables) is carried
    /// along by the clone. The source store is left untouched.
    pub fn from_parsed(
        name: impl Into<String>,
        source: &Store,
        parsed: &ParsedConstraints,
        scope: &[&str],
        direction: Direction,
    ) -> SolutionSpace {
        let name = name.into();
        let mut all_doms = im::HashMap::new();
        let mut free = Vec::new();
        for var_name in scope {
            let v = source
                .find_variable(var_name)
                .unwrap_or_else(|| panic!("scope variable `{}` not in the store", var_name));
            let _ = all_doms.insert((*var_name).to_owned(), source.domain(v).clone());
            free.push((*var_name).to_owned());
        }

        let util_var_names = parsed
            .util_vars
            .iter()
            .map(|&v| source.name(v).to_owned())
            .collect();

        let infeasible_util = Utility::infeasible_for(direction);
        Self::assemble(
            name,
            direction,
            Utility::Finite(0),
            infeasible_util,
            all_doms,
            free,
            Vec::new(),
            Vec::new(),
            util_var_names,
            &[SpacePart {
                store: source,
                constraints: &parsed.constraints,
                decomposed: &parsed.decomposed,
            }],
        )
    }

    /// A space over no variables: its utility is the default at every query.
    pub fn scalar(name: impl Into<String>, utility: Utility, direction: Direction) -> SolutionSpace {
        SolutionSpace {
            name: name.into(),
            store: Store::new(),
            num_base: 0,
            decomposed: Vec::new(),
            util_var_names: Vec::new(),
            free: Vec::new(),
            projected: Vec::new(),
            sliced: Vec::new(),
            all_doms: im::HashMap::new(),
            direction,
            default_util: utility,
            infeasible_util: Utility::infeasible_for(direction),
            consistency: None,
            total_name: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        name: String,
        direction: Direction,
        default_util: Utility,
        infeasible_util: Utility,
        all_doms: im::HashMap<String, IntDomain>,
        free: Vec<String>,
        projected: Vec<String>,
        sliced: Vec<String>,
        util_var_names: Vec<String>,
        parts: &[SpacePart],
    ) -> SolutionSpace {
        let mut store = Store::new();

        // Create the scope variables first, from the (possibly narrowed)
        // bookkeeping domains, so cloned constraints resolve onto them.
        for var_name in free.iter().chain(&projected).chain(&sliced) {
            if let Some(dom) = all_doms.get(var_name) {
                let _ = store.find_or_create(var_name, dom);
            }
        }

        let mut consistency = None;

        // Clone each part's base constraints by name; a trivially violated
        // constraint makes the whole space statically infeasible.
        'parts: for part in parts {
            for constraint in part.constraints {
                match crate::solver::constraint::Propagator::clone_into(&**constraint, part.store, &mut store) {
                    Ok(Some(clone)) => {
                        let _ = store.impose(clone);
                    }
                    Ok(None) => {} // trivially satisfied, dropped
                    Err(_) => {
                        debug!(space = %name, "clone produced a trivially violated constraint");
                        consistency = Some(false);
                        break 'parts;
                    }
                }
            }
        }
        let num_base = store.constraints().len();

        // Re-lower the decomposed constraints into the new store.
        let mut decomposed = Vec::new();
        if consistency.is_none() {
            for part in parts {
                for def in part.decomposed {
                    match def.lower(&mut store) {
                        Ok(lowering) => {
                            for c in lowering.constraints {
                                let _ = store.impose(c);
                            }
                        }
                        Err(e) => {
                            warn!(space = %name, predicate = %def.name, error = %e,
                                "re-lowering a predicate failed");
                            consistency = Some(false);
                        }
                    }
                    decomposed.push(def.clone());
                }
            }
        } else {
            for part in parts {
                decomposed.extend(part.decomposed.iter().cloned());
            }
        }

        SolutionSpace {
            name,
            store,
            num_base,
            decomposed,
            util_var_names,
            free,
            projected,
            sliced,
            all_doms,
            direction,
            default_util,
            infeasible_util,
            consistency,
            total_name: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The free variables, in order.
    pub fn variables(&self) -> &[String] {
        &self.free
    }

    pub fn projected_variables(&self) -> &[String] {
        &self.projected
    }

    pub fn sliced_variables(&self) -> &[String] {
        &self.sliced
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn default_utility(&self) -> Utility {
        self.default_util
    }

    pub fn infeasible_utility(&self) -> Utility {
        self.infeasible_util
    }

    /// The domain of a free variable, or `None` if the name is not part of
    /// the public scope.
    pub fn domain(&self, variable: &str) -> Option<&IntDomain> {
        if self.free.iter().any(|v| v == variable) {
            self.all_doms.get(variable)
        } else {
            None
        }
    }

    /// The domain of a projected variable.
    pub(crate) fn projected_domain(&self, variable: &str) -> Option<&IntDomain> {
        if self.projected.iter().any(|v| v == variable) {
            self.all_doms.get(variable)
        } else {
            None
        }
    }

    /// The number of points in the free-variable cross product.
    pub fn num_solutions(&self) -> u64 {
        self.free
            .iter()
            .map(|v| self.all_doms[v].size())
            .product()
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub(crate) fn into_store(self) -> Store {
        self.store
    }

    /// Wraps a store holding a single extensional constraint into a space.
    pub(crate) fn from_extensional_parts(
        name: impl Into<String>,
        store: Store,
        util_name: String,
        free: Vec<String>,
        all_doms: im::HashMap<String, IntDomain>,
        direction: Direction,
    ) -> SolutionSpace {
        let num_base = store.constraints().len();
        SolutionSpace {
            name: name.into(),
            store,
            num_base,
            decomposed: Vec::new(),
            util_var_names: vec![util_name],
            free,
            projected: Vec::new(),
            sliced: Vec::new(),
            all_doms,
            direction,
            // Extensional tables store full utilities, so the default
            // contributes nothing further.
            default_util: Utility::Finite(0),
            infeasible_util: Utility::infeasible_for(direction),
            consistency: None,
            total_name: None,
        }
    }

    /// Imposes the total-utility sum lazily and runs propagation to a
    /// fixpoint, caching the verdict until the space is structurally
    /// changed.
    pub fn ensure_consistent(&mut self) -> bool {
        if let Some(cached) = self.consistency {
            return cached;
        }

        // Build the aggregate utility variable: the sum of all utility
        // variables that still have a non-empty domain.
        let util_ids: Vec<VarId> = self
            .util_var_names
            .iter()
            .filter_map(|n| self.store.find_variable(n))
            .filter(|&v| !self.store.domain(v).is_empty())
            .collect();

        let mut lo: i64 = 0;
        let mut hi: i64 = 0;
        for &v in &util_ids {
            let dom = self.store.domain(v);
            lo = lo.saturating_add(dom.min().unwrap_or(0));
            hi = hi.saturating_add(dom.max().unwrap_or(0));
        }

        let total_name = self.store.fresh_name("util_total");
        let total = self
            .store
            .new_variable(total_name.clone(), IntDomain::bounds(lo, hi));
        if !util_ids.is_empty() {
            let mut terms: Vec<(i64, Operand)> =
                util_ids.iter().map(|&v| (1, Operand::Var(v))).collect();
            terms.push((-1, Operand::Var(total)));
            let _ = self
                .store
                .impose(Box::new(LinearInt::new(terms, RelOp::Eq, 0)));
        }
        self.total_name = Some(total_name);

        let verdict = self.store.consistency();
        self.consistency = Some(verdict);
        verdict
    }

    pub(crate) fn total_var(&mut self) -> VarId {
        let _ = self.ensure_consistent();
        let name = self.total_name.as_ref().expect("total built by ensure_consistent");
        self.store.find_variable(name).expect("total variable exists")
    }

    /// The utility of one assignment to the free variables, in scope order.
    ///
    /// Grounds the assignment at a fresh store level, searches over any
    /// projected variables for their optimal completion, and rolls the
    /// level back before returning. Any failure path yields the infeasible
    /// sentinel; otherwise the default utility is added to the search
    /// result.
    pub fn utility(&mut self, values: &[i64]) -> Utility {
        if values.len() < self.free.len() {
            return self.default_util;
        }
        if self.default_util == self.infeasible_util {
            return self.infeasible_util;
        }
        if self.all_doms.is_empty() || (self.num_base == 0 && self.decomposed.is_empty()) {
            return self.default_util;
        }
        if !self.ensure_consistent() {
            return self.infeasible_util;
        }

        let total = self.total_var();
        let base_lvl = self.store.level();
        self.store.set_level(base_lvl + 1);

        let mut grounded = true;
        for (name, &value) in self.free.iter().zip(values) {
            let v = self
                .store
                .find_variable(name)
                .expect("free variables exist in the store");
            if self.store.domain(v).singleton_value() == Some(value) {
                continue;
            }
            if self.store.ground(v, value).is_err() {
                grounded = false;
                break;
            }
        }

        let cost = if grounded && self.store.consistency() {
            let projected_ids: Vec<VarId> = self
                .projected
                .iter()
                .filter_map(|n| self.store.find_variable(n))
                .collect();
            let mut search = DepthFirstSearch::new(self.direction);
            search
                .optimize(&mut self.store, &projected_ids, total)
                .map(|(_, c)| c)
        } else {
            None
        };

        for lvl in (base_lvl + 1..=self.store.level()).rev() {
            self.store.remove_level(lvl);
        }
        self.store.set_level(base_lvl);

        match cost {
            Some(c) => Utility::Finite(c).add(self.default_util),
            None => self.infeasible_util,
        }
    }

    /// The utility of an assignment given as a name→value map. Every free
    /// variable must be covered.
    pub fn utility_of(&mut self, assignment: &HashMap<String, i64>) -> Utility {
        let mut values = Vec::with_capacity(self.free.len());
        for name in &self.free {
            match assignment.get(name) {
                Some(&v) => values.push(v),
                None => return self.default_util,
            }
        }
        self.utility(&values)
    }

    /// Joins this space with others: constraint lists are pooled, variable
    /// partitions are merged by name, and default utilities are summed.
    /// Joining spaces with no variables at all degenerates to a scalar.
    pub fn join(&self, others: &[&SolutionSpace]) -> SolutionSpace {
        let mut all_doms = self.all_doms.clone();
        let mut free = self.free.clone();
        let mut projected = self.projected.clone();
        let mut sliced = self.sliced.clone();
        let mut util_var_names = self.util_var_names.clone();
        let mut default_util = self.default_util;
        let mut parts = vec![self.as_part()];

        for other in others {
            debug_assert_eq!(other.direction, self.direction, "joined spaces must agree on direction");
            default_util = default_util.add(other.default_util);
            for (k, v) in &other.all_doms {
                if !all_doms.contains_key(k) {
                    let _ = all_doms.insert(k.clone(), v.clone());
                }
            }
            for v in &other.free {
                if !free.contains(v) && !projected.contains(v) && !sliced.contains(v) {
                    free.push(v.clone());
                }
            }
            for v in &other.projected {
                debug_assert!(!free.contains(v), "projected variable {} re-enters a join scope", v);
                if !projected.contains(v) {
                    projected.push(v.clone());
                }
            }
            for v in &other.sliced {
                if !sliced.contains(v) {
                    sliced.push(v.clone());
                }
            }
            for u in &other.util_var_names {
                if !util_var_names.contains(u) {
                    util_var_names.push(u.clone());
                }
            }
            parts.push(other.as_part());
        }

        if all_doms.is_empty() {
            return SolutionSpace::scalar(format!("{}_joined", self.name), default_util, self.direction);
        }

        Self::assemble(
            format!("{}_joined", self.name),
            self.direction,
            default_util,
            self.infeasible_util,
            all_doms,
            free,
            projected,
            sliced,
            util_var_names,
            &parts,
        )
    }

    /// Moves variables from the free scope to the projected set. All
    /// projections of one space must share the optimization direction.
    /// Returns the reduced space together with the optimal-witness accessor.
    pub fn project(&self, vars: &[&str], maximize: bool) -> Result<ProjOutput> {
        let space = self.partition_move(vars, maximize)?;
        let assignments = OptAssignments::new(
            self.clone(),
            space.free.clone(),
            vars.iter().map(|v| (*v).to_owned()).collect(),
        );
        Ok(ProjOutput {
            space,
            vars: vars.iter().map(|v| (*v).to_owned()).collect(),
            assignments,
        })
    }

    /// Projection without witness recording.
    pub fn blind_project(&self, vars: &[&str], maximize: bool) -> Result<SolutionSpace> {
        self.partition_move(vars, maximize)
    }

    /// Projects out every free variable and returns the resulting optimum.
    pub fn blind_project_all(&mut self, maximize: bool) -> Result<Utility> {
        let free: Vec<String> = self.free.clone();
        let refs: Vec<&str> = free.iter().map(String::as_str).collect();
        let mut space = self.partition_move(&refs, maximize)?;
        Ok(space.utility(&[]))
    }

    fn partition_move(&self, vars: &[&str], maximize: bool) -> Result<SolutionSpace> {
        let requested = if maximize {
            Direction::Maximize
        } else {
            Direction::Minimize
        };
        if requested != self.direction {
            return Err(SolverError::MixedProjectionDirections.into());
        }

        let mut free = self.free.clone();
        let mut moved = self.projected.clone();
        free.retain(|v| !vars.contains(&v.as_str()));
        for v in vars {
            if self.free.iter().any(|f| f == v) && !moved.iter().any(|m| m == v) {
                moved.push((*v).to_owned());
            }
        }

        Ok(Self::assemble(
            format!("{}_projected", self.name),
            self.direction,
            self.default_util,
            self.infeasible_util,
            self.all_doms.clone(),
            free,
            moved,
            self.sliced.clone(),
            self.util_var_names.clone(),
            &[self.as_part()],
        ))
    }

    /// Conditions the space on fixed values for some free variables. The
    /// domains are narrowed in the bookkeeping map; propagation is deferred
    /// to the first utility query.
    pub fn slice(&self, names: &[&str], values: &[i64]) -> SolutionSpace {
        assert_eq!(names.len(), values.len(), "slice names and values must align");

        let mut all_doms = self.all_doms.clone();
        let mut free = self.free.clone();
        let mut sliced = self.sliced.clone();
        for (name, &value) in names.iter().zip(values) {
            if let Some(pos) = free.iter().position(|f| f == name) {
                let _ = free.remove(pos);
                sliced.push((*name).to_owned());
                let _ = all_doms.insert((*name).to_owned(), IntDomain::singleton(value));
            }
        }

        Self::assemble(
            format!("{}_sliced", self.name),
            self.direction,
            self.default_util,
            self.infeasible_util,
            all_doms,
            free,
            self.projected.clone(),
            sliced,
            self.util_var_names.clone(),
            &[self.as_part()],
        )
    }

    /// Transforms every utility into `utility * multiply + add`.
    ///
    /// Multiplying by 1 needs no store change; multiplying by a negative
    /// value flips the optimization direction. With N utility variables the
    /// store gains a sum variable and one multiplication propagator.
    pub fn rescale(&self, add: i64, multiply: i64) -> SolutionSpace {
        let mut out = self.clone();
        out.default_util = out.default_util.multiply(multiply).add(Utility::Finite(add));
        out.infeasible_util = out.infeasible_util.multiply(multiply);
        out.name = format!("{}_rescaled", self.name);

        if multiply == 1 || out.consistency == Some(false) {
            return out;
        }
        if multiply < 0 {
            out.direction = out.direction.flipped();
            out.infeasible_util = Utility::infeasible_for(out.direction);
        }

        let util_ids: Vec<VarId> = out
            .util_var_names
            .iter()
            .filter_map(|n| out.store.find_variable(n))
            .filter(|&v| !out.store.domain(v).is_empty())
            .collect();
        if util_ids.is_empty() {
            return out;
        }

        // Sum the utility variables (a single one is its own sum), then
        // multiply by the scalar into a fresh rescaled-utility variable.
        let sum_var = if util_ids.len() == 1 {
            util_ids[0]
        } else {
            let mut lo: i64 = 0;
            let mut hi: i64 = 0;
            for &v in &util_ids {
                lo = lo.saturating_add(out.store.domain(v).min().unwrap_or(0));
                hi = hi.saturating_add(out.store.domain(v).max().unwrap_or(0));
            }
            let name = out.store.fresh_name("util_sum");
            let sum_var = out.store.new_variable(name, IntDomain::bounds(lo, hi));
            let mut terms: Vec<(i64, Operand)> =
                util_ids.iter().map(|&v| (1, Operand::Var(v))).collect();
            terms.push((-1, Operand::Var(sum_var)));
            let _ = out
                .store
                .impose(Box::new(LinearInt::new(terms, RelOp::Eq, 0)));
            sum_var
        };

        let (slo, shi) = {
            let dom = out.store.domain(sum_var);
            (dom.min().unwrap_or(0), dom.max().unwrap_or(0))
        };
        let a = slo.saturating_mul(multiply);
        let b = shi.saturating_mul(multiply);
        let rescaled_name = format!("{}_rescaled", out.store.name(sum_var));
        let rescaled = out
            .store
            .new_variable(rescaled_name.clone(), IntDomain::bounds(a.min(b), a.max(b)));
        let _ = out.store.impose(Box::new(MulEq::new(
            Operand::Var(sum_var),
            Operand::Const(multiply),
            Operand::Var(rescaled),
        )));

        out.util_var_names = vec![rescaled_name];
        out.consistency = None;
        out.total_name = None;
        out
    }

    /// Materializes the space into an extensional (tuple-table) form by
    /// enumerating the free-variable cross product. Infeasible points are
    /// omitted from the table either way; `sparse` is accepted for API
    /// compatibility with callers distinguishing the two traversals.
    pub fn resolve(&self, sparse: bool) -> SolutionSpace {
        let _ = sparse;

        if self.free.is_empty() {
            let mut work = self.clone();
            let value = work.utility(&[]);
            return SolutionSpace::scalar(format!("{}_resolved", self.name), value, self.direction);
        }

        let mut work = self.clone();
        let domains: Vec<IntDomain> = self
            .free
            .iter()
            .map(|v| self.all_doms[v].clone())
            .collect();

        let mut tuples: Vec<Vec<i64>> = Vec::new();
        let mut util_values: Vec<i64> = Vec::new();
        for tuple in cross_product(&domains) {
            if let Utility::Finite(u) = work.utility(&tuple) {
                util_values.push(u);
                let mut full = tuple;
                full.push(u);
                tuples.push(full);
            }
        }

        let out_name = format!("{}_resolved", self.name);
        let mut store = Store::new();
        let mut vars = Vec::new();
        for (name, dom) in self.free.iter().zip(&domains) {
            vars.push(store.new_variable(name.clone(), dom.clone()));
        }
        let util_name = format!("util_{}", out_name);
        let util_var = store.new_variable(util_name.clone(), IntDomain::from_values(util_values));
        let mut table_vars = vars;
        table_vars.push(util_var);
        let table = crate::solver::constraints::table::TupleTable::new(&store, table_vars, &tuples);
        let _ = store.impose(Box::new(table));

        let all_doms = self
            .free
            .iter()
            .zip(&domains)
            .map(|(n, d)| (n.clone(), d.clone()))
            .collect();
        Self::from_extensional_parts(
            out_name,
            store,
            util_name,
            self.free.clone(),
            all_doms,
            self.direction,
        )
    }

    /// Renders the per-constraint propagation statistics of the underlying
    /// store.
    pub fn propagation_stats_table(&self) -> String {
        crate::solver::stats::render_stats_table(&self.store)
    }

    /// Utility-wise equality over the full cross product of this space's
    /// free variables.
    pub fn equivalent(&self, other: &SolutionSpace) -> bool {
        if self.free.len() != other.free.len() {
            return false;
        }
        let mut mine = self.clone();
        let mut theirs = other.clone();

        let domains: Vec<IntDomain> = self
            .free
            .iter()
            .map(|v| self.all_doms[v].clone())
            .collect();
        let order: Vec<String> = self.free.clone();

        for tuple in cross_product(&domains) {
            let assignment: HashMap<String, i64> =
                order.iter().cloned().zip(tuple.iter().copied()).collect();
            if mine.utility(&tuple) != theirs.utility_of(&assignment) {
                return false;
            }
        }
        true
    }
}

impl Clone for SolutionSpace {
    /// Produces a structurally simplified, independent copy: a fresh store
    /// with all variables re-created by name and every constraint cloned
    /// through the three-valued clone protocol.
    fn clone(&self) -> Self {
        let mut out = Self::assemble(
            self.name.clone(),
            self.direction,
            self.default_util,
            self.infeasible_util,
            self.all_doms.clone(),
            self.free.clone(),
            self.projected.clone(),
            self.sliced.clone(),
            self.util_var_names.clone(),
            &[self.as_part()],
        );
        out.consistency = match self.consistency {
            Some(false) => Some(false),
            _ => out.consistency,
        };
        out
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::{parse_predicate, parse_relation};

    /// A two-variable soft space from an extensional relation:
    /// (0,0) -> 5, (1,1) -> 7, everything else infeasible.
    fn small_space() -> SolutionSpace {
        let mut store = Store::new();
        let _ = store.new_variable("x", IntDomain::bounds(0, 1));
        let _ = store.new_variable("y", IntDomain::bounds(0, 1));
        let mut out = ParsedConstraints::new();
        parse_relation(&mut store, "r", &["x", "y"], "soft", None, "5: 0 0|7: 1 1", &mut out)
            .unwrap();
        SolutionSpace::from_parsed("small", &store, &out, &["x", "y"], Direction::Minimize)
    }

    /// A soft predicate space over x, y in 0..2 with utility x*y.
    fn product_space() -> SolutionSpace {
        let mut store = Store::new();
        let _ = store.new_variable("x", IntDomain::bounds(0, 2));
        let _ = store.new_variable("y", IntDomain::bounds(0, 2));
        let mut out = ParsedConstraints::new();
        parse_predicate(&mut store, "p", "x y", "int X0 int X1", "mul(X0,X1)", &mut out).unwrap();
        SolutionSpace::from_parsed("product", &store, &out, &["x", "y"], Direction::Minimize)
    }

    #[test]
    fn utility_reads_the_tuple_table() {
        let mut space = small_space();
        assert_eq!(space.utility(&[0, 0]), Utility::Finite(5));
        assert_eq!(space.utility(&[1, 1]), Utility::Finite(7));
        assert_eq!(space.utility(&[0, 1]), Utility::PlusInfinity);
    }

    #[test]
    fn utility_queries_leave_the_store_level_untouched() {
        let mut space = small_space();
        let _ = space.utility(&[0, 0]);
        let lvl = space.store.level();
        let _ = space.utility(&[1, 0]);
        assert_eq!(space.store.level(), lvl);
        assert_eq!(space.utility(&[0, 0]), Utility::Finite(5));
    }

    #[test]
    fn clone_is_independent() {
        let space = small_space();
        let mut copy = space.clone();
        let _ = copy.utility(&[0, 0]);
        // the original's store was never touched by the clone's queries
        assert_eq!(space.store.level(), 0);
        let mut original = space;
        assert_eq!(original.utility(&[1, 1]), Utility::Finite(7));
    }

    #[test]
    fn join_sums_constituent_utilities() {
        let a = small_space();
        let b = product_space();
        let mut joined = a.join(&[&b]);
        // (0,0): 5 + 0*0; (1,1): 7 + 1*1
        assert_eq!(joined.utility(&[0, 0]), Utility::Finite(5));
        assert_eq!(joined.utility(&[1, 1]), Utility::Finite(8));
        assert_eq!(joined.utility(&[1, 0]), Utility::PlusInfinity);
    }

    /// A soft predicate space over y, z in 0..1 with utility y+z.
    fn sum_space_yz() -> SolutionSpace {
        let mut store = Store::new();
        let _ = store.new_variable("y", IntDomain::bounds(0, 1));
        let _ = store.new_variable("z", IntDomain::bounds(0, 1));
        let mut out = ParsedConstraints::new();
        parse_predicate(&mut store, "q", "y z", "int X0 int X1", "add(X0,X1)", &mut out).unwrap();
        SolutionSpace::from_parsed("sum_yz", &store, &out, &["y", "z"], Direction::Minimize)
    }

    #[test]
    fn join_is_associative_and_sums_constituents() {
        let a = small_space();
        let b = sum_space_yz();
        let c = SolutionSpace::scalar("k", Utility::Finite(2), Direction::Minimize);

        let mut ab_c = a.join(&[&b]).join(&[&c]);
        let bc = b.join(&[&c]);
        let mut a_bc = a.join(&[&bc]);

        let mut a_alone = a.clone();
        let mut b_alone = b.clone();

        for x in 0..=1 {
            for y in 0..=1 {
                for z in 0..=1 {
                    let assignment: HashMap<String, i64> = [
                        ("x".to_owned(), x),
                        ("y".to_owned(), y),
                        ("z".to_owned(), z),
                    ]
                    .into_iter()
                    .collect();

                    let left = ab_c.utility_of(&assignment);
                    let right = a_bc.utility_of(&assignment);
                    assert_eq!(left, right, "associativity at ({}, {}, {})", x, y, z);

                    let parts = a_alone
                        .utility_of(&assignment)
                        .add(b_alone.utility_of(&assignment))
                        .add(Utility::Finite(2));
                    assert_eq!(left, parts, "sum of parts at ({}, {}, {})", x, y, z);
                }
            }
        }
    }

    #[test]
    fn join_with_scalar_sums_the_default() {
        let a = small_space();
        let scalar = SolutionSpace::scalar("s", Utility::Finite(10), Direction::Minimize);
        let mut joined = a.join(&[&scalar]);
        assert_eq!(joined.utility(&[0, 0]), Utility::Finite(15));
    }

    #[test]
    fn join_of_scalars_is_scalar() {
        let a = SolutionSpace::scalar("a", Utility::Finite(3), Direction::Minimize);
        let b = SolutionSpace::scalar("b", Utility::Finite(4), Direction::Minimize);
        let mut joined = a.join(&[&b]);
        assert!(joined.variables().is_empty());
        assert_eq!(joined.utility(&[]), Utility::Finite(7));
    }

    #[test]
    fn project_minimizes_over_the_eliminated_variable() {
        let space = product_space();
        let output = space.project(&["y"], false).unwrap();
        let mut projected = output.space;
        assert_eq!(projected.variables(), &["x".to_owned()]);
        // min over y of x*y is always 0 (y = 0)
        for x in 0..=2 {
            assert_eq!(projected.utility(&[x]), Utility::Finite(0));
        }
    }

    #[test]
    fn project_rejects_mixed_directions() {
        let space = product_space(); // minimizing
        assert!(space.project(&["y"], true).is_err());
    }

    #[test]
    fn project_witness_achieves_the_extremum() {
        let space = product_space();
        let output = space.project(&["y"], false).unwrap();
        let mut assignments = output.assignments;
        let witness = assignments.optimal_assignments(&[2]);
        assert_eq!(witness.len(), 1);
        // x=2: min of 2*y at y=0
        assert_eq!(witness[0], 0);
    }

    #[test]
    fn slice_grounds_variables_in_the_bookkeeping() {
        let space = small_space();
        let mut sliced = space.slice(&["y"], &[1]);
        assert_eq!(sliced.variables(), &["x".to_owned()]);
        assert_eq!(sliced.sliced_variables(), &["y".to_owned()]);
        assert_eq!(sliced.utility(&[1]), Utility::Finite(7));
        assert_eq!(sliced.utility(&[0]), Utility::PlusInfinity);
    }

    #[test]
    fn rescale_by_one_only_shifts_the_default() {
        let space = small_space();
        let mut scaled = space.rescale(3, 1);
        assert_eq!(scaled.utility(&[0, 0]), Utility::Finite(8));
    }

    #[test]
    fn rescale_multiplies_utilities() {
        let space = small_space();
        let mut scaled = space.rescale(0, 2);
        assert_eq!(scaled.utility(&[0, 0]), Utility::Finite(10));
        assert_eq!(scaled.utility(&[1, 1]), Utility::Finite(14));
    }

    #[test]
    fn rescale_by_negative_flips_the_direction() {
        let space = small_space();
        let scaled = space.rescale(0, -1);
        assert_eq!(scaled.direction(), Direction::Maximize);
        let mut scaled = scaled;
        assert_eq!(scaled.utility(&[0, 0]), Utility::Finite(-5));
        assert_eq!(scaled.utility(&[0, 1]), Utility::MinusInfinity);
    }

    #[test]
    fn rescale_handles_multiple_utility_variables() {
        let a = small_space();
        let b = product_space();
        let joined = a.join(&[&b]); // two utility variables
        let mut scaled = joined.rescale(1, 3);
        // (1,1): (7 + 1) * 3 + 1
        assert_eq!(scaled.utility(&[1, 1]), Utility::Finite(25));
    }

    #[test]
    fn resolve_round_trips_every_point() {
        let implicit = product_space();
        let mut resolved = implicit.resolve(true);
        let mut original = implicit.clone();
        for x in 0..=2 {
            for y in 0..=2 {
                assert_eq!(
                    resolved.utility(&[x, y]),
                    original.utility(&[x, y]),
                    "mismatch at ({}, {})",
                    x,
                    y
                );
            }
        }
    }

    #[test]
    fn resolve_matches_equivalent() {
        let implicit = small_space();
        let resolved = implicit.resolve(false);
        assert!(implicit.equivalent(&resolved));
    }

    #[test]
    fn statically_infeasible_space_reports_the_sentinel() {
        let mut store = Store::new();
        let _ = store.new_variable("x", IntDomain::bounds(0, 1));
        let mut out = ParsedConstraints::new();
        // gt(X0, 5) over x in 0..1 is trivially violated
        parse_predicate(&mut store, "dead", "x", "int X0", "gt(X0,5)", &mut out).unwrap();
        let mut space =
            SolutionSpace::from_parsed("dead", &store, &out, &["x"], Direction::Minimize);
        assert_eq!(space.utility(&[0]), Utility::PlusInfinity);
        assert_eq!(space.utility(&[1]), Utility::PlusInfinity);
    }
}
