//! Extensional constraints backed by explicit tuple enumerations.
//!
//! [`TupleTable`] is the soft form: a flattened multi-dimensional utility
//! array over the cross product of the non-utility variables' domains as
//! captured at construction time, with per-variable value→index maps for
//! O(1) lookup. The array itself is immutable after construction and is
//! shared by reference across clones; only the index maps and variable
//! references are duplicated.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    error::Fail,
    solver::{
        constraint::{ConstraintDescriptor, Propagator},
        store::{PropCtx, Store, VarId},
    },
};

/// A soft extensional constraint: the last variable is the utility variable,
/// pinned to the utility of the tuple formed by the others.
#[derive(Debug)]
pub struct TupleTable {
    /// The scope; the last entry is the utility variable.
    vars: Vec<VarId>,
    /// For each non-utility variable, value → dimension index.
    index_maps: Vec<HashMap<i64, usize>>,
    /// Row-major strides per non-utility variable.
    strides: Vec<usize>,
    /// Utility per cell; `None` marks an infeasible tuple. Never mutated
    /// after construction, so clones share it.
    cells: Arc<Vec<Option<i64>>>,
}

impl TupleTable {
    /// Builds the table from the current domains of the non-utility
    /// variables. Each tuple lists the values of all variables, the utility
    /// last. Tuples whose values fell outside a captured domain are skipped.
    pub fn new(store: &Store, vars: Vec<VarId>, tuples: &[Vec<i64>]) -> Self {
        assert!(vars.len() >= 2, "a tuple table needs a scope and a utility variable");
        let scope = &vars[..vars.len() - 1];

        let mut index_maps = Vec::with_capacity(scope.len());
        let mut dims = Vec::with_capacity(scope.len());
        for &v in scope {
            let mut map = HashMap::new();
            for (i, value) in store.domain(v).iter().enumerate() {
                let _ = map.insert(value, i);
            }
            dims.push(map.len());
            index_maps.push(map);
        }

        let mut strides = vec![1usize; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }
        let size: usize = dims.iter().product();

        let mut cells: Vec<Option<i64>> = vec![None; size];
        'tuples: for tuple in tuples {
            debug_assert_eq!(tuple.len(), vars.len(), "tuple arity mismatch");
            let mut flat = 0usize;
            for (i, &value) in tuple[..scope.len()].iter().enumerate() {
                match index_maps[i].get(&value) {
                    Some(&idx) => flat += idx * strides[i],
                    None => continue 'tuples,
                }
            }
            cells[flat] = Some(tuple[scope.len()]);
        }

        Self {
            vars,
            index_maps,
            strides,
            cells: Arc::new(cells),
        }
    }

    fn util_var(&self) -> VarId {
        self.vars[self.vars.len() - 1]
    }
}

impl Propagator for TupleTable {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "TupleTable".to_owned(),
            description: format!(
                "table over {} variables, {} cells",
                self.vars.len() - 1,
                self.cells.len()
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        // Defer until every scope variable is grounded; the fixpoint brings
        // us back as search narrows them.
        let mut flat = 0usize;
        for (i, &v) in self.vars[..self.vars.len() - 1].iter().enumerate() {
            let Some(value) = ctx.value(v) else {
                return Ok(());
            };
            match self.index_maps[i].get(&value) {
                Some(&idx) => flat += idx * self.strides[i],
                None => return Err(Fail), // grounded outside the captured domain
            }
        }
        match self.cells.get(flat).copied().flatten() {
            Some(util) => ctx.assign(self.util_var(), util),
            None => Err(Fail), // infeasible tuple
        }
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
        for &v in &vars {
            if target.domain(v).is_empty() {
                return Err(Fail);
            }
        }
        Ok(Some(Box::new(Self {
            vars,
            index_maps: self.index_maps.clone(),
            strides: self.strides.clone(),
            cells: Arc::clone(&self.cells), // shared: never mutated after construction
        })))
    }
}

/// A hard extensional constraint listing the allowed tuples.
#[derive(Debug)]
pub struct TupleSupport {
    vars: Vec<VarId>,
    allowed: Arc<Vec<Vec<i64>>>,
}

impl TupleSupport {
    pub fn new(vars: Vec<VarId>, allowed: Vec<Vec<i64>>) -> Self {
        Self {
            vars,
            allowed: Arc::new(allowed),
        }
    }

    /// Whether a tuple matches the current singletons.
    fn compatible(&self, tuple: &[i64], ctx: &PropCtx) -> bool {
        self.vars
            .iter()
            .zip(tuple)
            .all(|(&v, &val)| match ctx.value(v) {
                Some(ground) => ground == val,
                None => ctx.domain(v).contains(val),
            })
    }
}

impl Propagator for TupleSupport {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "TupleSupport".to_owned(),
            description: format!(
                "supports over {} variables, {} tuples",
                self.vars.len(),
                self.allowed.len()
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        // Forward checking: keep only values that appear in some tuple
        // compatible with the current assignment.
        let mut supported: Vec<std::collections::HashSet<i64>> =
            vec![std::collections::HashSet::new(); self.vars.len()];
        for tuple in self.allowed.iter() {
            if self.compatible(tuple, ctx) {
                for (i, &val) in tuple.iter().enumerate() {
                    let _ = supported[i].insert(val);
                }
            }
        }
        for (i, &v) in self.vars.iter().enumerate() {
            let dom = crate::solver::domain::IntDomain::from_values(supported[i].iter().copied());
            ctx.restrict(v, &dom)?;
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
        Ok(Some(Box::new(Self {
            vars,
            allowed: Arc::clone(&self.allowed),
        })))
    }
}

/// A hard extensional constraint listing the forbidden tuples.
#[derive(Debug)]
pub struct TupleConflict {
    vars: Vec<VarId>,
    forbidden: Arc<Vec<Vec<i64>>>,
}

impl TupleConflict {
    pub fn new(vars: Vec<VarId>, forbidden: Vec<Vec<i64>>) -> Self {
        Self {
            vars,
            forbidden: Arc::new(forbidden),
        }
    }
}

impl Propagator for TupleConflict {
    fn variables(&self) -> &[VarId] {
        &self.vars
    }

    fn descriptor(&self) -> ConstraintDescriptor {
        ConstraintDescriptor {
            name: "TupleConflict".to_owned(),
            description: format!(
                "conflicts over {} variables, {} tuples",
                self.vars.len(),
                self.forbidden.len()
            ),
        }
    }

    fn propagate(&self, ctx: &mut PropCtx) -> Result<(), Fail> {
        'tuples: for tuple in self.forbidden.iter() {
            // A conflict tuple bites once all but at most one variable are
            // grounded to it: the remaining variable loses that value.
            let mut open: Option<(VarId, i64)> = None;
            for (&v, &val) in self.vars.iter().zip(tuple) {
                match ctx.value(v) {
                    Some(ground) if ground == val => {}
                    Some(_) => continue 'tuples,
                    None => {
                        if open.is_some() {
                            continue 'tuples;
                        }
                        open = Some((v, val));
                    }
                }
            }
            match open {
                None => return Err(Fail), // fully grounded onto a forbidden tuple
                Some((v, val)) => ctx.remove(v, val)?,
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
        Ok(Some(Box::new(Self {
            vars,
            forbidden: Arc::clone(&self.forbidden),
        })))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::solver::domain::IntDomain;

    fn two_var_table(store: &mut Store) -> (TupleTable, VarId, VarId, VarId) {
        let x = store.new_variable("x", IntDomain::bounds(0, 1));
        let y = store.new_variable("y", IntDomain::bounds(0, 1));
        let u = store.new_variable("u", IntDomain::from_values([5, 7]));
        let table = TupleTable::new(
            store,
            vec![x, y, u],
            &[vec![0, 0, 5], vec![1, 1, 7]],
        );
        (table, x, y, u)
    }

    #[test]
    fn grounding_the_scope_pins_the_utility() {
        let mut store = Store::new();
        let (table, x, y, u) = two_var_table(&mut store);

        store.ground(x, 0).unwrap();
        store.ground(y, 0).unwrap();
        store.with_ctx_for_tests(|ctx| table.propagate(ctx)).unwrap();
        assert_eq!(store.domain(u).values(), vec![5]);
    }

    #[test]
    fn infeasible_tuples_fail() {
        let mut store = Store::new();
        let (table, x, y, _) = two_var_table(&mut store);

        store.ground(x, 1).unwrap();
        store.ground(y, 0).unwrap();
        let result = store.with_ctx_for_tests(|ctx| table.propagate(ctx));
        assert_eq!(result, Err(Fail));
    }

    #[test]
    fn propagation_defers_until_grounded() {
        let mut store = Store::new();
        let (table, x, _, u) = two_var_table(&mut store);

        store.ground(x, 0).unwrap();
        store.with_ctx_for_tests(|ctx| table.propagate(ctx)).unwrap();
        // y is still open, so the utility must not have been pinned yet.
        assert_eq!(store.domain(u).values(), vec![5, 7]);
    }

    #[test]
    fn clones_share_the_cell_array() {
        let mut source = Store::new();
        let (table, _, _, _) = two_var_table(&mut source);

        let mut target = Store::new();
        let clone = table.clone_into(&source, &mut target).unwrap().expect("kept");
        let cloned_table = format!("{:?}", clone);
        assert!(cloned_table.contains("TupleTable"));
        assert_eq!(target.num_variables(), 3);
    }

    #[test]
    fn support_restricts_to_listed_values() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::bounds(0, 3));
        let y = store.new_variable("y", IntDomain::bounds(0, 3));
        let c = TupleSupport::new(vec![x, y], vec![vec![0, 1], vec![2, 3]]);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(x).values(), vec![0, 2]);
        assert_eq!(store.domain(y).values(), vec![1, 3]);
    }

    #[test]
    fn conflict_removes_the_last_open_value() {
        let mut store = Store::new();
        let x = store.new_variable("x", IntDomain::singleton(1));
        let y = store.new_variable("y", IntDomain::bounds(0, 2));
        let c = TupleConflict::new(vec![x, y], vec![vec![1, 2]]);
        store.with_ctx_for_tests(|ctx| c.propagate(ctx)).unwrap();
        assert_eq!(store.domain(y).values(), vec![0, 1]);
    }
}
