//! Variable-selection and value-ordering heuristics for the depth-first
//! search.

use crate::solver::{
    domain::IntDomain,
    search::Direction,
    store::{Store, VarId},
};

/// A strategy for choosing which unbound variable to branch on next.
pub trait VariableSelection: Send {
    /// Selects an unbound variable among `vars`, or `None` if all are
    /// grounded.
    fn select(&self, store: &Store, vars: &[VarId]) -> Option<VarId>;
}

/// Selects the first unbound variable, in the given order. Deterministic and
/// cheap.
#[derive(Debug, Default)]
pub struct SelectFirst;

impl VariableSelection for SelectFirst {
    fn select(&self, store: &Store, vars: &[VarId]) -> Option<VarId> {
        vars.iter()
            .copied()
            .find(|&v| !store.domain(v).is_singleton())
    }
}

/// The fail-first heuristic: selects the unbound variable with the smallest
/// domain, breaking ties by variable id for determinism.
#[derive(Debug, Default)]
pub struct SmallestDomain;

impl VariableSelection for SmallestDomain {
    fn select(&self, store: &Store, vars: &[VarId]) -> Option<VarId> {
        vars.iter()
            .copied()
            .filter(|&v| !store.domain(v).is_singleton())
            .min_by_key(|&v| (store.domain(v).size(), v))
    }
}

/// Selects an unbound variable at random; mostly useful with restarts.
#[derive(Debug, Default)]
pub struct RandomVariable;

impl VariableSelection for RandomVariable {
    fn select(&self, store: &Store, vars: &[VarId]) -> Option<VarId> {
        use rand::seq::IteratorRandom;

        vars.iter()
            .copied()
            .filter(|&v| !store.domain(v).is_singleton())
            .choose(&mut rand::thread_rng())
    }
}

/// A strategy for the order in which to try a variable's values.
pub trait ValueOrdering: Send {
    fn order(&self, domain: &IntDomain, direction: Direction) -> Vec<i64>;
}

/// Tries values from the optimization direction's best end: smallest first
/// when minimizing, largest first when maximizing.
#[derive(Debug, Default)]
pub struct BestBoundFirst;

impl ValueOrdering for BestBoundFirst {
    fn order(&self, domain: &IntDomain, direction: Direction) -> Vec<i64> {
        let mut values = domain.values();
        if direction == Direction::Maximize {
            values.reverse();
        }
        values
    }
}
