//! The demand-driven best-first solution iterator.
//!
//! A dedicated worker thread owns a private clone of the space; the
//! consuming thread pulls solutions one at a time, best first. The two
//! sides meet on a pair of rendezvous channels: the worker parks between
//! requests, each request carries the caller's bound, and each reply
//! carries one solution — so at most one solution is ever outstanding and
//! no wakeup can be missed. Dropping the iterator closes the channels,
//! which the worker observes as an immediate abort that unwinds its
//! search.
//!
//! Each request runs a depth-first branch-and-bound pass over the free
//! variables; when the space has projected variables, every leaf launches
//! an inner search grounding them at a deeper store level to compute the
//! optimal completion, and rolls that level back before the outer search
//! resumes. The pass keeps the best solution strictly beyond the caller's
//! bound, so repeated calls with `bound` = the previously returned utility
//! enumerate all solutions in strictly improving-to-worsening best-first
//! order, ending with exhaustion; ties on utility are represented by a
//! single witness.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;

use tracing::debug;

use crate::{
    solver::{
        search::{Abort, DepthFirstSearch, Direction, SolutionControl},
        store::VarId,
    },
    space::{SolutionSpace, Utility},
};

/// The iterator's observable protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterState {
    Idle,
    Searching,
    SolutionReady,
    Exhausted,
}

/// A lazy iterator over a space's solutions, best first.
#[derive(Debug)]
pub struct BestFirstIter {
    solutions: Option<Receiver<Option<(Vec<i64>, i64)>>>,
    bounds: Option<SyncSender<Option<i64>>>,
    worker: Option<JoinHandle<()>>,
    state: IterState,
    vars: Vec<String>,
    direction: Direction,
    default_util: Utility,
    last_delivered: Option<Utility>,
}

impl SolutionSpace {
    /// Spawns the iterator's worker thread over an independent clone of
    /// this space. An infeasible space yields an already-exhausted
    /// iterator.
    pub fn iter_best_first(&self) -> BestFirstIter {
        let mut clone = self.clone();
        let vars = self.variables().to_vec();
        let direction = self.direction();
        let default_util = self.default_utility();

        if !clone.ensure_consistent() {
            debug!(space = %self.name(), "iterating an infeasible space: exhausted immediately");
            return BestFirstIter {
                solutions: None,
                bounds: None,
                worker: None,
                state: IterState::Exhausted,
                vars,
                direction,
                default_util,
                last_delivered: None,
            };
        }

        let total = clone.total_var();
        let free_ids: Vec<VarId> = clone
            .variables()
            .iter()
            .filter_map(|n| clone.store().find_variable(n))
            .collect();
        let projected_ids: Vec<VarId> = clone
            .projected_variables()
            .iter()
            .filter_map(|n| clone.store().find_variable(n))
            .collect();

        let (solution_tx, solution_rx) = sync_channel::<Option<(Vec<i64>, i64)>>(0);
        let (bound_tx, bound_rx) = sync_channel::<Option<i64>>(0);

        let worker = std::thread::spawn(move || {
            let mut store = clone.into_store();

            // One bounded search pass per request; the worker parks on the
            // bound channel in between.
            while let Ok(floor) = bound_rx.recv() {
                let mut best: Option<(Vec<i64>, i64)> = None;
                let mut search = DepthFirstSearch::new(direction);

                let outcome = search.iterate(
                    &mut store,
                    &free_ids,
                    &projected_ids,
                    total,
                    None,
                    &mut |store, cost| {
                        // A disconnected bound channel means the consumer is
                        // gone: abandon the search immediately.
                        if let Err(std::sync::mpsc::TryRecvError::Disconnected) =
                            bound_rx.try_recv()
                        {
                            return Err(Abort);
                        }
                        // Only solutions strictly beyond the caller's bound
                        // count; anything else neither updates the
                        // incumbent nor tightens the pruning bound.
                        let beyond = match (floor, direction) {
                            (None, _) => true,
                            (Some(f), Direction::Minimize) => cost > f,
                            (Some(f), Direction::Maximize) => cost < f,
                        };
                        if !beyond {
                            return Ok(SolutionControl::KeepBound);
                        }
                        let solution: Vec<i64> = free_ids
                            .iter()
                            .map(|&v| {
                                store
                                    .domain(v)
                                    .singleton_value()
                                    .expect("free variables are grounded in a solution")
                            })
                            .collect();
                        best = Some((solution, cost));
                        Ok(SolutionControl::NewBound(cost))
                    },
                );
                if outcome.is_err() {
                    return; // aborted by the consumer
                }

                // Deliver the best solution of this pass; a closed channel
                // means the consumer is gone.
                if solution_tx.send(best).is_err() {
                    return;
                }
            }
        });

        BestFirstIter {
            solutions: Some(solution_rx),
            bounds: Some(bound_tx),
            worker: Some(worker),
            state: IterState::Idle,
            vars,
            direction,
            default_util,
            last_delivered: None,
        }
    }
}

impl BestFirstIter {
    pub fn state(&self) -> IterState {
        self.state
    }

    /// The variables of each delivered solution, in order.
    pub fn variables(&self) -> &[String] {
        &self.vars
    }

    /// The direction in which the first solution is optimal.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Converts a caller-facing bound into the worker's internal cost
    /// scale (utilities carry the space's default, the search does not).
    fn internal_bound(&self, bound: Utility) -> Option<i64> {
        match (bound, self.direction) {
            (Utility::MinusInfinity, Direction::Minimize) => None,
            (Utility::PlusInfinity, Direction::Minimize) => Some(i64::MAX),
            (Utility::PlusInfinity, Direction::Maximize) => None,
            (Utility::MinusInfinity, Direction::Maximize) => Some(i64::MIN),
            (Utility::Finite(_), _) => bound
                .add(self.default_util.multiply(-1))
                .finite()
                .or(Some(0)),
        }
    }

    /// Delivers the best solution strictly beyond `bound`, or `None` once
    /// no such solution exists.
    ///
    /// Passing the previously returned utility enumerates solutions
    /// best-first without repetition: for a minimizing space, costs are
    /// strictly increasing from the optimum. Start from
    /// `Utility::MinusInfinity` when minimizing (`PlusInfinity` when
    /// maximizing) to place no restriction on the first solution.
    pub fn next_solution(&mut self, bound: Utility) -> Option<(HashMap<String, i64>, Utility)> {
        if self.state == IterState::Exhausted {
            return None;
        }

        let internal = self.internal_bound(bound);
        let Some(bounds) = &self.bounds else {
            self.state = IterState::Exhausted;
            return None;
        };
        if bounds.send(internal).is_err() {
            self.state = IterState::Exhausted;
            return None;
        }
        self.state = IterState::Searching;

        let received = self
            .solutions
            .as_ref()
            .and_then(|rx| rx.recv().ok())
            .flatten();

        match received {
            Some((values, cost)) => {
                self.state = IterState::SolutionReady;
                let utility = Utility::Finite(cost).add(self.default_util);
                self.last_delivered = Some(utility);
                let assignment: HashMap<String, i64> =
                    self.vars.iter().cloned().zip(values).collect();
                Some((assignment, utility))
            }
            None => {
                self.state = IterState::Exhausted;
                self.shutdown();
                None
            }
        }
    }

    /// Delivers the next-best solution, bounding by the previously
    /// delivered utility.
    pub fn next(&mut self) -> Option<(HashMap<String, i64>, Utility)> {
        let bound = self.last_delivered.unwrap_or(match self.direction {
            Direction::Minimize => Utility::MinusInfinity,
            Direction::Maximize => Utility::PlusInfinity,
        });
        self.next_solution(bound)
    }

    fn shutdown(&mut self) {
        // Closing the channels unblocks the worker, which treats it as an
        // abort; only then is the thread joined.
        drop(self.bounds.take());
        drop(self.solutions.take());
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BestFirstIter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        parser::{parse_relation, ParsedConstraints},
        solver::{domain::IntDomain, store::Store},
    };

    /// x, y in 0..1 with utilities 3, 5, 8 on three of the four tuples.
    fn space() -> SolutionSpace {
        let mut store = Store::new();
        let _ = store.new_variable("x", IntDomain::bounds(0, 1));
        let _ = store.new_variable("y", IntDomain::bounds(0, 1));
        let mut out = ParsedConstraints::new();
        parse_relation(
            &mut store,
            "r",
            &["x", "y"],
            "soft",
            None,
            "3: 0 0|5: 0 1|8: 1 0",
            &mut out,
        )
        .unwrap();
        SolutionSpace::from_parsed("iter", &store, &out, &["x", "y"], Direction::Minimize)
    }

    #[test]
    fn yields_all_solutions_best_first_then_exhausts() {
        let space = space();
        let mut iter = space.iter_best_first();
        assert_eq!(iter.state(), IterState::Idle);

        let mut utilities = Vec::new();
        while let Some((assignment, util)) = iter.next() {
            assert_eq!(assignment.len(), 2);
            utilities.push(util);
        }

        assert_eq!(
            utilities,
            vec![Utility::Finite(3), Utility::Finite(5), Utility::Finite(8)]
        );
        assert_eq!(iter.state(), IterState::Exhausted);
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn explicit_bound_skips_ahead() {
        let space = space();
        let mut iter = space.iter_best_first();
        let (_, util) = iter.next_solution(Utility::Finite(3)).expect("5 beats 3");
        assert_eq!(util, Utility::Finite(5));
        let (_, util) = iter.next().expect("8 remains");
        assert_eq!(util, Utility::Finite(8));
    }

    #[test]
    fn first_solution_is_the_optimum() {
        let space = space();
        let mut iter = space.iter_best_first();
        let (assignment, util) = iter.next_solution(Utility::MinusInfinity).expect("feasible");
        assert_eq!(util, Utility::Finite(3));
        assert_eq!(assignment["x"], 0);
        assert_eq!(assignment["y"], 0);
    }

    #[test]
    fn infeasible_space_exhausts_immediately() {
        let mut store = Store::new();
        let _ = store.new_variable("x", IntDomain::bounds(0, 1));
        let mut out = ParsedConstraints::new();
        // only infeasible tuples
        parse_relation(&mut store, "r", &["x"], "soft", None, "infinity: 0|infinity: 1", &mut out)
            .unwrap();
        let space = SolutionSpace::from_parsed("dead", &store, &out, &["x"], Direction::Minimize);
        let mut iter = space.iter_best_first();
        assert_eq!(iter.next(), None);
        assert_eq!(iter.state(), IterState::Exhausted);
    }

    #[test]
    fn dropping_mid_stream_terminates_the_worker() {
        let space = space();
        let baseline = space.store().level();
        {
            let mut iter = space.iter_best_first();
            let _ = iter.next();
            // iter dropped here with the worker parked
        }
        // The worker owned a clone; the consumer's space is untouched.
        assert_eq!(space.store().level(), baseline);
    }

    #[test]
    fn projected_variables_are_ground_by_the_slave_search() {
        let space = space();
        let output = space.project(&["y"], false).unwrap();
        let mut iter = output.space.iter_best_first();

        let mut utilities = Vec::new();
        while let Some((assignment, util)) = iter.next() {
            assert_eq!(assignment.len(), 1);
            assert!(assignment.contains_key("x"));
            utilities.push(util);
        }
        // x=0: best completion 3 (y=0); x=1: best completion 8 (y=0)
        assert_eq!(utilities, vec![Utility::Finite(3), Utility::Finite(8)]);
    }
}
