//! Solspace is the local constraint-solving core of a distributed
//! constraint optimization (DCOP) framework.
//!
//! Agents in a DCOP own subsets of finite-domain integer variables and
//! cooperate through *solution spaces*: algebraic utility-function objects
//! backed by a private, backtrackable constraint [`Store`]. This crate
//! provides that store, the propagators and textual constraint parsers that
//! populate it, the solution-space algebra the DCOP algorithms manipulate,
//! and a lazy best-first iterator over a space's solutions.
//!
//! # Core Concepts
//!
//! - **[`Store`]**: an arena of named variables with level-based
//!   trial/undo and worklist propagation to a fixpoint.
//! - **[`Propagator`]**: an atomic constraint that tightens domains and can
//!   clone itself into another store, re-resolving its variables by name.
//! - **[`SolutionSpace`]**: a store plus a free/projected/sliced variable
//!   partition, supporting `join`, `project`, `slice`, `rescale`,
//!   `resolve` and utility queries.
//! - **[`parser`]**: compilers from the textual constraint formats
//!   (extensional relations, prefix-functional predicates, global
//!   constraints) into propagators.
//!
//! # Example: a soft binary relation
//!
//! ```
//! use solspace::parser::{parse_relation, ParsedConstraints};
//! use solspace::solver::{domain::IntDomain, search::Direction, store::Store};
//! use solspace::space::{SolutionSpace, Utility};
//!
//! let mut store = Store::new();
//! let _ = store.new_variable("x", IntDomain::bounds(0, 1));
//! let _ = store.new_variable("y", IntDomain::bounds(0, 1));
//!
//! let mut parsed = ParsedConstraints::new();
//! parse_relation(
//!     &mut store,
//!     "r",
//!     &["x", "y"],
//!     "soft",
//!     None,
//!     "5: 0 0|7: 1 1",
//!     &mut parsed,
//! )
//! .unwrap();
//!
//! let mut space =
//!     SolutionSpace::from_parsed("demo", &store, &parsed, &["x", "y"], Direction::Minimize);
//! assert_eq!(space.utility(&[0, 0]), Utility::Finite(5));
//! assert_eq!(space.utility(&[0, 1]), Utility::PlusInfinity);
//!
//! let mut iter = space.iter_best_first();
//! let (best, utility) = iter.next().unwrap();
//! assert_eq!(utility, Utility::Finite(5));
//! assert_eq!(best["x"], 0);
//! ```
//!
//! [`Store`]: solver::store::Store
//! [`Propagator`]: solver::constraint::Propagator
//! [`SolutionSpace`]: space::SolutionSpace

pub mod error;
pub mod parser;
pub mod solver;
pub mod space;
