//! The serialized form of a solution space.
//!
//! Serialization is a lossy re-extensionalization: whatever the original
//! space was built from, its external form lists the free variables, their
//! domains, and the utility of every point of the cross product, and a
//! deserialized space is always backed by a tuple table.

use serde::{Deserialize, Serialize, Serializer};

use crate::{
    solver::{
        constraints::table::TupleTable,
        domain::{cross_product, IntDomain},
        search::Direction,
        store::Store,
    },
    space::{SolutionSpace, Utility},
};

#[derive(Debug, Serialize, Deserialize)]
pub struct ExternalSpace {
    pub name: String,
    pub maximize: bool,
    pub variables: Vec<String>,
    pub domains: Vec<Vec<i64>>,
    pub infeasible: Utility,
    /// Utilities over the cross product of the domains, in lexicographic
    /// order, last variable fastest.
    pub utilities: Vec<Utility>,
}

impl SolutionSpace {
    /// Enumerates this space into its external, purely extensional form.
    pub fn to_external(&self) -> ExternalSpace {
        let mut work = self.clone();
        let variables = self.variables().to_vec();
        let domains: Vec<Vec<i64>> = variables
            .iter()
            .map(|v| {
                self.domain(v)
                    .map(|d| d.values())
                    .unwrap_or_default()
            })
            .collect();

        let dom_objects: Vec<IntDomain> = domains
            .iter()
            .map(|vals| IntDomain::from_values(vals.iter().copied()))
            .collect();
        let utilities: Vec<Utility> = cross_product(&dom_objects)
            .map(|tuple| work.utility(&tuple))
            .collect();

        ExternalSpace {
            name: self.name().to_owned(),
            maximize: self.direction() == Direction::Maximize,
            variables,
            domains,
            infeasible: self.infeasible_utility(),
            utilities,
        }
    }

    /// Reconstructs a space from its external form. The result is always
    /// extensional: one tuple table over the listed variables.
    pub fn from_external(ext: ExternalSpace) -> SolutionSpace {
        let direction = if ext.maximize {
            Direction::Maximize
        } else {
            Direction::Minimize
        };

        if ext.variables.is_empty() {
            let value = ext.utilities.first().copied().unwrap_or(ext.infeasible);
            return SolutionSpace::scalar(ext.name, value, direction);
        }

        let mut store = Store::new();
        let mut vars = Vec::new();
        let mut all_doms = im::HashMap::new();
        for (name, values) in ext.variables.iter().zip(&ext.domains) {
            let dom = IntDomain::from_values(values.iter().copied());
            let _ = all_doms.insert(name.clone(), dom.clone());
            vars.push(store.new_variable(name.clone(), dom));
        }

        let dom_objects: Vec<IntDomain> = ext
            .domains
            .iter()
            .map(|vals| IntDomain::from_values(vals.iter().copied()))
            .collect();

        let mut tuples: Vec<Vec<i64>> = Vec::new();
        let mut util_values: Vec<i64> = Vec::new();
        for (tuple, util) in cross_product(&dom_objects).zip(&ext.utilities) {
            if let Utility::Finite(u) = util {
                util_values.push(*u);
                let mut full = tuple;
                full.push(*u);
                tuples.push(full);
            }
        }

        let util_name = format!("util_{}", ext.name);
        let util_var = store.new_variable(util_name.clone(), IntDomain::from_values(util_values));
        let mut table_vars = vars;
        table_vars.push(util_var);
        let table = TupleTable::new(&store, table_vars, &tuples);
        let _ = store.impose(Box::new(table));

        SolutionSpace::from_extensional_parts(
            ext.name,
            store,
            util_name,
            ext.variables,
            all_doms,
            direction,
        )
    }
}

impl Serialize for SolutionSpace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_external().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SolutionSpace {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ext = ExternalSpace::deserialize(deserializer)?;
        Ok(SolutionSpace::from_external(ext))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::{parse_predicate, ParsedConstraints};

    fn predicate_space() -> SolutionSpace {
        let mut store = Store::new();
        let _ = store.new_variable("x", IntDomain::bounds(0, 2));
        let _ = store.new_variable("y", IntDomain::bounds(0, 2));
        let mut out = ParsedConstraints::new();
        parse_predicate(&mut store, "p", "x y", "int X0 int X1", "add(X0,X1)", &mut out).unwrap();
        SolutionSpace::from_parsed("ser", &store, &out, &["x", "y"], Direction::Minimize)
    }

    #[test]
    fn round_trip_through_json_preserves_utilities() {
        let space = predicate_space();
        let json = serde_json::to_string(&space).unwrap();
        let mut restored: SolutionSpace = serde_json::from_str(&json).unwrap();

        let mut original = space.clone();
        for x in 0..=2 {
            for y in 0..=2 {
                assert_eq!(
                    restored.utility(&[x, y]),
                    original.utility(&[x, y]),
                    "mismatch at ({}, {})",
                    x,
                    y
                );
            }
        }
    }

    #[test]
    fn deserialized_spaces_are_extensional() {
        let space = predicate_space();
        let json = serde_json::to_string(&space).unwrap();
        let restored: SolutionSpace = serde_json::from_str(&json).unwrap();
        // A single tuple-table constraint, no decomposed predicates left.
        assert_eq!(restored.store().constraints().len(), 1);
        assert_eq!(
            restored.store().constraints()[0].descriptor().name,
            "TupleTable"
        );
    }

    #[test]
    fn infeasible_points_survive_the_round_trip() {
        let mut store = Store::new();
        let _ = store.new_variable("x", IntDomain::bounds(0, 1));
        let mut out = ParsedConstraints::new();
        crate::parser::parse_relation(&mut store, "r", &["x"], "soft", None, "2: 0", &mut out)
            .unwrap();
        let space = SolutionSpace::from_parsed("gap", &store, &out, &["x"], Direction::Minimize);

        let json = serde_json::to_string(&space).unwrap();
        let mut restored: SolutionSpace = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.utility(&[0]), Utility::Finite(2));
        assert_eq!(restored.utility(&[1]), Utility::PlusInfinity);
    }
}
