//! Textual constraint parsers.
//!
//! The surrounding problem parser hands this module the raw textual pieces
//! of each constraint: a scope, and either an extensional relation (tuple
//! list), a predicate (parameter lists plus a functional expression), or a
//! recognized global-constraint reference with its own parameter
//! micro-grammar. Each parser resolves variables in a store and appends to a
//! [`ParsedConstraints`] output triple.

pub mod predicate;

use tracing::debug;

use crate::{
    error::{Error, Result, SolverError},
    solver::{
        constraint::{Operand, Propagator},
        constraints::{
            all_different::AllDifferent,
            element::Element,
            linear::LinearInt,
            relation::RelOp,
            schedule::{Cumulative, Diff2},
            table::{TupleConflict, TupleSupport, TupleTable},
        },
        domain::{cross_product, IntDomain},
        store::{Store, VarId},
    },
};

pub use predicate::PredicateDef;

/// The output triple all parsers append to.
#[derive(Default)]
pub struct ParsedConstraints {
    pub constraints: Vec<Box<dyn Propagator>>,
    pub decomposed: Vec<PredicateDef>,
    pub util_vars: Vec<VarId>,
}

impl ParsedConstraints {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for ParsedConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedConstraints")
            .field("constraints", &self.constraints.len())
            .field("decomposed", &self.decomposed.len())
            .field("util_vars", &self.util_vars)
            .finish()
    }
}

/// One parsed tuple cost: either a finite cost or the infeasible marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TupleCost {
    Finite(i64),
    Infeasible,
}

fn parse_cost(text: &str) -> Result<TupleCost> {
    match text.trim() {
        "infinity" | "-infinity" => Ok(TupleCost::Infeasible),
        other => other
            .parse::<i64>()
            .map(TupleCost::Finite)
            .map_err(|_| SolverError::MalformedRelation(format!("bad cost `{}`", other)).into()),
    }
}

fn resolve_scope(store: &Store, scope: &[&str]) -> Result<Vec<VarId>> {
    scope
        .iter()
        .map(|name| {
            store.find_variable(name).ok_or_else(|| {
                Error::from(SolverError::MalformedRelation(format!(
                    "variable `{}` not found in the store",
                    name
                )))
            })
        })
        .collect()
}

/// Parses an extensional relation over `scope` and appends the resulting
/// constraint.
///
/// `tuples_text` lists tuples separated by `|`; a tuple may carry a
/// `cost:` prefix that also applies to the following tuples until changed.
/// With `semantics == "soft"`, an optional finite `default_cost` assigns a
/// cost to every unlisted tuple of the cross product. The hard semantics
/// `supports` and `conflicts` list allowed and forbidden tuples
/// respectively. Tuples whose values fell out of a variable's current
/// domain (after slicing) are skipped.
pub fn parse_relation(
    store: &mut Store,
    name: &str,
    scope: &[&str],
    semantics: &str,
    default_cost: Option<&str>,
    tuples_text: &str,
    out: &mut ParsedConstraints,
) -> Result<()> {
    let vars = resolve_scope(store, scope)?;
    let arity = vars.len();

    // Parse the raw tuple list, tracking the sticky cost prefix.
    let mut current_cost = TupleCost::Finite(0);
    let mut listed: Vec<(Vec<i64>, TupleCost)> = Vec::new();
    'tuples: for raw in tuples_text.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let values_text = match raw.split_once(':') {
            Some((cost, rest)) => {
                current_cost = parse_cost(cost)?;
                rest
            }
            None => raw,
        };
        let mut tuple = Vec::with_capacity(arity);
        for token in values_text.split_whitespace() {
            let value = token.parse::<i64>().map_err(|_| {
                SolverError::MalformedRelation(format!("bad tuple value `{}`", token))
            })?;
            tuple.push(value);
        }
        if tuple.len() != arity {
            return Err(SolverError::MalformedRelation(format!(
                "tuple `{}` does not match the scope arity {}",
                values_text.trim(),
                arity
            ))
            .into());
        }
        // Skip tuples no longer within the (possibly sliced) domains.
        for (&v, &value) in vars.iter().zip(&tuple) {
            if !store.domain(v).contains(value) {
                continue 'tuples;
            }
        }
        listed.push((tuple, current_cost));
    }

    match semantics {
        "soft" => {
            let default = match default_cost {
                None | Some("infinity") | Some("-infinity") => None,
                Some(text) => match parse_cost(text)? {
                    TupleCost::Finite(c) => Some(c),
                    TupleCost::Infeasible => None,
                },
            };

            let mut feasible: Vec<Vec<i64>> = Vec::new();
            let mut util_values: Vec<i64> = Vec::new();

            if let Some(default) = default {
                // Expand over the full cross product; listed tuples override
                // the default.
                let explicit: std::collections::HashMap<Vec<i64>, TupleCost> =
                    listed.into_iter().collect();
                let domains: Vec<IntDomain> =
                    vars.iter().map(|&v| store.domain(v).clone()).collect();
                util_values.push(default);
                for tuple in cross_product(&domains) {
                    match explicit.get(&tuple).copied() {
                        Some(TupleCost::Infeasible) => {}
                        Some(TupleCost::Finite(c)) => {
                            util_values.push(c);
                            let mut full = tuple;
                            full.push(c);
                            feasible.push(full);
                        }
                        None => {
                            let mut full = tuple;
                            full.push(default);
                            feasible.push(full);
                        }
                    }
                }
            } else {
                for (tuple, cost) in listed {
                    if let TupleCost::Finite(c) = cost {
                        util_values.push(c);
                        let mut full = tuple;
                        full.push(c);
                        feasible.push(full);
                    }
                }
            }

            let util_name = format!("util_{}", name);
            let util_dom = IntDomain::from_values(util_values);
            let util_var = store.find_or_create(&util_name, &util_dom);
            if store.domain(util_var).is_empty() {
                // The relation admits no feasible tuple at all; the empty
                // utility domain will fail the first search touching it.
                debug!(relation = name, "soft relation with no feasible tuples");
            } else {
                out.util_vars.push(util_var);
            }

            let mut all_vars = vars;
            all_vars.push(util_var);
            out.constraints
                .push(Box::new(TupleTable::new(store, all_vars, &feasible)));
            Ok(())
        }
        "supports" => {
            let tuples: Vec<Vec<i64>> = listed.into_iter().map(|(t, _)| t).collect();
            out.constraints.push(Box::new(TupleSupport::new(vars, tuples)));
            Ok(())
        }
        "conflicts" => {
            let tuples: Vec<Vec<i64>> = listed.into_iter().map(|(t, _)| t).collect();
            if !tuples.is_empty() {
                out.constraints
                    .push(Box::new(TupleConflict::new(vars, tuples)));
            }
            Ok(())
        }
        other => {
            Err(SolverError::MalformedRelation(format!("unknown semantics `{}`", other)).into())
        }
    }
}

/// Parses a predicate constraint.
///
/// The definition is lowered once against `store` to validate it and to
/// surface its utility variable; the propagators themselves travel as the
/// declarative [`PredicateDef`], re-lowered into every store the constraint
/// is cloned into.
pub fn parse_predicate(
    store: &mut Store,
    name: &str,
    constraint_params: &str,
    predicate_params: &str,
    expression: &str,
    out: &mut ParsedConstraints,
) -> Result<()> {
    let def = PredicateDef::new(name, constraint_params, predicate_params, expression);
    let lowering = def.lower(store)?;
    if let Some(util) = lowering.util_var {
        out.util_vars.push(util);
    }
    out.decomposed.push(def);
    Ok(())
}

/// A parameter token: an integer constant or a store variable.
fn operand_token(store: &Store, token: &str) -> Result<Operand> {
    if let Ok(c) = token.parse::<i64>() {
        return Ok(Operand::Const(c));
    }
    match store.find_variable(token) {
        Some(v) => Ok(Operand::Var(v)),
        None => Err(SolverError::UnknownParameter(token.to_owned()).into()),
    }
}

/// The text between the first `[` and its matching `]`, plus the remainder
/// after it.
fn bracketed(text: &str, reference: &str) -> Result<(String, String)> {
    let start = text.find('[').ok_or_else(|| {
        SolverError::MalformedGlobal {
            reference: reference.to_owned(),
            detail: "missing `[`".to_owned(),
        }
    })?;
    let mut depth = 0usize;
    for (i, c) in text.char_indices().skip(start) {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((
                        text[start + 1..i].to_owned(),
                        text[i + 1..].to_owned(),
                    ));
                }
            }
            _ => {}
        }
    }
    Err(SolverError::MalformedGlobal {
        reference: reference.to_owned(),
        detail: "unbalanced brackets".to_owned(),
    }
    .into())
}

/// Splits `{...} {...}` groups out of a parameter string.
fn brace_groups(text: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current = String::new();
    let mut inside = false;
    for c in text.chars() {
        match c {
            '{' => {
                inside = true;
                current.clear();
            }
            '}' => {
                if inside {
                    groups.push(current.clone());
                }
                inside = false;
            }
            _ => {
                if inside {
                    current.push(c);
                }
            }
        }
    }
    groups
}

/// Parses one of the recognized global constraints from its textual
/// parameters and appends the resulting propagator.
///
/// Grammars, with constants and variables disambiguated by integer syntax:
///
/// * `global:weightedSum` — `[{coef var} ...] rhs` plus a relational atom
///   (`eq`, `ne`, `ge`, `gt`, `le`, `lt`);
/// * `global:allDifferent` — `[var ...]`;
/// * `global:element` — `index [entry ...] value`, entries being constants,
///   `lo..hi` intervals, or variables;
/// * `global:cumulative` — `[{origin duration height} ...] limit` plus an
///   `eq` or `le` atom;
/// * `global:diff2` — `[[{x y} {w h}] ...]`.
pub fn parse_global_constraint(
    store: &mut Store,
    reference: &str,
    atom: Option<&str>,
    params: &str,
    out: &mut ParsedConstraints,
) -> Result<()> {
    let params = params.replace('\n', " ");
    let params = params.trim();

    match reference {
        "global:weightedSum" => {
            let (inner, rest) = bracketed(params, reference)?;
            let rhs = rest.trim().parse::<i64>().map_err(|_| {
                SolverError::MalformedGlobal {
                    reference: reference.to_owned(),
                    detail: format!("bad right-hand side `{}`", rest.trim()),
                }
            })?;

            let mut terms = Vec::new();
            for group in brace_groups(&inner) {
                let mut parts = group.split_whitespace();
                let (coef, term) = (parts.next(), parts.next());
                let (Some(coef), Some(term)) = (coef, term) else {
                    return Err(SolverError::MalformedGlobal {
                        reference: reference.to_owned(),
                        detail: format!("bad term `{{{}}}`", group),
                    }
                    .into());
                };
                let coef = coef.parse::<i64>().map_err(|_| {
                    SolverError::MalformedGlobal {
                        reference: reference.to_owned(),
                        detail: format!("bad coefficient `{}`", coef),
                    }
                })?;
                terms.push((coef, operand_token(store, term)?));
            }

            let op = match atom {
                Some("eq") => RelOp::Eq,
                Some("ne") => RelOp::Ne,
                Some("ge") => RelOp::Ge,
                Some("gt") => RelOp::Gt,
                Some("le") => RelOp::Le,
                Some("lt") => RelOp::Lt,
                other => {
                    return Err(SolverError::MalformedGlobal {
                        reference: reference.to_owned(),
                        detail: format!("bad relational atom {:?}", other),
                    }
                    .into())
                }
            };

            out.constraints
                .push(Box::new(LinearInt::new(terms, op, rhs)));
            Ok(())
        }
        "global:allDifferent" => {
            let (inner, _) = bracketed(params, reference)?;
            let mut vars = Vec::new();
            for token in inner.split_whitespace() {
                match operand_token(store, token)? {
                    Operand::Var(v) => vars.push(v),
                    Operand::Const(c) => {
                        // Constants participate as anonymous grounded vars.
                        let name = store.fresh_name("const");
                        vars.push(store.new_variable(name, IntDomain::singleton(c)));
                    }
                }
            }
            out.constraints.push(Box::new(AllDifferent::new(vars)));
            Ok(())
        }
        "global:element" => {
            let (list_text, rest) = bracketed(params, reference)?;
            let index_text = params
                .split('[')
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| SolverError::MalformedGlobal {
                    reference: reference.to_owned(),
                    detail: "missing index variable".to_owned(),
                })?;
            let index = operand_token(store, index_text)?;

            let mut entries = Vec::new();
            for token in list_text.split_whitespace() {
                if let Some((lo, hi)) = token.split_once("..") {
                    let (Ok(lo), Ok(hi)) = (lo.parse::<i64>(), hi.parse::<i64>()) else {
                        return Err(SolverError::MalformedGlobal {
                            reference: reference.to_owned(),
                            detail: format!("bad interval `{}`", token),
                        }
                        .into());
                    };
                    let name = store.fresh_name("elem");
                    entries.push(Operand::Var(
                        store.new_variable(name, IntDomain::bounds(lo, hi)),
                    ));
                } else {
                    entries.push(operand_token(store, token)?);
                }
            }

            let value = operand_token(store, rest.trim())?;
            out.constraints
                .push(Box::new(Element::new(index, entries, value)));
            Ok(())
        }
        "global:cumulative" => {
            let (inner, rest) = bracketed(params, reference)?;
            let limit = operand_token(store, rest.trim())?;
            let tight = match atom {
                Some("eq") => true,
                Some("le") => false,
                other => {
                    return Err(SolverError::MalformedGlobal {
                        reference: reference.to_owned(),
                        detail: format!("bad limit atom {:?} (expected eq or le)", other),
                    }
                    .into())
                }
            };

            let mut origins = Vec::new();
            let mut durations = Vec::new();
            let mut heights = Vec::new();
            for group in brace_groups(&inner) {
                let tokens: Vec<&str> = group.split_whitespace().collect();
                if tokens.len() != 3 {
                    return Err(SolverError::MalformedGlobal {
                        reference: reference.to_owned(),
                        detail: format!("task `{{{}}}` must have 3 fields", group),
                    }
                    .into());
                }
                origins.push(operand_token(store, tokens[0])?);
                durations.push(operand_token(store, tokens[1])?);
                heights.push(operand_token(store, tokens[2])?);
            }

            out.constraints.push(Box::new(Cumulative::new(
                origins, durations, heights, limit, tight,
            )));
            Ok(())
        }
        "global:diff2" => {
            let (inner, _) = bracketed(params, reference)?;
            let mut rects = Vec::new();
            let mut remaining = inner;
            while remaining.contains('[') {
                let (rect_text, rest) = bracketed(&remaining, reference)?;
                let groups = brace_groups(&rect_text);
                if groups.len() != 2 {
                    return Err(SolverError::MalformedGlobal {
                        reference: reference.to_owned(),
                        detail: format!("rectangle `[{}]` must have 2 groups", rect_text),
                    }
                    .into());
                }
                let origins: Vec<&str> = groups[0].split_whitespace().collect();
                let sizes: Vec<&str> = groups[1].split_whitespace().collect();
                if origins.len() != 2 || sizes.len() != 2 {
                    return Err(SolverError::MalformedGlobal {
                        reference: reference.to_owned(),
                        detail: "expected 2 dimensions".to_owned(),
                    }
                    .into());
                }
                rects.push([
                    operand_token(store, origins[0])?,
                    operand_token(store, origins[1])?,
                    operand_token(store, sizes[0])?,
                    operand_token(store, sizes[1])?,
                ]);
                remaining = rest;
            }
            out.constraints.push(Box::new(Diff2::new(rects)));
            Ok(())
        }
        other => Err(SolverError::UnsupportedGlobal(other.to_owned()).into()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn store_with(names: &[(&str, i64, i64)]) -> Store {
        let mut store = Store::new();
        for (name, lo, hi) in names {
            let _ = store.new_variable(*name, IntDomain::bounds(*lo, *hi));
        }
        store
    }

    #[test]
    fn soft_relation_builds_a_tuple_table_and_utility_variable() {
        let mut store = store_with(&[("x", 0, 1), ("y", 0, 1)]);
        let mut out = ParsedConstraints::new();
        parse_relation(
            &mut store,
            "r0",
            &["x", "y"],
            "soft",
            None,
            "5: 0 0|7: 1 1",
            &mut out,
        )
        .unwrap();

        assert_eq!(out.constraints.len(), 1);
        assert_eq!(out.util_vars.len(), 1);
        let util = store.find_variable("util_r0").expect("utility variable");
        assert_eq!(store.domain(util).values(), vec![5, 7]);
    }

    #[test]
    fn sticky_costs_apply_to_following_tuples() {
        let mut store = store_with(&[("x", 0, 2)]);
        let mut out = ParsedConstraints::new();
        parse_relation(&mut store, "r1", &["x"], "soft", None, "3: 0|1|2", &mut out).unwrap();
        let util = store.find_variable("util_r1").expect("utility variable");
        assert_eq!(store.domain(util).values(), vec![3]);
    }

    #[test]
    fn default_cost_expands_over_the_cross_product() {
        let mut store = store_with(&[("x", 0, 2)]);
        let mut out = ParsedConstraints::new();
        parse_relation(
            &mut store,
            "r2",
            &["x"],
            "soft",
            Some("1"),
            "9: 0|infinity: 2",
            &mut out,
        )
        .unwrap();
        let util = store.find_variable("util_r2").expect("utility variable");
        // x=0 costs 9, x=1 falls back to 1, x=2 is infeasible.
        assert_eq!(store.domain(util).values(), vec![1, 9]);
    }

    #[test]
    fn infinity_marks_tuples_infeasible() {
        let mut store = store_with(&[("x", 0, 1), ("y", 0, 1)]);
        let mut out = ParsedConstraints::new();
        parse_relation(
            &mut store,
            "r3",
            &["x", "y"],
            "soft",
            None,
            "-infinity: 0 0|4: 1 1",
            &mut out,
        )
        .unwrap();
        let util = store.find_variable("util_r3").expect("utility variable");
        assert_eq!(store.domain(util).values(), vec![4]);
    }

    #[test]
    fn unknown_semantics_is_an_error() {
        let mut store = store_with(&[("x", 0, 1)]);
        let mut out = ParsedConstraints::new();
        let err = parse_relation(&mut store, "r4", &["x"], "fuzzy", None, "0", &mut out);
        assert!(err.is_err());
    }

    #[test]
    fn weighted_sum_parses_coefficients_and_atom() {
        let mut store = store_with(&[("x", 0, 9), ("y", 0, 9)]);
        let mut out = ParsedConstraints::new();
        parse_global_constraint(
            &mut store,
            "global:weightedSum",
            Some("le"),
            "[{2 x} {-1 y}] 4",
            &mut out,
        )
        .unwrap();
        assert_eq!(out.constraints.len(), 1);
        assert_eq!(out.constraints[0].descriptor().name, "LinearInt");
    }

    #[test]
    fn all_different_parses_a_variable_list() {
        let mut store = store_with(&[("x", 0, 2), ("y", 0, 2)]);
        let mut out = ParsedConstraints::new();
        parse_global_constraint(&mut store, "global:allDifferent", None, "[x y 1]", &mut out)
            .unwrap();
        assert_eq!(out.constraints.len(), 1);
        // the constant 1 became an anonymous grounded variable
        assert_eq!(store.num_variables(), 3);
    }

    #[test]
    fn element_parses_index_list_and_value() {
        let mut store = store_with(&[("i", 1, 3), ("v", 0, 50)]);
        let mut out = ParsedConstraints::new();
        parse_global_constraint(&mut store, "global:element", None, "i [10 20 30] v", &mut out)
            .unwrap();
        assert_eq!(out.constraints.len(), 1);
        assert_eq!(out.constraints[0].descriptor().name, "Element");
    }

    #[test]
    fn unsupported_global_constraint_is_a_structured_error() {
        let mut store = Store::new();
        let mut out = ParsedConstraints::new();
        let err = parse_global_constraint(&mut store, "global:lexLess", None, "[]", &mut out)
            .unwrap_err();
        assert!(matches!(err.inner(), SolverError::UnsupportedGlobal(n) if n == "global:lexLess"));
    }

    #[test]
    fn cumulative_parses_tasks_and_limit() {
        let mut store = store_with(&[("s1", 0, 5), ("s2", 0, 5)]);
        let mut out = ParsedConstraints::new();
        parse_global_constraint(
            &mut store,
            "global:cumulative",
            Some("le"),
            "[{s1 3 1} {s2 2 2}] 2",
            &mut out,
        )
        .unwrap();
        assert_eq!(out.constraints.len(), 1);
        assert_eq!(out.constraints[0].descriptor().name, "Cumulative");
    }

    #[test]
    fn diff2_parses_rectangles() {
        let mut store = store_with(&[("x1", 0, 5), ("y1", 0, 5)]);
        let mut out = ParsedConstraints::new();
        parse_global_constraint(
            &mut store,
            "global:diff2",
            None,
            "[[{x1 y1} {2 2}] [{0 0} {1 1}]]",
            &mut out,
        )
        .unwrap();
        assert_eq!(out.constraints.len(), 1);
        assert_eq!(out.constraints[0].descriptor().name, "Diff2");
    }
}
