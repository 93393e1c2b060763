//! A small CLI around the solver: reads a JSON problem description, builds
//! a solution space over its variables, and prints the best assignments.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use solspace::{
    parser::{parse_global_constraint, parse_predicate, parse_relation, ParsedConstraints},
    solver::{domain::IntDomain, search::Direction, store::Store},
    space::SolutionSpace,
};

#[derive(Debug, Deserialize)]
struct RelationDef {
    name: String,
    scope: Vec<String>,
    semantics: String,
    #[serde(default)]
    default_cost: Option<String>,
    tuples: String,
}

#[derive(Debug, Deserialize)]
struct PredicateSpec {
    name: String,
    scope: String,
    params: String,
    expression: String,
}

#[derive(Debug, Deserialize)]
struct GlobalSpec {
    reference: String,
    #[serde(default)]
    atom: Option<String>,
    params: String,
}

#[derive(Debug, Deserialize)]
struct Problem {
    #[serde(default)]
    maximize: bool,
    variables: BTreeMap<String, Vec<i64>>,
    #[serde(default)]
    relations: Vec<RelationDef>,
    #[serde(default)]
    predicates: Vec<PredicateSpec>,
    #[serde(default)]
    globals: Vec<GlobalSpec>,
}

/// Solve a constraint optimization problem described in JSON.
#[derive(Debug, Parser)]
#[command(name = "solve")]
struct Args {
    /// Path to the problem file.
    problem: PathBuf,

    /// Enumerate every solution best-first instead of only the optimum.
    #[arg(long)]
    all: bool,

    /// Print the propagation statistics table after solving.
    #[arg(long)]
    stats: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let text = std::fs::read_to_string(&args.problem)?;
    let problem: Problem = serde_json::from_str(&text)?;

    let direction = if problem.maximize {
        Direction::Maximize
    } else {
        Direction::Minimize
    };

    let mut store = Store::new();
    for (name, values) in &problem.variables {
        let _ = store.new_variable(name.clone(), IntDomain::from_values(values.iter().copied()));
    }

    let mut parsed = ParsedConstraints::new();
    for relation in &problem.relations {
        let scope: Vec<&str> = relation.scope.iter().map(String::as_str).collect();
        parse_relation(
            &mut store,
            &relation.name,
            &scope,
            &relation.semantics,
            relation.default_cost.as_deref(),
            &relation.tuples,
            &mut parsed,
        )?;
    }
    for predicate in &problem.predicates {
        parse_predicate(
            &mut store,
            &predicate.name,
            &predicate.scope,
            &predicate.params,
            &predicate.expression,
            &mut parsed,
        )?;
    }
    for global in &problem.globals {
        parse_global_constraint(
            &mut store,
            &global.reference,
            global.atom.as_deref(),
            &global.params,
            &mut parsed,
        )?;
    }

    let scope: Vec<&str> = problem.variables.keys().map(String::as_str).collect();
    let space = SolutionSpace::from_parsed("problem", &store, &parsed, &scope, direction);

    let mut iter = space.iter_best_first();
    let mut found = false;
    while let Some((assignment, utility)) = iter.next() {
        found = true;
        let mut parts: Vec<String> = assignment
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        parts.sort();
        println!("utility {}: {}", utility, parts.join(" "));
        if !args.all {
            break;
        }
    }
    if !found {
        println!("infeasible");
    }

    if args.stats {
        println!("{}", space.propagation_stats_table());
    }

    Ok(())
}
