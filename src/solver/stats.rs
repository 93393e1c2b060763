use prettytable::{Cell, Row, Table};

use crate::solver::{search::SearchStats, store::Store};

/// Renders a per-constraint propagation summary for a store, sorted by time
/// spent.
pub fn render_stats_table(store: &Store) -> String {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Constraint Type"),
        Cell::new("ID"),
        Cell::new("Description"),
        Cell::new("Revisions"),
        Cell::new("Prunings"),
        Cell::new("Time / Call (µs)"),
        Cell::new("Total Time (ms)"),
    ]));

    let mut ids: Vec<usize> = (0..store.constraints().len()).collect();
    ids.sort_by_key(|&id| store.constraint_stats()[id].time_spent_micros);

    for id in ids {
        let descriptor = store.constraints()[id].descriptor();
        let stats = store.constraint_stats()[id];
        let avg_time = if stats.revisions > 0 {
            stats.time_spent_micros as f64 / stats.revisions as f64
        } else {
            0.0
        };

        table.add_row(Row::new(vec![
            Cell::new(&descriptor.name),
            Cell::new(&id.to_string()),
            Cell::new(&descriptor.description),
            Cell::new(&stats.revisions.to_string()),
            Cell::new(&stats.prunings.to_string()),
            Cell::new(&format!("{:.2}", avg_time)),
            Cell::new(&format!("{:.2}", stats.time_spent_micros as f64 / 1000.0)),
        ]));
    }

    table.to_string()
}

/// One-line summary of a search run.
pub fn summarize_search(stats: &SearchStats) -> String {
    format!(
        "{} nodes, {} backtracks, {} solutions",
        stats.nodes_visited, stats.backtracks, stats.solutions
    )
}
