//! Table ordering from foreign-key dependencies.
//!
//! Produces an order in which tables can be created and loaded without
//! referencing a table that does not exist yet. Best-effort: callers also
//! disable foreign-key enforcement for the duration of a dump or migration,
//! so a cycle degrades to the input order instead of failing.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Order tables so that every foreign-key target comes before its
/// dependents.
///
/// `deps` maps a table to the tables it references; targets outside the
/// input set are ignored. Kahn's algorithm over the depends-on graph,
/// in-degree counted as dependents pointing at a node; the pass yields
/// dependents first and is reversed at the end. If a cycle leaves the
/// sorted set short, the original input order is returned unchanged.
pub fn creation_order(tables: &[String], deps: &HashMap<String, BTreeSet<String>>) -> Vec<String> {
    let table_set: BTreeSet<&str> = tables.iter().map(String::as_str).collect();

    let mut incoming: BTreeMap<&str, usize> =
        tables.iter().map(|t| (t.as_str(), 0usize)).collect();
    for (table, targets) in deps {
        if !table_set.contains(table.as_str()) {
            continue;
        }
        for target in targets {
            if let Some(count) = incoming.get_mut(target.as_str()) {
                *count += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = incoming
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(table, _)| *table)
        .collect();
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut order: Vec<&str> = Vec::with_capacity(tables.len());

    while let Some(next) = queue.pop_front() {
        if !visited.insert(next) {
            continue;
        }
        order.push(next);
        if let Some(targets) = deps.get(next) {
            for target in targets {
                if let Some(count) = incoming.get_mut(target.as_str()) {
                    if *count > 0 {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(target.as_str());
                        }
                    }
                }
            }
        }
    }

    if order.len() < tables.len() {
        return tables.to_vec();
    }

    order.reverse();
    order.into_iter().map(str::to_string).collect()
}
