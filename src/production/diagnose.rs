//! Infeasibility diagnosis for the production table solver.
//!
//! When the primary solve fails, links are arranged into a dependency graph
//! (ingredient links point at product links through each row), strongly
//! connected components identify supply loops, and the model is re-solved
//! with penalty slacks on the candidate links. Links whose slack ends up
//! non-zero carry the imbalance attribution shown to the user.

use std::collections::{BTreeMap, BTreeSet};

use log::warn;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::cost::CostAnalysis;
use crate::project::{LinkId, ProjectPage, RowId, TableId};
use crate::solver::{Constraint, Problem, Solution, SolveStatus, Variable, DEFAULT_SEEDS};

use super::{LinkFlag, RowWarning, SolveError, SOLUTION_EPSILON};

/// Penalty slacks attached to one link, keyed by link id so iteration is
/// deterministic.
#[derive(Debug, Default, Clone, Copy)]
struct SlackVars {
    pos: Option<Variable>,
    neg: Option<Variable>,
}

fn cost_magnitude(costs: &CostAnalysis, page: &ProjectPage, link_id: LinkId) -> f64 {
    let goods = page.link(link_id).goods;
    let cost = costs.cost(goods).abs();
    if cost.is_finite() && cost > 0.0 {
        cost
    } else {
        1.0
    }
}

/// Collect deadlock candidates: for every non-trivial strongly connected
/// component, the last node of the component list produced by
/// [`tarjan_scc`], plus every node with a chord (an edge to a node more
/// than one position later in the same component list). Self-loops count as
/// non-trivial components.
fn deadlock_candidates(graph: &DiGraph<LinkId, ()>) -> BTreeSet<LinkId> {
    let mut deadlocks = BTreeSet::new();
    for component in tarjan_scc(graph) {
        if component.len() == 1 {
            let node = component[0];
            if graph.find_edge(node, node).is_some() {
                deadlocks.insert(graph[node]);
            }
            continue;
        }
        deadlocks.insert(graph[*component.last().expect("non-empty component")]);
        for (position, &from) in component.iter().enumerate() {
            for (later, &to) in component.iter().enumerate() {
                if later > position + 1 && graph.find_edge(from, to).is_some() {
                    deadlocks.insert(graph[from]);
                }
            }
        }
    }
    deadlocks
}

fn row_outputs(page: &ProjectPage, row_id: RowId) -> Vec<LinkId> {
    let links = &page.row(row_id).links;
    let mut outputs: Vec<LinkId> = links
        .products
        .iter()
        .flatten()
        .copied()
        .chain(links.spent_fuel)
        .collect();
    outputs.sort();
    outputs.dedup();
    outputs
}

fn row_inputs(page: &ProjectPage, row_id: RowId) -> Vec<LinkId> {
    let links = &page.row(row_id).links;
    let mut inputs: Vec<LinkId> = links
        .ingredients
        .iter()
        .flatten()
        .copied()
        .chain(links.fuel)
        .collect();
    inputs.sort();
    inputs.dedup();
    inputs
}

/// The row owning `table_id` as its subgroup, if the table is nested.
fn owning_row(page: &ProjectPage, table_id: TableId) -> Option<RowId> {
    let owner = page.table(table_id).owner?;
    page.table(owner)
        .rows
        .iter()
        .position(|row| row.subgroup == Some(table_id))
        .map(|index| RowId {
            table: owner,
            row: index as u32,
        })
}

/// Diagnose a failed solve and re-solve with penalty slacks. On success the
/// relaxed solution is returned and the affected links and rows carry their
/// attribution flags; when even the relaxed model fails, the terminal
/// status maps to the user-visible error.
pub(super) fn diagnose_and_relax(
    costs: &CostAnalysis,
    page: &mut ProjectPage,
    rows: &[RowId],
    links: &[LinkId],
    problem: &mut Problem,
    constraints: &BTreeMap<LinkId, Constraint>,
) -> Result<Solution, SolveError> {
    let mut graph: DiGraph<LinkId, ()> = DiGraph::new();
    let mut nodes: BTreeMap<LinkId, NodeIndex> = BTreeMap::new();
    for &link_id in links {
        nodes.insert(link_id, graph.add_node(link_id));
    }
    for &row_id in rows {
        let inputs = row_inputs(page, row_id);
        let outputs = row_outputs(page, row_id);
        for &input in &inputs {
            for &output in &outputs {
                graph.update_edge(nodes[&input], nodes[&output], ());
            }
        }
    }

    let deadlocks = deadlock_candidates(&graph);
    let mut splits: BTreeSet<LinkId> = BTreeSet::new();
    for &row_id in rows {
        let outputs = row_outputs(page, row_id);
        if outputs.len() > 1 {
            splits.extend(outputs);
        }
    }
    warn!(
        "diagnosis: {} deadlock candidates, {} split links",
        deadlocks.len(),
        splits.len()
    );

    let mut slacks: BTreeMap<LinkId, SlackVars> = BTreeMap::new();
    for &link_id in &deadlocks {
        let magnitude = cost_magnitude(costs, page, link_id);
        let neg = problem.make_var(0.0, f64::INFINITY);
        problem.add_coefficient(constraints[&link_id], neg, magnitude);
        problem.set_objective_coefficient(neg, 1.0);
        slacks.entry(link_id).or_default().neg = Some(neg);
    }
    for &link_id in &splits {
        let magnitude = cost_magnitude(costs, page, link_id);
        let pos = problem.make_var(0.0, f64::INFINITY);
        problem.add_coefficient(constraints[&link_id], pos, -magnitude);
        problem.set_objective_coefficient(pos, 1.0);
        slacks.entry(link_id).or_default().pos = Some(pos);
    }

    let solution = problem.solve_with_seeds(DEFAULT_SEEDS);
    if !solution.status().is_feasible() {
        return Err(match solution.status() {
            SolveStatus::Infeasible => SolveError::DeadlockLoops,
            SolveStatus::Abnormal => SolveError::NumericalErrors,
            other => SolveError::Unaccounted(other.token().to_string()),
        });
    }

    // Attribute the surviving imbalance: slack value scaled back to goods
    // units by the |cost| coefficient it carried.
    for (&link_id, slack) in &slacks {
        let pos = slack.pos.map(|v| solution.value(v)).unwrap_or(0.0);
        let neg = slack.neg.map(|v| solution.value(v)).unwrap_or(0.0);
        if pos.abs() < SOLUTION_EPSILON && neg.abs() < SOLUTION_EPSILON {
            continue;
        }
        let magnitude = cost_magnitude(costs, page, link_id);
        let link = page.link_mut(link_id);
        link.not_matched_flow = (pos - neg) * magnitude;
        link.flags |= LinkFlag::NotMatched | LinkFlag::RecursiveNotMatched;

        let warning = if link.not_matched_flow > 0.0 {
            RowWarning::OverproductionRequired
        } else {
            RowWarning::DeadlockCandidate
        };
        // Up the ownership chain: every row whose subgroup encloses the
        // imbalanced link inherits the warning.
        let mut table = link_id.table;
        while let Some(owner_row) = owning_row(page, table) {
            page.row_mut(owner_row).warning_flags |= warning;
            table = owner_row.table;
        }
    }

    // Then across every row touching a recursively-not-matched link.
    for &row_id in rows {
        let touched: Vec<LinkId> = page.row(row_id).links.iter().collect();
        for link_id in touched {
            let link = page.link(link_id);
            if !link.flags.contains(LinkFlag::RecursiveNotMatched) {
                continue;
            }
            let warning = if link.not_matched_flow > 0.0 {
                RowWarning::OverproductionRequired
            } else {
                RowWarning::DeadlockCandidate
            };
            page.row_mut(row_id).warning_flags |= warning;
        }
    }

    Ok(solution)
}
