//! Lock-order graph and cycle detection.
//!
//! An edge From→To records that To was acquired while From was held. A
//! cycle in this graph is a potential deadlock under concurrent execution.

use crate::context::MutexFieldKey;
use muguard_ir::ir::Span;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One acquired-while-holding observation.
#[derive(Debug, Clone)]
pub struct LockOrderEdge {
    pub from: MutexFieldKey,
    pub to: MutexFieldKey,
    /// Where the second lock was acquired.
    pub span: Option<Span>,
    /// Function containing the acquisition.
    pub func: String,
}

/// A sequence of edges forming a cycle, in acquisition order.
pub type LockOrderCycle = Vec<LockOrderEdge>;

/// Directed lock-order graph.
#[derive(Debug, Default)]
pub struct LockOrderGraph {
    edges: BTreeMap<MutexFieldKey, Vec<LockOrderEdge>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl LockOrderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge, deduplicating by (from, to, function).
    pub fn add_edge(&mut self, edge: LockOrderEdge) {
        let existing = self.edges.entry(edge.from.clone()).or_default();
        if existing
            .iter()
            .any(|e| e.to == edge.to && e.func == edge.func)
        {
            return;
        }
        existing.push(edge);
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|v| v.len()).sum()
    }

    /// Find all cycles using three-color DFS. Nodes and successors are
    /// visited in key order so the result is deterministic; the same cycle
    /// discovered from different starting points collapses to one entry.
    pub fn detect_cycles(&self) -> Vec<LockOrderCycle> {
        let mut color: HashMap<&MutexFieldKey, Color> = HashMap::new();
        let mut parent: HashMap<MutexFieldKey, LockOrderEdge> = HashMap::new();
        let mut cycles = Vec::new();

        // All nodes: edge sources and targets, in key order.
        let mut nodes: Vec<&MutexFieldKey> = self.edges.keys().collect();
        let mut targets: Vec<&MutexFieldKey> = self
            .edges
            .values()
            .flatten()
            .map(|e| &e.to)
            .collect();
        nodes.append(&mut targets);
        nodes.sort();
        nodes.dedup();
        for &node in &nodes {
            color.insert(node, Color::White);
        }

        for &node in &nodes {
            if color[node] == Color::White {
                self.dfs(node, &mut color, &mut parent, &mut cycles);
            }
        }

        deduplicate_cycles(cycles)
    }

    fn dfs<'g>(
        &'g self,
        node: &'g MutexFieldKey,
        color: &mut HashMap<&'g MutexFieldKey, Color>,
        parent: &mut HashMap<MutexFieldKey, LockOrderEdge>,
        cycles: &mut Vec<LockOrderCycle>,
    ) {
        color.insert(node, Color::Gray);

        let mut out: Vec<&LockOrderEdge> = self
            .edges
            .get(node)
            .map(|v| v.iter().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.to.cmp(&b.to));

        for edge in out {
            match color.get(&edge.to).copied().unwrap_or(Color::White) {
                Color::White => {
                    parent.insert(edge.to.clone(), edge.clone());
                    self.dfs(&edge.to, color, parent, cycles);
                }
                Color::Gray => {
                    if let Some(cycle) = extract_cycle(parent, edge) {
                        cycles.push(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        color.insert(node, Color::Black);
    }
}

/// Trace the parent map from the back-edge source back to its target to
/// rebuild the cycle, then reverse into acquisition order. A visited set
/// bails out if the parent chain is malformed.
fn extract_cycle(
    parent: &HashMap<MutexFieldKey, LockOrderEdge>,
    back_edge: &LockOrderEdge,
) -> Option<LockOrderCycle> {
    let mut cycle = vec![back_edge.clone()];
    let mut current = back_edge.from.clone();
    let mut visited = HashSet::new();

    while current != back_edge.to {
        if !visited.insert(current.clone()) {
            return None;
        }
        let edge = parent.get(&current)?;
        cycle.push(edge.clone());
        current = edge.from.clone();
    }

    cycle.reverse();
    Some(cycle)
}

/// Collapse cycles that contain the same edge sequence discovered from
/// different starting nodes, using the lexicographically minimal rotation
/// as the canonical key.
fn deduplicate_cycles(cycles: Vec<LockOrderCycle>) -> Vec<LockOrderCycle> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for cycle in cycles {
        let pairs: Vec<(MutexFieldKey, MutexFieldKey)> = cycle
            .iter()
            .map(|e| (e.from.clone(), e.to.clone()))
            .collect();

        let mut min_idx = 0;
        for i in 1..pairs.len() {
            if pairs[i] < pairs[min_idx] {
                min_idx = i;
            }
        }

        let canonical: Vec<(MutexFieldKey, MutexFieldKey)> = (0..pairs.len())
            .map(|i| pairs[(min_idx + i) % pairs.len()].clone())
            .collect();

        if seen.insert(canonical) {
            result.push(cycle);
        }
    }

    result
}
