//! CFG navigation helpers over deserialized bridge data.
//!
//! Provides traversal indices and a dominator computation over the CFG that
//! was built by go/ssa in the bridge. The walker uses `dominates` to tell
//! loop back-edges apart from ordinary branch merges.

use crate::ir::{BasicBlock, Function};
use std::collections::HashMap;

/// A traversable view of a function's CFG.
pub struct Cfg<'a> {
    func: &'a Function,
    successors: HashMap<u32, Vec<u32>>,
    predecessors: HashMap<u32, Vec<u32>>,
    block_map: HashMap<u32, &'a BasicBlock>,
    /// Immediate dominator per reachable block; the entry maps to itself.
    idom: HashMap<u32, u32>,
}

impl<'a> Cfg<'a> {
    /// Build traversal indices and dominators from a deserialized function.
    pub fn from_function(func: &'a Function) -> Self {
        let mut successors: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut predecessors: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut block_map = HashMap::new();

        for block in &func.blocks {
            block_map.insert(block.id, block);
            successors.entry(block.id).or_default();
            predecessors.entry(block.id).or_default();
        }

        for edge in &func.cfg_edges {
            successors
                .entry(edge.from_block)
                .or_default()
                .push(edge.to_block);
            predecessors
                .entry(edge.to_block)
                .or_default()
                .push(edge.from_block);
        }

        let mut cfg = Self {
            func,
            successors,
            predecessors,
            block_map,
            idom: HashMap::new(),
        };
        cfg.idom = cfg.compute_idoms();
        cfg
    }

    /// Entry block (always block 0 in go/ssa).
    pub fn entry_block(&self) -> Option<&'a BasicBlock> {
        self.block_map.get(&0).copied()
    }

    pub fn block(&self, id: u32) -> Option<&'a BasicBlock> {
        self.block_map.get(&id).copied()
    }

    pub fn successors(&self, block_id: u32) -> &[u32] {
        self.successors
            .get(&block_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn predecessors(&self, block_id: u32) -> &[u32] {
        self.predecessors
            .get(&block_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn block_count(&self) -> usize {
        self.func.blocks.len()
    }

    /// Reverse post-order from the entry block.
    pub fn reverse_postorder(&self) -> Vec<u32> {
        let mut visited = std::collections::HashSet::new();
        let mut postorder = Vec::new();
        if let Some(entry) = self.entry_block() {
            self.dfs_postorder(entry.id, &mut visited, &mut postorder);
        }
        postorder.reverse();
        postorder
    }

    fn dfs_postorder(
        &self,
        block_id: u32,
        visited: &mut std::collections::HashSet<u32>,
        postorder: &mut Vec<u32>,
    ) {
        if !visited.insert(block_id) {
            return;
        }
        for &succ in self.successors(block_id) {
            self.dfs_postorder(succ, visited, postorder);
        }
        postorder.push(block_id);
    }

    /// Iterative immediate-dominator computation (Cooper/Harvey/Kennedy)
    /// over reverse post-order. Unreachable blocks get no entry.
    fn compute_idoms(&self) -> HashMap<u32, u32> {
        let rpo = self.reverse_postorder();
        if rpo.is_empty() {
            return HashMap::new();
        }
        let entry = rpo[0];
        let order: HashMap<u32, usize> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut idom: HashMap<u32, u32> = HashMap::new();
        idom.insert(entry, entry);

        let intersect = |idom: &HashMap<u32, u32>, mut a: u32, mut b: u32| -> u32 {
            while a != b {
                while order[&a] > order[&b] {
                    a = idom[&a];
                }
                while order[&b] > order[&a] {
                    b = idom[&b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<u32> = None;
                for &pred in self.predecessors(block) {
                    if !idom.contains_key(&pred) {
                        continue; // not yet processed or unreachable
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => intersect(&idom, cur, pred),
                    });
                }
                if let Some(ni) = new_idom {
                    if idom.get(&block) != Some(&ni) {
                        idom.insert(block, ni);
                        changed = true;
                    }
                }
            }
        }

        idom
    }

    /// True if block `a` dominates block `b`. Every block dominates itself.
    pub fn dominates(&self, a: u32, b: u32) -> bool {
        if a == b {
            return true;
        }
        let mut current = b;
        loop {
            let Some(&parent) = self.idom.get(&current) else {
                return false; // b unreachable
            };
            if parent == current {
                return false; // reached entry
            }
            if parent == a {
                return true;
            }
            current = parent;
        }
    }

    /// True if the edge `from → to` is a loop back-edge: the target
    /// dominates the source.
    pub fn is_back_edge(&self, from: u32, to: u32) -> bool {
        self.dominates(to, from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    fn func_with_edges(block_ids: &[u32], edges: &[(u32, u32)]) -> Function {
        Function {
            name: "test.F".into(),
            short_name: "F".into(),
            blocks: block_ids
                .iter()
                .map(|&id| BasicBlock {
                    id,
                    ..Default::default()
                })
                .collect(),
            cfg_edges: edges
                .iter()
                .map(|&(from_block, to_block)| CfgEdge {
                    from_block,
                    to_block,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_linear_cfg() {
        let func = func_with_edges(&[0, 1, 2], &[(0, 1), (1, 2)]);
        let cfg = Cfg::from_function(&func);

        assert_eq!(cfg.block_count(), 3);
        assert_eq!(cfg.entry_block().unwrap().id, 0);
        assert_eq!(cfg.successors(0), &[1]);
        assert_eq!(cfg.predecessors(2), &[1]);
        assert!(cfg.dominates(0, 2));
        assert!(cfg.dominates(1, 2));
        assert!(!cfg.dominates(2, 1));
    }

    #[test]
    fn test_branch_dominators() {
        // 0 → {1, 2} → 3
        let func = func_with_edges(&[0, 1, 2, 3], &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let cfg = Cfg::from_function(&func);

        assert!(cfg.dominates(0, 3));
        assert!(!cfg.dominates(1, 3));
        assert!(!cfg.dominates(2, 3));
        assert!(!cfg.is_back_edge(1, 3));
        assert!(!cfg.is_back_edge(2, 3));
    }

    #[test]
    fn test_loop_back_edge() {
        // 0 → 1 (header) → 2 (body) → 1, 1 → 3 (exit)
        let func = func_with_edges(&[0, 1, 2, 3], &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let cfg = Cfg::from_function(&func);

        assert!(cfg.is_back_edge(2, 1));
        assert!(!cfg.is_back_edge(1, 2));
        assert!(!cfg.is_back_edge(0, 1));
        assert!(cfg.dominates(1, 2));
        assert!(cfg.dominates(1, 3));
    }

    #[test]
    fn test_reverse_postorder_starts_at_entry() {
        let func = func_with_edges(&[0, 1, 2, 3], &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let cfg = Cfg::from_function(&func);
        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo[0], 0);
        assert_eq!(rpo.len(), 4);
        // The merge block comes after both branches.
        let pos = |b: u32| rpo.iter().position(|&x| x == b).unwrap();
        assert!(pos(3) > pos(1));
        assert!(pos(3) > pos(2));
    }

    #[test]
    fn test_unreachable_block() {
        let func = func_with_edges(&[0, 1, 9], &[(0, 1)]);
        let cfg = Cfg::from_function(&func);
        assert!(!cfg.dominates(0, 9));
        assert!(!cfg.dominates(9, 0));
        assert!(cfg.dominates(9, 9)); // self-domination still holds
    }

    #[test]
    fn test_empty_function() {
        let func = Function::default();
        let cfg = Cfg::from_function(&func);
        assert!(cfg.entry_block().is_none());
        assert!(cfg.reverse_postorder().is_empty());
    }
}
