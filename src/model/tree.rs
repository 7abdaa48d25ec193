use std::collections::HashMap;

use super::view::{Expansion, SortState, matches_filter};
use crate::system::process::Process;

#[derive(Clone, Debug)]
pub struct ProcessTreeNode {
    pub process: Process,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// One visible row of the flattened tree.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeRow {
    pub process: Process,
    pub depth: usize,
    pub has_children: bool,
    pub expanded: bool,
    /// Own memory plus the memory of every descendant.
    pub subtree_memory_bytes: u64,
}

/// Parent/child forest rebuilt from one flat process list.
///
/// Nodes live in an arena in input order; `roots` and each node's `children`
/// hold arena indices, also in input order.
#[derive(Clone, Debug, Default)]
pub struct ProcessForest {
    nodes: Vec<ProcessTreeNode>,
    roots: Vec<usize>,
    lookup: HashMap<u32, usize>,
}

impl ProcessForest {
    /// Every process ends up in the forest exactly once. Missing parents and
    /// `ppid == 0` make a root. A parent cycle is cut at the member that comes
    /// last in the input, which becomes a root. Linear in the number of
    /// processes.
    pub fn build(processes: &[Process]) -> Self {
        let _span = tracing::debug_span!("tree.build", processes = processes.len()).entered();

        let mut nodes: Vec<ProcessTreeNode> = processes
            .iter()
            .map(|process| ProcessTreeNode {
                process: process.clone(),
                parent: None,
                children: Vec::new(),
            })
            .collect();

        // Duplicate pids resolve to their first occurrence.
        let mut lookup = HashMap::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            lookup.entry(node.process.pid).or_insert(idx);
        }

        let mut parents: Vec<Option<usize>> = nodes
            .iter()
            .map(|node| match node.process.ppid {
                0 => None,
                ppid => lookup.get(&ppid).copied(),
            })
            .collect();
        break_cycles(&mut parents);

        let mut roots = Vec::new();
        for (idx, parent) in parents.into_iter().enumerate() {
            match parent {
                Some(parent) => {
                    nodes[idx].parent = Some(parent);
                    nodes[parent].children.push(idx);
                }
                None => roots.push(idx),
            }
        }

        ProcessForest {
            nodes,
            roots,
            lookup,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &ProcessTreeNode> {
        self.roots.iter().map(|&idx| &self.nodes[idx])
    }

    pub fn root_pids(&self) -> Vec<u32> {
        self.roots().map(|n| n.process.pid).collect()
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessTreeNode> {
        self.lookup.get(&pid).map(|&idx| &self.nodes[idx])
    }

    pub fn children<'a>(
        &'a self,
        node: &'a ProcessTreeNode,
    ) -> impl Iterator<Item = &'a ProcessTreeNode> {
        node.children.iter().map(|&idx| &self.nodes[idx])
    }

    pub fn child_pids(&self, pid: u32) -> Vec<u32> {
        self.get(pid)
            .map(|node| self.children(node).map(|c| c.process.pid).collect())
            .unwrap_or_default()
    }

    /// Visible rows in display order.
    ///
    /// Roots and siblings are ordered by `sort`; a child always follows its
    /// parent and is only emitted when the parent is expanded. A non-empty
    /// `filter_text` keeps matching nodes plus their ancestors, and shows
    /// those ancestors expanded.
    pub fn flatten(&self, sort: SortState, filter_text: &str, expansion: &Expansion) -> Vec<TreeRow> {
        let _span = tracing::debug_span!("tree.flatten", nodes = self.nodes.len()).entered();

        let needle = filter_text.to_lowercase();
        let filtering = !needle.is_empty();
        let visible = if filtering {
            self.matching_subtrees(&needle)
        } else {
            vec![true; self.nodes.len()]
        };
        let subtree_memory = self.subtree_memory();

        let mut roots: Vec<usize> = self.roots.iter().copied().filter(|&i| visible[i]).collect();
        self.sort_indices(&mut roots, sort);

        let mut rows = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = roots.into_iter().rev().map(|i| (i, 0)).collect();

        while let Some((idx, depth)) = stack.pop() {
            let node = &self.nodes[idx];
            let mut kids: Vec<usize> = node.children.iter().copied().filter(|&c| visible[c]).collect();
            let expanded = filtering || expansion.is_expanded(node.process.pid);

            rows.push(TreeRow {
                process: node.process.clone(),
                depth,
                has_children: !kids.is_empty(),
                expanded,
                subtree_memory_bytes: subtree_memory[idx],
            });

            if expanded && !kids.is_empty() {
                self.sort_indices(&mut kids, sort);
                stack.extend(kids.into_iter().rev().map(|c| (c, depth + 1)));
            }
        }

        rows
    }

    fn sort_indices(&self, indices: &mut [usize], sort: SortState) {
        indices.sort_by(|&a, &b| sort.compare(&self.nodes[a].process, &self.nodes[b].process));
    }

    /// Arena indices with every parent before its children.
    fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(self.nodes[idx].children.iter().rev().copied());
        }
        order
    }

    fn subtree_memory(&self) -> Vec<u64> {
        let mut totals: Vec<u64> = self.nodes.iter().map(|n| n.process.memory_bytes).collect();
        for idx in self.preorder().into_iter().rev() {
            if let Some(parent) = self.nodes[idx].parent {
                totals[parent] = totals[parent].saturating_add(totals[idx]);
            }
        }
        totals
    }

    fn matching_subtrees(&self, needle_lower: &str) -> Vec<bool> {
        let mut visible = vec![false; self.nodes.len()];
        for idx in self.preorder().into_iter().rev() {
            if visible[idx] || matches_filter(&self.nodes[idx].process, needle_lower) {
                visible[idx] = true;
                if let Some(parent) = self.nodes[idx].parent {
                    visible[parent] = true;
                }
            }
        }
        visible
    }
}

/// Cut every parent cycle at its member with the highest arena index.
///
/// Each node has at most one parent, so every cycle is found by one walk up
/// from some unvisited node; a node is visited at most once overall.
fn break_cycles(parents: &mut [Option<usize>]) {
    const UNSEEN: u8 = 0;
    const ON_PATH: u8 = 1;
    const DONE: u8 = 2;

    let mut mark = vec![UNSEEN; parents.len()];
    let mut path = Vec::new();
    for start in 0..parents.len() {
        let mut cursor = Some(start);
        while let Some(idx) = cursor {
            match mark[idx] {
                UNSEEN => {
                    mark[idx] = ON_PATH;
                    path.push(idx);
                    cursor = parents[idx];
                }
                ON_PATH => {
                    let entry = path.iter().rposition(|&p| p == idx).unwrap_or(0);
                    if let Some(&cut) = path[entry..].iter().max() {
                        parents[cut] = None;
                    }
                    break;
                }
                _ => break,
            }
        }
        for idx in path.drain(..) {
            mark[idx] = DONE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::view::SortKey;

    fn proc(pid: u32, ppid: u32, name: &str) -> Process {
        Process {
            pid,
            ppid,
            name: name.to_string(),
            ..Process::default()
        }
    }

    fn by_pid() -> SortState {
        SortState::new(SortKey::Pid, false)
    }

    fn row_pids(rows: &[TreeRow]) -> Vec<(u32, usize)> {
        rows.iter().map(|r| (r.process.pid, r.depth)).collect()
    }

    #[test]
    fn orphan_is_promoted_to_root() {
        let forest = ProcessForest::build(&[proc(1, 0, "a"), proc(2, 1, "b"), proc(3, 99, "c")]);
        assert_eq!(forest.root_pids(), vec![1, 3]);
        assert_eq!(forest.child_pids(1), vec![2]);
        assert_eq!(forest.len(), 3);
    }

    #[test]
    fn child_listed_before_parent_still_attaches() {
        let forest = ProcessForest::build(&[proc(5, 4, "child"), proc(4, 0, "parent")]);
        assert_eq!(forest.root_pids(), vec![4]);
        assert_eq!(forest.child_pids(4), vec![5]);
    }

    #[test]
    fn children_keep_input_order() {
        let forest = ProcessForest::build(&[
            proc(1, 0, "root"),
            proc(9, 1, "z"),
            proc(3, 1, "a"),
            proc(6, 1, "m"),
        ]);
        assert_eq!(forest.child_pids(1), vec![9, 3, 6]);
    }

    #[test]
    fn two_process_cycle_keeps_both() {
        let forest = ProcessForest::build(&[proc(1, 2, "a"), proc(2, 1, "b")]);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest.root_pids(), vec![2]);
        assert_eq!(forest.child_pids(2), vec![1]);
    }

    #[test]
    fn self_parent_becomes_root() {
        let forest = ProcessForest::build(&[proc(7, 7, "loop")]);
        assert_eq!(forest.root_pids(), vec![7]);
        assert!(forest.child_pids(7).is_empty());
    }

    #[test]
    fn longer_cycle_is_broken_once() {
        let forest = ProcessForest::build(&[proc(1, 3, "a"), proc(2, 1, "b"), proc(3, 2, "c")]);
        let rows = forest.flatten(by_pid(), "", &Expansion::all_expanded());
        assert_eq!(rows.len(), 3);
        assert_eq!(forest.root_pids(), vec![3]);
    }

    #[test]
    fn cycle_is_cut_at_its_last_listed_member() {
        // 1 -> 3 -> 2 -> 1 is a parent cycle; 4 hangs off it and stays attached.
        let forest = ProcessForest::build(&[
            proc(4, 2, "tail"),
            proc(3, 2, "c"),
            proc(1, 3, "a"),
            proc(2, 1, "b"),
        ]);
        assert_eq!(forest.root_pids(), vec![2]);
        assert_eq!(forest.child_pids(2), vec![4, 3]);
        assert_eq!(forest.child_pids(3), vec![1]);
        assert!(forest.child_pids(1).is_empty());
    }

    #[test]
    fn separate_cycles_each_get_one_root() {
        let forest = ProcessForest::build(&[
            proc(1, 2, "a"),
            proc(2, 1, "b"),
            proc(5, 6, "x"),
            proc(6, 5, "y"),
            proc(9, 0, "init"),
        ]);
        assert_eq!(forest.root_pids(), vec![2, 6, 9]);
        assert_eq!(forest.len(), 5);
    }

    #[test]
    fn long_chain_builds_and_flattens() {
        const DEPTH: u32 = 100_000;
        let chain: Vec<Process> = (1..=DEPTH).map(|pid| proc(pid, pid - 1, "link")).collect();
        let forest = ProcessForest::build(&chain);
        assert_eq!(forest.root_pids(), vec![1]);
        assert_eq!(forest.child_pids(DEPTH - 1), vec![DEPTH]);

        let rows = forest.flatten(by_pid(), "", &Expansion::all_expanded());
        assert_eq!(rows.len(), DEPTH as usize);
        assert_eq!(rows.last().map(|r| r.depth), Some(DEPTH as usize - 1));
    }

    #[test]
    fn long_chain_closed_into_a_cycle() {
        const DEPTH: u32 = 50_000;
        let mut chain: Vec<Process> = (1..=DEPTH).map(|pid| proc(pid, pid - 1, "link")).collect();
        chain[0].ppid = DEPTH;
        let forest = ProcessForest::build(&chain);
        assert_eq!(forest.len(), DEPTH as usize);
        assert_eq!(forest.root_pids(), vec![DEPTH]);
        assert_eq!(forest.child_pids(DEPTH), vec![1]);
    }

    #[test]
    fn duplicate_pids_are_all_kept() {
        let mut thread = proc(10, 1, "worker");
        thread.is_thread = true;
        let forest = ProcessForest::build(&[
            proc(1, 0, "init"),
            proc(10, 1, "worker"),
            thread,
            proc(11, 10, "grandchild"),
        ]);
        assert_eq!(forest.len(), 4);
        assert_eq!(forest.child_pids(1), vec![10, 10]);
        assert_eq!(forest.child_pids(10), vec![11]);
        assert!(!forest.get(10).unwrap().process.is_thread);
    }

    #[test]
    fn flatten_sorts_siblings_but_keeps_hierarchy() {
        let mut procs = vec![
            proc(1, 0, "root-a"),
            proc(2, 1, "a-low"),
            proc(3, 1, "a-high"),
            proc(4, 0, "root-b"),
            proc(5, 3, "grandchild"),
        ];
        procs[0].cpu_percent = 1.0;
        procs[1].cpu_percent = 2.0;
        procs[2].cpu_percent = 40.0;
        procs[3].cpu_percent = 10.0;
        procs[4].cpu_percent = 99.0;

        let forest = ProcessForest::build(&procs);
        let rows = forest.flatten(SortState::new(SortKey::Cpu, true), "", &Expansion::default());
        assert_eq!(
            row_pids(&rows),
            vec![(4, 0), (1, 0), (3, 1), (5, 2), (2, 1)]
        );
    }

    #[test]
    fn collapsed_nodes_hide_descendants() {
        let forest = ProcessForest::build(&[
            proc(1, 0, "root"),
            proc(2, 1, "child"),
            proc(3, 2, "grandchild"),
        ]);
        let mut expansion = Expansion::all_expanded();
        expansion.toggle(2);
        let rows = forest.flatten(by_pid(), "", &expansion);
        assert_eq!(row_pids(&rows), vec![(1, 0), (2, 1)]);
        assert!(rows[1].has_children);
        assert!(!rows[1].expanded);

        let rows = forest.flatten(by_pid(), "", &Expansion::all_collapsed());
        assert_eq!(row_pids(&rows), vec![(1, 0)]);
    }

    #[test]
    fn filter_keeps_ancestors_of_matches() {
        let forest = ProcessForest::build(&[
            proc(1, 0, "launchd"),
            proc(2, 1, "Terminal"),
            proc(3, 2, "zsh"),
            proc(4, 1, "chrome"),
            proc(5, 0, "kernel_task"),
        ]);
        let rows = forest.flatten(by_pid(), "ZSH", &Expansion::all_collapsed());
        assert_eq!(row_pids(&rows), vec![(1, 0), (2, 1), (3, 2)]);
        assert!(rows[0].expanded);
        assert!(!rows[2].has_children);
    }

    #[test]
    fn subtree_memory_sums_descendants() {
        let mut procs = vec![
            proc(1, 0, "parent"),
            proc(2, 1, "child_a"),
            proc(3, 1, "child_b"),
            proc(4, 2, "grandchild"),
        ];
        for (p, mem) in procs.iter_mut().zip([100, 50, 50, 25]) {
            p.memory_bytes = mem;
        }
        let forest = ProcessForest::build(&procs);
        let rows = forest.flatten(by_pid(), "", &Expansion::default());
        let sizes: Vec<(u32, u64)> = rows
            .iter()
            .map(|r| (r.process.pid, r.subtree_memory_bytes))
            .collect();
        assert_eq!(sizes, vec![(1, 225), (2, 75), (4, 25), (3, 50)]);
    }

    #[test]
    fn empty_input_builds_empty_forest() {
        let forest = ProcessForest::build(&[]);
        assert!(forest.is_empty());
        assert!(forest.flatten(by_pid(), "", &Expansion::default()).is_empty());
    }
}
