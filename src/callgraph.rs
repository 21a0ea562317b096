//! Call-Graph Builder and SCC Condenser.
//!
//! Built on `petgraph`, following `r3e-network-neo-decompiler`'s use of it
//! for the same kind of subroutine call-graph and strongly-connected-
//! component analysis.

use crate::instruction::{Offset, Opcode};
use crate::linker::Linked;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// A directed graph over subroutine-entry offsets.
#[derive(Debug)]
pub struct CallGraph {
    graph: DiGraph<Offset, ()>,
    node_of: HashMap<Offset, NodeIndex>,
}

impl CallGraph {
    fn node(&mut self, entry: Offset) -> NodeIndex {
        *self
            .node_of
            .entry(entry)
            .or_insert_with(|| self.graph.add_node(entry))
    }

    pub fn nodes(&self) -> impl Iterator<Item = Offset> + '_ {
        self.graph.node_indices().map(move |i| self.graph[i])
    }

    pub fn successors(&self, entry: Offset) -> Vec<Offset> {
        match self.node_of.get(&entry) {
            Some(&idx) => self
                .graph
                .neighbors(idx)
                .map(|n| self.graph[n])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every subroutine reachable from `entry` via zero or more calls,
    /// including `entry` itself.
    pub fn reachable_from(&self, entry: Offset) -> HashSet<Offset> {
        let mut seen = HashSet::new();
        let mut stack = vec![entry];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            stack.extend(self.successors(current));
        }
        seen
    }
}

/// Sweep every subroutine in `linked`, collecting a `JSR` edge from the
/// owning subroutine to each callee. Self-loops (direct recursion) are
/// recorded like any other edge.
pub fn build(linked: &Linked) -> CallGraph {
    let mut call_graph = CallGraph {
        graph: DiGraph::new(),
        node_of: HashMap::new(),
    };
    for &entry in &linked.entries {
        call_graph.node(entry);
    }
    for instr in &linked.instructions {
        if instr.opcode != Opcode::Jsr {
            continue;
        }
        let Some(caller) = linked.owner_of(instr.offset) else {
            continue;
        };
        let Some(callee) = instr.relative_target() else {
            continue;
        };
        let from = call_graph.node(caller);
        let to = call_graph.node(callee);
        call_graph.graph.add_edge(from, to, ());
    }
    call_graph
}

/// Tarjan's algorithm over the call graph, returned leaves-first: if SCC `A`
/// contains an edge to SCC `B` (A != B), `B` precedes `A` in the output.
/// `petgraph::algo::tarjan_scc` already returns components in
/// reverse topological order, so this is a thin typed wrapper.
pub fn scc_order(call_graph: &CallGraph) -> Vec<Vec<Offset>> {
    tarjan_scc(&call_graph.graph)
        .into_iter()
        .map(|component| component.into_iter().map(|idx| call_graph.graph[idx]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, Operand};

    fn jsr(offset: Offset, target: Offset, next: Offset) -> Instruction {
        Instruction {
            offset,
            opcode: Opcode::Jsr,
            type_byte: 0,
            operand: Operand::JumpOffset(target as i32 - next as i32),
            next_offset: next,
        }
    }

    fn retn(offset: Offset, next: Offset) -> Instruction {
        Instruction {
            offset,
            opcode: Opcode::Retn,
            type_byte: 0,
            operand: Operand::None,
            next_offset: next,
        }
    }

    #[test]
    fn builds_edges_and_reachability() {
        // main (0): JSR fn_A(10); RETN      fn_A (10): RETN
        let instructions = vec![jsr(0, 10, 5), retn(5, 6), retn(10, 11)];
        let linked = crate::linker::link(instructions).unwrap();
        let graph = build(&linked);
        assert_eq!(graph.successors(0), vec![10]);
        assert!(graph.reachable_from(0).contains(&10));
    }

    #[test]
    fn mutual_recursion_is_one_scc() {
        // fn_A (0): JSR fn_B(10); RETN     fn_B (10): JSR fn_A(0); RETN
        let instructions = vec![jsr(0, 10, 5), retn(5, 6), jsr(10, 0, 15), retn(15, 16)];
        let linked = crate::linker::link(instructions).unwrap();
        let graph = build(&linked);
        let sccs = scc_order(&graph);
        let containing_zero = sccs.iter().find(|c| c.contains(&0)).unwrap();
        assert!(containing_zero.contains(&10));
        assert_eq!(containing_zero.len(), 2);
    }

    #[test]
    fn leaves_come_before_callers() {
        let instructions = vec![jsr(0, 10, 5), retn(5, 6), retn(10, 11)];
        let linked = crate::linker::link(instructions).unwrap();
        let graph = build(&linked);
        let sccs = scc_order(&graph);
        let pos = |entry: Offset| sccs.iter().position(|c| c.contains(&entry)).unwrap();
        assert!(pos(10) < pos(0));
    }
}
