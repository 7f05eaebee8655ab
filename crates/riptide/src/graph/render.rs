//! Textual and graphviz renderings of the graph.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::ir::stmt::TaskType;

use super::{NodeId, StateFlowGraph};

impl StateFlowGraph {
    /// Dumps the node list with per-state inputs and outputs to stdout.
    pub fn print(&self) {
        println!("=== State Flow Graph ===");
        for node in &self.nodes {
            println!("{}", node.label());
            if !node.input_edges.is_empty() {
                println!("  Inputs:");
                for (state, sources) in &node.input_edges {
                    for &from in sources {
                        println!(
                            "    {} <- {}",
                            self.state_name(*state),
                            self.nodes[from].label()
                        );
                    }
                }
            }
            if !node.output_edges.is_empty() {
                println!("  Outputs:");
                for (state, targets) in &node.output_edges {
                    for &to in targets {
                        println!(
                            "    {} -> {}",
                            self.state_name(*state),
                            self.nodes[to].label()
                        );
                    }
                }
            }
        }
        println!("=======================");
    }

    /// Renders the graph as a graphviz digraph.
    ///
    /// The initial node draws as a box, current latest-owner nodes get a
    /// double outline, user-authored task types fill gray, and edges without
    /// state flow (pure ordering dependencies) draw dotted.
    pub fn dump_dot(&self, rankdir: Option<&str>) -> String {
        let mut out = String::new();
        out.push_str("digraph {\n");
        if let Some(dir) = rankdir {
            let _ = writeln!(out, "  rankdir={dir}");
        }
        out.push('\n');

        let latest_state_nodes: HashSet<NodeId> =
            self.latest_state_owner.values().copied().collect();
        let mut nodes_with_no_inputs: Vec<NodeId> = Vec::new();
        for (index, node) in self.nodes.iter().enumerate() {
            let _ = write!(
                out,
                "  {} [label=\"{}\"",
                self.dot_node_id(index),
                node.label()
            );
            if node.is_initial_node {
                out.push_str(",shape=box");
            } else if latest_state_nodes.contains(&index) {
                out.push_str(",peripheries=2");
            }
            let task_type = node.meta.task_type;
            if !node.is_initial_node
                && matches!(
                    task_type,
                    TaskType::RangeFor | TaskType::StructFor | TaskType::Serial
                )
            {
                out.push_str(",style=filled,fillcolor=lightgray");
            }
            out.push_str("]\n");
            if node.input_edges.is_empty() {
                nodes_with_no_inputs.push(index);
            }
        }
        out.push('\n');

        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack = nodes_with_no_inputs;
        while let Some(from) = stack.pop() {
            if !visited.insert(from) {
                continue;
            }
            for (state, targets) in &self.nodes[from].output_edges {
                for &to in targets {
                    stack.push(to);
                    let style = if self.has_state_flow(from, *state, to) {
                        ""
                    } else {
                        "style=dotted"
                    };
                    let _ = writeln!(
                        out,
                        "  {} -> {} [label=\"{}\" {}]",
                        self.dot_node_id(from),
                        self.dot_node_id(to),
                        self.state_name(*state),
                        style
                    );
                }
            }
        }
        if visited.len() > self.nodes.len() {
            log::warn!(
                "visited more nodes than the graph holds; the graph may be malformed"
            );
        }

        out.push_str("}\n");
        out
    }

    fn dot_node_id(&self, index: NodeId) -> String {
        let node = &self.nodes[index];
        format!("n_{}_{}", node.meta.name, node.launch_id)
    }
}
