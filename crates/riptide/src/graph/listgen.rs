//! Deduplication of equivalent list-generation tasks.

use std::collections::BTreeSet;

use crate::ir::stmt::TaskType;
use crate::task::AsyncState;

use super::{NodeId, StateFlowGraph};

impl StateFlowGraph {
    /// Removes redundant listgen tasks.
    ///
    /// Two listgens over the same snode whose single mask input and single
    /// parent-list input coincide materialize identical activation lists, so
    /// the later one is spliced out and its readers retargeted to the
    /// earlier one. Returns `true` when any task was removed.
    pub fn optimize_listgen(&mut self) -> bool {
        log::debug!("begin optimize listgen");
        let mut modified = false;

        let mut common_pairs: Vec<(NodeId, NodeId)> = Vec::new();
        for i in 0..self.nodes.len() {
            if self.nodes[i].meta.task_type != TaskType::Listgen {
                continue;
            }
            for j in i + 1..self.nodes.len() {
                if self.nodes[j].meta.task_type != TaskType::Listgen {
                    continue;
                }
                if self.nodes[i].meta.snode != self.nodes[j].meta.snode {
                    continue;
                }

                let snode = self.nodes[i]
                    .meta
                    .snode
                    .expect("listgen task carries a target snode");
                let parent = self
                    .ir_bank
                    .snodes()
                    .parent(snode)
                    .expect("listgen target must have a parent");
                let mask_state = AsyncState::mask(snode);
                let parent_list_state = AsyncState::list(parent);

                if self.single_input(i, mask_state) != self.single_input(j, mask_state) {
                    continue;
                }
                if self.single_input(i, parent_list_state)
                    != self.single_input(j, parent_list_state)
                {
                    continue;
                }

                log::debug!(
                    "common list generation {} and {}",
                    self.nodes[i].label(),
                    self.nodes[j].label()
                );
                common_pairs.push((i, j));
            }
        }

        let mut nodes_to_delete: BTreeSet<NodeId> = BTreeSet::new();
        for (i, j) in common_pairs {
            log::debug!("eliminating {}", self.nodes[j].label());
            self.replace_reference(j, i);
            modified = true;
            nodes_to_delete.insert(j);
        }

        self.delete_nodes(&nodes_to_delete);

        modified
    }

    /// The single source feeding `node` on `state`. Listgen wiring
    /// guarantees exactly one.
    fn single_input(&self, node: NodeId, state: AsyncState) -> NodeId {
        let sources = self.nodes[node]
            .input_edges
            .get(&state)
            .unwrap_or_else(|| panic!("listgen node has no input on {}", self.state_name(state)));
        assert_eq!(
            sources.len(),
            1,
            "listgen node has {} inputs on {}",
            sources.len(),
            self.state_name(state)
        );
        *sources.iter().next().expect("nonempty input bucket")
    }
}
