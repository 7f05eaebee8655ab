//! Dead-store elimination.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::ir::handle::IrHandle;
use crate::ir::snode::SNodeId;
use crate::ir::stmt::{StmtKind, TaskType};
use crate::ir::transforms::{self, DelayedIrModifier};
use crate::task::{AsyncState, StateKind};

use super::{NodeId, StateFlowGraph};

impl StateFlowGraph {
    /// Prunes outputs nothing consumes, then deletes tasks whose bodies have
    /// become empty. Returns `true` when the graph changed.
    ///
    /// An output is live when some successor consumes it as data (ordering
    /// edges do not count) or when the graph still considers the task the
    /// latest owner of that state, since the value may be observed from
    /// outside. List states are exempt from the latest-owner guard: a future
    /// list generation always clears the list first, so an unread list can
    /// go even while latest.
    pub fn optimize_dead_store(&mut self) -> bool {
        let mut modified = false;

        for index in 1..self.nodes.len() {
            let meta = Arc::clone(&self.nodes[index].meta);
            for &state in &meta.output_states {
                let used = self.nodes[index]
                    .output_edges
                    .get(&state)
                    .is_some_and(|targets| {
                        targets
                            .iter()
                            .any(|&target| self.has_state_flow(index, state, target))
                    });
                if used {
                    continue;
                }

                if state.kind != StateKind::List
                    && self.latest_state_owner.get(&state) == Some(&index)
                {
                    continue;
                }

                if state.kind == StateKind::List && meta.task_type == TaskType::Serial {
                    self.erase_list_gen(index, state.snode);
                }
                self.erase_output(index, state);
                modified = true;
            }
        }

        let mut to_delete: BTreeSet<NodeId> = BTreeSet::new();
        for (index, node) in self.nodes.iter().enumerate().skip(1) {
            if node.rec.empty() {
                continue;
            }
            let task_type = node.meta.task_type;
            if !matches!(
                task_type,
                TaskType::Serial | TaskType::StructFor | TaskType::RangeFor
            ) {
                continue;
            }
            let body_empty = self
                .ir_bank
                .with_ir(node.rec.ir_handle, |task| task.body.is_empty());
            if body_empty {
                to_delete.insert(index);
            }
        }

        if !to_delete.is_empty() {
            modified = true;
        }
        self.delete_nodes(&to_delete);

        modified
    }

    /// Rewrites a serial task's IR to drop the clear-list statements feeding
    /// a dead list state, reinterning the edited tree and re-deriving the
    /// task's metadata from it.
    fn erase_list_gen(&mut self, index: NodeId, snode: SNodeId) {
        let bank = Arc::clone(&self.ir_bank);
        let mut new_ir = bank.clone_ir(self.nodes[index].rec.ir_handle);

        let mut modifier = DelayedIrModifier::default();
        for id in transforms::gather_statements(&new_ir, |stmt| {
            matches!(stmt.kind, StmtKind::ClearList { snode: cleared } if cleared == snode)
        }) {
            modifier.erase(id);
        }
        if !modifier.modify_ir(&mut new_ir) {
            return;
        }

        log::debug!(
            "erased clear-list statements of {} in {}",
            bank.snodes().name(snode),
            self.nodes[index].label()
        );
        transforms::re_id(&mut new_ir);
        let hash = bank.get_hash(&new_ir);
        bank.insert(new_ir, hash);
        self.nodes[index].rec.ir_handle = IrHandle::new(hash);
        self.nodes[index].meta = bank.task_meta(&self.nodes[index].rec);
    }

    /// Drops `state` from the task's write set and detaches its outgoing
    /// edges on that state.
    fn erase_output(&mut self, index: NodeId, state: AsyncState) {
        if let Some(targets) = self.nodes[index].output_edges.get(&state) {
            let targets: Vec<NodeId> = targets.iter().copied().collect();
            for target in targets {
                if let Some(sources) = self.nodes[target].input_edges.get_mut(&state) {
                    sources.remove(&index);
                }
            }
        }
        self.nodes[index].output_edges.remove(&state);

        let meta = Arc::make_mut(&mut self.nodes[index].meta);
        meta.output_states.remove(&state);
    }
}
