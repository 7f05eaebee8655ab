//! Kernel fusion.
//!
//! Fusion merges pairs of tasks whose bodies can be combined into a single
//! offloaded statement without creating a cyclic schedule. Cycle safety rests
//! on a transitive-closure oracle kept incrementally up to date as pairs
//! merge: `forward[i]` holds the nodes reachable from `i`, `reverse[i]` the
//! nodes that reach `i`.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::bits::Bitset;
use crate::ir::handle::IrHandle;
use crate::ir::snode::SNodeId;
use crate::ir::stmt::TaskType;
use crate::ir::transforms;
use crate::task::AsyncState;

use super::{NodeId, StateFlowGraph};

/// Shape of one record's offloaded statement, extracted once per `fuse` call
/// so the pairwise fusability matrix never reenters the IR bank.
struct TaskShape {
    task_type: TaskType,
    snode: Option<SNodeId>,
    block_dim: u32,
    const_begin: bool,
    const_end: bool,
    begin_value: i64,
    end_value: i64,
    index_shape: Vec<i64>,
}

struct TransitiveClosure {
    forward: Bitsets,
    reverse: Bitsets,
}

type Bitsets = Vec<Bitset>;

impl TransitiveClosure {
    /// Registers edge `a -> b`, propagating the newly reachable pairs.
    fn insert_edge(&mut self, a: NodeId, b: NodeId) {
        let update_list = or_rows(&mut self.forward, a, b);
        for i in update_list {
            let update_list_i = or_rows(&mut self.reverse, i, a);
            for j in update_list_i {
                self.forward[i].set(j, true);
            }
        }
    }
}

/// `rows[dst] |= rows[src]`, returning the indices of newly set bits.
fn or_rows(rows: &mut [Bitset], dst: usize, src: usize) -> Vec<usize> {
    if dst == src {
        return Vec::new();
    }
    let (dst_row, src_row) = if dst < src {
        let (low, high) = rows.split_at_mut(src);
        (&mut low[dst], &high[0])
    } else {
        let (low, high) = rows.split_at_mut(dst);
        (&mut high[0], &low[src])
    };
    dst_row
        .or_assign_returning_update_list(src_row)
        .expect("closure rows share the graph dimension")
}

impl StateFlowGraph {
    /// Merges fusable task pairs until a fixed point. Returns `true` when the
    /// graph changed. Best effort: an unfusable graph is left untouched.
    pub fn fuse(&mut self) -> bool {
        let n = self.nodes.len();
        if n <= 2 {
            return false;
        }

        self.reid_nodes();

        let mut forward: Bitsets = (0..n).map(|_| Bitset::new(n)).collect();
        let mut reverse: Bitsets = (0..n).map(|_| Bitset::new(n)).collect();
        for i in 0..n {
            forward[i].set(i, true);
            reverse[i].set(i, true);
        }
        // Nodes arrive in a topologically valid order, so every edge runs
        // from a lower to a higher id; reachable sets accumulate in one
        // sweep per direction.
        for i in (0..n).rev() {
            let sources: Vec<NodeId> = self.nodes[i]
                .input_edges
                .values()
                .flatten()
                .copied()
                .collect();
            for source in sources {
                assert!(source < i, "graph edges must flow from low to high node ids");
                or_rows(&mut forward, source, i);
            }
        }
        for i in 0..n {
            let targets: Vec<NodeId> = self.nodes[i]
                .output_edges
                .values()
                .flatten()
                .copied()
                .collect();
            for target in targets {
                assert!(target > i, "graph edges must flow from low to high node ids");
                or_rows(&mut reverse, target, i);
            }
        }
        let mut closure = TransitiveClosure { forward, reverse };

        let shapes: Vec<Option<TaskShape>> = self
            .nodes
            .iter()
            .map(|node| {
                if node.rec.empty() {
                    return None;
                }
                Some(self.ir_bank.with_ir(node.rec.ir_handle, |task| TaskShape {
                    task_type: task.task_type,
                    snode: task.snode,
                    block_dim: task.block_dim,
                    const_begin: task.const_begin,
                    const_end: task.const_end,
                    begin_value: task.begin_value,
                    end_value: task.end_value,
                    index_shape: task.index_shape.clone(),
                }))
            })
            .collect();

        let mut task_type_fusable: Bitsets = (0..n).map(|_| Bitset::new(n)).collect();
        for i in 1..n {
            let Some(shape_i) = &shapes[i] else { continue };
            for j in i + 1..n {
                let Some(shape_j) = &shapes[j] else { continue };
                if self.task_types_fusable(i, shape_i, j, shape_j) {
                    task_type_fusable[i].set(j, true);
                }
            }
        }

        let mut fused = vec![false; n];
        let mut modified = false;
        loop {
            let mut updated = false;
            for (i, flag) in fused.iter_mut().enumerate().skip(1) {
                *flag = self.nodes[i].rec.empty();
            }

            // Phase one: walk existing edges. Fusing across a direct edge is
            // safe exactly when no other path of length two or more connects
            // the pair.
            for i in 1..n {
                if fused[i] {
                    continue;
                }
                let targets: Vec<NodeId> = self.nodes[i]
                    .output_edges
                    .values()
                    .flatten()
                    .copied()
                    .collect();
                for j in targets {
                    if fused[j] || !task_type_fusable[i].get(j) {
                        continue;
                    }
                    let mut between = &closure.forward[i] & &closure.reverse[j];
                    between.set(i, false);
                    between.set(j, false);
                    if between.none() {
                        self.do_fuse(i, j, &mut closure);
                        fused[i] = true;
                        fused[j] = true;
                        updated = true;
                        break;
                    }
                }
            }

            // Phase two: mutually unreachable pairs can always merge.
            for i in 1..n {
                if fused[i] {
                    continue;
                }
                for j in i + 1..n {
                    if !fused[j]
                        && task_type_fusable[i].get(j)
                        && !closure.forward[i].get(j)
                        && !closure.forward[j].get(i)
                    {
                        self.do_fuse(i, j, &mut closure);
                        fused[i] = true;
                        fused[j] = true;
                        updated = true;
                        break;
                    }
                }
            }

            if !updated {
                break;
            }
            modified = true;
        }

        if modified {
            let doomed: BTreeSet<NodeId> = self
                .nodes
                .iter()
                .enumerate()
                .skip(1)
                .filter(|(_, node)| node.rec.empty())
                .map(|(index, _)| index)
                .collect();
            self.delete_nodes(&doomed);
            // An edge splice can hand a surviving node a predecessor with a
            // higher id (a write-after-read source of the absorbed task), so
            // the layout must be restored before the next pass runs.
            self.topo_sort_nodes();
        }

        modified
    }

    fn task_types_fusable(
        &self,
        i: NodeId,
        shape_i: &TaskShape,
        j: NodeId,
        shape_j: &TaskShape,
    ) -> bool {
        let rec_i = &self.nodes[i].rec;
        let rec_j = &self.nodes[j].rec;

        let is_same_struct_for = shape_i.task_type == TaskType::StructFor
            && shape_j.task_type == TaskType::StructFor
            && shape_i.snode == shape_j.snode
            && shape_i.block_dim == shape_j.block_dim;
        let is_same_range_for = shape_i.task_type == TaskType::RangeFor
            && shape_j.task_type == TaskType::RangeFor
            && shape_i.const_begin
            && shape_j.const_begin
            && shape_i.const_end
            && shape_j.const_end
            && shape_i.begin_value == shape_j.begin_value
            && shape_i.end_value == shape_j.end_value
            && shape_i.index_shape == shape_j.index_shape;
        let are_both_serial = shape_i.task_type == TaskType::Serial
            && shape_j.task_type == TaskType::Serial;

        // Merging kernels with different signatures would break downstream
        // type-check invariants.
        let same_kernel = rec_i.same_kernel(rec_j);
        let kernel_args_match = same_kernel
            || (rec_i.kernel.args.is_empty()
                && rec_i.kernel.rets.is_empty()
                && rec_j.kernel.args.is_empty()
                && rec_j.kernel.rets.is_empty());

        let is_snode_accessor = rec_i.kernel.is_accessor || rec_j.kernel.is_accessor;

        (is_same_range_for || is_same_struct_for || are_both_serial)
            && kernel_args_match
            && !is_snode_accessor
    }

    /// Fuses task `b` into task `a`: `a` becomes the combined task, `b`'s
    /// record is emptied, `b`'s edges splice onto `a`, and the closure is
    /// updated as if `a` and `b` were one node.
    fn do_fuse(&mut self, a: NodeId, b: NodeId, closure: &mut TransitiveClosure) {
        log::debug!(
            "fuse: {} <- {}",
            self.nodes[a].label(),
            self.nodes[b].label()
        );
        let bank = Arc::clone(&self.ir_bank);
        let kernel_a = Arc::clone(&self.nodes[a].rec.kernel);

        // The bank keeps interned trees immutable; edit clones.
        let mut task_a = bank.clone_ir(self.nodes[a].rec.ir_handle);
        let mut task_b = bank.clone_ir(self.nodes[b].rec.ir_handle);

        let moved: Vec<_> = task_b.body.drain(..).collect();
        task_a.body.extend(moved);
        let task_a_id = task_a.id;
        transforms::replace_all_usages_with(&mut task_a, task_b.id, task_a_id);
        transforms::full_simplify(&mut task_a, false, &kernel_a);
        // Ids feed the structural hash.
        transforms::re_id(&mut task_a);

        let hash = bank.get_hash(&task_a);
        self.nodes[a].rec.ir_handle = IrHandle::new(hash);
        bank.insert(task_a, hash);
        self.nodes[b].rec.ir_handle = IrHandle::NULL;
        bank.insert_to_trash_bin(task_b);

        // Splice b's edges onto a, keeping both sides of the dual index.
        let b_outputs: Vec<(AsyncState, Vec<NodeId>)> = self.nodes[b]
            .output_edges
            .iter()
            .map(|(state, targets)| (*state, targets.iter().copied().collect()))
            .collect();
        for (state, targets) in b_outputs {
            for to in targets {
                debug_assert!(to > b, "successors sit above the absorbed node");
                let sources = self.nodes[to]
                    .input_edges
                    .get_mut(&state)
                    .expect("dual edge index");
                sources.remove(&b);
                sources.insert(a);
                self.nodes[a]
                    .output_edges
                    .entry(state)
                    .or_default()
                    .insert(to);
            }
        }
        let mut already_had_a_to_b_edge = false;
        let b_inputs: Vec<(AsyncState, Vec<NodeId>)> = self.nodes[b]
            .input_edges
            .iter()
            .map(|(state, sources)| (*state, sources.iter().copied().collect()))
            .collect();
        for (state, sources) in b_inputs {
            for from in sources {
                let targets = self.nodes[from]
                    .output_edges
                    .get_mut(&state)
                    .expect("dual edge index");
                targets.remove(&b);
                if from == a {
                    already_had_a_to_b_edge = true;
                } else {
                    targets.insert(a);
                    self.nodes[a]
                        .input_edges
                        .entry(state)
                        .or_default()
                        .insert(from);
                }
            }
        }
        self.nodes[b].input_edges.clear();
        self.nodes[b].output_edges.clear();

        // The merged task takes over b's ownership and reader registrations.
        for owner in self.latest_state_owner.values_mut() {
            if *owner == b {
                *owner = a;
            }
        }
        for readers in self.latest_state_readers.values_mut() {
            if readers.remove(&b) {
                readers.insert(a);
            }
        }

        closure.insert_edge(b, a);
        if !already_had_a_to_b_edge {
            closure.insert_edge(a, b);
        }
    }
}
