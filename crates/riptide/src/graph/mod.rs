//! The state flow graph.
//!
//! Tasks enter through [`StateFlowGraph::insert_task`], which wires
//! dependency edges against the most recent writer and readers of every
//! async state the task touches. Optimization passes (listgen dedup, fusion,
//! dead-store elimination) then reshape the graph, and
//! [`StateFlowGraph::extract`] drains the residual tasks in graph order.
//!
//! Nodes are stored densely; `node_id` always equals a node's position, and
//! every structural change (deletion, compaction, reordering) remaps the
//! edge maps, the latest-owner table, and the reader sets together so the
//! dual edge index stays consistent.

mod dead_store;
mod fuse;
mod listgen;
mod render;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use crate::ir::bank::IrBank;
use crate::ir::handle::IrHandle;
use crate::meta::TaskMeta;
use crate::task::{AsyncState, Kernel, TaskLaunchRecord};

pub type NodeId = usize;

pub(crate) const INITIAL_NODE: NodeId = 0;

/// Per-state adjacency: one bucket of neighbour nodes for every async state
/// an edge is labelled with.
pub(crate) type EdgeMap = BTreeMap<AsyncState, BTreeSet<NodeId>>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node at position {position} stores stale id {stored}")]
    StaleNodeId { position: usize, stored: usize },
    #[error("edge {from} -> {to} on {state} points outside the graph")]
    EdgeOutOfRange {
        from: NodeId,
        to: NodeId,
        state: String,
    },
    #[error("edge {from} -> {to} on {state} is missing its reverse entry")]
    AsymmetricEdge {
        from: NodeId,
        to: NodeId,
        state: String,
    },
    #[error("latest owner of {state} is {node}, which is not in the graph")]
    OwnerOutOfRange { state: String, node: NodeId },
    #[error("reader {node} of {state} is not in the graph")]
    ReaderOutOfRange { state: String, node: NodeId },
    #[error("dependency cycle: only {visited} of {total} nodes are schedulable")]
    CycleDetected { visited: usize, total: usize },
}

pub(crate) struct Node {
    pub(crate) rec: TaskLaunchRecord,
    pub(crate) meta: Arc<TaskMeta>,
    pub(crate) launch_id: u32,
    pub(crate) node_id: NodeId,
    pub(crate) is_initial_node: bool,
    pub(crate) input_edges: EdgeMap,
    pub(crate) output_edges: EdgeMap,
}

impl Node {
    pub(crate) fn label(&self) -> String {
        format!("[node: {}:{}]", self.meta.name, self.launch_id)
    }
}

pub struct StateFlowGraph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) latest_state_owner: BTreeMap<AsyncState, NodeId>,
    pub(crate) latest_state_readers: BTreeMap<AsyncState, BTreeSet<NodeId>>,
    /// Next launch id per task name. Survives [`StateFlowGraph::clear`] so
    /// launch ids stay monotonic for the engine's lifetime.
    task_name_to_launch_ids: HashMap<String, u32>,
    pub(crate) ir_bank: Arc<IrBank>,
}

impl StateFlowGraph {
    pub fn new(ir_bank: Arc<IrBank>) -> Self {
        let initial_kernel = Arc::new(Kernel::new("initial_state"));
        let initial = Node {
            rec: TaskLaunchRecord::new(IrHandle::NULL, initial_kernel),
            meta: Arc::new(TaskMeta::initial()),
            launch_id: 0,
            node_id: INITIAL_NODE,
            is_initial_node: true,
            input_edges: EdgeMap::new(),
            output_edges: EdgeMap::new(),
        };
        StateFlowGraph {
            nodes: vec![initial],
            latest_state_owner: BTreeMap::new(),
            latest_state_readers: BTreeMap::new(),
            task_name_to_launch_ids: HashMap::new(),
            ir_bank,
        }
    }

    pub fn ir_bank(&self) -> &Arc<IrBank> {
        &self.ir_bank
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn has_edge(&self, from: NodeId, to: NodeId, state: AsyncState) -> bool {
        self.nodes[from]
            .output_edges
            .get(&state)
            .is_some_and(|targets| targets.contains(&to))
    }

    pub fn meta(&self, node: NodeId) -> Arc<TaskMeta> {
        Arc::clone(&self.nodes[node].meta)
    }

    pub fn record(&self, node: NodeId) -> &TaskLaunchRecord {
        &self.nodes[node].rec
    }

    pub fn launch_id(&self, node: NodeId) -> u32 {
        self.nodes[node].launch_id
    }

    pub fn latest_owner(&self, state: AsyncState) -> Option<NodeId> {
        self.latest_state_owner.get(&state).copied()
    }

    /// Flat `(from, to, state)` view of every edge, in node order.
    pub fn edges(&self) -> Vec<(NodeId, NodeId, AsyncState)> {
        let mut edges = Vec::new();
        for (from, node) in self.nodes.iter().enumerate() {
            for (state, targets) in &node.output_edges {
                for &to in targets {
                    edges.push((from, to, *state));
                }
            }
        }
        edges
    }

    /// Appends one task, wiring its dependency edges.
    ///
    /// Wiring runs in three strictly ordered steps: inputs connect from the
    /// latest owner of each read state, outputs take ownership and collect
    /// write-after-read edges from the pending readers, and only then is the
    /// task registered as a reader itself. Swapping the last two steps would
    /// give a task reading and writing the same state an edge to itself.
    pub fn insert_task(&mut self, rec: TaskLaunchRecord) {
        let meta = self.ir_bank.task_meta(&rec);
        let launch_id = {
            let counter = self
                .task_name_to_launch_ids
                .entry(meta.name.clone())
                .or_insert(0);
            let id = *counter;
            *counter += 1;
            id
        };
        let id = self.nodes.len();
        self.nodes.push(Node {
            rec,
            meta: Arc::clone(&meta),
            launch_id,
            node_id: id,
            is_initial_node: false,
            input_edges: EdgeMap::new(),
            output_edges: EdgeMap::new(),
        });

        for &state in &meta.input_states {
            let owner = *self
                .latest_state_owner
                .entry(state)
                .or_insert(INITIAL_NODE);
            self.insert_state_flow(owner, id, state);
        }

        for &state in &meta.output_states {
            self.latest_state_owner.insert(state, id);
            let readers = self.latest_state_readers.entry(state).or_default();
            if readers.is_empty() {
                // A write with no prior reader still depends on the initial
                // state.
                readers.insert(INITIAL_NODE);
            }
            let readers: Vec<NodeId> = readers.iter().copied().collect();
            for reader in readers {
                self.insert_state_flow(reader, id, state);
            }
            self.latest_state_readers
                .get_mut(&state)
                .expect("reader set inserted above")
                .clear();
        }

        for &state in &meta.input_states {
            self.latest_state_readers
                .entry(state)
                .or_default()
                .insert(id);
        }
    }

    pub(crate) fn insert_state_flow(&mut self, from: NodeId, to: NodeId, state: AsyncState) {
        assert!(from < self.nodes.len(), "edge source {from} out of range");
        assert!(to < self.nodes.len(), "edge target {to} out of range");
        assert_ne!(from, to, "edges never loop back to their source");
        self.nodes[from]
            .output_edges
            .entry(state)
            .or_default()
            .insert(to);
        self.nodes[to]
            .input_edges
            .entry(state)
            .or_default()
            .insert(from);
    }

    /// True when the edge `from --state--> to` carries data (the source
    /// writes and the sink reads `state`), as opposed to a pure ordering
    /// dependency.
    pub fn has_state_flow(&self, from: NodeId, state: AsyncState, to: NodeId) -> bool {
        self.nodes[from].meta.output_states.contains(&state)
            && self.nodes[to].meta.input_states.contains(&state)
    }

    /// Removes `other` from every state bucket of `node`, in both directions
    /// of `node`'s own maps.
    pub(crate) fn disconnect_with(&mut self, node: NodeId, other: NodeId) {
        let entry = &mut self.nodes[node];
        for targets in entry.output_edges.values_mut() {
            targets.remove(&other);
        }
        for targets in entry.input_edges.values_mut() {
            targets.remove(&other);
        }
    }

    /// Makes every neighbour forget `node`. The node's own maps are left for
    /// the caller to drop with the node.
    pub(crate) fn disconnect_all(&mut self, node: NodeId) {
        let mut peers: BTreeSet<NodeId> = BTreeSet::new();
        for targets in self.nodes[node].output_edges.values() {
            peers.extend(targets.iter().copied());
        }
        for targets in self.nodes[node].input_edges.values() {
            peers.extend(targets.iter().copied());
        }
        for peer in peers {
            self.disconnect_with(peer, node);
        }
    }

    /// Redirects every reader of `a` to read from `b` instead, then clears
    /// `a`'s outgoing buckets.
    pub(crate) fn replace_reference(&mut self, a: NodeId, b: NodeId) {
        let buckets: Vec<(AsyncState, Vec<NodeId>)> = self.nodes[a]
            .output_edges
            .iter()
            .map(|(state, targets)| (*state, targets.iter().copied().collect()))
            .collect();
        for (state, readers) in buckets {
            for c in readers {
                let removed = self.nodes[c]
                    .input_edges
                    .get_mut(&state)
                    .is_some_and(|sources| sources.remove(&a));
                if removed {
                    self.nodes[c]
                        .input_edges
                        .entry(state)
                        .or_default()
                        .insert(b);
                    self.nodes[b]
                        .output_edges
                        .entry(state)
                        .or_default()
                        .insert(c);
                }
            }
        }
        self.nodes[a].output_edges.clear();
    }

    /// Deletes the given nodes, compacting the vector and redirecting the
    /// latest-owner table (to the initial node) and reader sets away from
    /// the deleted entries.
    pub(crate) fn delete_nodes(&mut self, indices: &BTreeSet<NodeId>) {
        if indices.is_empty() {
            return;
        }
        assert!(
            !indices.contains(&INITIAL_NODE),
            "the initial node is never deleted"
        );
        for &index in indices {
            log::debug!("deleting node {}", self.nodes[index].label());
            self.disconnect_all(index);
        }

        let n = self.nodes.len();
        let mut mapping = vec![usize::MAX; n];
        let mut kept = 0;
        for (old, slot) in mapping.iter_mut().enumerate() {
            if !indices.contains(&old) {
                *slot = kept;
                kept += 1;
            }
        }

        for owner in self.latest_state_owner.values_mut() {
            *owner = match mapping[*owner] {
                usize::MAX => INITIAL_NODE,
                new => new,
            };
        }
        for readers in self.latest_state_readers.values_mut() {
            *readers = readers
                .iter()
                .filter(|&&reader| mapping[reader] != usize::MAX)
                .map(|&reader| mapping[reader])
                .collect();
        }

        let old_nodes = std::mem::take(&mut self.nodes);
        self.nodes = Vec::with_capacity(kept);
        for (old, mut node) in old_nodes.into_iter().enumerate() {
            if mapping[old] == usize::MAX {
                continue;
            }
            node.node_id = mapping[old];
            remap_edge_map(&mut node.input_edges, &mapping);
            remap_edge_map(&mut node.output_edges, &mapping);
            self.nodes.push(node);
        }
    }

    pub(crate) fn reid_nodes(&mut self) {
        for (index, node) in self.nodes.iter_mut().enumerate() {
            node.node_id = index;
        }
        assert!(
            self.nodes[INITIAL_NODE].is_initial_node,
            "node 0 must be the initial node"
        );
    }

    /// Reorders the nodes into a topological layout (Kahn's algorithm seeded
    /// from the initial node).
    pub fn topo_sort_nodes(&mut self) {
        self.reid_nodes();
        let n = self.nodes.len();
        let mut degrees_in = vec![0usize; n];
        for (index, node) in self.nodes.iter().enumerate() {
            degrees_in[index] = node.input_edges.values().map(BTreeSet::len).sum();
        }
        assert_eq!(
            degrees_in[INITIAL_NODE], 0,
            "initial node must have zero in-degree"
        );

        let mut queue = VecDeque::new();
        queue.push_back(INITIAL_NODE);
        let mut order = Vec::with_capacity(n);
        while let Some(head) = queue.pop_front() {
            for targets in self.nodes[head].output_edges.values() {
                for &dest in targets {
                    degrees_in[dest] = degrees_in[dest]
                        .checked_sub(1)
                        .expect("in-degree went negative");
                    if degrees_in[dest] == 0 {
                        queue.push_back(dest);
                    }
                }
            }
            order.push(head);
        }
        assert_eq!(order.len(), n, "topological sort must cover every node");

        let mut mapping = vec![0usize; n];
        for (new_index, &old_index) in order.iter().enumerate() {
            mapping[old_index] = new_index;
        }

        let mut old_nodes: Vec<Option<Node>> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(Some)
            .collect();
        self.nodes = Vec::with_capacity(n);
        for &old_index in &order {
            let mut node = old_nodes[old_index].take().expect("node placed twice");
            node.node_id = mapping[old_index];
            remap_edge_map(&mut node.input_edges, &mapping);
            remap_edge_map(&mut node.output_edges, &mapping);
            self.nodes.push(node);
        }
        for owner in self.latest_state_owner.values_mut() {
            *owner = mapping[*owner];
        }
        for readers in self.latest_state_readers.values_mut() {
            *readers = readers.iter().map(|&reader| mapping[reader]).collect();
        }
    }

    /// Drains every non-initial record in graph order and resets the graph.
    pub fn extract(&mut self) -> Vec<TaskLaunchRecord> {
        let tasks: Vec<TaskLaunchRecord> = self.nodes[1..]
            .iter()
            .map(|node| node.rec.clone())
            .collect();
        self.clear();
        tasks
    }

    /// Truncates the graph back to the lone initial node. Launch-id counters
    /// are preserved.
    pub fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[INITIAL_NODE].output_edges.clear();
        self.latest_state_owner.clear();
        self.latest_state_readers.clear();
    }

    /// Validates the structural invariants: dense ids, in-range and
    /// dual-indexed edges, in-range owner and reader entries, and
    /// acyclicity.
    pub fn check_consistency(&self) -> Result<(), GraphError> {
        let n = self.nodes.len();
        for (position, node) in self.nodes.iter().enumerate() {
            if node.node_id != position {
                return Err(GraphError::StaleNodeId {
                    position,
                    stored: node.node_id,
                });
            }
            for (state, targets) in &node.output_edges {
                for &to in targets {
                    if to >= n {
                        return Err(GraphError::EdgeOutOfRange {
                            from: position,
                            to,
                            state: self.state_name(*state),
                        });
                    }
                    let mirrored = self.nodes[to]
                        .input_edges
                        .get(state)
                        .is_some_and(|sources| sources.contains(&position));
                    if !mirrored {
                        return Err(GraphError::AsymmetricEdge {
                            from: position,
                            to,
                            state: self.state_name(*state),
                        });
                    }
                }
            }
            for (state, sources) in &node.input_edges {
                for &from in sources {
                    if from >= n {
                        return Err(GraphError::EdgeOutOfRange {
                            from,
                            to: position,
                            state: self.state_name(*state),
                        });
                    }
                    let mirrored = self.nodes[from]
                        .output_edges
                        .get(state)
                        .is_some_and(|targets| targets.contains(&position));
                    if !mirrored {
                        return Err(GraphError::AsymmetricEdge {
                            from,
                            to: position,
                            state: self.state_name(*state),
                        });
                    }
                }
            }
        }

        for (&state, &owner) in &self.latest_state_owner {
            if owner >= n {
                return Err(GraphError::OwnerOutOfRange {
                    state: self.state_name(state),
                    node: owner,
                });
            }
        }
        for (&state, readers) in &self.latest_state_readers {
            for &reader in readers {
                if reader >= n {
                    return Err(GraphError::ReaderOutOfRange {
                        state: self.state_name(state),
                        node: reader,
                    });
                }
            }
        }

        // Kahn sweep over every zero in-degree seed; anything left over sits
        // on a cycle.
        let mut degrees_in = vec![0usize; n];
        for (index, node) in self.nodes.iter().enumerate() {
            degrees_in[index] = node.input_edges.values().map(BTreeSet::len).sum();
        }
        let mut queue: VecDeque<NodeId> = degrees_in
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(index, _)| index)
            .collect();
        let mut visited = 0;
        while let Some(head) = queue.pop_front() {
            visited += 1;
            for targets in self.nodes[head].output_edges.values() {
                for &dest in targets {
                    degrees_in[dest] -= 1;
                    if degrees_in[dest] == 0 {
                        queue.push_back(dest);
                    }
                }
            }
        }
        if visited != n {
            return Err(GraphError::CycleDetected { visited, total: n });
        }

        Ok(())
    }

    pub(crate) fn state_name(&self, state: AsyncState) -> String {
        state.name(self.ir_bank.snodes())
    }
}

fn remap_edge_map(edges: &mut EdgeMap, mapping: &[usize]) {
    for targets in edges.values_mut() {
        *targets = targets
            .iter()
            .map(|&target| {
                let mapped = mapping[target];
                assert!(mapped != usize::MAX, "edge references a deleted node");
                mapped
            })
            .collect();
    }
}
