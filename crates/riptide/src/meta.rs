//! Per-task metadata: classification plus the read and write state sets the
//! graph wires dependencies from.

use std::collections::BTreeSet;

use crate::ir::snode::{SNodeId, SNodeRegistry};
use crate::ir::stmt::{OffloadedTask, StmtKind, TaskType};
use crate::task::{AsyncState, Kernel};

#[derive(Debug, Clone)]
pub struct TaskMeta {
    pub name: String,
    pub task_type: TaskType,
    pub snode: Option<SNodeId>,
    pub input_states: BTreeSet<AsyncState>,
    pub output_states: BTreeSet<AsyncState>,
}

impl TaskMeta {
    /// Metadata of the sentinel initial node: the source of every state that
    /// was never written inside the graph.
    pub fn initial() -> Self {
        TaskMeta {
            name: "initial_state".to_string(),
            task_type: TaskType::Serial,
            snode: None,
            input_states: BTreeSet::new(),
            output_states: BTreeSet::new(),
        }
    }
}

/// Derives the metadata of one offloaded task.
///
/// Body statements contribute value states (loads read, stores write, atomics
/// do both) and list states (clear-list writes). Task classification adds the
/// states implied by the runtime:
/// - a listgen reads its snode's mask, the parent's activation list, and the
///   list it appends to, and writes that list;
/// - a struct-for consumes its snode's activation list;
/// - a clear-list task writes its snode's list;
/// - a gc task writes its snode's allocator state.
pub fn derive(task: &OffloadedTask, kernel: &Kernel, snodes: &SNodeRegistry) -> TaskMeta {
    let mut input_states = BTreeSet::new();
    let mut output_states = BTreeSet::new();

    for stmt in &task.body {
        match stmt.kind {
            StmtKind::GlobalLoad { snode } => {
                input_states.insert(AsyncState::value(snode));
            }
            StmtKind::GlobalStore { snode } => {
                output_states.insert(AsyncState::value(snode));
            }
            StmtKind::AtomicAdd { snode } => {
                input_states.insert(AsyncState::value(snode));
                output_states.insert(AsyncState::value(snode));
            }
            StmtKind::ClearList { snode } => {
                output_states.insert(AsyncState::list(snode));
            }
            StmtKind::ArgLoad { .. }
            | StmtKind::Const { .. }
            | StmtKind::BinaryOp
            | StmtKind::LoopIndex => {}
        }
    }

    match task.task_type {
        TaskType::Listgen => {
            let snode = task.snode.expect("listgen task carries a target snode");
            let parent = snodes
                .parent(snode)
                .expect("listgen target must have a parent");
            input_states.insert(AsyncState::mask(snode));
            input_states.insert(AsyncState::list(parent));
            input_states.insert(AsyncState::list(snode));
            output_states.insert(AsyncState::list(snode));
        }
        TaskType::StructFor => {
            let snode = task.snode.expect("struct-for task carries a target snode");
            input_states.insert(AsyncState::list(snode));
        }
        TaskType::ClearListTask => {
            let snode = task.snode.expect("clear-list task carries a target snode");
            output_states.insert(AsyncState::list(snode));
        }
        TaskType::Gc => {
            let snode = task.snode.expect("gc task carries a target snode");
            output_states.insert(AsyncState::allocator(snode));
        }
        TaskType::Serial | TaskType::RangeFor => {}
    }

    TaskMeta {
        name: format!("{}_{}", kernel.name, task.task_type),
        task_type: task.task_type,
        snode: task.snode,
        input_states,
        output_states,
    }
}
