//! Launch records and the async-state keys dependency tracking runs on.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::ir::handle::IrHandle;
use crate::ir::snode::{SNodeId, SNodeRegistry};

/// Category of runtime state attached to a structured node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StateKind {
    Value,
    List,
    Mask,
    Allocator,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StateKind::Value => "value",
            StateKind::List => "list",
            StateKind::Mask => "mask",
            StateKind::Allocator => "allocator",
        })
    }
}

/// Value key identifying one scalar piece of asynchronous runtime state.
///
/// The graph orders tasks by their reads and writes of these keys; it never
/// owns or interprets the underlying state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AsyncState {
    pub snode: SNodeId,
    pub kind: StateKind,
}

impl AsyncState {
    pub fn new(snode: SNodeId, kind: StateKind) -> Self {
        AsyncState { snode, kind }
    }

    pub fn value(snode: SNodeId) -> Self {
        AsyncState::new(snode, StateKind::Value)
    }

    pub fn list(snode: SNodeId) -> Self {
        AsyncState::new(snode, StateKind::List)
    }

    pub fn mask(snode: SNodeId) -> Self {
        AsyncState::new(snode, StateKind::Mask)
    }

    pub fn allocator(snode: SNodeId) -> Self {
        AsyncState::new(snode, StateKind::Allocator)
    }

    /// Human-readable name used in renderings, e.g. `x_value`.
    pub fn name(&self, snodes: &SNodeRegistry) -> String {
        format!("{}_{}", snodes.name(self.snode), self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParam {
    pub name: String,
}

/// Compiled kernel owning one or more offloaded tasks.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub name: String,
    pub args: Vec<KernelParam>,
    pub rets: Vec<KernelParam>,
    pub is_accessor: bool,
}

impl Kernel {
    pub fn new(name: impl Into<String>) -> Self {
        Kernel {
            name: name.into(),
            args: Vec::new(),
            rets: Vec::new(),
            is_accessor: false,
        }
    }
}

/// One task enqueued for execution: an interned IR tree plus its owning
/// kernel. Records launched from the same compiled kernel share the `Arc`,
/// and that sharing is what fusion's signature check keys on.
#[derive(Debug, Clone)]
pub struct TaskLaunchRecord {
    pub ir_handle: IrHandle,
    pub kernel: Arc<Kernel>,
}

impl TaskLaunchRecord {
    pub fn new(ir_handle: IrHandle, kernel: Arc<Kernel>) -> Self {
        TaskLaunchRecord { ir_handle, kernel }
    }

    /// A record is empty once its task has been fused away.
    pub fn empty(&self) -> bool {
        self.ir_handle.is_null()
    }

    pub fn same_kernel(&self, other: &TaskLaunchRecord) -> bool {
        Arc::ptr_eq(&self.kernel, &other.kernel)
    }
}
