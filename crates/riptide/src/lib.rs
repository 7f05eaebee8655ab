//! riptide: the scheduling and fusion core of an asynchronous execution
//! engine for a just-in-time tensor language.
//!
//! The engine feeds a linear stream of task launch records into a
//! [`StateFlowGraph`], which tracks fine-grained read/write dependencies on
//! per-field async states. Before dispatch, optimization passes fuse
//! compatible tasks, deduplicate list generation, and eliminate dead stores,
//! all while preserving the data-dependency semantics of the original
//! sequential program.

pub mod bits;
pub mod graph;
pub mod ir;
pub mod meta;
pub mod task;

pub use bits::{Bitset, BitsetError};
pub use graph::{GraphError, NodeId, StateFlowGraph};
pub use ir::{IrBank, IrHandle, OffloadedTask, SNodeId, SNodeRegistry, StmtKind, TaskType};
pub use meta::TaskMeta;
pub use task::{AsyncState, Kernel, KernelParam, StateKind, TaskLaunchRecord};
