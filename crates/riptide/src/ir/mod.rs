//! Minimal IR layer: statement trees, the content-addressed bank, and the
//! transforms the scheduling passes rely on.

pub mod bank;
pub mod handle;
pub mod snode;
pub mod stmt;
pub mod transforms;

pub use bank::IrBank;
pub use handle::IrHandle;
pub use snode::{SNode, SNodeId, SNodeRegistry};
pub use stmt::{OffloadedTask, Stmt, StmtId, StmtKind, TaskType};
