//! Offloaded-task IR.
//!
//! This is deliberately the smallest IR that still lets the scheduling passes
//! do real work: move statements between task bodies, rewrite references to a
//! task root, erase clear-list statements, and hash the result. Statements
//! form a flat body under a single offloaded root; operands refer to earlier
//! statements (or the root itself) by id.

use std::fmt;

use serde::Serialize;
use smallvec::SmallVec;

use crate::ir::snode::SNodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StmtId(pub u32);

/// Classification of an offloaded task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskType {
    Serial,
    RangeFor,
    StructFor,
    Listgen,
    Gc,
    ClearListTask,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskType::Serial => "serial",
            TaskType::RangeFor => "range_for",
            TaskType::StructFor => "struct_for",
            TaskType::Listgen => "listgen",
            TaskType::Gc => "gc",
            TaskType::ClearListTask => "clear_list",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StmtKind {
    GlobalLoad { snode: SNodeId },
    GlobalStore { snode: SNodeId },
    AtomicAdd { snode: SNodeId },
    ClearList { snode: SNodeId },
    ArgLoad { index: u32 },
    Const { value: i64 },
    BinaryOp,
    /// Loop index of the enclosing offloaded root; the single operand is the
    /// root's id.
    LoopIndex,
}

impl StmtKind {
    /// Side-effecting statements survive simplification even when unused.
    pub fn is_side_effecting(&self) -> bool {
        matches!(
            self,
            StmtKind::GlobalStore { .. } | StmtKind::AtomicAdd { .. } | StmtKind::ClearList { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stmt {
    pub id: StmtId,
    pub kind: StmtKind,
    pub operands: SmallVec<[StmtId; 2]>,
}

impl Stmt {
    pub fn new(id: StmtId, kind: StmtKind) -> Self {
        Stmt {
            id,
            kind,
            operands: SmallVec::new(),
        }
    }

    pub fn with_operands(id: StmtId, kind: StmtKind, operands: &[StmtId]) -> Self {
        Stmt {
            id,
            kind,
            operands: SmallVec::from_slice(operands),
        }
    }
}

/// Root statement of one compiled task.
///
/// `index_shape` describes how a range-for decomposes its linear range into
/// loop indices; two tasks over the same range but different shapes must not
/// be treated as interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OffloadedTask {
    pub id: StmtId,
    pub task_type: TaskType,
    pub snode: Option<SNodeId>,
    pub block_dim: u32,
    pub const_begin: bool,
    pub const_end: bool,
    pub begin_value: i64,
    pub end_value: i64,
    pub index_shape: Vec<i64>,
    pub body: Vec<Stmt>,
}

impl OffloadedTask {
    pub fn new(task_type: TaskType) -> Self {
        OffloadedTask {
            id: StmtId(0),
            task_type,
            snode: None,
            block_dim: 0,
            const_begin: false,
            const_end: false,
            begin_value: 0,
            end_value: 0,
            index_shape: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn serial() -> Self {
        OffloadedTask::new(TaskType::Serial)
    }

    pub fn range_for(begin: i64, end: i64) -> Self {
        OffloadedTask {
            const_begin: true,
            const_end: true,
            begin_value: begin,
            end_value: end,
            index_shape: vec![end - begin],
            ..OffloadedTask::new(TaskType::RangeFor)
        }
    }

    pub fn struct_for(snode: SNodeId, block_dim: u32) -> Self {
        OffloadedTask {
            snode: Some(snode),
            block_dim,
            ..OffloadedTask::new(TaskType::StructFor)
        }
    }

    pub fn listgen(snode: SNodeId) -> Self {
        OffloadedTask {
            snode: Some(snode),
            ..OffloadedTask::new(TaskType::Listgen)
        }
    }

    pub fn clear_list(snode: SNodeId) -> Self {
        OffloadedTask {
            snode: Some(snode),
            ..OffloadedTask::new(TaskType::ClearListTask)
        }
    }

    pub fn gc(snode: SNodeId) -> Self {
        OffloadedTask {
            snode: Some(snode),
            ..OffloadedTask::new(TaskType::Gc)
        }
    }

    /// Appends a statement, assigning it the next id in this tree.
    pub fn push(&mut self, kind: StmtKind) -> StmtId {
        self.push_with_operands(kind, &[])
    }

    pub fn push_with_operands(&mut self, kind: StmtKind, operands: &[StmtId]) -> StmtId {
        let id = StmtId(self.id.0 + self.body.len() as u32 + 1);
        self.body.push(Stmt::with_operands(id, kind, operands));
        id
    }
}
