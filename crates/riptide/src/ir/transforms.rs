//! IR transforms used by the fusion and dead-store passes.

use std::collections::{HashMap, HashSet};

use crate::ir::stmt::{OffloadedTask, Stmt, StmtId, StmtKind};
use crate::task::Kernel;

/// Rewrites every operand equal to `old` to `new` across the body of `task`.
///
/// Fusion uses this to retarget loop-index references from the absorbed
/// task's root to the surviving one.
pub fn replace_all_usages_with(task: &mut OffloadedTask, old: StmtId, new: StmtId) {
    for stmt in &mut task.body {
        for operand in &mut stmt.operands {
            if *operand == old {
                *operand = new;
            }
        }
    }
}

/// Renumbers the root and body densely starting from 0, rewriting operand
/// references. Hashing requires this: ids participate in the structural hash.
pub fn re_id(task: &mut OffloadedTask) {
    let mut mapping: HashMap<StmtId, StmtId> = HashMap::with_capacity(task.body.len() + 1);
    mapping.insert(task.id, StmtId(0));
    for (index, stmt) in task.body.iter().enumerate() {
        mapping.insert(stmt.id, StmtId(index as u32 + 1));
    }
    remap_ids(task, &mapping);
}

pub(crate) fn remap_ids(task: &mut OffloadedTask, mapping: &HashMap<StmtId, StmtId>) {
    task.id = mapping[&task.id];
    for stmt in &mut task.body {
        stmt.id = mapping[&stmt.id];
        for operand in &mut stmt.operands {
            *operand = *mapping
                .get(operand)
                .expect("operand references a statement outside the tree");
        }
    }
}

/// Simplifies a task body in place.
///
/// Dead pure statements (no users, no side effects) are removed with a
/// worklist sweep; before access lowering, repeated clear-list statements on
/// the same snode collapse to the first. `kernel` supplies the argument
/// table backing `ArgLoad` validity.
pub fn full_simplify(task: &mut OffloadedTask, after_lower_access: bool, kernel: &Kernel) {
    for stmt in &task.body {
        if let StmtKind::ArgLoad { index } = stmt.kind {
            assert!(
                (index as usize) < kernel.args.len(),
                "ArgLoad index {index} out of range for kernel {}",
                kernel.name
            );
        }
    }

    if !after_lower_access {
        dedup_clear_lists(task);
    }

    let mut def_map: HashMap<StmtId, usize> = HashMap::with_capacity(task.body.len());
    for (index, stmt) in task.body.iter().enumerate() {
        def_map.insert(stmt.id, index);
    }

    let mut worklist: Vec<StmtId> = task
        .body
        .iter()
        .filter(|stmt| stmt.kind.is_side_effecting())
        .map(|stmt| stmt.id)
        .collect();

    let mut live: HashSet<StmtId> = HashSet::new();
    while let Some(id) = worklist.pop() {
        if !live.insert(id) {
            continue;
        }
        let Some(&index) = def_map.get(&id) else {
            continue;
        };
        for operand in &task.body[index].operands {
            worklist.push(*operand);
        }
    }

    task.body
        .retain(|stmt| live.contains(&stmt.id) || stmt.kind.is_side_effecting());
}

fn dedup_clear_lists(task: &mut OffloadedTask) {
    let mut cleared = HashSet::new();
    task.body.retain(|stmt| match stmt.kind {
        StmtKind::ClearList { snode } => cleared.insert(snode),
        _ => true,
    });
}

/// Collects the ids of body statements matching `pred`.
pub fn gather_statements(
    task: &OffloadedTask,
    mut pred: impl FnMut(&Stmt) -> bool,
) -> Vec<StmtId> {
    task.body
        .iter()
        .filter(|stmt| pred(stmt))
        .map(|stmt| stmt.id)
        .collect()
}

/// Two-phase body editor: record erasures while scanning, apply them once.
#[derive(Default)]
pub struct DelayedIrModifier {
    doomed: HashSet<StmtId>,
}

impl DelayedIrModifier {
    pub fn erase(&mut self, id: StmtId) {
        self.doomed.insert(id);
    }

    /// Applies pending erasures. Returns `true` when the body changed.
    pub fn modify_ir(&mut self, task: &mut OffloadedTask) -> bool {
        if self.doomed.is_empty() {
            return false;
        }
        let before = task.body.len();
        task.body.retain(|stmt| !self.doomed.contains(&stmt.id));
        self.doomed.clear();
        task.body.len() != before
    }
}
