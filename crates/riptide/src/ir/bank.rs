//! Content-addressed store of offloaded IR trees.
//!
//! The bank owns every IR tree the engine has seen, keyed by structural hash.
//! Cloned trees that end up abandoned during optimization go to the trash bin
//! so nothing the graph still points at is dropped mid-pass. The bank also
//! caches derived [`TaskMeta`] per (hash, kernel) pair.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::ir::handle::IrHandle;
use crate::ir::snode::SNodeRegistry;
use crate::ir::stmt::{OffloadedTask, StmtId};
use crate::ir::transforms;
use crate::meta::{self, TaskMeta};
use crate::task::TaskLaunchRecord;

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

fn fnv1a_bytes(bytes: &[u8]) -> u64 {
    let mut hash = FNV1A_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

fn hash_serializable<T: Serialize>(value: &T) -> u64 {
    let bytes = bincode::serialize(value).expect("IR trees serialize infallibly");
    fnv1a_bytes(&bytes)
}

#[derive(Default)]
struct BankInner {
    trees: HashMap<u64, OffloadedTask>,
    trash_bin: Vec<OffloadedTask>,
    metas: HashMap<(u64, String), Arc<TaskMeta>>,
    next_stmt_id: u32,
}

pub struct IrBank {
    snodes: Arc<SNodeRegistry>,
    inner: Mutex<BankInner>,
}

impl IrBank {
    pub fn new(snodes: Arc<SNodeRegistry>) -> Self {
        IrBank {
            snodes,
            inner: Mutex::new(BankInner::default()),
        }
    }

    pub fn snodes(&self) -> &Arc<SNodeRegistry> {
        &self.snodes
    }

    /// Structural hash of a task. Ids participate, so trees must be re-id'ed
    /// before hashing for the hash to be stable.
    pub fn get_hash(&self, task: &OffloadedTask) -> u64 {
        let hash = hash_serializable(task);
        // Hash 0 is reserved for the null handle.
        if hash == 0 {
            1
        } else {
            hash
        }
    }

    /// Normalizes, hashes, and stores a freshly built task, returning its
    /// handle. This is how frontends turn IR into launchable records.
    pub fn intern(&self, mut task: OffloadedTask) -> IrHandle {
        transforms::re_id(&mut task);
        let hash = self.get_hash(&task);
        self.insert(task, hash);
        IrHandle::new(hash)
    }

    pub fn insert(&self, task: OffloadedTask, hash: u64) {
        let mut inner = self.inner.lock().expect("IR bank poisoned");
        inner.trees.insert(hash, task);
    }

    pub fn insert_to_trash_bin(&self, task: OffloadedTask) {
        let mut inner = self.inner.lock().expect("IR bank poisoned");
        inner.trash_bin.push(task);
    }

    /// Clones the tree behind `handle`, assigning fresh statement ids so the
    /// clone can be merged with another tree without id collisions.
    pub fn clone_ir(&self, handle: IrHandle) -> OffloadedTask {
        assert!(!handle.is_null(), "cannot clone the null IR handle");
        let mut inner = self.inner.lock().expect("IR bank poisoned");
        let mut task = inner
            .trees
            .get(&handle.hash())
            .expect("IR handle not present in bank")
            .clone();
        let mut mapping: HashMap<StmtId, StmtId> =
            HashMap::with_capacity(task.body.len() + 1);
        mapping.insert(task.id, StmtId(inner.next_stmt_id));
        inner.next_stmt_id += 1;
        for stmt in &task.body {
            mapping.insert(stmt.id, StmtId(inner.next_stmt_id));
            inner.next_stmt_id += 1;
        }
        transforms::remap_ids(&mut task, &mapping);
        task
    }

    /// Runs `f` against the interned tree behind `handle`.
    ///
    /// The bank lock is held for the duration of `f`; callers must not
    /// reenter the bank from inside the closure.
    pub fn with_ir<R>(&self, handle: IrHandle, f: impl FnOnce(&OffloadedTask) -> R) -> R {
        assert!(!handle.is_null(), "cannot inspect the null IR handle");
        let inner = self.inner.lock().expect("IR bank poisoned");
        f(inner
            .trees
            .get(&handle.hash())
            .expect("IR handle not present in bank"))
    }

    /// Derived metadata for a launch record, cached per (IR hash, kernel).
    pub fn task_meta(&self, rec: &TaskLaunchRecord) -> Arc<TaskMeta> {
        assert!(
            !rec.empty(),
            "cannot derive task meta for an empty launch record"
        );
        let key = (rec.ir_handle.hash(), rec.kernel.name.clone());
        let mut inner = self.inner.lock().expect("IR bank poisoned");
        if let Some(meta) = inner.metas.get(&key) {
            return Arc::clone(meta);
        }
        let task = inner
            .trees
            .get(&rec.ir_handle.hash())
            .expect("IR handle not present in bank");
        let meta = Arc::new(meta::derive(task, &rec.kernel, &self.snodes));
        inner.metas.insert(key, Arc::clone(&meta));
        meta
    }

    /// Number of trees parked in the trash bin. Exposed for tests and
    /// diagnostics.
    pub fn trash_bin_len(&self) -> usize {
        self.inner.lock().expect("IR bank poisoned").trash_bin.len()
    }
}
