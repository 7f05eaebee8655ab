//! Hash-addressed references to interned IR trees.

/// Immutable reference to an IR tree interned in the [`IrBank`](super::bank::IrBank).
///
/// The null handle (hash 0) marks a launch record whose task has been fused
/// away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrHandle {
    hash: u64,
}

impl IrHandle {
    pub const NULL: IrHandle = IrHandle { hash: 0 };

    pub fn new(hash: u64) -> Self {
        assert!(hash != 0, "hash 0 is reserved for the null handle");
        IrHandle { hash }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn is_null(&self) -> bool {
        self.hash == 0
    }
}
