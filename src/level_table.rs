use alloc::{boxed::Box, vec::Vec};

use crate::AllocError;

/// Per-base-block record of the level at which a live allocation starting at
/// that block was granted.
///
/// An address alone does not reveal its allocation size; `free` and the
/// payload accessors recover it from here. Entries interior to a live block
/// are never read as allocation starts.
#[derive(Debug)]
pub struct LevelTable {
    entries: Box<[Option<u32>]>,
}

impl LevelTable {
    /// Constructs a table of `num_blocks` empty entries.
    pub fn new(num_blocks: u64) -> Result<LevelTable, AllocError> {
        let num_blocks = usize::try_from(num_blocks).map_err(|_| AllocError::OutOfMemory)?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(num_blocks)
            .map_err(|_| AllocError::OutOfMemory)?;
        entries.resize(num_blocks, None);

        Ok(LevelTable {
            entries: entries.into_boxed_slice(),
        })
    }

    /// The level recorded for a live allocation starting at `base_block`, if
    /// one exists.
    #[inline]
    pub fn get(&self, base_block: u64) -> Option<u32> {
        self.entries[Self::slot(base_block)]
    }

    /// Records a live allocation of `level` starting at `base_block`.
    #[inline]
    pub fn set(&mut self, base_block: u64, level: u32) {
        self.entries[Self::slot(base_block)] = Some(level);
    }

    /// Clears the record for `base_block`.
    #[inline]
    pub fn clear(&mut self, base_block: u64) {
        self.entries[Self::slot(base_block)] = None;
    }

    #[inline]
    fn slot(base_block: u64) -> usize {
        usize::try_from(base_block).expect("base block index overflows usize")
    }
}
