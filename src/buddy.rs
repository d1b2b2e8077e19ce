//! The buddy arena allocator.
//!
//! [`BuddyAllocator`] owns the arena bytes, the buddy tree index, and the
//! level table, and orchestrates them: `alloc` searches the tree leftmost-fit
//! and records the granted level, `free` looks the level back up and merges
//! the block with its buddy as far as the tree allows.
//!
//! The allocator is single-threaded and non-reentrant. Nothing here blocks
//! or suspends; every operation is a bounded computation over in-memory
//! structures, so callers needing shared access wrap the value in their own
//! lock.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cmp;

use crate::{arena::Arena, level_table::LevelTable, tree::BuddyTree, Address, AllocError};

/// Cap on the alignment requested for the arena region.
///
/// Addresses handed out are arena-relative, so region alignment beyond one
/// page buys nothing observable.
const MAX_REGION_ALIGN: u64 = 4096;

/// A binary-buddy allocator over a fixed arena.
///
/// The value starts uninitialized; [`init`] reserves the arena and metadata
/// and makes it ready, [`teardown`] releases everything and returns it to the
/// uninitialized state. Allocation and freeing outside the ready state fail
/// with [`AllocError::NotInitialized`].
///
/// ```
/// use buddy_arena::BuddyAllocator;
///
/// let mut alloc = BuddyAllocator::new();
/// alloc.init(64, 64 * 8)?;
///
/// let a = alloc.alloc(64)?.unwrap();
/// let b = alloc.alloc(64)?.unwrap();
/// assert!(a < b);
///
/// alloc.free(a)?;
/// alloc.free(b)?;
/// alloc.teardown()?;
/// # Ok::<(), buddy_arena::AllocError>(())
/// ```
///
/// [`init`]: BuddyAllocator::init
/// [`teardown`]: BuddyAllocator::teardown
#[derive(Debug, Default)]
pub struct BuddyAllocator {
    state: Option<Ready>,
}

/// Live allocator state: the arena plus the structures indexing it.
#[derive(Debug)]
struct Ready {
    arena: Arena,
    tree: BuddyTree,
    levels: LevelTable,
    block_size: u64,
    num_blocks: u64,
}

impl BuddyAllocator {
    /// Creates an allocator in the uninitialized state.
    pub const fn new() -> BuddyAllocator {
        BuddyAllocator { state: None }
    }

    /// Reserves and zeroes an arena of `arena_size` bytes carved into base
    /// blocks of `block_size` bytes.
    ///
    /// Both sizes are promoted to the next power of two if they are not
    /// already one, and the arena is never smaller than a single block. The
    /// returned value is the actual usable arena size, which may exceed the
    /// requested one.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` if the allocator is live, and
    /// `OutOfMemory` if the arena or metadata buffers cannot be reserved; in
    /// the latter case the allocator stays uninitialized.
    pub fn init(&mut self, block_size: u64, arena_size: u64) -> Result<u64, AllocError> {
        if self.state.is_some() {
            return Err(AllocError::AlreadyInitialized);
        }

        let block_size = block_size
            .checked_next_power_of_two()
            .ok_or(AllocError::OutOfMemory)?;
        let arena_size = cmp::max(arena_size, block_size)
            .checked_next_power_of_two()
            .ok_or(AllocError::OutOfMemory)?;
        let num_blocks = arena_size / block_size;

        let arena_bytes = usize::try_from(arena_size).map_err(|_| AllocError::OutOfMemory)?;
        let align = usize::try_from(cmp::min(block_size, MAX_REGION_ALIGN))
            .expect("region alignment overflows usize");

        let arena = Arena::new(arena_bytes, align)?;
        let tree = BuddyTree::new(num_blocks)?;
        let levels = LevelTable::new(num_blocks)?;

        self.state = Some(Ready {
            arena,
            tree,
            levels,
            block_size,
            num_blocks,
        });

        Ok(arena_size)
    }

    /// Allocates a block of at least `length` bytes.
    ///
    /// The block granted is the leftmost free block of the smallest level
    /// whose span covers `length`; requests no larger than one base block are
    /// served at level 0. The returned address is the block's offset within
    /// the arena.
    ///
    /// Exhaustion is not an error: a request that no free block can satisfy
    /// returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live.
    pub fn alloc(&mut self, length: u64) -> Result<Option<Address>, AllocError> {
        let state = self.state.as_mut().ok_or(AllocError::NotInitialized)?;

        let level = match state.level_for(length) {
            Some(level) => level,
            None => return Ok(None),
        };

        let index = match state.find_free(level) {
            Some(index) => index,
            None => return Ok(None),
        };

        state.tree.mark_unavailable(level, index);

        let base_block = index << level;
        state.levels.set(base_block, level);

        Ok(Some(Address::new(base_block * state.block_size)))
    }

    /// Frees the block at `addr` and coalesces it with its buddy as far as
    /// possible.
    ///
    /// A merge step requires the buddy node at the current level to be free
    /// and the level table to record no live allocation at the buddy's base
    /// block; a clear bit alone is not proof that the buddy is a whole free
    /// block of the same size.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live,
    /// `InvalidAddress` if `addr` is out of range or not aligned to a base
    /// block boundary, and `DoubleFree` if no live allocation starts at
    /// `addr`.
    pub fn free(&mut self, addr: Address) -> Result<(), AllocError> {
        let state = self.state.as_mut().ok_or(AllocError::NotInitialized)?;

        let base_block = state.base_block_of(addr)?;
        let mut level = state.levels.get(base_block).ok_or(AllocError::DoubleFree)?;
        state.levels.clear(base_block);

        let mut index = base_block >> level;
        state.tree.mark_free(level, index);

        while level < state.tree.root_level() {
            let (_, buddy) = state.tree.buddy_of(level, index);
            let buddy_base = buddy << level;

            if !state.tree.is_free(level, buddy) || state.levels.get(buddy_base).is_some() {
                break;
            }

            let (parent_level, parent_index) = state.tree.parent_of(level, index);
            state.tree.mark_free(parent_level, parent_index);

            level = parent_level;
            index = parent_index;
        }

        Ok(())
    }

    /// Releases the arena and metadata and returns the allocator to the
    /// uninitialized state.
    ///
    /// Outstanding addresses become invalid. The allocator may be
    /// initialized again afterwards.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live.
    pub fn teardown(&mut self) -> Result<(), AllocError> {
        match self.state.take() {
            Some(_) => Ok(()),
            None => Err(AllocError::NotInitialized),
        }
    }

    /// Reports, per level, how many maximal free blocks the arena holds.
    ///
    /// A free node is counted at the level where it is whole: two coalesced
    /// siblings appear as one node at their parent's level, not as two nodes
    /// at their own. Levels with no free node are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live.
    pub fn free_blocks_by_level(&self) -> Result<BTreeMap<u32, u64>, AllocError> {
        let state = self.state.as_ref().ok_or(AllocError::NotInitialized)?;

        let mut counts = BTreeMap::new();
        let mut stack: Vec<(u32, u64)> = Vec::new();
        stack.push((state.tree.root_level(), 0));

        while let Some((level, index)) = stack.pop() {
            if state.tree.is_free(level, index) {
                // Maximal free node: nothing below it is live, and the walk
                // never descends through a live allocation to reach it.
                *counts.entry(level).or_insert(0) += 1;
                continue;
            }

            let base_block = index << level;
            if state.levels.get(base_block) == Some(level) {
                // A live allocation occupies this whole node.
                continue;
            }

            if level > 0 {
                stack.push((level - 1, 2 * index));
                stack.push((level - 1, 2 * index + 1));
            }
        }

        Ok(counts)
    }

    /// The total free capacity of the arena in bytes.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live.
    pub fn free_bytes(&self) -> Result<u64, AllocError> {
        let block_size = self.block_size()?;
        let free = self.free_blocks_by_level()?;

        Ok(free
            .iter()
            .map(|(&level, &count)| count * (1 << level) * block_size)
            .sum())
    }

    /// Borrows the payload bytes of the live allocation at `addr`.
    ///
    /// The slice spans exactly the allocated block, `2^level` base blocks.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live and
    /// `InvalidAddress` if no live allocation starts at `addr`.
    pub fn bytes(&self, addr: Address) -> Result<&[u8], AllocError> {
        let state = self.state.as_ref().ok_or(AllocError::NotInitialized)?;
        let (offset, len) = state.span_of(addr)?;

        Ok(state.arena.bytes(offset, len))
    }

    /// Mutably borrows the payload bytes of the live allocation at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live and
    /// `InvalidAddress` if no live allocation starts at `addr`.
    pub fn bytes_mut(&mut self, addr: Address) -> Result<&mut [u8], AllocError> {
        let state = self.state.as_mut().ok_or(AllocError::NotInitialized)?;
        let (offset, len) = state.span_of(addr)?;

        Ok(state.arena.bytes_mut(offset, len))
    }

    /// Returns whether the allocator is in the ready state.
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// The base block size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live.
    pub fn block_size(&self) -> Result<u64, AllocError> {
        self.state
            .as_ref()
            .map(|s| s.block_size)
            .ok_or(AllocError::NotInitialized)
    }

    /// The usable arena size in bytes.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live.
    pub fn arena_size(&self) -> Result<u64, AllocError> {
        self.state
            .as_ref()
            .map(Ready::arena_size)
            .ok_or(AllocError::NotInitialized)
    }

    /// The number of base blocks in the arena.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the allocator is not live.
    pub fn num_blocks(&self) -> Result<u64, AllocError> {
        self.state
            .as_ref()
            .map(|s| s.num_blocks)
            .ok_or(AllocError::NotInitialized)
    }
}

impl Ready {
    fn arena_size(&self) -> u64 {
        self.block_size * self.num_blocks
    }

    /// The minimal level whose blocks hold `length` bytes, or `None` if
    /// `length` exceeds the arena.
    fn level_for(&self, length: u64) -> Option<u32> {
        if length <= self.block_size {
            return Some(0);
        }

        let blocks = length.div_ceil(self.block_size);
        let level = blocks.checked_next_power_of_two()?.ilog2();

        (level <= self.tree.root_level()).then_some(level)
    }

    /// Leftmost-fit search for a free node at `level`.
    ///
    /// Candidates are visited left to right. A live allocation recorded at a
    /// candidate's base block covers the next `2^(alloc_level - level)`
    /// candidates, and the scan skips them without touching their bits; this
    /// is what prunes subtrees owned by larger allocations and keeps a
    /// clear bit inside one from being mistaken for free space.
    fn find_free(&self, level: u32) -> Option<u64> {
        let candidates = self.tree.nodes_at(level);
        let mut index = 0;

        while index < candidates {
            let base_block = index << level;

            if let Some(alloc_level) = self.levels.get(base_block) {
                index += 1 << alloc_level.saturating_sub(level);
            } else if self.tree.is_free(level, index) {
                return Some(index);
            } else {
                index += 1;
            }
        }

        None
    }

    /// The base block index addressed by `addr`.
    fn base_block_of(&self, addr: Address) -> Result<u64, AllocError> {
        let offset = addr.offset();
        if offset >= self.arena_size() || offset % self.block_size != 0 {
            return Err(AllocError::InvalidAddress);
        }

        Ok(offset / self.block_size)
    }

    /// The byte span of the live allocation starting at `addr`.
    fn span_of(&self, addr: Address) -> Result<(usize, usize), AllocError> {
        let base_block = self.base_block_of(addr)?;
        let level = self.levels.get(base_block).ok_or(AllocError::InvalidAddress)?;

        let offset = usize::try_from(addr.offset()).expect("arena offset overflows usize");
        let len = usize::try_from((1u64 << level) * self.block_size)
            .expect("block span overflows usize");

        Ok((offset, len))
    }
}
