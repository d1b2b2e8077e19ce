//! A binary-buddy allocator over a fixed arena.
//!
//! The arena is a contiguous byte region subdivided into power-of-two-sized
//! base blocks. Requests are served in power-of-two multiples of the base
//! block size; a block and its buddy are merged back into their parent as
//! soon as both are free, so the arena never fragments beyond what the live
//! allocations force.
//!
//! An allocator is an owned value with a two-state lifecycle: constructed
//! uninitialized, made ready by [`BuddyAllocator::init`], and returned to the
//! uninitialized state by [`BuddyAllocator::teardown`] (or by dropping it).
//! Callers receive opaque [`Address`] handles rather than pointers; payload
//! bytes are reached through [`BuddyAllocator::bytes`] and
//! [`BuddyAllocator::bytes_mut`], which borrow exactly the allocated span.
//!
//! Running out of space is not an error: [`BuddyAllocator::alloc`] reports it
//! as `Ok(None)`. The [`AllocError`] variants are reserved for misuse, such
//! as freeing an address twice or operating on a torn-down allocator.
//!
//! # Example
//!
//! ```
//! use buddy_arena::BuddyAllocator;
//!
//! let mut alloc = BuddyAllocator::new();
//!
//! // Sizes are promoted to the next power of two; the usable size is
//! // reported back.
//! let usable = alloc.init(128, 1024)?;
//! assert_eq!(usable, 1024);
//!
//! let addr = alloc.alloc(300)?.expect("arena has space");
//! alloc.bytes_mut(addr)?[0] = 0xa5;
//! assert_eq!(alloc.bytes(addr)?[0], 0xa5);
//!
//! alloc.free(addr)?;
//! # Ok::<(), buddy_arena::AllocError>(())
//! ```

#![no_std]
#![doc(html_root_url = "https://docs.rs/buddy_arena/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

mod arena;
mod bitmap;
pub mod buddy;
mod level_table;
mod tree;


use core::fmt;

pub use crate::buddy::BuddyAllocator;

/// The error type for allocator operations.
///
/// Every variant signals misuse of the call surface or an init-time
/// reservation failure. Exhaustion of the arena is not represented here; see
/// [`BuddyAllocator::alloc`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AllocError {
    /// `init` was called on an allocator that is already live.
    AlreadyInitialized,

    /// An operation other than `init` was called on an allocator that has not
    /// been initialized, or has been torn down.
    NotInitialized,

    /// The arena or one of the metadata buffers could not be reserved.
    ///
    /// This is fatal to the `init` call that reported it, not to the process;
    /// the allocator remains uninitialized and `init` may be retried.
    OutOfMemory,

    /// `free` or a payload accessor was given an address that is outside the
    /// arena or not aligned to a base block boundary.
    InvalidAddress,

    /// `free` was given a block-aligned address with no live allocation
    /// recorded at it.
    DoubleFree,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AllocError::AlreadyInitialized => "allocator is already initialized",
            AllocError::NotInitialized => "allocator is not initialized",
            AllocError::OutOfMemory => "arena or metadata reservation failed",
            AllocError::InvalidAddress => "address is outside the arena or unaligned",
            AllocError::DoubleFree => "no live allocation at address",
        };

        f.write_str(msg)
    }
}

impl core::error::Error for AllocError {}

/// An opaque handle to a live allocation.
///
/// Wraps the byte offset of the block's start within the arena. Handles are
/// produced by [`BuddyAllocator::alloc`] and consumed by
/// [`BuddyAllocator::free`] and the payload accessors; they carry no
/// provenance and become dangling once freed.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Address(u64);

impl Address {
    pub(crate) fn new(offset: u64) -> Address {
        Address(offset)
    }

    /// Returns the byte offset of the block from the start of the arena.
    pub fn offset(self) -> u64 {
        self.0
    }
}
