#![no_main]

use arbitrary::Arbitrary;
use buddy_arena::{Address, BuddyAllocator};
use libfuzzer_sys::fuzz_target;

const MAX_ARENA: u64 = 1 << 20;

#[derive(Clone, Debug, Arbitrary)]
enum BuddyOp {
    Alloc(u64),
    Free(usize),
    Diagnostics,
}

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    block_size: u16,
    arena_size: u32,
    ops: Vec<BuddyOp>,
}

fuzz_target!(|args: Args| {
    let mut alloc = BuddyAllocator::new();

    let usable = match alloc.init(
        u64::from(args.block_size),
        u64::from(args.arena_size) % MAX_ARENA,
    ) {
        Ok(usable) => usable,
        Err(_) => return,
    };

    let mut outstanding: Vec<Address> = Vec::new();

    for op in args.ops {
        match op {
            BuddyOp::Alloc(len) => {
                if let Some(addr) = alloc.alloc(len % MAX_ARENA).unwrap() {
                    alloc.bytes_mut(addr).unwrap().fill(0xfe);
                    outstanding.push(addr);
                }
            }

            BuddyOp::Free(raw_idx) => {
                if outstanding.is_empty() {
                    continue;
                }

                let idx = raw_idx % outstanding.len();
                let addr = outstanding.swap_remove(idx);
                alloc.free(addr).unwrap();
            }

            BuddyOp::Diagnostics => {
                let free = alloc.free_blocks_by_level().unwrap();
                let block_size = alloc.block_size().unwrap();

                let free_bytes: u64 = free
                    .iter()
                    .map(|(&level, &count)| count * (1 << level) * block_size)
                    .sum();
                assert!(free_bytes <= usable);
            }
        }
    }

    // Every sequence must coalesce back to an empty arena.
    for addr in outstanding.drain(..) {
        alloc.free(addr).unwrap();
    }
    assert_eq!(alloc.free_bytes().unwrap(), usable);
});
