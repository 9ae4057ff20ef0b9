//! Property-based tests for allocator correctness
//!
//! Uses proptest to drive both allocators through random operation
//! sequences and check the accounting invariants after every step.

use blockalloc_rs::{
    AddressTranslator, ContiguousAllocator, FileAllocator, FileId, LinkedAllocator,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Create(u64),
    Extend(FileId, usize),
    Shrink(FileId, usize),
    Access(FileId, u64),
    Delete(FileId),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u64..200).prop_map(Op::Create),
        2 => (1u64..12, 0usize..10).prop_map(|(f, n)| Op::Extend(f, n)),
        2 => (1u64..12, 0usize..10).prop_map(|(f, n)| Op::Shrink(f, n)),
        2 => (1u64..12, 0u64..250).prop_map(|(f, o)| Op::Access(f, o)),
        1 => (1u64..12).prop_map(Op::Delete),
    ]
}

/// Apply `ops`, assigning create ids in order, and check consistency after each
fn replay(alloc: &mut dyn FileAllocator, ops: &[Op]) -> Result<(), TestCaseError> {
    let mut next_id: FileId = 1;

    for op in ops {
        let capacity_before = alloc.capacity();
        match *op {
            Op::Create(length) => {
                if alloc.create_file(next_id, length).is_ok() {
                    next_id += 1;
                } else {
                    prop_assert_eq!(alloc.capacity(), capacity_before);
                }
            }
            Op::Extend(file, n) => {
                if alloc.extend(file, n).is_ok() {
                    prop_assert_eq!(alloc.capacity(), capacity_before - n);
                }
            }
            Op::Shrink(file, n) => {
                if alloc.shrink(file, n).is_ok() {
                    prop_assert_eq!(alloc.capacity(), capacity_before + n);
                }
            }
            Op::Access(file, offset) => {
                let _ = alloc.access(file, offset);
                prop_assert_eq!(alloc.capacity(), capacity_before);
            }
            Op::Delete(file) => {
                let _ = alloc.delete(file);
            }
        }

        prop_assert!(
            alloc.check_consistency().is_ok(),
            "inconsistent after {:?}: {:?}",
            op,
            alloc.check_consistency()
        );

        let held: usize = (1..next_id)
            .filter(|&id| alloc.contains(id))
            .map(|id| alloc.blocks_used(id).unwrap())
            .sum();
        prop_assert_eq!(
            alloc.capacity() + held + alloc.reserved_blocks(),
            alloc.total_blocks()
        );
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_contiguous_accounting(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut dt = ContiguousAllocator::new(8, 96).unwrap();
        replay(&mut dt, &ops)?;
    }

    #[test]
    fn prop_linked_accounting(ops in prop::collection::vec(op_strategy(), 1..80)) {
        let mut fat = LinkedAllocator::new(8, 96, 1).unwrap();
        replay(&mut fat, &ops)?;
    }

    #[test]
    fn prop_bytes_to_blocks(block_size in 1u64..4096, a in 0u64..1_000_000, b in 0u64..1_000_000, k in 0usize..1000) {
        let t = AddressTranslator::new(block_size).unwrap();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(t.bytes_to_blocks(lo) <= t.bytes_to_blocks(hi));
        prop_assert_eq!(t.bytes_to_blocks(k as u64 * block_size), k);
    }

    #[test]
    fn prop_shrink_extend_round_trip(
        lengths in prop::collection::vec(17u64..120, 1..6),
        target in 0usize..6,
        k in 1usize..4,
    ) {
        let target = (target % lengths.len()) as FileId + 1;

        let mut dt = ContiguousAllocator::new(4, 256).unwrap();
        let mut fat = LinkedAllocator::new(4, 256, 1).unwrap();
        for (i, &len) in lengths.iter().enumerate() {
            dt.create_file(i as FileId + 1, len).unwrap();
            fat.create_file(i as FileId + 1, len).unwrap();
        }

        for alloc in [&mut dt as &mut dyn FileAllocator, &mut fat as &mut dyn FileAllocator] {
            let capacity = alloc.capacity();
            let held = alloc.blocks_used(target).unwrap();

            alloc.shrink(target, k).unwrap();
            alloc.extend(target, k).unwrap();

            prop_assert_eq!(alloc.capacity(), capacity);
            prop_assert_eq!(alloc.blocks_used(target).unwrap(), held);
            prop_assert!(alloc.check_consistency().is_ok());
        }
    }

    #[test]
    fn prop_contiguous_access_survives_compaction(
        lengths in prop::collection::vec(1u64..60, 2..10),
        victims in prop::collection::vec(any::<bool>(), 10),
        offset_seed in any::<u64>(),
    ) {
        let mut dt = ContiguousAllocator::new(6, 200).unwrap();
        for (i, &len) in lengths.iter().enumerate() {
            dt.create_file(i as FileId + 1, len).unwrap();
        }
        for (i, _) in lengths.iter().enumerate().filter(|(i, _)| victims[*i]) {
            dt.delete(i as FileId + 1).unwrap();
        }

        let survivors: Vec<(FileId, u64)> = dt
            .extents()
            .map(|(id, extent)| (id, offset_seed % extent.length + 1))
            .collect();
        let before: Vec<usize> = survivors
            .iter()
            .map(|&(id, off)| dt.access(id, off).unwrap() - dt.extent(id).unwrap().start)
            .collect();
        let mut order_before: Vec<FileId> = survivors.iter().map(|&(id, _)| id).collect();
        order_before.sort_by_key(|&id| dt.extent(id).unwrap().start);
        let size_before = dt.size();

        dt.compact();

        let t = AddressTranslator::new(6).unwrap();
        for (i, &(id, off)) in survivors.iter().enumerate() {
            let extent = dt.extent(id).unwrap();
            let block = dt.access(id, off).unwrap();
            prop_assert_eq!(block, extent.start + t.bytes_to_blocks(off) - 1);
            prop_assert_eq!(block - extent.start, before[i]);
        }

        let mut order_after = order_before.clone();
        order_after.sort_by_key(|&id| dt.extent(id).unwrap().start);
        prop_assert_eq!(order_before, order_after);
        prop_assert_eq!(dt.size(), size_before);
        prop_assert!(dt.blocks().run_is_free(dt.size(), dt.capacity()));
        prop_assert!(dt.check_consistency().is_ok());
    }

    #[test]
    fn prop_linked_hops_match_offset(
        fillers in prop::collection::vec(1u64..40, 0..8),
        length in 1u64..400,
        offset_seed in any::<u64>(),
    ) {
        let mut fat = LinkedAllocator::new(8, 512, 1).unwrap();
        for (i, &len) in fillers.iter().enumerate() {
            fat.create_file(100 + i as FileId, len).unwrap();
        }
        // Punch holes so the chain below is scattered
        for i in (0..fillers.len()).step_by(2) {
            fat.delete(100 + i as FileId).unwrap();
        }

        fat.create_file(1, length).unwrap();
        let chain = fat.chain(1).unwrap();
        let offset = offset_seed % (chain.len() as u64 * 8) + 1;

        let t = AddressTranslator::new(8).unwrap();
        let lookup = fat.locate(1, offset).unwrap();
        prop_assert_eq!(lookup.hops, t.bytes_to_blocks(offset) - 1);
        prop_assert_eq!(lookup.block, chain[lookup.hops]);
    }
}
