#![no_main]
use blockalloc_rs::{ContiguousAllocator, FileAllocator, LinkedAllocator};
use libfuzzer_sys::{
    arbitrary::{Arbitrary, Unstructured},
    fuzz_target,
};

#[derive(Debug, Arbitrary)]
enum FileOp {
    Create { length: u16 },
    Extend { file: u8, blocks: u8 },
    Shrink { file: u8, blocks: u8 },
    Access { file: u8, offset: u16 },
    Delete { file: u8 },
}

#[derive(Debug, Arbitrary)]
struct Volume {
    block_size: u8,
    block_count: u8,
    fat_entry_size: u8,
}

fn replay(alloc: &mut dyn FileAllocator, ops: &[FileOp]) {
    let mut next_id = 1u64;

    for op in ops {
        match *op {
            FileOp::Create { length } => {
                if alloc.create_file(next_id, length as u64).is_ok() {
                    next_id += 1;
                }
            }
            FileOp::Extend { file, blocks } => {
                let _ = alloc.extend(file as u64, blocks as usize);
            }
            FileOp::Shrink { file, blocks } => {
                let _ = alloc.shrink(file as u64, blocks as usize);
            }
            FileOp::Access { file, offset } => {
                let _ = alloc.access(file as u64, offset as u64);
            }
            FileOp::Delete { file } => {
                let _ = alloc.delete(file as u64);
            }
        }

        if let Err(e) = alloc.check_consistency() {
            panic!("{:?} left the volume inconsistent: {}", op, e);
        }
    }
}

// Random operation sequences must never break block accounting
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);

    let volume: Volume = match u.arbitrary() {
        Ok(v) => v,
        Err(_) => return,
    };
    let ops: Vec<FileOp> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let block_size = volume.block_size.max(1) as u64;
    let block_count = volume.block_count.max(1) as usize;

    if let Ok(mut dt) = ContiguousAllocator::new(block_size, block_count) {
        replay(&mut dt, &ops);
    }
    if let Ok(mut fat) = LinkedAllocator::new(block_size, block_count, volume.fat_entry_size as u64) {
        replay(&mut fat, &ops);
    }
});
