/*
Copyright 2025 The ptwalk Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

#![no_main]

use std::cell::RefCell;

use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;
use ptwalk_common::vmem::{
    EntryKind, LEAF_LEVEL, MemoryReader, PhysAddr, VaIndices, WalkResult, classify, decompose,
    walk,
};

/// Table memory: a small pool of entries, picked by hashing the slot
/// address, so any descriptor can point anywhere and still be read
#[derive(Arbitrary, Debug)]
struct Input {
    indices: VaIndices,
    table_base: u64,
    entries: Vec<u64>,
    fail_at_read: Option<u8>,
}

struct PoolReader<'a> {
    entries: &'a [u64],
    fail_at_read: Option<usize>,
    reads: RefCell<Vec<(PhysAddr, u16)>>,
}

impl MemoryReader for PoolReader<'_> {
    type Error = &'static str;

    fn read_u64(&self, table_base: PhysAddr, index: u16) -> Result<u64, Self::Error> {
        let mut reads = self.reads.borrow_mut();
        reads.push((table_base, index));
        if Some(reads.len() - 1) == self.fail_at_read || self.entries.is_empty() {
            return Err("unreadable");
        }
        let slot = table_base.wrapping_add(u64::from(index) * 8) >> 3;
        Ok(self.entries[(slot % self.entries.len() as u64) as usize])
    }
}

fn masked(indices: VaIndices) -> u64 {
    VaIndices {
        l0: indices.l0 & 0x1FF,
        l1: indices.l1 & 0x1FF,
        l2: indices.l2 & 0x1FF,
        l3: indices.l3 & 0x1FF,
        offset: indices.offset & 0xFFF,
    }
    .to_address()
}

fuzz_target!(|input: Input| {
    let address = masked(input.indices);
    let expected = decompose(address);
    let reader = PoolReader {
        entries: &input.entries,
        fail_at_read: input.fail_at_read.map(usize::from),
        reads: RefCell::new(Vec::new()),
    };

    let steps = match walk(&reader, input.table_base, address) {
        Ok(walk) => {
            let last = walk.steps.last().expect("a finished walk read at least one entry");
            assert_eq!(walk.result.level(), last.level);
            match walk.result {
                WalkResult::Success { address: page, .. } => {
                    assert_eq!(last.level, LEAF_LEVEL);
                    assert_eq!(classify(last.entry, LEAF_LEVEL).output_address(), Some(page));
                }
                WalkResult::Failure { kind, .. } => assert_eq!(kind, EntryKind::Invalid),
                WalkResult::Stopped { kind, level } => {
                    assert_eq!(kind, EntryKind::Block);
                    assert!(level < LEAF_LEVEL);
                }
            }
            walk.steps
        }
        Err(failure) => {
            assert_eq!(usize::from(failure.level), failure.steps.len());
            failure.steps
        }
    };

    let reads = reader.reads.borrow();
    assert!(reads.len() <= 4);
    assert!(reads.len() >= steps.len());
    assert_eq!(reads[0].0, input.table_base);
    for (level, step) in steps.iter().enumerate() {
        assert_eq!(usize::from(step.level), level);
        assert_eq!(Some(step.index), expected.at_level(step.level));
        assert_eq!(reads[level], (step.table_base, step.index));
        if step.kind == EntryKind::Page {
            assert_eq!(step.level, LEAF_LEVEL);
        }
    }
});
