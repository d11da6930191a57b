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

use std::cell::RefCell;
use std::collections::HashMap;

use ptwalk_common::vmem::{MemoryReader, PageTableEntry, PhysAddr};
use tracing::{Span, instrument};

use super::entry_address;
use crate::{PtWalkError, Result};

/// A reader over a flat `(table base, index) -> entry` map.
///
/// Every read is recorded, successful or not, so tests can check
/// exactly which slots a walk touched. A slot with no entry is reported
/// as unmapped rather than read as zero.
#[derive(Debug, Default)]
pub struct InMemoryReader {
    entries: HashMap<(PhysAddr, u16), PageTableEntry>,
    reads: RefCell<Vec<(PhysAddr, u16)>>,
}

impl InMemoryReader {
    /// An empty reader; every read fails until entries are inserted
    pub fn new() -> Self {
        Self::default()
    }

    /// Set slot `index` of the table at `table_base`
    pub fn insert(&mut self, table_base: PhysAddr, index: u16, entry: PageTableEntry) -> Result<()> {
        // validates the index
        entry_address(table_base, index)?;
        self.entries.insert((table_base, index), entry);
        Ok(())
    }

    /// The slots read so far, in order
    pub fn reads(&self) -> Vec<(PhysAddr, u16)> {
        self.reads.borrow().clone()
    }

    pub fn clear_reads(&self) -> Result<()> {
        self.reads.try_borrow_mut()?.clear();
        Ok(())
    }
}

impl FromIterator<((PhysAddr, u16), PageTableEntry)> for InMemoryReader {
    fn from_iter<I: IntoIterator<Item = ((PhysAddr, u16), PageTableEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            reads: RefCell::new(Vec::new()),
        }
    }
}

impl MemoryReader for InMemoryReader {
    type Error = PtWalkError;

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn read_u64(&self, table_base: PhysAddr, index: u16) -> Result<PageTableEntry> {
        self.reads.try_borrow_mut()?.push((table_base, index));
        let address = entry_address(table_base, index)?;
        self.entries
            .get(&(table_base, index))
            .copied()
            .ok_or(PtWalkError::AddressNotMapped(address))
    }
}

#[cfg(test)]
mod tests {
    use ptwalk_common::vmem::{EntryKind, WalkResult, walk};
    use ptwalk_testing::tables::TableFixture;

    use super::*;

    #[test]
    fn reads_are_recorded_in_order() {
        let reader: InMemoryReader = TableFixture::four_level_page().entries().collect();
        let walk = walk(&reader, 0x1000, 0x401000).unwrap();
        assert!(walk.result.is_success());
        assert_eq!(
            reader.reads(),
            vec![(0x1000, 0), (0x2000, 0), (0x3000, 2), (0x4000, 1)]
        );

        reader.clear_reads().unwrap();
        assert!(reader.reads().is_empty());
    }

    #[test]
    fn missing_slot_is_not_mapped() {
        let mut reader = InMemoryReader::new();
        reader.insert(0x1000, 0, 0x2003).unwrap();
        let err = reader.read_u64(0x2000, 3).unwrap_err();
        assert!(matches!(err, PtWalkError::AddressNotMapped(0x2018)));
        assert_eq!(reader.reads(), vec![(0x2000, 3)]);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut reader = InMemoryReader::new();
        assert!(matches!(
            reader.insert(0x1000, 512, 0),
            Err(PtWalkError::IndexOutOfRange(512))
        ));
        assert!(matches!(
            reader.read_u64(0x1000, 600),
            Err(PtWalkError::IndexOutOfRange(600))
        ));
    }

    #[test]
    fn invalid_level_zero_reads_once() {
        let reader: InMemoryReader = TableFixture::four_level_page()
            .invalidate_level(0)
            .entries()
            .collect();
        let walk = walk(&reader, 0x1000, 0x401000).unwrap();
        assert_eq!(
            walk.result,
            WalkResult::Failure {
                level: 0,
                kind: EntryKind::Invalid
            }
        );
        assert_eq!(reader.reads().len(), 1);
    }
}
