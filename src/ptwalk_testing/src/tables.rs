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

//! Translation table fixtures.
//!
//! A [`TableFixture`] is a sparse set of `(table base, index) -> entry`
//! slots that tests turn into whatever a reader consumes: a lookup map,
//! a flat physical memory image, or the load segments of a core dump.

use std::collections::BTreeMap;

const ENTRY_SIZE: u64 = 8;

/// Build a level 0-2 table descriptor pointing at `next_table`
pub fn table_descriptor(next_table: u64) -> u64 {
    (next_table & 0x0000_FFFF_FFFF_F000) | 0b11
}

/// Build a level 3 page descriptor with the given AP[2:1] value and
/// execute-never bits. The access flag is set, as a real kernel would.
pub fn page_descriptor(page: u64, ap: u64, uxn: bool, pxn: bool) -> u64 {
    let mut entry = (page & 0x0000_FFFF_FFFF_F000) | ((ap & 0b11) << 6) | (1 << 10) | 0b11;
    if uxn {
        entry |= 1 << 54;
    }
    if pxn {
        entry |= 1 << 53;
    }
    entry
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableFixture {
    slots: BTreeMap<(u64, u16), u64>,
}

impl TableFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root at `0x1000`, mapping VA `0x401000` (indices 0/0/2/1) to the
    /// page at `0x50000`, read-only for both EL1 and EL0 and executable
    /// only from EL0.
    pub fn four_level_page() -> Self {
        let mut fixture = Self::new();
        fixture.set(0x1000, 0, table_descriptor(0x2000));
        fixture.set(0x2000, 0, table_descriptor(0x3000));
        fixture.set(0x3000, 2, table_descriptor(0x4000));
        // 0x0020_0000_0005_00C3 without the access flag
        fixture.set(0x4000, 1, page_descriptor(0x50000, 0b11, false, true) & !(1 << 10));
        fixture
    }

    /// The slot `four_level_page` uses at `level`
    pub fn four_level_slot(level: u8) -> (u64, u16) {
        match level {
            0 => (0x1000, 0),
            1 => (0x2000, 0),
            2 => (0x3000, 2),
            _ => (0x4000, 1),
        }
    }

    /// Clear the valid bit of the `four_level_page` slot at `level`
    pub fn invalidate_level(mut self, level: u8) -> Self {
        let (table, index) = Self::four_level_slot(level);
        let entry = self.get(table, index).unwrap_or(0);
        self.set(table, index, entry & !1);
        self
    }

    pub fn set(&mut self, table_base: u64, index: u16, entry: u64) {
        assert!(index < 512, "table index {index} out of range");
        self.slots.insert((table_base, index), entry);
    }

    pub fn get(&self, table_base: u64, index: u16) -> Option<u64> {
        self.slots.get(&(table_base, index)).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = ((u64, u16), u64)> + '_ {
        self.slots.iter().map(|(slot, entry)| (*slot, *entry))
    }

    /// Lay the fixture out as a flat little-endian physical memory
    /// image starting at `base`, large enough to hold every slot.
    pub fn to_image(&self, base: u64) -> Vec<u8> {
        let end = self
            .slots
            .keys()
            .map(|(table, index)| table + u64::from(*index) * ENTRY_SIZE + ENTRY_SIZE)
            .max()
            .unwrap_or(base);
        assert!(end >= base, "fixture has slots below image base {base:#x}");
        let mut image = vec![0u8; (end - base) as usize];
        for ((table, index), entry) in self.entries() {
            let offset = (table + u64::from(index) * ENTRY_SIZE - base) as usize;
            image[offset..offset + ENTRY_SIZE as usize].copy_from_slice(&entry.to_le_bytes());
        }
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_level_leaf_matches_reference_value() {
        let fixture = TableFixture::four_level_page();
        assert_eq!(fixture.get(0x4000, 1), Some(0x0020_0000_0005_00C3));
        assert_eq!(fixture.get(0x1000, 0), Some(0x2003));
    }

    #[test]
    fn image_places_entries_at_their_offsets() {
        let mut fixture = TableFixture::new();
        fixture.set(0x1000, 2, 0x1122_3344_5566_7788);
        let image = fixture.to_image(0x1000);
        assert_eq!(image.len(), 24);
        assert_eq!(&image[16..24], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert!(image[..16].iter().all(|b| *b == 0));
    }
}
