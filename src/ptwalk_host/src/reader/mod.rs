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

use ptwalk_common::vmem::{PAGE_TABLE_ENTRIES_PER_TABLE, PageTableEntry, PhysAddr};

use crate::{PtWalkError, Result};

mod core_dump;
mod gdb_remote;
mod in_memory;
mod phys_image;

pub use core_dump::CoreDumpReader;
pub use gdb_remote::GdbRemoteReader;
pub use in_memory::InMemoryReader;
pub use phys_image::PhysImageReader;

/// Size in bytes of one translation table entry
pub const ENTRY_SIZE: u64 = core::mem::size_of::<PageTableEntry>() as u64;

/// The address of slot `index` in the table at `table_base`.
///
/// Fails for an index past the end of a table, or if the address
/// would not fit in 64 bits.
pub fn entry_address(table_base: PhysAddr, index: u16) -> Result<u64> {
    if usize::from(index) >= PAGE_TABLE_ENTRIES_PER_TABLE {
        return Err(PtWalkError::IndexOutOfRange(index));
    }
    let offset = u64::from(index) * ENTRY_SIZE;
    table_base
        .checked_add(offset)
        .ok_or(PtWalkError::CheckedAddOverflow(offset, table_base))
}

/// Decode an entry from the bytes a reader fetched
pub(crate) fn entry_from_bytes(bytes: &[u8], little_endian: bool) -> Result<PageTableEntry> {
    let bytes: [u8; ENTRY_SIZE as usize] = bytes.try_into()?;
    Ok(if little_endian {
        u64::from_le_bytes(bytes)
    } else {
        u64::from_be_bytes(bytes)
    })
}
