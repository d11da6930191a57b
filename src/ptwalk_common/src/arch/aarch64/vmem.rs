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

//! AArch64 translation table walking.
//!
//! This module decodes VMSAv8-64 stage 1 tables with a 4KB granule and
//! 48-bit virtual addresses, i.e. the 4-level layout:
//! - Level 0: bits 47:39 - 512 entries, each covering 512GB
//! - Level 1: bits 38:30 - 512 entries, each covering 1GB
//! - Level 2: bits 29:21 - 512 entries, each covering 2MB
//! - Level 3: bits 20:12 - 512 entries, each covering 4KB pages
//!
//! Walking is read-only. Each level's table base comes from the
//! previous level's descriptor, so levels are read strictly in order.

use alloc::vec::Vec;

#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::vmem::{
    Entry, EntryKind, MemoryReader, PermissionAttributes, ReadFailure, VaIndices, Walk, WalkResult,
    WalkStep,
};

// Descriptor format
//
// See the Arm Architecture Reference Manual for A-profile architecture,
// section D8.3 "Translation table descriptor formats", or
//
// https://developer.arm.com/documentation/ddi0487/latest
//

/// Descriptor is valid
const DESC_VALID: u64 = 1;
/// At levels 0-2, set for a table descriptor and clear for a block
/// descriptor. At level 3 a valid descriptor is always a page.
const DESC_TABLE: u64 = 1 << 1;
/// Unprivileged execute-never
const ATTR_UXN: u8 = 54;
/// Privileged execute-never
const ATTR_PXN: u8 = 53;
/// AP[2:1], the data access permissions
const ATTR_AP: u8 = 6;
/// Mask to extract the output address from a table or page descriptor
/// (bits 47:12 for a 4KB granule)
pub const PTE_ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// We only decode 48-bit virtual addresses
const VA_BITS: usize = 48;
pub const VA_MASK: u64 = (1u64 << VA_BITS) - 1;

pub const TRANSLATION_LEVELS: u8 = 4;
/// The only level at which page descriptors exist
pub const LEAF_LEVEL: u8 = TRANSLATION_LEVELS - 1;

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_TABLE_SIZE: usize = 4096;
pub type PageTableEntry = u64;
pub type VirtAddr = u64;
pub type PhysAddr = u64;

/// Utility function to extract an (inclusive on both ends) bit range
/// from a quadword.
#[inline(always)]
fn bits<const HIGH_BIT: u8, const LOW_BIT: u8>(x: u64) -> u64 {
    (x & ((1 << (HIGH_BIT + 1)) - 1)) >> LOW_BIT
}

#[inline(always)]
fn bit_clear(x: u64, bit: u8) -> bool {
    x & (1 << bit) == 0
}

pub fn decompose(address: VirtAddr) -> VaIndices {
    VaIndices {
        l0: bits::<47, 39>(address) as u16,
        l1: bits::<38, 30>(address) as u16,
        l2: bits::<29, 21>(address) as u16,
        l3: bits::<20, 12>(address) as u16,
        offset: bits::<11, 0>(address) as u16,
    }
}

/// Bit 1 means different things depending on the level: at levels 0-2
/// it tells a table from a block, while at level 3 any valid descriptor
/// is taken as a page (including the reserved 0b01 encoding). So the
/// level has to be known before the descriptor can be interpreted.
pub fn classify(entry: PageTableEntry, level: u8) -> Entry {
    if entry & DESC_VALID == 0 {
        return Entry::Invalid;
    }
    if level < LEAF_LEVEL {
        if entry & DESC_TABLE == 0 {
            // Block output addresses and attributes are not decoded
            Entry::Block
        } else {
            Entry::Table(entry & PTE_ADDR_MASK)
        }
    } else {
        Entry::Page(entry & PTE_ADDR_MASK)
    }
}

/// Only meaningful for level 3 page descriptors.
///
/// | AP | EL1 | EL0 |
/// |----|-----|-----|
/// | 00 | RW  | --  |
/// | 01 | RW  | RW  |
/// | 10 | R-  | --  |
/// | 11 | R-  | R-  |
pub fn decode_permissions(entry: PageTableEntry) -> PermissionAttributes {
    let mut attributes = PermissionAttributes::empty();

    if bit_clear(entry, ATTR_UXN) {
        attributes |= PermissionAttributes::USER_EXEC;
    }
    if bit_clear(entry, ATTR_PXN) {
        attributes |= PermissionAttributes::PRIV_EXEC;
    }

    attributes |= match (entry >> ATTR_AP) & 0b11 {
        0b00 => PermissionAttributes::PRIV_READ | PermissionAttributes::PRIV_WRITE,
        0b01 => {
            PermissionAttributes::PRIV_READ
                | PermissionAttributes::PRIV_WRITE
                | PermissionAttributes::USER_READ
                | PermissionAttributes::USER_WRITE
        }
        0b10 => PermissionAttributes::PRIV_READ,
        _ => PermissionAttributes::PRIV_READ | PermissionAttributes::USER_READ,
    };
    attributes
}

#[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
pub fn walk<R: MemoryReader>(
    reader: &R,
    table_base: PhysAddr,
    address: VirtAddr,
) -> Result<Walk, ReadFailure<R::Error>> {
    let indices = decompose(address);
    let mut steps = Vec::with_capacity(TRANSLATION_LEVELS as usize);
    let mut current_table = table_base;

    for level in 0..TRANSLATION_LEVELS {
        let index = match indices.at_level(level) {
            Some(index) => index,
            None => break,
        };
        let entry = match reader.read_u64(current_table, index) {
            Ok(entry) => entry,
            Err(source) => {
                log::debug!("l{level} read of {current_table:#x}[{index}] failed: {source}");
                return Err(ReadFailure {
                    level,
                    table_base: current_table,
                    index,
                    steps,
                    source,
                });
            }
        };
        let classified = classify(entry, level);
        log::trace!(
            "l{level} {current_table:#x}[{index}] = {entry:#x} ({})",
            classified.kind()
        );
        steps.push(WalkStep {
            level,
            table_base: current_table,
            index,
            entry,
            kind: classified.kind(),
        });

        let result = match classified {
            Entry::Invalid => WalkResult::Failure {
                level,
                kind: EntryKind::Invalid,
            },
            Entry::Block => WalkResult::Stopped {
                level,
                kind: EntryKind::Block,
            },
            Entry::Table(next) => {
                current_table = next;
                continue;
            }
            Entry::Page(page) => WalkResult::Success {
                address: page,
                permissions: decode_permissions(entry),
            },
        };
        log::debug!("walk of {address:#x} ended at l{level}: {result:?}");
        return Ok(Walk {
            address,
            table_base,
            indices,
            steps,
            result,
        });
    }

    // classify() only hands out tables below the leaf level, so the
    // loop always returns before running out of levels
    unreachable!("translation table walk ran past level 3")
}

/// Translate a virtual address to its physical address by walking the
/// translation tables.
///
/// Returns `Ok(None)` when the walk ends on an invalid or block
/// descriptor.
pub fn virt_to_phys<R: MemoryReader>(
    reader: &R,
    table_base: PhysAddr,
    address: VirtAddr,
) -> Result<Option<PhysAddr>, ReadFailure<R::Error>> {
    walk(reader, table_base, address).map(|w| w.physical_address())
}
