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

use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

#[path = "arch/aarch64/vmem.rs"]
mod arch;

pub use arch::{
    LEAF_LEVEL, PAGE_SIZE, PAGE_TABLE_SIZE, PTE_ADDR_MASK, PageTableEntry, PhysAddr,
    TRANSLATION_LEVELS, VA_MASK, VirtAddr,
};
pub const PAGE_TABLE_ENTRIES_PER_TABLE: usize =
    PAGE_TABLE_SIZE / core::mem::size_of::<PageTableEntry>();

/// The operation used to fetch translation table entries, which lets
/// the same walker run against a live target, a core dump, or a plain
/// in-memory table image.
pub trait MemoryReader {
    /// The reason a table entry could not be read
    type Error: fmt::Debug + fmt::Display;

    /// Read the 8-byte entry at slot `index` (0..=511) of the table
    /// whose base address is `table_base`.
    ///
    /// `table_base` is the address as it appears in the parent
    /// descriptor (or the root the caller supplied). Implementations
    /// are responsible for mapping it into whatever address space they
    /// can actually read from.
    ///
    /// Reads must reflect the target as it is: implementations should
    /// not retry or substitute a value on failure.
    fn read_u64(&self, table_base: PhysAddr, index: u16) -> Result<PageTableEntry, Self::Error>;
}

impl<R: MemoryReader + ?Sized> MemoryReader for &R {
    type Error = R::Error;

    #[inline]
    fn read_u64(&self, table_base: PhysAddr, index: u16) -> Result<PageTableEntry, Self::Error> {
        <R as MemoryReader>::read_u64(&**self, table_base, index)
    }
}

impl<R: MemoryReader + ?Sized> MemoryReader for alloc::boxed::Box<R> {
    type Error = R::Error;

    #[inline]
    fn read_u64(&self, table_base: PhysAddr, index: u16) -> Result<PageTableEntry, Self::Error> {
        <R as MemoryReader>::read_u64(&**self, table_base, index)
    }
}

/// The per-level table indices and page offset of a virtual address
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "fuzzing", derive(arbitrary::Arbitrary))]
pub struct VaIndices {
    pub l0: u16,
    pub l1: u16,
    pub l2: u16,
    pub l3: u16,
    pub offset: u16,
}

impl VaIndices {
    /// The table index used at `level`, or `None` past the last level
    pub fn at_level(&self, level: u8) -> Option<u16> {
        match level {
            0 => Some(self.l0),
            1 => Some(self.l1),
            2 => Some(self.l2),
            3 => Some(self.l3),
            _ => None,
        }
    }

    /// Rebuild the (48-bit) virtual address these indices were taken from
    pub fn to_address(&self) -> VirtAddr {
        (u64::from(self.l0) << 39)
            | (u64::from(self.l1) << 30)
            | (u64::from(self.l2) << 21)
            | (u64::from(self.l3) << 12)
            | u64::from(self.offset)
    }
}

/// The kind of a translation table descriptor
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Bit 0 clear; the walk cannot continue
    Invalid,
    /// A block mapping at level 0-2, covering a large contiguous region
    Block,
    /// A pointer to the next level table
    Table,
    /// A level 3 page mapping
    Page,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Invalid => write!(f, "Invalid"),
            EntryKind::Block => write!(f, "Block"),
            EntryKind::Table => write!(f, "Table"),
            EntryKind::Page => write!(f, "Page"),
        }
    }
}

/// A classified descriptor, together with the output address it
/// carries when it has one.
///
/// Block descriptors deliberately carry no address: their output
/// address and attributes are not decoded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Entry {
    Invalid,
    Block,
    Table(PhysAddr),
    Page(PhysAddr),
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Invalid => EntryKind::Invalid,
            Entry::Block => EntryKind::Block,
            Entry::Table(_) => EntryKind::Table,
            Entry::Page(_) => EntryKind::Page,
        }
    }

    /// The next level table or page address, for Table and Page entries
    pub fn output_address(&self) -> Option<PhysAddr> {
        match self {
            Entry::Table(addr) | Entry::Page(addr) => Some(*addr),
            Entry::Invalid | Entry::Block => None,
        }
    }
}

bitflags! {
    /// Effective access permissions of a page, for privileged (EL1)
    /// and unprivileged (EL0) accesses
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PermissionAttributes: u8 {
        const USER_READ = 1;
        const USER_WRITE = 2;
        const USER_EXEC = 4;
        const PRIV_READ = 8;
        const PRIV_WRITE = 16;
        const PRIV_EXEC = 32;
    }
}

impl PermissionAttributes {
    /// The privileged read/write/execute view of these permissions
    pub fn privileged(&self) -> Rwx {
        Rwx {
            read: self.contains(Self::PRIV_READ),
            write: self.contains(Self::PRIV_WRITE),
            execute: self.contains(Self::PRIV_EXEC),
        }
    }

    /// The unprivileged read/write/execute view of these permissions
    pub fn user(&self) -> Rwx {
        Rwx {
            read: self.contains(Self::USER_READ),
            write: self.contains(Self::USER_WRITE),
            execute: self.contains(Self::USER_EXEC),
        }
    }
}

/// One execution context's permissions; displays as e.g. `R-X`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rwx {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl fmt::Display for Rwx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.read, 'R'),
            flag(self.write, 'W'),
            flag(self.execute, 'X')
        )
    }
}

/// A single level visited by a walk
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WalkStep {
    pub level: u8,
    /// The table the entry was read from
    pub table_base: PhysAddr,
    pub index: u16,
    /// The raw descriptor, exactly as read
    pub entry: PageTableEntry,
    pub kind: EntryKind,
}

/// How a walk ended, when every read succeeded
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WalkResult {
    /// A level 3 page was reached
    Success {
        address: PhysAddr,
        permissions: PermissionAttributes,
    },
    /// An invalid descriptor ended the walk
    Failure { level: u8, kind: EntryKind },
    /// A block descriptor was reached. Block mappings are not resolved
    /// any further, so this is a stop rather than an error.
    Stopped { level: u8, kind: EntryKind },
}

impl WalkResult {
    pub fn is_success(&self) -> bool {
        matches!(self, WalkResult::Success { .. })
    }

    /// The level at which the walk ended
    pub fn level(&self) -> u8 {
        match self {
            WalkResult::Success { .. } => LEAF_LEVEL,
            WalkResult::Failure { level, .. } | WalkResult::Stopped { level, .. } => *level,
        }
    }
}

/// A completed walk: the address looked up, every level visited, and
/// the terminal result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Walk {
    pub address: VirtAddr,
    pub table_base: PhysAddr,
    pub indices: VaIndices,
    pub steps: Vec<WalkStep>,
    pub result: WalkResult,
}

impl Walk {
    /// The physical address `address` translates to, if the walk
    /// reached a page
    pub fn physical_address(&self) -> Option<PhysAddr> {
        match self.result {
            WalkResult::Success { address, .. } => Some(address | u64::from(self.indices.offset)),
            _ => None,
        }
    }
}

/// A table entry could not be read. The walk stops at that level; the
/// levels visited before it are kept for reporting.
#[derive(Debug)]
pub struct ReadFailure<E> {
    pub level: u8,
    pub table_base: PhysAddr,
    pub index: u16,
    pub steps: Vec<WalkStep>,
    pub source: E,
}

impl<E: fmt::Display> fmt::Display for ReadFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "l{} read of entry {} in table {:#x} failed: {}",
            self.level, self.index, self.table_base, self.source
        )
    }
}

impl<E: fmt::Debug + fmt::Display> core::error::Error for ReadFailure<E> {}

/// Split a virtual address into its per-level table indices and page
/// offset. Bits above 47 are ignored.
pub use arch::decompose;
/// Classify one descriptor read at `level`
pub use arch::classify;
/// Decode the effective permissions of a level 3 page descriptor
pub use arch::decode_permissions;
/// Walk the translation tables rooted at `table_base` for `address`
///
/// Exactly one entry is read per level visited, and deeper levels are
/// never read once a walk has ended.
pub use arch::walk;
/// Translate `address` to the physical address it maps to, if any
pub use arch::virt_to_phys;
