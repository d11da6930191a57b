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

use std::fs;
use std::path::Path;

use ptwalk_common::vmem::{MemoryReader, PageTableEntry, PhysAddr};
use tracing::{Span, instrument};

use super::{ENTRY_SIZE, entry_address, entry_from_bytes};
use crate::{PtWalkError, Result};

/// A reader over a raw dump of the target's physical memory, such as
/// the output of QEMU's `pmemsave`. The first byte of the image is the
/// byte at physical address `base`.
pub struct PhysImageReader {
    image: Vec<u8>,
    base: PhysAddr,
}

impl PhysImageReader {
    pub fn from_bytes(image: Vec<u8>, base: PhysAddr) -> Self {
        Self { image, base }
    }

    #[instrument(err(Debug), skip(path), fields(path = %path.as_ref().display()), parent = Span::current(), level = "Trace")]
    pub fn open(path: impl AsRef<Path>, base: PhysAddr) -> Result<Self> {
        let image = fs::read(path.as_ref())?;
        log::debug!(
            "loaded {:#x} bytes of physical memory at {base:#x}",
            image.len()
        );
        Ok(Self::from_bytes(image, base))
    }

    /// The physical address range covered by the image
    pub fn range(&self) -> core::ops::Range<u64> {
        self.base..self.base.saturating_add(self.image.len() as u64)
    }
}

impl MemoryReader for PhysImageReader {
    type Error = PtWalkError;

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn read_u64(&self, table_base: PhysAddr, index: u16) -> Result<PageTableEntry> {
        let address = entry_address(table_base, index)?;
        let start = address
            .checked_sub(self.base)
            .ok_or(PtWalkError::AddressNotMapped(address))?;
        let end = start
            .checked_add(ENTRY_SIZE)
            .ok_or(PtWalkError::CheckedAddOverflow(start, ENTRY_SIZE))?;
        if end > self.image.len() as u64 {
            return Err(PtWalkError::AddressNotMapped(address));
        }
        entry_from_bytes(&self.image[start as usize..end as usize], true)
    }
}
