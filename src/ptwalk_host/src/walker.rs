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

use ptwalk_common::vmem::{self, MemoryReader, PhysAddr, VirtAddr, Walk};
use tracing::{Span, instrument};

use crate::args::WalkRequest;
use crate::{PtWalkError, Result};

/// Walks translation tables through a reader.
///
/// Each walk is independent; the walker keeps no state between calls
/// beyond the reader itself.
pub struct PageTableWalker<R> {
    reader: R,
}

impl<R: MemoryReader<Error = PtWalkError>> PageTableWalker<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn into_reader(self) -> R {
        self.reader
    }

    /// Walk the tables for a parsed request.
    ///
    /// An invalid or block descriptor is a normal outcome and is
    /// reported in the returned [`Walk`]. A failed read is an error:
    /// [`PtWalkError::TableReadFailed`], which still carries the levels
    /// read before the failure.
    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Debug")]
    pub fn walk(&self, request: &WalkRequest) -> Result<Walk> {
        self.walk_address(request.table_base, request.address)
    }

    pub fn walk_address(&self, table_base: PhysAddr, address: VirtAddr) -> Result<Walk> {
        let walk = vmem::walk(&self.reader, table_base, address)?;
        log::debug!(
            "{address:#x} in table {table_base:#x}: {:?} after {} reads",
            walk.result,
            walk.steps.len()
        );
        Ok(walk)
    }

    /// The physical address `address` maps to, or `None` if the walk
    /// ended on an invalid or block descriptor
    pub fn translate(&self, table_base: PhysAddr, address: VirtAddr) -> Result<Option<PhysAddr>> {
        Ok(vmem::virt_to_phys(&self.reader, table_base, address)?)
    }
}
