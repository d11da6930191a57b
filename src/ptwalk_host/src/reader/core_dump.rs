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

use goblin::elf::Elf;
use goblin::elf::header::{EM_AARCH64, ET_CORE};
use goblin::elf::program_header::PT_LOAD;
use ptwalk_common::vmem::{MemoryReader, PageTableEntry, PhysAddr};
use tracing::{Span, instrument};

use super::{ENTRY_SIZE, entry_address, entry_from_bytes};
use crate::config::TableAddressMode;
use crate::{PtWalkError, Result, new_error};

/// One `PT_LOAD` segment, keyed by the address it is looked up by
#[derive(Copy, Clone, Debug)]
struct LoadSegment {
    start: u64,
    mem_size: u64,
    file_offset: u64,
    file_size: u64,
}

impl LoadSegment {
    fn contains(&self, address: u64) -> bool {
        address >= self.start && address - self.start < self.mem_size
    }
}

/// A reader over an ELF core file of the target, such as one written
/// by QEMU's `dump-guest-memory` or by a kernel crash dump tool.
///
/// In [`TableAddressMode::Physical`] entries are found through each
/// segment's physical address (`p_paddr`). In
/// [`TableAddressMode::LinearMap`] the table address is first moved
/// into the linear map and found through `p_vaddr`, for dumps that only
/// record virtual addresses.
pub struct CoreDumpReader {
    bytes: Vec<u8>,
    segments: Vec<LoadSegment>,
    little_endian: bool,
    mode: TableAddressMode,
}

impl CoreDumpReader {
    #[instrument(err(Debug), skip(path), fields(path = %path.as_ref().display()), parent = Span::current(), level = "Trace")]
    pub fn open(path: impl AsRef<Path>, mode: TableAddressMode) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_bytes(bytes, mode)
    }

    pub fn from_bytes(bytes: Vec<u8>, mode: TableAddressMode) -> Result<Self> {
        let (segments, little_endian) = Self::load_segments(&bytes, mode)?;
        log::debug!(
            "core file has {} load segments ({} endian)",
            segments.len(),
            if little_endian { "little" } else { "big" }
        );

        Ok(Self {
            bytes,
            segments,
            little_endian,
            mode,
        })
    }

    fn load_segments(bytes: &[u8], mode: TableAddressMode) -> Result<(Vec<LoadSegment>, bool)> {
        let elf = Elf::parse(bytes)?;
        if elf.header.e_type != ET_CORE {
            log::warn!(
                "ELF file has type {} rather than ET_CORE, reading its load segments anyway",
                elf.header.e_type
            );
        }
        if elf.header.e_machine != EM_AARCH64 {
            log::warn!(
                "ELF file is for machine {} rather than AArch64",
                elf.header.e_machine
            );
        }

        let mut segments = Vec::new();
        for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
            let start = match mode {
                TableAddressMode::Physical => ph.p_paddr,
                TableAddressMode::LinearMap { .. } => ph.p_vaddr,
            };
            let file_end = ph
                .p_offset
                .checked_add(ph.p_filesz)
                .ok_or(PtWalkError::CheckedAddOverflow(ph.p_filesz, ph.p_offset))?;
            if file_end > bytes.len() as u64 {
                return Err(new_error!(
                    "load segment at {:#x} extends past the end of the core file",
                    start
                ));
            }
            segments.push(LoadSegment {
                start,
                mem_size: ph.p_memsz.max(ph.p_filesz),
                file_offset: ph.p_offset,
                file_size: ph.p_filesz,
            });
        }
        Ok((segments, elf.little_endian))
    }

    fn find_segment(&self, address: u64) -> Option<&LoadSegment> {
        self.segments.iter().find(|s| s.contains(address))
    }
}

impl MemoryReader for CoreDumpReader {
    type Error = PtWalkError;

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn read_u64(&self, table_base: PhysAddr, index: u16) -> Result<PageTableEntry> {
        let address = self.mode.resolve(entry_address(table_base, index)?)?;
        let segment = self
            .find_segment(address)
            .ok_or(PtWalkError::AddressNotMapped(address))?;
        let offset = address - segment.start;
        if offset.saturating_add(ENTRY_SIZE) > segment.mem_size {
            return Err(PtWalkError::AddressNotMapped(address));
        }

        // bytes past p_filesz are zero
        let mut entry = [0u8; ENTRY_SIZE as usize];
        if offset < segment.file_size {
            let available = (segment.file_size - offset).min(ENTRY_SIZE) as usize;
            let start = (segment.file_offset + offset) as usize;
            entry[..available].copy_from_slice(&self.bytes[start..start + available]);
        }
        entry_from_bytes(&entry, self.little_endian)
    }
}
