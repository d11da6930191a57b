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

//! A minimal ELF64 core file writer, enough to stand in for the output
//! of e.g. QEMU's `dump-guest-memory` in tests: an AArch64 `ET_CORE`
//! file with one `PT_LOAD` segment per memory region and no notes.

const ELF_HEADER_SIZE: u16 = 64;
const PROGRAM_HEADER_SIZE: u16 = 56;
const SECTION_HEADER_SIZE: u16 = 64;
const ET_CORE: u16 = 4;
const EM_AARCH64: u16 = 183;
const PT_LOAD: u32 = 1;
const PF_R: u32 = 4;

/// One memory region of the dumped target
#[derive(Clone, Debug)]
pub struct CoreSegment {
    pub vaddr: u64,
    pub paddr: u64,
    pub data: Vec<u8>,
}

pub fn write_core(segments: &[CoreSegment]) -> Vec<u8> {
    let phnum = segments.len() as u16;
    let data_start = u64::from(ELF_HEADER_SIZE) + u64::from(PROGRAM_HEADER_SIZE) * u64::from(phnum);

    let mut out = Vec::new();
    // e_ident: magic, ELFCLASS64, ELFDATA2LSB, EV_CURRENT, System V ABI
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&ET_CORE.to_le_bytes());
    out.extend_from_slice(&EM_AARCH64.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    out.extend_from_slice(&u64::from(ELF_HEADER_SIZE).to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&ELF_HEADER_SIZE.to_le_bytes());
    out.extend_from_slice(&PROGRAM_HEADER_SIZE.to_le_bytes());
    out.extend_from_slice(&phnum.to_le_bytes());
    out.extend_from_slice(&SECTION_HEADER_SIZE.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    debug_assert_eq!(out.len(), ELF_HEADER_SIZE as usize);

    let mut offset = data_start;
    for segment in segments {
        let size = segment.data.len() as u64;
        out.extend_from_slice(&PT_LOAD.to_le_bytes());
        out.extend_from_slice(&PF_R.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&segment.vaddr.to_le_bytes());
        out.extend_from_slice(&segment.paddr.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes()); // p_filesz
        out.extend_from_slice(&size.to_le_bytes()); // p_memsz
        out.extend_from_slice(&0x1000u64.to_le_bytes()); // p_align
        offset += size;
    }

    for segment in segments {
        out.extend_from_slice(&segment.data);
    }
    out
}
