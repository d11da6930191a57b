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

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use ptwalk_host::args::WalkRequest;
use ptwalk_host::{GdbRemoteReader, TableAddressMode};
use ptwalk_testing::elf_core::{CoreSegment, write_core};
use ptwalk_testing::gdb_stub::{GdbStub, StubMemory};
use ptwalk_testing::tables::TableFixture;
use ptwalk_testing::write_temp_file;
use tempfile::NamedTempFile;

pub const LINEAR_MAP: u64 = 0xFFFF_0000_0000_0000;
/// Where fixture tables start in physical memory
pub const PHYS_BASE: u64 = 0x1000;
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// The lookup `TableFixture::four_level_page` is built for
pub fn page_request() -> WalkRequest {
    WalkRequest {
        table_base: 0x1000,
        address: 0x401ABC,
    }
}

/// Writes `fixture` out as a raw physical memory image.
pub fn image_file(fixture: &TableFixture) -> (NamedTempFile, PathBuf) {
    write_temp_file(&fixture.to_image(PHYS_BASE)).unwrap()
}

/// Writes `fixture` out as an ELF core with one load segment that is
/// mapped at `PHYS_BASE` physically and in the linear map.
pub fn core_file(fixture: &TableFixture) -> (NamedTempFile, PathBuf) {
    let core = write_core(&[CoreSegment {
        vaddr: LINEAR_MAP + PHYS_BASE,
        paddr: PHYS_BASE,
        data: fixture.to_image(PHYS_BASE),
    }]);
    write_temp_file(&core).unwrap()
}

/// Starts a stub serving `memory` and connects a reader to it.
pub fn gdb_reader(memory: StubMemory, mode: TableAddressMode) -> (GdbStub, GdbRemoteReader) {
    let stub = GdbStub::spawn(memory).unwrap();
    let reader = GdbRemoteReader::connect(stub.address(), mode, TIMEOUT).unwrap();
    (stub, reader)
}

/// A stub exposing `fixture` through the kernel linear map.
pub fn linear_map_stub(fixture: &TableFixture) -> StubMemory {
    StubMemory::from_fixture(fixture, PHYS_BASE, LINEAR_MAP)
}
