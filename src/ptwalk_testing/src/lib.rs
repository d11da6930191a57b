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

// This crate contains testing utilities which need to be shared across multiple
// crates in this project.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use tempfile::NamedTempFile;

pub mod elf_core;
pub mod gdb_stub;
pub mod simplelogger;
pub mod tables;

/// Write `bytes` to a fresh temporary file, returning the handle (the
/// file is removed when it is dropped) and its path.
pub fn write_temp_file(bytes: &[u8]) -> Result<(NamedTempFile, PathBuf)> {
    let mut file = NamedTempFile::new()?;
    file.write_all(bytes)?;
    file.flush()?;
    let path = file.path().to_path_buf();
    Ok((file, path))
}
