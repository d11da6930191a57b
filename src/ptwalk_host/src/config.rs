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

use std::cmp::{max, min};
use std::time::Duration;

use ptwalk_common::vmem::PhysAddr;
use tracing::{Span, instrument};

use crate::{PtWalkError, Result};

/// How table addresses taken from descriptors are turned into
/// addresses a reader can fetch from.
///
/// Descriptors always hold physical addresses. A reader that sees the
/// target's physical memory (a raw image, or a core file indexed by
/// physical address) uses them as they are. A reader that goes through
/// the target's own MMU (a debugger attached to a running kernel) has
/// to use the kernel's linear mapping of physical memory instead.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TableAddressMode {
    #[default]
    Physical,
    LinearMap { base: u64 },
}

impl TableAddressMode {
    /// The address at which the table entry at physical address `phys`
    /// can be read
    pub fn resolve(&self, phys: PhysAddr) -> Result<u64> {
        match self {
            TableAddressMode::Physical => Ok(phys),
            TableAddressMode::LinearMap { base } => phys
                .checked_add(*base)
                .ok_or(PtWalkError::CheckedAddOverflow(phys, *base)),
        }
    }
}

/// How a finished walk is rendered
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OutputFormat {
    /// The debugger-style trace, one line per level
    #[default]
    Text,
    /// A single JSON document
    Json,
}

/// The complete set of configuration needed to inspect a target's
/// translation tables
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WalkerConfiguration {
    table_address_mode: TableAddressMode,
    /// The time to wait for a GDB remote target to answer, in
    /// milliseconds
    gdb_timeout: u16,
    output_format: OutputFormat,
}

impl WalkerConfiguration {
    /// Where the kernel maps physical memory when addresses are read
    /// through the target's MMU (the bottom of the TTBR1 range with
    /// 48-bit virtual addresses)
    pub const DEFAULT_LINEAR_MAP_BASE: u64 = 0xFFFF_0000_0000_0000;
    /// The default time to wait for a GDB remote reply (in milliseconds)
    pub const DEFAULT_GDB_TIMEOUT: u16 = 2000;
    /// The minimum time to wait for a GDB remote reply (in milliseconds)
    pub const MIN_GDB_TIMEOUT: u16 = 1;
    /// The maximum time to wait for a GDB remote reply (in milliseconds)
    pub const MAX_GDB_TIMEOUT: u16 = u16::MAX;

    /// Create a new configuration
    pub fn new(
        table_address_mode: TableAddressMode,
        gdb_timeout: Option<Duration>,
        output_format: OutputFormat,
    ) -> Self {
        let mut cfg = Self {
            table_address_mode,
            gdb_timeout: Self::DEFAULT_GDB_TIMEOUT,
            output_format,
        };
        if let Some(gdb_timeout) = gdb_timeout {
            cfg.set_gdb_timeout(gdb_timeout);
        }
        cfg
    }

    /// Read tables through the kernel linear map at `base`
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_linear_map_base(&mut self, base: u64) {
        self.table_address_mode = TableAddressMode::LinearMap { base };
    }

    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_table_address_mode(&mut self, mode: TableAddressMode) {
        self.table_address_mode = mode;
    }

    pub fn get_table_address_mode(&self) -> TableAddressMode {
        self.table_address_mode
    }

    /// Set the time to wait for a GDB remote target to answer. If set
    /// to 0, the timeout will be set to the default value of
    /// `DEFAULT_GDB_TIMEOUT`; otherwise it is clamped to
    /// `MIN_GDB_TIMEOUT..=MAX_GDB_TIMEOUT`.
    #[instrument(skip_all, parent = Span::current(), level= "Trace")]
    pub fn set_gdb_timeout(&mut self, gdb_timeout: Duration) {
        match gdb_timeout.as_millis() {
            0 => self.gdb_timeout = Self::DEFAULT_GDB_TIMEOUT,
            1.. => {
                self.gdb_timeout = min(
                    Self::MAX_GDB_TIMEOUT.into(),
                    max(gdb_timeout.as_millis(), Self::MIN_GDB_TIMEOUT.into()),
                ) as u16
            }
        }
    }

    pub fn get_gdb_timeout(&self) -> Duration {
        Duration::from_millis(self.gdb_timeout as u64)
    }

    pub fn set_output_format(&mut self, output_format: OutputFormat) {
        self.output_format = output_format;
    }

    pub fn get_output_format(&self) -> OutputFormat {
        self.output_format
    }
}

impl Default for WalkerConfiguration {
    fn default() -> Self {
        Self::new(
            TableAddressMode::default(),
            Some(Duration::from_millis(Self::DEFAULT_GDB_TIMEOUT as u64)),
            OutputFormat::default(),
        )
    }
}
