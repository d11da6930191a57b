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

use ptwalk_common::vmem::{PAGE_TABLE_SIZE, PhysAddr, VA_MASK, VirtAddr};
use serde::Serialize;
use tracing::{Span, instrument};

use crate::{Result, malformed};

/// The bits of a TTBR value that hold the table's physical address;
/// the ASID (63:48) and CnP (0) are dropped
const TABLE_BASE_MASK: u64 = VA_MASK & !1;
/// Bit 47 selects the upper (TTBR1) half of the address space
const UPPER_HALF_BIT: u64 = 1 << 47;
const UPPER_HALF_PREFIX: u64 = !VA_MASK;

pub const USAGE: &str = "Expected args: TableVA Address";

/// A validated lookup: which table to start from, and what to look up
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WalkRequest {
    /// Physical address of the level 0 table
    pub table_base: PhysAddr,
    /// The address to translate, as given
    pub address: VirtAddr,
}

impl WalkRequest {
    /// `address` in canonical form, for display
    pub fn display_address(&self) -> VirtAddr {
        canonical_address(self.address)
    }
}

/// Parse an unsigned number written as `0x` hex, `0b` binary, `0o`
/// octal or decimal. `_` may be used as a digit separator.
pub fn parse_number(arg: &str) -> Result<u64> {
    let cleaned: String = arg.trim().chars().filter(|c| *c != '_').collect();
    let lower = cleaned.to_ascii_lowercase();
    let (digits, radix) = if let Some(hex) = lower.strip_prefix("0x") {
        (hex, 16)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        (bin, 2)
    } else if let Some(oct) = lower.strip_prefix("0o") {
        (oct, 8)
    } else {
        (lower.as_str(), 10)
    };
    if digits.is_empty() {
        return Err(malformed!(arg, "not a number"));
    }
    // from_str_radix would otherwise accept a leading '+'
    if !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(malformed!(arg, "not a base {radix} number"));
    }
    u64::from_str_radix(digits, radix).map_err(|e| malformed!(arg, "{e}"))
}

/// Parse a table base, which may be a raw TTBR value
pub fn parse_table_base(arg: &str) -> Result<PhysAddr> {
    let table_base = parse_number(arg)? & TABLE_BASE_MASK;
    if table_base % PAGE_TABLE_SIZE as u64 != 0 {
        return Err(malformed!(
            arg,
            "table base {table_base:#x} is not aligned to {PAGE_TABLE_SIZE:#x}"
        ));
    }
    Ok(table_base)
}

/// Sign extend bit 47, giving the address as the CPU would see it.
/// Only the display changes; the walk never looks at bits above 47.
pub fn canonical_address(address: VirtAddr) -> VirtAddr {
    if address & UPPER_HALF_BIT != 0 {
        (address & VA_MASK) | UPPER_HALF_PREFIX
    } else {
        address
    }
}

/// Turn the command arguments `TableVA Address` into a request.
/// Nothing is read from the target until this has succeeded.
#[instrument(skip_all, parent = Span::current(), level = "Trace")]
pub fn parse_walk_args<S: AsRef<str>>(args: &[S]) -> Result<WalkRequest> {
    let [table, address] = args else {
        return Err(malformed!(
            args.iter().map(|a| a.as_ref()).collect::<Vec<_>>().join(" "),
            "{USAGE}"
        ));
    };
    Ok(WalkRequest {
        table_base: parse_table_base(table.as_ref())?,
        address: parse_number(address.as_ref())?,
    })
}
