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

#![warn(dead_code, unused_mut)]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! Host side of ptwalk: everything needed to point the translation
//! table walker in `ptwalk_common` at a real target.
//!
//! - [`reader`] has the [`MemoryReader`](ptwalk_common::vmem::MemoryReader)
//!   implementations: an in-memory table map, a raw physical memory
//!   image, an ELF core dump and a live GDB remote target.
//! - [`args`] turns the two command arguments into a [`args::WalkRequest`].
//! - [`walker`] runs a walk against a reader.
//! - [`report`] renders the result as text or JSON.

/// Parsing of the table base and address arguments
pub mod args;
/// Configuration for readers and reports
pub mod config;
/// Errors returned by this crate
pub mod error;
/// `MemoryReader` implementations
pub mod reader;
/// Text and JSON rendering of walks
pub mod report;
/// Running walks against a reader
pub mod walker;

pub use config::{OutputFormat, TableAddressMode, WalkerConfiguration};
pub use error::PtWalkError;
pub use reader::{CoreDumpReader, GdbRemoteReader, InMemoryReader, PhysImageReader};
pub use walker::PageTableWalker;

/// The Result type used by this crate
pub type Result<T> = core::result::Result<T, error::PtWalkError>;
