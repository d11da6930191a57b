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

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
// We use Arbitrary during fuzzing, which requires std
#![cfg_attr(not(any(test, feature = "std", feature = "fuzzing")), no_std)]

extern crate alloc;

/// Translation table types shared by every consumer of the walker, and
/// the AArch64 VMSAv8-64 decoding and walking code itself.
///
/// The walker never touches memory on its own. Table entries are
/// fetched through a [`vmem::MemoryReader`], so the same code serves
/// the command line tool (reading a core dump or a live target), the
/// tests (reading an in-memory table image) and the fuzzer.
pub mod vmem;
