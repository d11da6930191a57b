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

use std::array::TryFromSliceError;
use std::cell::BorrowMutError;
use std::num::ParseIntError;

use ptwalk_common::vmem::ReadFailure;
use thiserror::Error;

/// The error type for ptwalk operations
#[derive(Error, Debug)]
pub enum PtWalkError {
    /// The target has no memory backing the given address
    #[error("Address {0:#x} is not backed by the target's memory")]
    AddressNotMapped(u64),

    /// Checked Add Overflow
    #[error("Couldn't add offset to base address. Offset: {0:#x}, Base Address: {1:#x}")]
    CheckedAddOverflow(u64, u64),

    /// The core file could not be parsed
    #[error("Failure processing ELF core file {0:?}")]
    ElfParse(#[from] goblin::error::Error),

    /// A generic error with a message
    #[error("{0}")]
    Error(String),

    /// The GDB remote peer sent something we could not make sense of
    #[error("GDB remote protocol error: {0}")]
    GdbProtocol(String),

    /// The GDB remote target refused a memory read
    #[error("Target replied E{0:02x} to a memory read of {1:#x}")]
    GdbTargetError(u8, u64),

    /// Reading Writing or Seeking data failed.
    #[error("Reading Writing or Seeking data failed {0:?}")]
    IOError(#[from] std::io::Error),

    /// A table index outside 0..=511
    #[error("Table index {0} out of bounds, Max is: 511")]
    IndexOutOfRange(u16),

    /// Conversion of a walk to Json failed
    #[error("Conversion of walk data to json failed")]
    JsonConversionFailure(#[from] serde_json::Error),

    /// A command line value that is not an address or table
    #[error("Malformed argument {0:?}: {1}")]
    MalformedArgument(String, String),

    /// Failed to parse an integer
    #[error("Failed To Parse Integer {0}")]
    ParseIntFailure(#[from] ParseIntError),

    /// RefCell mut borrow failed
    #[error("RefCell mut borrow failed")]
    RefCellMutBorrowFailed(#[from] BorrowMutError),

    /// A translation table entry could not be read, ending the walk
    #[error("{0}")]
    TableReadFailed(Box<ReadFailure<PtWalkError>>),

    /// Error occurred converting a slice to an array
    #[error("TryFromSliceError {0:?}")]
    TryFromSliceError(#[from] TryFromSliceError),
}

impl From<ReadFailure<PtWalkError>> for PtWalkError {
    fn from(failure: ReadFailure<PtWalkError>) -> Self {
        PtWalkError::TableReadFailed(Box::new(failure))
    }
}

impl PtWalkError {
    /// True when the error means the caller's input was unusable, as
    /// opposed to the target being unreadable.
    pub fn is_argument_error(&self) -> bool {
        // wildcard _ or matches! not used here purposefully to ensure that new error variants
        // are explicitly classified.
        match self {
            PtWalkError::MalformedArgument(_, _) | PtWalkError::ParseIntFailure(_) => true,

            PtWalkError::AddressNotMapped(_)
            | PtWalkError::CheckedAddOverflow(_, _)
            | PtWalkError::ElfParse(_)
            | PtWalkError::Error(_)
            | PtWalkError::GdbProtocol(_)
            | PtWalkError::GdbTargetError(_, _)
            | PtWalkError::IOError(_)
            | PtWalkError::IndexOutOfRange(_)
            | PtWalkError::JsonConversionFailure(_)
            | PtWalkError::RefCellMutBorrowFailed(_)
            | PtWalkError::TableReadFailed(_)
            | PtWalkError::TryFromSliceError(_) => false,
        }
    }
}

/// Creates a `PtWalkError::Error` from a string literal or format string
#[macro_export]
macro_rules! new_error {
    ($msg:literal $(,)?) => {{
        let __args = std::format_args!($msg);
        let __err_msg = match __args.as_str() {
            Some(msg) => String::from(msg),
            None => std::format!($msg),
        };
        $crate::PtWalkError::Error(__err_msg)
    }};
    ($fmtstr:expr, $($arg:tt)*) => {{
           let __err_msg = std::format!($fmtstr, $($arg)*);
           $crate::error::PtWalkError::Error(__err_msg)
    }};
}

/// Creates a `PtWalkError::MalformedArgument` for the given argument
#[macro_export]
macro_rules! malformed {
    ($arg:expr, $($reason:tt)*) => {
        $crate::error::PtWalkError::MalformedArgument(
            std::string::ToString::to_string(&$arg),
            std::format!($($reason)*),
        )
    };
}
