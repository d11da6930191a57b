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

use std::fmt;

use ptwalk_common::vmem::{
    PhysAddr, ReadFailure, VaIndices, Walk, WalkResult, WalkStep, classify, decompose,
};
use serde::{Serialize, Serializer};

use crate::args::{WalkRequest, canonical_address};
use crate::config::OutputFormat;
use crate::{PtWalkError, Result};

fn hex<S: Serializer>(value: &u64, serializer: S) -> core::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:#x}"))
}

fn hex_opt<S: Serializer>(
    value: &Option<u64>,
    serializer: S,
) -> core::result::Result<S::Ok, S::Error> {
    match value {
        Some(value) => hex(value, serializer),
        None => serializer.serialize_none(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub l0: u16,
    pub l1: u16,
    pub l2: u16,
    pub l3: u16,
    pub offset: u16,
}

impl From<VaIndices> for IndexReport {
    fn from(indices: VaIndices) -> Self {
        Self {
            l0: indices.l0,
            l1: indices.l1,
            l2: indices.l2,
            l3: indices.l3,
            offset: indices.offset,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub level: u8,
    #[serde(serialize_with = "hex")]
    pub table_base: u64,
    pub index: u16,
    #[serde(serialize_with = "hex")]
    pub entry: u64,
    pub kind: String,
    /// The next table, or the page, the entry points at
    #[serde(serialize_with = "hex_opt")]
    pub next: Option<u64>,
}

impl From<&WalkStep> for StepReport {
    fn from(step: &WalkStep) -> Self {
        Self {
            level: step.level,
            table_base: step.table_base,
            index: step.index,
            entry: step.entry,
            kind: step.kind.to_string(),
            next: classify(step.entry, step.level).output_address(),
        }
    }
}

/// How the walk ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        #[serde(serialize_with = "hex")]
        page_address: u64,
        #[serde(serialize_with = "hex")]
        physical_address: u64,
        privileged: String,
        user: String,
    },
    Invalid {
        level: u8,
    },
    Block {
        level: u8,
    },
    ReadFailed {
        level: u8,
        #[serde(serialize_with = "hex")]
        table_base: u64,
        index: u16,
        reason: String,
    },
}

/// Everything known about one lookup, ready to be rendered
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WalkReport {
    #[serde(serialize_with = "hex")]
    pub address: u64,
    #[serde(serialize_with = "hex")]
    pub table_base: u64,
    pub indices: IndexReport,
    pub steps: Vec<StepReport>,
    pub result: Outcome,
}

impl WalkReport {
    fn new(address: u64, table_base: PhysAddr, steps: &[WalkStep], result: Outcome) -> Self {
        Self {
            address: canonical_address(address),
            table_base,
            indices: decompose(address).into(),
            steps: steps.iter().map(StepReport::from).collect(),
            result,
        }
    }

    pub fn from_walk(walk: &Walk) -> Self {
        let result = match walk.result {
            WalkResult::Success {
                address,
                permissions,
            } => Outcome::Success {
                page_address: address,
                physical_address: address | u64::from(walk.indices.offset),
                privileged: permissions.privileged().to_string(),
                user: permissions.user().to_string(),
            },
            WalkResult::Failure { level, .. } => Outcome::Invalid { level },
            WalkResult::Stopped { level, .. } => Outcome::Block { level },
        };
        Self::new(walk.address, walk.table_base, &walk.steps, result)
    }

    pub fn from_read_failure(request: &WalkRequest, failure: &ReadFailure<PtWalkError>) -> Self {
        let result = Outcome::ReadFailed {
            level: failure.level,
            table_base: failure.table_base,
            index: failure.index,
            reason: failure.source.to_string(),
        };
        Self::new(request.address, request.table_base, &failure.steps, result)
    }

    /// Build a report for whatever a walk returned. Errors other than a
    /// failed table read are passed back to the caller.
    pub fn from_outcome(request: &WalkRequest, outcome: Result<Walk>) -> Result<Self> {
        match outcome {
            Ok(walk) => Ok(Self::from_walk(&walk)),
            Err(PtWalkError::TableReadFailed(failure)) => {
                Ok(Self::from_read_failure(request, &failure))
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, Outcome::Success { .. })
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Text => Ok(self.to_string()),
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }
}

impl fmt::Display for WalkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Looking up {:#x} in PT {:#x}",
            self.address, self.table_base
        )?;
        for step in &self.steps {
            write!(
                f,
                "Level {}: {:#x} [{}] = {:#x} {}",
                step.level, step.table_base, step.index, step.entry, step.kind
            )?;
            match step.next {
                Some(next) => writeln!(f, " -> {next:#x}")?,
                None => writeln!(f)?,
            }
        }
        match &self.result {
            Outcome::Success {
                page_address,
                physical_address,
                privileged,
                user,
            } => {
                writeln!(f, "l3 page address: {page_address:#x}")?;
                writeln!(f, "Physical address: {physical_address:#x}")?;
                writeln!(f, "Priv: {privileged}")?;
                writeln!(f, "User: {user}")
            }
            Outcome::Invalid { level } => writeln!(f, "l{level} lookup invalid"),
            Outcome::Block { level } => writeln!(f, "l{level} lookup block"),
            Outcome::ReadFailed { level, reason, .. } => {
                writeln!(f, "l{level} read failed: {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ptwalk_testing::tables::TableFixture;

    use super::*;
    use crate::reader::InMemoryReader;
    use crate::walker::PageTableWalker;

    fn report_for(fixture: TableFixture, address: u64) -> WalkReport {
        let walker = PageTableWalker::new(fixture.entries().collect::<InMemoryReader>());
        let request = WalkRequest {
            table_base: 0x1000,
            address,
        };
        WalkReport::from_outcome(&request, walker.walk(&request)).unwrap()
    }

    // ==== text tests ====

    #[test]
    fn text_for_page() {
        let report = report_for(TableFixture::four_level_page(), 0x401ABC);
        assert!(report.is_success());
        assert_eq!(
            report.render(OutputFormat::Text).unwrap(),
            "Looking up 0x401abc in PT 0x1000\n\
             Level 0: 0x1000 [0] = 0x2003 Table -> 0x2000\n\
             Level 1: 0x2000 [0] = 0x3003 Table -> 0x3000\n\
             Level 2: 0x3000 [2] = 0x4003 Table -> 0x4000\n\
             Level 3: 0x4000 [1] = 0x200000000500c3 Page -> 0x50000\n\
             l3 page address: 0x50000\n\
             Physical address: 0x50abc\n\
             Priv: R--\n\
             User: R-X\n"
        );
    }

    #[test]
    fn text_for_invalid() {
        let report = report_for(TableFixture::four_level_page().invalidate_level(1), 0x401000);
        assert!(!report.is_success());
        assert_eq!(
            report.to_string(),
            "Looking up 0x401000 in PT 0x1000\n\
             Level 0: 0x1000 [0] = 0x2003 Table -> 0x2000\n\
             Level 1: 0x2000 [0] = 0x3002 Invalid\n\
             l1 lookup invalid\n"
        );
    }

    #[test]
    fn text_for_block() {
        let mut fixture = TableFixture::four_level_page();
        fixture.set(0x3000, 2, 0x0060_0000_0040_0701);
        let report = report_for(fixture, 0x401000);
        assert!(report.to_string().ends_with(
            "Level 2: 0x3000 [2] = 0x60000000400701 Block\n\
             l2 lookup block\n"
        ));
    }

    #[test]
    fn text_for_read_failure() {
        let mut fixture = TableFixture::new();
        fixture.set(0x1000, 0, 0x2003);
        let report = report_for(fixture, 0x401000);
        assert_eq!(
            report.to_string(),
            "Looking up 0x401000 in PT 0x1000\n\
             Level 0: 0x1000 [0] = 0x2003 Table -> 0x2000\n\
             l1 read failed: Address 0x2000 is not backed by the target's memory\n"
        );
    }

    #[test]
    fn header_shows_canonical_address() {
        let report = report_for(TableFixture::new(), 0x8000_0000_0000);
        assert!(
            report
                .to_string()
                .starts_with("Looking up 0xffff800000000000 in PT 0x1000\n")
        );
    }

    // ==== json tests ====

    #[test]
    fn json_for_page() {
        let report = report_for(TableFixture::four_level_page(), 0x401ABC);
        let json: serde_json::Value =
            serde_json::from_str(&report.render(OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["address"], "0x401abc");
        assert_eq!(json["table_base"], "0x1000");
        assert_eq!(json["indices"]["l2"], 2);
        assert_eq!(json["indices"]["offset"], 0xABC);
        assert_eq!(json["steps"].as_array().unwrap().len(), 4);
        assert_eq!(json["steps"][3]["kind"], "Page");
        assert_eq!(json["steps"][3]["next"], "0x50000");
        assert_eq!(json["result"]["status"], "success");
        assert_eq!(json["result"]["physical_address"], "0x50abc");
        assert_eq!(json["result"]["privileged"], "R--");
        assert_eq!(json["result"]["user"], "R-X");
    }

    #[test]
    fn json_for_read_failure() {
        let report = report_for(TableFixture::new(), 0x401000);
        let json: serde_json::Value =
            serde_json::from_str(&report.render(OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["result"]["status"], "read_failed");
        assert_eq!(json["result"]["level"], 0);
        assert_eq!(json["result"]["index"], 0);
        assert!(json["steps"].as_array().unwrap().is_empty());
    }

    #[test]
    fn other_errors_pass_through() {
        let request = WalkRequest {
            table_base: 0x1000,
            address: 0,
        };
        let result = WalkReport::from_outcome(&request, Err(PtWalkError::GdbProtocol("x".into())));
        assert!(matches!(result, Err(PtWalkError::GdbProtocol(_))));
    }
}
