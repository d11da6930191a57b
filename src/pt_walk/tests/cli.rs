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

use assert_cmd::Command;
use predicates::prelude::*;
use ptwalk_testing::elf_core::{CoreSegment, write_core};
use ptwalk_testing::gdb_stub::{GdbStub, StubMemory};
use ptwalk_testing::tables::TableFixture;
use ptwalk_testing::write_temp_file;

const LINEAR_MAP: u64 = 0xFFFF_0000_0000_0000;

fn pt_walk() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pt_walk"))
}

const PAGE_REPORT: &str = "Looking up 0x401abc in PT 0x1000\n\
                           Level 0: 0x1000 [0] = 0x2003 Table -> 0x2000\n\
                           Level 1: 0x2000 [0] = 0x3003 Table -> 0x3000\n\
                           Level 2: 0x3000 [2] = 0x4003 Table -> 0x4000\n\
                           Level 3: 0x4000 [1] = 0x200000000500c3 Page -> 0x50000\n\
                           l3 page address: 0x50000\n\
                           Physical address: 0x50abc\n\
                           Priv: R--\n\
                           User: R-X\n";

#[test]
fn image_walk_prints_every_level() {
    let (_file, path) = write_temp_file(&TableFixture::four_level_page().to_image(0x1000)).unwrap();
    pt_walk()
        .arg("--image")
        .arg(&path)
        .args(["--image-base", "0x1000", "0x1000", "0x401abc"])
        .assert()
        .success()
        .stdout(PAGE_REPORT);
}

#[test]
fn core_walk_json() {
    let core = write_core(&[CoreSegment {
        vaddr: LINEAR_MAP + 0x1000,
        paddr: 0x1000,
        data: TableFixture::four_level_page().to_image(0x1000),
    }]);
    let (_file, path) = write_temp_file(&core).unwrap();
    let output = pt_walk()
        .arg("--core")
        .arg(&path)
        .args(["--format", "json", "0x1000", "0x401abc"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["result"]["status"], "success");
    assert_eq!(json["result"]["page_address"], "0x50000");
    assert_eq!(json["steps"].as_array().unwrap().len(), 4);
}

#[test]
fn gdb_walk_defaults_to_linear_map() {
    let fixture = TableFixture::four_level_page();
    let stub = GdbStub::spawn(StubMemory::from_fixture(&fixture, 0x1000, LINEAR_MAP)).unwrap();
    pt_walk()
        .args(["--gdb", &stub.address().to_string(), "0x1000", "0x401abc"])
        .assert()
        .success()
        .stdout(PAGE_REPORT);
    assert_eq!(stub.join()[0], "mffff000000001000,8");
}

#[test]
fn invalid_entry_is_reported() {
    let fixture = TableFixture::four_level_page().invalidate_level(2);
    let (_file, path) = write_temp_file(&fixture.to_image(0x1000)).unwrap();
    pt_walk()
        .arg("--image")
        .arg(&path)
        .args(["--image-base", "0x1000", "0x1000", "0x401000"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with("l2 lookup invalid\n"));
}

#[test]
fn read_failure_prints_partial_trace() {
    let mut fixture = TableFixture::new();
    fixture.set(0x1000, 0, 0x0090_0003);
    let (_file, path) = write_temp_file(&fixture.to_image(0x1000)).unwrap();
    pt_walk()
        .arg("--image")
        .arg(&path)
        .args(["--image-base", "0x1000", "0x1000", "0x401000"])
        .assert()
        .failure()
        .stdout(predicate::str::contains(
            "Level 0: 0x1000 [0] = 0x900003 Table -> 0x900000\n",
        ))
        .stdout(predicate::str::contains("l1 read failed: Address 0x900000"));
}

#[test]
fn wrong_argument_count_is_usage_error() {
    pt_walk()
        .args(["--image", "/nonexistent/ptwalk.img", "0x1000"])
        .assert()
        .code(2)
        .stdout("")
        .stderr(predicate::str::contains("Expected args: TableVA Address"));
}

#[test]
fn malformed_address_reads_nothing() {
    // the image does not exist; parsing must fail before it is opened
    pt_walk()
        .args(["--image", "/nonexistent/ptwalk.img", "0x1000", "$x0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Malformed argument \"$x0\""));
}

#[test]
fn missing_source_is_rejected() {
    pt_walk().args(["0x1000", "0x401000"]).assert().failure();
}

#[test]
fn missing_image_is_an_error() {
    pt_walk()
        .args(["--image", "/nonexistent/ptwalk.img", "0x1000", "0x401000"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("reading memory image"));
}

#[test]
fn options_may_follow_the_addresses() {
    let (_file, path) = write_temp_file(&TableFixture::four_level_page().to_image(0x1000)).unwrap();
    pt_walk()
        .args(["--image-base", "0x1000", "0x1000", "0x401abc", "--image"])
        .arg(&path)
        .arg("-v")
        .assert()
        .success()
        .stdout(PAGE_REPORT);

    let output = pt_walk()
        .arg("--image")
        .arg(&path)
        .args(["0x1000", "0x401abc", "--image-base", "0x1000", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["result"]["physical_address"], "0x50abc");
}

#[test]
fn argument_error_is_printed_once() {
    pt_walk()
        .args(["--image", "/nonexistent/ptwalk.img", "0x1000", "$x0"])
        .env_remove("RUST_LOG")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Malformed argument").count(1))
        .stderr(predicate::str::contains("ERROR").not());
}

#[test]
fn image_rejects_address_mode_options() {
    pt_walk()
        .args(["--image", "/nonexistent/ptwalk.img", "--address-mode", "linear-map"])
        .args(["0x1000", "0x401000"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
    pt_walk()
        .args(["--image", "/nonexistent/ptwalk.img", "--linear-map-base", "0xffff800000000000"])
        .args(["0x1000", "0x401000"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}
