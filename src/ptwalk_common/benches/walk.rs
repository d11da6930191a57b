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

use std::collections::BTreeMap;
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ptwalk_common::vmem::{MemoryReader, PhysAddr, classify, decode_permissions, walk};
use ptwalk_testing::tables::TableFixture;

struct FixtureReader(BTreeMap<(PhysAddr, u16), u64>);

impl MemoryReader for FixtureReader {
    type Error = &'static str;

    fn read_u64(&self, table_base: PhysAddr, index: u16) -> Result<u64, Self::Error> {
        self.0.get(&(table_base, index)).copied().ok_or("unmapped")
    }
}

// Full four level walks, and walks ending early at each level
fn bench_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("walk");

    for level in 0..4u8 {
        let fixture = if level == 3 {
            TableFixture::four_level_page()
        } else {
            TableFixture::four_level_page().invalidate_level(level)
        };
        let reader = FixtureReader(fixture.entries().collect());
        group.bench_with_input(BenchmarkId::new("ends_at_level", level), &reader, |b, r| {
            b.iter(|| walk(r, black_box(0x1000), black_box(0x401000)).unwrap());
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    group.bench_function("classify", |b| {
        b.iter(|| {
            for level in 0..4u8 {
                black_box(classify(black_box(0x0020_0000_0005_00C3), level));
            }
        });
    });
    group.bench_function("permissions", |b| {
        b.iter(|| {
            for ap in 0..4u64 {
                black_box(decode_permissions(black_box(0x50003 | (ap << 6))));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_walk, bench_decode);
criterion_main!(benches);
