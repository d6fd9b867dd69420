/*
    sim86
    https://github.com/dbalsom/sim86

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    benches::decode_bench.rs

    Benchmarks for the decoder and simulator.

*/

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sim86_core::{
    cycles::{estimate, ClockSettings},
    decoder::decode_stream,
    machine::Machine,
    simulator::{apply, step},
};

// A small listing exercising prefixes, ModRM forms, immediates and jumps.
const PROGRAM: &[u8] = &[
    0xB9, 0x40, 0x00, // mov cx, 64
    0xB8, 0x00, 0x00, // mov ax, 0
    0xBB, 0x00, 0x10, // mov bx, 0x1000
    0x01, 0xC8, // add ax, cx
    0x89, 0x07, // mov [bx], ax
    0x26, 0x8B, 0x17, // es: mov dx, [bx]
    0x83, 0xC3, 0x02, // add bx, 2
    0xE2, 0xF4, // loop back to the add
];

pub fn decode_bench(c: &mut Criterion) {
    let mut buffer = Vec::with_capacity(PROGRAM.len() * 512);
    for _ in 0..512 {
        buffer.extend_from_slice(PROGRAM);
    }

    c.bench_function("decode_stream 10KiB", |b| {
        b.iter(|| {
            let map = decode_stream(black_box(&buffer)).unwrap();
            black_box(map.len())
        });
    });
}

pub fn estimate_bench(c: &mut Criterion) {
    let map = decode_stream(PROGRAM).unwrap();
    let settings = ClockSettings::default();

    c.bench_function("estimate program", |b| {
        b.iter(|| {
            let total: u32 = map.values().map(|i| estimate(black_box(i), &settings)).sum();
            black_box(total)
        });
    });
}

pub fn step_bench(c: &mut Criterion) {
    let map = decode_stream(PROGRAM).unwrap();

    c.bench_function("step/apply loop", |b| {
        b.iter(|| {
            let mut machine = Machine::default();
            let mut steps = 0u32;
            while let Some(i) = map.get(&(machine.ip() as u32)) {
                let diff = step(&machine, i).unwrap();
                apply(&mut machine, &diff).unwrap();
                steps += 1;
                if steps > 10_000 {
                    break;
                }
            }
            black_box(steps)
        });
    });
}

criterion_group!(benches, decode_bench, estimate_bench, step_bench);
criterion_main!(benches);
