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

    lib.rs

    8086 instruction decoder, minimum-clock estimator and instruction-level
    simulator core. Presentation and input acquisition are the caller's
    concern; this crate turns raw machine code into structured instruction
    records, cycle estimates and auditable state diffs.

*/

pub mod annotate;
pub mod bytes;
pub mod cpu_common;
pub mod cycles;
pub mod decoder;
pub mod machine;
pub mod memory;
pub mod simulator;

pub use cpu_common::{
    AddressingMode,
    DecodeError,
    Displacement,
    Instruction,
    MemoryError,
    Mnemonic,
    OperandType,
    Register16,
    Register8,
    RepType,
    Segment,
};
pub use cycles::ClockSettings;
pub use machine::{Flag, Machine};
pub use memory::Memory;
pub use simulator::{Diff, StateChange};
