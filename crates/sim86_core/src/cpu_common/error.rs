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

    cpu_common::error.rs

    Error types for the decoder, memory store and simulator. Malformed
    encodings and bad addresses are fatal to the enclosing pass; unknown
    opcodes are not errors and decode to a marker instruction instead.

*/

use thiserror::Error;

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of stream at offset {0:05X}")]
    UnexpectedEof(u32),
    #[error("duplicate {0} prefix")]
    DuplicatePrefix(&'static str),
    #[error("{0} prefix not consumed by the following instruction (opcode {1:02X})")]
    UnconsumedPrefix(&'static str, u8),
    #[error("lock prefix with a register destination (opcode {0:02X})")]
    LockRequiresMemoryDestination(u8),
    #[error("register operand where the encoding requires memory (opcode {0:02X})")]
    RegisterOperandIllegal(u8),
    #[error("reserved ModRM extension {ext} for opcode {opcode:02X}")]
    ReservedGroupExtension { opcode: u8, ext: u8 },
    #[error("reserved segment register field {0}")]
    InvalidSegmentRegister(u8),
}

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("address {0:06X} outside the 1 MiB address space")]
    OutOfRange(u32),
}

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
}
