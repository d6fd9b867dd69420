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

    simulator::diff.rs

    Elementary state changes. A diff is a pure description computed
    against a read-only view of machine state; committing it through
    apply() is the only mutation path. Word-sized memory writes appear
    as two byte entries, low byte first.

*/

use std::fmt;

use crate::{cpu_common::Register16, machine::Flag};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StateChange {
    Register { reg: Register16, from: u16, to: u16 },
    Flag { flag: Flag, from: bool, to: bool },
    Mem { address: u32, from: u8, to: u8 },
}

pub type Diff = Vec<StateChange>;

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateChange::Register { reg, from, to } => {
                write!(f, "{}: {:#06X} -> {:#06X}", reg, from, to)
            }
            StateChange::Flag { flag, from, to } => {
                write!(f, "{}: {} -> {}", flag, *from as u8, *to as u8)
            }
            StateChange::Mem { address, from, to } => {
                write!(f, "[{:05X}]: {:#04X} -> {:#04X}", address, from, to)
            }
        }
    }
}
