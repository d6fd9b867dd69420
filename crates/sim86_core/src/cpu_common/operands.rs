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

    cpu_common::operands.rs

    Typed instruction operands.

*/

use crate::cpu_common::{AddressingMode, Register16, Register8};
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OperandType {
    Immediate8(u8),
    Immediate16(u16),
    /// An 8-bit immediate the sign-extend encoding widens to 16 bits.
    Immediate8s(i8),
    Relative8(i8),
    Relative16(i16),
    Offset8(u16),
    Offset16(u16),
    Register8(Register8),
    Register16(Register16),
    AddressingMode(AddressingMode, OperandSize),
    FarAddress(u16, u16),
    NoOperand,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OperandSize {
    #[default]
    NoOperand,
    Operand8,
    Operand16,
}

impl OperandType {
    pub fn is_memory(&self) -> bool {
        matches!(self, OperandType::AddressingMode(..))
    }

    pub fn addressing_mode(&self) -> Option<&AddressingMode> {
        match self {
            OperandType::AddressingMode(mode, _) => Some(mode),
            _ => None,
        }
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandType::Immediate8(imm) => write!(f, "{}", imm),
            OperandType::Immediate16(imm) => write!(f, "{}", imm),
            OperandType::Immediate8s(imm) => write!(f, "{}", imm),
            OperandType::Relative8(rel) => write!(f, "{:+}", rel),
            OperandType::Relative16(rel) => write!(f, "{:+}", rel),
            OperandType::Offset8(offset) | OperandType::Offset16(offset) => {
                write!(f, "[{:X}h]", offset)
            }
            OperandType::Register8(reg) => write!(f, "{}", reg),
            OperandType::Register16(reg) => write!(f, "{}", reg),
            OperandType::AddressingMode(mode, _) => write!(f, "{}", mode),
            OperandType::FarAddress(segment, offset) => {
                write!(f, "{:X}h:{:X}h", segment, offset)
            }
            OperandType::NoOperand => Ok(()),
        }
    }
}
