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

    cpu_common::instruction.rs

    The decoded instruction record.

*/

use std::fmt;

use crate::cpu_common::{
    mnemonic::mnemonic_to_str,
    Mnemonic,
    OperandType,
    RepType,
    Segment,
    OPCODE_PREFIX_LOCK,
    OPCODE_PREFIX_REP,
    OPCODE_PREFIX_REPNE,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstructionWidth {
    Byte,
    Word,
}

impl InstructionWidth {
    #[inline(always)]
    pub fn sign_mask(&self) -> u16 {
        match self {
            InstructionWidth::Byte => 0x80,
            InstructionWidth::Word => 0x8000,
        }
    }

    #[inline(always)]
    pub fn modulus(&self) -> u32 {
        match self {
            InstructionWidth::Byte => 0x100,
            InstructionWidth::Word => 0x10000,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// Raw first non-prefix byte. For an `InvalidOpcode` marker this is the
    /// unassigned byte itself.
    pub opcode: u8,
    /// Prefix flags (lock/rep/segment override), `OPCODE_PREFIX_*` bits.
    pub prefixes: u32,
    /// Byte offset the instruction started at, prefixes included.
    pub address: u32,
    /// Exact byte length consumed, prefixes included. Always >= 1.
    pub size: u32,
    pub width: InstructionWidth,
    pub mnemonic: Mnemonic,
    pub segment_override: Option<Segment>,
    pub operand1: OperandType,
    pub operand2: OperandType,
}

impl Default for Instruction {
    fn default() -> Self {
        Self {
            opcode: 0,
            prefixes: 0,
            address: 0,
            size: 1,
            width: InstructionWidth::Word,
            mnemonic: Mnemonic::NOP,
            segment_override: None,
            operand1: OperandType::NoOperand,
            operand2: OperandType::NoOperand,
        }
    }
}

impl Instruction {
    #[inline(always)]
    pub fn lock(&self) -> bool {
        self.prefixes & OPCODE_PREFIX_LOCK != 0
    }

    pub fn rep(&self) -> RepType {
        if self.prefixes & OPCODE_PREFIX_REP != 0 {
            RepType::Rep
        }
        else if self.prefixes & OPCODE_PREFIX_REPNE != 0 {
            RepType::Repne
        }
        else {
            RepType::None
        }
    }

    /// True when either operand is a memory reference.
    pub fn references_memory(&self) -> bool {
        self.operand1.is_memory() || self.operand2.is_memory()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lock() {
            write!(f, "lock ")?;
        }
        match self.rep() {
            RepType::Rep => write!(f, "rep ")?,
            RepType::Repne => write!(f, "repne ")?,
            RepType::None => {}
        }
        write!(f, "{}", mnemonic_to_str(self.mnemonic))?;

        match (&self.operand1, &self.operand2) {
            (OperandType::NoOperand, _) => Ok(()),
            (op1, OperandType::NoOperand) => write!(f, " {}", op1),
            (op1, op2) => write!(f, " {}, {}", op1, op2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_common::{Register16, OPCODE_PREFIX_REP};

    #[test]
    fn prefix_accessors() {
        let mut i = Instruction::default();
        assert!(!i.lock());
        assert_eq!(i.rep(), RepType::None);
        i.prefixes |= OPCODE_PREFIX_LOCK | OPCODE_PREFIX_REP;
        assert!(i.lock());
        assert_eq!(i.rep(), RepType::Rep);
    }

    #[test]
    fn display_two_operand_form() {
        let i = Instruction {
            mnemonic: Mnemonic::MOV,
            operand1: OperandType::Register16(Register16::AX),
            operand2: OperandType::Register16(Register16::BX),
            ..Default::default()
        };
        assert_eq!(format!("{}", i), "mov ax, bx");
    }
}
