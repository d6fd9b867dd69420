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

    cpu_common::mod.rs

    Register and segment catalogs shared by the decoder, simulator, clock
    estimator and bit annotator, plus the instruction prefix constants.

*/

pub mod addressing;
pub mod alu;
pub mod error;
pub mod instruction;
pub mod mnemonic;
pub mod operands;

use std::fmt;

pub use addressing::{AddressingMode, Displacement};
pub use error::{DecodeError, MemoryError, SimError};
pub use instruction::{Instruction, InstructionWidth};
pub use mnemonic::Mnemonic;
pub use operands::{OperandSize, OperandType};

// Instruction prefixes
pub const OPCODE_PREFIX_ES_OVERRIDE: u32 = 0b_0000_0000_0001;
pub const OPCODE_PREFIX_CS_OVERRIDE: u32 = 0b_0000_0000_0010;
pub const OPCODE_PREFIX_SS_OVERRIDE: u32 = 0b_0000_0000_0100;
pub const OPCODE_PREFIX_DS_OVERRIDE: u32 = 0b_0000_0000_1000;
pub const OPCODE_SEG_OVERRIDE_MASK: u32 = 0b_0000_0000_1111;
pub const OPCODE_PREFIX_LOCK: u32 = 0b_0000_1000_0000;
pub const OPCODE_PREFIX_REPNE: u32 = 0b_0001_0000_0000;
pub const OPCODE_PREFIX_REP: u32 = 0b_0010_0000_0000;
pub const OPCODE_REP_MASK: u32 = OPCODE_PREFIX_REP | OPCODE_PREFIX_REPNE;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Register8 {
    AL,
    CL,
    DL,
    BL,
    AH,
    CH,
    DH,
    BH,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Register16 {
    AX,
    CX,
    DX,
    BX,
    SP,
    BP,
    SI,
    DI,
    ES,
    CS,
    SS,
    DS,
    IP,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    ES,
    CS,
    SS,
    DS,
}

/// Repeat prefix state carried by string instructions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RepType {
    #[default]
    None,
    Rep,
    Repne,
}

// The 3-bit register field catalogs. Indexed by the raw encoding; the
// `encoding()` methods below are the inverse direction, used when an
// instruction is mapped back to its bit fields.
pub const REGISTER8_LUT: [Register8; 8] = [
    Register8::AL,
    Register8::CL,
    Register8::DL,
    Register8::BL,
    Register8::AH,
    Register8::CH,
    Register8::DH,
    Register8::BH,
];

pub const REGISTER16_LUT: [Register16; 8] = [
    Register16::AX,
    Register16::CX,
    Register16::DX,
    Register16::BX,
    Register16::SP,
    Register16::BP,
    Register16::SI,
    Register16::DI,
];

pub const SEGMENT_REGISTER_LUT: [Segment; 4] = [Segment::ES, Segment::CS, Segment::SS, Segment::DS];

impl Register8 {
    pub const fn encoding(self) -> u8 {
        match self {
            Register8::AL => 0,
            Register8::CL => 1,
            Register8::DL => 2,
            Register8::BL => 3,
            Register8::AH => 4,
            Register8::CH => 5,
            Register8::DH => 6,
            Register8::BH => 7,
        }
    }
}

impl Register16 {
    /// The 3-bit encoding of a general register, or None for the segment
    /// registers and IP which are not encodable in a reg/rm field.
    pub const fn encoding(self) -> Option<u8> {
        match self {
            Register16::AX => Some(0),
            Register16::CX => Some(1),
            Register16::DX => Some(2),
            Register16::BX => Some(3),
            Register16::SP => Some(4),
            Register16::BP => Some(5),
            Register16::SI => Some(6),
            Register16::DI => Some(7),
            _ => None,
        }
    }
}

impl Segment {
    pub const fn encoding(self) -> u8 {
        match self {
            Segment::ES => 0,
            Segment::CS => 1,
            Segment::SS => 2,
            Segment::DS => 3,
        }
    }

    pub const fn register(self) -> Register16 {
        match self {
            Segment::ES => Register16::ES,
            Segment::CS => Register16::CS,
            Segment::SS => Register16::SS,
            Segment::DS => Register16::DS,
        }
    }
}

impl fmt::Display for Register8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Register8::AL => "al",
            Register8::CL => "cl",
            Register8::DL => "dl",
            Register8::BL => "bl",
            Register8::AH => "ah",
            Register8::CH => "ch",
            Register8::DH => "dh",
            Register8::BH => "bh",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Register16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Register16::AX => "ax",
            Register16::CX => "cx",
            Register16::DX => "dx",
            Register16::BX => "bx",
            Register16::SP => "sp",
            Register16::BP => "bp",
            Register16::SI => "si",
            Register16::DI => "di",
            Register16::ES => "es",
            Register16::CS => "cs",
            Register16::SS => "ss",
            Register16::DS => "ds",
            Register16::IP => "ip",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.register())
    }
}

/// Combine a segment register value and an offset into a 20-bit linear
/// address, wrapped to the 1 MiB address space.
pub fn calc_linear_address(segment: u16, offset: u16) -> u32 {
    (((segment as u32) << 4) + offset as u32) & 0xFFFFFu32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_encodings_invert_the_luts() {
        for (i, reg) in REGISTER8_LUT.iter().enumerate() {
            assert_eq!(reg.encoding() as usize, i);
        }
        for (i, reg) in REGISTER16_LUT.iter().enumerate() {
            assert_eq!(reg.encoding(), Some(i as u8));
        }
        for (i, seg) in SEGMENT_REGISTER_LUT.iter().enumerate() {
            assert_eq!(seg.encoding() as usize, i);
        }
        assert_eq!(Register16::IP.encoding(), None);
        assert_eq!(Register16::CS.encoding(), None);
    }

    #[test]
    fn linear_address_wraps_at_one_megabyte() {
        assert_eq!(calc_linear_address(0x0000, 0x0000), 0x00000);
        assert_eq!(calc_linear_address(0x1000, 0x0005), 0x10005);
        // 0xFFFF:0xFFFF wraps past the top of the address space
        assert_eq!(calc_linear_address(0xFFFF, 0xFFFF), 0x0FFEF);
    }
}
