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

    decoder::mod.rs

    Opcode dispatch and instruction decoding. Decoding walks the full
    0-255 opcode range through a const template table; ModRM-extension
    groups occupy 8-row blocks past the first 256 entries. Prefix bytes
    are absorbed by an explicit accumulation loop ahead of the dispatch,
    so each call to decode_next() produces exactly one instruction body
    with its prefixes folded into the reported size.

*/

pub mod modrm;

use std::collections::BTreeMap;

use crate::{
    bytes::ByteCursor,
    cpu_common::{
        DecodeError,
        Displacement,
        Instruction,
        InstructionWidth,
        Mnemonic,
        OperandSize,
        OperandType,
        Register16,
        Register8,
        RepType,
        Segment,
        OPCODE_PREFIX_CS_OVERRIDE,
        OPCODE_PREFIX_DS_OVERRIDE,
        OPCODE_PREFIX_ES_OVERRIDE,
        OPCODE_PREFIX_LOCK,
        OPCODE_PREFIX_REP,
        OPCODE_PREFIX_REPNE,
        OPCODE_PREFIX_SS_OVERRIDE,
    },
    decoder::modrm::ModRmByte,
};

#[derive(Copy, Clone, PartialEq)]
pub enum OperandTemplate {
    NoOperand,
    ModRM8,
    ModRM16,
    Register8,
    Register16,
    SegmentRegister,
    Immediate8,
    Immediate16,
    Immediate8SignExtended,
    Relative8,
    Relative16,
    Offset8,
    Offset16,
    FixedRegister8(Register8),
    FixedRegister16(Register16),
    FarAddress,
}

type Ot = OperandTemplate;

impl OperandTemplate {
    /// Whether this template reads a field out of the ModRM byte.
    fn uses_modrm(&self) -> bool {
        matches!(
            self,
            Ot::ModRM8 | Ot::ModRM16 | Ot::Register8 | Ot::Register16 | Ot::SegmentRegister
        )
    }

    fn resolve(
        &self,
        bytes: &mut ByteCursor,
        modrm: &ModRmByte,
        displacement: Displacement,
    ) -> Result<OperandType, DecodeError> {
        Ok(match self {
            Ot::NoOperand => OperandType::NoOperand,
            Ot::ModRM8 => {
                if modrm.is_addressing_mode() {
                    OperandType::AddressingMode(modrm.addressing_mode(displacement), OperandSize::Operand8)
                }
                else {
                    OperandType::Register8(modrm.rm_reg8())
                }
            }
            Ot::ModRM16 => {
                if modrm.is_addressing_mode() {
                    OperandType::AddressingMode(modrm.addressing_mode(displacement), OperandSize::Operand16)
                }
                else {
                    OperandType::Register16(modrm.rm_reg16())
                }
            }
            Ot::Register8 => OperandType::Register8(modrm.reg_reg8()),
            Ot::Register16 => OperandType::Register16(modrm.reg_reg16()),
            Ot::SegmentRegister => OperandType::Register16(modrm.reg_segment()?.register()),
            Ot::Immediate8 => OperandType::Immediate8(bytes.read_u8()?),
            Ot::Immediate16 => OperandType::Immediate16(bytes.read_u16()?),
            Ot::Immediate8SignExtended => OperandType::Immediate8s(bytes.read_i8()?),
            Ot::Relative8 => OperandType::Relative8(bytes.read_i8()?),
            Ot::Relative16 => OperandType::Relative16(bytes.read_i16()?),
            Ot::Offset8 => OperandType::Offset8(bytes.read_u16()?),
            Ot::Offset16 => OperandType::Offset16(bytes.read_u16()?),
            Ot::FixedRegister8(r8) => OperandType::Register8(*r8),
            Ot::FixedRegister16(r16) => OperandType::Register16(*r16),
            Ot::FarAddress => {
                let offset = bytes.read_u16()?;
                let segment = bytes.read_u16()?;
                OperandType::FarAddress(segment, offset)
            }
        })
    }
}

// Template flags
const I_LOCKABLE: u32 = 0b0000_0001; // Read-modify-write; compatible with LOCK when the destination is memory

pub struct InstTemplate {
    pub grp: u8,
    pub flags: u32,
    pub mnemonic: Mnemonic,
    pub operand1: OperandTemplate,
    pub operand2: OperandTemplate,
}

macro_rules! inst {
    ($op:literal, $grp:literal, $fl:expr, $m:ident, $o1:expr, $o2:expr) => {
        InstTemplate {
            grp: $grp,
            flags: $fl,
            mnemonic: Mnemonic::$m,
            operand1: $o1,
            operand2: $o2,
        }
    };
}

#[rustfmt::skip]
pub const DECODE: [InstTemplate; 352] = [
    inst!( 0x00,  0, I_LOCKABLE, ADD,           Ot::ModRM8,                             Ot::Register8),
    inst!( 0x01,  0, I_LOCKABLE, ADD,           Ot::ModRM16,                            Ot::Register16),
    inst!( 0x02,  0, 0,          ADD,           Ot::Register8,                          Ot::ModRM8),
    inst!( 0x03,  0, 0,          ADD,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0x04,  0, 0,          ADD,           Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0x05,  0, 0,          ADD,           Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0x06,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::ES),    Ot::NoOperand),
    inst!( 0x07,  0, 0,          POP,           Ot::FixedRegister16(Register16::ES),    Ot::NoOperand),
    inst!( 0x08,  0, I_LOCKABLE, OR,            Ot::ModRM8,                             Ot::Register8),
    inst!( 0x09,  0, I_LOCKABLE, OR,            Ot::ModRM16,                            Ot::Register16),
    inst!( 0x0A,  0, 0,          OR,            Ot::Register8,                          Ot::ModRM8),
    inst!( 0x0B,  0, 0,          OR,            Ot::Register16,                         Ot::ModRM16),
    inst!( 0x0C,  0, 0,          OR,            Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0x0D,  0, 0,          OR,            Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0x0E,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::CS),    Ot::NoOperand),
    inst!( 0x0F,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x10,  0, I_LOCKABLE, ADC,           Ot::ModRM8,                             Ot::Register8),
    inst!( 0x11,  0, I_LOCKABLE, ADC,           Ot::ModRM16,                            Ot::Register16),
    inst!( 0x12,  0, 0,          ADC,           Ot::Register8,                          Ot::ModRM8),
    inst!( 0x13,  0, 0,          ADC,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0x14,  0, 0,          ADC,           Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0x15,  0, 0,          ADC,           Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0x16,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::SS),    Ot::NoOperand),
    inst!( 0x17,  0, 0,          POP,           Ot::FixedRegister16(Register16::SS),    Ot::NoOperand),
    inst!( 0x18,  0, I_LOCKABLE, SBB,           Ot::ModRM8,                             Ot::Register8),
    inst!( 0x19,  0, I_LOCKABLE, SBB,           Ot::ModRM16,                            Ot::Register16),
    inst!( 0x1A,  0, 0,          SBB,           Ot::Register8,                          Ot::ModRM8),
    inst!( 0x1B,  0, 0,          SBB,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0x1C,  0, 0,          SBB,           Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0x1D,  0, 0,          SBB,           Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0x1E,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::DS),    Ot::NoOperand),
    inst!( 0x1F,  0, 0,          POP,           Ot::FixedRegister16(Register16::DS),    Ot::NoOperand),
    inst!( 0x20,  0, I_LOCKABLE, AND,           Ot::ModRM8,                             Ot::Register8),
    inst!( 0x21,  0, I_LOCKABLE, AND,           Ot::ModRM16,                            Ot::Register16),
    inst!( 0x22,  0, 0,          AND,           Ot::Register8,                          Ot::ModRM8),
    inst!( 0x23,  0, 0,          AND,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0x24,  0, 0,          AND,           Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0x25,  0, 0,          AND,           Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0x26,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand), // es: prefix, absorbed before dispatch
    inst!( 0x27,  0, 0,          DAA,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x28,  0, I_LOCKABLE, SUB,           Ot::ModRM8,                             Ot::Register8),
    inst!( 0x29,  0, I_LOCKABLE, SUB,           Ot::ModRM16,                            Ot::Register16),
    inst!( 0x2A,  0, 0,          SUB,           Ot::Register8,                          Ot::ModRM8),
    inst!( 0x2B,  0, 0,          SUB,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0x2C,  0, 0,          SUB,           Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0x2D,  0, 0,          SUB,           Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0x2E,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand), // cs: prefix, absorbed before dispatch
    inst!( 0x2F,  0, 0,          DAS,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x30,  0, I_LOCKABLE, XOR,           Ot::ModRM8,                             Ot::Register8),
    inst!( 0x31,  0, I_LOCKABLE, XOR,           Ot::ModRM16,                            Ot::Register16),
    inst!( 0x32,  0, 0,          XOR,           Ot::Register8,                          Ot::ModRM8),
    inst!( 0x33,  0, 0,          XOR,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0x34,  0, 0,          XOR,           Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0x35,  0, 0,          XOR,           Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0x36,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand), // ss: prefix, absorbed before dispatch
    inst!( 0x37,  0, 0,          AAA,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x38,  0, 0,          CMP,           Ot::ModRM8,                             Ot::Register8),
    inst!( 0x39,  0, 0,          CMP,           Ot::ModRM16,                            Ot::Register16),
    inst!( 0x3A,  0, 0,          CMP,           Ot::Register8,                          Ot::ModRM8),
    inst!( 0x3B,  0, 0,          CMP,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0x3C,  0, 0,          CMP,           Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0x3D,  0, 0,          CMP,           Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0x3E,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand), // ds: prefix, absorbed before dispatch
    inst!( 0x3F,  0, 0,          AAS,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x40,  0, 0,          INC,           Ot::FixedRegister16(Register16::AX),    Ot::NoOperand),
    inst!( 0x41,  0, 0,          INC,           Ot::FixedRegister16(Register16::CX),    Ot::NoOperand),
    inst!( 0x42,  0, 0,          INC,           Ot::FixedRegister16(Register16::DX),    Ot::NoOperand),
    inst!( 0x43,  0, 0,          INC,           Ot::FixedRegister16(Register16::BX),    Ot::NoOperand),
    inst!( 0x44,  0, 0,          INC,           Ot::FixedRegister16(Register16::SP),    Ot::NoOperand),
    inst!( 0x45,  0, 0,          INC,           Ot::FixedRegister16(Register16::BP),    Ot::NoOperand),
    inst!( 0x46,  0, 0,          INC,           Ot::FixedRegister16(Register16::SI),    Ot::NoOperand),
    inst!( 0x47,  0, 0,          INC,           Ot::FixedRegister16(Register16::DI),    Ot::NoOperand),
    inst!( 0x48,  0, 0,          DEC,           Ot::FixedRegister16(Register16::AX),    Ot::NoOperand),
    inst!( 0x49,  0, 0,          DEC,           Ot::FixedRegister16(Register16::CX),    Ot::NoOperand),
    inst!( 0x4A,  0, 0,          DEC,           Ot::FixedRegister16(Register16::DX),    Ot::NoOperand),
    inst!( 0x4B,  0, 0,          DEC,           Ot::FixedRegister16(Register16::BX),    Ot::NoOperand),
    inst!( 0x4C,  0, 0,          DEC,           Ot::FixedRegister16(Register16::SP),    Ot::NoOperand),
    inst!( 0x4D,  0, 0,          DEC,           Ot::FixedRegister16(Register16::BP),    Ot::NoOperand),
    inst!( 0x4E,  0, 0,          DEC,           Ot::FixedRegister16(Register16::SI),    Ot::NoOperand),
    inst!( 0x4F,  0, 0,          DEC,           Ot::FixedRegister16(Register16::DI),    Ot::NoOperand),
    inst!( 0x50,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::AX),    Ot::NoOperand),
    inst!( 0x51,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::CX),    Ot::NoOperand),
    inst!( 0x52,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::DX),    Ot::NoOperand),
    inst!( 0x53,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::BX),    Ot::NoOperand),
    inst!( 0x54,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::SP),    Ot::NoOperand),
    inst!( 0x55,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::BP),    Ot::NoOperand),
    inst!( 0x56,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::SI),    Ot::NoOperand),
    inst!( 0x57,  0, 0,          PUSH,          Ot::FixedRegister16(Register16::DI),    Ot::NoOperand),
    inst!( 0x58,  0, 0,          POP,           Ot::FixedRegister16(Register16::AX),    Ot::NoOperand),
    inst!( 0x59,  0, 0,          POP,           Ot::FixedRegister16(Register16::CX),    Ot::NoOperand),
    inst!( 0x5A,  0, 0,          POP,           Ot::FixedRegister16(Register16::DX),    Ot::NoOperand),
    inst!( 0x5B,  0, 0,          POP,           Ot::FixedRegister16(Register16::BX),    Ot::NoOperand),
    inst!( 0x5C,  0, 0,          POP,           Ot::FixedRegister16(Register16::SP),    Ot::NoOperand),
    inst!( 0x5D,  0, 0,          POP,           Ot::FixedRegister16(Register16::BP),    Ot::NoOperand),
    inst!( 0x5E,  0, 0,          POP,           Ot::FixedRegister16(Register16::SI),    Ot::NoOperand),
    inst!( 0x5F,  0, 0,          POP,           Ot::FixedRegister16(Register16::DI),    Ot::NoOperand),
    inst!( 0x60,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x61,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x62,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x63,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x64,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x65,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x66,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x67,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x68,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x69,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x6A,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x6B,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x6C,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x6D,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x6E,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x6F,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x70,  0, 0,          JO,            Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x71,  0, 0,          JNO,           Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x72,  0, 0,          JB,            Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x73,  0, 0,          JNB,           Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x74,  0, 0,          JZ,            Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x75,  0, 0,          JNZ,           Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x76,  0, 0,          JBE,           Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x77,  0, 0,          JNBE,          Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x78,  0, 0,          JS,            Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x79,  0, 0,          JNS,           Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x7A,  0, 0,          JP,            Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x7B,  0, 0,          JNP,           Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x7C,  0, 0,          JL,            Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x7D,  0, 0,          JNL,           Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x7E,  0, 0,          JLE,           Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x7F,  0, 0,          JNLE,          Ot::Relative8,                          Ot::NoOperand),
    inst!( 0x80,  1, 0,          ADD,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x81,  2, 0,          ADD,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x82,  3, 0,          ADD,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x83,  4, 0,          ADD,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x84,  0, 0,          TEST,          Ot::ModRM8,                             Ot::Register8),
    inst!( 0x85,  0, 0,          TEST,          Ot::ModRM16,                            Ot::Register16),
    inst!( 0x86,  0, I_LOCKABLE, XCHG,          Ot::Register8,                          Ot::ModRM8),
    inst!( 0x87,  0, I_LOCKABLE, XCHG,          Ot::Register16,                         Ot::ModRM16),
    inst!( 0x88,  0, 0,          MOV,           Ot::ModRM8,                             Ot::Register8),
    inst!( 0x89,  0, 0,          MOV,           Ot::ModRM16,                            Ot::Register16),
    inst!( 0x8A,  0, 0,          MOV,           Ot::Register8,                          Ot::ModRM8),
    inst!( 0x8B,  0, 0,          MOV,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0x8C,  0, 0,          MOV,           Ot::ModRM16,                            Ot::SegmentRegister),
    inst!( 0x8D,  0, 0,          LEA,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0x8E,  0, 0,          MOV,           Ot::SegmentRegister,                    Ot::ModRM16),
    inst!( 0x8F,  0, 0,          POP,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0x90,  0, 0,          NOP,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x91,  0, 0,          XCHG,          Ot::FixedRegister16(Register16::CX),    Ot::FixedRegister16(Register16::AX)),
    inst!( 0x92,  0, 0,          XCHG,          Ot::FixedRegister16(Register16::DX),    Ot::FixedRegister16(Register16::AX)),
    inst!( 0x93,  0, 0,          XCHG,          Ot::FixedRegister16(Register16::BX),    Ot::FixedRegister16(Register16::AX)),
    inst!( 0x94,  0, 0,          XCHG,          Ot::FixedRegister16(Register16::SP),    Ot::FixedRegister16(Register16::AX)),
    inst!( 0x95,  0, 0,          XCHG,          Ot::FixedRegister16(Register16::BP),    Ot::FixedRegister16(Register16::AX)),
    inst!( 0x96,  0, 0,          XCHG,          Ot::FixedRegister16(Register16::SI),    Ot::FixedRegister16(Register16::AX)),
    inst!( 0x97,  0, 0,          XCHG,          Ot::FixedRegister16(Register16::DI),    Ot::FixedRegister16(Register16::AX)),
    inst!( 0x98,  0, 0,          CBW,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x99,  0, 0,          CWD,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x9A,  0, 0,          CALLF,         Ot::FarAddress,                         Ot::NoOperand),
    inst!( 0x9B,  0, 0,          WAIT,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x9C,  0, 0,          PUSHF,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x9D,  0, 0,          POPF,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x9E,  0, 0,          SAHF,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0x9F,  0, 0,          LAHF,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xA0,  0, 0,          MOV,           Ot::FixedRegister8(Register8::AL),      Ot::Offset8),
    inst!( 0xA1,  0, 0,          MOV,           Ot::FixedRegister16(Register16::AX),    Ot::Offset16),
    inst!( 0xA2,  0, 0,          MOV,           Ot::Offset8,                            Ot::FixedRegister8(Register8::AL)),
    inst!( 0xA3,  0, 0,          MOV,           Ot::Offset16,                           Ot::FixedRegister16(Register16::AX)),
    inst!( 0xA4,  0, 0,          MOVSB,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xA5,  0, 0,          MOVSW,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xA6,  0, 0,          CMPSB,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xA7,  0, 0,          CMPSW,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xA8,  0, 0,          TEST,          Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0xA9,  0, 0,          TEST,          Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0xAA,  0, 0,          STOSB,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xAB,  0, 0,          STOSW,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xAC,  0, 0,          LODSB,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xAD,  0, 0,          LODSW,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xAE,  0, 0,          SCASB,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xAF,  0, 0,          SCASW,         Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xB0,  0, 0,          MOV,           Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0xB1,  0, 0,          MOV,           Ot::FixedRegister8(Register8::CL),      Ot::Immediate8),
    inst!( 0xB2,  0, 0,          MOV,           Ot::FixedRegister8(Register8::DL),      Ot::Immediate8),
    inst!( 0xB3,  0, 0,          MOV,           Ot::FixedRegister8(Register8::BL),      Ot::Immediate8),
    inst!( 0xB4,  0, 0,          MOV,           Ot::FixedRegister8(Register8::AH),      Ot::Immediate8),
    inst!( 0xB5,  0, 0,          MOV,           Ot::FixedRegister8(Register8::CH),      Ot::Immediate8),
    inst!( 0xB6,  0, 0,          MOV,           Ot::FixedRegister8(Register8::DH),      Ot::Immediate8),
    inst!( 0xB7,  0, 0,          MOV,           Ot::FixedRegister8(Register8::BH),      Ot::Immediate8),
    inst!( 0xB8,  0, 0,          MOV,           Ot::FixedRegister16(Register16::AX),    Ot::Immediate16),
    inst!( 0xB9,  0, 0,          MOV,           Ot::FixedRegister16(Register16::CX),    Ot::Immediate16),
    inst!( 0xBA,  0, 0,          MOV,           Ot::FixedRegister16(Register16::DX),    Ot::Immediate16),
    inst!( 0xBB,  0, 0,          MOV,           Ot::FixedRegister16(Register16::BX),    Ot::Immediate16),
    inst!( 0xBC,  0, 0,          MOV,           Ot::FixedRegister16(Register16::SP),    Ot::Immediate16),
    inst!( 0xBD,  0, 0,          MOV,           Ot::FixedRegister16(Register16::BP),    Ot::Immediate16),
    inst!( 0xBE,  0, 0,          MOV,           Ot::FixedRegister16(Register16::SI),    Ot::Immediate16),
    inst!( 0xBF,  0, 0,          MOV,           Ot::FixedRegister16(Register16::DI),    Ot::Immediate16),
    inst!( 0xC0,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xC1,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xC2,  0, 0,          RETN,          Ot::Immediate16,                        Ot::NoOperand),
    inst!( 0xC3,  0, 0,          RETN,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xC4,  0, 0,          LES,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0xC5,  0, 0,          LDS,           Ot::Register16,                         Ot::ModRM16),
    inst!( 0xC6,  0, 0,          MOV,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0xC7,  0, 0,          MOV,           Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0xC8,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xC9,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xCA,  0, 0,          RETF,          Ot::Immediate16,                        Ot::NoOperand),
    inst!( 0xCB,  0, 0,          RETF,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xCC,  0, 0,          INT3,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xCD,  0, 0,          INT,           Ot::Immediate8,                         Ot::NoOperand),
    inst!( 0xCE,  0, 0,          INTO,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xCF,  0, 0,          IRET,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD0,  5, 0,          ROL,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD1,  6, 0,          ROL,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD2,  7, 0,          ROL,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD3,  8, 0,          ROL,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD4,  0, 0,          AAM,           Ot::Immediate8,                         Ot::NoOperand),
    inst!( 0xD5,  0, 0,          AAD,           Ot::Immediate8,                         Ot::NoOperand),
    inst!( 0xD6,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD7,  0, 0,          XLAT,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD8,  0, 0,          ESC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xD9,  0, 0,          ESC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xDA,  0, 0,          ESC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xDB,  0, 0,          ESC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xDC,  0, 0,          ESC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xDD,  0, 0,          ESC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xDE,  0, 0,          ESC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xDF,  0, 0,          ESC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xE0,  0, 0,          LOOPNE,        Ot::Relative8,                          Ot::NoOperand),
    inst!( 0xE1,  0, 0,          LOOPE,         Ot::Relative8,                          Ot::NoOperand),
    inst!( 0xE2,  0, 0,          LOOP,          Ot::Relative8,                          Ot::NoOperand),
    inst!( 0xE3,  0, 0,          JCXZ,          Ot::Relative8,                          Ot::NoOperand),
    inst!( 0xE4,  0, 0,          IN,            Ot::FixedRegister8(Register8::AL),      Ot::Immediate8),
    inst!( 0xE5,  0, 0,          IN,            Ot::FixedRegister16(Register16::AX),    Ot::Immediate8),
    inst!( 0xE6,  0, 0,          OUT,           Ot::Immediate8,                         Ot::FixedRegister8(Register8::AL)),
    inst!( 0xE7,  0, 0,          OUT,           Ot::Immediate8,                         Ot::FixedRegister16(Register16::AX)),
    inst!( 0xE8,  0, 0,          CALL,          Ot::Relative16,                         Ot::NoOperand),
    inst!( 0xE9,  0, 0,          JMP,           Ot::Relative16,                         Ot::NoOperand),
    inst!( 0xEA,  0, 0,          JMPF,          Ot::FarAddress,                         Ot::NoOperand),
    inst!( 0xEB,  0, 0,          JMP,           Ot::Relative8,                          Ot::NoOperand),
    inst!( 0xEC,  0, 0,          IN,            Ot::FixedRegister8(Register8::AL),      Ot::FixedRegister16(Register16::DX)),
    inst!( 0xED,  0, 0,          IN,            Ot::FixedRegister16(Register16::AX),    Ot::FixedRegister16(Register16::DX)),
    inst!( 0xEE,  0, 0,          OUT,           Ot::FixedRegister16(Register16::DX),    Ot::FixedRegister8(Register8::AL)),
    inst!( 0xEF,  0, 0,          OUT,           Ot::FixedRegister16(Register16::DX),    Ot::FixedRegister16(Register16::AX)),
    inst!( 0xF0,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand), // lock prefix, absorbed before dispatch
    inst!( 0xF1,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xF2,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand), // repne prefix, absorbed before dispatch
    inst!( 0xF3,  0, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand), // rep prefix, absorbed before dispatch
    inst!( 0xF4,  0, 0,          HLT,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xF5,  0, 0,          CMC,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xF6,  9, 0,          TEST,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xF7, 10, 0,          TEST,          Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xF8,  0, 0,          CLC,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xF9,  0, 0,          STC,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFA,  0, 0,          CLI,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFB,  0, 0,          STI,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFC,  0, 0,          CLD,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFD,  0, 0,          STD,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFE, 11, 0,          INC,           Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFF, 12, 0,          INC,           Ot::NoOperand,                          Ot::NoOperand),
    // Group 1: 0x80, immediate to byte register/memory
    inst!( 0x80,  1, I_LOCKABLE, ADD,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x80,  1, I_LOCKABLE, OR,            Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x80,  1, I_LOCKABLE, ADC,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x80,  1, I_LOCKABLE, SBB,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x80,  1, I_LOCKABLE, AND,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x80,  1, I_LOCKABLE, SUB,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x80,  1, I_LOCKABLE, XOR,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x80,  1, 0,          CMP,           Ot::ModRM8,                             Ot::Immediate8),
    // Group 2: 0x81, immediate to word register/memory
    inst!( 0x81,  2, I_LOCKABLE, ADD,           Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0x81,  2, I_LOCKABLE, OR,            Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0x81,  2, I_LOCKABLE, ADC,           Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0x81,  2, I_LOCKABLE, SBB,           Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0x81,  2, I_LOCKABLE, AND,           Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0x81,  2, I_LOCKABLE, SUB,           Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0x81,  2, I_LOCKABLE, XOR,           Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0x81,  2, 0,          CMP,           Ot::ModRM16,                            Ot::Immediate16),
    // Group 3: 0x82, alias of 0x80
    inst!( 0x82,  3, I_LOCKABLE, ADD,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x82,  3, I_LOCKABLE, OR,            Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x82,  3, I_LOCKABLE, ADC,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x82,  3, I_LOCKABLE, SBB,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x82,  3, I_LOCKABLE, AND,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x82,  3, I_LOCKABLE, SUB,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x82,  3, I_LOCKABLE, XOR,           Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0x82,  3, 0,          CMP,           Ot::ModRM8,                             Ot::Immediate8),
    // Group 4: 0x83, sign-extended immediate to word register/memory
    inst!( 0x83,  4, I_LOCKABLE, ADD,           Ot::ModRM16,                            Ot::Immediate8SignExtended),
    inst!( 0x83,  4, I_LOCKABLE, OR,            Ot::ModRM16,                            Ot::Immediate8SignExtended),
    inst!( 0x83,  4, I_LOCKABLE, ADC,           Ot::ModRM16,                            Ot::Immediate8SignExtended),
    inst!( 0x83,  4, I_LOCKABLE, SBB,           Ot::ModRM16,                            Ot::Immediate8SignExtended),
    inst!( 0x83,  4, I_LOCKABLE, AND,           Ot::ModRM16,                            Ot::Immediate8SignExtended),
    inst!( 0x83,  4, I_LOCKABLE, SUB,           Ot::ModRM16,                            Ot::Immediate8SignExtended),
    inst!( 0x83,  4, I_LOCKABLE, XOR,           Ot::ModRM16,                            Ot::Immediate8SignExtended),
    inst!( 0x83,  4, 0,          CMP,           Ot::ModRM16,                            Ot::Immediate8SignExtended),
    // Group 5: 0xD0, shift/rotate byte by 1. Extension 110 is reserved.
    inst!( 0xD0,  5, 0,          ROL,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xD0,  5, 0,          ROR,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xD0,  5, 0,          RCL,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xD0,  5, 0,          RCR,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xD0,  5, 0,          SHL,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xD0,  5, 0,          SHR,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xD0,  5, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD0,  5, 0,          SAR,           Ot::ModRM8,                             Ot::NoOperand),
    // Group 6: 0xD1, shift/rotate word by 1
    inst!( 0xD1,  6, 0,          ROL,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xD1,  6, 0,          ROR,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xD1,  6, 0,          RCL,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xD1,  6, 0,          RCR,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xD1,  6, 0,          SHL,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xD1,  6, 0,          SHR,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xD1,  6, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD1,  6, 0,          SAR,           Ot::ModRM16,                            Ot::NoOperand),
    // Group 7: 0xD2, shift/rotate byte by CL
    inst!( 0xD2,  7, 0,          ROL,           Ot::ModRM8,                             Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD2,  7, 0,          ROR,           Ot::ModRM8,                             Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD2,  7, 0,          RCL,           Ot::ModRM8,                             Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD2,  7, 0,          RCR,           Ot::ModRM8,                             Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD2,  7, 0,          SHL,           Ot::ModRM8,                             Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD2,  7, 0,          SHR,           Ot::ModRM8,                             Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD2,  7, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD2,  7, 0,          SAR,           Ot::ModRM8,                             Ot::FixedRegister8(Register8::CL)),
    // Group 8: 0xD3, shift/rotate word by CL
    inst!( 0xD3,  8, 0,          ROL,           Ot::ModRM16,                            Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD3,  8, 0,          ROR,           Ot::ModRM16,                            Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD3,  8, 0,          RCL,           Ot::ModRM16,                            Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD3,  8, 0,          RCR,           Ot::ModRM16,                            Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD3,  8, 0,          SHL,           Ot::ModRM16,                            Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD3,  8, 0,          SHR,           Ot::ModRM16,                            Ot::FixedRegister8(Register8::CL)),
    inst!( 0xD3,  8, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xD3,  8, 0,          SAR,           Ot::ModRM16,                            Ot::FixedRegister8(Register8::CL)),
    // Group 9: 0xF6, byte test/single-operand math. Extension 001 is a TEST alias.
    inst!( 0xF6,  9, 0,          TEST,          Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0xF6,  9, 0,          TEST,          Ot::ModRM8,                             Ot::Immediate8),
    inst!( 0xF6,  9, I_LOCKABLE, NOT,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xF6,  9, I_LOCKABLE, NEG,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xF6,  9, 0,          MUL,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xF6,  9, 0,          IMUL,          Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xF6,  9, 0,          DIV,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xF6,  9, 0,          IDIV,          Ot::ModRM8,                             Ot::NoOperand),
    // Group 10: 0xF7, word test/single-operand math
    inst!( 0xF7, 10, 0,          TEST,          Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0xF7, 10, 0,          TEST,          Ot::ModRM16,                            Ot::Immediate16),
    inst!( 0xF7, 10, I_LOCKABLE, NOT,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xF7, 10, I_LOCKABLE, NEG,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xF7, 10, 0,          MUL,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xF7, 10, 0,          IMUL,          Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xF7, 10, 0,          DIV,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xF7, 10, 0,          IDIV,          Ot::ModRM16,                            Ot::NoOperand),
    // Group 11: 0xFE, byte inc/dec. Extensions 010-111 are reserved.
    inst!( 0xFE, 11, I_LOCKABLE, INC,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xFE, 11, I_LOCKABLE, DEC,           Ot::ModRM8,                             Ot::NoOperand),
    inst!( 0xFE, 11, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFE, 11, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFE, 11, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFE, 11, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFE, 11, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    inst!( 0xFE, 11, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
    // Group 12: 0xFF, word inc/dec/call/jmp/push. Extension 111 is reserved.
    inst!( 0xFF, 12, I_LOCKABLE, INC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xFF, 12, I_LOCKABLE, DEC,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xFF, 12, 0,          CALL,          Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xFF, 12, 0,          CALLF,         Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xFF, 12, 0,          JMP,           Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xFF, 12, 0,          JMPF,          Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xFF, 12, 0,          PUSH,          Ot::ModRM16,                            Ot::NoOperand),
    inst!( 0xFF, 12, 0,          InvalidOpcode, Ot::NoOperand,                          Ot::NoOperand),
];

/// Per-decode prefix accumulation state. Each prefix may be pending at most
/// once; re-setting one is a malformed stream.
#[derive(Default)]
struct PrefixContext {
    segment_override: Option<Segment>,
    lock: bool,
    rep: RepType,
    prefixes: u32,
}

impl PrefixContext {
    fn set_segment_override(&mut self, segment: Segment, flag: u32) -> Result<(), DecodeError> {
        if self.segment_override.is_some() {
            return Err(DecodeError::DuplicatePrefix("segment override"));
        }
        self.segment_override = Some(segment);
        self.prefixes |= flag;
        Ok(())
    }

    fn set_lock(&mut self) -> Result<(), DecodeError> {
        if self.lock {
            return Err(DecodeError::DuplicatePrefix("lock"));
        }
        self.lock = true;
        self.prefixes |= OPCODE_PREFIX_LOCK;
        Ok(())
    }

    fn set_rep(&mut self, rep: RepType, flag: u32) -> Result<(), DecodeError> {
        if self.rep != RepType::None {
            return Err(DecodeError::DuplicatePrefix("rep"));
        }
        self.rep = rep;
        self.prefixes |= flag;
        Ok(())
    }
}

/// Decode an entire stream into an ordered map keyed by each instruction's
/// starting byte offset. Prefix bytes never produce entries of their own.
pub fn decode_stream(bytes: &[u8]) -> Result<BTreeMap<u32, Instruction>, DecodeError> {
    let mut cursor = ByteCursor::new(bytes);
    let mut map = BTreeMap::new();

    while !cursor.exhausted() {
        let start = cursor.pos();
        let mut instruction = decode_next(&mut cursor)?;
        instruction.address = start;
        map.insert(start, instruction);
    }
    Ok(map)
}

/// Decode exactly one instruction, prefixes included, from the cursor.
pub fn decode_next(bytes: &mut ByteCursor) -> Result<Instruction, DecodeError> {
    let start = bytes.pos();
    let mut ctx = PrefixContext::default();

    // Absorb prefix bytes ahead of the dispatch. A prefix modifies exactly
    // the following instruction body, so everything accumulated here is
    // folded into the one record produced below.
    let opcode = loop {
        match bytes.read_u8()? {
            0x26 => ctx.set_segment_override(Segment::ES, OPCODE_PREFIX_ES_OVERRIDE)?,
            0x2E => ctx.set_segment_override(Segment::CS, OPCODE_PREFIX_CS_OVERRIDE)?,
            0x36 => ctx.set_segment_override(Segment::SS, OPCODE_PREFIX_SS_OVERRIDE)?,
            0x3E => ctx.set_segment_override(Segment::DS, OPCODE_PREFIX_DS_OVERRIDE)?,
            0xF0 => ctx.set_lock()?,
            0xF2 => ctx.set_rep(RepType::Repne, OPCODE_PREFIX_REPNE)?,
            0xF3 => ctx.set_rep(RepType::Rep, OPCODE_PREFIX_REP)?,
            byte => break byte,
        }
    };

    let mut op_lu = &DECODE[opcode as usize];

    let mut modrm = ModRmByte::default_ref();
    let mut displacement = Displacement::NoDisp;
    let mut loaded_modrm = false;

    // Group opcodes always carry a ModRM; its reg field selects the row.
    if op_lu.grp != 0 {
        let (m, disp) = ModRmByte::read(bytes)?;
        modrm = m;
        displacement = disp;
        loaded_modrm = true;

        op_lu = &DECODE[256 + (op_lu.grp as usize - 1) * 8 + modrm.op_extension() as usize];
        if op_lu.mnemonic == Mnemonic::InvalidOpcode {
            return Err(DecodeError::ReservedGroupExtension {
                opcode,
                ext: modrm.op_extension(),
            });
        }
    }

    if !loaded_modrm && (op_lu.operand1.uses_modrm() || op_lu.operand2.uses_modrm()) {
        let (m, disp) = ModRmByte::read(bytes)?;
        modrm = m;
        displacement = disp;
        loaded_modrm = true;
    }

    // Reserved reg-field patterns on non-group ModRM opcodes
    if loaded_modrm {
        match opcode {
            0x8F | 0xC6 | 0xC7 if modrm.op_extension() != 0 => {
                return Err(DecodeError::ReservedGroupExtension {
                    opcode,
                    ext: modrm.op_extension(),
                });
            }
            _ => {}
        }
    }

    let operand1 = op_lu.operand1.resolve(bytes, modrm, displacement)?;
    let operand2 = op_lu.operand2.resolve(bytes, modrm, displacement)?;

    // LEA and the far pointer loads have no register form
    if matches!(op_lu.mnemonic, Mnemonic::LEA | Mnemonic::LES | Mnemonic::LDS) && !operand2.is_memory() {
        return Err(DecodeError::RegisterOperandIllegal(opcode));
    }

    if op_lu.mnemonic == Mnemonic::InvalidOpcode {
        // Unassigned opcode: not an error. Emit a one-byte marker carrying
        // the raw byte so the caller can keep decoding around stray data.
        // A pending prefix has nothing to attach to, however.
        drain_prefixes(&ctx, op_lu, opcode, &operand1, &operand2)?;
        log::trace!("unassigned opcode {:02X}, emitting marker", opcode);
        return Ok(Instruction {
            opcode,
            prefixes: 0,
            address: start,
            size: 1,
            width: InstructionWidth::Byte,
            mnemonic: Mnemonic::InvalidOpcode,
            segment_override: None,
            operand1: OperandType::NoOperand,
            operand2: OperandType::NoOperand,
        });
    }

    drain_prefixes(&ctx, op_lu, opcode, &operand1, &operand2)?;

    Ok(Instruction {
        opcode,
        prefixes: ctx.prefixes,
        address: start,
        size: bytes.pos() - start,
        width: instruction_width(op_lu),
        mnemonic: op_lu.mnemonic,
        segment_override: ctx.segment_override,
        operand1,
        operand2,
    })
}

/// Validate that every pending prefix is actually consumed by the decoded
/// instruction body. A leftover prefix means a malformed stream.
fn drain_prefixes(
    ctx: &PrefixContext,
    op_lu: &InstTemplate,
    opcode: u8,
    operand1: &OperandType,
    operand2: &OperandType,
) -> Result<(), DecodeError> {
    let direct_offset = |op: &OperandType| matches!(op, OperandType::Offset8(_) | OperandType::Offset16(_));
    let references_memory = operand1.is_memory()
        || operand2.is_memory()
        || direct_offset(operand1)
        || direct_offset(operand2)
        || uses_implicit_memory(op_lu.mnemonic);

    if ctx.segment_override.is_some() && !references_memory {
        return Err(DecodeError::UnconsumedPrefix("segment override", opcode));
    }

    if ctx.lock {
        // Lock requires a memory destination, with exchange the one exception.
        if op_lu.mnemonic != Mnemonic::XCHG {
            if op_lu.flags & I_LOCKABLE == 0 {
                return Err(DecodeError::UnconsumedPrefix("lock", opcode));
            }
            if !operand1.is_memory() {
                return Err(DecodeError::LockRequiresMemoryDestination(opcode));
            }
        }
        else if !operand1.is_memory() && !operand2.is_memory() {
            return Err(DecodeError::LockRequiresMemoryDestination(opcode));
        }
    }

    if ctx.rep != RepType::None && !op_lu.mnemonic.is_string_op() {
        return Err(DecodeError::UnconsumedPrefix("rep", opcode));
    }
    Ok(())
}

/// String instructions and XLAT reference memory through implicit operands,
/// which is what a segment override attaches to.
fn uses_implicit_memory(mnemonic: Mnemonic) -> bool {
    mnemonic.is_string_op() || mnemonic == Mnemonic::XLAT
}

fn instruction_width(op_lu: &InstTemplate) -> InstructionWidth {
    use Mnemonic::*;
    let byte_template = |t: &OperandTemplate| {
        matches!(
            t,
            Ot::ModRM8 | Ot::Register8 | Ot::FixedRegister8(_) | Ot::Offset8
        )
    };
    if byte_template(&op_lu.operand1) || byte_template(&op_lu.operand2) {
        InstructionWidth::Byte
    }
    else if matches!(op_lu.mnemonic, MOVSB | CMPSB | SCASB | LODSB | STOSB | XLAT) {
        InstructionWidth::Byte
    }
    else {
        InstructionWidth::Word
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_common::AddressingMode;

    fn decode_one(bytes: &[u8]) -> Instruction {
        let mut cursor = ByteCursor::new(bytes);
        decode_next(&mut cursor).expect("decode failed")
    }

    #[test]
    fn mov_register_to_register() {
        // mov ax, bx encoded through the d=0 form: source in reg, dest in rm
        let i = decode_one(&[0x89, 0xD8]);
        assert_eq!(i.mnemonic, Mnemonic::MOV);
        assert_eq!(i.size, 2);
        assert_eq!(i.operand1, OperandType::Register16(Register16::AX));
        assert_eq!(i.operand2, OperandType::Register16(Register16::BX));
        assert_eq!(i.width, InstructionWidth::Word);
    }

    #[test]
    fn byte_lengths_sum_to_stream_length() {
        // mov cx, 12; es: mov [bx+si+4], al; add bx, -1; stray 0x0F; rep movsb
        let stream: &[u8] = &[
            0xB9, 0x0C, 0x00, // mov cx, 12
            0x26, 0x88, 0x40, 0x04, // es: mov [bx+si+4], al
            0x83, 0xC3, 0xFF, // add bx, -1
            0x0F, // unassigned
            0xF3, 0xA4, // rep movsb
        ];
        let map = decode_stream(stream).unwrap();
        assert_eq!(map.len(), 5);
        let total: u32 = map.values().map(|i| i.size).sum();
        assert_eq!(total as usize, stream.len());
        // Offsets are the starting byte of each instruction
        let offsets: Vec<u32> = map.keys().copied().collect();
        assert_eq!(offsets, vec![0, 3, 7, 10, 11]);
        // The override is folded into the following instruction
        let i = &map[&3];
        assert_eq!(i.size, 4);
        assert_eq!(i.segment_override, Some(Segment::ES));
    }

    #[test]
    fn sign_extended_immediate() {
        let i = decode_one(&[0x83, 0xC3, 0xFF]);
        assert_eq!(i.mnemonic, Mnemonic::ADD);
        assert_eq!(i.operand1, OperandType::Register16(Register16::BX));
        assert_eq!(i.operand2, OperandType::Immediate8s(-1));
    }

    #[test]
    fn negative_displacement() {
        let i = decode_one(&[0x8B, 0x46, 0xFC]); // mov ax, [bp-4]
        assert_eq!(i.mnemonic, Mnemonic::MOV);
        assert_eq!(
            i.operand2,
            OperandType::AddressingMode(
                AddressingMode::BpDisp8(Displacement::Disp8(-4)),
                OperandSize::Operand16
            )
        );
    }

    #[test]
    fn direct_address() {
        let i = decode_one(&[0x8B, 0x1E, 0x10, 0x00]); // mov bx, [16]
        assert_eq!(i.size, 4);
        assert_eq!(
            i.operand2,
            OperandType::AddressingMode(
                AddressingMode::Disp16(Displacement::Disp16(16)),
                OperandSize::Operand16
            )
        );
    }

    #[test]
    fn unassigned_opcode_decodes_to_marker() {
        let map = decode_stream(&[0x0F, 0x90]).unwrap();
        let marker = &map[&0];
        assert_eq!(marker.mnemonic, Mnemonic::InvalidOpcode);
        assert_eq!(marker.opcode, 0x0F);
        assert_eq!(marker.size, 1);
        assert_eq!(map[&1].mnemonic, Mnemonic::NOP);
    }

    #[test]
    fn duplicate_prefix_is_fatal() {
        let mut cursor = ByteCursor::new(&[0xF3, 0xF3, 0xA4]);
        assert_eq!(decode_next(&mut cursor), Err(DecodeError::DuplicatePrefix("rep")));

        let mut cursor = ByteCursor::new(&[0x26, 0x3E, 0x8B, 0x07]);
        assert_eq!(
            decode_next(&mut cursor),
            Err(DecodeError::DuplicatePrefix("segment override"))
        );
    }

    #[test]
    fn unconsumed_prefixes_are_fatal() {
        // Override on a register-only instruction
        let mut cursor = ByteCursor::new(&[0x2E, 0x40]);
        assert_eq!(
            decode_next(&mut cursor),
            Err(DecodeError::UnconsumedPrefix("segment override", 0x40))
        );
        // Rep on a non-string instruction
        let mut cursor = ByteCursor::new(&[0xF3, 0x90]);
        assert_eq!(decode_next(&mut cursor), Err(DecodeError::UnconsumedPrefix("rep", 0x90)));
        // Lock on an un-lockable instruction
        let mut cursor = ByteCursor::new(&[0xF0, 0x90]);
        assert_eq!(decode_next(&mut cursor), Err(DecodeError::UnconsumedPrefix("lock", 0x90)));
    }

    #[test]
    fn lock_requires_memory_destination() {
        // lock add bx, ax: register destination
        let mut cursor = ByteCursor::new(&[0xF0, 0x01, 0xC3]);
        assert_eq!(
            decode_next(&mut cursor),
            Err(DecodeError::LockRequiresMemoryDestination(0x01))
        );
        // lock add [bx], ax is fine
        let i = decode_one(&[0xF0, 0x01, 0x07]);
        assert!(i.lock());
        assert_eq!(i.size, 3);
        // lock xchg al, [bx] is the exception to the destination rule
        let i = decode_one(&[0xF0, 0x86, 0x07]);
        assert!(i.lock());
    }

    #[test]
    fn reserved_encodings_are_fatal() {
        // pop r/m16 with a non-zero reg extension
        let mut cursor = ByteCursor::new(&[0x8F, 0x48, 0x00]);
        assert!(matches!(
            decode_next(&mut cursor),
            Err(DecodeError::ReservedGroupExtension { opcode: 0x8F, ext: 1 })
        ));
        // shift group extension 110
        let mut cursor = ByteCursor::new(&[0xD0, 0xF0]);
        assert!(matches!(
            decode_next(&mut cursor),
            Err(DecodeError::ReservedGroupExtension { opcode: 0xD0, ext: 6 })
        ));
        // mov sreg with reg > 3
        let mut cursor = ByteCursor::new(&[0x8E, 0xE0]);
        assert_eq!(decode_next(&mut cursor), Err(DecodeError::InvalidSegmentRegister(4)));
    }

    #[test]
    fn lea_register_form_is_fatal() {
        let mut cursor = ByteCursor::new(&[0x8D, 0xC3]);
        assert_eq!(decode_next(&mut cursor), Err(DecodeError::RegisterOperandIllegal(0x8D)));
    }

    #[test]
    fn group_dispatch_selects_row_by_extension() {
        let i = decode_one(&[0xF7, 0xDB]); // neg bx
        assert_eq!(i.mnemonic, Mnemonic::NEG);
        assert_eq!(i.operand1, OperandType::Register16(Register16::BX));

        let i = decode_one(&[0xD1, 0xE0]); // shl ax, 1
        assert_eq!(i.mnemonic, Mnemonic::SHL);
        assert_eq!(i.operand2, OperandType::NoOperand);

        let i = decode_one(&[0xD3, 0xE0]); // shl ax, cl
        assert_eq!(i.operand2, OperandType::Register8(Register8::CL));
    }

    #[test]
    fn truncated_instruction_is_fatal() {
        let mut cursor = ByteCursor::new(&[0xB8, 0x05]); // mov ax, imm16 cut short
        assert_eq!(decode_next(&mut cursor), Err(DecodeError::UnexpectedEof(2)));
    }

    #[test]
    fn rep_string_instruction() {
        let i = decode_one(&[0xF3, 0xA4]);
        assert_eq!(i.mnemonic, Mnemonic::MOVSB);
        assert_eq!(i.rep(), RepType::Rep);
        assert_eq!(i.size, 2);

        let i = decode_one(&[0xF2, 0xAE]);
        assert_eq!(i.mnemonic, Mnemonic::SCASB);
        assert_eq!(i.rep(), RepType::Repne);
    }

    #[test]
    fn random_streams_account_for_every_byte() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x8086);
        for _ in 0..200 {
            let len = rng.gen_range(1..64);
            let stream: Vec<u8> = (0..len).map(|_| rng.gen::<u8>()).collect();
            // Malformed streams may error; any successful full decode must
            // account for every byte exactly once.
            if let Ok(map) = decode_stream(&stream) {
                let total: u32 = map.values().map(|i| i.size).sum();
                assert_eq!(total as usize, stream.len());
                for (offset, i) in &map {
                    assert!(i.size >= 1);
                    assert_eq!(*offset, i.address);
                }
            }
        }
    }

    #[test]
    fn far_address_operand() {
        let i = decode_one(&[0x9A, 0x34, 0x12, 0x00, 0xF0]); // call F000:1234
        assert_eq!(i.mnemonic, Mnemonic::CALLF);
        assert_eq!(i.operand1, OperandType::FarAddress(0xF000, 0x1234));
        assert_eq!(i.size, 5);
    }
}
