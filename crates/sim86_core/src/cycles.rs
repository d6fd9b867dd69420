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

    cycles.rs

    Minimum clock-cycle estimates per instruction, from the documented
    8086 timings. This is a decode-time heuristic, not a bus-accurate
    timing model: conditional costs (taken branches, shift counts,
    repeat counts) are billed at their minimum.

*/

use serde::Deserialize;

use crate::cpu_common::{AddressingMode, Displacement, Instruction, InstructionWidth, Mnemonic, OperandType, Register16};

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    /// Bill a present-but-zero displacement as if no displacement byte
    /// were encoded. Both readings of the hardware tables exist.
    pub treat_zero_displacement_as_no_displacement: bool,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            treat_zero_displacement_as_no_displacement: true,
        }
    }
}

/// Effective-address cycle surcharge, from the documented EA table:
/// displacement only 6, base or index 5, base+index 7 or 8, and +4 on
/// top of the register combination when a displacement is billed.
/// A segment override prefix adds a flat 2.
pub fn address_clocks(mode: &AddressingMode, has_override: bool, settings: &ClockSettings) -> u32 {
    use AddressingMode::*;

    let disp = mode.displacement();
    let disp_billed = match disp {
        Displacement::Disp8(_) | Displacement::Disp16(_) => {
            !(disp.is_zero() && settings.treat_zero_displacement_as_no_displacement)
        }
        _ => false,
    };

    let base = match mode {
        Disp16(_) => 6,
        Bx | Si | Di => 5,
        BxDisp8(_) | BxDisp16(_) | SiDisp8(_) | SiDisp16(_) | DiDisp8(_) | DiDisp16(_) | BpDisp8(_)
        | BpDisp16(_) => {
            if disp_billed {
                9
            }
            else {
                5
            }
        }
        BpDi | BxSi => 7,
        BpSi | BxDi => 8,
        BpDiDisp8(_) | BpDiDisp16(_) | BxSiDisp8(_) | BxSiDisp16(_) => {
            if disp_billed {
                11
            }
            else {
                7
            }
        }
        BpSiDisp8(_) | BpSiDisp16(_) | BxDiDisp8(_) | BxDiDisp16(_) => {
            if disp_billed {
                12
            }
            else {
                8
            }
        }
        RegisterMode => 0,
    };
    base + if has_override { 2 } else { 0 }
}

fn is_mem(op: &OperandType) -> bool {
    matches!(op, OperandType::AddressingMode(..))
}

fn is_imm(op: &OperandType) -> bool {
    matches!(
        op,
        OperandType::Immediate8(_) | OperandType::Immediate16(_) | OperandType::Immediate8s(_)
    )
}

fn is_acc(op: &OperandType) -> bool {
    matches!(
        op,
        OperandType::Register8(crate::cpu_common::Register8::AL) | OperandType::Register16(Register16::AX)
    )
}

fn is_segment_reg(op: &OperandType) -> bool {
    matches!(
        op,
        OperandType::Register16(Register16::ES | Register16::CS | Register16::SS | Register16::DS)
    )
}

/// Estimate the minimum clocks one instruction costs. Pure and total:
/// every instruction kind maps to a value, zero for the unknown-opcode
/// marker. A locked instruction costs a flat 2 extra.
pub fn estimate(i: &Instruction, settings: &ClockSettings) -> u32 {
    use Mnemonic::*;

    // The EA surcharge is computed once, centrally. At most one operand
    // of an 8086 instruction is a memory reference.
    let ea = [&i.operand1, &i.operand2]
        .iter()
        .find_map(|op| op.addressing_mode())
        .map(|mode| address_clocks(mode, i.segment_override.is_some(), settings))
        .unwrap_or(0);
    let mem1 = is_mem(&i.operand1);
    let mem2 = is_mem(&i.operand2);
    let mem = mem1 || mem2;

    let base = match i.mnemonic {
        InvalidOpcode => 0,
        MOV => match (&i.operand1, &i.operand2) {
            (OperandType::Register8(_) | OperandType::Register16(_), OperandType::Offset8(_) | OperandType::Offset16(_)) => 10,
            (OperandType::Offset8(_) | OperandType::Offset16(_), _) => 10,
            (op1, op2) if is_mem(op1) && is_imm(op2) => 10 + ea,
            (op1, _) if is_mem(op1) => 9 + ea,
            (_, op2) if is_mem(op2) => 8 + ea,
            (_, op2) if is_imm(op2) => 4,
            _ => 2,
        },
        ADD | ADC | SUB | SBB | AND | OR | XOR => match (&i.operand1, &i.operand2) {
            (op1, op2) if is_mem(op1) && is_imm(op2) => 17 + ea,
            (op1, _) if is_mem(op1) => 16 + ea,
            (_, op2) if is_mem(op2) => 9 + ea,
            (_, op2) if is_imm(op2) => 4,
            _ => 3,
        },
        CMP => match (&i.operand1, &i.operand2) {
            (op1, op2) if is_mem(op1) && is_imm(op2) => 10 + ea,
            (op1, _) if is_mem(op1) => 9 + ea,
            (_, op2) if is_mem(op2) => 9 + ea,
            (_, op2) if is_imm(op2) => 4,
            _ => 3,
        },
        TEST => match (&i.operand1, &i.operand2) {
            (op1, op2) if is_mem(op1) && is_imm(op2) => 11 + ea,
            (op1, op2) if is_acc(op1) && is_imm(op2) => 4,
            (_, op2) if is_imm(op2) => 5,
            _ if mem => 9 + ea,
            _ => 3,
        },
        INC | DEC => match &i.operand1 {
            OperandType::Register16(_) => 2,
            OperandType::Register8(_) => 3,
            _ => 15 + ea,
        },
        NEG | NOT => {
            if mem1 {
                16 + ea
            }
            else {
                3
            }
        }
        ROL | ROR | RCL | RCR | SHL | SHR | SAR => match (&i.operand2, mem1) {
            // Shift by one vs. by CL; the per-bit CL cost is unknowable
            // at decode time and billed at zero bits
            (OperandType::NoOperand, false) => 2,
            (OperandType::NoOperand, true) => 15 + ea,
            (_, false) => 8,
            (_, true) => 20 + ea,
        },
        MUL => match (i.width, mem1) {
            (InstructionWidth::Byte, false) => 70,
            (InstructionWidth::Word, false) => 118,
            (InstructionWidth::Byte, true) => 76 + ea,
            (InstructionWidth::Word, true) => 124 + ea,
        },
        IMUL => match (i.width, mem1) {
            (InstructionWidth::Byte, false) => 80,
            (InstructionWidth::Word, false) => 128,
            (InstructionWidth::Byte, true) => 86 + ea,
            (InstructionWidth::Word, true) => 134 + ea,
        },
        DIV => match (i.width, mem1) {
            (InstructionWidth::Byte, false) => 80,
            (InstructionWidth::Word, false) => 144,
            (InstructionWidth::Byte, true) => 86 + ea,
            (InstructionWidth::Word, true) => 150 + ea,
        },
        IDIV => match (i.width, mem1) {
            (InstructionWidth::Byte, false) => 101,
            (InstructionWidth::Word, false) => 165,
            (InstructionWidth::Byte, true) => 107 + ea,
            (InstructionWidth::Word, true) => 171 + ea,
        },
        AAA | AAS => 8,
        AAM => 83,
        AAD => 60,
        DAA | DAS => 4,
        CBW => 2,
        CWD => 5,
        PUSH => {
            if mem1 {
                16 + ea
            }
            else if is_segment_reg(&i.operand1) {
                10
            }
            else {
                11
            }
        }
        POP => {
            if mem1 {
                17 + ea
            }
            else {
                8
            }
        }
        PUSHF => 10,
        POPF => 8,
        XCHG => {
            if mem {
                17 + ea
            }
            else if i.opcode & 0xF8 == 0x90 {
                3
            }
            else {
                4
            }
        }
        IN => {
            if is_imm(&i.operand2) {
                10
            }
            else {
                8
            }
        }
        OUT => {
            if is_imm(&i.operand1) {
                10
            }
            else {
                8
            }
        }
        XLAT => 11,
        LEA => 2 + ea,
        LDS | LES => 16 + ea,
        LAHF | SAHF => 4,
        // Conditional transfers billed at the not-taken minimum
        JO | JNO | JB | JNB | JZ | JNZ | JBE | JNBE | JS | JNS | JP | JNP | JL | JNL | JLE | JNLE => 4,
        JCXZ => 6,
        LOOP | LOOPNE => 5,
        LOOPE => 6,
        JMP => match (&i.operand1, mem1) {
            (OperandType::Relative8(_) | OperandType::Relative16(_), _) => 15,
            (_, true) => 18 + ea,
            _ => 11,
        },
        JMPF => {
            if mem1 {
                24 + ea
            }
            else {
                15
            }
        }
        CALL => match (&i.operand1, mem1) {
            (OperandType::Relative16(_), _) => 19,
            (_, true) => 21 + ea,
            _ => 16,
        },
        CALLF => {
            if mem1 {
                37 + ea
            }
            else {
                28
            }
        }
        RETN => {
            if is_imm(&i.operand1) {
                20
            }
            else {
                16
            }
        }
        RETF => {
            if is_imm(&i.operand1) {
                25
            }
            else {
                26
            }
        }
        INT => 51,
        INT3 => 52,
        INTO => 4,
        IRET => 32,
        CLC | CMC | STC | CLD | STD | CLI | STI => 2,
        HLT => 2,
        WAIT => 3,
        ESC => {
            if mem1 {
                8 + ea
            }
            else {
                2
            }
        }
        NOP => 3,
        // String operations; a repeat adds its 9-clock setup and is
        // otherwise billed at a single iteration
        MOVSB | MOVSW => string_clocks(i, 18),
        CMPSB | CMPSW => string_clocks(i, 22),
        SCASB | SCASW => string_clocks(i, 15),
        LODSB | LODSW => string_clocks(i, 12),
        STOSB | STOSW => string_clocks(i, 11),
    };

    base + if i.lock() { 2 } else { 0 }
}

fn string_clocks(i: &Instruction, per_iteration: u32) -> u32 {
    match i.rep() {
        crate::cpu_common::RepType::None => per_iteration,
        _ => 9 + per_iteration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytes::ByteCursor, decoder};

    fn decode_one(bytes: &[u8]) -> Instruction {
        let mut cursor = ByteCursor::new(bytes);
        decoder::decode_next(&mut cursor).expect("decode failed")
    }

    #[test]
    fn register_to_register_mov() {
        let i = decode_one(&[0x89, 0xD8]);
        assert_eq!(estimate(&i, &ClockSettings::default()), 2);
    }

    #[test]
    fn memory_mov_adds_address_clocks() {
        // mov [bp+di], ax: 9 base + 7 EA
        let i = decode_one(&[0x89, 0x03]);
        assert_eq!(estimate(&i, &ClockSettings::default()), 16);
        // mov ax, [bx+si]: 8 base + 7 EA
        let i = decode_one(&[0x8B, 0x00]);
        assert_eq!(estimate(&i, &ClockSettings::default()), 15);
        // direct address: 8 base + 6 EA
        let i = decode_one(&[0x8B, 0x1E, 0x10, 0x00]);
        assert_eq!(estimate(&i, &ClockSettings::default()), 14);
    }

    #[test]
    fn zero_displacement_setting_is_local_to_zero_disp_operands() {
        let default = ClockSettings::default();
        let strict = ClockSettings {
            treat_zero_displacement_as_no_displacement: false,
        };

        // mov ax, [bx+0]: billed as [bx] by default
        let zero_disp = decode_one(&[0x8B, 0x47, 0x00]);
        assert_eq!(estimate(&zero_disp, &default), 8 + 5);
        assert_eq!(estimate(&zero_disp, &strict), 8 + 9);

        // A non-zero displacement is unaffected by the toggle
        let nonzero = decode_one(&[0x8B, 0x47, 0x04]);
        assert_eq!(estimate(&nonzero, &default), estimate(&nonzero, &strict));

        // A register operand is unaffected by the toggle
        let reg = decode_one(&[0x89, 0xD8]);
        assert_eq!(estimate(&reg, &default), estimate(&reg, &strict));
    }

    #[test]
    fn segment_override_and_lock_surcharges() {
        // es: mov ax, [bx]: 8 + 5 + 2
        let i = decode_one(&[0x26, 0x8B, 0x07]);
        assert_eq!(estimate(&i, &ClockSettings::default()), 15);
        // lock add [bx], ax: 16 + 5 + 2
        let i = decode_one(&[0xF0, 0x01, 0x07]);
        assert_eq!(estimate(&i, &ClockSettings::default()), 23);
    }

    #[test]
    fn immediate_forms() {
        // add ax, imm16
        let i = decode_one(&[0x05, 0x01, 0x00]);
        assert_eq!(estimate(&i, &ClockSettings::default()), 4);
        // add [bx], imm8: 17 + 5
        let i = decode_one(&[0x80, 0x07, 0x01]);
        assert_eq!(estimate(&i, &ClockSettings::default()), 22);
        // cmp [bx], imm8: 10 + 5
        let i = decode_one(&[0x80, 0x3F, 0x01]);
        assert_eq!(estimate(&i, &ClockSettings::default()), 15);
    }

    #[test]
    fn estimates_are_total_and_deterministic() {
        let settings = ClockSettings::default();
        // Feed every opcode with generous trailing bytes; every decodable
        // instruction must produce a stable estimate.
        for opcode in 0u16..=255 {
            let bytes = [opcode as u8, 0x07, 0x10, 0x20, 0x30, 0x40];
            let mut cursor = ByteCursor::new(&bytes);
            if let Ok(i) = decoder::decode_next(&mut cursor) {
                let a = estimate(&i, &settings);
                let b = estimate(&i, &settings);
                assert_eq!(a, b, "opcode {:02X}", opcode);
            }
        }
    }

    #[test]
    fn rep_string_setup_cost() {
        let plain = decode_one(&[0xA4]);
        let repeated = decode_one(&[0xF3, 0xA4]);
        assert_eq!(estimate(&plain, &ClockSettings::default()), 18);
        assert_eq!(estimate(&repeated, &ClockSettings::default()), 27);
    }

    #[test]
    fn settings_deserialize_from_toml() {
        let settings: ClockSettings = toml::from_str("treat_zero_displacement_as_no_displacement = false").unwrap();
        assert!(!settings.treat_zero_displacement_as_no_displacement);
        let settings: ClockSettings = toml::from_str("").unwrap();
        assert!(settings.treat_zero_displacement_as_no_displacement);
    }
}
