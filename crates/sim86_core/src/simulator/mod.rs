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

    simulator::mod.rs

    Instruction-level execution. step() computes a diff against a
    read-only view of machine state; apply() commits one. Callers must
    apply each diff before stepping again, since instruction pointer
    advancement only exists inside the diff.

*/

pub mod diff;

pub use diff::{Diff, StateChange};

use fxhash::FxHashMap;

use crate::{
    cpu_common::{
        alu::{AluAdc, AluAdd, AluNeg, AluSbb, AluSub},
        calc_linear_address,
        Instruction,
        InstructionWidth,
        Mnemonic,
        OperandSize,
        OperandType,
        Register16,
        Register8,
        RepType,
        Segment,
        SimError,
    },
    machine::{
        Flag,
        Machine,
        CPU_FLAG_AUX_CARRY,
        CPU_FLAG_CARRY,
        CPU_FLAG_OVERFLOW,
        CPU_FLAG_PARITY,
        CPU_FLAG_SIGN,
        CPU_FLAG_ZERO,
        FLAG_ORDER,
    },
    memory::ADDRESS_SPACE,
};

/// Compute the state changes one instruction produces. The machine is not
/// mutated; commit the result with [apply].
pub fn step(machine: &Machine, i: &Instruction) -> Result<Diff, SimError> {
    use Mnemonic::*;

    let mut diff: Diff = Vec::new();
    let ip = machine.ip();
    let next_ip = ip.wrapping_add(i.size as u16);

    match i.mnemonic {
        MOV => {
            let value = read_operand(machine, i, &i.operand2)?;
            push_ip(&mut diff, ip, next_ip);
            write_operand(machine, i, &i.operand1, value, &mut diff)?;
        }
        ADD | ADC | SUB | SBB | CMP => {
            let dest = read_operand(machine, i, &i.operand1)?;
            let src = read_operand(machine, i, &i.operand2)?;
            let carry_in = machine.get_flag(Flag::Carry);
            let (result, carry, overflow, aux_carry) = match i.width {
                InstructionWidth::Byte => {
                    let (d, s) = (dest as u8, src as u8);
                    let (r, c, o, a) = match i.mnemonic {
                        ADD => d.alu_add(s),
                        ADC => d.alu_adc(s, carry_in),
                        SBB => d.alu_sbb(s, carry_in),
                        _ => d.alu_sub(s),
                    };
                    (r as u16, c, o, a)
                }
                InstructionWidth::Word => match i.mnemonic {
                    ADD => dest.alu_add(src),
                    ADC => dest.alu_adc(src, carry_in),
                    SBB => dest.alu_sbb(src, carry_in),
                    _ => dest.alu_sub(src),
                },
            };

            let mut flags = machine.flags();
            set_flag_bit(&mut flags, CPU_FLAG_CARRY, carry);
            set_flag_bit(&mut flags, CPU_FLAG_OVERFLOW, overflow);
            set_flag_bit(&mut flags, CPU_FLAG_AUX_CARRY, aux_carry);
            set_szp(&mut flags, result, i.width);

            push_ip(&mut diff, ip, next_ip);
            if i.mnemonic != CMP {
                write_operand(machine, i, &i.operand1, result, &mut diff)?;
            }
            push_flag_diffs(&mut diff, machine.flags(), flags);
        }
        AND | OR | XOR | TEST => {
            let dest = read_operand(machine, i, &i.operand1)?;
            let src = read_operand(machine, i, &i.operand2)?;
            let result = match i.mnemonic {
                AND | TEST => dest & src,
                OR => dest | src,
                _ => dest ^ src,
            };

            // Logical operations always clear carry and overflow
            let mut flags = machine.flags();
            set_flag_bit(&mut flags, CPU_FLAG_CARRY, false);
            set_flag_bit(&mut flags, CPU_FLAG_OVERFLOW, false);
            set_szp(&mut flags, result, i.width);

            push_ip(&mut diff, ip, next_ip);
            if i.mnemonic != TEST {
                write_operand(machine, i, &i.operand1, result, &mut diff)?;
            }
            push_flag_diffs(&mut diff, machine.flags(), flags);
        }
        INC | DEC => {
            // Carry is untouched; all other arithmetic flags update
            let dest = read_operand(machine, i, &i.operand1)?;
            let (result, _, overflow, aux_carry) = match (i.width, i.mnemonic) {
                (InstructionWidth::Byte, INC) => {
                    let (r, c, o, a) = (dest as u8).alu_add(1);
                    (r as u16, c, o, a)
                }
                (InstructionWidth::Byte, _) => {
                    let (r, c, o, a) = (dest as u8).alu_sub(1);
                    (r as u16, c, o, a)
                }
                (InstructionWidth::Word, INC) => dest.alu_add(1),
                (InstructionWidth::Word, _) => dest.alu_sub(1),
            };

            let mut flags = machine.flags();
            set_flag_bit(&mut flags, CPU_FLAG_OVERFLOW, overflow);
            set_flag_bit(&mut flags, CPU_FLAG_AUX_CARRY, aux_carry);
            set_szp(&mut flags, result, i.width);

            push_ip(&mut diff, ip, next_ip);
            write_operand(machine, i, &i.operand1, result, &mut diff)?;
            push_flag_diffs(&mut diff, machine.flags(), flags);
        }
        NEG => {
            let dest = read_operand(machine, i, &i.operand1)?;
            let (result, carry, overflow, aux_carry) = match i.width {
                InstructionWidth::Byte => {
                    let (r, c, o, a) = (dest as u8).alu_neg();
                    (r as u16, c, o, a)
                }
                InstructionWidth::Word => dest.alu_neg(),
            };

            let mut flags = machine.flags();
            set_flag_bit(&mut flags, CPU_FLAG_CARRY, carry);
            set_flag_bit(&mut flags, CPU_FLAG_OVERFLOW, overflow);
            set_flag_bit(&mut flags, CPU_FLAG_AUX_CARRY, aux_carry);
            set_szp(&mut flags, result, i.width);

            push_ip(&mut diff, ip, next_ip);
            write_operand(machine, i, &i.operand1, result, &mut diff)?;
            push_flag_diffs(&mut diff, machine.flags(), flags);
        }
        NOT => {
            let dest = read_operand(machine, i, &i.operand1)?;
            let result = match i.width {
                InstructionWidth::Byte => !(dest as u8) as u16,
                InstructionWidth::Word => !dest,
            };
            push_ip(&mut diff, ip, next_ip);
            write_operand(machine, i, &i.operand1, result, &mut diff)?;
        }
        XCHG => {
            let v1 = read_operand(machine, i, &i.operand1)?;
            let v2 = read_operand(machine, i, &i.operand2)?;
            push_ip(&mut diff, ip, next_ip);
            write_operand(machine, i, &i.operand1, v2, &mut diff)?;
            write_operand(machine, i, &i.operand2, v1, &mut diff)?;
        }
        LEA => {
            // Address calculation only; no memory access
            if let OperandType::AddressingMode(mode, _) = &i.operand2 {
                let offset = machine.ea_offset(mode);
                push_ip(&mut diff, ip, next_ip);
                write_operand(machine, i, &i.operand1, offset, &mut diff)?;
            }
        }
        CBW => {
            let result = machine.get_register8(Register8::AL) as i8 as i16 as u16;
            push_ip(&mut diff, ip, next_ip);
            push_register(&mut diff, Register16::AX, machine.get_register16(Register16::AX), result);
        }
        CWD => {
            let ax = machine.get_register16(Register16::AX);
            let result = if ax & 0x8000 != 0 { 0xFFFF } else { 0 };
            push_ip(&mut diff, ip, next_ip);
            push_register(&mut diff, Register16::DX, machine.get_register16(Register16::DX), result);
        }
        LAHF => {
            // SF ZF -- AF -- PF 1 CF, undefined bits as stored
            let value = (machine.flags() as u8 & 0b1101_0101) | 0b0000_0010;
            push_ip(&mut diff, ip, next_ip);
            push_register(
                &mut diff,
                Register16::AX,
                machine.get_register16(Register16::AX),
                machine.merge_register8(Register8::AH, value),
            );
        }
        SAHF => {
            let ah = machine.get_register8(Register8::AH) as u16;
            let keep = machine.flags() & 0xFF00;
            let flags = keep | (ah & (CPU_FLAG_SIGN | CPU_FLAG_ZERO | CPU_FLAG_AUX_CARRY | CPU_FLAG_PARITY | CPU_FLAG_CARRY));
            push_ip(&mut diff, ip, next_ip);
            push_flag_diffs(&mut diff, machine.flags(), flags);
        }
        DAA => daa_das(machine, i, &mut diff, ip, next_ip, true),
        DAS => daa_das(machine, i, &mut diff, ip, next_ip, false),
        CLC | CMC | STC | CLD | STD | CLI | STI => {
            let mut flags = machine.flags();
            match i.mnemonic {
                CLC => set_flag_bit(&mut flags, CPU_FLAG_CARRY, false),
                STC => set_flag_bit(&mut flags, CPU_FLAG_CARRY, true),
                CMC => flags ^= CPU_FLAG_CARRY,
                CLD => set_flag_bit(&mut flags, Flag::Direction.mask(), false),
                STD => set_flag_bit(&mut flags, Flag::Direction.mask(), true),
                CLI => set_flag_bit(&mut flags, Flag::Interrupt.mask(), false),
                _ => set_flag_bit(&mut flags, Flag::Interrupt.mask(), true),
            }
            push_ip(&mut diff, ip, next_ip);
            push_flag_diffs(&mut diff, machine.flags(), flags);
        }
        JO | JNO | JB | JNB | JZ | JNZ | JBE | JNBE | JS | JNS | JP | JNP | JL | JNL | JLE | JNLE | JCXZ => {
            let taken = condition(machine, i.mnemonic);
            branch(&mut diff, i, ip, next_ip, taken);
        }
        JMP => match &i.operand1 {
            OperandType::Relative8(_) | OperandType::Relative16(_) => {
                branch(&mut diff, i, ip, next_ip, true);
            }
            // Indirect jump targets need a stack/far-pointer model; no-op
            _ => {}
        },
        LOOP | LOOPE | LOOPNE => {
            let cx = machine.get_register16(Register16::CX);
            let new_cx = cx.wrapping_sub(1);
            let zero = machine.get_flag(Flag::Zero);
            let taken = match i.mnemonic {
                LOOPE => new_cx != 0 && zero,
                LOOPNE => new_cx != 0 && !zero,
                _ => new_cx != 0,
            };
            // CX decrements regardless of the branch outcome
            branch(&mut diff, i, ip, next_ip, taken);
            push_register(&mut diff, Register16::CX, cx, new_cx);
        }
        MOVSB | MOVSW | CMPSB | CMPSW | SCASB | SCASW | LODSB | LODSW | STOSB | STOSW => {
            exec_string(machine, i, &mut diff, ip, next_ip)?;
        }
        NOP => {
            push_ip(&mut diff, ip, next_ip);
        }
        // Unsimulated kinds: deliberate no-op fallback, distinct from an
        // error. The diff stays empty and the instruction pointer holds.
        InvalidOpcode | AAA | AAD | AAM | AAS | CALL | CALLF | DIV | ESC | HLT | IDIV | IMUL | IN | INT | INT3
        | INTO | IRET | JMPF | LDS | LES | MUL | OUT | POP | POPF | PUSH | PUSHF | RCL | RCR | RETF | RETN | ROL
        | ROR | SAR | SHL | SHR | WAIT | XLAT => {
            log::debug!("no-op fallback for unsimulated instruction {}", i.mnemonic);
        }
    }
    Ok(diff)
}

/// Commit a diff to machine state. The only mutation path.
pub fn apply(machine: &mut Machine, diff: &Diff) -> Result<(), SimError> {
    for change in diff {
        match change {
            StateChange::Register { reg, to, .. } => machine.set_register16(*reg, *to),
            StateChange::Flag { flag, to, .. } => machine.set_flag(*flag, *to),
            StateChange::Mem { address, to, .. } => machine.memory_mut().write_u8(*address, *to)?,
        }
    }
    Ok(())
}

/* --------------------------- operand access ---------------------------- */

fn read_operand(machine: &Machine, i: &Instruction, op: &OperandType) -> Result<u16, SimError> {
    Ok(match op {
        OperandType::Register8(reg) => machine.get_register8(*reg) as u16,
        OperandType::Register16(reg) => machine.get_register16(*reg),
        OperandType::Immediate8(v) => *v as u16,
        OperandType::Immediate16(v) => *v,
        // Sign-extended immediate widens to the full operand width
        OperandType::Immediate8s(v) => *v as i16 as u16,
        OperandType::Relative8(v) => *v as i16 as u16,
        OperandType::Relative16(v) => *v as u16,
        OperandType::AddressingMode(mode, size) => {
            let address = machine.ea_linear(mode, i.segment_override);
            match size {
                OperandSize::Operand8 => machine.memory().read_u8(address)? as u16,
                _ => machine.memory().read_u16(address)?,
            }
        }
        OperandType::Offset8(offset) => {
            machine.memory().read_u8(machine.offset_linear(*offset, i.segment_override))? as u16
        }
        OperandType::Offset16(offset) => {
            machine.memory().read_u16(machine.offset_linear(*offset, i.segment_override))?
        }
        OperandType::FarAddress(_, offset) => *offset,
        OperandType::NoOperand => 0,
    })
}

fn write_operand(
    machine: &Machine,
    i: &Instruction,
    op: &OperandType,
    value: u16,
    diff: &mut Diff,
) -> Result<(), SimError> {
    match op {
        OperandType::Register8(reg) => {
            let parent = Machine::parent_register16(*reg);
            push_register(
                diff,
                parent,
                machine.get_register16(parent),
                machine.merge_register8(*reg, value as u8),
            );
        }
        OperandType::Register16(reg) => {
            push_register(diff, *reg, machine.get_register16(*reg), value);
        }
        OperandType::AddressingMode(mode, size) => {
            let address = machine.ea_linear(mode, i.segment_override);
            match size {
                OperandSize::Operand8 => push_mem(diff, machine, address, value as u8)?,
                _ => {
                    push_mem(diff, machine, address, value as u8)?;
                    push_mem(diff, machine, (address + 1) % ADDRESS_SPACE, (value >> 8) as u8)?;
                }
            }
        }
        OperandType::Offset8(offset) => {
            let address = machine.offset_linear(*offset, i.segment_override);
            push_mem(diff, machine, address, value as u8)?;
        }
        OperandType::Offset16(offset) => {
            let address = machine.offset_linear(*offset, i.segment_override);
            push_mem(diff, machine, address, value as u8)?;
            push_mem(diff, machine, (address + 1) % ADDRESS_SPACE, (value >> 8) as u8)?;
        }
        _ => {}
    }
    Ok(())
}

/* ----------------------------- diff helpers ---------------------------- */

fn push_ip(diff: &mut Diff, from: u16, to: u16) {
    push_register(diff, Register16::IP, from, to);
}

fn push_register(diff: &mut Diff, reg: Register16, from: u16, to: u16) {
    if from != to {
        diff.push(StateChange::Register { reg, from, to });
    }
}

fn push_mem(diff: &mut Diff, machine: &Machine, address: u32, to: u8) -> Result<(), SimError> {
    let from = machine.memory().read_u8(address)?;
    if from != to {
        diff.push(StateChange::Mem { address, from, to });
    }
    Ok(())
}

fn push_flag_diffs(diff: &mut Diff, old: u16, new: u16) {
    for flag in FLAG_ORDER {
        let mask = flag.mask();
        if (old ^ new) & mask != 0 {
            diff.push(StateChange::Flag {
                flag,
                from: old & mask != 0,
                to: new & mask != 0,
            });
        }
    }
}

/* ----------------------------- flag helpers ---------------------------- */

#[inline(always)]
fn set_flag_bit(flags: &mut u16, mask: u16, state: bool) {
    if state {
        *flags |= mask;
    }
    else {
        *flags &= !mask;
    }
}

/// Even parity of the low 8 bits, computed by folding rather than a
/// population count.
#[inline(always)]
fn parity8(value: u8) -> bool {
    let mut p = value;
    p ^= p >> 4;
    p ^= p >> 2;
    p ^= p >> 1;
    p & 1 == 0
}

fn set_szp(flags: &mut u16, result: u16, width: InstructionWidth) {
    set_flag_bit(flags, CPU_FLAG_SIGN, result & width.sign_mask() != 0);
    set_flag_bit(flags, CPU_FLAG_ZERO, result == 0);
    set_flag_bit(flags, CPU_FLAG_PARITY, parity8(result as u8));
}

/* --------------------------- control transfer -------------------------- */

fn condition(machine: &Machine, mnemonic: Mnemonic) -> bool {
    use Mnemonic::*;
    let cf = machine.get_flag(Flag::Carry);
    let zf = machine.get_flag(Flag::Zero);
    let sf = machine.get_flag(Flag::Sign);
    let of = machine.get_flag(Flag::Overflow);
    let pf = machine.get_flag(Flag::Parity);
    match mnemonic {
        JO => of,
        JNO => !of,
        JB => cf,
        JNB => !cf,
        JZ => zf,
        JNZ => !zf,
        JBE => cf || zf,
        JNBE => !(cf || zf),
        JS => sf,
        JNS => !sf,
        JP => pf,
        JNP => !pf,
        JL => sf != of,
        JNL => sf == of,
        JLE => zf || sf != of,
        JNLE => !zf && sf == of,
        JCXZ => machine.get_register16(Register16::CX) == 0,
        _ => false,
    }
}

/// A taken branch targets ip + size + rel; otherwise the instruction falls
/// through. Exactly one instruction pointer entry is produced either way.
fn branch(diff: &mut Diff, i: &Instruction, ip: u16, next_ip: u16, taken: bool) {
    let rel = match &i.operand1 {
        OperandType::Relative8(rel) => *rel as i16,
        OperandType::Relative16(rel) => *rel,
        _ => 0,
    };
    if taken {
        push_ip(diff, ip, next_ip.wrapping_add(rel as u16));
    }
    else {
        push_ip(diff, ip, next_ip);
    }
}

/* ---------------------------- decimal adjust --------------------------- */

/// Shared DAA/DAS body. The low-nibble test must be a bitwise mask; a
/// logical-and there would adjust any nonzero accumulator.
fn daa_das(machine: &Machine, _i: &Instruction, diff: &mut Diff, ip: u16, next_ip: u16, adding: bool) {
    let al = machine.get_register8(Register8::AL);
    let mut result = al;
    let mut carry = machine.get_flag(Flag::Carry);
    let mut aux = machine.get_flag(Flag::AuxCarry);

    if (al & 0x0F) > 9 || aux {
        result = if adding {
            result.wrapping_add(6)
        }
        else {
            result.wrapping_sub(6)
        };
        aux = true;
    }
    if al > 0x99 || carry {
        result = if adding {
            result.wrapping_add(0x60)
        }
        else {
            result.wrapping_sub(0x60)
        };
        carry = true;
    }
    else {
        carry = false;
    }

    let mut flags = machine.flags();
    set_flag_bit(&mut flags, CPU_FLAG_CARRY, carry);
    set_flag_bit(&mut flags, CPU_FLAG_AUX_CARRY, aux);
    set_szp(&mut flags, result as u16, InstructionWidth::Byte);

    push_ip(diff, ip, next_ip);
    push_register(
        diff,
        Register16::AX,
        machine.get_register16(Register16::AX),
        machine.merge_register8(Register8::AL, result),
    );
    push_flag_diffs(diff, machine.flags(), flags);
}

/* ---------------------------- string family ---------------------------- */

/// Execute a string instruction, including any repeat, in one diff.
/// Reads observe earlier writes from the same diff through an overlay so
/// overlapping rep movs behaves like sequential hardware iterations.
fn exec_string(machine: &Machine, i: &Instruction, diff: &mut Diff, ip: u16, next_ip: u16) -> Result<(), SimError> {
    use Mnemonic::*;

    let elem: u16 = match i.width {
        InstructionWidth::Byte => 1,
        InstructionWidth::Word => 2,
    };
    let delta: u16 = if machine.get_flag(Flag::Direction) {
        elem.wrapping_neg()
    }
    else {
        elem
    };

    let src_segment = machine.segment_value(i.segment_override.unwrap_or(Segment::DS));
    let dst_segment = machine.segment_value(Segment::ES);

    let mut si = machine.get_register16(Register16::SI);
    let mut di = machine.get_register16(Register16::DI);
    let mut cx = machine.get_register16(Register16::CX);
    let mut ax = machine.get_register16(Register16::AX);
    let mut flags = machine.flags();
    let mut overlay: FxHashMap<u32, u8> = FxHashMap::default();

    push_ip(diff, ip, next_ip);

    let rep = i.rep();
    let mut remaining = match rep {
        RepType::None => 1u32,
        // A repeat with CX == 0 performs no iterations at all
        _ => cx as u32,
    };

    while remaining > 0 {
        remaining -= 1;
        if rep != RepType::None {
            cx = cx.wrapping_sub(1);
        }

        match i.mnemonic {
            MOVSB | MOVSW => {
                let value = read_through(machine, &overlay, calc_linear_address(src_segment, si), i.width)?;
                write_through(
                    machine,
                    &mut overlay,
                    diff,
                    calc_linear_address(dst_segment, di),
                    value,
                    i.width,
                )?;
                si = si.wrapping_add(delta);
                di = di.wrapping_add(delta);
            }
            STOSB | STOSW => {
                write_through(machine, &mut overlay, diff, calc_linear_address(dst_segment, di), ax, i.width)?;
                di = di.wrapping_add(delta);
            }
            LODSB | LODSW => {
                let value = read_through(machine, &overlay, calc_linear_address(src_segment, si), i.width)?;
                ax = match i.width {
                    InstructionWidth::Byte => (ax & 0xFF00) | value,
                    InstructionWidth::Word => value,
                };
                si = si.wrapping_add(delta);
            }
            CMPSB | CMPSW => {
                let src = read_through(machine, &overlay, calc_linear_address(src_segment, si), i.width)?;
                let dst = read_through(machine, &overlay, calc_linear_address(dst_segment, di), i.width)?;
                compare_flags(&mut flags, src, dst, i.width);
                si = si.wrapping_add(delta);
                di = di.wrapping_add(delta);
            }
            SCASB | SCASW => {
                let acc = match i.width {
                    InstructionWidth::Byte => ax & 0x00FF,
                    InstructionWidth::Word => ax,
                };
                let dst = read_through(machine, &overlay, calc_linear_address(dst_segment, di), i.width)?;
                compare_flags(&mut flags, acc, dst, i.width);
                di = di.wrapping_add(delta);
            }
            _ => {}
        }

        // Repeated compares terminate early on the zero flag
        if matches!(i.mnemonic, CMPSB | CMPSW | SCASB | SCASW) {
            let zero = flags & CPU_FLAG_ZERO != 0;
            match rep {
                RepType::Rep if !zero => break,
                RepType::Repne if zero => break,
                _ => {}
            }
        }
    }

    push_register(diff, Register16::SI, machine.get_register16(Register16::SI), si);
    push_register(diff, Register16::DI, machine.get_register16(Register16::DI), di);
    push_register(diff, Register16::CX, machine.get_register16(Register16::CX), cx);
    push_register(diff, Register16::AX, machine.get_register16(Register16::AX), ax);
    push_flag_diffs(diff, machine.flags(), flags);
    Ok(())
}

fn compare_flags(flags: &mut u16, src: u16, dst: u16, width: InstructionWidth) {
    let (result, carry, overflow, aux_carry) = match width {
        InstructionWidth::Byte => {
            let (r, c, o, a) = (src as u8).alu_sub(dst as u8);
            (r as u16, c, o, a)
        }
        InstructionWidth::Word => src.alu_sub(dst),
    };
    set_flag_bit(flags, CPU_FLAG_CARRY, carry);
    set_flag_bit(flags, CPU_FLAG_OVERFLOW, overflow);
    set_flag_bit(flags, CPU_FLAG_AUX_CARRY, aux_carry);
    set_szp(flags, result, width);
}

fn read_through(
    machine: &Machine,
    overlay: &FxHashMap<u32, u8>,
    address: u32,
    width: InstructionWidth,
) -> Result<u16, SimError> {
    let byte_at = |addr: u32| -> Result<u8, SimError> {
        match overlay.get(&addr) {
            Some(b) => Ok(*b),
            None => Ok(machine.memory().read_u8(addr)?),
        }
    };
    Ok(match width {
        InstructionWidth::Byte => byte_at(address)? as u16,
        InstructionWidth::Word => {
            let lo = byte_at(address)? as u16;
            let hi = byte_at((address + 1) % ADDRESS_SPACE)? as u16;
            hi << 8 | lo
        }
    })
}

fn write_through(
    machine: &Machine,
    overlay: &mut FxHashMap<u32, u8>,
    diff: &mut Diff,
    address: u32,
    value: u16,
    width: InstructionWidth,
) -> Result<(), SimError> {
    let mut one = |overlay: &mut FxHashMap<u32, u8>, diff: &mut Diff, addr: u32, to: u8| -> Result<(), SimError> {
        let from = match overlay.get(&addr) {
            Some(b) => *b,
            None => machine.memory().read_u8(addr)?,
        };
        if from != to {
            diff.push(StateChange::Mem { address: addr, from, to });
        }
        overlay.insert(addr, to);
        Ok(())
    };
    match width {
        InstructionWidth::Byte => one(overlay, diff, address, value as u8)?,
        InstructionWidth::Word => {
            one(overlay, diff, address, value as u8)?;
            one(overlay, diff, (address + 1) % ADDRESS_SPACE, (value >> 8) as u8)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytes::ByteCursor,
        decoder,
        machine::MachineRegs,
    };

    fn decode_one(bytes: &[u8]) -> Instruction {
        let mut cursor = ByteCursor::new(bytes);
        decoder::decode_next(&mut cursor).expect("decode failed")
    }

    fn step_one(machine: &Machine, bytes: &[u8]) -> Diff {
        step(machine, &decode_one(bytes)).expect("step failed")
    }

    #[test]
    fn mov_immediate_to_register() {
        let machine = Machine::default();
        let diff = step_one(&machine, &[0xB8, 0x05, 0x00]);
        assert_eq!(
            diff,
            vec![
                StateChange::Register { reg: Register16::IP, from: 0, to: 3 },
                StateChange::Register { reg: Register16::AX, from: 0, to: 5 },
            ]
        );
    }

    #[test]
    fn add_accumulator_immediate_wraps() {
        // add ax, -1 with ax = 0: wraps to 0xFFFF without carry
        let machine = Machine::default();
        let diff = step_one(&machine, &[0x05, 0xFF, 0xFF]);
        assert_eq!(
            diff,
            vec![
                StateChange::Register { reg: Register16::IP, from: 0, to: 3 },
                StateChange::Register { reg: Register16::AX, from: 0, to: 0xFFFF },
                StateChange::Flag { flag: Flag::Parity, from: false, to: true },
                StateChange::Flag { flag: Flag::Sign, from: false, to: true },
            ]
        );
    }

    #[test]
    fn add_sets_carry_and_zero_at_modulus() {
        let mut machine = Machine::default();
        machine.set_register16(Register16::AX, 1);
        let diff = step_one(&machine, &[0x05, 0xFF, 0xFF]); // add ax, 0xFFFF
        assert!(diff.contains(&StateChange::Register { reg: Register16::AX, from: 1, to: 0 }));
        assert!(diff.contains(&StateChange::Flag { flag: Flag::Carry, from: false, to: true }));
        assert!(diff.contains(&StateChange::Flag { flag: Flag::Zero, from: false, to: true }));
        assert!(diff.contains(&StateChange::Flag { flag: Flag::AuxCarry, from: false, to: true }));
    }

    #[test]
    fn taken_backward_jump_emits_single_ip_entry() {
        let machine = Machine::new(MachineRegs { ip: 10, ..Default::default() });
        // jnz -4, zero flag clear: target is ip + size + displacement
        let diff = step_one(&machine, &[0x75, 0xFC]);
        assert_eq!(diff, vec![StateChange::Register { reg: Register16::IP, from: 10, to: 8 }]);
    }

    #[test]
    fn not_taken_jump_falls_through() {
        let mut machine = Machine::new(MachineRegs { ip: 10, ..Default::default() });
        machine.set_flag(Flag::Zero, true);
        let diff = step_one(&machine, &[0x75, 0xFC]);
        assert_eq!(diff, vec![StateChange::Register { reg: Register16::IP, from: 10, to: 12 }]);
    }

    #[test]
    fn word_memory_write_is_two_byte_entries() {
        let mut machine = Machine::default();
        machine.set_register16(Register16::AX, 0x1234);
        machine.set_register16(Register16::BX, 0x10);
        // mov [bx], ax
        let diff = step_one(&machine, &[0x89, 0x07]);
        assert_eq!(
            diff,
            vec![
                StateChange::Register { reg: Register16::IP, from: 0, to: 2 },
                StateChange::Mem { address: 0x10, from: 0, to: 0x34 },
                StateChange::Mem { address: 0x11, from: 0, to: 0x12 },
            ]
        );
    }

    #[test]
    fn segment_override_changes_resolved_address() {
        let mut machine = Machine::default();
        machine.set_register16(Register16::AX, 0x00FF);
        machine.set_register16(Register16::BX, 0x10);
        machine.set_register16(Register16::ES, 0x0100);
        // es: mov [bx], al
        let diff = step_one(&machine, &[0x26, 0x88, 0x07]);
        assert!(diff.contains(&StateChange::Mem { address: 0x1010, from: 0, to: 0xFF }));
    }

    #[test]
    fn cmp_emits_flags_only() {
        let mut machine = Machine::default();
        machine.set_register16(Register16::AX, 1);
        machine.set_register16(Register16::BX, 2);
        // cmp ax, bx: borrow
        let diff = step_one(&machine, &[0x39, 0xD8]);
        assert!(diff
            .iter()
            .all(|c| !matches!(c, StateChange::Register { reg: Register16::AX, .. })));
        assert!(diff.contains(&StateChange::Flag { flag: Flag::Carry, from: false, to: true }));
        assert!(diff.contains(&StateChange::Flag { flag: Flag::Sign, from: false, to: true }));
    }

    #[test]
    fn byte_half_write_surfaces_as_parent_register() {
        let mut machine = Machine::default();
        machine.set_register16(Register16::AX, 0x1234);
        // mov ah, 0xFF
        let diff = step_one(&machine, &[0xB4, 0xFF]);
        assert!(diff.contains(&StateChange::Register {
            reg: Register16::AX,
            from: 0x1234,
            to: 0xFF34
        }));
    }

    #[test]
    fn loop_always_decrements_cx() {
        // Not taken once CX reaches zero, but the decrement still lands
        let mut machine = Machine::new(MachineRegs { ip: 10, ..Default::default() });
        machine.set_register16(Register16::CX, 1);
        let diff = step_one(&machine, &[0xE2, 0xFC]); // loop -4
        assert_eq!(
            diff,
            vec![
                StateChange::Register { reg: Register16::IP, from: 10, to: 12 },
                StateChange::Register { reg: Register16::CX, from: 1, to: 0 },
            ]
        );

        machine.set_register16(Register16::CX, 5);
        let diff = step_one(&machine, &[0xE2, 0xFC]);
        assert_eq!(
            diff,
            vec![
                StateChange::Register { reg: Register16::IP, from: 10, to: 8 },
                StateChange::Register { reg: Register16::CX, from: 5, to: 4 },
            ]
        );
    }

    #[test]
    fn jcxz_branches_on_empty_count() {
        let machine = Machine::default();
        let diff = step_one(&machine, &[0xE3, 0x10]);
        assert_eq!(diff, vec![StateChange::Register { reg: Register16::IP, from: 0, to: 0x12 }]);
    }

    #[test]
    fn rep_stosb_fills_and_exhausts_cx() {
        let mut machine = Machine::new(MachineRegs {
            ax: 0x00AB,
            cx: 3,
            di: 0x10,
            ..Default::default()
        });
        let diff = step_one(&machine, &[0xF3, 0xAA]); // rep stosb
        assert_eq!(
            diff,
            vec![
                StateChange::Register { reg: Register16::IP, from: 0, to: 2 },
                StateChange::Mem { address: 0x10, from: 0, to: 0xAB },
                StateChange::Mem { address: 0x11, from: 0, to: 0xAB },
                StateChange::Mem { address: 0x12, from: 0, to: 0xAB },
                StateChange::Register { reg: Register16::DI, from: 0x10, to: 0x13 },
                StateChange::Register { reg: Register16::CX, from: 3, to: 0 },
            ]
        );
        apply(&mut machine, &diff).unwrap();
        assert_eq!(machine.memory().read_u8(0x11), Ok(0xAB));
        assert_eq!(machine.get_register16(Register16::CX), 0);
    }

    #[test]
    fn rep_with_zero_count_is_inert() {
        let machine = Machine::default();
        let diff = step_one(&machine, &[0xF3, 0xAA]);
        assert_eq!(diff, vec![StateChange::Register { reg: Register16::IP, from: 0, to: 2 }]);
    }

    #[test]
    fn direction_flag_walks_backward() {
        let mut machine = Machine::new(MachineRegs {
            ax: 0x0042,
            cx: 2,
            di: 0x10,
            ..Default::default()
        });
        machine.set_flag(Flag::Direction, true);
        let diff = step_one(&machine, &[0xF3, 0xAA]);
        assert!(diff.contains(&StateChange::Mem { address: 0x10, from: 0, to: 0x42 }));
        assert!(diff.contains(&StateChange::Mem { address: 0x0F, from: 0, to: 0x42 }));
        assert!(diff.contains(&StateChange::Register { reg: Register16::DI, from: 0x10, to: 0x0E }));
    }

    #[test]
    fn overlapping_rep_movsb_reads_its_own_writes() {
        let mut machine = Machine::new(MachineRegs {
            cx: 2,
            si: 0x20,
            di: 0x21,
            ..Default::default()
        });
        machine.memory_mut().write_u8(0x20, 0xAA).unwrap();
        let diff = step_one(&machine, &[0xF3, 0xA4]); // rep movsb
        // The second iteration reads the byte the first one stored
        assert!(diff.contains(&StateChange::Mem { address: 0x21, from: 0, to: 0xAA }));
        assert!(diff.contains(&StateChange::Mem { address: 0x22, from: 0, to: 0xAA }));
    }

    #[test]
    fn repne_scasb_stops_on_match() {
        let mut machine = Machine::new(MachineRegs {
            ax: 0x0042,
            cx: 10,
            di: 0x00,
            ..Default::default()
        });
        machine.memory_mut().write_u8(0x03, 0x42).unwrap();
        let diff = step_one(&machine, &[0xF2, 0xAE]); // repne scasb
        apply(&mut machine, &diff).unwrap();
        // Four iterations: three mismatches, then the hit terminates
        assert_eq!(machine.get_register16(Register16::DI), 4);
        assert_eq!(machine.get_register16(Register16::CX), 6);
        assert!(machine.get_flag(Flag::Zero));
    }

    #[test]
    fn lods_loads_accumulator_once() {
        let mut machine = Machine::new(MachineRegs { si: 0x30, ..Default::default() });
        machine.memory_mut().write_u8(0x30, 0x7E).unwrap();
        let diff = step_one(&machine, &[0xAC]); // lodsb
        assert!(diff.contains(&StateChange::Register { reg: Register16::AX, from: 0, to: 0x7E }));
        assert!(diff.contains(&StateChange::Register { reg: Register16::SI, from: 0x30, to: 0x31 }));
    }

    #[test]
    fn xchg_swaps_both_operands() {
        let mut machine = Machine::default();
        machine.set_register16(Register16::AX, 1);
        machine.set_register16(Register16::BX, 2);
        let diff = step_one(&machine, &[0x87, 0xD8]); // xchg bx, ax
        assert!(diff.contains(&StateChange::Register { reg: Register16::BX, from: 2, to: 1 }));
        assert!(diff.contains(&StateChange::Register { reg: Register16::AX, from: 1, to: 2 }));
    }

    #[test]
    fn daa_low_nibble_check_is_bitwise() {
        // al = 0x21: low nibble 1, no adjustment. A logical-and low-nibble
        // test would wrongly adjust any nonzero accumulator.
        let machine = Machine::new(MachineRegs { ax: 0x0021, ..Default::default() });
        let diff = step_one(&machine, &[0x27]);
        assert!(diff
            .iter()
            .all(|c| !matches!(c, StateChange::Register { reg: Register16::AX, .. })));

        // al = 0x9B: both adjustments fire, carry out
        let machine = Machine::new(MachineRegs { ax: 0x009B, ..Default::default() });
        let diff = step_one(&machine, &[0x27]);
        assert!(diff.contains(&StateChange::Register { reg: Register16::AX, from: 0x9B, to: 0x01 }));
        assert!(diff.contains(&StateChange::Flag { flag: Flag::Carry, from: false, to: true }));
        assert!(diff.contains(&StateChange::Flag { flag: Flag::AuxCarry, from: false, to: true }));
    }

    #[test]
    fn unsimulated_kinds_produce_empty_diffs() {
        let machine = Machine::default();
        assert!(step_one(&machine, &[0xF4]).is_empty()); // hlt
        assert!(step_one(&machine, &[0xF6, 0xE3]).is_empty()); // mul bl
        assert!(step_one(&machine, &[0x50]).is_empty()); // push ax
        assert!(step_one(&machine, &[0x0F]).is_empty()); // unassigned marker
    }

    #[test]
    fn fetch_decode_execute_loop_runs_to_halt() {
        // mov cx, 3 / mov ax, 0 / add ax, cx / loop back to the add
        let program: &[u8] = &[
            0xB9, 0x03, 0x00, // 0: mov cx, 3
            0xB8, 0x00, 0x00, // 3: mov ax, 0
            0x01, 0xC8, //       6: add ax, cx
            0xE2, 0xFC, //       8: loop 6
        ];
        let map = decoder::decode_stream(program).unwrap();
        let mut machine = Machine::default();

        let mut iterations = 0;
        while let Some(i) = map.get(&(machine.ip() as u32)) {
            let diff = step(&machine, i).unwrap();
            apply(&mut machine, &diff).unwrap();
            iterations += 1;
            assert!(iterations < 100, "driver runaway");
        }

        assert_eq!(machine.get_register16(Register16::AX), 3 + 2 + 1);
        assert_eq!(machine.get_register16(Register16::CX), 0);
        assert_eq!(machine.ip(), program.len() as u16);
    }
}
