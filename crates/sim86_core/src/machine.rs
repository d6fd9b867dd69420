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

    machine.rs

    Modeled machine state: general and segment registers, flags,
    instruction pointer and the owned memory store. Mutated only by
    applying simulator diffs.

*/

use std::fmt;

use crate::{
    cpu_common::{calc_linear_address, AddressingMode, Register16, Register8, Segment},
    memory::Memory,
};

pub const CPU_FLAG_CARRY: u16 = 0b0000_0000_0000_0001;
pub const CPU_FLAG_PARITY: u16 = 0b0000_0000_0000_0100;
pub const CPU_FLAG_AUX_CARRY: u16 = 0b0000_0000_0001_0000;
pub const CPU_FLAG_ZERO: u16 = 0b0000_0000_0100_0000;
pub const CPU_FLAG_SIGN: u16 = 0b0000_0000_1000_0000;
pub const CPU_FLAG_TRAP: u16 = 0b0000_0001_0000_0000;
pub const CPU_FLAG_INT_ENABLE: u16 = 0b0000_0010_0000_0000;
pub const CPU_FLAG_DIRECTION: u16 = 0b0000_0100_0000_0000;
pub const CPU_FLAG_OVERFLOW: u16 = 0b0000_1000_0000_0000;

/// The nine modeled flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Flag {
    Carry,
    Parity,
    AuxCarry,
    Zero,
    Sign,
    Trap,
    Interrupt,
    Direction,
    Overflow,
}

/// Canonical ordering used when a flag computation emits several diff
/// entries at once.
pub const FLAG_ORDER: [Flag; 9] = [
    Flag::Carry,
    Flag::Parity,
    Flag::AuxCarry,
    Flag::Zero,
    Flag::Sign,
    Flag::Trap,
    Flag::Interrupt,
    Flag::Direction,
    Flag::Overflow,
];

impl Flag {
    pub const fn mask(&self) -> u16 {
        match self {
            Flag::Carry => CPU_FLAG_CARRY,
            Flag::Parity => CPU_FLAG_PARITY,
            Flag::AuxCarry => CPU_FLAG_AUX_CARRY,
            Flag::Zero => CPU_FLAG_ZERO,
            Flag::Sign => CPU_FLAG_SIGN,
            Flag::Trap => CPU_FLAG_TRAP,
            Flag::Interrupt => CPU_FLAG_INT_ENABLE,
            Flag::Direction => CPU_FLAG_DIRECTION,
            Flag::Overflow => CPU_FLAG_OVERFLOW,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Flag::Carry => "CF",
            Flag::Parity => "PF",
            Flag::AuxCarry => "AF",
            Flag::Zero => "ZF",
            Flag::Sign => "SF",
            Flag::Trap => "TF",
            Flag::Interrupt => "IF",
            Flag::Direction => "DF",
            Flag::Overflow => "OF",
        };
        write!(f, "{}", s)
    }
}

/// Caller-supplied initial register state.
#[derive(Copy, Clone, Debug, Default)]
pub struct MachineRegs {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    pub sp: u16,
    pub bp: u16,
    pub si: u16,
    pub di: u16,
    pub es: u16,
    pub cs: u16,
    pub ss: u16,
    pub ds: u16,
    pub ip: u16,
    pub flags: u16,
}

pub struct Machine {
    ax: u16,
    bx: u16,
    cx: u16,
    dx: u16,
    sp: u16,
    bp: u16,
    si: u16,
    di: u16,
    es: u16,
    cs: u16,
    ss: u16,
    ds: u16,
    ip: u16,
    flags: u16,
    memory: Memory,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineRegs::default())
    }
}

impl Machine {
    pub fn new(regs: MachineRegs) -> Self {
        Self {
            ax: regs.ax,
            bx: regs.bx,
            cx: regs.cx,
            dx: regs.dx,
            sp: regs.sp,
            bp: regs.bp,
            si: regs.si,
            di: regs.di,
            es: regs.es,
            cs: regs.cs,
            ss: regs.ss,
            ds: regs.ds,
            ip: regs.ip,
            flags: regs.flags,
            memory: Memory::new(),
        }
    }

    pub fn get_register16(&self, reg: Register16) -> u16 {
        match reg {
            Register16::AX => self.ax,
            Register16::CX => self.cx,
            Register16::DX => self.dx,
            Register16::BX => self.bx,
            Register16::SP => self.sp,
            Register16::BP => self.bp,
            Register16::SI => self.si,
            Register16::DI => self.di,
            Register16::ES => self.es,
            Register16::CS => self.cs,
            Register16::SS => self.ss,
            Register16::DS => self.ds,
            Register16::IP => self.ip,
        }
    }

    pub fn set_register16(&mut self, reg: Register16, value: u16) {
        match reg {
            Register16::AX => self.ax = value,
            Register16::CX => self.cx = value,
            Register16::DX => self.dx = value,
            Register16::BX => self.bx = value,
            Register16::SP => self.sp = value,
            Register16::BP => self.bp = value,
            Register16::SI => self.si = value,
            Register16::DI => self.di = value,
            Register16::ES => self.es = value,
            Register16::CS => self.cs = value,
            Register16::SS => self.ss = value,
            Register16::DS => self.ds = value,
            Register16::IP => self.ip = value,
        }
    }

    pub fn get_register8(&self, reg: Register8) -> u8 {
        match reg {
            Register8::AL => self.ax as u8,
            Register8::CL => self.cx as u8,
            Register8::DL => self.dx as u8,
            Register8::BL => self.bx as u8,
            Register8::AH => (self.ax >> 8) as u8,
            Register8::CH => (self.cx >> 8) as u8,
            Register8::DH => (self.dx >> 8) as u8,
            Register8::BH => (self.bx >> 8) as u8,
        }
    }

    /// The 16-bit register an 8-bit half lives in, with the half's new
    /// value merged. Byte writes surface in diffs as full-register changes.
    pub fn parent_register16(reg: Register8) -> Register16 {
        match reg {
            Register8::AL | Register8::AH => Register16::AX,
            Register8::CL | Register8::CH => Register16::CX,
            Register8::DL | Register8::DH => Register16::DX,
            Register8::BL | Register8::BH => Register16::BX,
        }
    }

    pub fn merge_register8(&self, reg: Register8, value: u8) -> u16 {
        let parent = self.get_register16(Self::parent_register16(reg));
        match reg {
            Register8::AL | Register8::CL | Register8::DL | Register8::BL => (parent & 0xFF00) | value as u16,
            _ => (parent & 0x00FF) | ((value as u16) << 8),
        }
    }

    #[inline(always)]
    pub fn get_flag(&self, flag: Flag) -> bool {
        self.flags & flag.mask() != 0
    }

    pub fn set_flag(&mut self, flag: Flag, state: bool) {
        if state {
            self.flags |= flag.mask();
        }
        else {
            self.flags &= !flag.mask();
        }
    }

    #[inline(always)]
    pub fn flags(&self) -> u16 {
        self.flags
    }

    #[inline(always)]
    pub fn ip(&self) -> u16 {
        self.ip
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn segment_value(&self, segment: Segment) -> u16 {
        self.get_register16(segment.register())
    }

    /// Sum the base registers and displacement of an effective address
    /// calculation into a 16-bit segment offset.
    pub fn ea_offset(&self, mode: &AddressingMode) -> u16 {
        use AddressingMode::*;
        let (base, disp) = match mode {
            BxSi => (self.bx.wrapping_add(self.si), 0),
            BxDi => (self.bx.wrapping_add(self.di), 0),
            BpSi => (self.bp.wrapping_add(self.si), 0),
            BpDi => (self.bp.wrapping_add(self.di), 0),
            Si => (self.si, 0),
            Di => (self.di, 0),
            Disp16(d) => (0, d.get_i16()),
            Bx => (self.bx, 0),
            BxSiDisp8(d) | BxSiDisp16(d) => (self.bx.wrapping_add(self.si), d.get_i16()),
            BxDiDisp8(d) | BxDiDisp16(d) => (self.bx.wrapping_add(self.di), d.get_i16()),
            BpSiDisp8(d) | BpSiDisp16(d) => (self.bp.wrapping_add(self.si), d.get_i16()),
            BpDiDisp8(d) | BpDiDisp16(d) => (self.bp.wrapping_add(self.di), d.get_i16()),
            SiDisp8(d) | SiDisp16(d) => (self.si, d.get_i16()),
            DiDisp8(d) | DiDisp16(d) => (self.di, d.get_i16()),
            BpDisp8(d) | BpDisp16(d) => (self.bp, d.get_i16()),
            BxDisp8(d) | BxDisp16(d) => (self.bx, d.get_i16()),
            RegisterMode => (0, 0),
        };
        base.wrapping_add(disp as u16)
    }

    /// Resolve an effective address to a linear address, honoring a segment
    /// override and the BP-defaults-to-SS rule.
    pub fn ea_linear(&self, mode: &AddressingMode, segment_override: Option<Segment>) -> u32 {
        let segment = segment_override.unwrap_or_else(|| mode.default_segment());
        calc_linear_address(self.segment_value(segment), self.ea_offset(mode))
    }

    /// Resolve a direct accumulator-offset reference.
    pub fn offset_linear(&self, offset: u16, segment_override: Option<Segment>) -> u32 {
        let segment = segment_override.unwrap_or(Segment::DS);
        calc_linear_address(self.segment_value(segment), offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_common::Displacement;

    #[test]
    fn byte_halves_merge_into_parent() {
        let mut m = Machine::default();
        m.set_register16(Register16::AX, 0x1234);
        assert_eq!(m.get_register8(Register8::AL), 0x34);
        assert_eq!(m.get_register8(Register8::AH), 0x12);
        assert_eq!(m.merge_register8(Register8::AH, 0xFF), 0xFF34);
        assert_eq!(m.merge_register8(Register8::AL, 0x00), 0x1200);
    }

    #[test]
    fn flags_set_and_clear() {
        let mut m = Machine::default();
        assert!(!m.get_flag(Flag::Zero));
        m.set_flag(Flag::Zero, true);
        m.set_flag(Flag::Carry, true);
        assert!(m.get_flag(Flag::Zero));
        assert_eq!(m.flags() & (CPU_FLAG_ZERO | CPU_FLAG_CARRY), CPU_FLAG_ZERO | CPU_FLAG_CARRY);
        m.set_flag(Flag::Zero, false);
        assert!(!m.get_flag(Flag::Zero));
        assert!(m.get_flag(Flag::Carry));
    }

    #[test]
    fn effective_address_resolution() {
        let mut m = Machine::default();
        m.set_register16(Register16::BX, 0x1000);
        m.set_register16(Register16::SI, 0x0100);
        m.set_register16(Register16::DS, 0x0200);

        let mode = AddressingMode::BxSiDisp8(Displacement::Disp8(-0x10));
        assert_eq!(m.ea_offset(&mode), 0x10F0);
        assert_eq!(m.ea_linear(&mode, None), 0x2000 + 0x10F0);

        // BP-based modes default to SS
        m.set_register16(Register16::BP, 0x0050);
        m.set_register16(Register16::SS, 0x3000);
        let mode = AddressingMode::BpDisp8(Displacement::Disp8(4));
        assert_eq!(m.ea_linear(&mode, None), 0x30000 + 0x54);
        // ...unless overridden
        assert_eq!(m.ea_linear(&mode, Some(Segment::DS)), 0x2000 + 0x54);
    }
}
