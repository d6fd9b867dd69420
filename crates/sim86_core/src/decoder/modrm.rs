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

    decoder::modrm.rs

    ModRM handling. Reading a ModRM byte resolves to a static reference
    into a const table of [ModRmByte]; any displacement is loaded
    afterwards and threaded into the addressing mode.

*/

use crate::{
    bytes::ByteCursor,
    cpu_common::{AddressingMode, DecodeError, Displacement, Register16, Register8, Segment, REGISTER16_LUT, REGISTER8_LUT, SEGMENT_REGISTER_LUT},
};

pub const MODRM_REG_MASK: u8 = 0b00_111_000;
pub const MODRM_ADDR_MASK: u8 = 0b11_000_111;

const MODRM_ADDR_BX_SI: u8 = 0b00_000_000;
const MODRM_ADDR_BX_DI: u8 = 0b00_000_001;
const MODRM_ADDR_BP_SI: u8 = 0b00_000_010;
const MODRM_ADDR_BP_DI: u8 = 0b00_000_011;
const MODRM_ADDR_SI: u8 = 0b00_000_100;
const MODRM_ADDR_DI: u8 = 0b00_000_101;
const MODRM_ADDR_DISP16: u8 = 0b00_000_110;
const MODRM_ADDR_BX: u8 = 0b00_000_111;

const MODRM_ADDR_BX_SI_DISP8: u8 = 0b01_000_000;
const MODRM_ADDR_BX_DI_DISP8: u8 = 0b01_000_001;
const MODRM_ADDR_BP_SI_DISP8: u8 = 0b01_000_010;
const MODRM_ADDR_BP_DI_DISP8: u8 = 0b01_000_011;
const MODRM_ADDR_SI_DISP8: u8 = 0b01_000_100;
const MODRM_ADDR_DI_DISP8: u8 = 0b01_000_101;
const MODRM_ADDR_BP_DISP8: u8 = 0b01_000_110;
const MODRM_ADDR_BX_DISP8: u8 = 0b01_000_111;

const MODRM_ADDR_BX_SI_DISP16: u8 = 0b10_000_000;
const MODRM_ADDR_BX_DI_DISP16: u8 = 0b10_000_001;
const MODRM_ADDR_BP_SI_DISP16: u8 = 0b10_000_010;
const MODRM_ADDR_BP_DI_DISP16: u8 = 0b10_000_011;
const MODRM_ADDR_SI_DISP16: u8 = 0b10_000_100;
const MODRM_ADDR_DI_DISP16: u8 = 0b10_000_101;
const MODRM_ADDR_BP_DISP16: u8 = 0b10_000_110;
const MODRM_ADDR_BX_DISP16: u8 = 0b10_000_111;

#[derive(Copy, Clone)]
pub struct ModRmByte {
    _byte: u8,
    b_mod: u8,
    b_reg: u8,
    b_rm: u8,
    disp: Displacement,
    addressing_mode: AddressingMode,
}

const MODRM_TABLE: [ModRmByte; 256] = {
    let mut table: [ModRmByte; 256] = [ModRmByte {
        _byte: 0,
        b_mod: 0,
        b_reg: 0,
        b_rm: 0,
        disp: Displacement::NoDisp,
        addressing_mode: AddressingMode::BxSi,
    }; 256];
    let mut byte = 0;

    loop {
        let b_mod = (byte >> 6) & 0x03;

        // Which displacement follows this modrm byte. Note the table gap:
        // rm=110 at mod=00 is the direct-address row, so plain [bp] is only
        // reachable through the mod=01/10 displacement encodings.
        let pending = match b_mod {
            0b00 => {
                if byte & MODRM_ADDR_MASK == MODRM_ADDR_DISP16 {
                    Displacement::Pending16
                }
                else {
                    Displacement::NoDisp
                }
            }
            0b01 => Displacement::Pending8,
            0b10 => Displacement::Pending16,
            _ => Displacement::NoDisp,
        };

        let addressing_mode = match byte & MODRM_ADDR_MASK {
            MODRM_ADDR_BX_SI => AddressingMode::BxSi,
            MODRM_ADDR_BX_DI => AddressingMode::BxDi,
            MODRM_ADDR_BP_SI => AddressingMode::BpSi,
            MODRM_ADDR_BP_DI => AddressingMode::BpDi,
            MODRM_ADDR_SI => AddressingMode::Si,
            MODRM_ADDR_DI => AddressingMode::Di,
            MODRM_ADDR_DISP16 => AddressingMode::Disp16(pending),
            MODRM_ADDR_BX => AddressingMode::Bx,
            MODRM_ADDR_BX_SI_DISP8 => AddressingMode::BxSiDisp8(pending),
            MODRM_ADDR_BX_DI_DISP8 => AddressingMode::BxDiDisp8(pending),
            MODRM_ADDR_BP_SI_DISP8 => AddressingMode::BpSiDisp8(pending),
            MODRM_ADDR_BP_DI_DISP8 => AddressingMode::BpDiDisp8(pending),
            MODRM_ADDR_SI_DISP8 => AddressingMode::SiDisp8(pending),
            MODRM_ADDR_DI_DISP8 => AddressingMode::DiDisp8(pending),
            MODRM_ADDR_BP_DISP8 => AddressingMode::BpDisp8(pending),
            MODRM_ADDR_BX_DISP8 => AddressingMode::BxDisp8(pending),
            MODRM_ADDR_BX_SI_DISP16 => AddressingMode::BxSiDisp16(pending),
            MODRM_ADDR_BX_DI_DISP16 => AddressingMode::BxDiDisp16(pending),
            MODRM_ADDR_BP_SI_DISP16 => AddressingMode::BpSiDisp16(pending),
            MODRM_ADDR_BP_DI_DISP16 => AddressingMode::BpDiDisp16(pending),
            MODRM_ADDR_SI_DISP16 => AddressingMode::SiDisp16(pending),
            MODRM_ADDR_DI_DISP16 => AddressingMode::DiDisp16(pending),
            MODRM_ADDR_BP_DISP16 => AddressingMode::BpDisp16(pending),
            MODRM_ADDR_BX_DISP16 => AddressingMode::BxDisp16(pending),
            _ => AddressingMode::RegisterMode,
        };

        table[byte as usize] = ModRmByte {
            _byte: byte,
            b_mod,
            b_reg: (byte >> 3) & 0x07,
            b_rm: byte & 0x07,
            disp: pending,
            addressing_mode,
        };

        if byte < 255 {
            byte += 1;
        }
        else {
            break;
        }
    }

    table
};

impl ModRmByte {
    pub fn default_ref() -> &'static ModRmByte {
        &MODRM_TABLE[0b11_000_000]
    }

    /// Read a modrm byte and any displacement it calls for. Returns the
    /// static table entry plus the loaded displacement.
    pub fn read(bytes: &mut ByteCursor) -> Result<(&'static ModRmByte, Displacement), DecodeError> {
        let byte = bytes.read_u8()?;
        let modrm = &MODRM_TABLE[byte as usize];

        let disp = match modrm.disp {
            Displacement::Pending8 => Displacement::Disp8(bytes.read_i8()?),
            Displacement::Pending16 => Displacement::Disp16(bytes.read_i16()?),
            _ => Displacement::NoDisp,
        };
        Ok((modrm, disp))
    }

    // Interpret the 'R/M' field as an 8 bit register selector
    #[inline(always)]
    pub fn rm_reg8(&self) -> Register8 {
        REGISTER8_LUT[self.b_rm as usize]
    }
    // Interpret the 'R/M' field as a 16 bit register selector
    #[inline(always)]
    pub fn rm_reg16(&self) -> Register16 {
        REGISTER16_LUT[self.b_rm as usize]
    }
    // Interpret the 'REG' field as an 8 bit register selector
    #[inline(always)]
    pub fn reg_reg8(&self) -> Register8 {
        REGISTER8_LUT[self.b_reg as usize]
    }
    // Interpret the 'REG' field as a 16 bit register selector
    #[inline(always)]
    pub fn reg_reg16(&self) -> Register16 {
        REGISTER16_LUT[self.b_reg as usize]
    }
    // Interpret the 'REG' field as a segment register selector
    pub fn reg_segment(&self) -> Result<Segment, DecodeError> {
        if self.b_reg > 3 {
            return Err(DecodeError::InvalidSegmentRegister(self.b_reg));
        }
        Ok(SEGMENT_REGISTER_LUT[self.b_reg as usize])
    }
    // Interpret the 'REG' field as a 3 bit opcode extension
    #[inline(always)]
    pub fn op_extension(&self) -> u8 {
        self.b_reg
    }
    // Return whether the modrm byte specifies a memory addressing mode
    #[inline(always)]
    pub fn is_addressing_mode(&self) -> bool {
        self.b_mod != 0b11
    }
    /// Produce an [AddressingMode] with the loaded [Displacement] inserted.
    pub fn addressing_mode(&self, displacement: Displacement) -> AddressingMode {
        match self.addressing_mode {
            AddressingMode::Disp16(_) => AddressingMode::Disp16(displacement),
            AddressingMode::BxSiDisp8(_) => AddressingMode::BxSiDisp8(displacement),
            AddressingMode::BxDiDisp8(_) => AddressingMode::BxDiDisp8(displacement),
            AddressingMode::BpSiDisp8(_) => AddressingMode::BpSiDisp8(displacement),
            AddressingMode::BpDiDisp8(_) => AddressingMode::BpDiDisp8(displacement),
            AddressingMode::SiDisp8(_) => AddressingMode::SiDisp8(displacement),
            AddressingMode::DiDisp8(_) => AddressingMode::DiDisp8(displacement),
            AddressingMode::BpDisp8(_) => AddressingMode::BpDisp8(displacement),
            AddressingMode::BxDisp8(_) => AddressingMode::BxDisp8(displacement),
            AddressingMode::BxSiDisp16(_) => AddressingMode::BxSiDisp16(displacement),
            AddressingMode::BxDiDisp16(_) => AddressingMode::BxDiDisp16(displacement),
            AddressingMode::BpSiDisp16(_) => AddressingMode::BpSiDisp16(displacement),
            AddressingMode::BpDiDisp16(_) => AddressingMode::BpDiDisp16(displacement),
            AddressingMode::SiDisp16(_) => AddressingMode::SiDisp16(displacement),
            AddressingMode::DiDisp16(_) => AddressingMode::DiDisp16(displacement),
            AddressingMode::BpDisp16(_) => AddressingMode::BpDisp16(displacement),
            AddressingMode::BxDisp16(_) => AddressingMode::BxDisp16(displacement),
            _ => self.addressing_mode,
        }
    }
}

/// The inverse direction of the effective-address catalog: map an
/// addressing mode back to its (mod, rm) bit pattern. Used by the bit
/// annotator when reconstructing an instruction's encoding.
pub fn encode_addressing_mode(mode: &AddressingMode) -> Option<(u8, u8)> {
    use AddressingMode::*;
    let (b_mod, b_rm) = match mode {
        BxSi => (0b00, 0b000),
        BxDi => (0b00, 0b001),
        BpSi => (0b00, 0b010),
        BpDi => (0b00, 0b011),
        Si => (0b00, 0b100),
        Di => (0b00, 0b101),
        Disp16(_) => (0b00, 0b110),
        Bx => (0b00, 0b111),
        BxSiDisp8(_) => (0b01, 0b000),
        BxDiDisp8(_) => (0b01, 0b001),
        BpSiDisp8(_) => (0b01, 0b010),
        BpDiDisp8(_) => (0b01, 0b011),
        SiDisp8(_) => (0b01, 0b100),
        DiDisp8(_) => (0b01, 0b101),
        BpDisp8(_) => (0b01, 0b110),
        BxDisp8(_) => (0b01, 0b111),
        BxSiDisp16(_) => (0b10, 0b000),
        BxDiDisp16(_) => (0b10, 0b001),
        BpSiDisp16(_) => (0b10, 0b010),
        BpDiDisp16(_) => (0b10, 0b011),
        SiDisp16(_) => (0b10, 0b100),
        DiDisp16(_) => (0b10, 0b101),
        BpDisp16(_) => (0b10, 0b110),
        BxDisp16(_) => (0b10, 0b111),
        RegisterMode => return None,
    };
    Some((b_mod, b_rm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_address_row_replaces_plain_bp() {
        // mod=00 rm=110 is [disp16], not [bp]
        let modrm = &MODRM_TABLE[0b00_000_110];
        assert_eq!(modrm.addressing_mode, AddressingMode::Disp16(Displacement::Pending16));
        assert_eq!(modrm.disp, Displacement::Pending16);

        // [bp] requires a displacement encoding
        let modrm = &MODRM_TABLE[0b01_000_110];
        assert!(matches!(modrm.addressing_mode, AddressingMode::BpDisp8(_)));
    }

    #[test]
    fn register_mode_at_mod_11() {
        let modrm = &MODRM_TABLE[0b11_011_000];
        assert_eq!(modrm.addressing_mode, AddressingMode::RegisterMode);
        assert_eq!(modrm.reg_reg16(), Register16::BX);
        assert_eq!(modrm.rm_reg16(), Register16::AX);
        assert!(!modrm.is_addressing_mode());
    }

    #[test]
    fn encode_inverts_the_table_for_memory_modes() {
        for byte in 0u16..=255 {
            let modrm = &MODRM_TABLE[byte as usize];
            match encode_addressing_mode(&modrm.addressing_mode) {
                Some((b_mod, b_rm)) => {
                    assert_eq!(b_mod, modrm.b_mod, "byte {:02X}", byte);
                    assert_eq!(b_rm, modrm.b_rm, "byte {:02X}", byte);
                }
                None => assert_eq!(modrm.b_mod, 0b11, "byte {:02X}", byte),
            }
        }
    }

    #[test]
    fn displacement_loads_twos_complement() {
        let mut c = ByteCursor::new(&[0b01_000_110, 0xFC]);
        let (modrm, disp) = ModRmByte::read(&mut c).unwrap();
        assert_eq!(disp, Displacement::Disp8(-4));
        assert_eq!(
            modrm.addressing_mode(disp),
            AddressingMode::BpDisp8(Displacement::Disp8(-4))
        );
    }

    #[test]
    fn reserved_segment_register_field_rejected() {
        let modrm = &MODRM_TABLE[0b11_100_000];
        assert_eq!(modrm.reg_segment(), Err(DecodeError::InvalidSegmentRegister(4)));
        let modrm = &MODRM_TABLE[0b11_011_000];
        assert_eq!(modrm.reg_segment(), Ok(Segment::DS));
    }
}
