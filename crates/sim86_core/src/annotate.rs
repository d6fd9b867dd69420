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

    annotate.rs

    Didactic bit-field annotation: map a decoded instruction back to the
    sequence of bit fields that encode it. Coverage is limited to the
    ModRM register/memory-with-register families (mov and the eight ALU
    operations); everything else yields an empty sequence.

*/

use crate::{
    cpu_common::{Displacement, Instruction, OperandType},
    decoder::modrm::encode_addressing_mode,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BitFieldKind {
    OpCode,
    DBit,
    WBit,
    Mod,
    Reg,
    Rm,
    DispLo,
    DispHi,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitField {
    pub bits: String,
    pub kind: BitFieldKind,
}

impl BitField {
    fn new(bits: String, kind: BitFieldKind) -> Self {
        Self { bits, kind }
    }
}

/// True for the opcode families the annotator covers: the 0b00xxx0dw ALU
/// block and the 0b100010dw mov block, both register/memory with register.
fn covered(opcode: u8) -> bool {
    (opcode & 0b1100_0100) == 0 || (opcode & 0b1111_1100) == 0b1000_1000
}

/// Reconstruct the encoding of an instruction as ordered bit fields.
/// Instructions outside the covered families, or carrying any prefix,
/// return an empty sequence.
pub fn annotate(i: &Instruction) -> Vec<BitField> {
    if i.prefixes != 0 || i.segment_override.is_some() || !covered(i.opcode) {
        return Vec::new();
    }

    let d = (i.opcode >> 1) & 1;
    // When d is set, the reg field names the first operand
    let (rm_op, reg_op) = if d == 1 {
        (&i.operand2, &i.operand1)
    }
    else {
        (&i.operand1, &i.operand2)
    };

    let reg_bits = match reg_op {
        OperandType::Register8(reg) => reg.encoding(),
        OperandType::Register16(reg) => match reg.encoding() {
            Some(bits) => bits,
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let (b_mod, b_rm, disp) = match rm_op {
        OperandType::Register8(reg) => (0b11, reg.encoding(), Displacement::NoDisp),
        OperandType::Register16(reg) => match reg.encoding() {
            Some(bits) => (0b11, bits, Displacement::NoDisp),
            None => return Vec::new(),
        },
        OperandType::AddressingMode(mode, _) => match encode_addressing_mode(mode) {
            Some((b_mod, b_rm)) => (b_mod, b_rm, mode.displacement()),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut fields = vec![
        BitField::new(format!("{:06b}", i.opcode >> 2), BitFieldKind::OpCode),
        BitField::new(format!("{:01b}", d), BitFieldKind::DBit),
        BitField::new(format!("{:01b}", i.opcode & 1), BitFieldKind::WBit),
        BitField::new(format!("{:02b}", b_mod), BitFieldKind::Mod),
        BitField::new(format!("{:03b}", reg_bits), BitFieldKind::Reg),
        BitField::new(format!("{:03b}", b_rm), BitFieldKind::Rm),
    ];

    match disp {
        Displacement::Disp8(value) => {
            fields.push(BitField::new(format!("{:08b}", value as u8), BitFieldKind::DispLo));
        }
        Displacement::Disp16(value) => {
            let raw = value as u16;
            fields.push(BitField::new(format!("{:08b}", raw as u8), BitFieldKind::DispLo));
            fields.push(BitField::new(format!("{:08b}", (raw >> 8) as u8), BitFieldKind::DispHi));
        }
        _ => {}
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytes::ByteCursor, decoder};

    fn decode_one(bytes: &[u8]) -> Instruction {
        let mut cursor = ByteCursor::new(bytes);
        decoder::decode_next(&mut cursor).expect("decode failed")
    }

    /// Reassemble annotated bit strings into bytes.
    fn bits_to_bytes(fields: &[BitField]) -> Vec<u8> {
        let all: String = fields.iter().map(|f| f.bits.as_str()).collect();
        assert_eq!(all.len() % 8, 0, "bit fields must pack to whole bytes");
        all.as_bytes()
            .chunks(8)
            .map(|chunk| {
                let s = std::str::from_utf8(chunk).unwrap();
                u8::from_str_radix(s, 2).unwrap()
            })
            .collect()
    }

    #[test]
    fn mov_register_register_round_trip() {
        let bytes = [0x89, 0xD8];
        let fields = annotate(&decode_one(&bytes));
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0].bits, "100010");
        assert_eq!(fields[0].kind, BitFieldKind::OpCode);
        assert_eq!(fields[1].bits, "0");
        assert_eq!(fields[2].bits, "1");
        assert_eq!(bits_to_bytes(&fields), bytes);
    }

    #[test]
    fn displacement_fields_round_trip() {
        // mov [bp-4], bx
        let bytes = [0x89, 0x5E, 0xFC];
        let fields = annotate(&decode_one(&bytes));
        assert_eq!(fields.last().unwrap().kind, BitFieldKind::DispLo);
        assert_eq!(bits_to_bytes(&fields), bytes);

        // add ax, [bx+si+0x1234]: d=1 swaps the operand fields back
        let bytes = [0x03, 0x80, 0x34, 0x12];
        let fields = annotate(&decode_one(&bytes));
        assert_eq!(fields[1].bits, "1");
        assert_eq!(bits_to_bytes(&fields), bytes);

        // Direct address carries both displacement bytes
        let bytes = [0x8B, 0x1E, 0x10, 0x00];
        let fields = annotate(&decode_one(&bytes));
        assert_eq!(fields.last().unwrap().kind, BitFieldKind::DispHi);
        assert_eq!(bits_to_bytes(&fields), bytes);
    }

    #[test]
    fn round_trip_across_covered_alu_families() {
        for (bytes, _name) in [
            (&[0x00u8, 0xC3][..], "add bl, al"),
            (&[0x09, 0x0F][..], "or [bx], cx"),
            (&[0x12, 0x47, 0x02][..], "adc al, [bx+2]"),
            (&[0x1B, 0x46, 0xFE][..], "sbb ax, [bp-2]"),
            (&[0x21, 0xD1][..], "and cx, dx"),
            (&[0x2A, 0x24][..], "sub ah, [si]"),
            (&[0x33, 0xED][..], "xor bp, bp"),
            (&[0x3B, 0x0E, 0x00, 0x10][..], "cmp cx, [0x1000]"),
            (&[0x8A, 0x27][..], "mov ah, [bx]"),
        ] {
            let fields = annotate(&decode_one(bytes));
            assert!(!fields.is_empty());
            assert_eq!(bits_to_bytes(&fields), bytes.to_vec());
        }
    }

    #[test]
    fn uncovered_kinds_yield_empty() {
        // Immediate mov is outside the covered families
        assert!(annotate(&decode_one(&[0xB8, 0x05, 0x00])).is_empty());
        // Prefixed instructions are uncovered even in a covered family
        assert!(annotate(&decode_one(&[0x26, 0x8B, 0x07])).is_empty());
        // Marker instructions annotate to nothing
        assert!(annotate(&decode_one(&[0x0F])).is_empty());
    }
}
