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

    cpu_common::addressing.rs

    Effective address calculations. One variant per (mod, rm) table row;
    the displacement is threaded through the variant payloads.

*/

use crate::cpu_common::Segment;
use std::{fmt, fmt::Display};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Displacement {
    NoDisp,
    Pending8,
    Pending16,
    Disp8(i8),
    Disp16(i16),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddressingMode {
    BxSi,
    BxDi,
    BpSi,
    BpDi,
    Si,
    Di,
    Disp16(Displacement),
    Bx,
    BxSiDisp8(Displacement),
    BxDiDisp8(Displacement),
    BpSiDisp8(Displacement),
    BpDiDisp8(Displacement),
    SiDisp8(Displacement),
    DiDisp8(Displacement),
    BpDisp8(Displacement),
    BxDisp8(Displacement),
    BxSiDisp16(Displacement),
    BxDiDisp16(Displacement),
    BpSiDisp16(Displacement),
    BpDiDisp16(Displacement),
    SiDisp16(Displacement),
    DiDisp16(Displacement),
    BpDisp16(Displacement),
    BxDisp16(Displacement),
    RegisterMode,
}

pub(crate) struct SignedHex<T>(pub T);
pub(crate) struct WithPlusSign<T>(pub T);

impl Displacement {
    pub fn get_i16(&self) -> i16 {
        match self {
            Displacement::Disp8(disp) => *disp as i16,
            Displacement::Disp16(disp) => *disp,
            _ => 0,
        }
    }

    pub fn get_u16(&self) -> u16 {
        self.get_i16() as u16
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Displacement::Disp8(0) | Displacement::Disp16(0))
    }
}

impl AddressingMode {
    /// The displacement stored in this mode's payload, if any.
    pub fn displacement(&self) -> Displacement {
        use AddressingMode::*;
        match self {
            Disp16(d) | BxSiDisp8(d) | BxDiDisp8(d) | BpSiDisp8(d) | BpDiDisp8(d) | SiDisp8(d) | DiDisp8(d)
            | BpDisp8(d) | BxDisp8(d) | BxSiDisp16(d) | BxDiDisp16(d) | BpSiDisp16(d) | BpDiDisp16(d)
            | SiDisp16(d) | DiDisp16(d) | BpDisp16(d) | BxDisp16(d) => *d,
            _ => Displacement::NoDisp,
        }
    }

    /// Memory references through BP use the stack segment unless overridden;
    /// everything else defaults to DS.
    pub fn default_segment(&self) -> Segment {
        use AddressingMode::*;
        match self {
            BpSi | BpDi | BpSiDisp8(_) | BpDiDisp8(_) | BpDisp8(_) | BpSiDisp16(_) | BpDiDisp16(_) | BpDisp16(_) => {
                Segment::SS
            }
            _ => Segment::DS,
        }
    }

    fn base_str(&self) -> &'static str {
        use AddressingMode::*;
        match self {
            BxSi | BxSiDisp8(_) | BxSiDisp16(_) => "bx+si",
            BxDi | BxDiDisp8(_) | BxDiDisp16(_) => "bx+di",
            BpSi | BpSiDisp8(_) | BpSiDisp16(_) => "bp+si",
            BpDi | BpDiDisp8(_) | BpDiDisp16(_) => "bp+di",
            Si | SiDisp8(_) | SiDisp16(_) => "si",
            Di | DiDisp8(_) | DiDisp16(_) => "di",
            Bx | BxDisp8(_) | BxDisp16(_) => "bx",
            BpDisp8(_) | BpDisp16(_) => "bp",
            Disp16(_) | RegisterMode => "",
        }
    }
}

impl fmt::Display for SignedHex<Displacement> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Displacement::Pending8 | Displacement::Pending16 | Displacement::NoDisp => {
                write!(f, "Invalid Displacement")
            }
            Displacement::Disp8(i) => {
                if *i < 0 {
                    write!(f, "{:X}h", (*i as i16).unsigned_abs())
                }
                else {
                    write!(f, "{:X}h", i)
                }
            }
            Displacement::Disp16(i) => {
                if *i < 0 {
                    write!(f, "{:X}h", i.unsigned_abs())
                }
                else {
                    write!(f, "{:X}h", i)
                }
            }
        }
    }
}

impl Display for WithPlusSign<Displacement> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Displacement::Pending8 | Displacement::Pending16 | Displacement::NoDisp => {
                write!(f, "Invalid Displacement")
            }
            Displacement::Disp8(i) => {
                if *i < 0 {
                    write!(f, "-{}", SignedHex(self.0))
                }
                else {
                    write!(f, "+{}", SignedHex(self.0))
                }
            }
            Displacement::Disp16(i) => {
                if *i < 0 {
                    write!(f, "-{}", SignedHex(self.0))
                }
                else {
                    write!(f, "+{}", SignedHex(self.0))
                }
            }
        }
    }
}

impl Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressingMode::RegisterMode => write!(f, "reg"),
            AddressingMode::Disp16(d) => write!(f, "[{}]", SignedHex(*d)),
            _ => {
                let disp = self.displacement();
                match disp {
                    Displacement::Disp8(_) | Displacement::Disp16(_) => {
                        write!(f, "[{}{}]", self.base_str(), WithPlusSign(disp))
                    }
                    _ => write!(f, "[{}]", self.base_str()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_segment_follows_bp_rule() {
        assert_eq!(AddressingMode::BpSi.default_segment(), Segment::SS);
        assert_eq!(
            AddressingMode::BpDisp8(Displacement::Disp8(4)).default_segment(),
            Segment::SS
        );
        assert_eq!(AddressingMode::BxSi.default_segment(), Segment::DS);
        // A direct address is relative to DS, not SS
        assert_eq!(
            AddressingMode::Disp16(Displacement::Disp16(0x100)).default_segment(),
            Segment::DS
        );
    }

    #[test]
    fn display_renders_signed_displacement() {
        let mode = AddressingMode::BxSiDisp8(Displacement::Disp8(-4));
        assert_eq!(format!("{}", mode), "[bx+si-4h]");
        let mode = AddressingMode::BpDisp16(Displacement::Disp16(0x1C));
        assert_eq!(format!("{}", mode), "[bp+1Ch]");
    }
}
