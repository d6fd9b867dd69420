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

    cpu_common::mnemonic.rs

    Defines the instruction kind enum. The decoder, clock estimator and
    simulator all match on this exhaustively, so adding a variant fails to
    build until every consumer handles it.

*/

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    /// A byte the 8086 opcode map leaves unassigned. Decodes as a one-byte
    /// marker so a stream containing stray data keeps decoding.
    InvalidOpcode,
    NOP,
    AAA,
    AAD,
    AAM,
    AAS,
    ADC,
    ADD,
    AND,
    CALL,
    CALLF,
    CBW,
    CLC,
    CLD,
    CLI,
    CMC,
    CMP,
    CMPSB,
    CMPSW,
    CWD,
    DAA,
    DAS,
    DEC,
    DIV,
    ESC,
    HLT,
    IDIV,
    IMUL,
    IN,
    INC,
    INT,
    INT3,
    INTO,
    IRET,
    JB,
    JBE,
    JCXZ,
    JL,
    JLE,
    JMP,
    JMPF,
    JNB,
    JNBE,
    JNL,
    JNLE,
    JNO,
    JNP,
    JNS,
    JNZ,
    JO,
    JP,
    JS,
    JZ,
    LAHF,
    LDS,
    LEA,
    LES,
    LODSB,
    LODSW,
    LOOP,
    LOOPE,
    LOOPNE,
    MOV,
    MOVSB,
    MOVSW,
    MUL,
    NEG,
    NOT,
    OR,
    OUT,
    POP,
    POPF,
    PUSH,
    PUSHF,
    RCL,
    RCR,
    RETF,
    RETN,
    ROL,
    ROR,
    SAHF,
    SAR,
    SBB,
    SCASB,
    SCASW,
    SHL,
    SHR,
    STC,
    STD,
    STI,
    STOSB,
    STOSW,
    SUB,
    TEST,
    WAIT,
    XCHG,
    XLAT,
    XOR,
}

impl Mnemonic {
    /// String instructions are the only kinds a repeat prefix applies to.
    pub fn is_string_op(&self) -> bool {
        use Mnemonic::*;
        matches!(
            self,
            MOVSB | MOVSW | CMPSB | CMPSW | SCASB | SCASW | LODSB | LODSW | STOSB | STOSW
        )
    }
}

pub fn mnemonic_to_str(op: Mnemonic) -> &'static str {
    use Mnemonic::*;
    match op {
        InvalidOpcode => "INVALID",
        NOP => "nop",
        AAA => "aaa",
        AAD => "aad",
        AAM => "aam",
        AAS => "aas",
        ADC => "adc",
        ADD => "add",
        AND => "and",
        CALL => "call",
        CALLF => "call far",
        CBW => "cbw",
        CLC => "clc",
        CLD => "cld",
        CLI => "cli",
        CMC => "cmc",
        CMP => "cmp",
        CMPSB => "cmpsb",
        CMPSW => "cmpsw",
        CWD => "cwd",
        DAA => "daa",
        DAS => "das",
        DEC => "dec",
        DIV => "div",
        ESC => "esc",
        HLT => "hlt",
        IDIV => "idiv",
        IMUL => "imul",
        IN => "in",
        INC => "inc",
        INT => "int",
        INT3 => "int3",
        INTO => "into",
        IRET => "iret",
        JB => "jb",
        JBE => "jbe",
        JCXZ => "jcxz",
        JL => "jl",
        JLE => "jle",
        JMP => "jmp",
        JMPF => "jmp far",
        JNB => "jnb",
        JNBE => "jnbe",
        JNL => "jnl",
        JNLE => "jnle",
        JNO => "jno",
        JNP => "jnp",
        JNS => "jns",
        JNZ => "jnz",
        JO => "jo",
        JP => "jp",
        JS => "js",
        JZ => "jz",
        LAHF => "lahf",
        LDS => "lds",
        LEA => "lea",
        LES => "les",
        LODSB => "lodsb",
        LODSW => "lodsw",
        LOOP => "loop",
        LOOPE => "loope",
        LOOPNE => "loopne",
        MOV => "mov",
        MOVSB => "movsb",
        MOVSW => "movsw",
        MUL => "mul",
        NEG => "neg",
        NOT => "not",
        OR => "or",
        OUT => "out",
        POP => "pop",
        POPF => "popf",
        PUSH => "push",
        PUSHF => "pushf",
        RCL => "rcl",
        RCR => "rcr",
        RETF => "retf",
        RETN => "ret",
        ROL => "rol",
        ROR => "ror",
        SAHF => "sahf",
        SAR => "sar",
        SBB => "sbb",
        SCASB => "scasb",
        SCASW => "scasw",
        SHL => "shl",
        SHR => "shr",
        STC => "stc",
        STD => "std",
        STI => "sti",
        STOSB => "stosb",
        STOSW => "stosw",
        SUB => "sub",
        TEST => "test",
        WAIT => "wait",
        XCHG => "xchg",
        XLAT => "xlat",
        XOR => "xor",
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", mnemonic_to_str(*self))
    }
}
