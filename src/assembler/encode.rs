// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Per-mnemonic 8086 encoders.
//!
//! Operand shapes are validated against the ISA catalog first; each
//! mnemonic then dispatches to its canonical byte sequence. The byte values
//! here are the authoritative encoding tables; the shared decoder is their
//! inverse and the round-trip tests in `assembler::tests` hold the two
//! together.

use super::operand::{Operand, OperandKind};
use super::AsmContext;
use crate::isa;

/// Match one operand slot against an ISA rule pattern.
fn matches_rule(op: Option<&Operand>, rule: &str) -> bool {
    let Some(op) = op else {
        return rule == "NONE";
    };
    match rule {
        "NONE" => false,
        "REG" => op.is_register(),
        "REG8" => op.is_register() && op.size() == 8,
        "REG16" => op.is_register() && op.size() == 16,
        "MEM" | "MEM16" => op.is_memory(),
        "IMM" | "LABEL" => op.is_immediate(),
        "AL/AX" => op.is_register() && op.reg() == 0,
        "1" => op.is_immediate() && op.value() == 1,
        "CL" => op.is_register() && op.reg() == 1 && op.size() == 8,
        "DX" => op.is_register() && op.reg() == 2 && op.size() == 16,
        "SEG" | "SREG" => op.is_segment_reg(),
        _ => false,
    }
}

/// Check operand shapes against the catalog. Unknown mnemonics pass (they
/// fall through the encoder and trip the drift check); a shape mismatch
/// reports every valid form plus what was actually supplied.
pub fn validate_instruction(
    ctx: &mut AsmContext,
    mnemonic: &str,
    op1: Option<&Operand>,
    op2: Option<&Operand>,
    line: u32,
) -> bool {
    let Some(entry) = isa::find_entry(mnemonic) else {
        return true;
    };
    for form in entry.forms {
        if matches_rule(op1, form.op1) && matches_rule(op2, form.op2) {
            return true;
        }
    }

    let mut hint = String::from("Valid forms: ");
    for (i, form) in entry.forms.iter().enumerate() {
        hint.push_str(mnemonic);
        hint.push(' ');
        hint.push_str(form.op1);
        if form.op2 != "NONE" {
            hint.push_str(", ");
            hint.push_str(form.op2);
        }
        if !form.notes.is_empty() {
            hint.push_str(&format!(" ({})", form.notes));
        }
        if i + 1 < entry.forms.len() {
            hint.push_str(" | ");
        }
    }
    hint.push_str(". You provided: ");
    hint.push_str(&op1.map(|o| o.describe()).unwrap_or_else(|| "NONE".to_string()));
    if let Some(op2) = op2 {
        hint.push_str(", ");
        hint.push_str(&op2.describe());
    }
    hint.push('.');

    ctx.error(line, format!("Invalid operands for {mnemonic}"), hint);
    false
}

fn warn_truncation(ctx: &mut AsmContext, line: u32, value: i32, size: u8) {
    if ctx.pass1 {
        return;
    }
    if size == 8 && !(-128..=255).contains(&value) {
        ctx.warning(
            line,
            format!(
                "Immediate value {value} truncated to 8-bit (result: {})",
                value & 0xFF
            ),
            "Value exceeds 8-bit range (0-255 unsigned, -128 to 127 signed). The low 8 bits \
             will be used.",
        );
    } else if size == 16 && !(-32768..=65535).contains(&value) {
        ctx.warning(
            line,
            format!(
                "Immediate value {value} truncated to 16-bit (result: {})",
                value & 0xFFFF
            ),
            "Value exceeds 16-bit range (0-65535 unsigned, -32768 to 32767 signed).",
        );
    }
}

fn warn_default_word(ctx: &mut AsmContext, line: u32, mnemonic: &str, mem: &Operand) {
    let OperandKind::Memory { explicit_size, .. } = mem.kind else {
        return;
    };
    if !explicit_size && !ctx.pass1 {
        ctx.warning(
            line,
            "No size prefix on memory-immediate operation, defaulting to WORD",
            format!(
                "Add BYTE or WORD before the memory operand to be explicit. Example: \
                 {mnemonic} BYTE [BX], 5 or {mnemonic} WORD [BX], 5"
            ),
        );
    }
}

fn alu_reg_base(mnemonic: &str) -> u8 {
    match mnemonic {
        "ADD" => 0x00,
        "OR" => 0x08,
        "ADC" => 0x10,
        "SBB" => 0x18,
        "AND" => 0x20,
        "SUB" => 0x28,
        "XOR" => 0x30,
        "CMP" => 0x38,
        _ => 0x84, // TEST, no direction bit
    }
}

fn alu_imm_ext(mnemonic: &str) -> u8 {
    match mnemonic {
        "ADD" => 0,
        "OR" => 1,
        "ADC" => 2,
        "SBB" => 3,
        "AND" => 4,
        "SUB" => 5,
        "XOR" => 6,
        _ => 7, // CMP
    }
}

fn shift_ext(mnemonic: &str) -> u8 {
    match mnemonic {
        "ROL" => 0,
        "ROR" => 1,
        "RCL" => 2,
        "RCR" => 3,
        "SHL" | "SAL" => 4,
        "SHR" => 5,
        _ => 7, // SAR
    }
}

fn jcc_opcode(mnemonic: &str) -> Option<u8> {
    Some(match mnemonic {
        "JO" => 0x70,
        "JNO" => 0x71,
        "JB" | "JNAE" | "JC" => 0x72,
        "JNB" | "JAE" | "JNC" => 0x73,
        "JZ" | "JE" => 0x74,
        "JNZ" | "JNE" => 0x75,
        "JBE" | "JNA" => 0x76,
        "JA" | "JNBE" => 0x77,
        "JS" => 0x78,
        "JNS" => 0x79,
        "JP" | "JPE" => 0x7A,
        "JNP" | "JPO" => 0x7B,
        "JL" | "JNGE" => 0x7C,
        "JGE" | "JNL" => 0x7D,
        "JLE" | "JNG" => 0x7E,
        "JG" | "JNLE" => 0x7F,
        _ => return None,
    })
}

fn jcc_inversion(mnemonic: &str) -> Option<&'static str> {
    Some(match mnemonic {
        "JZ" | "JE" => "JNZ",
        "JNZ" | "JNE" => "JZ",
        "JL" | "JNGE" => "JGE",
        "JG" | "JNLE" => "JLE",
        "JLE" | "JNG" => "JG",
        "JGE" | "JNL" => "JL",
        "JB" | "JNAE" => "JNB",
        "JC" => "JNC",
        "JA" | "JNBE" => "JBE",
        "JBE" | "JNA" => "JA",
        "JAE" | "JNB" => "JB",
        "JNC" => "JC",
        "JS" => "JNS",
        "JNS" => "JS",
        "JO" => "JNO",
        "JNO" => "JO",
        "JP" | "JPE" => "JNP",
        "JNP" | "JPO" => "JP",
        _ => return None,
    })
}

pub fn encode_instruction(
    ctx: &mut AsmContext,
    mnemonic: &str,
    op1: Option<&Operand>,
    op2: Option<&Operand>,
    line: u32,
) {
    match mnemonic {
        "MOV" => encode_mov(ctx, op1, op2, line),
        "ADD" | "ADC" | "SUB" | "SBB" | "CMP" | "AND" | "OR" | "XOR" | "TEST" => {
            encode_alu(ctx, mnemonic, op1, op2, line)
        }
        "INC" | "DEC" | "NOT" | "NEG" => encode_unary(ctx, mnemonic, op1),
        "MUL" | "IMUL" | "DIV" | "IDIV" => encode_muldiv(ctx, mnemonic, op1),
        "INT" => {
            if let Some(op) = op1 {
                if let OperandKind::Immediate { value } = op.kind {
                    ctx.emit_byte(0xCD);
                    ctx.emit_byte((value & 0xFF) as u8);
                }
            }
        }
        "SHL" | "SHR" | "SAR" | "SAL" | "ROL" | "ROR" | "RCL" | "RCR" => {
            encode_shift(ctx, mnemonic, op1, op2, line)
        }
        "IN" => encode_in(ctx, op1, op2, line),
        "OUT" => encode_out(ctx, op1, op2, line),
        "LEA" => encode_lea(ctx, op1, op2, line),
        "JMP" => {
            let target = op1.map(|o| o.value()).unwrap_or(0);
            // Always near (E9) so any in-segment target is reachable.
            let offset = target - (ctx.current_address + 3);
            ctx.emit_byte(0xE9);
            ctx.emit_word((offset & 0xFFFF) as u16);
        }
        "CALL" => {
            let target = op1.map(|o| o.value()).unwrap_or(0);
            let offset = target - (ctx.current_address + 3);
            ctx.emit_byte(0xE8);
            ctx.emit_word((offset & 0xFFFF) as u16);
        }
        "RET" => ctx.emit_byte(0xC3),
        "LOOP" | "LOOPE" | "LOOPZ" | "LOOPNE" | "LOOPNZ" | "JCXZ" => {
            encode_loop(ctx, mnemonic, op1, line)
        }
        "PUSH" | "POP" => encode_stack(ctx, mnemonic, op1, line),
        "MOVSB" => ctx.emit_byte(0xA4),
        "MOVSW" => ctx.emit_byte(0xA5),
        "CMPSB" => ctx.emit_byte(0xA6),
        "CMPSW" => ctx.emit_byte(0xA7),
        "STOSB" => ctx.emit_byte(0xAA),
        "STOSW" => ctx.emit_byte(0xAB),
        "LODSB" => ctx.emit_byte(0xAC),
        "LODSW" => ctx.emit_byte(0xAD),
        "SCASB" => ctx.emit_byte(0xAE),
        "SCASW" => ctx.emit_byte(0xAF),
        "CLD" => ctx.emit_byte(0xFC),
        "STD" => ctx.emit_byte(0xFD),
        "CLI" => ctx.emit_byte(0xFA),
        "STI" => ctx.emit_byte(0xFB),
        "CMC" => ctx.emit_byte(0xF5),
        "CLC" => ctx.emit_byte(0xF8),
        "STC" => ctx.emit_byte(0xF9),
        "NOP" => ctx.emit_byte(0x90),
        "CBW" => ctx.emit_byte(0x98),
        "CWD" => ctx.emit_byte(0x99),
        "LAHF" => ctx.emit_byte(0x9F),
        "SAHF" => ctx.emit_byte(0x9E),
        "PUSHF" => ctx.emit_byte(0x9C),
        "POPF" => ctx.emit_byte(0x9D),
        "XLAT" | "XLATB" => ctx.emit_byte(0xD7),
        "HLT" => ctx.emit_byte(0xF4),
        "PUSHA" => ctx.emit_byte(0x60),
        "POPA" => ctx.emit_byte(0x61),
        "XCHG" => encode_xchg(ctx, op1, op2),
        _ => {
            if let Some(opcode) = jcc_opcode(mnemonic) {
                encode_jcc(ctx, mnemonic, opcode, op1, line);
            }
        }
    }
}

fn encode_mov(ctx: &mut AsmContext, op1: Option<&Operand>, op2: Option<&Operand>, line: u32) {
    let (Some(op1), Some(op2)) = (op1, op2) else {
        return;
    };
    match (op1.kind, op2.kind) {
        (OperandKind::Register { reg: r1, size: s1 }, OperandKind::Register { reg: r2, size: s2 }) => {
            if s1 != s2 {
                let hint = format!(
                    "Op1 is {s1}-bit ({}), Op2 is {s2}-bit ({}). Both operands must be the same \
                     width.",
                    isa::register_name(r1, s1),
                    isa::register_name(r2, s2)
                );
                ctx.error(line, "Size mismatch between operands", hint);
                return;
            }
            ctx.emit_byte(if s1 == 8 { 0x88 } else { 0x89 });
            ctx.emit_byte(0xC0 | (r2 << 3) | r1);
        }
        (OperandKind::Register { reg, size }, OperandKind::Immediate { value }) => {
            warn_truncation(ctx, line, value, size);
            if size == 8 {
                ctx.emit_byte(0xB0 + reg);
                ctx.emit_byte((value & 0xFF) as u8);
            } else {
                ctx.emit_byte(0xB8 + reg);
                ctx.emit_word((value & 0xFFFF) as u16);
            }
        }
        (OperandKind::Register { reg, size }, OperandKind::Memory { .. }) => {
            ctx.emit_byte(if size == 8 { 0x8A } else { 0x8B });
            ctx.emit_modrm(reg, op2);
        }
        (OperandKind::Memory { .. }, OperandKind::Register { reg, size }) => {
            ctx.emit_byte(if size == 8 { 0x88 } else { 0x89 });
            ctx.emit_modrm(reg, op1);
        }
        (OperandKind::Memory { size, .. }, OperandKind::Immediate { value }) => {
            warn_default_word(ctx, line, "MOV", op1);
            ctx.emit_byte(if size == 8 { 0xC6 } else { 0xC7 });
            ctx.emit_modrm(0, op1);
            if size == 8 {
                ctx.emit_byte((value & 0xFF) as u8);
            } else {
                ctx.emit_word((value & 0xFFFF) as u16);
            }
        }
        (OperandKind::Register { reg, .. }, OperandKind::SegmentReg { index }) => {
            ctx.emit_byte(0x8C);
            ctx.emit_byte(0xC0 | (index << 3) | reg);
        }
        (OperandKind::SegmentReg { index }, OperandKind::Register { reg, .. }) => {
            ctx.emit_byte(0x8E);
            ctx.emit_byte(0xC0 | (index << 3) | reg);
        }
        _ => {}
    }
}

fn encode_alu(
    ctx: &mut AsmContext,
    mnemonic: &str,
    op1: Option<&Operand>,
    op2: Option<&Operand>,
    line: u32,
) {
    let (Some(op1), Some(op2)) = (op1, op2) else {
        return;
    };
    match (op1.kind, op2.kind) {
        (OperandKind::Register { reg: r1, size: s1 }, OperandKind::Register { reg: r2, .. }) => {
            let mut base = alu_reg_base(mnemonic);
            if s1 == 16 {
                base += 1;
            }
            ctx.emit_byte(base);
            ctx.emit_byte(0xC0 | (r2 << 3) | r1);
        }
        (OperandKind::Register { reg, size }, OperandKind::Immediate { value }) => {
            if mnemonic == "TEST" {
                // TEST r, imm: F6/F7 /0
                if size == 8 {
                    ctx.emit_byte(0xF6);
                    ctx.emit_byte(0xC0 | reg);
                    ctx.emit_byte((value & 0xFF) as u8);
                } else {
                    ctx.emit_byte(0xF7);
                    ctx.emit_byte(0xC0 | reg);
                    ctx.emit_word((value & 0xFFFF) as u16);
                }
                return;
            }
            let ext = alu_imm_ext(mnemonic);
            warn_truncation(ctx, line, value, size);
            if size == 8 {
                ctx.emit_byte(0x80);
                ctx.emit_byte(0xC0 | (ext << 3) | reg);
                ctx.emit_byte((value & 0xFF) as u8);
            } else {
                ctx.emit_byte(0x81);
                ctx.emit_byte(0xC0 | (ext << 3) | reg);
                ctx.emit_word((value & 0xFFFF) as u16);
            }
        }
        (OperandKind::Register { reg, size }, OperandKind::Memory { .. }) => {
            // reg, mem: base+2 (8-bit) / base+3 (16-bit); TEST has no
            // direction bit.
            let mut base = alu_reg_base(mnemonic);
            if mnemonic != "TEST" {
                base += 2;
            }
            if size == 16 {
                base += 1;
            }
            ctx.emit_byte(base);
            ctx.emit_modrm(reg, op2);
        }
        (OperandKind::Memory { .. }, OperandKind::Register { reg, size }) => {
            let mut base = alu_reg_base(mnemonic);
            if size == 16 {
                base += 1;
            }
            ctx.emit_byte(base);
            ctx.emit_modrm(reg, op1);
        }
        (OperandKind::Memory { size, .. }, OperandKind::Immediate { value }) => {
            let op_size = if size == 0 { 16 } else { size };
            warn_default_word(ctx, line, mnemonic, op1);
            if mnemonic == "TEST" {
                ctx.emit_byte(if op_size == 8 { 0xF6 } else { 0xF7 });
                ctx.emit_modrm(0, op1);
            } else {
                ctx.emit_byte(if op_size == 8 { 0x80 } else { 0x81 });
                let ext = alu_imm_ext(mnemonic);
                ctx.emit_modrm(ext, op1);
            }
            if op_size == 8 {
                ctx.emit_byte((value & 0xFF) as u8);
            } else {
                ctx.emit_word((value & 0xFFFF) as u16);
            }
        }
        _ => {}
    }
}

fn encode_unary(ctx: &mut AsmContext, mnemonic: &str, op1: Option<&Operand>) {
    let Some(op1) = op1 else { return };
    let ext = match mnemonic {
        "INC" => 0u8,
        "DEC" => 1,
        "NOT" => 2,
        _ => 3, // NEG
    };

    if let OperandKind::Register { reg, size } = op1.kind {
        // INC/DEC r16 short forms
        if size == 16 && (mnemonic == "INC" || mnemonic == "DEC") {
            let base = if mnemonic == "INC" { 0x40 } else { 0x48 };
            ctx.emit_byte(base + reg);
            return;
        }
    }

    let size = op1.size();
    if mnemonic == "INC" || mnemonic == "DEC" {
        ctx.emit_byte(if size == 8 { 0xFE } else { 0xFF });
    } else {
        ctx.emit_byte(if size == 8 { 0xF6 } else { 0xF7 });
    }

    match op1.kind {
        OperandKind::Register { reg, .. } => ctx.emit_byte(0xC0 | (ext << 3) | reg),
        OperandKind::Memory { .. } => ctx.emit_modrm(ext, op1),
        _ => {}
    }
}

fn encode_muldiv(ctx: &mut AsmContext, mnemonic: &str, op1: Option<&Operand>) {
    let Some(op1) = op1 else { return };
    let ext = match mnemonic {
        "MUL" => 4u8,
        "IMUL" => 5,
        "DIV" => 6,
        _ => 7, // IDIV
    };
    ctx.emit_byte(if op1.size() == 8 { 0xF6 } else { 0xF7 });
    match op1.kind {
        OperandKind::Register { reg, .. } => ctx.emit_byte(0xC0 | (ext << 3) | reg),
        OperandKind::Memory { .. } => ctx.emit_modrm(ext, op1),
        _ => {}
    }
}

fn encode_shift(
    ctx: &mut AsmContext,
    mnemonic: &str,
    op1: Option<&Operand>,
    op2: Option<&Operand>,
    line: u32,
) {
    let Some(op1) = op1 else { return };
    if !op1.is_register() && !op1.is_memory() {
        return;
    }
    let ext = shift_ext(mnemonic);
    let is_mem = op1.is_memory();
    let is_cl = matches!(
        op2.map(|o| o.kind),
        Some(OperandKind::Register { reg: 1, size: 8 })
    );

    if is_mem {
        warn_default_word(ctx, line, mnemonic, op1);
    }
    let op_size = if op1.size() == 0 { 16 } else { op1.size() };

    fn emit_modrm_byte(ctx: &mut AsmContext, ext: u8, op1: &Operand, is_mem: bool) {
        if is_mem {
            ctx.emit_modrm(ext, op1);
        } else {
            ctx.emit_byte(0xC0 | (ext << 3) | op1.reg());
        }
    }

    match op2.map(|o| o.kind) {
        Some(OperandKind::Immediate { value: 1 }) => {
            ctx.emit_byte(if op_size == 8 { 0xD0 } else { 0xD1 });
            emit_modrm_byte(ctx, ext, op1, is_mem);
        }
        Some(OperandKind::Immediate { value }) => {
            // 0xC0/0xC1 immediate-count encodings are 80186+ only.
            if !ctx.pass1 {
                let target = if is_mem {
                    "memory operand".to_string()
                } else {
                    isa::register_name(op1.reg(), op1.size()).to_string()
                };
                ctx.warning(
                    line,
                    format!(
                        "{mnemonic} with immediate count >1 uses 80186+ encoding (0xC0/0xC1)"
                    ),
                    format!(
                        "For strict 8086 compatibility, load the count into CL first: MOV CL, \
                         {value} / {mnemonic} {target}, CL. The immediate form ({mnemonic} \
                         dest, N where N>1) generates an 80186-only opcode."
                    ),
                );
            }
            ctx.emit_byte(if op_size == 8 { 0xC0 } else { 0xC1 });
            emit_modrm_byte(ctx, ext, op1, is_mem);
            ctx.emit_byte((value & 0xFF) as u8);
        }
        _ if is_cl => {
            ctx.emit_byte(if op_size == 8 { 0xD2 } else { 0xD3 });
            emit_modrm_byte(ctx, ext, op1, is_mem);
        }
        _ => {}
    }
}

fn encode_in(ctx: &mut AsmContext, op1: Option<&Operand>, op2: Option<&Operand>, line: u32) {
    let (Some(op1), Some(op2)) = (op1, op2) else {
        return;
    };
    if !(op1.is_register() && op1.reg() == 0) {
        ctx.error(
            line,
            "IN dest must be AL/AX",
            "The destination of IN must be AL (byte) or AX (word). Example: IN AL, 60h",
        );
        return;
    }
    match op2.kind {
        OperandKind::Immediate { value } => {
            ctx.emit_byte(if op1.size() == 8 { 0xE4 } else { 0xE5 });
            ctx.emit_byte((value & 0xFF) as u8);
        }
        OperandKind::Register { reg: 2, size: 16 } => {
            ctx.emit_byte(if op1.size() == 8 { 0xEC } else { 0xED });
        }
        _ => ctx.error(
            line,
            "Invalid IN operands",
            "IN requires: IN AL, imm8 | IN AX, imm8 | IN AL, DX | IN AX, DX",
        ),
    }
}

fn encode_out(ctx: &mut AsmContext, op1: Option<&Operand>, op2: Option<&Operand>, line: u32) {
    let (Some(op1), Some(op2)) = (op1, op2) else {
        return;
    };
    if !(op2.is_register() && op2.reg() == 0) {
        ctx.error(
            line,
            "OUT src must be AL/AX",
            "The source of OUT must be AL (byte) or AX (word). Example: OUT 60h, AL",
        );
        return;
    }
    match op1.kind {
        OperandKind::Immediate { value } => {
            ctx.emit_byte(if op2.size() == 8 { 0xE6 } else { 0xE7 });
            ctx.emit_byte((value & 0xFF) as u8);
        }
        OperandKind::Register { reg: 2, size: 16 } => {
            ctx.emit_byte(if op2.size() == 8 { 0xEE } else { 0xEF });
        }
        _ => ctx.error(
            line,
            "Invalid OUT operands",
            "OUT requires: OUT imm8, AL | OUT imm8, AX | OUT DX, AL | OUT DX, AX",
        ),
    }
}

fn encode_lea(ctx: &mut AsmContext, op1: Option<&Operand>, op2: Option<&Operand>, line: u32) {
    let (Some(op1), Some(op2)) = (op1, op2) else {
        return;
    };
    if op1.is_register() && op2.is_memory() {
        if op1.size() != 16 {
            ctx.error(
                line,
                "LEA requires 16-bit register",
                "LEA only works with 16-bit registers (AX, BX, CX, DX, SI, DI, BP, SP). Use a \
                 16-bit register as the destination.",
            );
            return;
        }
        ctx.emit_byte(0x8D);
        ctx.emit_modrm(op1.reg(), op2);
    } else {
        ctx.error(
            line,
            "Invalid operands for LEA",
            "LEA requires a 16-bit register and a memory operand. Example: LEA DI, [BX+SI+10h]",
        );
    }
}

fn encode_jcc(ctx: &mut AsmContext, mnemonic: &str, opcode: u8, op1: Option<&Operand>, line: u32) {
    let target = op1.map(|o| o.value()).unwrap_or(0);
    // Jcc is 2 bytes; offset from the next instruction.
    let offset = target - (ctx.current_address + 2);

    if !ctx.pass1 && !(-128..=127).contains(&offset) {
        let mut hint = format!("Displacement is {offset} bytes (range: -128 to +127). ");
        match jcc_inversion(mnemonic) {
            Some(inv) => {
                hint.push_str(&format!("Restructure as: {inv} .skip / JMP target / .skip:"));
            }
            None => hint.push_str("Use an inverted condition with a near JMP to reach far targets."),
        }
        ctx.error(
            line,
            format!("Conditional jump out of range ({offset})"),
            hint,
        );
    }

    ctx.emit_byte(opcode);
    ctx.emit_byte((offset & 0xFF) as u8);
}

fn encode_loop(ctx: &mut AsmContext, mnemonic: &str, op1: Option<&Operand>, line: u32) {
    let target = op1.map(|o| o.value()).unwrap_or(0);
    let offset = target - (ctx.current_address + 2);

    if !ctx.pass1 && !(-128..=127).contains(&offset) {
        ctx.error(
            line,
            format!("Loop jump out of range ({offset})"),
            format!(
                "Displacement is {offset} bytes (range: -128 to +127). Replace LOOP with an \
                 explicit decrement and near jump: DEC CX / JNZ target. For LOOPE/LOOPNE, add \
                 the additional flag check before the JNZ."
            ),
        );
    }

    match mnemonic {
        "LOOP" => ctx.emit_byte(0xE2),
        "LOOPE" | "LOOPZ" => ctx.emit_byte(0xE1),
        "LOOPNE" | "LOOPNZ" => ctx.emit_byte(0xE0),
        _ => ctx.emit_byte(0xE3), // JCXZ
    }
    ctx.emit_byte((offset & 0xFF) as u8);
}

fn encode_stack(ctx: &mut AsmContext, mnemonic: &str, op1: Option<&Operand>, line: u32) {
    let Some(op1) = op1 else { return };
    match op1.kind {
        OperandKind::Register { reg, size } => {
            if size != 16 {
                let reg_name = isa::register_name(reg, size);
                let hint = if reg < 4 {
                    format!(
                        "'{reg_name}' is 8-bit. PUSH/POP require 16-bit registers. Use {} \
                         instead.",
                        isa::REG16_NAMES[reg as usize]
                    )
                } else {
                    format!(
                        "'{reg_name}' is 8-bit. PUSH/POP require 16-bit registers (AX, BX, CX, \
                         DX, SI, DI, BP, SP)."
                    )
                };
                ctx.error(line, "Stack ops require 16-bit register", hint);
                return;
            }
            if mnemonic == "PUSH" {
                ctx.emit_byte(0x50 + reg);
            } else {
                ctx.emit_byte(0x58 + reg);
            }
        }
        OperandKind::Memory { .. } => {
            // PUSH r/m16: FF /6, POP r/m16: 8F /0
            if mnemonic == "PUSH" {
                ctx.emit_byte(0xFF);
                ctx.emit_modrm(6, op1);
            } else {
                ctx.emit_byte(0x8F);
                ctx.emit_modrm(0, op1);
            }
        }
        OperandKind::SegmentReg { index } => {
            const PUSH_SEG: [u8; 4] = [0x06, 0x0E, 0x16, 0x1E];
            const POP_SEG: [u8; 4] = [0x07, 0x0F, 0x17, 0x1F];
            if mnemonic == "PUSH" {
                ctx.emit_byte(PUSH_SEG[index as usize]);
            } else {
                if index == 1 {
                    ctx.error(
                        line,
                        "POP CS is not a valid instruction",
                        "POP CS is architecturally invalid on 8086. To change CS, use a far JMP \
                         or far CALL.",
                    );
                    return;
                }
                ctx.emit_byte(POP_SEG[index as usize]);
            }
        }
        OperandKind::Immediate { .. } => ctx.error(
            line,
            "Invalid stack operand",
            "PUSH/POP accept: 16-bit register (AX, BX, etc.), memory (WORD [addr]), or segment \
             register (DS, ES, SS). Immediates and 8-bit registers are not valid.",
        ),
    }
}

fn encode_xchg(ctx: &mut AsmContext, op1: Option<&Operand>, op2: Option<&Operand>) {
    let (Some(op1), Some(op2)) = (op1, op2) else {
        return;
    };
    match (op1.kind, op2.kind) {
        (OperandKind::Register { reg: r1, size: s1 }, OperandKind::Register { reg: r2, size: s2 })
            if s1 == s2 =>
        {
            if s1 == 16 && r1 == 0 {
                ctx.emit_byte(0x90 + r2); // XCHG AX, r16
            } else if s1 == 16 && r2 == 0 {
                ctx.emit_byte(0x90 + r1); // XCHG r16, AX
            } else {
                ctx.emit_byte(if s1 == 8 { 0x86 } else { 0x87 });
                ctx.emit_byte(0xC0 | (r2 << 3) | r1);
            }
        }
        (OperandKind::Register { reg, size }, OperandKind::Memory { .. }) => {
            ctx.emit_byte(if size == 8 { 0x86 } else { 0x87 });
            ctx.emit_modrm(reg, op2);
        }
        (OperandKind::Memory { .. }, OperandKind::Register { reg, size }) => {
            ctx.emit_byte(if size == 8 { 0x86 } else { 0x87 });
            ctx.emit_modrm(reg, op1);
        }
        _ => {}
    }
}
