// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Shared 8086 instruction decoder.
//!
//! One routine turns an opcode byte stream into a structured `DecodedInst`
//! consumed by both the disassembler (display text) and the emulator
//! (structured operands). Every decoded instruction carries both forms so
//! the two stay in lockstep. Decoding fails (returns None) on unknown
//! opcodes, operand bytes running past the buffer, or reserved group
//! extensions.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpKind {
    #[default]
    None,
    Reg8,
    Reg16,
    Sreg,
    Mem,
    Imm8,
    Imm16,
}

/// Structured operand plus its display text.
#[derive(Debug, Clone, Default)]
pub struct DecodedOperand {
    pub kind: OpKind,
    /// Register index (0-7 general, 0-3 segment).
    pub reg: u8,
    /// Memory R/M code, -1 for direct addressing. Meaningful only for Mem.
    pub mem_rm: i8,
    /// Displacement (Mem) or immediate value (Imm8/Imm16).
    pub disp: i32,
    /// Operand width in bits: 8 or 16.
    pub size: u8,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedInst {
    /// Total bytes consumed, prefixes included.
    pub size: usize,
    /// Primary opcode byte (after prefixes).
    pub opcode: u8,
    pub mnemonic: &'static str,
    pub op1: DecodedOperand,
    pub op2: DecodedOperand,
    /// true = 16-bit operation.
    pub wide: bool,
    /// Segment override prefix byte (0x26/0x2E/0x36/0x3E).
    pub seg_override: Option<u8>,
    pub has_rep: bool,
    pub has_repne: bool,
    pub prefix_bytes: usize,
    /// Formatted prefix string: "REP ", "ES: ", ...
    pub prefix_text: String,
    /// Absolute 16-bit target for JMP/CALL/Jcc/LOOP.
    pub jump_target: Option<u16>,
    /// ModR/M reg field when used as an opcode extension.
    pub modrm_ext: Option<u8>,
}

// --- Hex formatting helpers (shared with disassembler and emulator) ---

pub fn hex_byte(b: u8) -> String {
    format!("{b:02X}")
}

pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex_byte(*b))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn hex_imm8(val: u8) -> String {
    format!("0x{val:02X}")
}

pub fn hex_imm16(val: u16) -> String {
    format!("0x{val:04X}")
}

fn disp_str8(val: i32) -> String {
    if val == 0 {
        String::new()
    } else {
        format!("{}0x{:02X}", if val > 0 { "+" } else { "-" }, val.abs())
    }
}

fn disp_str16(val: i32) -> String {
    if val == 0 {
        String::new()
    } else {
        format!("{}0x{:04X}", if val > 0 { "+" } else { "-" }, val.abs())
    }
}

fn read_byte(code: &[u8], offset: usize) -> u8 {
    code.get(offset).copied().unwrap_or(0)
}

fn read_word(code: &[u8], offset: usize) -> u16 {
    read_byte(code, offset) as u16 | ((read_byte(code, offset + 1) as u16) << 8)
}

fn has_bytes(code: &[u8], offset: usize, count: usize) -> bool {
    offset + count <= code.len()
}

// --- ModR/M decoding ---

struct ModRm {
    text: String,
    reg: u8,
    consumed: usize,
    rm: u8,
    mod_bits: u8,
    is_reg: bool,
    disp: i32,
}

fn decode_modrm(code: &[u8], offset: usize, operand_size: u8) -> Option<ModRm> {
    if !has_bytes(code, offset, 1) {
        return None;
    }
    let modrm = read_byte(code, offset);
    let mod_bits = (modrm >> 6) & 3;
    let reg = (modrm >> 3) & 7;
    let rm = modrm & 7;

    if mod_bits == 3 {
        let text = crate::isa::register_name(rm, operand_size).to_string();
        return Some(ModRm {
            text,
            reg,
            consumed: 1,
            rm,
            mod_bits,
            is_reg: true,
            disp: 0,
        });
    }

    let mut text = String::from("[");
    let mut consumed = 1usize;
    let disp;

    if mod_bits == 0 && rm == 6 {
        // Direct address
        if !has_bytes(code, offset + 1, 2) {
            return None;
        }
        let d = read_word(code, offset + 1);
        consumed += 2;
        disp = d as i32;
        text.push_str(&hex_imm16(d));
    } else {
        text.push_str(crate::assembler::operand::rm_base_name(rm as i8));
        match mod_bits {
            1 => {
                if !has_bytes(code, offset + consumed, 1) {
                    return None;
                }
                let d = read_byte(code, offset + consumed) as i8;
                consumed += 1;
                disp = d as i32;
                text.push_str(&disp_str8(disp));
            }
            2 => {
                if !has_bytes(code, offset + consumed, 2) {
                    return None;
                }
                let d = read_word(code, offset + consumed) as i16;
                consumed += 2;
                disp = d as i32;
                text.push_str(&disp_str16(disp));
            }
            _ => disp = 0,
        }
    }

    text.push(']');
    Some(ModRm {
        text,
        reg,
        consumed,
        rm,
        mod_bits,
        is_reg: false,
        disp,
    })
}

// --- Operand construction helpers ---

fn make_reg8(reg: u8) -> DecodedOperand {
    DecodedOperand {
        kind: OpKind::Reg8,
        reg: reg & 7,
        mem_rm: -1,
        size: 8,
        text: crate::isa::REG8_NAMES[(reg & 7) as usize].to_string(),
        ..Default::default()
    }
}

fn make_reg16(reg: u8) -> DecodedOperand {
    DecodedOperand {
        kind: OpKind::Reg16,
        reg: reg & 7,
        mem_rm: -1,
        size: 16,
        text: crate::isa::REG16_NAMES[(reg & 7) as usize].to_string(),
        ..Default::default()
    }
}

fn make_sreg(reg: u8) -> DecodedOperand {
    DecodedOperand {
        kind: OpKind::Sreg,
        reg,
        mem_rm: -1,
        size: 16,
        text: crate::isa::SREG_NAMES
            .get(reg as usize)
            .copied()
            .unwrap_or("???")
            .to_string(),
        ..Default::default()
    }
}

fn make_imm8(val: u8) -> DecodedOperand {
    DecodedOperand {
        kind: OpKind::Imm8,
        mem_rm: -1,
        disp: val as i32,
        size: 8,
        text: hex_imm8(val),
        ..Default::default()
    }
}

fn make_imm16(val: u16) -> DecodedOperand {
    DecodedOperand {
        kind: OpKind::Imm16,
        mem_rm: -1,
        disp: val as i32,
        size: 16,
        text: hex_imm16(val),
        ..Default::default()
    }
}

fn make_direct_mem(addr: u16, size: u8) -> DecodedOperand {
    DecodedOperand {
        kind: OpKind::Mem,
        mem_rm: -1,
        disp: addr as i32,
        size,
        text: format!("[{}]", hex_imm16(addr)),
        ..Default::default()
    }
}

fn modrm_to_operand(m: &ModRm, operand_size: u8) -> DecodedOperand {
    if m.is_reg {
        DecodedOperand {
            kind: if operand_size == 8 {
                OpKind::Reg8
            } else {
                OpKind::Reg16
            },
            reg: m.rm,
            mem_rm: -1,
            disp: m.disp,
            size: operand_size,
            text: m.text.clone(),
        }
    } else {
        DecodedOperand {
            kind: OpKind::Mem,
            reg: 0,
            mem_rm: if m.mod_bits == 0 && m.rm == 6 {
                -1
            } else {
                m.rm as i8
            },
            disp: m.disp,
            size: operand_size,
            text: m.text.clone(),
        }
    }
}

fn reg_from_field(reg: u8, size: u8) -> DecodedOperand {
    if size == 8 {
        make_reg8(reg)
    } else {
        make_reg16(reg)
    }
}

/// Prepend "BYTE " / "WORD " to a memory operand's display text, used where
/// the register operand does not disambiguate the width.
fn add_size_prefix(op: &mut DecodedOperand) {
    if op.kind == OpKind::Mem {
        op.text = format!("{} {}", if op.size == 8 { "BYTE" } else { "WORD" }, op.text);
    }
}

/// Render an instruction the way the disassembler prints it.
pub fn format_instruction(inst: &DecodedInst) -> String {
    let mut out = String::new();
    let _ = write!(out, "{}{}", inst.prefix_text, inst.mnemonic);
    if inst.op1.kind != OpKind::None {
        let _ = write!(out, " {}", inst.op1.text);
        if inst.op2.kind != OpKind::None {
            let _ = write!(out, ", {}", inst.op2.text);
        }
    }
    out
}

const ALU_MNEMONICS: [&str; 8] = ["ADD", "OR", "ADC", "SBB", "AND", "SUB", "XOR", "CMP"];

/// Decode one instruction at `offset`. Returns None when the bytes do not
/// form a complete, recognized instruction.
pub fn decode_instruction(code: &[u8], offset: usize) -> Option<DecodedInst> {
    if offset >= code.len() {
        return None;
    }

    let mut inst = DecodedInst::default();
    let mut current = offset;

    // Prefixes: REP/REPNE and segment overrides, in any order.
    while has_bytes(code, current, 1) {
        match read_byte(code, current) {
            0xF2 => {
                inst.has_repne = true;
                inst.prefix_text.push_str("REPNE ");
            }
            0xF3 => {
                inst.has_rep = true;
                inst.prefix_text.push_str("REP ");
            }
            b @ (0x26 | 0x2E | 0x36 | 0x3E) => {
                inst.seg_override = Some(b);
                let name = match b {
                    0x26 => "ES: ",
                    0x2E => "CS: ",
                    0x36 => "SS: ",
                    _ => "DS: ",
                };
                inst.prefix_text.push_str(name);
            }
            _ => break,
        }
        inst.prefix_bytes += 1;
        current += 1;
    }

    if !has_bytes(code, current, 1) {
        return None;
    }
    inst.opcode = read_byte(code, current);
    current += 1;
    let opcode = inst.opcode;
    let pfx = inst.prefix_bytes;

    match opcode {
        // MOV r/m, r and MOV r, r/m (88/89/8A/8B)
        0x88 | 0x89 | 0x8A | 0x8B => {
            inst.wide = opcode & 1 != 0;
            let size = if inst.wide { 16 } else { 8 };
            let m = decode_modrm(code, current, size)?;
            inst.mnemonic = "MOV";
            if opcode & 2 != 0 {
                inst.op1 = reg_from_field(m.reg, size);
                inst.op2 = modrm_to_operand(&m, size);
            } else {
                inst.op1 = modrm_to_operand(&m, size);
                inst.op2 = reg_from_field(m.reg, size);
            }
            inst.size = pfx + 1 + m.consumed;
        }
        // MOV r/m16, Sreg / MOV Sreg, r/m16
        0x8C | 0x8E => {
            let m = decode_modrm(code, current, 16)?;
            inst.mnemonic = "MOV";
            inst.wide = true;
            if opcode == 0x8C {
                inst.op1 = modrm_to_operand(&m, 16);
                inst.op2 = make_sreg(m.reg);
            } else {
                inst.op1 = make_sreg(m.reg);
                inst.op2 = modrm_to_operand(&m, 16);
            }
            inst.size = pfx + 1 + m.consumed;
        }
        // MOV r8, imm8
        0xB0..=0xB7 => {
            if !has_bytes(code, current, 1) {
                return None;
            }
            inst.mnemonic = "MOV";
            inst.op1 = make_reg8(opcode & 7);
            inst.op2 = make_imm8(read_byte(code, current));
            inst.size = pfx + 2;
        }
        // MOV r16, imm16
        0xB8..=0xBF => {
            if !has_bytes(code, current, 2) {
                return None;
            }
            inst.mnemonic = "MOV";
            inst.wide = true;
            inst.op1 = make_reg16(opcode & 7);
            inst.op2 = make_imm16(read_word(code, current));
            inst.size = pfx + 3;
        }
        // MOV r/m, imm (C6 /0, C7 /0)
        0xC6 | 0xC7 => {
            inst.wide = opcode == 0xC7;
            let size = if inst.wide { 16 } else { 8 };
            let m = decode_modrm(code, current, size)?;
            if m.reg != 0 {
                return None;
            }
            let imm_len = if inst.wide { 2 } else { 1 };
            if !has_bytes(code, current + m.consumed, imm_len) {
                return None;
            }
            inst.mnemonic = "MOV";
            inst.modrm_ext = Some(0);
            inst.op1 = modrm_to_operand(&m, size);
            add_size_prefix(&mut inst.op1);
            inst.op2 = if inst.wide {
                make_imm16(read_word(code, current + m.consumed))
            } else {
                make_imm8(read_byte(code, current + m.consumed))
            };
            inst.size = pfx + 1 + m.consumed + imm_len;
        }
        // Segment register PUSH/POP (checked before the ALU ranges; the low
        // bits 110/111 keep them disjoint from the guarded arms below)
        0x06 | 0x0E | 0x16 | 0x1E => {
            inst.mnemonic = "PUSH";
            inst.op1 = make_sreg((opcode >> 3) & 3);
            inst.size = pfx + 1;
        }
        0x07 | 0x17 | 0x1F => {
            inst.mnemonic = "POP";
            inst.op1 = make_sreg((opcode >> 3) & 3);
            inst.size = pfx + 1;
        }
        // ALU r/m forms: 00-3B where bit 2 clear
        op if op < 0x40 && op & 4 == 0 => {
            inst.mnemonic = ALU_MNEMONICS[((op >> 3) & 7) as usize];
            inst.wide = op & 1 != 0;
            let size = if inst.wide { 16 } else { 8 };
            let m = decode_modrm(code, current, size)?;
            if op & 2 != 0 {
                inst.op1 = reg_from_field(m.reg, size);
                inst.op2 = modrm_to_operand(&m, size);
            } else {
                inst.op1 = modrm_to_operand(&m, size);
                inst.op2 = reg_from_field(m.reg, size);
            }
            inst.size = pfx + 1 + m.consumed;
        }
        // ALU accumulator-immediate forms: 04/05, 0C/0D, ... 3C/3D
        op if op < 0x40 && op & 6 == 4 => {
            inst.mnemonic = ALU_MNEMONICS[((op >> 3) & 7) as usize];
            inst.wide = op & 1 != 0;
            let imm_len = if inst.wide { 2 } else { 1 };
            if !has_bytes(code, current, imm_len) {
                return None;
            }
            inst.op1 = if inst.wide { make_reg16(0) } else { make_reg8(0) };
            inst.op2 = if inst.wide {
                make_imm16(read_word(code, current))
            } else {
                make_imm8(read_byte(code, current))
            };
            inst.size = pfx + 1 + imm_len;
        }
        // ALU immediate group: 80/81/82/83
        0x80..=0x83 => {
            let is_word = opcode == 0x81 || opcode == 0x83;
            let sign_ext = opcode == 0x83;
            let size = if is_word { 16 } else { 8 };
            let m = decode_modrm(code, current, size)?;
            inst.mnemonic = ALU_MNEMONICS[m.reg as usize];
            inst.wide = is_word;
            inst.modrm_ext = Some(m.reg);
            inst.op1 = modrm_to_operand(&m, size);
            add_size_prefix(&mut inst.op1);

            let imm_len = if is_word && !sign_ext { 2 } else { 1 };
            if !has_bytes(code, current + m.consumed, imm_len) {
                return None;
            }
            let mut imm = if imm_len == 1 {
                read_byte(code, current + m.consumed) as i32
            } else {
                read_word(code, current + m.consumed) as i32
            };
            if sign_ext {
                imm = (imm as u8 as i8) as i16 as i32;
            }
            inst.op2 = if is_word {
                make_imm16((imm & 0xFFFF) as u16)
            } else {
                make_imm8((imm & 0xFF) as u8)
            };
            inst.size = pfx + 1 + m.consumed + imm_len;
        }
        // TEST r/m, r
        0x84 | 0x85 => {
            inst.wide = opcode == 0x85;
            let size = if inst.wide { 16 } else { 8 };
            let m = decode_modrm(code, current, size)?;
            inst.mnemonic = "TEST";
            inst.op1 = modrm_to_operand(&m, size);
            inst.op2 = reg_from_field(m.reg, size);
            inst.size = pfx + 1 + m.consumed;
        }
        // XCHG r/m, r
        0x86 | 0x87 => {
            inst.wide = opcode == 0x87;
            let size = if inst.wide { 16 } else { 8 };
            let m = decode_modrm(code, current, size)?;
            inst.mnemonic = "XCHG";
            inst.op1 = modrm_to_operand(&m, size);
            inst.op2 = reg_from_field(m.reg, size);
            inst.size = pfx + 1 + m.consumed;
        }
        // Group 3: F6/F7 (TEST/NOT/NEG/MUL/IMUL/DIV/IDIV)
        0xF6 | 0xF7 => {
            inst.wide = opcode == 0xF7;
            let size = if inst.wide { 16 } else { 8 };
            let m = decode_modrm(code, current, size)?;
            inst.modrm_ext = Some(m.reg);
            match m.reg {
                0 => {
                    let imm_len = if inst.wide { 2 } else { 1 };
                    if !has_bytes(code, current + m.consumed, imm_len) {
                        return None;
                    }
                    inst.mnemonic = "TEST";
                    inst.op1 = modrm_to_operand(&m, size);
                    add_size_prefix(&mut inst.op1);
                    inst.op2 = if inst.wide {
                        make_imm16(read_word(code, current + m.consumed))
                    } else {
                        make_imm8(read_byte(code, current + m.consumed))
                    };
                    inst.size = pfx + 1 + m.consumed + imm_len;
                }
                1 => return None, // reserved extension
                ext => {
                    const NAMES: [&str; 8] =
                        ["", "", "NOT", "NEG", "MUL", "IMUL", "DIV", "IDIV"];
                    inst.mnemonic = NAMES[ext as usize];
                    inst.op1 = modrm_to_operand(&m, size);
                    add_size_prefix(&mut inst.op1);
                    inst.size = pfx + 1 + m.consumed;
                }
            }
        }
        // Group 4: FE (INC/DEC r/m8)
        0xFE => {
            let m = decode_modrm(code, current, 8)?;
            if m.reg > 1 {
                return None;
            }
            inst.mnemonic = if m.reg == 0 { "INC" } else { "DEC" };
            inst.modrm_ext = Some(m.reg);
            inst.op1 = modrm_to_operand(&m, 8);
            add_size_prefix(&mut inst.op1);
            inst.size = pfx + 1 + m.consumed;
        }
        // Group 5: FF
        0xFF => {
            let m = decode_modrm(code, current, 16)?;
            inst.modrm_ext = Some(m.reg);
            inst.mnemonic = match m.reg {
                0 => "INC",
                1 => "DEC",
                2 => "CALL",
                3 => "CALL FAR",
                4 => "JMP",
                5 => "JMP FAR",
                6 => "PUSH",
                _ => return None,
            };
            inst.wide = true;
            inst.op1 = modrm_to_operand(&m, 16);
            if inst.op1.kind == OpKind::Mem && m.reg < 2 {
                add_size_prefix(&mut inst.op1);
            }
            inst.size = pfx + 1 + m.consumed;
        }
        // Short-form INC/DEC/PUSH/POP r16
        0x40..=0x47 => {
            inst.mnemonic = "INC";
            inst.wide = true;
            inst.op1 = make_reg16(opcode & 7);
            inst.size = pfx + 1;
        }
        0x48..=0x4F => {
            inst.mnemonic = "DEC";
            inst.wide = true;
            inst.op1 = make_reg16(opcode & 7);
            inst.size = pfx + 1;
        }
        0x50..=0x57 => {
            inst.mnemonic = "PUSH";
            inst.wide = true;
            inst.op1 = make_reg16(opcode & 7);
            inst.size = pfx + 1;
        }
        0x58..=0x5F => {
            inst.mnemonic = "POP";
            inst.wide = true;
            inst.op1 = make_reg16(opcode & 7);
            inst.size = pfx + 1;
        }
        // POP r/m16
        0x8F => {
            let m = decode_modrm(code, current, 16)?;
            if m.reg != 0 {
                return None;
            }
            inst.mnemonic = "POP";
            inst.wide = true;
            inst.modrm_ext = Some(0);
            inst.op1 = modrm_to_operand(&m, 16);
            inst.size = pfx + 1 + m.consumed;
        }
        // Shifts/rotates by 1 or CL
        0xD0..=0xD3 => {
            inst.wide = opcode & 1 != 0;
            let by_cl = opcode & 2 != 0;
            let size = if inst.wide { 16 } else { 8 };
            let m = decode_modrm(code, current, size)?;
            inst.modrm_ext = Some(m.reg);
            const NAMES: [&str; 8] = ["ROL", "ROR", "RCL", "RCR", "SHL", "SHR", "", "SAR"];
            if m.reg == 6 {
                return None;
            }
            inst.mnemonic = NAMES[m.reg as usize];
            inst.op1 = modrm_to_operand(&m, size);
            inst.op2 = if by_cl {
                make_reg8(1)
            } else {
                let mut one = make_imm8(1);
                one.text = "1".to_string(); // shift-by-one displays bare
                one
            };
            inst.size = pfx + 1 + m.consumed;
        }
        // Shifts/rotates by imm8 (80186+)
        0xC0 | 0xC1 => {
            inst.wide = opcode & 1 != 0;
            let size = if inst.wide { 16 } else { 8 };
            let m = decode_modrm(code, current, size)?;
            if !has_bytes(code, current + m.consumed, 1) {
                return None;
            }
            inst.modrm_ext = Some(m.reg);
            const NAMES: [&str; 8] = ["ROL", "ROR", "", "", "SHL", "SHR", "", ""];
            let name = NAMES[m.reg as usize];
            if name.is_empty() {
                return None;
            }
            inst.mnemonic = name;
            inst.op1 = modrm_to_operand(&m, size);
            inst.op2 = make_imm8(read_byte(code, current + m.consumed));
            inst.size = pfx + 1 + m.consumed + 1;
        }
        // JMP rel16 / CALL rel16 / RET
        0xE9 | 0xE8 => {
            if !has_bytes(code, current, 2) {
                return None;
            }
            let rel = read_word(code, current) as i16;
            let target = ((offset as i32 + 3 + pfx as i32 + rel as i32) & 0xFFFF) as u16;
            inst.jump_target = Some(target);
            inst.mnemonic = if opcode == 0xE9 { "JMP" } else { "CALL" };
            inst.op1 = make_imm16(target);
            inst.size = pfx + 3;
        }
        0xC3 => {
            inst.mnemonic = "RET";
            inst.size = pfx + 1;
        }
        // Conditional jumps, all short rel8
        0x70..=0x7F => {
            if !has_bytes(code, current, 1) {
                return None;
            }
            let rel = read_byte(code, current) as i8;
            let target = ((offset as i32 + 2 + pfx as i32 + rel as i32) & 0xFFFF) as u16;
            const NAMES: [&str; 16] = [
                "JO", "JNO", "JB", "JNB", "JZ", "JNZ", "JBE", "JA", "JS", "JNS", "JP", "JNP",
                "JL", "JGE", "JLE", "JG",
            ];
            inst.jump_target = Some(target);
            inst.mnemonic = NAMES[(opcode - 0x70) as usize];
            inst.op1 = make_imm16(target);
            inst.size = pfx + 2;
        }
        // LOOP family and JCXZ, short rel8
        0xE0..=0xE3 => {
            if !has_bytes(code, current, 1) {
                return None;
            }
            let rel = read_byte(code, current) as i8;
            let target = ((offset as i32 + 2 + pfx as i32 + rel as i32) & 0xFFFF) as u16;
            inst.jump_target = Some(target);
            inst.mnemonic = match opcode {
                0xE2 => "LOOP",
                0xE1 => "LOOPE",
                0xE0 => "LOOPNE",
                _ => "JCXZ",
            };
            inst.op1 = make_imm16(target);
            inst.size = pfx + 2;
        }
        // IN/OUT fixed port
        0xE4..=0xE7 => {
            if !has_bytes(code, current, 1) {
                return None;
            }
            inst.wide = opcode & 1 != 0;
            let acc = if inst.wide { make_reg16(0) } else { make_reg8(0) };
            let port = make_imm8(read_byte(code, current));
            if opcode < 0xE6 {
                inst.mnemonic = "IN";
                inst.op1 = acc;
                inst.op2 = port;
            } else {
                inst.mnemonic = "OUT";
                inst.op1 = port;
                inst.op2 = acc;
            }
            inst.size = pfx + 2;
        }
        // IN/OUT variable port (DX)
        0xEC..=0xEF => {
            inst.wide = opcode & 1 != 0;
            let acc = if inst.wide { make_reg16(0) } else { make_reg8(0) };
            let dx = make_reg16(2);
            if opcode < 0xEE {
                inst.mnemonic = "IN";
                inst.op1 = acc;
                inst.op2 = dx;
            } else {
                inst.mnemonic = "OUT";
                inst.op1 = dx;
                inst.op2 = acc;
            }
            inst.size = pfx + 1;
        }
        // LEA r16, mem
        0x8D => {
            let m = decode_modrm(code, current, 16)?;
            if m.is_reg {
                return None;
            }
            inst.mnemonic = "LEA";
            inst.wide = true;
            inst.op1 = make_reg16(m.reg);
            inst.op2 = modrm_to_operand(&m, 16);
            inst.size = pfx + 1 + m.consumed;
        }
        // INT imm8
        0xCD => {
            if !has_bytes(code, current, 1) {
                return None;
            }
            inst.mnemonic = "INT";
            inst.op1 = make_imm8(read_byte(code, current));
            inst.size = pfx + 2;
        }
        // String primitives
        0xA4 => one_byte(&mut inst, "MOVSB", pfx),
        0xA5 => one_byte(&mut inst, "MOVSW", pfx),
        0xA6 => one_byte(&mut inst, "CMPSB", pfx),
        0xA7 => one_byte(&mut inst, "CMPSW", pfx),
        0xAA => one_byte(&mut inst, "STOSB", pfx),
        0xAB => one_byte(&mut inst, "STOSW", pfx),
        0xAC => one_byte(&mut inst, "LODSB", pfx),
        0xAD => one_byte(&mut inst, "LODSW", pfx),
        0xAE => one_byte(&mut inst, "SCASB", pfx),
        0xAF => one_byte(&mut inst, "SCASW", pfx),
        // Flag operations
        0xFC => one_byte(&mut inst, "CLD", pfx),
        0xFD => one_byte(&mut inst, "STD", pfx),
        0xFA => one_byte(&mut inst, "CLI", pfx),
        0xFB => one_byte(&mut inst, "STI", pfx),
        0xF5 => one_byte(&mut inst, "CMC", pfx),
        0xF8 => one_byte(&mut inst, "CLC", pfx),
        0xF9 => one_byte(&mut inst, "STC", pfx),
        // NOP is XCHG AX, AX
        0x90 => one_byte(&mut inst, "NOP", pfx),
        // XCHG AX, r16 short forms (not emitted by the assembler for AX,AX)
        0x91..=0x97 => {
            inst.mnemonic = "XCHG";
            inst.wide = true;
            inst.op1 = make_reg16(0);
            inst.op2 = make_reg16(opcode & 7);
            inst.size = pfx + 1;
        }
        0x98 => one_byte(&mut inst, "CBW", pfx),
        0x99 => one_byte(&mut inst, "CWD", pfx),
        0x9F => one_byte(&mut inst, "LAHF", pfx),
        0x9E => one_byte(&mut inst, "SAHF", pfx),
        // JMP short rel8
        0xEB => {
            if !has_bytes(code, current, 1) {
                return None;
            }
            let rel = read_byte(code, current) as i8;
            let target = ((offset as i32 + 2 + pfx as i32 + rel as i32) & 0xFFFF) as u16;
            inst.jump_target = Some(target);
            inst.mnemonic = "JMP";
            inst.op1 = make_imm16(target);
            inst.size = pfx + 2;
        }
        0x9C => one_byte(&mut inst, "PUSHF", pfx),
        0x9D => one_byte(&mut inst, "POPF", pfx),
        0xD7 => one_byte(&mut inst, "XLAT", pfx),
        0xF4 => one_byte(&mut inst, "HLT", pfx),
        0x60 => one_byte(&mut inst, "PUSHA", pfx),
        0x61 => one_byte(&mut inst, "POPA", pfx),
        // MOV accumulator <-> direct address (A0-A3)
        0xA0..=0xA3 => {
            if !has_bytes(code, current, 2) {
                return None;
            }
            let addr = read_word(code, current);
            inst.mnemonic = "MOV";
            inst.wide = opcode & 1 != 0;
            let size = if inst.wide { 16 } else { 8 };
            let acc = if inst.wide { make_reg16(0) } else { make_reg8(0) };
            let mem = make_direct_mem(addr, size);
            if opcode < 0xA2 {
                inst.op1 = acc;
                inst.op2 = mem;
            } else {
                inst.op1 = mem;
                inst.op2 = acc;
            }
            inst.size = pfx + 3;
        }
        // TEST accumulator, immediate
        0xA8 => {
            if !has_bytes(code, current, 1) {
                return None;
            }
            inst.mnemonic = "TEST";
            inst.op1 = make_reg8(0);
            inst.op2 = make_imm8(read_byte(code, current));
            inst.size = pfx + 2;
        }
        0xA9 => {
            if !has_bytes(code, current, 2) {
                return None;
            }
            inst.mnemonic = "TEST";
            inst.wide = true;
            inst.op1 = make_reg16(0);
            inst.op2 = make_imm16(read_word(code, current));
            inst.size = pfx + 3;
        }
        _ => return None,
    }

    Some(inst)
}

fn one_byte(inst: &mut DecodedInst, mnemonic: &'static str, pfx: usize) {
    inst.mnemonic = mnemonic;
    inst.size = pfx + 1;
}
