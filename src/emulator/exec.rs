// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Instruction execution: operand plumbing, ALU flag semantics, string
//! primitives and control flow. One call executes one decoded instruction;
//! IP has already been advanced past it, so branches simply overwrite IP.

use crate::decoder::{format_instruction, DecodedInst, DecodedOperand, OpKind};

use super::cpu::{self, Cpu};
use super::interrupts::handle_interrupt;
use super::memory::Memory;
use super::vram::VramState;
use super::{record_skip, EmulatorResult, IoCapture};

/// Segment to use for a memory operand: explicit override first, SS for
/// BP-based addressing, DS otherwise.
pub(super) fn resolve_segment(cpu: &Cpu, op: &DecodedOperand, seg_override: Option<u8>) -> u16 {
    if let Some(prefix) = seg_override {
        return match prefix {
            0x26 => cpu.sregs[cpu::ES],
            0x2E => cpu.sregs[cpu::CS],
            0x36 => cpu.sregs[cpu::SS],
            _ => cpu.sregs[cpu::DS],
        };
    }
    if matches!(op.mem_rm, 2 | 3 | 6) {
        return cpu.sregs[cpu::SS];
    }
    cpu.sregs[cpu::DS]
}

pub(super) fn effective_address(cpu: &Cpu, op: &DecodedOperand) -> u16 {
    let base: i32 = match op.mem_rm {
        -1 => return (op.disp & 0xFFFF) as u16,
        0 => cpu.regs[cpu::BX] as i32 + cpu.regs[cpu::SI] as i32,
        1 => cpu.regs[cpu::BX] as i32 + cpu.regs[cpu::DI] as i32,
        2 => cpu.regs[cpu::BP] as i32 + cpu.regs[cpu::SI] as i32,
        3 => cpu.regs[cpu::BP] as i32 + cpu.regs[cpu::DI] as i32,
        4 => cpu.regs[cpu::SI] as i32,
        5 => cpu.regs[cpu::DI] as i32,
        6 => cpu.regs[cpu::BP] as i32,
        _ => cpu.regs[cpu::BX] as i32,
    };
    ((base + op.disp) & 0xFFFF) as u16
}

pub(super) fn read_operand(
    cpu: &Cpu,
    mem: &Memory,
    op: &DecodedOperand,
    seg_override: Option<u8>,
) -> u16 {
    match op.kind {
        OpKind::Reg8 => cpu.reg8(op.reg) as u16,
        OpKind::Reg16 => cpu.regs[op.reg as usize],
        // reg field may carry 4-7 from a malformed ModR/M; alias onto 0-3
        OpKind::Sreg => cpu.sregs[(op.reg & 3) as usize],
        OpKind::Imm8 => (op.disp & 0xFF) as u16,
        OpKind::Imm16 => (op.disp & 0xFFFF) as u16,
        OpKind::Mem => {
            let addr = effective_address(cpu, op);
            let seg = resolve_segment(cpu, op, seg_override);
            if op.size == 8 {
                mem.sread8(seg, addr) as u16
            } else {
                mem.sread16(seg, addr)
            }
        }
        OpKind::None => 0,
    }
}

pub(super) fn write_operand(
    cpu: &mut Cpu,
    mem: &mut Memory,
    op: &DecodedOperand,
    val: u16,
    seg_override: Option<u8>,
) {
    match op.kind {
        OpKind::Reg8 => cpu.set_reg8(op.reg, (val & 0xFF) as u8),
        OpKind::Reg16 => cpu.regs[op.reg as usize] = val,
        OpKind::Sreg => cpu.sregs[(op.reg & 3) as usize] = val,
        OpKind::Mem => {
            let addr = effective_address(cpu, op);
            let seg = resolve_segment(cpu, op, seg_override);
            if op.size == 8 {
                mem.swrite8(seg, addr, (val & 0xFF) as u8);
            } else {
                mem.swrite16(seg, addr, val);
            }
        }
        _ => {}
    }
}

pub(super) fn parity8(val: u8) -> bool {
    val.count_ones() % 2 == 0
}

/// Flags after an addition: CF is carry-out of the operand width, AF the
/// bit-4 carry, OF signed overflow.
pub(super) fn update_flags_add(cpu: &mut Cpu, result: u32, dst: u16, src: u16, wide: bool) {
    let mask: u32 = if wide { 0xFFFF } else { 0xFF };
    let sign_bit: u32 = if wide { 0x8000 } else { 0x80 };
    let res = (result & mask) as u16;
    cpu.set_flag(cpu::CF, result > mask);
    cpu.set_flag(cpu::ZF, res == 0);
    cpu.set_flag(cpu::SF, res as u32 & sign_bit != 0);
    cpu.set_flag(
        cpu::OF,
        ((dst as u32 ^ res as u32) & (src as u32 ^ res as u32) & sign_bit) != 0,
    );
    cpu.set_flag(cpu::PF, parity8((res & 0xFF) as u8));
    cpu.set_flag(cpu::AF, ((dst ^ src ^ res) & 0x10) != 0);
}

/// Flags after a subtraction: CF is the borrow.
pub(super) fn update_flags_sub(cpu: &mut Cpu, result: u32, dst: u16, src: u16, wide: bool) {
    let mask: u32 = if wide { 0xFFFF } else { 0xFF };
    let sign_bit: u32 = if wide { 0x8000 } else { 0x80 };
    let res = (result & mask) as u16;
    cpu.set_flag(cpu::CF, dst < src);
    cpu.set_flag(cpu::ZF, res == 0);
    cpu.set_flag(cpu::SF, res as u32 & sign_bit != 0);
    cpu.set_flag(
        cpu::OF,
        ((dst as u32 ^ src as u32) & (dst as u32 ^ res as u32) & sign_bit) != 0,
    );
    cpu.set_flag(cpu::PF, parity8((res & 0xFF) as u8));
    cpu.set_flag(cpu::AF, ((dst ^ src ^ res) & 0x10) != 0);
}

/// Flags after AND/OR/XOR/TEST: CF and OF clear, AF cleared (undefined on
/// hardware), ZF/SF/PF from the result.
pub(super) fn update_flags_logic(cpu: &mut Cpu, result: u16, wide: bool) {
    let sign_bit: u32 = if wide { 0x8000 } else { 0x80 };
    cpu.set_flag(cpu::CF, false);
    cpu.set_flag(cpu::OF, false);
    cpu.set_flag(cpu::ZF, result == 0);
    cpu.set_flag(cpu::SF, result as u32 & sign_bit != 0);
    cpu.set_flag(cpu::PF, parity8((result & 0xFF) as u8));
    cpu.set_flag(cpu::AF, false);
}

pub(super) fn eval_condition(cpu: &Cpu, mnemonic: &str) -> bool {
    match mnemonic {
        "JO" => cpu.flag(cpu::OF),
        "JNO" => !cpu.flag(cpu::OF),
        "JB" => cpu.flag(cpu::CF),
        "JNB" => !cpu.flag(cpu::CF),
        "JZ" => cpu.flag(cpu::ZF),
        "JNZ" => !cpu.flag(cpu::ZF),
        "JBE" => cpu.flag(cpu::CF) || cpu.flag(cpu::ZF),
        "JA" => !cpu.flag(cpu::CF) && !cpu.flag(cpu::ZF),
        "JS" => cpu.flag(cpu::SF),
        "JNS" => !cpu.flag(cpu::SF),
        "JP" => cpu.flag(cpu::PF),
        "JNP" => !cpu.flag(cpu::PF),
        "JL" => cpu.flag(cpu::SF) != cpu.flag(cpu::OF),
        "JGE" => cpu.flag(cpu::SF) == cpu.flag(cpu::OF),
        "JLE" => cpu.flag(cpu::ZF) || (cpu.flag(cpu::SF) != cpu.flag(cpu::OF)),
        "JG" => !cpu.flag(cpu::ZF) && (cpu.flag(cpu::SF) == cpu.flag(cpu::OF)),
        _ => false,
    }
}

pub(super) fn execute_instruction(
    cpu: &mut Cpu,
    mem: &mut Memory,
    io: &mut IoCapture,
    vram: &mut VramState,
    inst: &DecodedInst,
    result: &mut EmulatorResult,
) {
    let mn = inst.mnemonic;
    let seg = inst.seg_override;

    match mn {
        "ADD" | "ADC" | "SUB" | "SBB" | "CMP" | "AND" | "OR" | "XOR" | "TEST" => {
            let a = read_operand(cpu, mem, &inst.op1, seg);
            let b = read_operand(cpu, mem, &inst.op2, seg);
            let wide = inst.wide;
            let mask: u32 = if wide { 0xFFFF } else { 0xFF };
            match mn {
                "ADD" => {
                    let res = a as u32 + b as u32;
                    update_flags_add(cpu, res, a, b, wide);
                    write_operand(cpu, mem, &inst.op1, (res & mask) as u16, seg);
                }
                "ADC" => {
                    let cf = cpu.flag(cpu::CF) as u32;
                    let res = a as u32 + b as u32 + cf;
                    update_flags_add(cpu, res, a, b.wrapping_add(cf as u16), wide);
                    write_operand(cpu, mem, &inst.op1, (res & mask) as u16, seg);
                }
                "SUB" => {
                    let res = (a as u32).wrapping_sub(b as u32);
                    update_flags_sub(cpu, res, a, b, wide);
                    write_operand(cpu, mem, &inst.op1, (res & mask) as u16, seg);
                }
                "SBB" => {
                    let cf = cpu.flag(cpu::CF) as u32;
                    let res = (a as u32).wrapping_sub(b as u32).wrapping_sub(cf);
                    update_flags_sub(cpu, res, a, b.wrapping_add(cf as u16), wide);
                    write_operand(cpu, mem, &inst.op1, (res & mask) as u16, seg);
                }
                "CMP" => {
                    let res = (a as u32).wrapping_sub(b as u32);
                    update_flags_sub(cpu, res, a, b, wide);
                }
                "AND" | "TEST" => {
                    let res = a & b;
                    update_flags_logic(cpu, res, wide);
                    if mn == "AND" {
                        write_operand(cpu, mem, &inst.op1, res, seg);
                    }
                }
                "OR" => {
                    let res = a | b;
                    update_flags_logic(cpu, res, wide);
                    write_operand(cpu, mem, &inst.op1, res, seg);
                }
                _ => {
                    let res = a ^ b;
                    update_flags_logic(cpu, res, wide);
                    write_operand(cpu, mem, &inst.op1, res, seg);
                }
            }
        }

        // INC/DEC preserve CF
        "INC" | "DEC" => {
            let val = read_operand(cpu, mem, &inst.op1, seg);
            let wide = inst.wide;
            let mask: u32 = if wide { 0xFFFF } else { 0xFF };
            let saved_cf = cpu.flag(cpu::CF);
            let res = if mn == "INC" {
                let res = val as u32 + 1;
                update_flags_add(cpu, res, val, 1, wide);
                res
            } else {
                let res = (val as u32).wrapping_sub(1);
                update_flags_sub(cpu, res, val, 1, wide);
                res
            };
            write_operand(cpu, mem, &inst.op1, (res & mask) as u16, seg);
            cpu.set_flag(cpu::CF, saved_cf);
        }

        "NOT" => {
            let val = read_operand(cpu, mem, &inst.op1, seg);
            let mask: u16 = if inst.wide { 0xFFFF } else { 0xFF };
            write_operand(cpu, mem, &inst.op1, !val & mask, seg);
        }

        "NEG" => {
            let val = read_operand(cpu, mem, &inst.op1, seg);
            let wide = inst.wide;
            let mask: u32 = if wide { 0xFFFF } else { 0xFF };
            let res = 0u32.wrapping_sub(val as u32);
            update_flags_sub(cpu, res, 0, val, wide);
            cpu.set_flag(cpu::CF, val != 0);
            write_operand(cpu, mem, &inst.op1, (res & mask) as u16, seg);
        }

        "MUL" => {
            let val = read_operand(cpu, mem, &inst.op1, seg);
            if inst.wide {
                let res = cpu.regs[cpu::AX] as u32 * val as u32;
                cpu.regs[cpu::AX] = (res & 0xFFFF) as u16;
                cpu.regs[cpu::DX] = (res >> 16) as u16;
                let hi = cpu.regs[cpu::DX] != 0;
                cpu.set_flag(cpu::CF, hi);
                cpu.set_flag(cpu::OF, hi);
            } else {
                let res = cpu.reg8(0) as u16 * (val & 0xFF);
                cpu.regs[cpu::AX] = res;
                let hi = res >> 8 != 0;
                cpu.set_flag(cpu::CF, hi);
                cpu.set_flag(cpu::OF, hi);
            }
        }

        "IMUL" => {
            let val = read_operand(cpu, mem, &inst.op1, seg);
            if inst.wide {
                let res = cpu.regs[cpu::AX] as i16 as i32 * val as i16 as i32;
                cpu.regs[cpu::AX] = (res & 0xFFFF) as u16;
                cpu.regs[cpu::DX] = ((res as u32) >> 16) as u16;
                let lo = cpu.regs[cpu::AX] as i16;
                let ext = lo as i32 != res;
                cpu.set_flag(cpu::CF, ext);
                cpu.set_flag(cpu::OF, ext);
            } else {
                let res = cpu.reg8(0) as i8 as i16 * (val & 0xFF) as u8 as i8 as i16;
                cpu.regs[cpu::AX] = res as u16;
                let lo = (res & 0xFF) as u8 as i8;
                let ext = lo as i16 != res;
                cpu.set_flag(cpu::CF, ext);
                cpu.set_flag(cpu::OF, ext);
            }
        }

        "DIV" => {
            let val = read_operand(cpu, mem, &inst.op1, seg);
            if val == 0 {
                result.halted = true;
                result.halt_reason = "Division by zero".to_string();
                return;
            }
            if inst.wide {
                let dividend = ((cpu.regs[cpu::DX] as u32) << 16) | cpu.regs[cpu::AX] as u32;
                let quot = dividend / val as u32;
                let rem = (dividend % val as u32) as u16;
                if quot > 0xFFFF {
                    result.halted = true;
                    result.halt_reason = "Division overflow".to_string();
                    return;
                }
                cpu.regs[cpu::AX] = quot as u16;
                cpu.regs[cpu::DX] = rem;
            } else {
                let dividend = cpu.regs[cpu::AX];
                let divisor = val & 0xFF;
                let quot = dividend / divisor;
                let rem = (dividend % divisor) as u8;
                if quot > 0xFF {
                    result.halted = true;
                    result.halt_reason = "Division overflow".to_string();
                    return;
                }
                cpu.set_reg8(0, quot as u8); // AL = quotient
                cpu.set_reg8(4, rem); // AH = remainder
            }
        }

        "IDIV" => {
            let val = read_operand(cpu, mem, &inst.op1, seg);
            if val == 0 {
                result.halted = true;
                result.halt_reason = "Division by zero".to_string();
                return;
            }
            if inst.wide {
                let dividend =
                    (((cpu.regs[cpu::DX] as u32) << 16) | cpu.regs[cpu::AX] as u32) as i32;
                let divisor = val as i16 as i32;
                // checked_div: i32::MIN / -1 is itself an overflow fault
                let (quot, rem) = match (dividend.checked_div(divisor), dividend.checked_rem(divisor)) {
                    (Some(q), Some(r)) => (q, r),
                    _ => {
                        result.halted = true;
                        result.halt_reason = "Division overflow".to_string();
                        return;
                    }
                };
                if !(-32768..=32767).contains(&quot) {
                    result.halted = true;
                    result.halt_reason = "Division overflow".to_string();
                    return;
                }
                cpu.regs[cpu::AX] = quot as i16 as u16;
                cpu.regs[cpu::DX] = rem as i16 as u16;
            } else {
                let dividend = cpu.regs[cpu::AX] as i16 as i32;
                let divisor = (val & 0xFF) as u8 as i8 as i32;
                let quot = dividend / divisor;
                let rem = dividend % divisor;
                if !(-128..=127).contains(&quot) {
                    result.halted = true;
                    result.halt_reason = "Division overflow".to_string();
                    return;
                }
                cpu.set_reg8(0, quot as i8 as u8);
                cpu.set_reg8(4, rem as i8 as u8);
            }
        }

        "SHL" | "SHR" | "SAR" | "ROL" | "ROR" | "RCL" | "RCR" => {
            execute_shift(cpu, mem, inst, mn, seg);
        }

        "MOV" => {
            let val = read_operand(cpu, mem, &inst.op2, seg);
            write_operand(cpu, mem, &inst.op1, val, seg);
        }

        "XCHG" => {
            let a = read_operand(cpu, mem, &inst.op1, seg);
            let b = read_operand(cpu, mem, &inst.op2, seg);
            write_operand(cpu, mem, &inst.op1, b, seg);
            write_operand(cpu, mem, &inst.op2, a, seg);
        }

        "LEA" => {
            let addr = effective_address(cpu, &inst.op2);
            write_operand(cpu, mem, &inst.op1, addr, None);
        }

        "PUSH" => {
            let val = read_operand(cpu, mem, &inst.op1, seg);
            cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_sub(2);
            mem.write16(cpu.regs[cpu::SP], val);
        }

        "POP" => {
            let val = mem.read16(cpu.regs[cpu::SP]);
            cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_add(2);
            write_operand(cpu, mem, &inst.op1, val, seg);
        }

        "JMP" => match inst.jump_target {
            Some(target) => cpu.ip = target,
            // Indirect JMP through register/memory (FF /4)
            None => cpu.ip = read_operand(cpu, mem, &inst.op1, seg),
        },

        "CALL" => {
            let next_ip = cpu.ip; // already advanced
            cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_sub(2);
            mem.write16(cpu.regs[cpu::SP], next_ip);
            match inst.jump_target {
                Some(target) => cpu.ip = target,
                None => cpu.ip = read_operand(cpu, mem, &inst.op1, seg),
            }
        }

        "RET" => {
            cpu.ip = mem.read16(cpu.regs[cpu::SP]);
            cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_add(2);
        }

        "LOOP" | "LOOPE" | "LOOPNE" | "JCXZ" => {
            let Some(target) = inst.jump_target else { return };
            if mn == "JCXZ" {
                if cpu.regs[cpu::CX] == 0 {
                    cpu.ip = target;
                }
            } else {
                cpu.regs[cpu::CX] = cpu.regs[cpu::CX].wrapping_sub(1);
                let branch = match mn {
                    "LOOP" => cpu.regs[cpu::CX] != 0,
                    "LOOPE" => cpu.regs[cpu::CX] != 0 && cpu.flag(cpu::ZF),
                    _ => cpu.regs[cpu::CX] != 0 && !cpu.flag(cpu::ZF),
                };
                if branch {
                    cpu.ip = target;
                }
            }
        }

        "MOVSB" | "MOVSW" | "CMPSB" | "CMPSW" | "STOSB" | "STOSW" | "LODSB" | "LODSW"
        | "SCASB" | "SCASW" => {
            execute_string_op(cpu, mem, inst, mn);
        }

        "CLC" => cpu.set_flag(cpu::CF, false),
        "STC" => cpu.set_flag(cpu::CF, true),
        "CMC" => {
            let cf = cpu.flag(cpu::CF);
            cpu.set_flag(cpu::CF, !cf);
        }
        "CLD" => cpu.set_flag(cpu::DF, false),
        "STD" => cpu.set_flag(cpu::DF, true),
        "CLI" => cpu.set_flag(cpu::IF, false),
        "STI" => cpu.set_flag(cpu::IF, true),

        "PUSHF" => {
            cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_sub(2);
            mem.write16(cpu.regs[cpu::SP], cpu.flags);
        }
        "POPF" => {
            cpu.flags = mem.read16(cpu.regs[cpu::SP]);
            cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_add(2);
        }

        "NOP" => {}
        "CBW" => {
            let al = cpu.reg8(0) as i8;
            cpu.regs[cpu::AX] = al as i16 as u16;
        }
        "CWD" => {
            cpu.regs[cpu::DX] = if (cpu.regs[cpu::AX] as i16) < 0 {
                0xFFFF
            } else {
                0
            };
        }
        "LAHF" => {
            let low = (cpu.flags & 0xFF) as u8;
            cpu.set_reg8(4, low);
        }
        "SAHF" => {
            cpu.flags = (cpu.flags & 0xFF00) | cpu.reg8(4) as u16;
        }

        "XLAT" => {
            // AL = DS:[BX + AL]
            let addr = cpu.regs[cpu::BX].wrapping_add(cpu.reg8(0) as u16);
            let val = mem.sread8(cpu.sregs[cpu::DS], addr);
            cpu.set_reg8(0, val);
        }

        "HLT" => {
            result.halted = true;
            let at = cpu.ip.wrapping_sub(inst.size as u16);
            result.halt_reason = format!("HLT instruction at {}", crate::decoder::hex_imm16(at));
        }

        "PUSHA" => {
            let orig_sp = cpu.regs[cpu::SP];
            for r in 0..8usize {
                cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_sub(2);
                let val = if r == cpu::SP { orig_sp } else { cpu.regs[r] };
                mem.write16(cpu.regs[cpu::SP], val);
            }
        }
        "POPA" => {
            // DI, SI, BP, (skip SP), BX, DX, CX, AX
            for r in [cpu::DI, cpu::SI, cpu::BP] {
                cpu.regs[r] = mem.read16(cpu.regs[cpu::SP]);
                cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_add(2);
            }
            cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_add(2);
            for r in [cpu::BX, cpu::DX, cpu::CX, cpu::AX] {
                cpu.regs[r] = mem.read16(cpu.regs[cpu::SP]);
                cpu.regs[cpu::SP] = cpu.regs[cpu::SP].wrapping_add(2);
            }
        }

        "INT" => {
            let int_num = (inst.op1.disp & 0xFF) as u8;
            handle_interrupt(cpu, mem, io, vram, result, int_num);
        }

        "IN" | "OUT" => {
            record_skip(result, cpu.ip, &format_instruction(inst), "I/O not emulated");
        }

        _ => {
            // Conditional jumps share one evaluator; anything else is an
            // unimplemented instruction.
            match inst.jump_target {
                Some(target) if mn.len() >= 2 && mn.starts_with('J') => {
                    if eval_condition(cpu, mn) {
                        cpu.ip = target;
                    }
                }
                _ => record_skip(result, cpu.ip, mn, "Unimplemented instruction"),
            }
        }
    }
}

fn execute_shift(
    cpu: &mut Cpu,
    mem: &mut Memory,
    inst: &DecodedInst,
    mn: &str,
    seg: Option<u8>,
) {
    let val = read_operand(cpu, mem, &inst.op1, seg);
    let cnt = read_operand(cpu, mem, &inst.op2, seg) & 0x1F;
    if cnt == 0 {
        return; // no operation, no flag changes
    }
    let wide = inst.wide;
    let mask: u32 = if wide { 0xFFFF } else { 0xFF };
    let sign_bit: u32 = if wide { 0x8000 } else { 0x80 };
    let mut res = val as u32;

    match mn {
        "SHL" => {
            for _ in 0..cnt {
                cpu.set_flag(cpu::CF, res & sign_bit != 0);
                res = (res << 1) & mask;
            }
            if cnt == 1 {
                cpu.set_flag(cpu::OF, (res & sign_bit != 0) != cpu.flag(cpu::CF));
            }
            cpu.set_flag(cpu::ZF, res == 0);
            cpu.set_flag(cpu::SF, res & sign_bit != 0);
            cpu.set_flag(cpu::PF, parity8((res & 0xFF) as u8));
        }
        "SHR" => {
            if cnt == 1 {
                cpu.set_flag(cpu::OF, val as u32 & sign_bit != 0);
            }
            for _ in 0..cnt {
                cpu.set_flag(cpu::CF, res & 1 != 0);
                res = (res >> 1) & mask;
            }
            cpu.set_flag(cpu::ZF, res == 0);
            cpu.set_flag(cpu::SF, res & sign_bit != 0);
            cpu.set_flag(cpu::PF, parity8((res & 0xFF) as u8));
        }
        "SAR" => {
            if cnt == 1 {
                cpu.set_flag(cpu::OF, false);
            }
            for _ in 0..cnt {
                cpu.set_flag(cpu::CF, res & 1 != 0);
                res = if wide {
                    ((res as u16 as i16) >> 1) as u16 as u32
                } else {
                    ((res as u8 as i8) >> 1) as u8 as u32
                };
            }
            res &= mask;
            cpu.set_flag(cpu::ZF, res == 0);
            cpu.set_flag(cpu::SF, res & sign_bit != 0);
            cpu.set_flag(cpu::PF, parity8((res & 0xFF) as u8));
        }
        "ROL" => {
            for _ in 0..cnt {
                let msb = res & sign_bit != 0;
                res = ((res << 1) | msb as u32) & mask;
            }
            cpu.set_flag(cpu::CF, res & 1 != 0);
            if cnt == 1 {
                cpu.set_flag(cpu::OF, (res & sign_bit != 0) != cpu.flag(cpu::CF));
            }
        }
        "ROR" => {
            for _ in 0..cnt {
                let lsb = res & 1 != 0;
                res = (res >> 1) & mask;
                if lsb {
                    res |= sign_bit;
                }
            }
            cpu.set_flag(cpu::CF, res & sign_bit != 0);
            if cnt == 1 {
                cpu.set_flag(cpu::OF, (res & sign_bit != 0) != (res & (sign_bit >> 1) != 0));
            }
        }
        "RCL" => {
            for _ in 0..cnt {
                let old_cf = cpu.flag(cpu::CF);
                cpu.set_flag(cpu::CF, res & sign_bit != 0);
                res = ((res << 1) | old_cf as u32) & mask;
            }
            if cnt == 1 {
                cpu.set_flag(cpu::OF, (res & sign_bit != 0) != cpu.flag(cpu::CF));
            }
        }
        _ => {
            // RCR
            for _ in 0..cnt {
                let old_cf = cpu.flag(cpu::CF);
                cpu.set_flag(cpu::CF, res & 1 != 0);
                res = (res >> 1) & mask;
                if old_cf {
                    res |= sign_bit;
                }
            }
            if cnt == 1 {
                cpu.set_flag(cpu::OF, (res & sign_bit != 0) != (res & (sign_bit >> 1) != 0));
            }
        }
    }
    write_operand(cpu, mem, &inst.op1, (res & mask) as u16, seg);
}

fn execute_string_op(cpu: &mut Cpu, mem: &mut Memory, inst: &DecodedInst, mn: &str) {
    let is_word = mn.ends_with('W');
    let step: i32 = if is_word { 2 } else { 1 };
    let dir: i32 = if cpu.flag(cpu::DF) { -step } else { step };
    let has_rep = inst.has_rep || inst.has_repne;
    let is_compare = mn.starts_with("CMPS") || mn.starts_with("SCAS");

    let do_one = |cpu: &mut Cpu, mem: &mut Memory| {
        // Source segment honors overrides; the destination (through DI) is
        // always ES.
        let src_seg = resolve_segment(cpu, &inst.op1, inst.seg_override);
        let dst_seg = cpu.sregs[cpu::ES];
        let si = cpu.regs[cpu::SI];
        let di = cpu.regs[cpu::DI];

        match &mn[..4] {
            "MOVS" => {
                if is_word {
                    let val = mem.sread16(src_seg, si);
                    mem.swrite16(dst_seg, di, val);
                } else {
                    let val = mem.sread8(src_seg, si);
                    mem.swrite8(dst_seg, di, val);
                }
                cpu.regs[cpu::SI] = si.wrapping_add(dir as u16);
                cpu.regs[cpu::DI] = di.wrapping_add(dir as u16);
            }
            "CMPS" => {
                let (a, b) = if is_word {
                    (mem.sread16(src_seg, si), mem.sread16(dst_seg, di))
                } else {
                    (mem.sread8(src_seg, si) as u16, mem.sread8(dst_seg, di) as u16)
                };
                update_flags_sub(cpu, (a as u32).wrapping_sub(b as u32), a, b, is_word);
                cpu.regs[cpu::SI] = si.wrapping_add(dir as u16);
                cpu.regs[cpu::DI] = di.wrapping_add(dir as u16);
            }
            "STOS" => {
                if is_word {
                    mem.swrite16(dst_seg, di, cpu.regs[cpu::AX]);
                } else {
                    mem.swrite8(dst_seg, di, cpu.reg8(0));
                }
                cpu.regs[cpu::DI] = di.wrapping_add(dir as u16);
            }
            "LODS" => {
                if is_word {
                    cpu.regs[cpu::AX] = mem.sread16(src_seg, si);
                } else {
                    let val = mem.sread8(src_seg, si);
                    cpu.set_reg8(0, val);
                }
                cpu.regs[cpu::SI] = si.wrapping_add(dir as u16);
            }
            _ => {
                // SCAS
                let (a, b) = if is_word {
                    (cpu.regs[cpu::AX], mem.sread16(dst_seg, di))
                } else {
                    (cpu.reg8(0) as u16, mem.sread8(dst_seg, di) as u16)
                };
                update_flags_sub(cpu, (a as u32).wrapping_sub(b as u32), a, b, is_word);
                cpu.regs[cpu::DI] = di.wrapping_add(dir as u16);
            }
        }
    };

    if has_rep {
        while cpu.regs[cpu::CX] != 0 {
            do_one(cpu, mem);
            cpu.regs[cpu::CX] = cpu.regs[cpu::CX].wrapping_sub(1);
            if is_compare {
                if inst.has_rep && !cpu.flag(cpu::ZF) {
                    break; // REPE: stop on mismatch
                }
                if inst.has_repne && cpu.flag(cpu::ZF) {
                    break; // REPNE: stop on match
                }
            }
        }
    } else {
        do_one(cpu, mem);
    }
}
