// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! INT 10h/20h/21h handling and teletype output plumbing.
//!
//! Every character written through the DOS output functions is both
//! appended to the captured stdout (capped) and routed into VRAM through
//! the teletype handler, so `--screen` shows what a real console would.

use super::cpu::{self, Cpu};
use super::memory::{Memory, VRAM_SIZE};
use super::vram::{VramState, COLS, ROWS};
use super::{record_skip, EmulatorResult, IoCapture};
use crate::decoder::{hex_byte, hex_imm16};

pub(super) const MAX_OUTPUT: usize = 4096;

/// BIOS teletype semantics: CR homes the column, LF advances the row
/// (scrolling at the bottom), BS backs up, BEL is swallowed, anything else
/// prints at the cursor with the default attribute.
pub(super) fn tty_char_to_vram(mem: &mut Memory, vram: &mut VramState, ch: u8) {
    match ch {
        0x0D => vram.cursor_col = 0,
        0x0A => {
            vram.cursor_row += 1;
            if vram.cursor_row as usize >= ROWS {
                vram.scroll_up(mem, 1);
                vram.cursor_row = (ROWS - 1) as u8;
            }
        }
        0x08 => {
            if vram.cursor_col > 0 {
                vram.cursor_col -= 1;
            }
        }
        0x07 => {} // bell
        _ => {
            vram.write_char_at_cursor(mem, ch, vram.default_attr);
            vram.advance(mem);
        }
    }
}

fn emit_char(io: &mut IoCapture, mem: &mut Memory, vram: &mut VramState, ch: u8) {
    if io.stdout.len() < MAX_OUTPUT {
        io.stdout.push(ch);
    }
    tty_char_to_vram(mem, vram, ch);
}

fn handle_int10(
    cpu: &mut Cpu,
    mem: &mut Memory,
    vram: &mut VramState,
    result: &mut EmulatorResult,
) {
    let ah = cpu.reg8(4);
    match ah {
        0x00 => {
            // Set video mode: text modes only, treat as a screen clear.
            vram.clear_screen(mem);
        }
        0x02 => {
            // Set cursor position (BH page ignored)
            let row = cpu.reg8(6); // DH
            let col = cpu.reg8(2); // DL
            if (row as usize) < ROWS && (col as usize) < COLS {
                vram.cursor_row = row;
                vram.cursor_col = col;
            }
        }
        0x03 => {
            // Get cursor position
            cpu.set_reg8(6, vram.cursor_row); // DH
            cpu.set_reg8(2, vram.cursor_col); // DL
            cpu.regs[cpu::CX] = 0x0607; // standard cursor shape
        }
        0x06 | 0x07 => scroll_window(cpu, mem, ah == 0x06),
        0x08 => {
            // Read char+attr at cursor
            let off = vram.cursor_offset();
            if off + 1 < VRAM_SIZE {
                cpu.set_reg8(0, mem.vram[off]); // AL
                cpu.set_reg8(4, mem.vram[off + 1]); // AH
            }
        }
        0x09 => {
            // Write char+attr CX times, cursor does not move
            let ch = cpu.reg8(0); // AL
            let attr = cpu.reg8(3); // BL
            let count = cpu.regs[cpu::CX];
            let off = vram.cursor_offset();
            for i in 0..count as usize {
                let cell = off + i * 2;
                if cell + 1 < VRAM_SIZE {
                    mem.vram[cell] = ch;
                    mem.vram[cell + 1] = attr;
                }
            }
            mem.vram_dirty = true;
        }
        0x0A => {
            // Write char CX times, attribute preserved, cursor does not move
            let ch = cpu.reg8(0);
            let count = cpu.regs[cpu::CX];
            let mut col = vram.cursor_col as usize;
            let mut row = vram.cursor_row as usize;
            for _ in 0..count {
                if row >= ROWS {
                    break;
                }
                let off = (row * COLS + col) * 2;
                if off + 1 < VRAM_SIZE {
                    mem.vram[off] = ch;
                }
                col += 1;
                if col >= COLS {
                    col = 0;
                    row += 1;
                }
            }
            mem.vram_dirty = true;
        }
        0x0E => {
            let ch = cpu.reg8(0);
            tty_char_to_vram(mem, vram, ch);
        }
        0x0F => {
            // Get video mode
            cpu.set_reg8(0, 3); // AL = mode 3 (80x25 color text)
            cpu.set_reg8(4, 80); // AH = columns
            cpu.set_reg8(7, 0); // BH = active page
        }
        _ => record_skip(
            result,
            cpu.ip,
            &format!("INT 10h AH={}", hex_byte(ah)),
            "Unimplemented Video function",
        ),
    }
}

fn scroll_window(cpu: &mut Cpu, mem: &mut Memory, up: bool) {
    let lines = cpu.reg8(0) as usize; // AL, 0 = clear window
    let attr = cpu.reg8(7); // BH = fill attribute
    let r1 = cpu.reg8(5) as usize; // CH = top row
    let c1 = cpu.reg8(1) as usize; // CL = left col
    let mut r2 = cpu.reg8(6) as usize; // DH = bottom row
    let mut c2 = cpu.reg8(2) as usize; // DL = right col

    if r2 >= ROWS {
        r2 = ROWS - 1;
    }
    if c2 >= COLS {
        c2 = COLS - 1;
    }
    if r1 > r2 || c1 > c2 {
        return;
    }

    let clear_row = |mem: &mut Memory, row: usize| {
        for col in c1..=c2 {
            let off = (row * COLS + col) * 2;
            mem.vram[off] = b' ';
            mem.vram[off + 1] = attr;
        }
    };

    if lines == 0 {
        for row in r1..=r2 {
            clear_row(mem, row);
        }
    } else if up {
        let mut row = r1;
        while row + lines <= r2 {
            for col in c1..=c2 {
                let dst = (row * COLS + col) * 2;
                let src = ((row + lines) * COLS + col) * 2;
                mem.vram[dst] = mem.vram[src];
                mem.vram[dst + 1] = mem.vram[src + 1];
            }
            row += 1;
        }
        let first_cleared = (r2 + 1).saturating_sub(lines).max(r1);
        for row in first_cleared..=r2 {
            clear_row(mem, row);
        }
    } else {
        let mut row = r2;
        while row >= r1 + lines {
            for col in c1..=c2 {
                let dst = (row * COLS + col) * 2;
                let src = ((row - lines) * COLS + col) * 2;
                mem.vram[dst] = mem.vram[src];
                mem.vram[dst + 1] = mem.vram[src + 1];
            }
            row -= 1;
        }
        let last_cleared = (r1 + lines - 1).min(r2);
        for row in r1..=last_cleared {
            clear_row(mem, row);
        }
    }
    mem.vram_dirty = true;
}

fn handle_int21(
    cpu: &mut Cpu,
    mem: &mut Memory,
    io: &mut IoCapture,
    vram: &mut VramState,
    result: &mut EmulatorResult,
) {
    let ah = cpu.reg8(4);
    match ah {
        0x01 => {
            // Read char with echo; exhausted input reads as CR
            let ch = io.read_char().unwrap_or(0x0D);
            cpu.set_reg8(0, ch); // AL
            emit_char(io, mem, vram, ch);
        }
        0x02 => {
            let dl = cpu.reg8(2);
            emit_char(io, mem, vram, dl);
        }
        0x06 => {
            // Direct console I/O: DL=0xFF reads, anything else writes
            let dl = cpu.reg8(2);
            if dl == 0xFF {
                match io.read_char() {
                    Some(ch) => {
                        cpu.set_flag(cpu::ZF, false);
                        cpu.set_reg8(0, ch);
                    }
                    None => {
                        cpu.set_flag(cpu::ZF, true);
                        cpu.set_reg8(0, 0);
                    }
                }
            } else {
                emit_char(io, mem, vram, dl);
            }
        }
        0x09 => {
            // Write $-terminated string at DS:DX
            let seg = cpu.sregs[cpu::DS];
            let off = cpu.regs[cpu::DX];
            let mut truncated = false;
            for i in 0..0x10000u32 {
                let ch = mem.sread8(seg, off.wrapping_add(i as u16));
                if ch == b'$' {
                    break;
                }
                if io.stdout.len() < MAX_OUTPUT {
                    io.stdout.push(ch);
                } else if !truncated {
                    truncated = true;
                    result.diagnostics.push(format!(
                        "Output truncated at {MAX_OUTPUT} bytes (no '$' terminator found - \
                         possible bad pointer in DX={})",
                        hex_imm16(off)
                    ));
                }
                tty_char_to_vram(mem, vram, ch);
            }
        }
        0x2A => {
            // Get date - stubbed to a fixed date
            cpu.regs[cpu::CX] = 2026; // year
            cpu.set_reg8(6, 2); // DH = month
            cpu.set_reg8(2, 13); // DL = day
            cpu.set_reg8(0, 5); // AL = day of week
        }
        0x2C => {
            // Get time - stubbed to noon
            cpu.set_reg8(4, 12); // CH = hour
            cpu.set_reg8(1, 0); // CL = minute
            cpu.set_reg8(6, 0); // DH = second
            cpu.set_reg8(2, 0); // DL = centisecond
        }
        0x30 => {
            // Get DOS version - report 5.0
            cpu.set_reg8(0, 5);
            cpu.set_reg8(4, 0);
        }
        0x4C => {
            let code = cpu.reg8(0) as i32;
            io.exit_code = code;
            result.halted = true;
            result.halt_reason = format!("INT 21h/4Ch exit (code={code})");
            result.exit_code = code;
        }
        _ => record_skip(
            result,
            cpu.ip,
            &format!("INT 21h AH={}", hex_byte(ah)),
            "Unimplemented DOS function",
        ),
    }
}

pub(super) fn handle_interrupt(
    cpu: &mut Cpu,
    mem: &mut Memory,
    io: &mut IoCapture,
    vram: &mut VramState,
    result: &mut EmulatorResult,
    int_num: u8,
) {
    match int_num {
        0x20 => {
            result.halted = true;
            result.halt_reason = "INT 20h program terminate".to_string();
            result.exit_code = 0;
        }
        0x21 => handle_int21(cpu, mem, io, vram, result),
        0x10 => handle_int10(cpu, mem, vram, result),
        _ => record_skip(
            result,
            cpu.ip,
            &format!("INT {}", hex_byte(int_num)),
            "Unimplemented interrupt",
        ),
    }
}
