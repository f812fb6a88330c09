// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Cycle-bounded 8086 interpreter for .COM images.
//!
//! Decode-execute loop with structured observability: breakpoint and
//! watchpoint snapshots, captured console output, skipped-operation
//! records and an optional VRAM viewport. Not cycle-accurate; functional.

pub mod cpu;
mod exec;
mod interrupts;
pub mod memory;
pub mod screenshot;
pub mod vram;

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::decoder::{decode_instruction, format_instruction, hex_imm16};

use cpu::Cpu;
use memory::Memory;
use vram::VramState;

pub const DEFAULT_MAX_CYCLES: u32 = 1_000_000;
const MAX_SNAPSHOTS: usize = 100;
const MAX_SNAPSHOTS_PER_ADDR: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub col: usize,
    pub row: usize,
    pub width: usize,
    pub height: usize,
}

impl Viewport {
    pub fn full_screen() -> Self {
        Self {
            col: 0,
            row: 0,
            width: vram::COLS,
            height: vram::ROWS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub max_cycles: u32,
    pub breakpoints: BTreeSet<u16>,
    /// Watched general-register indices (0-7).
    pub watch_regs: BTreeSet<usize>,
    /// (start address, length) window captured into each snapshot.
    pub mem_dump: Option<(u16, usize)>,
    pub stdin_input: Vec<u8>,
    pub viewport: Option<Viewport>,
    pub capture_attrs: bool,
    pub screenshot_file: Option<PathBuf>,
    pub font_8x8: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            max_cycles: DEFAULT_MAX_CYCLES,
            breakpoints: BTreeSet::new(),
            watch_regs: BTreeSet::new(),
            mem_dump: None,
            stdin_input: Vec::new(),
            viewport: None,
            capture_attrs: false,
            screenshot_file: None,
            font_8x8: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct IoCapture {
    pub stdout: Vec<u8>,
    pub stdin_source: Vec<u8>,
    stdin_pos: usize,
    pub exit_code: i32,
}

impl IoCapture {
    fn read_char(&mut self) -> Option<u8> {
        let ch = self.stdin_source.get(self.stdin_pos).copied();
        if ch.is_some() {
            self.stdin_pos += 1;
        }
        ch
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub addr: u16,
    pub cycle: u32,
    pub regs: [u16; 8],
    pub sregs: [u16; 4],
    pub ip: u16,
    pub flags: u16,
    pub next_inst: String,
    /// Top 8 stack words, SS-relative.
    pub stack: Vec<u16>,
    pub mem_dump: Vec<u8>,
    pub hit_count: u32,
    pub reason: String,
    pub screen_lines: Vec<String>,
    pub screen_attrs: Vec<String>,
    pub cursor_row: u8,
    pub cursor_col: u8,
}

#[derive(Debug, Clone)]
pub struct SkippedRecord {
    pub addr: u16,
    pub instruction: String,
    pub reason: String,
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct EmulatorResult {
    pub success: bool,
    pub halted: bool,
    pub halt_reason: String,
    pub exit_code: i32,
    pub cycles_executed: u32,
    pub fidelity: f64,
    pub output: Vec<u8>,
    pub snapshots: Vec<Snapshot>,
    pub skipped: Vec<SkippedRecord>,
    pub diagnostics: Vec<String>,
    pub screen: Vec<String>,
    pub screen_attrs: Vec<String>,
    pub cursor_row: u8,
    pub cursor_col: u8,
    pub screenshot_path: Option<String>,
}

/// Record a skipped (non-emulated) operation, one entry per
/// (address, instruction) pair with a hit count.
pub(crate) fn record_skip(result: &mut EmulatorResult, addr: u16, instruction: &str, reason: &str) {
    if let Some(existing) = result
        .skipped
        .iter_mut()
        .find(|s| s.addr == addr && s.instruction == instruction)
    {
        existing.count += 1;
        return;
    }
    result.skipped.push(SkippedRecord {
        addr,
        instruction: instruction.to_string(),
        reason: reason.to_string(),
        count: 1,
    });
}

fn compute_fidelity(result: &EmulatorResult) -> f64 {
    if result.skipped.is_empty() {
        return 1.0;
    }
    let total_skips: u32 = result.skipped.iter().map(|s| s.count).sum();
    let ratio = 1.0 - total_skips as f64 / (result.cycles_executed + 1) as f64;
    ratio.max(0.0)
}

/// Extract viewport text (and optionally attribute hex) rows from VRAM.
fn capture_viewport(mem: &Memory, config: &EmulatorConfig) -> (Vec<String>, Vec<String>) {
    let mut text_rows = Vec::new();
    let mut attr_rows = Vec::new();
    let Some(vp) = config.viewport else {
        return (text_rows, attr_rows);
    };

    for r in 0..vp.height {
        let screen_row = vp.row + r;
        if screen_row >= vram::ROWS {
            break;
        }
        let mut text = String::with_capacity(vp.width);
        let mut attrs = String::new();
        for c in 0..vp.width {
            let screen_col = vp.col + c;
            if screen_col >= vram::COLS {
                break;
            }
            let off = (screen_row * vram::COLS + screen_col) * 2;
            let ch = mem.vram[off];
            let at = mem.vram[off + 1];
            // Non-printable cells render as '.' so the JSON stays clean
            text.push(if (0x20..0x7F).contains(&ch) { ch as char } else { '.' });
            if config.capture_attrs {
                attrs.push_str(&format!("{at:02X}"));
            }
        }
        text_rows.push(text);
        if config.capture_attrs {
            attr_rows.push(attrs);
        }
    }
    (text_rows, attr_rows)
}

#[allow(clippy::too_many_arguments)]
fn capture_snapshot(
    cpu: &Cpu,
    mem: &Memory,
    code: &[u8],
    cycle: u32,
    reason: String,
    config: &EmulatorConfig,
    vram: &VramState,
    snapshots: &mut Vec<Snapshot>,
) {
    if snapshots.len() >= MAX_SNAPSHOTS {
        return;
    }

    let next_inst = match decode_instruction(code, cpu.ip as usize) {
        Some(inst) => format_instruction(&inst),
        None => "???".to_string(),
    };

    let sp = cpu.regs[cpu::SP];
    let ss = cpu.sregs[cpu::SS];
    let stack: Vec<u16> = (0..8)
        .map(|i| mem.sread16(ss, sp.wrapping_add(i * 2)))
        .collect();

    let mem_dump = match config.mem_dump {
        Some((addr, len)) => (0..len)
            .map(|i| mem.read8(addr.wrapping_add(i as u16)))
            .collect(),
        None => Vec::new(),
    };

    let (screen_lines, screen_attrs) = if config.viewport.is_some() {
        capture_viewport(mem, config)
    } else {
        (Vec::new(), Vec::new())
    };

    snapshots.push(Snapshot {
        addr: cpu.ip,
        cycle,
        regs: cpu.regs,
        sregs: cpu.sregs,
        ip: cpu.ip,
        flags: cpu.flags,
        next_inst,
        stack,
        mem_dump,
        hit_count: 1,
        reason,
        screen_lines,
        screen_attrs,
        cursor_row: vram.cursor_row,
        cursor_col: vram.cursor_col,
    });
}

fn check_breakpoints(
    cpu: &Cpu,
    mem: &Memory,
    code: &[u8],
    result: &mut EmulatorResult,
    config: &EmulatorConfig,
    cycle: u32,
    vram: &VramState,
) {
    if !config.breakpoints.contains(&cpu.ip) {
        return;
    }
    let hits = result
        .snapshots
        .iter()
        .filter(|s| s.addr == cpu.ip && s.reason.contains("Breakpoint"))
        .count();
    if hits < MAX_SNAPSHOTS_PER_ADDR {
        let reason = format!("Breakpoint at {}", hex_imm16(cpu.ip));
        capture_snapshot(
            cpu,
            mem,
            code,
            cycle,
            reason,
            config,
            vram,
            &mut result.snapshots,
        );
    } else if let Some(snap) = result
        .snapshots
        .iter_mut()
        .rev()
        .find(|s| s.addr == cpu.ip)
    {
        snap.hit_count += 1;
    }
}

fn check_watchpoints(
    cpu: &Cpu,
    prev_regs: &[u16; 8],
    config: &EmulatorConfig,
    mem: &Memory,
    code: &[u8],
    result: &mut EmulatorResult,
    cycle: u32,
    vram: &VramState,
) {
    for &reg_idx in &config.watch_regs {
        if cpu.regs[reg_idx] != prev_regs[reg_idx] {
            let reason = format!(
                "Watchpoint: {} changed from {} to {}",
                crate::isa::REG16_NAMES[reg_idx],
                hex_imm16(prev_regs[reg_idx]),
                hex_imm16(cpu.regs[reg_idx])
            );
            capture_snapshot(
                cpu,
                mem,
                code,
                cycle,
                reason,
                config,
                vram,
                &mut result.snapshots,
            );
        }
    }
}

/// Run a .COM image to completion (or the cycle cap). Returns the result
/// plus the final CPU state.
pub fn run_emulator(binary: &[u8], config: &EmulatorConfig) -> (EmulatorResult, Cpu) {
    let mut result = EmulatorResult::default();
    let mut cpu = Cpu::new();
    let mut mem = Memory::new();
    let mut vram = VramState::new();
    let mut io = IoCapture {
        stdin_source: config.stdin_input.clone(),
        ..IoCapture::default()
    };

    cpu.ip = 0x100;
    cpu.regs[cpu::SP] = 0xFFFE;
    cpu.flags = 0x0202; // IF set
    cpu.sregs[cpu::DS] = 0;

    vram.clear_screen(&mut mem);

    mem.load_com(binary);
    // INT 20h at PSP:0000 so a bare RET from the entry point terminates.
    mem.write8(0x0000, 0xCD);
    mem.write8(0x0001, 0x20);

    // The decoder reads from a snapshot of memory taken at load time;
    // self-modifying code does not change what is executed.
    let code = mem.data.clone();

    let mut cycle: u32 = 0;
    while cycle < config.max_cycles {
        let prev_regs = cpu.regs;

        if !config.breakpoints.is_empty() {
            check_breakpoints(&cpu, &mem, &code, &mut result, config, cycle, &vram);
        }

        let Some(inst) = decode_instruction(&code, cpu.ip as usize) else {
            result.halted = true;
            result.halt_reason = format!("Invalid opcode at {}", hex_imm16(cpu.ip));
            break;
        };

        // Advance IP before execution; branches overwrite it.
        cpu.ip = cpu.ip.wrapping_add(inst.size as u16);

        exec::execute_instruction(&mut cpu, &mut mem, &mut io, &mut vram, &inst, &mut result);
        cycle += 1;

        if result.halted {
            break;
        }

        if !config.watch_regs.is_empty() {
            check_watchpoints(&cpu, &prev_regs, config, &mem, &code, &mut result, cycle, &vram);
        }
    }

    if !result.halted && cycle >= config.max_cycles {
        result.halted = true;
        result.halt_reason = format!("Cycle limit reached ({})", config.max_cycles);
    }

    result.success = true;
    result.cycles_executed = cycle;
    result.output = io.stdout.clone();
    result.fidelity = compute_fidelity(&result);
    if config.viewport.is_some() {
        let (screen, attrs) = capture_viewport(&mem, config);
        result.screen = screen;
        result.screen_attrs = attrs;
    }
    result.cursor_row = vram.cursor_row;
    result.cursor_col = vram.cursor_col;

    if let Some(path) = &config.screenshot_file {
        match screenshot::write_screenshot_bmp(&mem.vram, path, config.font_8x8) {
            Ok(()) => result.screenshot_path = Some(path.display().to_string()),
            Err(_) => result
                .diagnostics
                .push(format!("Failed to write screenshot: {}", path.display())),
        }
    }

    (result, cpu)
}
