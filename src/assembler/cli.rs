// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::emulator::{EmulatorConfig, Viewport, DEFAULT_MAX_CYCLES};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "8086 toolchain for DOS .COM programs: two-pass assembler, \
disassembler and cycle-bounded emulator.

The default mode assembles <file.asm> to <file>.com. --agent switches human \
text to structured JSON; --run-source assembles and emulates in one step. \
Emulator observability flags (--breakpoints, --watch-regs, --screen, ...) \
apply to the --run and --run-source modes.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FontChoice {
    #[value(name = "8x8")]
    F8x8,
    #[value(name = "8x16")]
    F8x16,
}

#[derive(Parser, Debug)]
#[command(
    name = "forge86",
    version = VERSION,
    about = "8086 assembler, disassembler and .COM emulator with JSON output",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    /// Assembly source file (default mode: assemble to .com)
    pub file: Option<PathBuf>,
    #[arg(
        long = "agent",
        action = ArgAction::SetTrue,
        long_help = "Emit structured JSON instead of human-readable text. Assembly errors are \
                     reported inside the JSON and the process still exits 0."
    )]
    pub agent: bool,
    #[arg(
        long = "disassemble",
        value_name = "FILE",
        long_help = "Disassemble a binary file and emit JSON (instructions plus data regions)."
    )]
    pub disassemble: Option<PathBuf>,
    #[arg(
        long = "run",
        value_name = "FILE",
        long_help = "Emulate a pre-built .COM binary and emit the emulation JSON."
    )]
    pub run: Option<PathBuf>,
    #[arg(
        long = "run-source",
        value_name = "FILE",
        long_help = "Assemble a source file and emulate the result; emits combined JSON with \
                     assembly and emulation sections."
    )]
    pub run_source: Option<PathBuf>,
    #[arg(
        long = "explain",
        value_name = "MNEMONIC",
        long_help = "Print the instruction catalog entry for MNEMONIC as JSON and exit."
    )]
    pub explain: Option<String>,
    #[arg(
        long = "dump-isa",
        action = ArgAction::SetTrue,
        long_help = "Print the full instruction catalog as JSON and exit."
    )]
    pub dump_isa: bool,
    #[arg(
        long = "max-cycles",
        value_name = "N",
        default_value_t = DEFAULT_MAX_CYCLES,
        long_help = "Emulator cycle cap. Reaching it halts the run with a deterministic reason."
    )]
    pub max_cycles: u32,
    #[arg(
        long = "breakpoints",
        value_name = "HEX,HEX,...",
        long_help = "Comma-separated hex offsets. The emulator captures a register snapshot \
                     each time IP matches one (first 10 hits per address, counted after that)."
    )]
    pub breakpoints: Option<String>,
    #[arg(
        long = "watch-regs",
        value_name = "AX,BX,...",
        long_help = "Comma-separated 16-bit register names. A snapshot is captured whenever a \
                     watched register changes value."
    )]
    pub watch_regs: Option<String>,
    #[arg(
        long = "input",
        value_name = "STR",
        long_help = "Characters fed to the program's stdin (INT 21h functions 01h/06h)."
    )]
    pub input: Option<String>,
    #[arg(
        long = "mem-dump",
        value_name = "HEX,LEN",
        long_help = "Memory window (hex start address, decimal length) included in each \
                     snapshot."
    )]
    pub mem_dump: Option<String>,
    #[arg(
        long = "screen",
        action = ArgAction::SetTrue,
        long_help = "Capture the full 80x50 text screen into the result."
    )]
    pub screen: bool,
    #[arg(
        long = "viewport",
        value_name = "COL,ROW,W,H",
        long_help = "Capture a sub-rectangle of the text screen instead of the full 80x50."
    )]
    pub viewport: Option<String>,
    #[arg(
        long = "attrs",
        action = ArgAction::SetTrue,
        long_help = "Include attribute bytes (hex) alongside captured screen text."
    )]
    pub attrs: bool,
    #[arg(
        long = "screenshot",
        value_name = "PATH",
        long_help = "Render the final screen to a 24-bit BMP at PATH."
    )]
    pub screenshot: Option<PathBuf>,
    #[arg(
        long = "font",
        value_enum,
        default_value_t = FontChoice::F8x16,
        long_help = "Screenshot font: 8x8 renders 640x400, 8x16 renders 640x800."
    )]
    pub font: FontChoice,
    #[arg(
        long = "output-file",
        value_name = "PATH",
        long_help = "Write the JSON output to PATH instead of stdout."
    )]
    pub output_file: Option<PathBuf>,
}

/// Which top-level operation the invocation selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Assemble { source: PathBuf },
    Disassemble { binary: PathBuf },
    Run { binary: PathBuf },
    RunSource { source: PathBuf },
    Explain { mnemonic: String },
    DumpIsa,
}

#[derive(Debug)]
pub struct CliConfig {
    pub mode: Mode,
    pub agent: bool,
    pub emulator: EmulatorConfig,
    pub output_file: Option<PathBuf>,
}

/// Resolve the parsed arguments into a typed run configuration. Errors are
/// user mistakes (bad flag format, no input) and exit with status 1.
pub fn validate_cli(cli: &Cli) -> Result<CliConfig, String> {
    let mode = if let Some(mnemonic) = &cli.explain {
        Mode::Explain {
            mnemonic: mnemonic.clone(),
        }
    } else if cli.dump_isa {
        Mode::DumpIsa
    } else if let Some(binary) = &cli.disassemble {
        Mode::Disassemble {
            binary: binary.clone(),
        }
    } else if let Some(binary) = &cli.run {
        Mode::Run {
            binary: binary.clone(),
        }
    } else if let Some(source) = &cli.run_source {
        Mode::RunSource {
            source: source.clone(),
        }
    } else if let Some(source) = &cli.file {
        Mode::Assemble {
            source: source.clone(),
        }
    } else {
        return Err("No input file. Usage: forge86 [--agent] source.asm".to_string());
    };

    let mut emulator = EmulatorConfig {
        max_cycles: cli.max_cycles,
        ..EmulatorConfig::default()
    };

    if let Some(spec) = &cli.breakpoints {
        emulator.breakpoints = parse_breakpoints(spec)?;
    }
    if let Some(spec) = &cli.watch_regs {
        emulator.watch_regs = parse_watch_regs(spec)?;
    }
    if let Some(input) = &cli.input {
        emulator.stdin_input = input.as_bytes().to_vec();
    }
    if let Some(spec) = &cli.mem_dump {
        emulator.mem_dump = Some(parse_mem_dump(spec)?);
    }
    if cli.screen {
        emulator.viewport = Some(Viewport::full_screen());
    }
    if let Some(spec) = &cli.viewport {
        emulator.viewport = Some(parse_viewport(spec)?);
    }
    emulator.capture_attrs = cli.attrs;
    emulator.screenshot_file = cli.screenshot.clone();
    emulator.font_8x8 = cli.font == FontChoice::F8x8;

    Ok(CliConfig {
        mode,
        agent: cli.agent,
        emulator,
        output_file: cli.output_file.clone(),
    })
}

fn parse_breakpoints(spec: &str) -> Result<BTreeSet<u16>, String> {
    let mut out = BTreeSet::new();
    for part in spec.split(',').filter(|p| !p.trim().is_empty()) {
        let addr = u16::from_str_radix(part.trim(), 16)
            .map_err(|_| format!("Invalid breakpoint address '{part}'. Use hex offsets: 100,10A"))?;
        out.insert(addr);
    }
    Ok(out)
}

fn parse_watch_regs(spec: &str) -> Result<BTreeSet<usize>, String> {
    let mut out = BTreeSet::new();
    for part in spec.split(',').filter(|p| !p.trim().is_empty()) {
        let upper = part.trim().to_ascii_uppercase();
        match crate::isa::REG16_NAMES.iter().position(|r| *r == upper) {
            Some(idx) => {
                out.insert(idx);
            }
            None => {
                return Err(format!(
                    "Unknown register '{part}' in --watch-regs. Valid: AX,CX,DX,BX,SP,BP,SI,DI"
                ))
            }
        }
    }
    Ok(out)
}

fn parse_mem_dump(spec: &str) -> Result<(u16, usize), String> {
    let (addr, len) = spec
        .split_once(',')
        .ok_or_else(|| format!("Invalid --mem-dump '{spec}'. Format: HEX,LEN (e.g. 200,16)"))?;
    let addr = u16::from_str_radix(addr.trim(), 16)
        .map_err(|_| format!("Invalid --mem-dump address '{addr}'"))?;
    let len: usize = len
        .trim()
        .parse()
        .map_err(|_| format!("Invalid --mem-dump length '{len}'"))?;
    Ok((addr, len))
}

fn parse_viewport(spec: &str) -> Result<Viewport, String> {
    let parts: Vec<&str> = spec.split(',').collect();
    if parts.len() != 4 {
        return Err("Invalid --viewport format. Use: col,row,width,height".to_string());
    }
    let nums: Result<Vec<usize>, _> = parts.iter().map(|p| p.trim().parse::<usize>()).collect();
    let nums = nums.map_err(|_| "Invalid --viewport format. Use: col,row,width,height".to_string())?;
    Ok(Viewport {
        col: nums[0],
        row: nums[1],
        width: nums[2],
        height: nums[3],
    })
}
