// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for forge86.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use forge86::assembler::cli::{validate_cli, Cli, CliConfig, Mode};
use forge86::assembler::{assemble_file, output};
use forge86::disassembler::disassemble;
use forge86::emulator::run_emulator;

struct OutputSink {
    file: Option<fs::File>,
}

impl OutputSink {
    fn open(path: Option<&PathBuf>) -> io::Result<Self> {
        let file = match path {
            Some(path) => Some(fs::File::create(path)?),
            None => None,
        };
        Ok(Self { file })
    }

    fn emit(&mut self, text: &str) {
        match &mut self.file {
            Some(file) => {
                let _ = file.write_all(text.as_bytes());
            }
            None => {
                print!("{text}");
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match validate_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let mut sink = match OutputSink::open(config.output_file.as_ref()) {
        Ok(sink) => sink,
        Err(err) => {
            eprintln!("Cannot open output file: {err}");
            return ExitCode::FAILURE;
        }
    };

    match &config.mode {
        Mode::Explain { mnemonic } => {
            sink.emit(&output::render(&output::explain_json(mnemonic)));
            ExitCode::SUCCESS
        }
        Mode::DumpIsa => {
            sink.emit(&output::render(&output::dump_isa_json()));
            ExitCode::SUCCESS
        }
        Mode::Disassemble { binary } => match fs::read(binary) {
            Ok(code) => {
                let dis = disassemble(&code);
                let value =
                    output::disassembly_json(&binary.display().to_string(), code.len(), &dis);
                sink.emit(&output::render(&value));
                ExitCode::SUCCESS
            }
            Err(_) => {
                let msg = format!("Cannot open file: {}", binary.display());
                sink.emit(&output::render(&output::error_json(&msg)));
                ExitCode::FAILURE
            }
        },
        Mode::Run { binary } => match fs::read(binary) {
            Ok(code) => {
                let (result, cpu) = run_emulator(&code, &config.emulator);
                sink.emit(&output::render(&output::emulation_json(&result, &cpu)));
                ExitCode::SUCCESS
            }
            Err(_) => {
                let msg = format!("Cannot open file: {}", binary.display());
                sink.emit(&output::render(&output::error_json(&msg)));
                ExitCode::FAILURE
            }
        },
        Mode::RunSource { source } => run_source_mode(source, &config, &mut sink),
        Mode::Assemble { source } => assemble_mode(source, &config, &mut sink),
    }
}

fn run_source_mode(source: &Path, config: &CliConfig, sink: &mut OutputSink) -> ExitCode {
    if !source.exists() {
        let msg = format!("Cannot open file: {}", source.display());
        sink.emit(&output::render(&output::error_json(&msg)));
        return ExitCode::FAILURE;
    }

    let assembly = assemble_file(source);
    if assembly.context.global_error {
        let value = output::combined_json(&assembly.context, &assembly.source_map, None);
        sink.emit(&output::render(&value));
        return ExitCode::SUCCESS;
    }

    let (result, cpu) = run_emulator(&assembly.context.machine_code, &config.emulator);
    let value = output::combined_json(
        &assembly.context,
        &assembly.source_map,
        Some((&result, &cpu)),
    );
    sink.emit(&output::render(&value));
    ExitCode::SUCCESS
}

fn assemble_mode(source: &Path, config: &CliConfig, sink: &mut OutputSink) -> ExitCode {
    if !source.exists() {
        if config.agent {
            let msg = format!("Cannot open file: {}", source.display());
            sink.emit(&output::render(&output::error_json(&msg)));
        } else {
            eprintln!("Cannot open file: {}", source.display());
        }
        return ExitCode::FAILURE;
    }

    let out_path = com_output_path(source);
    let assembly = assemble_file(source);

    if assembly.context.global_error {
        if config.agent {
            let value = output::assembly_json(&assembly.context, &assembly.source_map);
            sink.emit(&output::render(&value));
            return ExitCode::SUCCESS;
        }
        for diag in &assembly.context.diagnostics {
            eprintln!("{diag}");
        }
        eprintln!("Assembly failed with errors.");
        // A stale output from a previous run would mask the failure.
        let _ = fs::remove_file(&out_path);
        return ExitCode::FAILURE;
    }

    if let Err(err) = fs::write(&out_path, &assembly.context.machine_code) {
        eprintln!("Cannot write {}: {err}", out_path.display());
        return ExitCode::FAILURE;
    }

    if config.agent {
        let value = output::assembly_json(&assembly.context, &assembly.source_map);
        sink.emit(&output::render(&value));
        return ExitCode::SUCCESS;
    }

    for diag in &assembly.context.diagnostics {
        eprintln!("{diag}");
    }
    println!(
        "Successfully assembled {} -> {}",
        source.display(),
        out_path.display()
    );
    println!("Output size: {} bytes", assembly.context.machine_code.len());
    ExitCode::SUCCESS
}

fn com_output_path(source: &Path) -> PathBuf {
    if source
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("asm"))
    {
        source.with_extension("com")
    } else {
        PathBuf::from("output.com")
    }
}
