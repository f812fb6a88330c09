// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! JSON emission for every CLI mode.
//!
//! One top-level object per mode, built with `serde_json::json!`. A final
//! escaping pass rewrites every char at or above U+007F as `\u00XX`, so
//! captured program output (arbitrary bytes) stays byte-faithful and the
//! document remains plain ASCII.

use serde_json::{json, Value};

use crate::core::report::{Diagnostic, Severity};
use crate::core::source_map::SourceMap;
use crate::core::symbol_table::SymbolKind;
use crate::decoder::{hex_byte, hex_bytes, hex_imm16};
use crate::disassembler::Disassembly;
use crate::emulator::cpu::{self, Cpu};
use crate::emulator::EmulatorResult;
use crate::isa;

use super::AsmContext;

/// Serialize and apply the ASCII-only escaping contract.
pub fn render(value: &Value) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string());
    let mut out = escape_non_ascii(&pretty);
    out.push('\n');
    out
}

/// Escape every char >= U+007F as `\uXXXX`. Bytes mapped through
/// `byte as char` therefore come out as `\u00XX`.
pub fn escape_non_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if (c as u32) >= 0x7F {
            for unit in c.encode_utf16(&mut [0u16; 2]) {
                out.push_str(&format!("\\u{:04X}", unit));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Present captured program bytes as a JSON-safe string: each byte becomes
/// the char with the same code point, escaped later by `render`.
fn bytes_to_text(bytes: &[u8]) -> String {
    bytes.iter().map(|b| *b as char).collect()
}

fn severity_label(severity: Severity) -> &'static str {
    severity.label()
}

fn diagnostic_json(diag: &Diagnostic, source_map: &SourceMap) -> Value {
    let mut obj = json!({
        "level": severity_label(diag.severity),
        "line": diag.line,
    });
    if let Some(origin) = source_map.origin_for_line(diag.line) {
        obj["file"] = json!(origin.file);
        obj["sourceLine"] = json!(origin.line);
    }
    obj["msg"] = json!(diag.message);
    obj["hint"] = json!(diag.hint);
    obj
}

/// Assembly result object for `--agent` mode.
pub fn assembly_json(ctx: &AsmContext, source_map: &SourceMap) -> Value {
    let diagnostics: Vec<Value> = ctx
        .diagnostics
        .iter()
        .map(|d| diagnostic_json(d, source_map))
        .collect();

    let mut symbols = serde_json::Map::new();
    for (name, entry) in ctx.symbols.iter() {
        let mut sym = json!({
            "val": entry.value,
            "type": match entry.kind {
                SymbolKind::Equ => "EQU",
                SymbolKind::Label => "LABEL",
            },
            "line": entry.defined_line,
        });
        if let Some(origin) = source_map.origin_for_line(entry.defined_line) {
            sym["file"] = json!(origin.file);
            sym["sourceLine"] = json!(origin.line);
        }
        symbols.insert(name.clone(), sym);
    }

    let listing: Vec<Value> = ctx
        .listing
        .iter()
        .map(|item| {
            let mut entry = json!({
                "addr": item.address,
                "line": item.line,
                "size": item.bytes.len(),
                "decoded": item.decoded,
            });
            if let Some(origin) = source_map.origin_for_line(item.line) {
                entry["file"] = json!(origin.file);
                entry["sourceLine"] = json!(origin.line);
            }
            entry["src"] = json!(item.source);
            entry["bytes"] = json!(item.bytes);
            entry
        })
        .collect();

    json!({
        "success": !ctx.global_error,
        "diagnostics": diagnostics,
        "symbols": symbols,
        "listing": listing,
        "includes": source_map.include_files(),
    })
}

pub fn disassembly_json(filename: &str, file_size: usize, dis: &Disassembly) -> Value {
    let instructions: Vec<Value> = dis
        .instructions
        .iter()
        .map(|line| {
            json!({
                "addr": line.addr,
                "bytes": line.bytes,
                "hex": hex_bytes(&line.bytes),
                "asm": line.text,
                "size": line.bytes.len(),
            })
        })
        .collect();
    let data_regions: Vec<Value> = dis
        .data_regions
        .iter()
        .map(|region| {
            json!({
                "addr": region.addr,
                "bytes": region.bytes,
                "hex": hex_bytes(&region.bytes),
                "size": region.bytes.len(),
                "msg": "Decode failed or ambiguous",
            })
        })
        .collect();
    json!({
        "file": filename,
        "fileSize": file_size,
        "instructions": instructions,
        "dataRegions": data_regions,
    })
}

fn registers_json(regs: &[u16; 8]) -> Value {
    let mut obj = serde_json::Map::new();
    for (i, name) in isa::REG16_NAMES.iter().enumerate() {
        obj.insert(name.to_string(), json!(hex_imm16(regs[i])));
    }
    Value::Object(obj)
}

fn sregs_json(sregs: &[u16; 4]) -> Value {
    let mut obj = serde_json::Map::new();
    for (i, name) in isa::SREG_NAMES.iter().enumerate() {
        obj.insert(name.to_string(), json!(hex_imm16(sregs[i])));
    }
    Value::Object(obj)
}

fn flag_bits_json(cpu: &Cpu) -> Value {
    json!({
        "CF": cpu.flag(cpu::CF) as u8,
        "PF": cpu.flag(cpu::PF) as u8,
        "AF": cpu.flag(cpu::AF) as u8,
        "ZF": cpu.flag(cpu::ZF) as u8,
        "SF": cpu.flag(cpu::SF) as u8,
        "OF": cpu.flag(cpu::OF) as u8,
        "DF": cpu.flag(cpu::DF) as u8,
        "IF": cpu.flag(cpu::IF) as u8,
    })
}

fn output_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| hex_byte(*b)).collect()
}

fn snapshots_json(result: &EmulatorResult) -> Vec<Value> {
    result
        .snapshots
        .iter()
        .map(|s| {
            let mut snap = json!({
                "addr": hex_imm16(s.addr),
                "cycle": s.cycle,
                "reason": s.reason,
                "nextInst": s.next_inst,
                "hitCount": s.hit_count,
                "registers": registers_json(&s.regs),
                "flags": hex_imm16(s.flags),
                "cursor": { "row": s.cursor_row, "col": s.cursor_col },
                "stack": s.stack.iter().map(|w| hex_imm16(*w)).collect::<Vec<_>>(),
            });
            if !s.mem_dump.is_empty() {
                snap["memDump"] = json!(output_hex(&s.mem_dump));
            }
            if !s.screen_lines.is_empty() {
                snap["screen"] = json!(s.screen_lines);
                if !s.screen_attrs.is_empty() {
                    snap["screenAttrs"] = json!(s.screen_attrs);
                }
            }
            snap
        })
        .collect()
}

fn skipped_json(result: &EmulatorResult) -> Vec<Value> {
    result
        .skipped
        .iter()
        .map(|s| {
            json!({
                "addr": hex_imm16(s.addr),
                "instruction": s.instruction,
                "reason": s.reason,
                "count": s.count,
            })
        })
        .collect()
}

/// Emulation result object for `--run` mode.
pub fn emulation_json(result: &EmulatorResult, cpu: &Cpu) -> Value {
    let mut obj = json!({
        "success": result.success,
        "halted": result.halted,
        "haltReason": result.halt_reason,
        "exitCode": result.exit_code,
        "cyclesExecuted": result.cycles_executed,
        "fidelity": result.fidelity,
        "output": bytes_to_text(&result.output),
        "outputHex": output_hex(&result.output),
        "finalState": {
            "registers": registers_json(&cpu.regs),
            "sregs": sregs_json(&cpu.sregs),
            "IP": hex_imm16(cpu.ip),
            "flags": hex_imm16(cpu.flags),
            "flagBits": flag_bits_json(cpu),
            "cursor": { "row": result.cursor_row, "col": result.cursor_col },
        },
        "snapshots": snapshots_json(result),
        "skipped": skipped_json(result),
        "diagnostics": result.diagnostics,
    });
    if !result.screen.is_empty() {
        obj["screen"] = json!(result.screen);
        if !result.screen_attrs.is_empty() {
            obj["screenAttrs"] = json!(result.screen_attrs);
        }
    }
    if let Some(path) = &result.screenshot_path {
        obj["screenshot"] = json!(path);
    }
    obj
}

/// Combined object for `--run-source`: assembly summary plus emulation.
/// `emulation` is None when assembly failed and nothing was run.
pub fn combined_json(
    ctx: &AsmContext,
    source_map: &SourceMap,
    emulation: Option<(&EmulatorResult, &Cpu)>,
) -> Value {
    let diagnostics: Vec<Value> = ctx
        .diagnostics
        .iter()
        .map(|d| {
            let mut obj = json!({
                "level": severity_label(d.severity),
                "line": d.line,
            });
            if let Some(origin) = source_map.origin_for_line(d.line) {
                obj["file"] = json!(origin.file);
                obj["sourceLine"] = json!(origin.line);
            }
            obj["message"] = json!(d.message);
            if !d.hint.is_empty() {
                obj["hint"] = json!(d.hint);
            }
            obj
        })
        .collect();

    let assembly = json!({
        "success": !ctx.global_error,
        "size": ctx.machine_code.len(),
        "diagnostics": diagnostics,
    });

    let emulation = match emulation {
        Some((result, cpu)) => emulation_json(result, cpu),
        None => json!({
            "success": false,
            "halted": false,
            "haltReason": "",
            "exitCode": 0,
            "cyclesExecuted": 0,
        }),
    };

    json!({
        "assembly": assembly,
        "emulation": emulation,
    })
}

/// `--explain MNEMONIC` output.
pub fn explain_json(mnemonic: &str) -> Value {
    let upper = mnemonic.to_ascii_uppercase();
    match isa::find_entry(&upper) {
        Some(entry) => {
            let forms: Vec<Value> = entry
                .forms
                .iter()
                .map(|form| {
                    json!({
                        "op1": form.op1,
                        "op2": form.op2,
                        "notes": form.notes,
                    })
                })
                .collect();
            json!({ "mnemonic": upper, "forms": forms, "found": true })
        }
        None => json!({ "mnemonic": upper, "forms": [], "found": false }),
    }
}

/// `--dump-isa` output.
pub fn dump_isa_json() -> Value {
    let entries: Vec<Value> = isa::ISA_DB
        .iter()
        .map(|entry| {
            json!({
                "mnemonic": entry.mnemonic,
                "desc": entry.description,
            })
        })
        .collect();
    json!(entries)
}

pub fn error_json(message: &str) -> Value {
    json!({ "error": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source_map::{SourceMap, SourceOrigin};

    #[test]
    fn escape_maps_high_bytes_to_u00xx() {
        let raw: String = [0x41u8, 0xFF, 0x7F].iter().map(|b| *b as char).collect();
        let escaped = escape_non_ascii(&raw);
        assert_eq!(escaped, "A\\u00FF\\u007F");
    }

    #[test]
    fn render_keeps_ascii_untouched() {
        let value = json!({"output": "plain"});
        let rendered = render(&value);
        assert!(rendered.contains("\"output\": \"plain\""));
        assert!(rendered.ends_with('\n'));
    }

    #[test]
    fn assembly_json_carries_source_map_info() {
        let lines = vec!["ORG 100h".to_string(), "MOV AX, 1".to_string()];
        let ctx = crate::assembler::assemble_lines(&lines, &[]);
        let map = SourceMap::new(vec![
            SourceOrigin::new("main.asm", 1),
            SourceOrigin::new("main.asm", 2),
        ]);
        let value = assembly_json(&ctx, &map);
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["includes"], json!(["main.asm"]));
        let listing = value["listing"].as_array().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0]["addr"], json!(0x100));
        assert_eq!(listing[0]["bytes"], json!([0xB8, 1, 0]));
        assert_eq!(listing[0]["sourceLine"], json!(2));
    }

    #[test]
    fn explain_reports_unknown_mnemonics() {
        let value = explain_json("FROB");
        assert_eq!(value["found"], json!(false));
        let value = explain_json("mov");
        assert_eq!(value["found"], json!(true));
        assert!(!value["forms"].as_array().unwrap().is_empty());
    }

    #[test]
    fn emulation_json_shape() {
        let binary = [0xB4, 0x02, 0xB2, 0x41, 0xCD, 0x21, 0xCD, 0x20];
        let (result, cpu) =
            crate::emulator::run_emulator(&binary, &crate::emulator::EmulatorConfig::default());
        let value = emulation_json(&result, &cpu);
        assert_eq!(value["output"], json!("A"));
        assert_eq!(value["outputHex"], json!("41"));
        assert_eq!(value["exitCode"], json!(0));
        assert_eq!(value["finalState"]["registers"]["DX"], json!("0x0041"));
        assert!(value["finalState"]["flagBits"]["IF"].is_number());
    }
}
