// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Two-pass assembler.
//!
//! Pass 1 walks every line computing instruction sizes to place labels; no
//! bytes are written. Pass 2 re-walks with the symbol table complete,
//! emitting machine code and the listing. Displacement sizing is
//! deterministic across passes (symbol-involving memory operands always
//! reserve 16 bits), so label addresses cannot shift between them.

pub mod cli;
pub mod encode;
pub mod operand;
pub mod output;
#[cfg(test)]
mod tests;

use std::path::Path;

use crate::core::expr::EvalContext;
use crate::core::macro_processor::expand_macros;
use crate::core::preprocess::expand_includes;
use crate::core::report::{Diagnostic, Severity};
use crate::core::source_map::SourceMap;
use crate::core::symbol_table::{SymbolEntry, SymbolKind, SymbolTable};
use crate::core::text_utils::to_upper;
use crate::core::tokenizer::{tokenize, Token, TokenKind};

use operand::{parse_operand, Operand, OperandKind};

/// One pass-2 listing record: where a source line landed and what it became.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    pub address: i32,
    pub line: u32,
    pub bytes: Vec<u8>,
    pub source: String,
    pub decoded: String,
}

/// Single-run assembler state, threaded through both passes.
#[derive(Debug, Default)]
pub struct AsmContext {
    pub symbols: SymbolTable,
    pub current_address: i32,
    pub machine_code: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
    pub listing: Vec<ListingEntry>,
    pub pass1: bool,
    pub current_procedure: String,
    pub global_error: bool,
    current_line_bytes: Vec<u8>,
    // Label duplication is only observable while pass 1 defines symbols;
    // these survive the pass-boundary diagnostic reset.
    pass1_warnings: Vec<Diagnostic>,
}

impl AsmContext {
    pub fn new() -> Self {
        Self {
            pass1: true,
            ..Self::default()
        }
    }

    pub fn error(&mut self, line: u32, message: impl Into<String>, hint: impl Into<String>) {
        self.push_diagnostic(Diagnostic::error(line, message, hint));
    }

    pub fn warning(&mut self, line: u32, message: impl Into<String>, hint: impl Into<String>) {
        self.push_diagnostic(Diagnostic::warning(line, message, hint));
    }

    pub fn emit_byte(&mut self, byte: u8) {
        if !self.pass1 {
            self.machine_code.push(byte);
            self.current_line_bytes.push(byte);
        }
        self.current_address += 1;
    }

    pub fn emit_word(&mut self, word: u16) {
        self.emit_byte((word & 0xFF) as u8);
        self.emit_byte((word >> 8) as u8);
    }

    /// Emit a ModR/M byte plus displacement for a memory operand.
    ///
    /// `reg_field` is the 3-bit reg/opcode-extension field. Displacement
    /// sizing: symbol-involving operands are pinned to 16-bit (phase-error
    /// prevention); zero displacements drop the bytes except for bare [BP],
    /// whose mod=00 encoding is overloaded as direct addressing; signed-8
    /// displacements use one byte; everything else two.
    pub fn emit_modrm(&mut self, reg_field: u8, mem: &Operand) {
        let OperandKind::Memory {
            rm,
            disp,
            involves_symbol,
            ..
        } = mem.kind
        else {
            return;
        };
        if rm == -1 {
            self.emit_byte(0x06 | (reg_field << 3));
            self.emit_word(disp as u16);
            return;
        }
        let mut mode: u8 = if involves_symbol {
            2
        } else if disp == 0 && rm != 6 {
            0
        } else if (-128..=127).contains(&disp) {
            1
        } else {
            2
        };
        if rm == 6 && mode == 0 {
            mode = 1;
        }
        self.emit_byte((mode << 6) | (reg_field << 3) | rm as u8);
        match mode {
            1 => self.emit_byte((disp & 0xFF) as u8),
            2 => self.emit_word((disp & 0xFFFF) as u16),
            _ => {}
        }
    }
}

impl EvalContext for AsmContext {
    fn symbol_value(&self, name: &str) -> Option<i32> {
        self.symbols.get(name).map(|e| e.value)
    }

    fn qualify_symbol(&self, name: &str) -> String {
        if name.starts_with('.') && !self.current_procedure.is_empty() {
            to_upper(&format!("{}{}", self.current_procedure, name))
        } else {
            to_upper(name)
        }
    }

    fn closest_symbol(&self, name: &str) -> Option<(String, u32)> {
        self.symbols
            .closest(name, 2)
            .map(|(n, e)| (n.to_string(), e.defined_line))
    }

    fn current_address(&self) -> i32 {
        self.current_address
    }

    fn first_pass(&self) -> bool {
        self.pass1
    }

    fn in_procedure(&self) -> bool {
        !self.current_procedure.is_empty()
    }

    fn push_diagnostic(&mut self, diag: Diagnostic) {
        if diag.severity == Severity::Error {
            self.global_error = true;
        }
        self.diagnostics.push(diag);
    }

    fn note_symbol(&mut self) {
        // Symbol involvement is tracked per displacement term by the
        // operand parser's flag scope; nothing to record globally.
    }
}

/// Result of assembling a source file end to end (includes + macros + both
/// passes). `preprocess_failed` marks a fatal include/macro error; the
/// context then carries only the preprocessor diagnostics.
pub struct SourceAssembly {
    pub context: AsmContext,
    pub lines: Vec<String>,
    pub source_map: SourceMap,
    pub preprocess_failed: bool,
}

pub fn assemble_file(path: &Path) -> SourceAssembly {
    let expanded = expand_includes(path);
    let mut lines = expanded.lines;
    let mut origins = expanded.origins;
    let mut pre_diags = expanded.diagnostics;

    if !expanded.ok {
        let mut context = AsmContext::new();
        for diag in pre_diags {
            context.push_diagnostic(diag);
        }
        context.global_error = true;
        return SourceAssembly {
            context,
            lines,
            source_map: SourceMap::new(origins),
            preprocess_failed: true,
        };
    }

    if !expand_macros(&mut lines, &mut origins, &mut pre_diags) {
        let mut context = AsmContext::new();
        for diag in pre_diags {
            context.push_diagnostic(diag);
        }
        context.global_error = true;
        return SourceAssembly {
            context,
            lines,
            source_map: SourceMap::new(origins),
            preprocess_failed: true,
        };
    }

    let context = assemble_lines(&lines, &pre_diags);
    SourceAssembly {
        context,
        lines,
        source_map: SourceMap::new(origins),
        preprocess_failed: false,
    }
}

/// Run both passes over expanded lines. `seed_diagnostics` (macro warnings)
/// are re-seeded into pass 2 so they survive the pass-1 diagnostic reset.
pub fn assemble_lines(lines: &[String], seed_diagnostics: &[Diagnostic]) -> AsmContext {
    let mut ctx = AsmContext::new();
    for diag in seed_diagnostics {
        ctx.diagnostics.push(diag.clone());
    }

    ctx.pass1 = true;
    ctx.current_address = 0;
    for (i, line) in lines.iter().enumerate() {
        let tokens = tokenize(line, i as u32 + 1);
        assemble_line(&mut ctx, &tokens, i as u32 + 1, line);
    }

    // Pass 1 diagnostics are discarded; only pass 2 sees the full symbol
    // table and can judge accurately.
    ctx.diagnostics.clear();
    for diag in seed_diagnostics {
        ctx.diagnostics.push(diag.clone());
    }
    let dup_warnings = std::mem::take(&mut ctx.pass1_warnings);
    ctx.diagnostics.extend(dup_warnings);
    ctx.global_error = false;
    ctx.pass1 = false;
    ctx.current_address = 0;
    ctx.machine_code.clear();
    for (i, line) in lines.iter().enumerate() {
        let tokens = tokenize(line, i as u32 + 1);
        assemble_line(&mut ctx, &tokens, i as u32 + 1, line);
    }
    ctx
}

pub fn assemble_line(ctx: &mut AsmContext, tokens: &[Token], line_num: u32, source_line: &str) {
    if tokens.is_empty() {
        return;
    }
    let mut idx = 0usize;
    let start_addr = ctx.current_address;
    ctx.current_line_bytes.clear();

    // name EQU expr
    if tokens.len() >= 3
        && tokens[0].kind == TokenKind::Identifier
        && to_upper(&tokens[1].text) == "EQU"
    {
        let name = to_upper(&tokens[0].text);
        let mut value_idx = 2;
        let value = crate::core::expr::evaluate(ctx, tokens, &mut value_idx);
        ctx.symbols.define(
            name,
            SymbolEntry {
                value,
                kind: SymbolKind::Equ,
                defined_line: tokens[0].line,
            },
        );
        return;
    }

    if tokens[0].kind == TokenKind::LabelDef {
        let mut label = tokens[0].text.clone();
        if label.starts_with('.') {
            if !ctx.current_procedure.is_empty() {
                label = format!("{}{}", ctx.current_procedure, label);
            } else {
                ctx.warning(
                    tokens[0].line,
                    format!("Local label {label} outside procedure"),
                    "Local labels (starting with '.') must be inside a PROC/ENDP block. Either \
                     wrap your code in a PROC or use a global label (no '.' prefix).",
                );
            }
        }
        let label = to_upper(&label);
        if ctx.pass1 {
            let previous_label = ctx
                .symbols
                .get(&label)
                .filter(|e| e.kind == SymbolKind::Label)
                .map(|e| e.defined_line);
            if let Some(prev_line) = previous_label {
                ctx.pass1_warnings.push(Diagnostic::warning(
                    tokens[0].line,
                    format!("Label '{label}' redefined (previous definition at line {prev_line})"),
                    "Each label should be defined once. If you need the same name in different \
                     scopes, use local labels with '.' prefix inside PROC/ENDP blocks.",
                ));
            }
            let address = ctx.current_address;
            ctx.symbols.define(
                label,
                SymbolEntry {
                    value: address,
                    kind: SymbolKind::Label,
                    defined_line: tokens[0].line,
                },
            );
        }
        idx += 1;
    }

    if idx >= tokens.len() {
        return;
    }

    let mut mnemonic = to_upper(&tokens[idx].text);
    idx += 1;

    // REP prefixes attach to the following string primitive.
    if matches!(mnemonic.as_str(), "REP" | "REPE" | "REPZ") {
        ctx.emit_byte(0xF3);
        if idx < tokens.len() {
            mnemonic = to_upper(&tokens[idx].text);
            idx += 1;
        }
    } else if matches!(mnemonic.as_str(), "REPNE" | "REPNZ") {
        ctx.emit_byte(0xF2);
        if idx < tokens.len() {
            mnemonic = to_upper(&tokens[idx].text);
            idx += 1;
        }
    }

    match mnemonic.as_str() {
        "ORG" => {
            directive_org(ctx, tokens, idx);
            return;
        }
        "DB" => {
            directive_db(ctx, tokens, idx);
            return;
        }
        "DW" => {
            directive_dw(ctx, tokens, idx);
            return;
        }
        "DD" => {
            directive_dd(ctx, tokens, idx);
            return;
        }
        "RESB" | "RESW" => {
            directive_res(ctx, tokens, idx, mnemonic == "RESW");
            return;
        }
        "PROC" => {
            directive_proc(ctx, tokens, idx);
            return;
        }
        "ENDP" => {
            ctx.current_procedure.clear();
            return;
        }
        _ => {}
    }

    let mut p = idx;
    let op1 = parse_operand(ctx, tokens, &mut p);
    let op2 = if p < tokens.len() && tokens[p].kind == TokenKind::Comma {
        p += 1;
        parse_operand(ctx, tokens, &mut p)
    } else {
        None
    };

    if p < tokens.len() {
        ctx.error(
            tokens[p].line,
            "Extra tokens at end of line",
            "Unexpected content after instruction. Check for missing commas, stray characters, \
             or a comment that doesn't start with ';'.",
        );
    }

    if !encode::validate_instruction(ctx, &mnemonic, op1.as_ref(), op2.as_ref(), tokens[0].line) {
        return;
    }

    let mut decoded = mnemonic.clone();
    if let Some(op1) = &op1 {
        decoded.push(' ');
        decoded.push_str(&op1.format());
        if let Some(op2) = &op2 {
            decoded.push_str(", ");
            decoded.push_str(&op2.format());
        }
    }

    // At most one operand can carry a segment override; emit it first.
    if let Some(prefix) = op1.as_ref().and_then(|o| o.segment_prefix) {
        ctx.emit_byte(prefix);
    }
    if let Some(prefix) = op2.as_ref().and_then(|o| o.segment_prefix) {
        ctx.emit_byte(prefix);
    }

    encode::encode_instruction(ctx, &mnemonic, op1.as_ref(), op2.as_ref(), tokens[0].line);

    // Drift check between the ISA catalog and the encoders.
    if !ctx.pass1 && ctx.current_line_bytes.is_empty() && !ctx.global_error {
        ctx.error(
            tokens[0].line,
            format!(
                "Internal: mnemonic '{mnemonic}' passed ISA validation but has no code path in \
                 the encoder"
            ),
            "This is an assembler bug. The instruction is listed in the ISA database but no \
             encoder handles it. Please report this.",
        );
    }

    if !ctx.pass1 {
        let bytes = ctx.current_line_bytes.clone();
        ctx.listing.push(ListingEntry {
            address: start_addr,
            line: line_num,
            bytes,
            source: source_line.to_string(),
            decoded,
        });
    }
}

fn directive_org(ctx: &mut AsmContext, tokens: &[Token], idx: usize) {
    if ctx.current_address > 0 && !ctx.pass1 {
        ctx.warning(
            tokens[0].line,
            "ORG directive after code has been emitted",
            "ORG sets the address counter but does not move existing code. Place ORG at the \
             start of your source, before any instructions or data.",
        );
    }
    let args: Vec<&Token> = tokens[idx..]
        .iter()
        .filter(|t| t.kind != TokenKind::Comma)
        .collect();
    if args.len() == 1 && args[0].kind == TokenKind::Number {
        match crate::core::number::parse_number(&args[0].text) {
            Ok(value) => ctx.current_address = value,
            Err(err) => ctx.error(
                args[0].line,
                format!("Invalid numeric literal in ORG: {}", args[0].text),
                if err.reason.is_empty() {
                    "ORG requires a numeric value. Common usage: ORG 100h (for .COM files)."
                        .to_string()
                } else {
                    err.reason
                },
            ),
        }
    }
}

fn directive_db(ctx: &mut AsmContext, tokens: &[Token], mut idx: usize) {
    while idx < tokens.len() {
        let is_plain_string = tokens[idx].kind == TokenKind::StringLit
            && !matches!(
                tokens.get(idx + 1).map(|t| t.text.as_str()),
                Some("+" | "-" | "*" | "/")
            );

        if is_plain_string {
            let bytes: Vec<u8> = tokens[idx].text.bytes().collect();
            for b in bytes {
                ctx.emit_byte(b);
            }
            idx += 1;
        } else {
            let value = crate::core::expr::evaluate(ctx, tokens, &mut idx);
            ctx.emit_byte((value & 0xFF) as u8);
        }

        if idx < tokens.len() {
            if tokens[idx].kind == TokenKind::Comma {
                idx += 1;
            } else {
                if !ctx.pass1 {
                    ctx.error(
                        tokens[idx].line,
                        "Expected comma in DB",
                        "DB values must be comma-separated. Example: DB 'Hello', 0Dh, 0Ah, '$'",
                    );
                }
                idx += 1;
            }
        }
    }
}

fn directive_dw(ctx: &mut AsmContext, tokens: &[Token], mut idx: usize) {
    while idx < tokens.len() {
        let value = crate::core::expr::evaluate(ctx, tokens, &mut idx);
        ctx.emit_word((value & 0xFFFF) as u16);
        if idx < tokens.len() {
            if tokens[idx].kind == TokenKind::Comma {
                idx += 1;
            } else {
                if !ctx.pass1 {
                    ctx.error(
                        tokens[idx].line,
                        "Expected comma in DW",
                        "DW values must be comma-separated. Example: DW 1234h, 5678h",
                    );
                }
                idx += 1;
            }
        }
    }
}

fn directive_dd(ctx: &mut AsmContext, tokens: &[Token], mut idx: usize) {
    while idx < tokens.len() {
        let value = crate::core::expr::evaluate(ctx, tokens, &mut idx);
        ctx.emit_word((value & 0xFFFF) as u16);
        ctx.emit_word(((value >> 16) & 0xFFFF) as u16);
        if idx < tokens.len() {
            if tokens[idx].kind == TokenKind::Comma {
                idx += 1;
            } else {
                if !ctx.pass1 {
                    ctx.error(
                        tokens[idx].line,
                        "Expected comma in DD",
                        "DD values must be comma-separated. Example: DD 12345678h",
                    );
                }
                idx += 1;
            }
        }
    }
}

fn directive_res(ctx: &mut AsmContext, tokens: &[Token], mut idx: usize, word: bool) {
    if idx < tokens.len() {
        let mut count = crate::core::expr::evaluate(ctx, tokens, &mut idx);
        if word {
            count *= 2;
        }
        for _ in 0..count.max(0) {
            ctx.emit_byte(0);
        }
    }
}

fn directive_proc(ctx: &mut AsmContext, tokens: &[Token], idx: usize) {
    let proc_label = tokens[..idx.saturating_sub(1)]
        .iter()
        .find(|t| t.kind == TokenKind::LabelDef)
        .map(|t| t.text.trim_end_matches(':').to_string());
    match proc_label {
        Some(name) if !name.is_empty() => ctx.current_procedure = to_upper(&name),
        _ => ctx.error(
            tokens[0].line,
            "PROC without label",
            "PROC must be on the same line as a label. Example: myproc: PROC",
        ),
    }
}
