// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembler-side operand parsing.
//!
//! An operand is an optional segment override, an optional BYTE/WORD size
//! prefix, then a register, segment register, `[...]` memory reference or
//! immediate expression. Memory operands resolve their base/index register
//! combination to the 8086 R/M code and record whether any symbol took part
//! in the displacement; that flag pins the displacement to 16 bits in both
//! passes so label addresses cannot shift between them.

use crate::core::expr::{evaluate, EvalContext};
use crate::core::report::Diagnostic;
use crate::core::tokenizer::{Token, TokenKind};
use crate::isa;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register {
        reg: u8,
        size: u8,
    },
    SegmentReg {
        index: u8,
    },
    Immediate {
        value: i32,
    },
    Memory {
        /// R/M code 0..=7, or -1 for direct addressing.
        rm: i8,
        disp: i32,
        size: u8,
        explicit_size: bool,
        involves_symbol: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub segment_prefix: Option<u8>,
}

impl Operand {
    pub fn is_register(&self) -> bool {
        matches!(self.kind, OperandKind::Register { .. })
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.kind, OperandKind::Memory { .. })
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.kind, OperandKind::Immediate { .. })
    }

    pub fn is_segment_reg(&self) -> bool {
        matches!(self.kind, OperandKind::SegmentReg { .. })
    }

    pub fn reg(&self) -> u8 {
        match self.kind {
            OperandKind::Register { reg, .. } => reg,
            OperandKind::SegmentReg { index } => index,
            _ => 0,
        }
    }

    pub fn size(&self) -> u8 {
        match self.kind {
            OperandKind::Register { size, .. } => size,
            OperandKind::Memory { size, .. } => size,
            OperandKind::SegmentReg { .. } => 16,
            OperandKind::Immediate { .. } => 0,
        }
    }

    pub fn value(&self) -> i32 {
        match self.kind {
            OperandKind::Immediate { value } => value,
            OperandKind::Memory { disp, .. } => disp,
            _ => 0,
        }
    }

    /// Operand description used in shape-mismatch hints and the listing,
    /// e.g. `REG16(AX)`, `MEM8`, `IMM(5)`, `SREG(DS)`.
    pub fn describe(&self) -> String {
        match &self.kind {
            OperandKind::Register { reg, size } => {
                format!("REG{size}({})", isa::register_name(*reg, *size))
            }
            OperandKind::Memory { size, .. } => format!("MEM{size}"),
            OperandKind::Immediate { value } => format!("IMM({value})"),
            OperandKind::SegmentReg { index } => {
                format!("SREG({})", isa::SREG_NAMES[*index as usize])
            }
        }
    }

    /// Listing text, e.g. `REG(AX)` or `MEM(WORD [BX+SI+4])`.
    pub fn format(&self) -> String {
        match &self.kind {
            OperandKind::Register { reg, size } => {
                format!("REG({})", isa::register_name(*reg, *size))
            }
            OperandKind::SegmentReg { index } => {
                format!("SREG({})", isa::SREG_NAMES[*index as usize])
            }
            OperandKind::Immediate { value } => format!("IMM({value})"),
            OperandKind::Memory { rm, disp, size, .. } => {
                let width = if *size == 8 { "BYTE" } else { "WORD" };
                let seg = if self.segment_prefix.is_some() { "SEG:" } else { "" };
                if *rm == -1 {
                    format!("MEM({width} {seg}[{disp}])")
                } else {
                    let base = rm_base_name(*rm);
                    if *disp == 0 {
                        format!("MEM({width} {seg}[{base}])")
                    } else if *disp > 0 {
                        format!("MEM({width} {seg}[{base}+{disp}])")
                    } else {
                        format!("MEM({width} {seg}[{base}{disp}])")
                    }
                }
            }
        }
    }
}

pub fn rm_base_name(rm: i8) -> &'static str {
    match rm {
        0 => "BX+SI",
        1 => "BX+DI",
        2 => "BP+SI",
        3 => "BP+DI",
        4 => "SI",
        5 => "DI",
        6 => "BP",
        _ => "BX",
    }
}

/// Parse one operand starting at `tokens[*idx]`. Returns None when no tokens
/// were consumed (end of line or an immediately following comma).
pub fn parse_operand(
    ctx: &mut dyn EvalContext,
    tokens: &[Token],
    idx: &mut usize,
) -> Option<Operand> {
    let start = *idx;
    let mut segment_prefix = None;

    // Segment override before the operand: `ES: [BX]`. The trailing colon
    // made the tokenizer retag it as a label definition.
    if let Some(tok) = tokens.get(*idx) {
        if tok.kind == TokenKind::LabelDef {
            if let Some(prefix) = isa::segment_prefix(&tok.text) {
                segment_prefix = Some(prefix);
                *idx += 1;
            }
        }
    }

    if *idx >= tokens.len() {
        return if *idx > start {
            Some(Operand {
                kind: OperandKind::Immediate { value: 0 },
                segment_prefix,
            })
        } else {
            None
        };
    }

    // Optional BYTE/WORD size prefix.
    let mut size_override = 0u8;
    if tokens[*idx].kind == TokenKind::Identifier {
        match tokens[*idx].text.to_ascii_uppercase().as_str() {
            "BYTE" => {
                size_override = 8;
                *idx += 1;
            }
            "WORD" => {
                size_override = 16;
                *idx += 1;
            }
            _ => {}
        }
    }

    if *idx >= tokens.len() {
        return if *idx > start {
            Some(Operand {
                kind: OperandKind::Immediate { value: 0 },
                segment_prefix,
            })
        } else {
            None
        };
    }

    let tok = &tokens[*idx];

    if tok.kind == TokenKind::LBracket {
        let mem = parse_memory(ctx, tokens, idx, size_override, &mut segment_prefix);
        return Some(Operand {
            kind: mem,
            segment_prefix,
        });
    }

    if let Some((reg, size)) = isa::register_code(&tok.text) {
        *idx += 1;
        return Some(Operand {
            kind: OperandKind::Register { reg, size },
            segment_prefix,
        });
    }

    if tok.kind == TokenKind::Identifier {
        if let Some(index) = isa::segment_register(&tok.text) {
            *idx += 1;
            return Some(Operand {
                kind: OperandKind::SegmentReg { index },
                segment_prefix,
            });
        }
    }

    let value = evaluate(ctx, tokens, idx);
    if *idx == start {
        return None;
    }
    Some(Operand {
        kind: OperandKind::Immediate { value },
        segment_prefix,
    })
}

fn parse_memory(
    ctx: &mut dyn EvalContext,
    tokens: &[Token],
    idx: &mut usize,
    size_override: u8,
    segment_prefix: &mut Option<u8>,
) -> OperandKind {
    *idx += 1; // consume '['
    let mut has_bx = false;
    let mut has_bp = false;
    let mut has_si = false;
    let mut has_di = false;
    let mut displacement: i32 = 0;
    let mut involves_symbol = false;
    let mut line = 0;

    while *idx < tokens.len() && tokens[*idx].kind != TokenKind::RBracket {
        let tok = &tokens[*idx];
        line = tok.line;

        if tok.kind == TokenKind::Plus {
            *idx += 1;
            continue;
        }

        // Segment override inside brackets: `[ES:BX]`.
        if tok.kind == TokenKind::LabelDef {
            if let Some(prefix) = isa::segment_prefix(&tok.text) {
                *segment_prefix = Some(prefix);
                *idx += 1;
                continue;
            }
        }

        if let Some((_, _)) = isa::register_code(&tok.text) {
            match tok.text.to_ascii_uppercase().as_str() {
                "BX" => has_bx = true,
                "BP" => has_bp = true,
                "SI" => has_si = true,
                "DI" => has_di = true,
                other => ctx.push_diagnostic(Diagnostic::error(
                    tok.line,
                    format!("Invalid register in memory operand: {other}"),
                    "Only BX, BP, SI, and DI can be used inside []. AX, CX, DX, SP are not \
                     valid base/index registers on 8086.",
                )),
            }
            *idx += 1;
        } else {
            involves_symbol |= eval_displacement(ctx, tokens, idx, &mut displacement);
        }
    }
    if *idx < tokens.len() && tokens[*idx].kind == TokenKind::RBracket {
        *idx += 1;
    }

    let rm: i8 = match (has_bx, has_bp, has_si, has_di) {
        (true, false, true, false) => 0,
        (true, false, false, true) => 1,
        (false, true, true, false) => 2,
        (false, true, false, true) => 3,
        (false, false, true, false) => 4,
        (false, false, false, true) => 5,
        (false, true, false, false) => 6,
        (true, false, false, false) => 7,
        (false, false, false, false) => -1,
        _ => {
            ctx.push_diagnostic(Diagnostic::error(
                line,
                "Invalid addressing mode combination",
                "Valid 8086 addressing modes: [BX+SI], [BX+DI], [BP+SI], [BP+DI], [SI], [DI], \
                 [BP], [BX], or [direct_address]. You cannot combine SI+DI, BX+BP, or use \
                 AX/CX/DX/SP inside brackets.",
            ));
            -1
        }
    };

    OperandKind::Memory {
        rm,
        disp: displacement,
        size: if size_override != 0 { size_override } else { 16 },
        explicit_size: size_override != 0,
        involves_symbol,
    }
}

/// Evaluate one displacement term, accumulating into `displacement` and
/// reporting whether the expression touched a symbol.
fn eval_displacement(
    ctx: &mut dyn EvalContext,
    tokens: &[Token],
    idx: &mut usize,
    displacement: &mut i32,
) -> bool {
    // The symbol flag is tracked by the context; wrap the call so only this
    // term's lookups count.
    struct FlagScope<'a> {
        inner: &'a mut dyn EvalContext,
        saw: bool,
    }
    impl EvalContext for FlagScope<'_> {
        fn symbol_value(&self, name: &str) -> Option<i32> {
            self.inner.symbol_value(name)
        }
        fn qualify_symbol(&self, name: &str) -> String {
            self.inner.qualify_symbol(name)
        }
        fn closest_symbol(&self, name: &str) -> Option<(String, u32)> {
            self.inner.closest_symbol(name)
        }
        fn current_address(&self) -> i32 {
            self.inner.current_address()
        }
        fn first_pass(&self) -> bool {
            self.inner.first_pass()
        }
        fn in_procedure(&self) -> bool {
            self.inner.in_procedure()
        }
        fn push_diagnostic(&mut self, diag: Diagnostic) {
            self.inner.push_diagnostic(diag);
        }
        fn note_symbol(&mut self) {
            self.saw = true;
            self.inner.note_symbol();
        }
    }

    let mut scope = FlagScope { inner: ctx, saw: false };
    *displacement = displacement.wrapping_add(evaluate(&mut scope, tokens, idx));
    scope.saw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tokenizer::tokenize;
    use std::collections::HashMap;

    struct TestCtx {
        symbols: HashMap<String, i32>,
        diags: Vec<Diagnostic>,
    }

    impl TestCtx {
        fn new() -> Self {
            Self {
                symbols: HashMap::new(),
                diags: Vec::new(),
            }
        }
    }

    impl EvalContext for TestCtx {
        fn symbol_value(&self, name: &str) -> Option<i32> {
            self.symbols.get(name).copied()
        }
        fn qualify_symbol(&self, name: &str) -> String {
            name.to_ascii_uppercase()
        }
        fn closest_symbol(&self, _name: &str) -> Option<(String, u32)> {
            None
        }
        fn current_address(&self) -> i32 {
            0
        }
        fn first_pass(&self) -> bool {
            true
        }
        fn in_procedure(&self) -> bool {
            false
        }
        fn push_diagnostic(&mut self, diag: Diagnostic) {
            self.diags.push(diag);
        }
        fn note_symbol(&mut self) {}
    }

    fn parse_one(ctx: &mut TestCtx, src: &str) -> Operand {
        let tokens = tokenize(src, 1);
        let mut idx = 0;
        parse_operand(ctx, &tokens, &mut idx).expect("operand")
    }

    #[test]
    fn registers_both_widths() {
        let mut ctx = TestCtx::new();
        let op = parse_one(&mut ctx, "AX");
        assert_eq!(op.kind, OperandKind::Register { reg: 0, size: 16 });
        let op = parse_one(&mut ctx, "bh");
        assert_eq!(op.kind, OperandKind::Register { reg: 7, size: 8 });
    }

    #[test]
    fn segment_register_operand_vs_prefix() {
        let mut ctx = TestCtx::new();
        let op = parse_one(&mut ctx, "DS");
        assert_eq!(op.kind, OperandKind::SegmentReg { index: 3 });

        let op = parse_one(&mut ctx, "ES:[DI]");
        assert_eq!(op.segment_prefix, Some(0x26));
        assert!(matches!(op.kind, OperandKind::Memory { rm: 5, .. }));
    }

    #[test]
    fn segment_override_inside_brackets() {
        let mut ctx = TestCtx::new();
        let op = parse_one(&mut ctx, "[ES:BX]");
        assert_eq!(op.segment_prefix, Some(0x26));
        assert!(matches!(op.kind, OperandKind::Memory { rm: 7, .. }));
    }

    #[test]
    fn memory_rm_codes_cover_all_eight_modes() {
        let mut ctx = TestCtx::new();
        let cases = [
            ("[BX+SI]", 0i8),
            ("[BX+DI]", 1),
            ("[BP+SI]", 2),
            ("[BP+DI]", 3),
            ("[SI]", 4),
            ("[DI]", 5),
            ("[BP]", 6),
            ("[BX]", 7),
        ];
        for (src, want) in cases {
            let op = parse_one(&mut ctx, src);
            match op.kind {
                OperandKind::Memory { rm, .. } => assert_eq!(rm, want, "{src}"),
                other => panic!("{src}: {other:?}"),
            }
        }
        assert!(ctx.diags.is_empty());
    }

    #[test]
    fn direct_memory_is_rm_minus_one() {
        let mut ctx = TestCtx::new();
        let op = parse_one(&mut ctx, "[1234h]");
        assert_eq!(
            op.kind,
            OperandKind::Memory {
                rm: -1,
                disp: 0x1234,
                size: 16,
                explicit_size: false,
                involves_symbol: false,
            }
        );
    }

    #[test]
    fn displacement_accumulates() {
        let mut ctx = TestCtx::new();
        let op = parse_one(&mut ctx, "[BX+SI+2]");
        match op.kind {
            OperandKind::Memory { rm, disp, .. } => {
                assert_eq!(rm, 0);
                assert_eq!(disp, 2);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn symbol_in_displacement_sets_flag() {
        let mut ctx = TestCtx::new();
        ctx.symbols.insert("DATA".to_string(), 0x200);
        let op = parse_one(&mut ctx, "[BX+data]");
        match op.kind {
            OperandKind::Memory {
                disp,
                involves_symbol,
                ..
            } => {
                assert_eq!(disp, 0x200);
                assert!(involves_symbol);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn byte_word_prefixes() {
        let mut ctx = TestCtx::new();
        let op = parse_one(&mut ctx, "BYTE [BX]");
        match op.kind {
            OperandKind::Memory {
                size,
                explicit_size,
                ..
            } => {
                assert_eq!(size, 8);
                assert!(explicit_size);
            }
            other => panic!("{other:?}"),
        }
        let op = parse_one(&mut ctx, "WORD [100h]");
        assert_eq!(op.size(), 16);
    }

    #[test]
    fn invalid_base_register_is_diagnosed() {
        let mut ctx = TestCtx::new();
        let _ = parse_one(&mut ctx, "[AX]");
        assert!(!ctx.diags.is_empty());
        assert!(ctx.diags[0].message.contains("Invalid register"));
    }

    #[test]
    fn invalid_combination_is_diagnosed() {
        let mut ctx = TestCtx::new();
        let _ = parse_one(&mut ctx, "[SI+DI]");
        assert!(ctx
            .diags
            .iter()
            .any(|d| d.message.contains("Invalid addressing mode combination")));
    }

    #[test]
    fn immediate_expression() {
        let mut ctx = TestCtx::new();
        let op = parse_one(&mut ctx, "2 + 3 * 4");
        assert_eq!(op.kind, OperandKind::Immediate { value: 14 });
    }

    #[test]
    fn describe_and_format_shapes() {
        let mut ctx = TestCtx::new();
        assert_eq!(parse_one(&mut ctx, "AX").describe(), "REG16(AX)");
        assert_eq!(parse_one(&mut ctx, "5").describe(), "IMM(5)");
        assert_eq!(parse_one(&mut ctx, "BYTE [BX]").describe(), "MEM8");
        assert_eq!(parse_one(&mut ctx, "AL").format(), "REG(AL)");
        assert_eq!(
            parse_one(&mut ctx, "[BX+SI+4]").format(),
            "MEM(WORD [BX+SI+4])"
        );
        assert_eq!(parse_one(&mut ctx, "[8]").format(), "MEM(WORD [8])");
    }
}
