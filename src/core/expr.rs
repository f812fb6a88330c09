// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Expression evaluation.
//!
//! Precedence-climbing evaluator over the token stream. Operands are numeric
//! literals, single-quoted strings (first byte), `$` (current address) and
//! identifiers resolved against the symbol table. Pass 1 substitutes 0 for
//! unknown symbols so forward references size correctly; pass 2 reports them
//! with hints.

use crate::core::number::parse_number;
use crate::core::report::Diagnostic;
use crate::core::tokenizer::{Token, TokenKind};
use crate::isa;

/// Evaluation context supplied by the assembler. The evaluator itself stays
/// free of pass and symbol-table mechanics; everything it needs to resolve a
/// name or report a problem comes through here.
pub trait EvalContext {
    /// Resolve an already-qualified, uppercased symbol name.
    fn symbol_value(&self, name: &str) -> Option<i32>;

    /// Qualify a `.local` name with the enclosing procedure, then uppercase.
    fn qualify_symbol(&self, name: &str) -> String;

    /// Closest defined symbol within edit distance 2: (name, defined line).
    fn closest_symbol(&self, name: &str) -> Option<(String, u32)>;

    fn current_address(&self) -> i32;

    /// True while sizing (pass 1); unknown symbols are silently 0 then.
    fn first_pass(&self) -> bool;

    fn in_procedure(&self) -> bool;

    fn push_diagnostic(&mut self, diag: Diagnostic);

    /// Called whenever a name was looked up. The operand parser uses this to
    /// force 16-bit displacements on symbol-involving memory operands.
    fn note_symbol(&mut self);
}

/// Evaluate an expression starting at `tokens[*idx]`, advancing `*idx` past
/// the consumed tokens. Errors are reported through the context; the value 0
/// stands in so assembly can continue and surface further diagnostics.
pub fn evaluate(ctx: &mut dyn EvalContext, tokens: &[Token], idx: &mut usize) -> i32 {
    evaluate_prec(ctx, tokens, idx, 0)
}

fn evaluate_prec(ctx: &mut dyn EvalContext, tokens: &[Token], idx: &mut usize, min_prec: u8) -> i32 {
    if *idx >= tokens.len() {
        return 0;
    }

    let mut lhs;
    let tok = &tokens[*idx];
    match tok.kind {
        TokenKind::Plus | TokenKind::Minus => {
            let negate = tok.kind == TokenKind::Minus;
            *idx += 1;
            // Unary operators bind tighter than any binary operator.
            let val = evaluate_prec(ctx, tokens, idx, 100);
            lhs = if negate { val.wrapping_neg() } else { val };
        }
        TokenKind::LParen => {
            *idx += 1;
            lhs = evaluate_prec(ctx, tokens, idx, 0);
            if *idx < tokens.len() && tokens[*idx].kind == TokenKind::RParen {
                *idx += 1;
            } else {
                ctx.push_diagnostic(Diagnostic::error(
                    tok.line,
                    "Expected ')'",
                    "Check for unmatched parentheses in your expression.",
                ));
            }
        }
        TokenKind::Number => {
            lhs = match parse_number(&tok.text) {
                Ok(value) => value,
                Err(err) => {
                    ctx.push_diagnostic(Diagnostic::error(
                        tok.line,
                        format!("Invalid numeric literal: {}", tok.text),
                        err.reason,
                    ));
                    0
                }
            };
            *idx += 1;
        }
        TokenKind::Identifier if starts_like_symbol(&tok.text) => {
            lhs = resolve_identifier(ctx, tok);
            *idx += 1;
        }
        TokenKind::StringLit => {
            lhs = tok.text.as_bytes().first().copied().unwrap_or(0) as i32;
            *idx += 1;
        }
        _ => {
            if !ctx.first_pass() {
                ctx.push_diagnostic(unexpected_token_diag(tok));
            }
            *idx += 1;
            return 0;
        }
    }

    while *idx < tokens.len() {
        let prec = match tokens[*idx].kind {
            TokenKind::Plus | TokenKind::Minus => 1,
            TokenKind::Star | TokenKind::Slash => 2,
            _ => break,
        };
        if prec < min_prec {
            break;
        }
        let op = tokens[*idx].kind;
        let op_line = tokens[*idx].line;
        *idx += 1;
        let rhs = evaluate_prec(ctx, tokens, idx, prec + 1);
        lhs = match op {
            TokenKind::Plus => lhs.wrapping_add(rhs),
            TokenKind::Minus => lhs.wrapping_sub(rhs),
            TokenKind::Star => lhs.wrapping_mul(rhs),
            _ => {
                if rhs != 0 {
                    lhs.wrapping_div(rhs)
                } else {
                    ctx.push_diagnostic(Diagnostic::error(
                        op_line,
                        "Division by zero",
                        "Expression contains division by zero. Check the divisor value or EQU constant.",
                    ));
                    lhs
                }
            }
        };
    }
    lhs
}

fn starts_like_symbol(text: &str) -> bool {
    matches!(
        text.chars().next(),
        Some(c) if c.is_ascii_alphabetic() || c == '.' || c == '_' || c == '?' || c == '$'
    )
}

fn resolve_identifier(ctx: &mut dyn EvalContext, tok: &Token) -> i32 {
    if tok.text == "$" {
        return ctx.current_address();
    }
    let qualified = ctx.qualify_symbol(&tok.text);
    ctx.note_symbol();
    if let Some(value) = ctx.symbol_value(&qualified) {
        return value;
    }
    if !ctx.first_pass() {
        let hint = undefined_symbol_hint(ctx, &qualified);
        ctx.push_diagnostic(Diagnostic::error(
            tok.line,
            format!("Undefined label {qualified}"),
            hint,
        ));
    }
    0
}

fn undefined_symbol_hint(ctx: &dyn EvalContext, name: &str) -> String {
    // Hex literal missing the leading zero, e.g. FFh
    if name.len() > 1 && name.ends_with('H') {
        let body = &name[..name.len() - 1];
        if body.chars().all(|c| c.is_ascii_hexdigit()) {
            return format!(
                "Did you mean 0{name}? Hex literals starting with A-F must be prefixed with 0."
            );
        }
    }
    if isa::register_code(name).is_some() {
        return format!(
            "'{name}' is a register, not a label. Registers cannot be used in expressions directly."
        );
    }
    if name.starts_with('.') && !ctx.in_procedure() {
        return format!(
            "Local label '{name}' used outside any PROC. Wrap your code in PROC/ENDP, or use a global label."
        );
    }
    if let Some((closest, line)) = ctx.closest_symbol(name) {
        return format!("Did you mean '{closest}'? (defined at line {line})");
    }
    String::new()
}

fn unexpected_token_diag(tok: &Token) -> Diagnostic {
    let text = &tok.text;
    let upper = text.to_ascii_uppercase();
    let hint = if isa::register_code(&upper).is_some() {
        format!(
            "'{text}' is a register and cannot appear in an arithmetic expression. \
             If you meant a memory operand, use [{text}]. If you meant the value in the \
             register, this must be computed at runtime, not assembly time."
        )
    } else if matches!(
        upper.as_str(),
        "DB" | "DW" | "DD" | "EQU" | "PROC" | "ENDP" | "ORG" | "RESB" | "RESW"
    ) {
        format!("'{text}' is a directive and cannot be used as a value in an expression.")
    } else if text == "[" || text == "]" {
        "Brackets indicate a memory operand and cannot appear inside an arithmetic expression."
            .to_string()
    } else {
        format!("'{text}' is not a recognized number, label, or operator.")
    };
    Diagnostic::error(
        tok.line,
        format!("Unexpected token in expression: {text}"),
        hint,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::Severity;
    use crate::core::tokenizer::tokenize;
    use std::collections::HashMap;

    struct TestCtx {
        symbols: HashMap<String, i32>,
        address: i32,
        pass1: bool,
        diags: Vec<Diagnostic>,
        saw_symbol: bool,
    }

    impl TestCtx {
        fn new() -> Self {
            Self {
                symbols: HashMap::new(),
                address: 0x100,
                pass1: false,
                diags: Vec::new(),
                saw_symbol: false,
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
        fn closest_symbol(&self, name: &str) -> Option<(String, u32)> {
            self.symbols
                .keys()
                .find(|k| k.as_str() != name && crate::core::text_utils::edit_distance(k, name) <= 2)
                .map(|k| (k.clone(), 7))
        }
        fn current_address(&self) -> i32 {
            self.address
        }
        fn first_pass(&self) -> bool {
            self.pass1
        }
        fn in_procedure(&self) -> bool {
            false
        }
        fn push_diagnostic(&mut self, diag: Diagnostic) {
            self.diags.push(diag);
        }
        fn note_symbol(&mut self) {
            self.saw_symbol = true;
        }
    }

    fn eval_str(ctx: &mut TestCtx, src: &str) -> i32 {
        let tokens = tokenize(src, 1);
        let mut idx = 0;
        evaluate(ctx, &tokens, &mut idx)
    }

    #[test]
    fn precedence_and_parentheses() {
        let mut ctx = TestCtx::new();
        assert_eq!(eval_str(&mut ctx, "2 + 3 * 4"), 14);
        assert_eq!(eval_str(&mut ctx, "(2 + 3) * 4"), 20);
        assert_eq!(eval_str(&mut ctx, "10 - 2 - 3"), 5);
        assert_eq!(eval_str(&mut ctx, "-5 + 10"), 5);
        assert!(ctx.diags.is_empty());
    }

    #[test]
    fn dollar_is_current_address() {
        let mut ctx = TestCtx::new();
        assert_eq!(eval_str(&mut ctx, "$ + 2"), 0x102);
    }

    #[test]
    fn string_evaluates_to_first_byte() {
        let mut ctx = TestCtx::new();
        assert_eq!(eval_str(&mut ctx, "'A'"), 0x41);
    }

    #[test]
    fn symbol_lookup_sets_flag() {
        let mut ctx = TestCtx::new();
        ctx.symbols.insert("MSG".to_string(), 0x123);
        assert_eq!(eval_str(&mut ctx, "msg + 1"), 0x124);
        assert!(ctx.saw_symbol);
    }

    #[test]
    fn unknown_symbol_in_pass1_is_silent_zero() {
        let mut ctx = TestCtx::new();
        ctx.pass1 = true;
        assert_eq!(eval_str(&mut ctx, "later"), 0);
        assert!(ctx.diags.is_empty());
    }

    #[test]
    fn unknown_symbol_in_pass2_reports_error() {
        let mut ctx = TestCtx::new();
        assert_eq!(eval_str(&mut ctx, "nowhere"), 0);
        assert_eq!(ctx.diags.len(), 1);
        assert_eq!(ctx.diags[0].severity, Severity::Error);
        assert!(ctx.diags[0].message.contains("NOWHERE"));
    }

    #[test]
    fn hex_literal_hint() {
        let mut ctx = TestCtx::new();
        eval_str(&mut ctx, "FFh");
        assert!(ctx.diags[0].hint.contains("0FFH"));
    }

    #[test]
    fn register_as_value_hint() {
        let mut ctx = TestCtx::new();
        eval_str(&mut ctx, "BX");
        assert!(ctx.diags[0].hint.contains("register"));
    }

    #[test]
    fn fuzzy_match_hint_names_definition_line() {
        let mut ctx = TestCtx::new();
        ctx.symbols.insert("MESSAGE".to_string(), 5);
        eval_str(&mut ctx, "MESAGE");
        assert!(ctx.diags[0].hint.contains("MESSAGE"));
        assert!(ctx.diags[0].hint.contains("line 7"));
    }

    #[test]
    fn division_by_zero_is_diagnosed() {
        let mut ctx = TestCtx::new();
        eval_str(&mut ctx, "10 / 0");
        assert!(ctx.diags[0].message.contains("Division by zero"));
    }
}
