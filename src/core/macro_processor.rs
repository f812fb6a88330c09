// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Macro preprocessor: MACRO/ENDM definition capture with LOCAL labels,
// REPT and IRP block iteration, and iterative invocation expansion.

use std::collections::HashMap;

use crate::core::report::Diagnostic;
use crate::core::source_map::SourceOrigin;
use crate::core::text_utils::to_upper;

const MAX_EXPANSION_ITERATIONS: usize = 10_000;
const MAX_REPT_COUNT: i64 = 1_000_000;

#[derive(Debug, Clone)]
struct MacroDefinition {
    params: Vec<String>,
    locals: Vec<String>,
    body: Vec<String>,
    defined_at: u32,
}

/// Expand MACRO/REPT/IRP constructs in place. Returns false on a fatal
/// preprocessor error (unterminated block, reserved-name redefinition,
/// malformed IRP, recursion cap); warnings are appended and expansion
/// continues.
pub fn expand_macros(
    lines: &mut Vec<String>,
    origins: &mut Vec<SourceOrigin>,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    let mut macros: HashMap<String, MacroDefinition> = HashMap::new();
    let mut local_counter: u32 = 0;

    // Phase 1: collect definitions, comment them out.
    let mut i = 0;
    while i < lines.len() {
        let (tok1, tok2, rest) = split_line(&lines[i]);
        let u1 = to_upper(&tok1);
        let u2 = to_upper(&tok2);

        if u2 == "MACRO" {
            let name = u1;
            if is_reserved_word(&name) {
                diagnostics.push(Diagnostic::error(
                    origins[i].line,
                    format!("Cannot define macro with reserved name '{name}'"),
                    "",
                ));
                return false;
            }
            if let Some(prev) = macros.get(&name) {
                diagnostics.push(Diagnostic::warning(
                    origins[i].line,
                    format!(
                        "Macro '{name}' redefined (previous at line {})",
                        prev.defined_at
                    ),
                    "",
                ));
            }
            let params: Vec<String> = split_idents(&rest).iter().map(|p| to_upper(p)).collect();
            let Some(endm) = find_matching_endm(lines, i + 1) else {
                diagnostics.push(Diagnostic::error(
                    origins[i].line,
                    format!("MACRO '{name}' without matching ENDM"),
                    "",
                ));
                return false;
            };

            let mut def = MacroDefinition {
                params,
                locals: Vec::new(),
                body: Vec::new(),
                defined_at: origins[i].line,
            };
            for line in lines.iter().take(endm).skip(i + 1) {
                let (btok1, btok2, brest) = split_line(line);
                if to_upper(&btok1) == "LOCAL" {
                    let mut local_args = btok2;
                    if !brest.is_empty() {
                        local_args.push(' ');
                        local_args.push_str(&brest);
                    }
                    for name in split_idents(&local_args) {
                        def.locals.push(to_upper(&name));
                    }
                } else {
                    def.body.push(line.clone());
                }
            }
            macros.insert(name, def);

            for line in lines.iter_mut().take(endm + 1).skip(i) {
                *line = format!("; [MACRO DEF] {line}");
            }
            i = endm + 1;
            continue;
        }

        if u1 == "REPT" || u1 == "IRP" {
            // Left for phase 2; just verify the block terminates.
            let Some(endm) = find_matching_endm(lines, i + 1) else {
                diagnostics.push(Diagnostic::error(
                    origins[i].line,
                    format!("{u1} without matching ENDM"),
                    "",
                ));
                return false;
            };
            i = endm + 1;
            continue;
        }

        if u1 == "ENDM" {
            diagnostics.push(Diagnostic::error(
                origins[i].line,
                "ENDM without matching MACRO, REPT, or IRP",
                "",
            ));
            return false;
        }

        i += 1;
    }

    if macros.is_empty() && !has_rept_or_irp(lines) {
        return true;
    }

    // Phase 2: sweep until stable.
    for _ in 0..MAX_EXPANSION_ITERATIONS {
        let mut expanded = false;

        for i in 0..lines.len() {
            let trimmed = lines[i].trim();
            if trimmed.is_empty() || trimmed.starts_with(';') {
                continue;
            }
            let (tok1, tok2, rest) = split_line(&lines[i]);
            let u1 = to_upper(&tok1);
            let u2 = to_upper(&tok2);

            if u1 == "REPT" {
                if !expand_rept(lines, origins, diagnostics, i, &tok2) {
                    return false;
                }
                expanded = true;
                break;
            }
            if u1 == "IRP" {
                if !expand_irp(lines, origins, diagnostics, i, &tok2, &rest) {
                    return false;
                }
                expanded = true;
                break;
            }

            // Invocation: "NAME args" or "label: NAME args".
            let (name, label_prefix, arg_str) = if macros.contains_key(&u1) {
                let mut args = tok2;
                if !rest.is_empty() {
                    if !args.is_empty() {
                        args.push(' ');
                    }
                    args.push_str(&rest);
                }
                (u1, String::new(), args)
            } else if tok1.ends_with(':') && macros.contains_key(&u2) {
                (u2, tok1, rest)
            } else {
                continue;
            };

            let def = macros[&name].clone();
            let args = parse_macro_arguments(&arg_str);

            if args.len() < def.params.len() {
                diagnostics.push(Diagnostic::warning(
                    origins[i].line,
                    format!(
                        "Macro '{name}' invoked with {} args, expected {}",
                        args.len(),
                        def.params.len()
                    ),
                    "Missing arguments will be empty strings",
                ));
            } else if args.len() > def.params.len() {
                diagnostics.push(Diagnostic::warning(
                    origins[i].line,
                    format!(
                        "Macro '{name}' invoked with {} args, expected {}",
                        args.len(),
                        def.params.len()
                    ),
                    "Extra arguments will be ignored",
                ));
            }

            let local_replacements: Vec<String> = def
                .locals
                .iter()
                .map(|_| {
                    let fresh = format!("??{local_counter:04X}");
                    local_counter += 1;
                    fresh
                })
                .collect();

            let mut expansion = Vec::new();
            if !label_prefix.is_empty() {
                expansion.push(label_prefix);
            }
            expansion.push(format!("; >>> MACRO {name}"));
            for body_line in &def.body {
                expansion.push(substitute_params(
                    body_line,
                    &def.params,
                    &args,
                    &def.locals,
                    &local_replacements,
                ));
            }
            expansion.push(format!("; <<< END MACRO {name}"));

            splice(lines, origins, i, i, expansion);
            expanded = true;
            break;
        }

        if !expanded {
            return true;
        }
    }

    diagnostics.push(Diagnostic::error(
        0,
        format!("Macro expansion iteration limit exceeded ({MAX_EXPANSION_ITERATIONS})"),
        "Check for recursive or mutually-recursive macro invocations",
    ));
    false
}

fn has_rept_or_irp(lines: &[String]) -> bool {
    lines.iter().any(|line| {
        let (tok1, _, _) = split_line(line);
        let u1 = to_upper(&tok1);
        u1 == "REPT" || u1 == "IRP"
    })
}

fn expand_rept(
    lines: &mut Vec<String>,
    origins: &mut Vec<SourceOrigin>,
    diagnostics: &mut Vec<Diagnostic>,
    at: usize,
    count_text: &str,
) -> bool {
    if count_text.is_empty() {
        diagnostics.push(Diagnostic::error(
            origins[at].line,
            "REPT directive missing repeat count",
            "Usage: REPT <count>",
        ));
        return false;
    }
    let Some(count) = parse_block_count(count_text) else {
        diagnostics.push(Diagnostic::error(
            origins[at].line,
            "REPT count must be a non-negative numeric literal",
            format!("Got: '{count_text}'"),
        ));
        return false;
    };
    let Some(endm) = find_matching_endm(lines, at + 1) else {
        diagnostics.push(Diagnostic::error(
            origins[at].line,
            "REPT without matching ENDM",
            "",
        ));
        return false;
    };

    let body: Vec<String> = lines[at + 1..endm].to_vec();
    let mut expansion = vec![format!("; >>> REPT {count_text}")];
    for _ in 0..count {
        expansion.extend(body.iter().cloned());
    }
    expansion.push("; <<< END REPT".to_string());
    splice(lines, origins, at, endm, expansion);
    true
}

fn expand_irp(
    lines: &mut Vec<String>,
    origins: &mut Vec<SourceOrigin>,
    diagnostics: &mut Vec<Diagnostic>,
    at: usize,
    param_tok: &str,
    rest: &str,
) -> bool {
    if param_tok.is_empty() {
        diagnostics.push(Diagnostic::error(
            origins[at].line,
            "IRP directive missing parameter name",
            "Usage: IRP param, <item1, item2, ...>",
        ));
        return false;
    }

    let mut param = to_upper(param_tok);
    let had_comma = param.ends_with(',');
    if had_comma {
        param.pop();
    }

    let mut items_part = rest.trim().to_string();
    if !had_comma {
        if !items_part.starts_with(',') {
            diagnostics.push(Diagnostic::error(
                origins[at].line,
                "IRP directive missing comma after parameter name",
                "Usage: IRP param, <item1, item2, ...>",
            ));
            return false;
        }
        items_part = items_part[1..].trim().to_string();
    }

    if !items_part.starts_with('<') {
        diagnostics.push(Diagnostic::error(
            origins[at].line,
            "IRP directive missing angle-bracket list",
            "Usage: IRP param, <item1, item2, ...>",
        ));
        return false;
    }

    let mut close = None;
    let mut depth = 0usize;
    for (pos, c) in items_part.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(pos);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(close) = close else {
        diagnostics.push(Diagnostic::error(
            origins[at].line,
            "IRP directive has unmatched '<'",
            "Usage: IRP param, <item1, item2, ...>",
        ));
        return false;
    };

    let items = split_idents(&items_part[1..close]);
    let Some(endm) = find_matching_endm(lines, at + 1) else {
        diagnostics.push(Diagnostic::error(
            origins[at].line,
            "IRP without matching ENDM",
            "",
        ));
        return false;
    };

    let body: Vec<String> = lines[at + 1..endm].to_vec();
    let params = [param];
    let mut expansion = vec![format!("; >>> IRP {param_tok}")];
    for item in &items {
        let args = [item.clone()];
        for body_line in &body {
            expansion.push(substitute_params(body_line, &params, &args, &[], &[]));
        }
    }
    expansion.push("; <<< END IRP".to_string());
    splice(lines, origins, at, endm, expansion);
    true
}

/// Replace lines[start..=end] with `expansion`, every new line inheriting
/// the invocation site's origin.
fn splice(
    lines: &mut Vec<String>,
    origins: &mut Vec<SourceOrigin>,
    start: usize,
    end: usize,
    expansion: Vec<String>,
) {
    let origin = origins[start].clone();
    let count = expansion.len();
    lines.splice(start..=end, expansion);
    origins.splice(start..=end, std::iter::repeat(origin).take(count));
}

/// Split a line into (first token, second token, rest), respecting `'...'`
/// strings and stripping `;` comments from the rest.
fn split_line(line: &str) -> (String, String, String) {
    let bytes: Vec<char> = line.chars().collect();
    let len = bytes.len();
    let mut i = 0;

    let skip_ws = |i: &mut usize| {
        while *i < len && (bytes[*i] == ' ' || bytes[*i] == '\t') {
            *i += 1;
        }
    };
    let take_token = |i: &mut usize| -> String {
        let start = *i;
        while *i < len && bytes[*i] != ' ' && bytes[*i] != '\t' && bytes[*i] != ';' {
            if bytes[*i] == '\'' {
                *i += 1;
                while *i < len && bytes[*i] != '\'' {
                    *i += 1;
                }
                if *i < len {
                    *i += 1;
                }
            } else {
                *i += 1;
            }
        }
        bytes[start..*i].iter().collect()
    };

    skip_ws(&mut i);
    if i >= len || bytes[i] == ';' {
        return (String::new(), String::new(), String::new());
    }
    let tok1 = take_token(&mut i);

    skip_ws(&mut i);
    if i >= len || bytes[i] == ';' {
        return (tok1, String::new(), String::new());
    }
    let tok2 = take_token(&mut i);

    skip_ws(&mut i);
    let mut rest = String::new();
    if i < len && bytes[i] != ';' {
        let mut in_str = false;
        for &c in &bytes[i..] {
            if c == '\'' {
                in_str = !in_str;
                rest.push(c);
            } else if c == ';' && !in_str {
                break;
            } else {
                rest.push(c);
            }
        }
        rest.truncate(rest.trim_end().len());
    }
    (tok1, tok2, rest)
}

fn split_idents(s: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    for c in s.chars() {
        match c {
            ';' => break,
            ',' => {
                let t = current.trim();
                if !t.is_empty() {
                    result.push(t.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let t = current.trim();
    if !t.is_empty() {
        result.push(t.to_string());
    }
    result
}

/// REPT counts accept the same bases as ordinary literals but allow values
/// past the 16-bit range, up to a sanity limit.
fn parse_block_count(s: &str) -> Option<i64> {
    let upper = to_upper(s);
    let mut digits = upper.as_str();
    let mut base = 10;
    match upper.as_bytes().last()? {
        b'H' => {
            base = 16;
            digits = &upper[..upper.len() - 1];
        }
        b'B' => {
            base = 2;
            digits = &upper[..upper.len() - 1];
        }
        b'O' | b'Q' => {
            base = 8;
            digits = &upper[..upper.len() - 1];
        }
        b'D' => digits = &upper[..upper.len() - 1],
        _ => {
            if upper.len() > 2 && upper.starts_with("0X") {
                base = 16;
                digits = &upper[2..];
            } else if upper.len() > 2 && upper.starts_with("0B") {
                base = 2;
                digits = &upper[2..];
            }
        }
    }
    if digits.is_empty() {
        return None;
    }
    let value = i64::from_str_radix(digits, base).ok()?;
    if !(0..=MAX_REPT_COUNT).contains(&value) {
        return None;
    }
    Some(value)
}

fn is_reserved_word(upper: &str) -> bool {
    if crate::isa::find_entry(upper).is_some()
        || crate::isa::register_code(upper).is_some()
        || crate::isa::segment_register(upper).is_some()
    {
        return true;
    }
    matches!(
        upper,
        "IP" | "ORG"
            | "DB"
            | "DW"
            | "DD"
            | "EQU"
            | "PROC"
            | "ENDP"
            | "RESB"
            | "RESW"
            | "SEGMENT"
            | "ENDS"
            | "ASSUME"
            | "END"
            | "INCLUDE"
            | "MACRO"
            | "ENDM"
            | "LOCAL"
            | "REPT"
            | "IRP"
            | "REP"
            | "REPE"
            | "REPNE"
            | "REPZ"
            | "REPNZ"
            | "BYTE"
            | "WORD"
            | "PTR"
            | "OFFSET"
            | "SHORT"
            | "NEAR"
            | "FAR"
            | "DUP"
            | "XLATB"
    )
}

/// Substitute macro parameters and LOCAL names in one body line. The `&`
/// concatenation operator is consumed. Strings and comments pass through
/// untouched.
fn substitute_params(
    line: &str,
    param_names: &[String],
    arg_values: &[String],
    local_names: &[String],
    local_replacements: &[String],
) -> String {
    let chars: Vec<char> = line.chars().collect();
    let len = chars.len();
    let mut result = String::with_capacity(line.len());
    let mut i = 0;
    let mut in_string = false;
    let mut in_comment = false;

    while i < len {
        let c = chars[i];
        if in_comment {
            result.push(c);
            i += 1;
            continue;
        }
        if c == ';' && !in_string {
            in_comment = true;
            result.push(c);
            i += 1;
            continue;
        }
        if c == '\'' {
            in_string = !in_string;
            result.push(c);
            i += 1;
            continue;
        }
        if in_string {
            result.push(c);
            i += 1;
            continue;
        }
        if c == '&' {
            i += 1;
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' || c == '?' || c == '.' {
            let start = i;
            while i < len
                && (chars[i].is_ascii_alphanumeric()
                    || chars[i] == '_'
                    || chars[i] == '?'
                    || chars[i] == '.')
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let upper = to_upper(&word);
            if let Some(p) = param_names.iter().position(|n| *n == upper) {
                result.push_str(arg_values.get(p).map(String::as_str).unwrap_or(""));
            } else if let Some(l) = local_names.iter().position(|n| *n == upper) {
                result.push_str(&local_replacements[l]);
            } else {
                result.push_str(&word);
            }
        } else {
            result.push(c);
            i += 1;
        }
    }
    result
}

/// Invocation arguments: comma-separated, but commas inside `<...>` or
/// `'...'` do not split.
fn parse_macro_arguments(arg_str: &str) -> Vec<String> {
    if arg_str.trim().is_empty() {
        return Vec::new();
    }
    let mut args = Vec::new();
    let mut current = String::new();
    let mut angle_depth = 0usize;
    let mut in_string = false;

    for c in arg_str.chars() {
        match c {
            ';' if !in_string && angle_depth == 0 => break,
            '\'' if angle_depth == 0 => {
                in_string = !in_string;
                current.push(c);
            }
            '<' if !in_string => {
                angle_depth += 1;
                current.push(c);
            }
            '>' if !in_string && angle_depth > 0 => {
                angle_depth -= 1;
                current.push(c);
            }
            ',' if !in_string && angle_depth == 0 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let t = current.trim();
    if !t.is_empty() {
        args.push(t.to_string());
    }
    args
}

/// Find the matching ENDM for a block opened just before `start_after`,
/// accounting for nested MACRO/REPT/IRP blocks.
fn find_matching_endm(lines: &[String], start_after: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, line) in lines.iter().enumerate().skip(start_after) {
        let (tok1, tok2, _) = split_line(line);
        let u1 = to_upper(&tok1);
        let u2 = to_upper(&tok2);
        if u2 == "MACRO" || u1 == "REPT" || u1 == "IRP" {
            depth += 1;
        } else if u1 == "ENDM" {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}
