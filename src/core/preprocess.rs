// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! INCLUDE pre-expansion.
//!
//! Splices `INCLUDE` directives into one flat line list before tokenization.
//! Each output line gets a parallel source-map record so diagnostics and the
//! listing can name the origin file and line. Include lines themselves are
//! replaced by marker comments to keep the listing aligned.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::report::Diagnostic;
use crate::core::source_map::SourceOrigin;

pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Result of include expansion. `ok` is false when any include failed;
/// callers treat that as fatal for the run.
pub struct ExpandedSource {
    pub lines: Vec<String>,
    pub origins: Vec<SourceOrigin>,
    pub diagnostics: Vec<Diagnostic>,
    pub ok: bool,
}

pub fn expand_includes(root: &Path) -> ExpandedSource {
    let mut out = ExpandedSource {
        lines: Vec::new(),
        origins: Vec::new(),
        diagnostics: Vec::new(),
        ok: true,
    };
    let base_dir = root
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = root
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| root.to_path_buf());
    let mut stack = HashSet::new();
    out.ok = expand_recursive(&file_name, &base_dir, &mut out, &mut stack, 0);
    out
}

fn expand_recursive(
    filepath: &Path,
    base_dir: &Path,
    out: &mut ExpandedSource,
    include_stack: &mut HashSet<PathBuf>,
    depth: usize,
) -> bool {
    if depth > MAX_INCLUDE_DEPTH {
        out.diagnostics.push(Diagnostic::error(
            0,
            format!("Include nesting depth exceeded ({MAX_INCLUDE_DEPTH})"),
            "Check for deeply nested or recursive INCLUDE chains",
        ));
        return false;
    }

    let resolved = if filepath.is_absolute() {
        filepath.to_path_buf()
    } else {
        base_dir.join(filepath)
    };

    let canonical = match fs::canonicalize(&resolved) {
        Ok(path) => path,
        Err(_) => {
            out.diagnostics.push(Diagnostic::error(
                0,
                format!("Cannot open include file: {}", resolved.display()),
                format!(
                    "Resolved from: {} relative to {}",
                    filepath.display(),
                    base_dir.display()
                ),
            ));
            return false;
        }
    };

    if include_stack.contains(&canonical) {
        out.diagnostics.push(Diagnostic::error(
            0,
            format!("Circular include detected: {}", filepath.display()),
            format!("File already in include chain: {}", canonical.display()),
        ));
        return false;
    }

    let contents = match fs::read_to_string(&resolved) {
        Ok(text) => text,
        Err(_) => {
            out.diagnostics.push(Diagnostic::error(
                0,
                format!("Cannot open include file: {}", resolved.display()),
                format!(
                    "Resolved from: {} relative to {}",
                    filepath.display(),
                    base_dir.display()
                ),
            ));
            return false;
        }
    };

    include_stack.insert(canonical.clone());
    let file_dir = resolved
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let resolved_name = resolved.display().to_string();

    let mut ok = true;
    for (i, raw) in contents.lines().enumerate() {
        let origin = SourceOrigin::new(resolved_name.clone(), i as u32 + 1);
        match parse_include_line(raw) {
            IncludeLine::Plain => {
                out.lines.push(raw.to_string());
                out.origins.push(origin);
            }
            IncludeLine::MissingFilename => {
                out.diagnostics.push(Diagnostic::error(
                    out.lines.len() as u32 + 1,
                    "INCLUDE directive missing filename",
                    "Usage: INCLUDE 'file.asm' or INCLUDE \"file.asm\" or INCLUDE file.asm",
                ));
                out.lines.push("; ERROR: INCLUDE missing filename".to_string());
                out.origins.push(origin);
                ok = false;
            }
            IncludeLine::Unterminated(quote) => {
                out.diagnostics.push(Diagnostic::error(
                    out.lines.len() as u32 + 1,
                    "Unterminated string in INCLUDE directive",
                    format!("Expected closing {quote} in: {raw}"),
                ));
                out.lines.push("; ERROR: Unterminated INCLUDE string".to_string());
                out.origins.push(origin);
                ok = false;
            }
            IncludeLine::Include(inc_file) => {
                out.lines.push(format!("; >>> INCLUDE {inc_file}"));
                out.origins.push(origin.clone());

                if !expand_recursive(
                    Path::new(&inc_file),
                    &file_dir,
                    out,
                    include_stack,
                    depth + 1,
                ) {
                    ok = false;
                }

                out.lines.push(format!("; <<< END INCLUDE {inc_file}"));
                out.origins.push(origin);
            }
        }
    }

    include_stack.remove(&canonical);
    ok
}

enum IncludeLine {
    Plain,
    Include(String),
    MissingFilename,
    Unterminated(char),
}

fn parse_include_line(raw: &str) -> IncludeLine {
    let trimmed = raw.trim_start();
    let Some(keyword) = trimmed.get(..7) else {
        return IncludeLine::Plain;
    };
    if !keyword.eq_ignore_ascii_case("INCLUDE") {
        return IncludeLine::Plain;
    }
    let after = &trimmed[7..];
    // Keyword must end the line or be followed by whitespace / a quote,
    // so identifiers like INCLUDED stay ordinary lines.
    match after.chars().next() {
        None => return IncludeLine::MissingFilename,
        Some(c) if c == ' ' || c == '\t' || c == '\'' || c == '"' => {}
        Some(_) => return IncludeLine::Plain,
    }

    let rest = after.trim_start();
    let mut chars = rest.chars();
    match chars.next() {
        None => IncludeLine::MissingFilename,
        Some(quote @ ('\'' | '"')) => {
            let body: String = chars.collect();
            match body.find(quote) {
                Some(end) => {
                    let name = &body[..end];
                    if name.is_empty() {
                        IncludeLine::MissingFilename
                    } else {
                        IncludeLine::Include(name.to_string())
                    }
                }
                None => IncludeLine::Unterminated(quote),
            }
        }
        Some(_) => {
            let end = rest
                .find(|c: char| c == ' ' || c == '\t' || c == ';')
                .unwrap_or(rest.len());
            IncludeLine::Include(rest[..end].to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_temp(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("forge86-pp-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn flat_file_passes_through() {
        let dir = temp_dir("flat");
        let root = write_temp(&dir, "main.asm", "ORG 100h\nRET\n");
        let expanded = expand_includes(&root);
        assert!(expanded.ok);
        assert_eq!(expanded.lines, vec!["ORG 100h", "RET"]);
        assert_eq!(expanded.origins[1].line, 2);
    }

    #[test]
    fn include_splices_with_markers() {
        let dir = temp_dir("splice");
        write_temp(&dir, "lib.asm", "RET\n");
        let root = write_temp(&dir, "main.asm", "INCLUDE 'lib.asm'\nNOP\n");
        let expanded = expand_includes(&root);
        assert!(expanded.ok);
        assert_eq!(expanded.lines[0], "; >>> INCLUDE lib.asm");
        assert_eq!(expanded.lines[1], "RET");
        assert_eq!(expanded.lines[2], "; <<< END INCLUDE lib.asm");
        assert_eq!(expanded.lines[3], "NOP");
        // Marker lines map to the including file, body to the included one.
        assert!(expanded.origins[0].file.ends_with("main.asm"));
        assert!(expanded.origins[1].file.ends_with("lib.asm"));
        assert_eq!(expanded.origins[3].line, 2);
    }

    #[test]
    fn bare_and_double_quoted_filenames() {
        let dir = temp_dir("quotes");
        write_temp(&dir, "a.asm", "NOP\n");
        let root = write_temp(&dir, "main.asm", "INCLUDE a.asm\ninclude \"a.asm\"\n");
        let expanded = expand_includes(&root);
        assert!(expanded.ok);
        let nops = expanded.lines.iter().filter(|l| *l == "NOP").count();
        assert_eq!(nops, 2);
    }

    #[test]
    fn circular_include_is_detected() {
        let dir = temp_dir("circ");
        write_temp(&dir, "a.asm", "INCLUDE 'b.asm'\n");
        write_temp(&dir, "b.asm", "INCLUDE 'a.asm'\n");
        let root = dir.join("a.asm");
        let expanded = expand_includes(&root);
        assert!(!expanded.ok);
        assert!(expanded
            .diagnostics
            .iter()
            .any(|d| d.message.contains("Circular include")));
    }

    #[test]
    fn missing_file_reports_resolution_chain() {
        let dir = temp_dir("missing");
        let root = write_temp(&dir, "main.asm", "INCLUDE 'nope.asm'\n");
        let expanded = expand_includes(&root);
        assert!(!expanded.ok);
        let diag = &expanded.diagnostics[0];
        assert!(diag.message.contains("Cannot open include file"));
        assert!(diag.hint.contains("nope.asm"));
    }

    #[test]
    fn included_identifier_is_not_a_directive() {
        let dir = temp_dir("ident");
        let root = write_temp(&dir, "main.asm", "INCLUDED: DB 1\n");
        let expanded = expand_includes(&root);
        assert!(expanded.ok);
        assert_eq!(expanded.lines[0], "INCLUDED: DB 1");
    }

    #[test]
    fn unterminated_include_string() {
        let dir = temp_dir("unterm");
        let root = write_temp(&dir, "main.asm", "INCLUDE 'broken\n");
        let expanded = expand_includes(&root);
        assert!(!expanded.ok);
        assert!(expanded
            .diagnostics
            .iter()
            .any(|d| d.message.contains("Unterminated")));
    }
}
