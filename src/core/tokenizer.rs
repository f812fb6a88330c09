// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Line tokenizer for assembly source.
//!
//! One line in, a flat token list out. The tokenizer splits on whitespace
//! except inside `'...'` strings, recognizes the single-character operator
//! tokens standalone, retags `ident:` as a label definition and
//! digit-leading identifiers as numbers. It never validates number syntax;
//! that is the number parser's job so errors can carry a precise reason.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LabelDef,
    Identifier,
    Number,
    StringLit,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Colon,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
        }
    }
}

pub fn tokenize(line: &str, line_num: u32) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut cur = String::new();
    let mut in_string = false;

    let flush = |cur: &mut String, tokens: &mut Vec<Token>| {
        if !cur.is_empty() {
            tokens.push(Token::new(TokenKind::Identifier, cur.clone(), line_num));
            cur.clear();
        }
    };

    for c in line.chars() {
        if in_string {
            if c == '\'' {
                in_string = false;
                tokens.push(Token::new(TokenKind::StringLit, cur.clone(), line_num));
                cur.clear();
            } else {
                cur.push(c);
            }
            continue;
        }
        if c == ';' {
            break;
        }
        if c == '\'' {
            in_string = true;
            continue;
        }

        let punct = match c {
            ',' => Some(TokenKind::Comma),
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            ':' => Some(TokenKind::Colon),
            _ => None,
        };

        if let Some(kind) = punct {
            flush(&mut cur, &mut tokens);
            if kind == TokenKind::Colon {
                // ident ':' becomes a label definition
                match tokens.last_mut() {
                    Some(prev) if prev.kind == TokenKind::Identifier => {
                        prev.kind = TokenKind::LabelDef;
                    }
                    _ => tokens.push(Token::new(kind, ":", line_num)),
                }
            } else {
                tokens.push(Token::new(kind, c.to_string(), line_num));
            }
            continue;
        }

        if c.is_whitespace() {
            flush(&mut cur, &mut tokens);
            continue;
        }
        cur.push(c);
    }
    flush(&mut cur, &mut tokens);

    for t in &mut tokens {
        if t.kind == TokenKind::Identifier
            && t.text.chars().next().is_some_and(|c| c.is_ascii_digit())
        {
            t.kind = TokenKind::Number;
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<TokenKind> {
        tokenize(line, 1).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_instruction_line() {
        let tokens = tokenize("MOV AX, 1234h", 1);
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].text, "AX");
        assert_eq!(tokens[2].kind, TokenKind::Comma);
        assert_eq!(tokens[3].kind, TokenKind::Number);
        assert_eq!(tokens[3].text, "1234h");
    }

    #[test]
    fn label_definition_is_retagged() {
        let tokens = tokenize("start: MOV AX, 1", 5);
        assert_eq!(tokens[0].kind, TokenKind::LabelDef);
        assert_eq!(tokens[0].text, "start");
        assert_eq!(tokens[0].line, 5);
    }

    #[test]
    fn segment_override_prefix_becomes_label_def() {
        // ES: [DI] tokenizes ES as LabelDef; the operand parser resolves it.
        let tokens = tokenize("MOV ES:[DI], AL", 1);
        assert_eq!(tokens[1].kind, TokenKind::LabelDef);
        assert_eq!(tokens[1].text, "ES");
        assert_eq!(tokens[2].kind, TokenKind::LBracket);
    }

    #[test]
    fn comment_terminates_line() {
        let tokens = tokenize("RET ; done here", 1);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "RET");
    }

    #[test]
    fn string_literal_preserves_content() {
        let tokens = tokenize("DB 'Hello, world', 0", 1);
        assert_eq!(tokens[1].kind, TokenKind::StringLit);
        assert_eq!(tokens[1].text, "Hello, world");
        assert_eq!(tokens[2].kind, TokenKind::Comma);
        assert_eq!(tokens[3].kind, TokenKind::Number);
    }

    #[test]
    fn semicolon_inside_string_is_not_a_comment() {
        let tokens = tokenize("DB 'a;b'", 1);
        assert_eq!(tokens[1].text, "a;b");
    }

    #[test]
    fn memory_operand_brackets() {
        assert_eq!(
            kinds("MOV AX, [BX+SI+2]"),
            vec![
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::LBracket,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Identifier,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::RBracket,
            ]
        );
    }

    #[test]
    fn digit_leading_identifier_becomes_number() {
        let tokens = tokenize("DB 0FFh", 1);
        assert_eq!(tokens[1].kind, TokenKind::Number);
        assert_eq!(tokens[1].text, "0FFh");
    }

    #[test]
    fn empty_and_comment_only_lines() {
        assert!(tokenize("", 1).is_empty());
        assert!(tokenize("   ; just a comment", 1).is_empty());
    }
}
