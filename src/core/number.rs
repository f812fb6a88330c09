// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Numeric literal parsing.
//!
//! Recognized forms: decimal (default, optional `D` suffix), hex (`H` suffix
//! or `0x` prefix), binary (`B` suffix or `0b` prefix), octal (`O`/`Q`
//! suffix). Suffixes are checked before prefixes so `0B8H` parses as hex.
//! Digits are validated before conversion so the error can name the
//! offending character.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberError {
    pub reason: String,
}

impl NumberError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for NumberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for NumberError {}

/// Parse a numeric literal into the assembler's 16-bit value domain
/// (-32768..=65535). Overflow is an error, never silent wraparound.
pub fn parse_number(text: &str) -> Result<i32, NumberError> {
    if text.is_empty() {
        return Err(NumberError::new("Empty numeric literal."));
    }
    let original = text;
    let upper = text.to_ascii_uppercase();
    let mut digits = upper.as_str();
    let mut base = 10u32;
    let mut base_label = "decimal";

    match upper.as_bytes()[upper.len() - 1] {
        b'H' => {
            base = 16;
            base_label = "hex";
            digits = &upper[..upper.len() - 1];
        }
        b'B' => {
            base = 2;
            base_label = "binary";
            digits = &upper[..upper.len() - 1];
        }
        b'O' | b'Q' => {
            base = 8;
            base_label = "octal";
            digits = &upper[..upper.len() - 1];
        }
        b'D' => {
            digits = &upper[..upper.len() - 1];
        }
        _ => {
            if upper.len() > 2 && upper.starts_with("0X") {
                base = 16;
                base_label = "hex";
                digits = &upper[2..];
            } else if upper.len() > 2 && upper.starts_with("0B") {
                base = 2;
                base_label = "binary";
                digits = &upper[2..];
            }
        }
    }

    if digits.is_empty() {
        return Err(NumberError::new(format!(
            "Numeric prefix with no digits following in '{original}'."
        )));
    }

    for c in digits.chars() {
        let bad = match base {
            2 => c != '0' && c != '1',
            8 => !('0'..='7').contains(&c),
            16 => !c.is_ascii_hexdigit(),
            _ => !c.is_ascii_digit(),
        };
        if bad {
            let detail = match base {
                2 => format!(
                    "Binary literal '{original}' contains non-binary digit '{c}'. Valid binary digits: 0, 1."
                ),
                8 => format!(
                    "Octal literal '{original}' contains non-octal digit '{c}'. Valid octal digits: 0-7."
                ),
                16 => format!(
                    "Hex literal '{original}' contains non-hex character '{c}'. Valid hex digits: 0-9, A-F."
                ),
                _ => format!("Decimal literal '{original}' contains non-digit character '{c}'."),
            };
            return Err(NumberError::new(detail));
        }
    }

    match i64::from_str_radix(digits, base) {
        Ok(value) if (-32768..=65535).contains(&value) => Ok(value as i32),
        Ok(_) => Err(NumberError::new(format!(
            "Numeric literal '{original}' overflows. Maximum value is 65535 (FFFFh) for 16-bit."
        ))),
        Err(_) => Err(NumberError::new(format!(
            "Invalid {base_label} literal '{original}'."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_decimal() {
        assert_eq!(parse_number("42"), Ok(42));
        assert_eq!(parse_number("0"), Ok(0));
        assert_eq!(parse_number("55D"), Ok(55));
        assert_eq!(parse_number("55d"), Ok(55));
        assert_eq!(parse_number("65535"), Ok(65535));
    }

    #[test]
    fn parse_hex_suffix_and_prefix() {
        assert_eq!(parse_number("100h"), Ok(0x100));
        assert_eq!(parse_number("0FFH"), Ok(0xFF));
        assert_eq!(parse_number("0x2A"), Ok(42));
        assert_eq!(parse_number("0X2a"), Ok(42));
    }

    #[test]
    fn hex_suffix_wins_over_binary_prefix() {
        // 0B8H must parse as hex 0xB8, not as a binary-prefixed literal.
        assert_eq!(parse_number("0B8H"), Ok(0xB8));
    }

    #[test]
    fn parse_binary_and_octal() {
        assert_eq!(parse_number("101010b"), Ok(42));
        assert_eq!(parse_number("0b101010"), Ok(42));
        assert_eq!(parse_number("52o"), Ok(42));
        assert_eq!(parse_number("52Q"), Ok(42));
    }

    #[test]
    fn bad_digit_names_the_character() {
        let err = parse_number("12G4h").unwrap_err();
        assert!(err.reason.contains("'G'"));
        let err = parse_number("1021b").unwrap_err();
        assert!(err.reason.contains("non-binary"));
        let err = parse_number("189o").unwrap_err();
        assert!(err.reason.contains("non-octal"));
    }

    #[test]
    fn overflow_is_an_error() {
        let err = parse_number("65536").unwrap_err();
        assert!(err.reason.contains("overflows"));
        assert!(parse_number("10000h").is_err());
    }

    #[test]
    fn bare_prefix_is_an_error() {
        assert!(parse_number("h").is_err());
        let err = parse_number("0x").unwrap_err();
        // Falls through as decimal "0x" -> bad digit 'X'
        assert!(!err.reason.is_empty());
    }

    proptest! {
        #[test]
        fn decimal_round_trip(value in 0u32..=65535) {
            prop_assert_eq!(parse_number(&value.to_string()), Ok(value as i32));
        }

        #[test]
        fn hex_round_trip(value in 0u32..=65535) {
            let text = format!("0x{:X}", value);
            prop_assert_eq!(parse_number(&text), Ok(value as i32));
        }

        #[test]
        fn hex_suffix_round_trip(value in 0u32..=65535) {
            // Leading zero keeps the literal from being read as an identifier.
            let text = format!("0{:X}h", value);
            prop_assert_eq!(parse_number(&text), Ok(value as i32));
        }

        #[test]
        fn binary_round_trip(value in 0u32..=65535) {
            let text = format!("0b{:b}", value);
            prop_assert_eq!(parse_number(&text), Ok(value as i32));
        }
    }
}
