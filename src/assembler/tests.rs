// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// End-to-end assembler tests: encoding, directives, diagnostics, pass
// stability, the assembler->decoder round trip, and assemble-then-emulate
// scenarios.

use proptest::prelude::*;

use crate::assembler::{assemble_lines, AsmContext};
use crate::core::macro_processor::expand_macros;
use crate::core::report::Severity;
use crate::core::source_map::SourceOrigin;
use crate::core::symbol_table::SymbolKind;
use crate::decoder::{decode_instruction, OpKind};
use crate::emulator::{cpu, run_emulator, EmulatorConfig};

fn assemble(source: &str) -> AsmContext {
    let lines: Vec<String> = source.lines().map(str::to_string).collect();
    assemble_lines(&lines, &[])
}

/// Full front-end minus file I/O: macro expansion then both passes.
fn assemble_with_macros(source: &str) -> AsmContext {
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    let mut origins: Vec<SourceOrigin> = (1..=lines.len() as u32)
        .map(|n| SourceOrigin::new("test.asm", n))
        .collect();
    let mut diags = Vec::new();
    assert!(
        expand_macros(&mut lines, &mut origins, &mut diags),
        "macro expansion failed: {diags:?}"
    );
    assemble_lines(&lines, &diags)
}

fn bytes_of(source: &str) -> Vec<u8> {
    let ctx = assemble(source);
    assert!(
        !ctx.global_error,
        "unexpected errors: {:?}",
        ctx.diagnostics
    );
    ctx.machine_code
}

fn errors_of(ctx: &AsmContext) -> Vec<String> {
    ctx.diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect()
}

// --- Encoding basics ---

#[test]
fn mov_reg_imm16() {
    assert_eq!(bytes_of("MOV AX, 1234h"), vec![0xB8, 0x34, 0x12]);
    assert_eq!(bytes_of("MOV CX, 5"), vec![0xB9, 0x05, 0x00]);
}

#[test]
fn mov_reg_imm8() {
    assert_eq!(bytes_of("MOV AH, 02h"), vec![0xB4, 0x02]);
    assert_eq!(bytes_of("MOV DL, 'A'"), vec![0xB2, 0x41]);
}

#[test]
fn mov_byte_mem_imm() {
    assert_eq!(
        bytes_of("MOV BYTE [BX+SI+2], 5"),
        vec![0xC6, 0x40, 0x02, 0x05]
    );
}

#[test]
fn mov_reg_reg_both_widths() {
    assert_eq!(bytes_of("MOV AX, BX"), vec![0x89, 0xD8]);
    assert_eq!(bytes_of("MOV AL, BL"), vec![0x88, 0xD8]);
}

#[test]
fn mov_segment_register_forms() {
    assert_eq!(bytes_of("MOV AX, DS"), vec![0x8C, 0xD8]);
    assert_eq!(bytes_of("MOV DS, AX"), vec![0x8E, 0xD8]);
}

#[test]
fn alu_reg_reg_opcode_bases() {
    assert_eq!(bytes_of("ADD AL, BL"), vec![0x00, 0xD8]);
    assert_eq!(bytes_of("OR AX, BX"), vec![0x09, 0xD8]);
    assert_eq!(bytes_of("ADC AL, BL"), vec![0x10, 0xD8]);
    assert_eq!(bytes_of("SBB AL, BL"), vec![0x18, 0xD8]);
    assert_eq!(bytes_of("AND AL, BL"), vec![0x20, 0xD8]);
    assert_eq!(bytes_of("SUB AX, BX"), vec![0x29, 0xD8]);
    assert_eq!(bytes_of("XOR AX, AX"), vec![0x31, 0xC0]);
    assert_eq!(bytes_of("CMP AL, BL"), vec![0x38, 0xD8]);
    assert_eq!(bytes_of("TEST AX, BX"), vec![0x85, 0xD8]);
}

#[test]
fn alu_reg_imm_group() {
    assert_eq!(bytes_of("ADD AL, 5"), vec![0x80, 0xC0, 0x05]);
    assert_eq!(bytes_of("SUB BX, 100h"), vec![0x81, 0xEB, 0x00, 0x01]);
    assert_eq!(bytes_of("CMP CL, 0"), vec![0x80, 0xF9, 0x00]);
    // TEST takes the F6/F7 path
    assert_eq!(bytes_of("TEST AL, 1"), vec![0xF6, 0xC0, 0x01]);
}

#[test]
fn alu_mem_forms() {
    assert_eq!(bytes_of("ADD AX, [BX]"), vec![0x03, 0x07]);
    assert_eq!(bytes_of("ADD [BX], AX"), vec![0x01, 0x07]);
    assert_eq!(
        bytes_of("ADD WORD [BX], 5"),
        vec![0x81, 0x07, 0x05, 0x00]
    );
}

#[test]
fn inc_dec_short_and_group_forms() {
    assert_eq!(bytes_of("INC AX"), vec![0x40]);
    assert_eq!(bytes_of("DEC DI"), vec![0x4F]);
    assert_eq!(bytes_of("INC AL"), vec![0xFE, 0xC0]);
    assert_eq!(bytes_of("DEC BYTE [BX]"), vec![0xFE, 0x0F]);
    assert_eq!(bytes_of("NOT AX"), vec![0xF7, 0xD0]);
    assert_eq!(bytes_of("NEG CL"), vec![0xF6, 0xD9]);
}

#[test]
fn muldiv_group() {
    assert_eq!(bytes_of("MUL BL"), vec![0xF6, 0xE3]);
    assert_eq!(bytes_of("IMUL BX"), vec![0xF7, 0xEB]);
    assert_eq!(bytes_of("DIV CL"), vec![0xF6, 0xF1]);
    assert_eq!(bytes_of("IDIV CX"), vec![0xF7, 0xF9]);
}

#[test]
fn shift_rotate_forms() {
    assert_eq!(bytes_of("SHL AX, 1"), vec![0xD1, 0xE0]);
    assert_eq!(bytes_of("SHR BL, 1"), vec![0xD0, 0xEB]);
    assert_eq!(bytes_of("SAR AX, CL"), vec![0xD3, 0xF8]);
    assert_eq!(bytes_of("ROL AL, CL"), vec![0xD2, 0xC0]);
    // SAL is SHL
    assert_eq!(bytes_of("SAL AX, 1"), bytes_of("SHL AX, 1"));
}

#[test]
fn shift_by_immediate_warns_80186() {
    let ctx = assemble("SHL AX, 4");
    assert_eq!(ctx.machine_code, vec![0xC1, 0xE0, 0x04]);
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains("80186+")));
}

#[test]
fn push_pop_forms() {
    assert_eq!(bytes_of("PUSH AX"), vec![0x50]);
    assert_eq!(bytes_of("POP DI"), vec![0x5F]);
    assert_eq!(bytes_of("PUSH DS"), vec![0x1E]);
    assert_eq!(bytes_of("POP ES"), vec![0x07]);
    assert_eq!(bytes_of("PUSH WORD [BX]"), vec![0xFF, 0x37]);
    assert_eq!(bytes_of("POP WORD [BX]"), vec![0x8F, 0x07]);
}

#[test]
fn pop_cs_is_an_error() {
    let ctx = assemble("POP CS");
    assert!(errors_of(&ctx)
        .iter()
        .any(|m| m.contains("POP CS is not a valid instruction")));
}

#[test]
fn xchg_forms() {
    assert_eq!(bytes_of("XCHG AX, BX"), vec![0x93]);
    assert_eq!(bytes_of("XCHG BX, AX"), vec![0x93]);
    assert_eq!(bytes_of("XCHG BL, CL"), vec![0x86, 0xCB]);
    assert_eq!(bytes_of("XCHG AX, [BX]"), vec![0x87, 0x07]);
}

#[test]
fn in_out_forms() {
    assert_eq!(bytes_of("IN AL, 60h"), vec![0xE4, 0x60]);
    assert_eq!(bytes_of("IN AX, DX"), vec![0xED]);
    assert_eq!(bytes_of("OUT 60h, AL"), vec![0xE6, 0x60]);
    assert_eq!(bytes_of("OUT DX, AX"), vec![0xEF]);
}

#[test]
fn lea_requires_memory() {
    assert_eq!(bytes_of("LEA DI, [BX+SI+10h]"), vec![0x8D, 0x78, 0x10]);
    let ctx = assemble("LEA AL, [BX]");
    assert!(!errors_of(&ctx).is_empty());
}

#[test]
fn string_and_flag_one_byte_ops() {
    assert_eq!(bytes_of("MOVSB"), vec![0xA4]);
    assert_eq!(bytes_of("STOSW"), vec![0xAB]);
    assert_eq!(bytes_of("SCASB"), vec![0xAE]);
    assert_eq!(bytes_of("CLD"), vec![0xFC]);
    assert_eq!(bytes_of("STI"), vec![0xFB]);
    assert_eq!(bytes_of("PUSHF"), vec![0x9C]);
    assert_eq!(bytes_of("XLAT"), vec![0xD7]);
    assert_eq!(bytes_of("HLT"), vec![0xF4]);
    assert_eq!(bytes_of("PUSHA"), vec![0x60]);
}

#[test]
fn rep_prefixes() {
    assert_eq!(bytes_of("REP MOVSB"), vec![0xF3, 0xA4]);
    assert_eq!(bytes_of("REPE CMPSB"), vec![0xF3, 0xA6]);
    assert_eq!(bytes_of("REPNE SCASB"), vec![0xF2, 0xAE]);
}

#[test]
fn segment_override_prefix_emitted_first() {
    assert_eq!(bytes_of("MOV AL, ES:[DI]"), vec![0x26, 0x8A, 0x05]);
    assert_eq!(bytes_of("MOV AL, [ES:DI]"), vec![0x26, 0x8A, 0x05]);
}

#[test]
fn jumps_and_calls_are_relative() {
    // JMP to 0x100 from ORG 100h: offset = 0x100 - 0x103 = -3
    let bytes = bytes_of("ORG 100h\nstart:\nJMP start");
    assert_eq!(bytes, vec![0xE9, 0xFD, 0xFF]);

    let bytes = bytes_of("ORG 100h\nstart:\nCALL start");
    assert_eq!(bytes, vec![0xE8, 0xFD, 0xFF]);
}

#[test]
fn conditional_jump_encoding() {
    let bytes = bytes_of("top:\nJZ top");
    assert_eq!(bytes, vec![0x74, 0xFE]);
    let bytes = bytes_of("top:\nLOOP top");
    assert_eq!(bytes, vec![0xE2, 0xFE]);
    let bytes = bytes_of("top:\nJCXZ top");
    assert_eq!(bytes, vec![0xE3, 0xFE]);
}

#[test]
fn out_of_range_jz_suggests_inversion() {
    let mut source = String::from("ORG 100h\nJZ far_label\n");
    for _ in 0..130 {
        source.push_str("NOP\n");
    }
    source.push_str("far_label:\nRET\n");
    let ctx = assemble(&source);
    let diag = ctx
        .diagnostics
        .iter()
        .find(|d| d.message.contains("Conditional jump out of range"))
        .expect("range error");
    assert!(diag.hint.contains("JNZ"));
    assert!(diag.hint.contains("JMP"));
}

#[test]
fn loop_out_of_range_is_an_error() {
    let mut source = String::from("ORG 100h\ntop:\n");
    for _ in 0..200 {
        source.push_str("NOP\n");
    }
    source.push_str("LOOP top\n");
    let ctx = assemble(&source);
    assert!(errors_of(&ctx)
        .iter()
        .any(|m| m.contains("Loop jump out of range")));
}

// --- ModR/M displacement rules ---

#[test]
fn zero_displacement_drops_bytes_except_bp() {
    assert_eq!(bytes_of("MOV AX, [BX]"), vec![0x8B, 0x07]);
    // [BP] must use mod=01 disp8=0; mod=00 rm=110 means direct
    assert_eq!(bytes_of("MOV AX, [BP]"), vec![0x8B, 0x46, 0x00]);
}

#[test]
fn displacement_width_selection() {
    assert_eq!(bytes_of("MOV AX, [BX+7Fh]"), vec![0x8B, 0x47, 0x7F]);
    assert_eq!(bytes_of("MOV AX, [BX-80h]"), vec![0x8B, 0x47, 0x80]);
    assert_eq!(
        bytes_of("MOV AX, [BX+80h]"),
        vec![0x8B, 0x87, 0x80, 0x00]
    );
    assert_eq!(
        bytes_of("MOV AX, [1234h]"),
        vec![0x8B, 0x06, 0x34, 0x12]
    );
}

#[test]
fn symbol_displacement_is_pinned_to_16_bits() {
    // VAL fits in 8 bits, but the symbol forces a 16-bit displacement so
    // pass-1 and pass-2 sizes agree no matter when VAL resolves.
    let bytes = bytes_of("VAL EQU 2\nMOV AX, [BX+VAL]");
    assert_eq!(bytes, vec![0x8B, 0x87, 0x02, 0x00]);
}

#[test]
fn pass_sizes_are_stable_with_forward_references() {
    // A forward reference resolving to a small value must not shrink the
    // instruction between passes; the label after it would shift otherwise.
    let source = "ORG 100h\nMOV AX, [BX+disp]\nafter:\nJMP after\ndisp EQU 1\n";
    let ctx = assemble(source);
    assert!(!ctx.global_error, "{:?}", ctx.diagnostics);
    // MOV is 4 bytes (16-bit displacement), so after = 0x104
    assert_eq!(ctx.symbols.get("AFTER").unwrap().value, 0x104);
    assert_eq!(&ctx.machine_code[..4], &[0x8B, 0x87, 0x01, 0x00]);
    // JMP after: offset = 0x104 - 0x107 = -3
    assert_eq!(&ctx.machine_code[4..], &[0xE9, 0xFD, 0xFF]);
}

// --- Directives ---

#[test]
fn db_dw_dd_emission() {
    assert_eq!(bytes_of("DB 1, 2, 3"), vec![1, 2, 3]);
    assert_eq!(
        bytes_of("DB 'Hi', 0Dh, 0Ah, '$'"),
        vec![b'H', b'i', 0x0D, 0x0A, b'$']
    );
    assert_eq!(bytes_of("DW 1234h, 5678h"), vec![0x34, 0x12, 0x78, 0x56]);
    // Literals cap at 16 bits; 32-bit DD values come from expressions.
    assert_eq!(bytes_of("DD 65535"), vec![0xFF, 0xFF, 0x00, 0x00]);
    assert_eq!(bytes_of("DD 2 * 8000h"), vec![0x00, 0x00, 0x01, 0x00]);
}

#[test]
fn db_string_followed_by_operator_is_an_expression() {
    // 'A' + 1 evaluates to 0x42 rather than emitting the string raw
    assert_eq!(bytes_of("DB 'A' + 1"), vec![0x42]);
}

#[test]
fn resb_resw_reserve_zeroed_bytes() {
    assert_eq!(bytes_of("RESB 3"), vec![0, 0, 0]);
    assert_eq!(bytes_of("RESW 2"), vec![0, 0, 0, 0]);
}

#[test]
fn equ_defines_constants() {
    let ctx = assemble("COUNT EQU 5\nMOV CX, COUNT");
    assert!(!ctx.global_error);
    assert_eq!(ctx.machine_code, vec![0xB9, 0x05, 0x00]);
    let entry = ctx.symbols.get("COUNT").unwrap();
    assert_eq!(entry.kind, SymbolKind::Equ);
    assert_eq!(entry.value, 5);
}

#[test]
fn org_sets_label_addresses() {
    let ctx = assemble("ORG 100h\nstart:\nNOP");
    assert_eq!(ctx.symbols.get("START").unwrap().value, 0x100);
}

#[test]
fn org_after_code_warns() {
    let ctx = assemble("NOP\nORG 200h\nNOP");
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Warning && d.message.contains("ORG directive after")));
}

#[test]
fn proc_scopes_local_labels() {
    let source = concat!(
        "ORG 100h\n",
        "first: PROC\n",
        ".loop:\n",
        "  JMP .loop\n",
        "ENDP\n",
        "second: PROC\n",
        ".loop:\n",
        "  JMP .loop\n",
        "ENDP\n",
    );
    let ctx = assemble(source);
    assert!(!ctx.global_error, "{:?}", ctx.diagnostics);
    assert!(ctx.symbols.contains("FIRST.LOOP"));
    assert!(ctx.symbols.contains("SECOND.LOOP"));
}

#[test]
fn local_label_outside_proc_warns() {
    let ctx = assemble(".orphan:\nNOP");
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| d.message.contains("outside procedure")));
}

#[test]
fn duplicate_label_warns_with_original_line() {
    let ctx = assemble("here:\nNOP\nhere:\nNOP");
    let warn = ctx
        .diagnostics
        .iter()
        .find(|d| d.message.contains("redefined"))
        .expect("duplicate warning");
    assert!(warn.message.contains("line 1"));
}

// --- Diagnostics ---

#[test]
fn undefined_symbol_fuzzy_hint() {
    let ctx = assemble("message: DB 'x'\nMOV DX, mesage");
    let err = ctx
        .diagnostics
        .iter()
        .find(|d| d.message.contains("Undefined label"))
        .expect("undefined error");
    assert!(err.hint.contains("MESSAGE"));
}

#[test]
fn hex_literal_missing_leading_zero_hint() {
    let ctx = assemble("MOV AX, FFh");
    let err = ctx
        .diagnostics
        .iter()
        .find(|d| d.message.contains("Undefined label"))
        .expect("undefined error");
    assert!(err.hint.contains("0FFH"));
}

#[test]
fn shape_mismatch_lists_valid_forms() {
    let ctx = assemble("MOV 5, AX");
    let err = ctx
        .diagnostics
        .iter()
        .find(|d| d.message.contains("Invalid operands for MOV"))
        .expect("shape error");
    assert!(err.hint.contains("Valid forms"));
    assert!(err.hint.contains("You provided: IMM(5), REG16(AX)"));
}

#[test]
fn size_mismatch_is_reported() {
    let ctx = assemble("MOV AX, BL");
    assert!(errors_of(&ctx)
        .iter()
        .any(|m| m.contains("Size mismatch")));
}

#[test]
fn truncation_warning_names_result() {
    let ctx = assemble("MOV AL, 300");
    let warn = ctx
        .diagnostics
        .iter()
        .find(|d| d.severity == Severity::Warning)
        .expect("truncation warning");
    assert!(warn.message.contains("truncated to 8-bit"));
    assert!(warn.message.contains("44")); // 300 & 0xFF
}

#[test]
fn memory_immediate_without_size_prefix_warns() {
    let ctx = assemble("MOV [BX], 5");
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| d.message.contains("defaulting to WORD")));
}

#[test]
fn recoverable_errors_allow_multiple_diagnostics() {
    let ctx = assemble("MOV 1, 2\nADD 3, 4\nNOP");
    let errors = errors_of(&ctx);
    assert!(errors.len() >= 2);
    // The NOP on the last line still assembled
    assert_eq!(*ctx.machine_code.last().unwrap(), 0x90);
}

#[test]
fn errors_mean_no_listing_bytes_for_that_line() {
    let ctx = assemble("MOV 1, 2");
    assert!(ctx.global_error);
    assert!(ctx.machine_code.is_empty());
}

// --- Assembler -> decoder round trip ---

#[test]
fn round_trip_preserves_mnemonic_and_operand_kinds() {
    let cases: &[(&str, &str, OpKind, OpKind)] = &[
        ("MOV AX, 1234h", "MOV", OpKind::Reg16, OpKind::Imm16),
        ("MOV DL, 5", "MOV", OpKind::Reg8, OpKind::Imm8),
        ("MOV AX, BX", "MOV", OpKind::Reg16, OpKind::Reg16),
        ("MOV AL, [BX]", "MOV", OpKind::Reg8, OpKind::Mem),
        ("MOV [DI], CX", "MOV", OpKind::Mem, OpKind::Reg16),
        ("MOV BYTE [SI], 7", "MOV", OpKind::Mem, OpKind::Imm8),
        ("MOV AX, DS", "MOV", OpKind::Mem, OpKind::Sreg),
        ("ADD AX, BX", "ADD", OpKind::Reg16, OpKind::Reg16),
        ("SUB AL, 5", "SUB", OpKind::Reg8, OpKind::Imm8),
        ("CMP WORD [BX], 100h", "CMP", OpKind::Mem, OpKind::Imm16),
        ("TEST AX, BX", "TEST", OpKind::Reg16, OpKind::Reg16),
        ("INC AX", "INC", OpKind::Reg16, OpKind::None),
        ("DEC BYTE [BX]", "DEC", OpKind::Mem, OpKind::None),
        ("MUL BL", "MUL", OpKind::Reg8, OpKind::None),
        ("IDIV CX", "IDIV", OpKind::Reg16, OpKind::None),
        ("SHL AX, 1", "SHL", OpKind::Reg16, OpKind::Imm8),
        ("SHR BL, CL", "SHR", OpKind::Reg8, OpKind::Reg8),
        ("PUSH AX", "PUSH", OpKind::Reg16, OpKind::None),
        ("POP DS", "POP", OpKind::Sreg, OpKind::None),
        ("LEA SI, [BX+2]", "LEA", OpKind::Reg16, OpKind::Mem),
        ("IN AL, 60h", "IN", OpKind::Reg8, OpKind::Imm8),
        ("OUT DX, AX", "OUT", OpKind::Reg16, OpKind::Reg16),
        ("INT 21h", "INT", OpKind::Imm8, OpKind::None),
        ("XCHG BL, CL", "XCHG", OpKind::Reg8, OpKind::Reg8),
        ("RET", "RET", OpKind::None, OpKind::None),
        ("NOP", "NOP", OpKind::None, OpKind::None),
        ("MOVSW", "MOVSW", OpKind::None, OpKind::None),
        ("HLT", "HLT", OpKind::None, OpKind::None),
    ];

    for (source, mnemonic, kind1, kind2) in cases {
        let bytes = bytes_of(source);
        let inst = decode_instruction(&bytes, 0)
            .unwrap_or_else(|| panic!("'{source}' produced undecodable bytes {bytes:?}"));
        assert_eq!(inst.mnemonic, *mnemonic, "{source}");
        assert_eq!(inst.op1.kind, *kind1, "{source}");
        assert_eq!(inst.op2.kind, *kind2, "{source}");
        assert_eq!(inst.size, bytes.len(), "{source}");
    }
}

#[test]
fn every_emitted_instruction_decodes_to_its_own_length() {
    // One listing entry per line; decoding each line's bytes must consume
    // exactly those bytes.
    let source = concat!(
        "ORG 100h\n",
        "start:\n",
        "MOV AX, 0B800h\n",
        "MOV ES, AX\n",
        "MOV DI, 0\n",
        "MOV CX, 10\n",
        "MOV AL, '*'\n",
        "fill:\n",
        "STOSB\n",
        "LOOP fill\n",
        "ADD WORD [BX+2], 7\n",
        "JZ start\n",
        "INT 20h\n",
    );
    let ctx = assemble(source);
    assert!(!ctx.global_error, "{:?}", ctx.diagnostics);
    for entry in &ctx.listing {
        if entry.bytes.is_empty() {
            continue;
        }
        let inst = decode_instruction(&entry.bytes, 0)
            .unwrap_or_else(|| panic!("line {} undecodable: {:?}", entry.line, entry.bytes));
        assert_eq!(inst.size, entry.bytes.len(), "line {}", entry.line);
    }
}

// --- Assemble-then-emulate scenarios ---

#[test]
fn hello_char_scenario() {
    let source = concat!(
        "ORG 100h\n",
        "MOV AH, 02h\n",
        "MOV DL, 'A'\n",
        "INT 21h\n",
        "INT 20h\n",
    );
    let ctx = assemble(source);
    assert_eq!(
        ctx.machine_code,
        vec![0xB4, 0x02, 0xB2, 0x41, 0xCD, 0x21, 0xCD, 0x20]
    );

    let (result, _) = run_emulator(&ctx.machine_code, &EmulatorConfig::default());
    assert_eq!(result.output, b"A");
    assert!(result.halt_reason.contains("INT 20h"));
    assert_eq!(result.exit_code, 0);
}

#[test]
fn macro_expansion_scenario_prints_ab() {
    let source = concat!(
        "PRINT MACRO CH\n",
        "  LOCAL done\n",
        "  MOV AH, 02h\n",
        "  MOV DL, CH\n",
        "  INT 21h\n",
        "done:\n",
        "ENDM\n",
        "ORG 100h\n",
        "PRINT 'A'\n",
        "PRINT 'B'\n",
        "INT 20h\n",
    );
    let ctx = assemble_with_macros(source);
    assert!(!ctx.global_error, "{:?}", ctx.diagnostics);
    // Both expansions defined distinct fresh labels
    assert!(ctx.symbols.contains("??0000"));
    assert!(ctx.symbols.contains("??0001"));

    let (result, _) = run_emulator(&ctx.machine_code, &EmulatorConfig::default());
    assert_eq!(result.output, b"AB");
}

#[test]
fn dollar_string_print_scenario() {
    let source = concat!(
        "ORG 100h\n",
        "MOV AH, 09h\n",
        "MOV DX, msg\n",
        "INT 21h\n",
        "INT 20h\n",
        "msg: DB 'Hello!$'\n",
    );
    let ctx = assemble(source);
    assert!(!ctx.global_error, "{:?}", ctx.diagnostics);
    let (result, _) = run_emulator(&ctx.machine_code, &EmulatorConfig::default());
    assert_eq!(result.output, b"Hello!");
}

#[test]
fn loop_counts_down_cx() {
    let source = concat!(
        "ORG 100h\n",
        "MOV CX, 3\n",
        "MOV AH, 02h\n",
        "MOV DL, 'x'\n",
        "top:\n",
        "INT 21h\n",
        "LOOP top\n",
        "INT 20h\n",
    );
    let ctx = assemble(source);
    assert!(!ctx.global_error);
    let (result, cpu_state) = run_emulator(&ctx.machine_code, &EmulatorConfig::default());
    assert_eq!(result.output, b"xxx");
    assert_eq!(cpu_state.regs[cpu::CX], 0);
}

#[test]
fn call_ret_roundtrip() {
    let source = concat!(
        "ORG 100h\n",
        "CALL emit\n",
        "INT 20h\n",
        "emit: PROC\n",
        "MOV AH, 02h\n",
        "MOV DL, '!'\n",
        "INT 21h\n",
        "RET\n",
        "ENDP\n",
    );
    let ctx = assemble(source);
    assert!(!ctx.global_error, "{:?}", ctx.diagnostics);
    let (result, _) = run_emulator(&ctx.machine_code, &EmulatorConfig::default());
    assert_eq!(result.output, b"!");
    assert!(result.halt_reason.contains("INT 20h"));
}

#[test]
fn listing_entries_carry_addresses_and_decoded_text() {
    let ctx = assemble("ORG 100h\nMOV AX, 5\nNOP");
    assert_eq!(ctx.listing.len(), 2);
    assert_eq!(ctx.listing[0].address, 0x100);
    assert_eq!(ctx.listing[0].decoded, "MOV REG(AX), IMM(5)");
    assert_eq!(ctx.listing[1].address, 0x103);
    assert_eq!(ctx.listing[1].bytes, vec![0x90]);
}

// --- ALU flag correctness against an independent 8-bit reference ---

#[derive(Clone, Copy, Debug)]
enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

/// 8086 reference flags for an 8-bit operation.
fn reference_flags(op: AluOp, a: u8, b: u8) -> (bool, bool, bool, bool, bool, bool) {
    let (result, cf, of, af) = match op {
        AluOp::Add => {
            let wide = a as u16 + b as u16;
            let r = (wide & 0xFF) as u8;
            let of = ((a ^ r) & (b ^ r) & 0x80) != 0;
            let af = ((a ^ b ^ r) & 0x10) != 0;
            (r, wide > 0xFF, of, af)
        }
        AluOp::Sub => {
            let r = a.wrapping_sub(b);
            let of = ((a ^ b) & (a ^ r) & 0x80) != 0;
            let af = ((a ^ b ^ r) & 0x10) != 0;
            (r, a < b, of, af)
        }
        AluOp::And => (a & b, false, false, false),
        AluOp::Or => (a | b, false, false, false),
        AluOp::Xor => (a ^ b, false, false, false),
    };
    let zf = result == 0;
    let sf = result & 0x80 != 0;
    let pf = result.count_ones() % 2 == 0;
    (cf, zf, sf, pf, of, af)
}

fn alu_opcode(op: AluOp) -> u8 {
    // accumulator-immediate forms: op AL, imm8
    match op {
        AluOp::Add => 0x04,
        AluOp::Sub => 0x2C,
        AluOp::And => 0x24,
        AluOp::Or => 0x0C,
        AluOp::Xor => 0x34,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]
    #[test]
    fn alu_flags_match_reference(a in any::<u8>(), b in any::<u8>(), op_idx in 0usize..5) {
        let op = [AluOp::Add, AluOp::Sub, AluOp::And, AluOp::Or, AluOp::Xor][op_idx];
        // MOV AL, a / <op> AL, b / INT 20h
        let binary = [0xB0, a, alu_opcode(op), b, 0xCD, 0x20];
        let (result, final_cpu) = run_emulator(&binary, &EmulatorConfig::default());
        prop_assert!(result.halted);

        let (cf, zf, sf, pf, of, af) = reference_flags(op, a, b);
        prop_assert_eq!(final_cpu.flag(cpu::CF), cf, "CF for {:?} {:#x},{:#x}", op, a, b);
        prop_assert_eq!(final_cpu.flag(cpu::ZF), zf, "ZF");
        prop_assert_eq!(final_cpu.flag(cpu::SF), sf, "SF");
        prop_assert_eq!(final_cpu.flag(cpu::PF), pf, "PF");
        prop_assert_eq!(final_cpu.flag(cpu::OF), of, "OF");
        prop_assert_eq!(final_cpu.flag(cpu::AF), af, "AF");
    }

    #[test]
    fn assembled_mov_imm_round_trips_value(value in any::<u16>()) {
        let ctx = assemble(&format!("MOV AX, {value}"));
        prop_assert!(!ctx.global_error);
        let inst = decode_instruction(&ctx.machine_code, 0).unwrap();
        prop_assert_eq!(inst.op2.disp, value as i32);
    }
}

#[test]
fn inc_preserves_carry() {
    // STC / INC AX / INT 20h
    let binary = [0xF9, 0x40, 0xCD, 0x20];
    let (_, final_cpu) = run_emulator(&binary, &EmulatorConfig::default());
    assert!(final_cpu.flag(cpu::CF));
    assert_eq!(final_cpu.regs[cpu::AX], 1);
}
