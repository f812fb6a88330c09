// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Linear-sweep disassembler.
//!
//! Walks a byte buffer from offset 0, decoding instructions; bytes the
//! decoder rejects accumulate into data regions, flushed when decoding
//! resumes.

use crate::decoder::{decode_instruction, format_instruction};

#[derive(Debug, Clone)]
pub struct DisasmLine {
    pub addr: usize,
    pub bytes: Vec<u8>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct DataRegion {
    pub addr: usize,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Disassembly {
    pub instructions: Vec<DisasmLine>,
    pub data_regions: Vec<DataRegion>,
}

pub fn disassemble(code: &[u8]) -> Disassembly {
    let mut out = Disassembly::default();
    let mut offset = 0usize;
    let mut run_start: Option<usize> = None;
    let mut run_bytes: Vec<u8> = Vec::new();

    while offset < code.len() {
        match decode_instruction(code, offset) {
            Some(inst) => {
                if let Some(start) = run_start.take() {
                    out.data_regions.push(DataRegion {
                        addr: start,
                        bytes: std::mem::take(&mut run_bytes),
                    });
                }
                out.instructions.push(DisasmLine {
                    addr: offset,
                    bytes: code[offset..offset + inst.size].to_vec(),
                    text: format_instruction(&inst),
                });
                offset += inst.size;
            }
            None => {
                if run_start.is_none() {
                    run_start = Some(offset);
                }
                run_bytes.push(code[offset]);
                offset += 1;
            }
        }
    }

    if let Some(start) = run_start {
        out.data_regions.push(DataRegion {
            addr: start,
            bytes: run_bytes,
        });
    }
    out
}
