// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Source map support for mapping expanded assembler lines back to origin files.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOrigin {
    pub file: String,
    pub line: u32,
}

impl SourceOrigin {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    origins: Vec<SourceOrigin>,
}

impl SourceMap {
    pub fn new(origins: Vec<SourceOrigin>) -> Self {
        Self { origins }
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn origins(&self) -> &[SourceOrigin] {
        &self.origins
    }

    /// Resolve a 1-based expanded line number to its origin.
    pub fn origin_for_line(&self, line: u32) -> Option<&SourceOrigin> {
        if line == 0 {
            return None;
        }
        self.origins.get(line as usize - 1)
    }

    /// Unique origin files in first-appearance order.
    pub fn include_files(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut files = Vec::new();
        for origin in &self.origins {
            if seen.insert(origin.file.clone()) {
                files.push(origin.file.clone());
            }
        }
        files
    }
}
