// Shardmap is an open source distributed word-count engine.
// Copyright (C) 2024 Shardmap contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The per-record counting function the engine runs over its splits.
//!
//! This is the business-logic boundary of the system: everything else
//! treats the mapper as an opaque `path -> word counts` function.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-zÀ-ÖØ-öø-ÿ]+").unwrap());

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MapOptions {
    pub lowercase: bool,
    pub token_min_len: usize,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            lowercase: true,
            token_min_len: 2,
        }
    }
}

fn tokenize<'a>(line: &'a str, min_len: usize) -> impl Iterator<Item = &'a str> {
    TOKEN_RE
        .find_iter(line)
        .map(|m| m.as_str())
        .filter(move |w| w.chars().count() >= min_len)
}

/// Count words in `path`. Splits are cut on byte boundaries, so lines are
/// decoded lossily rather than failing on a word torn across two chunks.
pub fn map_file<P: AsRef<Path>>(path: P, options: &MapOptions) -> std::io::Result<Counts> {
    let mut counts = Counts::default();
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = if options.lowercase {
            line.to_lowercase()
        } else {
            line.into_owned()
        };

        for word in tokenize(&line, options.token_min_len) {
            *counts.entry(word.to_string()).or_insert(0) += 1;
        }
    }

    Ok(counts)
}

pub type Counts = HashMap<String, u64>;
