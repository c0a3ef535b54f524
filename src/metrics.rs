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

//! Append-only per-run metrics log. Purely observational; nothing reads
//! it back into control flow.

use std::fs::OpenOptions;
use std::path::Path;

use serde::Serialize;

/// One row per master run. Timings are pre-formatted strings because one
/// column (`t_reduce` in phase 1a) carries the literal `MERGE_LOCAL`
/// marker instead of a number.
#[derive(Debug, Serialize)]
pub struct RunRecord {
    pub phase: String,
    pub n_nodes: usize,
    pub t_map: String,
    pub t_shuffle: String,
    pub t_reduce: String,
    #[serde(rename = "T_total")]
    pub t_total: String,
}

pub fn secs(t: f64) -> String {
    format!("{t:.3}")
}

/// Append one row, creating the file (and its header) on first use.
/// Single-writer by assumption: only the master process itself appends.
pub fn record_run(path: &Path, row: &RunRecord) -> Result<(), csv::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let write_header = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);

    writer.serialize(row)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(phase: &str) -> RunRecord {
        RunRecord {
            phase: phase.to_string(),
            n_nodes: 4,
            t_map: secs(1.23456),
            t_shuffle: secs(0.0),
            t_reduce: "MERGE_LOCAL".to_string(),
            t_total: secs(2.5),
        }
    }

    #[test]
    fn header_written_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiments").join("run.csv");

        record_run(&path, &row("phase1a")).unwrap();
        record_run(&path, &row("phase1b")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "phase,n_nodes,t_map,t_shuffle,t_reduce,T_total");
        assert_eq!(lines[1], "phase1a,4,1.235,0.000,MERGE_LOCAL,2.500");
        assert_eq!(lines[2], "phase1b,4,1.235,0.000,MERGE_LOCAL,2.500");
    }

    #[test]
    fn seconds_are_formatted_to_millis() {
        assert_eq!(secs(0.0), "0.000");
        assert_eq!(secs(12.3456), "12.346");
    }
}
