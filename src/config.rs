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

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::mapper::MapOptions;

pub mod defaults {
    pub fn lowercase() -> bool {
        true
    }

    pub fn token_min_len() -> usize {
        2
    }
}

/// One job invocation as loaded from a TOML file. Which keys are present
/// decides the execution phase; see [`Phase::select`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub input_file: Option<PathBuf>,
    pub input_dir: Option<PathBuf>,
    pub sort_input_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub shuffle: Option<String>,

    #[serde(default = "defaults::lowercase")]
    pub lowercase: bool,
    #[serde(default = "defaults::token_min_len")]
    pub token_min_len: usize,

    /// Cap on how many sorted pairs a worker ships back from a local sort.
    /// Unset means the full shard is returned to the global merge.
    pub sort_sample: Option<usize>,

    pub metrics_path: Option<PathBuf>,
}

impl JobConfig {
    pub fn map_options(&self) -> MapOptions {
        MapOptions {
            lowercase: self.lowercase,
            token_min_len: self.token_min_len,
        }
    }
}

/// The execution mode of a single master run. Selected exactly once per
/// invocation; a run performs one phase and terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Map one whole file on a single worker.
    SingleFile,
    /// Map splits across workers, merge part files on the master.
    SplitMerge,
    /// Map splits, hash-shuffle between workers, reduce per worker.
    HashShuffle,
    /// Sort each worker's shard locally, k-way merge globally.
    GlobalSort,
}

impl Phase {
    /// Branch priority matters: when several keys are present the
    /// highest-priority phase wins, so a sort job whose config still names
    /// an `input_dir` is not silently re-run as a map job.
    pub fn select(config: &JobConfig) -> Phase {
        if config.sort_input_dir.is_some() {
            Phase::GlobalSort
        } else if config.shuffle.as_deref() == Some("hash") {
            Phase::HashShuffle
        } else if config.input_dir.is_some() {
            Phase::SplitMerge
        } else {
            Phase::SingleFile
        }
    }
}
