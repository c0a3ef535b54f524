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

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mapper::{Counts, MapOptions};

pub mod master;
pub mod merge;
pub mod shuffle;
pub mod worker;

pub use master::Master;
pub use worker::Worker;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("network error")]
    Rpc(#[from] crate::rpc::Error),

    #[error("Got an IO error")]
    IO(#[from] std::io::Error),

    #[error("malformed shard file")]
    Csv(#[from] csv::Error),

    #[error("invalid worker address '{0}'")]
    InvalidWorkerAddr(String),

    #[error("roster contains no workers")]
    EmptyRoster,

    #[error("job config is missing '{0}'")]
    MissingConfigKey(&'static str),

    #[error("no splits found in {}", .dir.display())]
    NoSplits { dir: PathBuf },

    #[error("{what} failed on {addr}: unexpected response {response:?}")]
    UnexpectedResponse {
        addr: WorkerAddr,
        what: String,
        response: Response,
    },
}

/// A reachable worker endpoint. Roster order is significant: it fixes each
/// worker's rank and thereby its partition index and shard name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerAddr {
    pub host: String,
    pub port: u16,
}

impl WorkerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for WorkerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for WorkerAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidWorkerAddr(s.to_string()))?;
        let port = port
            .parse()
            .map_err(|_| Error::InvalidWorkerAddr(s.to_string()))?;

        if host.is_empty() {
            return Err(Error::InvalidWorkerAddr(s.to_string()));
        }

        Ok(WorkerAddr::new(host, port))
    }
}

/// Requests a worker understands. One request per connection; anything the
/// decoder does not recognize fails that connection and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Ping,
    /// Phase 0: count one whole file and return the mapping in-band.
    MapWc {
        input: PathBuf,
        options: MapOptions,
    },
    /// Phase 1a: count one split, persist the counts as a part file.
    MapWcSplit {
        split: PathBuf,
        output_dir: PathBuf,
        options: MapOptions,
    },
    /// Phase 1b map half: count one split, then push each hash bucket to
    /// its destination worker. The full roster rides along so every mapper
    /// agrees on N.
    MapWcSplitHash {
        split: PathBuf,
        roster: Vec<WorkerAddr>,
        options: MapOptions,
    },
    /// Phase 1b shuffle delivery: fold a bucket into the receiving
    /// worker's aggregation state.
    PushPart { pairs: Counts },
    /// Phase 1b reduce half: snapshot the aggregation state into the
    /// rank-numbered shard file.
    FinalReduceWrite { output_dir: PathBuf, rank: usize },
    /// Phase 2: sort one shard file locally.
    SortLocal {
        input: PathBuf,
        output_dir: PathBuf,
        sample: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Pong,
    MapDone {
        counts: Counts,
    },
    SplitDone {
        part: PathBuf,
        t_map: f64,
    },
    SplitHashDone {
        t_map: f64,
        t_shuffle: f64,
    },
    PushAck,
    ReduceDone {
        part: PathBuf,
        t_reduce: f64,
    },
    SortDone {
        t_sort: f64,
        pairs: Vec<(String, u64)>,
    },
    Err {
        msg: String,
    },
}

/// Write `word,count` lines. Shard files, part files and the final outputs
/// all share this format.
pub(crate) fn write_pairs<'a, P, I>(path: P, pairs: I) -> std::io::Result<()>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (&'a str, u64)>,
{
    let mut out = BufWriter::new(File::create(path)?);
    for (word, count) in pairs {
        writeln!(out, "{word},{count}")?;
    }
    out.flush()
}
