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

use std::ffi::OsStr;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{error, info};

use crate::mapper::{self, Counts, MapOptions};
use crate::rpc;

use super::{shuffle, write_pairs, Request, Response, Result};

/// Word counts accumulated across every `PushPart` this process has
/// received. Lives for the worker's lifetime; a reduce-write snapshots it
/// without clearing, so a worker must be restarted between unrelated jobs.
#[derive(Clone, Default)]
pub struct AggregationState {
    counts: Arc<Mutex<Counts>>,
}

impl AggregationState {
    pub fn merge(&self, pairs: Counts) {
        let mut counts = self.counts.lock().unwrap();
        for (word, count) in pairs {
            *counts.entry(word).or_insert(0) += count;
        }
    }

    /// Consistent snapshot, ascending by word. The lock is held only for
    /// the clone, never across any I/O.
    pub fn snapshot_sorted(&self) -> Vec<(String, u64)> {
        let mut items: Vec<_> = self
            .counts
            .lock()
            .unwrap()
            .iter()
            .map(|(w, c)| (w.clone(), *c))
            .collect();
        items.sort();
        items
    }
}

pub struct Worker {
    agg: AggregationState,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker {
    pub fn new() -> Self {
        Self {
            agg: AggregationState::default(),
        }
    }

    pub fn run(self, addr: SocketAddr) -> Result<()> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                let server = rpc::Server::bind(addr).await?;
                info!("worker listening on {}", addr);
                self.serve(server).await
            })
    }

    /// Accept connections forever, one task per connection. The request
    /// frame is read inside the task: a peer that stalls mid-frame only
    /// wedges its own task, and a failed connection is logged and
    /// contained; the listener never dies with it.
    pub async fn serve(self, server: rpc::Server) -> Result<()> {
        loop {
            match server.accept_conn().await {
                Ok(incoming) => {
                    let agg = self.agg.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle(incoming, agg).await {
                            error!("connection failed: {}", err);
                        }
                    });
                }
                Err(err) => error!("could not accept connection: {}", err),
            }
        }
    }
}

async fn handle(incoming: rpc::Incoming, agg: AggregationState) -> Result<()> {
    let request = incoming.request::<Request>().await?;

    let response = match execute(&request.body, &agg).await {
        Ok(response) => response,
        Err(err) => Response::Err {
            msg: err.to_string(),
        },
    };

    request.respond(response).await?;
    Ok(())
}

async fn execute(request: &Request, agg: &AggregationState) -> Result<Response> {
    match request {
        Request::Ping => Ok(Response::Pong),
        Request::MapWc { input, options } => map_wc(input, options),
        Request::MapWcSplit {
            split,
            output_dir,
            options,
        } => map_wc_split(split, output_dir, options),
        Request::MapWcSplitHash {
            split,
            roster,
            options,
        } => map_wc_split_hash(split, roster, options).await,
        Request::PushPart { pairs } => {
            agg.merge(pairs.clone());
            Ok(Response::PushAck)
        }
        Request::FinalReduceWrite { output_dir, rank } => {
            final_reduce_write(agg, output_dir, *rank)
        }
        Request::SortLocal {
            input,
            output_dir,
            sample,
        } => sort_local(input, output_dir, *sample),
    }
}

fn map_wc(input: &Path, options: &MapOptions) -> Result<Response> {
    let counts = mapper::map_file(input, options)?;
    Ok(Response::MapDone { counts })
}

fn map_wc_split(split: &Path, output_dir: &Path, options: &MapOptions) -> Result<Response> {
    std::fs::create_dir_all(output_dir)?;

    let start = Instant::now();
    let counts = mapper::map_file(split, options)?;
    let t_map = start.elapsed().as_secs_f64();

    // random suffix so concurrent splits on the same worker never collide
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let part = output_dir.join(format!("part-{}.csv", &suffix[..8]));
    write_pairs(&part, counts.iter().map(|(w, c)| (w.as_str(), *c)))?;

    Ok(Response::SplitDone { part, t_map })
}

async fn map_wc_split_hash(
    split: &Path,
    roster: &[super::WorkerAddr],
    options: &MapOptions,
) -> Result<Response> {
    if roster.is_empty() {
        return Err(super::Error::EmptyRoster);
    }

    let start = Instant::now();
    let counts = mapper::map_file(split, options)?;
    let t_map = start.elapsed().as_secs_f64();

    let buckets = shuffle::partition(counts, roster.len());

    let mut t_shuffle = 0.0;
    for (idx, bucket) in buckets.into_iter().enumerate() {
        if bucket.is_empty() {
            continue;
        }

        let start = Instant::now();
        shuffle::push_bucket(&roster[idx], bucket).await?;
        t_shuffle += start.elapsed().as_secs_f64();
    }

    Ok(Response::SplitHashDone { t_map, t_shuffle })
}

fn final_reduce_write(agg: &AggregationState, output_dir: &Path, rank: usize) -> Result<Response> {
    std::fs::create_dir_all(output_dir)?;

    let start = Instant::now();
    let items = agg.snapshot_sorted();
    let part = output_dir.join(format!("part-{rank:03}.csv"));
    write_pairs(&part, items.iter().map(|(w, c)| (w.as_str(), *c)))?;
    let t_reduce = start.elapsed().as_secs_f64();

    Ok(Response::ReduceDone { part, t_reduce })
}

fn sort_pairs(pairs: &mut [(String, u64)]) {
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

fn sort_local(input: &Path, output_dir: &Path, sample: Option<usize>) -> Result<Response> {
    std::fs::create_dir_all(output_dir)?;

    let start = Instant::now();
    let mut pairs = read_shard(input)?;
    sort_pairs(&mut pairs);

    let name = input.file_name().unwrap_or_else(|| OsStr::new("part.csv"));
    let output = output_dir.join(name);
    write_pairs(&output, pairs.iter().map(|(w, c)| (w.as_str(), *c)))?;
    let t_sort = start.elapsed().as_secs_f64();

    if let Some(sample) = sample {
        pairs.truncate(sample);
    }

    Ok(Response::SortDone { t_sort, pairs })
}

/// Parse a `word,count` shard. Malformed rows are skipped, a missing file
/// reads as empty; both match how shards written by a partial job look.
fn read_shard(path: &Path) -> Result<Vec<(String, u64)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut pairs = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(_) => continue,
        };
        if record.len() != 2 {
            continue;
        }
        if let Ok(count) = record[1].parse() {
            pairs.push((record[0].to_string(), count));
        }
    }

    Ok(pairs)
}
