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

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{JobConfig, Phase};
use crate::metrics::{secs, RunRecord};
use crate::rpc::Connection;
use crate::splits;

use super::{merge, write_pairs, Error, Request, Response, Result, WorkerAddr};

const HANDSHAKE_DIAL_TIMEOUT: Duration = Duration::from_secs(3);
const PHASE_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const SINGLE_FILE_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Once a phase connection is up the read bound is raised to an hour:
/// slow map or sort work is legitimate, dead peers are caught at dial time.
const PHASE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Parse a line-oriented `host:port` roster. Blank lines and `#` comments
/// are skipped; an unparsable entry is fatal.
pub fn read_roster<P: AsRef<Path>>(path: P) -> Result<Vec<WorkerAddr>> {
    let mut roster = Vec::new();

    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        roster.push(line.parse()?);
    }

    Ok(roster)
}

fn assign_round_robin(splits: &[PathBuf], n: usize) -> Vec<Vec<PathBuf>> {
    let mut assigned = vec![Vec::new(); n];
    for (i, split) in splits.iter().enumerate() {
        assigned[i % n].push(split.clone());
    }
    assigned
}

/// Additively merge `word,count` part files into one file sorted ascending
/// by word. Missing part files and malformed lines are skipped.
fn merge_parts(parts: &[PathBuf], final_path: &Path) -> Result<()> {
    let mut agg: HashMap<String, u64> = HashMap::new();

    for part in parts {
        if !part.exists() {
            continue;
        }
        for line in BufReader::new(File::open(part)?).lines() {
            let line = line?;
            let Some((word, count)) = line.trim().split_once(',') else {
                continue;
            };
            let Ok(count) = count.parse::<u64>() else {
                continue;
            };
            *agg.entry(word.to_string()).or_insert(0) += count;
        }
    }

    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut items: Vec<_> = agg.into_iter().collect();
    items.sort();
    write_pairs(final_path, items.iter().map(|(w, c)| (w.as_str(), *c)))?;

    Ok(())
}

/// Sequences one job over a fixed worker roster. Strictly sequential:
/// every RPC blocks for its full round trip before the next is issued.
pub struct Master {
    config: JobConfig,
    roster: Vec<WorkerAddr>,
    metrics_path: PathBuf,
}

impl Master {
    pub fn new(config: JobConfig, roster: Vec<WorkerAddr>, metrics_path: PathBuf) -> Result<Self> {
        if roster.is_empty() {
            return Err(Error::EmptyRoster);
        }

        Ok(Self {
            config,
            roster,
            metrics_path,
        })
    }

    pub fn run(&self) -> Result<()> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(async {
                let status = self.handshake().await;
                info!("handshake: {:?}", status);

                match Phase::select(&self.config) {
                    Phase::SingleFile => self.phase_single_file().await,
                    Phase::SplitMerge => self.phase_split_merge().await,
                    Phase::HashShuffle => self.phase_hash_shuffle().await,
                    Phase::GlobalSort => self.phase_global_sort().await,
                }
            })
    }

    async fn call(
        &self,
        addr: &WorkerAddr,
        request: &Request,
        dial_timeout: Duration,
    ) -> Result<Response> {
        let conn =
            Connection::create_with_timeout((addr.host.as_str(), addr.port), dial_timeout).await?;
        Ok(conn.send_with_timeout(request, PHASE_TIMEOUT).await?)
    }

    /// Informational liveness only: a failed PING is recorded and logged
    /// but never gates the job.
    async fn handshake(&self) -> Vec<(WorkerAddr, bool)> {
        let mut status = Vec::new();

        for addr in &self.roster {
            let alive = matches!(
                self.call(addr, &Request::Ping, HANDSHAKE_DIAL_TIMEOUT).await,
                Ok(Response::Pong)
            );
            if !alive {
                warn!("no pong from {}", addr);
            }
            status.push((addr.clone(), alive));
        }

        status
    }

    async fn phase_single_file(&self) -> Result<()> {
        let input = self
            .config
            .input_file
            .clone()
            .ok_or(Error::MissingConfigKey("input_file"))?;
        let addr = &self.roster[0];

        let start = Instant::now();
        let request = Request::MapWc {
            input,
            options: self.config.map_options(),
        };
        let counts = match self.call(addr, &request, SINGLE_FILE_DIAL_TIMEOUT).await? {
            Response::MapDone { counts } => counts,
            other => {
                return Err(Error::UnexpectedResponse {
                    addr: addr.clone(),
                    what: "map".to_string(),
                    response: other,
                })
            }
        };
        let t_map = start.elapsed().as_secs_f64();

        std::fs::create_dir_all(&self.config.output_dir)?;
        let output = self.config.output_dir.join("part-000.csv");
        let mut items: Vec<_> = counts.into_iter().collect();
        items.sort();
        write_pairs(&output, items.iter().map(|(w, c)| (w.as_str(), *c)))?;

        self.record(RunRecord {
            phase: "phase0".to_string(),
            n_nodes: self.roster.len(),
            t_map: secs(t_map),
            t_shuffle: secs(0.0),
            t_reduce: secs(0.0),
            t_total: secs(t_map),
        })?;
        info!("phase0 done. Output: {}", output.display());

        Ok(())
    }

    async fn phase_split_merge(&self) -> Result<()> {
        let splits = self.input_splits()?;
        let assigned = assign_round_robin(&splits, self.roster.len());

        let start = Instant::now();
        let mut parts = Vec::new();
        let mut total_map = 0.0;

        for (idx, addr) in self.roster.iter().enumerate() {
            for split in &assigned[idx] {
                let request = Request::MapWcSplit {
                    split: split.clone(),
                    output_dir: self.config.output_dir.clone(),
                    options: self.config.map_options(),
                };
                match self.call(addr, &request, PHASE_DIAL_TIMEOUT).await? {
                    Response::SplitDone { part, t_map } => {
                        parts.push(part);
                        total_map += t_map;
                    }
                    other => {
                        return Err(Error::UnexpectedResponse {
                            addr: addr.clone(),
                            what: format!("split {}", split.display()),
                            response: other,
                        })
                    }
                }
            }
        }

        let final_path = self.config.output_dir.join("final.csv");
        merge_parts(&parts, &final_path)?;

        self.record(RunRecord {
            phase: "phase1a".to_string(),
            n_nodes: self.roster.len(),
            t_map: secs(total_map),
            t_shuffle: secs(0.0),
            t_reduce: "MERGE_LOCAL".to_string(),
            t_total: secs(start.elapsed().as_secs_f64()),
        })?;
        info!("phase1a done. Output: {}", final_path.display());

        Ok(())
    }

    async fn phase_hash_shuffle(&self) -> Result<()> {
        let splits = self.input_splits()?;
        let assigned = assign_round_robin(&splits, self.roster.len());

        let start = Instant::now();
        let mut total_map = 0.0;
        let mut total_shuffle = 0.0;
        let mut total_reduce = 0.0;

        for (idx, addr) in self.roster.iter().enumerate() {
            for split in &assigned[idx] {
                let request = Request::MapWcSplitHash {
                    split: split.clone(),
                    roster: self.roster.clone(),
                    options: self.config.map_options(),
                };
                match self.call(addr, &request, PHASE_DIAL_TIMEOUT).await? {
                    Response::SplitHashDone { t_map, t_shuffle } => {
                        total_map += t_map;
                        total_shuffle += t_shuffle;
                    }
                    other => {
                        return Err(Error::UnexpectedResponse {
                            addr: addr.clone(),
                            what: format!("split hash {}", split.display()),
                            response: other,
                        })
                    }
                }
            }
        }

        // Partial-result policy: a worker whose reduce-write fails only
        // loses its own shard; the job itself carries on.
        std::fs::create_dir_all(&self.config.output_dir)?;
        for (rank, addr) in self.roster.iter().enumerate() {
            let request = Request::FinalReduceWrite {
                output_dir: self.config.output_dir.clone(),
                rank,
            };
            match self.call(addr, &request, PHASE_DIAL_TIMEOUT).await {
                Ok(Response::ReduceDone { t_reduce, .. }) => total_reduce += t_reduce,
                Ok(other) => warn!("reduce write failed on {}: got {:?}", addr, other),
                Err(err) => warn!("reduce write failed on {}: {}", addr, err),
            }
        }

        self.record(RunRecord {
            phase: "phase1b".to_string(),
            n_nodes: self.roster.len(),
            t_map: secs(total_map),
            t_shuffle: secs(total_shuffle),
            t_reduce: secs(total_reduce),
            t_total: secs(start.elapsed().as_secs_f64()),
        })?;
        info!("phase1b done. Output dir: {}", self.config.output_dir.display());

        Ok(())
    }

    async fn phase_global_sort(&self) -> Result<()> {
        let sort_input_dir = self
            .config
            .sort_input_dir
            .clone()
            .ok_or(Error::MissingConfigKey("sort_input_dir"))?;

        let start = Instant::now();
        let mut sorted_lists = Vec::new();
        let mut total_sort = 0.0;

        for (idx, addr) in self.roster.iter().enumerate() {
            let input = sort_input_dir.join(format!("part-{idx:03}.csv"));
            let request = Request::SortLocal {
                input: input.clone(),
                output_dir: self.config.output_dir.join("local_sorted"),
                sample: self.config.sort_sample,
            };
            match self.call(addr, &request, PHASE_DIAL_TIMEOUT).await? {
                Response::SortDone { t_sort, pairs } => {
                    total_sort += t_sort;
                    sorted_lists.push(pairs);
                }
                other => {
                    return Err(Error::UnexpectedResponse {
                        addr: addr.clone(),
                        what: format!("local sort of {}", input.display()),
                        response: other,
                    })
                }
            }
        }

        std::fs::create_dir_all(&self.config.output_dir)?;
        let final_path = self.config.output_dir.join("final_sorted.csv");
        let merged = merge::kway_merge(sorted_lists);
        write_pairs(&final_path, merged.iter().map(|(w, c)| (w.as_str(), *c)))?;

        self.record(RunRecord {
            phase: "phase2_sort".to_string(),
            n_nodes: self.roster.len(),
            t_map: secs(0.0),
            t_shuffle: secs(0.0),
            t_reduce: secs(total_sort),
            t_total: secs(start.elapsed().as_secs_f64()),
        })?;
        info!("phase2 (global sort) done. Output: {}", final_path.display());

        Ok(())
    }

    fn input_splits(&self) -> Result<Vec<PathBuf>> {
        let dir = self
            .config
            .input_dir
            .clone()
            .ok_or(Error::MissingConfigKey("input_dir"))?;
        let splits = splits::list_splits(&dir)?;

        if splits.is_empty() {
            return Err(Error::NoSplits { dir });
        }
        Ok(splits)
    }

    fn record(&self, row: RunRecord) -> Result<()> {
        crate::metrics::record_run(&self.metrics_path, &row)?;
        info!(
            "logged to {}: N={}, total={}s",
            self.metrics_path.display(),
            row.n_nodes,
            row.t_total
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::mapper;
    use crate::mapreduce::Worker;
    use crate::rpc;

    use super::*;

    async fn spawn_worker() -> WorkerAddr {
        let server = rpc::Server::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(Worker::new().serve(server));
        WorkerAddr::new("127.0.0.1", addr.port())
    }

    fn job(output_dir: &Path) -> JobConfig {
        JobConfig {
            input_file: None,
            input_dir: None,
            sort_input_dir: None,
            output_dir: output_dir.to_path_buf(),
            shuffle: None,
            lowercase: true,
            token_min_len: 2,
            sort_sample: None,
            metrics_path: None,
        }
    }

    fn master(config: JobConfig, roster: Vec<WorkerAddr>, dir: &Path) -> Master {
        Master::new(config, roster, dir.join("run.csv")).unwrap()
    }

    fn read_counts(path: &Path) -> HashMap<String, u64> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| {
                let (word, count) = line.split_once(',').unwrap();
                (word.to_string(), count.parse().unwrap())
            })
            .collect()
    }

    #[test]
    fn roster_parsing_skips_comments_and_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# fleet").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "10.0.0.1:9000").unwrap();
        writeln!(file, "  node-b:9001  ").unwrap();

        let roster = read_roster(file.path()).unwrap();
        assert_eq!(
            roster,
            vec![
                WorkerAddr::new("10.0.0.1", 9000),
                WorkerAddr::new("node-b", 9001),
            ]
        );
    }

    #[test]
    fn roster_parsing_fails_on_malformed_entry() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not-an-address").unwrap();

        assert!(read_roster(file.path()).is_err());
    }

    #[test]
    fn round_robin_assignment() {
        let splits: Vec<PathBuf> = (0..5).map(|i| PathBuf::from(format!("s{i}"))).collect();
        let assigned = assign_round_robin(&splits, 2);

        assert_eq!(assigned[0], vec![
            PathBuf::from("s0"),
            PathBuf::from("s2"),
            PathBuf::from("s4"),
        ]);
        assert_eq!(assigned[1], vec![PathBuf::from("s1"), PathBuf::from("s3")]);
    }

    #[test]
    fn merge_parts_is_additive_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        std::fs::write(&a, "oak,2\nelm,1\n").unwrap();
        std::fs::write(&b, "oak,3\nnoise\n").unwrap();

        let final_path = dir.path().join("final.csv");
        merge_parts(
            &[a, b, dir.path().join("gone.csv")],
            &final_path,
        )
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(&final_path).unwrap(),
            "elm,1\noak,5\n"
        );
    }

    #[test]
    fn empty_roster_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Master::new(job(dir.path()), vec![], dir.path().join("run.csv")).is_err());
    }

    #[tokio::test]
    async fn single_file_and_split_merge_agree() {
        let dir = tempfile::tempdir().unwrap();
        let text = "the cat sat. The CAT ran.";

        let input = dir.path().join("book.txt");
        std::fs::write(&input, text).unwrap();
        let split_dir = dir.path().join("splits");
        std::fs::create_dir_all(&split_dir).unwrap();
        std::fs::write(split_dir.join("chunk_001"), text).unwrap();

        let worker = spawn_worker().await;

        let out0 = dir.path().join("out0");
        let mut config = job(&out0);
        config.input_file = Some(input);
        master(config, vec![worker.clone()], dir.path())
            .phase_single_file()
            .await
            .unwrap();

        let out1 = dir.path().join("out1");
        let mut config = job(&out1);
        config.input_dir = Some(split_dir);
        master(config, vec![worker], dir.path())
            .phase_split_merge()
            .await
            .unwrap();

        let phase0 = read_counts(&out0.join("part-000.csv"));
        let phase1a = read_counts(&out1.join("final.csv"));
        assert_eq!(phase0, phase1a);
        assert_eq!(phase0.get("the"), Some(&2));
        assert_eq!(phase0.get("cat"), Some(&2));
    }

    #[tokio::test]
    async fn hash_shuffle_conserves_counts_across_shards() {
        let dir = tempfile::tempdir().unwrap();
        let split_dir = dir.path().join("splits");
        std::fs::create_dir_all(&split_dir).unwrap();
        std::fs::write(split_dir.join("chunk_001"), "apple pear apple plum").unwrap();
        std::fs::write(split_dir.join("chunk_002"), "pear pear fig apple").unwrap();

        let roster = vec![spawn_worker().await, spawn_worker().await];

        let out = dir.path().join("out");
        let mut config = job(&out);
        config.input_dir = Some(split_dir.clone());
        config.shuffle = Some("hash".to_string());
        master(config, roster, dir.path())
            .phase_hash_shuffle()
            .await
            .unwrap();

        let mut shuffled: HashMap<String, u64> = HashMap::new();
        for rank in 0..2 {
            let shard = out.join(format!("part-{rank:03}.csv"));
            for (word, count) in read_counts(&shard) {
                // the partition function sends each word to exactly one shard
                assert!(!shuffled.contains_key(&word));
                shuffled.insert(word, count);
            }
        }

        let mut direct: HashMap<String, u64> = HashMap::new();
        for split in splits::list_splits(&split_dir).unwrap() {
            for (word, count) in mapper::map_file(&split, &Default::default()).unwrap() {
                *direct.entry(word).or_insert(0) += count;
            }
        }

        assert_eq!(shuffled, direct);
    }

    #[tokio::test]
    async fn global_sort_merges_shards_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let shard_dir = dir.path().join("shards");
        std::fs::create_dir_all(&shard_dir).unwrap();
        std::fs::write(shard_dir.join("part-000.csv"), "dog,5\ncat,3\n").unwrap();
        std::fs::write(shard_dir.join("part-001.csv"), "ant,5\nbee,1\n").unwrap();

        let roster = vec![spawn_worker().await, spawn_worker().await];

        let out = dir.path().join("out");
        let mut config = job(&out);
        config.sort_input_dir = Some(shard_dir);
        master(config, roster, dir.path())
            .phase_global_sort()
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(out.join("final_sorted.csv")).unwrap(),
            "ant,5\ndog,5\ncat,3\nbee,1\n"
        );
    }

    #[tokio::test]
    async fn dead_roster_entry_fails_handshake_but_not_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let split_dir = dir.path().join("splits");
        std::fs::create_dir_all(&split_dir).unwrap();
        std::fs::write(split_dir.join("chunk_001"), "one split only").unwrap();

        let live = spawn_worker().await;
        // bind-then-drop leaves a port nothing listens on
        let dead = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            WorkerAddr::new("127.0.0.1", listener.local_addr().unwrap().port())
        };

        let out = dir.path().join("out");
        let mut config = job(&out);
        config.input_dir = Some(split_dir);
        let m = master(config, vec![live.clone(), dead.clone()], dir.path());

        let status = m.handshake().await;
        assert_eq!(status[0], (live, true));
        assert_eq!(status[1].1, false);

        // the single split is assigned to the live rank 0 worker
        m.phase_split_merge().await.unwrap();
        assert!(out.join("final.csv").exists());
    }
}
