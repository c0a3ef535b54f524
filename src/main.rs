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
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use shardmap::mapreduce::master::read_roster;
use shardmap::{splits, JobConfig, Master, Worker};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one job over the worker roster and exit.
    Master {
        /// TOML job configuration
        #[clap(long)]
        job: PathBuf,
        /// host:port roster, one worker per line
        #[clap(long)]
        nodes: PathBuf,
    },
    /// Serve map/shuffle/sort requests until killed.
    Worker { address: SocketAddr },
    /// Pre-chunk input files into fixed-size byte splits.
    SplitInput {
        #[clap(subcommand)]
        options: SplitOptions,
    },
}

#[derive(Subcommand)]
enum SplitOptions {
    File {
        src: PathBuf,
        dst_dir: PathBuf,
        #[clap(long)]
        chunk_size: Option<u64>,
    },
    Manifest {
        manifest: PathBuf,
        dst_dir: PathBuf,
        #[clap(long)]
        chunk_size: Option<u64>,
    },
}

fn load_toml_config<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> T {
    let raw_config = fs::read_to_string(path).expect("Failed to read config file");
    toml::from_str(&raw_config).expect("Failed to parse config")
}

fn metrics_path(config: &JobConfig, job_path: &Path) -> PathBuf {
    config.metrics_path.clone().unwrap_or_else(|| {
        job_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
            .join("..")
            .join("experiments")
            .join("run.csv")
    })
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let args = Args::parse();

    match args.command {
        Commands::Master { job, nodes } => {
            let config: JobConfig = load_toml_config(&job);
            let roster = read_roster(&nodes)?;
            let metrics = metrics_path(&config, &job);

            Master::new(config, roster, metrics)?.run()?;
        }
        Commands::Worker { address } => {
            Worker::new().run(address)?;
        }
        Commands::SplitInput { options } => match options {
            SplitOptions::File {
                src,
                dst_dir,
                chunk_size,
            } => {
                let chunk_size = chunk_size.unwrap_or(splits::DEFAULT_CHUNK_SIZE);
                let written = splits::split_file(&src, &dst_dir, chunk_size)?;
                tracing::info!("wrote {} chunks to {}", written, dst_dir.display());
            }
            SplitOptions::Manifest {
                manifest,
                dst_dir,
                chunk_size,
            } => {
                let chunk_size = chunk_size.unwrap_or(splits::DEFAULT_MANIFEST_CHUNK_SIZE);
                let written = splits::split_manifest(&manifest, &dst_dir, chunk_size)?;
                tracing::info!("wrote {} chunks to {}", written, dst_dir.display());
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_input_subcommand_parses() {
        let args =
            Args::try_parse_from(["shardmap", "split-input", "file", "corpus.txt", "chunks"])
                .unwrap();

        assert!(matches!(
            args.command,
            Commands::SplitInput {
                options: SplitOptions::File { .. }
            }
        ));
    }

    #[test]
    fn worker_subcommand_takes_a_socket_addr() {
        let args = Args::try_parse_from(["shardmap", "worker", "0.0.0.0:9000"]).unwrap();

        assert!(matches!(args.command, Commands::Worker { .. }));
    }
}
