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

//! A minimal distributed MapReduce engine for word counting.
//!
//! A master sequences one of four execution modes over a fixed roster of
//! workers: whole-file map, split map with a local merge, split map with a
//! hash shuffle and per-worker reduce, or a distributed sort with a global
//! k-way merge.

pub mod config;
pub mod mapper;
pub mod mapreduce;
pub mod metrics;
pub mod rpc;
pub mod splits;

pub use config::{JobConfig, Phase};
pub use mapreduce::{Master, Worker, WorkerAddr};
