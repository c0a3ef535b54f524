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

//! Hash partitioning and peer-to-peer bucket delivery for the shuffle.

use std::hash::Hasher;
use std::time::Duration;

use fnv::FnvHasher;

use crate::mapper::Counts;
use crate::rpc::Connection;

use super::{Error, Request, Response, Result, WorkerAddr};

const PUSH_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Destination index for a word. FNV-1a rather than the std hasher: the
/// assignment must come out identical on every worker process in the job,
/// and `DefaultHasher` is seeded per process.
pub fn bucket_index(word: &str, n: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write(word.as_bytes());
    (hasher.finish() % n as u64) as usize
}

/// Split counts into one bucket per destination worker. Buckets for the
/// same destination merge additively.
pub fn partition(counts: Counts, n: usize) -> Vec<Counts> {
    let mut buckets = vec![Counts::default(); n];

    for (word, count) in counts {
        let idx = bucket_index(&word, n);
        *buckets[idx].entry(word).or_insert(0) += count;
    }

    buckets
}

/// Deliver one bucket to its destination worker and await the ack. A
/// failed push is fatal to the calling map-shuffle operation.
pub async fn push_bucket(addr: &WorkerAddr, pairs: Counts) -> Result<()> {
    let conn =
        Connection::create_with_timeout((addr.host.as_str(), addr.port), PUSH_DIAL_TIMEOUT).await?;
    let response: Response = conn
        .send_with_timeout(&Request::PushPart { pairs }, PUSH_TIMEOUT)
        .await?;

    match response {
        Response::PushAck => Ok(()),
        other => Err(Error::UnexpectedResponse {
            addr: addr.clone(),
            what: "bucket push".to_string(),
            response: other,
        }),
    }
}
