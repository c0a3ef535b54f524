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

//! K-way merge of independently sorted (word, count) shards.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry: the current head of one source sequence. Max-heap order,
/// so the pop is the highest count, ties broken by ascending word and
/// then by source index.
#[derive(Debug, PartialEq, Eq)]
struct Head {
    word: String,
    count: u64,
    source: usize,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| other.word.cmp(&self.word))
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merge N pre-sorted sequences into one globally sorted sequence. Each
/// input must already be ordered by descending count then ascending word;
/// the output has the same ordering and length equal to the sum of the
/// input lengths. Only one element per source is resident at a time.
pub fn kway_merge(lists: Vec<Vec<(String, u64)>>) -> Vec<(String, u64)> {
    let mut iters: Vec<_> = lists.into_iter().map(|list| list.into_iter()).collect();

    let mut heap = BinaryHeap::new();
    for (source, it) in iters.iter_mut().enumerate() {
        if let Some((word, count)) = it.next() {
            heap.push(Head {
                word,
                count,
                source,
            });
        }
    }

    let mut merged = Vec::new();
    while let Some(head) = heap.pop() {
        if let Some((word, count)) = iters[head.source].next() {
            heap.push(Head {
                word,
                count,
                source: head.source,
            });
        }
        merged.push((head.word, head.count));
    }

    merged
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn pairs(raw: &[(&str, u64)]) -> Vec<(String, u64)> {
        raw.iter().map(|(w, c)| (w.to_string(), *c)).collect()
    }

    fn is_sorted(list: &[(String, u64)]) -> bool {
        list.windows(2)
            .all(|w| (std::cmp::Reverse(w[0].1), &w[0].0) <= (std::cmp::Reverse(w[1].1), &w[1].0))
    }

    #[test]
    fn two_shards_with_count_tie() {
        let merged = kway_merge(vec![
            pairs(&[("dog", 5), ("cat", 3)]),
            pairs(&[("ant", 5), ("bee", 1)]),
        ]);

        // tie on count 5 broken by ascending word: "ant" before "dog"
        assert_eq!(
            merged,
            pairs(&[("ant", 5), ("dog", 5), ("cat", 3), ("bee", 1)])
        );
    }

    #[test]
    fn single_list_is_unchanged() {
        let input = pairs(&[("zebra", 9), ("ant", 9), ("bird", 2)]);
        assert_eq!(kway_merge(vec![input.clone()]), input);
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(kway_merge(vec![]), vec![]);
        assert_eq!(kway_merge(vec![vec![], vec![], vec![]]), vec![]);
    }

    #[test]
    fn empty_lists_mixed_with_full_ones() {
        let merged = kway_merge(vec![vec![], pairs(&[("one", 1)]), vec![]]);
        assert_eq!(merged, pairs(&[("one", 1)]));
    }

    proptest! {
        #[test]
        fn merged_output_is_sorted_and_complete(
            lists in prop::collection::vec(
                prop::collection::vec(("[a-z]{1,6}", 0u64..100), 0..20),
                0..6,
            )
        ) {
            let lists: Vec<Vec<(String, u64)>> = lists
                .into_iter()
                .map(|mut list| {
                    list.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                    list
                })
                .collect();
            let total: usize = lists.iter().map(Vec::len).sum();

            let merged = kway_merge(lists);

            prop_assert_eq!(merged.len(), total);
            prop_assert!(is_sorted(&merged));
        }
    }
}
