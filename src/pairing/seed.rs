use std::collections::HashMap;

use itertools::Itertools;

use crate::config::PairTiling;

use super::extend::ExtendHash;
use super::words::WordIndex;

#[derive(Debug, Default)]
pub struct SeedHash {
    buckets: HashMap<u64, Vec<u32>>,
}

impl SeedHash {
    pub fn insert(&mut self, hap: u32, word: u64) {
        self.buckets.entry(word).or_default().push(hap);
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn fill(&mut self, members: &[u32], words: &WordIndex, w: usize) {
        self.clear();
        for &hap in members {
            self.insert(hap, words.word(hap as usize, w));
        }
    }
}

pub struct ExtendContext<'a> {
    pub words: &'a WordIndex,
    pub tiling: &'a PairTiling,
    /// Largest bucket whose pairs are emitted directly; 0 disables the limit.
    pub max_seeds: usize,
    /// First word the scan may not look ahead to.
    pub word_limit: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedCounts {
    pub pairs_extended: u64,
    pub buckets_skipped: u64,
}

/// Emits every pair sharing a bucket of `tables[0]` (filled for word `w`) to
/// `extend`. Buckets over `max_seeds` are split on the next word using the
/// remaining tables; a bucket that cannot be split any further is skipped.
pub fn extend_all_pairs(
    tables: &mut [SeedHash],
    w: usize,
    ctx: &ExtendContext,
    extend: &mut ExtendHash,
    counts: &mut SeedCounts,
) {
    let Some((current, deeper)) = tables.split_first_mut() else {
        return;
    };
    for bucket in current.buckets.values() {
        if bucket.len() < 2 {
            continue;
        }
        if ctx.max_seeds != 0 && bucket.len() > ctx.max_seeds {
            if w + 1 < ctx.word_limit && !deeper.is_empty() {
                deeper[0].fill(bucket, ctx.words, w + 1);
                extend_all_pairs(deeper, w + 1, ctx, extend, counts);
            } else {
                counts.buckets_skipped += 1;
            }
            continue;
        }
        for (&a, &b) in bucket.iter().tuple_combinations() {
            if ctx.tiling.owns(a as usize, b as usize) {
                extend.extend_pair(a, b, w);
                counts.pairs_extended += 1;
            }
        }
    }
}
