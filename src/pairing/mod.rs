//! Seeded pair discovery: haplotypes sharing runs of identical words are
//! handed to the decoder over the sites the run covers.

pub mod extend;
pub mod seed;
pub mod words;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::{JobPartition, SeedConfig};
use crate::error::Result;
use crate::genotypes::GenotypeStore;

use extend::{ExtendHash, Match};
use seed::{ExtendContext, SeedCounts, SeedHash, extend_all_pairs};
use words::WordIndex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub n_words: usize,
    pub words_skipped: usize,
    pub seeds: SeedCounts,
    pub matches_reported: u64,
    pub matches_too_short: u64,
}

/// Scans the chromosome word by word and calls `on_match(a, b, from, to)` for
/// every closed match of at least `min_match_cm` between flat haplotypes
/// `a < b` owned by this job. `from..to` are all-site indices.
pub fn scan<F>(
    store: &GenotypeStore,
    config: &SeedConfig,
    partition: &JobPartition,
    mut on_match: F,
) -> Result<ScanStats>
where
    F: FnMut(usize, usize, usize, usize) -> Result<()>,
{
    let words = WordIndex::build(store, config.min_maf, config.word_size);
    let n_haps = store.n_haps();
    let n_words = words.n_words();
    let tiling = partition.tiling(n_haps);
    info!(
        "Seeding {} haplotypes over {} words of {} sites",
        n_haps, n_words, config.word_size
    );

    let mut stats = ScanStats {
        n_words,
        ..ScanStats::default()
    };
    let mut tables: Vec<SeedHash> = (0..config.read_ahead.max(1))
        .map(|_| SeedHash::default())
        .collect();
    let mut extend = ExtendHash::new(config.gap);

    let mut report = |ended: Vec<((u32, u32), Match)>, stats: &mut ScanStats| -> Result<()> {
        for ((a, b), m) in ended {
            if words.span_cm(m.first_word, m.last_word) < config.min_match_cm {
                stats.matches_too_short += 1;
                continue;
            }
            let (from, to) = words.site_range(m.first_word, m.last_word);
            on_match(a as usize, b as usize, from, to)?;
            stats.matches_reported += 1;
        }
        Ok(())
    };

    let pb = ProgressBar::new(n_words as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:30} {pos}/{len} words").unwrap(),
    );
    for w in 0..n_words {
        tables[0].clear();
        for h in 0..n_haps {
            tables[0].insert(h as u32, words.word(h, w));
        }
        if (tables[0].len() as f64) < config.skip * n_haps as f64 {
            stats.words_skipped += 1;
        } else {
            let ctx = ExtendContext {
                words: &words,
                tiling: &tiling,
                max_seeds: config.max_seeds,
                word_limit: (w + config.read_ahead).min(n_words),
            };
            extend_all_pairs(&mut tables, w, &ctx, &mut extend, &mut stats.seeds);
        }
        report(extend.end_stale(w), &mut stats)?;
        pb.inc(1);
    }
    report(extend.end_all(), &mut stats)?;
    pb.abandon();

    debug!(
        "{} pair extensions, {} matches shorter than {} cM",
        stats.seeds.pairs_extended, stats.matches_too_short, config.min_match_cm
    );
    if stats.words_skipped > 0 {
        info!("Skipped {} low-diversity words", stats.words_skipped);
    }
    if stats.seeds.buckets_skipped > 0 {
        warn!(
            "Skipped {} seed buckets larger than {} that could not be split within {} words; consider raising --read-ahead or --max-seeds",
            stats.seeds.buckets_skipped, config.max_seeds, config.read_ahead
        );
    }
    info!("Found {} seeded matches", stats.matches_reported);
    Ok(stats)
}
