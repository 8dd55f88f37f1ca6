//! Synthetic inputs shared by unit tests.

use std::path::Path;

use crate::genotypes::GenotypeStore;
use crate::model::{Bits, Sample};
use crate::table::{DecodingTable, RawDecodingTable, RawTransition};

const BOUNDARIES: [f64; 8] = [0.0, 20.0, 100.0, 400.0, 2000.0, 8000.0, 30000.0, 100000.0];
const TIMES: [f32; 8] = [10.0, 60.0, 250.0, 1200.0, 5000.0, 19000.0, 65000.0, 200000.0];
const DISTANCES: [f64; 5] = [0.0, 1e-4, 1e-3, 1e-2, 1e-1];
/// Recombination rate of the jump model, per Morgan and generation.
const JUMP_RATE: f64 = 0.5;

pub fn samples(n: usize) -> Vec<Sample> {
    (0..n)
        .map(|i| Sample {
            family: format!("F{i}"),
            id: format!("I{i}"),
        })
        .collect()
}

pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 11
    }

    pub fn bit(&mut self, one_in: u64) -> bool {
        self.next_u64() % one_in == 0
    }
}

/// `n_individuals` random individuals over `n_sites` sites 1 cM apart.
pub fn random_store(n_individuals: usize, n_sites: usize, seed: u64) -> GenotypeStore {
    let mut rng = Lcg::new(seed);
    let haps = (0..2 * n_individuals)
        .map(|_| (0..n_sites).map(|_| rng.bit(3)).collect())
        .collect();
    store_from_haplotypes(haps, 0.01)
}

/// Wraps haplotypes (two per individual) in an unfolded store with sites
/// `step` Morgans apart.
pub fn store_from_haplotypes(haps: Vec<Bits>, step: f64) -> GenotypeStore {
    let n_sites = haps[0].len();
    GenotypeStore::from_haplotypes(
        samples(haps.len() / 2),
        haps,
        "1".to_string(),
        (0..n_sites).map(|pos| 1000 * (pos as u64 + 1)).collect(),
        (0..n_sites).map(|pos| pos as f64 * step).collect(),
        6,
        false,
    )
    .expect("valid synthetic store")
}

/// Jump model: with probability `r = 1 - exp(-rate * d)` the pair redraws its
/// state from the stationary distribution `pi`, otherwise it keeps it.
pub fn raw_jump_table(n_states: usize, csfs_samples: usize) -> RawDecodingTable {
    assert!(n_states >= 1 && n_states <= TIMES.len());
    let pi = vec![1.0 / n_states as f64; n_states];
    let het: Vec<f32> = TIMES[..n_states]
        .iter()
        .map(|&t| (t * 1e-4).min(0.5))
        .collect();

    let transitions = DISTANCES
        .iter()
        .map(|&distance| {
            let r = 1.0 - (-JUMP_RATE * distance).exp();
            let below = pi.iter().map(|&p| (r * p) as f32).collect();
            let diagonal = pi.iter().map(|&p| (1.0 - r + r * p) as f32).collect();
            let above = (0..n_states)
                .map(|i| if i + 1 < n_states { (r * pi[i + 1]) as f32 } else { 0.0 })
                .collect();
            let ratio = (0..n_states)
                .map(|m| if m + 1 < n_states { (pi[m + 1] / pi[m]) as f32 } else { 0.0 })
                .collect();
            RawTransition {
                distance,
                diagonal,
                below,
                above,
                ratio,
            }
        })
        .collect();

    let classic: Vec<Vec<f32>> = vec![
        het.iter().map(|h| (1.0 - h) * 0.8).collect(),
        het.clone(),
        het.iter().map(|h| (1.0 - h) * 0.2).collect(),
    ];
    let compressed = vec![het.iter().map(|h| 1.0 - h).collect(), het.clone()];
    let csfs: Vec<Vec<Vec<f32>>> = (0..csfs_samples - 1)
        .map(|u| {
            let weight = 0.5 + (u as f32 + 1.0) / csfs_samples as f32;
            classic
                .iter()
                .map(|row| row.iter().map(|e| e * weight).collect())
                .collect()
        })
        .collect();

    RawDecodingTable {
        csfs_samples,
        expected_times: TIMES[..n_states].to_vec(),
        discretization: BOUNDARIES[..n_states].to_vec(),
        initial_state_prob: pi.iter().map(|&p| p as f32).collect(),
        transitions,
        classic_emission: classic,
        compressed_emission: compressed,
        csfs: Some(csfs.clone()),
        folded_csfs: Some(csfs.clone()),
        ascertained_csfs: Some(csfs.clone()),
        folded_ascertained_csfs: Some(csfs),
    }
}

pub fn jump_table(n_states: usize, csfs_samples: usize) -> DecodingTable {
    DecodingTable::from_raw(raw_jump_table(n_states, csfs_samples), Path::new("jump.json"))
        .expect("valid jump table")
}

pub fn jump_table_json(n_states: usize, csfs_samples: usize) -> String {
    let raw = raw_jump_table(n_states, csfs_samples);
    let transitions: Vec<serde_json::Value> = raw
        .transitions
        .iter()
        .map(|t| {
            serde_json::json!({
                "distance": t.distance,
                "diagonal": t.diagonal,
                "below": t.below,
                "above": t.above,
                "ratio": t.ratio,
            })
        })
        .collect();
    serde_json::json!({
        "csfs_samples": raw.csfs_samples,
        "expected_times": raw.expected_times,
        "discretization": raw.discretization,
        "initial_state_prob": raw.initial_state_prob,
        "transitions": transitions,
        "classic_emission": raw.classic_emission,
        "compressed_emission": raw.compressed_emission,
        "csfs": raw.csfs,
    })
    .to_string()
}
