use ndarray::{Array2, ArrayView1};

use crate::config::{CsfsDistance, DecodingConfig};
use crate::error::Result;
use crate::genotypes::GenotypeStore;
use crate::model::GenotypeClass;
use crate::table::DecodingTable;

/// Per-site emission vectors and transition lookups for one chromosome.
///
/// The emission of a pair at a site is
/// `emission1 + is_zero * emission0_minus1 + is_two * emission2_minus0`,
/// where `is_zero` is 1 unless the pair is heterozygous and `is_two` is 1
/// when both haplotypes carry the minor allele.
pub struct SiteModel {
    // index into the table's transitions, for the step from site `pos - 1` to `pos`
    transition_at: Vec<usize>,
    emission1: Array2<f32>,
    emission0_minus1: Array2<f32>,
    emission2_minus0: Array2<f32>,
}

impl SiteModel {
    pub fn build(store: &GenotypeStore, table: &DecodingTable, config: &DecodingConfig) -> Result<Self> {
        let n_sites = store.n_sites();
        let n_states = table.n_states();
        let genetic = store.genetic_positions();

        let csfs = match config.csfs_distance {
            CsfsDistance::Never => None,
            _ => Some(table.csfs_for(config.mode)?),
        };
        let (fallback, classes) = if config.compress || config.mode.is_array() {
            (table.compressed_emission(), [0, 1, 0])
        } else {
            (table.classic_emission(), [0, 1, 2])
        };

        let use_csfs = csfs_sites(genetic, config.csfs_distance);

        let transition_at = (0..n_sites)
            .map(|pos| {
                if pos == 0 {
                    0
                } else {
                    table.transition_index(genetic[pos] - genetic[pos - 1])
                }
            })
            .collect();

        let mut emission1 = Array2::zeros((n_sites, n_states));
        let mut emission0_minus1 = Array2::zeros((n_sites, n_states));
        let mut emission2_minus0 = Array2::zeros((n_sites, n_states));
        for pos in 0..n_sites {
            let [e0, e1, e2] = match (use_csfs[pos], csfs) {
                (true, Some(csfs)) => GenotypeClass::ALL.map(|class| {
                    let undistinguished = store.undistinguished(pos, class);
                    csfs.slice(ndarray::s![undistinguished, class as usize, ..])
                }),
                _ => classes.map(|row| fallback.row(row)),
            };
            for k in 0..n_states {
                emission1[[pos, k]] = e1[k];
                emission0_minus1[[pos, k]] = e0[k] - e1[k];
                emission2_minus0[[pos, k]] = e2[k] - e0[k];
            }
        }

        Ok(Self {
            transition_at,
            emission1,
            emission0_minus1,
            emission2_minus0,
        })
    }

    pub fn transition_at(&self, pos: usize) -> usize {
        self.transition_at[pos]
    }

    pub fn emission(&self, pos: usize, is_zero: f32, is_two: f32, state: usize) -> f32 {
        self.emission1[[pos, state]]
            + is_zero * self.emission0_minus1[[pos, state]]
            + is_two * self.emission2_minus0[[pos, state]]
    }

    pub fn rows(&self, pos: usize) -> [ArrayView1<'_, f32>; 3] {
        [
            self.emission1.row(pos),
            self.emission0_minus1.row(pos),
            self.emission2_minus0.row(pos),
        ]
    }
}

fn csfs_sites(genetic: &[f64], distance: CsfsDistance) -> Vec<bool> {
    let mut last_csfs = f64::NEG_INFINITY;
    genetic
        .iter()
        .enumerate()
        .map(|(pos, &g)| {
            let use_here = match distance {
                CsfsDistance::Always => true,
                CsfsDistance::Never => false,
                CsfsDistance::Every(distance) => pos == 0 || g - last_csfs >= distance,
            };
            if use_here {
                last_csfs = g;
            }
            use_here
        })
        .collect()
}
