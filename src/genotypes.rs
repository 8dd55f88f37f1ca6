use bitvec::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::{CustomError, Result};
use crate::model::{Bits, GenotypeClass, Hap, HapPair, PairObservation, Sample};
use crate::reader::SiteReader;
use crate::reader::common::MapEntry;

pub struct Individual {
    pub sample: Sample,
    haps: [Bits; 2],
}

impl Individual {
    pub fn haplotype(&self, hap: Hap) -> &BitSlice<u64, Lsb0> {
        &self.haps[hap.index()]
    }
}

/// Phased haplotypes of every individual plus per-site positions and allele counts.
///
/// When folding is requested, sites where allele 1 is the major allele are
/// flipped at load time so that 1 always denotes the minor allele.
pub struct GenotypeStore {
    individuals: Vec<Individual>,
    chrom: String,
    physical_positions: Vec<u64>,
    genetic_positions: Vec<f64>,
    minor_counts: Vec<u32>,
    // Allele-1 count among the other CSFS samples, indexed by genotype class
    undistinguished: Vec<[u32; 3]>,
    site_was_flipped: Vec<bool>,
}

impl GenotypeStore {
    pub fn consume_reader(
        reader: &mut dyn SiteReader,
        map: &[MapEntry],
        csfs_samples: usize,
        fold: bool,
    ) -> Result<Self> {
        let samples = reader.samples().to_vec();
        let n_haps = 2 * samples.len();
        let n_sites = reader.n_sites();
        if map.len() != n_sites {
            return Err(CustomError::SiteCountAgreement {
                n_haps: n_sites,
                n_map: map.len(),
            });
        }

        let pb = ProgressBar::new(n_sites as u64);
        pb.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:30} {pos}/{len} sites").unwrap(),
        );

        let mut haps: Vec<Bits> = (0..n_haps).map(|_| Bits::with_capacity(n_sites)).collect();
        let mut chrom = None;
        let mut physical_positions = Vec::with_capacity(n_sites);
        for site in reader {
            let site = site?;
            let idx = physical_positions.len();
            if let Some(entry) = map.get(idx) {
                if entry.physical_position != site.physical_position {
                    return Err(CustomError::MapPosition {
                        site: idx + 1,
                        haps_bp: site.physical_position,
                        map_bp: entry.physical_position,
                    });
                }
            }
            for (hap, allele) in haps.iter_mut().zip(site.alleles.iter().by_vals()) {
                hap.push(allele);
            }
            physical_positions.push(site.physical_position);
            chrom.get_or_insert(site.chrom);
            pb.inc(1);
        }
        pb.abandon();

        if physical_positions.len() != map.len() {
            return Err(CustomError::SiteCountAgreement {
                n_haps: physical_positions.len(),
                n_map: map.len(),
            });
        }
        let genetic_positions = map.iter().map(|entry| entry.morgans).collect();

        Self::from_haplotypes(
            samples,
            haps,
            chrom.unwrap_or_default(),
            physical_positions,
            genetic_positions,
            csfs_samples,
            fold,
        )
    }

    pub fn from_haplotypes(
        samples: Vec<Sample>,
        mut haps: Vec<Bits>,
        chrom: String,
        physical_positions: Vec<u64>,
        genetic_positions: Vec<f64>,
        csfs_samples: usize,
        fold: bool,
    ) -> Result<Self> {
        let n_haps = haps.len();
        if n_haps < 2 {
            return Err(CustomError::SampleCount { n_haps });
        }
        let n_sites = genetic_positions.len();
        if n_sites == 0 {
            return Err(CustomError::SiteCount { n_sites });
        }
        assert_eq!(n_haps, 2 * samples.len(), "two haplotypes per individual");
        assert_eq!(physical_positions.len(), n_sites);
        assert!(haps.iter().all(|h| h.len() == n_sites), "ragged haplotypes");

        let mut site_was_flipped = vec![false; n_sites];
        let mut minor_counts = Vec::with_capacity(n_sites);
        for pos in 0..n_sites {
            let mut count = haps.iter().filter(|h| h[pos]).count();
            if fold && 2 * count > n_haps {
                for hap in haps.iter_mut() {
                    let allele = hap[pos];
                    hap.set(pos, !allele);
                }
                site_was_flipped[pos] = true;
                count = n_haps - count;
            }
            minor_counts.push(count as u32);
        }
        let undistinguished = minor_counts
            .iter()
            .map(|&count| undistinguished_counts(count, n_haps, csfs_samples))
            .collect();

        let mut haps = haps.into_iter();
        let individuals = samples
            .into_iter()
            .map(|sample| {
                let first = haps.next().expect("two haplotypes per individual");
                let second = haps.next().expect("two haplotypes per individual");
                Individual {
                    sample,
                    haps: [first, second],
                }
            })
            .collect();

        Ok(Self {
            individuals,
            chrom,
            physical_positions,
            genetic_positions,
            minor_counts,
            undistinguished,
            site_was_flipped,
        })
    }

    pub fn n_individuals(&self) -> usize {
        self.individuals.len()
    }

    pub fn n_haps(&self) -> usize {
        2 * self.individuals.len()
    }

    pub fn n_sites(&self) -> usize {
        self.genetic_positions.len()
    }

    pub fn individual(&self, i: usize) -> &Individual {
        &self.individuals[i]
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.individuals.iter().map(|ind| &ind.sample)
    }

    pub fn flat_haplotype(&self, h: usize) -> &BitSlice<u64, Lsb0> {
        let (i, hap) = Hap::split_flat(h);
        self.individuals[i].haplotype(hap)
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn physical_position(&self, pos: usize) -> u64 {
        self.physical_positions[pos]
    }

    pub fn genetic_positions(&self) -> &[f64] {
        &self.genetic_positions
    }

    pub fn minor_allele_frequency(&self, pos: usize) -> f64 {
        self.minor_counts[pos] as f64 / self.n_haps() as f64
    }

    pub fn undistinguished(&self, pos: usize, class: GenotypeClass) -> usize {
        self.undistinguished[pos][class as usize] as usize
    }

    pub fn site_was_flipped(&self) -> &[bool] {
        &self.site_was_flipped
    }

    pub fn observe(&self, pair: HapPair, from: usize, to: usize) -> PairObservation {
        let a = self.individuals[pair.i].haplotype(pair.i_hap);
        let b = self.individuals[pair.j].haplotype(pair.j_hap);
        let het = subset_xor(a, b, from, to);
        let hom_minor = subset_and(a, b, from, to);
        PairObservation {
            pair,
            from,
            to: from + het.len(),
            het,
            hom_minor,
        }
    }
}

/// Projects the allele-1 count among the other `n_haps - 2` haplotypes onto
/// the `csfs_samples - 2` undistinguished lineages of the CSFS, for each
/// genotype class of the distinguished pair.
fn undistinguished_counts(count: u32, n_haps: usize, csfs_samples: usize) -> [u32; 3] {
    let others = csfs_samples.saturating_sub(2) as u32;
    if n_haps <= 2 {
        return [0; 3];
    }
    let mut counts = [0; 3];
    for (distinguished, slot) in counts.iter_mut().enumerate() {
        let rest = count.saturating_sub(distinguished as u32) as f64;
        let projected = (rest * others as f64 / (n_haps - 2) as f64).round() as u32;
        *slot = projected.min(others);
    }
    counts
}

fn check_range(a: &BitSlice<u64, Lsb0>, b: &BitSlice<u64, Lsb0>, from: usize, to: usize) -> usize {
    assert_eq!(a.len(), b.len(), "haplotypes differ in length");
    let to = to.min(a.len());
    assert!(from < to, "empty site range {from}..{to}");
    to
}

pub fn subset_xor(a: &BitSlice<u64, Lsb0>, b: &BitSlice<u64, Lsb0>, from: usize, to: usize) -> Bits {
    let to = check_range(a, b, from, to);
    let mut out = a[from..to].to_bitvec();
    out ^= &b[from..to];
    out
}

pub fn subset_and(a: &BitSlice<u64, Lsb0>, b: &BitSlice<u64, Lsb0>, from: usize, to: usize) -> Bits {
    let to = check_range(a, b, from, to);
    let mut out = a[from..to].to_bitvec();
    out &= &b[from..to];
    out
}
