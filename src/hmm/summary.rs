use ndarray::Array2;

use crate::config::IbdConfig;
use crate::model::{GenotypeClass, HapPair, PairObservation};

/// Posterior mass summed over decoded pairs, sites x states.
///
/// Partial results from independent batches merge with [`combine`](Self::combine);
/// the merge is a plain sum, so the grouping of pairs into batches does not
/// matter.
#[derive(Debug, Clone)]
pub struct DecodingReturnValues {
    pub sum_over_pairs: Array2<f64>,
    /// Indexed by [`GenotypeClass`]: 00, 01/10 and 11 pairs.
    pub sum_by_class: Option<[Array2<f64>; 3]>,
    pub site_was_flipped: Vec<bool>,
    pub n_observations: u64,
}

impl DecodingReturnValues {
    pub fn new(n_sites: usize, n_states: usize, stratify: bool, site_was_flipped: &[bool]) -> Self {
        let zeros = || Array2::zeros((n_sites, n_states));
        Self {
            sum_over_pairs: zeros(),
            sum_by_class: stratify.then(|| [zeros(), zeros(), zeros()]),
            site_was_flipped: site_was_flipped.to_vec(),
            n_observations: 0,
        }
    }

    pub fn augment(&mut self, obs: &PairObservation, pos: usize, posterior: &[f32]) {
        let mut row = self.sum_over_pairs.row_mut(pos);
        for (sum, &p) in row.iter_mut().zip(posterior) {
            *sum += p as f64;
        }
        if let Some(by_class) = self.sum_by_class.as_mut() {
            let class = obs.class_at(pos);
            let mut row = by_class[class as usize].row_mut(pos);
            for (sum, &p) in row.iter_mut().zip(posterior) {
                *sum += p as f64;
            }
        }
    }

    pub fn combine(mut self, other: Self) -> Self {
        self.sum_over_pairs += &other.sum_over_pairs;
        if let (Some(mine), Some(theirs)) = (self.sum_by_class.as_mut(), other.sum_by_class.as_ref()) {
            for class in GenotypeClass::ALL {
                mine[class as usize] += &theirs[class as usize];
            }
        }
        self.n_observations += other.n_observations;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PairTrace {
    pub pair: HapPair,
    pub from: usize,
    pub map_state: Vec<u16>,
    pub posterior_mean: Vec<f32>,
    pub ibd_probability: Vec<f32>,
    pub conditional_mean: Vec<f32>,
}

impl PairTrace {
    pub fn new(pair: HapPair, from: usize, len: usize) -> Self {
        Self {
            pair,
            from,
            map_state: vec![0; len],
            posterior_mean: vec![0.0; len],
            ibd_probability: vec![0.0; len],
            conditional_mean: vec![0.0; len],
        }
    }

    pub fn len(&self) -> usize {
        self.map_state.len()
    }

    pub fn to(&self) -> usize {
        self.from + self.len()
    }
}

#[derive(Debug, Clone)]
pub struct Summarizer {
    expected_times: Vec<f32>,
    state_threshold: usize,
}

impl Summarizer {
    pub fn new(expected_times: Vec<f32>, state_threshold: usize) -> Self {
        Self {
            expected_times,
            state_threshold,
        }
    }

    pub fn expected_times(&self) -> &[f32] {
        &self.expected_times
    }

    pub fn state_threshold(&self) -> usize {
        self.state_threshold
    }

    pub fn record(&self, trace: &mut PairTrace, pos: usize, posterior: &[f32]) {
        let offset = pos - trace.from;
        let mut map_state = 0;
        let mut mean = 0.0;
        let mut ibd = 0.0;
        let mut ibd_time = 0.0;
        for (k, (&p, &t)) in posterior.iter().zip(&self.expected_times).enumerate() {
            if p > posterior[map_state] {
                map_state = k;
            }
            mean += p * t;
            if k < self.state_threshold {
                ibd += p;
                ibd_time += p * t;
            }
        }
        trace.map_state[offset] = map_state as u16;
        trace.posterior_mean[offset] = mean;
        trace.ibd_probability[offset] = ibd;
        trace.conditional_mean[offset] = if ibd > 0.0 { ibd_time / ibd } else { 0.0 };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IbdSegment {
    pub pair: HapPair,
    pub start: usize,
    pub end: usize,
    pub start_cm: f64,
    pub end_cm: f64,
    pub length_cm: f64,
    pub ibd_probability: f32,
    pub age: f32,
    pub posterior_mean: f32,
    pub map_age: f32,
}

/// Rounds `x` to `precision` digits after its leading significant digit,
/// half away from zero; values below `min_genetic` become `min_genetic`.
pub fn round_morgans(x: f64, precision: i32, min_genetic: f64) -> f64 {
    if !(x >= min_genetic) {
        return min_genetic;
    }
    let l10 = x.log10().floor() as i32;
    let factor = 10f64.powi(precision - l10);
    (x * factor).round() / factor
}

/// Calls IBD segments along `trace`.
///
/// A site is IBD when its MAP state is below the state threshold and its IBD
/// probability reaches the configured threshold. Runs of IBD sites separated
/// by at most `merge_gap_sites` other sites form one segment; segments shorter
/// than the configured minimum (cM) are dropped.
pub fn find_ibd_segments(
    trace: &PairTrace,
    genetic_positions: &[f64],
    summarizer: &Summarizer,
    ibd: &IbdConfig,
    precision: i32,
    min_genetic: f64,
) -> Vec<IbdSegment> {
    let is_ibd = |offset: usize| {
        (trace.map_state[offset] as usize) < summarizer.state_threshold()
            && trace.ibd_probability[offset] >= ibd.probability_threshold
    };

    let mut runs: Vec<(usize, usize)> = Vec::new();
    for offset in (0..trace.len()).filter(|&o| is_ibd(o)) {
        match runs.last_mut() {
            Some((_, end)) if offset - *end - 1 <= ibd.merge_gap_sites => *end = offset,
            _ => runs.push((offset, offset)),
        }
    }

    runs.into_iter()
        .filter_map(|(first, last)| {
            let start = trace.from + first;
            let end = trace.from + last;
            let g_start = genetic_positions[start];
            let g_end = genetic_positions[end];
            let length_cm = round_morgans(100.0 * (g_end - g_start), precision, min_genetic);
            if length_cm < ibd.min_length_cm {
                return None;
            }

            let n = (last - first + 1) as f32;
            let sites = first..=last;
            let mean_of = |values: &[f32]| values[sites.clone()].iter().sum::<f32>() / n;
            let posterior_mean = mean_of(&trace.posterior_mean);
            let age = if ibd.conditional_age {
                mean_of(&trace.conditional_mean)
            } else {
                posterior_mean
            };
            let map_age = trace.map_state[sites.clone()]
                .iter()
                .map(|&s| summarizer.expected_times()[s as usize])
                .sum::<f32>()
                / n;

            Some(IbdSegment {
                pair: trace.pair,
                start,
                end,
                start_cm: round_morgans(100.0 * g_start, precision, min_genetic),
                end_cm: round_morgans(100.0 * g_end, precision, min_genetic),
                length_cm,
                ibd_probability: mean_of(&trace.ibd_probability),
                age,
                posterior_mean,
                map_age,
            })
        })
        .collect()
}
