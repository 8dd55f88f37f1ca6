use crate::Args;
use crate::error::{CustomError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 64;
/// Digits kept after the leading significant digit when reporting genetic positions.
pub const MORGANS_PRECISION: i32 = 2;
/// Smallest genetic coordinate or length ever reported.
pub const MIN_GENETIC: f64 = 1e-10;

/// IBD probability threshold for each `--recall` level.
const PROBABILITY_THRESHOLDS: [f32; 4] = [0.9, 0.7, 0.5, 0.3];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingMode {
    Sequence,
    SequenceFolded,
    Array,
    ArrayFolded,
}

impl DecodingMode {
    pub fn parse(mode: &str, use_ancestral: bool) -> Result<Self> {
        match (mode.to_ascii_lowercase().as_str(), use_ancestral) {
            ("sequence", true) => Ok(DecodingMode::Sequence),
            ("sequence", false) => Ok(DecodingMode::SequenceFolded),
            ("array", true) => Ok(DecodingMode::Array),
            ("array", false) => Ok(DecodingMode::ArrayFolded),
            _ => Err(CustomError::DecodingMode {
                mode: mode.to_string(),
            }),
        }
    }

    pub fn is_folded(self) -> bool {
        matches!(self, DecodingMode::SequenceFolded | DecodingMode::ArrayFolded)
    }

    pub fn is_array(self) -> bool {
        matches!(self, DecodingMode::Array | DecodingMode::ArrayFolded)
    }

    pub fn name(self) -> &'static str {
        match self {
            DecodingMode::Sequence => "sequence",
            DecodingMode::SequenceFolded => "folded sequence",
            DecodingMode::Array => "array",
            DecodingMode::ArrayFolded => "folded array",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingStrategy {
    /// Buffer up to `capacity` observations and run one pass over all of them.
    Batched { capacity: usize },
    /// Decode every observation on its own with the per-pair recurrence.
    Scalar,
}

/// Where the CSFS emission model is used instead of the compressed one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CsfsDistance {
    Always,
    /// Use the CSFS at sites at least this many Morgans past the previous CSFS site.
    Every(f64),
    Never,
}

impl CsfsDistance {
    /// Normalizes `--skip-csfs-distance` (cM, NaN meaning unset) and `--compress`.
    pub fn normalize(distance_cm: Option<f64>, compress: bool) -> Result<Self> {
        let distance_cm = distance_cm.filter(|d| !d.is_nan());
        match (compress, distance_cm) {
            (true, Some(_)) => Err(CustomError::ConflictingFlags {
                first: "compress",
                second: "skip-csfs-distance",
            }),
            (true, None) => Ok(CsfsDistance::Never),
            (false, None) => Ok(CsfsDistance::Always),
            (false, Some(d)) if d == f64::INFINITY => Ok(CsfsDistance::Never),
            (false, Some(d)) if d <= 0.0 => Ok(CsfsDistance::Always),
            (false, Some(d)) => Ok(CsfsDistance::Every(d / 100.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IbdConfig {
    /// Generations; states starting below this age count as IBD.
    pub time_threshold: f64,
    pub probability_threshold: f32,
    pub min_length_cm: f64,
    /// Non-IBD sites tolerated between two runs before they are reported separately.
    pub merge_gap_sites: usize,
    pub conditional_age: bool,
}

impl Default for IbdConfig {
    fn default() -> Self {
        Self {
            time_threshold: 100.0,
            probability_threshold: PROBABILITY_THRESHOLDS[3],
            min_length_cm: 1.0,
            merge_gap_sites: 0,
            conditional_age: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedConfig {
    pub min_match_cm: f64,
    pub min_maf: f64,
    pub gap: usize,
    /// Buckets larger than this are re-hashed on the next word; 0 disables it.
    pub max_seeds: usize,
    pub skip: f64,
    pub read_ahead: usize,
    pub word_size: usize,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            min_match_cm: 1.0,
            min_maf: 0.0,
            gap: 1,
            max_seeds: 0,
            skip: 0.0,
            read_ahead: 10,
            word_size: 64,
        }
    }
}

impl SeedConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        if args.word_size == 0 || args.word_size > 64 {
            return Err(CustomError::WordSize {
                word_size: args.word_size,
            });
        }
        if args.read_ahead == 0 {
            return Err(CustomError::ReadAhead);
        }
        Ok(Self {
            min_match_cm: args.min_m,
            min_maf: args.min_maf,
            gap: args.gap,
            max_seeds: args.max_seeds,
            skip: args.skip,
            read_ahead: args.read_ahead,
            word_size: args.word_size,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodingConfig {
    pub mode: DecodingMode,
    pub strategy: DecodingStrategy,
    pub csfs_distance: CsfsDistance,
    /// Use the two-class emission at non-CSFS sites even in sequence mode.
    pub compress: bool,
    pub scaling_skip: usize,
    pub posterior_sums: bool,
    pub major_minor_sums: bool,
    pub per_pair_map: bool,
    pub per_pair_posterior_mean: bool,
    pub within_only: bool,
    pub ibd: Option<IbdConfig>,
    pub precision: i32,
    pub min_genetic: f64,
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            mode: DecodingMode::ArrayFolded,
            strategy: DecodingStrategy::Batched {
                capacity: DEFAULT_BATCH_SIZE,
            },
            csfs_distance: CsfsDistance::Always,
            compress: false,
            scaling_skip: 1,
            posterior_sums: true,
            major_minor_sums: false,
            per_pair_map: false,
            per_pair_posterior_mean: false,
            within_only: false,
            ibd: None,
            precision: MORGANS_PRECISION,
            min_genetic: MIN_GENETIC,
        }
    }
}

impl DecodingConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        if args.compress && args.use_ancestral {
            return Err(CustomError::ConflictingFlags {
                first: "compress",
                second: "use-ancestral",
            });
        }
        if args.germline && args.within_only {
            return Err(CustomError::ConflictingFlags {
                first: "germline",
                second: "within-only",
            });
        }
        if args.germline && args.sample_pairs_csv.is_some() {
            return Err(CustomError::ConflictingFlags {
                first: "germline",
                second: "sample-pairs-csv",
            });
        }
        let csfs_distance = CsfsDistance::normalize(args.skip_csfs_distance, args.compress)?;

        if args.batch_size == 0 || args.batch_size % 8 != 0 {
            return Err(CustomError::BatchSize {
                batch_size: args.batch_size,
            });
        }
        if args.scaling_skip == 0 {
            return Err(CustomError::ScalingSkip);
        }
        let mode = DecodingMode::parse(&args.mode, args.use_ancestral)?;

        if !(args.time > 0.0) {
            return Err(CustomError::TimeThreshold { time: args.time });
        }
        let probability_threshold = *PROBABILITY_THRESHOLDS
            .get(args.recall as usize)
            .ok_or(CustomError::Recall {
                recall: args.recall,
            })?;

        if !args.posterior_sums
            && !args.major_minor_posterior_sums
            && !args.per_pair_map
            && !args.per_pair_posterior_means
            && !args.ibd
        {
            return Err(CustomError::NoTask);
        }

        let strategy = if args.no_batches {
            DecodingStrategy::Scalar
        } else {
            DecodingStrategy::Batched {
                capacity: args.batch_size,
            }
        };
        let ibd = args.ibd.then(|| IbdConfig {
            time_threshold: args.time,
            probability_threshold,
            min_length_cm: args.min_ibd_length,
            merge_gap_sites: args.merge_gap,
            conditional_age: !args.no_conditional_age_estimates,
        });

        Ok(Self {
            mode,
            strategy,
            csfs_distance,
            compress: args.compress,
            scaling_skip: args.scaling_skip,
            posterior_sums: args.posterior_sums,
            major_minor_sums: args.major_minor_posterior_sums,
            per_pair_map: args.per_pair_map,
            per_pair_posterior_mean: args.per_pair_posterior_means,
            within_only: args.within_only,
            ibd,
            precision: MORGANS_PRECISION,
            min_genetic: MIN_GENETIC,
        })
    }

    pub fn wants_sums(&self) -> bool {
        self.posterior_sums || self.major_minor_sums
    }

    pub fn wants_traces(&self) -> bool {
        self.per_pair_map || self.per_pair_posterior_mean || self.ibd.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPartition {
    job_index: usize,
    job_count: usize,
}

impl JobPartition {
    pub fn new(job_index: usize, job_count: usize) -> Result<Self> {
        if !is_valid_job_count(job_count) {
            let (below, above) = neighbouring_job_counts(job_count);
            return Err(CustomError::JobCount {
                jobs: job_count,
                below,
                above,
            });
        }
        if job_index == 0 || job_index > job_count {
            return Err(CustomError::JobIndex {
                job_index,
                jobs: job_count,
            });
        }
        Ok(Self {
            job_index,
            job_count,
        })
    }

    #[cfg(test)]
    pub fn single() -> Self {
        Self {
            job_index: 1,
            job_count: 1,
        }
    }

    pub fn job_index(&self) -> usize {
        self.job_index
    }

    pub fn job_count(&self) -> usize {
        self.job_count
    }

    pub fn tiling(&self, n_items: usize) -> PairTiling {
        let mut windows = 1;
        while windows * windows < self.job_count {
            windows += 1;
        }
        PairTiling {
            job_index: self.job_index,
            job_count: self.job_count,
            window_size: n_items.div_ceil(windows).max(1),
        }
    }
}

/// Job counts are centered hexagonal numbers: 1, 7, 19, 37, ...
pub fn is_valid_job_count(jobs: usize) -> bool {
    let (below, _) = neighbouring_job_counts(jobs);
    below == jobs
}

fn neighbouring_job_counts(jobs: usize) -> (usize, usize) {
    let mut step = 0;
    let mut count = 1;
    let mut below = 1;
    while count <= jobs {
        below = count;
        step += 6;
        count += step;
    }
    (below, count)
}

/// Assignment of unordered pairs to jobs.
///
/// Items are grouped into square windows of `window_size`. Each diagonal
/// window is one triangular unit; each off-diagonal window is split into two
/// triangles by comparing the offsets of the two items within their windows.
/// Units are numbered row by row and handed to jobs in order, with the last
/// job absorbing every unit left over.
#[derive(Debug, Clone, Copy)]
pub struct PairTiling {
    job_index: usize,
    job_count: usize,
    window_size: usize,
}

impl PairTiling {
    pub fn owns(&self, a: usize, b: usize) -> bool {
        self.job_of(a, b) == self.job_index
    }

    pub fn job_of(&self, a: usize, b: usize) -> usize {
        let unit = self.unit_of(a.max(b), a.min(b));
        unit.min(self.job_count - 1) + 1
    }

    fn unit_of(&self, hi: usize, lo: usize) -> usize {
        let wi = hi / self.window_size;
        let wj = lo / self.window_size;
        let row_start = wi * wi;
        if wi == wj {
            return row_start + 2 * wi;
        }
        let above_diagonal = lo - wj * self.window_size < hi - wi * self.window_size;
        row_start + 2 * wj + usize::from(!above_diagonal)
    }
}
