use thiserror::Error;

#[derive(Debug, Error)]
pub enum CustomError {
    #[error("could not read {path}")]
    ReadWithPath {
        #[source]
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("could not write to {path}")]
    Write {
        #[source]
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("could not create output directory")]
    OutputDir {
        #[source]
        source: std::io::Error,
    },

    #[error("could not write IBD segments")]
    CsvWrite(#[from] csv::Error),

    #[error("could not read {path}")]
    CsvRead {
        #[source]
        source: csv::Error,
        path: std::path::PathBuf,
    },

    #[error("could not write array {name} to npz archive")]
    NpyWrite {
        #[source]
        source: ndarray_npy::WriteNpyError,
        name: String,
    },

    #[error("could not write npz archive")]
    Zip(#[from] zip::result::ZipError),

    #[error("could not serialize sample ids")]
    Json(#[from] serde_json::Error),

    #[error("could not build thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("--{first} and --{second} cannot be used together")]
    ConflictingFlags {
        first: &'static str,
        second: &'static str,
    },

    #[error("invalid number of jobs {jobs}: use {below} or {above}")]
    JobCount {
        jobs: usize,
        below: usize,
        above: usize,
    },

    #[error("--job-index must be between 1 and --jobs ({jobs}) inclusive (got {job_index})")]
    JobIndex { job_index: usize, jobs: usize },

    #[error("--batch-size must be strictly positive and a multiple of 8 (got {batch_size})")]
    BatchSize { batch_size: usize },

    #[error("--scaling-skip must be strictly positive")]
    ScalingSkip,

    #[error("unknown decoding mode \"{mode}\": choose from {{sequence, array}}")]
    DecodingMode { mode: String },

    #[error("--recall must be between 0 and 3 (got {recall})")]
    Recall { recall: u8 },

    #[error("--time must be a positive number of generations (got {time})")]
    TimeThreshold { time: f64 },

    #[error("--word-size must be between 1 and 64 (got {word_size})")]
    WordSize { word_size: usize },

    #[error("--read-ahead must be at least 1")]
    ReadAhead,

    #[error(
        "at least one of --posterior-sums, --major-minor-posterior-sums, --per-pair-map, --per-pair-posterior-means or --ibd must be specified"
    )]
    NoTask,

    #[error("invalid decoding table {path}: {message}")]
    DecodingTable {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("could not parse decoding table {path}")]
    DecodingTableJson {
        #[source]
        source: serde_json::Error,
        path: std::path::PathBuf,
    },

    #[error("decoding table has no {table} emissions required by {mode} decoding")]
    DecodingTableMode {
        table: &'static str,
        mode: &'static str,
    },

    #[error("expected at least {expected} fields (got {n_fields}) in line {line_num} of haps file")]
    HapsFields {
        line_num: usize,
        n_fields: usize,
        expected: usize,
    },

    #[error("invalid haplotype value \"{value}\" in line {line_num} of haps file")]
    HapsAllele { line_num: usize, value: String },

    #[error("could not parse position \"{value}\" in line {line_num} of {path}")]
    Position {
        line_num: usize,
        value: String,
        path: std::path::PathBuf,
    },

    #[error("expected at least {expected} fields (got {n_fields}) in line {line_num} of samples file")]
    SamplesFields {
        line_num: usize,
        n_fields: usize,
        expected: usize,
    },

    #[error("expected {expected} fields (got {n_fields}) in line {line_num} of map file")]
    MapFields {
        line_num: usize,
        n_fields: usize,
        expected: usize,
    },

    #[error("genetic map is not sorted at line {line_num}")]
    MapUnsorted { line_num: usize },

    #[error("haps and map files disagree on site count (haps={n_haps}, map={n_map})")]
    SiteCountAgreement { n_haps: usize, n_map: usize },

    #[error("haps and map files disagree at site {site} (haps bp={haps_bp}, map bp={map_bp})")]
    MapPosition { site: usize, haps_bp: u64, map_bp: u64 },

    #[error("haps file has {n_haps} haplotype columns but samples file lists {n_samples} individuals")]
    SampleAgreement { n_haps: usize, n_samples: usize },

    #[error("need at least 2 haplotypes (got {n_haps})")]
    SampleCount { n_haps: usize },

    #[error("need at least 1 site (got {n_sites})")]
    SiteCount { n_sites: usize },

    #[error("sample pairs file must have exactly two columns")]
    SamplePairsColumns,

    #[error("sample pairs file contains no pairs")]
    SamplePairsEmpty,

    #[error("sample pair references unknown individual \"{sample}\"")]
    SamplePairUnknownSample { sample: String },
}

pub type Result<T> = std::result::Result<T, CustomError>;
