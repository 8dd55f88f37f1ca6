mod cli;
mod config;
mod error;
mod genotypes;
mod hmm;
mod model;
mod output;
mod pairing;
mod reader;
mod table;
#[cfg(test)]
mod testing;

use crate::error::Result;
use chrono::Local;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

/// Decode pairwise coalescence times and call IBD segments.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Input file prefix (.haps[.gz], .samples and .map[.gz]).
    #[arg(short, long)]
    prefix: String,

    /// Decoding table (JSON, optionally gzipped). Defaults to <prefix>.decoding.json[.gz].
    #[arg(long)]
    decoding_table: Option<String>,

    /// Output directory.
    #[arg(
        short,
        long,
        value_hint = clap::ValueHint::DirPath,
        default_value_t = format!("tmrca_output_{}", Local::now().format("%Y%m%d_%H%M%S"))
    )]
    output_directory: String,

    /// Decoding mode: sequence or array.
    #[arg(long, default_value = "array")]
    mode: String,

    /// Assume ancestral alleles are coded as 1 (otherwise 1 is taken as minor and sites are folded).
    #[arg(long)]
    use_ancestral: bool,

    /// Use the compressed emission model at every site (no CSFS).
    #[arg(long)]
    compress: bool,

    /// Genetic distance (cM) between two CSFS emissions. "inf" never uses the CSFS.
    #[arg(long)]
    skip_csfs_distance: Option<f64>,

    /// Decode every pair on its own instead of in batches.
    #[arg(long)]
    no_batches: bool,

    /// Number of pairs decoded together; a positive multiple of 8.
    #[arg(long, default_value_t = config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Rescale forward/backward vectors every this many sites.
    #[arg(long, default_value_t = 1)]
    scaling_skip: usize,

    /// Number of jobs the pair space is split into (1, 7, 19, 37, ...).
    #[arg(long, default_value_t = 1)]
    jobs: usize,

    /// Index of this job (1..=jobs).
    #[arg(long, default_value_t = 1)]
    job_index: usize,

    /// Write the posterior summed over all pairs (sites x states).
    #[arg(long)]
    posterior_sums: bool,

    /// Write posterior sums split by the genotype of the pair at each site.
    #[arg(long)]
    major_minor_posterior_sums: bool,

    /// Write the MAP state of every pair at every site.
    #[arg(long)]
    per_pair_map: bool,

    /// Write the posterior mean time of every pair at every site.
    #[arg(long)]
    per_pair_posterior_means: bool,

    /// Only decode the two haplotypes within each individual.
    #[arg(long)]
    within_only: bool,

    /// Call IBD segments.
    #[arg(long)]
    ibd: bool,

    /// Time threshold (generations) defining IBD.
    #[arg(long, default_value_t = 100.0)]
    time: f64,

    /// Recall level from 0 to 3; higher values lower the IBD probability threshold.
    #[arg(long, default_value_t = 3)]
    recall: u8,

    /// Minimum IBD segment length (cM).
    #[arg(long, default_value_t = 1.0)]
    min_ibd_length: f64,

    /// Non-IBD sites allowed inside one segment.
    #[arg(long, default_value_t = 0)]
    merge_gap: usize,

    /// Report unconditional posterior mean ages for IBD segments.
    #[arg(long)]
    no_conditional_age_estimates: bool,

    /// Only decode pairs sharing seeded matches.
    #[arg(long)]
    germline: bool,

    /// Minimum seeded match length (cM).
    #[arg(long, default_value_t = 1.0)]
    min_m: f64,

    /// Skip words whose distinct seeds per haplotype fall below this value.
    #[arg(long, default_value_t = 0.0)]
    skip: f64,

    /// Minimum minor allele frequency of sites used for seeding.
    #[arg(long, default_value_t = 0.0)]
    min_maf: f64,

    /// Words allowed to mismatch inside one seeded match.
    #[arg(long, default_value_t = 1)]
    gap: usize,

    /// Re-hash seed buckets larger than this on the next word (0 = off).
    #[arg(long, default_value_t = 0)]
    max_seeds: usize,

    /// Words available for re-hashing past the current one.
    #[arg(long, default_value_t = 10)]
    read_ahead: usize,

    /// Sites per seeding word (1-64).
    #[arg(long, default_value_t = 64)]
    word_size: usize,

    /// CSV of individual id pairs to decode instead of all pairs.
    #[arg(long)]
    sample_pairs_csv: Option<String>,

    /// Threads used for all-pairs posterior sums.
    #[arg(short, long)]
    threads: Option<usize>,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn try_main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("tmrca=debug,info")
    } else {
        EnvFilter::new("tmrca=info,warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let run_spec = cli::build_run_spec(&args)?;
    std::fs::create_dir_all(&run_spec.output_dir)
        .map_err(|e| error::CustomError::OutputDir { source: e })?;
    run_spec.print_paths();

    cli::run(&run_spec)
}

fn main() -> miette::Result<()> {
    try_main().into_diagnostic()
}
