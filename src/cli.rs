use crate::Args;
use crate::config::{DecodingConfig, JobPartition, SeedConfig};
use crate::error::{CustomError, Result};
use crate::genotypes::GenotypeStore;
use crate::hmm::summary::DecodingReturnValues;
use crate::hmm::{Decoder, sum_all_pairs_parallel};
use crate::model::Sample;
use crate::output::{PairWriters, job_path, write_sums_npz};
use crate::pairing;
use crate::reader::common::{first_existing, read_genetic_map};
use crate::reader::haps::HapsReader;
use crate::table::{DecodingTable, default_table_path};
use rayon::ThreadPoolBuilder;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::info;

/// Everything a run needs, validated before any input is opened.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub haps: PathBuf,
    pub samples: PathBuf,
    pub map: PathBuf,
    pub table: PathBuf,
    pub output_dir: PathBuf,
    pub config: DecodingConfig,
    pub partition: JobPartition,
    pub seed: Option<SeedConfig>,
    pub sample_pairs: Option<Vec<(String, String)>>,
    pub threads: Option<usize>,
}

impl RunSpec {
    pub fn print_paths(&self) {
        println!("HAPS   : {}", self.haps.display());
        println!("SAMPLES: {}", self.samples.display());
        println!("MAP    : {}", self.map.display());
        println!("TABLE  : {}", self.table.display());
        println!(
            "JOB    : {} of {}",
            self.partition.job_index(),
            self.partition.job_count()
        );
        println!();
    }
}

fn with_suffixes(prefix: &str, suffixes: &[&str]) -> PathBuf {
    first_existing(
        suffixes
            .iter()
            .map(|suffix| PathBuf::from(format!("{prefix}{suffix}")))
            .collect(),
    )
}

pub fn build_run_spec(args: &Args) -> Result<RunSpec> {
    let config = DecodingConfig::from_args(args)?;
    let partition = JobPartition::new(args.job_index, args.jobs)?;
    let seed = args
        .germline
        .then(|| SeedConfig::from_args(args))
        .transpose()?;
    let sample_pairs = match &args.sample_pairs_csv {
        Some(path) => Some(load_sample_pairs_csv(path)?),
        None => None,
    };

    let prefix = args.prefix.as_str();
    Ok(RunSpec {
        haps: with_suffixes(prefix, &[".haps", ".haps.gz", ".hap", ".hap.gz"]),
        samples: with_suffixes(prefix, &[".samples", ".sample"]),
        map: with_suffixes(prefix, &[".map", ".map.gz"]),
        table: match &args.decoding_table {
            Some(path) => PathBuf::from(path),
            None => default_table_path(prefix),
        },
        output_dir: PathBuf::from(&args.output_directory),
        config,
        partition,
        seed,
        sample_pairs,
        threads: args.threads,
    })
}

fn load_sample_pairs_csv(path: &str) -> Result<Vec<(String, String)>> {
    let csv_path = PathBuf::from(path);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(&csv_path)
        .map_err(|source| CustomError::CsvRead {
            source,
            path: csv_path.clone(),
        })?;

    let mut pairs = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|source| CustomError::CsvRead {
            source,
            path: csv_path.clone(),
        })?;

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        if record.len() != 2 {
            return Err(CustomError::SamplePairsColumns);
        }

        let id1 = record[0].trim();
        let id2 = record[1].trim();

        if pairs.is_empty() && id1.eq_ignore_ascii_case("id1") && id2.eq_ignore_ascii_case("id2") {
            continue;
        }
        if id1.is_empty() || id2.is_empty() {
            continue;
        }
        pairs.push((id1.to_string(), id2.to_string()));
    }

    if pairs.is_empty() {
        return Err(CustomError::SamplePairsEmpty);
    }
    Ok(pairs)
}

/// Converts pairs of individual ids into sorted, de-duplicated pairs of
/// individual indices `(i, j)` with `i <= j`. A pair naming the same
/// individual twice decodes that individual's two haplotypes.
fn resolve_sample_pairs<'a>(
    samples: impl IntoIterator<Item = &'a Sample>,
    pairs: &[(String, String)],
) -> Result<Vec<(usize, usize)>> {
    let lookup: HashMap<&str, usize> = samples
        .into_iter()
        .enumerate()
        .map(|(idx, sample)| (sample.id.as_str(), idx))
        .collect();
    let index_of = |id: &str| {
        lookup
            .get(id)
            .copied()
            .ok_or_else(|| CustomError::SamplePairUnknownSample {
                sample: id.to_string(),
            })
    };

    let mut to_keep = BTreeSet::new();
    for (left, right) in pairs {
        let left_idx = index_of(left.trim())?;
        let right_idx = index_of(right.trim())?;
        to_keep.insert((left_idx.min(right_idx), left_idx.max(right_idx)));
    }

    if to_keep.is_empty() {
        return Err(CustomError::SamplePairsEmpty);
    }
    Ok(to_keep.into_iter().collect())
}

pub fn run(spec: &RunSpec) -> Result<()> {
    let table = DecodingTable::load(&spec.table)?;
    info!(
        "Loaded decoding table with {} states and {} CSFS samples",
        table.n_states(),
        table.csfs_samples()
    );
    let map = read_genetic_map(&spec.map)?;
    let mut reader = HapsReader::open(&spec.haps, &spec.samples)?;
    let store = GenotypeStore::consume_reader(
        &mut reader,
        &map,
        table.csfs_samples(),
        spec.config.mode.is_folded(),
    )?;
    info!(
        "Read {} individuals over {} sites on chromosome {}",
        store.n_individuals(),
        store.n_sites(),
        store.chrom()
    );

    let all_pairs_sums_only =
        !spec.config.wants_traces() && spec.seed.is_none() && spec.sample_pairs.is_none();
    let sums = if all_pairs_sums_only && spec.threads != Some(1) {
        if let Some(n) = spec.threads {
            let pool = ThreadPoolBuilder::new().num_threads(n).build()?;
            pool.install(|| sum_all_pairs_parallel(&store, &table, &spec.config, &spec.partition))?
        } else {
            sum_all_pairs_parallel(&store, &table, &spec.config, &spec.partition)?
        }
    } else {
        decode_session(spec, &store, &table)?
    };

    if spec.config.wants_sums() {
        let npz_path = job_path(&spec.output_dir, "sums", "npz", &spec.partition);
        println!("Writing posterior sums to {}...", npz_path.display());
        write_sums_npz(
            &sums,
            store.samples().map(|sample| sample.id.as_str()),
            &npz_path,
        )?;
    }
    Ok(())
}

fn decode_session(
    spec: &RunSpec,
    store: &GenotypeStore,
    table: &DecodingTable,
) -> Result<DecodingReturnValues> {
    // tables missing the mode's CSFS fail here, before any output is opened
    let mut decoder = Decoder::new(store, table, &spec.config, None)?;
    if spec.config.wants_traces() {
        decoder.set_sink(Box::new(PairWriters::create(
            &spec.output_dir,
            &spec.config,
            &spec.partition,
        )?));
    }

    if let Some(seed) = &spec.seed {
        pairing::scan(store, seed, &spec.partition, |a, b, from, to| {
            decoder.decode_from_germline(a, b, from, to)
        })?;
    } else if let Some(pairs) = &spec.sample_pairs {
        let tiling = spec.partition.tiling(store.n_individuals());
        let pairs: Vec<(usize, usize)> = resolve_sample_pairs(store.samples(), pairs)?
            .into_iter()
            .filter(|&(i, j)| tiling.owns(i, j))
            .collect();
        info!("Decoding {} requested pairs of individuals", pairs.len());
        decoder.decode_pairs(&pairs)?;
    } else {
        decoder.decode_all(&spec.partition)?;
    }
    decoder.finish_decoding()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn samples(ids: &[&str]) -> Vec<Sample> {
        ids.iter()
            .map(|id| Sample {
                family: "FAM".to_string(),
                id: id.to_string(),
            })
            .collect()
    }

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn resolve_sample_pairs_succeeds() {
        let samples = samples(&["A", "B", "C"]);
        let keep =
            resolve_sample_pairs(&samples, &pairs(&[("A", "C"), ("C", "B"), ("C", "A")])).unwrap();
        assert_eq!(keep, vec![(0, 2), (1, 2)]);
    }

    #[test]
    fn resolve_sample_pairs_accepts_same_individual() {
        let samples = samples(&["A", "B"]);
        let keep = resolve_sample_pairs(&samples, &pairs(&[("B", "B")])).unwrap();
        assert_eq!(keep, vec![(1, 1)]);
    }

    #[test]
    fn resolve_sample_pairs_rejects_unknown_sample() {
        let samples = samples(&["A", "B"]);
        let err = resolve_sample_pairs(&samples, &pairs(&[("A", "Z")])).unwrap_err();
        match err {
            CustomError::SamplePairUnknownSample { sample } => assert_eq!(sample, "Z"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sample_pairs_csv_skips_header_and_blank_lines() {
        let path = std::env::temp_dir().join(format!("tmrca-pairs-{}.csv", std::process::id()));
        std::fs::write(&path, "id1,id2\nA,B\n,\nC, D\n").unwrap();
        let loaded = load_sample_pairs_csv(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded, pairs(&[("A", "B"), ("C", "D")]));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn run_spec_validates_before_touching_inputs() {
        let args = Args::try_parse_from([
            "tmrca",
            "--prefix",
            "/nonexistent/data",
            "--posterior-sums",
            "--jobs",
            "5",
        ])
        .unwrap();
        match build_run_spec(&args).unwrap_err() {
            CustomError::JobCount { jobs, below, above } => {
                assert_eq!((jobs, below, above), (5, 1, 7));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn run_spec_resolves_default_paths() {
        let args = Args::try_parse_from([
            "tmrca",
            "--prefix",
            "/nonexistent/data",
            "--ibd",
            "--germline",
            "--word-size",
            "16",
        ])
        .unwrap();
        let spec = build_run_spec(&args).unwrap();
        assert_eq!(spec.haps, PathBuf::from("/nonexistent/data.haps"));
        assert_eq!(spec.samples, PathBuf::from("/nonexistent/data.samples"));
        assert_eq!(spec.table, PathBuf::from("/nonexistent/data.decoding.json"));
        assert_eq!(spec.seed.map(|seed| seed.word_size), Some(16));
        assert!(spec.config.ibd.is_some());
    }
}
