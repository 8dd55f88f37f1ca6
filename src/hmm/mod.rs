pub mod emission;
pub mod recurrence;
pub mod summary;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{DecodingConfig, DecodingStrategy, IbdConfig, JobPartition, PairTiling};
use crate::error::Result;
use crate::genotypes::GenotypeStore;
use crate::hmm::emission::SiteModel;
use crate::hmm::recurrence::{Kernel, posteriors};
use crate::hmm::summary::{
    DecodingReturnValues, IbdSegment, PairTrace, Summarizer, find_ibd_segments,
};
use crate::model::{Hap, HapPair, PairObservation};
use crate::table::DecodingTable;

pub trait PairSink {
    fn accept(
        &mut self,
        store: &GenotypeStore,
        trace: &PairTrace,
        segments: &[IbdSegment],
    ) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

/// A decoding session over one genotype store.
///
/// Observations are queued until the batch reaches capacity and then decoded
/// together; [`finish_decoding`](Self::finish_decoding) flushes the remainder.
pub struct Decoder<'a> {
    store: &'a GenotypeStore,
    config: &'a DecodingConfig,
    kernel: Kernel<'a>,
    summarizer: Summarizer,
    batch: Vec<PairObservation>,
    return_values: DecodingReturnValues,
    sink: Option<Box<dyn PairSink + 'a>>,
    n_batches: u64,
    n_segments: u64,
}

impl<'a> Decoder<'a> {
    pub fn new(
        store: &'a GenotypeStore,
        table: &'a DecodingTable,
        config: &'a DecodingConfig,
        sink: Option<Box<dyn PairSink + 'a>>,
    ) -> Result<Self> {
        let sites = SiteModel::build(store, table, config)?;
        let kernel = Kernel::new(table, sites, config.scaling_skip);
        let time_threshold = config
            .ibd
            .as_ref()
            .map_or(IbdConfig::default().time_threshold, |ibd| ibd.time_threshold);
        let summarizer = Summarizer::new(
            table.expected_times().to_vec(),
            table.state_threshold(time_threshold),
        );
        debug!(
            "{} states, state threshold {} for {} generations",
            table.n_states(),
            summarizer.state_threshold(),
            time_threshold
        );

        let capacity = match config.strategy {
            DecodingStrategy::Batched { capacity } => capacity,
            DecodingStrategy::Scalar => 0,
        };
        Ok(Self {
            store,
            config,
            kernel,
            summarizer,
            batch: Vec::with_capacity(capacity),
            return_values: DecodingReturnValues::new(
                store.n_sites(),
                table.n_states(),
                config.major_minor_sums,
                store.site_was_flipped(),
            ),
            sink,
            n_batches: 0,
            n_segments: 0,
        })
    }

    pub fn set_sink(&mut self, sink: Box<dyn PairSink + 'a>) {
        self.sink = Some(sink);
    }

    pub fn make_pair_obs(&self, pair: HapPair, from: usize, to: usize) -> PairObservation {
        self.store.observe(pair, from, to)
    }

    pub fn decode_hap_pair(&mut self, pair: HapPair) -> Result<()> {
        let obs = self.make_pair_obs(pair, 0, self.store.n_sites());
        self.enqueue(obs)
    }

    /// Queues the haplotype pairs of individuals `i` and `j`: the two
    /// haplotypes of `i` against each other when `i == j`, otherwise all four
    /// cross pairs.
    pub fn decode_pair(&mut self, i: usize, j: usize) -> Result<()> {
        for pair in pair_haplotypes(i, j) {
            self.decode_hap_pair(pair)?;
        }
        Ok(())
    }

    pub fn decode_pairs(&mut self, pairs: &[(usize, usize)]) -> Result<()> {
        for &(i, j) in pairs {
            self.decode_pair(i, j)?;
        }
        Ok(())
    }

    pub fn decode_from_germline(&mut self, a: usize, b: usize, from: usize, to: usize) -> Result<()> {
        let obs = self.make_pair_obs(HapPair::from_flat(a, b), from, to);
        self.enqueue(obs)
    }

    pub fn decode_all(&mut self, partition: &JobPartition) -> Result<()> {
        let n_individuals = self.store.n_individuals();
        let pairs = owned_pairs(
            n_individuals,
            self.config.within_only,
            &partition.tiling(n_individuals),
        );
        info!(
            "Decoding {} pairs of individuals (job {} of {})",
            pairs.len(),
            partition.job_index(),
            partition.job_count()
        );

        let pb = ProgressBar::new(pairs.len() as u64);
        pb.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:30} {pos}/{len} pairs").unwrap(),
        );
        for (i, j) in pairs {
            self.decode_pair(i, j)?;
            pb.inc(1);
        }
        pb.abandon();
        Ok(())
    }

    pub fn decode(&self, obs: &PairObservation) -> Vec<Vec<f32>> {
        posteriors(&self.kernel.forward(obs), &self.kernel.backward(obs))
    }

    pub fn decode_summarize(&self, obs: &PairObservation) -> PairTrace {
        let mut trace = PairTrace::new(obs.pair, obs.from, obs.len());
        for (offset, posterior) in self.decode(obs).iter().enumerate() {
            self.summarizer.record(&mut trace, obs.from + offset, posterior);
        }
        trace
    }

    pub fn batch_buffer(&self) -> &[PairObservation] {
        &self.batch
    }

    pub fn return_values(&self) -> &DecodingReturnValues {
        &self.return_values
    }

    pub fn state_threshold(&self) -> usize {
        self.summarizer.state_threshold()
    }

    /// Decodes whatever is still queued, closes the per-pair outputs and
    /// hands back the accumulated sums.
    pub fn finish_decoding(mut self) -> Result<DecodingReturnValues> {
        self.flush()?;
        if let Some(sink) = self.sink.as_mut() {
            sink.finish()?;
        }
        info!(
            "Decoded {} haplotype pairs in {} batches",
            self.return_values.n_observations, self.n_batches
        );
        if self.config.ibd.is_some() {
            info!("Detected {} IBD segments", self.n_segments);
        }
        Ok(self.return_values)
    }

    fn enqueue(&mut self, obs: PairObservation) -> Result<()> {
        match self.config.strategy {
            DecodingStrategy::Scalar => self.decode_now(obs),
            DecodingStrategy::Batched { capacity } => {
                self.batch.push(obs);
                if self.batch.len() >= capacity {
                    self.flush()?;
                }
                Ok(())
            }
        }
    }

    fn decode_now(&mut self, obs: PairObservation) -> Result<()> {
        let mut traces = self.start_traces(std::slice::from_ref(&obs));
        for (offset, posterior) in self.decode(&obs).iter().enumerate() {
            let pos = obs.from + offset;
            if self.config.wants_sums() {
                self.return_values.augment(&obs, pos, posterior);
            }
            if let Some(traces) = traces.as_mut() {
                self.summarizer.record(&mut traces[0], pos, posterior);
            }
        }
        self.return_values.n_observations += 1;
        self.n_batches += 1;
        self.emit(traces)
    }

    fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let mut batch = std::mem::take(&mut self.batch);
        let mut traces = self.start_traces(&batch);

        let wants_sums = self.config.wants_sums();
        let summarizer = &self.summarizer;
        let return_values = &mut self.return_values;
        self.kernel.posteriors_batched(&batch, |member, pos, posterior| {
            if wants_sums {
                return_values.augment(&batch[member], pos, posterior);
            }
            if let Some(traces) = traces.as_mut() {
                summarizer.record(&mut traces[member], pos, posterior);
            }
        });
        self.return_values.n_observations += batch.len() as u64;
        self.n_batches += 1;
        debug!("Decoded batch {} of {} pairs", self.n_batches, batch.len());

        batch.clear();
        self.batch = batch;
        self.emit(traces)
    }

    fn start_traces(&self, batch: &[PairObservation]) -> Option<Vec<PairTrace>> {
        self.config.wants_traces().then(|| {
            batch
                .iter()
                .map(|obs| PairTrace::new(obs.pair, obs.from, obs.len()))
                .collect()
        })
    }

    fn emit(&mut self, traces: Option<Vec<PairTrace>>) -> Result<()> {
        let Some(traces) = traces else {
            return Ok(());
        };
        for trace in &traces {
            let segments = match &self.config.ibd {
                Some(ibd) => find_ibd_segments(
                    trace,
                    self.store.genetic_positions(),
                    &self.summarizer,
                    ibd,
                    self.config.precision,
                    self.config.min_genetic,
                ),
                None => Vec::new(),
            };
            self.n_segments += segments.len() as u64;
            if let Some(sink) = self.sink.as_mut() {
                sink.accept(self.store, trace, &segments)?;
            }
        }
        Ok(())
    }
}

pub fn pair_haplotypes(i: usize, j: usize) -> Vec<HapPair> {
    if i == j {
        return vec![HapPair::new(i, Hap::First, i, Hap::Second)];
    }
    let mut pairs = Vec::with_capacity(4);
    for i_hap in [Hap::First, Hap::Second] {
        for j_hap in [Hap::First, Hap::Second] {
            pairs.push(HapPair::new(i, i_hap, j, j_hap));
        }
    }
    pairs
}

pub fn owned_pairs(n_individuals: usize, within_only: bool, tiling: &PairTiling) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for i in 0..n_individuals {
        if within_only {
            if tiling.owns(i, i) {
                pairs.push((i, i));
            }
            continue;
        }
        for j in i..n_individuals {
            if tiling.owns(i, j) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

/// Sums posteriors over every owned pair, decoding batches on the rayon pool.
///
/// Only genome-wide sums are produced; per-pair outputs need a [`Decoder`].
pub fn sum_all_pairs_parallel(
    store: &GenotypeStore,
    table: &DecodingTable,
    config: &DecodingConfig,
    partition: &JobPartition,
) -> Result<DecodingReturnValues> {
    let sites = SiteModel::build(store, table, config)?;
    let kernel = Kernel::new(table, sites, config.scaling_skip);
    let n_individuals = store.n_individuals();
    let n_sites = store.n_sites();
    let hap_pairs: Vec<HapPair> = owned_pairs(
        n_individuals,
        config.within_only,
        &partition.tiling(n_individuals),
    )
    .into_iter()
    .flat_map(|(i, j)| pair_haplotypes(i, j))
    .collect();
    let chunk_size = match config.strategy {
        DecodingStrategy::Batched { capacity } => capacity,
        DecodingStrategy::Scalar => 1,
    };
    info!(
        "Decoding {} haplotype pairs on {} threads",
        hap_pairs.len(),
        rayon::current_num_threads()
    );

    let pb = ProgressBar::new(hap_pairs.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:30} {pos}/{len} haplotype pairs")
            .unwrap(),
    );
    let empty = || {
        DecodingReturnValues::new(
            n_sites,
            table.n_states(),
            config.major_minor_sums,
            store.site_was_flipped(),
        )
    };
    let sums = hap_pairs
        .par_chunks(chunk_size)
        .fold(empty, |mut acc, chunk| {
            let batch: Vec<PairObservation> =
                chunk.iter().map(|&pair| store.observe(pair, 0, n_sites)).collect();
            match config.strategy {
                DecodingStrategy::Batched { .. } => {
                    kernel.posteriors_batched(&batch, |member, pos, posterior| {
                        acc.augment(&batch[member], pos, posterior);
                    });
                }
                DecodingStrategy::Scalar => {
                    for obs in &batch {
                        let posterior = posteriors(&kernel.forward(obs), &kernel.backward(obs));
                        for (offset, site) in posterior.iter().enumerate() {
                            acc.augment(obs, obs.from + offset, site);
                        }
                    }
                }
            }
            acc.n_observations += batch.len() as u64;
            pb.inc(chunk.len() as u64);
            acc
        })
        .reduce(empty, DecodingReturnValues::combine);
    pb.abandon();
    Ok(sums)
}
