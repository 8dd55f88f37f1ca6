use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use itertools::Itertools;
use ndarray::{Array1, Array2};
use ndarray_npy::WriteNpyExt;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::config::{DecodingConfig, JobPartition};
use crate::error::{CustomError, Result};
use crate::genotypes::GenotypeStore;
use crate::hmm::PairSink;
use crate::hmm::summary::{DecodingReturnValues, IbdSegment, PairTrace};
use crate::model::HapPair;

pub fn job_path(dir: &Path, stem: &str, ext: &str, partition: &JobPartition) -> PathBuf {
    dir.join(format!(
        "{stem}.{}-{}.{ext}",
        partition.job_index(),
        partition.job_count()
    ))
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> CustomError + '_ {
    move |source| CustomError::Write {
        source,
        path: path.to_path_buf(),
    }
}

fn add_array<A>(
    zip: &mut ZipWriter<File>,
    options: SimpleFileOptions,
    name: &str,
    array: &A,
) -> Result<()>
where
    A: WriteNpyExt,
{
    zip.start_file(format!("{name}.npy"), options)?;
    array
        .write_npy(&mut *zip)
        .map_err(|source| CustomError::NpyWrite {
            source,
            name: name.to_string(),
        })
}

pub fn write_sums_npz<'a>(
    values: &DecodingReturnValues,
    sample_ids: impl IntoIterator<Item = &'a str>,
    path: &Path,
) -> Result<()> {
    let file = File::create(path).map_err(write_err(path))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    let as_f32 = |sums: &Array2<f64>| sums.mapv(|x| x as f32);
    add_array(&mut zip, options, "sum_over_pairs", &as_f32(&values.sum_over_pairs))?;
    if let Some(by_class) = &values.sum_by_class {
        for (suffix, sums) in ["00", "01", "11"].iter().zip(by_class) {
            add_array(
                &mut zip,
                options,
                &format!("sum_over_pairs_{suffix}"),
                &as_f32(sums),
            )?;
        }
    }
    let flipped: Array1<u8> = values.site_was_flipped.iter().map(|&f| u8::from(f)).collect();
    add_array(&mut zip, options, "site_was_flipped", &flipped)?;

    let ids: Vec<&str> = sample_ids.into_iter().collect();
    zip.start_file("samples.json", options)?;
    serde_json::to_writer(&mut zip, &ids)?;
    zip.finish()?;
    Ok(())
}

struct TraceWriter {
    path: PathBuf,
    out: BufWriter<GzEncoder<File>>,
}

impl TraceWriter {
    fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path).map_err(write_err(&path))?;
        Ok(Self {
            out: BufWriter::new(GzEncoder::new(file, Compression::default())),
            path,
        })
    }

    fn write_line<T: std::fmt::Display>(
        &mut self,
        store: &GenotypeStore,
        trace: &PairTrace,
        values: &[T],
    ) -> Result<()> {
        writeln!(
            self.out,
            "{}\t{}\t{}\t{}",
            pair_ids(store, trace.pair).join("\t"),
            trace.from,
            trace.to(),
            values.iter().join(" ")
        )
        .map_err(write_err(&self.path))
    }

    fn close(self) -> Result<()> {
        let gz = self
            .out
            .into_inner()
            .map_err(|e| write_err(&self.path)(e.into_error()))?;
        gz.finish().map_err(write_err(&self.path))?;
        Ok(())
    }
}

fn pair_ids(store: &GenotypeStore, pair: HapPair) -> [String; 6] {
    let a = &store.individual(pair.i).sample;
    let b = &store.individual(pair.j).sample;
    [
        a.family.clone(),
        a.id.clone(),
        pair.i_hap.to_string(),
        b.family.clone(),
        b.id.clone(),
        pair.j_hap.to_string(),
    ]
}

/// Per-pair output streams of one job: MAP and posterior-mean traces and IBD
/// segments, each gzip-compressed.
pub struct PairWriters {
    map: Option<TraceWriter>,
    posterior_mean: Option<TraceWriter>,
    ibd: Option<(PathBuf, csv::Writer<GzEncoder<File>>)>,
    segment_posterior_mean: bool,
    segment_map_age: bool,
}

impl PairWriters {
    pub fn create(
        output_dir: &Path,
        config: &DecodingConfig,
        partition: &JobPartition,
    ) -> Result<Self> {
        let map = config
            .per_pair_map
            .then(|| TraceWriter::create(job_path(output_dir, "map", "txt.gz", partition)))
            .transpose()?;
        let posterior_mean = config
            .per_pair_posterior_mean
            .then(|| {
                TraceWriter::create(job_path(output_dir, "posterior_mean", "txt.gz", partition))
            })
            .transpose()?;

        let ibd = if config.ibd.is_some() {
            let path = job_path(output_dir, "ibd", "tsv.gz", partition);
            let file = File::create(&path).map_err(write_err(&path))?;
            let mut wtr = csv::WriterBuilder::new()
                .delimiter(b'\t')
                .from_writer(GzEncoder::new(file, Compression::default()));
            let mut header = vec![
                "fam_id1",
                "ind_id1",
                "hap1",
                "fam_id2",
                "ind_id2",
                "hap2",
                "chrom",
                "start_bp",
                "end_bp",
                "start_cm",
                "end_cm",
                "length_cm",
                "ibd_probability",
                "age",
            ];
            if config.per_pair_posterior_mean {
                header.push("posterior_mean");
            }
            if config.per_pair_map {
                header.push("map_age");
            }
            wtr.write_record(&header)?;
            Some((path, wtr))
        } else {
            None
        };

        Ok(Self {
            map,
            posterior_mean,
            ibd,
            segment_posterior_mean: config.per_pair_posterior_mean,
            segment_map_age: config.per_pair_map,
        })
    }

    fn write_segment(
        &mut self,
        store: &GenotypeStore,
        segment: &IbdSegment,
    ) -> Result<()> {
        let Some((_, wtr)) = self.ibd.as_mut() else {
            return Ok(());
        };
        let mut record: Vec<String> = pair_ids(store, segment.pair).into();
        record.extend([
            store.chrom().to_string(),
            store.physical_position(segment.start).to_string(),
            store.physical_position(segment.end).to_string(),
            segment.start_cm.to_string(),
            segment.end_cm.to_string(),
            segment.length_cm.to_string(),
            segment.ibd_probability.to_string(),
            segment.age.to_string(),
        ]);
        if self.segment_posterior_mean {
            record.push(segment.posterior_mean.to_string());
        }
        if self.segment_map_age {
            record.push(segment.map_age.to_string());
        }
        wtr.write_record(&record)?;
        Ok(())
    }
}

impl PairSink for PairWriters {
    fn accept(
        &mut self,
        store: &GenotypeStore,
        trace: &PairTrace,
        segments: &[IbdSegment],
    ) -> Result<()> {
        if let Some(map) = self.map.as_mut() {
            map.write_line(store, trace, &trace.map_state)?;
        }
        if let Some(posterior_mean) = self.posterior_mean.as_mut() {
            posterior_mean.write_line(store, trace, &trace.posterior_mean)?;
        }
        for segment in segments {
            self.write_segment(store, segment)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(map) = self.map.take() {
            map.close()?;
        }
        if let Some(posterior_mean) = self.posterior_mean.take() {
            posterior_mean.close()?;
        }
        if let Some((path, wtr)) = self.ibd.take() {
            let gz = wtr
                .into_inner()
                .map_err(|e| write_err(&path)(e.into_error()))?;
            gz.finish().map_err(write_err(&path))?;
        }
        Ok(())
    }
}
