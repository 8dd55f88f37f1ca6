use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::error::{CustomError, Result};
use crate::model::{Bits, Sample, Site};
use crate::reader::SiteReader;
use crate::reader::common::{open_text, read_samples};

const HAPS_LEADING_FIELDS: usize = 5;

/// Streams sites from an Oxford `.haps` file (one line per site, two columns per individual).
pub struct HapsReader {
    lines: std::io::Lines<Box<dyn BufRead>>,
    path: PathBuf,
    samples: Vec<Sample>,
    n_sites: usize,
    line_idx: usize,
    done: bool,
}

impl HapsReader {
    pub fn open(haps_path: &impl AsRef<Path>, samples_path: &impl AsRef<Path>) -> Result<Self> {
        let samples = read_samples(samples_path)?;
        if samples.is_empty() {
            return Err(CustomError::SampleCount { n_haps: 0 });
        }

        let n_sites = count_sites(haps_path)?;
        if n_sites < 1 {
            return Err(CustomError::SiteCount { n_sites });
        }

        Ok(Self {
            lines: open_text(haps_path)?.lines(),
            path: haps_path.as_ref().to_path_buf(),
            samples,
            n_sites,
            line_idx: 0,
            done: false,
        })
    }

    fn parse_line(&self, line: &str) -> Result<Site> {
        let line_num = self.line_idx;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < HAPS_LEADING_FIELDS {
            return Err(CustomError::HapsFields {
                line_num,
                n_fields: fields.len(),
                expected: HAPS_LEADING_FIELDS + 2 * self.samples.len(),
            });
        }
        let n_haps = fields.len() - HAPS_LEADING_FIELDS;
        if n_haps != 2 * self.samples.len() {
            return Err(CustomError::SampleAgreement {
                n_haps,
                n_samples: self.samples.len(),
            });
        }

        let physical_position: u64 = fields[2].parse().map_err(|_| CustomError::Position {
            line_num,
            value: fields[2].to_string(),
            path: self.path.clone(),
        })?;

        let mut alleles = Bits::with_capacity(n_haps);
        for value in &fields[HAPS_LEADING_FIELDS..] {
            match *value {
                "0" => alleles.push(false),
                "1" => alleles.push(true),
                other => {
                    return Err(CustomError::HapsAllele {
                        line_num,
                        value: other.to_string(),
                    });
                }
            }
        }

        Ok(Site {
            chrom: fields[0].to_string(),
            physical_position,
            alleles,
        })
    }
}

impl SiteReader for HapsReader {
    fn samples(&self) -> &[Sample] {
        &self.samples
    }

    fn n_sites(&self) -> usize {
        self.n_sites
    }
}

impl Iterator for HapsReader {
    type Item = Result<Site>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    // Poison iterator to prevent further reads
                    self.done = true;
                    return Some(Err(CustomError::ReadWithPath {
                        source: e,
                        path: self.path.clone(),
                    }));
                }
            };
            self.line_idx += 1;
            if line.trim().is_empty() {
                continue;
            }
            let site = self.parse_line(&line);
            if site.is_err() {
                self.done = true;
            }
            return Some(site);
        }
    }
}

fn count_sites(path: &impl AsRef<Path>) -> Result<usize> {
    let mut n_sites = 0;
    for line in open_text(path)?.lines() {
        let line = line.map_err(|e| CustomError::ReadWithPath {
            source: e,
            path: path.as_ref().to_path_buf(),
        })?;
        if !line.trim().is_empty() {
            n_sites += 1;
        }
    }
    Ok(n_sites)
}
