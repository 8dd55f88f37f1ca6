use std::io::BufRead;
use std::path::Path;

use crate::error::{CustomError, Result};
use crate::model::Sample;
use crate::reader::common::open_text;

const SAMPLES_HEADER_LINES: usize = 2;
const SAMPLES_MIN_FIELDS: usize = 2;

pub(crate) fn read_samples(path: &impl AsRef<Path>) -> Result<Vec<Sample>> {
    let f = open_text(path)?;
    let mut samples = Vec::new();

    for (line_idx, line) in f.lines().enumerate() {
        let line = line.map_err(|e| CustomError::ReadWithPath {
            source: e,
            path: path.as_ref().to_path_buf(),
        })?;
        if line_idx < SAMPLES_HEADER_LINES || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < SAMPLES_MIN_FIELDS {
            return Err(CustomError::SamplesFields {
                line_num: line_idx + 1,
                n_fields: fields.len(),
                expected: SAMPLES_MIN_FIELDS,
            });
        }
        samples.push(Sample {
            family: fields[0].to_string(),
            id: fields[1].to_string(),
        });
    }
    Ok(samples)
}
