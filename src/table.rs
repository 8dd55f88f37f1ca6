use ndarray::{Array1, Array2, Array3};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::config::DecodingMode;
use crate::error::{CustomError, Result};
use crate::reader::common::open_text;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawTransition {
    pub distance: f64,
    pub diagonal: Vec<f32>,
    pub below: Vec<f32>,
    pub above: Vec<f32>,
    pub ratio: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawDecodingTable {
    pub csfs_samples: usize,
    pub expected_times: Vec<f32>,
    pub discretization: Vec<f64>,
    pub initial_state_prob: Vec<f32>,
    pub transitions: Vec<RawTransition>,
    pub classic_emission: Vec<Vec<f32>>,
    pub compressed_emission: Vec<Vec<f32>>,
    #[serde(default)]
    pub csfs: Option<Vec<Vec<Vec<f32>>>>,
    #[serde(default)]
    pub folded_csfs: Option<Vec<Vec<Vec<f32>>>>,
    #[serde(default)]
    pub ascertained_csfs: Option<Vec<Vec<Vec<f32>>>>,
    #[serde(default)]
    pub folded_ascertained_csfs: Option<Vec<Vec<Vec<f32>>>>,
}

/// Transition operator between consecutive sites separated by `distance` Morgans.
///
/// Moving from state `i` to `k` has probability `below[k]` for `k < i`,
/// `diagonal[k]` for `k == i` and `above[i] * ratio[i+1] * ... * ratio[k-1]`
/// for `k > i`.
#[derive(Debug, Clone)]
pub struct Transition {
    pub distance: f64,
    pub diagonal: Array1<f32>,
    pub below: Array1<f32>,
    pub above: Array1<f32>,
    pub ratio: Array1<f32>,
}

/// Precomputed quantities for one time discretization, read-only after load.
#[derive(Debug, Clone)]
pub struct DecodingTable {
    csfs_samples: usize,
    expected_times: Array1<f32>,
    discretization: Vec<f64>,
    initial: Array1<f32>,
    // sorted by distance
    transitions: Vec<Transition>,
    classic_emission: Array2<f32>,
    compressed_emission: Array2<f32>,
    csfs: Option<Array3<f32>>,
    folded_csfs: Option<Array3<f32>>,
    ascertained_csfs: Option<Array3<f32>>,
    folded_ascertained_csfs: Option<Array3<f32>>,
}

impl DecodingTable {
    pub fn load(path: &impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = open_text(&path)?;
        let raw: RawDecodingTable =
            serde_json::from_reader(reader).map_err(|source| CustomError::DecodingTableJson {
                source,
                path: path.to_path_buf(),
            })?;
        Self::from_raw(raw, path)
    }

    pub(crate) fn from_raw(raw: RawDecodingTable, path: &Path) -> Result<Self> {
        let invalid = |message: String| CustomError::DecodingTable {
            path: path.to_path_buf(),
            message,
        };

        let n_states = raw.expected_times.len();
        if n_states == 0 {
            return Err(invalid("no states".to_string()));
        }
        if raw.discretization.len() != n_states && raw.discretization.len() != n_states + 1 {
            return Err(invalid(format!(
                "{} discretization boundaries for {n_states} states",
                raw.discretization.len()
            )));
        }
        if raw.initial_state_prob.len() != n_states {
            return Err(invalid(format!(
                "{} initial probabilities for {n_states} states",
                raw.initial_state_prob.len()
            )));
        }
        if raw.csfs_samples < 2 {
            return Err(invalid(format!("csfs_samples is {}", raw.csfs_samples)));
        }
        if raw.transitions.is_empty() {
            return Err(invalid("no transitions".to_string()));
        }

        let mut transitions = Vec::with_capacity(raw.transitions.len());
        for t in raw.transitions {
            let vectors = [&t.diagonal, &t.below, &t.above, &t.ratio];
            if vectors.iter().any(|v| v.len() != n_states) || !t.distance.is_finite() {
                return Err(invalid(format!(
                    "malformed transition at distance {}",
                    t.distance
                )));
            }
            transitions.push(Transition {
                distance: t.distance,
                diagonal: Array1::from(t.diagonal),
                below: Array1::from(t.below),
                above: Array1::from(t.above),
                ratio: Array1::from(t.ratio),
            });
        }
        transitions.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let classic_emission = to_array2(raw.classic_emission, 3, n_states)
            .ok_or_else(|| invalid("classic_emission must be 3 x states".to_string()))?;
        let compressed_emission = to_array2(raw.compressed_emission, 2, n_states)
            .ok_or_else(|| invalid("compressed_emission must be 2 x states".to_string()))?;

        let min_counts = raw.csfs_samples - 1;
        let csfs_table = |rows: Option<Vec<Vec<Vec<f32>>>>, name: &str| {
            rows.map(|rows| {
                to_array3(rows, min_counts, n_states).ok_or_else(|| {
                    invalid(format!(
                        "{name} must be at least {min_counts} x 3 x {n_states}"
                    ))
                })
            })
            .transpose()
        };
        let csfs = csfs_table(raw.csfs, "csfs")?;
        let folded_csfs = csfs_table(raw.folded_csfs, "folded_csfs")?;
        let ascertained_csfs = csfs_table(raw.ascertained_csfs, "ascertained_csfs")?;
        let folded_ascertained_csfs =
            csfs_table(raw.folded_ascertained_csfs, "folded_ascertained_csfs")?;

        Ok(Self {
            csfs_samples: raw.csfs_samples,
            expected_times: Array1::from(raw.expected_times),
            discretization: raw.discretization,
            initial: Array1::from(raw.initial_state_prob),
            transitions,
            classic_emission,
            compressed_emission,
            csfs,
            folded_csfs,
            ascertained_csfs,
            folded_ascertained_csfs,
        })
    }

    pub fn n_states(&self) -> usize {
        self.expected_times.len()
    }

    pub fn csfs_samples(&self) -> usize {
        self.csfs_samples
    }

    pub fn expected_times(&self) -> &Array1<f32> {
        &self.expected_times
    }

    pub fn initial(&self) -> &Array1<f32> {
        &self.initial
    }

    pub fn transition(&self, idx: usize) -> &Transition {
        &self.transitions[idx]
    }

    pub fn transition_index(&self, distance: f64) -> usize {
        let idx = self.transitions.partition_point(|t| t.distance < distance);
        if idx == 0 {
            return 0;
        }
        if idx == self.transitions.len() {
            return idx - 1;
        }
        let below = distance - self.transitions[idx - 1].distance;
        let above = self.transitions[idx].distance - distance;
        if below <= above { idx - 1 } else { idx }
    }

    /// Rows `0/1/2` give the emission of a homozygous major, heterozygous
    /// and homozygous minor pair.
    pub fn classic_emission(&self) -> &Array2<f32> {
        &self.classic_emission
    }

    /// Rows `0/1` give the emission of a homozygous and a heterozygous pair.
    pub fn compressed_emission(&self) -> &Array2<f32> {
        &self.compressed_emission
    }

    /// The CSFS emission table (`[undistinguished][class][state]`) used in `mode`.
    pub fn csfs_for(&self, mode: DecodingMode) -> Result<&Array3<f32>> {
        let (table, name) = match mode {
            DecodingMode::Sequence => (&self.csfs, "csfs"),
            DecodingMode::SequenceFolded => (&self.folded_csfs, "folded_csfs"),
            DecodingMode::Array => (&self.ascertained_csfs, "ascertained_csfs"),
            DecodingMode::ArrayFolded => (&self.folded_ascertained_csfs, "folded_ascertained_csfs"),
        };
        table.as_ref().ok_or(CustomError::DecodingTableMode {
            table: name,
            mode: mode.name(),
        })
    }

    pub fn state_threshold(&self, time: f64) -> usize {
        self.discretization
            .iter()
            .take(self.n_states())
            .take_while(|&&boundary| boundary < time)
            .count()
    }
}

fn to_array2(rows: Vec<Vec<f32>>, n_rows: usize, n_cols: usize) -> Option<Array2<f32>> {
    if rows.len() != n_rows || rows.iter().any(|r| r.len() != n_cols) {
        return None;
    }
    Array2::from_shape_vec((n_rows, n_cols), rows.concat()).ok()
}

fn to_array3(rows: Vec<Vec<Vec<f32>>>, min_rows: usize, n_states: usize) -> Option<Array3<f32>> {
    let n_rows = rows.len();
    if n_rows < min_rows {
        return None;
    }
    let mut flat = Vec::with_capacity(n_rows * 3 * n_states);
    for classes in rows {
        if classes.len() != 3 || classes.iter().any(|c| c.len() != n_states) {
            return None;
        }
        flat.extend(classes.into_iter().flatten());
    }
    Array3::from_shape_vec((n_rows, 3, n_states), flat).ok()
}

pub fn default_table_path(prefix: &str) -> PathBuf {
    crate::reader::common::first_existing(vec![
        PathBuf::from(format!("{prefix}.decoding.json")),
        PathBuf::from(format!("{prefix}.decoding.json.gz")),
    ])
}
