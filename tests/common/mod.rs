use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const N_INDIVIDUALS: usize = 6;
pub const N_SITES: usize = 200;
pub const N_STATES: usize = 8;
/// Haplotype pairs decoded over all individuals: 4 per pair plus 1 per individual.
pub const N_HAP_PAIRS: usize = 4 * N_INDIVIDUALS * (N_INDIVIDUALS - 1) / 2 + N_INDIVIDUALS;
const CM_PER_SITE: f64 = 0.05;
const CSFS_SAMPLES: usize = 6;
/// The second haplotypes of individuals 0 and 1 are copies of each other here.
pub const SHARED_SITES: std::ops::Range<usize> = 40..180;

const BOUNDARIES: [f64; N_STATES] = [0.0, 20.0, 100.0, 400.0, 2000.0, 8000.0, 30000.0, 100000.0];
const TIMES: [f64; N_STATES] = [10.0, 60.0, 250.0, 1200.0, 5000.0, 19000.0, 65000.0, 200000.0];
const DISTANCES: [f64; 5] = [0.0, 1e-4, 1e-3, 1e-2, 1e-1];

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

pub struct Dataset {
    pub prefix: PathBuf,
    pub output_dir: PathBuf,
}

pub fn create_dataset(label: &str) -> io::Result<Dataset> {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base_dir = std::env::temp_dir().join("tmrca-tests").join(format!(
        "{}-{}-{}",
        std::process::id(),
        id,
        label
    ));
    fs::create_dir_all(&base_dir)?;

    let prefix = base_dir.join("dataset");
    let output_dir = base_dir.join("output");

    write_samples(with_suffix(&prefix, "samples"))?;
    write_haps(with_suffix(&prefix, "haps"), &build_haplotypes())?;
    write_map(with_suffix(&prefix, "map"))?;
    fs::write(with_suffix(&prefix, "decoding.json"), decoding_table_json())?;

    Ok(Dataset { prefix, output_dir })
}

pub fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Rewrites the dataset's decoding table without the top-level entry `key`.
pub fn remove_table_entry(dataset: &Dataset, key: &str) -> io::Result<()> {
    let path = with_suffix(&dataset.prefix, "decoding.json");
    let mut table: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
    if let Some(entries) = table.as_object_mut() {
        entries.remove(key);
    }
    fs::write(path, table.to_string())
}

pub fn expected_sample_ids() -> Vec<String> {
    (0..N_INDIVIDUALS).map(|i| format!("I{i}")).collect()
}

fn physical_position(site: usize) -> u64 {
    10_000 + 1_000 * site as u64
}

/// Deterministic haplotypes: random alleles (one in three is 1), with the
/// second haplotype of individual 1 copying individual 0's over `SHARED_SITES`.
fn build_haplotypes() -> Vec<Vec<u8>> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut haps: Vec<Vec<u8>> = (0..2 * N_INDIVIDUALS)
        .map(|_| {
            (0..N_SITES)
                .map(|_| {
                    state = state
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    u8::from((state >> 33) % 3 == 0)
                })
                .collect()
        })
        .collect();
    for site in SHARED_SITES {
        haps[3][site] = haps[1][site];
    }
    haps
}

fn write_samples(path: impl AsRef<Path>) -> io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "ID_1 ID_2 missing")?;
    writeln!(file, "0 0 0")?;
    for i in 0..N_INDIVIDUALS {
        writeln!(file, "F{i} I{i} 0")?;
    }
    Ok(())
}

fn write_haps(path: impl AsRef<Path>, haps: &[Vec<u8>]) -> io::Result<()> {
    let mut file = File::create(path)?;
    for site in 0..N_SITES {
        write!(file, "1 rs{} {} A G", site + 1, physical_position(site))?;
        for hap in haps {
            write!(file, " {}", hap[site])?;
        }
        writeln!(file)?;
    }
    Ok(())
}

fn write_map(path: impl AsRef<Path>) -> io::Result<()> {
    let mut file = File::create(path)?;
    for site in 0..N_SITES {
        writeln!(
            file,
            "1 rs{} {} {}",
            site + 1,
            site as f64 * CM_PER_SITE,
            physical_position(site)
        )?;
    }
    Ok(())
}

/// A jump model over `N_STATES` states: with probability `1 - exp(-d / 2)`
/// the pair redraws its state uniformly, otherwise it keeps it.
fn decoding_table_json() -> String {
    let pi = 1.0 / N_STATES as f64;
    let het: Vec<f64> = TIMES.iter().map(|t| (t * 1e-4).min(0.5)).collect();
    let transitions: Vec<serde_json::Value> = DISTANCES
        .iter()
        .map(|&distance| {
            let r = 1.0 - (-0.5 * distance).exp();
            let above: Vec<f64> = (0..N_STATES)
                .map(|i| if i + 1 < N_STATES { r * pi } else { 0.0 })
                .collect();
            let ratio: Vec<f64> = (0..N_STATES)
                .map(|m| if m + 1 < N_STATES { 1.0 } else { 0.0 })
                .collect();
            serde_json::json!({
                "distance": distance,
                "diagonal": vec![1.0 - r + r * pi; N_STATES],
                "below": vec![r * pi; N_STATES],
                "above": above,
                "ratio": ratio,
            })
        })
        .collect();

    let classic: Vec<Vec<f64>> = vec![
        het.iter().map(|h| (1.0 - h) * 0.8).collect(),
        het.clone(),
        het.iter().map(|h| (1.0 - h) * 0.2).collect(),
    ];
    let compressed: Vec<Vec<f64>> = vec![het.iter().map(|h| 1.0 - h).collect(), het.clone()];
    let csfs: Vec<Vec<Vec<f64>>> = (0..CSFS_SAMPLES - 1)
        .map(|u| {
            let weight = 0.5 + (u as f64 + 1.0) / CSFS_SAMPLES as f64;
            classic
                .iter()
                .map(|row| row.iter().map(|e| e * weight).collect())
                .collect()
        })
        .collect();

    serde_json::json!({
        "csfs_samples": CSFS_SAMPLES,
        "expected_times": TIMES,
        "discretization": BOUNDARIES,
        "initial_state_prob": vec![pi; N_STATES],
        "transitions": transitions,
        "classic_emission": classic,
        "compressed_emission": compressed,
        "csfs": csfs,
        "folded_csfs": csfs,
        "ascertained_csfs": csfs,
        "folded_ascertained_csfs": csfs,
    })
    .to_string()
}
