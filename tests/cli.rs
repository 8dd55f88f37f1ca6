mod common;

use flate2::read::GzDecoder;
use ndarray::{Array1, Array2};
use ndarray_npy::NpzReader;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output};
use zip::ZipArchive;

fn run_tmrca(dataset: &common::Dataset, extra: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_tmrca"));
    command
        .arg("--prefix")
        .arg(dataset.prefix.as_os_str())
        .arg("--output-directory")
        .arg(dataset.output_dir.as_os_str())
        .args(extra);
    command.output().expect("failed to run tmrca")
}

fn fresh_dataset(label: &str) -> common::Dataset {
    let dataset = common::create_dataset(label).unwrap();
    if dataset.output_dir.exists() {
        fs::remove_dir_all(&dataset.output_dir).unwrap();
    }
    dataset
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "tmrca failed: stdout={} stderr={}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn assert_failure_mentions(output: &Output, needle: &str) {
    assert!(
        !output.status.success(),
        "tmrca unexpectedly succeeded: stdout={} stderr={}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(needle),
        "stderr did not mention \"{needle}\": {stderr}"
    );
}

fn read_sums(path: &Path, name: &str) -> Array2<f32> {
    let mut npz = NpzReader::new(File::open(path).expect("could not open sums archive"))
        .expect("invalid npz archive");
    npz.by_name(name)
        .unwrap_or_else(|e| panic!("missing {name} array: {e}"))
}

fn read_gz_lines(path: &Path) -> Vec<String> {
    let file = File::open(path).unwrap_or_else(|e| panic!("missing {}: {e}", path.display()));
    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .expect("invalid gzip stream");
    text.lines().map(str::to_string).collect()
}

fn assert_close(a: &Array2<f32>, b: &Array2<f32>) {
    assert_eq!(a.shape(), b.shape());
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() <= 1e-3 * x.abs().max(1.0), "{x} vs {y}");
    }
}

/// IBD records of the pair whose haplotypes were copied in the fixture.
fn shared_pair_segments(lines: &[String]) -> Vec<Vec<String>> {
    lines
        .iter()
        .skip(1)
        .map(|line| line.split('\t').map(str::to_string).collect::<Vec<_>>())
        .filter(|fields| fields[..6] == ["F0", "I0", "2", "F1", "I1", "2"])
        .collect()
}

fn assert_covers_shared_sites(segments: &[Vec<String>]) {
    assert!(!segments.is_empty(), "shared haplotypes produced no IBD segment");
    let start_bp: u64 = segments[0][7].parse().unwrap();
    let end_bp: u64 = segments.last().unwrap()[8].parse().unwrap();
    assert!(start_bp <= 70_000, "segment starts at {start_bp}");
    assert!(end_bp >= 170_000, "segment ends at {end_bp}");
    let length_cm: f64 = segments[0][11].parse().unwrap();
    assert!(length_cm >= 1.0);
}

#[test]
fn posterior_sums_cover_every_pair() {
    let dataset = fresh_dataset("sums");
    let output = run_tmrca(
        &dataset,
        &["--posterior-sums", "--major-minor-posterior-sums"],
    );
    assert_success(&output);

    let npz_path = dataset.output_dir.join("sums.1-1.npz");
    let sums = read_sums(&npz_path, "sum_over_pairs");
    assert_eq!(sums.shape(), &[common::N_SITES, common::N_STATES]);
    for row in sums.rows() {
        let total: f32 = row.sum();
        assert!(
            (total - common::N_HAP_PAIRS as f32).abs() < 1e-2,
            "row sums to {total}"
        );
    }

    let by_class = ["00", "01", "11"]
        .map(|suffix| read_sums(&npz_path, &format!("sum_over_pairs_{suffix}")));
    let stacked = &by_class[0] + &by_class[1] + &by_class[2];
    assert_close(&stacked, &sums);

    let mut npz = NpzReader::new(File::open(&npz_path).unwrap()).unwrap();
    let flipped: Array1<u8> = npz.by_name("site_was_flipped").unwrap();
    assert_eq!(flipped.len(), common::N_SITES);
    drop(npz);

    let mut archive =
        ZipArchive::new(File::open(&npz_path).unwrap()).expect("failed to read npz as zip");
    let mut json = String::new();
    archive
        .by_name("samples.json")
        .expect("missing samples.json in npz")
        .read_to_string(&mut json)
        .unwrap();
    let samples: Vec<String> = serde_json::from_str(&json).unwrap();
    assert_eq!(samples, common::expected_sample_ids());

    assert!(!dataset.output_dir.join("ibd.1-1.tsv.gz").exists());
}

#[test]
fn single_threaded_session_matches_thread_pool() {
    let pooled = fresh_dataset("pooled");
    assert_success(&run_tmrca(&pooled, &["--posterior-sums", "--threads", "2"]));
    let session = fresh_dataset("session");
    assert_success(&run_tmrca(&session, &["--posterior-sums", "--threads", "1"]));

    assert_close(
        &read_sums(&pooled.output_dir.join("sums.1-1.npz"), "sum_over_pairs"),
        &read_sums(&session.output_dir.join("sums.1-1.npz"), "sum_over_pairs"),
    );
}

#[test]
fn jobs_split_the_posterior_sums() {
    let whole = fresh_dataset("whole");
    assert_success(&run_tmrca(&whole, &["--posterior-sums"]));
    let expected = read_sums(&whole.output_dir.join("sums.1-1.npz"), "sum_over_pairs");

    let split = fresh_dataset("split");
    let mut total = Array2::<f32>::zeros((common::N_SITES, common::N_STATES));
    for job in 1..=7 {
        let job_index = job.to_string();
        let output = run_tmrca(
            &split,
            &["--posterior-sums", "--jobs", "7", "--job-index", &job_index],
        );
        assert_success(&output);
        total += &read_sums(
            &split.output_dir.join(format!("sums.{job}-7.npz")),
            "sum_over_pairs",
        );
    }
    assert_close(&total, &expected);
}

#[test]
fn ibd_segments_report_shared_haplotypes() {
    let dataset = fresh_dataset("ibd");
    let output = run_tmrca(&dataset, &["--ibd", "--per-pair-posterior-means"]);
    assert_success(&output);

    let lines = read_gz_lines(&dataset.output_dir.join("ibd.1-1.tsv.gz"));
    assert_eq!(
        lines[0],
        "fam_id1\tind_id1\thap1\tfam_id2\tind_id2\thap2\tchrom\tstart_bp\tend_bp\tstart_cm\tend_cm\tlength_cm\tibd_probability\tage\tposterior_mean"
    );
    assert_covers_shared_sites(&shared_pair_segments(&lines));

    let means = read_gz_lines(&dataset.output_dir.join("posterior_mean.1-1.txt.gz"));
    assert_eq!(means.len(), common::N_HAP_PAIRS);
    let first: Vec<&str> = means[0].split('\t').collect();
    assert_eq!(first[6], "0");
    assert_eq!(first[7], common::N_SITES.to_string());
    assert_eq!(first[8].split(' ').count(), common::N_SITES);

    assert!(!dataset.output_dir.join("sums.1-1.npz").exists());
}

#[test]
fn seeded_scan_finds_shared_haplotypes() {
    let dataset = fresh_dataset("germline");
    let output = run_tmrca(&dataset, &["--ibd", "--germline", "--word-size", "8"]);
    assert_success(&output);

    let lines = read_gz_lines(&dataset.output_dir.join("ibd.1-1.tsv.gz"));
    let segments = shared_pair_segments(&lines);
    assert!(!segments.is_empty(), "seeded scan missed the shared haplotypes");
    let start_bp: u64 = segments[0][7].parse().unwrap();
    let end_bp: u64 = segments.last().unwrap()[8].parse().unwrap();
    let shared = common::SHARED_SITES;
    assert!(start_bp >= 10_000 + 1_000 * (shared.start as u64 - 8));
    assert!(end_bp <= 10_000 + 1_000 * (shared.end as u64 + 8));
}

#[test]
fn sample_pairs_csv_limits_decoded_pairs() {
    let dataset = fresh_dataset("sample-pairs");
    let csv_path = common::with_suffix(&dataset.prefix, "pairs.csv");
    fs::write(&csv_path, "id1,id2\nI0,I1\nI2,I2\nI1,I0\n").unwrap();

    let output = run_tmrca(
        &dataset,
        &["--per-pair-map", "--sample-pairs-csv", csv_path.to_str().unwrap()],
    );
    assert_success(&output);

    let lines = read_gz_lines(&dataset.output_dir.join("map.1-1.txt.gz"));
    assert_eq!(lines.len(), 5);
    let within: Vec<&String> = lines.iter().filter(|l| l.starts_with("F2\tI2\t1\tF2\tI2\t2")).collect();
    assert_eq!(within.len(), 1);
}

#[test]
fn sample_pairs_csv_with_unknown_sample_fails() {
    let dataset = fresh_dataset("sample-pairs-err");
    let csv_path = common::with_suffix(&dataset.prefix, "pairs.csv");
    fs::write(&csv_path, "I0,Unknown\n").unwrap();

    let output = run_tmrca(
        &dataset,
        &["--posterior-sums", "--sample-pairs-csv", csv_path.to_str().unwrap()],
    );
    assert_failure_mentions(&output, "Unknown");
}

#[test]
fn invalid_job_count_fails() {
    let dataset = fresh_dataset("jobs");
    let output = run_tmrca(&dataset, &["--posterior-sums", "--jobs", "5"]);
    assert_failure_mentions(&output, "invalid number of jobs 5");
    assert!(!dataset.output_dir.exists());
}

#[test]
fn missing_csfs_fails_without_partial_output() {
    let dataset = fresh_dataset("missing-csfs");
    common::remove_table_entry(&dataset, "folded_ascertained_csfs").unwrap();
    let output = run_tmrca(&dataset, &["--ibd", "--per-pair-map"]);
    assert_failure_mentions(&output, "folded_ascertained_csfs");

    let written: Vec<_> = match fs::read_dir(&dataset.output_dir) {
        Ok(entries) => entries.map(|entry| entry.unwrap().file_name()).collect(),
        Err(_) => Vec::new(),
    };
    assert!(written.is_empty(), "left behind {written:?}");
}

#[test]
fn conflicting_flags_fail() {
    let dataset = fresh_dataset("conflict");
    let output = run_tmrca(
        &dataset,
        &["--posterior-sums", "--compress", "--use-ancestral"],
    );
    assert_failure_mentions(&output, "--compress and --use-ancestral cannot be used together");
}

#[test]
fn missing_task_fails() {
    let dataset = fresh_dataset("no-task");
    let output = run_tmrca(&dataset, &[]);
    assert_failure_mentions(&output, "at least one of");
}
