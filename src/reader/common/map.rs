use std::io::BufRead;
use std::path::Path;

use crate::error::{CustomError, Result};
use crate::reader::common::open_text;

const MAP_FIELDS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MapEntry {
    pub morgans: f64,
    pub physical_position: u64,
}

/// Reads a `chrom snp_id genetic_cM bp` map, one line per site, converting to Morgans.
pub(crate) fn read_genetic_map(path: &impl AsRef<Path>) -> Result<Vec<MapEntry>> {
    let f = open_text(path)?;
    let mut entries: Vec<MapEntry> = Vec::new();

    for (line_idx, line) in f.lines().enumerate() {
        let line = line.map_err(|e| CustomError::ReadWithPath {
            source: e,
            path: path.as_ref().to_path_buf(),
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != MAP_FIELDS {
            return Err(CustomError::MapFields {
                line_num: line_idx + 1,
                n_fields: fields.len(),
                expected: MAP_FIELDS,
            });
        }
        let centimorgans: f64 = fields[2].parse().map_err(|_| CustomError::Position {
            line_num: line_idx + 1,
            value: fields[2].to_string(),
            path: path.as_ref().to_path_buf(),
        })?;
        let physical_position: u64 = fields[3].parse().map_err(|_| CustomError::Position {
            line_num: line_idx + 1,
            value: fields[3].to_string(),
            path: path.as_ref().to_path_buf(),
        })?;
        let morgans = centimorgans / 100.0;
        if entries.last().is_some_and(|prev| morgans < prev.morgans) {
            return Err(CustomError::MapUnsorted {
                line_num: line_idx + 1,
            });
        }
        entries.push(MapEntry {
            morgans,
            physical_position,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_map(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("tmrca-map-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn converts_centimorgans() {
        let path = write_map("ok.map", "1 rs1 0.5 100\n1 rs2 1.5 200\n");
        let entries = read_genetic_map(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!((entries[1].morgans - 0.015).abs() < 1e-12);
        assert_eq!(entries[1].physical_position, 200);
    }

    #[test]
    fn rejects_unsorted_map() {
        let path = write_map("unsorted.map", "1 rs1 1.5 100\n1 rs2 0.5 200\n");
        assert!(matches!(
            read_genetic_map(&path),
            Err(CustomError::MapUnsorted { line_num: 2 })
        ));
    }

    #[test]
    fn rejects_bad_position() {
        let path = write_map("bad.map", "1 rs1 abc 100\n");
        match read_genetic_map(&path).unwrap_err() {
            CustomError::Position { value, .. } => assert_eq!(value, "abc"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
