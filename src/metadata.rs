//! Run metadata for reproducibility.
//!
//! Every report carries a run id, a timestamp, a hash of the configuration
//! that produced it and a fingerprint of the price data it consumed.

use crate::error::Result;
use crate::types::PriceSeries;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// A price file read for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFileMetadata {
    pub path: String,
    pub size: u64,
    /// SHA256 of the file contents.
    pub checksum: String,
}

/// Provenance of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub crate_version: String,
    pub config_hash: String,
    /// Hash over asset ids, dates and prices of the training and test data.
    pub data_fingerprint: String,
    #[serde(default)]
    pub input_files: Vec<DataFileMetadata>,
}

impl RunMetadata {
    pub fn new<C: Serialize>(config: &C, data: &[&[PriceSeries]]) -> Self {
        let run_id = generate_run_id();
        debug!("New run {}", run_id);
        Self {
            run_id,
            generated_at: Utc::now(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: compute_config_hash(config),
            data_fingerprint: fingerprint_series(data.iter().flat_map(|s| s.iter())),
            input_files: Vec::new(),
        }
    }

    /// Record a price file by path, size and checksum.
    pub fn track_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.input_files.push(track_data_file(path)?);
        Ok(())
    }
}

/// Compute SHA256 checksum of a file.
pub fn compute_file_checksum(path: impl AsRef<Path>) -> std::io::Result<String> {
    let data = std::fs::read(path.as_ref())?;
    Ok(compute_hash(&data))
}

/// Compute SHA256 hash of arbitrary bytes.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute configuration hash from JSON serialization.
pub fn compute_config_hash<T: Serialize>(config: &T) -> String {
    match serde_json::to_vec(config) {
        Ok(bytes) => compute_hash(&bytes),
        Err(e) => {
            warn!("Failed to serialize config for hashing: {}", e);
            String::new()
        }
    }
}

/// Order-sensitive hash of price series content.
pub fn fingerprint_series<'a>(series: impl IntoIterator<Item = &'a PriceSeries>) -> String {
    let mut hasher = Sha256::new();
    for s in series {
        hasher.update(s.asset_id().as_bytes());
        hasher.update([0u8]);
        for p in s.points() {
            hasher.update(p.date.to_string().as_bytes());
            hasher.update(p.adjusted_close.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

pub fn track_data_file(path: impl AsRef<Path>) -> std::io::Result<DataFileMetadata> {
    let path = path.as_ref();
    let size = std::fs::metadata(path)?.len();
    let checksum = compute_file_checksum(path)?;

    Ok(DataFileMetadata {
        path: path.display().to_string(),
        size,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn series(id: &str, price: f64) -> PriceSeries {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        PriceSeries::from_pairs(id, vec![(d, price)]).unwrap()
    }

    #[test]
    fn test_compute_hash() {
        assert_eq!(compute_hash(b"hello"), compute_hash(b"hello"));
        assert_ne!(compute_hash(b"hello"), compute_hash(b"world"));
        assert_eq!(compute_hash(b"hello").len(), 64);
    }

    #[test]
    fn test_track_data_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "date,asset_id,adj_close").unwrap();
        temp_file.flush().unwrap();

        let metadata = track_data_file(temp_file.path()).unwrap();
        assert!(metadata.size > 0);
        assert_eq!(metadata.checksum.len(), 64);
        assert!(metadata.checksum.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_changes_with_prices() {
        let a = [series("A", 10.0)];
        let b = [series("A", 10.5)];
        assert_eq!(fingerprint_series(&a), fingerprint_series(&a));
        assert_ne!(fingerprint_series(&a), fingerprint_series(&b));
    }

    #[test]
    fn test_run_metadata() {
        #[derive(Serialize)]
        struct Cfg {
            k: usize,
        }
        let data = [series("A", 1.0)];
        let m1 = RunMetadata::new(&Cfg { k: 4 }, &[&data[..]]);
        let m2 = RunMetadata::new(&Cfg { k: 4 }, &[&data[..]]);
        let m3 = RunMetadata::new(&Cfg { k: 5 }, &[&data[..]]);

        assert_ne!(m1.run_id, m2.run_id);
        assert_eq!(m1.config_hash, m2.config_hash);
        assert_ne!(m1.config_hash, m3.config_hash);
        assert_eq!(m1.data_fingerprint, m2.data_fingerprint);
    }
}
