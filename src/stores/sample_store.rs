use crate::core::error::StoreError;
use crate::models::sample::SpeedSample;
use crate::models::torrent::TorrentSnapshot;
use crate::utils::bytes::format_bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Append-only log of per-torrent speed samples, keyed by torrent hash.
pub trait SampleStore {
    /// Append one sample; `torrent` supplies the record metadata on first write.
    fn append(
        &mut self,
        key: &str,
        torrent: &TorrentSnapshot,
        sample: SpeedSample,
    ) -> Result<(), StoreError>;

    /// Up to `n` most recent samples, oldest first.
    fn last_n(&self, key: &str, n: usize) -> Result<Vec<SpeedSample>, StoreError>;
}

/// Persisted document for one torrent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentRecord {
    pub hash: String,
    pub name: String,
    pub category: String,
    pub domain: String,
    pub size: u64,
    pub total_size: u64,
    /// Human readable `size`
    pub size_text: String,
    pub total_size_text: String,
    pub added_on: i64,
    pub completion_on: i64,
    #[serde(default)]
    pub samples: Vec<SpeedSample>,
}

impl TorrentRecord {
    pub fn new(torrent: &TorrentSnapshot) -> Self {
        Self {
            hash: torrent.hash.clone(),
            name: torrent.name.clone(),
            category: torrent.category.clone(),
            domain: torrent.domain().to_string(),
            size: torrent.size,
            total_size: torrent.total_size,
            size_text: format_bytes(torrent.size),
            total_size_text: format_bytes(torrent.total_size),
            added_on: torrent.added_on,
            completion_on: torrent.completion_on,
            samples: Vec::new(),
        }
    }

    /// Append and drop the oldest samples beyond `max_samples`.
    fn push(&mut self, sample: SpeedSample, max_samples: usize) {
        self.samples.push(sample);
        if self.samples.len() > max_samples {
            let excess = self.samples.len() - max_samples;
            self.samples.drain(..excess);
        }
    }

    fn tail(&self, n: usize) -> Vec<SpeedSample> {
        let start = self.samples.len().saturating_sub(n);
        self.samples[start..].to_vec()
    }
}

/// File name stem for a store key. Hashes are used as-is (lower-cased);
/// anything else is hex-encoded so it cannot escape the store directory.
pub fn file_stem(key: &str) -> Result<String, StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".to_string()));
    }

    if hex::decode(key).is_ok() {
        Ok(key.to_ascii_lowercase())
    } else {
        Ok(hex::encode(key.as_bytes()))
    }
}

/// One JSON document per torrent under `dir`
pub struct JsonSampleStore {
    dir: PathBuf,
    max_samples: usize,
}

impl JsonSampleStore {
    pub fn open(dir: impl Into<PathBuf>, max_samples: usize) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        Ok(Self { dir, max_samples })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        Ok(self.dir.join(format!("{}.json", file_stem(key)?)))
    }

    /// Load the record for `key`, `None` if nothing was written yet.
    pub fn load(&self, key: &str) -> Result<Option<TorrentRecord>, StoreError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| io_error(&path, source))?;
        let record = serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;

        Ok(Some(record))
    }

    fn save(&self, key: &str, record: &TorrentRecord) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp_path = path.with_extension("json.tmp");

        let content = serde_json::to_string_pretty(record).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;

        // Write then rename so a crash never leaves a truncated document
        fs::write(&tmp_path, content).map_err(|source| io_error(&tmp_path, source))?;
        fs::rename(&tmp_path, &path).map_err(|source| io_error(&path, source))?;

        Ok(())
    }
}

impl SampleStore for JsonSampleStore {
    fn append(
        &mut self,
        key: &str,
        torrent: &TorrentSnapshot,
        sample: SpeedSample,
    ) -> Result<(), StoreError> {
        let mut record = self
            .load(key)?
            .unwrap_or_else(|| TorrentRecord::new(torrent));
        record.push(sample, self.max_samples);
        self.save(key, &record)?;

        debug!(key = key, samples = record.samples.len(), "Sample appended");
        Ok(())
    }

    fn last_n(&self, key: &str, n: usize) -> Result<Vec<SpeedSample>, StoreError> {
        Ok(self
            .load(key)?
            .map(|record| record.tail(n))
            .unwrap_or_default())
    }
}

/// In-process store, nothing touches the disk
#[derive(Debug, Default)]
pub struct MemorySampleStore {
    records: HashMap<String, TorrentRecord>,
    max_samples: usize,
}

impl MemorySampleStore {
    pub fn new(max_samples: usize) -> Self {
        Self {
            records: HashMap::new(),
            max_samples,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SampleStore for MemorySampleStore {
    fn append(
        &mut self,
        key: &str,
        torrent: &TorrentSnapshot,
        sample: SpeedSample,
    ) -> Result<(), StoreError> {
        file_stem(key)?;
        self.records
            .entry(key.to_string())
            .or_insert_with(|| TorrentRecord::new(torrent))
            .push(sample, self.max_samples);
        Ok(())
    }

    fn last_n(&self, key: &str, n: usize) -> Result<Vec<SpeedSample>, StoreError> {
        Ok(self
            .records
            .get(key)
            .map(|record| record.tail(n))
            .unwrap_or_default())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}
