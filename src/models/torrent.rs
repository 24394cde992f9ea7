use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use url::Url;

/// Downloader-reported torrent state.
///
/// qBittorrent 5 renamed the paused states to `stopped*`; both spellings map to
/// the same variant. Anything the engine does not act on becomes `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TorrentState {
    Downloading,
    Uploading,
    StalledDl,
    StalledUp,
    ForcedDl,
    ForcedUp,
    PausedDl,
    Error,
    Other,
}

impl TorrentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentState::Downloading => "downloading",
            TorrentState::Uploading => "uploading",
            TorrentState::StalledDl => "stalledDL",
            TorrentState::StalledUp => "stalledUP",
            TorrentState::ForcedDl => "forcedDL",
            TorrentState::ForcedUp => "forcedUP",
            TorrentState::PausedDl => "pausedDL",
            TorrentState::Error => "error",
            TorrentState::Other => "other",
        }
    }

    /// States that hold a disk reservation and an active slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TorrentState::Downloading
                | TorrentState::Uploading
                | TorrentState::StalledDl
                | TorrentState::StalledUp
                | TorrentState::ForcedDl
                | TorrentState::ForcedUp
        )
    }

    /// Actually moving data right now.
    pub fn is_transferring(&self) -> bool {
        matches!(self, TorrentState::Downloading | TorrentState::Uploading)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, TorrentState::PausedDl)
    }
}

impl From<String> for TorrentState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "downloading" => TorrentState::Downloading,
            "uploading" => TorrentState::Uploading,
            "stalledDL" => TorrentState::StalledDl,
            "stalledUP" => TorrentState::StalledUp,
            "forcedDL" => TorrentState::ForcedDl,
            "forcedUP" => TorrentState::ForcedUp,
            "pausedDL" | "stoppedDL" => TorrentState::PausedDl,
            "error" => TorrentState::Error,
            _ => TorrentState::Other,
        }
    }
}

impl From<TorrentState> for String {
    fn from(value: TorrentState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One torrent as reported by the downloader at the start of a pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentSnapshot {
    /// Info hash, the stable key for every per-torrent record
    pub hash: String,
    /// Release name; the suffix after the last `-` is the release group
    pub name: String,
    #[serde(default)]
    pub category: String,
    /// Bytes selected for download
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: u64,
    /// Bytes of all files
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total_size: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub downloaded: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub uploaded: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub dlspeed: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub upspeed: u64,
    /// Unix seconds, 0 when unset
    #[serde(default)]
    pub added_on: i64,
    #[serde(default)]
    pub completion_on: i64,
    /// Seeders in the swarm
    #[serde(default, deserialize_with = "lenient_u64")]
    pub num_complete: u64,
    /// Leechers in the swarm
    #[serde(default, deserialize_with = "lenient_u64")]
    pub num_incomplete: u64,
    /// Connected leechers
    #[serde(default, deserialize_with = "lenient_u64")]
    pub num_leechs: u64,
    pub state: TorrentState,
    #[serde(default)]
    pub tracker: String,
    #[serde(default)]
    pub magnet_uri: String,
    /// Source tracker host, set once by [`TorrentSnapshot::resolve_domain`]
    #[serde(skip)]
    pub domain: Option<String>,
}

impl TorrentSnapshot {
    /// Bytes still missing from the full torrent.
    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.downloaded)
    }

    /// Seconds since the torrent was added.
    pub fn age(&self, now: i64) -> i64 {
        now - self.added_on
    }

    /// Downloaded share of the whole torrent, 0.0 for empty torrents.
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        self.downloaded as f64 / self.total_size as f64
    }

    /// Derive the source domain: the category's configured domain wins, then the
    /// tracker URL, then the first tracker of the magnet link. A domain that is
    /// already set is never replaced.
    pub fn resolve_domain(&mut self, category_domain: Option<&str>) {
        if self.domain.is_some() {
            return;
        }
        self.domain = match category_domain {
            Some(domain) if !domain.is_empty() => Some(domain.to_string()),
            _ => parse_domain(&self.tracker, &self.magnet_uri),
        };
    }

    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or("")
    }
}

/// One file inside a torrent, as listed by the downloader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Position within the torrent, used for priority updates
    pub index: usize,
    pub name: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: u64,
}

impl FileEntry {
    pub fn new(index: usize, name: impl Into<String>, size: u64) -> Self {
        Self {
            index,
            name: name.into(),
            size,
        }
    }
}

/// Host of the tracker URL, or of the first `tr` parameter of the magnet link.
pub fn parse_domain(tracker: &str, magnet_uri: &str) -> Option<String> {
    if !tracker.is_empty() {
        if let Some(host) = url_host(tracker) {
            return Some(host);
        }
    }

    let magnet = Url::parse(magnet_uri).ok()?;
    magnet
        .query_pairs()
        .find(|(key, _)| key == "tr")
        .and_then(|(_, value)| url_host(&value))
}

fn url_host(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
}

#[cfg(test)]
impl TorrentSnapshot {
    /// Bare torrent for tests; callers set the fields they care about.
    pub(crate) fn fixture(hash: &str, name: &str, state: TorrentState) -> Self {
        Self {
            hash: hash.to_string(),
            name: name.to_string(),
            category: String::new(),
            size: 0,
            total_size: 0,
            downloaded: 0,
            uploaded: 0,
            dlspeed: 0,
            upspeed: 0,
            added_on: 0,
            completion_on: 0,
            num_complete: 0,
            num_incomplete: 0,
            num_leechs: 0,
            state,
            tracker: String::new(),
            magnet_uri: String::new(),
            domain: None,
        }
    }
}

// The downloader reports -1 for unknown counters and sizes.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    Ok(value.max(0) as u64)
}
