use crate::models::torrent::{TorrentSnapshot, TorrentState};
use serde::{Deserialize, Serialize};

/// Transfer figures recorded for one torrent on one polling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub timestamp: i64,
    pub state: TorrentState,
    pub upspeed: u64,
    #[serde(default)]
    pub dlspeed: u64,
    #[serde(default)]
    pub uploaded: u64,
    #[serde(default)]
    pub downloaded: u64,
    #[serde(default)]
    pub num_complete: u64,
    #[serde(default)]
    pub num_incomplete: u64,
    #[serde(default)]
    pub num_leechs: u64,
}

impl SpeedSample {
    pub fn from_snapshot(torrent: &TorrentSnapshot, timestamp: i64) -> Self {
        Self {
            timestamp,
            state: torrent.state,
            upspeed: torrent.upspeed,
            dlspeed: torrent.dlspeed,
            uploaded: torrent.uploaded,
            downloaded: torrent.downloaded,
            num_complete: torrent.num_complete,
            num_incomplete: torrent.num_incomplete,
            num_leechs: torrent.num_leechs,
        }
    }

    /// Sample carrying only an upload speed.
    pub fn with_upspeed(timestamp: i64, upspeed: u64) -> Self {
        Self {
            timestamp,
            state: TorrentState::Uploading,
            upspeed,
            dlspeed: 0,
            uploaded: 0,
            downloaded: 0,
            num_complete: 0,
            num_incomplete: 0,
            num_leechs: 0,
        }
    }
}

/// Average upload speed over the trailing `window` samples.
///
/// Returns `None` until a full window has been recorded.
pub fn rolling_upspeed(samples: &[SpeedSample], window: usize) -> Option<u64> {
    if window == 0 || samples.len() < window {
        return None;
    }
    let tail = &samples[samples.len() - window..];
    let total: u64 = tail.iter().map(|s| s.upspeed).sum();
    Some(total / window as u64)
}
