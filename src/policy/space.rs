//! Free-space accounting and lowest-income eviction.

use crate::core::config::Config;
use crate::models::torrent::TorrentSnapshot;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// Per-pass capacity bookkeeping, rebuilt from the snapshot every pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineState {
    /// Disk budget minus the reservation of every active torrent; negative when overcommitted
    pub free_space: i64,
    pub active_count: usize,
    pub paused_count: usize,
    /// Hashes deleted earlier in this pass
    #[serde(skip)]
    evicted: HashSet<String>,
}

impl EngineState {
    pub fn from_torrents(torrents: &[TorrentSnapshot], config: &Config) -> Self {
        let mut reserved: u64 = 0;
        let mut active_count = 0;
        let mut paused_count = 0;

        for torrent in torrents {
            if torrent.state.is_active() {
                reserved = reserved.saturating_add(torrent.size);
                active_count += 1;
            } else if torrent.state.is_paused() {
                paused_count += 1;
            }
        }

        Self {
            free_space: to_signed(config.disk_budget_bytes()) - to_signed(reserved),
            active_count,
            paused_count,
            evicted: HashSet::new(),
        }
    }

    /// Whether `download_size` fits while keeping `reserve` bytes free.
    pub fn has_room(&self, download_size: u64, reserve: u64) -> bool {
        self.free_space - to_signed(download_size) >= to_signed(reserve)
    }

    pub fn is_evicted(&self, hash: &str) -> bool {
        self.evicted.contains(hash)
    }

    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }

    /// Account for a deletion. Only active torrents give back disk space.
    pub fn record_eviction(&mut self, torrent: &TorrentSnapshot) {
        if !self.evicted.insert(torrent.hash.clone()) {
            return;
        }

        if torrent.state.is_active() {
            self.free_space += to_signed(torrent.size);
            self.active_count = self.active_count.saturating_sub(1);
        } else if torrent.state.is_paused() {
            self.paused_count = self.paused_count.saturating_sub(1);
        }
    }

    /// Account for a paused torrent being resumed with `download_size` bytes.
    pub fn record_admission(&mut self, download_size: u64) {
        self.free_space -= to_signed(download_size);
        self.paused_count = self.paused_count.saturating_sub(1);
        self.active_count += 1;
    }

    /// Active torrent with the smallest upload speed that is still present.
    ///
    /// Ties go to the torrent listed first.
    pub fn lowest_income<'a>(&self, torrents: &'a [TorrentSnapshot]) -> Option<&'a TorrentSnapshot> {
        torrents
            .iter()
            .filter(|t| t.state.is_active() && !self.is_evicted(&t.hash))
            .min_by_key(|t| t.upspeed)
    }

    /// Evict lowest-income torrents until `download_size` fits or none are left.
    ///
    /// Returns the evicted torrents in eviction order. Every round removes one
    /// candidate for good, so at most `active_count` rounds run.
    pub fn make_room<'a>(
        &mut self,
        torrents: &'a [TorrentSnapshot],
        download_size: u64,
        reserve: u64,
    ) -> Vec<&'a TorrentSnapshot> {
        let mut victims = Vec::new();

        while !self.has_room(download_size, reserve) {
            let Some(victim) = self.lowest_income(torrents) else {
                debug!(
                    download_size = download_size,
                    free_space = self.free_space,
                    "No evictable torrent left"
                );
                break;
            };

            self.record_eviction(victim);
            victims.push(victim);
        }

        victims
    }
}

fn to_signed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
