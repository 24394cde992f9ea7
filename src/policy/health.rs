//! Health and risk classification of running torrents.
//!
//! Checks run in a fixed order and the first eviction verdict wins:
//! stalled, hit-and-run risk, chronically slow upload, blackhole, low peer
//! interest. Everything else is healthy (or trusted).

use crate::core::config::Config;
use crate::models::sample::{rolling_upspeed, SpeedSample};
use crate::models::torrent::{TorrentSnapshot, TorrentState};
use crate::policy::group::{is_hr, is_trusted};
use crate::utils::bytes::{format_bytes, GIB, MIB};
use crate::utils::time::{is_older_than, is_younger_than};
use std::fmt;
use tracing::debug;

/// Samples in the rolling upload average
pub const SAMPLE_WINDOW: usize = 10;
/// A torrent stuck in `stalledDL` this long after being added is dropped
pub const STALL_LIMIT_SECS: i64 = 10 * 60;
/// Peer-interest checks only run this early in a torrent's life
pub const PEER_PROBE_SECS: i64 = 3 * 60;
/// HR torrents are abandoned once this close to completion
pub const HR_REMAINING_MARGIN: u64 = 5 * GIB;
pub const SLOW_UPSPEED: u64 = MIB;
pub const BLACKHOLE_MIN_DLSPEED: u64 = 10 * MIB;
pub const BLACKHOLE_MAX_UPSPEED: u64 = 2 * MIB;
pub const BLACKHOLE_RATIO: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMetric {
    /// Leechers in the swarm
    Incomplete,
    /// Connected leechers
    Leechs,
}

impl fmt::Display for PeerMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerMetric::Incomplete => f.write_str("swarm leechers"),
            PeerMetric::Leechs => f.write_str("connected leechers"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Healthy,
    TrustedGroup,
    /// Slow, but kept because active slots are still free
    Tolerated { avg_upspeed: u64 },
    Stalled { age_secs: i64 },
    /// `threshold_bytes` is the progress-percent bound; only the fixed margin gates
    HrRisk { threshold_bytes: u64, remaining: u64 },
    SlowChronic { avg_upspeed: u64 },
    Blackhole { ratio: f64 },
    LowPeerInterest {
        metric: PeerMetric,
        observed: u64,
        required: u64,
    },
}

impl Verdict {
    /// Whether the verdict removes the torrent.
    pub fn evicts(&self) -> bool {
        matches!(
            self,
            Verdict::Stalled { .. }
                | Verdict::HrRisk { .. }
                | Verdict::SlowChronic { .. }
                | Verdict::Blackhole { .. }
                | Verdict::LowPeerInterest { .. }
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Healthy => write!(f, "healthy"),
            Verdict::TrustedGroup => write!(f, "trusted group"),
            Verdict::Tolerated { avg_upspeed } => write!(
                f,
                "slow upload ({}/s) tolerated while active slots are free",
                format_bytes(*avg_upspeed)
            ),
            Verdict::Stalled { age_secs } => write!(
                f,
                "stalled without starting for {} minutes",
                age_secs / 60
            ),
            Verdict::HrRisk { remaining, .. } => write!(
                f,
                "HR torrent abandoned with {} left",
                format_bytes(*remaining)
            ),
            Verdict::SlowChronic { avg_upspeed } => write!(
                f,
                "average upload over the last {} samples below 1 MB/s ({}/s)",
                SAMPLE_WINDOW,
                format_bytes(*avg_upspeed)
            ),
            Verdict::Blackhole { ratio } => write!(
                f,
                "not a trusted group and leeching (download/upload ratio {:.2})",
                ratio
            ),
            Verdict::LowPeerInterest {
                metric,
                observed,
                required,
            } => write!(f, "{} {} below required {}", metric, observed, required),
        }
    }
}

/// Pass-wide inputs of the classifier.
#[derive(Debug, Clone, Copy)]
pub struct HealthContext {
    pub now: i64,
    /// Active torrents at the time of the check
    pub active_count: usize,
}

/// Classify a torrent in the active set.
pub fn classify(
    config: &Config,
    torrent: &TorrentSnapshot,
    samples: &[SpeedSample],
    ctx: HealthContext,
) -> Verdict {
    let trusted = is_trusted(config, torrent);
    let neutral = if trusted {
        Verdict::TrustedGroup
    } else {
        Verdict::Healthy
    };

    if torrent.state == TorrentState::StalledDl {
        if is_older_than(torrent.added_on, STALL_LIMIT_SECS, ctx.now) {
            return Verdict::Stalled {
                age_secs: torrent.age(ctx.now),
            };
        }
        return neutral;
    }

    if is_hr(config, torrent) {
        let threshold_bytes = hr_progress_threshold(config, torrent);
        debug!(
            hash = %torrent.hash,
            threshold_bytes = threshold_bytes,
            remaining = torrent.remaining(),
            "HR torrent: progress threshold is informational, fixed margin applies"
        );

        if torrent.remaining() <= HR_REMAINING_MARGIN {
            return Verdict::HrRisk {
                threshold_bytes,
                remaining: torrent.remaining(),
            };
        }
    }

    let mut tolerated = None;
    if let Some(avg_upspeed) = rolling_upspeed(samples, SAMPLE_WINDOW) {
        if avg_upspeed < SLOW_UPSPEED {
            let free_slots = ctx.active_count < config.budget.limit_active_torrents;
            if torrent.state.is_transferring() && free_slots {
                tolerated = Some(avg_upspeed);
            } else {
                return Verdict::SlowChronic { avg_upspeed };
            }
        }
    }

    if torrent.state == TorrentState::Downloading && !trusted {
        if is_younger_than(torrent.added_on, PEER_PROBE_SECS, ctx.now) {
            if let Some(verdict) = low_peer_interest(config, torrent) {
                return verdict;
            }
        } else if let Some(ratio) = blackhole_ratio(torrent) {
            return Verdict::Blackhole { ratio };
        }
    }

    match tolerated {
        Some(avg_upspeed) => Verdict::Tolerated { avg_upspeed },
        None => neutral,
    }
}

/// Download/upload ratio when the torrent leeches fast and gives back little.
///
/// Zero upload counts as an infinite ratio.
pub fn blackhole_ratio(torrent: &TorrentSnapshot) -> Option<f64> {
    if torrent.dlspeed <= BLACKHOLE_MIN_DLSPEED || torrent.upspeed >= BLACKHOLE_MAX_UPSPEED {
        return None;
    }

    let ratio = if torrent.upspeed == 0 {
        f64::INFINITY
    } else {
        torrent.dlspeed as f64 / torrent.upspeed as f64
    };

    (ratio > BLACKHOLE_RATIO).then_some(ratio)
}

/// `total_size * hr_progress / 100` for the torrent's category, 0 when unset.
pub fn hr_progress_threshold(config: &Config, torrent: &TorrentSnapshot) -> u64 {
    config
        .category(&torrent.category)
        .and_then(|category| category.hr_progress)
        .map(|percent| (torrent.total_size as f64 * percent / 100.0) as u64)
        .unwrap_or(0)
}

fn low_peer_interest(config: &Config, torrent: &TorrentSnapshot) -> Option<Verdict> {
    let category = config.category(&torrent.category)?;

    if let Some(required) = category.min_incomplete {
        if torrent.num_incomplete < required {
            return Some(Verdict::LowPeerInterest {
                metric: PeerMetric::Incomplete,
                observed: torrent.num_incomplete,
                required,
            });
        }
    }

    if let Some(required) = category.min_leechs {
        if torrent.num_leechs < required {
            return Some(Verdict::LowPeerInterest {
                metric: PeerMetric::Leechs,
                observed: torrent.num_leechs,
                required,
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::tests::test_config;

    const NOW: i64 = 1_700_000_000;

    fn ctx(active_count: usize) -> HealthContext {
        HealthContext {
            now: NOW,
            active_count,
        }
    }

    fn running(name: &str, category: &str, state: TorrentState, age: i64) -> TorrentSnapshot {
        let mut torrent = TorrentSnapshot::fixture("abc", name, state);
        torrent.category = category.to_string();
        torrent.added_on = NOW - age;
        torrent.total_size = 40 * GIB;
        torrent.size = 40 * GIB;
        torrent.num_incomplete = 50;
        torrent.num_leechs = 50;
        torrent.upspeed = 5 * MIB;
        torrent.dlspeed = 5 * MIB;
        let config = test_config();
        torrent.resolve_domain(config.category(category).and_then(|c| c.domain.as_deref()));
        torrent
    }

    fn window(upspeed: u64) -> Vec<SpeedSample> {
        (0..SAMPLE_WINDOW as i64)
            .map(|i| SpeedSample::with_upspeed(NOW - i, upspeed))
            .collect()
    }

    #[test]
    fn test_stalled_after_ten_minutes() {
        let config = test_config();
        let torrent = running("Film-X", "movie", TorrentState::StalledDl, STALL_LIMIT_SECS + 1);

        assert_eq!(
            classify(&config, &torrent, &[], ctx(1)),
            Verdict::Stalled {
                age_secs: STALL_LIMIT_SECS + 1
            }
        );
    }

    #[test]
    fn test_stalled_within_limit_is_healthy() {
        let config = test_config();
        let torrent = running("Film-X", "movie", TorrentState::StalledDl, STALL_LIMIT_SECS);

        assert_eq!(classify(&config, &torrent, &[], ctx(1)), Verdict::Healthy);
    }

    #[test]
    fn test_hr_risk_uses_fixed_margin() {
        let config = test_config();
        let mut torrent = running("Film-HRG", "hr", TorrentState::Downloading, 3600);
        torrent.downloaded = torrent.total_size - 5 * GIB;

        let verdict = classify(&config, &torrent, &[], ctx(1));
        assert_eq!(
            verdict,
            Verdict::HrRisk {
                threshold_bytes: 32 * GIB,
                remaining: 5 * GIB
            }
        );
        assert!(verdict.evicts());
    }

    #[test]
    fn test_hr_far_from_completion_continues() {
        let config = test_config();
        let mut torrent = running("Film-HRG", "hr", TorrentState::Downloading, 3600);
        // 80% done (past the percent threshold) but still more than 5 GiB left
        torrent.downloaded = 32 * GIB;

        assert_eq!(classify(&config, &torrent, &[], ctx(1)), Verdict::Healthy);
    }

    #[test]
    fn test_slow_chronic() {
        let config = test_config();
        let torrent = running("Film-X", "movie", TorrentState::StalledUp, 3600);

        assert_eq!(
            classify(&config, &torrent, &window(MIB - 1), ctx(1)),
            Verdict::SlowChronic {
                avg_upspeed: MIB - 1
            }
        );
    }

    #[test]
    fn test_slow_tolerated_with_free_slots() {
        let config = test_config();
        let torrent = running("Film-X", "movie", TorrentState::Uploading, 3600);

        let verdict = classify(&config, &torrent, &window(100), ctx(1));
        assert_eq!(verdict, Verdict::Tolerated { avg_upspeed: 100 });
        assert!(!verdict.evicts());
    }

    #[test]
    fn test_slow_not_tolerated_when_slots_full() {
        let config = test_config();
        let torrent = running("Film-X", "movie", TorrentState::Uploading, 3600);
        let full = config.budget.limit_active_torrents;

        assert_eq!(
            classify(&config, &torrent, &window(100), ctx(full)),
            Verdict::SlowChronic { avg_upspeed: 100 }
        );
    }

    #[test]
    fn test_partial_window_is_ignored() {
        let config = test_config();
        let torrent = running("Film-X", "movie", TorrentState::StalledUp, 3600);
        let samples = &window(0)[..SAMPLE_WINDOW - 1];

        assert_eq!(classify(&config, &torrent, samples, ctx(1)), Verdict::Healthy);
    }

    #[test]
    fn test_blackhole_zero_upload_is_infinite_ratio() {
        let config = test_config();
        let mut torrent = running("Film-X", "movie", TorrentState::Downloading, 3600);
        torrent.dlspeed = 11 * MIB;
        torrent.upspeed = 0;

        assert_eq!(
            classify(&config, &torrent, &[], ctx(1)),
            Verdict::Blackhole {
                ratio: f64::INFINITY
            }
        );
    }

    #[test]
    fn test_blackhole_thresholds() {
        let mut torrent = running("Film-X", "movie", TorrentState::Downloading, 3600);

        torrent.dlspeed = 12 * MIB;
        torrent.upspeed = MIB;
        assert_eq!(blackhole_ratio(&torrent), Some(12.0));

        // Download not above the floor
        torrent.dlspeed = 10 * MIB;
        assert_eq!(blackhole_ratio(&torrent), None);

        // Upload not below the cap
        torrent.dlspeed = 20 * MIB;
        torrent.upspeed = 2 * MIB;
        assert_eq!(blackhole_ratio(&torrent), None);
    }

    #[test]
    fn test_blackhole_skips_trusted_group() {
        let config = test_config();
        let mut torrent = running("Film-WiKi", "movie", TorrentState::Downloading, 3600);
        torrent.dlspeed = 11 * MIB;
        torrent.upspeed = 0;

        assert_eq!(classify(&config, &torrent, &[], ctx(1)), Verdict::TrustedGroup);
    }

    #[test]
    fn test_low_peer_interest_in_first_minutes() {
        let config = test_config();
        let mut torrent = running("Film-X", "movie", TorrentState::Downloading, 60);
        torrent.num_incomplete = 4;

        assert_eq!(
            classify(&config, &torrent, &[], ctx(1)),
            Verdict::LowPeerInterest {
                metric: PeerMetric::Incomplete,
                observed: 4,
                required: 5
            }
        );
    }

    #[test]
    fn test_low_connected_leechers() {
        let config = test_config();
        let mut torrent = running("Film-X", "movie", TorrentState::Downloading, 60);
        torrent.num_leechs = 1;

        assert_eq!(
            classify(&config, &torrent, &[], ctx(1)),
            Verdict::LowPeerInterest {
                metric: PeerMetric::Leechs,
                observed: 1,
                required: 5
            }
        );
    }

    #[test]
    fn test_low_peer_interest_skipped_after_probe_window() {
        let config = test_config();
        let mut torrent = running("Film-X", "movie", TorrentState::Downloading, PEER_PROBE_SECS);
        torrent.num_incomplete = 0;

        assert_eq!(classify(&config, &torrent, &[], ctx(1)), Verdict::Healthy);
    }

    #[test]
    fn test_low_peer_interest_disabled_without_category_minimum() {
        let config = test_config();
        let mut torrent = running("Film-X", "black", TorrentState::Downloading, 60);
        torrent.num_incomplete = 0;
        torrent.num_leechs = 0;

        assert_eq!(classify(&config, &torrent, &[], ctx(1)), Verdict::Healthy);
    }

    #[test]
    fn test_hr_progress_threshold() {
        let config = test_config();
        let torrent = running("Film-HRG", "hr", TorrentState::Downloading, 60);
        assert_eq!(hr_progress_threshold(&config, &torrent), 32 * GIB);

        let torrent = running("Film-X", "movie", TorrentState::Downloading, 60);
        assert_eq!(hr_progress_threshold(&config, &torrent), 0);
    }
}
