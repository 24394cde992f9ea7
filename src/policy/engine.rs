//! Per-pass decision engine.
//!
//! Torrents are visited in listing order. Paused torrents go through the
//! admission flow, errored ones are deleted, active ones are classified.
//! Every eviction and admission updates the shared [`EngineState`] right
//! away so later torrents in the same pass see its effect.

use crate::core::config::Config;
use crate::models::action::{Action, Decision, Outcome, Reason};
use crate::models::sample::SpeedSample;
use crate::models::torrent::{FileEntry, TorrentSnapshot, TorrentState};
use crate::policy::group::{is_hr, is_trusted};
use crate::policy::health::{classify, HealthContext};
use crate::policy::space::EngineState;
use crate::policy::split::select_for_torrent;
use crate::utils::bytes::GIB;
use crate::utils::time::is_older_than;
use std::collections::HashMap;
use tracing::{debug, info};

/// How long a trusted-group torrent may wait paused
pub const TRUSTED_GRACE_SECS: i64 = 2 * 60 * 60;
/// How long any other torrent may wait paused
pub const UNTRUSTED_GRACE_SECS: i64 = 4 * 60;
/// HR torrents smaller than this are not worth the seeding obligation
pub const HR_MIN_TOTAL_SIZE: u64 = 20 * GIB;

/// One consistent view of the downloader for a single pass.
#[derive(Debug, Clone, Copy)]
pub struct PassInput<'a> {
    pub torrents: &'a [TorrentSnapshot],
    /// File lists of paused torrents, by hash
    pub files: &'a HashMap<String, Vec<FileEntry>>,
    /// Trailing speed samples, by hash
    pub samples: &'a HashMap<String, Vec<SpeedSample>>,
    pub now: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PassPlan {
    /// Downloader calls in execution order
    pub decisions: Vec<Decision>,
    pub outcomes: HashMap<String, Outcome>,
    pub state: EngineState,
}

impl PassPlan {
    pub fn outcome(&self, hash: &str) -> Option<Outcome> {
        self.outcomes.get(hash).copied()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.values().filter(|o| **o == outcome).count()
    }

    /// Decisions that touch `hash`, in order.
    pub fn decisions_for<'a>(&'a self, hash: &'a str) -> impl Iterator<Item = &'a Decision> + 'a {
        self.decisions.iter().filter(move |d| d.hash == hash)
    }
}

pub struct PolicyEngine<'a> {
    config: &'a Config,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Decide what to do with every torrent of the snapshot.
    ///
    /// Torrent domains must already be resolved.
    pub fn evaluate(&self, input: PassInput<'_>) -> PassPlan {
        let mut pass = Pass {
            config: self.config,
            input,
            plan: PassPlan {
                state: EngineState::from_torrents(input.torrents, self.config),
                ..Default::default()
            },
        };

        debug!(
            torrents = input.torrents.len(),
            free_space = pass.plan.state.free_space,
            active = pass.plan.state.active_count,
            paused = pass.plan.state.paused_count,
            "Evaluating pass"
        );

        for torrent in input.torrents {
            if pass.plan.state.is_evicted(&torrent.hash) {
                continue;
            }

            match torrent.state {
                TorrentState::PausedDl => pass.paused(torrent),
                TorrentState::Error => pass.evict(torrent, Reason::TorrentError),
                state if state.is_active() => pass.active(torrent),
                _ => pass.set_outcome(torrent, Outcome::Unchanged),
            }
        }

        pass.plan
    }
}

struct Pass<'a, 'i> {
    config: &'a Config,
    input: PassInput<'i>,
    plan: PassPlan,
}

impl<'a, 'i> Pass<'a, 'i> {
    fn push(&mut self, torrent: &TorrentSnapshot, action: Action, reason: Reason) {
        info!(
            hash = %torrent.hash,
            name = %torrent.name,
            action = action.name(),
            reason = %reason,
            "Decision"
        );

        self.plan.decisions.push(Decision {
            hash: torrent.hash.clone(),
            name: torrent.name.clone(),
            action,
            reason,
        });
    }

    fn set_outcome(&mut self, torrent: &TorrentSnapshot, outcome: Outcome) {
        self.plan.outcomes.insert(torrent.hash.clone(), outcome);
    }

    fn evict(&mut self, torrent: &TorrentSnapshot, reason: Reason) {
        self.push(torrent, Action::Delete { delete_files: true }, reason);
        self.plan.state.record_eviction(torrent);
        self.set_outcome(torrent, Outcome::Evicted);
    }

    fn active(&mut self, torrent: &TorrentSnapshot) {
        let samples = self
            .input
            .samples
            .get(&torrent.hash)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let ctx = HealthContext {
            now: self.input.now,
            active_count: self.plan.state.active_count,
        };

        let verdict = classify(self.config, torrent, samples, ctx);
        if verdict.evicts() {
            self.evict(torrent, Reason::Health(verdict));
        } else {
            debug!(hash = %torrent.hash, verdict = %verdict, "Torrent left running");
            self.set_outcome(torrent, Outcome::Unchanged);
        }
    }

    fn paused(&mut self, torrent: &TorrentSnapshot) {
        let config = self.config;
        let trusted = is_trusted(config, torrent);
        let grace_secs = if trusted {
            TRUSTED_GRACE_SECS
        } else {
            UNTRUSTED_GRACE_SECS
        };

        if is_older_than(torrent.added_on, grace_secs, self.input.now) {
            self.evict(torrent, Reason::PausedTooLong { trusted, grace_secs });
            return;
        }

        let hr = is_hr(config, torrent);
        if hr && torrent.total_size < HR_MIN_TOTAL_SIZE {
            self.evict(
                torrent,
                Reason::HrUndersized {
                    total_size: torrent.total_size,
                },
            );
            return;
        }

        let files = match self.input.files.get(&torrent.hash) {
            Some(files) if !files.is_empty() => files,
            _ => {
                debug!(hash = %torrent.hash, "No file list, torrent stays paused");
                self.set_outcome(torrent, Outcome::Pending);
                return;
            }
        };

        let black = config.is_black_domain(torrent.domain());
        let limit = config.download_limit_bytes();
        let mut download_size = torrent.total_size;
        let mut partial = false;

        if files.len() == 1 {
            if black {
                self.evict(torrent, Reason::UnsplittableBlacklisted);
                return;
            }
        } else if black || hr || torrent.total_size > limit {
            let selection = select_for_torrent(config, torrent, files);
            if selection.is_empty() {
                debug!(hash = %torrent.hash, "No file fits the split ceiling");
            } else {
                self.push(
                    torrent,
                    Action::SetFilePriority {
                        indices: selection.complement(files),
                        priority: 0,
                    },
                    Reason::PartialSelection {
                        files: selection.indices.len(),
                        bytes: selection.total,
                    },
                );
                download_size = selection.total;
                partial = true;
            }
        }

        if trusted && limit >= download_size {
            let reserve = config.reserve_bytes();
            let victims = self
                .plan
                .state
                .make_room(self.input.torrents, download_size, reserve);

            for victim in victims {
                self.push(
                    victim,
                    Action::Delete { delete_files: true },
                    Reason::MakeRoom {
                        for_hash: torrent.hash.clone(),
                        for_name: torrent.name.clone(),
                    },
                );
                self.set_outcome(victim, Outcome::Evicted);
            }
        }

        if self
            .plan
            .state
            .has_room(download_size, config.reserve_bytes())
        {
            self.push(
                torrent,
                Action::Resume,
                Reason::Admission {
                    bytes: download_size,
                },
            );
            self.plan.state.record_admission(download_size);
            self.set_outcome(torrent, Outcome::Admitted);
        } else {
            debug!(
                hash = %torrent.hash,
                download_size = download_size,
                free_space = self.plan.state.free_space,
                "Not enough space, torrent stays paused"
            );
            let outcome = if partial {
                Outcome::PartiallySelected
            } else {
                Outcome::Pending
            };
            self.set_outcome(torrent, outcome);
        }
    }
}
