use crate::policy::health::Verdict;
use crate::utils::bytes::format_bytes;
use std::fmt;

/// Downloader call the pass runner must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Resume,
    Pause,
    Delete { delete_files: bool },
    /// Set `priority` on the listed file indices (0 = do not download)
    SetFilePriority { indices: Vec<usize>, priority: u8 },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Resume => "resume",
            Action::Pause => "pause",
            Action::Delete { .. } => "delete",
            Action::SetFilePriority { .. } => "set_file_priority",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Action::Delete { .. })
    }
}

/// Why a decision was taken. `Display` is the rule text sent to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    TorrentError,
    PausedTooLong { trusted: bool, grace_secs: i64 },
    HrUndersized { total_size: u64 },
    UnsplittableBlacklisted,
    Health(Verdict),
    /// Deleted to free space for the paused torrent `for_hash`
    MakeRoom { for_hash: String, for_name: String },
    PartialSelection { files: usize, bytes: u64 },
    Admission { bytes: u64 },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::TorrentError => write!(f, "torrent reported an error"),
            Reason::PausedTooLong { trusted, grace_secs } => {
                let group = if *trusted { "trusted-group" } else { "non-trusted" };
                write!(f, "{} torrent paused for more than {} minutes", group, grace_secs / 60)
            }
            Reason::HrUndersized { total_size } => write!(
                f,
                "HR torrent too small to be worth seeding ({})",
                format_bytes(*total_size)
            ),
            Reason::UnsplittableBlacklisted => {
                write!(f, "single-file torrent from a blacklisted domain")
            }
            Reason::Health(verdict) => write!(f, "{}", verdict),
            Reason::MakeRoom { for_name, .. } => write!(
                f,
                "lowest-income torrent evicted to admit trusted-group torrent {}",
                for_name
            ),
            Reason::PartialSelection { files, bytes } => {
                write!(f, "kept {} files ({})", files, format_bytes(*bytes))
            }
            Reason::Admission { bytes } => write!(f, "resumed with {} reserved", format_bytes(*bytes)),
        }
    }
}

impl Reason {
    /// Torrent whose admission depends on this decision succeeding.
    pub fn beneficiary(&self) -> Option<&str> {
        match self {
            Reason::MakeRoom { for_hash, .. } => Some(for_hash),
            _ => None,
        }
    }
}

/// One planned downloader call for one torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub hash: String,
    pub name: String,
    pub action: Action,
    pub reason: Reason,
}

/// Where a torrent ended up after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Resumed
    Admitted,
    /// Files deprioritised but still paused
    PartiallySelected,
    /// Deleted together with its files
    Evicted,
    /// Still paused, waiting for room
    Pending,
    /// Left running or not the engine's business
    Unchanged,
}
