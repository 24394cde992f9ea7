//! Partial file selection ("split") for multi-file torrents.

use crate::core::config::{CategoryConfig, Config, SplitRule};
use crate::models::torrent::{FileEntry, TorrentSnapshot};
use crate::utils::bytes::gib_to_bytes;

/// Files to keep enabled, in selection order (smallest first).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub indices: Vec<usize>,
    pub names: Vec<String>,
    pub total: u64,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Indices of every listed file that was not selected, in listing order.
    pub fn complement(&self, files: &[FileEntry]) -> Vec<usize> {
        files
            .iter()
            .map(|file| file.index)
            .filter(|index| !self.indices.contains(index))
            .collect()
    }
}

/// Byte ceiling for the torrent's selection.
///
/// The category's split rule decides; without one the general download limit applies.
pub fn split_ceiling(
    category: Option<&CategoryConfig>,
    total_size: u64,
    download_limit: u64,
) -> u64 {
    match category.and_then(|c| c.split) {
        Some(SplitRule::Absolute { gb }) => gib_to_bytes(gb),
        Some(SplitRule::Relative { percent }) => (total_size as f64 * percent / 100.0) as u64,
        None => download_limit,
    }
}

/// Greedy smallest-first selection under `ceiling`.
///
/// Files with `size <= min_filter` or `size >= max_filter` are never selected.
/// Equal sizes keep their listing order, so the result depends only on the inputs.
pub fn select_files(files: &[FileEntry], min_filter: u64, max_filter: u64, ceiling: u64) -> Selection {
    let mut candidates: Vec<&FileEntry> = files
        .iter()
        .filter(|file| file.size > min_filter && file.size < max_filter)
        .collect();
    candidates.sort_by_key(|file| file.size);

    let mut selection = Selection::default();
    for file in candidates {
        // Sorted ascending: nothing after the first misfit can fit either
        if selection.total + file.size > ceiling {
            break;
        }
        selection.total += file.size;
        selection.indices.push(file.index);
        selection.names.push(file.name.clone());
    }

    selection
}

/// Selection for a torrent with the configured filters and its category ceiling.
pub fn select_for_torrent(config: &Config, torrent: &TorrentSnapshot, files: &[FileEntry]) -> Selection {
    let ceiling = split_ceiling(
        config.category(&torrent.category),
        torrent.total_size,
        config.download_limit_bytes(),
    );

    select_files(files, config.split_min_bytes(), config.split_max_bytes(), ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::tests::test_config;
    use crate::models::torrent::TorrentState;
    use crate::utils::bytes::GIB;

    fn files(sizes_gib: &[u64]) -> Vec<FileEntry> {
        sizes_gib
            .iter()
            .enumerate()
            .map(|(i, size)| FileEntry::new(i, format!("file{}.mkv", i), size * GIB))
            .collect()
    }

    #[test]
    fn test_select_smallest_first_under_ceiling() {
        let files = files(&[1, 2, 3, 4, 50]);
        let selection = select_files(&files, 0, 100 * GIB, 10 * GIB);

        assert_eq!(selection.indices, vec![0, 1, 2, 3]);
        assert_eq!(selection.total, 10 * GIB);
        assert_eq!(selection.names[0], "file0.mkv");
        assert_eq!(selection.complement(&files), vec![4]);
    }

    #[test]
    fn test_select_sorts_unsorted_listing() {
        let files = files(&[4, 50, 1, 3, 2]);
        let selection = select_files(&files, 0, 100 * GIB, 6 * GIB);

        // 1 + 2 + 3 fits, adding 4 would not
        assert_eq!(selection.indices, vec![2, 4, 3]);
        assert_eq!(selection.total, 6 * GIB);
        assert_eq!(selection.complement(&files), vec![0, 1]);
    }

    #[test]
    fn test_filters_are_exclusive_bounds() {
        let files = files(&[1, 2, 3, 10]);
        let selection = select_files(&files, GIB, 10 * GIB, 100 * GIB);

        // 1 GiB (== min) and 10 GiB (== max) are both excluded
        assert_eq!(selection.indices, vec![1, 2]);
        for index in &selection.indices {
            let size = files[*index].size;
            assert!(size > GIB && size < 10 * GIB);
        }
    }

    #[test]
    fn test_everything_selected_below_ceiling() {
        let files = files(&[1, 2, 3]);
        let selection = select_files(&files, 0, 100 * GIB, 100 * GIB);

        assert_eq!(selection.indices.len(), 3);
        assert_eq!(selection.total, 6 * GIB);
        assert!(selection.complement(&files).is_empty());
    }

    #[test]
    fn test_selection_is_deterministic() {
        let files = files(&[2, 2, 2, 1, 5]);
        let first = select_files(&files, 0, 100 * GIB, 5 * GIB);
        let second = select_files(&files, 0, 100 * GIB, 5 * GIB);

        assert_eq!(first, second);
        // Ties keep listing order
        assert_eq!(first.indices, vec![3, 0, 1]);
    }

    #[test]
    fn test_nothing_fits() {
        let files = files(&[20, 30]);
        let selection = select_files(&files, 0, 100 * GIB, 10 * GIB);

        assert!(selection.is_empty());
        assert_eq!(selection.total, 0);
    }

    #[test]
    fn test_split_ceiling_rules() {
        let absolute = CategoryConfig {
            split: Some(SplitRule::Absolute { gb: 10.0 }),
            ..Default::default()
        };
        assert_eq!(split_ceiling(Some(&absolute), 100 * GIB, 30 * GIB), 10 * GIB);

        let relative = CategoryConfig {
            split: Some(SplitRule::Relative { percent: 25.0 }),
            ..Default::default()
        };
        assert_eq!(split_ceiling(Some(&relative), 100 * GIB, 30 * GIB), 25 * GIB);

        assert_eq!(split_ceiling(Some(&CategoryConfig::default()), 100 * GIB, 30 * GIB), 30 * GIB);
        assert_eq!(split_ceiling(None, 100 * GIB, 30 * GIB), 30 * GIB);
    }

    #[test]
    fn test_select_for_torrent_uses_category_ceiling() {
        let config = test_config();
        let mut torrent = TorrentSnapshot::fixture("abc", "Pack-X", TorrentState::PausedDl);
        torrent.category = "black".to_string();
        torrent.total_size = 60 * GIB;

        let selection = select_for_torrent(&config, &torrent, &files(&[1, 2, 3, 4, 50]));
        assert_eq!(selection.total, 10 * GIB);
        assert_eq!(selection.indices, vec![0, 1, 2, 3]);
    }
}
