//! Release-group parsing and the group-based trust checks.
//!
//! Release names end in `-GROUP`, optionally followed by `@tracker` and a file
//! extension: `Movie.2023.1080p.BluRay.x264-GRP@Site.mkv` belongs to `GRP`.

use crate::core::config::Config;
use crate::models::torrent::TorrentSnapshot;

/// Release group encoded in a torrent name.
///
/// Takes the text after the last `-`, drops an `@tracker` suffix, then cuts at
/// the first `.`. A leading `.` is kept (the tag would otherwise be empty).
/// Names without a `-` are returned whole.
pub fn release_group(name: &str) -> &str {
    let Some((_, tail)) = name.rsplit_once('-') else {
        return name;
    };

    let tag = match tail.rsplit_once('@') {
        Some((group, _tracker)) => group,
        None => tail,
    };

    match tag.find('.') {
        Some(index) if index > 0 => &tag[..index],
        _ => tag,
    }
}

/// Whether the torrent's group is whitelisted for its category or globally.
pub fn is_trusted(config: &Config, torrent: &TorrentSnapshot) -> bool {
    let group = release_group(&torrent.name);
    if group.is_empty() {
        return false;
    }

    let in_category = config
        .category(&torrent.category)
        .is_some_and(|category| category.trusted_groups.iter().any(|g| g == group));

    in_category || config.policy.trusted_groups.iter().any(|g| g == group)
}

/// Hit-and-run torrent: HR domain, and the category's HR group list names the group.
pub fn is_hr(config: &Config, torrent: &TorrentSnapshot) -> bool {
    if !config.is_hr_domain(torrent.domain()) {
        return false;
    }

    let Some(category) = config.category(&torrent.category) else {
        return false;
    };

    let group = release_group(&torrent.name);
    !group.is_empty() && category.hr_groups.iter().any(|g| g == group)
}
