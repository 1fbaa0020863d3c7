//! Predicate classifying filesystem entries as ignorable system artifacts.

use std::path::Path;

/// Exact-name or prefix patterns considered system noise. Consulted against
/// the basename only.
const DEFAULT_BANNED_EXACT: &[&str] = &[
    ".DS_Store",
    "@eaDir",
    "@__thumb",
    "Thumbs.db",
    "desktop.ini",
    "Lightroom Catalog",
    "thumbnails",
    ".photostructure",
];

const DEFAULT_BANNED_PREFIX: &[&str] = &["._", "SYNOFILE_THUMB_"];

/// A process-wide, append-only set of banned basename patterns. Construct
/// once via [`BannedPathFilter::new`], optionally extend with
/// [`BannedPathFilter::with_patterns`], then treat as read-only.
#[derive(Debug, Clone)]
pub struct BannedPathFilter {
    exact: Vec<String>,
    prefix: Vec<String>,
}

impl Default for BannedPathFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BannedPathFilter {
    pub fn new() -> Self {
        Self {
            exact: DEFAULT_BANNED_EXACT.iter().map(|s| s.to_string()).collect(),
            prefix: DEFAULT_BANNED_PREFIX.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Returns a copy with additional patterns contributed at construction time.
    pub fn with_patterns(mut self, exact: &[&str], prefix: &[&str]) -> Self {
        self.exact.extend(exact.iter().map(|s| s.to_string()));
        self.prefix.extend(prefix.iter().map(|s| s.to_string()));
        self
    }

    /// Whether `path`'s basename is banned. Non-UTF8 basenames are never banned.
    pub fn is_banned(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.exact.iter().any(|p| p == name) || self.prefix.iter().any(|p| name.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn bans_ds_store() {
        let filter = BannedPathFilter::new();
        assert!(filter.is_banned(&PathBuf::from("/a/b/.DS_Store")));
    }

    #[test]
    fn bans_apple_double_prefix() {
        let filter = BannedPathFilter::new();
        assert!(filter.is_banned(&PathBuf::from("/a/b/._IMG_0001.JPG")));
    }

    #[test]
    fn bans_synology_thumb_prefix() {
        let filter = BannedPathFilter::new();
        assert!(filter.is_banned(&PathBuf::from("/a/SYNOFILE_THUMB_abc.jpg")));
    }

    #[test]
    fn allows_ordinary_file() {
        let filter = BannedPathFilter::new();
        assert!(!filter.is_banned(&PathBuf::from("/a/b/IMG_0001.JPG")));
    }

    #[test]
    fn custom_patterns_extend_defaults() {
        let filter = BannedPathFilter::new().with_patterns(&["custom.ignore"], &["tmp_"]);
        assert!(filter.is_banned(&PathBuf::from("/a/custom.ignore")));
        assert!(filter.is_banned(&PathBuf::from("/a/tmp_scratch")));
        assert!(filter.is_banned(&PathBuf::from("/a/.DS_Store")));
    }
}
