//! Google Photos preprocessor: album-scoped JSON sidecar matching with
//! Live Photo pairing and truncated/edited-variant tolerance.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use crate::banned_paths::BannedPathFilter;
use crate::config::RunConfig;
use crate::error::AppResult;
use crate::failure_tracker::FailureTracker;
use crate::file_type::infer_file_type;
use crate::hasher::hash_file;
use crate::matching::{self, extract_duplicate_index, strip_duplicate_index, Matcher};
use crate::models::{HashRegistry, MatchContext};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeoData {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhotoTakenTime {
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Person {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GooglePhotosMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "photoTakenTime")]
    pub photo_taken_time: Option<PhotoTakenTime>,
    #[serde(rename = "geoData")]
    pub geo_data: Option<GeoData>,
    #[serde(rename = "geoDataExif")]
    pub geo_data_exif: Option<GeoData>,
    #[serde(default)]
    pub people: Vec<Person>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub favorited: bool,
    #[serde(default)]
    pub trashed: bool,
    #[serde(rename = "googlePhotosOrigin")]
    pub google_photos_origin: Option<Value>,
}

struct MediaCandidate {
    path: PathBuf,
    filename: String,
    album: String,
}

struct MetadataCandidate {
    media_name: String,
    dup_index: Option<u32>,
    content: GooglePhotosMetadata,
    raw: Value,
}

/// Derives the media filename a Google Photos sidecar JSON describes, and
/// any duplicate index embedded in the sidecar's own name.
///
/// Handles `file.ext.supplemental-metadata.json` (and any truncation of
/// "supplemental*"), `file.ext.supplemental-metadata(N).json` (duplicate
/// index migrates before the extension: `file(N).ext`), and plain
/// `file.ext.json`.
fn derive_media_name(metadata_filename: &str) -> Option<(String, Option<u32>)> {
    let stem = metadata_filename.strip_suffix(".json")?;

    let (before_dup, dup_index) = match stem.rfind('(') {
        Some(open) if stem.ends_with(')') => {
            let idx: Option<u32> = stem[open + 1..stem.len() - 1].parse().ok();
            (&stem[..open], idx)
        }
        _ => (stem, None),
    };

    // before_dup is now `file.ext.supplemental-something` or `file.ext`.
    if let Some(dot_pos) = before_dup.rfind('.') {
        let candidate_suffix = &before_dup[dot_pos + 1..];
        if candidate_suffix == "json" {
            // shouldn't happen since .json was already stripped
        }
        if is_supplemental_truncation(candidate_suffix) {
            let media_stem = &before_dup[..dot_pos];
            let base_name = match dup_index {
                Some(n) => insert_dup_index(media_stem, n),
                None => media_stem.to_string(),
            };
            return Some((base_name, dup_index));
        }
    }

    // `file.ext.json` case: before_dup already equals `file.ext`.
    let base_name = match dup_index {
        Some(n) => insert_dup_index(before_dup, n),
        None => before_dup.to_string(),
    };
    Some((base_name, dup_index))
}

fn is_supplemental_truncation(candidate: &str) -> bool {
    let lower = candidate.to_lowercase();
    "supplemental-metadata".starts_with(&lower) && lower.starts_with("suppl")
}

/// Inserts `(N)` before the extension: `IMG_0004.PNG`, 1 -> `IMG_0004(1).PNG`.
fn insert_dup_index(name_with_ext: &str, n: u32) -> String {
    match name_with_ext.rfind('.') {
        Some(dot) => format!("{}({n}){}", &name_with_ext[..dot], &name_with_ext[dot..]),
        None => format!("{name_with_ext}({n})"),
    }
}

fn stem_of(filename: &str) -> &str {
    Path::new(filename).file_stem().and_then(|s| s.to_str()).unwrap_or(filename)
}

fn ext_of(filename: &str) -> String {
    Path::new(filename).extension().and_then(|s| s.to_str()).unwrap_or("").to_lowercase()
}

fn trim_trailing_chars(stem: &str) -> &str {
    stem.trim_end_matches(['-', '_', '.'])
}

fn prefix_similarity(a: &str, b: &str) -> f64 {
    let common = a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count();
    common as f64 / a.len().min(b.len()).max(1) as f64
}

struct ExactMatcher;
impl Matcher<MediaCandidate, MetadataCandidate> for ExactMatcher {
    fn name(&self) -> &'static str {
        "exact"
    }
    fn matches(&self, media: &MediaCandidate, metadata: &MetadataCandidate) -> bool {
        metadata.media_name == media.filename
    }
}

struct NormalMatcher;
impl Matcher<MediaCandidate, MetadataCandidate> for NormalMatcher {
    fn name(&self) -> &'static str {
        "normal"
    }
    fn matches(&self, media: &MediaCandidate, metadata: &MetadataCandidate) -> bool {
        let media_stem = stem_of(&media.filename);
        strip_duplicate_index(stem_of(&metadata.media_name)) == strip_duplicate_index(media_stem)
            && ext_of(&metadata.media_name) == ext_of(&media.filename)
    }
}

struct LivePhotoDuplicatesMatcher;
impl Matcher<MediaCandidate, MetadataCandidate> for LivePhotoDuplicatesMatcher {
    fn name(&self) -> &'static str {
        "live-photo-duplicates"
    }
    fn matches(&self, media: &MediaCandidate, metadata: &MetadataCandidate) -> bool {
        match extract_duplicate_index(stem_of(&media.filename)) {
            Some(dup) => metadata.dup_index == Some(dup),
            None => false,
        }
    }
}

struct TrailingCharsMatcher;
impl Matcher<MediaCandidate, MetadataCandidate> for TrailingCharsMatcher {
    fn name(&self) -> &'static str {
        "trailing-chars"
    }
    fn matches(&self, media: &MediaCandidate, metadata: &MetadataCandidate) -> bool {
        trim_trailing_chars(stem_of(&metadata.media_name)) == trim_trailing_chars(stem_of(&media.filename))
    }
}

struct TruncatedMatcher;
impl Matcher<MediaCandidate, MetadataCandidate> for TruncatedMatcher {
    fn name(&self) -> &'static str {
        "truncated"
    }
    fn matches(&self, media: &MediaCandidate, metadata: &MetadataCandidate) -> bool {
        if ext_of(&metadata.media_name) != ext_of(&media.filename) {
            return false;
        }
        let media_stem = stem_of(&media.filename);
        let meta_stem = stem_of(&metadata.media_name);
        let common = media_stem.chars().zip(meta_stem.chars()).take_while(|(a, b)| a == b).count();
        common >= 30
    }
}

struct EditedMatcher;
impl Matcher<MediaCandidate, MetadataCandidate> for EditedMatcher {
    fn name(&self) -> &'static str {
        "edited"
    }
    fn matches(&self, media: &MediaCandidate, metadata: &MetadataCandidate) -> bool {
        let media_stem = stem_of(&media.filename);
        let meta_stem = stem_of(&metadata.media_name);
        media_stem.starts_with(meta_stem) && media_stem.len() > meta_stem.len()
    }
}

struct LivePhotoVariantsMatcher;
impl Matcher<MediaCandidate, MetadataCandidate> for LivePhotoVariantsMatcher {
    fn name(&self) -> &'static str {
        "live-photo-variants"
    }
    fn matches(&self, media: &MediaCandidate, metadata: &MetadataCandidate) -> bool {
        let media_stem = stem_of(&media.filename);
        let meta_stem = stem_of(&metadata.media_name);
        media_stem.len() >= 40 && meta_stem.len() >= 40 && prefix_similarity(media_stem, meta_stem) >= 0.95
    }
}

/// Resolves which metadata candidate (if any) matches `media`: every matcher
/// runs against every unclaimed candidate, hits are collected across all
/// seven strategies, and only then is the tie-break policy applied (exact
/// wins, else duplicate-index-equal wins, else first matcher's first hit).
fn match_media(media: &MediaCandidate, metadata_pool: &[(usize, &MetadataCandidate)]) -> Option<usize> {
    let matchers: Vec<Box<dyn Matcher<MediaCandidate, MetadataCandidate>>> = vec![
        Box::new(ExactMatcher),
        Box::new(NormalMatcher),
        Box::new(LivePhotoDuplicatesMatcher),
        Box::new(TrailingCharsMatcher),
        Box::new(TruncatedMatcher),
        Box::new(EditedMatcher),
        Box::new(LivePhotoVariantsMatcher),
    ];

    matching::resolve_match(
        media,
        metadata_pool,
        &matchers,
        |m, e| e.media_name == m.filename,
        |m, e| match extract_duplicate_index(stem_of(&m.filename)) {
            Some(dup) => e.dup_index == Some(dup),
            None => false,
        },
    )
}

#[derive(Debug, Serialize)]
struct FileEntry {
    filename: String,
    content_hash: String,
    albums: Vec<String>,
    metadata: Option<GooglePhotosMetadata>,
}

#[derive(Debug, Serialize)]
struct ExportInfo {
    export_path: String,
    processed_date: String,
    total_media: usize,
    total_matched: usize,
}

#[derive(Debug, Serialize)]
struct GooglePhotosManifest {
    export_info: ExportInfo,
    media: Vec<FileEntry>,
    orphaned_media: Vec<String>,
}

pub fn run(input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
    let root = input_dir.join("Google Photos");
    if !root.is_dir() {
        return Err(crate::error::AppError::Validation("Google Photos directory not found".into()));
    }

    let media_out = output_dir.join("media");
    fs::create_dir_all(&media_out)?;

    let banned = BannedPathFilter::new();
    let tracker = FailureTracker::new("Google Photos", input_dir.to_string_lossy());
    let hash_registry = HashRegistry::new();

    let mut file_records: HashMap<String, FileEntry> = HashMap::new();
    let mut matched_count = 0usize;
    let mut total_media = 0usize;

    for album_entry in fs::read_dir(&root)? {
        let album_entry = album_entry?;
        let album_path = album_entry.path();
        if !album_path.is_dir() || banned.is_banned(&album_path) {
            continue;
        }
        let album_name = album_path.file_name().unwrap_or_default().to_string_lossy().to_string();

        let mut media_candidates = Vec::new();
        let mut metadata_candidates = Vec::new();

        for entry in WalkDir::new(&album_path).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || banned.is_banned(path) {
                continue;
            }
            let filename = path.file_name().unwrap_or_default().to_string_lossy().to_string();
            if filename.ends_with(".json") {
                if let Some((media_name, dup_index)) = derive_media_name(&filename) {
                    if let Ok(raw_text) = fs::read_to_string(path) {
                        if let Ok(raw) = serde_json::from_str::<Value>(&raw_text) {
                            let content: GooglePhotosMetadata = serde_json::from_value(raw.clone()).unwrap_or_default();
                            metadata_candidates.push(MetadataCandidate { media_name, dup_index, content, raw });
                        }
                    }
                }
            } else {
                media_candidates.push(MediaCandidate { path: path.to_path_buf(), filename, album: album_name.clone() });
            }
        }

        total_media += media_candidates.len();
        let mut used = vec![false; metadata_candidates.len()];

        for media in &media_candidates {
            let pool: Vec<(usize, &MetadataCandidate)> = metadata_candidates
                .iter()
                .enumerate()
                .filter(|(i, _)| !used[*i])
                .collect();

            let matched_index = match_media(media, &pool);

            let inferred = infer_file_type(&media.path, &media.filename, config.allow_cross_category);
            let hash = match hash_file(&media.path) {
                Ok(h) => h,
                Err(e) => {
                    tracker.add_orphaned_media(media.path.clone(), format!("hash failed: {e}"), serde_json::json!({"album": media.album}));
                    continue;
                }
            };

            let dest_filename = format!("{}.{}", stem_of(&media.filename), inferred.extension);
            let dest_path = media_out.join(&dest_filename);

            let context = MatchContext::GooglePhotos { album_name: media.album.clone() };
            let is_first = hash_registry.claim(&hash, &dest_filename, &media.path, context);
            if is_first {
                if let Err(e) = fs::copy(&media.path, &dest_path) {
                    tracker.add_orphaned_media(media.path.clone(), format!("copy failed: {e}"), serde_json::json!({"album": media.album}));
                    continue;
                }
            }

            let metadata = matched_index.map(|idx| {
                used[idx] = true;
                matched_count += 1;
                metadata_candidates[idx].content.clone()
            });
            if matched_index.is_none() {
                tracker.add_orphaned_media(
                    media.path.clone(),
                    "no metadata claimed this media file",
                    serde_json::json!({"album": media.album}),
                );
            }

            file_records
                .entry(hash.clone())
                .and_modify(|entry| {
                    if !entry.albums.contains(&media.album) {
                        entry.albums.push(media.album.clone());
                    }
                })
                .or_insert_with(|| FileEntry {
                    filename: dest_filename.clone(),
                    content_hash: hash.clone(),
                    albums: vec![media.album.clone()],
                    metadata,
                });
        }

        for (idx, candidate) in metadata_candidates.iter().enumerate() {
            if !used[idx] {
                tracker.add_orphaned_metadata(
                    candidate.raw.clone(),
                    "no media file matched this metadata entry",
                    serde_json::json!({"album": album_name}),
                );
            }
        }
    }

    let manifest = GooglePhotosManifest {
        export_info: ExportInfo {
            export_path: input_dir.to_string_lossy().to_string(),
            processed_date: Utc::now().to_rfc3339(),
            total_media,
            total_matched: matched_count,
        },
        media: file_records.into_values().collect(),
        orphaned_media: Vec::new(),
    };

    fs::write(output_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest)?)?;
    tracker.handle_failures(output_dir);
    info!("Google Photos: {matched_count}/{total_media} media matched to metadata");
    if matched_count < total_media {
        warn!("Google Photos: {} media files had no matching metadata", total_media - matched_count);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_media_name_from_supplemental_metadata() {
        let (name, dup) = derive_media_name("IMG_0004.PNG.supplemental-metadata.json").unwrap();
        assert_eq!(name, "IMG_0004.PNG");
        assert_eq!(dup, None);
    }

    #[test]
    fn derives_media_name_from_truncated_supplemental() {
        let (name, _) = derive_media_name("IMG_0004.PNG.supple.json").unwrap();
        assert_eq!(name, "IMG_0004.PNG");
    }

    #[test]
    fn derives_media_name_with_duplicate_index_migration() {
        let (name, dup) = derive_media_name("IMG_0004.PNG.supplemental-metadata(1).json").unwrap();
        assert_eq!(name, "IMG_0004(1).PNG");
        assert_eq!(dup, Some(1));
    }

    #[test]
    fn derives_media_name_from_plain_json() {
        let (name, _) = derive_media_name("IMG_0004.PNG.json").unwrap();
        assert_eq!(name, "IMG_0004.PNG");
    }

    #[test]
    fn scenario_name_correction_with_duplicate_index() {
        let meta = MetadataCandidate {
            media_name: "IMG_0004(1).PNG".to_string(),
            dup_index: Some(1),
            content: GooglePhotosMetadata::default(),
            raw: Value::Null,
        };
        let media = MediaCandidate { path: PathBuf::from("IMG_0004(1).PNG"), filename: "IMG_0004(1).PNG".into(), album: "a".into() };
        let pool = vec![(0usize, &meta)];
        assert_eq!(match_media(&media, &pool), Some(0));
    }

    #[test]
    fn duplicate_index_tie_break_beats_earlier_matcher_hit() {
        // "IMG_0004(2).PNG" is reachable both via the normal matcher (against
        // metadata A, whose name has no duplicate suffix) and via the
        // live-photo-duplicates matcher (against metadata B, whose dup_index
        // agrees with the media file's own "(2)" suffix). The duplicate-index
        // agreement must win even though the normal matcher runs first.
        let meta_a = MetadataCandidate {
            media_name: "IMG_0004.PNG".to_string(),
            dup_index: Some(1),
            content: GooglePhotosMetadata::default(),
            raw: Value::Null,
        };
        let meta_b = MetadataCandidate {
            media_name: "IMG_0004(2).PNG".to_string(),
            dup_index: Some(2),
            content: GooglePhotosMetadata::default(),
            raw: Value::Null,
        };
        let media = MediaCandidate {
            path: PathBuf::from("IMG_0004(2).PNG"),
            filename: "IMG_0004(2).PNG".into(),
            album: "a".into(),
        };
        let pool = vec![(0usize, &meta_a), (1usize, &meta_b)];
        assert_eq!(match_media(&media, &pool), Some(1));
    }

    #[test]
    fn scenario_live_photo_truncated_prefix_match() {
        let meta = MetadataCandidate {
            media_name: "70391126464__72D07F3A-468D-4FD6-A9D1-2D368E323.json".to_string(),
            dup_index: None,
            content: GooglePhotosMetadata::default(),
            raw: Value::Null,
        };
        let heic = MediaCandidate {
            path: PathBuf::from("x"),
            filename: "70391126464__72D07F3A-468D-4FD6-A9D1-2D368E323.HEIC".into(),
            album: "a".into(),
        };
        let mov = MediaCandidate {
            path: PathBuf::from("x"),
            filename: "70391126464__72D07F3A-468D-4FD6-A9D1-2D368E3231.MP4".into(),
            album: "a".into(),
        };
        let pool = vec![(0usize, &meta)];
        assert_eq!(match_media(&heic, &pool), Some(0));
        assert_eq!(match_media(&mov, &pool), Some(0));
    }
}
