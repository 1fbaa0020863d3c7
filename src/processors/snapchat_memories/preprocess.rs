//! Snapchat Memories preprocessor: the metadata is already array-shaped and
//! pre-paired with its media, so this stage is mostly validate-copy-emit.

use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::banned_paths::BannedPathFilter;
use crate::config::RunConfig;
use crate::error::AppResult;
use crate::failure_tracker::FailureTracker;
use crate::hasher::hash_file;
use crate::models::{HashRegistry, MatchContext};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub date: String,
    pub media_type: String,
    pub media_filename: String,
    pub overlay_filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryRecord {
    pub date: String,
    pub media_type: String,
    pub filename: String,
    pub overlay_filename: Option<String>,
    pub content_hash: String,
}

#[derive(Debug, Serialize)]
struct SnapchatMemoriesManifest {
    export_path: String,
    total_memories: usize,
    media: Vec<MemoryRecord>,
}

/// Parses a Snapchat Memories timestamp (`"2021-01-01 12:00:00 UTC"`). Used
/// purely for validation here; ordering and display both rely on the raw
/// string surviving unchanged into `metadata.json`.
fn parse_date(date: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(date.trim_end_matches(" UTC"), "%Y-%m-%d %H:%M:%S").ok()
}

pub fn run(root: &Path, output_dir: &Path, _config: &RunConfig) -> AppResult<()> {
    let metadata_path = root.join("metadata.json");
    let media_root = root.join("media");
    let overlays_root = root.join("overlays");

    let entries: Vec<MemoryEntry> = serde_json::from_str(&fs::read_to_string(&metadata_path)?)?;

    let media_out = output_dir.join("media");
    let overlays_out = output_dir.join("overlays");
    fs::create_dir_all(&media_out)?;
    fs::create_dir_all(&overlays_out)?;

    let banned = BannedPathFilter::new();
    let tracker = FailureTracker::new("Snapchat Memories", root.to_string_lossy());
    let hash_registry = HashRegistry::new();

    let mut records = Vec::new();

    for entry in &entries {
        if parse_date(&entry.date).is_none() {
            tracker.add_processing_failure(
                Path::new(&entry.media_filename).to_path_buf(),
                serde_json::to_value(entry).unwrap_or(Value::Null),
                "unparseable date",
                format!("could not parse `{}`", entry.date),
                serde_json::json!({}),
            );
        }

        let media_path = media_root.join(&entry.media_filename);
        if !media_path.is_file() || banned.is_banned(&media_path) {
            tracker.add_orphaned_media(
                media_path.clone(),
                "media file referenced in metadata.json not found",
                serde_json::json!({"date": entry.date}),
            );
            continue;
        }

        let hash = match hash_file(&media_path) {
            Ok(h) => h,
            Err(e) => {
                tracker.add_processing_failure(
                    media_path.clone(),
                    Value::Null,
                    "hash failed",
                    e.to_string(),
                    serde_json::json!({}),
                );
                continue;
            }
        };

        let context = MatchContext::Snapchat { conversation_id: "memories".into(), message_index: records.len() };
        let is_first = hash_registry.claim(&hash, &entry.media_filename, &media_path, context);
        if is_first {
            fs::copy(&media_path, media_out.join(&entry.media_filename))?;
        }

        let mut overlay_filename = None;
        if let Some(overlay_name) = &entry.overlay_filename {
            let overlay_path = overlays_root.join(overlay_name);
            if overlay_path.is_file() {
                fs::copy(&overlay_path, overlays_out.join(overlay_name))?;
                overlay_filename = Some(overlay_name.clone());
            } else {
                info!("Snapchat Memories: overlay `{overlay_name}` referenced but missing, skipping composite");
            }
        }

        records.push(MemoryRecord {
            date: entry.date.clone(),
            media_type: entry.media_type.clone(),
            filename: entry.media_filename.clone(),
            overlay_filename,
            content_hash: hash,
        });
    }

    let manifest = SnapchatMemoriesManifest {
        export_path: root.to_string_lossy().to_string(),
        total_memories: entries.len(),
        media: records,
    };
    fs::write(output_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest)?)?;
    tracker.handle_failures(output_dir);

    info!("Snapchat Memories: {} memories staged", manifest.total_memories);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_snapchat_memories_date_format() {
        assert!(parse_date("2021-01-01 12:00:00 UTC").is_some());
    }

    #[test]
    fn rejects_malformed_date() {
        assert!(parse_date("not a date").is_none());
    }
}
