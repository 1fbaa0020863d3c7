//! Finalizes a Snapchat Memories run: composites overlays where present,
//! embeds metadata into every file (composited or not), and sets mtimes.

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde_json::Value;

use crate::config::RunConfig;
use crate::error::AppResult;
use crate::metadata_embed::{self, TagWrite};
use crate::overlay::{self, OverlayMetadata};

use super::preprocess::MemoryRecord;

fn parse_epoch(date: &str) -> Option<i64> {
    use chrono::NaiveDateTime;
    NaiveDateTime::parse_from_str(date.trim_end_matches(" UTC"), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

pub fn finalize(output_dir: &Path, _config: &RunConfig) -> AppResult<()> {
    let manifest_path = output_dir.join("metadata.json");
    let manifest: Value = serde_json::from_str(&fs::read_to_string(&manifest_path)?)?;
    let media_dir = output_dir.join("media");
    let overlays_dir = output_dir.join("overlays");

    let records: Vec<MemoryRecord> = serde_json::from_value(manifest["media"].clone()).unwrap_or_default();

    let mut writes = Vec::new();
    let mut timestamps = Vec::new();
    let mut composited = 0usize;

    for record in &records {
        let media_path = media_dir.join(&record.filename);
        if !media_path.is_file() {
            continue;
        }

        let overlay_meta = OverlayMetadata {
            date: Some(record.date.clone()),
            latitude: None,
            longitude: None,
            conversation_type: None,
            conversation_id: None,
            conversation_title: None,
            sender: None,
            content: None,
        };

        if let Some(overlay_name) = &record.overlay_filename {
            let overlay_path = overlays_dir.join(overlay_name);
            let ok = if record.media_type.eq_ignore_ascii_case("video") {
                let composed_path = media_path.with_extension("mkv");
                let success = overlay::create_video_with_overlay(&media_path, &overlay_path, &composed_path, Some(&overlay_meta), None);
                if success {
                    let _ = fs::remove_file(&media_path);
                }
                success
            } else {
                overlay::create_image_with_overlay(&media_path, &overlay_path, &media_path, 95)
            };
            if ok {
                composited += 1;
            } else {
                warn!("Snapchat Memories: overlay composite failed for {}", record.filename);
            }
        }

        if let Some(epoch) = parse_epoch(&record.date) {
            timestamps.push((media_path.clone(), epoch));
            writes.push(TagWrite {
                source_file: media_path.clone(),
                tags: serde_json::json!({ "DateTimeOriginal": chrono::DateTime::from_timestamp(epoch, 0)
                    .map(|dt| dt.format("%Y:%m:%d %H:%M:%S").to_string()) }),
            });
        }
    }

    let outcomes = metadata_embed::write_tags_batch(&writes)?;
    for (path, epoch) in timestamps {
        if let Err(e) = metadata_embed::set_file_time(&path, epoch) {
            warn!("Snapchat Memories: failed to set mtime on {}: {e}", path.display());
        }
    }

    info!(
        "Snapchat Memories finalize: {composited} overlay composite(s), {} tag write(s)",
        outcomes.iter().filter(|o| o.succeeded).count()
    );
    Ok(())
}
