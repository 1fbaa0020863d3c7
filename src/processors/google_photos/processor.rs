//! Finalizes a Google Photos run: embeds EXIF/XMP tags and filesystem
//! timestamps into the files `preprocess::run` already copied into `media/`.

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde_json::Value;

use crate::config::RunConfig;
use crate::error::AppResult;
use crate::metadata_embed::{self, TagWrite};

use super::preprocess::GooglePhotosMetadata;

fn tags_for(meta: &GooglePhotosMetadata) -> Value {
    let mut tags = serde_json::Map::new();

    if let Some(title) = &meta.title {
        tags.insert("Title".into(), Value::String(title.clone()));
    }
    if let Some(description) = &meta.description {
        tags.insert("Description".into(), Value::String(description.clone()));
        tags.insert("ImageDescription".into(), Value::String(description.clone()));
    }
    if !meta.people.is_empty() {
        let names: Vec<Value> = meta.people.iter().map(|p| Value::String(p.name.clone())).collect();
        tags.insert("Keywords".into(), Value::Array(names));
    }

    let geo = meta.geo_data.as_ref().filter(|g| g.latitude.is_some()).or(meta.geo_data_exif.as_ref());
    if let Some(geo) = geo {
        if let (Some(lat), Some(lon)) = (geo.latitude, geo.longitude) {
            if lat != 0.0 || lon != 0.0 {
                tags.insert("GPSLatitude".into(), Value::from(lat));
                tags.insert("GPSLongitude".into(), Value::from(lon));
                tags.insert("GPSLatitudeRef".into(), Value::String(if lat >= 0.0 { "N" } else { "S" }.into()));
                tags.insert("GPSLongitudeRef".into(), Value::String(if lon >= 0.0 { "E" } else { "W" }.into()));
            }
        }
        if let Some(alt) = geo.altitude {
            tags.insert("GPSAltitude".into(), Value::from(alt));
        }
    }

    if let Some(taken) = meta.photo_taken_time.as_ref().and_then(|t| t.timestamp.as_ref()) {
        if let Ok(epoch) = taken.parse::<i64>() {
            if let Some(dt) = chrono::DateTime::from_timestamp(epoch, 0) {
                tags.insert("DateTimeOriginal".into(), Value::String(dt.format("%Y:%m:%d %H:%M:%S").to_string()));
            }
        }
    }

    Value::Object(tags)
}

fn epoch_of(meta: &GooglePhotosMetadata) -> Option<i64> {
    meta.photo_taken_time.as_ref().and_then(|t| t.timestamp.as_ref()).and_then(|s| s.parse::<i64>().ok())
}

pub fn finalize(output_dir: &Path, _config: &RunConfig) -> AppResult<()> {
    let manifest_path = output_dir.join("metadata.json");
    let manifest: Value = serde_json::from_str(&fs::read_to_string(&manifest_path)?)?;
    let media_dir = output_dir.join("media");

    let entries = manifest["media"].as_array().cloned().unwrap_or_default();
    let mut writes = Vec::new();
    let mut timestamps = Vec::new();

    for entry in &entries {
        let filename = match entry["filename"].as_str() {
            Some(f) => f,
            None => continue,
        };
        let path = media_dir.join(filename);
        if !path.is_file() {
            warn!("Google Photos finalize: {filename} listed in metadata.json but missing from media/");
            continue;
        }

        let Some(meta_value) = entry.get("metadata").filter(|v| !v.is_null()) else {
            continue;
        };
        let meta: GooglePhotosMetadata = serde_json::from_value(meta_value.clone())?;

        let tags = tags_for(&meta);
        if let Value::Object(map) = &tags {
            if !map.is_empty() {
                writes.push(TagWrite { source_file: path.clone(), tags });
            }
        }
        if let Some(epoch) = epoch_of(&meta) {
            timestamps.push((path, epoch));
        }
    }

    let outcomes = metadata_embed::write_tags_batch(&writes)?;
    let failed = outcomes.iter().filter(|o| !o.succeeded).count();
    if failed > 0 {
        warn!("Google Photos finalize: {failed} file(s) failed tag embedding");
    }

    for (path, epoch) in timestamps {
        if let Err(e) = metadata_embed::set_file_time(&path, epoch) {
            warn!("Google Photos finalize: failed to set mtime on {}: {e}", path.display());
        }
    }

    info!("Google Photos finalize: embedded tags on {} file(s)", outcomes.iter().filter(|o| o.succeeded).count());
    Ok(())
}
