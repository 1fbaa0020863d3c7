//! Instagram Public Media preprocessor: the account's own post/story/reel
//! exports, each a standalone HTML file of post containers.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use kuchikiki::traits::*;
use log::info;
use serde::Serialize;
use serde_json::Value;

use crate::banned_paths::BannedPathFilter;
use crate::config::RunConfig;
use crate::error::AppResult;
use crate::failure_tracker::FailureTracker;
use crate::file_type::infer_file_type;
use crate::hasher::hash_file;
use crate::metadata_embed::{self, TagWrite};
use crate::models::{HashRegistry, MatchContext};
use crate::registry::Processor;

pub struct InstagramPublicMediaProcessor;

const HTML_FILES: &[&str] =
    &["posts_1.html", "archived_posts.html", "reels.html", "igtv_videos.html", "stories.html", "profile_photos.html", "other_content.html"];

impl Processor for InstagramPublicMediaProcessor {
    fn name(&self) -> &'static str {
        "Instagram Public Media"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn detect(&self, input_dir: &Path) -> bool {
        media_root(input_dir).is_some()
    }

    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
        let root = media_root(input_dir)
            .ok_or_else(|| crate::error::AppError::Validation("Instagram Public Media directory not found".into()))?;
        run(&root, output_dir, config)
    }
}

fn media_root(input_dir: &Path) -> Option<std::path::PathBuf> {
    let new_format = input_dir.join("your_instagram_activity").join("media");
    if new_format.is_dir() {
        return Some(new_format);
    }
    let legacy = input_dir.join("content");
    if legacy.is_dir() {
        return Some(legacy);
    }
    None
}

#[derive(Debug, Clone, Serialize)]
struct PostRecord {
    source_file: String,
    caption: Option<String>,
    created: Option<DateTime<Utc>>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    media: Vec<String>,
}

struct ParsedPost {
    caption: Option<String>,
    created: Option<DateTime<Utc>>,
    gps: Option<(f64, f64)>,
    media_refs: Vec<String>,
}

fn parse_posts_html(html: &str) -> Vec<ParsedPost> {
    let document = kuchikiki::parse_html().one(html);
    let mut posts = Vec::new();

    let Ok(containers) = document.select("div._a6-p") else {
        return posts;
    };

    for container in containers {
        let node = container.as_node();

        let caption = node
            .select_first("div._a6-k")
            .map(|n| n.text_contents().trim().to_string())
            .ok()
            .filter(|s| !s.is_empty());

        let created = node.select_first("div._a6-q").ok().and_then(|n| {
            let text = n.text_contents();
            text.trim().parse::<i64>().ok().and_then(|epoch| DateTime::from_timestamp(epoch, 0))
        });

        let gps = extract_gps_pair(node);

        let mut media_refs = Vec::new();
        if let Ok(links) = node.select("a") {
            for link in links {
                if let Some(href) = link.attributes.borrow().get("href") {
                    media_refs.push(href.to_string());
                }
            }
        }
        if let Ok(imgs) = node.select("img") {
            for img in imgs {
                if let Some(src) = img.attributes.borrow().get("src") {
                    media_refs.push(src.to_string());
                }
            }
        }

        posts.push(ParsedPost { caption, created, gps, media_refs });
    }

    posts
}

/// Extracts the `_a6-q` Latitude/Longitude key/value div pairs Instagram
/// emits as two sibling divs: a label div reading `"Latitude"`, followed by
/// a value div, and likewise for `"Longitude"`.
fn extract_gps_pair(node: &kuchikiki::NodeRef) -> Option<(f64, f64)> {
    let divs = node.select("div._a6-q").ok()?;
    let texts: Vec<String> = divs.map(|n| n.text_contents().trim().to_string()).collect();

    let mut lat = None;
    let mut lon = None;
    let mut i = 0;
    while i + 1 < texts.len() {
        if texts[i].eq_ignore_ascii_case("latitude") {
            lat = texts[i + 1].parse::<f64>().ok();
        } else if texts[i].eq_ignore_ascii_case("longitude") {
            lon = texts[i + 1].parse::<f64>().ok();
        }
        i += 1;
    }

    match (lat, lon) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct InstagramPublicMediaManifest {
    export_path: String,
    posts: Vec<PostRecord>,
}

fn run(root: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
    let media_out = output_dir.join("media");
    fs::create_dir_all(&media_out)?;

    let banned = BannedPathFilter::new();
    let tracker = FailureTracker::new("Instagram Public Media", root.to_string_lossy());
    let hash_registry = HashRegistry::new();

    let mut post_records = Vec::new();

    for html_name in HTML_FILES {
        let html_path = root.join(html_name);
        if !html_path.is_file() {
            continue;
        }
        let Ok(html) = fs::read_to_string(&html_path) else { continue };

        for post in parse_posts_html(&html) {
            let mut media = Vec::new();

            for media_ref in &post.media_refs {
                let candidate = root.join(Path::new(media_ref).file_name().unwrap_or_default());
                if !candidate.is_file() || banned.is_banned(&candidate) {
                    tracker.add_orphaned_media(candidate.clone(), "media reference not found on disk", serde_json::json!({"source": html_name}));
                    continue;
                }
                let hash = match hash_file(&candidate) {
                    Ok(h) => h,
                    Err(e) => {
                        tracker.add_processing_failure(candidate.clone(), Value::Null, "hash failed", e.to_string(), serde_json::json!({}));
                        continue;
                    }
                };
                let filename = candidate.file_name().unwrap_or_default().to_string_lossy().to_string();
                let inferred = infer_file_type(&candidate, &filename, config.allow_cross_category);
                let dest_filename = format!("{hash}.{}", inferred.extension);
                let context = MatchContext::Generic { location: html_name.to_string() };
                let is_first = hash_registry.claim(&hash, &dest_filename, &candidate, context);
                let canonical_filename = if is_first {
                    fs::copy(&candidate, media_out.join(&dest_filename))?;
                    dest_filename
                } else {
                    hash_registry.get(&hash).map(|r| r.first_filename).unwrap_or(dest_filename)
                };
                media.push(canonical_filename);
            }

            post_records.push(PostRecord {
                source_file: html_name.to_string(),
                caption: post.caption,
                created: post.created,
                latitude: post.gps.map(|(lat, _)| lat),
                longitude: post.gps.map(|(_, lon)| lon),
                media,
            });
        }
    }

    embed_tags(&post_records, &media_out)?;

    let manifest = InstagramPublicMediaManifest { export_path: root.to_string_lossy().to_string(), posts: post_records };
    fs::write(output_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest)?)?;
    tracker.handle_failures(output_dir);

    info!("Instagram Public Media: {} post(s) processed", manifest.posts.len());
    Ok(())
}

fn embed_tags(posts: &[PostRecord], media_out: &Path) -> AppResult<()> {
    let mut writes = Vec::new();
    for post in posts {
        let mut tags = serde_json::Map::new();
        if let Some(caption) = &post.caption {
            tags.insert("Description".into(), Value::String(caption.clone()));
        }
        if let (Some(lat), Some(lon)) = (post.latitude, post.longitude) {
            tags.insert("GPSLatitude".into(), Value::from(lat));
            tags.insert("GPSLongitude".into(), Value::from(lon));
            tags.insert("GPSLatitudeRef".into(), Value::String(if lat >= 0.0 { "N" } else { "S" }.into()));
            tags.insert("GPSLongitudeRef".into(), Value::String(if lon >= 0.0 { "E" } else { "W" }.into()));
        }
        if let Some(created) = post.created {
            tags.insert("DateTimeOriginal".into(), Value::String(created.format("%Y:%m:%d %H:%M:%S").to_string()));
        }
        if tags.is_empty() {
            continue;
        }
        for filename in &post.media {
            writes.push(TagWrite { source_file: media_out.join(filename), tags: Value::Object(tags.clone()) });
        }
    }
    metadata_embed::write_tags_batch(&writes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gps_pair_from_label_value_divs() {
        let html = r#"<html><body><div class="_a6-p">
            <div class="_a6-q">Latitude</div><div class="_a6-q">37.7749</div>
            <div class="_a6-q">Longitude</div><div class="_a6-q">-122.4194</div>
        </div></body></html>"#;
        let document = kuchikiki::parse_html().one(html);
        let container = document.select_first("div._a6-p").unwrap();
        let gps = extract_gps_pair(container.as_node());
        assert_eq!(gps, Some((37.7749, -122.4194)));
    }

    #[test]
    fn returns_none_when_gps_absent() {
        let html = r#"<html><body><div class="_a6-p"></div></body></html>"#;
        let document = kuchikiki::parse_html().one(html);
        let container = document.select_first("div._a6-p").unwrap();
        assert_eq!(extract_gps_pair(container.as_node()), None);
    }
}
