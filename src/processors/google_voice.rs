//! Google Voice preprocessor: HTML call/SMS logs in `Voice/Calls/`, matched
//! against a flat media set by filename with several fallback strategies.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use kuchikiki::traits::*;
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::banned_paths::BannedPathFilter;
use crate::config::RunConfig;
use crate::error::AppResult;
use crate::failure_tracker::FailureTracker;
use crate::file_type::infer_file_type;
use crate::hasher::hash_file;
use crate::metadata_embed::{self, TagWrite};
use crate::models::{ConversationRecord, ConversationType, HashRegistry, MatchContext, MessageRecord};
use crate::registry::Processor;

pub struct GoogleVoiceProcessor;

impl Processor for GoogleVoiceProcessor {
    fn name(&self) -> &'static str {
        "Google Voice"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn detect(&self, input_dir: &Path) -> bool {
        input_dir.join("Voice").join("Calls").is_dir()
    }

    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
        run(input_dir, output_dir, config)
    }
}

struct ParsedLog {
    sender: String,
    timestamp: Option<DateTime<Utc>>,
    content: Option<String>,
    media_refs: Vec<String>,
}

fn parse_log(html: &str) -> ParsedLog {
    let document = kuchikiki::parse_html().one(html);

    let sender = document
        .select_first("cite.sender")
        .map(|n| n.text_contents().trim().to_string())
        .unwrap_or_else(|_| "Unknown".to_string());

    let timestamp = document.select_first("abbr.dt").ok().and_then(|n| {
        let title = n.attributes.borrow().get("title").map(|s| s.to_string());
        title.and_then(|t| DateTime::parse_from_rfc3339(&t).ok()).map(|dt| dt.with_timezone(&Utc))
    });

    let content = document.select_first("q").ok().map(|n| n.text_contents().trim().to_string());

    let mut media_refs = Vec::new();
    if let Ok(imgs) = document.select("img") {
        for img in imgs {
            if let Some(src) = img.attributes.borrow().get("src") {
                media_refs.push(src.to_string());
            }
        }
    }
    if let Ok(links) = document.select("a") {
        for link in links {
            if let Some(href) = link.attributes.borrow().get("href") {
                if href.contains('.') {
                    media_refs.push(href.to_string());
                }
            }
        }
    }

    ParsedLog { sender, timestamp, content, media_refs }
}

fn ext_of(name: &str) -> String {
    Path::new(name).extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase()
}

fn stem_of(name: &str) -> &str {
    Path::new(name).file_stem().and_then(|s| s.to_str()).unwrap_or(name)
}

/// Resolves a media reference extracted from HTML to an actual file in
/// `calls_dir`: exact, extension-appended (HTML `src` may omit the
/// extension), trailing-`-1` stripped, and stem-prefix match.
fn resolve_media_ref(media_ref: &str, files: &[String]) -> Option<String> {
    let basename = Path::new(media_ref).file_name().and_then(|n| n.to_str()).unwrap_or(media_ref);

    if files.iter().any(|f| f == basename) {
        return Some(basename.to_string());
    }
    if let Some(found) = files.iter().find(|f| stem_of(f) == basename) {
        return Some(found.clone());
    }
    if let Some(stripped) = basename.strip_suffix("-1") {
        if let Some(found) = files.iter().find(|f| stem_of(f) == stripped) {
            return Some(found.clone());
        }
    }
    files.iter().find(|f| f.starts_with(basename) || basename.starts_with(stem_of(f))).cloned()
}

#[derive(Debug, Serialize)]
struct GoogleVoiceManifest {
    export_path: String,
    conversations: Vec<ConversationRecord>,
}

fn run(input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
    let calls_dir = input_dir.join("Voice").join("Calls");

    let media_out = output_dir.join("media");
    fs::create_dir_all(&media_out)?;

    let banned = BannedPathFilter::new();
    let tracker = FailureTracker::new("Google Voice", input_dir.to_string_lossy());
    let hash_registry = HashRegistry::new();

    let all_files: Vec<String> = fs::read_dir(&calls_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| !banned.is_banned(Path::new(n)))
        .collect();

    let mut conversations = Vec::new();

    for html_name in all_files.iter().filter(|n| n.to_lowercase().ends_with(".html")) {
        let html_path = calls_dir.join(html_name);
        let Ok(html) = fs::read_to_string(&html_path) else {
            tracker.add_processing_failure(html_path.clone(), Value::Null, "unreadable html", "read failed".into(), serde_json::json!({}));
            continue;
        };

        let parsed = parse_log(&html);
        let conversation_id = stem_of(html_name).to_string();

        let mut media_files = Vec::new();
        for media_ref in &parsed.media_refs {
            let Some(resolved) = resolve_media_ref(media_ref, &all_files) else {
                tracker.add_orphaned_media(
                    calls_dir.join(media_ref),
                    "media reference in HTML not found among call files",
                    serde_json::json!({"conversation_id": conversation_id}),
                );
                continue;
            };
            let source_path = calls_dir.join(&resolved);
            let hash = match hash_file(&source_path) {
                Ok(h) => h,
                Err(e) => {
                    tracker.add_processing_failure(source_path.clone(), Value::Null, "hash failed", e.to_string(), serde_json::json!({}));
                    continue;
                }
            };
            let inferred = infer_file_type(&source_path, &resolved, config.allow_cross_category);
            let dest_filename = format!("{hash}.{}", inferred.extension);
            let context = MatchContext::Generic { location: conversation_id.clone() };
            let is_first = hash_registry.claim(&hash, &dest_filename, &source_path, context);
            let canonical_filename = if is_first {
                if let Err(e) = fs::copy(&source_path, media_out.join(&dest_filename)) {
                    tracker.add_processing_failure(source_path.clone(), Value::Null, "copy failed", e.to_string(), serde_json::json!({}));
                    continue;
                }
                dest_filename
            } else {
                hash_registry.get(&hash).map(|r| r.first_filename).unwrap_or(dest_filename)
            };
            media_files.push(canonical_filename);
        }

        let conversation_type = if html_name.to_lowercase().contains("group") { ConversationType::Group } else { ConversationType::Dm };
        let message = MessageRecord {
            sender: parsed.sender.clone(),
            created: parsed.timestamp.unwrap_or_default(),
            content: parsed.content,
            media_files,
            metadata: None,
        };

        conversations.push(ConversationRecord {
            id: conversation_id,
            conversation_type,
            title: parsed.sender,
            messages: vec![message],
        });
    }

    if let Err(e) = embed_tags(&conversations, &media_out) {
        warn!("Google Voice: tag embedding failed: {e}");
    }

    let manifest = GoogleVoiceManifest { export_path: input_dir.to_string_lossy().to_string(), conversations };
    fs::write(output_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest)?)?;
    tracker.handle_failures(output_dir);

    info!("Google Voice: {} call/SMS log(s) processed", manifest.conversations.len());
    Ok(())
}

fn embed_tags(conversations: &[ConversationRecord], media_out: &Path) -> AppResult<()> {
    let mut writes = Vec::new();
    for conversation in conversations {
        for message in &conversation.messages {
            for filename in &message.media_files {
                writes.push(TagWrite {
                    source_file: media_out.join(filename),
                    tags: serde_json::json!({ "DateTimeOriginal": message.created.format("%Y:%m:%d %H:%M:%S").to_string() }),
                });
            }
        }
    }
    metadata_embed::write_tags_batch(&writes)?;
    Ok(())
}
