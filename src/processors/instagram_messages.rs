//! Instagram Messages preprocessor: Facebook-era HTML conversation exports,
//! in either the current `your_instagram_activity/messages/inbox/` layout
//! or the legacy `messages/inbox/` one.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
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

pub struct InstagramMessagesProcessor;

impl Processor for InstagramMessagesProcessor {
    fn name(&self) -> &'static str {
        "Instagram Messages"
    }

    fn priority(&self) -> i32 {
        35
    }

    fn detect(&self, input_dir: &Path) -> bool {
        inbox_root(input_dir).is_some()
    }

    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
        let root = inbox_root(input_dir).ok_or_else(|| {
            crate::error::AppError::Validation("Instagram Messages inbox directory not found".into())
        })?;
        run(&root, output_dir, config)
    }
}

fn inbox_root(input_dir: &Path) -> Option<std::path::PathBuf> {
    let new_format = input_dir.join("your_instagram_activity").join("messages").join("inbox");
    if new_format.is_dir() {
        return Some(new_format);
    }
    let legacy = input_dir.join("messages").join("inbox");
    if legacy.is_dir() {
        return Some(legacy);
    }
    None
}

struct ParsedMessage {
    sender: String,
    created: Option<DateTime<Utc>>,
    content: Option<String>,
    media_refs: Vec<String>,
}

/// Parses one `message_N.html` file's conversation thread.
fn parse_conversation_html(html: &str) -> Vec<ParsedMessage> {
    let document = kuchikiki::parse_html().one(html);
    let mut messages = Vec::new();

    let containers = document.select("div.pam._3-95._2ph-._a6-g.uiBoxWhite.noborder");
    let Ok(containers) = containers else {
        return messages;
    };

    for container in containers {
        let node = container.as_node();

        let sender = node
            .select_first("._3-95._2pim._a6-h._a6-i")
            .map(|n| n.text_contents().trim().to_string())
            .unwrap_or_else(|_| "Unknown".to_string());

        let created = node
            .select_first("._3-94._a6-o")
            .ok()
            .and_then(|n| parse_instagram_timestamp(n.text_contents().trim()));

        let content = node
            .select_first("div._3-95._2let")
            .map(|n| n.text_contents().trim().to_string())
            .ok()
            .filter(|s| !s.is_empty());

        let mut media_refs = Vec::new();
        if let Ok(imgs) = node.select("img") {
            for img in imgs {
                if let Some(src) = img.attributes.borrow().get("src") {
                    if src.contains("/photos/") {
                        media_refs.push(src.to_string());
                    }
                }
            }
        }
        if let Ok(links) = node.select("a") {
            for link in links {
                if let Some(href) = link.attributes.borrow().get("href") {
                    if href.contains("/photos/") {
                        media_refs.push(href.to_string());
                    }
                }
            }
        }

        messages.push(ParsedMessage { sender, created, content, media_refs });
    }

    messages
}

/// Accepts both `"Sep 22, 2017 6:33 am"` (new export) and
/// `"Sep 22, 2017, 6:33 AM"` (legacy export).
fn parse_instagram_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let normalized_legacy = s.replacen(',', "", 2);
    for candidate in [s.to_string(), normalized_legacy] {
        for fmt in ["%b %d, %Y %l:%M %P", "%b %d, %Y %l:%M %p"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(&candidate, fmt) {
                return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
            }
        }
    }
    None
}

/// Maps Instagram's `instagramuser_*` placeholder IDs to stable `deleted_N`
/// synthetic names, assigned in first-seen order.
struct DeletedUserNames {
    seen: HashMap<String, String>,
}

impl DeletedUserNames {
    fn new() -> Self {
        Self { seen: HashMap::new() }
    }

    fn resolve(&mut self, sender: &str) -> String {
        if !sender.starts_with("instagramuser_") {
            return sender.to_string();
        }
        let next_index = self.seen.len();
        self.seen.entry(sender.to_string()).or_insert_with(|| format!("deleted_{next_index}")).clone()
    }
}

fn ext_of(name: &str) -> String {
    Path::new(name).extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase()
}

#[derive(Debug, Serialize)]
struct InstagramMessagesManifest {
    export_path: String,
    conversations: Vec<ConversationRecord>,
}

fn run(inbox_root: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
    let media_out = output_dir.join("media");
    fs::create_dir_all(&media_out)?;

    let banned = BannedPathFilter::new();
    let tracker = FailureTracker::new("Instagram Messages", inbox_root.to_string_lossy());
    let hash_registry = HashRegistry::new();
    let mut deleted_names = DeletedUserNames::new();

    let mut conversations = Vec::new();

    for entry in fs::read_dir(inbox_root)? {
        let entry = entry?;
        let conv_dir = entry.path();
        if !conv_dir.is_dir() || banned.is_banned(&conv_dir) {
            continue;
        }
        let conversation_id = conv_dir.file_name().unwrap_or_default().to_string_lossy().to_string();

        let mut html_files: Vec<_> = fs::read_dir(&conv_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("html"))
            .collect();
        html_files.sort();

        let mut message_records = Vec::new();

        for html_path in &html_files {
            let Ok(html) = fs::read_to_string(html_path) else { continue };
            for parsed in parse_conversation_html(&html) {
                let mut media_files = Vec::new();

                for media_ref in &parsed.media_refs {
                    let candidate = conv_dir.join(Path::new(media_ref).file_name().unwrap_or_default());
                    if !candidate.is_file() {
                        tracker.add_orphaned_media(
                            candidate.clone(),
                            "media reference in HTML not found on disk",
                            serde_json::json!({"conversation_id": conversation_id}),
                        );
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
                    let dest_filename = format!("{hash}.{}", if inferred.extension.is_empty() { ext_of(&filename) } else { inferred.extension });
                    let context = MatchContext::Generic { location: conversation_id.clone() };
                    let is_first = hash_registry.claim(&hash, &dest_filename, &candidate, context);
                    let canonical_filename = if is_first {
                        fs::copy(&candidate, media_out.join(&dest_filename))?;
                        dest_filename
                    } else {
                        hash_registry.get(&hash).map(|r| r.first_filename).unwrap_or(dest_filename)
                    };
                    media_files.push(canonical_filename);
                }

                message_records.push(MessageRecord {
                    sender: deleted_names.resolve(&parsed.sender),
                    created: parsed.created.unwrap_or_default(),
                    content: parsed.content,
                    media_files,
                    metadata: None,
                });
            }
        }

        let mut conversation = ConversationRecord {
            id: conversation_id,
            conversation_type: ConversationType::Other,
            title: "Instagram Conversation".to_string(),
            messages: message_records,
        };
        conversation.sort_messages();
        conversations.push(conversation);
    }

    if let Err(e) = embed_tags(&conversations, &media_out) {
        warn!("Instagram Messages: tag embedding failed: {e}");
    }

    let manifest = InstagramMessagesManifest { export_path: inbox_root.to_string_lossy().to_string(), conversations };
    fs::write(output_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest)?)?;
    tracker.handle_failures(output_dir);

    info!("Instagram Messages: {} conversation(s) processed", manifest.conversations.len());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_new_format_timestamp() {
        assert!(parse_instagram_timestamp("Sep 22, 2017 6:33 am").is_some());
    }

    #[test]
    fn parses_legacy_format_timestamp() {
        assert!(parse_instagram_timestamp("Sep 22, 2017, 6:33 AM").is_some());
    }

    #[test]
    fn assigns_stable_sequential_deleted_names() {
        let mut names = DeletedUserNames::new();
        assert_eq!(names.resolve("instagramuser_abc"), "deleted_0");
        assert_eq!(names.resolve("instagramuser_def"), "deleted_1");
        assert_eq!(names.resolve("instagramuser_abc"), "deleted_0");
    }

    #[test]
    fn passes_through_non_deleted_sender() {
        let mut names = DeletedUserNames::new();
        assert_eq!(names.resolve("Alice"), "Alice");
    }
}
