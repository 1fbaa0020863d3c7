//! Google Chat preprocessor + processor, folded into a single pass: the
//! source has no distinct finalize stage in the original tooling, so
//! matching, copying, and tag embedding all happen in [`GoogleChatProcessor::process`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
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

pub struct GoogleChatProcessor;

impl Processor for GoogleChatProcessor {
    fn name(&self) -> &'static str {
        "Google Chat"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn detect(&self, input_dir: &Path) -> bool {
        // Groups is the detection invariant; a Users-only export is not recognized.
        input_dir.join("Google Chat").join("Groups").is_dir()
    }

    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
        run(input_dir, output_dir, config)
    }
}

#[derive(Debug, Deserialize)]
struct GroupInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize, Clone)]
struct Member {
    name: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    creator: Member,
    created_date: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    attached_files: Vec<AttachedFile>,
}

#[derive(Debug, Deserialize)]
struct AttachedFile {
    export_name: String,
}

#[derive(Debug, Deserialize)]
struct MessagesFile {
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    user: Option<Member>,
}

/// Parses `"Wednesday, May 4, 2016 at 4:20:19 AM UTC"` into a UTC timestamp.
fn parse_timestamp(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let re = Regex::new(
        r"^\w+, (\w+) (\d{1,2}), (\d{4}) at (\d{1,2}):(\d{2}):(\d{2}) (AM|PM) UTC$",
    )
    .ok()?;
    let caps = re.captures(s.trim())?;
    let month = month_number(&caps[1])?;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let mut hour: u32 = caps[4].parse().ok()?;
    let minute: u32 = caps[5].parse().ok()?;
    let second: u32 = caps[6].parse().ok()?;
    let is_pm = &caps[7] == "PM";

    if hour == 12 {
        hour = 0;
    }
    if is_pm {
        hour += 12;
    }

    use chrono::{NaiveDate, TimeZone};
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = date.and_hms_opt(hour, minute, second)?;
    chrono::Utc.from_local_datetime(&naive).single()
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    MONTHS.iter().position(|m| m.eq_ignore_ascii_case(name)).map(|i| i as u32 + 1)
}

/// Generates the candidate on-disk filenames an `export_name` might
/// correspond to, covering the URL-encoding quirks the exporter introduces.
fn candidate_filenames(export_name: &str) -> Vec<String> {
    let mut out = vec![export_name.to_string()];
    let eq_decoded = export_name.replace("\\u003d", "=");
    if eq_decoded != export_name {
        out.push(eq_decoded.clone());
    }
    let sanitized = export_name.replace('?', "_").replace('\'', "_");
    if !out.contains(&sanitized) {
        out.push(sanitized.clone());
    }
    let both = eq_decoded.replace('?', "_").replace('\'', "_");
    if !out.contains(&both) {
        out.push(both);
    }
    out
}

fn ext_of(name: &str) -> String {
    Path::new(name).extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase()
}

/// Resolves `export_name` to an actual file among `files_in_dir`, trying
/// exact variants first, then falling back to a truncated-filename prefix match.
fn resolve_attachment(export_name: &str, files_in_dir: &[String]) -> Option<String> {
    for candidate in candidate_filenames(export_name) {
        if files_in_dir.iter().any(|f| f == &candidate) {
            return Some(candidate);
        }
    }

    let want_ext = ext_of(export_name);
    files_in_dir
        .iter()
        .find(|f| {
            ext_of(f) == want_ext && {
                let common = f.chars().zip(export_name.chars()).take_while(|(a, b)| a == b).count();
                common >= 30
            }
        })
        .cloned()
}

#[derive(Debug, Serialize)]
struct GoogleChatManifest {
    export_path: String,
    conversations: Vec<ConversationRecord>,
}

fn run(input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
    let root = input_dir.join("Google Chat");
    let groups_root = root.join("Groups");

    let owner_email = find_owner_email(&root.join("Users"));

    let media_out = output_dir.join("media");
    fs::create_dir_all(&media_out)?;

    let banned = BannedPathFilter::new();
    let tracker = FailureTracker::new("Google Chat", input_dir.to_string_lossy());
    let hash_registry = HashRegistry::new();

    let mut conversations = Vec::new();

    for entry in fs::read_dir(&groups_root)? {
        let entry = entry?;
        let group_dir = entry.path();
        if !group_dir.is_dir() || banned.is_banned(&group_dir) {
            continue;
        }
        let conversation_id = group_dir.file_name().unwrap_or_default().to_string_lossy().to_string();

        let group_info: Option<GroupInfo> = fs::read_to_string(group_dir.join("group_info.json"))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok());
        let messages_file: Option<MessagesFile> = fs::read_to_string(group_dir.join("messages.json"))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok());

        let Some(messages_file) = messages_file else {
            warn!("Google Chat: {conversation_id} has no readable messages.json, skipping");
            continue;
        };

        let members = group_info.as_ref().map(|g| g.members.clone()).unwrap_or_default();
        let title = derive_title(group_info.as_ref(), &members, owner_email.as_deref());
        let conversation_type = if members.len() <= 2 { ConversationType::Dm } else { ConversationType::Space };

        let files_in_dir: Vec<String> = fs::read_dir(&group_dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .filter(|n| !n.ends_with(".json"))
                    .collect()
            })
            .unwrap_or_default();

        let mut message_records = Vec::new();

        for (index, raw) in messages_file.messages.iter().enumerate() {
            let created = parse_timestamp(&raw.created_date).unwrap_or_default();
            let mut media_files = Vec::new();

            for attachment in &raw.attached_files {
                let Some(resolved) = resolve_attachment(&attachment.export_name, &files_in_dir) else {
                    tracker.add_orphaned_media(
                        group_dir.join(&attachment.export_name),
                        "attached_files export_name not found in conversation directory",
                        serde_json::json!({"conversation_id": conversation_id, "message_index": index}),
                    );
                    continue;
                };

                let source_path = group_dir.join(&resolved);
                let hash = match hash_file(&source_path) {
                    Ok(h) => h,
                    Err(e) => {
                        tracker.add_processing_failure(
                            source_path.clone(),
                            Value::Null,
                            "hash failed",
                            e.to_string(),
                            serde_json::json!({}),
                        );
                        continue;
                    }
                };

                let inferred = infer_file_type(&source_path, &resolved, config.allow_cross_category);
                let dest_filename = format!("{hash}.{}", inferred.extension);
                let context = MatchContext::GoogleChat { conversation_id: conversation_id.clone(), message_index: index };
                let is_first = hash_registry.claim(&hash, &dest_filename, &source_path, context);
                let canonical_filename = if is_first {
                    if let Err(e) = fs::copy(&source_path, media_out.join(&dest_filename)) {
                        tracker.add_processing_failure(source_path.clone(), Value::Null, "copy failed", e.to_string(), serde_json::json!({}));
                        continue;
                    }
                    let _ = metadata_embed::set_file_time(&media_out.join(&dest_filename), created.timestamp());
                    dest_filename
                } else {
                    hash_registry.get(&hash).map(|r| r.first_filename).unwrap_or(dest_filename)
                };
                media_files.push(canonical_filename);
            }

            message_records.push(MessageRecord {
                sender: raw.creator.name.clone(),
                created,
                content: raw.text.clone(),
                media_files,
                metadata: None,
            });
        }

        let mut conversation = ConversationRecord {
            id: conversation_id,
            conversation_type,
            title,
            messages: message_records,
        };
        conversation.sort_messages();
        conversations.push(conversation);
    }

    let manifest = GoogleChatManifest { export_path: input_dir.to_string_lossy().to_string(), conversations };
    fs::write(output_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest)?)?;
    tracker.handle_failures(output_dir);

    embed_descriptions(&manifest, &media_out)?;

    info!("Google Chat: {} conversation(s) processed", manifest.conversations.len());
    Ok(())
}

fn embed_descriptions(manifest: &GoogleChatManifest, media_out: &Path) -> AppResult<()> {
    let mut writes = Vec::new();
    for conversation in &manifest.conversations {
        for message in &conversation.messages {
            if message.content.is_none() {
                continue;
            }
            for filename in &message.media_files {
                writes.push(TagWrite {
                    source_file: media_out.join(filename),
                    tags: serde_json::json!({ "Description": message.content }),
                });
            }
        }
    }
    metadata_embed::write_tags_batch(&writes)?;
    Ok(())
}

fn find_owner_email(users_root: &Path) -> Option<String> {
    for entry in fs::read_dir(users_root).ok()?.filter_map(|e| e.ok()) {
        let info_path = entry.path().join("user_info.json");
        if let Ok(text) = fs::read_to_string(&info_path) {
            if let Ok(info) = serde_json::from_str::<UserInfo>(&text) {
                if let Some(email) = info.user.and_then(|u| u.email) {
                    return Some(email);
                }
            }
        }
    }
    None
}

fn derive_title(group_info: Option<&GroupInfo>, members: &[Member], owner_email: Option<&str>) -> String {
    if let Some(info) = group_info {
        if let Some(name) = &info.name {
            if !name.is_empty() {
                return name.clone();
            }
        }
    }

    let others: Vec<&Member> = members
        .iter()
        .filter(|m| owner_email.map(|owner| m.email.as_deref() != Some(owner)).unwrap_or(true))
        .collect();

    if others.len() == 1 {
        others[0].name.clone()
    } else if !others.is_empty() {
        others.iter().map(|m| m.name.split_whitespace().next().unwrap_or(&m.name)).collect::<Vec<_>>().join(", ")
    } else {
        "Unknown Conversation".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_google_chat_timestamp() {
        let ts = parse_timestamp("Wednesday, May 4, 2016 at 4:20:19 AM UTC").unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(), "2016-05-04 04:20:19");
    }

    #[test]
    fn parses_pm_timestamp_with_hour_rollover() {
        let ts = parse_timestamp("Monday, January 1, 2018 at 12:00:00 PM UTC").unwrap();
        assert_eq!(ts.format("%H:%M:%S").to_string(), "12:00:00");
    }

    #[test]
    fn candidate_filenames_decode_unicode_equals() {
        let candidates = candidate_filenames("photo\\u003dtest.jpg");
        assert!(candidates.contains(&"photo=test.jpg".to_string()));
    }

    #[test]
    fn candidate_filenames_sanitize_question_and_quote() {
        let candidates = candidate_filenames("what?'s.jpg");
        assert!(candidates.contains(&"what__s.jpg".to_string()));
    }

    #[test]
    fn title_prefers_group_info_name() {
        let info = GroupInfo { name: Some("Book Club".into()), members: vec![] };
        assert_eq!(derive_title(Some(&info), &[], None), "Book Club");
    }

    #[test]
    fn title_falls_back_to_other_member_name_for_dm() {
        let members = vec![
            Member { name: "Me".into(), email: Some("me@example.com".into()) },
            Member { name: "Alice Smith".into(), email: Some("alice@example.com".into()) },
        ];
        assert_eq!(derive_title(None, &members, Some("me@example.com")), "Alice Smith");
    }
}
