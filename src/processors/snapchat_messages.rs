//! Snapchat Messages preprocessor: `json/chat_history.json` plus a flat
//! `chat_media/` directory whose filenames carry enough structure to avoid
//! a real database, matched against messages in three phases.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::banned_paths::BannedPathFilter;
use crate::config::RunConfig;
use crate::error::AppResult;
use crate::failure_tracker::FailureTracker;
use crate::file_type::infer_file_type;
use crate::hasher::hash_file;
use crate::models::{ConversationRecord, ConversationType, HashRegistry, MatchContext, MessageRecord};
use crate::overlay::{self, OverlayMetadata};
use crate::registry::Processor;

pub struct SnapchatMessagesProcessor;

impl Processor for SnapchatMessagesProcessor {
    fn name(&self) -> &'static str {
        "Snapchat Messages"
    }

    fn priority(&self) -> i32 {
        45
    }

    fn detect(&self, input_dir: &Path) -> bool {
        let root = input_dir.join("Snapchat").join("messages");
        root.join("json").join("chat_history.json").is_file() && root.join("chat_media").is_dir()
    }

    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
        run(&input_dir.join("Snapchat").join("messages"), output_dir, config, extract_username(input_dir))
    }
}

fn extract_username(input_dir: &Path) -> String {
    input_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "From")]
    from: String,
    #[serde(rename = "Created")]
    created: String,
    #[serde(rename = "Content", default)]
    content: Option<String>,
    #[serde(rename = "Media IDs", default)]
    media_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FileKind {
    BMedia { id: String },
    UuidMedia { uuid: String },
    UuidOverlay { uuid: String },
    DateHash { date: String, hash: String },
    Unknown,
}

fn classify_filename(name: &str) -> FileKind {
    let b_media = Regex::new(r"_b~([A-Za-z0-9+/=_-]+)\.\w+$").unwrap();
    let uuid_media = Regex::new(r"_media~(?:zip-)?([0-9A-Fa-f-]{36})\.\w+$").unwrap();
    let uuid_overlay = Regex::new(r"_overlay~(?:zip-)?([0-9A-Fa-f-]{36})\.\w+$").unwrap();
    let date_hash = Regex::new(r"^(\d{4}-\d{2}-\d{2})_([0-9a-f]{32})\.\w+$").unwrap();

    if let Some(caps) = b_media.captures(name) {
        return FileKind::BMedia { id: caps[1].to_string() };
    }
    if let Some(caps) = uuid_media.captures(name) {
        return FileKind::UuidMedia { uuid: caps[1].to_string() };
    }
    if let Some(caps) = uuid_overlay.captures(name) {
        return FileKind::UuidOverlay { uuid: caps[1].to_string() };
    }
    if let Some(caps) = date_hash.captures(name) {
        return FileKind::DateHash { date: caps[1].to_string(), hash: caps[2].to_string() };
    }
    FileKind::Unknown
}

fn mtime_second(path: &Path) -> Option<i64> {
    let meta = fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs() as i64)
}

fn parse_snapchat_timestamp(s: &str) -> Option<DateTime<Utc>> {
    use chrono::TimeZone;
    let naive = chrono::NaiveDateTime::parse_from_str(s.trim_end_matches(" UTC"), "%Y-%m-%d %H:%M:%S").ok()?;
    Utc.from_local_datetime(&naive).single()
}

#[derive(Debug, Serialize)]
struct MatchCandidate {
    filename: String,
    kind: String,
}

#[derive(Debug, Serialize)]
struct MatchInfo {
    timestamp: String,
    analysis: AmbiguityAnalysis,
    media_candidates: Vec<MatchCandidate>,
    overlay_candidates: Vec<MatchCandidate>,
}

#[derive(Debug, Serialize)]
struct AmbiguityAnalysis {
    hint: String,
}

#[derive(Debug, Serialize)]
struct SnapchatMessagesManifest {
    export_path: String,
    conversations: Vec<ConversationRecord>,
    orphaned_media: Vec<String>,
}

fn run(root: &Path, output_dir: &Path, config: &RunConfig, export_username: String) -> AppResult<()> {
    let history_path = root.join("json").join("chat_history.json");
    let media_dir = root.join("chat_media");

    let history: HashMap<String, Vec<RawMessage>> = serde_json::from_str(&fs::read_to_string(&history_path)?)?;

    let media_out = output_dir.join("media");
    fs::create_dir_all(&media_out)?;

    let banned = BannedPathFilter::new();
    let tracker = FailureTracker::new("Snapchat Messages", root.to_string_lossy());
    let hash_registry = HashRegistry::new();

    let all_names: Vec<String> = fs::read_dir(&media_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| !banned.is_banned(Path::new(n)))
        .collect();

    let mut claimed: std::collections::HashSet<String> = std::collections::HashSet::new();

    // Phase 3 setup: group UUID media/overlay files by mtime second for
    // later mtime-based pairing, independent of any message reference.
    let mut mtime_groups: HashMap<i64, (Vec<String>, Vec<String>)> = HashMap::new();
    for name in &all_names {
        let kind = classify_filename(name);
        let path = media_dir.join(name);
        match kind {
            FileKind::UuidMedia { .. } => {
                if let Some(mt) = mtime_second(&path) {
                    mtime_groups.entry(mt).or_default().0.push(name.clone());
                }
            }
            FileKind::UuidOverlay { .. } => {
                if let Some(mt) = mtime_second(&path) {
                    mtime_groups.entry(mt).or_default().1.push(name.clone());
                }
            }
            _ => {}
        }
    }

    let mut overlay_pairing: HashMap<String, String> = HashMap::new();
    for (mtime, (videos, overlays)) in &mtime_groups {
        if videos.len() == 1 && overlays.len() == 1 {
            overlay_pairing.insert(videos[0].clone(), overlays[0].clone());
        } else if !overlays.is_empty() && (videos.len() > 1 || overlays.len() > 1) {
            write_needs_matching(output_dir, *mtime, videos, overlays, &media_dir)?;
            for v in videos {
                claimed.insert(v.clone());
            }
            for o in overlays {
                claimed.insert(o.clone());
            }
        }
    }

    let mut conversations = Vec::new();

    for (conversation_id, messages) in history {
        let mut message_records = Vec::new();

        for (index, raw) in messages.iter().enumerate() {
            let created = parse_snapchat_timestamp(&raw.created).unwrap_or_default();
            let mut media_files = Vec::new();

            for media_id in &raw.media_ids {
                // Phase 1: explicit media ID match.
                let found = all_names.iter().find(|n| matches!(classify_filename(n), FileKind::BMedia { id } if id == *media_id));
                let Some(found) = found else {
                    tracker.add_orphaned_media(
                        media_dir.join(media_id),
                        "media ID referenced in message not found among chat_media files",
                        serde_json::json!({"conversation_id": conversation_id, "message_index": index}),
                    );
                    continue;
                };
                claimed.insert(found.clone());

                let mut to_copy = vec![found.clone()];
                if let Some(overlay_name) = overlay_pairing.get(found) {
                    to_copy.push(overlay_name.clone());
                    claimed.insert(overlay_name.clone());
                }

                for (slot, name) in to_copy.iter().enumerate() {
                    let source_path = media_dir.join(name);
                    let hash = match hash_file(&source_path) {
                        Ok(h) => h,
                        Err(_) => continue,
                    };
                    if slot == 1 {
                        // overlay files are inputs to compositing, not copied standalone
                        continue;
                    }
                    let inferred = infer_file_type(&source_path, name, config.allow_cross_category);
                    let has_overlay = to_copy.len() == 2;
                    let final_ext = if has_overlay { "mkv".to_string() } else { inferred.extension.clone() };
                    let dest_filename = format!("{hash}.{final_ext}");
                    let context = MatchContext::Snapchat { conversation_id: conversation_id.clone(), message_index: index };
                    let is_first = hash_registry.claim(&hash, &dest_filename, &source_path, context);

                    let canonical_filename = if is_first {
                        let final_dest = media_out.join(&dest_filename);
                        if has_overlay {
                            let overlay_path = media_dir.join(&to_copy[1]);
                            let overlay_meta = OverlayMetadata {
                                date: Some(raw.created.clone()),
                                latitude: None,
                                longitude: None,
                                conversation_type: Some("group".into()),
                                conversation_id: Some(conversation_id.clone()),
                                conversation_title: Some(conversation_id.clone()),
                                sender: Some(raw.from.clone()),
                                content: raw.content.clone(),
                            };
                            let composited = overlay::create_video_with_overlay(
                                &source_path,
                                &overlay_path,
                                &final_dest,
                                Some(&overlay_meta),
                                Some(&export_username),
                            );
                            if !composited {
                                warn!("Snapchat Messages: overlay composite failed for {name}, copying raw media instead");
                                fs::copy(&source_path, &final_dest)?;
                            }
                        } else {
                            fs::copy(&source_path, &final_dest)?;
                        }
                        dest_filename
                    } else {
                        hash_registry.get(&hash).map(|r| r.first_filename).unwrap_or(dest_filename)
                    };
                    media_files.push(canonical_filename);
                }
            }

            message_records.push(MessageRecord {
                sender: raw.from.clone(),
                created,
                content: raw.content.clone(),
                media_files,
                metadata: None,
            });
        }

        let mut conversation = ConversationRecord {
            id: conversation_id.clone(),
            conversation_type: ConversationType::Group,
            title: conversation_id,
            messages: message_records,
        };
        conversation.sort_messages();
        conversations.push(conversation);
    }

    let orphaned_media: Vec<String> = all_names.iter().filter(|n| !claimed.contains(*n)).cloned().collect();
    for name in &orphaned_media {
        tracker.add_orphaned_media(media_dir.join(name), "chat_media file never referenced or paired", serde_json::json!({}));
    }

    let manifest = SnapchatMessagesManifest { export_path: root.to_string_lossy().to_string(), conversations, orphaned_media };
    fs::write(output_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest)?)?;
    tracker.handle_failures(output_dir);

    info!("Snapchat Messages: {} conversation(s) processed", manifest.conversations.len());
    Ok(())
}

fn write_needs_matching(output_dir: &Path, mtime: i64, videos: &[String], overlays: &[String], media_dir: &Path) -> AppResult<()> {
    let timestamp_label = DateTime::<Utc>::from_timestamp(mtime, 0)
        .map(|dt| dt.format("%Y-%m-%d_%H-%M-%S_UTC").to_string())
        .unwrap_or_else(|| mtime.to_string());

    let triage_root = output_dir.join("needs_matching").join(&timestamp_label);
    let media_triage = triage_root.join("media");
    let overlay_triage = triage_root.join("overlays");
    fs::create_dir_all(&media_triage)?;
    fs::create_dir_all(&overlay_triage)?;

    for v in videos {
        fs::copy(media_dir.join(v), media_triage.join(v))?;
    }
    for o in overlays {
        fs::copy(media_dir.join(o), overlay_triage.join(o))?;
    }

    let info = MatchInfo {
        timestamp: timestamp_label,
        analysis: AmbiguityAnalysis { hint: format!("{}:{} media-to-overlay candidates share this timestamp", videos.len(), overlays.len()) },
        media_candidates: videos.iter().map(|f| MatchCandidate { filename: f.clone(), kind: "media".into() }).collect(),
        overlay_candidates: overlays.iter().map(|f| MatchCandidate { filename: f.clone(), kind: "overlay".into() }).collect(),
    };
    fs::write(triage_root.join("match_info.json"), serde_json::to_string_pretty(&info)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_b_media_scheme() {
        assert_eq!(classify_filename("abc_b~dGVzdA==.jpg"), FileKind::BMedia { id: "dGVzdA==".to_string() });
    }

    #[test]
    fn classifies_uuid_media_scheme() {
        assert_eq!(
            classify_filename("x_media~3fa85f64-5717-4562-b3fc-2c963f66afa6.mp4"),
            FileKind::UuidMedia { uuid: "3fa85f64-5717-4562-b3fc-2c963f66afa6".to_string() }
        );
    }

    #[test]
    fn classifies_date_hash_scheme() {
        assert_eq!(
            classify_filename("2020-01-01_d41d8cd98f00b204e9800998ecf8427e.jpg"),
            FileKind::DateHash { date: "2020-01-01".to_string(), hash: "d41d8cd98f00b204e9800998ecf8427e".to_string() }
        );
    }

    #[test]
    fn parses_snapchat_message_timestamp() {
        assert!(parse_snapchat_timestamp("2021-01-01 12:00:00 UTC").is_some());
    }
}
