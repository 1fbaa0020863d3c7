//! iMessage (iMazing export) preprocessor: a flat directory of attachments
//! whose filenames encode timestamp and conversation, cross-referenced
//! against `Messages - *.csv` sidecars for sender direction and text.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::banned_paths::BannedPathFilter;
use crate::config::RunConfig;
use crate::error::AppResult;
use crate::failure_tracker::FailureTracker;
use crate::file_type::infer_file_type;
use crate::hasher::hash_file;
use crate::models::{ConversationRecord, ConversationType, HashRegistry, MatchContext, MessageRecord};
use crate::registry::Processor;

pub struct IMessageImazingProcessor;

impl Processor for IMessageImazingProcessor {
    fn name(&self) -> &'static str {
        "iMessage (imazing)"
    }

    fn priority(&self) -> i32 {
        25
    }

    fn detect(&self, input_dir: &Path) -> bool {
        fs::read_dir(input_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .any(|e| e.path().is_file() && parse_imazing_filename(&e.file_name().to_string_lossy()).is_some())
            })
            .unwrap_or(false)
    }

    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
        run(input_dir, output_dir, config)
    }

    fn supports_consolidation(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
struct ParsedFilename {
    timestamp: DateTime<Utc>,
    conversation: String,
    original_filename: String,
}

/// Parses `"YYYY-MM-DD HH MM SS - Contact/Group Name - OriginalFilename.ext"`.
fn parse_imazing_filename(filename: &str) -> Option<ParsedFilename> {
    let pattern = Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2} \d{2} \d{2}) - (.+?) - (.+)$").ok()?;
    let caps = pattern.captures(filename)?;
    let timestamp_str = &caps[1];
    let conversation = caps[2].trim().to_string();
    let original_filename = caps[3].to_string();

    let naive = NaiveDateTime::parse_from_str(timestamp_str, "%Y-%m-%d %H %M %S").ok()?;
    let timestamp = DateTime::from_naive_utc_and_offset(naive, Utc);

    Some(ParsedFilename { timestamp, conversation, original_filename })
}

fn is_group_chat(conversation_name: &str) -> bool {
    conversation_name.contains(" & ")
}

#[derive(Debug, Clone, Default)]
struct CsvMessageInfo {
    service: String,
    message_type: String,
    sender_name: String,
    text: String,
}

/// Indexed by `(message_date, attachment_filename)` as they appear verbatim
/// in the CSV, since iMazing doesn't guarantee a single timestamp format
/// across export versions.
type CsvCache = HashMap<(String, String), CsvMessageInfo>;

fn load_csv_messages(export_path: &Path) -> AppResult<CsvCache> {
    let mut cache = CsvCache::new();

    for entry in fs::read_dir(export_path)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.starts_with("Messages - ") || path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }

        let mut reader = match csv::Reader::from_path(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!("iMessage (imazing): failed to open {}: {e}", path.display());
                continue;
            }
        };

        for record in reader.deserialize::<HashMap<String, String>>() {
            let Ok(row) = record else { continue };
            let attachment = row.get("Attachment").map(|s| s.trim()).unwrap_or("");
            if attachment.is_empty() {
                continue;
            }
            let message_date = row.get("Message Date").map(|s| s.trim()).unwrap_or("");
            if message_date.is_empty() {
                continue;
            }

            cache.insert(
                (message_date.to_string(), attachment.to_string()),
                CsvMessageInfo {
                    service: row.get("Service").cloned().unwrap_or_default(),
                    message_type: row.get("Type").cloned().unwrap_or_default(),
                    sender_name: row.get("Sender Name").cloned().unwrap_or_default(),
                    text: row.get("Text").cloned().unwrap_or_default(),
                },
            );
        }
    }

    Ok(cache)
}

fn lookup_csv_message<'a>(cache: &'a CsvCache, timestamp: &DateTime<Utc>, original_filename: &str) -> Option<&'a CsvMessageInfo> {
    let csv_timestamp = timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
    if let Some(info) = cache.get(&(csv_timestamp.clone(), original_filename.to_string())) {
        return Some(info);
    }
    // CSV timestamps can carry different sub-minute precision than the
    // filename-encoded one; fall back to a minute-granularity prefix match.
    let prefix = &csv_timestamp[..csv_timestamp.len().min(16)];
    cache.iter().find(|((ts, file), _)| file == original_filename && ts.starts_with(prefix)).map(|(_, v)| v)
}

struct HashedFile {
    path: PathBuf,
    hash: String,
    parsed: ParsedFilename,
}

#[derive(Debug, Clone, Serialize)]
struct ObservedInstance {
    conversation_id: String,
    conversation_type: String,
    conversation_title: String,
    sender: String,
    created: DateTime<Utc>,
    content: String,
    is_sender: bool,
}

fn instance_for(parsed: &ParsedFilename, csv_info: Option<&CsvMessageInfo>) -> ObservedInstance {
    let conversation_type = if is_group_chat(&parsed.conversation) { "group" } else { "dm" }.to_string();
    let (sender, content, is_sender) = match csv_info {
        Some(info) => {
            let is_sender = info.message_type == "Outgoing";
            let sender = if is_sender { "me".to_string() } else if !info.sender_name.is_empty() { info.sender_name.clone() } else { parsed.conversation.clone() };
            (sender, info.text.clone(), is_sender)
        }
        None => (parsed.conversation.clone(), String::new(), false),
    };

    ObservedInstance {
        conversation_id: parsed.conversation.clone(),
        conversation_type,
        conversation_title: parsed.conversation.clone(),
        sender,
        created: parsed.timestamp,
        content,
        is_sender,
    }
}

#[derive(Debug, Serialize)]
struct ImazingManifest {
    export_path: String,
    csv_messages_loaded: usize,
    conversations: Vec<ConversationRecord>,
}

fn run(export_path: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
    let media_out = output_dir.join("media");
    fs::create_dir_all(&media_out)?;

    let banned = BannedPathFilter::new();
    let tracker = FailureTracker::new("iMessage (imazing)", export_path.to_string_lossy());
    let hash_registry = HashRegistry::new();

    let csv_cache = load_csv_messages(export_path)?;
    info!("iMessage (imazing): loaded {} CSV message record(s)", csv_cache.len());

    let candidates: Vec<PathBuf> = fs::read_dir(export_path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && !banned.is_banned(p))
        .filter(|p| parse_imazing_filename(&p.file_name().unwrap_or_default().to_string_lossy()).is_some())
        .collect();

    let progress = ProgressBar::new(candidates.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}").unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_message("hashing attachments");

    let hashed: Vec<HashedFile> = candidates
        .par_iter()
        .progress_with(progress.clone())
        .filter_map(|path| {
            let filename = path.file_name()?.to_string_lossy().to_string();
            let parsed = parse_imazing_filename(&filename)?;
            match hash_file(path) {
                Ok(hash) => Some(HashedFile { path: path.clone(), hash, parsed }),
                Err(e) => {
                    warn!("iMessage (imazing): failed to hash {}: {e}", path.display());
                    None
                }
            }
        })
        .collect();
    progress.finish_and_clear();

    // Group by content hash, keeping every observed (parsed, source) pair so
    // a physical duplicate still surfaces every message instance it appeared in.
    let mut by_hash: HashMap<String, Vec<&HashedFile>> = HashMap::new();
    for file in &hashed {
        by_hash.entry(file.hash.clone()).or_default().push(file);
    }

    let mut conversations: HashMap<String, ConversationRecord> = HashMap::new();

    for (hash, mut files) in by_hash {
        files.sort_by_key(|f| f.parsed.timestamp);
        let primary = files[0];

        let filename = primary.path.file_name().unwrap_or_default().to_string_lossy().to_string();
        let inferred = infer_file_type(&primary.path, &filename, config.allow_cross_category);
        let dest_filename = format!("{hash}.{}", inferred.extension);
        let context = MatchContext::IMessage { conversation_id: primary.parsed.conversation.clone(), message_index: 0 };
        let is_first = hash_registry.claim(&hash, &dest_filename, &primary.path, context);
        let canonical_filename = if is_first {
            if let Err(e) = fs::copy(&primary.path, media_out.join(&dest_filename)) {
                tracker.add_processing_failure(primary.path.clone(), Value::Null, "copy failed", e.to_string(), serde_json::json!({}));
                continue;
            }
            dest_filename
        } else {
            hash_registry.get(&hash).map(|r| r.first_filename).unwrap_or(dest_filename)
        };

        let csv_info = lookup_csv_message(&csv_cache, &primary.parsed.timestamp, &primary.parsed.original_filename);
        let primary_instance = instance_for(&primary.parsed, csv_info);

        let conv_id = primary.parsed.conversation.clone();
        let conversation_type = if is_group_chat(&conv_id) { ConversationType::Group } else { ConversationType::Dm };
        let conversation = conversations.entry(conv_id.clone()).or_insert_with(|| ConversationRecord {
            id: conv_id.clone(),
            conversation_type,
            title: conv_id.clone(),
            messages: Vec::new(),
        });

        if files.len() == 1 {
            conversation.messages.push(MessageRecord {
                sender: primary_instance.sender,
                created: primary_instance.created,
                content: if primary_instance.content.is_empty() { None } else { Some(primary_instance.content) },
                media_files: vec![canonical_filename],
                metadata: None,
            });
        } else {
            // Cross-file duplicate: one physical copy, every observed
            // instance preserved in `metadata.messages` for provenance.
            let instances: Vec<ObservedInstance> = files
                .iter()
                .map(|f| instance_for(&f.parsed, lookup_csv_message(&csv_cache, &f.parsed.timestamp, &f.parsed.original_filename)))
                .collect();

            conversation.messages.push(MessageRecord {
                sender: primary_instance.sender,
                created: primary_instance.created,
                content: if primary_instance.content.is_empty() { None } else { Some(primary_instance.content) },
                media_files: vec![canonical_filename],
                metadata: Some(serde_json::json!({ "is_duplicate": true, "messages": instances })),
            });
        }
    }

    let mut conversation_list: Vec<ConversationRecord> = conversations.into_values().collect();
    for conversation in &mut conversation_list {
        conversation.sort_messages();
    }
    conversation_list.sort_by(|a, b| a.id.cmp(&b.id));

    let manifest = ImazingManifest {
        export_path: export_path.to_string_lossy().to_string(),
        csv_messages_loaded: csv_cache.len(),
        conversations: conversation_list,
    };
    fs::write(output_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest)?)?;
    tracker.handle_failures(output_dir);

    info!("iMessage (imazing): {} conversation(s) processed", manifest.conversations.len());
    Ok(())
}
