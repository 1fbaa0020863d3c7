//! Discord preprocessor: per-channel JSON exports with CDN-hosted
//! attachments fetched over HTTP, deduplicated by content hash after download.

use std::fs;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::banned_paths::BannedPathFilter;
use crate::config::RunConfig;
use crate::error::{AppError, AppResult};
use crate::failure_tracker::FailureTracker;
use crate::hasher::hash_file;
use crate::models::{ConversationRecord, ConversationType, HashRegistry, MatchContext, MessageRecord};
use crate::registry::Processor;

pub struct DiscordProcessor;

impl Processor for DiscordProcessor {
    fn name(&self) -> &'static str {
        "Discord"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn detect(&self, input_dir: &Path) -> bool {
        input_dir.join("Messages").join("index.json").is_file()
    }

    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AppError::Generic(format!("failed to start async runtime: {e}")))?;
        runtime.block_on(run(input_dir, output_dir, config))
    }
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    #[serde(rename = "type")]
    channel_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    guild: Option<GuildInfo>,
}

#[derive(Debug, Deserialize)]
struct GuildInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Contents", default)]
    contents: Option<String>,
    #[serde(rename = "Attachments", default)]
    attachments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesFile {
    messages: Vec<RawMessage>,
}

fn sanitize_base(name: &str) -> String {
    let sanitized: String = name.chars().map(|c| if "<>:\"/\\|?*".contains(c) { '_' } else { c }).collect();
    sanitized.chars().take(150).collect()
}

fn conversation_title(info: &ChannelInfo) -> (ConversationType, String) {
    match info.channel_type.as_str() {
        "DM" => (ConversationType::Dm, info.name.clone().unwrap_or_else(|| "Direct Message".into())),
        "GROUP_DM" => (ConversationType::Group, info.name.clone().unwrap_or_else(|| "Group DM".into())),
        "GUILD_TEXT" | "PUBLIC_THREAD" | "PRIVATE_THREAD" => {
            let channel_name = info.name.clone().unwrap_or_else(|| "unknown-channel".into());
            let guild_name = info.guild.as_ref().map(|g| g.name.clone()).unwrap_or_else(|| "Unknown Server".into());
            (ConversationType::Server, format!("{channel_name} in {guild_name}"))
        }
        _ => (ConversationType::Other, "Unknown Channel".to_string()),
    }
}

fn filename_for(message_id: &str, url: &str, existing: &[String]) -> String {
    let without_query = url.split('?').next().unwrap_or(url);
    let basename = without_query.rsplit('/').next().unwrap_or(without_query);
    let (stem, ext) = match basename.rsplit_once('.') {
        Some((s, e)) => (s, format!(".{e}")),
        None => (basename, String::new()),
    };
    let sanitized_stem = sanitize_base(stem);

    let mut candidate = format!("{message_id}_{sanitized_stem}{ext}");
    let mut counter = 1;
    while existing.contains(&candidate) {
        candidate = format!("{message_id}_{sanitized_stem}_{counter}{ext}");
        counter += 1;
    }
    candidate
}

async fn download_with_retry(client: &Client, url: &str, dest: &Path) -> AppResult<bool> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let response = match client.get(url).send().await {
            Ok(r) => r,
            Err(e) if attempt < 3 => {
                warn!("Discord: attempt {attempt} failed for {url}: {e}, retrying");
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                continue;
            }
            Err(e) => return Err(AppError::Http(e)),
        };

        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 403 {
            return Ok(false);
        }
        if !status.is_success() {
            if attempt < 3 {
                warn!("Discord: attempt {attempt} got status {status} for {url}, retrying");
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                continue;
            }
            return Ok(false);
        }

        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(AppError::Http)?;
            file.write_all(&chunk).await?;
        }
        return Ok(true);
    }
}

#[derive(Debug, Serialize)]
struct DiscordManifest {
    export_path: String,
    conversations: Vec<ConversationRecord>,
}

async fn run(input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
    let messages_root = input_dir.join("Messages");
    let index: std::collections::HashMap<String, String> =
        serde_json::from_str(&fs::read_to_string(messages_root.join("index.json"))?)?;

    let media_out = output_dir.join("media");
    fs::create_dir_all(&media_out)?;

    let banned = BannedPathFilter::new();
    let tracker = FailureTracker::new("Discord", input_dir.to_string_lossy());
    let hash_registry = HashRegistry::new();
    let client = Client::builder().timeout(Duration::from_secs(60)).build().map_err(AppError::Http)?;

    let mut conversations = Vec::new();
    let mut written_names: Vec<String> = Vec::new();

    for channel_id in index.keys() {
        let channel_dir = messages_root.join(format!("c{channel_id}"));
        if !channel_dir.is_dir() || banned.is_banned(&channel_dir) {
            continue;
        }

        let Ok(channel_text) = fs::read_to_string(channel_dir.join("channel.json")) else { continue };
        let Ok(channel_info) = serde_json::from_str::<ChannelInfo>(&channel_text) else { continue };
        let Ok(messages_text) = fs::read_to_string(channel_dir.join("messages.json")) else { continue };
        let Ok(messages_file) = serde_json::from_str::<MessagesFile>(&messages_text) else { continue };

        let (conversation_type, title) = conversation_title(&channel_info);
        let mut message_records = Vec::new();

        if config.skip_upload {
            for raw in &messages_file.messages {
                message_records.push(MessageRecord {
                    sender: raw.id.clone(),
                    created: chrono::DateTime::parse_from_rfc3339(&raw.timestamp)
                        .map(|dt| dt.with_timezone(&chrono::Utc))
                        .unwrap_or_default(),
                    content: raw.contents.clone(),
                    media_files: Vec::new(),
                    metadata: None,
                });
            }
        } else {
            for raw in &messages_file.messages {
                let created = chrono::DateTime::parse_from_rfc3339(&raw.timestamp)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_default();
                let mut media_files = Vec::new();

                for url in &raw.attachments {
                    let provisional_name = filename_for(&raw.id, url, &written_names);
                    let temp_dest = media_out.join(&provisional_name);

                    let downloaded = match download_with_retry(&client, url, &temp_dest).await {
                        Ok(ok) => ok,
                        Err(e) => {
                            tracker.add_processing_failure(
                                temp_dest.clone(),
                                Value::Null,
                                "download failed",
                                e.to_string(),
                                serde_json::json!({"channel_id": channel_id, "message_id": raw.id}),
                            );
                            continue;
                        }
                    };
                    if !downloaded {
                        tracker.add_orphaned_media(
                            temp_dest.clone(),
                            "attachment URL expired (404/403)",
                            serde_json::json!({"channel_id": channel_id, "message_id": raw.id}),
                        );
                        continue;
                    }

                    written_names.push(provisional_name.clone());

                    let hash = match hash_file(&temp_dest) {
                        Ok(h) => h,
                        Err(e) => {
                            tracker.add_processing_failure(temp_dest.clone(), Value::Null, "hash failed", e.to_string(), serde_json::json!({}));
                            continue;
                        }
                    };

                    let context = MatchContext::Discord { channel_id: channel_id.clone(), message_id: raw.id.clone() };
                    let is_first = hash_registry.claim(&hash, &provisional_name, &temp_dest, context);
                    if !is_first {
                        // duplicate content: unlink the redundant download, reference the survivor.
                        let _ = fs::remove_file(&temp_dest);
                    }
                    let canonical = if is_first {
                        provisional_name.clone()
                    } else {
                        hash_registry.get(&hash).map(|r| r.first_filename).unwrap_or(provisional_name)
                    };
                    media_files.push(canonical);
                }

                message_records.push(MessageRecord {
                    sender: raw.id.clone(),
                    created,
                    content: raw.contents.clone(),
                    media_files,
                    metadata: None,
                });
            }
        }

        let mut conversation = ConversationRecord { id: channel_id.clone(), conversation_type, title, messages: message_records };
        conversation.sort_messages();
        conversations.push(conversation);
    }

    let manifest = DiscordManifest { export_path: input_dir.to_string_lossy().to_string(), conversations };
    fs::write(output_dir.join("metadata.json"), serde_json::to_string_pretty(&manifest)?)?;
    tracker.handle_failures(output_dir);

    info!("Discord: {} channel(s) processed", manifest.conversations.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_reserved_filename_characters() {
        assert_eq!(sanitize_base("weird<name>:file"), "weird_name__file");
    }

    #[test]
    fn truncates_base_at_150_chars() {
        let long = "a".repeat(200);
        assert_eq!(sanitize_base(&long).len(), 150);
    }

    #[test]
    fn filename_collisions_get_numeric_suffix() {
        let existing = vec!["123_photo.jpg".to_string()];
        let name = filename_for("123", "https://cdn.example.com/photo.jpg", &existing);
        assert_eq!(name, "123_photo_1.jpg");
    }

    #[test]
    fn channel_type_maps_to_server_conversation_with_guild_title() {
        let info = ChannelInfo {
            channel_type: "GUILD_TEXT".into(),
            name: Some("general".into()),
            guild: Some(GuildInfo { name: "My Server".into() }),
        };
        let (conv_type, title) = conversation_title(&info);
        assert_eq!(conv_type, ConversationType::Server);
        assert_eq!(title, "general in My Server");
    }
}
