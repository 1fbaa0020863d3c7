//! Discord duplicate-attachment dedup, scoped to the registry logic itself.
//!
//! The full scenario (the same CDN URL attached to messages in two
//! different channels, downloaded once, referenced by two contexts) needs a
//! real HTTP endpoint to exercise end-to-end; none of the example repos
//! this crate is grounded on depend on a mock-HTTP-server crate, so
//! fabricating one here would be introducing an ungrounded dependency.
//! What's deterministic and worth covering directly is the claim/context
//! bookkeeping `discord.rs` relies on to get `stats.duplicate_files` right.

use std::path::PathBuf;

use memoria::config::RunConfig;
use memoria::models::{HashRegistry, MatchContext};
use memoria::processors::discord::DiscordProcessor;
use memoria::registry::Processor;
use std::fs;

#[test]
fn same_url_across_two_channels_claims_once_and_appends_second_context() {
    let registry = HashRegistry::new();
    let hash = "deadbeefcafef00d";
    let dest = "123456_attachment.png";

    let first = registry.claim(
        hash,
        dest,
        &PathBuf::from("/tmp/media/123456_attachment.png"),
        MatchContext::Discord { channel_id: "111".into(), message_id: "123456".into() },
    );
    let second = registry.claim(
        hash,
        dest,
        &PathBuf::from("/tmp/media/789012_attachment.png"),
        MatchContext::Discord { channel_id: "222".into(), message_id: "789012".into() },
    );

    assert!(first, "first writer for this hash should claim it");
    assert!(!second, "second writer with the same hash is a duplicate");

    let record = registry.get(hash).unwrap();
    assert_eq!(record.first_filename, dest);
    assert_eq!(record.contexts.len(), 2);

    // Mirrors the stats Discord's manifest would report: one unique file,
    // one duplicate reference to it.
    let unique_files = registry.len();
    let duplicate_files = record.contexts.len() - 1;
    assert_eq!(unique_files, 1);
    assert_eq!(duplicate_files, 1);
}

#[test]
fn detect_requires_messages_index_json() {
    let dir = tempfile::tempdir().unwrap();
    assert!(!DiscordProcessor.detect(dir.path()));

    fs::create_dir_all(dir.path().join("Messages")).unwrap();
    fs::write(dir.path().join("Messages").join("index.json"), b"{}").unwrap();
    assert!(DiscordProcessor.detect(dir.path()));
}

/// With `skip_upload` set, Discord builds message records without touching
/// the network at all, which exercises the full `process()` pipeline
/// deterministically.
#[test]
fn skip_upload_processes_messages_without_downloading() {
    let root = tempfile::tempdir().unwrap();
    let input_dir = root.path().join("export");
    let output_dir = root.path().join("output");

    let messages_root = input_dir.join("Messages");
    fs::create_dir_all(&messages_root).unwrap();
    fs::write(messages_root.join("index.json"), br#"{"111": "general"}"#).unwrap();

    let channel_dir = messages_root.join("c111");
    fs::create_dir_all(&channel_dir).unwrap();
    fs::write(channel_dir.join("channel.json"), br#"{"type": "GUILD_TEXT", "name": "general", "guild": {"name": "Test Server"}}"#).unwrap();
    fs::write(
        channel_dir.join("messages.json"),
        br#"{"messages": [{"ID": "1", "Timestamp": "2021-01-01T00:00:00+00:00", "Contents": "hello", "Attachments": ["https://cdn.example.com/photo.png"]}]}"#,
    )
    .unwrap();

    let mut config = RunConfig::new(input_dir.clone());
    config.skip_upload = true;
    DiscordProcessor.process(&input_dir, &output_dir, &config).unwrap();

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output_dir.join("metadata.json")).unwrap()).unwrap();
    let conversations = manifest["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    let messages = conversations[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "hello");
    assert!(messages[0]["media_files"].as_array().unwrap().is_empty());
}
