//! Core data model shared across the registry, preprocessors, and processors.
//!
//! See the data model section of the design notes for the invariants each
//! type is expected to uphold (identity, lifecycle, ownership).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Broad media kind, derived from the corrected extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Other,
}

/// The unit of interest after media/metadata matching.
///
/// Identity is `(content_hash)` across an entire run, and `(source_path)`
/// within a single preprocessor. Mutated exactly twice after creation:
/// once when matching attaches metadata, once when extension correction
/// runs. Never mutated after copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub source_path: PathBuf,
    pub original_filename: String,
    pub category: MediaCategory,
    pub content_hash: Option<String>,
    pub declared_extension: String,
    pub corrected_extension: String,
    pub mime: Option<String>,
    pub size_bytes: u64,
    pub metadata: serde_json::Value,
}

/// One native-metadata record from a source's own format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Derived match key (filename stem, ID, or timestamp, depending on source).
    pub match_key: String,
    pub content: serde_json::Value,
    pub matched: bool,
}

impl MetadataEntry {
    pub fn new(match_key: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            match_key: match_key.into(),
            content,
            matched: false,
        }
    }
}

/// Source-specific location from which a duplicate content hash was
/// referenced a second (or further) time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MatchContext {
    Discord { channel_id: String, message_id: String },
    IMessage { conversation_id: String, message_index: usize },
    GooglePhotos { album_name: String },
    GoogleChat { conversation_id: String, message_index: usize },
    Snapchat { conversation_id: String, message_index: usize },
    Generic { location: String },
}

/// A single hash registry entry: the canonical output file plus every
/// context that referenced the same bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashRecord {
    pub first_filename: String,
    pub first_source_path: PathBuf,
    pub contexts: Vec<MatchContext>,
}

/// `content_hash -> HashRecord` map with single-writer-per-hash semantics.
///
/// Every duplicate context appended to a hash's record resolves to the same
/// output filename (invariant from the data model section).
#[derive(Default)]
pub struct HashRegistry {
    inner: Mutex<HashMap<String, HashRecord>>,
}

impl HashRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `hash` for `filename`/`source_path` if it is not yet present,
    /// otherwise appends `context` to the existing record. Returns `true`
    /// when this call was the first writer (i.e. the caller should actually
    /// copy the file), `false` when it was a duplicate.
    pub fn claim(
        &self,
        hash: &str,
        filename: &str,
        source_path: &PathBuf,
        context: MatchContext,
    ) -> bool {
        let mut guard = self.inner.lock().expect("hash registry mutex poisoned");
        match guard.get_mut(hash) {
            Some(record) => {
                record.contexts.push(context);
                false
            }
            None => {
                guard.insert(
                    hash.to_string(),
                    HashRecord {
                        first_filename: filename.to_string(),
                        first_source_path: source_path.clone(),
                        contexts: vec![context],
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, hash: &str) -> Option<HashRecord> {
        self.inner.lock().expect("hash registry mutex poisoned").get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("hash registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> HashMap<String, HashRecord> {
        self.inner.into_inner().expect("hash registry mutex poisoned")
    }
}

/// Conversation type tag, common across message-based sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Dm,
    Group,
    Server,
    Space,
    Other,
}

/// A single message within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub sender: String,
    pub created: DateTime<Utc>,
    pub content: Option<String>,
    pub media_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Per-source grouping of messages, keyed by a stable identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub conversation_type: ConversationType,
    pub title: String,
    pub messages: Vec<MessageRecord>,
}

impl ConversationRecord {
    /// Sorts `messages` by creation time, the invariant required before emission.
    pub fn sort_messages(&mut self) {
        self.messages.sort_by_key(|m| m.created);
    }
}

/// One orphaned-media entry as recorded by the failure tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanedMedia {
    pub file_path: PathBuf,
    pub reason: String,
    pub context: serde_json::Value,
}

/// One orphaned-metadata entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanedMetadata {
    pub metadata_entry: serde_json::Value,
    pub reason: String,
    pub context: serde_json::Value,
}

/// One processing-failure entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingFailure {
    pub file_path: PathBuf,
    pub metadata: serde_json::Value,
    pub reason: String,
    pub error_details: String,
    pub context: serde_json::Value,
}

/// The three disjoint failure lists, serialized verbatim in `failure-report.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureReport {
    pub processor_name: String,
    pub export_directory: String,
    pub timestamp: String,
    pub summary: FailureSummary,
    pub failed_matching: FailedMatching,
    pub failed_processing: Vec<ProcessingFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureSummary {
    pub total_failures: usize,
    pub failed_matching: usize,
    pub failed_processing: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailedMatching {
    pub orphaned_media: Vec<OrphanedMedia>,
    pub orphaned_metadata: Vec<OrphanedMetadata>,
}

/// Top-level MIME category used by the same-category extension-correction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeCategory {
    Image,
    Video,
    Audio,
    Other,
}

impl From<MimeCategory> for MediaCategory {
    fn from(value: MimeCategory) -> Self {
        match value {
            MimeCategory::Image => MediaCategory::Image,
            MimeCategory::Video => MediaCategory::Video,
            MimeCategory::Audio => MediaCategory::Audio,
            MimeCategory::Other => MediaCategory::Other,
        }
    }
}

/// A selected, immutable-for-the-process-lifetime hardware or software encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderProfile {
    pub name: String,
    pub is_hardware: bool,
    /// Arguments that must precede `-i` on the command line (VAAPI only).
    pub input_args: Vec<String>,
    /// Constant-quality output arguments, e.g. `-cq 18` for NVENC.
    pub quality_args: Vec<String>,
}

impl EncoderProfile {
    pub fn software() -> Self {
        Self {
            name: "libx265".to_string(),
            is_hardware: false,
            input_args: Vec::new(),
            quality_args: vec!["-c:v".into(), "libx265".into(), "-crf".into(), "18".into()],
        }
    }

    /// Bitrate-mode output arguments for a target bitrate in bits/sec, per
    /// the 1.15x headroom / 1.2x maxrate / 2x bufsize rule.
    pub fn bitrate_args(&self, target_bps: u64) -> Vec<String> {
        let scaled = (target_bps as f64 * 1.15) as u64;
        let maxrate = (target_bps as f64 * 1.2) as u64;
        let bufsize = target_bps * 2;
        let codec_flag: Vec<String> = match self.name.as_str() {
            "hevc_nvenc" | "hevc_videotoolbox" | "hevc_vaapi" | "hevc_qsv" | "hevc_amf" => {
                vec!["-c:v".into(), self.name.clone()]
            }
            _ => vec!["-c:v".into(), "libx265".into()],
        };
        let mut args = codec_flag;
        args.extend([
            "-b:v".into(),
            format!("{scaled}"),
            "-maxrate".into(),
            format!("{maxrate}"),
            "-bufsize".into(),
            format!("{bufsize}"),
        ]);
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_registry_first_writer_claims() {
        let registry = HashRegistry::new();
        let claimed = registry.claim(
            "abc123",
            "photo.jpg",
            &PathBuf::from("/a/photo.jpg"),
            MatchContext::Generic { location: "album1".into() },
        );
        assert!(claimed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn hash_registry_duplicate_appends_context() {
        let registry = HashRegistry::new();
        registry.claim(
            "abc123",
            "photo.jpg",
            &PathBuf::from("/a/photo.jpg"),
            MatchContext::Generic { location: "album1".into() },
        );
        let claimed_again = registry.claim(
            "abc123",
            "photo-dup.jpg",
            &PathBuf::from("/b/photo-dup.jpg"),
            MatchContext::Generic { location: "album2".into() },
        );
        assert!(!claimed_again);
        let record = registry.get("abc123").unwrap();
        assert_eq!(record.first_filename, "photo.jpg");
        assert_eq!(record.contexts.len(), 2);
    }

    #[test]
    fn conversation_sorts_messages_by_time() {
        use chrono::TimeZone;
        let mut conv = ConversationRecord {
            id: "c1".into(),
            conversation_type: ConversationType::Dm,
            title: "Alice".into(),
            messages: vec![
                MessageRecord {
                    sender: "alice".into(),
                    created: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
                    content: None,
                    media_files: vec![],
                    metadata: None,
                },
                MessageRecord {
                    sender: "alice".into(),
                    created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                    content: None,
                    media_files: vec![],
                    metadata: None,
                },
            ],
        };
        conv.sort_messages();
        assert!(conv.messages[0].created < conv.messages[1].created);
    }
}
