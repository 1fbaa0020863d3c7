//! Accumulates orphaned media, orphaned metadata, and processing failures,
//! then emits a JSON report and organizes failed files for manual review.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::models::{
    FailedMatching, FailureReport, FailureSummary, OrphanedMedia, OrphanedMetadata,
    ProcessingFailure,
};

/// Thread-safe accumulator for one preprocessor's run. Writes happen during
/// scan and match; `handle_failures` performs the single read at the end.
pub struct FailureTracker {
    processor_name: String,
    export_directory: String,
    timestamp: String,
    orphaned_media: Mutex<Vec<OrphanedMedia>>,
    orphaned_metadata: Mutex<Vec<OrphanedMetadata>>,
    processing_failures: Mutex<Vec<ProcessingFailure>>,
}

impl FailureTracker {
    pub fn new(processor_name: impl Into<String>, export_directory: impl Into<String>) -> Self {
        Self {
            processor_name: processor_name.into(),
            export_directory: export_directory.into(),
            timestamp: Utc::now().to_rfc3339(),
            orphaned_media: Mutex::new(Vec::new()),
            orphaned_metadata: Mutex::new(Vec::new()),
            processing_failures: Mutex::new(Vec::new()),
        }
    }

    pub fn add_orphaned_media(&self, media_path: PathBuf, reason: impl Into<String>, mut context: serde_json::Value) {
        if context.get("file_size").is_none() {
            if let Ok(meta) = fs::metadata(&media_path) {
                context["file_size"] = serde_json::json!(meta.len());
            }
        }
        debug!("tracked orphaned media: {}", media_path.display());
        self.orphaned_media.lock().expect("poisoned").push(OrphanedMedia {
            file_path: media_path,
            reason: reason.into(),
            context,
        });
    }

    pub fn add_orphaned_metadata(&self, metadata_entry: serde_json::Value, reason: impl Into<String>, context: serde_json::Value) {
        debug!("tracked orphaned metadata");
        self.orphaned_metadata.lock().expect("poisoned").push(OrphanedMetadata {
            metadata_entry,
            reason: reason.into(),
            context,
        });
    }

    pub fn add_processing_failure(
        &self,
        file_path: PathBuf,
        metadata: serde_json::Value,
        reason: impl Into<String>,
        error_details: impl Into<String>,
        context: serde_json::Value,
    ) {
        debug!("tracked processing failure: {}", file_path.display());
        self.processing_failures.lock().expect("poisoned").push(ProcessingFailure {
            file_path,
            metadata,
            reason: reason.into(),
            error_details: error_details.into(),
            context,
        });
    }

    pub fn has_failures(&self) -> bool {
        !self.orphaned_media.lock().expect("poisoned").is_empty()
            || !self.orphaned_metadata.lock().expect("poisoned").is_empty()
            || !self.processing_failures.lock().expect("poisoned").is_empty()
    }

    pub fn summary(&self) -> FailureSummary {
        let om = self.orphaned_media.lock().expect("poisoned").len();
        let omd = self.orphaned_metadata.lock().expect("poisoned").len();
        let pf = self.processing_failures.lock().expect("poisoned").len();
        let failed_matching = om + omd;
        FailureSummary {
            total_failures: failed_matching + pf,
            failed_matching,
            failed_processing: pf,
        }
    }

    pub fn generate_report(&self) -> FailureReport {
        FailureReport {
            processor_name: self.processor_name.clone(),
            export_directory: self.export_directory.clone(),
            timestamp: self.timestamp.clone(),
            summary: self.summary(),
            failed_matching: FailedMatching {
                orphaned_media: self.orphaned_media.lock().expect("poisoned").clone(),
                orphaned_metadata: self.orphaned_metadata.lock().expect("poisoned").clone(),
            },
            failed_processing: self.processing_failures.lock().expect("poisoned").clone(),
        }
    }

    /// Copies each orphaned media file into `{output_dir}/issues/failed-matching/media/`,
    /// preserving basenames and resolving collisions with a numeric suffix.
    fn copy_orphaned_media(&self, output_dir: &Path) {
        let mut entries = self.orphaned_media.lock().expect("poisoned");
        if entries.is_empty() {
            return;
        }
        let dest_dir = output_dir.join("issues").join("failed-matching").join("media");
        if let Err(e) = fs::create_dir_all(&dest_dir) {
            error!("failed to create failed-matching media dir: {e}");
            return;
        }
        info!("copying {} orphaned media files...", entries.len());
        let mut copied = 0usize;
        for entry in entries.iter_mut() {
            if !entry.file_path.exists() {
                warn!("orphaned media file no longer exists: {}", entry.file_path.display());
                entry.context["copy_error"] = serde_json::json!("Source file not found");
                continue;
            }
            let dest_path = unique_destination(&dest_dir, &entry.file_path);
            match fs::copy(&entry.file_path, &dest_path) {
                Ok(_) => {
                    if let Ok(rel) = dest_path.strip_prefix(output_dir) {
                        entry.context["copied_to"] = serde_json::json!(rel.to_string_lossy());
                    }
                    copied += 1;
                }
                Err(e) => {
                    error!("failed to copy orphaned media {}: {e}", entry.file_path.display());
                    entry.context["copy_error"] = serde_json::json!(e.to_string());
                }
            }
        }
        info!("copied {copied}/{} orphaned media files", entries.len());
    }

    /// Writes each orphaned metadata entry as a pretty-printed JSON file
    /// under `{output_dir}/issues/failed-matching/metadata/`.
    fn save_orphaned_metadata(&self, output_dir: &Path) {
        let mut entries = self.orphaned_metadata.lock().expect("poisoned");
        if entries.is_empty() {
            return;
        }
        let dest_dir = output_dir.join("issues").join("failed-matching").join("metadata");
        if let Err(e) = fs::create_dir_all(&dest_dir) {
            error!("failed to create failed-matching metadata dir: {e}");
            return;
        }
        info!("saving {} orphaned metadata entries...", entries.len());
        let mut saved = 0usize;
        for (idx, entry) in entries.iter_mut().enumerate() {
            let filename = derive_metadata_filename(&entry.metadata_entry, idx);
            let mut dest_path = dest_dir.join(format!("{filename}.json"));
            let mut counter = 1;
            while dest_path.exists() {
                dest_path = dest_dir.join(format!("{filename}_{counter}.json"));
                counter += 1;
            }
            match serde_json::to_string_pretty(&entry.metadata_entry) {
                Ok(json) => match fs::write(&dest_path, json) {
                    Ok(()) => {
                        if let Ok(rel) = dest_path.strip_prefix(output_dir) {
                            entry.context["metadata_saved_to"] = serde_json::json!(rel.to_string_lossy());
                        }
                        saved += 1;
                    }
                    Err(e) => {
                        error!("failed to save orphaned metadata to {}: {e}", dest_path.display());
                        entry.context["save_error"] = serde_json::json!(e.to_string());
                    }
                },
                Err(e) => {
                    error!("failed to serialize orphaned metadata: {e}");
                    entry.context["save_error"] = serde_json::json!(e.to_string());
                }
            }
        }
        info!("saved {saved}/{} orphaned metadata entries", entries.len());
    }

    fn save_report(&self, output_dir: &Path) {
        if !self.has_failures() {
            info!("no failures to report");
            return;
        }
        let issues_dir = output_dir.join("issues");
        if let Err(e) = fs::create_dir_all(&issues_dir) {
            error!("failed to create issues dir: {e}");
            return;
        }
        let report_path = issues_dir.join("failure-report.json");
        let report = self.generate_report();
        match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                if let Err(e) = fs::write(&report_path, json) {
                    error!("failed to save failure report to {}: {e}", report_path.display());
                } else {
                    info!("failure report saved to: {}", report_path.display());
                }
            }
            Err(e) => error!("failed to serialize failure report: {e}"),
        }
    }

    /// Copies orphans, saves orphaned metadata, and writes `failure-report.json`,
    /// in that order. Called once per preprocessor at the end of its run.
    pub fn handle_failures(&self, output_dir: &Path) {
        if !self.has_failures() {
            return;
        }
        info!("handling failures for {}...", self.processor_name);
        self.copy_orphaned_media(output_dir);
        self.save_orphaned_metadata(output_dir);
        self.save_report(output_dir);
        let summary = self.summary();
        info!(
            "failure handling complete: {} matching failures, {} processing failures",
            summary.failed_matching, summary.failed_processing
        );
    }
}

fn unique_destination(dest_dir: &Path, source_path: &Path) -> PathBuf {
    let mut dest_path = dest_dir.join(source_path.file_name().unwrap_or_default());
    if !dest_path.exists() {
        return dest_path;
    }
    let stem = source_path.file_stem().and_then(|s| s.to_str()).unwrap_or("file").to_string();
    let suffix = source_path.extension().and_then(|s| s.to_str()).map(|s| format!(".{s}")).unwrap_or_default();
    let mut counter = 1;
    while dest_path.exists() {
        dest_path = dest_dir.join(format!("{stem}_{counter}{suffix}"));
        counter += 1;
    }
    dest_path
}

/// Derives a sanitized filename from a title-like field in `metadata`, or
/// falls back to a zero-padded index.
fn derive_metadata_filename(metadata: &serde_json::Value, idx: usize) -> String {
    let candidate = ["title", "name", "filename", "media_filename", "file_name"]
        .iter()
        .find_map(|field| metadata.get(field).and_then(|v| v.as_str()))
        .map(|s| Path::new(s).file_stem().and_then(|s| s.to_str()).unwrap_or(s).to_string());

    let raw = candidate.unwrap_or_else(|| format!("orphaned_metadata_{idx:04}"));
    sanitize(&raw)
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn summary_counts_across_three_lists() {
        let tracker = FailureTracker::new("Test", "/tmp/export");
        tracker.add_orphaned_media(PathBuf::from("/a"), "no metadata", serde_json::json!({}));
        tracker.add_orphaned_media(PathBuf::from("/b"), "no metadata", serde_json::json!({}));
        tracker.add_orphaned_metadata(serde_json::json!({"title": "x"}), "no media", serde_json::json!({}));
        tracker.add_processing_failure(PathBuf::from("/c"), serde_json::json!({}), "encode failed", "stderr", serde_json::json!({}));
        let summary = tracker.summary();
        assert_eq!(summary.total_failures, 4);
        assert_eq!(summary.failed_matching, 3);
        assert_eq!(summary.failed_processing, 1);
    }

    #[test]
    fn handle_failures_emits_report_and_copies() {
        let dir = tempdir().unwrap();
        let media_file = dir.path().join("orphan.jpg");
        fs::write(&media_file, b"fake jpeg bytes").unwrap();

        let output_dir = dir.path().join("out");
        fs::create_dir_all(&output_dir).unwrap();

        let tracker = FailureTracker::new("Test", dir.path().to_string_lossy());
        tracker.add_orphaned_media(media_file.clone(), "no metadata", serde_json::json!({}));
        tracker.add_orphaned_metadata(serde_json::json!({"title": "lonely"}), "no media", serde_json::json!({}));
        tracker.add_processing_failure(PathBuf::from("/c"), serde_json::json!({}), "boom", "stderr", serde_json::json!({}));

        tracker.handle_failures(&output_dir);

        assert!(output_dir.join("issues/failed-matching/media/orphan.jpg").exists());
        assert!(output_dir.join("issues/failed-matching/metadata/lonely.json").exists());
        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(output_dir.join("issues/failure-report.json")).unwrap()).unwrap();
        assert_eq!(report["summary"]["total_failures"], 3);
    }

    #[test]
    fn filename_collisions_get_numeric_suffix() {
        let dir = tempdir().unwrap();
        let dest_dir = dir.path().join("dest");
        fs::create_dir_all(&dest_dir).unwrap();
        fs::write(dest_dir.join("photo.jpg"), b"existing").unwrap();

        let source = dir.path().join("photo.jpg");
        fs::write(&source, b"new").unwrap();

        let unique = unique_destination(&dest_dir, &source);
        assert_eq!(unique.file_name().unwrap().to_str().unwrap(), "photo_1.jpg");
    }

    #[test]
    fn metadata_filename_sanitized() {
        let name = sanitize("weird/name:with*chars");
        assert_eq!(name, "weird_name_with_chars");
    }

    #[test]
    fn no_failures_skips_report() {
        let dir = tempdir().unwrap();
        let tracker = FailureTracker::new("Test", "/tmp/export");
        tracker.handle_failures(dir.path());
        assert!(!dir.path().join("issues").exists());
    }
}
