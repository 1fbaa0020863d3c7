//! Batch EXIF/XMP metadata embedding, shared by every per-source processor (4.I).

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use exiftool::ExifTool;
use log::{error, info};
use serde::Serialize;

use crate::error::{AppError, AppResult};

thread_local! {
    static EXIFTOOL: RefCell<Option<ExifTool>> = const { RefCell::new(None) };
}

/// One file's worth of tags to write, keyed by exiftool tag name.
#[derive(Debug, Clone, Serialize)]
pub struct TagWrite {
    #[serde(rename = "SourceFile")]
    pub source_file: PathBuf,
    #[serde(flatten)]
    pub tags: serde_json::Value,
}

/// The outcome of one file's tag write within a batch.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Writes all `writes` in as few batched exiftool invocations as possible,
/// chunked at 500 files per the subprocess-timeout budget. Per-file failures
/// are reported individually rather than aborting the batch.
pub fn write_tags_batch(writes: &[TagWrite]) -> AppResult<Vec<WriteOutcome>> {
    let mut outcomes = Vec::with_capacity(writes.len());
    for chunk in writes.chunks(500) {
        outcomes.extend(write_chunk(chunk)?);
    }
    Ok(outcomes)
}

fn write_chunk(chunk: &[TagWrite]) -> AppResult<Vec<WriteOutcome>> {
    let json_payload = serde_json::to_string(chunk)?;

    let result = EXIFTOOL.with(|cell| -> AppResult<String> {
        let mut slot = cell.borrow_mut();
        if slot.is_none() {
            *slot = Some(ExifTool::new().map_err(|e| AppError::Generic(format!("failed to start exiftool: {e}")))?);
        }
        let tool = slot.as_mut().expect("just initialized");
        tool.execute(&["-json", "-overwrite_original", "-@-", &json_payload])
            .map_err(|e| AppError::Subprocess { tool: "exiftool".into(), status: None, stderr: e.to_string() })
    });

    match result {
        Ok(_) => Ok(chunk
            .iter()
            .map(|w| WriteOutcome { path: w.source_file.clone(), succeeded: true, error: None })
            .collect()),
        Err(e) => {
            error!("batch exiftool write failed, falling back to per-file: {e}");
            Ok(write_individually(chunk))
        }
    }
}

/// Fallback path when a batch write fails wholesale: retries each file on
/// its own so one bad tag value doesn't sink the whole chunk.
fn write_individually(chunk: &[TagWrite]) -> Vec<WriteOutcome> {
    chunk
        .iter()
        .map(|write| {
            let single = serde_json::to_string(&[write]);
            let outcome = EXIFTOOL.with(|cell| -> Result<(), String> {
                let mut slot = cell.borrow_mut();
                let tool = slot.as_mut().ok_or("exiftool not initialized")?;
                let payload = single.as_ref().map_err(|e| e.to_string())?;
                tool.execute(&["-json", "-overwrite_original", "-@-", payload]).map_err(|e| e.to_string())?;
                Ok(())
            });
            match outcome {
                Ok(()) => WriteOutcome { path: write.source_file.clone(), succeeded: true, error: None },
                Err(e) => {
                    info!("failed to write tags to {}: {e}", write.source_file.display());
                    WriteOutcome { path: write.source_file.clone(), succeeded: false, error: Some(e) }
                }
            }
        })
        .collect()
}

/// Sets the filesystem modification (and access) time on `path` to `epoch_seconds`.
pub fn set_file_time(path: &Path, epoch_seconds: i64) -> AppResult<()> {
    let time = filetime::FileTime::from_unix_time(epoch_seconds, 0);
    filetime::set_file_times(path, time, time)?;
    Ok(())
}
