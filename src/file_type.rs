//! Magic-byte MIME detection and extension correction with same-category policy.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::models::MimeCategory;

/// Result of [`infer_file_type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredType {
    pub mime: Option<String>,
    pub extension: String,
    pub category: MimeCategory,
}

/// Reads `path`'s magic bytes and returns a corrected extension.
///
/// When inference fails, or `allow_cross_category` is false and the
/// inferred category differs from the declared one, the declared
/// extension is retained (correction suppressed).
pub fn infer_file_type(path: &Path, declared_filename: &str, allow_cross_category: bool) -> InferredType {
    let declared_ext = extension_of(declared_filename);
    let declared_category = category_for_extension(&declared_ext);

    let sniffed = sniff(path);

    match sniffed {
        Some((mime, ext, category)) => {
            if !allow_cross_category && category != declared_category && declared_category != MimeCategory::Other {
                InferredType {
                    mime: Some(mime),
                    extension: declared_ext,
                    category: declared_category,
                }
            } else {
                InferredType { mime: Some(mime), extension: ext, category }
            }
        }
        None => InferredType {
            mime: None,
            extension: declared_ext,
            category: declared_category,
        },
    }
}

fn sniff(path: &Path) -> Option<(String, String, MimeCategory)> {
    if let Ok(Some(kind)) = infer::get_from_path(path) {
        let mime = kind.mime_type().to_string();
        let ext = kind.extension().to_string();
        let category = category_for_mime(&mime);
        return Some((mime, ext, category));
    }
    signature_fallback(path)
}

/// Reads the leading bytes of `path` and applies a hand-coded signature
/// table, used only when the `infer` crate's magic database can't classify
/// the file (too short, permission denied, or unrecognized format).
fn signature_fallback(path: &Path) -> Option<(String, String, MimeCategory)> {
    let mut file = File::open(path).ok()?;
    let mut header = [0u8; 32];
    let n = file.read(&mut header).ok()?;
    let header = &header[..n];

    if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(("image/jpeg".into(), "jpg".into(), MimeCategory::Image));
    }
    if header.starts_with(b"\x89PNG") {
        return Some(("image/png".into(), "png".into(), MimeCategory::Image));
    }
    if header.len() >= 6 && &header[0..3] == b"GIF" && (header[3..6] == *b"87a" || header[3..6] == *b"89a") {
        return Some(("image/gif".into(), "gif".into(), MimeCategory::Image));
    }
    if header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WEBP" {
        return Some(("image/webp".into(), "webp".into(), MimeCategory::Image));
    }
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return classify_ebml(path);
    }
    if header.len() >= 8 && &header[4..8] == b"ftyp" {
        return Some(("video/mp4".into(), "mp4".into(), MimeCategory::Video));
    }
    classify_mov_atoms(path)
}

/// QuickTime/MOV files sometimes lead with a `free` or `wide` atom before
/// the box carrying useful data, so the `moov`/`mdat` type tags can't be
/// assumed to sit at a fixed offset the way `ftyp` can. Scan the leading
/// 4 KiB for either tag instead.
fn classify_mov_atoms(path: &Path) -> Option<(String, String, MimeCategory)> {
    let mut file = File::open(path).ok()?;
    let mut buf = vec![0u8; 4096];
    let n = file.read(&mut buf).ok()?;
    buf.truncate(n);
    if buf.windows(4).any(|w| w == b"moov" || w == b"mdat") {
        Some(("video/quicktime".into(), "mov".into(), MimeCategory::Video))
    } else {
        None
    }
}

/// Distinguishes WebM from MKV by scanning the next 4 KiB for the ASCII
/// tag "webm", which appears in the EBML DocType element.
fn classify_ebml(path: &Path) -> Option<(String, String, MimeCategory)> {
    let mut file = File::open(path).ok()?;
    let mut buf = vec![0u8; 4096];
    let n = file.read(&mut buf).ok()?;
    buf.truncate(n);
    if buf.windows(4).any(|w| w == b"webm") {
        Some(("video/webm".into(), "webm".into(), MimeCategory::Video))
    } else {
        Some(("video/x-matroska".into(), "mkv".into(), MimeCategory::Video))
    }
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn category_for_extension(ext: &str) -> MimeCategory {
    match ext {
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "heif" | "bmp" | "tiff" => MimeCategory::Image,
        "mp4" | "mov" | "mkv" | "webm" | "avi" | "m4v" | "3gp" => MimeCategory::Video,
        "mp3" | "m4a" | "wav" | "ogg" | "opus" | "flac" => MimeCategory::Audio,
        "" => MimeCategory::Other,
        _ => MimeCategory::Other,
    }
}

fn category_for_mime(mime: &str) -> MimeCategory {
    if let Some(top) = mime.split('/').next() {
        match top {
            "image" => MimeCategory::Image,
            "video" => MimeCategory::Video,
            "audio" => MimeCategory::Audio,
            _ => MimeCategory::Other,
        }
    } else {
        MimeCategory::Other
    }
}
