//! Image alpha-compositing and the four-pass video overlay+mux state machine.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use image::imageops::FilterType;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{AppError, AppResult};
use crate::models::EncoderProfile;
use crate::subprocess::run_with_timeout;
use crate::video_encoder::{self, is_hardware_acceleration_error};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const ENCODE_TIMEOUT: Duration = Duration::from_secs(300);

/// Metadata describing the overlay's source, embedded into the final video
/// as a description/comment pair by Pass 4.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayMetadata {
    pub date: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub conversation_type: Option<String>,
    pub conversation_id: Option<String>,
    pub conversation_title: Option<String>,
    pub sender: Option<String>,
    pub content: Option<String>,
}

/// Composites `overlay_image` onto `base_image`, writing to `output_path`.
/// Flattens onto white for JPEG output. Returns `false` on any failure,
/// leaving no partial output.
pub fn create_image_with_overlay(base_image: &Path, overlay_image: &Path, output_path: &Path, jpeg_quality: u8) -> bool {
    if !overlay_image.exists() {
        warn!("overlay file does not exist: {}", overlay_image.display());
        return false;
    }

    let base = match image::open(base_image) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            error!("error opening base image {}: {e}", base_image.display());
            return false;
        }
    };

    let overlay = match image::open(overlay_image) {
        Ok(img) => img.to_rgba8(),
        Err(e) => {
            error!("cannot open overlay file (possibly corrupted): {}: {e}", overlay_image.display());
            return false;
        }
    };

    let (bw, bh) = (base.width(), base.height());
    let overlay = if overlay.width() != bw || overlay.height() != bh {
        image::imageops::resize(&overlay, bw, bh, FilterType::Lanczos3)
    } else {
        overlay
    };

    let mut composited = base;
    image::imageops::overlay(&mut composited, &overlay, 0, 0);

    let is_jpeg = output_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false);

    let result = if is_jpeg {
        let mut rgb = image::RgbImage::new(composited.width(), composited.height());
        for (dst, src) in rgb.pixels_mut().zip(composited.pixels()) {
            let [r, g, b, a] = src.0;
            let af = a as f32 / 255.0;
            *dst = image::Rgb([
                (r as f32 * af + 255.0 * (1.0 - af)) as u8,
                (g as f32 * af + 255.0 * (1.0 - af)) as u8,
                (b as f32 * af + 255.0 * (1.0 - af)) as u8,
            ]);
        }
        let mut out = std::fs::File::create(output_path);
        match out {
            Ok(ref mut f) => {
                let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(f, jpeg_quality);
                encoder.encode_image(&rgb)
            }
            Err(e) => Err(image::ImageError::IoError(e)),
        }
    } else {
        composited.save(output_path)
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            error!("error saving composited image: {e}");
            let _ = std::fs::remove_file(output_path);
            false
        }
    }
}

struct Pass1Output {
    path: PathBuf,
    width: u32,
    height: u32,
    original_bitrate: Option<u64>,
}

/// Probes display-matrix rotation, normalized into `0..360`. `None` if
/// absent or unparseable.
fn probe_rotation(video_path: &Path) -> Option<i32> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v", "error", "-select_streams", "v:0", "-show_entries",
        "stream_tags=rotate:stream_side_data=rotation", "-of", "default=noprint_wrappers=1:nokey=1",
    ]);
    cmd.arg(video_path);
    let output = run_with_timeout(cmd, PROBE_TIMEOUT).ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let first_line = text.trim().lines().next()?;
    let value: f64 = first_line.trim().parse().ok()?;
    let normalized = ((value % 360.0) + 360.0) % 360.0;
    if normalized == 0.0 {
        None
    } else {
        Some(normalized as i32)
    }
}

fn probe_dimensions(video_path: &Path) -> AppResult<(u32, u32)> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v", "error", "-select_streams", "v:0", "-show_entries", "stream=width,height", "-of", "csv=s=x:p=0",
    ]);
    cmd.arg(video_path);
    let output = run_with_timeout(cmd, PROBE_TIMEOUT)?;
    let text = String::from_utf8_lossy(&output.stdout).trim().trim_end_matches('x').to_string();
    let parts: Vec<&str> = text.split('x').collect();
    if parts.len() != 2 {
        return Err(AppError::Subprocess {
            tool: "ffprobe".into(),
            status: output.status_code,
            stderr: format!("failed to parse video dimensions: '{text}'"),
        });
    }
    let w: u32 = parts[0].parse().map_err(|_| AppError::Parsing(format!("bad width: {}", parts[0])))?;
    let h: u32 = parts[1].parse().map_err(|_| AppError::Parsing(format!("bad height: {}", parts[1])))?;
    Ok((w, h))
}

fn rotation_filter(rotation: i32) -> Option<&'static str> {
    match rotation {
        90 => Some("transpose=2"),
        180 => Some("hflip,vflip"),
        270 => Some("transpose=1"),
        _ => None,
    }
}

/// PASS 1: rotate and strip DISPLAYMATRIX side data, retrying once on
/// software if the hardware path reports a hardware-acceleration error.
fn pass1_rotate_video(video_path: &Path, rotation: Option<i32>) -> AppResult<Pass1Output> {
    match pass1_rotate_video_impl(video_path, rotation, true) {
        Ok(output) => Ok(output),
        Err(AppError::Subprocess { stderr, .. }) if is_hardware_acceleration_error(&stderr) => {
            warn!("[{}] hardware encoding failed in pass 1, falling back to software", video_path.display());
            pass1_rotate_video_impl(video_path, rotation, false)
        }
        Err(e) => Err(e),
    }
}

fn pass1_rotate_video_impl(video_path: &Path, rotation: Option<i32>, use_hardware: bool) -> AppResult<Pass1Output> {
    let original_bitrate = video_encoder::probe_bitrate(video_path);
    let (mut orig_w, mut orig_h) = probe_dimensions(video_path)?;
    if orig_w % 2 != 0 {
        orig_w += 1;
    }
    if orig_h % 2 != 0 {
        orig_h += 1;
    }

    let (target_w, target_h) = match rotation {
        Some(90) | Some(270) => (orig_h, orig_w),
        _ => (orig_w, orig_h),
    };

    let temp_rotated = NamedTempFile::with_suffix(".mp4")?;
    let (_temp_rotated_file, temp_path) = temp_rotated
        .keep()
        .map_err(|e| AppError::Generic(format!("failed to persist pass 1 temp file: {e}")))?;

    match rotation.and_then(rotation_filter) {
        Some(filter) => {
            let profile = if use_hardware { video_encoder::detect_encoder()? } else { EncoderProfile::software() };
            let combined_filter = if profile.name == "hevc_vaapi" {
                format!("hwdownload,format=nv12,{filter},sidedata=mode=delete:type=DISPLAYMATRIX,hwupload")
            } else {
                format!("{filter},sidedata=mode=delete:type=DISPLAYMATRIX")
            };

            let mut cmd = Command::new("ffmpeg");
            cmd.args(&profile.input_args);
            cmd.arg("-noautorotate").arg("-i").arg(video_path);
            cmd.arg("-vf").arg(&combined_filter);
            let output_args = match original_bitrate {
                Some(bps) => profile.bitrate_args(bps),
                None => profile.quality_args.clone(),
            };
            cmd.args(&output_args);
            cmd.args(["-c:a", "copy", "-y"]).arg(&temp_path);

            let output = run_with_timeout(cmd, ENCODE_TIMEOUT)?;
            if output.status_code != Some(0) {
                let _ = std::fs::remove_file(&temp_path);
                return Err(AppError::Subprocess {
                    tool: "ffmpeg".into(),
                    status: output.status_code,
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                });
            }
        }
        None => {
            std::fs::copy(video_path, &temp_path)?;
        }
    }

    debug!("[{}] pass 1 complete", video_path.display());
    Ok(Pass1Output { path: temp_path, width: target_w, height: target_h, original_bitrate })
}

/// PASS 2: scale overlay to match Pass 1's dimensions and composite it.
fn pass2_apply_overlay(
    rotated_video_path: &Path,
    overlay_path: &Path,
    target_width: u32,
    target_height: u32,
    original_bitrate: Option<u64>,
) -> AppResult<PathBuf> {
    match pass2_apply_overlay_impl(rotated_video_path, overlay_path, target_width, target_height, original_bitrate, true) {
        Ok(p) => Ok(p),
        Err(AppError::Subprocess { stderr, .. }) if is_hardware_acceleration_error(&stderr) => {
            warn!("[{}] hardware encoding failed in pass 2, falling back to software", rotated_video_path.display());
            pass2_apply_overlay_impl(rotated_video_path, overlay_path, target_width, target_height, original_bitrate, false)
        }
        Err(e) => Err(e),
    }
}

fn pass2_apply_overlay_impl(
    rotated_video_path: &Path,
    overlay_path: &Path,
    target_width: u32,
    target_height: u32,
    original_bitrate: Option<u64>,
    use_hardware: bool,
) -> AppResult<PathBuf> {
    if !overlay_path.exists() {
        return Err(AppError::Validation(format!("overlay file does not exist: {}", overlay_path.display())));
    }

    let overlay = image::open(overlay_path)
        .map_err(|e| AppError::Generic(format!("pass 2 overlay scaling failed - corrupted overlay: {e}")))?
        .to_rgba8();
    let scaled = if overlay.width() != target_width || overlay.height() != target_height {
        image::imageops::resize(&overlay, target_width, target_height, FilterType::Lanczos3)
    } else {
        overlay
    };

    let temp_overlay = NamedTempFile::with_suffix(".png")?;
    scaled.save(temp_overlay.path()).map_err(|e| AppError::Generic(format!("failed to save scaled overlay: {e}")))?;

    let temp_with_overlay = NamedTempFile::with_suffix(".mp4")?;
    let (_temp_with_overlay_file, temp_path) = temp_with_overlay
        .keep()
        .map_err(|e| AppError::Generic(format!("failed to persist pass 2 temp file: {e}")))?;

    let profile = if use_hardware { video_encoder::detect_encoder()? } else { EncoderProfile::software() };
    let filter_complex = if profile.name == "hevc_vaapi" {
        "[0:v]hwdownload,format=nv12[v0];[v0][1:v]overlay=0:0[v1];[v1]sidedata=mode=delete:type=DISPLAYMATRIX,hwupload".to_string()
    } else {
        "[0:v][1:v]overlay=0:0,sidedata=mode=delete:type=DISPLAYMATRIX".to_string()
    };

    let mut cmd = Command::new("ffmpeg");
    cmd.args(&profile.input_args);
    cmd.arg("-noautorotate").arg("-i").arg(rotated_video_path);
    cmd.arg("-i").arg(temp_overlay.path());
    cmd.arg("-filter_complex").arg(&filter_complex);
    let output_args = match original_bitrate {
        Some(bps) => profile.bitrate_args(bps),
        None => profile.quality_args.clone(),
    };
    cmd.args(&output_args);
    cmd.args(["-c:a", "copy", "-y"]).arg(&temp_path);

    let output = run_with_timeout(cmd, ENCODE_TIMEOUT)?;
    if output.status_code != Some(0) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(AppError::Subprocess {
            tool: "ffmpeg".into(),
            status: output.status_code,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    debug!("[{}] pass 2 complete", rotated_video_path.display());
    Ok(temp_path)
}

/// PASS 3: combine the overlay track and original track into a dual-track
/// MKV, stream copy only, no re-encode.
fn pass3_combine_tracks(with_overlay_path: &Path, original_video_path: &Path) -> AppResult<PathBuf> {
    let temp_dual = NamedTempFile::with_suffix(".mkv")?;
    let (_temp_dual_file, temp_path) = temp_dual
        .keep()
        .map_err(|e| AppError::Generic(format!("failed to persist pass 3 temp file: {e}")))?;

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-noautorotate").arg("-i").arg(with_overlay_path);
    cmd.arg("-noautorotate").arg("-i").arg(original_video_path);
    cmd.args([
        "-map", "0:v", "-map", "1:v", "-map", "1:a?",
        "-c:v:0", "copy", "-c:v:1", "copy", "-c:a", "copy",
        "-map_metadata", "-1",
        "-metadata:s:v:0", "title=With Overlay",
        "-metadata:s:v:1", "title=Original",
        "-disposition:v:0", "default",
        "-disposition:v:1", "0",
        "-y",
    ]);
    cmd.arg(&temp_path);

    let output = run_with_timeout(cmd, ENCODE_TIMEOUT)?;
    if output.status_code != Some(0) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(AppError::Subprocess {
            tool: "ffmpeg".into(),
            status: output.status_code,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stream_count = count_video_streams(&temp_path).unwrap_or(0);
    if stream_count != 2 {
        warn!("[{}] expected 2 video streams, got {stream_count}", with_overlay_path.display());
    }

    debug!("[{}] pass 3 complete", with_overlay_path.display());
    Ok(temp_path)
}

fn count_video_streams(path: &Path) -> AppResult<usize> {
    let mut cmd = Command::new("ffprobe");
    cmd.args([
        "-v", "error", "-select_streams", "v", "-show_entries", "stream=index,codec_name,width,height", "-of", "csv=p=0",
    ]);
    cmd.arg(path);
    let output = run_with_timeout(cmd, PROBE_TIMEOUT)?;
    let text = String::from_utf8_lossy(&output.stdout);
    Ok(text.trim().lines().filter(|l| !l.is_empty()).count())
}

fn build_message_description(meta: &OverlayMetadata, export_username: &str) -> String {
    let (Some(conv_type), Some(_conv_id)) = (&meta.conversation_type, &meta.conversation_id) else {
        return format!("Source: Snapchat/{export_username}/messages");
    };

    let conversation_context = if conv_type == "dm" {
        format!("DM with {}", meta.conversation_id.clone().unwrap_or_default())
    } else {
        meta.conversation_title.clone().unwrap_or_else(|| "Unknown Group".to_string())
    };
    let sender = meta.sender.clone().unwrap_or_else(|| "unknown".to_string());

    let mut parts = vec![
        format!("Source: Snapchat/{export_username}/messages"),
        format!("Conversation: \"{conversation_context}\""),
        format!("Sender: \"{sender}\""),
    ];
    if let Some(content) = &meta.content {
        if !content.is_empty() {
            parts.push(format!("Content: \"{content}\""));
        }
    }
    parts.join("\n")
}

/// PASS 4: embed creation time, GPS, and description metadata; finalize to
/// `output_path`.
fn pass4_embed_metadata(video_path: &Path, output_path: &Path, metadata: Option<&OverlayMetadata>, export_username: Option<&str>) -> AppResult<bool> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-i").arg(video_path);
    cmd.args([
        "-map", "0:v:0", "-map", "0:v:1", "-map", "0:a?",
        "-c", "copy",
        "-metadata:s:v:0", "title=With Overlay",
        "-metadata:s:v:1", "title=Original",
        "-disposition:v:0", "default",
        "-disposition:v:1", "0",
    ]);

    if let Some(meta) = metadata {
        if let Some(date) = &meta.date {
            let iso = date.replace(" UTC", "").replace(' ', "T") + "Z";
            cmd.args(["-metadata", &format!("creation_time={iso}")]);
        }
        if let (Some(lat), Some(lon)) = (meta.latitude, meta.longitude) {
            let location = format!("{lat},{lon}");
            cmd.args(["-metadata", &format!("location={location}")]);
            cmd.args(["-metadata", &format!("location-eng={location}")]);
        }
    }

    if let Some(username) = export_username {
        let has_conversation_data = metadata
            .map(|m| m.conversation_type.is_some() && m.conversation_id.is_some())
            .unwrap_or(false);
        let description = if has_conversation_data {
            build_message_description(metadata.unwrap(), username)
        } else {
            format!("Source: Snapchat/{username}/memories")
        };
        cmd.args(["-metadata", &format!("comment={description}")]);
        cmd.args(["-metadata", &format!("description={description}")]);
    }

    cmd.arg("-y").arg(output_path);

    let output = run_with_timeout(cmd, ENCODE_TIMEOUT)?;
    if output.status_code != Some(0) {
        error!("[{}] pass 4 metadata embedding failed: {}", video_path.display(), String::from_utf8_lossy(&output.stderr));
        return Ok(false);
    }
    if !output_path.exists() {
        error!("[{}] pass 4 failed - output file not created", video_path.display());
        return Ok(false);
    }

    let stream_count = count_video_streams(output_path).unwrap_or(0);
    debug!("[{}] final output has {stream_count} video streams", video_path.display());

    Ok(true)
}

/// Runs the full four-pass pipeline, producing a dual-track MKV at
/// `output_path`. Cleans up every temp file on every exit path.
pub fn create_video_with_overlay(
    video_path: &Path,
    overlay_path: &Path,
    output_path: &Path,
    metadata: Option<&OverlayMetadata>,
    export_username: Option<&str>,
) -> bool {
    let mut temp_files: Vec<PathBuf> = Vec::new();
    let result = (|| -> AppResult<bool> {
        let rotation = probe_rotation(video_path);

        let pass1 = pass1_rotate_video(video_path, rotation).map_err(|e| {
            error!("[{}] pass 1 failed: {e}", video_path.display());
            e
        })?;
        temp_files.push(pass1.path.clone());

        let with_overlay =
            pass2_apply_overlay(&pass1.path, overlay_path, pass1.width, pass1.height, pass1.original_bitrate).map_err(|e| {
                error!("[{}] pass 2 failed: {e}", video_path.display());
                e
            })?;
        temp_files.push(with_overlay.clone());

        let dual_track = pass3_combine_tracks(&with_overlay, &pass1.path).map_err(|e| {
            error!("[{}] pass 3 failed: {e}", video_path.display());
            e
        })?;
        temp_files.push(dual_track.clone());

        pass4_embed_metadata(&dual_track, output_path, metadata, export_username)
    })();

    for temp_file in &temp_files {
        if temp_file.exists() {
            if let Err(e) = std::fs::remove_file(temp_file) {
                warn!("failed to clean up {}: {e}", temp_file.display());
            }
        }
    }

    matches!(result, Ok(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_filter_maps_known_angles() {
        assert_eq!(rotation_filter(90), Some("transpose=2"));
        assert_eq!(rotation_filter(180), Some("hflip,vflip"));
        assert_eq!(rotation_filter(270), Some("transpose=1"));
        assert_eq!(rotation_filter(0), None);
        assert_eq!(rotation_filter(45), None);
    }

    #[test]
    fn message_description_omits_empty_content() {
        let meta = OverlayMetadata {
            conversation_type: Some("dm".into()),
            conversation_id: Some("alice".into()),
            sender: Some("alice".into()),
            content: Some(String::new()),
            ..Default::default()
        };
        let desc = build_message_description(&meta, "bob");
        assert!(!desc.contains("Content:"));
        assert!(desc.contains("DM with alice"));
    }

    #[test]
    fn message_description_includes_content_when_present() {
        let meta = OverlayMetadata {
            conversation_type: Some("group".into()),
            conversation_id: Some("g1".into()),
            conversation_title: Some("Friends".into()),
            sender: Some("alice".into()),
            content: Some("hello".into()),
            ..Default::default()
        };
        let desc = build_message_description(&meta, "bob");
        assert!(desc.contains("Conversation: \"Friends\""));
        assert!(desc.contains("Content: \"hello\""));
    }

    #[test]
    fn missing_overlay_image_fails_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.png");
        image::RgbaImage::new(4, 4).save(&base).unwrap();
        let missing_overlay = dir.path().join("nope.png");
        let out = dir.path().join("out.png");
        assert!(!create_image_with_overlay(&base, &missing_overlay, &out, 90));
        assert!(!out.exists());
    }

    #[test]
    fn composites_matching_dimension_images() {
        let dir = tempfile::tempdir().unwrap();
        let base_path = dir.path().join("base.png");
        let overlay_path = dir.path().join("overlay.png");
        let out_path = dir.path().join("out.png");

        image::RgbaImage::from_pixel(10, 10, image::Rgba([255, 0, 0, 255])).save(&base_path).unwrap();
        image::RgbaImage::from_pixel(10, 10, image::Rgba([0, 255, 0, 128])).save(&overlay_path).unwrap();

        assert!(create_image_with_overlay(&base_path, &overlay_path, &out_path, 90));
        assert!(out_path.exists());
    }
}
