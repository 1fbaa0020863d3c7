//! H.265/HEVC encoder auto-detection, quality/bitrate profile construction,
//! and hardware-error classification for per-operation software fallback.

use std::process::{Command, Stdio};

use log::debug;

use crate::error::AppResult;
use crate::models::EncoderProfile;

/// Substrings in ffmpeg/ffprobe stderr that indicate a hardware-retryable
/// failure rather than a fatal encoding error.
const HARDWARE_ERROR_PATTERNS: &[&str] = &[
    "hwaccel initialisation returned error",
    "impossible to convert between the formats",
    "failed setup for format vaapi",
    "failed setup for format cuda",
    "failed setup for format qsv",
    "hwaccel_retrieve_data failed",
    "no hw frames available",
    "hardware accelerator failed to decode picture",
];

/// True if `stderr` matches one of the known hardware-failure substrings.
pub fn is_hardware_acceleration_error(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    HARDWARE_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Probes `ffprobe` for a video's bitrate: overall container bitrate first,
/// falling back to the primary video stream's bitrate.
pub fn probe_bitrate(video_path: &std::path::Path) -> Option<u64> {
    if let Some(bitrate) = run_ffprobe_bitrate(&[
        "-v", "error", "-show_entries", "format=bit_rate", "-of",
        "default=noprint_wrappers=1:nokey=1",
    ], video_path) {
        return Some(bitrate);
    }
    run_ffprobe_bitrate(&[
        "-v", "error", "-select_streams", "v:0", "-show_entries", "stream=bit_rate",
        "-of", "default=noprint_wrappers=1:nokey=1",
    ], video_path)
}

fn run_ffprobe_bitrate(args: &[&str], video_path: &std::path::Path) -> Option<u64> {
    let output = Command::new("ffprobe")
        .args(args)
        .arg(video_path)
        .stdin(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let bitrate: u64 = text.trim().parse().ok()?;
    if bitrate > 0 {
        Some(bitrate)
    } else {
        None
    }
}

/// Selects the best available HEVC encoder by probing candidates in
/// priority order. Falls back to software libx265 if none are functional.
pub fn detect_encoder() -> AppResult<EncoderProfile> {
    let candidates: &[(&str, bool)] = &[
        ("hevc_nvenc", true),
        ("hevc_videotoolbox", cfg!(target_os = "macos")),
        ("hevc_vaapi", cfg!(target_os = "linux")),
        ("hevc_qsv", true),
        ("hevc_amf", true),
    ];

    for (name, platform_eligible) in candidates {
        if *platform_eligible && check_encoder_available(name) {
            debug!("selected hardware encoder: {name}");
            return Ok(build_profile(name));
        }
    }

    debug!("no hardware HEVC encoder detected, using libx265");
    Ok(EncoderProfile::software())
}

fn build_profile(name: &str) -> EncoderProfile {
    match name {
        "hevc_nvenc" => EncoderProfile {
            name: name.to_string(),
            is_hardware: true,
            input_args: Vec::new(),
            quality_args: vec![
                "-c:v".into(), "hevc_nvenc".into(),
                "-preset".into(), "p4".into(),
                "-cq".into(), "18".into(),
                "-b:v".into(), "0".into(),
                "-spatial_aq".into(), "1".into(),
                "-temporal_aq".into(), "1".into(),
            ],
        },
        "hevc_videotoolbox" => EncoderProfile {
            name: name.to_string(),
            is_hardware: true,
            input_args: Vec::new(),
            quality_args: vec![
                "-c:v".into(), "hevc_videotoolbox".into(),
                "-q:v".into(), "20".into(),
                "-tag:v".into(), "hvc1".into(),
                "-allow_sw".into(), "1".into(),
            ],
        },
        "hevc_vaapi" => EncoderProfile {
            name: name.to_string(),
            is_hardware: true,
            input_args: vec![
                "-init_hw_device".into(), "vaapi=va:/dev/dri/renderD128".into(),
                "-hwaccel".into(), "vaapi".into(),
                "-hwaccel_output_format".into(), "vaapi".into(),
            ],
            quality_args: vec!["-c:v".into(), "hevc_vaapi".into(), "-qp".into(), "18".into()],
        },
        "hevc_qsv" => EncoderProfile {
            name: name.to_string(),
            is_hardware: true,
            input_args: Vec::new(),
            quality_args: vec![
                "-c:v".into(), "hevc_qsv".into(),
                "-preset".into(), "medium".into(),
                "-global_quality".into(), "18".into(),
                "-look_ahead".into(), "1".into(),
            ],
        },
        "hevc_amf" => EncoderProfile {
            name: name.to_string(),
            is_hardware: true,
            input_args: Vec::new(),
            quality_args: vec![
                "-c:v".into(), "hevc_amf".into(),
                "-quality".into(), "quality".into(),
                "-rc".into(), "cqp".into(),
                "-qp_i".into(), "18".into(),
                "-qp_p".into(), "18".into(),
            ],
        },
        _ => EncoderProfile::software(),
    }
}

/// Lists `ffmpeg -encoders`, then attempts a 0.1s null-output encode of a
/// synthetic 320x240 black frame to confirm the encoder actually functions.
fn check_encoder_available(encoder_name: &str) -> bool {
    let listed = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output();
    let Ok(listed) = listed else { return false };
    if !listed.status.success() {
        return false;
    }
    if !String::from_utf8_lossy(&listed.stdout).contains(encoder_name) {
        return false;
    }

    let mut test_cmd = Command::new("ffmpeg");
    test_cmd.arg("-hide_banner");
    if encoder_name.contains("_vaapi") {
        test_cmd.args([
            "-init_hw_device", "vaapi=va:/dev/dri/renderD128",
            "-hwaccel", "vaapi",
            "-hwaccel_output_format", "vaapi",
        ]);
    }
    test_cmd.args(["-f", "lavfi", "-i", "color=c=black:s=320x240:d=0.1"]);
    if encoder_name.contains("_vaapi") {
        test_cmd.args(["-vf", "format=nv12,hwupload"]);
    }
    test_cmd.args(["-c:v", encoder_name, "-f", "null", "-"]);
    test_cmd.stdin(Stdio::null());

    match test_cmd.output() {
        Ok(result) => result.status.success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_hardware_error_patterns() {
        assert!(is_hardware_acceleration_error("hwaccel initialisation returned error: -5"));
        assert!(is_hardware_acceleration_error("Failed setup for format vaapi"));
        assert!(is_hardware_acceleration_error("No hw frames available for filter output"));
    }

    #[test]
    fn case_insensitive_matching() {
        assert!(is_hardware_acceleration_error("HWACCEL INITIALISATION RETURNED ERROR"));
    }

    #[test]
    fn non_hardware_error_not_misclassified() {
        assert!(!is_hardware_acceleration_error("No such file or directory"));
    }

    #[test]
    fn software_profile_uses_crf_18() {
        let profile = EncoderProfile::software();
        assert_eq!(profile.name, "libx265");
        assert!(!profile.is_hardware);
        assert!(profile.quality_args.contains(&"18".to_string()));
    }

    #[test]
    fn bitrate_args_apply_headroom_and_maxrate() {
        let profile = build_profile("hevc_nvenc");
        let args = profile.bitrate_args(1_000_000);
        let bv_idx = args.iter().position(|a| a == "-b:v").unwrap();
        assert_eq!(args[bv_idx + 1], "1150000");
        let maxrate_idx = args.iter().position(|a| a == "-maxrate").unwrap();
        assert_eq!(args[maxrate_idx + 1], "1200000");
    }

    #[test]
    fn vaapi_profile_carries_input_args() {
        let profile = build_profile("hevc_vaapi");
        assert!(profile.input_args.contains(&"-hwaccel".to_string()));
    }
}
