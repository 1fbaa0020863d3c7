//! Hardware-encoder-failure fallback, scoped to the deterministic decision
//! surface: the stderr classifier and the profile construction the
//! compositor switches to on a retry. The actual second `ffmpeg` invocation
//! (`-c:v libx265 -crf 18`, confirming exactly 2 video streams in the final
//! MKV) needs a real subprocess; `video_encoder.rs` calls
//! `std::process::Command` directly with no injectable runner, and adding
//! one would be a refactor with no grounding in how the example repos shell
//! out. What's covered here is everything that decides *whether* to retry
//! and *with what*.

use memoria::models::EncoderProfile;
use memoria::video_encoder::is_hardware_acceleration_error;

#[test]
fn vaapi_stderr_triggers_software_fallback_decision() {
    let stderr = "Failed setup for format vaapi: hwaccel initialisation returned error -5";
    assert!(is_hardware_acceleration_error(stderr));

    // The fallback profile the compositor would retry with.
    let fallback = EncoderProfile::software();
    assert_eq!(fallback.name, "libx265");
    assert!(!fallback.is_hardware);
    assert_eq!(
        fallback.quality_args,
        vec!["-c:v", "libx265", "-crf", "18"].iter().map(|s| s.to_string()).collect::<Vec<_>>()
    );
}

#[test]
fn unrelated_ffmpeg_failure_does_not_trigger_fallback() {
    let stderr = "Unknown encoder 'libx265'";
    assert!(!is_hardware_acceleration_error(stderr));
}

#[test]
fn every_documented_hardware_error_pattern_is_recognized() {
    let patterns = [
        "hwaccel initialisation returned error",
        "Impossible to convert between the formats",
        "failed setup for format vaapi",
        "failed setup for format cuda",
        "failed setup for format qsv",
        "hwaccel_retrieve_data failed",
        "No hw frames available",
        "Hardware accelerator failed to decode picture",
    ];
    for pattern in patterns {
        assert!(is_hardware_acceleration_error(pattern), "{pattern} should be recognized as hardware-retryable");
    }
}
