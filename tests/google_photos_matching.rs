//! End-to-end coverage of the Google Photos matcher chain against real
//! temp-directory fixtures, as opposed to the pure-function unit tests
//! already living alongside `match_media` itself.

use std::fs;

use memoria::config::RunConfig;
use memoria::processors::google_photos::preprocess;

fn write(path: &std::path::Path, contents: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Name correction: `IMG_0004(1).PNG` next to a metadata sidecar whose own
/// name carries the duplicate index on the *supplemental-metadata* segment.
/// The normal matcher strips and re-propagates the index so the two still
/// pair up, and the single output file's metadata carries the photo's
/// capture timestamp.
#[test]
fn scenario_name_correction_with_duplicate_index() {
    let root = tempfile::tempdir().unwrap();
    let input_dir = root.path().join("input");
    let output_dir = root.path().join("output");

    let album = input_dir.join("Google Photos").join("Trip");
    write(&album.join("IMG_0004(1).PNG"), b"fake png bytes");
    write(
        &album.join("IMG_0004.PNG.supplemental-metadata(1).json"),
        br#"{"photoTakenTime": {"timestamp": "1609459200"}}"#,
    );

    let config = RunConfig::new(input_dir.clone());
    preprocess::run(&input_dir, &output_dir, &config).unwrap();

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output_dir.join("metadata.json")).unwrap()).unwrap();

    assert_eq!(manifest["export_info"]["total_media"], 1);
    assert_eq!(manifest["export_info"]["total_matched"], 1);
    let media = manifest["media"].as_array().unwrap();
    assert_eq!(media.len(), 1);
    assert_eq!(
        media[0]["metadata"]["photoTakenTime"]["timestamp"],
        "1609459200"
    );
    assert!(output_dir.join("media").join("IMG_0004(1).PNG").exists());
}

/// Live Photo truncation: the HEIC and its paired MOV-like variant (whose
/// stem is one character longer than the JSON's) both share the long UUID
/// prefix required by the live-photo-variants matcher and so both attach to
/// the same sidecar.
#[test]
fn scenario_live_photo_truncated_prefix_match() {
    let root = tempfile::tempdir().unwrap();
    let input_dir = root.path().join("input");
    let output_dir = root.path().join("output");

    let album = input_dir.join("Google Photos").join("Camera");
    let stem = "70391126464__72D07F3A-468D-4FD6-A9D1-2D368E323";
    write(&album.join(format!("{stem}.HEIC")), b"heic bytes one");
    write(&album.join(format!("{stem}1.MP4")), b"mp4 bytes two");
    write(
        &album.join(format!("{stem}.json")),
        br#"{"photoTakenTime": {"timestamp": "1609459300"}}"#,
    );

    let config = RunConfig::new(input_dir.clone());
    preprocess::run(&input_dir, &output_dir, &config).unwrap();

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output_dir.join("metadata.json")).unwrap()).unwrap();

    assert_eq!(manifest["export_info"]["total_media"], 2);
    assert_eq!(manifest["export_info"]["total_matched"], 2);
    let media = manifest["media"].as_array().unwrap();
    assert!(media
        .iter()
        .all(|m| m["metadata"]["photoTakenTime"]["timestamp"] == "1609459300"));
}

/// A media file with no plausible sidecar anywhere in its album is tracked
/// as orphaned rather than silently dropped.
#[test]
fn unmatched_media_is_tracked_as_orphan() {
    let root = tempfile::tempdir().unwrap();
    let input_dir = root.path().join("input");
    let output_dir = root.path().join("output");

    let album = input_dir.join("Google Photos").join("Lonely");
    write(&album.join("IMG_9999.PNG"), b"no sidecar for this one");

    let config = RunConfig::new(input_dir.clone());
    preprocess::run(&input_dir, &output_dir, &config).unwrap();

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output_dir.join("metadata.json")).unwrap()).unwrap();
    assert_eq!(manifest["export_info"]["total_matched"], 0);

    let report: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(output_dir.join("issues").join("failure-report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["summary"]["failed_matching"], 1);
}
