//! Scenario: two UUID-named videos and two UUID-named overlays land in the
//! same mtime-second bucket with no message ever referencing them by ID.
//! The mtime-pairing phase can't disambiguate 2:2 and must triage the whole
//! group into `needs_matching/` rather than guess a pairing.

use std::fs;
use std::time::SystemTime;

use filetime::{set_file_mtime, FileTime};
use memoria::config::RunConfig;
use memoria::processors::snapchat_messages::SnapchatMessagesProcessor;
use memoria::registry::Processor;

fn write(path: &std::path::Path, contents: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn ambiguous_video_overlay_group_is_triaged_for_manual_matching() {
    let root = tempfile::tempdir().unwrap();
    let input_dir = root.path().join("someuser");
    let output_dir = root.path().join("output");

    let messages_root = input_dir.join("Snapchat").join("messages");
    write(&messages_root.join("json").join("chat_history.json"), b"{}");

    let media_dir = messages_root.join("chat_media");
    let names = [
        "clip_media~3fa85f64-5717-4562-b3fc-2c963f66afa6.mp4",
        "clip_media~7c9e6679-7425-40de-944b-e07fc1f90ae7.mp4",
        "clip_overlay~1b9d6bcd-bbfd-4b2d-9b5d-ab8dfbbd4bed.png",
        "clip_overlay~550e8400-e29b-41d4-a716-446655440000.png",
    ];
    for name in &names {
        write(&media_dir.join(name), b"fake media bytes");
    }

    // Pin every file to the same mtime second so the ambiguity is
    // deterministic instead of depending on how fast the test writes land.
    let shared_mtime = FileTime::from_system_time(SystemTime::now());
    for name in &names {
        set_file_mtime(media_dir.join(name), shared_mtime).unwrap();
    }

    let config = RunConfig::new(input_dir.clone());
    SnapchatMessagesProcessor.process(&input_dir, &output_dir, &config).unwrap();

    let needs_matching = output_dir.join("needs_matching");
    assert!(needs_matching.is_dir(), "expected a needs_matching/ triage tree");

    let buckets: Vec<_> = fs::read_dir(&needs_matching).unwrap().filter_map(|e| e.ok()).collect();
    assert_eq!(buckets.len(), 1, "expected exactly one timestamp bucket");

    let bucket = buckets[0].path();
    let media_triage = bucket.join("media");
    let overlay_triage = bucket.join("overlays");
    assert_eq!(fs::read_dir(&media_triage).unwrap().count(), 2);
    assert_eq!(fs::read_dir(&overlay_triage).unwrap().count(), 2);

    let match_info: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(bucket.join("match_info.json")).unwrap()).unwrap();
    assert_eq!(match_info["media_candidates"].as_array().unwrap().len(), 2);
    assert_eq!(match_info["overlay_candidates"].as_array().unwrap().len(), 2);
    assert!(match_info["analysis"]["hint"].as_str().unwrap().contains("2:2"));

    // None of the ambiguous files should have been claimed as orphaned
    // media separately; they were triaged, not dropped.
    let orphaned_video = fs::read_dir(&media_dir).unwrap().filter_map(|e| e.ok()).count();
    assert_eq!(orphaned_video, 4, "source files are copied into the triage tree, not moved");
}

/// Scenario: a single UUID-named video shares its mtime-second bucket with
/// two UUID-named overlays. 1:1 auto-pairing doesn't apply (two overlay
/// candidates), so the whole group must still land in `needs_matching/`
/// rather than falling through to the orphaned-media sweep.
#[test]
fn single_video_with_multiple_overlays_is_triaged_for_manual_matching() {
    let root = tempfile::tempdir().unwrap();
    let input_dir = root.path().join("someuser");
    let output_dir = root.path().join("output");

    let messages_root = input_dir.join("Snapchat").join("messages");
    write(&messages_root.join("json").join("chat_history.json"), b"{}");

    let media_dir = messages_root.join("chat_media");
    let names = [
        "clip_media~3fa85f64-5717-4562-b3fc-2c963f66afa6.mp4",
        "clip_overlay~1b9d6bcd-bbfd-4b2d-9b5d-ab8dfbbd4bed.png",
        "clip_overlay~550e8400-e29b-41d4-a716-446655440000.png",
    ];
    for name in &names {
        write(&media_dir.join(name), b"fake media bytes");
    }

    let shared_mtime = FileTime::from_system_time(SystemTime::now());
    for name in &names {
        set_file_mtime(media_dir.join(name), shared_mtime).unwrap();
    }

    let config = RunConfig::new(input_dir.clone());
    SnapchatMessagesProcessor.process(&input_dir, &output_dir, &config).unwrap();

    let needs_matching = output_dir.join("needs_matching");
    assert!(needs_matching.is_dir(), "expected a needs_matching/ triage tree");

    let buckets: Vec<_> = fs::read_dir(&needs_matching).unwrap().filter_map(|e| e.ok()).collect();
    assert_eq!(buckets.len(), 1, "expected exactly one timestamp bucket");

    let bucket = buckets[0].path();
    assert_eq!(fs::read_dir(bucket.join("media")).unwrap().count(), 1);
    assert_eq!(fs::read_dir(bucket.join("overlays")).unwrap().count(), 2);

    let match_info: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(bucket.join("match_info.json")).unwrap()).unwrap();
    assert_eq!(match_info["media_candidates"].as_array().unwrap().len(), 1);
    assert_eq!(match_info["overlay_candidates"].as_array().unwrap().len(), 2);
}
