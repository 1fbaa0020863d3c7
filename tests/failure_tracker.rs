//! Scenario: 3 orphaned media, 2 orphaned metadata entries, and 1 processing
//! failure roll up to `{total_failures: 6, failed_matching: 5,
//! failed_processing: 1}`, and the report/triage files land where the
//! registry's output-dir convention expects them.

use std::fs;
use std::path::PathBuf;

use memoria::failure_tracker::FailureTracker;

#[test]
fn mixed_failure_counts_roll_up_correctly() {
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("output");
    fs::create_dir_all(&output_dir).unwrap();

    let tracker = FailureTracker::new("Test Source", dir.path().to_string_lossy());

    for i in 0..3 {
        let media_path = dir.path().join(format!("orphan_media_{i}.jpg"));
        fs::write(&media_path, b"orphan bytes").unwrap();
        tracker.add_orphaned_media(media_path, "no metadata claimed this file", serde_json::json!({"index": i}));
    }

    for i in 0..2 {
        tracker.add_orphaned_metadata(
            serde_json::json!({"title": format!("orphan_meta_{i}")}),
            "no media file matched this metadata entry",
            serde_json::json!({"index": i}),
        );
    }

    tracker.add_processing_failure(
        PathBuf::from("/tmp/failed_encode.mkv"),
        serde_json::json!({}),
        "hardware encoder failed twice",
        "ffmpeg exited with status 1",
        serde_json::json!({}),
    );

    let summary = tracker.summary();
    assert_eq!(summary.total_failures, 6);
    assert_eq!(summary.failed_matching, 5);
    assert_eq!(summary.failed_processing, 1);

    tracker.handle_failures(&output_dir);

    let report: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(output_dir.join("issues").join("failure-report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["summary"]["total_failures"], 6);
    assert_eq!(report["summary"]["failed_matching"], 5);
    assert_eq!(report["summary"]["failed_processing"], 1);
    assert_eq!(report["failed_matching"]["orphaned_media"].as_array().unwrap().len(), 3);
    assert_eq!(report["failed_matching"]["orphaned_metadata"].as_array().unwrap().len(), 2);
    assert_eq!(report["failed_processing"].as_array().unwrap().len(), 1);

    let copied_media: usize = fs::read_dir(output_dir.join("issues").join("failed-matching").join("media"))
        .unwrap()
        .count();
    assert_eq!(copied_media, 3);

    let saved_metadata: usize = fs::read_dir(output_dir.join("issues").join("failed-matching").join("metadata"))
        .unwrap()
        .count();
    assert_eq!(saved_metadata, 2);
}
