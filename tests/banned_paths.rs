//! Filter totality: system-noise files (`.DS_Store`, AppleDouble siblings,
//! Synology thumbnail caches) are excluded end-to-end, not just by the
//! predicate in isolation.

use std::fs;

use memoria::banned_paths::BannedPathFilter;
use memoria::config::RunConfig;
use memoria::processors::google_photos::preprocess;

fn write(path: &std::path::Path, contents: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn filter_rejects_every_default_pattern_class() {
    let filter = BannedPathFilter::new();
    for name in [
        ".DS_Store",
        "Thumbs.db",
        "desktop.ini",
        "@eaDir",
        "@__thumb",
        "Lightroom Catalog",
        "thumbnails",
        ".photostructure",
    ] {
        assert!(filter.is_banned(std::path::Path::new(name)), "{name} should be banned");
    }
    for name in ["._IMG_0001.JPG", "SYNOFILE_THUMB_abc.jpg"] {
        assert!(filter.is_banned(std::path::Path::new(name)), "{name} should be banned");
    }
    assert!(!filter.is_banned(std::path::Path::new("IMG_0001.JPG")));
    // A bare "@" prefix is not a banned pattern; only the exact Synology
    // directory names are.
    assert!(!filter.is_banned(std::path::Path::new("@eaDir-sibling")));
}

/// A Google Photos album littered with macOS/NAS noise still ends up with
/// only the real media file counted and copied.
#[test]
fn noise_files_excluded_from_preprocessor_output() {
    let root = tempfile::tempdir().unwrap();
    let input_dir = root.path().join("input");
    let output_dir = root.path().join("output");

    let album = input_dir.join("Google Photos").join("Album");
    write(&album.join("IMG_0001.PNG"), b"real media bytes");
    write(&album.join("IMG_0001.PNG.supplemental-metadata.json"), br#"{"photoTakenTime": {"timestamp": "1"}}"#);
    write(&album.join(".DS_Store"), b"mac noise");
    write(&album.join("._IMG_0001.JPG"), b"appledouble sidecar noise");

    let config = RunConfig::new(input_dir.clone());
    preprocess::run(&input_dir, &output_dir, &config).unwrap();

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output_dir.join("metadata.json")).unwrap()).unwrap();
    assert_eq!(manifest["export_info"]["total_media"], 1);

    let copied: Vec<String> = fs::read_dir(output_dir.join("media"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(copied.len(), 1);
    assert!(!copied.iter().any(|n| n.starts_with("._") || n == ".DS_Store"));
}
