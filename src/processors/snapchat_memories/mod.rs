pub mod preprocess;
pub mod processor;

use std::path::Path;

use crate::config::RunConfig;
use crate::error::AppResult;
use crate::registry::Processor;

pub struct SnapchatMemoriesProcessor;

impl SnapchatMemoriesProcessor {
    fn root(input_dir: &Path) -> std::path::PathBuf {
        input_dir.join("Snapchat").join("memories")
    }
}

impl Processor for SnapchatMemoriesProcessor {
    fn name(&self) -> &'static str {
        "Snapchat Memories"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn detect(&self, input_dir: &Path) -> bool {
        let root = Self::root(input_dir);
        root.join("metadata.json").is_file() && root.join("media").is_dir()
    }

    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
        preprocess::run(&Self::root(input_dir), output_dir, config)?;
        processor::finalize(output_dir, config)
    }
}
