pub mod preprocess;
pub mod processor;

use std::path::Path;

use crate::config::RunConfig;
use crate::error::AppResult;
use crate::registry::Processor;

pub struct GooglePhotosProcessor;

impl Processor for GooglePhotosProcessor {
    fn name(&self) -> &'static str {
        "Google Photos"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn detect(&self, input_dir: &Path) -> bool {
        input_dir.join("Google Photos").is_dir()
    }

    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()> {
        preprocess::run(input_dir, output_dir, config)?;
        processor::finalize(output_dir, config)
    }
}
