//! Priority-ordered set of processors with `detect -> process` contracts.

use std::path::Path;

use log::{error, info, warn};

use crate::config::RunConfig;
use crate::error::AppResult;

/// One supported source format's full `detect -> preprocess -> finalize`
/// pipeline. Implementations are process-wide, stateless beyond what they
/// read from `input_dir`/`config` per call.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher priority processors are tried, and reported, first.
    fn priority(&self) -> i32;

    /// Whether `input_dir` looks like this source's export layout.
    fn detect(&self, input_dir: &Path) -> bool;

    /// Runs the full pipeline: preprocess then finalize.
    fn process(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> AppResult<()>;

    /// Whether repeated invocations with different input roots may write
    /// into the same output directory (iMessage does; most sources don't).
    fn supports_consolidation(&self) -> bool {
        false
    }
}

pub struct Registry {
    processors: Vec<Box<dyn Processor>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { processors: Vec::new() }
    }

    pub fn register(&mut self, processor: Box<dyn Processor>) {
        self.processors.push(processor);
    }

    /// Every registered processor's name, for `--list-processors`.
    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Every processor whose `detect` returns true, sorted by descending priority.
    pub fn detect_all(&self, input_dir: &Path) -> Vec<&dyn Processor> {
        let mut matched: Vec<&dyn Processor> = self
            .processors
            .iter()
            .map(|p| p.as_ref())
            .filter(|p| p.detect(input_dir))
            .collect();
        matched.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        matched
    }

    /// Runs every detected processor (optionally filtered to one name),
    /// continuing past a failing processor per the validation-error
    /// classification (§7.1): a processor's failure aborts only that
    /// processor's run.
    pub fn run_all(&self, input_dir: &Path, output_dir: &Path, config: &RunConfig) -> bool {
        let detected = self.detect_all(input_dir);
        if detected.is_empty() {
            warn!("no processor detected an export at {}", input_dir.display());
            return false;
        }

        let mut any_failure = false;
        for processor in detected {
            if let Some(filter) = &config.processor_filter {
                if processor.name() != filter {
                    continue;
                }
            }
            info!("running processor: {}", processor.name());
            let processor_output = output_dir.join(processor.name());
            if let Err(e) = processor.process(input_dir, &processor_output, config) {
                error!("processor {} failed: {e}", processor.name());
                any_failure = true;
            }
        }
        !any_failure
    }
}
