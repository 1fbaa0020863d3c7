//! Run configuration resolved once from CLI args and defaults.

use std::path::PathBuf;

/// Options resolved once at startup and threaded by reference into the
/// registry and every preprocessor. Not a global — unlike the encoder
/// profile and banned-path filter, which are process-wide singletons.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub processor_filter: Option<String>,
    pub workers: usize,
    pub skip_upload: bool,
    pub verbose: bool,
    /// Whether extension correction may cross MIME top-level categories
    /// (image <-> video <-> audio). Defaults to `false`; see the design
    /// notes for why same-category correction is the safer default.
    pub allow_cross_category: bool,
}

impl RunConfig {
    pub fn new(input_dir: PathBuf) -> Self {
        Self {
            input_dir,
            output_dir: PathBuf::from("./memoria-output"),
            processor_filter: None,
            workers: default_workers(),
            skip_upload: false,
            verbose: false,
            allow_cross_category: false,
        }
    }
}

/// `max(1, cpu_count - 1)`, leaving one core free for the main thread's
/// I/O and logging work.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_workers_is_at_least_one() {
        assert!(default_workers() >= 1);
    }

    #[test]
    fn new_config_has_expected_defaults() {
        let cfg = RunConfig::new(PathBuf::from("/tmp/in"));
        assert_eq!(cfg.output_dir, PathBuf::from("./memoria-output"));
        assert!(!cfg.allow_cross_category);
        assert!(!cfg.skip_upload);
        assert!(cfg.processor_filter.is_none());
    }
}
