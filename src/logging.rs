//! Dual stderr/file logger setup, mirroring the teacher's `run()` wiring.

use std::fs::{create_dir_all, File};
use std::path::Path;

use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

use crate::error::AppResult;

/// Initializes the process-wide logger: a term logger on stderr at the
/// requested level, plus a plain write logger to `{output_dir}/preprocessing.log`
/// always at `Info`. Must be called exactly once, before any preprocessor runs.
pub fn init(output_dir: &Path, verbose: bool) -> AppResult<()> {
    create_dir_all(output_dir)?;
    let log_path = output_dir.join("preprocessing.log");
    let term_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    let log_file = File::create(&log_path)?;

    CombinedLogger::init(vec![
        TermLogger::new(
            term_level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| crate::error::AppError::Generic(format!("failed to initialize logger: {e}")))?;

    Ok(())
}
