//! Command-line entry point: detects and runs the preprocessors for a
//! single export directory, writing the normalized library under
//! `--output-dir`.

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::{error, info};
use memoria::{default_registry, RunConfig};

/// Ingests a raw media-export archive into a deduplicated, metadata-rich
/// archival library.
#[derive(Parser, Debug)]
#[command(name = "memoria", version, about)]
struct Cli {
    /// Root directory of the export to process.
    input_dir: Option<PathBuf>,

    /// Directory the normalized library is written to.
    #[arg(short, long, default_value = "./memoria-output")]
    output_dir: PathBuf,

    /// Run only the named processor instead of every detected one.
    #[arg(long, value_name = "NAME")]
    processor: Option<String>,

    /// Number of parallel workers for hashing/copying.
    #[arg(long)]
    workers: Option<usize>,

    /// Skip network-bound steps (e.g. Discord CDN downloads).
    #[arg(long)]
    skip_upload: bool,

    /// Allow extension correction to cross image/video/audio categories.
    #[arg(long)]
    allow_cross_category: bool,

    /// Emit debug-level logging to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Print every registered processor's name and exit.
    #[arg(long)]
    list_processors: bool,
}

fn main() {
    let cli = Cli::parse();
    let registry = default_registry();

    if cli.list_processors {
        for name in registry.names() {
            println!("{name}");
        }
        exit(0);
    }

    let Some(input_dir) = cli.input_dir else {
        eprintln!("error: INPUT_DIR is required unless --list-processors is passed");
        exit(2);
    };

    if !input_dir.is_dir() {
        eprintln!("error: {} is not a directory", input_dir.display());
        exit(2);
    }

    if let Err(e) = memoria::logging::init(&cli.output_dir, cli.verbose) {
        eprintln!("error: failed to initialize logging: {e}");
        exit(2);
    }

    let mut config = RunConfig::new(input_dir.clone());
    config.output_dir = cli.output_dir.clone();
    config.processor_filter = cli.processor.clone();
    config.skip_upload = cli.skip_upload;
    config.verbose = cli.verbose;
    config.allow_cross_category = cli.allow_cross_category;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(config.workers).build_global() {
        eprintln!("error: failed to initialize worker pool: {e}");
        exit(2);
    }

    info!("memoria: processing {}", input_dir.display());
    let ok = registry.run_all(&input_dir, &cli.output_dir, &config);

    if ok {
        info!("memoria: completed successfully, output at {}", cli.output_dir.display());
        exit(0);
    } else {
        error!("memoria: one or more processors failed, see {}/preprocessing.log", cli.output_dir.display());
        exit(1);
    }
}
