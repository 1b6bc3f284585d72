//! kvdb-tester: benchmarks every storage backend and writes CSV reports.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use kvdb::cli;
use kvdb::tester::{SuiteSettings, TestSuite};

/// Benchmark suite for the kvdb storage backends.
#[derive(Parser, Debug)]
#[command(name = "kvdb-tester")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory the CSV reports are written to
    #[arg(value_name = "OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Operations per run (applies to every operation mix)
    #[arg(short = 'n', long)]
    operations: Option<usize>,

    /// Worker thread counts to run, comma separated
    #[arg(short, long, value_delimiter = ',')]
    threads: Vec<usize>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn settings(&self) -> SuiteSettings {
        let mut settings = SuiteSettings::default();
        if let Some(operations) = self.operations {
            settings.operations = operations;
            settings.get_when_operations = operations;
        }
        if !self.threads.is_empty() {
            settings.thread_counts.clone_from(&self.threads);
        }
        settings
    }
}

/// Entry point for the kvdb tester.
fn main() -> ExitCode {
    let args = Args::parse();
    cli::init_tracing(cli::log_level(args.verbose, args.quiet, "warn"));

    let suite = TestSuite::new(&args.output_dir, args.settings());
    info!(%suite, "Starting benchmark suite");

    match suite.run(|path| println!("Exported {}", path.display())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Benchmark suite failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
