use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod align;
mod axt;
mod batch;
mod cds;
mod codon;
mod common;
mod error;
mod filter;
mod kaks;
mod pairs;
mod pipeline;
mod pool;
mod tool;

use error::PipelineError;

// ==================================================================================
// Main entry point and CLI command definitions
// ==================================================================================

#[derive(Parser, Debug)]
#[command(
    name = "Hammer_kaks",
    version = "v1.0.0",
    author = "CZH",
    about = "A toolkit for pairwise Ka/Ks analysis: gene pairs, codon-aligned AXT generation, Ka/Ks estimation and filtering."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// [Workflow] Run the complete pipeline from AXT generation to filtered Ka/Ks table
    #[command(name = "kaks_all")]
    KaksAll(pipeline::Args),

    /// Build a gene pair table from a gene family list or an MCScanX collinearity file
    Pairs(pairs::Args),

    /// [Single Step] Build codon-aligned AXT files for every gene pair
    #[command(name = "make_axt")]
    MakeAxt(batch::Args),

    /// (Wrapper) Run the Ka/Ks estimator on a directory of AXT files
    #[command(name = "run_kaks")]
    RunKaks(kaks::Args),

    /// Filter a raw Ka/Ks table by Ks range and Ka/Ks ceiling, annotating pair types
    Filter(filter::Args),
}

/// Log verbosity comes from `HAMMER_KAKS_LOG` (e.g. `info`, `hammer_kaks=debug`).
fn init_logging() {
    let filter = EnvFilter::try_from_env("HAMMER_KAKS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::KaksAll(args) => pipeline::run(args),
        Commands::Pairs(args) => pairs::run(args),
        Commands::MakeAxt(args) => batch::run(args),
        Commands::RunKaks(args) => kaks::run(args),
        Commands::Filter(args) => filter::run(args),
    }
}

/// Pipeline error kinds keep their own exit codes; everything else exits 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map_or(1, PipelineError::exit_code)
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use clap::CommandFactory;
    use std::path::PathBuf;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_code_found_through_context() {
        let err = Err::<(), _>(PipelineError::ZeroSuccess(3))
            .context("make_axt")
            .unwrap_err();
        assert_eq!(exit_code(&err), 2);

        let err = anyhow::Error::from(PipelineError::EmptyBatch(PathBuf::from("axt")));
        assert_eq!(exit_code(&err), 3);

        assert_eq!(exit_code(&anyhow::anyhow!("bad argument")), 1);
    }

    #[test]
    fn test_subcommand_names() {
        let cli = Cli::try_parse_from([
            "hammer_kaks", "filter", "--kaks-raw", "raw.tsv", "--pairs", "p.tsv", "--min-ks", "0.01", "--max-ks", "2",
            "--max-w", "1", "-o", "out.tsv",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Filter(ref a) if a.max_ks == 2.0));
        assert!(Cli::try_parse_from(["hammer_kaks", "make_axt", "--help"]).is_err());
    }
}
