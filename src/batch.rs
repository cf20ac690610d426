// ==================================================================================
// `make_axt` subcommand module: per-pair AXT generation with failure isolation
// ==================================================================================
use crate::align::{build_axt, Toolchain, TMP_DIR_NAME};
use crate::axt::OrderResolution;
use crate::cds::CdsStore;
use crate::common::{one_line, pair_stem, progress_bar, tsv_writer};
use crate::error::PipelineError;
use crate::pairs::{load_pairs, GenePair};
use crate::pool::{isolate, CancelToken, WorkerPool};
use crate::tool::RunLimits;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const OK_LEDGER: &str = "ok.tsv";
pub const FAILED_LEDGER: &str = "failed.tsv";

#[derive(Parser, Debug)]
#[command(name = "make_axt", about = "Build codon-aligned AXT files for every gene pair (protein aligner + back-translator)")]
pub struct Args {
    #[arg(long, help = "Gene pair table (geneA, geneB, type) with a header row")]
    pub pairs: PathBuf,

    #[arg(long, help = "CDS FASTA file (can be gzipped)")]
    pub cds: PathBuf,

    #[arg(short = 'o', long, help = "Output directory for .axt files and the ok/failed ledgers")]
    pub outdir: PathBuf,

    #[arg(long, env = "HAMMER_KAKS_MAFFT", help = "Protein aligner executable", default_value = "mafft")]
    pub mafft: PathBuf,

    #[arg(long, env = "HAMMER_KAKS_PERL", help = "Perl interpreter used to run pal2nal", default_value = "perl")]
    pub perl: PathBuf,

    #[arg(long, env = "HAMMER_KAKS_PAL2NAL", help = "Path to pal2nal.pl")]
    pub pal2nal: PathBuf,

    #[arg(short = 't', long, help = "Number of pairs processed concurrently", default_value_t = 4)]
    pub threads: usize,

    #[arg(long, help = "Per-tool timeout in seconds (0 disables)", default_value_t = 600)]
    pub timeout: u64,

    #[arg(long, help = "Delete the _tmp directory of intermediate files when done")]
    pub cleanup: bool,
}

/// Everything one batch run needs besides the pairs and sequences.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub out_dir: PathBuf,
    pub toolchain: Toolchain,
    pub threads: usize,
    pub timeout_secs: u64,
    pub cleanup: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub order_fallbacks: usize,
}

impl BatchSummary {
    /// A batch with input but no AXT at all is a failed run.
    pub fn ensure_any_success(&self) -> Result<(), PipelineError> {
        if self.total > 0 && self.succeeded == 0 {
            Err(PipelineError::ZeroSuccess(self.total))
        } else {
            Ok(())
        }
    }
}

enum Outcome {
    Success(PathBuf, OrderResolution),
    Failure(String),
}

struct Unit {
    pair: GenePair,
    rejected: Option<String>,
}

/// The two result tables. Owned by the collector only.
struct Ledgers {
    ok: csv::Writer<File>,
    failed: csv::Writer<File>,
}

impl Ledgers {
    fn create(out_dir: &Path) -> Result<Self> {
        let mut ok = tsv_writer(&out_dir.join(OK_LEDGER))?;
        let mut failed = tsv_writer(&out_dir.join(FAILED_LEDGER))?;
        ok.write_record(["geneA", "geneB", "axt"])?;
        failed.write_record(["geneA", "geneB", "reason"])?;
        Ok(Ledgers { ok, failed })
    }

    fn success(&mut self, pair: &GenePair, axt: &Path) -> Result<()> {
        let axt = axt.display().to_string();
        self.ok.write_record([pair.gene_a.as_str(), pair.gene_b.as_str(), axt.as_str()])?;
        Ok(())
    }

    fn failure(&mut self, pair: &GenePair, reason: &str) -> Result<()> {
        self.failed.write_record([pair.gene_a.as_str(), pair.gene_b.as_str(), reason])?;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.ok.flush()?;
        self.failed.flush()?;
        Ok(())
    }
}

/// Rejects pairs whose artifact stem was already claimed by an earlier pair,
/// so no two units share temporary or output paths.
fn plan_units(pairs: Vec<GenePair>) -> Vec<Unit> {
    let mut claimed: HashMap<String, String> = HashMap::new();
    pairs
        .into_iter()
        .map(|pair| {
            let stem = pair_stem(&pair.gene_a, &pair.gene_b);
            let rejected = match claimed.get(&stem) {
                Some(owner) => Some(format!("artifact name {} collides with pair {}", stem, owner)),
                None => {
                    claimed.insert(stem, format!("{}-{}", pair.gene_a, pair.gene_b));
                    None
                }
            };
            Unit { pair, rejected }
        })
        .collect()
}

/// Runs the per-pair chain for every pair on `config.threads` workers and
/// writes `ok.tsv` / `failed.tsv` in `config.out_dir`. Per-pair errors (and
/// panics) end up in `failed.tsv`; only ledger I/O errors abort the run.
pub fn run_batch(pairs: Vec<GenePair>, cds: &CdsStore, config: &BatchConfig) -> Result<BatchSummary> {
    fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", config.out_dir))?;
    let mut ledgers = Ledgers::create(&config.out_dir)?;
    let mut summary = BatchSummary {
        total: pairs.len(),
        ..Default::default()
    };
    if pairs.is_empty() {
        warn!("pair list is empty; writing empty ledgers");
        ledgers.finish()?;
        return Ok(summary);
    }

    let cancel = CancelToken::new();
    let limits = RunLimits::new(config.timeout_secs, cancel.clone());
    let pool = WorkerPool::new(config.threads);
    debug!(workers = pool.workers(), pairs = pairs.len(), "AXT pool started");
    let pb = progress_bar(pairs.len(), "building AXT")?;

    pool.run(
        plan_units(pairs),
        &cancel,
        |unit: Unit| {
            let outcome = match unit.rejected {
                Some(reason) => Outcome::Failure(reason),
                None => match isolate(|| build_axt(&unit.pair, cds, &config.toolchain, &config.out_dir, &limits)) {
                    Ok(Ok(built)) => Outcome::Success(built.path, built.resolution),
                    Ok(Err(e)) => Outcome::Failure(one_line(&e.to_string())),
                    Err(panic) => Outcome::Failure(format!("EXCEPTION: {}", one_line(&panic))),
                },
            };
            (unit.pair, outcome)
        },
        |(pair, outcome): (GenePair, Outcome)| {
            match outcome {
                Outcome::Success(axt, resolution) => {
                    summary.succeeded += 1;
                    if resolution == OrderResolution::FileOrder {
                        summary.order_fallbacks += 1;
                    }
                    ledgers.success(&pair, &axt)?;
                }
                Outcome::Failure(reason) => {
                    summary.failed += 1;
                    warn!(gene_a = %pair.gene_a, gene_b = %pair.gene_b, %reason, "pair failed");
                    ledgers.failure(&pair, &reason)?;
                }
            }
            pb.inc(1);
            Ok(())
        },
    )?;
    pb.finish_with_message("✔ AXT generation complete");
    ledgers.finish()?;

    if config.cleanup {
        let tmp_dir = config.out_dir.join(TMP_DIR_NAME);
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)
                .with_context(|| format!("Failed to clean up temporary directory: {:?}", tmp_dir))?;
        }
    }
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        order_fallbacks = summary.order_fallbacks,
        "batch finished"
    );
    Ok(summary)
}

pub fn print_summary(summary: &BatchSummary, out_dir: &Path, elapsed: std::time::Duration) {
    println!("\n==================== AXT Generation Summary ====================");
    println!("Processing Time: {:.2?}", elapsed);
    println!("Total Pairs:     {:>10}", summary.total);
    println!("  - AXT generated: {:>8}", summary.succeeded);
    println!("  - Failed:        {:>8}", summary.failed);
    if summary.order_fallbacks > 0 {
        println!("  - Taken in file order (ids not found in alignment): {}", summary.order_fallbacks);
    }
    println!("=================================================================");
    println!("Ledgers: {} / {}", out_dir.join(OK_LEDGER).display(), out_dir.join(FAILED_LEDGER).display());
}

pub fn run(args: Args) -> Result<()> {
    let start_time = Instant::now();
    if !args.pal2nal.is_file() {
        return Err(anyhow!("pal2nal script not found: {:?}", args.pal2nal));
    }
    let toolchain = Toolchain::mafft_pal2nal(&args.mafft, &args.perl, &args.pal2nal);
    toolchain.ensure_available()?;

    println!("---> Loading CDS sequences from {}...", args.cds.display());
    let cds = CdsStore::load(&args.cds)?;
    let pairs = load_pairs(&args.pairs)?;
    println!("---> {} CDS records, {} unique pairs", cds.len(), pairs.len());
    if cds.is_empty() {
        warn!(cds = ?args.cds, "no CDS records loaded; every pair will fail");
    }

    let config = BatchConfig {
        out_dir: args.outdir.clone(),
        toolchain,
        threads: args.threads,
        timeout_secs: args.timeout,
        cleanup: args.cleanup,
    };
    let summary = run_batch(pairs, &cds, &config)?;
    print_summary(&summary, &args.outdir, start_time.elapsed());
    summary.ensure_any_success()?;
    Ok(())
}
