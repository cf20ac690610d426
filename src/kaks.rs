// ==================================================================================
// `run_kaks` subcommand module: Ka/Ks estimator invocation and output parsing
// ==================================================================================
use crate::common::{progress_bar, tsv_writer};
use crate::error::{PipelineError, PipelineResult};
use crate::pool::{isolate, CancelToken, WorkerPool};
use crate::tool::{run_tool, RunLimits, ToolSpec};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rayon::prelude::*;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const KAKS_SUFFIX: &str = ".kaks";

/// Column layout of one estimator result line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatLineFormat {
    /// `seq  method  Ka  Ks  Ka/Ks  [extra columns...]`
    WithMethod,
    /// `seq  Ka  Ks  Ka/Ks`
    WithoutMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatLine {
    pub sequence: String,
    pub format: StatLineFormat,
    pub method: Option<String>,
    pub ka: String,
    pub ks: String,
    pub kaks: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatLine {
    /// Blank, comment or header line.
    Ignored,
    Parsed(ParsedStatLine),
    /// Token count matches neither layout.
    Malformed(usize),
}

/// How lines that match no layout are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Strict,
    Lenient,
}

pub fn parse_stat_line(line: &str) -> StatLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return StatLine::Ignored;
    }
    if line.get(..8).map_or(false, |head| head.eq_ignore_ascii_case("sequence")) {
        return StatLine::Ignored;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let owned = |i: usize| tokens[i].to_string();
    match tokens.len() {
        n if n >= 5 => StatLine::Parsed(ParsedStatLine {
            sequence: owned(0),
            format: StatLineFormat::WithMethod,
            method: Some(owned(1)),
            ka: owned(2),
            ks: owned(3),
            kaks: owned(4),
        }),
        4 => StatLine::Parsed(ParsedStatLine {
            sequence: owned(0),
            format: StatLineFormat::WithoutMethod,
            method: None,
            ka: owned(1),
            ks: owned(2),
            kaks: owned(3),
        }),
        n => StatLine::Malformed(n),
    }
}

/// One row of the raw statistics table. Values stay as text until filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KaksResult {
    pub pair_id: String,
    pub method: String,
    pub ka: String,
    pub ks: String,
    pub kaks: String,
}

#[derive(Debug, Default)]
pub struct ParsedFile {
    pub results: Vec<KaksResult>,
    pub skipped: usize,
}

pub fn parse_kaks_file(path: &Path, pair_id: &str, mode: ParseMode) -> PipelineResult<ParsedFile> {
    let text = fs::read_to_string(path)?;
    let mut parsed = ParsedFile::default();
    for (i, line) in text.lines().enumerate() {
        match parse_stat_line(line) {
            StatLine::Ignored => {}
            StatLine::Parsed(stat) => parsed.results.push(KaksResult {
                pair_id: pair_id.to_string(),
                method: stat.method.unwrap_or_else(|| "NA".to_string()),
                ka: stat.ka,
                ks: stat.ks,
                kaks: stat.kaks,
            }),
            StatLine::Malformed(n) => match mode {
                ParseMode::Strict => {
                    return Err(PipelineError::Parse {
                        path: path.to_path_buf(),
                        line: i + 1,
                        reason: format!("expected 4 or at least 5 columns, found {}", n),
                    })
                }
                ParseMode::Lenient => parsed.skipped += 1,
            },
        }
    }
    if parsed.skipped > 0 {
        warn!(file = ?path, skipped = parsed.skipped, "skipped malformed estimator lines");
    }
    Ok(parsed)
}

/// Sorted `*.axt` files in `dir`; none at all is fatal.
pub fn discover_axt(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = dir.join("*.axt");
    let pattern = pattern.to_str().ok_or_else(|| anyhow!("Non UTF-8 path: {:?}", dir))?;
    let mut axts = glob::glob(pattern)
        .with_context(|| format!("Invalid glob pattern: {}", pattern))?
        .collect::<Result<Vec<_>, _>>()?;
    if axts.is_empty() {
        return Err(PipelineError::EmptyBatch(dir.to_path_buf()).into());
    }
    axts.sort();
    Ok(axts)
}

fn output_path(axt: &Path) -> PathBuf {
    let mut name = axt.as_os_str().to_owned();
    name.push(KAKS_SUFFIX);
    PathBuf::from(name)
}

/// Estimator stderr, kept next to its output.
fn log_path(axt: &Path) -> PathBuf {
    let mut name = output_path(axt).into_os_string();
    name.push(".log");
    PathBuf::from(name)
}

fn pair_id(axt: &Path) -> String {
    axt.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct KaksConfig {
    pub estimator: ToolSpec,
    pub method: String,
    pub threads: usize,
    pub timeout_secs: u64,
    pub mode: ParseMode,
}

#[derive(Debug, Default)]
pub struct KaksRun {
    pub results: Vec<KaksResult>,
    pub skipped_lines: usize,
}

/// Runs the estimator on every AXT. The first failing invocation cancels the
/// rest (in-flight processes are killed) and fails the whole run. Outputs are
/// parsed once all invocations are done, in file-name order.
pub fn run_kaks(axts: Vec<PathBuf>, config: &KaksConfig) -> Result<KaksRun> {
    let cancel = CancelToken::new();
    let limits = RunLimits::new(config.timeout_secs, cancel.clone());
    let pool = WorkerPool::new(config.threads);
    debug!(workers = pool.workers(), files = axts.len(), "estimator pool started");
    let pb = progress_bar(axts.len(), "running estimator")?;

    let mut done: Vec<PathBuf> = Vec::with_capacity(axts.len());
    pool.run(
        axts,
        &cancel,
        |axt: PathBuf| -> PipelineResult<PathBuf> {
            let out = output_path(&axt);
            let args = [
                OsStr::new("-i"),
                axt.as_os_str(),
                OsStr::new("-o"),
                out.as_os_str(),
                OsStr::new("-m"),
                OsStr::new(&config.method),
            ];
            let log = log_path(&axt);
            isolate(|| run_tool(&config.estimator, args, None, Some(log.as_path()), &limits)).unwrap_or_else(|panic| {
                Err(PipelineError::ExternalTool {
                    tool: config.estimator.name(),
                    status: "worker panic".to_string(),
                    detail: Some(panic),
                })
            })?;
            Ok(axt)
        },
        |result| {
            let axt = result?;
            done.push(axt);
            pb.inc(1);
            Ok(())
        },
    )?;
    pb.finish_with_message("✔ estimator runs complete");

    done.sort();
    let parsed = done
        .par_iter()
        .map(|axt| parse_kaks_file(&output_path(axt), &pair_id(axt), config.mode))
        .collect::<Result<Vec<_>, _>>()?;

    let mut run = KaksRun::default();
    for file in parsed {
        run.skipped_lines += file.skipped;
        run.results.extend(file.results);
    }
    Ok(run)
}

pub fn write_raw_table(path: &Path, results: &[KaksResult]) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["pair", "method", "Ka", "Ks", "KaKs"])?;
    for r in results {
        wtr.write_record([&r.pair_id, &r.method, &r.ka, &r.ks, &r.kaks])?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "run_kaks", about = "Run the Ka/Ks estimator on every .axt file and collect a raw result table")]
pub struct Args {
    #[arg(long, help = "Directory containing .axt files")]
    pub axt_dir: PathBuf,

    #[arg(long, env = "HAMMER_KAKS_CALCULATOR", help = "Ka/Ks estimator executable (e.g. KaKs_Calculator)")]
    pub kaks: PathBuf,

    #[arg(short = 'm', long, help = "Estimation method passed to the estimator", default_value = "YN")]
    pub method: String,

    #[arg(short = 'o', long, help = "Output raw table (pair, method, Ka, Ks, KaKs)")]
    pub out: PathBuf,

    #[arg(short = 't', long, help = "Number of concurrent estimator runs", default_value_t = 4)]
    pub threads: usize,

    #[arg(long, help = "Per-run timeout in seconds (0 disables)", default_value_t = 600)]
    pub timeout: u64,

    #[arg(long, help = "Fail on estimator output lines with an unexpected column count instead of skipping them")]
    pub strict: bool,
}

pub fn run(args: Args) -> Result<()> {
    let start_time = Instant::now();
    let axts = discover_axt(&args.axt_dir)?;
    let estimator = ToolSpec::new(&args.kaks);
    estimator.ensure_available()?;

    println!("---> Running {} on {} AXT file(s) with method {}...", estimator.name(), axts.len(), args.method);
    let config = KaksConfig {
        estimator,
        method: args.method.clone(),
        threads: args.threads,
        timeout_secs: args.timeout,
        mode: if args.strict { ParseMode::Strict } else { ParseMode::Lenient },
    };
    let run = run_kaks(axts, &config)?;
    write_raw_table(&args.out, &run.results)?;

    info!(rows = run.results.len(), skipped = run.skipped_lines, "raw table written");
    println!("✔ {} result row(s) written to {} in {:.2?}", run.results.len(), args.out.display(), start_time.elapsed());
    if run.skipped_lines > 0 {
        println!("  - {} malformed estimator line(s) skipped (use --strict to fail instead)", run.skipped_lines);
    }
    Ok(())
}
