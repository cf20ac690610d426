// ==================================================================================
// `filter` subcommand module: threshold filtering and pair-type annotation
// ==================================================================================
use crate::common::{open_reader, pair_stem, tsv_reader, tsv_writer};
use crate::pairs::{load_pairs, GenePair};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub min_ks: f64,
    pub max_ks: f64,
    pub max_w: f64,
}

impl Thresholds {
    /// Closed interval on Ks and a closed upper bound on Ka/Ks.
    pub fn accepts(&self, ks: f64, kaks: f64) -> bool {
        self.min_ks <= ks && ks <= self.max_ks && kaks <= self.max_w
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRow {
    pub pair: String,
    pub method: Option<String>,
    pub ka: String,
    pub ks: String,
    pub kaks: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatTable {
    pub has_method: bool,
    pub rows: Vec<StatRow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedRow {
    pub stat: StatRow,
    pub pair_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedTable {
    pub has_method: bool,
    pub rows: Vec<AnnotatedRow>,
}

/// Reads a raw (or already annotated) statistics table. Columns are located by
/// name; without `pair`/`Ka`/`Ks`/`KaKs` headers the first four columns are
/// taken as `pair Ka Ks KaKs`.
pub fn read_stat_table(path: &Path) -> Result<StatTable> {
    let mut rdr = tsv_reader(open_reader(path)?);
    let headers = rdr.headers().with_context(|| format!("Failed to read header of {:?}", path))?.clone();
    let col = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (pair, method, ka, ks, kaks) = match (col("pair"), col("Ka"), col("Ks"), col("KaKs")) {
        (Some(p), Some(a), Some(s), Some(w)) => (p, col("method"), a, s, w),
        _ => (0, None, 1, 2, 3),
    };

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.with_context(|| format!("Failed to read {:?}", path))?;
        let field = |i: usize| record.get(i).map(|f| f.trim().to_string());
        let Some(pair_id) = field(pair).filter(|p| !p.is_empty()) else {
            continue;
        };
        rows.push(StatRow {
            pair: pair_id,
            method: method.map(|m| field(m).unwrap_or_else(|| "NA".to_string())),
            ka: field(ka).unwrap_or_default(),
            ks: field(ks).unwrap_or_default(),
            kaks: field(kaks).unwrap_or_default(),
        });
    }
    Ok(StatTable {
        has_method: method.is_some(),
        rows,
    })
}

/// Parses a statistic, rejecting NaN and infinities.
fn finite(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Pair type keyed by `geneA__geneB` and by its path-safe stem.
pub fn type_lookup(pairs: &[GenePair]) -> HashMap<String, String> {
    let mut types = HashMap::new();
    for p in pairs {
        types.entry(p.pair_id()).or_insert_with(|| p.pair_type.clone());
        types
            .entry(pair_stem(&p.gene_a, &p.gene_b))
            .or_insert_with(|| p.pair_type.clone());
    }
    types
}

/// Drops rows with non-numeric statistics or outside `thresholds`, then
/// left-joins the pair type (`NA` when unknown).
pub fn filter_table(table: &StatTable, types: &HashMap<String, String>, thresholds: &Thresholds) -> AnnotatedTable {
    let rows = table
        .rows
        .iter()
        .filter(|row| match (finite(&row.ka), finite(&row.ks), finite(&row.kaks)) {
            (Some(_), Some(ks), Some(kaks)) => thresholds.accepts(ks, kaks),
            _ => false,
        })
        .map(|row| AnnotatedRow {
            stat: row.clone(),
            pair_type: types.get(&row.pair).cloned().unwrap_or_else(|| "NA".to_string()),
        })
        .collect();
    AnnotatedTable {
        has_method: table.has_method,
        rows,
    }
}

pub fn write_annotated(path: &Path, table: &AnnotatedTable) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    let mut header = vec!["pair"];
    if table.has_method {
        header.push("method");
    }
    header.extend(["Ka", "Ks", "KaKs", "type"]);
    wtr.write_record(&header)?;

    for row in &table.rows {
        let s = &row.stat;
        let mut record = vec![s.pair.as_str()];
        if table.has_method {
            record.push(s.method.as_deref().unwrap_or("NA"));
        }
        record.extend([s.ka.as_str(), s.ks.as_str(), s.kaks.as_str(), row.pair_type.as_str()]);
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "filter", about = "Filter raw Ka/Ks results by Ks range and Ka/Ks ceiling, annotating pair types")]
pub struct Args {
    #[arg(long, help = "Raw Ka/Ks table from run_kaks")]
    pub kaks_raw: PathBuf,

    #[arg(long, help = "Gene pair table (geneA, geneB, type) used for the type column")]
    pub pairs: PathBuf,

    #[arg(long, help = "Minimum Ks (inclusive)")]
    pub min_ks: f64,

    #[arg(long, help = "Maximum Ks (inclusive)")]
    pub max_ks: f64,

    #[arg(long, help = "Maximum Ka/Ks (inclusive)")]
    pub max_w: f64,

    #[arg(short = 'o', long, help = "Output annotated table")]
    pub out: PathBuf,
}

pub fn run(args: Args) -> Result<()> {
    if args.min_ks > args.max_ks {
        return Err(anyhow!("--min-ks ({}) is greater than --max-ks ({})", args.min_ks, args.max_ks));
    }
    let thresholds = Thresholds {
        min_ks: args.min_ks,
        max_ks: args.max_ks,
        max_w: args.max_w,
    };
    let table = read_stat_table(&args.kaks_raw)?;
    let types = type_lookup(&load_pairs(&args.pairs)?);
    let filtered = filter_table(&table, &types, &thresholds);
    write_annotated(&args.out, &filtered)?;

    info!(input = table.rows.len(), kept = filtered.rows.len(), "filter finished");
    println!(
        "✔ Kept {} of {} row(s) (Ks in [{}, {}], Ka/Ks <= {}) -> {}",
        filtered.rows.len(),
        table.rows.len(),
        thresholds.min_ks,
        thresholds.max_ks,
        thresholds.max_w,
        args.out.display()
    );
    Ok(())
}
