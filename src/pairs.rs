// ==================================================================================
// `pairs` subcommand module: gene pair loading, de-duplication and derivation
// ==================================================================================
use crate::common::{open_reader, tsv_reader, tsv_writer};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const PARALOG_FAMILY: &str = "paralog_family";
pub const SYNTENIC: &str = "syntenic";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenePair {
    pub gene_a: String,
    pub gene_b: String,
    pub pair_type: String,
}

impl GenePair {
    pub fn new(gene_a: impl Into<String>, gene_b: impl Into<String>, pair_type: impl Into<String>) -> Self {
        GenePair {
            gene_a: gene_a.into(),
            gene_b: gene_b.into(),
            pair_type: pair_type.into(),
        }
    }

    /// Identity of the unordered pair.
    pub fn canonical_key(&self) -> (&str, &str) {
        if self.gene_a <= self.gene_b {
            (&self.gene_a, &self.gene_b)
        } else {
            (&self.gene_b, &self.gene_a)
        }
    }

    /// `geneA__geneB`, the id the estimator stage reports results under.
    pub fn pair_id(&self) -> String {
        format!("{}__{}", self.gene_a, self.gene_b)
    }
}

/// Keeps the first pair seen for each unordered gene set and drops self pairs.
pub fn dedup_pairs(pairs: impl IntoIterator<Item = GenePair>) -> Vec<GenePair> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut unique = Vec::new();
    for pair in pairs {
        if pair.gene_a == pair.gene_b {
            warn!(gene = %pair.gene_a, "dropping self pair");
            continue;
        }
        let (a, b) = pair.canonical_key();
        if seen.insert((a.to_string(), b.to_string())) {
            unique.push(pair);
        }
    }
    unique
}

/// Reads a `geneA  geneB  type` table. The header row is mandatory; a missing
/// type column yields `NA`.
pub fn load_pairs(path: &Path) -> Result<Vec<GenePair>> {
    let mut rdr = tsv_reader(open_reader(path)?);
    let mut pairs = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read pairs table: {:?}", path))?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let gene_a = record.get(0).map(str::trim).unwrap_or_default();
        let gene_b = record.get(1).map(str::trim).unwrap_or_default();
        if gene_a.is_empty() || gene_b.is_empty() {
            return Err(anyhow!("{:?} row {}: expected at least geneA and geneB columns", path, i + 2));
        }
        let pair_type = record.get(2).map(str::trim).filter(|t| !t.is_empty()).unwrap_or("NA");
        pairs.push(GenePair::new(gene_a, gene_b, pair_type));
    }
    let total = pairs.len();
    let pairs = dedup_pairs(pairs);
    if pairs.len() < total {
        info!(path = ?path, kept = pairs.len(), dropped = total - pairs.len(), "collapsed duplicate pairs");
    }
    Ok(pairs)
}

pub fn write_pairs(path: &Path, pairs: &[GenePair]) -> Result<()> {
    let mut wtr = tsv_writer(path)?;
    wtr.write_record(["geneA", "geneB", "type"])?;
    for p in pairs {
        wtr.write_record([&p.gene_a, &p.gene_b, &p.pair_type])?;
    }
    wtr.flush()?;
    Ok(())
}

/// All 2-combinations of the unique genes (first token of each line).
pub fn pairs_from_gene_list<R: BufRead>(reader: R, pair_type: &str) -> Result<Vec<GenePair>> {
    let mut genes = BTreeSet::new();
    for line in reader.lines() {
        let line = line?;
        if let Some(gene) = line.split_whitespace().next() {
            genes.insert(gene.to_string());
        }
    }
    let genes: Vec<String> = genes.into_iter().collect();
    let mut pairs = Vec::with_capacity(genes.len() * genes.len().saturating_sub(1) / 2);
    for (i, a) in genes.iter().enumerate() {
        for b in &genes[i + 1..] {
            pairs.push(GenePair::new(a.as_str(), b.as_str(), pair_type));
        }
    }
    Ok(pairs)
}

/// `N=<n>` from an MCScanX block header such as `## Alignment 3: score=... N=12 ...`.
fn block_size(header: &str) -> Option<usize> {
    let body = header.trim_start_matches('#').trim_start();
    let mut tokens = body.split_whitespace();
    if !tokens.next()?.eq_ignore_ascii_case("alignment") {
        return None;
    }
    tokens.find_map(|t| t.strip_prefix("N=").and_then(|n| n.parse().ok()))
}

/// Gene columns of one collinearity row.
fn row_genes(line: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let first = *parts.first()?;
    let (a, b) = if first.ends_with(':') && first.contains('-') {
        // "0-12:  geneA  geneB  evalue"
        (*parts.get(1)?, *parts.get(2)?)
    } else if first.ends_with('-') && parts.get(1).map_or(false, |p| p.ends_with(':')) {
        // "0-  0:  geneA  geneB  evalue"
        (*parts.get(2)?, *parts.get(3)?)
    } else if first.chars().all(|c| c.is_ascii_digit()) {
        // "idx  geneA  geneB ..."
        (*parts.get(1)?, *parts.get(2)?)
    } else {
        (*parts.first()?, *parts.get(1)?)
    };
    Some((a, b))
}

/// Pairs from an MCScanX `.collinearity` file. With `min_block_hits > 0` only
/// rows inside blocks whose header reports `N >= min_block_hits` are kept.
pub fn pairs_from_collinearity<R: BufRead>(reader: R, min_block_hits: usize) -> Result<Vec<GenePair>> {
    let mut pairs = Vec::new();
    let mut keep_block = min_block_hits == 0;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            if min_block_hits > 0 {
                keep_block = false;
            }
            continue;
        }
        if line.starts_with('#') {
            if min_block_hits > 0 {
                if let Some(n) = block_size(line) {
                    keep_block = n >= min_block_hits;
                }
            }
            continue;
        }
        if !keep_block {
            continue;
        }
        if let Some((a, b)) = row_genes(line) {
            pairs.push(GenePair::new(a, b, SYNTENIC));
        }
    }
    Ok(dedup_pairs(pairs))
}

/// Reproducible subsample of `max_pairs` pairs, kept in their original order.
pub fn subsample(pairs: Vec<GenePair>, max_pairs: usize, seed: u64) -> Vec<GenePair> {
    if max_pairs == 0 || pairs.len() <= max_pairs {
        return pairs;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, pairs.len(), max_pairs).into_vec();
    picked.sort_unstable();
    let mut picked = picked.into_iter().peekable();
    pairs
        .into_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            if picked.peek() == Some(&i) {
                picked.next();
                Some(p)
            } else {
                None
            }
        })
        .collect()
}

#[derive(Parser, Debug)]
#[command(name = "pairs", about = "Derive a gene pair table from a gene list or an MCScanX collinearity file")]
pub struct Args {
    #[arg(long, help = "Gene list (first column); every 2-combination becomes a pair", conflicts_with = "collinearity", required_unless_present = "collinearity")]
    pub gene_list: Option<PathBuf>,

    #[arg(long, help = "MCScanX .collinearity file")]
    pub collinearity: Option<PathBuf>,

    #[arg(short = 'o', long, help = "Output pairs table (geneA, geneB, type)")]
    pub out: PathBuf,

    #[arg(long, help = "Only keep collinearity blocks with at least this many anchors (0 keeps every row)", default_value_t = 0)]
    pub min_block_hits: usize,

    #[arg(long, help = "Randomly keep at most this many pairs (0 means no limit)", default_value_t = 0)]
    pub max_pairs: usize,

    #[arg(long, help = "Seed for --max-pairs subsampling", default_value_t = 7)]
    pub seed: u64,

    #[arg(long, help = "Type tag for pairs derived from a gene list", default_value = PARALOG_FAMILY)]
    pub pair_type: String,
}

pub fn run(args: Args) -> Result<()> {
    let pairs = match (&args.gene_list, &args.collinearity) {
        (Some(list), _) => pairs_from_gene_list(open_reader(list)?, &args.pair_type)?,
        (None, Some(col)) => pairs_from_collinearity(open_reader(col)?, args.min_block_hits)?,
        (None, None) => return Err(anyhow!("Either --gene-list or --collinearity is required")),
    };
    let derived = pairs.len();
    let pairs = subsample(pairs, args.max_pairs, args.seed);
    write_pairs(&args.out, &pairs)?;
    println!("✔ Wrote {} pair(s) ({} derived) to {}", pairs.len(), derived, args.out.display());
    Ok(())
}
