// ==================================================================================
// `common` module: Shared utility functions
// ==================================================================================
use anyhow::{Context, Result};
use flate2::bufread::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Opens a plain or gzip-compressed text file.
pub fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let buf_reader = BufReader::new(file);
    let reader: Box<dyn BufRead> = if path.extension().map_or(false, |ext| ext == "gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(buf_reader)))
    } else {
        Box::new(buf_reader)
    };
    Ok(reader)
}

/// Tab-separated reader with a mandatory header row; `#` lines are comments.
pub fn tsv_reader<R: std::io::Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(reader)
}

pub fn tsv_writer(path: &Path) -> Result<csv::Writer<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(file))
}

/// File stem shared by every artifact of one pair: `geneA__geneB` with
/// path-unsafe characters replaced by `_`.
pub fn pair_stem(gene_a: &str, gene_b: &str) -> String {
    format!("{}__{}", gene_a, gene_b)
        .chars()
        .map(|c| match c {
            '|' | '/' | '\\' | ':' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Bar over the units of one pool stage.
pub fn progress_bar(len: usize, what: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.blue} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    pb.set_message(what.to_string());
    Ok(pb)
}

/// Collapses a multi-line message so it fits in one TSV cell.
pub fn one_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
        .replace('\t', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};

    #[test]
    fn test_pair_stem_replaces_unsafe_characters() {
        assert_eq!(pair_stem("g1", "g2"), "g1__g2");
        assert_eq!(pair_stem("chr1|g1", "chr2/g2"), "chr1_g1__chr2_g2");
    }

    #[test]
    fn test_tsv_writer_never_quotes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("failed.tsv");
        let mut wtr = tsv_writer(&path).unwrap();
        let reason = one_line("pal2nal: \"g2\" not found,\n  aborting");
        wtr.write_record(["g1", "g2", reason.as_str()]).unwrap();
        wtr.flush().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "g1\tg2\tpal2nal: \"g2\" not found, | aborting\n"
        );
    }

    #[test]
    fn test_one_line() {
        assert_eq!(one_line("a\n\n  b\tc \n"), "a | b c");
    }

    #[test]
    fn test_open_reader_handles_gzip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cds.fa.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b">g1\nATG\n").unwrap();
        enc.finish().unwrap();

        let mut text = String::new();
        open_reader(&path).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, ">g1\nATG\n");
    }
}
