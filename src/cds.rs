// ==================================================================================
// `cds` module: gene id -> coding sequence lookup, read-only after load
// ==================================================================================
use crate::common::open_reader;
use anyhow::{Context, Result};
use bio::io::fasta;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Coding sequences keyed by the first whitespace token of each FASTA header.
#[derive(Debug, Default)]
pub struct CdsStore {
    seqs: HashMap<String, Vec<u8>>,
}

/// Upper-cases, maps `U` to `T` and drops any embedded whitespace.
pub fn normalize(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .filter(|b| !b.is_ascii_whitespace())
        .map(|b| match b.to_ascii_uppercase() {
            b'U' => b'T',
            other => other,
        })
        .collect()
}

impl CdsStore {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = fasta::Reader::new(open_reader(path)?);
        let mut store = CdsStore::default();
        for result in reader.records() {
            let record = result.with_context(|| format!("Failed to parse CDS fasta: {:?}", path))?;
            store.insert(record.id(), record.seq());
        }
        Ok(store)
    }

    pub fn insert(&mut self, gene_id: &str, seq: &[u8]) {
        if self.seqs.insert(gene_id.to_string(), normalize(seq)).is_some() {
            warn!(gene = gene_id, "duplicate CDS record; keeping the last one");
        }
    }

    pub fn get(&self, gene_id: &str) -> Option<&[u8]> {
        self.seqs.get(gene_id).map(Vec::as_slice)
    }

    pub fn contains(&self, gene_id: &str) -> bool {
        self.seqs.contains_key(gene_id)
    }

    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, &'a [u8])> for CdsStore {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a [u8])>>(iter: I) -> Self {
        let mut store = CdsStore::default();
        for (id, seq) in iter {
            store.insert(id, seq);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_normalizes_sequences() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cds.fa");
        fs::write(&path, ">g1 some description\natgu\nGCC\n>g2\nAAA\n").unwrap();

        let store = CdsStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("g1"), Some(&b"ATGTGCC"[..]));
        assert_eq!(store.get("g2"), Some(&b"AAA"[..]));
        assert!(!store.contains("g1 some description"));
        assert!(store.get("g3").is_none());
    }

    #[test]
    fn test_duplicate_ids_keep_last() {
        let store: CdsStore = [("g1", &b"AAA"[..]), ("g1", &b"CCC"[..])].into_iter().collect();
        assert_eq!(store.get("g1"), Some(&b"CCC"[..]));
    }
}
