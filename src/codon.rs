// ==================================================================================
// `codon` module: standard genetic code translation
// ==================================================================================

/// Standard code, indexed by `16 * b1 + 4 * b2 + b3` with T=0, C=1, A=2, G=3.
const STANDARD_CODE: &[u8; 64] =
    b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

fn base_index(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'T' | b'U' => Some(0),
        b'C' => Some(1),
        b'A' => Some(2),
        b'G' => Some(3),
        _ => None,
    }
}

/// Amino acid for one triplet; `X` if any base is not A/C/G/T, `*` for stops.
pub fn translate_codon(codon: &[u8]) -> u8 {
    match codon {
        [a, b, c] => match (base_index(*a), base_index(*b), base_index(*c)) {
            (Some(a), Some(b), Some(c)) => STANDARD_CODE[16 * a + 4 * b + c],
            _ => b'X',
        },
        _ => b'X',
    }
}

/// Translates from position 0 in non-overlapping triplets. A trailing partial
/// codon is dropped.
pub fn translate(cds: &[u8]) -> String {
    cds.chunks_exact(3)
        .map(|codon| translate_codon(codon) as char)
        .collect()
}
