//! The quality-gated positional Hamming matcher.
//!
//! Deliberately not built on `zoe`'s `find_fuzzy_substring`: that is an
//! edit-distance substring search, whereas this matcher compares a single
//! fixed-position subsequence against a catalogue of same-length expected
//! barcodes under per-base quality gating, tracking a second-best for
//! classification. See `DESIGN.md` for the full rationale.

use super::catalogue::BarcodeSlotTable;

/// The outcome of matching one extracted barcode subsequence against one
/// slot's expected-barcode table.
#[derive(Debug, Clone)]
pub struct BarcodeMatch {
    pub matched: bool,
    pub read_sequence: Vec<u8>,
    pub barcode: Vec<u8>,
    pub mismatches: u32,
    pub mismatches_to_second_best: u32,
}

fn is_clean_expected_base(b: u8) -> bool {
    matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T')
}

/// Matches `sequence` (with its normalized-Phred `quality`) against `slot`'s
/// expected barcodes, under the given per-slot thresholds.
pub fn match_barcode(
    slot: &BarcodeSlotTable, sequence: &[u8], quality: &[u8], max_mismatches: u32, min_mismatch_delta: u32,
    min_base_quality: u8,
) -> BarcodeMatch {
    let upper: Vec<u8> = sequence.to_ascii_uppercase();

    if slot.contains_exact(&upper) {
        return BarcodeMatch {
            matched: true,
            read_sequence: sequence.to_vec(),
            barcode: upper.clone(),
            mismatches: 0,
            mismatches_to_second_best: sequence.len() as u32,
        };
    }

    let mut best: Option<(usize, u32)> = None;
    let mut second_best_mm = sequence.len() as u32;

    for (i, expected) in slot.expected.iter().enumerate() {
        let len = expected.len().min(sequence.len());
        let mut mm = 0u32;
        for j in 0..len {
            let expected_base = expected[j].to_ascii_uppercase();
            if !is_clean_expected_base(expected_base) {
                continue;
            }
            let observed_base = upper[j];
            if observed_base == b'N' {
                mm += 1;
            } else if observed_base != expected_base {
                mm += 1;
            } else if quality.get(j).copied().unwrap_or(0) < min_base_quality {
                mm += 1;
            }
        }

        match best {
            None => best = Some((i, mm)),
            Some((_, best_mm)) if mm < best_mm => {
                second_best_mm = second_best_mm.min(best_mm);
                best = Some((i, mm));
            }
            Some((_, _)) if mm < second_best_mm => {
                second_best_mm = mm;
            }
            _ => {}
        }
    }

    let Some((best_idx, best_mm)) = best else {
        return BarcodeMatch {
            matched: false,
            read_sequence: sequence.to_vec(),
            barcode: Vec::new(),
            mismatches: sequence.len() as u32,
            mismatches_to_second_best: 0,
        };
    };

    let delta = second_best_mm.saturating_sub(best_mm);
    let matched = best_mm <= max_mismatches && delta >= min_mismatch_delta;

    BarcodeMatch {
        matched,
        read_sequence: sequence.to_vec(),
        barcode: slot.expected[best_idx].clone(),
        mismatches: best_mm,
        mismatches_to_second_best: second_best_mm,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barcode::catalogue::BarcodeCatalogue;

    fn slot(table: &str) -> BarcodeCatalogue {
        BarcodeCatalogue::parse(table).unwrap()
    }

    #[test]
    fn exact_match_takes_the_fast_path() {
        let cat = slot("SAMPLE\tBARCODE1\nsampleA\tACGT\n");
        let m = match_barcode(cat.slot(1).unwrap(), b"ACGT", &[40, 40, 40, 40], 0, 1, 0);
        assert!(m.matched);
        assert_eq!(m.mismatches, 0);
        assert_eq!(m.mismatches_to_second_best, 4);
    }

    #[test]
    fn s2_one_mismatch_within_tolerance() {
        let cat = slot("SAMPLE\tBARCODE1\nsampleA\tACGT\nsampleB\tTTTT\n");
        let m = match_barcode(cat.slot(1).unwrap(), b"ACGA", &[40, 40, 40, 40], 1, 1, 0);
        assert!(m.matched);
        assert_eq!(m.mismatches, 1);
        assert_eq!(m.mismatches_to_second_best, 4);
    }

    #[test]
    fn s3_ambiguous_delta_too_small() {
        let cat = slot("SAMPLE\tBARCODE1\nsampleA\tACGT\nsampleB\tACGA\n");
        let m = match_barcode(cat.slot(1).unwrap(), b"ACGC", &[40, 40, 40, 40], 1, 2, 0);
        assert!(!m.matched);
        assert_eq!(m.mismatches, 1);
        assert_eq!(m.mismatches_to_second_best, 1);
    }

    #[test]
    fn low_quality_base_counts_as_mismatch_even_when_bases_match() {
        let cat = slot("SAMPLE\tBARCODE1\nsampleA\tACGT\n");
        let m = match_barcode(cat.slot(1).unwrap(), b"ACGT", &[40, 40, 40, 2], 0, 1, 20);
        assert_eq!(m.mismatches, 1);
    }

    #[test]
    fn n_in_observed_sequence_is_always_a_mismatch() {
        let cat = slot("SAMPLE\tBARCODE1\nsampleA\tACGT\n");
        let m = match_barcode(cat.slot(1).unwrap(), b"ACGN", &[40, 40, 40, 40], 0, 1, 0);
        assert_eq!(m.mismatches, 1);
    }

    #[test]
    fn ambiguous_expected_base_is_skipped_not_mismatched() {
        let cat = slot("SAMPLE\tBARCODE1\nsampleA\tACGN\n");
        let m = match_barcode(cat.slot(1).unwrap(), b"ACGT", &[40, 40, 40, 40], 0, 1, 0);
        assert_eq!(m.mismatches, 0);
    }
}
