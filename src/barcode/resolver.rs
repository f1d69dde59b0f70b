//! Combines per-slot barcode matches into a single sample decision.

use super::catalogue::BarcodeCatalogue;
use super::matcher::BarcodeMatch;
use std::collections::HashSet;

pub const UNASSIGNED: &str = "unassigned";

/// A sample decision for one input record: either a resolved sample name, or
/// `None` (unassigned), plus the per-slot match that was actually used and a
/// free-form diagnostic note.
pub struct SampleMatch {
    pub sample: Option<String>,
    pub barcode_matches: Vec<(u32, BarcodeMatch)>,
    pub note: String,
}

impl SampleMatch {
    pub fn sample_or_unassigned(&self) -> &str {
        self.sample.as_deref().unwrap_or(UNASSIGNED)
    }

    pub fn matched_barcode(&self, id: u32) -> Option<&str> {
        self.barcode_matches
            .iter()
            .find(|(slot_id, _)| *slot_id == id)
            .map(|(_, m)| std::str::from_utf8(&m.barcode).unwrap_or(""))
    }
}

/// Picks, for each slot, the lowest-mismatch entry (any match quality)
/// purely for diagnostic purposes when the record ends up unassigned.
fn best_observed(matches: &[BarcodeMatch]) -> Option<BarcodeMatch> {
    matches.iter().min_by_key(|m| m.mismatches).cloned()
}

/// Per slot, drops unmatched entries and keeps only the lowest-mismatch
/// representative per distinct barcode string.
fn collapse_redundancy(matches: &[BarcodeMatch]) -> Vec<BarcodeMatch> {
    let mut by_barcode: Vec<BarcodeMatch> = Vec::new();
    for m in matches.iter().filter(|m| m.matched) {
        if let Some(existing) = by_barcode.iter_mut().find(|e| e.barcode == m.barcode) {
            if m.mismatches < existing.mismatches {
                *existing = m.clone();
            }
        } else {
            by_barcode.push(m.clone());
        }
    }
    by_barcode
}

/// Builds the Cartesian product of per-slot surviving matches into candidate
/// assignments: `(concatenated_code, summed_mismatches, chosen_per_slot)`.
fn enumerate_candidates(per_slot: &[(u32, Vec<BarcodeMatch>)]) -> Vec<(Vec<u8>, u32, Vec<(u32, BarcodeMatch)>)> {
    let mut acc: Vec<(Vec<u8>, u32, Vec<(u32, BarcodeMatch)>)> = vec![(Vec::new(), 0, Vec::new())];
    for (id, survivors) in per_slot {
        let mut next = Vec::with_capacity(acc.len() * survivors.len());
        for (code, mm_sum, chosen) in &acc {
            for m in survivors {
                let mut code = code.clone();
                code.extend_from_slice(&m.barcode);
                let mut chosen = chosen.clone();
                chosen.push((*id, m.clone()));
                next.push((code, mm_sum + m.mismatches, chosen));
            }
        }
        acc = next;
    }
    acc
}

fn unassigned_note(per_slot: &[(u32, Vec<BarcodeMatch>)]) -> String {
    let parts: Vec<String> = per_slot
        .iter()
        .map(|(id, matches)| {
            let mm = best_observed(matches).map(|m| m.mismatches as i64).unwrap_or(-1);
            format!("slot{id}={mm}")
        })
        .collect();
    format!("no consistent sample: {}", parts.join(","))
}

fn synthetic_barcode_matches(per_slot: &[(u32, Vec<BarcodeMatch>)]) -> Vec<(u32, BarcodeMatch)> {
    per_slot
        .iter()
        .filter_map(|(id, matches)| best_observed(matches).map(|m| (*id, m)))
        .collect()
}

/// Resolves a sample from the per-slot barcode matches of one record.
///
/// `per_slot` holds, for each barcode slot id, the list of [`BarcodeMatch`]
/// produced across every read layout that redundantly declares that slot (a
/// list of length 1 for a non-redundant slot).
pub fn resolve_sample(per_slot: &[(u32, Vec<BarcodeMatch>)], catalogue: &BarcodeCatalogue, strict: bool) -> SampleMatch {
    let collapsed: Vec<(u32, Vec<BarcodeMatch>)> =
        per_slot.iter().map(|(id, matches)| (*id, collapse_redundancy(matches))).collect();

    if collapsed.iter().any(|(_, survivors)| survivors.is_empty()) {
        return SampleMatch {
            sample: None,
            barcode_matches: synthetic_barcode_matches(per_slot),
            note: unassigned_note(per_slot),
        };
    }

    let candidates = enumerate_candidates(&collapsed);
    let resolved: Vec<(String, u32, Vec<(u32, BarcodeMatch)>)> = candidates
        .into_iter()
        .filter_map(|(code, mm_sum, chosen)| catalogue.lookup_code(&code).map(|s| (s.to_string(), mm_sum, chosen)))
        .collect();

    if resolved.is_empty() {
        return SampleMatch {
            sample: None,
            barcode_matches: synthetic_barcode_matches(per_slot),
            note: "no candidate concatenated code matched the catalogue".to_string(),
        };
    }

    let distinct_samples: HashSet<&str> = resolved.iter().map(|(s, _, _)| s.as_str()).collect();

    if distinct_samples.len() == 1 {
        let (sample, _, chosen) = resolved.into_iter().min_by_key(|(_, mm, _)| *mm).unwrap();
        return SampleMatch { sample: Some(sample), barcode_matches: chosen, note: String::new() };
    }

    if strict {
        let note = format!(
            "ambiguous under strict policy: {}",
            resolved.iter().map(|(s, mm, _)| format!("{s}:{mm}")).collect::<Vec<_>>().join(",")
        );
        return SampleMatch { sample: None, barcode_matches: synthetic_barcode_matches(per_slot), note };
    }

    let min_mm = resolved.iter().map(|(_, mm, _)| *mm).min().unwrap();
    let at_min: Vec<&(String, u32, Vec<(u32, BarcodeMatch)>)> = resolved.iter().filter(|(_, mm, _)| *mm == min_mm).collect();
    let distinct_at_min: HashSet<&str> = at_min.iter().map(|(s, _, _)| s.as_str()).collect();

    if distinct_at_min.len() == 1 {
        let (sample, _, chosen) = at_min.into_iter().next().unwrap();
        SampleMatch { sample: Some(sample.clone()), barcode_matches: chosen.clone(), note: String::new() }
    } else {
        let note = format!(
            "non-strict tie at mismatches={min_mm}: {}",
            at_min.iter().map(|(s, mm, _)| format!("{s}:{mm}")).collect::<Vec<_>>().join(",")
        );
        SampleMatch { sample: None, barcode_matches: synthetic_barcode_matches(per_slot), note }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bm(matched: bool, barcode: &[u8], mismatches: u32) -> BarcodeMatch {
        BarcodeMatch {
            matched,
            read_sequence: barcode.to_vec(),
            barcode: barcode.to_vec(),
            mismatches,
            mismatches_to_second_best: 4,
        }
    }

    #[test]
    fn resolves_unique_sample() {
        let cat = BarcodeCatalogue::parse("SAMPLE\tBARCODE1\nsampleA\tACGT\nsampleB\tTTTT\n").unwrap();
        let per_slot = vec![(1u32, vec![bm(true, b"ACGT", 0)])];
        let result = resolve_sample(&per_slot, &cat, true);
        assert_eq!(result.sample.as_deref(), Some("sampleA"));
    }

    #[test]
    fn strict_true_never_assigns_beyond_what_non_strict_assigns() {
        let cat = BarcodeCatalogue::parse("SAMPLE\tBARCODE1\nsampleA\tACGT\nsampleB\tACGA\n").unwrap();
        // two redundant matches, tied mismatches, mapping to different samples
        let per_slot = vec![(1u32, vec![bm(true, b"ACGT", 1), bm(true, b"ACGA", 1)])];
        let strict_result = resolve_sample(&per_slot, &cat, true);
        let non_strict_result = resolve_sample(&per_slot, &cat, false);
        assert!(strict_result.sample.is_none());
        assert!(non_strict_result.sample.is_none());
    }

    #[test]
    fn non_strict_breaks_ties_by_lowest_summed_mismatches() {
        let cat = BarcodeCatalogue::parse("SAMPLE\tBARCODE1\nsampleA\tACGT\nsampleB\tACGA\n").unwrap();
        let per_slot = vec![(1u32, vec![bm(true, b"ACGT", 0), bm(true, b"ACGA", 1)])];
        let result = resolve_sample(&per_slot, &cat, false);
        assert_eq!(result.sample.as_deref(), Some("sampleA"));
    }

    #[test]
    fn empty_surviving_slot_is_unassigned() {
        let cat = BarcodeCatalogue::parse("SAMPLE\tBARCODE1\nsampleA\tACGT\n").unwrap();
        let per_slot = vec![(1u32, vec![bm(false, b"", 3)])];
        let result = resolve_sample(&per_slot, &cat, false);
        assert!(result.sample.is_none());
    }
}
