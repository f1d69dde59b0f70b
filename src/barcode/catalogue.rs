//! Barcode table parsing (simple and general forms) and the flattened
//! lookup structures the matcher and resolver consume.

use crate::errors::ConfigurationError;
use crate::utils::{SeedableFoldHashMap, get_seed};
use std::path::PathBuf;

fn is_iupac_base(b: u8) -> bool {
    matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'U' | b'N')
}

fn bad_table(reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::MalformedBarcodeTable { reason: reason.into() }
}

/// The per-slot flattened lookup the matcher reads from: every allowed
/// sequence for this barcode slot id, plus a precomputed exact-match set for
/// the fast path described in `SPEC_FULL.md` §9.
pub struct BarcodeSlotTable {
    pub id:        u32,
    pub length:    usize,
    pub expected:  Vec<Vec<u8>>,
    exact_set:     SeedableFoldHashMap<Vec<u8>, ()>,
}

impl BarcodeSlotTable {
    pub fn contains_exact(&self, sequence: &[u8]) -> bool {
        self.exact_set.get(sequence).is_some()
    }
}

struct SampleEntry {
    name:             String,
    /// Per barcode slot id (1-indexed position == slot id - 1), the
    /// redundancy set of sequences allowed for that sample.
    redundancy_sets:  Vec<Vec<Vec<u8>>>,
    /// Per output-layout index, the explicit output filename if provided.
    output_filenames: Vec<Option<PathBuf>>,
}

/// The parsed sample <-> barcode table, flattened for lookup.
pub struct BarcodeCatalogue {
    slots:         Vec<BarcodeSlotTable>,
    samples:       Vec<SampleEntry>,
    code_to_sample: SeedableFoldHashMap<Vec<u8>, String>,
}

impl BarcodeCatalogue {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, id: u32) -> Option<&BarcodeSlotTable> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn sample_names(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|s| s.name.as_str())
    }

    pub fn output_filename(&self, sample: &str, output_index: usize) -> Option<&PathBuf> {
        self.samples
            .iter()
            .find(|s| s.name == sample)
            .and_then(|s| s.output_filenames.get(output_index))
            .and_then(|p| p.as_ref())
    }

    pub fn lookup_code(&self, code: &[u8]) -> Option<&str> {
        self.code_to_sample.get(code).map(String::as_str)
    }

    /// Parses a barcode table, detecting whether it is in simple or general
    /// form. Tab-separated, per `SPEC_FULL.md` §6.
    pub fn parse(text: &str) -> Result<BarcodeCatalogue, ConfigurationError> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else {
            return Err(bad_table("table is empty"));
        };

        let is_general = first.split('\t').next() == Some("SAMPLE");
        let rows: Vec<(String, Vec<Vec<Vec<u8>>>, Vec<Option<PathBuf>>)> = if is_general {
            parse_general(first, lines)?
        } else {
            parse_simple(std::iter::once(first).chain(lines))?
        };

        build_catalogue(rows)
    }
}

/// Parses the general form: `SAMPLE BARCODE1..N OUT1..M` header, tab-delimited.
fn parse_general<'a>(
    header: &str, rows: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, Vec<Vec<Vec<u8>>>, Vec<Option<PathBuf>>)>, ConfigurationError> {
    let fields: Vec<&str> = header.split('\t').collect();
    if fields.first() != Some(&"SAMPLE") {
        return Err(bad_table("general-form header must start with 'SAMPLE'"));
    }

    let mut barcode_cols: Vec<(usize, u32)> = Vec::new();
    let mut out_cols: Vec<(usize, u32)> = Vec::new();
    for (col, field) in fields.iter().enumerate().skip(1) {
        if let Some(digits) = field.strip_prefix("BARCODE") {
            let id = digits
                .parse::<u32>()
                .map_err(|_| bad_table(format!("invalid BARCODE column header '{field}'")))?;
            barcode_cols.push((col, id));
        } else if let Some(digits) = field.strip_prefix("OUT") {
            let idx = digits
                .parse::<u32>()
                .map_err(|_| bad_table(format!("invalid OUT column header '{field}'")))?;
            out_cols.push((col, idx));
        } else {
            return Err(bad_table(format!("unexpected column header '{field}'")));
        }
    }
    if barcode_cols.is_empty() {
        return Err(bad_table("general-form header declares no BARCODE columns"));
    }
    barcode_cols.sort_by_key(|&(_, id)| id);
    out_cols.sort_by_key(|&(_, id)| id);
    let expected_ids: Vec<u32> = (1..=barcode_cols.len() as u32).collect();
    if barcode_cols.iter().map(|&(_, id)| id).collect::<Vec<_>>() != expected_ids {
        return Err(bad_table("BARCODE column ids must be contiguous starting at 1"));
    }
    let expected_out_ids: Vec<u32> = (1..=out_cols.len() as u32).collect();
    if out_cols.iter().map(|&(_, id)| id).collect::<Vec<_>>() != expected_out_ids {
        return Err(bad_table("OUT column ids must be contiguous starting at 1"));
    }

    let mut out = Vec::new();
    for row in rows {
        let cells: Vec<&str> = row.split('\t').collect();
        if cells.len() != fields.len() {
            return Err(bad_table(format!("row '{row}' has {} columns, expected {}", cells.len(), fields.len())));
        }
        let sample = cells[0].to_string();
        let redundancy_sets: Vec<Vec<Vec<u8>>> = barcode_cols
            .iter()
            .map(|&(col, _)| parse_redundancy_cell(cells[col]))
            .collect();
        let output_filenames: Vec<Option<PathBuf>> = out_cols
            .iter()
            .map(|&(col, _)| if cells[col].is_empty() { None } else { Some(PathBuf::from(cells[col])) })
            .collect();
        out.push((sample, redundancy_sets, output_filenames));
    }
    Ok(out)
}

/// Parses the simple (positional) form, lossless-converting it to the same
/// shape the general-form parser produces: 2 columns (sample, barcodes), 3
/// (+ single output file), or 4 (+ two output files, paired-end). Within the
/// barcodes cell, `:` separates per-slot barcodes.
fn parse_simple<'a>(
    rows: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, Vec<Vec<Vec<u8>>>, Vec<Option<PathBuf>>)>, ConfigurationError> {
    let mut out = Vec::new();
    let mut ncols = None;
    for row in rows {
        let cells: Vec<&str> = row.split('\t').collect();
        match ncols {
            None => ncols = Some(cells.len()),
            Some(n) if n != cells.len() => {
                return Err(bad_table(format!("row '{row}' has {} columns, expected {n}", cells.len())));
            }
            _ => {}
        }
        if !(2..=4).contains(&cells.len()) {
            return Err(bad_table(format!("simple-form row '{row}' must have 2-4 columns")));
        }

        let sample = cells[0].to_string();
        let redundancy_sets: Vec<Vec<Vec<u8>>> =
            cells[1].split(':').map(parse_redundancy_cell).collect();
        let output_filenames: Vec<Option<PathBuf>> = cells[2..].iter().map(|c| Some(PathBuf::from(*c))).collect();
        out.push((sample, redundancy_sets, output_filenames));
    }
    Ok(out)
}

fn parse_redundancy_cell(cell: &str) -> Vec<Vec<u8>> {
    cell.split('|').map(|s| s.as_bytes().to_vec()).collect()
}

fn build_catalogue(
    rows: Vec<(String, Vec<Vec<Vec<u8>>>, Vec<Option<PathBuf>>)>,
) -> Result<BarcodeCatalogue, ConfigurationError> {
    if rows.is_empty() {
        return Err(bad_table("table declares no samples"));
    }
    let slot_count = rows[0].1.len();
    if slot_count == 0 {
        return Err(bad_table("table declares no barcode slots"));
    }

    let mut slot_lengths: Vec<Option<usize>> = vec![None; slot_count];
    let mut slot_union: Vec<Vec<Vec<u8>>> = vec![Vec::new(); slot_count];
    let mut samples = Vec::with_capacity(rows.len());

    for (name, redundancy_sets, output_filenames) in rows {
        if redundancy_sets.len() != slot_count {
            return Err(bad_table(format!(
                "sample '{name}' declares {} barcode slots, expected {slot_count}",
                redundancy_sets.len()
            )));
        }
        if samples.iter().any(|s: &SampleEntry| s.name == name) {
            return Err(ConfigurationError::DuplicateSampleName { sample: name });
        }

        for (slot_idx, set) in redundancy_sets.iter().enumerate() {
            for seq in set {
                if !seq.iter().all(|&b| is_iupac_base(b)) {
                    return Err(bad_table(format!(
                        "sample '{name}' barcode slot {} contains a non-IUPAC byte in '{}'",
                        slot_idx + 1,
                        String::from_utf8_lossy(seq)
                    )));
                }
                match slot_lengths[slot_idx] {
                    None => slot_lengths[slot_idx] = Some(seq.len()),
                    Some(len) if len != seq.len() => {
                        return Err(bad_table(format!(
                            "barcode slot {} has sequences of differing lengths",
                            slot_idx + 1
                        )));
                    }
                    _ => {}
                }
                let seq_upper: Vec<u8> = seq.to_ascii_uppercase();
                if !slot_union[slot_idx].contains(&seq_upper) {
                    slot_union[slot_idx].push(seq_upper);
                }
            }
        }

        samples.push(SampleEntry { name, redundancy_sets, output_filenames });
    }

    let mut slots = Vec::with_capacity(slot_count);
    for (i, expected) in slot_union.into_iter().enumerate() {
        let mut exact_set = SeedableFoldHashMap::new(get_seed());
        for seq in &expected {
            exact_set.insert(seq.clone(), ());
        }
        slots.push(BarcodeSlotTable {
            id: (i + 1) as u32,
            length: slot_lengths[i].unwrap_or(0),
            expected,
            exact_set,
        });
    }

    let mut code_to_sample: SeedableFoldHashMap<Vec<u8>, String> = SeedableFoldHashMap::new(get_seed());
    for sample in &samples {
        for code in cartesian_codes(&sample.redundancy_sets) {
            if let Some(existing) = code_to_sample.get(&code) {
                if existing != &sample.name {
                    return Err(ConfigurationError::CollidingConcatenatedCode {
                        code: String::from_utf8_lossy(&code).to_string(),
                        sample_a: existing.clone(),
                        sample_b: sample.name.clone(),
                    });
                }
            } else {
                code_to_sample.insert(code, sample.name.clone());
            }
        }
    }

    Ok(BarcodeCatalogue { slots, samples, code_to_sample })
}

/// Enumerates every concatenated code for one sample: the Cartesian product
/// across its per-slot redundancy sets, concatenated in slot-id order.
fn cartesian_codes(redundancy_sets: &[Vec<Vec<u8>>]) -> Vec<Vec<u8>> {
    let mut codes = vec![Vec::new()];
    for set in redundancy_sets {
        let mut next = Vec::with_capacity(codes.len() * set.len().max(1));
        for prefix in &codes {
            for seq in set {
                let mut code = prefix.clone();
                code.extend_from_slice(&seq.to_ascii_uppercase());
                next.push(code);
            }
        }
        codes = next;
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_general_form_with_redundancy_and_outputs() {
        let table = "SAMPLE\tBARCODE1\tOUT1\nsampleA\tACGT|ACGA\tA.fastq\nsampleB\tTTTT\tB.fastq\n";
        let catalogue = BarcodeCatalogue::parse(table).unwrap();
        assert_eq!(catalogue.slot_count(), 1);
        assert_eq!(catalogue.lookup_code(b"ACGT"), Some("sampleA"));
        assert_eq!(catalogue.lookup_code(b"ACGA"), Some("sampleA"));
        assert_eq!(catalogue.lookup_code(b"TTTT"), Some("sampleB"));
        assert_eq!(catalogue.output_filename("sampleA", 0).unwrap(), &PathBuf::from("A.fastq"));
    }

    #[test]
    fn parses_simple_form_with_colon_split_slots() {
        let table = "sampleA\tACGT:TTAA\nsampleB\tACGA:TTAA\n";
        let catalogue = BarcodeCatalogue::parse(table).unwrap();
        assert_eq!(catalogue.slot_count(), 2);
        assert_eq!(catalogue.lookup_code(b"ACGTTTAA"), Some("sampleA"));
    }

    #[test]
    fn rejects_colliding_concatenated_codes() {
        let table = "SAMPLE\tBARCODE1\nsampleA\tACGT\nsampleB\tACGT\n";
        assert!(BarcodeCatalogue::parse(table).is_err());
    }

    #[test]
    fn rejects_duplicate_sample_names() {
        let table = "SAMPLE\tBARCODE1\nsampleA\tACGT\nsampleA\tTTTT\n";
        assert!(BarcodeCatalogue::parse(table).is_err());
    }

    #[test]
    fn rejects_unequal_length_barcodes_in_a_column() {
        let table = "SAMPLE\tBARCODE1\nsampleA\tACGT\nsampleB\tAC\n";
        assert!(BarcodeCatalogue::parse(table).is_err());
    }
}
