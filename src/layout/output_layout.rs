//! Output-layout grammar parsing and record assembly.
//!
//! Short form (the canonical internal form): `([BURS]\d+)+`, where `B` =
//! BARCODE, `U` = UMI, `R` = READBAR, `S` = SAMPLE. The long form
//! (`<BARCODE1>`, `<UMI2>`, `<SAMPLE1>`, `<READBAR1>`) is accepted by lowering
//! to the short form before compilation.

use super::{ExtractedRead, ReadLayout, SlotKind};
use crate::errors::{ConfigurationError, RecordError};

/// The four operation kinds an output layout can emit. Distinct from
/// [`SlotKind`] because READBAR has no read-layout counterpart of its own —
/// it always means "the verbatim subsequence at a BARCODE slot".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputOpKind {
    Barcode,
    Umi,
    Readbar,
    Sample,
}

impl OutputOpKind {
    fn read_slot_kind(self) -> SlotKind {
        match self {
            OutputOpKind::Barcode | OutputOpKind::Readbar => SlotKind::Barcode,
            OutputOpKind::Umi => SlotKind::Umi,
            OutputOpKind::Sample => SlotKind::Sample,
        }
    }

    fn short_letter(self) -> char {
        match self {
            OutputOpKind::Barcode => 'B',
            OutputOpKind::Umi => 'U',
            OutputOpKind::Readbar => 'R',
            OutputOpKind::Sample => 'S',
        }
    }

    fn name(self) -> &'static str {
        match self {
            OutputOpKind::Barcode => "BARCODE",
            OutputOpKind::Umi => "UMI",
            OutputOpKind::Readbar => "READBAR",
            OutputOpKind::Sample => "SAMPLE",
        }
    }
}

/// One compiled operation: a slot kind+id, plus the (sorted, non-empty) list
/// of read-layout indices it can be extracted from.
#[derive(Debug, Clone)]
pub struct OutputOp {
    pub kind:                OutputOpKind,
    pub id:                  u32,
    pub extractable_layouts: Vec<usize>,
}

/// A compiled output layout: a plan for the sequence half and a plan for the
/// header half, both bound to the same array of read layouts.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub sequence_ops: Vec<OutputOp>,
    pub header_ops:   Vec<OutputOp>,
}

fn malformed(raw: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::MalformedOutputLayout { layout: raw.to_string(), reason: reason.into() }
}

/// Lowers the long form (`<BARCODE1><SAMPLE2>`) to the short form (`B1S2`).
/// A string with no `<` is assumed to already be in short form.
fn lower_to_short_form(raw: &str) -> Result<String, ConfigurationError> {
    if !raw.contains('<') {
        return Ok(raw.to_string());
    }

    let mut out = String::new();
    let mut rest = raw;
    while !rest.is_empty() {
        let Some(open) = rest.strip_prefix('<') else {
            return Err(malformed(raw, "expected '<' to start a long-form token"));
        };
        let Some(close) = open.find('>') else {
            return Err(malformed(raw, "unterminated long-form token (missing '>')"));
        };
        let token = &open[..close];
        let digit_start = token.find(|c: char| c.is_ascii_digit()).unwrap_or(token.len());
        let (name, digits) = token.split_at(digit_start);
        let letter = match name {
            "BARCODE" => 'B',
            "UMI" => 'U',
            "READBAR" => 'R',
            "SAMPLE" => 'S',
            other => return Err(malformed(raw, format!("unknown long-form token '{other}'"))),
        };
        let id = if digits.is_empty() { "1" } else { digits };
        out.push(letter);
        out.push_str(id);
        rest = &open[close + 1..];
    }
    Ok(out)
}

fn parse_short_form(raw: &str, short: &str) -> Result<Vec<(OutputOpKind, u32)>, ConfigurationError> {
    if short.is_empty() {
        return Err(malformed(raw, "output layout must contain at least one operation"));
    }

    let bytes = short.as_bytes();
    let mut i = 0usize;
    let mut ops = Vec::new();
    while i < bytes.len() {
        let kind = match bytes[i] {
            b'B' => OutputOpKind::Barcode,
            b'U' => OutputOpKind::Umi,
            b'R' => OutputOpKind::Readbar,
            b'S' => OutputOpKind::Sample,
            other => return Err(malformed(raw, format!("unexpected character '{}'", other as char))),
        };
        i += 1;
        let digit_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == digit_start {
            return Err(malformed(raw, format!("slot '{}' is missing a numeric id", kind.name())));
        }
        let id = short[digit_start..i]
            .parse::<u32>()
            .map_err(|_| malformed(raw, "invalid slot id"))?;
        if id == 0 {
            return Err(malformed(raw, "slot id must be >= 1"));
        }
        ops.push((kind, id));
    }
    Ok(ops)
}

fn compile_ops(
    raw: &str, short: &str, read_layouts: &[ReadLayout],
) -> Result<Vec<OutputOp>, ConfigurationError> {
    let parsed = parse_short_form(raw, short)?;
    let mut ops = Vec::with_capacity(parsed.len());
    for (kind, id) in parsed {
        let read_kind = kind.read_slot_kind();
        let extractable_layouts: Vec<usize> = read_layouts
            .iter()
            .enumerate()
            .filter_map(|(i, layout)| layout.contains(read_kind, id).then_some(i))
            .collect();
        if extractable_layouts.is_empty() {
            return Err(ConfigurationError::EmptyExtractableSet { kind: kind.name().to_string(), id });
        }
        ops.push(OutputOp { kind, id, extractable_layouts });
    }
    Ok(ops)
}

/// Picks, among an op's extractable layouts, the instance with the highest
/// summed normalized quality (ties broken by first-in-layout-order). Returns
/// both the verbatim (original-encoding) and normalized quality slices: the
/// former is what gets written out, the latter drives the comparison and the
/// `with_quality_in_read_name` decimal encoding.
fn best_instance<'a>(
    op: &OutputOp, reads: &[ExtractedRead<'a>], read_layouts: &[ReadLayout],
) -> Result<(usize, &'a [u8], &'a [u8], &'a [u8]), RecordError> {
    let read_kind = op.kind.read_slot_kind();
    let mut best: Option<(usize, &[u8], &[u8], &[u8], u64)> = None;

    for &layout_idx in &op.extractable_layouts {
        let read = &reads[layout_idx];
        let range = read_layouts[layout_idx]
            .try_range(read_kind, op.id, read.sequence.len())
            .expect("extractable_layouts only contains layouts that declare this slot")?;
        let seq = &read.sequence[range.clone()];
        let qual_raw = &read.quality_raw[range.clone()];
        let qual_norm = &read.quality_norm[range];
        let sum: u64 = qual_norm.iter().map(|&b| u64::from(b)).sum();

        if best.as_ref().is_none_or(|&(_, _, _, _, best_sum)| sum > best_sum) {
            best = Some((layout_idx, seq, qual_raw, qual_norm, sum));
        }
    }

    let (idx, seq, qual_raw, qual_norm, _) = best.expect("extractable_layouts is non-empty by construction");
    Ok((idx, seq, qual_raw, qual_norm))
}

fn append_quality_as_decimals(out: &mut String, quality: &[u8]) {
    for &q in quality {
        out.push_str(&format!("{q:02}"));
    }
}

impl OutputLayout {
    /// Compiles a sequence-half and header-half grammar string (either form)
    /// against the full array of read layouts.
    pub fn compile(
        sequence: &str, header: &str, read_layouts: &[ReadLayout],
    ) -> Result<OutputLayout, ConfigurationError> {
        let sequence_short = lower_to_short_form(sequence)?;
        let header_short = lower_to_short_form(header)?;
        let sequence_ops = compile_ops(sequence, &sequence_short, read_layouts)?;
        let header_ops = compile_ops(header, &header_short, read_layouts)?;
        Ok(OutputLayout { sequence_ops, header_ops })
    }

    /// Assembles the output sequence and quality strings. The `BARCODE`
    /// operation in the sequence half is equivalent to `READBAR`: both mean
    /// the verbatim read subsequence.
    pub fn assemble_sequence<'a>(
        &self, reads: &[ExtractedRead<'a>], read_layouts: &[ReadLayout],
    ) -> Result<(Vec<u8>, Vec<u8>), RecordError> {
        let mut sequence = Vec::new();
        let mut quality = Vec::new();
        for op in &self.sequence_ops {
            let (_, seq, qual_raw, _) = best_instance(op, reads, read_layouts)?;
            sequence.extend_from_slice(seq);
            quality.extend_from_slice(qual_raw);
        }
        Ok((sequence, quality))
    }

    /// Assembles the output header. `matched_barcode(id)` supplies the
    /// resolved expected-barcode string for a BARCODE slot id (substituted in
    /// place of the verbatim read subsequence); all other op kinds use the
    /// verbatim subsequence.
    pub fn assemble_header<'a>(
        &self, reads: &[ExtractedRead<'a>], read_layouts: &[ReadLayout], matched_barcode: impl Fn(u32) -> Option<&'a str>,
        delimiter: char, with_quality_in_name: bool,
    ) -> Result<String, RecordError> {
        let first_header = reads[0].header;
        let head = first_header.split(char::is_whitespace).next().unwrap_or(first_header);
        let mut out = head.strip_suffix(delimiter).unwrap_or(head).to_string();

        for op in &self.header_ops {
            let (_, seq, _, qual_norm) = best_instance(op, reads, read_layouts)?;
            out.push(delimiter);
            match op.kind {
                OutputOpKind::Barcode => {
                    if let Some(barcode) = matched_barcode(op.id) {
                        out.push_str(barcode);
                    } else {
                        out.push_str(&String::from_utf8_lossy(seq));
                    }
                }
                OutputOpKind::Readbar | OutputOpKind::Umi | OutputOpKind::Sample => {
                    out.push_str(&String::from_utf8_lossy(seq));
                }
            }
            if with_quality_in_name {
                append_quality_as_decimals(&mut out, qual_norm);
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read<'a>(header: &'a str, sequence: &'a [u8], quality_raw: &'a [u8], quality_norm: &'a [u8]) -> ExtractedRead<'a> {
        ExtractedRead { header, sequence, quality_raw, quality_norm }
    }

    #[test]
    fn lowers_long_form_to_short_form() {
        assert_eq!(lower_to_short_form("<BARCODE1><SAMPLE2>").unwrap(), "B1S2");
        assert_eq!(lower_to_short_form("S1").unwrap(), "S1");
    }

    #[test]
    fn s1_scenario_clips_barcode_into_header() {
        let layout = ReadLayout::parse("<BARCODE1:4><SAMPLE1:x>").unwrap();
        let layouts = vec![layout];
        let plan = OutputLayout::compile("S1", "B1", &layouts).unwrap();

        let reads = vec![read("@r1", b"ACGTNNNN", b"IIIIIIII", &[40, 40, 40, 40, 40, 40, 40, 40])];
        let (seq, qual) = plan.assemble_sequence(&reads, &layouts).unwrap();
        assert_eq!(seq, b"NNNN");
        assert_eq!(qual, b"IIII");

        let header = plan.assemble_header(&reads, &layouts, |_| Some("ACGT"), ':', false).unwrap();
        assert_eq!(header, "@r1:ACGT");
    }

    #[test]
    fn redundant_slot_picks_highest_quality_sum() {
        let layout_a = ReadLayout::parse("<BARCODE1:4><SAMPLE1:x>").unwrap();
        let layout_b = ReadLayout::parse("<BARCODE1:4><SAMPLE1:x>").unwrap();
        let layouts = vec![layout_a, layout_b];
        let plan = OutputLayout::compile("B1", "B1", &layouts).unwrap();

        let reads = vec![
            read("@a", b"ACGTAAAA", b"IIIIIIII", &[40, 40, 40, 40, 40, 40, 40, 40]),
            read("@a", b"ACGAAAAA", b"!!!!IIII", &[1, 1, 1, 1, 40, 40, 40, 40]),
        ];
        let (seq, _) = plan.assemble_sequence(&reads, &layouts).unwrap();
        assert_eq!(seq, b"ACGT");
    }

    #[test]
    fn empty_extractable_set_is_a_configuration_error() {
        let layout = ReadLayout::parse("<BARCODE1:4><SAMPLE1:x>").unwrap();
        let layouts = vec![layout];
        assert!(OutputLayout::compile("S2", "B1", &layouts).is_err());
    }

    #[test]
    fn s5_with_quality_in_read_name_appends_decimal_qualities() {
        let layout1 = ReadLayout::parse("<BARCODE1:4><UMI1:3><SAMPLE1:x>").unwrap();
        let layout2 = ReadLayout::parse("<SAMPLE2:x>").unwrap();
        let layouts = vec![layout1, layout2];
        let plan = OutputLayout::compile("S1", "B1U1", &layouts).unwrap();

        let reads = vec![
            read("@r1", b"ACGTGGT", b"IIIIIII", &[40, 40, 40, 40, 40, 40, 40]),
            read("@r1", b"", b"", &[]),
        ];
        let header = plan
            .assemble_header(&reads, &layouts, |id| if id == 1 { Some("ACGT") } else { None }, ':', true)
            .unwrap();
        assert_eq!(header, "@r1:ACGT40404040:GGT404040");
    }
}
