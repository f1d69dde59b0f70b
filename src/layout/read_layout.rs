//! Read-layout grammar parsing and slot extraction.
//!
//! ```text
//! layout := (literals? slot literals?)+
//! slot   := '<' kind id? ':' length '>'
//! kind   := 'BARCODE' | 'UMI' | 'SAMPLE'
//! id     := integer >= 1 (absent == 1)
//! length := positive integer | negative integer | 'x'
//! literals := [ACGTUNacgtun]+
//! ```

use super::SlotKind;
use crate::errors::{ConfigurationError, RecordError};
use std::ops::Range;

fn is_literal_base(b: u8) -> bool {
    matches!(b, b'A' | b'C' | b'G' | b'T' | b'U' | b'N' | b'a' | b'c' | b'g' | b't' | b'u' | b'n')
}

/// A slot's length specification, compiled from the grammar's `length`
/// production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthSpec {
    /// A fixed number of bases.
    Fixed(usize),
    /// `x` — everything to the end of the read.
    Open,
    /// A negative integer `-k` — everything up to `len(read) - k`.
    ToEndMinus(usize),
}

impl LengthSpec {
    fn is_fixed(self) -> bool {
        matches!(self, LengthSpec::Fixed(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    kind:   SlotKind,
    id:     u32,
    start:  usize,
    length: LengthSpec,
}

/// A single compiled read layout: an ordered decomposition of a read into
/// fixed-position slots, plus id-ordered indices per kind for iteration "as
/// declared, 5' to 3'".
#[derive(Debug, Clone)]
pub struct ReadLayout {
    source:  String,
    slots:   Vec<Slot>,
    barcode: Vec<(u32, usize)>,
    umi:     Vec<(u32, usize)>,
    sample:  Vec<(u32, usize)>,
}

fn malformed(source: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::MalformedReadLayout {
        layout: source.to_string(),
        reason: reason.into(),
    }
}

/// Splits a slot body's `KIND[id]` token into its kind and numeric id
/// (default 1 when absent).
fn parse_kind_id(source: &str, token: &str) -> Result<(SlotKind, u32), ConfigurationError> {
    let digit_start = token.find(|c: char| c.is_ascii_digit()).unwrap_or(token.len());
    let (name, digits) = token.split_at(digit_start);

    let kind = match name {
        "BARCODE" => SlotKind::Barcode,
        "UMI" => SlotKind::Umi,
        "SAMPLE" => SlotKind::Sample,
        other => return Err(malformed(source, format!("unknown slot kind '{other}'"))),
    };

    let id = if digits.is_empty() {
        1
    } else {
        digits
            .parse::<u32>()
            .map_err(|_| malformed(source, format!("invalid slot id '{digits}'")))?
    };
    if id == 0 {
        return Err(malformed(source, "slot id must be >= 1"));
    }

    Ok((kind, id))
}

fn parse_length(source: &str, token: &str) -> Result<LengthSpec, ConfigurationError> {
    if token == "x" {
        return Ok(LengthSpec::Open);
    }
    if let Some(magnitude) = token.strip_prefix('-') {
        let k = magnitude
            .parse::<usize>()
            .map_err(|_| malformed(source, format!("invalid negative length '-{magnitude}'")))?;
        return Ok(LengthSpec::ToEndMinus(k));
    }
    let n = token
        .parse::<usize>()
        .map_err(|_| malformed(source, format!("invalid length '{token}'")))?;
    if n == 0 {
        return Err(malformed(source, "fixed length must be positive"));
    }
    Ok(LengthSpec::Fixed(n))
}

fn insert_unique(table: &mut Vec<(u32, usize)>, source: &str, id: u32, slot_index: usize) -> Result<(), ConfigurationError> {
    if table.iter().any(|&(existing, _)| existing == id) {
        return Err(malformed(source, format!("slot id {id} declared more than once for this kind")));
    }
    table.push((id, slot_index));
    Ok(())
}

impl ReadLayout {
    /// Parses and compiles a read layout from its textual grammar.
    pub fn parse(source: &str) -> Result<ReadLayout, ConfigurationError> {
        if source.is_empty() {
            return Err(malformed(source, "layout must contain at least one slot"));
        }

        let bytes = source.as_bytes();
        let mut i = 0usize;
        let mut offset = 0usize;
        let mut slots = Vec::new();
        let mut barcode = Vec::new();
        let mut umi = Vec::new();
        let mut sample = Vec::new();

        while i < bytes.len() {
            match bytes[i] {
                b if is_literal_base(b) => {
                    let start = i;
                    while i < bytes.len() && is_literal_base(bytes[i]) {
                        i += 1;
                    }
                    offset += i - start;
                }
                b'<' => {
                    let Some(rel_end) = source[i..].find('>') else {
                        return Err(malformed(source, "unterminated slot (missing '>')"));
                    };
                    let slot_end = i + rel_end;
                    let body = &source[i + 1..slot_end];
                    let Some(colon) = body.find(':') else {
                        return Err(malformed(source, format!("slot '{body}' is missing ':length'")));
                    };
                    let (kind, id) = parse_kind_id(source, &body[..colon])?;
                    let length = parse_length(source, &body[colon + 1..])?;

                    let is_last = slot_end + 1 == bytes.len();
                    if !length.is_fixed() && !is_last {
                        return Err(malformed(
                            source,
                            "open-ended and negative-length slots are only legal as the last slot",
                        ));
                    }

                    let slot_index = slots.len();
                    slots.push(Slot { kind, id, start: offset, length });
                    match kind {
                        SlotKind::Barcode => insert_unique(&mut barcode, source, id, slot_index)?,
                        SlotKind::Umi => insert_unique(&mut umi, source, id, slot_index)?,
                        SlotKind::Sample => insert_unique(&mut sample, source, id, slot_index)?,
                    }

                    if let LengthSpec::Fixed(n) = length {
                        offset += n;
                    }
                    i = slot_end + 1;
                }
                other => return Err(malformed(source, format!("unexpected character '{}'", other as char))),
            }
        }

        if slots.is_empty() {
            return Err(malformed(source, "layout must contain at least one slot"));
        }

        Ok(ReadLayout { source: source.to_string(), slots, barcode, umi, sample })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn index_for(&self, kind: SlotKind, id: u32) -> Option<usize> {
        let table = match kind {
            SlotKind::Barcode => &self.barcode,
            SlotKind::Umi => &self.umi,
            SlotKind::Sample => &self.sample,
        };
        table.iter().find(|&&(existing, _)| existing == id).map(|&(_, idx)| idx)
    }

    pub fn contains(&self, kind: SlotKind, id: u32) -> bool {
        self.index_for(kind, id).is_some()
    }

    pub fn contains_barcode(&self, id: u32) -> bool {
        self.contains(SlotKind::Barcode, id)
    }

    pub fn contains_umi(&self, id: u32) -> bool {
        self.contains(SlotKind::Umi, id)
    }

    pub fn contains_sample(&self, id: u32) -> bool {
        self.contains(SlotKind::Sample, id)
    }

    /// Slot ids for the given kind, in the order they were declared (5' to
    /// 3'), not sorted numerically.
    pub fn ids_ordered(&self, kind: SlotKind) -> Vec<u32> {
        let table = match kind {
            SlotKind::Barcode => &self.barcode,
            SlotKind::Umi => &self.umi,
            SlotKind::Sample => &self.sample,
        };
        table.iter().map(|&(id, _)| id).collect()
    }

    pub fn barcode_ids_ordered(&self) -> Vec<u32> {
        self.ids_ordered(SlotKind::Barcode)
    }

    pub fn umi_ids_ordered(&self) -> Vec<u32> {
        self.ids_ordered(SlotKind::Umi)
    }

    pub fn sample_ids_ordered(&self) -> Vec<u32> {
        self.ids_ordered(SlotKind::Sample)
    }

    /// Computes the byte range of a slot within a read of the given length.
    fn range_for(&self, kind: SlotKind, id: u32, read_len: usize) -> Result<Range<usize>, RecordError> {
        let Some(idx) = self.index_for(kind, id) else {
            return Err(RecordError::SliceOutOfBounds { kind: kind.as_str(), id });
        };
        let slot = self.slots[idx];
        let range = match slot.length {
            LengthSpec::Fixed(n) => slot.start..slot.start + n,
            LengthSpec::Open => slot.start..read_len,
            LengthSpec::ToEndMinus(k) => slot.start..read_len.saturating_sub(k),
        };
        if range.start > range.end || range.end > read_len {
            return Err(RecordError::SliceOutOfBounds { kind: kind.as_str(), id });
        }
        Ok(range)
    }

    /// Extracts the byte range for `(kind, id)` against a read of length
    /// `read_len`. Returns `None` if this layout does not declare that slot.
    pub fn try_range(&self, kind: SlotKind, id: u32, read_len: usize) -> Option<Result<Range<usize>, RecordError>> {
        if !self.contains(kind, id) {
            return None;
        }
        Some(self.range_for(kind, id, read_len))
    }

    pub fn extract_barcode<'a>(&self, read: &'a [u8], id: u32) -> Result<&'a [u8], RecordError> {
        Ok(&read[self.range_for(SlotKind::Barcode, id, read.len())?])
    }

    pub fn extract_umi<'a>(&self, read: &'a [u8], id: u32) -> Result<&'a [u8], RecordError> {
        Ok(&read[self.range_for(SlotKind::Umi, id, read.len())?])
    }

    pub fn extract_sample<'a>(&self, read: &'a [u8], id: u32) -> Result<&'a [u8], RecordError> {
        Ok(&read[self.range_for(SlotKind::Sample, id, read.len())?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_then_open_layout() {
        let layout = ReadLayout::parse("<BARCODE1:4><SAMPLE1:x>").unwrap();
        assert_eq!(layout.barcode_ids_ordered(), vec![1]);
        assert_eq!(layout.sample_ids_ordered(), vec![1]);
        assert_eq!(layout.extract_barcode(b"ACGTNNNN", 1).unwrap(), b"ACGT");
        assert_eq!(layout.extract_sample(b"ACGTNNNN", 1).unwrap(), b"NNNN");
    }

    #[test]
    fn negative_length_is_up_to_end_minus_k() {
        let layout = ReadLayout::parse("<UMI1:3><SAMPLE1:-2>").unwrap();
        // read of length 10: UMI occupies [0,3), SAMPLE occupies [3, 10-2)=[3,8)
        assert_eq!(layout.extract_sample(b"ABCDEFGHIJ", 1).unwrap(), b"DEFGH");
    }

    #[test]
    fn rejects_non_terminal_open_slot() {
        let err = ReadLayout::parse("<BARCODE1:x><SAMPLE1:4>");
        assert!(err.is_err());
    }

    #[test]
    fn rejects_empty_layout() {
        assert!(ReadLayout::parse("").is_err());
    }

    #[test]
    fn literal_bases_are_skipped_on_extraction() {
        let layout = ReadLayout::parse("AC<BARCODE1:4>GT<SAMPLE1:x>").unwrap();
        assert_eq!(layout.extract_barcode(b"ACXXXXGTYYYY", 1).unwrap(), b"XXXX");
        assert_eq!(layout.extract_sample(b"ACXXXXGTYYYY", 1).unwrap(), b"YYYY");
    }

    #[test]
    fn slice_past_end_of_read_is_a_record_error() {
        let layout = ReadLayout::parse("<BARCODE1:4><SAMPLE1:x>").unwrap();
        assert!(layout.extract_barcode(b"AC", 1).is_err());
    }

    #[test]
    fn absent_id_defaults_to_one() {
        let layout = ReadLayout::parse("<BARCODE:4><SAMPLE:x>").unwrap();
        assert!(layout.contains_barcode(1));
        assert!(layout.contains_sample(1));
    }
}
