//! The read-layout and output-layout engine.
//!
//! Both halves compile a small textual grammar once, at startup, into an
//! immutable plan; the plan is then driven by pure functions over borrowed
//! read data, once per record. Polymorphism over slot kind is a flat tagged
//! match rather than a trait hierarchy — the per-kind behaviors (especially
//! the READBAR/BARCODE asymmetry between the sequence and header halves)
//! differ enough that a virtual dispatch would obscure them.

mod output_layout;
mod read_layout;

pub use output_layout::*;
pub use read_layout::*;

/// The three kinds of slot a read layout can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotKind {
    Barcode,
    Umi,
    Sample,
}

impl SlotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotKind::Barcode => "BARCODE",
            SlotKind::Umi => "UMI",
            SlotKind::Sample => "SAMPLE",
        }
    }
}

/// One input read's sequence and quality, borrowed for the duration of a
/// single record's processing.
#[derive(Debug, Clone, Copy)]
pub struct ExtractedRead<'a> {
    /// The full header line, including the leading `@`.
    pub header: &'a str,
    pub sequence: &'a [u8],
    /// The verbatim quality-line bytes, in the input's original encoding.
    /// This is what gets written back out, so output FASTQ quality stays in
    /// the same encoding as the input.
    pub quality_raw: &'a [u8],
    /// Quality bytes normalized to the 0-93 Phred scale. Used for the
    /// best-quality-sum comparison and for `with_quality_in_read_name`, never
    /// written out verbatim.
    pub quality_norm: &'a [u8],
}
