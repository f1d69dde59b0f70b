//! The error taxonomy for the demultiplexer: [`ConfigurationError`] for
//! problems detected before the main loop starts, and [`RecordError`] for
//! problems confined to a single input record.

use std::{error::Error, fmt};
use zoe::data::err::GetCode;

/// A problem with a layout grammar, barcode table, or CLI configuration,
/// detected at construction time (never mid-run).
#[non_exhaustive]
#[derive(Debug)]
pub enum ConfigurationError {
    /// The read-layout grammar could not be parsed, or violated the
    /// terminal-slot rule.
    MalformedReadLayout { layout: String, reason: String },
    /// The output-layout grammar could not be parsed.
    MalformedOutputLayout { layout: String, reason: String },
    /// An output operation has no read layout from which to extract its slot.
    EmptyExtractableSet { kind: String, id: u32 },
    /// The barcode table failed to parse (bad header, ragged columns,
    /// non-equal-length barcodes within a column, etc).
    MalformedBarcodeTable { reason: String },
    /// Two samples produced the same concatenated barcode code.
    CollidingConcatenatedCode { code: String, sample_a: String, sample_b: String },
    /// A BARCODE slot id required by an output layout is absent from the
    /// barcode table.
    MissingBarcodeSlot { id: u32 },
    /// The per-slot threshold vectors (`max_mismatches`, `min_mismatch_delta`,
    /// `min_base_quality`) did not match the number of barcode slots.
    MismatchedThresholdVector { expected: usize, got: usize, name: &'static str },
    /// Two samples with the same name appeared in the barcode table.
    DuplicateSampleName { sample: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::MalformedReadLayout { layout, reason } => {
                write!(f, "malformed read layout '{layout}': {reason}")
            }
            ConfigurationError::MalformedOutputLayout { layout, reason } => {
                write!(f, "malformed output layout '{layout}': {reason}")
            }
            ConfigurationError::EmptyExtractableSet { kind, id } => {
                write!(f, "output layout references {kind}{id}, but no read layout declares it")
            }
            ConfigurationError::MalformedBarcodeTable { reason } => {
                write!(f, "malformed barcode table: {reason}")
            }
            ConfigurationError::CollidingConcatenatedCode { code, sample_a, sample_b } => {
                write!(f, "samples '{sample_a}' and '{sample_b}' share concatenated code '{code}'")
            }
            ConfigurationError::MissingBarcodeSlot { id } => {
                write!(f, "output layout requires BARCODE{id}, which is absent from the barcode table")
            }
            ConfigurationError::MismatchedThresholdVector { expected, got, name } => {
                write!(f, "{name} has {got} entries, expected {expected} (one per barcode slot)")
            }
            ConfigurationError::DuplicateSampleName { sample } => {
                write!(f, "duplicate sample name '{sample}' in barcode table")
            }
        }
    }
}

impl Error for ConfigurationError {}
impl GetCode for ConfigurationError {}

/// A problem confined to a single input record: never fatal, always collapses
/// the record to `UNASSIGNED` with a diagnostic note.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum RecordError {
    /// A layout slot would slice past the end of the read.
    SliceOutOfBounds { kind: &'static str, id: u32 },
    /// The read contained a byte outside `[ACGTUNacgtun]` where a clean base
    /// was required.
    InvalidBase { kind: &'static str, id: u32, byte: u8 },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::SliceOutOfBounds { kind, id } => {
                write!(f, "{kind}{id} extraction exceeds read length")
            }
            RecordError::InvalidBase { kind, id, byte } => {
                write!(f, "{kind}{id} contains invalid base 0x{byte:02x}")
            }
        }
    }
}

impl Error for RecordError {}

/// A wrapper around [`std::io::Error`] that tags which input/output stream
/// position (0-indexed) an I/O failure originated from. Generalizes the
/// teacher's `OpenFastqError::{File1,File2}` from exactly two files to an
/// arbitrary count.
#[derive(Debug)]
pub struct IndexedIoError {
    pub index: usize,
    pub source: std::io::Error,
}

impl fmt::Display for IndexedIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input/output stream {}: {}", self.index, self.source)
    }
}

impl Error for IndexedIoError {}
impl GetCode for IndexedIoError {}

impl From<IndexedIoError> for std::io::Error {
    fn from(value: IndexedIoError) -> Self {
        std::io::Error::other(value)
    }
}
