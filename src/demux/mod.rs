//! The demultiplex driver: a single-threaded cooperative main loop over 1-4
//! synchronized input FASTQ cursors.
//!
//! The driver owns no state beyond the current record: read layouts, output
//! layouts, and the barcode catalogue are compiled once at construction and
//! shared read-only for the lifetime of the run (see `SPEC_FULL.md` §5).

mod report;

use crate::barcode::{BarcodeCatalogue, SampleMatch, UNASSIGNED, match_barcode, resolve_sample};
use crate::errors::{ConfigurationError, IndexedIoError, RecordError};
use crate::io::{self, WriteFileZipStdout};
use crate::layout::{ExtractedRead, OutputLayout, ReadLayout, SlotKind};
use crate::quality::{QualityEncoding, QualityTable, normalize_quality};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use zoe::prelude::*;

pub use report::write_metrics_report;

/// The per-slot threshold vectors the matcher is driven by. Each vector has
/// one entry per barcode slot id, 1-indexed, stored 0-indexed.
#[derive(Debug, Clone)]
pub struct SlotThresholds {
    pub max_mismatches:     Vec<u32>,
    pub min_mismatch_delta: Vec<u32>,
    pub min_base_quality:   Vec<u8>,
}

impl SlotThresholds {
    fn validate(&self, slot_count: usize) -> Result<(), ConfigurationError> {
        check_len("max-mismatches", &self.max_mismatches, slot_count)?;
        check_len("min-mismatch-delta", &self.min_mismatch_delta, slot_count)?;
        check_len("min-base-quality", &self.min_base_quality, slot_count)?;
        Ok(())
    }
}

fn check_len<T>(name: &'static str, values: &[T], expected: usize) -> Result<(), ConfigurationError> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(ConfigurationError::MismatchedThresholdVector { expected, got: values.len(), name })
    }
}

/// Run-wide knobs that do not vary per slot.
#[derive(Debug, Clone)]
pub struct DemultiplexOptions {
    pub strict:                   bool,
    pub delimiter:                char,
    pub with_quality_in_read_name: bool,
    pub keep_unassigned:          bool,
    pub quality_encoding:         QualityEncoding,
}

/// Everything compiled at startup and held immutable for the run.
pub struct DemultiplexConfig {
    pub read_layouts:   Vec<ReadLayout>,
    pub output_layouts: Vec<OutputLayout>,
    pub catalogue:      BarcodeCatalogue,
    pub thresholds:     SlotThresholds,
    pub options:        DemultiplexOptions,
}

impl DemultiplexConfig {
    /// Cross-checks the compiled layouts, catalogue, and threshold vectors
    /// against one another. Run before opening any files.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.thresholds.validate(self.catalogue.slot_count())?;

        for layout in &self.output_layouts {
            for op in layout.sequence_ops.iter().chain(layout.header_ops.iter()) {
                use crate::layout::OutputOpKind;
                if matches!(op.kind, OutputOpKind::Barcode | OutputOpKind::Readbar) && self.catalogue.slot(op.id).is_none() {
                    return Err(ConfigurationError::MissingBarcodeSlot { id: op.id });
                }
            }
        }

        Ok(())
    }
}

/// Final tallies, reported at shutdown.
#[derive(Debug, Default)]
pub struct Counters {
    pub processed:  u64,
    pub assigned:   u64,
    pub unassigned: u64,
    pub per_sample: HashMap<String, u64>,
}

impl Counters {
    fn bump_assigned(&mut self, sample: &str) {
        self.assigned += 1;
        *self.per_sample.entry(sample.to_string()).or_insert(0) += 1;
    }

    fn bump_unassigned(&mut self) {
        self.unassigned += 1;
    }
}

/// Per-(sample, output-layout-index) and per-input writers opened eagerly at
/// startup, plus the optional diagnostic stream.
struct Writers {
    assigned:   HashMap<(String, usize), WriteFileZipStdout>,
    unassigned: Vec<WriteFileZipStdout>,
    diagnostic: Option<WriteFileZipStdout>,
}

/// Synthesizes an output filename for `sample`'s `output_index`-th output
/// layout when the barcode table left it unspecified.
fn synthesize_sample_filename(sample: &str, output_index: usize, num_outputs: usize) -> PathBuf {
    if num_outputs <= 1 {
        PathBuf::from(format!("{sample}.fastq"))
    } else {
        PathBuf::from(format!("{sample}_out{}.fastq", output_index + 1))
    }
}

/// Synthesizes the verbatim-mirror filename for unassigned reads from
/// `input_index`.
fn synthesize_unassigned_filename(input_index: usize, num_inputs: usize) -> PathBuf {
    if num_inputs <= 1 {
        PathBuf::from("unassigned.fastq")
    } else {
        PathBuf::from(format!("unassigned_{}.fastq", input_index + 1))
    }
}

fn open_writers(config: &DemultiplexConfig, num_inputs: usize, diagnostic_path: Option<&Path>) -> std::io::Result<Writers> {
    let num_outputs = config.output_layouts.len();

    let mut assigned = HashMap::new();
    for sample in config.catalogue.sample_names() {
        for output_index in 0..num_outputs {
            let path = config
                .catalogue
                .output_filename(sample, output_index)
                .cloned()
                .unwrap_or_else(|| synthesize_sample_filename(sample, output_index, num_outputs));
            let writer = io::create_writer(Some(&path))?;
            assigned.insert((sample.to_string(), output_index), writer);
        }
    }

    let mut unassigned = Vec::with_capacity(num_inputs);
    for input_index in 0..num_inputs {
        let path = synthesize_unassigned_filename(input_index, num_inputs);
        unassigned.push(io::create_writer(Some(&path))?);
    }

    let diagnostic = match diagnostic_path {
        Some(path) => {
            let mut writer = io::create_writer(Some(path))?;
            report::write_diagnostic_header(&mut writer, config.catalogue.slot_count())?;
            Some(writer)
        }
        None => None,
    };

    Ok(Writers { assigned, unassigned, diagnostic })
}

fn record_error_note(e: RecordError) -> String {
    format!("malformed record: {e}")
}

/// Runs the full demultiplex loop: opens inputs and writers, processes every
/// record, then closes writers and returns the final [`Counters`].
///
/// ## Errors
///
/// Fatal per `SPEC_FULL.md` §4.F: an I/O error on any read or write, or the
/// input cursors desynchronizing (one ends before the others).
pub fn run(config: &DemultiplexConfig, input_paths: &[PathBuf], diagnostic_path: Option<&Path>) -> std::io::Result<Counters> {
    let (mut readers, threads) = io::open_fastq_inputs(input_paths)?;
    let mut writers = open_writers(config, readers.len(), diagnostic_path)?;
    let table: QualityTable = config.options.quality_encoding.build_table();

    let mut counters = Counters::default();
    let mut row = 0u64;

    loop {
        let mut records = Vec::with_capacity(readers.len());
        let mut ended = 0usize;

        for (index, reader) in readers.iter_mut().enumerate() {
            match reader.next() {
                Some(Ok(record)) => records.push(record),
                Some(Err(source)) => return Err(IndexedIoError { index, source }.into()),
                None => ended += 1,
            }
        }

        if ended == readers.len() {
            break;
        }
        if ended > 0 {
            return Err(std::io::Error::other(format!(
                "input cursors desynchronized: {ended} of {} ended before the others at record {row}",
                readers.len()
            )));
        }

        row += 1;
        process_record(config, &records, &mut writers, &mut counters, row, table)?;
    }

    if let Some(mut diag) = writers.diagnostic {
        diag.flush()?;
    }
    for (_, mut writer) in writers.assigned {
        writer.flush()?;
    }
    for mut writer in writers.unassigned {
        writer.flush()?;
    }

    threads.finalize()?;

    Ok(counters)
}

fn process_record(
    config: &DemultiplexConfig, records: &[FastQ], writers: &mut Writers, counters: &mut Counters, row: u64,
    table: QualityTable,
) -> std::io::Result<()> {
    let normalized: Vec<Vec<u8>> = records.iter().map(|r| normalize_quality(&table, r.quality.as_bytes())).collect();
    let extracted: Vec<ExtractedRead> = records
        .iter()
        .zip(normalized.iter())
        .map(|(record, norm)| ExtractedRead {
            header:       record.header.as_str(),
            sequence:     record.sequence.as_bytes(),
            quality_raw:  record.quality.as_bytes(),
            quality_norm: norm.as_slice(),
        })
        .collect();

    let sample_match = resolve_record(config, &extracted);

    counters.processed += 1;
    if let Some(sample) = sample_match.sample.clone() {
        counters.bump_assigned(&sample);
        write_assigned(config, &sample, &sample_match, &extracted, writers)?;
    } else {
        counters.bump_unassigned();
        if config.options.keep_unassigned {
            for (writer, record) in writers.unassigned.iter_mut().zip(records.iter()) {
                writeln!(writer, "{}\n{}\n+\n{}", record.header, record.sequence, record.quality)?;
            }
        }
    }

    if let Some(diag) = writers.diagnostic.as_mut() {
        report::write_diagnostic_row(diag, row, extracted[0].header, &config.catalogue, &sample_match)?;
    }

    Ok(())
}

/// Runs the matcher over every barcode slot id and hands the results to the
/// resolver. Any [`RecordError`] encountered while extracting a slot
/// collapses the whole record to unassigned, per the failure semantics in
/// `SPEC_FULL.md` §4.F.
fn resolve_record(config: &DemultiplexConfig, extracted: &[ExtractedRead]) -> SampleMatch {
    let outcome = (|| -> Result<SampleMatch, RecordError> {
        let mut per_slot = Vec::with_capacity(config.catalogue.slot_count());
        for id in 1..=config.catalogue.slot_count() as u32 {
            let matches = extract_slot_matches(config, id, extracted)?;
            per_slot.push((id, matches));
        }
        Ok(resolve_sample(&per_slot, &config.catalogue, config.options.strict))
    })();

    outcome.unwrap_or_else(|e| SampleMatch {
        sample:         None,
        barcode_matches: Vec::new(),
        note:           record_error_note(e),
    })
}

fn is_clean_base(b: u8) -> bool {
    matches!(b.to_ascii_uppercase(), b'A' | b'C' | b'G' | b'T' | b'U' | b'N')
}

fn extract_slot_matches(
    config: &DemultiplexConfig, id: u32, extracted: &[ExtractedRead],
) -> Result<Vec<crate::barcode::BarcodeMatch>, RecordError> {
    let slot = config.catalogue.slot(id).expect("catalogue validated against output layouts at startup");
    let slot_idx = (id - 1) as usize;
    let mut matches = Vec::new();

    for (layout_idx, layout) in config.read_layouts.iter().enumerate() {
        let Some(range_result) = layout.try_range(SlotKind::Barcode, id, extracted[layout_idx].sequence.len()) else {
            continue;
        };
        let range = range_result?;
        let seq = &extracted[layout_idx].sequence[range.clone()];
        let qual = &extracted[layout_idx].quality_norm[range];

        for &b in seq {
            if !is_clean_base(b) {
                return Err(RecordError::InvalidBase { kind: "BARCODE", id, byte: b });
            }
        }

        matches.push(match_barcode(
            slot,
            seq,
            qual,
            config.thresholds.max_mismatches[slot_idx],
            config.thresholds.min_mismatch_delta[slot_idx],
            config.thresholds.min_base_quality[slot_idx],
        ));
    }

    Ok(matches)
}

/// Assembles and writes one assigned record to every output layout's writer
/// for `sample`. A [`RecordError`] during assembly for a given output layout
/// (e.g. a too-short read for a SAMPLE or UMI slot) only skips that one
/// output; it does not retract the record's ASSIGNED classification, since
/// BARCODE/READBAR extractability was already checked at compile time.
fn write_assigned(
    config: &DemultiplexConfig, sample: &str, sample_match: &SampleMatch, extracted: &[ExtractedRead], writers: &mut Writers,
) -> std::io::Result<()> {
    for (output_index, layout) in config.output_layouts.iter().enumerate() {
        let assembled = layout
            .assemble_sequence(extracted, &config.read_layouts)
            .and_then(|(seq, qual)| {
                layout
                    .assemble_header(
                        extracted,
                        &config.read_layouts,
                        |id| sample_match.matched_barcode(id),
                        config.options.delimiter,
                        config.options.with_quality_in_read_name,
                    )
                    .map(|header| (seq, qual, header))
            });

        let Ok((seq, qual, header)) = assembled else {
            continue;
        };

        let writer = writers
            .assigned
            .get_mut(&(sample.to_string(), output_index))
            .expect("a writer was opened for every (sample, output layout) pair at startup");
        writer.write_all(header.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.write_all(&seq)?;
        writer.write_all(b"\n+\n")?;
        writer.write_all(&qual)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{OutputLayout, ReadLayout};

    fn simple_config(table: &str, strict: bool) -> DemultiplexConfig {
        let read_layouts = vec![ReadLayout::parse("<BARCODE1:4><SAMPLE1:x>").unwrap()];
        let output_layouts = vec![OutputLayout::compile("S1", "B1", &read_layouts).unwrap()];
        let catalogue = BarcodeCatalogue::parse(table).unwrap();
        DemultiplexConfig {
            read_layouts,
            output_layouts,
            catalogue,
            thresholds: SlotThresholds {
                max_mismatches:     vec![1],
                min_mismatch_delta: vec![1],
                min_base_quality:   vec![0],
            },
            options: DemultiplexOptions {
                strict,
                delimiter: ':',
                with_quality_in_read_name: false,
                keep_unassigned: true,
                quality_encoding: QualityEncoding::Standard,
            },
        }
    }

    #[test]
    fn validate_rejects_mismatched_threshold_vector_length() {
        let mut config = simple_config("SAMPLE\tBARCODE1\nsampleA\tACGT\n", true);
        config.thresholds.max_mismatches = vec![1, 2];
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_barcode_slot_in_output_layout() {
        let read_layouts = vec![ReadLayout::parse("<BARCODE1:4><BARCODE2:4><SAMPLE1:x>").unwrap()];
        let output_layouts = vec![OutputLayout::compile("S1", "B1B2", &read_layouts).unwrap()];
        let catalogue = BarcodeCatalogue::parse("SAMPLE\tBARCODE1\nsampleA\tACGT\n").unwrap();
        let config = DemultiplexConfig {
            read_layouts,
            output_layouts,
            catalogue,
            thresholds: SlotThresholds {
                max_mismatches:     vec![1],
                min_mismatch_delta: vec![1],
                min_base_quality:   vec![0],
            },
            options: DemultiplexOptions {
                strict: true,
                delimiter: ':',
                with_quality_in_read_name: false,
                keep_unassigned: true,
                quality_encoding: QualityEncoding::Standard,
            },
        };
        assert!(matches!(config.validate(), Err(ConfigurationError::MissingBarcodeSlot { id: 2 })));
    }

    #[test]
    fn resolve_record_s1_exact_match_is_assigned() {
        let config = simple_config("SAMPLE\tBARCODE1\nsampleA\tACGT\n", true);
        let norm = vec![40u8; 8];
        let extracted = vec![ExtractedRead {
            header:       "@r1",
            sequence:     b"ACGTNNNN",
            quality_raw:  b"IIIIIIII",
            quality_norm: &norm,
        }];
        let result = resolve_record(&config, &extracted);
        assert_eq!(result.sample.as_deref(), Some("sampleA"));
    }

    #[test]
    fn resolve_record_unassigned_when_no_slot_matches() {
        let config = simple_config("SAMPLE\tBARCODE1\nsampleA\tACGT\n", true);
        let norm = vec![40u8; 8];
        let extracted = vec![ExtractedRead {
            header:       "@r1",
            sequence:     b"TTTTNNNN",
            quality_raw:  b"IIIIIIII",
            quality_norm: &norm,
        }];
        let result = resolve_record(&config, &extracted);
        assert!(result.sample.is_none());
        assert_eq!(result.sample_or_unassigned(), UNASSIGNED);
    }

    #[test]
    fn resolve_record_collapses_slice_out_of_bounds_to_unassigned() {
        let config = simple_config("SAMPLE\tBARCODE1\nsampleA\tACGT\n", true);
        let norm = vec![40u8; 2];
        let extracted = vec![ExtractedRead {
            header:       "@r1",
            sequence:     b"AC",
            quality_raw:  b"II",
            quality_norm: &norm,
        }];
        let result = resolve_record(&config, &extracted);
        assert!(result.sample.is_none());
        assert!(result.note.starts_with("malformed record"));
    }
}
