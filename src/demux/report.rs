//! Diagnostic tab-delimited rows and the end-of-run metrics report.

use super::Counters;
use crate::barcode::{BarcodeCatalogue, SampleMatch};
use indoc::writedoc;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes the diagnostic stream's header row: one block of five columns per
/// barcode slot id, bracketed by the read counter/header and the final
/// assigned-sample/note columns.
pub(super) fn write_diagnostic_header(writer: &mut impl Write, slot_count: usize) -> std::io::Result<()> {
    write!(writer, "read_counter\tread_header")?;
    for id in 1..=slot_count {
        write!(writer, "\tread_seq{id}\tbest_barcode{id}\tmm_best{id}\tmm_second{id}\tpasses_cutoffs{id}")?;
    }
    writeln!(writer, "\tassigned_sample\tnote")
}

/// Writes one diagnostic row for a single processed record.
pub(super) fn write_diagnostic_row(
    writer: &mut impl Write, row: u64, header: &str, catalogue: &BarcodeCatalogue, sample_match: &SampleMatch,
) -> std::io::Result<()> {
    let first_token = header.split(char::is_whitespace).next().unwrap_or(header);
    write!(writer, "{row}\t{first_token}")?;

    for id in 1..=catalogue.slot_count() as u32 {
        match sample_match.barcode_matches.iter().find(|(slot_id, _)| *slot_id == id) {
            Some((_, m)) => {
                write!(
                    writer,
                    "\t{}\t{}\t{}\t{}\t{}",
                    String::from_utf8_lossy(&m.read_sequence),
                    String::from_utf8_lossy(&m.barcode),
                    m.mismatches,
                    m.mismatches_to_second_best,
                    if m.matched { "yes" } else { "no" },
                )?;
            }
            None => write!(writer, "\t\t\t\t\t")?,
        }
    }

    writeln!(writer, "\t{}\t{}", sample_match.sample_or_unassigned(), sample_match.note)
}

/// Writes the end-of-run metrics report: the command invocation and a
/// timestamp, followed by the overall and per-sample tallies.
pub fn write_metrics_report(writer: &mut impl Write, counters: &Counters, command_line: &str) -> std::io::Result<()> {
    let epoch_seconds = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);

    writedoc!(
        writer,
        "
        # {command_line}
        # generated {epoch_seconds} (unix epoch seconds)

        Processed\t{processed}
        Assigned\t{assigned}
        Unassigned\t{unassigned}

        Sample\tCount
        ",
        processed = counters.processed,
        assigned = counters.assigned,
        unassigned = counters.unassigned,
    )?;

    let mut samples: Vec<(&String, &u64)> = counters.per_sample.iter().collect();
    samples.sort_by(|a, b| a.0.cmp(b.0));
    for (sample, count) in samples {
        writeln!(writer, "{sample}\t{count}")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barcode::BarcodeMatch;

    fn bm(matched: bool, read_sequence: &[u8], barcode: &[u8], mismatches: u32) -> BarcodeMatch {
        BarcodeMatch {
            matched,
            read_sequence: read_sequence.to_vec(),
            barcode: barcode.to_vec(),
            mismatches,
            mismatches_to_second_best: 4,
        }
    }

    #[test]
    fn diagnostic_row_reports_unassigned_sample_name_and_cutoff_word() {
        let catalogue = BarcodeCatalogue::parse("SAMPLE\tBARCODE1\nsampleA\tACGT\n").unwrap();
        let sample_match = SampleMatch {
            sample:          None,
            barcode_matches: vec![(1, bm(false, b"TTTT", b"", 4))],
            note:            "no consistent sample: slot1=4".to_string(),
        };
        let mut buf = Vec::new();
        write_diagnostic_row(&mut buf, 1, "@r1 extra", &catalogue, &sample_match).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "1\t@r1\tTTTT\t\t4\t4\tno\tunassigned\tno consistent sample: slot1=4\n");
    }

    #[test]
    fn diagnostic_row_reports_yes_for_a_passing_match() {
        let catalogue = BarcodeCatalogue::parse("SAMPLE\tBARCODE1\nsampleA\tACGT\n").unwrap();
        let sample_match = SampleMatch {
            sample:          Some("sampleA".to_string()),
            barcode_matches: vec![(1, bm(true, b"ACGT", b"ACGT", 0))],
            note:            String::new(),
        };
        let mut buf = Vec::new();
        write_diagnostic_row(&mut buf, 1, "@r1", &catalogue, &sample_match).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "1\t@r1\tACGT\tACGT\t0\t4\tyes\tsampleA\t\n");
    }

    #[test]
    fn metrics_report_includes_per_sample_counts() {
        let mut counters = Counters::default();
        counters.processed = 2;
        counters.assigned = 1;
        counters.unassigned = 1;
        counters.per_sample.insert("sampleA".to_string(), 1);
        let mut buf = Vec::new();
        write_metrics_report(&mut buf, &counters, "irma-demux demultiplex ...").unwrap();
        let report = String::from_utf8(buf).unwrap();
        assert!(report.contains("# irma-demux demultiplex ...\n"));
        assert!(report.contains("Processed\t2\nAssigned\t1\nUnassigned\t1\n"));
        assert!(report.contains("Sample\tCount\nsampleA\t1\n"));
    }
}
