use crate::barcode::BarcodeCatalogue;
use crate::demux::{DemultiplexConfig, DemultiplexOptions, SlotThresholds};
use crate::layout::{OutputLayout, ReadLayout};
use crate::quality::QualityEncoding;
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct DemultiplexArgs {
    /// Input FASTQ files, one per sequencing read (1-4), in order.
    #[arg(required = true, num_args = 1..=4)]
    pub input_files: Vec<PathBuf>,

    /// Path to the barcode table (simple or general form, see README).
    #[arg(short = 'b', long)]
    pub barcode_table: PathBuf,

    /// Read layout grammar, one per input file, in the same order. Repeat
    /// this flag once per input.
    #[arg(short = 'r', long = "read-layout", required = true)]
    pub read_layouts: Vec<String>,

    /// One output layout, as "SEQUENCE-FORM,HEADER-FORM". Repeat this flag
    /// once per output file to produce.
    #[arg(short = 'o', long = "output-layout", required = true)]
    pub output_layouts: Vec<String>,

    /// Per barcode slot id (1-indexed, comma-separated), the maximum allowed
    /// Hamming mismatches for a candidate match.
    #[arg(long = "max-mismatches", value_delimiter = ',')]
    pub max_mismatches: Vec<u32>,

    /// Per barcode slot id, the minimum mismatch-count gap required between
    /// the best and second-best candidate.
    #[arg(long = "min-mismatch-delta", value_delimiter = ',')]
    pub min_mismatch_delta: Vec<u32>,

    /// Per barcode slot id, the minimum normalized base quality below which a
    /// matching base is still counted as a mismatch.
    #[arg(long = "min-base-quality", value_delimiter = ',')]
    pub min_base_quality: Vec<u8>,

    #[arg(long)]
    /// Under ambiguity (more than one sample tied for best), leave the record
    /// unassigned instead of breaking the tie by lowest summed mismatches.
    pub strict: bool,

    #[arg(long, value_enum, default_value_t = QualityEncoding::Standard)]
    /// The quality encoding of the input FASTQ files.
    pub quality_encoding: QualityEncoding,

    #[arg(long, default_value_t = ':')]
    /// The delimiter inserted between the original read header and each
    /// appended output-layout field.
    pub delimiter: char,

    #[arg(long)]
    /// Append each appended field's normalized quality, as two-digit decimal
    /// Phred scores, after its sequence in the output header.
    pub with_quality_in_read_name: bool,

    #[arg(long)]
    /// Disable writing unassigned reads to their verbatim mirror files.
    pub no_keep_unassigned: bool,

    #[arg(long)]
    /// Optional path for a per-record tab-delimited diagnostic stream.
    pub diagnostic_file: Option<PathBuf>,

    #[arg(long, default_value = "metrics.tsv")]
    /// Path for the end-of-run metrics report.
    pub metrics_file: PathBuf,
}

/// Everything [`crate::demux::run`] needs, plus the paths the process entry
/// point opens before and after the run.
pub struct ParsedDemultiplexArgs {
    pub config:          DemultiplexConfig,
    pub input_files:     Vec<PathBuf>,
    pub diagnostic_file: Option<PathBuf>,
    pub metrics_file:    PathBuf,
}

fn bad_config(message: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(message.to_string())
}

/// Compiles and cross-validates all CLI input: read layouts, output layouts,
/// the barcode catalogue, and the per-slot threshold vectors.
///
/// ## Errors
///
/// The barcode table must be readable, every layout grammar must parse, and
/// [`DemultiplexConfig::validate`] must succeed.
pub fn parse_demultiplex_args(args: DemultiplexArgs) -> std::io::Result<ParsedDemultiplexArgs> {
    let DemultiplexArgs {
        input_files,
        barcode_table,
        read_layouts,
        output_layouts,
        max_mismatches,
        min_mismatch_delta,
        min_base_quality,
        strict,
        quality_encoding,
        delimiter,
        with_quality_in_read_name,
        no_keep_unassigned,
        diagnostic_file,
        metrics_file,
    } = args;

    if read_layouts.len() != input_files.len() {
        return Err(bad_config(format!(
            "{} read layout(s) provided for {} input file(s); provide exactly one per input",
            read_layouts.len(),
            input_files.len()
        )));
    }

    let read_layouts: Vec<ReadLayout> =
        read_layouts.iter().map(|s| ReadLayout::parse(s)).collect::<Result<_, _>>().map_err(bad_config)?;

    let output_layouts: Vec<OutputLayout> = output_layouts
        .iter()
        .map(|spec| {
            let (sequence, header) = spec
                .split_once(',')
                .ok_or_else(|| bad_config(format!("output layout '{spec}' must be \"SEQUENCE-FORM,HEADER-FORM\"")))?;
            OutputLayout::compile(sequence, header, &read_layouts).map_err(bad_config)
        })
        .collect::<Result<_, _>>()?;

    let table_text = std::fs::read_to_string(&barcode_table)?;
    let catalogue = BarcodeCatalogue::parse(&table_text).map_err(bad_config)?;

    let config = DemultiplexConfig {
        read_layouts,
        output_layouts,
        catalogue,
        thresholds: SlotThresholds { max_mismatches, min_mismatch_delta, min_base_quality },
        options: DemultiplexOptions {
            strict,
            delimiter,
            with_quality_in_read_name,
            keep_unassigned: !no_keep_unassigned,
            quality_encoding,
        },
    };

    config.validate().map_err(bad_config)?;

    Ok(ParsedDemultiplexArgs { config, input_files, diagnostic_file, metrics_file })
}
