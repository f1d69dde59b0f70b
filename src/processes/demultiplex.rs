//! The demultiplex sub-command: wires CLI argument parsing, the driver loop,
//! and the end-of-run metrics report together.

pub use crate::args::demultiplex::DemultiplexArgs;
use crate::args::demultiplex::parse_demultiplex_args;
use crate::demux::{self, write_metrics_report};
use crate::io;
use std::io::Write;

/// Runs the `demultiplex` sub-command end to end.
///
/// ## Errors
///
/// Propagates any error from argument validation, the driver loop, or
/// writing the metrics report.
pub fn demultiplex_process(args: DemultiplexArgs) -> std::io::Result<()> {
    let command_line = std::env::args().collect::<Vec<_>>().join(" ");

    let parsed = parse_demultiplex_args(args)?;

    let counters = demux::run(&parsed.config, &parsed.input_files, parsed.diagnostic_file.as_deref())?;

    let mut metrics_writer = io::create_writer(Some(&parsed.metrics_file))?;
    write_metrics_report(&mut metrics_writer, &counters, &command_line)?;
    metrics_writer.flush()?;

    Ok(())
}
