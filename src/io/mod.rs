use crate::errors::IndexedIoError;
use crate::utils::whichever::define_whichever;
use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};
use std::{
    fs::File,
    io::{BufWriter, PipeReader, Stdout, stdout},
    path::Path,
    thread::{self, JoinHandle},
};
use zoe::prelude::FastQReader;

define_whichever! {
    #[allow(clippy::large_enum_variant)]
    #[doc="An enum for the different acceptable input types"]
    pub(crate) enum ReadFileZip {
        #[doc="A reader for a regular uncompressed file"]
        File(File),
        #[doc="A reader for a gzip compressed file, using a thread and an anonymous pipe for decoding"]
        Zipped(PipeReader),
    }

    impl Read for ReadFileZip {}
}

/// A type alias for the `FastQReader` backing an input cursor.
pub(crate) type FastQReaderIc = FastQReader<ReadFileZip>;

define_whichever! {
    #[doc="An enum for the different acceptable output types"]
    #[derive(Debug)]
    pub(crate) enum  WriteFileZipStdout {
        #[doc="A writer for a regular uncompressed file"]
        File(BufWriter<File>),
        #[doc="A writer for a gzip compressed file"]
        Zipped(GzEncoder<BufWriter<File>>),
        #[doc="A writer for uncompressed data to stdout"]
        Stdout(BufWriter<Stdout>),
    }

    impl Write for WriteFileZipStdout {}
}

/// Opens a single FASTQ file.
///
/// If the filename ends in `gz`, a thread is spawned with [`spawn_decoder`] to
/// decode the input. The decoded lines are sent via a pipe to a
/// [`FastQReader`]. The second return value is the handle to the thread.
///
/// If the filename does not end in `gz`, the [`FastQReader`] is backed directly
/// by the file, and the [`IoThread`] return is `None`.
///
/// ## Errors
///
/// `path` must exist and contain FASTQ data, and if the file is zipped, then
/// creation of the pipe must succeed.
#[inline]
pub(crate) fn open_fastq_file<P: AsRef<Path>>(path: P) -> std::io::Result<(FastQReaderIc, Option<IoThread>)> {
    let file = File::open(&path)?;

    let is_gz = path.as_ref().extension().is_some_and(|ext| ext == "gz");

    if is_gz {
        let (pipe, thread) = spawn_decoder(path)?;
        Ok((FastQReader::from_readable(ReadFileZip::Zipped(pipe))?, Some(thread)))
    } else {
        Ok((FastQReader::from_readable(ReadFileZip::File(file))?, None))
    }
}

/// Opens 1-4 FASTQ input cursors, one per path, in order. The thread handles
/// for any zipped inputs are grouped together in [`IoThreads`].
///
/// Generalizes the original fixed `(file1, file2)` shape to an arbitrary
/// number of synchronized cursors, since the demultiplexer reads anywhere
/// from one to four inputs at once (see `SPEC_FULL.md` §4.F).
///
/// ## Errors
///
/// Every path in `paths` must exist and contain FASTQ data, and if zipped,
/// creation of its decode pipe must succeed. The returned [`IndexedIoError`]
/// tags which (0-indexed) input failed.
#[inline]
pub(crate) fn open_fastq_inputs<P: AsRef<Path>>(paths: &[P]) -> Result<(Vec<FastQReaderIc>, IoThreads), IndexedIoError> {
    let mut readers = Vec::with_capacity(paths.len());
    let mut threads = Vec::with_capacity(paths.len());

    for (index, path) in paths.iter().enumerate() {
        let (reader, thread) = open_fastq_file(path).map_err(|source| IndexedIoError { index, source })?;
        readers.push(reader);
        threads.push(thread);
    }

    Ok((readers, IoThreads(threads)))
}

/// Creates a [`WriteFileZipStdout`], using `path` to determine whether a
/// regular file, zipped file, or stdout should be used.
///
/// ## Errors
///
/// Creation of `path` must be successful, if a path is specified.
#[inline]
pub(crate) fn create_writer<P: AsRef<Path>>(path: Option<P>) -> std::io::Result<WriteFileZipStdout> {
    let writer = match path {
        Some(ref p) => {
            let is_gz = p.as_ref().extension().is_some_and(|ext| ext == "gz");
            let file = File::create(p)?;
            let buf_writer = BufWriter::new(file);

            if is_gz {
                WriteFileZipStdout::Zipped(GzEncoder::new(buf_writer, Compression::default()))
            } else {
                WriteFileZipStdout::File(buf_writer)
            }
        }
        None => WriteFileZipStdout::Stdout(BufWriter::new(stdout())),
    };

    Ok(writer)
}

/// Spawns a thread that decodes the input file using [`MultiGzDecoder`].
/// Returns a [`PipeReader`] for receiving the decoded data and an [`IoThread`]
/// handle for handling the thread and propagating errors.
///
/// ## Errors
///
/// `file_path` must exist, and the creation of the pipe must succeed.
#[inline]
fn spawn_decoder(file_path: impl AsRef<Path>) -> std::io::Result<(std::io::PipeReader, IoThread)> {
    let (reader, mut writer) = std::io::pipe()?;

    let mut decoder = MultiGzDecoder::new(File::open(file_path)?);

    let thread = thread::spawn(move || -> std::io::Result<_> {
        std::io::copy(&mut decoder, &mut writer)?;
        Ok(())
    });

    Ok((reader, thread))
}

/// The handle for a thread used for IO.
type IoThread = JoinHandle<std::io::Result<()>>;

/// A struct holding the [`IoThread`] handle for each input cursor, `None`
/// where that cursor's input was not gzipped.
pub(crate) struct IoThreads(Vec<Option<IoThread>>);

impl IoThreads {
    /// Calls `join` on every underlying thread and propagates the first
    /// error encountered.
    #[inline]
    pub(crate) fn finalize(self) -> std::io::Result<()> {
        for thread in self.0.into_iter().flatten() {
            thread.join().unwrap()?;
        }
        Ok(())
    }
}
