//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use rayon::slice::ParallelSliceMut;

use crate::buffer::RecordBuffer;
use crate::chunk::{self, Chunk, ChunkWriter};
use crate::merger::BinaryHeapMerger;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// A multi-record sort run exceeded the chunk size budget.
    RunTooLarge {
        /// Encoded size of the run in bytes.
        size: u64,
        /// Configured chunk size budget in bytes.
        chunk_size: u64,
    },
    /// Malformed or unexpected wire protocol data.
    Protocol(String),
    /// Network connection, send or receive error.
    Network(io::Error),
    /// A blocking network call exceeded the response timeout.
    Timeout,
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::Network(err) => Some(err),
            SortError::RunTooLarge { .. } | SortError::Protocol(_) | SortError::Timeout => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::RunTooLarge { size, chunk_size } => {
                write!(f, "sort run of {} bytes exceeds the chunk size of {} bytes", size, chunk_size)
            }
            SortError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            SortError::Network(err) => write!(f, "network operation failed: {}", err),
            SortError::Timeout => write!(f, "response timeout exceeded"),
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::IO(err)
    }
}

/// File sorter builder. Provides methods for [`FileSorter`] initialization.
#[derive(Clone, Default)]
pub struct FileSorterBuilder {
    /// Number of threads to be used to sort runs in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl FileSorterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        FileSorterBuilder::default()
    }

    /// Builds a [`FileSorter`] instance using provided configuration.
    pub fn build(self) -> Result<FileSorter, SortError> {
        FileSorter::new(self.threads_number, self.tmp_dir.as_deref(), self.rw_buf_size)
    }

    /// Sets number of threads to be used to sort runs in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> FileSorterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> FileSorterBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> FileSorterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

/// External file sorter.
/// Sorts line-oriented text files of any size holding at most one chunk of
/// records in memory at a time.
pub struct FileSorter {
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: tempfile::TempDir,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,
}

impl FileSorter {
    /// Creates a new file sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort runs in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If parameter is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Chunk file read/write buffer size.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        return Ok(FileSorter {
            rw_buf_size,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorts the records of `input` into `output` holding at most `chunk_size`
    /// bytes of record data in memory at a time.
    ///
    /// The input is split into budget-bounded runs, each run is sorted in
    /// memory and written back to temporary storage, and the sorted runs are
    /// merged into the output in a single pass.
    pub fn sort_file(&self, input: &Path, output: &Path, chunk_size: u64) -> Result<(), SortError> {
        let runs = chunk::split_file(input, chunk_size, &self.tmp_dir, self.rw_buf_size)?;

        let mut sorted_runs = Vec::with_capacity(runs.len());
        for run in runs {
            sorted_runs.push(self.sort_run(run, chunk_size)?);
        }

        log::debug!("external sort preparation done");

        let mut readers = Vec::with_capacity(sorted_runs.len());
        for run in &sorted_runs {
            readers.push(run.records(self.rw_buf_size)?);
        }
        let merger = BinaryHeapMerger::new(readers);

        let output_file = fs::File::create(output)?;
        let mut output_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, output_file),
            None => io::BufWriter::new(output_file),
        };

        for record in merger {
            let record = record?;
            output_writer.write_all(record.as_bytes())?;
            output_writer.write_all(b"\n")?;
        }
        output_writer.flush()?;

        return Ok(());
    }

    /// Sorts a single run in memory and writes it back as a new chunk.
    /// The run is checked against the budget again on load; a run over budget
    /// is an error unless it consists of a single oversized record.
    pub fn sort_run(&self, run: Chunk, chunk_size: u64) -> Result<Chunk, SortError> {
        let mut buffer = RecordBuffer::new();
        for record in run.records(self.rw_buf_size)? {
            buffer.push(record?);
        }

        if buffer.byte_size() > chunk_size && buffer.len() > 1 {
            return Err(SortError::RunTooLarge {
                size: buffer.byte_size(),
                chunk_size,
            });
        }

        log::debug!("sorting chunk data ...");
        self.thread_pool.install(|| {
            buffer.par_sort();
        });

        log::debug!("saving chunk data");
        let mut writer = ChunkWriter::create(&self.tmp_dir, self.rw_buf_size)?;
        for record in buffer {
            writer.write_record(&record)?;
        }

        return Ok(writer.finish()?);
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;
    use std::path::Path;

    use rand::seq::SliceRandom;
    use rstest::*;

    use crate::chunk::ChunkWriter;

    use super::{FileSorter, FileSorterBuilder, SortError};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[fixture]
    fn sorter() -> FileSorter {
        FileSorterBuilder::new()
            .with_threads_number(2)
            .with_tmp_dir(Path::new("./"))
            .build()
            .unwrap()
    }

    fn write_records<S: AsRef<str>>(path: &Path, records: &[S]) {
        let mut content = String::new();
        for record in records {
            content.push_str(record.as_ref());
            content.push('\n');
        }
        fs::write(path, content).unwrap();
    }

    #[rstest]
    fn test_sort_file_single_chunk(tmp_dir: tempfile::TempDir, sorter: FileSorter) {
        let input = tmp_dir.path().join("input.txt");
        let output = tmp_dir.path().join("output.txt");
        write_records(&input, &["banana", "apple", "cherry"]);

        sorter.sort_file(&input, &output, 1024).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "apple\nbanana\ncherry\n");
    }

    #[rstest]
    fn test_sort_file_multiple_chunks(tmp_dir: tempfile::TempDir, sorter: FileSorter) {
        let mut records = Vec::from_iter((0..100).map(|i| format!("{:03}", i)));
        records.shuffle(&mut rand::thread_rng());

        let input = tmp_dir.path().join("input.txt");
        let output = tmp_dir.path().join("output.txt");
        write_records(&input, &records);

        // 4 bytes per encoded record, so the input spans many runs
        sorter.sort_file(&input, &output, 64).unwrap();

        let expected = String::from_iter((0..100).map(|i| format!("{:03}\n", i)));
        assert_eq!(fs::read_to_string(&output).unwrap(), expected);
    }

    #[rstest]
    fn test_sort_file_duplicate_records(tmp_dir: tempfile::TempDir, sorter: FileSorter) {
        let input = tmp_dir.path().join("input.txt");
        let output = tmp_dir.path().join("output.txt");
        write_records(&input, &["bee", "ant", "bee", "ant"]);

        sorter.sort_file(&input, &output, 8).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "ant\nant\nbee\nbee\n");
    }

    #[rstest]
    fn test_sort_file_idempotent(tmp_dir: tempfile::TempDir, sorter: FileSorter) {
        let input = tmp_dir.path().join("input.txt");
        let sorted_once = tmp_dir.path().join("once.txt");
        let sorted_twice = tmp_dir.path().join("twice.txt");

        let mut records = Vec::from_iter((0..50).map(|i| format!("{:02}", i)));
        records.shuffle(&mut rand::thread_rng());
        write_records(&input, &records);

        sorter.sort_file(&input, &sorted_once, 32).unwrap();
        sorter.sort_file(&sorted_once, &sorted_twice, 32).unwrap();

        assert_eq!(
            fs::read(&sorted_once).unwrap(),
            fs::read(&sorted_twice).unwrap()
        );
    }

    #[rstest]
    fn test_sort_file_empty_input(tmp_dir: tempfile::TempDir, sorter: FileSorter) {
        let input = tmp_dir.path().join("input.txt");
        let output = tmp_dir.path().join("output.txt");
        fs::write(&input, "").unwrap();

        sorter.sort_file(&input, &output, 1024).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "");
    }

    #[rstest]
    fn test_sort_run_too_large(tmp_dir: tempfile::TempDir, sorter: FileSorter) {
        let mut writer = ChunkWriter::create(&tmp_dir, None).unwrap();
        writer.write_record("first long record").unwrap();
        writer.write_record("second long record").unwrap();
        let run = writer.finish().unwrap();

        let result = sorter.sort_run(run, 10);

        assert!(matches!(result, Err(SortError::RunTooLarge { .. })));
    }

    #[rstest]
    fn test_sort_run_oversized_single_record(tmp_dir: tempfile::TempDir, sorter: FileSorter) {
        let mut writer = ChunkWriter::create(&tmp_dir, None).unwrap();
        writer.write_record("a record far longer than the budget").unwrap();
        let run = writer.finish().unwrap();

        let sorted = sorter.sort_run(run, 10).unwrap();

        let records: Vec<String> = sorted.records(None).unwrap().collect::<io::Result<_>>().unwrap();
        assert_eq!(records, vec!["a record far longer than the budget"]);
    }
}
