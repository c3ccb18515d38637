use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use tempfile;

use crate::merger::MergeSource;

/// A chunk of records stored in an anonymous temporary file.
///
/// Records are kept as newline-delimited UTF-8 text, so the raw bytes of a
/// chunk are a valid record file on their own. The backing file is removed
/// by the OS when the last handle is dropped.
#[derive(Debug)]
pub struct Chunk {
    file: fs::File,
    len: u64,
}

impl Chunk {
    /// Creates a chunk from a byte stream containing exactly `len` bytes of
    /// newline-delimited records. Fails if the stream ends early.
    pub fn from_reader(dir: &tempfile::TempDir, reader: impl Read, len: u64) -> io::Result<Chunk> {
        let mut file = tempfile::tempfile_in(dir)?;

        let mut reader = reader.take(len);
        let copied = io::copy(&mut reader, &mut file)?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("chunk transfer truncated: expected {} bytes, got {}", len, copied),
            ));
        }

        return Ok(Chunk { file, len });
    }

    /// Returns the encoded size of the chunk in bytes.
    pub fn byte_size(&self) -> u64 {
        self.len
    }

    /// Returns an iterator over the chunk records.
    pub fn records(&self, buf_size: Option<usize>) -> io::Result<ChunkReader> {
        let mut reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, self.file.try_clone()?),
            None => io::BufReader::new(self.file.try_clone()?),
        };
        reader.rewind()?;

        return Ok(ChunkReader {
            lines: reader.take(self.len).lines(),
        });
    }

    /// Returns a reader over the raw chunk bytes, positioned at the start.
    pub fn raw_bytes(&self) -> io::Result<io::Take<fs::File>> {
        let mut file = self.file.try_clone()?;
        file.rewind()?;

        return Ok(file.take(self.len));
    }
}

/// Writer accumulating records into a new [`Chunk`].
pub struct ChunkWriter {
    file: fs::File,
    writer: io::BufWriter<fs::File>,
    len: u64,
}

impl ChunkWriter {
    /// Creates a writer backed by a fresh temporary file in `dir`.
    pub fn create(dir: &tempfile::TempDir, buf_size: Option<usize>) -> io::Result<ChunkWriter> {
        let file = tempfile::tempfile_in(dir)?;

        let writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file.try_clone()?),
            None => io::BufWriter::new(file.try_clone()?),
        };

        return Ok(ChunkWriter { file, writer, len: 0 });
    }

    /// Appends a record followed by the line terminator.
    pub fn write_record(&mut self, record: &str) -> io::Result<()> {
        self.writer.write_all(record.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.len += record.len() as u64 + 1;

        return Ok(());
    }

    /// Returns the encoded size of the records written so far.
    pub fn byte_size(&self) -> u64 {
        self.len
    }

    /// Flushes buffered data and seals the chunk.
    pub fn finish(mut self) -> io::Result<Chunk> {
        self.writer.flush()?;

        return Ok(Chunk {
            file: self.file,
            len: self.len,
        });
    }
}

/// Iterator over the records of a [`Chunk`].
pub struct ChunkReader {
    lines: io::Lines<io::Take<io::BufReader<fs::File>>>,
}

impl Iterator for ChunkReader {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next()
    }
}

impl MergeSource for ChunkReader {
    type Error = io::Error;

    fn next_record(&mut self) -> Result<Option<String>, Self::Error> {
        self.lines.next().transpose()
    }
}

/// Splits a record stream into chunks of at most `chunk_size` encoded bytes
/// without splitting or reordering records.
///
/// A record that would overflow the current chunk seals it and starts the
/// next one. A single record larger than the whole budget is placed alone in
/// its own oversized chunk. Empty input produces no chunks.
pub fn split<R>(
    input: R,
    chunk_size: u64,
    dir: &tempfile::TempDir,
    buf_size: Option<usize>,
) -> io::Result<Vec<Chunk>>
where
    R: BufRead,
{
    let mut chunks = Vec::new();
    let mut current: Option<ChunkWriter> = None;

    for record in input.lines() {
        let record = record?;
        let record_size = record.len() as u64 + 1;

        let mut writer = match current.take() {
            Some(writer) if writer.byte_size() + record_size > chunk_size => {
                chunks.push(writer.finish()?);
                ChunkWriter::create(dir, buf_size)?
            }
            Some(writer) => writer,
            None => ChunkWriter::create(dir, buf_size)?,
        };

        writer.write_record(&record)?;
        current = Some(writer);
    }

    if let Some(writer) = current {
        chunks.push(writer.finish()?);
    }

    return Ok(chunks);
}

/// Splits a file into chunks. See [`split`].
pub fn split_file(
    path: &Path,
    chunk_size: u64,
    dir: &tempfile::TempDir,
    buf_size: Option<usize>,
) -> io::Result<Vec<Chunk>> {
    let file = fs::File::open(path)?;
    let reader = match buf_size {
        Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
        None => io::BufReader::new(file),
    };

    return split(reader, chunk_size, dir, buf_size);
}
