//! Run buffer implementation.

use rayon;

/// Buffer holding one run of records during in-memory sorting.
/// Size is accounted in encoded bytes: each record occupies its content length
/// plus one byte for the line terminator.
pub struct RecordBuffer {
    records: Vec<String>,
    size: u64,
}

impl RecordBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        RecordBuffer {
            records: Vec::new(),
            size: 0,
        }
    }

    /// Adds a record to the buffer.
    pub fn push(&mut self, record: String) {
        self.size += record.len() as u64 + 1;
        self.records.push(record);
    }

    /// Returns the number of buffered records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Checks if the buffer holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the encoded size of the buffered records in bytes.
    pub fn byte_size(&self) -> u64 {
        self.size
    }
}

impl Default for RecordBuffer {
    fn default() -> Self {
        RecordBuffer::new()
    }
}

impl IntoIterator for RecordBuffer {
    type Item = String;
    type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl rayon::slice::ParallelSliceMut<String> for RecordBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [String] {
        self.records.as_mut_slice()
    }
}
