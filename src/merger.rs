//! Binary heap merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::convert::Infallible;

/// Source of records consumed by the merger.
/// Records must come out in ascending order, otherwise the merge result is
/// undefined.
pub trait MergeSource {
    type Error;

    /// Returns the next record, or [`None`] once the source is exhausted.
    fn next_record(&mut self) -> Result<Option<String>, Self::Error>;
}

/// Merge source over an in-memory record sequence.
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = String>,
{
    pub fn new(iter: I) -> Self {
        IterSource { iter }
    }
}

impl<I> MergeSource for IterSource<I>
where
    I: Iterator<Item = String>,
{
    type Error = Infallible;

    fn next_record(&mut self) -> Result<Option<String>, Self::Error> {
        Ok(self.iter.next())
    }
}

// Binary heap is a max-heap so the ordering is inverted to pop the smallest
// record first. Equal records pop in source registration order.
struct HeapEntry {
    record: String,
    source: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .record
            .cmp(&self.record)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record && self.source == other.source
    }
}

impl Eq for HeapEntry {}

/// Binary heap merger implementation.
/// Merges multiple sorted sources into a single sorted output in one pass.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number
/// of records, *n* is the number of sources.
pub struct BinaryHeapMerger<S>
where
    S: MergeSource,
{
    sources: Vec<S>,
    items: BinaryHeap<HeapEntry>,
    initiated: bool,
}

impl<S> BinaryHeapMerger<S>
where
    S: MergeSource,
{
    /// Creates an instance of a binary heap merger over the given sources.
    /// Each source holds at most one record on the heap at a time, so memory
    /// usage is bounded by the number of sources.
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
    {
        let sources = Vec::from_iter(sources);
        let items = BinaryHeap::with_capacity(sources.len());

        return BinaryHeapMerger {
            sources,
            items,
            initiated: false,
        };
    }
}

impl<S> Iterator for BinaryHeapMerger<S>
where
    S: MergeSource,
{
    type Item = Result<String, S::Error>;

    /// Returns the next record from the sources in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            for (idx, source) in self.sources.iter_mut().enumerate() {
                match source.next_record() {
                    Ok(Some(record)) => self.items.push(HeapEntry { record, source: idx }),
                    Ok(None) => {}
                    Err(err) => return Some(Err(err)),
                }
            }
            self.initiated = true;
        }

        let entry = self.items.pop()?;
        match self.sources[entry.source].next_record() {
            Ok(Some(record)) => self.items.push(HeapEntry {
                record,
                source: entry.source,
            }),
            Ok(None) => {}
            Err(err) => return Some(Err(err)),
        }

        return Some(Ok(entry.record));
    }
}
