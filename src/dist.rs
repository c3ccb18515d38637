//! Distributed sort orchestration.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use log;

use crate::chunk::ChunkReader;
use crate::client::WorkerClient;
use crate::merger::{BinaryHeapMerger, MergeSource};
use crate::sort::SortError;

/// Merge source streaming one worker's sorted shard chunk by chunk.
/// At most one chunk is staged on local disk at a time; the next one is
/// pulled over the network only once the staged chunk is drained.
struct ChunkCursor<'a> {
    node: &'a mut WorkerClient,
    tmp_dir: &'a tempfile::TempDir,
    records: Option<ChunkReader>,
    exhausted: bool,
}

impl MergeSource for ChunkCursor<'_> {
    type Error = SortError;

    fn next_record(&mut self) -> Result<Option<String>, Self::Error> {
        loop {
            if self.exhausted {
                return Ok(None);
            }

            if let Some(records) = self.records.as_mut() {
                match records.next_record()? {
                    Some(record) => return Ok(Some(record)),
                    None => self.records = None,
                }
            }

            match self.node.next_chunk(self.tmp_dir)? {
                Some(chunk) => self.records = Some(chunk.records(None)?),
                None => self.exhausted = true,
            }
        }
    }
}

/// Sorts a file sharded across `nodes` into a single locally written output.
///
/// Every worker holds its own shard under the shared `input_name`; the merged
/// result is written to `output_name` on the collecting side. The phases are
/// strictly ordered: all shards are sorted remotely, then all sorted shards
/// are chunked remotely, then the chunks are streamed in and merged. Within
/// a phase the workers run concurrently since the commands are
/// fire-and-forget; the completion barriers keep a phase from starting
/// before the previous one has finished on every node.
///
/// Any node failure aborts the whole sort. There is no partial result.
pub fn distributed_sort(
    input_name: &str,
    output_name: &str,
    chunk_size: u64,
    nodes: &mut [WorkerClient],
) -> Result<(), SortError> {
    log::info!("sorting {} on {} nodes", input_name, nodes.len());
    for node in nodes.iter_mut() {
        node.sort_file(input_name, output_name, chunk_size)?;
    }
    for node in nodes.iter_mut() {
        node.wait_complete()?;
    }

    log::info!("chunking sorted shards");
    for node in nodes.iter_mut() {
        node.chunk_file(output_name, chunk_size)?;
    }
    for node in nodes.iter_mut() {
        node.wait_complete()?;
    }

    let tmp_dir = tempfile::tempdir().map_err(|err| SortError::TempDir(err))?;

    let mut cursors = Vec::with_capacity(nodes.len());
    for node in nodes.iter_mut() {
        cursors.push(ChunkCursor {
            node,
            tmp_dir: &tmp_dir,
            records: None,
            exhausted: false,
        });
    }
    let merger = BinaryHeapMerger::new(cursors);

    log::info!("merging shards into {}", output_name);
    let output_file = fs::File::create(Path::new(output_name))?;
    let mut output_writer = io::BufWriter::new(output_file);

    for record in merger {
        let record = record?;
        output_writer.write_all(record.as_bytes())?;
        output_writer.write_all(b"\n")?;
    }
    output_writer.flush()?;

    return Ok(());
}
