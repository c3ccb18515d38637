//! `shard-sort` is a distributed external sort for line-oriented text files.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted does not fit into the main memory (RAM) of a computer and instead must
//! reside in slower external memory, usually a hard disk drive. Sorting is achieved in two passes. During the
//! first pass the file is split into chunks of records that each fit in RAM and every chunk is sorted on its own,
//! during the second pass the sorted chunks are merged together. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `shard-sort` supports the following features:
//!
//! * **Bounded memory:**
//!   the amount of record data held in memory at a time never exceeds the configured chunk size, no matter how
//!   large the input file is. A record is never split across chunks.
//! * **Multithreading support:**
//!   chunks are sorted in memory on a thread pool utilizing maximum CPU resources and reducing sorting time.
//! * **Distributed sorting:**
//!   a file sharded across remote nodes is sorted by sorting every shard in place and merging the sorted shards
//!   over the network, streaming one chunk per node at a time. Workers are driven through a small TCP protocol.
//! * **Deterministic merging:**
//!   merge output depends only on the record values and the node registration order, so repeated runs produce
//!   byte-identical results.
//!
//! # Example
//!
//! Sorting a local file:
//!
//! ```no_run
//! use std::path::Path;
//!
//! use shard_sort::FileSorterBuilder;
//!
//! fn main() {
//!     let sorter = FileSorterBuilder::new()
//!         .with_tmp_dir(Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     sorter
//!         .sort_file(Path::new("input.txt"), Path::new("output.txt"), 50_000_000)
//!         .unwrap();
//! }
//! ```
//!
//! Sorting a file sharded across two worker nodes:
//!
//! ```no_run
//! use shard_sort::{distributed_sort, WorkerClient};
//!
//! fn main() {
//!     let mut nodes = vec![
//!         WorkerClient::connect("10.0.0.1", 4711).unwrap(),
//!         WorkerClient::connect("10.0.0.2", 4711).unwrap(),
//!     ];
//!
//!     distributed_sort("input.txt", "output.txt", 50_000_000, &mut nodes).unwrap();
//!
//!     for node in &mut nodes {
//!         node.close();
//!     }
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod client;
pub mod compare;
pub mod dist;
pub mod merger;
pub mod server;
pub mod sort;
pub mod wire;

pub use buffer::RecordBuffer;
pub use chunk::{Chunk, ChunkReader, ChunkWriter};
pub use client::WorkerClient;
pub use compare::{compare_files, FileDiff};
pub use dist::distributed_sort;
pub use merger::{BinaryHeapMerger, IterSource, MergeSource};
pub use server::WorkerServer;
pub use sort::{FileSorter, FileSorterBuilder, SortError};
