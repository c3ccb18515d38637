//! Remote worker client.

use std::fmt;
use std::io::prelude::*;
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use log;

use crate::chunk::Chunk;
use crate::sort::SortError;
use crate::wire::{self, Command};

/// Default time to wait for a worker response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

/// Client side of one worker connection.
///
/// A client owns exactly one TCP connection and keeps at most one request in
/// flight. [`sort_file`](WorkerClient::sort_file) and
/// [`chunk_file`](WorkerClient::chunk_file) are fire-and-forget: the worker
/// sends no response and the call returns as soon as the command is written,
/// so completion must be awaited separately with
/// [`wait_complete`](WorkerClient::wait_complete).
///
/// File names sent to the worker are extended with a per-node suffix derived
/// from the worker address, so workers sharing a file system never write to
/// the same files.
pub struct WorkerClient {
    host: String,
    port: u16,
    stream: TcpStream,
    suffix: String,
    open: bool,
}

impl WorkerClient {
    /// Connects to a worker using the default response timeout.
    pub fn connect(host: &str, port: u16) -> Result<WorkerClient, SortError> {
        Self::connect_with_timeout(host, port, RESPONSE_TIMEOUT)
    }

    /// Connects to a worker. Blocking calls waiting for a response longer
    /// than `timeout` fail with [`SortError::Timeout`].
    pub fn connect_with_timeout(host: &str, port: u16, timeout: Duration) -> Result<WorkerClient, SortError> {
        let stream = TcpStream::connect((host, port)).map_err(wire::net_err)?;
        stream.set_read_timeout(Some(timeout)).map_err(wire::net_err)?;

        log::info!("connected to worker {}:{}", host, port);

        return Ok(WorkerClient {
            host: host.to_string(),
            port,
            stream,
            suffix: file_suffix(host, port),
            open: true,
        });
    }

    /// Returns the suffix appended to file names created for this node.
    pub fn file_suffix(&self) -> &str {
        &self.suffix
    }

    /// Instructs the worker to sort `input` into the node-suffixed `output`
    /// file under the given chunk size budget.
    pub fn sort_file(&mut self, input: &str, output: &str, chunk_size: u64) -> Result<(), SortError> {
        let command = Command::Sort {
            input: input.to_string(),
            output: format!("{}{}", output, self.suffix),
            chunk_size,
        };

        wire::write_frame(&mut self.stream, &command)
    }

    /// Instructs the worker to split its node-suffixed copy of `file` into
    /// budget-bounded chunks for collection.
    pub fn chunk_file(&mut self, file: &str, chunk_size: u64) -> Result<(), SortError> {
        let command = Command::Chunk {
            file: format!("{}{}", file, self.suffix),
            chunk_size,
        };

        wire::write_frame(&mut self.stream, &command)
    }

    /// Blocks until the previously sent fire-and-forget command has finished
    /// on the worker.
    pub fn wait_complete(&mut self) -> Result<(), SortError> {
        wire::write_frame(&mut self.stream, &Command::CommandComplete)?;
        wire::read_ack(&mut self.stream)?;

        return Ok(());
    }

    /// Requests the next chunk of the worker's chunked file and stores it in
    /// `dir`. Returns [`None`] once the worker reports its chunks exhausted.
    /// The payload is read fully off the socket before it is staged to a
    /// temporary file, so socket faults and local staging faults stay apart.
    pub fn next_chunk(&mut self, dir: &tempfile::TempDir) -> Result<Option<Chunk>, SortError> {
        wire::write_frame(&mut self.stream, &Command::GetChunk)?;

        let len = wire::read_chunk_len(&mut self.stream)?;
        if len == wire::CHUNKS_EXHAUSTED {
            return Ok(None);
        }
        if len < 0 {
            return Err(SortError::Protocol(format!("invalid chunk length: {}", len)));
        }

        log::debug!("receiving chunk of {} bytes from {}", len, self);
        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload).map_err(wire::net_err)?;

        let chunk = Chunk::from_reader(dir, payload.as_slice(), len as u64)
            .map_err(|err| SortError::TempDir(err))?;

        return Ok(Some(chunk));
    }

    /// Sends `SHUTDOWN` and closes the connection. Errors are logged and
    /// swallowed since the worker may already be gone.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        if let Err(err) = wire::write_frame(&mut self.stream, &Command::Shutdown) {
            log::warn!("worker {} shutdown failed: {}", self, err);
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for WorkerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn file_suffix(host: &str, port: u16) -> String {
    format!("{}-{}", host.replace('.', "-").replace(':', "-"), port)
}
