//! Remote worker server.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};

use log;

use crate::chunk::{self, Chunk};
use crate::sort::{FileSorter, SortError};
use crate::wire::{self, Command};

/// Server side of one worker node.
///
/// A server accepts exactly one collecting client and serves its commands
/// until `SHUTDOWN` arrives or the connection fails. `SORT` and `CHUNK` are
/// executed synchronously and send no response, which is what makes the
/// client's completion barrier work: the `COMMAND_COMPLETE` frame queued
/// behind them is only read once they are done.
pub struct WorkerServer {
    listener: TcpListener,
    base_dir: PathBuf,
    sorter: FileSorter,
    tmp_dir: tempfile::TempDir,
    chunks: Vec<Chunk>,
    cursor: usize,
}

impl WorkerServer {
    /// Binds a worker server. Relative file names received in commands are
    /// resolved against `base_dir`.
    pub fn bind(addr: impl ToSocketAddrs, base_dir: &Path) -> Result<WorkerServer, SortError> {
        let listener = TcpListener::bind(addr).map_err(wire::net_err)?;
        let sorter = FileSorter::new(None, None, None)?;
        let tmp_dir = tempfile::tempdir().map_err(|err| SortError::TempDir(err))?;

        log::info!("worker listening on {}", listener.local_addr().map_err(wire::net_err)?);

        return Ok(WorkerServer {
            listener,
            base_dir: base_dir.to_path_buf(),
            sorter,
            tmp_dir,
            chunks: Vec::new(),
            cursor: 0,
        });
    }

    /// Returns the bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr, SortError> {
        self.listener.local_addr().map_err(wire::net_err)
    }

    /// Accepts one collecting client and serves its commands until it sends
    /// `SHUTDOWN`. Any fault is fatal and terminates the connection.
    pub fn run(mut self) -> Result<(), SortError> {
        let (stream, peer) = self.listener.accept().map_err(wire::net_err)?;
        log::info!("serving collector {}", peer);

        return self.serve(stream);
    }

    fn serve(&mut self, mut stream: TcpStream) -> Result<(), SortError> {
        loop {
            let command = wire::read_frame(&mut stream)?;
            log::debug!("received command: {:?}", command);

            match command {
                Command::Sort {
                    input,
                    output,
                    chunk_size,
                } => {
                    let input = self.resolve(&input);
                    let output = self.resolve(&output);
                    self.sorter.sort_file(&input, &output, chunk_size)?;
                }
                Command::Chunk { file, chunk_size } => {
                    let file = self.resolve(&file);
                    self.chunks = chunk::split_file(&file, chunk_size, &self.tmp_dir, None)?;
                    self.cursor = 0;
                    log::debug!("{} split into {} chunks", file.display(), self.chunks.len());
                }
                Command::CommandComplete => {
                    wire::write_ack(&mut stream, true)?;
                }
                Command::GetChunk => {
                    self.send_next_chunk(&mut stream)?;
                }
                Command::Shutdown => {
                    log::info!("shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn send_next_chunk(&mut self, stream: &mut TcpStream) -> Result<(), SortError> {
        if self.cursor >= self.chunks.len() {
            return wire::write_chunk_len(stream, wire::CHUNKS_EXHAUSTED);
        }

        let chunk = &self.chunks[self.cursor];
        self.cursor += 1;

        let len = chunk.byte_size();
        if len > i32::MAX as u64 {
            return Err(SortError::Protocol(format!(
                "chunk of {} bytes exceeds the payload limit",
                len
            )));
        }

        wire::write_chunk_len(stream, len as i32)?;
        io::copy(&mut chunk.raw_bytes()?, stream).map_err(wire::net_err)?;

        return Ok(());
    }

    // Path::join drops the base when the name is absolute.
    fn resolve(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::prelude::*;
    use std::net::{SocketAddr, TcpStream};
    use std::thread;

    use rstest::*;

    use crate::sort::SortError;
    use crate::wire::{self, Command};

    use super::WorkerServer;

    #[fixture]
    fn base_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn spawn_server(base_dir: &tempfile::TempDir) -> (SocketAddr, thread::JoinHandle<Result<(), SortError>>) {
        let server = WorkerServer::bind("127.0.0.1:0", base_dir.path()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = thread::spawn(move || server.run());

        (addr, handle)
    }

    fn drain_chunks(stream: &mut TcpStream) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        loop {
            wire::write_frame(stream, &Command::GetChunk).unwrap();

            let len = wire::read_chunk_len(stream).unwrap();
            if len == wire::CHUNKS_EXHAUSTED {
                return chunks;
            }

            let mut payload = vec![0u8; len as usize];
            stream.read_exact(&mut payload).unwrap();
            chunks.push(payload);
        }
    }

    #[rstest]
    fn test_get_chunk_before_chunk_returns_sentinel(base_dir: tempfile::TempDir) {
        let (addr, handle) = spawn_server(&base_dir);
        let mut stream = TcpStream::connect(addr).unwrap();

        wire::write_frame(&mut stream, &Command::GetChunk).unwrap();
        assert_eq!(wire::read_chunk_len(&mut stream).unwrap(), wire::CHUNKS_EXHAUSTED);

        wire::write_frame(&mut stream, &Command::Shutdown).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[rstest]
    fn test_sort_and_collect_chunks(base_dir: tempfile::TempDir) {
        fs::write(base_dir.path().join("input.txt"), "cherry\napple\nbanana\n").unwrap();

        let (addr, handle) = spawn_server(&base_dir);
        let mut stream = TcpStream::connect(addr).unwrap();

        let sort = Command::Sort {
            input: "input.txt".to_string(),
            output: "sorted.txt".to_string(),
            chunk_size: 100,
        };
        wire::write_frame(&mut stream, &sort).unwrap();
        wire::write_frame(&mut stream, &Command::CommandComplete).unwrap();
        assert_eq!(wire::read_ack(&mut stream).unwrap(), true);

        assert_eq!(
            fs::read_to_string(base_dir.path().join("sorted.txt")).unwrap(),
            "apple\nbanana\ncherry\n"
        );

        let chunk = Command::Chunk {
            file: "sorted.txt".to_string(),
            chunk_size: 8,
        };
        wire::write_frame(&mut stream, &chunk).unwrap();
        wire::write_frame(&mut stream, &Command::CommandComplete).unwrap();
        assert_eq!(wire::read_ack(&mut stream).unwrap(), true);

        let chunks = drain_chunks(&mut stream);
        assert_eq!(chunks.len(), 3);
        let collected: Vec<u8> = chunks.into_iter().flatten().collect();
        assert_eq!(collected, b"apple\nbanana\ncherry\n");

        wire::write_frame(&mut stream, &Command::Shutdown).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[rstest]
    fn test_chunk_command_resets_cursor(base_dir: tempfile::TempDir) {
        fs::write(base_dir.path().join("data.txt"), "ant\nbee\n").unwrap();

        let (addr, handle) = spawn_server(&base_dir);
        let mut stream = TcpStream::connect(addr).unwrap();

        let chunk = Command::Chunk {
            file: "data.txt".to_string(),
            chunk_size: 100,
        };

        wire::write_frame(&mut stream, &chunk).unwrap();
        wire::write_frame(&mut stream, &Command::CommandComplete).unwrap();
        wire::read_ack(&mut stream).unwrap();
        assert_eq!(drain_chunks(&mut stream), vec![b"ant\nbee\n".to_vec()]);

        // a second CHUNK starts the chunk list over
        wire::write_frame(&mut stream, &chunk).unwrap();
        wire::write_frame(&mut stream, &Command::CommandComplete).unwrap();
        wire::read_ack(&mut stream).unwrap();
        assert_eq!(drain_chunks(&mut stream), vec![b"ant\nbee\n".to_vec()]);

        wire::write_frame(&mut stream, &Command::Shutdown).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[rstest]
    fn test_malformed_command_is_fatal(base_dir: tempfile::TempDir) {
        let (addr, handle) = spawn_server(&base_dir);
        let mut stream = TcpStream::connect(addr).unwrap();

        let body = b"FROBNICATE";
        stream.write_all(&(body.len() as u16).to_be_bytes()).unwrap();
        stream.write_all(body).unwrap();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(SortError::Protocol(_))));
    }
}
