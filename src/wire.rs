//! Wire protocol shared by the collector client and the worker server.
//!
//! Commands travel as text frames prefixed with a big-endian `u16` byte
//! length. The frame body is the opcode followed by comma-separated
//! arguments, so file names must not contain commas. Chunk payloads are
//! prefixed with a big-endian `i32` byte length where [`CHUNKS_EXHAUSTED`]
//! signals that no chunks remain.

use std::io;
use std::io::prelude::*;

use crate::sort::SortError;

pub const SORT_CMD: &str = "SORT";
pub const CHUNK_CMD: &str = "CHUNK";
pub const GET_CHUNK_CMD: &str = "GET_CHUNK";
pub const COMMAND_COMPLETE_CMD: &str = "COMMAND_COMPLETE";
pub const SHUTDOWN_CMD: &str = "SHUTDOWN";

/// Chunk length sentinel meaning no chunks remain since the last `CHUNK`.
pub const CHUNKS_EXHAUSTED: i32 = -1;

/// Longest allowed command frame body in bytes.
const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Command sent from the collector to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sort a worker file with the local external sort.
    Sort {
        input: String,
        output: String,
        chunk_size: u64,
    },
    /// Split a worker file into budget-bounded chunks.
    Chunk { file: String, chunk_size: u64 },
    /// Block until the previously sent `SORT` or `CHUNK` has finished.
    CommandComplete,
    /// Request the next chunk payload.
    GetChunk,
    /// Terminate the worker.
    Shutdown,
}

impl Command {
    /// Encodes the command as a text frame body.
    pub fn encode(&self) -> String {
        match self {
            Command::Sort {
                input,
                output,
                chunk_size,
            } => format!("{},{},{},{}", SORT_CMD, input, output, chunk_size),
            Command::Chunk { file, chunk_size } => format!("{},{},{}", CHUNK_CMD, file, chunk_size),
            Command::CommandComplete => COMMAND_COMPLETE_CMD.to_string(),
            Command::GetChunk => GET_CHUNK_CMD.to_string(),
            Command::Shutdown => SHUTDOWN_CMD.to_string(),
        }
    }

    /// Parses a text frame body into a command.
    pub fn parse(frame: &str) -> Result<Command, SortError> {
        let parts: Vec<&str> = frame.split(',').collect();

        let command = match parts[0] {
            SORT_CMD => {
                check_arg_count(&parts, 3)?;
                Command::Sort {
                    input: parts[1].to_string(),
                    output: parts[2].to_string(),
                    chunk_size: parse_size(parts[3])?,
                }
            }
            CHUNK_CMD => {
                check_arg_count(&parts, 2)?;
                Command::Chunk {
                    file: parts[1].to_string(),
                    chunk_size: parse_size(parts[2])?,
                }
            }
            COMMAND_COMPLETE_CMD => {
                check_arg_count(&parts, 0)?;
                Command::CommandComplete
            }
            GET_CHUNK_CMD => {
                check_arg_count(&parts, 0)?;
                Command::GetChunk
            }
            SHUTDOWN_CMD => {
                check_arg_count(&parts, 0)?;
                Command::Shutdown
            }
            unknown => return Err(SortError::Protocol(format!("unknown command: {:?}", unknown))),
        };

        return Ok(command);
    }
}

fn check_arg_count(parts: &[&str], expected: usize) -> Result<(), SortError> {
    if parts.len() != expected + 1 {
        return Err(SortError::Protocol(format!(
            "{} command expects {} arguments, got {}",
            parts[0],
            expected,
            parts.len() - 1
        )));
    }

    return Ok(());
}

fn parse_size(value: &str) -> Result<u64, SortError> {
    value
        .parse()
        .map_err(|_| SortError::Protocol(format!("invalid chunk size: {:?}", value)))
}

/// Writes a length-prefixed command frame.
pub fn write_frame(writer: &mut impl Write, command: &Command) -> Result<(), SortError> {
    let body = command.encode();
    if body.len() > MAX_FRAME_LEN {
        return Err(SortError::Protocol(format!(
            "command frame of {} bytes is too long",
            body.len()
        )));
    }

    writer.write_all(&(body.len() as u16).to_be_bytes()).map_err(net_err)?;
    writer.write_all(body.as_bytes()).map_err(net_err)?;
    writer.flush().map_err(net_err)?;

    return Ok(());
}

/// Reads a length-prefixed command frame.
pub fn read_frame(reader: &mut impl Read) -> Result<Command, SortError> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf).map_err(net_err)?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(net_err)?;
    let body =
        String::from_utf8(body).map_err(|_| SortError::Protocol("command frame is not valid UTF-8".to_string()))?;

    return Command::parse(&body);
}

/// Writes a chunk payload length prefix.
pub fn write_chunk_len(writer: &mut impl Write, len: i32) -> Result<(), SortError> {
    writer.write_all(&len.to_be_bytes()).map_err(net_err)
}

/// Reads a chunk payload length prefix.
pub fn read_chunk_len(reader: &mut impl Read) -> Result<i32, SortError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).map_err(net_err)?;

    return Ok(i32::from_be_bytes(len_buf));
}

/// Writes a one-byte boolean acknowledgement.
pub fn write_ack(writer: &mut impl Write, value: bool) -> Result<(), SortError> {
    writer.write_all(&[value as u8]).map_err(net_err)
}

/// Reads a one-byte boolean acknowledgement.
pub fn read_ack(reader: &mut impl Read) -> Result<bool, SortError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(net_err)?;

    return Ok(buf[0] != 0);
}

/// Maps a socket error to the matching sort error. Read timeouts surface as
/// [`io::ErrorKind::WouldBlock`] on some platforms.
pub(crate) fn net_err(err: io::Error) -> SortError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => SortError::Timeout,
        _ => SortError::Network(err),
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use crate::sort::SortError;

    use super::*;

    #[rstest]
    #[case(
        Command::Sort {
            input: "input.txt".to_string(),
            output: "output.txt".to_string(),
            chunk_size: 1024,
        },
        "SORT,input.txt,output.txt,1024",
    )]
    #[case(
        Command::Chunk {
            file: "output.txt".to_string(),
            chunk_size: 512,
        },
        "CHUNK,output.txt,512",
    )]
    #[case(Command::CommandComplete, "COMMAND_COMPLETE")]
    #[case(Command::GetChunk, "GET_CHUNK")]
    #[case(Command::Shutdown, "SHUTDOWN")]
    fn test_command_encoding(#[case] command: Command, #[case] expected_frame: &str) {
        assert_eq!(command.encode(), expected_frame);
        assert_eq!(Command::parse(expected_frame).unwrap(), command);
    }

    #[rstest]
    #[case("")]
    #[case("FROBNICATE")]
    #[case("SORT,input.txt,output.txt")]
    #[case("SORT,input.txt,output.txt,1024,extra")]
    #[case("CHUNK,output.txt,ten")]
    #[case("GET_CHUNK,unexpected")]
    fn test_command_parse_errors(#[case] frame: &str) {
        assert!(matches!(Command::parse(frame), Err(SortError::Protocol(_))));
    }

    #[rstest]
    fn test_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Command::GetChunk).unwrap();

        assert_eq!(buf, b"\x00\x09GET_CHUNK");
        assert_eq!(read_frame(&mut buf.as_slice()).unwrap(), Command::GetChunk);
    }

    #[rstest]
    fn test_read_frame_truncated() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Command::Shutdown).unwrap();
        buf.truncate(buf.len() - 1);

        assert!(matches!(read_frame(&mut buf.as_slice()), Err(SortError::Network(_))));
    }

    #[rstest]
    fn test_read_frame_invalid_utf8() {
        let buf = vec![0x00, 0x02, 0xff, 0xfe];

        assert!(matches!(read_frame(&mut buf.as_slice()), Err(SortError::Protocol(_))));
    }

    #[rstest]
    fn test_chunk_len_sentinel() {
        let mut buf = Vec::new();
        write_chunk_len(&mut buf, CHUNKS_EXHAUSTED).unwrap();

        assert_eq!(buf, (-1i32).to_be_bytes());
        assert_eq!(read_chunk_len(&mut buf.as_slice()).unwrap(), CHUNKS_EXHAUSTED);
    }

    #[rstest]
    #[case(io::ErrorKind::TimedOut, true)]
    #[case(io::ErrorKind::WouldBlock, true)]
    #[case(io::ErrorKind::ConnectionReset, false)]
    fn test_net_err_mapping(#[case] kind: io::ErrorKind, #[case] expect_timeout: bool) {
        let mapped = net_err(io::Error::new(kind, "test error"));

        match mapped {
            SortError::Timeout => assert!(expect_timeout),
            SortError::Network(_) => assert!(!expect_timeout),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
