//! Common identifier, address, and status code types shared across the
//! client.

use std::fmt;
use std::net::SocketAddr;

use crate::utils::ClientError;

/// Logical pool ID type.
pub type LogicPoolId = u32;

/// Copyset ID type within a logical pool.
pub type CopysetId = u32;

/// Chunk ID type.
pub type ChunkId = u64;

/// Chunkserver node ID type.
pub type ChunkServerId = u32;

/// Chunk version sequence number type.
pub type SequenceNum = u64;

/// Stable per-request ID used for logging and tracing.
pub type RequestId = u64;

/// Identity of one chunk: which copyset serves it and its ID therein.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkIdInfo {
    /// Logical pool ID.
    pub lpid: LogicPoolId,

    /// Copyset ID.
    pub cpid: CopysetId,

    /// Chunk ID.
    pub chunk_id: ChunkId,
}

impl ChunkIdInfo {
    /// Creates a new chunk identity triple.
    pub fn new(lpid: LogicPoolId, cpid: CopysetId, chunk_id: ChunkId) -> Self {
        ChunkIdInfo {
            lpid,
            cpid,
            chunk_id,
        }
    }
}

/// Chunk operation kinds issued by the IO slicer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// Write a byte range of a chunk.
    WriteChunk,

    /// Read a byte range of a chunk.
    ReadChunk,

    /// Read a byte range of a chunk snapshot.
    ReadChunkSnap,

    /// Delete a chunk snapshot, or correct the chunk's corrected sequence
    /// number if no snapshot exists.
    DeleteChunkSnap,

    /// Query the set of sequence numbers a chunk has on its chunkserver.
    GetChunkInfo,

    /// Create a clone chunk backed by an external source location.
    CreateCloneChunk,

    /// Trigger recovery of a byte range of a clone chunk.
    RecoverChunk,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            OpType::WriteChunk => "WriteChunk",
            OpType::ReadChunk => "ReadChunk",
            OpType::ReadChunkSnap => "ReadChunkSnap",
            OpType::DeleteChunkSnap => "DeleteChunkSnap",
            OpType::GetChunkInfo => "GetChunkInfo",
            OpType::CreateCloneChunk => "CreateCloneChunk",
            OpType::RecoverChunk => "RecoverChunk",
        };
        write!(f, "{}", name)
    }
}

/// Application-level status codes replied by a chunkserver. Values are the
/// wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ChunkOpStatus {
    /// Operation applied.
    Success = 0,

    /// The contacted replica is not the leader; a hint may be attached.
    Redirected = 1,

    /// The copyset is not served by the contacted chunkserver.
    CopysetNotExist = 2,

    /// The chunk does not exist on the chunkserver.
    ChunkNotExist = 3,

    /// The chunk already exists (clone creation conflicts).
    ChunkExist = 4,

    /// Server-side failure of unknown cause.
    FailureUnknown = 5,

    /// Malformed or out-of-range request parameters.
    InvalidRequest = 6,

    /// The write's sequence number is older than the server's view.
    Backward = 7,

    /// The chunkserver is overloaded and sheds the request.
    Overload = 8,

    /// The client's epoch for the file has been superseded.
    EpochTooOld = 9,
}

impl ChunkOpStatus {
    /// Maps a raw wire status code to a known status, `None` if unknown.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(ChunkOpStatus::Success),
            1 => Some(ChunkOpStatus::Redirected),
            2 => Some(ChunkOpStatus::CopysetNotExist),
            3 => Some(ChunkOpStatus::ChunkNotExist),
            4 => Some(ChunkOpStatus::ChunkExist),
            5 => Some(ChunkOpStatus::FailureUnknown),
            6 => Some(ChunkOpStatus::InvalidRequest),
            7 => Some(ChunkOpStatus::Backward),
            8 => Some(ChunkOpStatus::Overload),
            9 => Some(ChunkOpStatus::EpochTooOld),
            _ => None,
        }
    }

    /// Raw wire value of this status.
    pub fn raw(&self) -> i32 {
        *self as i32
    }
}

impl fmt::Display for ChunkOpStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Transport-level failure of one RPC attempt. Codes follow errno
/// numbering and are disjoint from `ChunkOpStatus` wire values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The attempt did not complete within its per-attempt timeout.
    Timeout,

    /// The remote side refused the connection.
    ConnectionRefused,

    /// Any other transport failure, with its code and description.
    Other {
        /// Errno-style failure code.
        code: i32,

        /// Human-readable description.
        msg: String,
    },
}

impl RpcError {
    /// Integer code stored on the request's error code field.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Timeout => 110,           // ETIMEDOUT
            RpcError::ConnectionRefused => 111, // ECONNREFUSED
            RpcError::Other { code, .. } => *code,
        }
    }

    /// Whether this failure is a per-attempt RPC timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RpcError::Timeout => write!(f, "rpc timed out"),
            RpcError::ConnectionRefused => write!(f, "connection refused"),
            RpcError::Other { code, msg } => {
                write!(f, "{} (code {})", msg, code)
            }
        }
    }
}

/// Source-clone information attached to write/read requests on clone files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSourceInfo {
    /// Path of the clone source file.
    pub clone_file_source: String,

    /// Offset of this chunk within the clone source file.
    pub clone_file_offset: u64,

    /// Whether the source information is meaningful for this request.
    pub valid: bool,
}

/// A resolved copyset replica to dispatch an attempt to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopysetPeer {
    /// Chunkserver node ID of the replica.
    pub cs_id: ChunkServerId,

    /// Endpoint address of the replica.
    pub addr: SocketAddr,
}

impl CopysetPeer {
    /// Creates a peer from an ID and address.
    pub fn new(cs_id: ChunkServerId, addr: SocketAddr) -> Self {
        CopysetPeer { cs_id, addr }
    }
}

impl fmt::Display for CopysetPeer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.cs_id, self.addr)
    }
}

/// Peer address as carried by redirect hints, in `ip:port:index` form
/// (the replica index suffix is optional and ignored).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr {
    /// Endpoint address parsed out of the hint.
    pub addr: SocketAddr,
}

impl PeerAddr {
    /// Parses a redirect hint string. Accepts `1.2.3.4:8200:0` as well as
    /// plain `1.2.3.4:8200`.
    pub fn parse(hint: &str) -> Result<Self, ClientError> {
        let parts: Vec<&str> = hint.trim().split(':').collect();
        let addr = match parts.len() {
            2 => hint.trim().parse::<SocketAddr>()?,
            3 => {
                format!("{}:{}", parts[0], parts[1]).parse::<SocketAddr>()?
            }
            _ => {
                return logged_err!(
                    "parse leader address from '{}' failed",
                    hint
                );
            }
        };
        Ok(PeerAddr { addr })
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_addr_with_index() -> Result<(), ClientError> {
        let pa = PeerAddr::parse("1.2.3.4:8200:0")?;
        assert_eq!(pa.addr, "1.2.3.4:8200".parse().unwrap());
        Ok(())
    }

    #[test]
    fn peer_addr_plain() -> Result<(), ClientError> {
        let pa = PeerAddr::parse("10.0.0.7:8444")?;
        assert_eq!(pa.addr, "10.0.0.7:8444".parse().unwrap());
        Ok(())
    }

    #[test]
    fn peer_addr_invalid() {
        assert!(PeerAddr::parse("").is_err());
        assert!(PeerAddr::parse("1.2.3.4").is_err());
        assert!(PeerAddr::parse("1.2.3.4:what:0").is_err());
    }

    #[test]
    fn op_status_raw_roundtrip() {
        for raw in 0..=9 {
            let status = ChunkOpStatus::from_raw(raw).unwrap();
            assert_eq!(status.raw(), raw);
        }
        assert_eq!(ChunkOpStatus::from_raw(42), None);
    }

    #[test]
    fn rpc_error_codes_disjoint_from_statuses() {
        assert!(RpcError::Timeout.code() > 9);
        assert!(RpcError::ConnectionRefused.code() > 9);
        assert!(RpcError::Timeout.is_timeout());
        assert!(!RpcError::ConnectionRefused.is_timeout());
    }
}
