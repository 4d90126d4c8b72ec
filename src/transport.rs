//! RPC transport interface to chunkservers, consumed by the retry engine.
//! The transport owns connections and enforces the per-attempt timeout it
//! is handed; the engine never sees wire-level details beyond the reply.

use async_trait::async_trait;

use bytes::Bytes;

use crate::types::{
    ChunkIdInfo, ChunkServerId, CopysetPeer, RequestSourceInfo, RpcError,
    SequenceNum,
};

/// Generic chunk operation reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkResponse {
    /// Application status code (`ChunkOpStatus` wire value).
    pub status: i32,

    /// Current leader hint attached when the replica is not the leader.
    pub redirect: Option<String>,

    /// Attached data bytes of read-type operations.
    pub data: Bytes,
}

/// Typed reply of GetChunkInfo. Note that its redirect hint lives on this
/// reply rather than on the generic one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetChunkInfoResponse {
    /// Application status code (`ChunkOpStatus` wire value).
    pub status: i32,

    /// Current leader hint attached when the replica is not the leader.
    pub redirect: Option<String>,

    /// Sequence numbers the chunk has on the chunkserver.
    pub chunk_sns: Vec<SequenceNum>,
}

/// Reply of one completed attempt, typed per operation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptReply {
    /// Reply of every operation except GetChunkInfo.
    Chunk(ChunkResponse),

    /// Reply of GetChunkInfo.
    ChunkInfo(GetChunkInfoResponse),
}

impl AttemptReply {
    /// Application status code of the reply.
    pub fn status(&self) -> i32 {
        match self {
            AttemptReply::Chunk(r) => r.status,
            AttemptReply::ChunkInfo(r) => r.status,
        }
    }

    /// Leader hint of the reply, read from wherever the operation's reply
    /// type carries it.
    pub fn redirect(&self) -> Option<&str> {
        match self {
            AttemptReply::Chunk(r) => r.redirect.as_deref(),
            AttemptReply::ChunkInfo(r) => r.redirect.as_deref(),
        }
    }
}

/// Transport performing the actual chunkserver RPCs. Each method issues
/// one attempt to `target` bounded by `timeout_ms` and resolves with the
/// application reply or a transport-level failure.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes a byte range of a chunk.
    #[allow(clippy::too_many_arguments)]
    async fn write_chunk(
        &self,
        target: CopysetPeer,
        idinfo: ChunkIdInfo,
        file_id: u64,
        epoch: u64,
        seq: SequenceNum,
        data: Bytes,
        offset: u64,
        len: u64,
        source_info: RequestSourceInfo,
        timeout_ms: u64,
    ) -> Result<ChunkResponse, RpcError>;

    /// Reads a byte range of a chunk.
    #[allow(clippy::too_many_arguments)]
    async fn read_chunk(
        &self,
        target: CopysetPeer,
        idinfo: ChunkIdInfo,
        seq: SequenceNum,
        offset: u64,
        len: u64,
        source_info: RequestSourceInfo,
        timeout_ms: u64,
    ) -> Result<ChunkResponse, RpcError>;

    /// Reads a byte range of a chunk snapshot.
    async fn read_chunk_snapshot(
        &self,
        target: CopysetPeer,
        idinfo: ChunkIdInfo,
        seq: SequenceNum,
        offset: u64,
        len: u64,
        timeout_ms: u64,
    ) -> Result<ChunkResponse, RpcError>;

    /// Deletes a chunk snapshot or corrects the chunk's corrected
    /// sequence number.
    async fn delete_chunk_snapshot_or_correct_sn(
        &self,
        target: CopysetPeer,
        idinfo: ChunkIdInfo,
        corrected_seq: SequenceNum,
        timeout_ms: u64,
    ) -> Result<ChunkResponse, RpcError>;

    /// Queries the sequence numbers a chunk has on the chunkserver.
    async fn get_chunk_info(
        &self,
        target: CopysetPeer,
        idinfo: ChunkIdInfo,
        timeout_ms: u64,
    ) -> Result<GetChunkInfoResponse, RpcError>;

    /// Creates a clone chunk backed by `location`.
    #[allow(clippy::too_many_arguments)]
    async fn create_clone_chunk(
        &self,
        target: CopysetPeer,
        idinfo: ChunkIdInfo,
        location: &str,
        seq: SequenceNum,
        corrected_seq: SequenceNum,
        chunk_size: u64,
        timeout_ms: u64,
    ) -> Result<ChunkResponse, RpcError>;

    /// Triggers recovery of a byte range of a clone chunk.
    async fn recover_chunk(
        &self,
        target: CopysetPeer,
        idinfo: ChunkIdInfo,
        offset: u64,
        len: u64,
        timeout_ms: u64,
    ) -> Result<ChunkResponse, RpcError>;

    /// Tears down the cached sender to a chunkserver if its connection is
    /// no longer healthy. Called on every transport-level failure.
    fn reset_sender_if_not_health(&self, cs_id: ChunkServerId);
}
