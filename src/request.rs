//! Per-request operation context and retry bookkeeping.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::types::{
    ChunkIdInfo, OpType, RequestId, RequestSourceInfo, SequenceNum,
};

/// Description of one chunk operation as produced by the IO slicer. One
/// context carries the union of per-operation fields; which of them are
/// meaningful is determined by `optype`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Operation kind.
    pub optype: OpType,

    /// Identity of the target chunk.
    pub idinfo: ChunkIdInfo,

    /// Stable request ID for logging and tracing.
    pub request_id: RequestId,

    /// ID of the file the chunk belongs to (write).
    pub file_id: u64,

    /// File epoch of the issuing client (write).
    pub epoch: u64,

    /// Chunk version sequence number (write, reads, clone creation).
    pub seq: SequenceNum,

    /// Corrected sequence number (snapshot delete, clone creation).
    pub corrected_seq: SequenceNum,

    /// Byte offset within the chunk.
    pub offset: u64,

    /// Byte length of the operation.
    pub len: u64,

    /// Payload of a write.
    pub write_data: Bytes,

    /// Sink the read reply's bytes are installed into.
    pub read_data: BytesMut,

    /// Accumulator of GetChunkInfo sequence numbers.
    pub chunk_sns: Vec<SequenceNum>,

    /// External source location of a clone chunk.
    pub location: String,

    /// Size of the chunk being cloned.
    pub chunk_size: u64,

    /// Clone-source information of the request.
    pub source_info: RequestSourceInfo,
}

impl RequestContext {
    fn base(
        optype: OpType,
        idinfo: ChunkIdInfo,
        request_id: RequestId,
    ) -> Self {
        RequestContext {
            optype,
            idinfo,
            request_id,
            file_id: 0,
            epoch: 0,
            seq: 0,
            corrected_seq: 0,
            offset: 0,
            len: 0,
            write_data: Bytes::new(),
            read_data: BytesMut::new(),
            chunk_sns: Vec::new(),
            location: String::new(),
            chunk_size: 0,
            source_info: RequestSourceInfo::default(),
        }
    }

    /// Context of a chunk write.
    #[allow(clippy::too_many_arguments)]
    pub fn new_write(
        idinfo: ChunkIdInfo,
        request_id: RequestId,
        file_id: u64,
        epoch: u64,
        seq: SequenceNum,
        data: Bytes,
        offset: u64,
        len: u64,
        source_info: RequestSourceInfo,
    ) -> Self {
        RequestContext {
            file_id,
            epoch,
            seq,
            offset,
            len,
            write_data: data,
            source_info,
            ..Self::base(OpType::WriteChunk, idinfo, request_id)
        }
    }

    /// Context of a chunk read.
    pub fn new_read(
        idinfo: ChunkIdInfo,
        request_id: RequestId,
        seq: SequenceNum,
        offset: u64,
        len: u64,
        source_info: RequestSourceInfo,
    ) -> Self {
        RequestContext {
            seq,
            offset,
            len,
            source_info,
            ..Self::base(OpType::ReadChunk, idinfo, request_id)
        }
    }

    /// Context of a chunk snapshot read.
    pub fn new_read_snap(
        idinfo: ChunkIdInfo,
        request_id: RequestId,
        seq: SequenceNum,
        offset: u64,
        len: u64,
    ) -> Self {
        RequestContext {
            seq,
            offset,
            len,
            ..Self::base(OpType::ReadChunkSnap, idinfo, request_id)
        }
    }

    /// Context of a chunk snapshot delete / corrected-sn fixup.
    pub fn new_delete_snap(
        idinfo: ChunkIdInfo,
        request_id: RequestId,
        corrected_seq: SequenceNum,
    ) -> Self {
        RequestContext {
            corrected_seq,
            ..Self::base(OpType::DeleteChunkSnap, idinfo, request_id)
        }
    }

    /// Context of a chunk info query.
    pub fn new_get_chunk_info(
        idinfo: ChunkIdInfo,
        request_id: RequestId,
    ) -> Self {
        Self::base(OpType::GetChunkInfo, idinfo, request_id)
    }

    /// Context of a clone chunk creation.
    pub fn new_create_clone(
        idinfo: ChunkIdInfo,
        request_id: RequestId,
        location: String,
        seq: SequenceNum,
        corrected_seq: SequenceNum,
        chunk_size: u64,
    ) -> Self {
        RequestContext {
            location,
            seq,
            corrected_seq,
            chunk_size,
            ..Self::base(OpType::CreateCloneChunk, idinfo, request_id)
        }
    }

    /// Context of a clone chunk recovery.
    pub fn new_recover(
        idinfo: ChunkIdInfo,
        request_id: RequestId,
        offset: u64,
        len: u64,
    ) -> Self {
        RequestContext {
            offset,
            len,
            ..Self::base(OpType::RecoverChunk, idinfo, request_id)
        }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "optype = {}, logicpool id = {}, copyset id = {}, \
             chunk id = {}, offset = {}, len = {}, seq = {}, \
             corrected seq = {}",
            self.optype,
            self.idinfo.lpid,
            self.idinfo.cpid,
            self.idinfo.chunk_id,
            self.offset,
            self.len,
            self.seq,
            self.corrected_seq,
        )
    }
}

/// Mutable retry bookkeeping of one request, owned by the engine while
/// the request is in flight.
#[derive(Debug)]
pub struct RequestState {
    /// Error code of the request; 0 means success.
    errcode: i32,

    /// Number of retries consumed so far.
    retried_times: u64,

    /// Per-attempt RPC timeout of the next dispatch in millisecs.
    next_timeout_ms: u64,

    /// Creation timestamp in monotonic millisecs.
    created_ms: u64,

    /// Slow-request latch; once set it stays set.
    slow_request: bool,
}

impl RequestState {
    /// Fresh state at first dispatch: no retries consumed yet and the
    /// base RPC timeout in effect.
    pub fn new(created_ms: u64, base_timeout_ms: u64) -> Self {
        RequestState {
            errcode: -1,
            retried_times: 0,
            next_timeout_ms: base_timeout_ms,
            created_ms,
            slow_request: false,
        }
    }

    /// Error code of the request; 0 means success.
    pub fn errcode(&self) -> i32 {
        self.errcode
    }

    /// Sets the error code; 0 means success.
    pub fn set_failed(&mut self, errcode: i32) {
        self.errcode = errcode;
    }

    /// Number of retries consumed so far.
    pub fn retried_times(&self) -> u64 {
        self.retried_times
    }

    /// Consumes one retry slot; never decremented.
    pub fn increm_retried_times(&mut self) {
        self.retried_times += 1;
    }

    /// Per-attempt RPC timeout of the next dispatch in millisecs.
    pub fn next_timeout_ms(&self) -> u64 {
        self.next_timeout_ms
    }

    /// Installs the per-attempt RPC timeout of the next dispatch.
    pub fn set_next_timeout_ms(&mut self, timeout_ms: u64) {
        self.next_timeout_ms = timeout_ms;
    }

    /// Creation timestamp in monotonic millisecs.
    pub fn created_ms(&self) -> u64 {
        self.created_ms
    }

    /// Whether the request has been marked slow.
    pub fn is_slow_request(&self) -> bool {
        self.slow_request
    }

    /// Latches the slow-request flag.
    pub fn mark_as_slow_request(&mut self) {
        self.slow_request = true;
    }
}

/// Terminal result of one request handed back to the caller.
#[derive(Debug)]
pub struct RequestResult {
    /// Error code; 0 means success.
    pub errcode: i32,

    /// Number of retries the request consumed.
    pub retried_times: u64,

    /// The request context, with read sinks and accumulators filled in.
    pub ctx: RequestContext,
}

impl RequestResult {
    /// Whether the request completed successfully.
    pub fn is_ok(&self) -> bool {
        self.errcode == 0
    }
}
