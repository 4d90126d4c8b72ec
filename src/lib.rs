//! Chunk request retry engine of the copyset client. Classifies RPC
//! completions, maintains leader and chunkserver-health metadata, and
//! re-dispatches requests under per-request budgets with exponential
//! backoff.

#![allow(clippy::uninlined_format_args)]

#[macro_use]
mod utils;

mod backoff;
mod config;
mod inflight;
mod metacache;
mod metrics;
mod request;
mod retry;
mod timer;
mod transport;
mod types;
mod unstable;

pub use backoff::{overload_backoff, timeout_backoff};
pub use config::{
    BackoffParam, ChunkServerUnstableOption, FailureRequestOptions,
    RetryOptions,
};
pub use inflight::{InflightThrottle, InflightToken};
pub use metacache::MetaCache;
pub use metrics::{NoopMetrics, RpcMetrics};
pub use request::{RequestContext, RequestResult, RequestState};
pub use retry::{classify_attempt, AttemptOutcome, RetryExecutor, Verdict};
pub use timer::{IoTimer, TokioTimer};
pub use transport::{
    AttemptReply, ChunkResponse, GetChunkInfoResponse, Transport,
};
pub use types::{
    ChunkId, ChunkIdInfo, ChunkOpStatus, ChunkServerId, CopysetId,
    CopysetPeer, LogicPoolId, OpType, PeerAddr, RequestId,
    RequestSourceInfo, RpcError, SequenceNum,
};
pub use unstable::{UnstableHelper, UnstableState};
pub use utils::ClientError;
