//! Metadata cache interface consumed by the retry engine. The cache owns
//! the leader table and health bookkeeping of the cluster view; the engine
//! only reads and pokes it, treating every call as atomic.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::types::{
    ChunkServerId, CopysetId, CopysetPeer, LogicPoolId, SequenceNum,
};
use crate::unstable::UnstableHelper;
use crate::utils::ClientError;

/// Metadata cache of the client: leader table, unstable-state counters,
/// and per-file version bookkeeping.
#[async_trait]
pub trait MetaCache: Send + Sync {
    /// Looks up the leader of a copyset. With `refresh` set, the cache may
    /// actively query an authoritative metadata source, which can suspend
    /// on an RPC of its own.
    async fn get_leader(
        &self,
        lpid: LogicPoolId,
        cpid: CopysetId,
        refresh: bool,
    ) -> Result<CopysetPeer, ClientError>;

    /// Installs a leader hint learned from a redirect reply.
    fn update_leader(
        &self,
        lpid: LogicPoolId,
        cpid: CopysetId,
        leader_addr: SocketAddr,
    ) -> Result<(), ClientError>;

    /// Marks every chunkserver on the given server IP unstable so that
    /// subsequent leader lookups avoid the degraded server.
    fn set_server_unstable(&self, ip: &str) -> Result<(), ClientError>;

    /// Marks one chunkserver unstable.
    fn set_chunkserver_unstable(&self, cs_id: ChunkServerId);

    /// Whether the copyset's leader is suspected to be changing right now.
    fn is_leader_may_change(
        &self,
        lpid: LogicPoolId,
        cpid: CopysetId,
    ) -> bool;

    /// Latest sequence number of the file being written.
    fn get_latest_file_sn(&self) -> SequenceNum;

    /// The shared unstable-state tracker.
    fn unstable_helper(&self) -> &UnstableHelper;
}
