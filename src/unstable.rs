//! Chunkserver unstable-state tracking. Counts consecutive RPC timeouts
//! per chunkserver and escalates to a whole-server verdict when enough
//! chunkservers on one server have gone unstable.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::config::ChunkServerUnstableOption;
use crate::types::ChunkServerId;

/// Health classification of a chunkserver endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnstableState {
    /// The chunkserver answers within its timeout budget.
    Healthy,

    /// The chunkserver has accumulated too many consecutive timeouts.
    ChunkServerUnstable,

    /// Enough chunkservers on the same server are unstable that the whole
    /// server is considered degraded.
    ServerUnstable,
}

#[derive(Debug, Default)]
struct UnstableCounters {
    /// Consecutive timeout count per chunkserver.
    timeout_times: HashMap<ChunkServerId, u32>,

    /// Unstable chunkservers grouped by their server IP.
    server_unstabled: HashMap<String, HashSet<ChunkServerId>>,
}

/// Tracks consecutive RPC timeouts per chunkserver. Every call is atomic
/// from the caller's point of view; closures of many in-flight requests
/// share one helper through the metadata cache.
#[derive(Debug)]
pub struct UnstableHelper {
    opt: ChunkServerUnstableOption,
    counters: Mutex<UnstableCounters>,
}

impl UnstableHelper {
    /// Creates a helper with the given thresholds.
    pub fn new(opt: ChunkServerUnstableOption) -> Self {
        UnstableHelper {
            opt,
            counters: Mutex::new(UnstableCounters::default()),
        }
    }

    /// Bumps the consecutive timeout count of a chunkserver. Called when
    /// an attempt to it times out at the transport level.
    pub fn incre_timeout(&self, cs_id: ChunkServerId) {
        let mut counters = self.counters.lock().unwrap();
        *counters.timeout_times.entry(cs_id).or_insert(0) += 1;
    }

    /// Resets the timeout count of a chunkserver and forgets it from its
    /// server's unstable set. Called whenever an RPC reply comes back,
    /// regardless of the application status it carries.
    pub fn clear_timeout(&self, cs_id: ChunkServerId, addr: SocketAddr) {
        let mut counters = self.counters.lock().unwrap();
        counters.timeout_times.remove(&cs_id);
        if let Some(set) =
            counters.server_unstabled.get_mut(&addr.ip().to_string())
        {
            set.remove(&cs_id);
        }
    }

    /// Classifies the chunkserver's current health from its timeout count
    /// and its server's unstable set.
    pub fn get_current_unstable_state(
        &self,
        cs_id: ChunkServerId,
        addr: SocketAddr,
    ) -> UnstableState {
        let mut counters = self.counters.lock().unwrap();

        let exceeded = counters
            .timeout_times
            .get(&cs_id)
            .map(|times| *times > self.opt.max_stable_chunkserver_timeout_times)
            .unwrap_or(false);
        if !exceeded {
            return UnstableState::Healthy;
        }

        let unstabled = counters
            .server_unstabled
            .entry(addr.ip().to_string())
            .or_default();
        unstabled.insert(cs_id);

        if unstabled.len() >= self.opt.server_unstable_threshold as usize {
            UnstableState::ServerUnstable
        } else {
            UnstableState::ChunkServerUnstable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper() -> UnstableHelper {
        UnstableHelper::new(ChunkServerUnstableOption {
            max_stable_chunkserver_timeout_times: 2,
            server_unstable_threshold: 2,
        })
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn healthy_until_threshold() {
        let h = helper();
        let ep = addr("10.0.0.1:8200");
        for _ in 0..2 {
            h.incre_timeout(1);
        }
        assert_eq!(
            h.get_current_unstable_state(1, ep),
            UnstableState::Healthy
        );
        h.incre_timeout(1);
        assert_eq!(
            h.get_current_unstable_state(1, ep),
            UnstableState::ChunkServerUnstable
        );
    }

    #[test]
    fn clear_resets_counter() {
        let h = helper();
        let ep = addr("10.0.0.1:8200");
        for _ in 0..3 {
            h.incre_timeout(1);
        }
        assert_eq!(
            h.get_current_unstable_state(1, ep),
            UnstableState::ChunkServerUnstable
        );
        h.clear_timeout(1, ep);
        assert_eq!(
            h.get_current_unstable_state(1, ep),
            UnstableState::Healthy
        );
    }

    #[test]
    fn escalates_to_server_unstable() {
        let h = helper();
        // two chunkservers on the same server IP, different ports
        let ep1 = addr("10.0.0.1:8200");
        let ep2 = addr("10.0.0.1:8201");
        for _ in 0..3 {
            h.incre_timeout(1);
            h.incre_timeout(2);
        }
        assert_eq!(
            h.get_current_unstable_state(1, ep1),
            UnstableState::ChunkServerUnstable
        );
        assert_eq!(
            h.get_current_unstable_state(2, ep2),
            UnstableState::ServerUnstable
        );
        // a different server is unaffected
        for _ in 0..3 {
            h.incre_timeout(3);
        }
        assert_eq!(
            h.get_current_unstable_state(3, addr("10.0.0.2:8200")),
            UnstableState::ChunkServerUnstable
        );
    }
}
