//! Client failure-retry configuration parameters. All values are set once
//! at client initialisation and treated as immutable afterwards.

use serde::Deserialize;

use crate::utils::ClientError;

/// Failure retry options governing per-request budgets, intervals, and
/// timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct FailureRequestOptions {
    /// Maximum number of retries of one chunk request.
    pub chunkserver_op_max_retry: u64,

    /// Base sleep interval between retries in microsecs.
    pub chunkserver_op_retry_interval_us: u64,

    /// Upper bound of the overload backoff sleep in microsecs.
    pub chunkserver_max_retry_sleep_interval_us: u64,

    /// Base (default) per-attempt RPC timeout in millisecs.
    pub chunkserver_rpc_timeout_ms: u64,

    /// Upper bound of the per-attempt RPC timeout in millisecs.
    pub chunkserver_max_rpc_timeout_ms: u64,

    /// Number of retries under which a timed-out attempt keeps the base
    /// RPC timeout while the copyset leader may be changing.
    pub chunkserver_min_retry_times_force_timeout_backoff: u64,

    /// Age threshold in millisecs past which an unfinished request is
    /// marked slow (once).
    pub chunkserver_slow_request_threshold_ms: u64,
}

impl Default for FailureRequestOptions {
    fn default() -> Self {
        FailureRequestOptions {
            chunkserver_op_max_retry: 50,
            chunkserver_op_retry_interval_us: 100_000,
            chunkserver_max_retry_sleep_interval_us: 8_000_000,
            chunkserver_rpc_timeout_ms: 1000,
            chunkserver_max_rpc_timeout_ms: 64_000,
            chunkserver_min_retry_times_force_timeout_backoff: 5,
            chunkserver_slow_request_threshold_ms: 45_000,
        }
    }
}

impl FailureRequestOptions {
    /// Parses options from an optional TOML string, starting from defaults.
    pub fn from_config_str(
        config_str: Option<&str>,
    ) -> Result<Self, ClientError> {
        parsed_config!(config_str => FailureRequestOptions;
                       chunkserver_op_max_retry,
                       chunkserver_op_retry_interval_us,
                       chunkserver_max_retry_sleep_interval_us,
                       chunkserver_rpc_timeout_ms,
                       chunkserver_max_rpc_timeout_ms,
                       chunkserver_min_retry_times_force_timeout_backoff,
                       chunkserver_slow_request_threshold_ms)
    }
}

/// Saturation exponents of the two backoff calculators; shift widths are
/// capped at these values to prevent overflow and unbounded growth.
#[derive(Debug, Clone, Deserialize)]
pub struct BackoffParam {
    /// Maximum exponent of the RPC timeout backoff.
    pub max_timeout_pow: u64,

    /// Maximum exponent of the overload sleep backoff.
    pub max_overload_pow: u64,
}

impl Default for BackoffParam {
    fn default() -> Self {
        BackoffParam {
            max_timeout_pow: 6,
            max_overload_pow: 6,
        }
    }
}

impl BackoffParam {
    /// Parses parameters from an optional TOML string, starting from
    /// defaults.
    pub fn from_config_str(
        config_str: Option<&str>,
    ) -> Result<Self, ClientError> {
        parsed_config!(config_str => BackoffParam;
                       max_timeout_pow, max_overload_pow)
    }
}

/// Thresholds of the chunkserver unstable-state tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkServerUnstableOption {
    /// Consecutive timeouts a chunkserver may accumulate before it is no
    /// longer considered stable.
    pub max_stable_chunkserver_timeout_times: u32,

    /// Number of unstable chunkservers on one server at which the whole
    /// server is considered unstable.
    pub server_unstable_threshold: u32,
}

impl Default for ChunkServerUnstableOption {
    fn default() -> Self {
        ChunkServerUnstableOption {
            max_stable_chunkserver_timeout_times: 64,
            server_unstable_threshold: 3,
        }
    }
}

impl ChunkServerUnstableOption {
    /// Parses options from an optional TOML string, starting from defaults.
    pub fn from_config_str(
        config_str: Option<&str>,
    ) -> Result<Self, ClientError> {
        parsed_config!(config_str => ChunkServerUnstableOption;
                       max_stable_chunkserver_timeout_times,
                       server_unstable_threshold)
    }
}

/// Aggregated immutable options threaded through the retry engine.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Failure retry options.
    pub fail_req: FailureRequestOptions,

    /// Backoff saturation exponents.
    pub backoff: BackoffParam,

    /// Unstable-state tracker thresholds.
    pub unstable: ChunkServerUnstableOption,

    /// Bound on concurrently in-flight chunk requests.
    pub max_inflight_rpc: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        RetryOptions {
            fail_req: FailureRequestOptions::default(),
            backoff: BackoffParam::default(),
            unstable: ChunkServerUnstableOption::default(),
            max_inflight_rpc: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fail_req_partial() -> Result<(), ClientError> {
        let config_str = Some(
            "chunkserver_op_max_retry = 3\n\
             chunkserver_rpc_timeout_ms = 500",
        );
        let config = FailureRequestOptions::from_config_str(config_str)?;
        assert_eq!(config.chunkserver_op_max_retry, 3);
        assert_eq!(config.chunkserver_rpc_timeout_ms, 500);
        // untouched fields keep their defaults
        assert_eq!(config.chunkserver_max_rpc_timeout_ms, 64_000);
        Ok(())
    }

    #[test]
    fn parse_backoff_invalid_field() {
        let config_str = Some("max_shift_pow = 9");
        assert!(BackoffParam::from_config_str(config_str).is_err());
    }

    #[test]
    fn parse_unstable_defaults() -> Result<(), ClientError> {
        let config = ChunkServerUnstableOption::from_config_str(None)?;
        assert_eq!(config.max_stable_chunkserver_timeout_times, 64);
        assert_eq!(config.server_unstable_threshold, 3);
        Ok(())
    }
}
