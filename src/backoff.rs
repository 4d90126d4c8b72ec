//! Retry backoff calculators: next RPC timeout after a timed-out attempt
//! and next sleep interval after an overload reply. Both are pure in the
//! configuration and the current retry count (modulo jitter).

use rand::Rng;

use crate::config::{BackoffParam, FailureRequestOptions};

/// Next per-attempt RPC timeout in millisecs after `retried_times` retries,
/// exponential in the retry count with the shift width saturated at
/// `max_timeout_pow`, clamped to the configured [base, max] range.
pub fn timeout_backoff(
    fail_req: &FailureRequestOptions,
    param: &BackoffParam,
    retried_times: u64,
) -> u64 {
    let pow = retried_times.min(param.max_timeout_pow);
    let next_timeout = fail_req
        .chunkserver_rpc_timeout_ms
        .saturating_mul(1u64 << pow);

    next_timeout.clamp(
        fail_req.chunkserver_rpc_timeout_ms,
        fail_req.chunkserver_max_rpc_timeout_ms,
    )
}

/// Sleep interval in microsecs before retrying after an overload reply,
/// exponential in the retry count with the shift width saturated at
/// `max_overload_pow`, jittered by -10% ~ +10%, clamped to the configured
/// [base, max] range.
pub fn overload_backoff(
    fail_req: &FailureRequestOptions,
    param: &BackoffParam,
    retried_times: u64,
) -> u64 {
    let pow = retried_times.min(param.max_overload_pow);
    let mut next_sleep = fail_req
        .chunkserver_op_retry_interval_us
        .saturating_mul(1u64 << pow);

    // -10% ~ +10% jitter
    let random_time = rand::thread_rng().gen_range(0..=next_sleep / 5);
    next_sleep = next_sleep + random_time - next_sleep / 10;

    next_sleep.clamp(
        fail_req.chunkserver_op_retry_interval_us,
        fail_req.chunkserver_max_retry_sleep_interval_us,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_options() -> (FailureRequestOptions, BackoffParam) {
        let fail_req = FailureRequestOptions {
            chunkserver_op_retry_interval_us: 100,
            chunkserver_max_retry_sleep_interval_us: 1_000_000,
            chunkserver_rpc_timeout_ms: 1000,
            chunkserver_max_rpc_timeout_ms: 64_000,
            ..FailureRequestOptions::default()
        };
        let param = BackoffParam {
            max_timeout_pow: 6,
            max_overload_pow: 5,
        };
        (fail_req, param)
    }

    #[test]
    fn timeout_backoff_bounds_and_monotonic() {
        let (fail_req, param) = test_options();
        let mut last = 0;
        for n in 0..20 {
            let t = timeout_backoff(&fail_req, &param, n);
            assert!(t >= fail_req.chunkserver_rpc_timeout_ms);
            assert!(t <= fail_req.chunkserver_max_rpc_timeout_ms);
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn timeout_backoff_saturates_shift() {
        let (fail_req, param) = test_options();
        assert_eq!(timeout_backoff(&fail_req, &param, 0), 1000);
        assert_eq!(timeout_backoff(&fail_req, &param, 3), 8000);
        // shift width capped at max_timeout_pow from here on
        assert_eq!(timeout_backoff(&fail_req, &param, 6), 64_000);
        assert_eq!(timeout_backoff(&fail_req, &param, 60), 64_000);
    }

    #[test]
    fn overload_backoff_bounds_and_jitter() {
        let (fail_req, param) = test_options();
        for n in 0..8 {
            let expected =
                100u64 * (1 << n.min(param.max_overload_pow)) as u64;
            for _ in 0..100 {
                let s = overload_backoff(&fail_req, &param, n);
                assert!(
                    s >= fail_req.chunkserver_op_retry_interval_us
                        && s <= fail_req
                            .chunkserver_max_retry_sleep_interval_us
                );
                // jitter stays within +-10% of the pre-jitter value
                // (unless the clamp takes over)
                if expected >= fail_req.chunkserver_op_retry_interval_us {
                    assert!(s >= expected - expected / 10);
                    assert!(s <= expected + expected / 10);
                }
            }
        }
    }
}
