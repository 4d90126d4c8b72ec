//! The chunk request retry engine. Classifies each completed RPC attempt,
//! updates leader and health metadata accordingly, and decides whether and
//! how to re-dispatch: retry budget, slow-request marking, next-attempt
//! timeout, and backoff sleep.

use std::sync::Arc;

use crate::backoff::{overload_backoff, timeout_backoff};
use crate::config::RetryOptions;
use crate::inflight::InflightThrottle;
use crate::metacache::MetaCache;
use crate::metrics::RpcMetrics;
use crate::request::{RequestContext, RequestResult, RequestState};
use crate::timer::IoTimer;
use crate::transport::{AttemptReply, Transport};
use crate::types::{
    ChunkOpStatus, CopysetPeer, OpType, PeerAddr, RpcError,
};
use crate::unstable::UnstableState;
use crate::utils::ClientError;

/// Outcome of one completed RPC attempt as seen by the retry controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The attempt succeeded.
    Success,

    /// The attempt failed at the transport level.
    RpcFailed(RpcError),

    /// A non-leader replica answered, possibly hinting at the leader.
    Redirected(Option<String>),

    /// The contacted chunkserver does not serve the copyset.
    CopysetNotExist,

    /// The chunk does not exist on the chunkserver.
    ChunkNotExist,

    /// The request parameters are malformed.
    InvalidRequest,

    /// The write's sequence number is older than the server's view.
    Backward,

    /// The chunk already exists.
    ChunkExist,

    /// The client's epoch for the file has been superseded.
    EpochTooOld,

    /// The chunkserver sheds load.
    Overload,

    /// A status code this engine does not know.
    Unknown(i32),
}

/// Maps (transport status, application status) of a completed attempt to
/// its outcome variant.
pub fn classify_attempt(
    result: &Result<AttemptReply, RpcError>,
) -> AttemptOutcome {
    let reply = match result {
        Err(e) => return AttemptOutcome::RpcFailed(e.clone()),
        Ok(reply) => reply,
    };

    match ChunkOpStatus::from_raw(reply.status()) {
        Some(ChunkOpStatus::Success) => AttemptOutcome::Success,
        Some(ChunkOpStatus::Redirected) => {
            AttemptOutcome::Redirected(reply.redirect().map(str::to_owned))
        }
        Some(ChunkOpStatus::CopysetNotExist) => AttemptOutcome::CopysetNotExist,
        Some(ChunkOpStatus::ChunkNotExist) => AttemptOutcome::ChunkNotExist,
        Some(ChunkOpStatus::InvalidRequest) => AttemptOutcome::InvalidRequest,
        Some(ChunkOpStatus::Backward) => AttemptOutcome::Backward,
        Some(ChunkOpStatus::ChunkExist) => AttemptOutcome::ChunkExist,
        Some(ChunkOpStatus::EpochTooOld) => AttemptOutcome::EpochTooOld,
        Some(ChunkOpStatus::Overload) => AttemptOutcome::Overload,
        Some(ChunkOpStatus::FailureUnknown) | None => {
            AttemptOutcome::Unknown(reply.status())
        }
    }
}

/// Decision of the controller after one completed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The request reached a terminal outcome.
    Done,

    /// Another attempt must be dispatched.
    Retry,
}

/// The retry controller. One executor serves all requests of a client;
/// per-request state is owned by the issuing call and never shared.
pub struct RetryExecutor {
    /// RPC transport to chunkservers.
    transport: Arc<dyn Transport>,

    /// Metadata cache with the leader table and health bookkeeping.
    metacache: Arc<dyn MetaCache>,

    /// Metric sink.
    metrics: Arc<dyn RpcMetrics>,

    /// Clock and cooperative sleep.
    timer: Arc<dyn IoTimer>,

    /// Bounded in-flight request counter.
    inflight: Arc<InflightThrottle>,

    /// Immutable engine options.
    opts: RetryOptions,
}

impl RetryExecutor {
    /// Creates an executor around its collaborators.
    pub fn new(
        opts: RetryOptions,
        transport: Arc<dyn Transport>,
        metacache: Arc<dyn MetaCache>,
        metrics: Arc<dyn RpcMetrics>,
        timer: Arc<dyn IoTimer>,
    ) -> Self {
        let inflight = Arc::new(InflightThrottle::new(opts.max_inflight_rpc));
        RetryExecutor {
            transport,
            metacache,
            metrics,
            timer,
            inflight,
            opts,
        }
    }

    /// Number of requests currently in flight.
    pub fn inflight_requests(&self) -> u64 {
        self.inflight.inflight()
    }

    /// Issues one chunk request and drives it to terminal completion,
    /// retrying by the engine's policy. The returned result carries the
    /// final error code and the context with its sinks filled in.
    pub async fn issue_request(
        &self,
        mut ctx: RequestContext,
    ) -> RequestResult {
        if self.inflight.is_overload() {
            pf_warn!(
                "inflight requests at bound {}, request id = {} \
                 waits for a slot",
                self.opts.max_inflight_rpc,
                ctx.request_id
            );
        }
        let _token = self.inflight.clone().acquire().await;

        let mut state = RequestState::new(
            self.timer.now_ms(),
            self.opts.fail_req.chunkserver_rpc_timeout_ms,
        );
        let mut last_failure_log_ms = None;

        loop {
            let target = match self
                .metacache
                .get_leader(ctx.idinfo.lpid, ctx.idinfo.cpid, false)
                .await
            {
                Ok(target) => target,
                Err(e) => {
                    pf_warn!(
                        "get leader of copyset ({}, {}) failed: {}, \
                         request id = {}",
                        ctx.idinfo.lpid,
                        ctx.idinfo.cpid,
                        e,
                        ctx.request_id
                    );
                    let last_status = state.errcode();
                    if !self.consume_retry_slot(&ctx, &mut state, last_status)
                    {
                        break;
                    }
                    self.timer
                        .sleep_us(
                            self.opts.fail_req.chunkserver_op_retry_interval_us,
                        )
                        .await;
                    continue;
                }
            };

            let send_ms = self.timer.now_ms();
            let result = self
                .send_request(&ctx, target, state.next_timeout_ms())
                .await;
            let latency_us =
                self.timer.now_ms().saturating_sub(send_ms) * 1000;

            match self
                .process_response(
                    &mut ctx,
                    &mut state,
                    target,
                    result,
                    latency_us,
                    &mut last_failure_log_ms,
                )
                .await
            {
                Verdict::Done => break,
                Verdict::Retry => {}
            }
        }

        RequestResult {
            errcode: state.errcode(),
            retried_times: state.retried_times(),
            ctx,
        }
    }

    /// Runs the completion pipeline for one attempt: health bookkeeping,
    /// outcome dispatch, and the retry gate including the backoff sleep.
    pub async fn process_response(
        &self,
        ctx: &mut RequestContext,
        state: &mut RequestState,
        target: CopysetPeer,
        result: Result<AttemptReply, RpcError>,
        latency_us: u64,
        last_failure_log_ms: &mut Option<u64>,
    ) -> Verdict {
        let outcome = classify_attempt(&result);

        let mut retry_directly = false;
        let status = match &result {
            Err(e) => {
                retry_directly = self
                    .on_rpc_failed(ctx, state, target, e, last_failure_log_ms)
                    .await;
                e.code()
            }
            Ok(reply) => {
                // any reply that made it back resets the timeout counter
                self.metacache
                    .unstable_helper()
                    .clear_timeout(target.cs_id, target.addr);
                reply.status()
            }
        };

        match &outcome {
            AttemptOutcome::Success => {
                if let Ok(reply) = result {
                    self.on_success(ctx, state, reply, latency_us);
                }
                return Verdict::Done;
            }

            // health bookkeeping above is all there is to do here
            AttemptOutcome::RpcFailed(_) => {}

            AttemptOutcome::Redirected(hint) => {
                self.metrics.increm_redirect_rpc_count(ctx.optype);
                retry_directly = self
                    .on_redirected(ctx, state, target, hint.as_deref())
                    .await;
            }

            AttemptOutcome::CopysetNotExist => {
                pf_warn!(
                    "{} copyset not exists, {}, status = {}, \
                     retried times = {}, request id = {}",
                    ctx.optype,
                    ctx,
                    status,
                    state.retried_times(),
                    ctx.request_id
                );
                retry_directly = self.refresh_leader(ctx, target).await;
            }

            AttemptOutcome::ChunkNotExist => {
                self.on_chunk_not_exist(ctx, state, status, latency_us);
                return Verdict::Done;
            }

            AttemptOutcome::InvalidRequest => {
                state.set_failed(status);
                pf_error!(
                    "{} failed for invalid format, {}, status = {}, \
                     retried times = {}, request id = {}",
                    ctx.optype,
                    ctx,
                    status,
                    state.retried_times(),
                    ctx.request_id
                );
                self.metrics.increm_fail_rpc_count(ctx.optype);
                return Verdict::Done;
            }

            AttemptOutcome::Backward => {
                if ctx.optype == OpType::WriteChunk {
                    let latest_sn = self.metacache.get_latest_file_sn();
                    pf_warn!(
                        "{} return backward, {}, status = {}, \
                         rewriting seq to {}, request id = {}",
                        ctx.optype,
                        ctx,
                        status,
                        latest_sn,
                        ctx.request_id
                    );
                    ctx.seq = latest_sn;
                } else {
                    state.set_failed(status);
                    pf_error!(
                        "{} return backward, {}, status = {}, \
                         retried times = {}, request id = {}",
                        ctx.optype,
                        ctx,
                        status,
                        state.retried_times(),
                        ctx.request_id
                    );
                    return Verdict::Done;
                }
            }

            AttemptOutcome::ChunkExist => {
                state.set_failed(status);
                pf_warn!(
                    "{} chunk exists, {}, status = {}, request id = {}",
                    ctx.optype,
                    ctx,
                    status,
                    ctx.request_id
                );
                return Verdict::Done;
            }

            AttemptOutcome::EpochTooOld => {
                state.set_failed(status);
                pf_warn!(
                    "{} epoch too old, {}, status = {}, request id = {}",
                    ctx.optype,
                    ctx,
                    status,
                    ctx.request_id
                );
                return Verdict::Done;
            }

            AttemptOutcome::Overload => {}

            AttemptOutcome::Unknown(raw) => {
                pf_warn!(
                    "{} failed for unknown reason, {}, status = {}, \
                     retried times = {}, request id = {}",
                    ctx.optype,
                    ctx,
                    raw,
                    state.retried_times(),
                    ctx.request_id
                );
            }
        }

        // retry gate
        self.metrics.increm_fail_rpc_count(ctx.optype);
        if !self.consume_retry_slot(ctx, state, status) {
            return Verdict::Done;
        }

        self.pre_process_before_retry(ctx, state, &outcome, retry_directly)
            .await;
        Verdict::Retry
    }

    /// Consumes one retry slot and runs the slow-request check. Returns
    /// false if the retry budget is exhausted, in which case `status` is
    /// latched as the terminal error code.
    fn consume_retry_slot(
        &self,
        ctx: &RequestContext,
        state: &mut RequestState,
        status: i32,
    ) -> bool {
        state.increm_retried_times();
        if state.retried_times() >= self.opts.fail_req.chunkserver_op_max_retry
        {
            state.set_failed(status);
            pf_error!(
                "{} retried times exceeds, {}, request id = {}",
                ctx.optype,
                ctx,
                ctx.request_id
            );
            return false;
        }

        // fires at most once per request
        let now_ms = self.timer.now_ms();
        if !state.is_slow_request()
            && now_ms.saturating_sub(state.created_ms())
                > self.opts.fail_req.chunkserver_slow_request_threshold_ms
        {
            state.mark_as_slow_request();
            self.metrics.increm_slow_request_num();
            pf_error!(
                "slow request, {}, request id = {}, created at {} ms",
                ctx,
                ctx.request_id,
                state.created_ms()
            );
        }

        true
    }

    /// Picks the next-attempt timeout and runs the backoff sleep before a
    /// retry is dispatched.
    async fn pre_process_before_retry(
        &self,
        ctx: &RequestContext,
        state: &mut RequestState,
        outcome: &AttemptOutcome,
        retry_directly: bool,
    ) {
        let fail_req = &self.opts.fail_req;

        if let AttemptOutcome::RpcFailed(e) = outcome {
            if e.is_timeout() {
                let retried_times = state.retried_times();
                let leader_may_change = self
                    .metacache
                    .is_leader_may_change(ctx.idinfo.lpid, ctx.idinfo.cpid);

                // while the leader may still be moving, keep the base
                // timeout so the retry lands on the new leader quickly
                let next_timeout = if retried_times
                    < fail_req.chunkserver_min_retry_times_force_timeout_backoff
                    && leader_may_change
                {
                    fail_req.chunkserver_rpc_timeout_ms
                } else {
                    timeout_backoff(
                        fail_req,
                        &self.opts.backoff,
                        retried_times,
                    )
                };

                state.set_next_timeout_ms(next_timeout);
                pf_warn!(
                    "rpc timeout, next timeout = {} ms, {}, \
                     retried times = {}, request id = {}",
                    next_timeout,
                    ctx,
                    retried_times,
                    ctx.request_id
                );
                return;
            }
        }

        if matches!(outcome, AttemptOutcome::Overload) {
            let next_sleep_us = overload_backoff(
                fail_req,
                &self.opts.backoff,
                state.retried_times(),
            );
            pf_warn!(
                "chunkserver overload, sleep {} us, {}, \
                 retried times = {}, request id = {}",
                next_sleep_us,
                ctx,
                state.retried_times(),
                ctx.request_id
            );
            self.timer.sleep_us(next_sleep_us).await;
            return;
        }

        let mut next_sleep_us = 0;
        if !retry_directly {
            next_sleep_us = fail_req.chunkserver_op_retry_interval_us;
            if matches!(outcome, AttemptOutcome::Redirected(_)) {
                next_sleep_us /= 10;
            }
        }

        pf_warn!(
            "rpc failed, {}, {}, retried times = {}, request id = {}",
            if retry_directly {
                "retry directly".to_string()
            } else {
                format!("sleep {} us", next_sleep_us)
            },
            ctx,
            state.retried_times(),
            ctx.request_id
        );

        if next_sleep_us != 0 {
            self.timer.sleep_us(next_sleep_us).await;
        }
    }

    /// Handles a transport-level failure: sender health, timeout counters,
    /// throttled logging, and the unstable-state dispatch. Returns whether
    /// the retry may go out without sleeping.
    async fn on_rpc_failed(
        &self,
        ctx: &RequestContext,
        state: &RequestState,
        target: CopysetPeer,
        err: &RpcError,
        last_failure_log_ms: &mut Option<u64>,
    ) -> bool {
        self.transport.reset_sender_if_not_health(target.cs_id);

        if err.is_timeout() {
            self.metacache.unstable_helper().incre_timeout(target.cs_id);
            self.metrics.increm_timeout_rpc_count(ctx.optype);
        }

        // transport failures of one request log at most once per second
        let now_ms = self.timer.now_ms();
        if last_failure_log_ms
            .map(|last| now_ms.saturating_sub(last) >= 1000)
            .unwrap_or(true)
        {
            pf_warn!(
                "{} failed, error = {}, {}, retried times = {}, \
                 request id = {}, remote side = {}",
                ctx.optype,
                err,
                ctx,
                state.retried_times(),
                ctx.request_id,
                target
            );
            *last_failure_log_ms = Some(now_ms);
        }

        self.process_unstable_state(ctx, target).await
    }

    /// Dispatches on the chunkserver's current unstable state after a
    /// transport failure. Returns whether the retry may go out without
    /// sleeping.
    async fn process_unstable_state(
        &self,
        ctx: &RequestContext,
        target: CopysetPeer,
    ) -> bool {
        let unstable_state = self
            .metacache
            .unstable_helper()
            .get_current_unstable_state(target.cs_id, target.addr);

        match unstable_state {
            UnstableState::ServerUnstable => {
                let ip = target.addr.ip().to_string();
                if self.metacache.set_server_unstable(&ip).is_err() {
                    pf_warn!(
                        "set server {} unstable failed, now set \
                         chunkserver {} unstable",
                        ip,
                        target.cs_id
                    );
                    self.metacache.set_chunkserver_unstable(target.cs_id);
                }
                false
            }
            UnstableState::ChunkServerUnstable => {
                self.metacache.set_chunkserver_unstable(target.cs_id);
                false
            }
            // the endpoint did answer recently, so re-resolving may
            // already pick up the correct leader
            UnstableState::Healthy => self.refresh_leader(ctx, target).await,
        }
    }

    /// Handles a redirect reply: install the hint if one is attached and
    /// readable, otherwise fall through to an authoritative refresh.
    /// Returns whether the retry may go out without sleeping.
    async fn on_redirected(
        &self,
        ctx: &RequestContext,
        state: &RequestState,
        target: CopysetPeer,
        hint: Option<&str>,
    ) -> bool {
        pf_warn!(
            "{} redirected, {}, retried times = {}, request id = {}, \
             redirect leader is {}",
            ctx.optype,
            ctx,
            state.retried_times(),
            ctx.request_id,
            hint.unwrap_or("empty")
        );

        if let Some(info) = hint {
            if let Ok(direct) = self
                .update_leader_with_redirect_info(ctx, target, info)
                .await
            {
                return direct;
            }
        }

        self.refresh_leader(ctx, target).await
    }

    async fn update_leader_with_redirect_info(
        &self,
        ctx: &RequestContext,
        target: CopysetPeer,
        info: &str,
    ) -> Result<bool, ClientError> {
        let leader_addr = PeerAddr::parse(info)?;

        let (lpid, cpid) = (ctx.idinfo.lpid, ctx.idinfo.cpid);
        if let Err(e) =
            self.metacache.update_leader(lpid, cpid, leader_addr.addr)
        {
            pf_warn!(
                "update leader of copyset ({}, {}) failed: {}",
                lpid,
                cpid,
                e
            );
            return Err(e);
        }

        let leader = self.metacache.get_leader(lpid, cpid, false).await?;
        Ok(leader.cs_id != target.cs_id)
    }

    /// Re-resolves the leader from the authoritative metadata source.
    /// Returns whether the resolved leader differs from the chunkserver
    /// just attempted (in which case the retry goes out without sleeping).
    async fn refresh_leader(
        &self,
        ctx: &RequestContext,
        target: CopysetPeer,
    ) -> bool {
        match self
            .metacache
            .get_leader(ctx.idinfo.lpid, ctx.idinfo.cpid, true)
            .await
        {
            Ok(leader) => leader.cs_id != target.cs_id,
            Err(e) => {
                pf_warn!(
                    "refresh leader failed, logicpool id = {}, \
                     copyset id = {}, request id = {}: {}",
                    ctx.idinfo.lpid,
                    ctx.idinfo.cpid,
                    ctx.request_id,
                    e
                );
                false
            }
        }
    }

    /// Terminal success: record metrics and run the operation-specific
    /// payload extraction.
    fn on_success(
        &self,
        ctx: &mut RequestContext,
        state: &mut RequestState,
        reply: AttemptReply,
        latency_us: u64,
    ) {
        state.set_failed(0);
        self.metrics.latency_record(ctx.optype, latency_us);
        self.metrics.increm_rpc_qps_count(ctx.optype, ctx.len);

        match reply {
            AttemptReply::Chunk(r) => {
                if matches!(
                    ctx.optype,
                    OpType::ReadChunk | OpType::ReadChunkSnap
                ) {
                    ctx.read_data.clear();
                    ctx.read_data.extend_from_slice(&r.data);
                }
            }
            AttemptReply::ChunkInfo(r) => {
                ctx.chunk_sns.extend(r.chunk_sns);
            }
        }
    }

    /// Terminal chunk-not-exist; a read of a missing chunk is redefined
    /// as a successful read of a hole.
    fn on_chunk_not_exist(
        &self,
        ctx: &mut RequestContext,
        state: &mut RequestState,
        status: i32,
        latency_us: u64,
    ) {
        state.set_failed(status);
        pf_warn!(
            "{} chunk not exists, {}, status = {}, retried times = {}, \
             request id = {}",
            ctx.optype,
            ctx,
            status,
            state.retried_times(),
            ctx.request_id
        );
        self.metrics.latency_record(ctx.optype, latency_us);
        self.metrics.increm_rpc_qps_count(ctx.optype, ctx.len);

        if ctx.optype == OpType::ReadChunk {
            state.set_failed(0);
            ctx.read_data.clear();
            ctx.read_data.resize(ctx.len as usize, 0);
        }
    }

    /// Dispatches one attempt of the request to the transport.
    async fn send_request(
        &self,
        ctx: &RequestContext,
        target: CopysetPeer,
        timeout_ms: u64,
    ) -> Result<AttemptReply, RpcError> {
        match ctx.optype {
            OpType::WriteChunk => self
                .transport
                .write_chunk(
                    target,
                    ctx.idinfo,
                    ctx.file_id,
                    ctx.epoch,
                    ctx.seq,
                    ctx.write_data.clone(),
                    ctx.offset,
                    ctx.len,
                    ctx.source_info.clone(),
                    timeout_ms,
                )
                .await
                .map(AttemptReply::Chunk),
            OpType::ReadChunk => self
                .transport
                .read_chunk(
                    target,
                    ctx.idinfo,
                    ctx.seq,
                    ctx.offset,
                    ctx.len,
                    ctx.source_info.clone(),
                    timeout_ms,
                )
                .await
                .map(AttemptReply::Chunk),
            OpType::ReadChunkSnap => self
                .transport
                .read_chunk_snapshot(
                    target,
                    ctx.idinfo,
                    ctx.seq,
                    ctx.offset,
                    ctx.len,
                    timeout_ms,
                )
                .await
                .map(AttemptReply::Chunk),
            OpType::DeleteChunkSnap => self
                .transport
                .delete_chunk_snapshot_or_correct_sn(
                    target,
                    ctx.idinfo,
                    ctx.corrected_seq,
                    timeout_ms,
                )
                .await
                .map(AttemptReply::Chunk),
            OpType::GetChunkInfo => self
                .transport
                .get_chunk_info(target, ctx.idinfo, timeout_ms)
                .await
                .map(AttemptReply::ChunkInfo),
            OpType::CreateCloneChunk => self
                .transport
                .create_clone_chunk(
                    target,
                    ctx.idinfo,
                    &ctx.location,
                    ctx.seq,
                    ctx.corrected_seq,
                    ctx.chunk_size,
                    timeout_ms,
                )
                .await
                .map(AttemptReply::Chunk),
            OpType::RecoverChunk => self
                .transport
                .recover_chunk(
                    target,
                    ctx.idinfo,
                    ctx.offset,
                    ctx.len,
                    timeout_ms,
                )
                .await
                .map(AttemptReply::Chunk),
        }
    }
}
