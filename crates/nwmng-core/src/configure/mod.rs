// ── Per-node configuration state machine ──
//
// Each configuration procedure is one state implementing `ConfigState`.
// A session (`ConfigCache`) walks a node through a pipeline of states;
// every state drives one or more request/status round-trips against the
// NCP, with retry budgets, out-of-memory suspension and a guard timer.

mod engine;
mod states;

use std::time::{Duration, Instant};

use nwmng_ncp::{Event, ModelRef, NcpLink, Request, ResultCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ErrorCategory;
use crate::model::{Address, Dcd, Node, NodeConfig, NodeError};

pub use engine::{ConfigEngine, Finished};

/// Timeouts tolerated per state before the node is given up on.
pub const DEFAULT_RETRY_BUDGET: i32 = 3;

/// Recorded when a failure carries no NCP result code (link failure,
/// undecodable composition data, stray event).
pub const NO_RESULT: ResultCode = ResultCode::Other(0xFFFF);

// ── States and pipelines ─────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum StateKind {
    GetDcd,
    AddAppKeys,
    Bind,
    SetPub,
    AddSub,
    SetTtl,
    SetSnb,
    SetRelay,
    SetNetTx,
    End,
    Remove,
    RemoveEnd,
}

impl StateKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::RemoveEnd)
    }

    /// The behaviour implementing this state.
    pub fn behavior(self) -> &'static dyn ConfigState {
        match self {
            Self::GetDcd => &states::GetDcd,
            Self::AddAppKeys => &states::AddAppKeys,
            Self::Bind => &states::Bind,
            Self::SetPub => &states::SetPub,
            Self::AddSub => &states::AddSub,
            Self::SetTtl => &states::SET_TTL,
            Self::SetSnb => &states::SET_SNB,
            Self::SetRelay => &states::SET_RELAY,
            Self::SetNetTx => &states::SET_NET_TX,
            Self::Remove => &states::Remove,
            Self::End | Self::RemoveEnd => &states::Terminal,
        }
    }
}

/// Ordered sequence of states a session walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pipeline {
    Configure,
    Remove,
}

const CONFIGURE_STATES: &[StateKind] = &[
    StateKind::GetDcd,
    StateKind::AddAppKeys,
    StateKind::Bind,
    StateKind::SetPub,
    StateKind::AddSub,
    StateKind::SetTtl,
    StateKind::SetSnb,
    StateKind::SetRelay,
    StateKind::SetNetTx,
    StateKind::End,
];

const REMOVE_STATES: &[StateKind] = &[StateKind::Remove, StateKind::RemoveEnd];

impl Pipeline {
    pub fn states(self) -> &'static [StateKind] {
        match self {
            Self::Configure => CONFIGURE_STATES,
            Self::Remove => REMOVE_STATES,
        }
    }

    pub fn first(self) -> StateKind {
        match self {
            Self::Configure => StateKind::GetDcd,
            Self::Remove => StateKind::Remove,
        }
    }

    pub fn terminal(self) -> StateKind {
        match self {
            Self::Configure => StateKind::End,
            Self::Remove => StateKind::RemoveEnd,
        }
    }

    /// State following `state`; the terminal state when there is none.
    pub fn after(self, state: StateKind) -> StateKind {
        let states = self.states();
        states
            .iter()
            .position(|s| *s == state)
            .and_then(|i| states.get(i + 1))
            .copied()
            .unwrap_or_else(|| self.terminal())
    }
}

// ── Shared vocabulary ────────────────────────────────────────────────

/// Result of every state entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateResult {
    /// Request issued or event consumed; inspect the cache for a transition.
    Success,
    /// The guard did not pass; proceed to the next state.
    ToNext,
    /// The NCP is out of memory; the sweep retries after the cooldown.
    OutOfMemory,
    /// The NCP rejected a request; the node goes to its terminal state.
    Command,
    /// A status event reported failure; the node goes to its terminal state.
    Event,
    /// An event arrived that this state does not expect.
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Timeout,
    OutOfMemory,
    GuardTimerExpired,
}

/// Transition requested by a state, applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next,
    Terminal,
}

/// Progress of a multi-item iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    More,
    Done,
}

/// Everything a state needs from outside the session.
pub struct StepCtx<'a> {
    pub link: &'a mut dyn NcpLink,
    pub netkey_id: u16,
    pub now: Instant,
    pub guard_timeout: Duration,
    pub oom_cooldown: Duration,
}

// ── Session cache ────────────────────────────────────────────────────

/// Transient state of one node's configuration session.
#[derive(Debug, Clone)]
pub struct ConfigCache {
    pub(crate) address: Address,
    pub(crate) uuid: Uuid,
    pub(crate) pipeline: Pipeline,
    pub(crate) state: StateKind,
    pub(crate) config: NodeConfig,
    pub(crate) transition: Option<Transition>,

    // element × model × item
    pub(crate) element: usize,
    pub(crate) model: usize,
    pub(crate) item: usize,

    pub(crate) remaining_retry: i32,
    pub(crate) ever_retried: bool,
    pub(crate) pending_retry: Option<RetryReason>,

    pub(crate) handle: Option<u32>,
    pub(crate) waiting: bool,
    pub(crate) oom_until: Option<Instant>,
    pub(crate) guard_until: Option<Instant>,
    pub(crate) expired: bool,

    pub(crate) dcd: Option<Dcd>,
    pub(crate) dcd_buf: Vec<u8>,
    pub(crate) current_model: Option<ModelRef>,
    pub(crate) error: Option<NodeError>,
}

impl ConfigCache {
    pub fn new(node: &Node, pipeline: Pipeline) -> Self {
        Self {
            address: node.address,
            uuid: node.uuid,
            pipeline,
            state: pipeline.first(),
            config: node.config.clone(),
            transition: None,
            element: 0,
            model: 0,
            item: 0,
            remaining_retry: 0,
            ever_retried: false,
            pending_retry: None,
            handle: None,
            waiting: false,
            oom_until: None,
            guard_until: None,
            expired: false,
            dcd: None,
            dcd_buf: Vec::new(),
            current_model: None,
            error: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self) -> StateKind {
        self.state
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    pub fn remaining_retry(&self) -> i32 {
        self.remaining_retry
    }

    pub fn ever_retried(&self) -> bool {
        self.ever_retried
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn handle(&self) -> Option<u32> {
        self.handle
    }

    pub fn oom_until(&self) -> Option<Instant> {
        self.oom_until
    }

    pub fn error(&self) -> Option<&NodeError> {
        self.error.as_ref()
    }

    /// Current (element, model, item) indices.
    pub fn indices(&self) -> (usize, usize, usize) {
        (self.element, self.model, self.item)
    }

    /// Reset per-state bookkeeping when entering `state`.
    pub(crate) fn enter(&mut self, state: StateKind) {
        self.state = state;
        self.transition = None;
        self.element = 0;
        self.model = 0;
        self.item = 0;
        self.clear_retry();
        self.pending_retry = None;
        self.handle = None;
        self.waiting = false;
        self.oom_until = None;
        self.guard_until = None;
        self.expired = false;
        self.current_model = None;
    }

    pub(crate) fn clear_retry(&mut self) {
        self.remaining_retry = 0;
        self.ever_retried = false;
    }

    /// Record a failure and request the terminal state.
    pub(crate) fn fail(&mut self, code: ResultCode, category: ErrorCategory) {
        self.error = Some(NodeError {
            state: self.state,
            code,
            category,
        });
        self.transition = Some(Transition::Terminal);
    }

    pub(crate) fn advance(&mut self) {
        self.transition = Some(Transition::Next);
    }

    pub(crate) fn has_models(&self) -> bool {
        self.dcd
            .as_ref()
            .is_some_and(|d| d.elements.iter().any(|e| e.model_count() > 0))
    }

    /// Move past elements without models. `Done` when none remain.
    pub(crate) fn skip_empty_elements(&mut self) -> Iteration {
        let Some(dcd) = self.dcd.as_ref() else {
            return Iteration::Done;
        };
        while self.element < dcd.element_count() && dcd.model_count(self.element) == 0 {
            self.element += 1;
        }
        if self.element < dcd.element_count() {
            Iteration::More
        } else {
            self.element = 0;
            Iteration::Done
        }
    }

    /// Advance the innermost index over `items`, cascading outward.
    pub(crate) fn iterate(&mut self, items: usize) -> Iteration {
        self.item += 1;
        if self.item < items {
            return Iteration::More;
        }
        self.item = 0;
        self.model += 1;
        let models = self.dcd.as_ref().map_or(0, |d| d.model_count(self.element));
        if self.model < models {
            return Iteration::More;
        }
        self.model = 0;
        self.element += 1;
        self.skip_empty_elements()
    }

    /// Resolve the model under the current indices.
    pub(crate) fn resolve_model(&mut self) -> Option<ModelRef> {
        self.current_model = self
            .dcd
            .as_ref()
            .and_then(|d| d.model(self.element, self.model));
        self.current_model
    }

    /// Element index as carried on the wire.
    pub(crate) fn element_index(&self) -> u8 {
        u8::try_from(self.element).unwrap_or(u8::MAX)
    }
}

// ── State behaviour ──────────────────────────────────────────────────

/// The four entry points of a configuration state.
pub trait ConfigState: Sync {
    fn kind(&self) -> StateKind;

    /// Whether this state has anything to do for the session.
    fn guard(&self, cache: &ConfigCache) -> bool;

    /// Issue the request for the current item.
    fn step(&self, cache: &mut ConfigCache, ctx: &mut StepCtx<'_>) -> StateResult;

    /// Consume one status event addressed to this session.
    fn in_progress(
        &self,
        event: &Event,
        cache: &mut ConfigCache,
        ctx: &mut StepCtx<'_>,
    ) -> StateResult;

    fn retry_budget(&self) -> i32 {
        DEFAULT_RETRY_BUDGET
    }

    fn entry(&self, cache: &mut ConfigCache, ctx: &mut StepCtx<'_>) -> StateResult {
        if !self.guard(cache) {
            debug!(node = %cache.address, state = %self.kind(), "guard not passed, to next state");
            return StateResult::ToNext;
        }
        self.step(cache, ctx)
    }

    /// Reissue the current request.
    ///
    /// # Panics
    ///
    /// When the precondition for `reason` does not hold: a timeout retry
    /// without a prior timeout or with the budget spent, an OOM retry
    /// without the OOM flag, or a guard retry without expiry.
    fn retry(
        &self,
        cache: &mut ConfigCache,
        ctx: &mut StepCtx<'_>,
        reason: RetryReason,
    ) -> StateResult {
        match reason {
            RetryReason::Timeout => assert!(
                cache.ever_retried && cache.remaining_retry > 0,
                "timeout retry of {} without budget",
                cache.address
            ),
            RetryReason::OutOfMemory => assert!(
                cache.oom_until.is_some(),
                "OOM retry of {} without OOM flag",
                cache.address
            ),
            RetryReason::GuardTimerExpired => assert!(
                cache.expired,
                "guard retry of {} without expiry",
                cache.address
            ),
        }

        let result = self.step(cache, ctx);
        if result == StateResult::Success {
            match reason {
                RetryReason::Timeout => {
                    cache.remaining_retry -= 1;
                    debug!(node = %cache.address, state = %self.kind(), remaining = cache.remaining_retry, "retry on timeout");
                }
                RetryReason::OutOfMemory => {
                    cache.oom_until = None;
                    debug!(node = %cache.address, state = %self.kind(), "retry after OOM cooldown");
                }
                RetryReason::GuardTimerExpired => {
                    cache.expired = false;
                    debug!(node = %cache.address, state = %self.kind(), "retry after guard timer expiry");
                }
            }
        }
        result
    }

    fn exit(&self, _cache: &mut ConfigCache) {}
}

// ── Helpers shared by the states ─────────────────────────────────────

/// Send `req` and book the acknowledgement into the session.
pub(crate) fn issue(cache: &mut ConfigCache, ctx: &mut StepCtx<'_>, req: &Request) -> StateResult {
    let ack = match ctx.link.request(req) {
        Ok(ack) => ack,
        Err(e) => {
            warn!(node = %cache.address, request = req.name(), error = %e, "link failure");
            cache.fail(NO_RESULT, ErrorCategory::Command);
            return StateResult::Command;
        }
    };
    match ack.result {
        ResultCode::Success => {
            cache.waiting = true;
            cache.handle = ack.handle;
            cache.guard_until = Some(ctx.now + ctx.guard_timeout);
            StateResult::Success
        }
        ResultCode::OutOfMemory => {
            debug!(node = %cache.address, request = req.name(), "NCP out of memory, suspending");
            cache.oom_until = Some(ctx.now + ctx.oom_cooldown);
            StateResult::OutOfMemory
        }
        code => {
            warn!(node = %cache.address, request = req.name(), code = %code, "request rejected");
            cache.fail(code, ErrorCategory::Command);
            StateResult::Command
        }
    }
}

/// How a status result leaves the current item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settle {
    Done,
    Retry,
    Failed,
}

/// Apply the generic status policy: success clears the retry state, a
/// timeout arms or spends the budget, anything else fails the node.
pub(crate) fn settle(cache: &mut ConfigCache, result: ResultCode, budget: i32) -> Settle {
    match result {
        ResultCode::Success => {
            cache.clear_retry();
            Settle::Done
        }
        ResultCode::Timeout => {
            if !cache.ever_retried {
                cache.remaining_retry = budget;
                cache.ever_retried = true;
            } else if cache.remaining_retry <= 0 {
                cache.clear_retry();
                warn!(node = %cache.address, state = %cache.state, "retries exhausted");
                cache.fail(ResultCode::Timeout, ErrorCategory::Event);
                return Settle::Failed;
            }
            cache.pending_retry = Some(RetryReason::Timeout);
            Settle::Retry
        }
        code => {
            warn!(node = %cache.address, state = %cache.state, code = %code, "status reported failure");
            cache.fail(code, ErrorCategory::Event);
            Settle::Failed
        }
    }
}
