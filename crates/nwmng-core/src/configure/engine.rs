// ── Session engine ──
//
// Owns every in-flight configuration session, routes status events to
// them by NCP handle and applies the transitions their states request.

use std::mem;

use nwmng_ncp::Event;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    ConfigCache, NO_RESULT, Pipeline, RetryReason, StateKind, StateResult, StepCtx, Transition,
};
use crate::error::{CoreError, ErrorCategory};
use crate::model::{Address, Node, NodeError};

/// Outcome of a session that reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub address: Address,
    pub uuid: Uuid,
    pub pipeline: Pipeline,
    pub error: Option<NodeError>,
}

impl Finished {
    fn from_cache(cache: &ConfigCache) -> Self {
        Self {
            address: cache.address,
            uuid: cache.uuid,
            pipeline: cache.pipeline,
            error: cache.error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Bounded set of concurrent configuration sessions.
#[derive(Debug)]
pub struct ConfigEngine {
    max_sessions: usize,
    sessions: Vec<ConfigCache>,
}

impl ConfigEngine {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            sessions: Vec::with_capacity(max_sessions),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    pub fn contains(&self, address: Address) -> bool {
        self.sessions.iter().any(|s| s.address == address)
    }

    pub fn sessions(&self) -> &[ConfigCache] {
        &self.sessions
    }

    /// Drop every session without finishing it.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    /// Open a session for `node` and run it until it waits for the NCP.
    ///
    /// Returns the outcome right away when the pipeline finishes without
    /// ever waiting (every guard failed, or the first request was rejected).
    pub fn start(
        &mut self,
        node: &Node,
        pipeline: Pipeline,
        ctx: &mut StepCtx<'_>,
    ) -> Result<Option<Finished>, CoreError> {
        if !node.address.is_unicast() {
            return Err(CoreError::param(format!(
                "node {} has no unicast address",
                node.uuid.simple()
            )));
        }
        if self.contains(node.address) {
            return Err(CoreError::state(format!(
                "node {} already has a session",
                node.address
            )));
        }
        if self.is_full() {
            return Err(CoreError::state(format!(
                "all {} configuration sessions busy",
                self.max_sessions
            )));
        }

        let mut cache = ConfigCache::new(node, pipeline);
        info!(node = %node.address, pipeline = ?pipeline, "session started");
        let result = Self::enter(&mut cache, pipeline.first(), ctx);
        if Self::drive(&mut cache, result, ctx) {
            return Ok(Some(Self::finish(&cache)));
        }
        self.sessions.push(cache);
        Ok(None)
    }

    /// Whether a session is waiting for `event`.
    pub fn owns(&self, event: &Event) -> bool {
        let Some(handle) = event.handle() else {
            return false;
        };
        self.sessions
            .iter()
            .any(|s| s.waiting && s.handle == Some(handle))
    }

    /// Hand `event` to the session waiting on its handle.
    ///
    /// Events no session owns are left alone and yield `None`, as does a
    /// session that keeps going after consuming the event.
    pub fn on_event(&mut self, event: &Event, ctx: &mut StepCtx<'_>) -> Option<Finished> {
        let handle = event.handle()?;
        let pos = self
            .sessions
            .iter()
            .position(|s| s.waiting && s.handle == Some(handle))?;
        let cache = self.sessions.get_mut(pos)?;

        // Composition data arrives in chunks ahead of its end marker.
        if !matches!(event, Event::DcdData { .. }) {
            cache.waiting = false;
            cache.guard_until = None;
        }

        let behavior = cache.state.behavior();
        let result = behavior.in_progress(event, cache, ctx);
        if Self::drive(cache, result, ctx) {
            let cache = self.sessions.remove(pos);
            return Some(Self::finish(&cache));
        }
        None
    }

    /// Fire OOM cooldowns and guard timers that have run out.
    pub fn sweep(&mut self, ctx: &mut StepCtx<'_>) -> Vec<Finished> {
        let mut finished = Vec::new();
        for mut cache in mem::take(&mut self.sessions) {
            let reason = if cache.oom_until.is_some_and(|t| t <= ctx.now) {
                Some(RetryReason::OutOfMemory)
            } else if cache.waiting && cache.guard_until.is_some_and(|t| t <= ctx.now) {
                warn!(node = %cache.address, state = %cache.state, "guard timer expired");
                cache.expired = true;
                cache.waiting = false;
                cache.guard_until = None;
                Some(RetryReason::GuardTimerExpired)
            } else {
                None
            };

            let done = reason.is_some_and(|reason| {
                let result = cache.state.behavior().retry(&mut cache, ctx, reason);
                Self::drive(&mut cache, result, ctx)
            });
            if done {
                finished.push(Self::finish(&cache));
            } else {
                self.sessions.push(cache);
            }
        }
        finished
    }

    fn enter(cache: &mut ConfigCache, state: StateKind, ctx: &mut StepCtx<'_>) -> StateResult {
        cache.state.behavior().exit(cache);
        cache.enter(state);
        debug!(node = %cache.address, state = %state, "enter state");
        state.behavior().entry(cache, ctx)
    }

    /// Apply `result` and whatever it leads to until the session either
    /// waits on the NCP or reaches its terminal state (returns `true`).
    fn drive(cache: &mut ConfigCache, mut result: StateResult, ctx: &mut StepCtx<'_>) -> bool {
        loop {
            match result {
                StateResult::Success => {}
                StateResult::ToNext => {
                    if cache.transition.is_none() {
                        cache.transition = Some(Transition::Next);
                    }
                }
                StateResult::OutOfMemory => return false,
                StateResult::Command | StateResult::Event => {
                    if cache.error.is_none() {
                        cache.fail(NO_RESULT, ErrorCategory::Internal);
                    }
                    cache.transition = Some(Transition::Terminal);
                }
                StateResult::Unspecified => {
                    warn!(node = %cache.address, state = %cache.state, "unexpected event");
                    cache.fail(NO_RESULT, ErrorCategory::Internal);
                }
            }

            if cache.transition.is_none() {
                match cache.pending_retry.take() {
                    Some(reason) => {
                        result = cache.state.behavior().retry(cache, ctx, reason);
                        continue;
                    }
                    None => return false,
                }
            }
            cache.pending_retry = None;

            let next = match cache.transition.take() {
                Some(Transition::Next) => cache.pipeline.after(cache.state),
                _ => cache.pipeline.terminal(),
            };
            if next.is_terminal() {
                cache.state.behavior().exit(cache);
                cache.enter(next);
                return true;
            }
            result = Self::enter(cache, next, ctx);
        }
    }

    fn finish(cache: &ConfigCache) -> Finished {
        let finished = Finished::from_cache(cache);
        match &finished.error {
            None => info!(node = %cache.address, state = %cache.state, "session finished"),
            Some(e) => error!(
                node = %cache.address,
                failed_in = %e.state,
                code = %e.code,
                category = %e.category,
                "session failed"
            ),
        }
        finished
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, Instant};

    use nwmng_ncp::{
        Ack, Event, ModelRef, NcpLink, Request, ResultCode, SimHandle, SimulatedNcp, StatusKind,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::NodeConfig;

    fn node(config: NodeConfig) -> Node {
        Node::new(Uuid::from_u128(0xA1))
            .with_address(Address(0x0101))
            .with_config(config)
    }

    fn ctx(link: &mut dyn NcpLink, now: Instant) -> StepCtx<'_> {
        StepCtx {
            link,
            netkey_id: 0,
            now,
            guard_timeout: Duration::from_secs(20),
            oom_cooldown: Duration::from_secs(2),
        }
    }

    fn status(kind: StatusKind, handle: u32, result: ResultCode) -> Event {
        Event::ConfigStatus {
            kind,
            handle,
            result,
        }
    }

    fn last_handle(sim: &SimHandle) -> u32 {
        sim.peek_handle() - 1
    }

    /// Composition data: one element per entry, `n` SIG models each.
    fn composition(models: &[u16]) -> Vec<u8> {
        let mut data = vec![0u8; 10];
        for &n in models {
            data.extend_from_slice(&[0, 0, u8::try_from(n).unwrap(), 0]);
            for m in 0..n {
                data.extend_from_slice(&(0x1000 + m).to_le_bytes());
            }
        }
        data
    }

    fn feed_dcd(engine: &mut ConfigEngine, sim: &SimHandle, link: &mut SimulatedNcp, data: Vec<u8>) {
        let handle = last_handle(sim);
        let now = Instant::now();
        let chunk = Event::DcdData {
            handle,
            page: 0,
            data,
        };
        assert!(engine.on_event(&chunk, &mut ctx(link, now)).is_none());
        let end = Event::DcdDataEnd {
            handle,
            result: ResultCode::Success,
        };
        assert!(engine.on_event(&end, &mut ctx(link, now)).is_none());
    }

    #[test]
    fn rejects_second_session_for_same_node() {
        let (mut link, _sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        let n = node(NodeConfig::default());
        engine
            .start(&n, Pipeline::Configure, &mut ctx(&mut link, Instant::now()))
            .unwrap();
        let err = engine
            .start(&n, Pipeline::Configure, &mut ctx(&mut link, Instant::now()))
            .unwrap_err();
        assert!(matches!(err, CoreError::State { .. }));
    }

    #[test]
    fn capacity_is_bounded() {
        let (mut link, _sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(1);
        let a = node(NodeConfig::default());
        let b = node(NodeConfig::default()).with_address(Address(0x0102));
        engine
            .start(&a, Pipeline::Configure, &mut ctx(&mut link, Instant::now()))
            .unwrap();
        assert!(engine.is_full());
        assert!(engine
            .start(&b, Pipeline::Configure, &mut ctx(&mut link, Instant::now()))
            .is_err());
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn empty_config_finishes_after_composition_data() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        engine
            .start(
                &node(NodeConfig::default()),
                Pipeline::Configure,
                &mut ctx(&mut link, Instant::now()),
            )
            .unwrap();
        assert_eq!(sim.count("get_dcd"), 1);

        let handle = last_handle(&sim);
        let now = Instant::now();
        let chunk = Event::DcdData {
            handle,
            page: 0,
            data: nwmng_ncp::sim::DEFAULT_COMPOSITION.to_vec(),
        };
        assert!(engine.owns(&chunk));
        assert!(engine.on_event(&chunk, &mut ctx(&mut link, now)).is_none());
        let end = Event::DcdDataEnd {
            handle,
            result: ResultCode::Success,
        };
        let done = engine.on_event(&end, &mut ctx(&mut link, now)).unwrap();
        assert!(done.is_success());
        assert!(engine.is_empty());
        assert_eq!(sim.requests().len(), 1);
    }

    #[test]
    fn unowned_events_are_not_consumed() {
        let (mut link, _sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        let stray = status(StatusKind::Binding, 99, ResultCode::Success);
        assert!(!engine.owns(&stray));
        assert!(engine
            .on_event(&stray, &mut ctx(&mut link, Instant::now()))
            .is_none());
    }

    #[test]
    fn retry_budget_decreases_then_terminates_once() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        let cfg = NodeConfig {
            ttl: Some(5),
            ..NodeConfig::default()
        };
        engine
            .start(&node(cfg), Pipeline::Configure, &mut ctx(&mut link, Instant::now()))
            .unwrap();
        feed_dcd(&mut engine, &sim, &mut link, composition(&[1]));
        assert_eq!(engine.sessions()[0].state(), StateKind::SetTtl);

        let mut budgets = Vec::new();
        let mut finished = Vec::new();
        for _ in 0..6 {
            let ev = status(StatusKind::DefaultTtl, last_handle(&sim), ResultCode::Timeout);
            if !engine.owns(&ev) {
                break;
            }
            if let Some(done) = engine.on_event(&ev, &mut ctx(&mut link, Instant::now())) {
                finished.push(done);
            } else {
                budgets.push(engine.sessions()[0].remaining_retry());
            }
        }

        assert_eq!(budgets, vec![2, 1, 0]);
        assert_eq!(finished.len(), 1);
        let err = finished[0].error.unwrap();
        assert_eq!(err.state, StateKind::SetTtl);
        assert_eq!(err.code, ResultCode::Timeout);
        assert_eq!(err.category, ErrorCategory::Event);
        assert_eq!(sim.count("set_default_ttl"), 4);
        assert!(engine.is_empty());
    }

    #[test]
    fn subscriptions_visit_every_triple_in_row_major_order() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        let subs = vec![Address(0xC001), Address(0xC002), Address(0xC003)];
        let cfg = NodeConfig {
            subscriptions: subs.clone(),
            ..NodeConfig::default()
        };
        engine
            .start(&node(cfg), Pipeline::Configure, &mut ctx(&mut link, Instant::now()))
            .unwrap();
        // element 1 carries no models and must be skipped
        feed_dcd(&mut engine, &sim, &mut link, composition(&[2, 0, 1]));
        sim.clear_requests();

        // The first request was already issued when the state was entered.
        let mut finished = None;
        while finished.is_none() {
            let ev = status(StatusKind::ModelSub, last_handle(&sim), ResultCode::Success);
            finished = engine.on_event(&ev, &mut ctx(&mut link, Instant::now()));
        }
        assert!(finished.unwrap().is_success());

        let mut seen = vec![(0u8, ModelRef::sig(0x1000), 0xC001)];
        seen.extend(sim.requests().into_iter().filter_map(|r| match r {
            Request::SetModelSub {
                element,
                model,
                sub_address,
                ..
            }
            | Request::AddModelSub {
                element,
                model,
                sub_address,
                ..
            } => Some((element, model, sub_address)),
            _ => None,
        }));

        let mut expected = Vec::new();
        for (element, models) in [(0u8, 2u16), (2, 1)] {
            for m in 0..models {
                for sub in &subs {
                    expected.push((element, ModelRef::sig(0x1000 + m), sub.raw()));
                }
            }
        }
        assert_eq!(seen.len(), 3 * 3);
        assert_eq!(seen, expected);
    }

    #[test]
    fn full_subscription_list_moves_to_next_model() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        let cfg = NodeConfig {
            subscriptions: vec![Address(0xC001), Address(0xC002)],
            ..NodeConfig::default()
        };
        engine
            .start(&node(cfg), Pipeline::Configure, &mut ctx(&mut link, Instant::now()))
            .unwrap();
        feed_dcd(&mut engine, &sim, &mut link, composition(&[2]));

        let ev = status(
            StatusKind::ModelSub,
            last_handle(&sim),
            ResultCode::InsufficientResources,
        );
        assert!(engine
            .on_event(&ev, &mut ctx(&mut link, Instant::now()))
            .is_none());
        assert_eq!(engine.sessions()[0].indices(), (0, 1, 0));
        assert!(matches!(
            sim.requests().last(),
            Some(Request::SetModelSub { model, .. }) if *model == ModelRef::sig(0x1001)
        ));
    }

    #[test]
    fn oom_ack_waits_for_cooldown_without_spending_budget() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        sim.script(Ack::err(ResultCode::OutOfMemory));
        let start = Instant::now();
        engine
            .start(
                &node(NodeConfig::default()),
                Pipeline::Configure,
                &mut ctx(&mut link, start),
            )
            .unwrap();
        let session = &engine.sessions()[0];
        assert!(session.oom_until().is_some());
        assert!(!session.is_waiting());
        assert_eq!(session.remaining_retry(), 0);

        assert!(engine.sweep(&mut ctx(&mut link, start)).is_empty());
        assert_eq!(sim.count("get_dcd"), 1);

        let later = start + Duration::from_secs(3);
        assert!(engine.sweep(&mut ctx(&mut link, later)).is_empty());
        let session = &engine.sessions()[0];
        assert_eq!(sim.count("get_dcd"), 2);
        assert!(session.oom_until().is_none());
        assert!(session.is_waiting());
        assert!(!session.ever_retried());
    }

    #[test]
    fn guard_timer_reissues_request() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        let start = Instant::now();
        engine
            .start(
                &node(NodeConfig::default()),
                Pipeline::Configure,
                &mut ctx(&mut link, start),
            )
            .unwrap();
        let first = engine.sessions()[0].handle();

        let later = start + Duration::from_secs(21);
        assert!(engine.sweep(&mut ctx(&mut link, later)).is_empty());
        assert_eq!(sim.count("get_dcd"), 2);
        assert_ne!(engine.sessions()[0].handle(), first);
        assert!(engine.sessions()[0].is_waiting());
    }

    #[test]
    fn rejected_request_fails_node() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        sim.script(Ack::err(ResultCode::Other(0x0181)));
        let done = engine
            .start(
                &node(NodeConfig::default()),
                Pipeline::Configure,
                &mut ctx(&mut link, Instant::now()),
            )
            .unwrap()
            .unwrap();
        let err = done.error.unwrap();
        assert_eq!(err.state, StateKind::GetDcd);
        assert_eq!(err.category, ErrorCategory::Command);
        assert!(engine.is_empty());
    }

    #[test]
    fn unexpected_event_routes_to_terminal() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        engine
            .start(
                &node(NodeConfig::default()),
                Pipeline::Configure,
                &mut ctx(&mut link, Instant::now()),
            )
            .unwrap();
        let ev = status(StatusKind::Relay, last_handle(&sim), ResultCode::Success);
        let done = engine
            .on_event(&ev, &mut ctx(&mut link, Instant::now()))
            .unwrap();
        assert_eq!(done.error.unwrap().category, ErrorCategory::Internal);
    }

    #[test]
    fn remove_pipeline_resets_node() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        engine
            .start(
                &node(NodeConfig::default()),
                Pipeline::Remove,
                &mut ctx(&mut link, Instant::now()),
            )
            .unwrap();
        assert_eq!(sim.count("reset_node"), 1);
        let ev = status(StatusKind::Reset, last_handle(&sim), ResultCode::Success);
        let done = engine
            .on_event(&ev, &mut ctx(&mut link, Instant::now()))
            .unwrap();
        assert!(done.is_success());
        assert_eq!(done.pipeline, Pipeline::Remove);
    }

    #[test]
    fn bindings_bind_every_model_with_every_key() {
        let (mut link, sim, _rx) = SimulatedNcp::new();
        let mut engine = ConfigEngine::new(2);
        let cfg = NodeConfig {
            bindings: vec![0, 1],
            ..NodeConfig::default()
        };
        engine
            .start(&node(cfg), Pipeline::Configure, &mut ctx(&mut link, Instant::now()))
            .unwrap();
        feed_dcd(&mut engine, &sim, &mut link, composition(&[1]));
        let mut finished = None;
        while finished.is_none() {
            let handle = last_handle(&sim);
            let kind = match sim.requests().last() {
                Some(Request::AddAppKey { .. }) => StatusKind::AppKey,
                _ => StatusKind::Binding,
            };
            let result = if kind == StatusKind::AppKey {
                ResultCode::AlreadyExists
            } else {
                ResultCode::Success
            };
            finished = engine.on_event(&status(kind, handle, result), &mut ctx(&mut link, Instant::now()));
        }
        assert!(finished.unwrap().is_success());
        assert_eq!(sim.count("add_app_key"), 2);
        assert_eq!(sim.count("bind_model"), 2);
    }
}
