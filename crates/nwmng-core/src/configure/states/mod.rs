// ── Configuration states ──
//
// One behaviour per state. Multi-item states walk the element × model
// (× item) matrix of the node's composition data; single-shot states
// issue exactly one request.

mod addsub;
mod appkey;
mod bind;
mod dcd;
mod publish;
mod remove;
mod single;

use nwmng_ncp::{Event, ModelRef, ResultCode, StatusKind};

use super::{ConfigCache, ConfigState, Iteration, StateKind, StateResult, StepCtx};

pub(crate) use addsub::AddSub;
pub(crate) use appkey::AddAppKeys;
pub(crate) use bind::Bind;
pub(crate) use dcd::GetDcd;
pub(crate) use publish::SetPub;
pub(crate) use remove::Remove;
pub(crate) use single::{SET_NET_TX, SET_RELAY, SET_SNB, SET_TTL};

/// `End` and `RemoveEnd`: the engine finalises the session instead of
/// entering them.
pub(crate) struct Terminal;

impl ConfigState for Terminal {
    fn kind(&self) -> StateKind {
        StateKind::End
    }

    fn guard(&self, _cache: &ConfigCache) -> bool {
        false
    }

    fn step(&self, _cache: &mut ConfigCache, _ctx: &mut StepCtx<'_>) -> StateResult {
        StateResult::ToNext
    }

    fn in_progress(
        &self,
        _event: &Event,
        _cache: &mut ConfigCache,
        _ctx: &mut StepCtx<'_>,
    ) -> StateResult {
        StateResult::Unspecified
    }
}

/// Result of a status event of the given kind, `None` for anything else.
fn status_of(event: &Event, kind: StatusKind) -> Option<ResultCode> {
    match event {
        Event::ConfigStatus {
            kind: k, result, ..
        } if *k == kind => Some(*result),
        _ => None,
    }
}

/// Element and model under the current indices, skipping elements
/// without models. `None` once the matrix is exhausted.
fn target(cache: &mut ConfigCache) -> Option<(u8, ModelRef)> {
    if cache.skip_empty_elements() == Iteration::Done {
        return None;
    }
    let model = cache.resolve_model()?;
    Some((cache.element_index(), model))
}

/// Issue the next item, or request the next state once all are done.
fn proceed(
    state: &dyn ConfigState,
    cache: &mut ConfigCache,
    ctx: &mut StepCtx<'_>,
    progress: Iteration,
) -> StateResult {
    match progress {
        Iteration::More => state.step(cache, ctx),
        Iteration::Done => {
            cache.advance();
            StateResult::Success
        }
    }
}
