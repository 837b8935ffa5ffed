use nwmng_ncp::{Event, Request, ResultCode, StatusKind};
use tracing::debug;

use super::{proceed, status_of};
use crate::configure::{
    ConfigCache, ConfigState, Iteration, Settle, StateKind, StateResult, StepCtx, issue, settle,
};

/// Push every distinct bound appkey to the node.
pub(crate) struct AddAppKeys;

impl ConfigState for AddAppKeys {
    fn kind(&self) -> StateKind {
        StateKind::AddAppKeys
    }

    fn guard(&self, cache: &ConfigCache) -> bool {
        !cache.config.bindings.is_empty()
    }

    fn step(&self, cache: &mut ConfigCache, ctx: &mut StepCtx<'_>) -> StateResult {
        let Some(&appkey_index) = cache.config.distinct_appkeys().get(cache.item) else {
            return StateResult::ToNext;
        };
        debug!(node = %cache.address, appkey = appkey_index, "add appkey");
        let req = Request::AddAppKey {
            netkey_id: ctx.netkey_id,
            address: cache.address.raw(),
            appkey_index,
        };
        issue(cache, ctx, &req)
    }

    fn in_progress(
        &self,
        event: &Event,
        cache: &mut ConfigCache,
        ctx: &mut StepCtx<'_>,
    ) -> StateResult {
        let Some(result) = status_of(event, StatusKind::AppKey) else {
            return StateResult::Unspecified;
        };
        // A key the node already holds is as good as a fresh one.
        let result = if result == ResultCode::AlreadyExists {
            ResultCode::Success
        } else {
            result
        };
        match settle(cache, result, self.retry_budget()) {
            Settle::Done => {}
            Settle::Retry => return StateResult::Success,
            Settle::Failed => return StateResult::Event,
        }
        cache.item += 1;
        let progress = if cache.item < cache.config.distinct_appkeys().len() {
            Iteration::More
        } else {
            Iteration::Done
        };
        proceed(self, cache, ctx, progress)
    }
}
