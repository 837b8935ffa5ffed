use nwmng_ncp::{Event, Request, StatusKind};
use tracing::debug;

use super::{proceed, status_of, target};
use crate::configure::{
    ConfigCache, ConfigState, Settle, StateKind, StateResult, StepCtx, issue, settle,
};

/// Bind every bound appkey to every model of every element.
pub(crate) struct Bind;

impl ConfigState for Bind {
    fn kind(&self) -> StateKind {
        StateKind::Bind
    }

    fn guard(&self, cache: &ConfigCache) -> bool {
        !cache.config.bindings.is_empty() && cache.has_models()
    }

    fn step(&self, cache: &mut ConfigCache, ctx: &mut StepCtx<'_>) -> StateResult {
        let Some((element, model)) = target(cache) else {
            return StateResult::ToNext;
        };
        let Some(&appkey_index) = cache.config.bindings.get(cache.item) else {
            return StateResult::ToNext;
        };
        debug!(
            node = %cache.address,
            element,
            vendor = model.vendor,
            model = model.model,
            appkey = appkey_index,
            "bind model"
        );
        let req = Request::BindModel {
            netkey_id: ctx.netkey_id,
            address: cache.address.raw(),
            element,
            model,
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
        let Some(result) = status_of(event, StatusKind::Binding) else {
            return StateResult::Unspecified;
        };
        match settle(cache, result, self.retry_budget()) {
            Settle::Done => {}
            Settle::Retry => return StateResult::Success,
            Settle::Failed => return StateResult::Event,
        }
        let progress = cache.iterate(cache.config.bindings.len());
        proceed(self, cache, ctx, progress)
    }
}
