use nwmng_ncp::{Event, Request, StatusKind};
use tracing::debug;

use super::{proceed, status_of, target};
use crate::configure::{
    ConfigCache, ConfigState, Settle, StateKind, StateResult, StepCtx, issue, settle,
};

/// Set the publication on every model of every element.
pub(crate) struct SetPub;

impl ConfigState for SetPub {
    fn kind(&self) -> StateKind {
        StateKind::SetPub
    }

    fn guard(&self, cache: &ConfigCache) -> bool {
        cache.config.publication.is_some() && cache.has_models()
    }

    fn step(&self, cache: &mut ConfigCache, ctx: &mut StepCtx<'_>) -> StateResult {
        let Some(publication) = cache.config.publication else {
            return StateResult::ToNext;
        };
        let Some((element, model)) = target(cache) else {
            return StateResult::ToNext;
        };
        debug!(
            node = %cache.address,
            element,
            vendor = model.vendor,
            model = model.model,
            publish = %publication.address,
            "set publication"
        );
        let req = Request::SetModelPub {
            netkey_id: ctx.netkey_id,
            address: cache.address.raw(),
            element,
            model,
            publish_address: publication.address.raw(),
            appkey_index: publication.appkey_index,
            ttl: publication.ttl,
            period: publication.period,
            tx: publication.tx,
        };
        issue(cache, ctx, &req)
    }

    fn in_progress(
        &self,
        event: &Event,
        cache: &mut ConfigCache,
        ctx: &mut StepCtx<'_>,
    ) -> StateResult {
        let Some(result) = status_of(event, StatusKind::ModelPub) else {
            return StateResult::Unspecified;
        };
        match settle(cache, result, self.retry_budget()) {
            Settle::Done => {}
            Settle::Retry => return StateResult::Success,
            Settle::Failed => return StateResult::Event,
        }
        let progress = cache.iterate(1);
        proceed(self, cache, ctx, progress)
    }
}
