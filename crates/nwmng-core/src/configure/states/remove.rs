use nwmng_ncp::{Event, Request, StatusKind};
use tracing::info;

use super::status_of;
use crate::configure::{
    ConfigCache, ConfigState, Settle, StateKind, StateResult, StepCtx, issue, settle,
};

/// Reset the node, dropping it from the network.
pub(crate) struct Remove;

impl ConfigState for Remove {
    fn kind(&self) -> StateKind {
        StateKind::Remove
    }

    fn guard(&self, cache: &ConfigCache) -> bool {
        !cache.address.is_unassigned()
    }

    fn step(&self, cache: &mut ConfigCache, ctx: &mut StepCtx<'_>) -> StateResult {
        info!(node = %cache.address, "resetting node");
        let req = Request::ResetNode {
            netkey_id: ctx.netkey_id,
            address: cache.address.raw(),
        };
        issue(cache, ctx, &req)
    }

    fn in_progress(
        &self,
        event: &Event,
        cache: &mut ConfigCache,
        _ctx: &mut StepCtx<'_>,
    ) -> StateResult {
        let Some(result) = status_of(event, StatusKind::Reset) else {
            return StateResult::Unspecified;
        };
        match settle(cache, result, self.retry_budget()) {
            Settle::Done => {
                cache.advance();
                StateResult::Success
            }
            Settle::Retry => StateResult::Success,
            Settle::Failed => StateResult::Event,
        }
    }
}
