use nwmng_ncp::{Event, Request};
use tracing::{debug, warn};

use crate::configure::{
    ConfigCache, ConfigState, NO_RESULT, Settle, StateKind, StateResult, StepCtx, issue, settle,
};
use crate::error::ErrorCategory;
use crate::model::Dcd;

/// Fetch composition data page 0, which drives every matrix state.
pub(crate) struct GetDcd;

impl ConfigState for GetDcd {
    fn kind(&self) -> StateKind {
        StateKind::GetDcd
    }

    fn guard(&self, cache: &ConfigCache) -> bool {
        cache.dcd.is_none()
    }

    fn step(&self, cache: &mut ConfigCache, ctx: &mut StepCtx<'_>) -> StateResult {
        cache.dcd_buf.clear();
        debug!(node = %cache.address, "get composition data");
        let req = Request::GetDcd {
            netkey_id: ctx.netkey_id,
            address: cache.address.raw(),
            page: 0,
        };
        issue(cache, ctx, &req)
    }

    fn in_progress(
        &self,
        event: &Event,
        cache: &mut ConfigCache,
        _ctx: &mut StepCtx<'_>,
    ) -> StateResult {
        match event {
            Event::DcdData { data, .. } => {
                cache.dcd_buf.extend_from_slice(data);
                StateResult::Success
            }
            Event::DcdDataEnd { result, .. } => {
                let result = *result;
                match settle(cache, result, self.retry_budget()) {
                    Settle::Done => {}
                    Settle::Retry => return StateResult::Success,
                    Settle::Failed => return StateResult::Event,
                }
                match Dcd::decode(&cache.dcd_buf) {
                    Ok(dcd) => {
                        debug!(
                            node = %cache.address,
                            cid = dcd.cid,
                            elements = dcd.element_count(),
                            "composition data received"
                        );
                        cache.dcd = Some(dcd);
                        cache.dcd_buf.clear();
                        cache.advance();
                        StateResult::Success
                    }
                    Err(e) => {
                        warn!(node = %cache.address, error = %e, "undecodable composition data");
                        cache.fail(NO_RESULT, ErrorCategory::Internal);
                        StateResult::Event
                    }
                }
            }
            _ => StateResult::Unspecified,
        }
    }
}
