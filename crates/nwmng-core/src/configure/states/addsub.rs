use nwmng_ncp::{Event, Request, ResultCode, StatusKind};
use tracing::{debug, warn};

use super::{proceed, status_of, target};
use crate::configure::{
    ConfigCache, ConfigState, Settle, StateKind, StateResult, StepCtx, issue, settle,
};

/// Subscribe every model of every element to each configured address.
///
/// The first address overwrites the model's subscription list, the rest
/// are appended to it.
pub(crate) struct AddSub;

impl ConfigState for AddSub {
    fn kind(&self) -> StateKind {
        StateKind::AddSub
    }

    fn guard(&self, cache: &ConfigCache) -> bool {
        !cache.config.subscriptions.is_empty() && cache.has_models()
    }

    fn step(&self, cache: &mut ConfigCache, ctx: &mut StepCtx<'_>) -> StateResult {
        let Some((element, model)) = target(cache) else {
            return StateResult::ToNext;
        };
        let Some(sub) = cache.config.subscriptions.get(cache.item).copied() else {
            return StateResult::ToNext;
        };
        debug!(
            node = %cache.address,
            element,
            vendor = model.vendor,
            model = model.model,
            sub = %sub,
            "add subscription"
        );
        let (netkey_id, address, sub_address) = (ctx.netkey_id, cache.address.raw(), sub.raw());
        let req = if cache.item == 0 {
            Request::SetModelSub {
                netkey_id,
                address,
                element,
                model,
                sub_address,
            }
        } else {
            Request::AddModelSub {
                netkey_id,
                address,
                element,
                model,
                sub_address,
            }
        };
        issue(cache, ctx, &req)
    }

    fn in_progress(
        &self,
        event: &Event,
        cache: &mut ConfigCache,
        ctx: &mut StepCtx<'_>,
    ) -> StateResult {
        let Some(result) = status_of(event, StatusKind::ModelSub) else {
            return StateResult::Unspecified;
        };
        let items = cache.config.subscriptions.len();
        match result {
            ResultCode::Success | ResultCode::NoFriendOffer => cache.clear_retry(),
            ResultCode::InsufficientResources => {
                // Subscription list full: move on to the next model.
                warn!(node = %cache.address, indices = ?cache.indices(), "subscription list full");
                cache.clear_retry();
                cache.item = items.saturating_sub(1);
            }
            other => match settle(cache, other, self.retry_budget()) {
                Settle::Done => {}
                Settle::Retry => return StateResult::Success,
                Settle::Failed => return StateResult::Event,
            },
        }
        let progress = cache.iterate(items);
        proceed(self, cache, ctx, progress)
    }
}
