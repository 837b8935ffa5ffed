use nwmng_ncp::{Event, Request, StatusKind};
use tracing::debug;

use super::status_of;
use crate::configure::{
    ConfigCache, ConfigState, Settle, StateKind, StateResult, StepCtx, issue, settle,
};

/// A node-wide setting applied with one request.
pub(crate) struct Single {
    kind: StateKind,
    status: StatusKind,
}

pub(crate) static SET_TTL: Single = Single {
    kind: StateKind::SetTtl,
    status: StatusKind::DefaultTtl,
};

pub(crate) static SET_SNB: Single = Single {
    kind: StateKind::SetSnb,
    status: StatusKind::Beacon,
};

pub(crate) static SET_RELAY: Single = Single {
    kind: StateKind::SetRelay,
    status: StatusKind::Relay,
};

pub(crate) static SET_NET_TX: Single = Single {
    kind: StateKind::SetNetTx,
    status: StatusKind::NetTx,
};

impl Single {
    fn request(&self, cache: &ConfigCache, netkey_id: u16) -> Option<Request> {
        let address = cache.address.raw();
        let cfg = &cache.config;
        match self.kind {
            StateKind::SetTtl => cfg.ttl.map(|ttl| Request::SetDefaultTtl {
                netkey_id,
                address,
                ttl,
            }),
            StateKind::SetSnb => cfg.secure_beacon.map(|enabled| Request::SetBeacon {
                netkey_id,
                address,
                enabled,
            }),
            StateKind::SetRelay => cfg.relay.map(|relay| Request::SetRelay {
                netkey_id,
                address,
                enabled: relay.enabled,
                tx: relay.tx,
            }),
            StateKind::SetNetTx => cfg.net_tx.map(|tx| Request::SetNodeNetTx {
                netkey_id,
                address,
                tx,
            }),
            _ => None,
        }
    }
}

impl ConfigState for Single {
    fn kind(&self) -> StateKind {
        self.kind
    }

    fn guard(&self, cache: &ConfigCache) -> bool {
        self.request(cache, 0).is_some()
    }

    fn step(&self, cache: &mut ConfigCache, ctx: &mut StepCtx<'_>) -> StateResult {
        let Some(req) = self.request(cache, ctx.netkey_id) else {
            return StateResult::ToNext;
        };
        debug!(node = %cache.address, state = %self.kind, "{}", req.name());
        issue(cache, ctx, &req)
    }

    fn in_progress(
        &self,
        event: &Event,
        cache: &mut ConfigCache,
        _ctx: &mut StepCtx<'_>,
    ) -> StateResult {
        let Some(result) = status_of(event, self.status) else {
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
