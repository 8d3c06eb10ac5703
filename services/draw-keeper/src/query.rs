use std::sync::Arc;

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{StdError, StdResult, Timestamp, Uint128};
use holder_lottery_common::DrawPhase;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collaborators::Broadcaster;
use crate::state::{DrawResult, DrawState};

/// What the status endpoint and push channel expose.
#[cw_serde]
pub struct StatusResponse {
    pub current_state: DrawPhase,
    pub next_draw_time: Timestamp,
    pub last_draw_result: Option<DrawResult>,
}

/// Unclaimed creator fees as last read from the fee source.
#[cw_serde]
pub struct FeesResponse {
    pub base_fee: Uint128,
    pub quote_fee: Uint128,
    /// `None` until the first successful read
    pub updated_at: Option<Timestamp>,
}

impl FeesResponse {
    pub fn unknown() -> Self {
        FeesResponse {
            base_fee: Uint128::zero(),
            quote_fee: Uint128::zero(),
            updated_at: None,
        }
    }
}

/// Push message envelope: `{"type":"drawStatusUpdate","data":{...}}` or
/// `{"type":"feesUpdate","data":{...}}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StatusMessage {
    DrawStatusUpdate(StatusResponse),
    FeesUpdate(FeesResponse),
}

impl StatusMessage {
    pub fn to_json(&self) -> StdResult<String> {
        serde_json::to_string(self).map_err(|e| StdError::generic_err(e.to_string()))
    }
}

/// Status view of `state` with at most `holder_limit` snapshot holders.
///
/// Totals, block info and the winner are left intact; only the holder list
/// is cut, since it can run to many thousands of entries.
pub fn query_status(state: &DrawState, holder_limit: u32) -> StatusResponse {
    let last_draw_result = state.last_draw_result.as_ref().map(|result| {
        let mut result = result.clone();
        result.snapshot.holders.truncate(holder_limit as usize);
        result
    });

    StatusResponse {
        current_state: state.phase.clone(),
        next_draw_time: state.next_draw_time,
        last_draw_result,
    }
}

/// Forward every state change to `broadcaster` until the channel closes.
///
/// Runs on its own task, so a slow broadcaster only makes this relay lag;
/// lagged updates are skipped, never replayed.
pub fn spawn_relay(
    mut updates: broadcast::Receiver<DrawState>,
    broadcaster: Arc<dyn Broadcaster>,
    holder_limit: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(state) => {
                    let message = StatusMessage::DrawStatusUpdate(query_status(&state, holder_limit));
                    broadcaster.notify(&message);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status relay lagging, dropped updates");
                }
                Err(RecvError::Closed) => {
                    debug!("status channel closed, relay stopping");
                    break;
                }
            }
        }
    })
}
