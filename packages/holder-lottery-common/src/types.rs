use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Decimal256, Timestamp, Uint128, Uint256};

use crate::error::TicketError;

/// Lifecycle phase of the draw keeper.
#[cw_serde]
pub enum DrawPhase {
    Waiting,
    Executing,
    Announcing,
}

/// A token holder as captured from the ledger.
#[cw_serde]
pub struct Holder {
    pub owner: String,
    /// On-ledger amount in base units
    pub raw_balance: Uint256,
    /// `raw_balance / 10^decimals`
    pub balance: Decimal256,
}

impl Holder {
    pub fn from_raw(
        owner: impl Into<String>,
        raw_balance: Uint256,
        decimals: u32,
    ) -> Result<Self, TicketError> {
        let balance = Decimal256::from_atomics(raw_balance, decimals)
            .map_err(|_| TicketError::DecimalRange { decimals })?;
        Ok(Holder {
            owner: owner.into(),
            raw_balance,
            balance,
        })
    }
}

/// Ledger block the holder list was read at.
#[cw_serde]
pub struct BlockInfo {
    pub slot: u64,
    pub blockhash: String,
    pub block_time: Option<Timestamp>,
}

/// A holder with its allocated ticket range. Both ends are inclusive.
#[cw_serde]
pub struct SnapshotEntry {
    pub owner: String,
    pub raw_balance: Uint256,
    pub balance: Decimal256,
    pub tickets: Uint128,
    pub ticket_start: Uint128,
    pub ticket_end: Uint128,
}

impl SnapshotEntry {
    pub fn contains(&self, ticket: Uint128) -> bool {
        self.ticket_start <= ticket && ticket <= self.ticket_end
    }
}

/// Point-in-time capture of eligible holders and their ticket ranges.
#[cw_serde]
pub struct Snapshot {
    pub holders: Vec<SnapshotEntry>,
    pub total_tickets: Uint128,
    pub block: BlockInfo,
}

/// The winning holder and the ticket that selected it.
#[cw_serde]
pub struct WinnerData {
    pub winner: SnapshotEntry,
    pub winning_ticket: Uint128,
}
