use cosmwasm_std::{Uint128, Uint256, Uint512};

use crate::error::SelectionError;
use crate::types::{Snapshot, WinnerData};

/// Read a 64-byte VRF output as a big-endian integer.
pub fn randomness_from_bytes(bytes: [u8; 64]) -> Uint512 {
    Uint512::from_be_bytes(bytes)
}

/// `randomness mod total_tickets`. Fails rather than divide by zero.
pub fn winning_ticket(randomness: Uint512, total_tickets: Uint128) -> Result<Uint128, SelectionError> {
    if total_tickets.is_zero() {
        return Err(SelectionError::IneligibleDraw);
    }
    let reduced = randomness
        .checked_rem(Uint512::from(total_tickets))
        .map_err(|_| SelectionError::IneligibleDraw)?;

    // reduced < total_tickets, so both narrowing steps always succeed
    let corrupt = || SelectionError::CorruptSnapshot {
        ticket: Uint128::MAX,
        total: total_tickets,
    };
    let reduced = Uint256::try_from(reduced).map_err(|_| corrupt())?;
    Uint128::try_from(reduced).map_err(|_| corrupt())
}

/// Map `randomness` to exactly one holder of the snapshot.
///
/// The snapshot is checked to partition `[0, total_tickets - 1]` first, so
/// a gap or an overlap anywhere in it is reported as corrupt rather than
/// resolved to whichever holder the search happens to hit. With the ranges
/// sorted and gapless, the owner is found by binary search on `ticket_end`.
pub fn select_winner(snapshot: &Snapshot, randomness: Uint512) -> Result<WinnerData, SelectionError> {
    if snapshot.holders.is_empty() {
        return Err(SelectionError::IneligibleDraw);
    }
    let ticket = winning_ticket(randomness, snapshot.total_tickets)?;
    let corrupt = || SelectionError::CorruptSnapshot {
        ticket,
        total: snapshot.total_tickets,
    };

    snapshot.validate().map_err(|_| corrupt())?;

    let index = snapshot
        .holders
        .partition_point(|entry| entry.ticket_end < ticket);

    let winner = snapshot
        .holders
        .get(index)
        .filter(|entry| entry.contains(ticket))
        .ok_or_else(corrupt)?;

    Ok(WinnerData {
        winner: winner.clone(),
        winning_ticket: ticket,
    })
}
