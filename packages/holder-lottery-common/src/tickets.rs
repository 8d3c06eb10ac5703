use std::cmp::Ordering;

use cosmwasm_std::{Decimal256, Uint128};

use crate::error::TicketError;
use crate::types::{BlockInfo, Holder, Snapshot, SnapshotEntry};

/// Default human-scale balance that buys one ticket.
pub const DEFAULT_BALANCE_PER_TICKET: u128 = 10_000;

/// Allocation order: raw balance descending, then owner ascending.
///
/// The comparison is on `raw_balance`, never on the derived decimal balance,
/// so two snapshots of the same ledger state always allocate identically.
pub fn allocation_order(a: &Holder, b: &Holder) -> Ordering {
    b.raw_balance
        .cmp(&a.raw_balance)
        .then_with(|| a.owner.cmp(&b.owner))
}

/// Sort holders into allocation order. The highest raw balance owns ticket 0.
pub fn order_holders(holders: &mut [Holder]) {
    holders.sort_by(allocation_order);
}

/// `floor(balance / balance_per_ticket)`
pub fn tickets_for(holder: &Holder, balance_per_ticket: Uint128) -> Result<Uint128, TicketError> {
    if balance_per_ticket.is_zero() {
        return Err(TicketError::ZeroBalancePerTicket);
    }
    let divisor = Decimal256::from_atomics(balance_per_ticket, 0)
        .map_err(|_| TicketError::DecimalRange { decimals: 0 })?;
    let tickets = holder
        .balance
        .checked_div(divisor)
        .map_err(|_| TicketError::Overflow {
            owner: holder.owner.clone(),
        })?
        .to_uint_floor();
    Uint128::try_from(tickets).map_err(|_| TicketError::Overflow {
        owner: holder.owner.clone(),
    })
}

/// Convert holders into contiguous, inclusive ticket ranges.
///
/// Holders are allocated in the order given; callers wanting reproducible
/// snapshots sort with [`order_holders`] first. Holders worth zero tickets
/// are left out entirely. An empty result has `total_tickets == 0`.
pub fn allocate_tickets(
    holders: &[Holder],
    balance_per_ticket: Uint128,
    block: BlockInfo,
) -> Result<Snapshot, TicketError> {
    if balance_per_ticket.is_zero() {
        return Err(TicketError::ZeroBalancePerTicket);
    }

    let mut cursor = Uint128::zero();
    let mut entries = Vec::with_capacity(holders.len());

    for holder in holders {
        let tickets = tickets_for(holder, balance_per_ticket)?;
        if tickets.is_zero() {
            continue;
        }

        let next = cursor
            .checked_add(tickets)
            .map_err(|_| TicketError::Overflow {
                owner: holder.owner.clone(),
            })?;

        entries.push(SnapshotEntry {
            owner: holder.owner.clone(),
            raw_balance: holder.raw_balance,
            balance: holder.balance,
            tickets,
            ticket_start: cursor,
            // next >= cursor + 1, so this cannot underflow
            ticket_end: next - Uint128::one(),
        });
        cursor = next;
    }

    Ok(Snapshot {
        holders: entries,
        total_tickets: cursor,
        block,
    })
}

impl Snapshot {
    /// Check that the ranges partition `[0, total_tickets - 1]` in order.
    pub fn validate(&self) -> Result<(), TicketError> {
        let mut expected_start = Uint128::zero();
        for entry in &self.holders {
            let broken = || TicketError::BrokenRange {
                owner: entry.owner.clone(),
            };
            if entry.tickets.is_zero() || entry.ticket_start != expected_start {
                return Err(broken());
            }
            let span = entry
                .ticket_end
                .checked_sub(entry.ticket_start)
                .map_err(|_| broken())?;
            if span + Uint128::one() != entry.tickets {
                return Err(broken());
            }
            expected_start = entry.ticket_end + Uint128::one();
        }
        if expected_start != self.total_tickets {
            return Err(TicketError::BrokenRange {
                owner: "<total>".to_string(),
            });
        }
        Ok(())
    }
}
