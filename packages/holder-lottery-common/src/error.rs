use cosmwasm_std::Uint128;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TicketError {
    #[error("balance per ticket must be greater than zero")]
    ZeroBalancePerTicket,

    #[error("ticket count overflow while allocating {owner}")]
    Overflow { owner: String },

    #[error("balance does not fit a decimal with {decimals} places")]
    DecimalRange { decimals: u32 },

    #[error("snapshot ranges are not contiguous at {owner}")]
    BrokenRange { owner: String },
}

#[derive(Error, Debug, PartialEq)]
pub enum SelectionError {
    #[error("ineligible draw: no holders qualified for a ticket")]
    IneligibleDraw,

    #[error("corrupt snapshot: no holder owns ticket {ticket} of {total}")]
    CorruptSnapshot { ticket: Uint128, total: Uint128 },
}
