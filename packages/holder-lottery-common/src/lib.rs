pub mod error;
pub mod merkle;
pub mod selection;
pub mod tickets;
pub mod types;

pub use error::{SelectionError, TicketError};
pub use merkle::{compute_leaf_hash, verify_merkle_proof};
pub use selection::{randomness_from_bytes, select_winner, winning_ticket};
pub use tickets::{allocate_tickets, order_holders, DEFAULT_BALANCE_PER_TICKET};
pub use types::{BlockInfo, DrawPhase, Holder, Snapshot, SnapshotEntry, WinnerData};
