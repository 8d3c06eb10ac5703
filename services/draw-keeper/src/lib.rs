pub mod collaborators;
pub mod error;
pub mod execute;
pub mod fees;
pub mod keeper;
pub mod msg;
pub mod query;
pub mod recorder;
pub mod retry;
pub mod schedule;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::error::{CollaboratorError, KeeperError};
pub use crate::keeper::{DrawKeeper, TickOutcome};
pub use crate::msg::{FeeMode, KeeperConfig};
pub use crate::query::{FeesResponse, StatusMessage, StatusResponse};
pub use crate::recorder::StorageRecorder;
pub use crate::state::{DrawResult, DrawState};
