use cosmwasm_std::Timestamp;

use crate::error::KeeperError;

const SECONDS_PER_HOUR: u64 = 3_600;

/// Fixed grid of draw times: the given minute offsets of every UTC hour.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawSchedule {
    minutes: Vec<u32>,
}

impl DrawSchedule {
    pub fn new(minutes: &[u32]) -> Result<Self, KeeperError> {
        if minutes.is_empty() || minutes.iter().any(|m| *m >= 60) {
            return Err(KeeperError::InvalidConfig {
                reason: format!("invalid draw minute grid {minutes:?}"),
            });
        }
        let mut minutes = minutes.to_vec();
        minutes.sort_unstable();
        minutes.dedup();
        Ok(DrawSchedule { minutes })
    }

    pub fn minutes(&self) -> &[u32] {
        &self.minutes
    }

    /// First grid point strictly after `now`.
    ///
    /// Exactly on a boundary the following slot is returned, never `now` itself.
    pub fn next_after(&self, now: Timestamp) -> Timestamp {
        let hour_start = now.seconds() - now.seconds() % SECONDS_PER_HOUR;

        let candidate = self
            .minutes
            .iter()
            .map(|m| Timestamp::from_seconds(hour_start + u64::from(*m) * 60))
            .find(|slot| *slot > now);

        match candidate {
            Some(slot) => slot,
            None => Timestamp::from_seconds(
                hour_start + SECONDS_PER_HOUR + u64::from(self.minutes[0]) * 60,
            ),
        }
    }
}
