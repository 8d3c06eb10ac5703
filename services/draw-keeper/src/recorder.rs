use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Order, StdResult, Storage};
use cw_storage_plus::{Bound, Item, Map};
use tracing::info;

use crate::collaborators::DrawRecorder;
use crate::error::CollaboratorError;
use crate::state::DrawResult;

pub const DRAWS: Map<u64, DrawRecord> = Map::new("draws");
pub const NEXT_DRAW_ID: Item<u64> = Item::new("next_draw_id");
/// (winner, draw_id) -> ()
pub const WINNER_DRAWS: Map<(&str, u64), ()> = Map::new("winner_draws");

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

#[cw_serde]
pub struct DrawRecord {
    pub id: u64,
    pub result: DrawResult,
}

/// Draw history kept in a key-value store, indexed by draw id and winner.
pub struct StorageRecorder<S> {
    storage: Mutex<S>,
}

impl<S: Storage> StorageRecorder<S> {
    pub fn new(storage: S) -> Self {
        StorageRecorder {
            storage: Mutex::new(storage),
        }
    }

    fn storage(&self) -> MutexGuard<'_, S> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, result: &DrawResult) -> StdResult<u64> {
        let mut storage = self.storage();
        let id = NEXT_DRAW_ID.may_load(&*storage)?.unwrap_or(1);

        DRAWS.save(
            &mut *storage,
            id,
            &DrawRecord {
                id,
                result: result.clone(),
            },
        )?;
        WINNER_DRAWS.save(&mut *storage, (&result.winner.winner.owner, id), &())?;
        NEXT_DRAW_ID.save(&mut *storage, &(id + 1))?;
        Ok(id)
    }

    pub fn draw(&self, id: u64) -> StdResult<Option<DrawRecord>> {
        DRAWS.may_load(&*self.storage(), id)
    }

    pub fn history(&self, start_after: Option<u64>, limit: Option<u32>) -> StdResult<Vec<DrawRecord>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
        let start = start_after.map(Bound::exclusive);
        let storage = self.storage();

        let draws = DRAWS
            .range(&*storage, start, None, Order::Ascending)
            .take(limit)
            .map(|item| item.map(|(_, record)| record))
            .collect::<StdResult<Vec<_>>>()?;
        Ok(draws)
    }

    /// Ids of the draws `owner` has won, oldest first.
    pub fn wins(
        &self,
        owner: &str,
        start_after: Option<u64>,
        limit: Option<u32>,
    ) -> StdResult<Vec<u64>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;
        let start = start_after.map(Bound::exclusive);
        let storage = self.storage();

        let ids = WINNER_DRAWS
            .prefix(owner)
            .range(&*storage, start, None, Order::Ascending)
            .take(limit)
            .map(|item| item.map(|(id, _)| id))
            .collect::<StdResult<Vec<_>>>()?;
        Ok(ids)
    }
}

#[async_trait]
impl<S: Storage + Send> DrawRecorder for StorageRecorder<S> {
    async fn save(&self, result: &DrawResult) -> Result<(), CollaboratorError> {
        let id = self.record(result)?;
        info!(draw_id = id, winner = %result.winner.winner.owner, "draw result recorded");
        Ok(())
    }
}
