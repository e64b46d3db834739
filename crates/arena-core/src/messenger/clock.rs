//! Per-battle cumulative response time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::domain::BattleId;

/// Cumulative opponent time keyed by battle.
///
/// Cloning yields another handle to the same store. Each battle's counter is
/// only touched through its own key, so time spent in one battle never shows
/// up in another.
#[derive(Debug, Clone, Default)]
pub struct TimingLedger {
    totals: Arc<Mutex<HashMap<BattleId, Duration>>>,
}

impl TimingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `elapsed` to the battle's counter and return the new total.
    pub fn record(&self, battle_id: &BattleId, elapsed: Duration) -> Duration {
        let mut totals = self.lock();
        let total = totals.entry(battle_id.clone()).or_default();
        *total += elapsed;
        *total
    }

    pub fn cumulative(&self, battle_id: &BattleId) -> Duration {
        self.lock().get(battle_id).copied().unwrap_or_default()
    }

    pub fn reset(&self, battle_id: &BattleId) {
        self.lock().insert(battle_id.clone(), Duration::ZERO);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BattleId, Duration>> {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
