//! Recovery Detector (C4, §4.4): the startup replay decision plus the
//! runtime state that tracks when replay has caught up to the tail.

use crate::domain::{GameModeId, Scope};
use crate::error::EngineResult;
use crate::store::{leaderboard_key, StoreGateway};
use log::warn;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// `true` iff no known game mode's global leaderboard has a member and no
/// player records exist. Errors fail safe to `true` (§4.4) — see DESIGN.md
/// open question 3 for why this is kept rather than failing startup.
pub async fn needs_replay(store: &dyn StoreGateway, known_game_modes: &[GameModeId]) -> bool {
    match needs_replay_checked(store, known_game_modes).await {
        Ok(result) => result,
        Err(err) => {
            warn!("needsReplay check failed, failing safe to replay: {err}");
            true
        }
    }
}

async fn needs_replay_checked(store: &dyn StoreGateway, known_game_modes: &[GameModeId]) -> EngineResult<bool> {
    for mode in known_game_modes {
        let key = leaderboard_key(*mode, &Scope::Global);
        if store.z_card(&key).await? > 0 {
            return Ok(false);
        }
    }
    let keys = store.scan_keys("player:*").await?;
    let has_players = keys.iter().any(|key| is_player_record_key(key));
    Ok(!has_players)
}

/// `player:{id}` is a record; `player:{id}:last_submission` is the
/// intake rate-limiter's bookkeeping key and must not count (§6).
fn is_player_record_key(key: &str) -> bool {
    key.starts_with("player:") && key.matches(':').count() == 1
}

/// Runtime replay/tailing state (§4.4, §5, §9 Design Note 1 and 4).
///
/// The consume loop is the sole writer of `empty_batch_count`; the idle
/// watcher only ever flips `is_replaying` from true to false, via CAS, so
/// the two tasks never race on the same write.
pub struct ReplayState {
    is_replaying: AtomicBool,
    empty_batch_count: AtomicU32,
    last_batch_time: Mutex<Instant>,
}

impl ReplayState {
    pub fn new(is_replaying: bool) -> Self {
        Self {
            is_replaying: AtomicBool::new(is_replaying),
            empty_batch_count: AtomicU32::new(0),
            last_batch_time: Mutex::new(Instant::now()),
        }
    }

    pub fn is_replaying(&self) -> bool {
        self.is_replaying.load(Ordering::SeqCst)
    }

    /// Called by the consume loop after validating one batch. Updates the
    /// idle clock unconditionally and, while still replaying, advances or
    /// resets the empty-batch counter, ending replay once `threshold` is
    /// reached.
    pub async fn record_batch(&self, had_valid_events: bool, empty_batch_threshold: u32) {
        *self.last_batch_time.lock().await = Instant::now();
        if !self.is_replaying() {
            return;
        }
        if had_valid_events {
            self.empty_batch_count.store(0, Ordering::SeqCst);
            return;
        }
        let count = self.empty_batch_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= empty_batch_threshold {
            self.end_replay();
        }
    }

    /// Flips replaying to tailing exactly once; a second call is a no-op.
    pub fn end_replay(&self) {
        let _ = self
            .is_replaying
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_batch_time.lock().await.elapsed()
    }
}
