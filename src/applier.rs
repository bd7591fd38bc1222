//! Leaderboard Applier (C5, §4.5): the six per-event store operations,
//! expressed as queued pipeline ops rather than direct calls so the
//! dispatcher can run one event alone (hot-group path) or many events as
//! a single round trip (singleton path) with the same code.

use crate::domain::{IsoWeekId, Scope, ScoreEvent};
use crate::store::{leaderboard_key, PipelineBuilder};
use chrono::{DateTime, Utc};
use log::warn;

const DAILY_TTL_SECONDS: i64 = 7 * 24 * 3600;
const WEEKLY_TTL_SECONDS: i64 = 28 * 24 * 3600;

/// Queues event's effects onto `pipeline`. `now` is the processing
/// instant (§4.5 — always processing time, never `event.timestamp`).
pub fn queue(pipeline: &mut PipelineBuilder, event: &ScoreEvent, now: DateTime<Utc>) {
    let today = now.date_naive();

    pipeline.upsert_player_if_missing(&event.player_id, &event.username, now.to_rfc3339());
    pipeline.set_username(&event.player_id, &event.username);

    pipeline.z_incr_by(
        leaderboard_key(event.game_mode, &Scope::Global),
        &event.player_id,
        event.score,
    );

    let daily_key = leaderboard_key(event.game_mode, &Scope::Daily(today));
    pipeline.z_incr_by(&daily_key, &event.player_id, event.score);
    pipeline.expire(&daily_key, DAILY_TTL_SECONDS);

    if event.score > 0 {
        let weekly_key = leaderboard_key(event.game_mode, &Scope::Weekly(IsoWeekId::of(today)));
        pipeline.z_incr_by(&weekly_key, &event.player_id, event.score);
        pipeline.expire(&weekly_key, WEEKLY_TTL_SECONDS);
    } else {
        warn!(
            "skipping weekly update for player {} / game mode {}: non-positive score {}",
            event.player_id, event.game_mode, event.score
        );
    }

    pipeline.inc_player_stats(&event.player_id, event.score);
}
