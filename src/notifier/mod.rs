//! Notifier (C3, §4.3): publishes rank-change events and invalidates the
//! CDN's top-100 views. Neither path is allowed to fail the event that
//! triggered it — both are logged-only on error.

mod kafka_notifier;
pub mod memory;

pub use kafka_notifier::KafkaNotifier;

use crate::domain::{GameModeId, RankChange};
use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish_rank_change(&self, change: &RankChange);

    /// `false` covers both "unconfigured" and "attempted and failed" —
    /// callers only use this for logging, never to gate other work.
    async fn purge_cache(&self, paths: &[String]) -> bool;
}

/// Whether a rank transition should trigger a cache purge (§4.3 policy).
/// A null previous rank does not count as crossing — only a *known* rank
/// inside the top 100 does.
pub fn crosses_top_100(old_rank: Option<u64>, new_rank: u64) -> bool {
    old_rank.is_some_and(|rank| rank <= 100) || new_rank <= 100
}

/// The three canonical top-100 read paths purged for a game mode (§6).
pub fn top_100_paths(game_mode: GameModeId) -> [String; 3] {
    [
        format!("/api/leaderboard/{game_mode}/top100"),
        format!("/api/leaderboard/{game_mode}?limit=100&offset=0"),
        format!("/api/leaderboard/{game_mode}?type=global&limit=100&offset=0"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crosses_top_100_when_either_side_is_within_range() {
        assert!(crosses_top_100(None, 1));
        assert!(crosses_top_100(Some(100), 150));
        assert!(crosses_top_100(Some(150), 100));
        assert!(!crosses_top_100(Some(150), 151));
    }

    #[test]
    fn a_null_previous_rank_does_not_count_as_crossing() {
        assert!(!crosses_top_100(None, 50_000));
    }

    #[test]
    fn top_100_paths_match_spec_layout() {
        let paths = top_100_paths(7);
        assert_eq!(paths[0], "/api/leaderboard/7/top100");
        assert_eq!(paths[1], "/api/leaderboard/7?limit=100&offset=0");
        assert_eq!(paths[2], "/api/leaderboard/7?type=global&limit=100&offset=0");
    }
}
