//! In-memory `Notifier` test double — records every call instead of
//! touching a broker or HTTP endpoint.

use super::Notifier;
use crate::domain::RankChange;
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryNotifier {
    published: Mutex<Vec<RankChange>>,
    purged: Mutex<Vec<Vec<String>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<RankChange> {
        self.published.lock().await.clone()
    }

    pub async fn purged(&self) -> Vec<Vec<String>> {
        self.purged.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn publish_rank_change(&self, change: &RankChange) {
        self.published.lock().await.push(change.clone());
    }

    async fn purge_cache(&self, paths: &[String]) -> bool {
        self.purged.lock().await.push(paths.to_vec());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_published_rank_changes() {
        let notifier = InMemoryNotifier::new();
        let change = RankChange {
            game_mode: 1,
            player_id: "p1".into(),
            old_rank: None,
            new_rank: 1,
            score: 100,
            timestamp: "2024-06-01T00:00:00Z".into(),
        };
        notifier.publish_rank_change(&change).await;
        assert_eq!(notifier.published().await.len(), 1);
    }

    #[tokio::test]
    async fn records_purge_requests() {
        let notifier = InMemoryNotifier::new();
        assert!(notifier.purge_cache(&["/x".to_owned()]).await);
        assert_eq!(notifier.purged().await, vec![vec!["/x".to_owned()]]);
    }
}
