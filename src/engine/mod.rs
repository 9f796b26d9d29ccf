mod conflict;
mod error;
mod mutations;
mod queries;
pub mod reconcile;
mod store;

pub use conflict::find_conflicts;
pub use error::EngineError;
pub use store::TimelineStore;

use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::policy::BlackoutPolicy;

pub type SharedTimeline = Arc<RwLock<EngineerTimeline>>;

/// Transactional wrapper around the pure reconciliation functions.
///
/// Every mutation locks the timelines it touches (ascending engineer id),
/// computes the new placement from a snapshot, then commits it in one go.
/// Nothing is written until every check has passed.
pub struct Engine {
    pub store: TimelineStore,
    pub notify: Arc<NotifyHub>,
    policy: BlackoutPolicy,
}

type TimelineGuard = OwnedRwLockWriteGuard<EngineerTimeline>;

impl Engine {
    pub fn new(policy: BlackoutPolicy, notify: Arc<NotifyHub>) -> Self {
        Self {
            store: TimelineStore::new(),
            notify,
            policy,
        }
    }

    pub fn policy(&self) -> &BlackoutPolicy {
        &self.policy
    }

    /// Acquire write locks for `engineer_ids` (sorted, deduplicated).
    pub(super) async fn lock_timelines(
        &self,
        engineer_ids: &[String],
    ) -> Result<Vec<TimelineGuard>, EngineError> {
        debug_assert!(engineer_ids.windows(2).all(|w| w[0] < w[1]));
        let mut guards = Vec::with_capacity(engineer_ids.len());
        for id in engineer_ids {
            let timeline = self
                .store
                .get_timeline(id)
                .ok_or_else(|| EngineError::UnknownEngineer(id.clone()))?;
            guards.push(timeline.write_owned().await);
        }
        Ok(guards)
    }

    /// Broadcast to every engineer a commit touched.
    pub(super) fn publish(&self, engineer_ids: &[String], event: &TimelineEvent) {
        for id in engineer_ids {
            self.notify.send(id, event);
        }
    }
}
