use crate::limits::MAX_LOCK_RETRIES;
use crate::model::*;

use super::conflict::find_conflicts;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_engineer(&self, engineer_id: &str) -> Option<Engineer> {
        let timeline = self.store.get_timeline(engineer_id)?;
        let guard = timeline.read().await;
        Some(guard.engineer.clone())
    }

    /// All engineers, ordered by id.
    pub async fn list_engineers(&self) -> Vec<Engineer> {
        let mut out = Vec::with_capacity(self.store.engineer_count());
        for timeline in self.store.timelines() {
            out.push(timeline.read().await.engineer.clone());
        }
        out
    }

    /// Look a task up through the index. A task caught mid-relocation is
    /// missing from the timeline the index named; re-read the index and retry.
    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        let mut home = self.store.locate_task(task_id)?;
        for _ in 0..MAX_LOCK_RETRIES {
            let found = match &home {
                Some(engineer_id) => {
                    let timeline = self.store.get_timeline(engineer_id)?;
                    let guard = timeline.read().await;
                    guard.get_task(task_id).cloned()
                }
                None => self.store.unassigned().lock().await.get(task_id).cloned(),
            };
            if found.is_some() {
                return found;
            }
            home = self.store.locate_task(task_id)?;
        }
        None
    }

    /// One engineer's tasks sorted by start.
    pub async fn tasks_for_engineer(&self, engineer_id: &str) -> Result<Vec<Task>, EngineError> {
        let timeline = self
            .store
            .get_timeline(engineer_id)
            .ok_or_else(|| EngineError::UnknownEngineer(engineer_id.to_string()))?;
        let guard = timeline.read().await;
        Ok(guard.tasks.clone())
    }

    pub async fn timeline_version(&self, engineer_id: &str) -> Result<u64, EngineError> {
        let timeline = self
            .store
            .get_timeline(engineer_id)
            .ok_or_else(|| EngineError::UnknownEngineer(engineer_id.to_string()))?;
        let version = timeline.read().await.version;
        Ok(version)
    }

    /// Pool tasks ordered by start, then id.
    pub async fn unassigned_tasks(&self) -> Vec<Task> {
        let pool = self.store.unassigned().lock().await;
        let mut tasks: Vec<Task> = pool.values().cloned().collect();
        drop(pool);
        tasks.sort_by(|a, b| a.span.start.cmp(&b.span.start).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Every task: engineers in id order, then the pool.
    ///
    /// Read locks are taken in the same order mutations take write locks, so
    /// the result is one consistent snapshot and a moving task shows up once.
    pub async fn all_tasks(&self) -> Vec<Task> {
        let timelines = self.store.timelines();
        let mut guards = Vec::with_capacity(timelines.len());
        for timeline in &timelines {
            guards.push(timeline.read().await);
        }
        let pool = self.store.unassigned().lock().await;

        let mut out = Vec::with_capacity(self.store.task_count());
        for guard in &guards {
            out.extend(guard.tasks.iter().cloned());
        }
        let mut unassigned: Vec<Task> = pool.values().cloned().collect();
        drop(pool);
        drop(guards);
        unassigned.sort_by(|a, b| a.span.start.cmp(&b.span.start).then_with(|| a.id.cmp(&b.id)));
        out.extend(unassigned);
        out
    }

    /// Audit an engineer's committed schedule. Empty unless something bypassed
    /// reconciliation (e.g. a bulk load of an already conflicting schedule).
    pub async fn conflicts(&self, engineer_id: &str) -> Result<Vec<Conflict>, EngineError> {
        let timeline = self
            .store
            .get_timeline(engineer_id)
            .ok_or_else(|| EngineError::UnknownEngineer(engineer_id.to_string()))?;
        let guard = timeline.read().await;
        Ok(find_conflicts(&guard.tasks, self.policy()))
    }
}
