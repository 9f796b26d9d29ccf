use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{validate_span, validate_task};
use super::reconcile;
use super::{Engine, EngineError};

impl Engine {
    pub fn register_engineer(&self, engineer: Engineer) -> Result<(), EngineError> {
        if engineer.id.is_empty() || engineer.id.len() > MAX_ID_LEN {
            return Err(EngineError::LimitExceeded("engineer id length"));
        }
        if self.store.engineer_count() >= MAX_ENGINEERS {
            return Err(EngineError::LimitExceeded("too many engineers"));
        }
        let id = engineer.id.clone();
        if !self.store.insert_timeline(engineer) {
            return Err(EngineError::AlreadyExists(id));
        }
        metrics::gauge!(observability::ENGINEERS_ACTIVE).set(self.store.engineer_count() as f64);
        self.publish(
            std::slice::from_ref(&id),
            &TimelineEvent::EngineerRegistered { engineer_id: id.clone() },
        );
        debug!(engineer = %id, "engineer registered");
        Ok(())
    }

    /// Add `task` to `engineer_id` and re-pack that engineer's day priority first.
    pub async fn insert(&self, engineer_id: &str, mut task: Task) -> Result<ReshuffleResult, EngineError> {
        validate_task(&task, self.policy())?;
        let ids = [engineer_id.to_string()];
        let mut guards = self.lock_timelines(&ids).await?;
        let timeline = &mut guards[0];
        if timeline.tasks.len() >= MAX_TASKS_PER_ENGINEER {
            return Err(EngineError::LimitExceeded("too many tasks on engineer"));
        }

        task.engineer_id = Some(engineer_id.to_string());
        let task_id = task.id.clone();
        let plan = reconcile::reshuffle(timeline.tasks.clone(), task, self.policy());

        // Last check before writing: the id must be new to the whole store.
        if !self.store.claim_task(&task_id, Some(engineer_id.to_string())) {
            return Err(EngineError::AlreadyExists(task_id));
        }
        self.store.commit(timeline, plan.tasks);
        let version = timeline.version;
        let tasks = timeline.tasks.clone();
        drop(guards);

        metrics::counter!(observability::TASKS_INSERTED_TOTAL).increment(1);
        metrics::counter!(observability::TASKS_SHIFTED_TOTAL).increment(plan.shifted.len() as u64);
        debug!(
            engineer = %engineer_id,
            task = %task_id,
            shifted = plan.shifted.len(),
            version,
            "task inserted"
        );
        self.publish(
            &ids,
            &TimelineEvent::TaskInserted {
                engineer_id: engineer_id.to_string(),
                task_id,
                version,
                shifted: plan.shifted.clone(),
            },
        );

        Ok(ReshuffleResult {
            engineer_id: engineer_id.to_string(),
            version,
            tasks,
            shifted: plan.shifted,
        })
    }

    /// Move a task to a new span (and optionally a new engineer), pushing
    /// displaced tasks of both engineers later.
    pub async fn relocate(&self, request: RelocationRequest) -> Result<RelocationResult, EngineError> {
        validate_span(&request.span, self.policy())?;
        if let Some(target) = &request.engineer_id
            && !self.store.contains_engineer(target)
        {
            return Err(EngineError::UnknownEngineer(target.clone()));
        }

        for _ in 0..MAX_LOCK_RETRIES {
            let home = self
                .store
                .locate_task(&request.task_id)
                .ok_or_else(|| EngineError::NotFound(request.task_id.clone()))?;

            let mut engineer_ids: Vec<String> = home
                .iter()
                .chain(request.engineer_id.iter())
                .cloned()
                .collect();
            engineer_ids.sort();
            engineer_ids.dedup();

            let mut guards = self.lock_timelines(&engineer_ids).await?;
            let mut pool = match home {
                None => Some(self.store.unassigned().lock().await),
                Some(_) => None,
            };

            // The index is read without locks; confirm the task is still where it said.
            let current = match &home {
                Some(eid) => guards
                    .iter()
                    .find(|g| &g.engineer.id == eid)
                    .and_then(|g| g.get_task(&request.task_id))
                    .cloned(),
                None => pool.as_ref().and_then(|p| p.get(&request.task_id).cloned()),
            };
            let Some(task) = current else {
                debug!(task = %request.task_id, "task moved while locking, retrying");
                continue;
            };

            if let Some(target) = &request.engineer_id
                && home.as_ref() != Some(target)
                && guards
                    .iter()
                    .any(|g| &g.engineer.id == target && g.tasks.len() >= MAX_TASKS_PER_ENGINEER)
            {
                return Err(EngineError::LimitExceeded("too many tasks on engineer"));
            }

            let affected: Vec<Task> = guards
                .iter()
                .flat_map(|g| g.tasks.iter())
                .filter(|t| t.id != task.id)
                .cloned()
                .collect();
            let plan = reconcile::relocate(task, &request, affected, self.policy());

            let moved: HashMap<&str, &Task> = plan.shifted.iter().map(|t| (t.id.as_str(), t)).collect();
            for guard in guards.iter_mut() {
                let owns_task = plan.task.engineer_id.as_deref() == Some(guard.engineer.id.as_str());
                let mut tasks: Vec<Task> = guard
                    .tasks
                    .iter()
                    .filter(|t| t.id != plan.task.id)
                    .map(|t| moved.get(t.id.as_str()).map_or_else(|| t.clone(), |m| (*m).clone()))
                    .collect();
                if owns_task {
                    tasks.push(plan.task.clone());
                }
                self.store.commit(guard, tasks);
            }
            if let Some(pool) = pool.as_mut()
                && plan.task.engineer_id.is_some()
            {
                pool.remove(&plan.task.id);
            }
            if plan.task.engineer_id.is_none()
                && let Some(pool) = pool.as_mut()
            {
                pool.insert(plan.task.id.clone(), plan.task.clone());
            }
            drop(pool);
            drop(guards);

            metrics::counter!(observability::RELOCATIONS_TOTAL).increment(1);
            metrics::counter!(observability::TASKS_SHIFTED_TOTAL).increment(plan.shifted.len() as u64);
            debug!(
                task = %plan.task.id,
                from = ?home,
                to = ?plan.task.engineer_id,
                shifted = plan.shifted.len(),
                "task relocated"
            );
            let event = TimelineEvent::TaskRelocated {
                task_id: plan.task.id.clone(),
                from_engineer: home.clone(),
                to_engineer: plan.task.engineer_id.clone(),
                shifted: plan.shifted.iter().map(|t| t.id.clone()).collect(),
            };
            self.publish(&engineer_ids, &event);
            if home.is_none() || plan.task.engineer_id.is_none() {
                self.notify.send_unassigned(&event);
            }

            return Ok(RelocationResult {
                task: plan.task,
                shifted: plan.shifted,
            });
        }
        Err(EngineError::LimitExceeded("task kept moving while locking"))
    }

    /// Park a task in the unassigned pool. No reconciliation happens until it
    /// is relocated onto an engineer.
    pub async fn put_unassigned(&self, mut task: Task) -> Result<(), EngineError> {
        validate_task(&task, self.policy())?;
        task.engineer_id = None;
        let mut pool = self.store.unassigned().lock().await;
        if pool.len() >= MAX_UNASSIGNED_TASKS {
            return Err(EngineError::LimitExceeded("too many unassigned tasks"));
        }
        if !self.store.claim_task(&task.id, None) {
            return Err(EngineError::AlreadyExists(task.id));
        }
        debug!(task = %task.id, "task parked unassigned");
        let event = TimelineEvent::TaskParked { task_id: task.id.clone() };
        pool.insert(task.id.clone(), task);
        drop(pool);
        self.notify.send_unassigned(&event);
        Ok(())
    }

    /// Delete a task. The engine never does this on its own; it exists for
    /// callers that cancel work.
    pub async fn remove_task(&self, task_id: &str) -> Result<Task, EngineError> {
        for _ in 0..MAX_LOCK_RETRIES {
            let home = self
                .store
                .locate_task(task_id)
                .ok_or_else(|| EngineError::NotFound(task_id.to_string()))?;
            // Unmap while still holding the lock so no reader or relocation sees
            // an indexed task that is already gone.
            let removed = match &home {
                Some(eid) => {
                    let mut guards = self.lock_timelines(std::slice::from_ref(eid)).await?;
                    let timeline = &mut guards[0];
                    let removed = timeline.get_task(task_id).cloned();
                    if removed.is_some() {
                        let tasks = timeline.tasks.iter().filter(|t| t.id != task_id).cloned().collect();
                        self.store.commit(timeline, tasks);
                        self.store.unmap_task(task_id);
                    }
                    removed
                }
                None => {
                    let mut pool = self.store.unassigned().lock().await;
                    let removed = pool.remove(task_id);
                    if removed.is_some() {
                        self.store.unmap_task(task_id);
                    }
                    removed
                }
            };
            let Some(task) = removed else { continue };

            let event = TimelineEvent::TaskRemoved {
                engineer_id: home.clone(),
                task_id: task_id.to_string(),
            };
            match &home {
                Some(eid) => self.publish(std::slice::from_ref(eid), &event),
                None => self.notify.send_unassigned(&event),
            }
            debug!(task = %task_id, engineer = ?home, "task removed");
            return Ok(task);
        }
        Err(EngineError::LimitExceeded("task kept moving while locking"))
    }

    /// Bulk-replace an engineer's schedule verbatim (no reconciliation).
    /// Used to load an existing schedule; every task is validated and no id
    /// may belong to another engineer or the pool.
    pub async fn replace_engineer_tasks(
        &self,
        engineer_id: &str,
        tasks: Vec<Task>,
    ) -> Result<u64, EngineError> {
        if tasks.len() > MAX_TASKS_PER_ENGINEER {
            return Err(EngineError::LimitExceeded("too many tasks on engineer"));
        }
        let mut seen = HashSet::new();
        for task in &tasks {
            validate_task(task, self.policy())?;
            if !seen.insert(task.id.as_str()) {
                return Err(EngineError::AlreadyExists(task.id.clone()));
            }
        }

        let ids = [engineer_id.to_string()];
        let mut guards = self.lock_timelines(&ids).await?;
        let timeline = &mut guards[0];
        let mut claimed: Vec<&str> = Vec::new();
        for task in &tasks {
            if timeline.get_task(&task.id).is_some() {
                continue;
            }
            if !self.store.claim_task(&task.id, Some(engineer_id.to_string())) {
                for id in claimed {
                    self.store.unmap_task(id);
                }
                return Err(EngineError::AlreadyExists(task.id.clone()));
            }
            claimed.push(&task.id);
        }
        for old in &timeline.tasks {
            if !seen.contains(old.id.as_str()) {
                self.store.unmap_task(&old.id);
            }
        }
        self.store.commit(timeline, tasks);
        Ok(timeline.version)
    }
}
