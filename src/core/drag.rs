use std::collections::HashSet;

use super::board::{DragId, Snapshot};
use super::task::{OrderUpdate, Task, TaskId};

/// Compute the buckets after hovering `active` over `over`.
///
/// Pure: reads the current snapshot and returns the next one, or `None`
/// when the hover changes nothing (same id, non-task drag, or an id that
/// resolves to no rendered bucket).
pub fn drag_over(snapshot: &Snapshot, active: &DragId, over: &DragId) -> Option<Snapshot> {
    if active == over {
        return None;
    }
    let task_id = active.task_id()?;
    let from = snapshot.find_container(active)?;
    let to = snapshot.find_container(over)?;

    let mut source: Vec<Task> = snapshot.bucket(&from)?.to_vec();
    let from_index = source.iter().position(|t| t.id == task_id)?;

    let dest_len = if from == to { source.len() } else { snapshot.bucket(&to)?.len() };
    let to_index = match over {
        DragId::Task(over_id) => snapshot
            .bucket(&to)?
            .iter()
            .position(|t| t.id == *over_id)
            .unwrap_or(0),
        DragId::Bucket(_) => dest_len,
    }
    .min(dest_len);

    let mut next = snapshot.clone();

    if from == to {
        let moved = source.remove(from_index);
        let at = to_index.min(source.len());
        source.insert(at, moved);
        reindex(&mut source);
        next.set_bucket(from, source);
    } else {
        let mut moved = source.remove(from_index);
        moved.date = to;
        let mut dest: Vec<Task> = snapshot.bucket(&to)?.to_vec();
        dest.insert(to_index, moved);
        reindex(&mut source);
        reindex(&mut dest);
        next.set_bucket(from, source);
        next.set_bucket(to, dest);
    }

    Some(next)
}

fn reindex(tasks: &mut [Task]) {
    for (i, task) in tasks.iter_mut().enumerate() {
        task.order = i as i64;
    }
}

/// The minimal batch that takes the server from `before` to `after`.
///
/// A task is included when its bucket or its stored `order` differs from
/// the pre-drag value. Stored orders may have gaps, so a task whose index
/// did not change can still need a new `order` once its bucket is
/// reindexed. Moved tasks carry their new date; reordered ones only `order`.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<OrderUpdate> {
    let mut updates = Vec::new();
    let mut seen: HashSet<TaskId> = HashSet::new();

    for (key, tasks) in after.iter() {
        for task in tasks {
            if !seen.insert(task.id) {
                continue;
            }
            let Some((orig_key, orig_order)) = before.placement(task.id) else {
                log::warn!("Could not find original location for task {}", task.id);
                continue;
            };

            if orig_key != *key {
                log::debug!(
                    "Task {} moved from {}@{} to {}@{}",
                    task.id, orig_key, orig_order, key, task.order
                );
                updates.push(OrderUpdate { id: task.id, order: task.order, date: Some(*key) });
            } else if orig_order != task.order {
                log::debug!("Task {} reordered in {} from {} to {}", task.id, key, orig_order, task.order);
                updates.push(OrderUpdate { id: task.id, order: task.order, date: None });
            }
        }
    }

    updates
}

/// A batch ready to send, tagged with the gesture that produced it.
#[derive(Debug, Clone)]
pub struct CommitTicket {
    pub generation: u64,
    pub updates: Vec<OrderUpdate>,
    pre_drag: Snapshot,
}

impl CommitTicket {
    pub fn pre_drag(&self) -> &Snapshot {
        &self.pre_drag
    }
}

#[derive(Debug)]
pub enum DropOutcome {
    /// No gesture in progress, or the dragged item was not a task.
    Ignored,
    /// Released outside any target; buckets restored to the pre-drag state.
    Reverted,
    /// Released where it started; nothing to persist.
    Unchanged,
    Commit(CommitTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResolution {
    Confirmed(Vec<OrderUpdate>),
    /// Buckets restored to the pre-drag state.
    RolledBack(String),
    /// A newer gesture started after this batch was sent; result ignored.
    Stale,
}

#[derive(Debug)]
struct Gesture {
    active: DragId,
    pre_drag: Snapshot,
}

/// One drag gesture at a time, plus the generation counter that lets late
/// commit results be recognized and dropped.
#[derive(Debug, Default)]
pub struct DragSession {
    generation: u64,
    gesture: Option<Gesture>,
}

impl DragSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.gesture.is_some()
    }

    pub fn active(&self) -> Option<DragId> {
        self.gesture.as_ref().map(|g| g.active)
    }

    /// Begin a gesture, capturing the snapshot for a possible revert.
    /// Returns the dragged task when `active` is a rendered task.
    pub fn start(&mut self, snapshot: &Snapshot, active: DragId) -> Option<Task> {
        self.generation += 1;
        self.gesture = Some(Gesture { active, pre_drag: snapshot.clone() });
        active.task_id().and_then(|id| snapshot.task(id)).cloned()
    }

    /// Apply a hover. Returns true when the buckets changed.
    pub fn hover(&self, snapshot: &mut Snapshot, over: &DragId) -> bool {
        let Some(gesture) = &self.gesture else {
            return false;
        };
        match drag_over(snapshot, &gesture.active, over) {
            Some(next) => {
                *snapshot = next;
                true
            }
            None => false,
        }
    }

    /// Finish the gesture. `over` is `None` when released outside any target.
    pub fn release(&mut self, snapshot: &mut Snapshot, over: Option<&DragId>) -> DropOutcome {
        let Some(gesture) = self.gesture.take() else {
            return DropOutcome::Ignored;
        };

        if over.is_none() {
            log::debug!("Dropped outside, reverting to pre-drag state");
            *snapshot = gesture.pre_drag;
            return DropOutcome::Reverted;
        }
        if gesture.active.task_id().is_none() {
            return DropOutcome::Ignored;
        }

        let updates = diff(&gesture.pre_drag, snapshot);
        if updates.is_empty() {
            log::debug!("No changes detected");
            return DropOutcome::Unchanged;
        }

        DropOutcome::Commit(CommitTicket {
            generation: self.generation,
            updates,
            pre_drag: gesture.pre_drag,
        })
    }

    /// Apply the persistence result of a ticket.
    pub fn resolve(
        &mut self,
        snapshot: &mut Snapshot,
        ticket: CommitTicket,
        result: Result<(), String>,
    ) -> CommitResolution {
        if ticket.generation != self.generation {
            log::info!(
                "Ignoring stale commit result (gesture {}, current {})",
                ticket.generation, self.generation
            );
            return CommitResolution::Stale;
        }
        match result {
            Ok(()) => CommitResolution::Confirmed(ticket.updates),
            Err(e) => {
                *snapshot = ticket.pre_drag;
                CommitResolution::RolledBack(e)
            }
        }
    }
}

/// Apply confirmed updates to a task collection.
pub fn apply_updates(tasks: &mut [Task], updates: &[OrderUpdate]) {
    for update in updates {
        if let Some(task) = tasks.iter_mut().find(|t| t.id == update.id) {
            task.order = update.order;
            if let Some(date) = update.date {
                task.date = date;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::date_key::DateKey;

    fn key(s: &str) -> DateKey {
        DateKey::parse(s).unwrap()
    }

    fn task(id: TaskId, date: &str, order: i64) -> Task {
        Task {
            id,
            title: format!("t{}", id),
            notes: None,
            date: key(date),
            completed: false,
            estimated_minutes: 30,
            order,
            user_id: "u".into(),
            projects: Vec::new(),
        }
    }

    fn ids(snapshot: &Snapshot, date: &str) -> Vec<TaskId> {
        snapshot.bucket(&key(date)).unwrap().iter().map(|t| t.id).collect()
    }

    fn orders(snapshot: &Snapshot, date: &str) -> Vec<i64> {
        snapshot.bucket(&key(date)).unwrap().iter().map(|t| t.order).collect()
    }

    /// A=1, B=2, C=3 on May 1; D=4, E=5 on May 2.
    fn two_days() -> Snapshot {
        Snapshot::from_buckets([
            (
                key("2024-05-01"),
                vec![task(1, "2024-05-01", 0), task(2, "2024-05-01", 1), task(3, "2024-05-01", 2)],
            ),
            (key("2024-05-02"), vec![task(4, "2024-05-02", 0), task(5, "2024-05-02", 1)]),
        ])
    }

    #[test]
    fn hovering_self_is_noop() {
        let snap = two_days();
        assert!(drag_over(&snap, &DragId::Task(1), &DragId::Task(1)).is_none());
    }

    #[test]
    fn bucket_drags_are_ignored() {
        let snap = two_days();
        let over = DragId::Task(1);
        assert!(drag_over(&snap, &DragId::Bucket(key("2024-05-01")), &over).is_none());
    }

    #[test]
    fn unknown_targets_are_ignored() {
        let snap = two_days();
        assert!(drag_over(&snap, &DragId::Task(1), &DragId::Task(42)).is_none());
        assert!(drag_over(&snap, &DragId::Task(1), &DragId::Bucket(key("2024-06-01"))).is_none());
    }

    #[test]
    fn same_bucket_reorder_moves_and_reindexes() {
        let snap = two_days();
        let next = drag_over(&snap, &DragId::Task(1), &DragId::Task(2)).unwrap();
        assert_eq!(ids(&next, "2024-05-01"), vec![2, 1, 3]);
        assert_eq!(orders(&next, "2024-05-01"), vec![0, 1, 2]);
        // Other bucket untouched
        assert_eq!(ids(&next, "2024-05-02"), vec![4, 5]);
    }

    #[test]
    fn same_bucket_reorder_emits_only_changed_indices() {
        let before = two_days();
        let after = drag_over(&before, &DragId::Task(1), &DragId::Task(2)).unwrap();
        let batch = diff(&before, &after);
        assert_eq!(
            batch,
            vec![
                OrderUpdate { id: 2, order: 0, date: None },
                OrderUpdate { id: 1, order: 1, date: None },
            ]
        );
    }

    #[test]
    fn hovering_own_bucket_moves_to_end() {
        let snap = two_days();
        let next = drag_over(&snap, &DragId::Task(1), &DragId::Bucket(key("2024-05-01"))).unwrap();
        assert_eq!(ids(&next, "2024-05-01"), vec![2, 3, 1]);
    }

    #[test]
    fn cross_bucket_move_at_index_zero() {
        let before = Snapshot::from_buckets([
            (key("2024-05-01"), vec![task(1, "2024-05-01", 0), task(2, "2024-05-01", 1)]),
            (key("2024-05-02"), vec![task(4, "2024-05-02", 0), task(5, "2024-05-02", 1)]),
        ]);
        let after = drag_over(&before, &DragId::Task(1), &DragId::Task(4)).unwrap();

        assert_eq!(ids(&after, "2024-05-01"), vec![2]);
        assert_eq!(orders(&after, "2024-05-01"), vec![0]);
        assert_eq!(ids(&after, "2024-05-02"), vec![1, 4, 5]);
        assert_eq!(orders(&after, "2024-05-02"), vec![0, 1, 2]);
        assert_eq!(after.task(1).unwrap().date, key("2024-05-02"));

        let batch = diff(&before, &after);
        assert!(batch.contains(&OrderUpdate { id: 1, order: 0, date: Some(key("2024-05-02")) }));
        assert!(batch.contains(&OrderUpdate { id: 2, order: 0, date: None }));
        assert!(batch.contains(&OrderUpdate { id: 4, order: 1, date: None }));
        assert!(batch.contains(&OrderUpdate { id: 5, order: 2, date: None }));
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn cross_bucket_move_onto_empty_day_appends() {
        let before = Snapshot::from_buckets([
            (key("2024-05-01"), vec![task(1, "2024-05-01", 0)]),
            (key("2024-05-03"), vec![]),
        ]);
        let after = drag_over(&before, &DragId::Task(1), &DragId::Bucket(key("2024-05-03"))).unwrap();
        assert!(ids(&after, "2024-05-01").is_empty());
        assert_eq!(ids(&after, "2024-05-03"), vec![1]);
        assert_eq!(
            diff(&before, &after),
            vec![OrderUpdate { id: 1, order: 0, date: Some(key("2024-05-03")) }]
        );
    }

    #[test]
    fn round_trip_hover_yields_empty_batch() {
        let mut live = two_days();
        let mut session = DragSession::new();
        session.start(&live, DragId::Task(1));
        assert!(session.hover(&mut live, &DragId::Task(4)));
        // Back in front of B on the original day
        assert!(session.hover(&mut live, &DragId::Task(2)));
        assert_eq!(ids(&live, "2024-05-01"), vec![1, 2, 3]);
        assert_eq!(ids(&live, "2024-05-02"), vec![4, 5]);
        assert!(matches!(
            session.release(&mut live, Some(&DragId::Task(2))),
            DropOutcome::Unchanged
        ));
    }

    #[test]
    fn drop_without_hover_is_unchanged() {
        let mut live = two_days();
        let mut session = DragSession::new();
        session.start(&live, DragId::Task(2));
        assert!(matches!(
            session.release(&mut live, Some(&DragId::Task(2))),
            DropOutcome::Unchanged
        ));
        assert!(!session.is_dragging());
    }

    #[test]
    fn drop_outside_restores_everything() {
        let before = two_days();
        let mut live = before.clone();
        let mut session = DragSession::new();
        session.start(&live, DragId::Task(3));
        session.hover(&mut live, &DragId::Task(5));
        assert_ne!(live, before);
        assert!(matches!(session.release(&mut live, None), DropOutcome::Reverted));
        assert_eq!(live, before);
    }

    #[test]
    fn failed_commit_rolls_back() {
        let before = two_days();
        let mut live = before.clone();
        let mut session = DragSession::new();
        session.start(&live, DragId::Task(1));
        session.hover(&mut live, &DragId::Task(5));
        let DropOutcome::Commit(ticket) = session.release(&mut live, Some(&DragId::Task(5))) else {
            panic!("expected a commit");
        };
        let resolution = session.resolve(&mut live, ticket, Err("timeout".into()));
        assert_eq!(resolution, CommitResolution::RolledBack("timeout".into()));
        assert_eq!(live, before);
    }

    #[test]
    fn stale_commit_result_is_ignored() {
        let mut live = two_days();
        let mut session = DragSession::new();
        session.start(&live, DragId::Task(1));
        session.hover(&mut live, &DragId::Task(4));
        let DropOutcome::Commit(old_ticket) = session.release(&mut live, Some(&DragId::Task(4))) else {
            panic!("expected a commit");
        };

        // A second gesture begins before the first batch settles
        session.start(&live, DragId::Task(2));
        session.hover(&mut live, &DragId::Task(3));
        let newer = live.clone();

        let resolution = session.resolve(&mut live, old_ticket, Err("conflict".into()));
        assert_eq!(resolution, CommitResolution::Stale);
        assert_eq!(live, newer);
    }

    #[test]
    fn batch_never_exceeds_changed_tasks() {
        let before = two_days();
        let mut live = before.clone();
        let mut session = DragSession::new();
        session.start(&live, DragId::Task(3));
        for over in [DragId::Task(4), DragId::Task(5), DragId::Task(1), DragId::Bucket(key("2024-05-02"))] {
            session.hover(&mut live, &over);
        }
        let changed = live
            .iter()
            .flat_map(|(k, tasks)| tasks.iter().map(move |t| (t.id, *k, t.order)))
            .filter(|(id, k, order)| before.placement(*id) != Some((*k, *order)))
            .count();
        let DropOutcome::Commit(ticket) = session.release(&mut live, Some(&DragId::Bucket(key("2024-05-02")))) else {
            panic!("expected a commit");
        };
        assert!(ticket.updates.len() <= changed);
        assert_eq!(ticket.updates.len(), changed);
    }

    /// C=3, D=4, E=5 on May 1 with the gaps left by two deleted tasks.
    fn gapped_day() -> Snapshot {
        Snapshot::from_buckets([(
            key("2024-05-01"),
            vec![task(3, "2024-05-01", 2), task(4, "2024-05-01", 3), task(5, "2024-05-01", 4)],
        )])
    }

    #[test]
    fn gapped_orders_are_rewritten_for_unmoved_tasks() {
        let before = gapped_day();
        let after = drag_over(&before, &DragId::Task(5), &DragId::Task(4)).unwrap();
        assert_eq!(ids(&after, "2024-05-01"), vec![3, 5, 4]);

        let batch = diff(&before, &after);
        assert_eq!(
            batch,
            vec![
                OrderUpdate { id: 3, order: 0, date: None },
                OrderUpdate { id: 5, order: 1, date: None },
                OrderUpdate { id: 4, order: 2, date: None },
            ]
        );

        let mut tasks: Vec<Task> = before.iter().flat_map(|(_, t)| t.iter().cloned()).collect();
        apply_updates(&mut tasks, &batch);
        tasks.sort_by_key(|t| t.order);
        assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![3, 5, 4]);
    }

    #[test]
    fn untouched_gapped_bucket_is_unchanged() {
        let mut live = gapped_day();
        let mut session = DragSession::new();
        session.start(&live, DragId::Task(4));
        assert!(matches!(
            session.release(&mut live, Some(&DragId::Task(4))),
            DropOutcome::Unchanged
        ));
    }

    #[test]
    fn apply_updates_moves_cached_tasks() {
        let mut tasks = vec![task(1, "2024-05-01", 0), task(2, "2024-05-01", 1)];
        apply_updates(
            &mut tasks,
            &[OrderUpdate { id: 1, order: 3, date: Some(key("2024-05-04")) }],
        );
        assert_eq!(tasks[0].order, 3);
        assert_eq!(tasks[0].date, key("2024-05-04"));
        assert_eq!(tasks[1].order, 1);
    }
}
