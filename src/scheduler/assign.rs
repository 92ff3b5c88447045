//! The per-kind assignment pass: walk queues in fill-ratio order, walk
//! runnable jobs within each queue, honor max-capacity, user-limit and
//! memory constraints, and either hand back a task or block the worker
//! behind a high-memory reservation.

use crate::error::{Result, SchedulerError};
use crate::job::{JobRunState, SchedulableJob, Task, TaskKind};
use crate::queue::QueueSchedulingInfo;
use crate::tracker::{ClusterSnapshot, TaskTracker};

use super::CapacityScheduler;

/// Outcome of one task lookup against one worker.
#[derive(Debug)]
pub(crate) enum TaskLookup {
    /// A task whose input is local (or a reduce task): dispatch it.
    Local(Task),
    /// A map task whose input is elsewhere: dispatch it and burn the
    /// heartbeat's off-switch budget.
    OffSwitch(Task),
    /// Nothing runnable in any queue walked.
    None,
    /// The worker is blocked behind a memory reservation; stop trying
    /// this kind for the rest of the heartbeat.
    FailingMemory,
}

/// The two passes over a queue's runnable jobs. The first protects
/// fairness; the second keeps the queue from idling when the only
/// remaining demand is from over-limit users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    /// Skip jobs whose user is over the dynamic user limit; allowed to
    /// reserve the worker for a memory-starved job.
    EnforceUserLimits,
    /// Consider every job; never create new reservations.
    IgnoreUserLimits,
}

/// Ceil of `a / b`. Division by zero is a caller bug; it is logged and
/// treated as zero so a bad config cannot take down a heartbeat.
fn divide_and_ceil(a: u32, b: u32) -> u32 {
    if b == 0 {
        tracing::warn!(a, "divide_and_ceil called with zero divisor");
        return 0;
    }
    a.div_ceil(b)
}

/// Whether the user has reached their share of the queue's current
/// capacity: the larger of an even split across active users and the
/// queue's configured minimum per-user percentage.
fn user_over_limit(
    qsi: &QueueSchedulingInfo,
    kind: TaskKind,
    user: &str,
    slots_per_task: u32,
) -> bool {
    let tsi = qsi.tsi(kind);
    // Below capacity the share base is the capacity itself; above it,
    // the base grows by the slots this task would add.
    let current_capacity = if tsi.slots_occupied < tsi.capacity_slots {
        tsi.capacity_slots
    } else {
        tsi.slots_occupied + slots_per_task
    };
    let limit = std::cmp::max(
        divide_and_ceil(current_capacity, qsi.active_users() as u32),
        divide_and_ceil(qsi.user_limit_percent * current_capacity, 100),
    );
    let occupied = tsi.slots_occupied_by_user(user);
    if occupied >= limit {
        tracing::debug!(
            queue = %qsi.name,
            user,
            occupied,
            limit,
            "User is over limit"
        );
        true
    } else {
        false
    }
}

fn obtain_new_task<J: SchedulableJob>(
    job: &mut J,
    kind: TaskKind,
    tracker: &TaskTracker,
    cluster: &ClusterSnapshot,
    assign_off_switch: bool,
) -> Result<TaskLookup> {
    match kind {
        TaskKind::Map => {
            job.scheduling_opportunity();
            if let Some(task) = job.obtain_new_local_map_task(
                tracker,
                cluster.num_trackers,
                cluster.num_unique_hosts,
            )? {
                return Ok(TaskLookup::Local(task));
            }
            // High-RAM jobs do not wait on locality; everyone else is
            // throttled by the job's own off-switch opportunity count.
            if job.slots_per_task(TaskKind::Map) > 1
                || (assign_off_switch && job.schedule_off_switch(cluster.num_trackers))
            {
                if let Some(task) = job.obtain_new_non_local_map_task(
                    tracker,
                    cluster.num_trackers,
                    cluster.num_unique_hosts,
                )? {
                    return Ok(TaskLookup::OffSwitch(task));
                }
            }
            Ok(TaskLookup::None)
        }
        TaskKind::Reduce => {
            match job.obtain_new_reduce_task(
                tracker,
                cluster.num_trackers,
                cluster.num_unique_hosts,
            )? {
                Some(task) => Ok(TaskLookup::Local(task)),
                None => Ok(TaskLookup::None),
            }
        }
    }
}

impl<J: SchedulableJob> CapacityScheduler<J> {
    /// Try to find one task of `kind` for the worker.
    ///
    /// An existing reservation on the worker is honored before any
    /// queue is consulted: the reserved job either gets its task now or
    /// re-reserves whatever is free and blocks the worker for this
    /// kind.
    pub(crate) fn assign_one(
        &mut self,
        tracker: &mut TaskTracker,
        cluster: &ClusterSnapshot,
        available_slots: u32,
        kind: TaskKind,
        assign_off_switch: bool,
    ) -> Result<TaskLookup> {
        if let Some(reservation) = tracker.reservation(kind).copied() {
            let job_id = reservation.job_id;
            let runnable = self
                .jobs
                .job(&job_id)
                .map(|j| j.run_state() == JobRunState::Running)
                .unwrap_or(false);
            if !runnable {
                // The reserved job finished or was torn down; release
                // lazily and fall through to the queue walk.
                tracker.unreserve_slots(kind, job_id);
                self.reservations.release(kind, job_id, tracker.name());
            } else {
                let slots_per_task = self
                    .jobs
                    .job(&job_id)
                    .map(|j| j.slots_per_task(kind))
                    .unwrap_or(1);
                if available_slots >= slots_per_task {
                    tracker.unreserve_slots(kind, job_id);
                    self.reservations.release(kind, job_id, tracker.name());
                    let job = self.jobs.job_mut(&job_id).expect("reserved job is present");
                    if kind == TaskKind::Map {
                        job.override_scheduling_opportunities();
                    }
                    return obtain_new_task(job, kind, tracker, cluster, true);
                }
                // Not enough yet: hold whatever is currently free.
                tracker.reserve_slots(kind, job_id, available_slots);
                self.reservations
                    .record(kind, job_id, tracker.name(), available_slots);
                return Ok(TaskLookup::FailingMemory);
            }
        }

        let order = self.queue_order(kind).to_vec();
        for queue_name in &order {
            let Some(qsi) = self.queues.get(queue_name) else {
                return Err(SchedulerError::UnknownQueue(queue_name.clone()));
            };
            // Zero-capacity queues never source tasks, and a queue
            // already at its ceiling is not worth walking.
            if qsi.tsi(kind).capacity_slots == 0 {
                continue;
            }
            if qsi.tsi(kind).over_max_capacity(1) {
                continue;
            }
            let lookup = self.task_from_queue(
                tracker,
                cluster,
                available_slots,
                queue_name,
                kind,
                assign_off_switch,
            )?;
            match lookup {
                TaskLookup::None => continue,
                found => return Ok(found),
            }
        }

        Ok(TaskLookup::None)
    }

    /// Look for a task among one queue's runnable jobs: first
    /// respecting user limits, then, if that found nothing, once more
    /// without them so a lone over-limit user cannot idle the queue.
    fn task_from_queue(
        &mut self,
        tracker: &mut TaskTracker,
        cluster: &ClusterSnapshot,
        available_slots: u32,
        queue_name: &str,
        kind: TaskKind,
        assign_off_switch: bool,
    ) -> Result<TaskLookup> {
        let first = self.scan_queue(
            tracker,
            cluster,
            available_slots,
            queue_name,
            kind,
            assign_off_switch,
            ScanMode::EnforceUserLimits,
        )?;
        if !matches!(first, TaskLookup::None) {
            return Ok(first);
        }

        let second = self.scan_queue(
            tracker,
            cluster,
            available_slots,
            queue_name,
            kind,
            assign_off_switch,
            ScanMode::IgnoreUserLimits,
        )?;
        if matches!(second, TaskLookup::None) {
            tracing::debug!(queue = queue_name, kind = %kind, "Found no task in queue");
        }
        Ok(second)
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_queue(
        &mut self,
        tracker: &mut TaskTracker,
        cluster: &ClusterSnapshot,
        available_slots: u32,
        queue_name: &str,
        kind: TaskKind,
        assign_off_switch: bool,
        mode: ScanMode,
    ) -> Result<TaskLookup> {
        // Only running-state jobs are candidates; completed jobs may
        // linger on the list until their completion hook runs.
        let job_ids = self.jobs.running_jobs(queue_name).to_vec();
        for job_id in job_ids {
            let Some(job) = self.jobs.job(&job_id) else {
                continue;
            };
            if job.run_state() != JobRunState::Running {
                continue;
            }
            let slots_per_task = job.slots_per_task(kind);
            let user = job.user().to_string();
            let pending = job.pending_tasks(kind);

            let Some(qsi) = self.queues.get(queue_name) else {
                return Err(SchedulerError::UnknownQueue(queue_name.to_string()));
            };
            if qsi.tsi(kind).over_max_capacity(slots_per_task) {
                continue;
            }
            if mode == ScanMode::EnforceUserLimits
                && user_over_limit(qsi, kind, &user, slots_per_task)
            {
                continue;
            }

            if self.matcher.matches(job, kind, tracker, available_slots) {
                let job = self.jobs.job_mut(&job_id).expect("job present");
                match obtain_new_task(job, kind, tracker, cluster, assign_off_switch)? {
                    TaskLookup::None => {
                        tracing::debug!(job_id = %job_id, kind = %kind, "Job returned no task");
                        continue;
                    }
                    found => return Ok(found),
                }
            }

            // Memory-short on this worker.
            match mode {
                ScanMode::EnforceUserLimits => {
                    // Hold the worker's free slots for the job unless it
                    // already has enough trackers reserved to cover its
                    // pending tasks.
                    if pending > 0
                        && self.reservations.reserved_trackers(kind, job_id) < pending
                    {
                        tracing::info!(
                            job_id = %job_id,
                            tracker = %tracker.name(),
                            kind = %kind,
                            "Reserving tracker, memory requirements not met"
                        );
                        tracker.reserve_slots(kind, job_id, available_slots);
                        self.reservations
                            .record(kind, job_id, tracker.name(), available_slots);
                        return Ok(TaskLookup::FailingMemory);
                    }
                }
                ScanMode::IgnoreUserLimits => {
                    // Block behind the job while it still has work this
                    // worker could eventually take, including a
                    // speculative re-run of a slow task.
                    let speculative = {
                        let job = self.jobs.job(&job_id).expect("job present");
                        job.speculative_execution(kind)
                            && job.has_speculative_task(kind, tracker.host(), tracker.name())
                    };
                    if pending > 0 || speculative {
                        return Ok(TaskLookup::FailingMemory);
                    }
                }
            }
        }

        Ok(TaskLookup::None)
    }
}
