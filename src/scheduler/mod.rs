//! The capacity scheduler: queues with configured shares of a cluster's
//! map and reduce slots, greedy per-heartbeat task assignment, dynamic
//! per-user limits, and slot reservations for high-memory jobs.

mod assign;
mod reservation;

use std::collections::HashMap;

use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::job::{JobRunState, SchedulableJob, Task, TaskKind};
use crate::memory::{MemoryMatcher, MemoryPolicy};
use crate::queue::{JobQueuesManager, KindReport, QueueReport, QueueSchedulingInfo};
use crate::tracker::{ClusterSnapshot, TaskTracker};

use assign::TaskLookup;
use reservation::ReservationLedger;

/// Capacity-share task scheduler for a shared batch-compute cluster.
///
/// The embedding JobTracker drives it with one [`assign_tasks`] call per
/// worker heartbeat and the [`job_added`] / [`job_completed`] lifecycle
/// hooks. All state lives behind `&mut self`; the embedder provides the
/// single writer lock (an `Arc<tokio::sync::RwLock<_>>` in practice)
/// that serializes heartbeats, lifecycle calls and the initialization
/// poller.
///
/// Scheduling is greedy and per-heartbeat:
///
/// 1. Queue occupancy counters are rebuilt from the running jobs, so
///    accounting self-heals every heartbeat.
/// 2. Map slots are filled in a multi-assign loop, re-sorting queues by
///    fill ratio between emissions and allowing at most one off-switch
///    map per heartbeat.
/// 3. At most one reduce task is assigned.
///
/// [`assign_tasks`]: CapacityScheduler::assign_tasks
/// [`job_added`]: CapacityScheduler::job_added
/// [`job_completed`]: CapacityScheduler::job_completed
#[derive(Debug)]
pub struct CapacityScheduler<J> {
    conf: SchedulerConfig,
    matcher: MemoryMatcher,
    queues: HashMap<String, QueueSchedulingInfo>,
    map_order: Vec<String>,
    reduce_order: Vec<String>,
    jobs: JobQueuesManager<J>,
    reservations: ReservationLedger,
    prev_map_cluster_capacity: u32,
    prev_reduce_cluster_capacity: u32,
    started: bool,
}

impl<J: SchedulableJob> CapacityScheduler<J> {
    pub fn new(conf: SchedulerConfig) -> Self {
        Self {
            conf,
            matcher: MemoryMatcher::default(),
            queues: HashMap::new(),
            map_order: Vec::new(),
            reduce_order: Vec::new(),
            jobs: JobQueuesManager::new(),
            reservations: ReservationLedger::default(),
            prev_map_cluster_capacity: 0,
            prev_reduce_cluster_capacity: 0,
            started: false,
        }
    }

    /// Validate the configuration and build per-queue state. A
    /// mis-partitioned cluster (capacity sum over 100%, a residual
    /// share above a queue's ceiling, no queues at all) is fatal here
    /// and the scheduler never starts.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.conf.validate()?;
        self.matcher = MemoryMatcher::new(MemoryPolicy::from_config(&self.conf));

        self.queues.clear();
        self.map_order.clear();
        self.reduce_order.clear();
        self.jobs.clear();
        for qconf in &self.conf.queues {
            self.map_order.push(qconf.name.clone());
            self.reduce_order.push(qconf.name.clone());
            self.queues
                .insert(qconf.name.clone(), QueueSchedulingInfo::from_config(qconf));
            self.jobs.create_queue(&qconf.name, qconf.supports_priorities);
        }

        self.started = true;
        tracing::info!(queues = self.queues.len(), "Capacity scheduler initialized");
        Ok(())
    }

    pub fn terminate(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        tracing::info!("Capacity scheduler terminated");
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// One worker heartbeat: rebuild queue accounting, then hand back
    /// as many map tasks as fit on the worker plus at most one reduce
    /// task.
    ///
    /// Internal accounting inconsistencies abort the heartbeat with an
    /// empty task list (and an error log); the scheduler stays up and
    /// rebuilds its counters on the next heartbeat. Failures from the
    /// job's own task factories propagate to the caller.
    pub fn assign_tasks(
        &mut self,
        tracker: &mut TaskTracker,
        cluster: &ClusterSnapshot,
    ) -> Result<Vec<Task>> {
        if !self.started {
            return Err(SchedulerError::NotStarted);
        }
        match self.try_assign_tasks(tracker, cluster) {
            Ok(tasks) => Ok(tasks),
            Err(e @ (SchedulerError::UnknownQueue(_) | SchedulerError::JobNotFound(_))) => {
                tracing::error!(
                    tracker = %tracker.name(),
                    error = %e,
                    "Scheduler accounting out of sync, aborting heartbeat"
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn try_assign_tasks(
        &mut self,
        tracker: &mut TaskTracker,
        cluster: &ClusterSnapshot,
    ) -> Result<Vec<Task>> {
        tracing::debug!(
            tracker = %tracker.name(),
            max_maps = tracker.max_slots(TaskKind::Map),
            run_maps = tracker.occupied_slots(TaskKind::Map),
            max_reduces = tracker.max_slots(TaskKind::Reduce),
            run_reduces = tracker.occupied_slots(TaskKind::Reduce),
            map_capacity = cluster.max_map_slots,
            reduce_capacity = cluster.max_reduce_slots,
            "Worker asking for tasks"
        );

        self.refresh_counters(cluster)?;

        let mut tasks = Vec::new();

        // Map phase: fill the worker's free map slots one task at a
        // time. Queue ratios move with every emission, so the order is
        // re-sorted each round, and the accounting delta is applied
        // immediately so the next round does not pick the same queue
        // over and over.
        let mut available = tracker.available_slots(TaskKind::Map);
        let mut assign_off_switch = true;
        while available > 0 {
            self.sort_queues(TaskKind::Map);
            let lookup =
                self.assign_one(tracker, cluster, available, TaskKind::Map, assign_off_switch)?;
            let (task, off_switch) = match lookup {
                TaskLookup::Local(task) => (task, false),
                TaskLookup::OffSwitch(task) => (task, true),
                TaskLookup::None | TaskLookup::FailingMemory => break,
            };
            if off_switch {
                // At most one off-switch map per heartbeat.
                assign_off_switch = false;
            }
            available = available.saturating_sub(task.slots_required);
            self.account_assignment(&task)?;
            tasks.push(task);
        }

        // Reduce phase: a single assignment, no locality handling.
        let reduce_slots = tracker.available_slots(TaskKind::Reduce);
        if reduce_slots > 0 {
            self.sort_queues(TaskKind::Reduce);
            if let TaskLookup::Local(task) =
                self.assign_one(tracker, cluster, reduce_slots, TaskKind::Reduce, true)?
            {
                tasks.push(task);
            }
        }

        Ok(tasks)
    }

    /// Rebuild per-queue counters from the running jobs.
    ///
    /// Capacity slot counts are recomputed only when cluster capacity
    /// moved since the previous heartbeat; occupancy is always rebuilt
    /// from scratch rather than maintained incrementally, which is what
    /// lets the accounting self-heal.
    fn refresh_counters(&mut self, cluster: &ClusterSnapshot) -> Result<()> {
        let map_capacity = cluster.max_map_slots;
        let reduce_capacity = cluster.max_reduce_slots;

        for qsi in self.queues.values_mut() {
            if map_capacity != self.prev_map_cluster_capacity {
                qsi.map.capacity_slots =
                    (f64::from(qsi.capacity_percent) * f64::from(map_capacity) / 100.0) as u32;
                if let Some(max_percent) = qsi.max_capacity_percent {
                    qsi.map.max_capacity_slots =
                        Some((f64::from(max_percent) * f64::from(map_capacity) / 100.0) as u32);
                }
            }
            if reduce_capacity != self.prev_reduce_cluster_capacity {
                qsi.reduce.capacity_slots =
                    (f64::from(qsi.capacity_percent) * f64::from(reduce_capacity) / 100.0) as u32;
                if let Some(max_percent) = qsi.max_capacity_percent {
                    qsi.reduce.max_capacity_slots =
                        Some((f64::from(max_percent) * f64::from(reduce_capacity) / 100.0) as u32);
                }
            }
            qsi.map.reset_task_vars();
            qsi.reduce.reset_task_vars();
        }

        let queue_names: Vec<String> = self.queues.keys().cloned().collect();
        for queue_name in queue_names {
            let job_ids = self.jobs.running_jobs(&queue_name).to_vec();
            for job_id in job_ids {
                let Some(job) = self.jobs.job(&job_id) else {
                    continue;
                };
                if job.run_state() != JobRunState::Running {
                    continue;
                }
                let user = job.user().to_string();
                let mut usage = [(0u32, 0u32); 2];
                for (slot, kind) in usage.iter_mut().zip([TaskKind::Map, TaskKind::Reduce]) {
                    let running = job.running_tasks(kind);
                    let reserved = self.reservations.reserved_trackers(kind, job_id);
                    // Trackers reserved for the job hold real slots and
                    // count as occupied.
                    *slot = (running, (running + reserved) * job.slots_per_task(kind));
                }
                let qsi = self
                    .queues
                    .get_mut(&queue_name)
                    .ok_or_else(|| SchedulerError::UnknownQueue(queue_name.clone()))?;
                qsi.map.add_usage(&user, usage[0].0, usage[0].1);
                qsi.reduce.add_usage(&user, usage[1].0, usage[1].1);
            }
        }

        self.prev_map_cluster_capacity = map_capacity;
        self.prev_reduce_cluster_capacity = reduce_capacity;
        Ok(())
    }

    /// Fold a just-emitted task into its queue's counters so the rest
    /// of this heartbeat sees the committed slots.
    fn account_assignment(&mut self, task: &Task) -> Result<()> {
        let (queue, user) = {
            let job = self
                .jobs
                .job(&task.job_id)
                .ok_or(SchedulerError::JobNotFound(task.job_id))?;
            (job.queue().to_string(), job.user().to_string())
        };
        let qsi = self
            .queues
            .get_mut(&queue)
            .ok_or(SchedulerError::UnknownQueue(queue))?;
        qsi.tsi_mut(task.kind).add_usage(&user, 1, task.slots_required);
        Ok(())
    }

    fn sort_queues(&mut self, kind: TaskKind) {
        let queues = &self.queues;
        let order = match kind {
            TaskKind::Map => &mut self.map_order,
            TaskKind::Reduce => &mut self.reduce_order,
        };
        // Stable sort: equal ratios keep their configured order.
        order.sort_by(|a, b| {
            let ra = queues.get(a).map(|q| q.tsi(kind).fill_ratio()).unwrap_or(1.0);
            let rb = queues.get(b).map(|q| q.tsi(kind).fill_ratio()).unwrap_or(1.0);
            ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    pub(crate) fn queue_order(&self, kind: TaskKind) -> &[String] {
        match kind {
            TaskKind::Map => &self.map_order,
            TaskKind::Reduce => &self.reduce_order,
        }
    }

    /// Register a newly submitted job: admission-check its memory
    /// request, derive its per-kind slot footprint, and add it to its
    /// queue's waiting list.
    pub fn job_added(&mut self, mut job: J) -> Result<()> {
        if !self.started {
            return Err(SchedulerError::NotStarted);
        }
        let queue = job.queue().to_string();
        let user = job.user().to_string();
        let job_id = job.id();
        if !self.queues.contains_key(&queue) {
            return Err(SchedulerError::UnknownQueue(queue));
        }

        let policy = *self.matcher.policy();
        for kind in [TaskKind::Map, TaskKind::Reduce] {
            if policy.memory_aware() {
                if let (Some(requested), Some(limit)) =
                    (job.task_memory_mb(kind), policy.max_task_memory_mb(kind))
                {
                    if requested > limit {
                        return Err(SchedulerError::TaskMemoryOverLimit {
                            job_id,
                            kind,
                            requested,
                            limit,
                        });
                    }
                }
            }
            let slots = policy.slots_for_task(&job, kind);
            job.set_slots_per_task(kind, slots);
        }

        let qsi = self.queues.get_mut(&queue).expect("queue checked above");
        let count = qsi.jobs_by_user.entry(user.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        if count == 1 {
            qsi.map.slots_by_user.entry(user.clone()).or_insert(0);
            qsi.reduce.slots_by_user.entry(user.clone()).or_insert(0);
        }

        self.jobs.add_job(job);
        tracing::debug!(
            job_id = %job_id,
            queue,
            user,
            jobs_for_user = count,
            "Job added"
        );
        Ok(())
    }

    /// Remove a finished job and its accounting footprint. Returns the
    /// job to the caller. The last job of a user removes the user from
    /// the queue's per-user maps.
    pub fn job_completed(&mut self, job_id: Uuid) -> Result<J> {
        if !self.started {
            return Err(SchedulerError::NotStarted);
        }
        let job = self
            .jobs
            .remove_job(&job_id)
            .ok_or(SchedulerError::JobNotFound(job_id))?;
        self.reservations.release_job(job_id);

        let queue = job.queue().to_string();
        let user = job.user().to_string();
        let qsi = self
            .queues
            .get_mut(&queue)
            .ok_or(SchedulerError::UnknownQueue(queue))?;
        match qsi.jobs_by_user.get_mut(&user) {
            Some(count) if *count > 1 => {
                *count -= 1;
                tracing::debug!(job_id = %job_id, user, jobs_left = *count, "Job removed");
            }
            _ => {
                qsi.jobs_by_user.remove(&user);
                qsi.map.slots_by_user.remove(&user);
                qsi.reduce.slots_by_user.remove(&user);
                tracing::debug!(job_id = %job_id, user, "Last job for user removed");
            }
        }
        Ok(job)
    }

    /// Move waiting jobs whose run state became `Running` onto their
    /// queue's runnable list. Driven by the initialization poller;
    /// callable directly for deterministic tests. Returns the number of
    /// jobs promoted.
    pub fn promote_runnable_jobs(&mut self) -> usize {
        let mut promoted = 0;
        for queue in self.jobs.queue_names() {
            promoted += self.jobs.promote_runnable(&queue);
        }
        promoted
    }

    /// Release every reservation held on a disconnected worker.
    pub fn tracker_removed(&mut self, tracker_name: &str) {
        self.reservations.release_tracker(tracker_name);
    }

    /// Job ids in a queue: running jobs first, then waiting jobs, each
    /// group in scheduling order.
    pub fn jobs(&self, queue: &str) -> Vec<Uuid> {
        let mut ids = self.jobs.running_jobs(queue).to_vec();
        ids.extend_from_slice(self.jobs.waiting_jobs(queue));
        ids
    }

    pub fn job(&self, id: &Uuid) -> Option<&J> {
        self.jobs.job(id)
    }

    /// Mutable access for the job's owner, e.g. to flip its run state
    /// once initialization finishes.
    pub fn job_mut(&mut self, id: &Uuid) -> Option<&mut J> {
        self.jobs.job_mut(id)
    }

    /// Queue names in the order the next assignment pass of `kind`
    /// would consult them (ascending fill ratio as of the last sort).
    pub fn ordered_queue_names(&self, kind: TaskKind) -> &[String] {
        self.queue_order(kind)
    }

    /// Scheduling state of one queue, for reporting and tests. The
    /// counters are as of the last heartbeat (or [`refresh_metrics`]).
    ///
    /// [`refresh_metrics`]: CapacityScheduler::refresh_metrics
    pub fn queue_state(&self, queue: &str) -> Option<&QueueSchedulingInfo> {
        self.queues.get(queue)
    }

    /// Recompute counters and queue order outside a heartbeat, e.g.
    /// before rendering reports on an idle cluster.
    pub fn refresh_metrics(&mut self, cluster: &ClusterSnapshot) -> Result<()> {
        if !self.started {
            return Err(SchedulerError::NotStarted);
        }
        self.refresh_counters(cluster)?;
        self.sort_queues(TaskKind::Map);
        self.sort_queues(TaskKind::Reduce);
        Ok(())
    }

    /// Human-readable scheduling report for one queue.
    pub fn queue_report(&self, queue: &str) -> Option<QueueReport> {
        let qsi = self.queues.get(queue)?;
        Some(QueueReport {
            queue: qsi.name.clone(),
            capacity_percent: qsi.capacity_percent,
            user_limit_percent: qsi.user_limit_percent,
            supports_priorities: qsi.supports_priorities,
            map: KindReport::from_tsi(&qsi.map),
            reduce: KindReport::from_tsi(&qsi.reduce),
            waiting_jobs: self.jobs.waiting_count(queue),
            submitting_users: qsi.jobs_by_user.len(),
        })
    }
}
