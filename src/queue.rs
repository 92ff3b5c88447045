use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::job::{JobRunState, SchedulableJob, TaskKind};

/// Per-queue, per-task-kind counters.
///
/// These are rebuilt from the running-job list on every heartbeat rather
/// than maintained incrementally, so transient mis-accounting cannot
/// accumulate across heartbeats.
#[derive(Debug, Clone, Default)]
pub struct TaskSchedulingInfo {
    /// Actual capacity in slots; tracks cluster size.
    pub capacity_slots: u32,
    /// Ceiling in slots, when a maximum capacity is configured.
    pub max_capacity_slots: Option<u32>,
    pub running_tasks: u32,
    pub slots_occupied: u32,
    pub slots_by_user: HashMap<String, u32>,
}

impl TaskSchedulingInfo {
    /// Zero the task counters. Per-user keys are kept (zeroed) so that
    /// users with submitted jobs always have an entry.
    pub(crate) fn reset_task_vars(&mut self) {
        self.running_tasks = 0;
        self.slots_occupied = 0;
        for slots in self.slots_by_user.values_mut() {
            *slots = 0;
        }
    }

    pub(crate) fn add_usage(&mut self, user: &str, running_tasks: u32, slots_occupied: u32) {
        self.running_tasks += running_tasks;
        self.slots_occupied += slots_occupied;
        *self.slots_by_user.entry(user.to_string()).or_insert(0) += slots_occupied;
    }

    pub fn slots_occupied_by_user(&self, user: &str) -> u32 {
        self.slots_by_user.get(user).copied().unwrap_or(0)
    }

    /// Whether taking `slots_per_task` more slots would push the queue
    /// past its configured maximum capacity. A task that straddles the
    /// ceiling is refused even if some slots remain under it.
    pub(crate) fn over_max_capacity(&self, slots_per_task: u32) -> bool {
        match self.max_capacity_slots {
            Some(max) => self.slots_occupied + slots_per_task > max,
            None => false,
        }
    }

    /// How full the queue is: occupied over capacity. A queue with zero
    /// capacity sorts as if running exactly at capacity.
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity_slots == 0 {
            1.0
        } else {
            f64::from(self.slots_occupied) / f64::from(self.capacity_slots)
        }
    }
}

/// Scheduling state for one queue: its configured shares plus one
/// [`TaskSchedulingInfo`] per task kind and the per-user job counts
/// that drive user limits.
#[derive(Debug, Clone)]
pub struct QueueSchedulingInfo {
    pub name: String,
    pub capacity_percent: f32,
    pub max_capacity_percent: Option<f32>,
    pub user_limit_percent: u32,
    pub supports_priorities: bool,
    pub map: TaskSchedulingInfo,
    pub reduce: TaskSchedulingInfo,
    /// Distinct-job count per user; a user is active while this holds
    /// an entry for them.
    pub jobs_by_user: HashMap<String, u32>,
}

impl QueueSchedulingInfo {
    pub(crate) fn from_config(conf: &QueueConfig) -> Self {
        Self {
            name: conf.name.clone(),
            capacity_percent: conf.capacity_percent.unwrap_or(0.0),
            max_capacity_percent: conf.max_capacity_percent,
            user_limit_percent: conf.minimum_user_limit_percent,
            supports_priorities: conf.supports_priorities,
            map: TaskSchedulingInfo::default(),
            reduce: TaskSchedulingInfo::default(),
            jobs_by_user: HashMap::new(),
        }
    }

    pub fn tsi(&self, kind: TaskKind) -> &TaskSchedulingInfo {
        match kind {
            TaskKind::Map => &self.map,
            TaskKind::Reduce => &self.reduce,
        }
    }

    pub(crate) fn tsi_mut(&mut self, kind: TaskKind) -> &mut TaskSchedulingInfo {
        match kind {
            TaskKind::Map => &mut self.map,
            TaskKind::Reduce => &mut self.reduce,
        }
    }

    pub fn active_users(&self) -> usize {
        self.jobs_by_user.len()
    }
}

/// Human-readable scheduling report for one queue.
#[derive(Debug, Clone)]
pub struct QueueReport {
    pub queue: String,
    pub capacity_percent: f32,
    pub user_limit_percent: u32,
    pub supports_priorities: bool,
    pub map: KindReport,
    pub reduce: KindReport,
    pub waiting_jobs: usize,
    pub submitting_users: usize,
}

#[derive(Debug, Clone)]
pub struct KindReport {
    pub capacity_slots: u32,
    pub max_capacity_slots: Option<u32>,
    pub slots_occupied: u32,
    pub running_tasks: u32,
    /// Users with at least one occupied slot, with their slot counts.
    pub active_users: Vec<(String, u32)>,
}

impl KindReport {
    pub(crate) fn from_tsi(tsi: &TaskSchedulingInfo) -> Self {
        let mut active_users: Vec<(String, u32)> = tsi
            .slots_by_user
            .iter()
            .filter(|(_, slots)| **slots > 0)
            .map(|(user, slots)| (user.clone(), *slots))
            .collect();
        active_users.sort();
        Self {
            capacity_slots: tsi.capacity_slots,
            max_capacity_slots: tsi.max_capacity_slots,
            slots_occupied: tsi.slots_occupied,
            running_tasks: tsi.running_tasks,
            active_users,
        }
    }
}

impl std::fmt::Display for KindReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Capacity: {} slots", self.capacity_slots)?;
        if let Some(max) = self.max_capacity_slots {
            writeln!(f, "Maximum capacity: {max} slots")?;
        }
        let used_percent = if self.capacity_slots != 0 {
            self.slots_occupied as f32 * 100.0 / self.capacity_slots as f32
        } else {
            0.0
        };
        writeln!(
            f,
            "Used capacity: {} ({:.1}% of Capacity)",
            self.slots_occupied, used_percent
        )?;
        writeln!(f, "Running tasks: {}", self.running_tasks)?;
        if self.slots_occupied != 0 {
            writeln!(f, "Active users:")?;
            for (user, slots) in &self.active_users {
                let p = *slots as f32 * 100.0 / self.slots_occupied as f32;
                writeln!(f, "User '{user}': {slots} ({p:.1}% of used capacity)")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for QueueReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Queue configuration")?;
        writeln!(f, "Capacity Percentage: {}%", self.capacity_percent)?;
        writeln!(f, "User Limit: {}%", self.user_limit_percent)?;
        writeln!(
            f,
            "Priority Supported: {}",
            if self.supports_priorities { "YES" } else { "NO" }
        )?;
        writeln!(f, "-------------")?;
        writeln!(f, "Map tasks")?;
        write!(f, "{}", self.map)?;
        writeln!(f, "-------------")?;
        writeln!(f, "Reduce tasks")?;
        write!(f, "{}", self.reduce)?;
        writeln!(f, "-------------")?;
        writeln!(f, "Job info")?;
        writeln!(f, "Number of Waiting Jobs: {}", self.waiting_jobs)?;
        writeln!(
            f,
            "Number of users who have submitted jobs: {}",
            self.submitting_users
        )
    }
}

#[derive(Debug)]
struct JobEntry<J> {
    job: J,
    submitted_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueJobLists {
    supports_priorities: bool,
    waiting: Vec<Uuid>,
    running: Vec<Uuid>,
}

/// Owns the jobs the scheduler knows about and their per-queue waiting
/// and running lists.
///
/// Jobs enter the waiting list at submission and move to the running
/// list once initialization has flipped their run state to `Running`
/// (see the initialization poller). Both lists are kept in scheduling
/// order: priority first where the queue supports it, then submission
/// time.
#[derive(Debug)]
pub struct JobQueuesManager<J> {
    jobs: HashMap<Uuid, JobEntry<J>>,
    queues: HashMap<String, QueueJobLists>,
    next_seq: u64,
}

impl<J: SchedulableJob> JobQueuesManager<J> {
    pub(crate) fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            queues: HashMap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn create_queue(&mut self, name: &str, supports_priorities: bool) {
        self.queues.insert(
            name.to_string(),
            QueueJobLists {
                supports_priorities,
                waiting: Vec::new(),
                running: Vec::new(),
            },
        );
    }

    pub(crate) fn clear(&mut self) {
        self.jobs.clear();
        self.queues.clear();
    }

    pub fn job(&self, id: &Uuid) -> Option<&J> {
        self.jobs.get(id).map(|e| &e.job)
    }

    pub fn job_mut(&mut self, id: &Uuid) -> Option<&mut J> {
        self.jobs.get_mut(id).map(|e| &mut e.job)
    }

    pub(crate) fn add_job(&mut self, job: J) -> bool {
        let queue = job.queue().to_string();
        let id = job.id();
        let Some(lists) = self.queues.get_mut(&queue) else {
            return false;
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.jobs.insert(
            id,
            JobEntry {
                job,
                submitted_at: Utc::now(),
                seq,
            },
        );
        lists.waiting.push(id);
        self.sort_list(&queue, false);
        true
    }

    pub(crate) fn remove_job(&mut self, id: &Uuid) -> Option<J> {
        let entry = self.jobs.remove(id)?;
        if let Some(lists) = self.queues.get_mut(entry.job.queue()) {
            lists.waiting.retain(|j| j != id);
            lists.running.retain(|j| j != id);
        }
        Some(entry.job)
    }

    pub fn running_jobs(&self, queue: &str) -> &[Uuid] {
        self.queues
            .get(queue)
            .map(|l| l.running.as_slice())
            .unwrap_or(&[])
    }

    pub fn waiting_jobs(&self, queue: &str) -> &[Uuid] {
        self.queues
            .get(queue)
            .map(|l| l.waiting.as_slice())
            .unwrap_or(&[])
    }

    pub fn waiting_count(&self, queue: &str) -> usize {
        self.waiting_jobs(queue).len()
    }

    /// Move waiting jobs whose run state has become `Running` onto the
    /// running list, preserving scheduling order. Returns the number of
    /// jobs promoted.
    pub(crate) fn promote_runnable(&mut self, queue: &str) -> usize {
        let Some(lists) = self.queues.get_mut(queue) else {
            return 0;
        };
        let mut promoted = 0;
        let mut remaining = Vec::with_capacity(lists.waiting.len());
        for id in lists.waiting.drain(..) {
            let runnable = self
                .jobs
                .get(&id)
                .map(|e| e.job.run_state() == JobRunState::Running)
                .unwrap_or(false);
            if runnable {
                lists.running.push(id);
                promoted += 1;
            } else {
                remaining.push(id);
            }
        }
        lists.waiting = remaining;
        if promoted > 0 {
            self.sort_list(queue, true);
        }
        promoted
    }

    fn sort_list(&mut self, queue: &str, running: bool) {
        let Some(lists) = self.queues.get_mut(queue) else {
            return;
        };
        let supports_priorities = lists.supports_priorities;
        let jobs = &self.jobs;
        let key = |id: &Uuid| {
            let entry = &jobs[id];
            let priority = if supports_priorities {
                entry.job.priority()
            } else {
                crate::job::JobPriority::Normal
            };
            (std::cmp::Reverse(priority), entry.submitted_at, entry.seq)
        };
        if running {
            lists.running.sort_by_key(key);
        } else {
            lists.waiting.sort_by_key(key);
        }
    }

    /// All known queue names.
    pub(crate) fn queue_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }
}
