use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::tracker::TaskTracker;

/// The two task kinds, each with its own cluster-wide slot pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Map => write!(f, "map"),
            TaskKind::Reduce => write!(f, "reduce"),
        }
    }
}

/// A unit of work handed back to the JobTracker for dispatch to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub job_id: Uuid,
    pub kind: TaskKind,
    /// Number of worker slots this task occupies while running.
    pub slots_required: u32,
}

impl Task {
    pub fn new(job_id: Uuid, kind: TaskKind, slots_required: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            kind,
            slots_required,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRunState {
    Prep,
    Running,
    Succeeded,
    Failed,
    Killed,
}

impl std::fmt::Display for JobRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobRunState::Prep => write!(f, "prep"),
            JobRunState::Running => write!(f, "running"),
            JobRunState::Succeeded => write!(f, "succeeded"),
            JobRunState::Failed => write!(f, "failed"),
            JobRunState::Killed => write!(f, "killed"),
        }
    }
}

/// Job priority, honored only in queues configured with priority support.
/// Higher priorities are scheduled first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum JobPriority {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

/// The scheduler-facing surface of a job.
///
/// Jobs are owned by the JobTracker; the scheduler only sees enough to
/// make placement decisions and to ask the job for its next task. The
/// obtain primitives may fail (the job may be tearing down underneath
/// us); such failures propagate out of `assign_tasks` untouched.
pub trait SchedulableJob {
    fn id(&self) -> Uuid;
    fn queue(&self) -> &str;
    fn user(&self) -> &str;
    fn run_state(&self) -> JobRunState;
    fn priority(&self) -> JobPriority;

    /// Number of slots one task of the given kind occupies. Recomputed
    /// by the scheduler at submission from the job's memory requirement.
    fn slots_per_task(&self, kind: TaskKind) -> u32;
    fn set_slots_per_task(&mut self, kind: TaskKind, slots: u32);

    fn running_tasks(&self, kind: TaskKind) -> u32;
    fn pending_tasks(&self, kind: TaskKind) -> u32;

    /// Memory requested per task of the given kind, in MB. `None` means
    /// the cluster's per-slot default.
    fn task_memory_mb(&self, kind: TaskKind) -> Option<u64>;

    fn speculative_execution(&self, kind: TaskKind) -> bool;

    /// Whether the job has a speculative task that could run on the
    /// given tracker, i.e. a running task that has not yet had an
    /// attempt on that host. Must be side-effect free.
    fn has_speculative_task(&self, kind: TaskKind, host: &str, tracker_name: &str) -> bool;

    fn obtain_new_local_map_task(
        &mut self,
        tracker: &TaskTracker,
        num_trackers: u32,
        num_unique_hosts: u32,
    ) -> Result<Option<Task>>;

    fn obtain_new_non_local_map_task(
        &mut self,
        tracker: &TaskTracker,
        num_trackers: u32,
        num_unique_hosts: u32,
    ) -> Result<Option<Task>>;

    fn obtain_new_reduce_task(
        &mut self,
        tracker: &TaskTracker,
        num_trackers: u32,
        num_unique_hosts: u32,
    ) -> Result<Option<Task>>;

    /// Called once per scheduling attempt, before the local lookup.
    /// Feeds the job's own off-switch opportunity throttle.
    fn scheduling_opportunity(&mut self);

    /// Whether the job is willing to run an off-switch map right now.
    /// The throttle is owned by the job.
    fn schedule_off_switch(&self, num_trackers: u32) -> bool;

    /// Discard accumulated locality expectations. Called when a
    /// reservation is redeemed so the job takes the first slot offered.
    fn override_scheduling_opportunities(&mut self);
}
