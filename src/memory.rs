use crate::config::SchedulerConfig;
use crate::job::{SchedulableJob, TaskKind};
use crate::tracker::TaskTracker;

/// Cluster-wide memory settings, derived from [`SchedulerConfig`].
///
/// Memory-aware scheduling is enabled only when all four settings are
/// configured; otherwise every job is treated as a plain one-slot job.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryPolicy {
    map_slot_memory_mb: Option<u64>,
    reduce_slot_memory_mb: Option<u64>,
    max_map_task_memory_mb: Option<u64>,
    max_reduce_task_memory_mb: Option<u64>,
}

impl MemoryPolicy {
    pub fn from_config(conf: &SchedulerConfig) -> Self {
        Self {
            map_slot_memory_mb: conf.map_slot_memory_mb,
            reduce_slot_memory_mb: conf.reduce_slot_memory_mb,
            max_map_task_memory_mb: conf.max_map_task_memory_mb,
            max_reduce_task_memory_mb: conf.max_reduce_task_memory_mb,
        }
    }

    pub fn memory_aware(&self) -> bool {
        self.map_slot_memory_mb.is_some()
            && self.reduce_slot_memory_mb.is_some()
            && self.max_map_task_memory_mb.is_some()
            && self.max_reduce_task_memory_mb.is_some()
    }

    pub fn slot_memory_mb(&self, kind: TaskKind) -> Option<u64> {
        match kind {
            TaskKind::Map => self.map_slot_memory_mb,
            TaskKind::Reduce => self.reduce_slot_memory_mb,
        }
    }

    pub fn max_task_memory_mb(&self, kind: TaskKind) -> Option<u64> {
        match kind {
            TaskKind::Map => self.max_map_task_memory_mb,
            TaskKind::Reduce => self.max_reduce_task_memory_mb,
        }
    }

    /// Memory one task of this job will occupy, in MB.
    pub fn memory_for_task<J: SchedulableJob>(&self, job: &J, kind: TaskKind) -> u64 {
        job.task_memory_mb(kind)
            .or(self.slot_memory_mb(kind))
            .unwrap_or(0)
    }

    /// Slots one task of this job occupies: how many slot-sized chunks
    /// of memory its per-task requirement spans, never less than one.
    pub fn slots_for_task<J: SchedulableJob>(&self, job: &J, kind: TaskKind) -> u32 {
        if !self.memory_aware() {
            return 1;
        }
        let slot_mb = match self.slot_memory_mb(kind) {
            Some(mb) if mb > 0 => mb,
            _ => return 1,
        };
        let task_mb = self.memory_for_task(job, kind);
        (task_mb.div_ceil(slot_mb)).max(1) as u32
    }
}

/// Decides whether a worker currently has room for one task of a job.
/// Pure: no state beyond the policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryMatcher {
    policy: MemoryPolicy,
}

impl MemoryMatcher {
    pub fn new(policy: MemoryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MemoryPolicy {
        &self.policy
    }

    /// True iff the tracker can take one task of `job` of `kind` right
    /// now: the slot requirement fits `available_slots`, and, when
    /// scheduling is memory-aware, the task's memory fits the tracker's
    /// free memory.
    pub fn matches<J: SchedulableJob>(
        &self,
        job: &J,
        kind: TaskKind,
        tracker: &TaskTracker,
        available_slots: u32,
    ) -> bool {
        if job.slots_per_task(kind) > available_slots {
            return false;
        }
        if !self.policy.memory_aware() {
            return true;
        }

        let task_mb = self.policy.memory_for_task(job, kind);
        let free_mb = self.free_memory_mb(tracker, kind);
        if task_mb > free_mb {
            tracing::debug!(
                job_id = %job.id(),
                tracker = %tracker.name(),
                kind = %kind,
                task_mb,
                free_mb,
                "Insufficient memory on tracker"
            );
            return false;
        }
        true
    }

    /// Free memory behind this tracker's slots of the given kind:
    /// per-slot memory times total slots, minus what running tasks have
    /// already committed.
    fn free_memory_mb(&self, tracker: &TaskTracker, kind: TaskKind) -> u64 {
        let slot_mb = self.policy.slot_memory_mb(kind).unwrap_or(0);
        let usable = slot_mb * tracker.max_slots(kind) as u64;
        usable.saturating_sub(tracker.committed_memory_mb(kind))
    }
}
