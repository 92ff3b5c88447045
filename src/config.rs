use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Per-queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,

    /// Share of cluster capacity, 0-100. Queues without a configured
    /// capacity split the residual evenly among themselves.
    pub capacity_percent: Option<f32>,

    /// Ceiling beyond which the queue cannot expand, even when the rest
    /// of the cluster is idle. Absent means unbounded.
    pub max_capacity_percent: Option<f32>,

    /// Minimum share of the queue's current capacity guaranteed to each
    /// active user, 1-100.
    pub minimum_user_limit_percent: u32,

    /// Whether jobs in this queue are ordered by priority before
    /// submission time.
    pub supports_priorities: bool,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity_percent: None,
            max_capacity_percent: None,
            minimum_user_limit_percent: 100,
            supports_priorities: false,
        }
    }

    pub fn with_capacity(mut self, percent: f32) -> Self {
        self.capacity_percent = Some(percent);
        self
    }

    pub fn with_max_capacity(mut self, percent: f32) -> Self {
        self.max_capacity_percent = Some(percent);
        self
    }

    pub fn with_user_limit(mut self, percent: u32) -> Self {
        self.minimum_user_limit_percent = percent;
        self
    }

    pub fn with_priorities(mut self) -> Self {
        self.supports_priorities = true;
        self
    }
}

/// Scheduler-wide configuration: the queue set plus the cluster memory
/// settings that drive memory-aware scheduling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub queues: Vec<QueueConfig>,

    /// Memory, in MB, behind one map slot. Memory-aware scheduling is
    /// enabled only when all four memory settings are present.
    pub map_slot_memory_mb: Option<u64>,
    /// Memory, in MB, behind one reduce slot.
    pub reduce_slot_memory_mb: Option<u64>,
    /// Upper bound on a single map task's memory request, in MB.
    pub max_map_task_memory_mb: Option<u64>,
    /// Upper bound on a single reduce task's memory request, in MB.
    pub max_reduce_task_memory_mb: Option<u64>,
}

impl SchedulerConfig {
    pub fn new(queues: Vec<QueueConfig>) -> Self {
        Self {
            queues,
            ..Default::default()
        }
    }

    /// Validate the configuration and fill in capacities for queues that
    /// did not configure one, splitting the residual evenly.
    ///
    /// Violations here are fatal at `start`: the scheduler refuses to
    /// come up on a mis-partitioned cluster.
    pub(crate) fn validate(&mut self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(SchedulerError::NoQueues);
        }

        let mut seen = std::collections::HashSet::new();
        for q in &self.queues {
            if !seen.insert(q.name.clone()) {
                return Err(SchedulerError::DuplicateQueue(q.name.clone()));
            }
            if q.minimum_user_limit_percent == 0 || q.minimum_user_limit_percent > 100 {
                return Err(SchedulerError::InvalidUserLimit {
                    queue: q.name.clone(),
                    user_limit: q.minimum_user_limit_percent,
                });
            }
        }

        let total_configured: f32 = self.queues.iter().filter_map(|q| q.capacity_percent).sum();
        if total_configured > 100.0 {
            return Err(SchedulerError::CapacityOverAllocated(total_configured));
        }

        let unconfigured = self
            .queues
            .iter()
            .filter(|q| q.capacity_percent.is_none())
            .count();
        if unconfigured > 0 {
            let share = (100.0 - total_configured) / unconfigured as f32;
            for q in self
                .queues
                .iter_mut()
                .filter(|q| q.capacity_percent.is_none())
            {
                q.capacity_percent = Some(share);
            }
        }

        for q in &self.queues {
            let capacity = q.capacity_percent.unwrap_or(0.0);
            if let Some(max) = q.max_capacity_percent {
                if capacity > max {
                    return Err(SchedulerError::CapacityAboveMaximum {
                        queue: q.name.clone(),
                        capacity,
                        max_capacity: max,
                    });
                }
            }
        }

        Ok(())
    }
}
