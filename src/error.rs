use thiserror::Error;

use crate::job::TaskKind;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("No queue configured")]
    NoQueues,

    #[error("Queue configured more than once: {0}")]
    DuplicateQueue(String),

    #[error("Sum of queue capacities over 100% at {0}")]
    CapacityOverAllocated(f32),

    #[error("Queue {queue}: capacity {capacity}% exceeds maximum capacity {max_capacity}%")]
    CapacityAboveMaximum {
        queue: String,
        capacity: f32,
        max_capacity: f32,
    },

    #[error("Queue {queue}: minimum-user-limit-percent {user_limit} outside 1-100")]
    InvalidUserLimit { queue: String, user_limit: u32 },

    #[error("Scheduler not started")]
    NotStarted,

    #[error("Queue not found: {0}")]
    UnknownQueue(String),

    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("Job {job_id} requests {requested} MB per {kind} task, cluster limit is {limit} MB")]
    TaskMemoryOverLimit {
        job_id: uuid::Uuid,
        kind: TaskKind,
        requested: u64,
        limit: u64,
    },

    #[error("Job error: {0}")]
    Job(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
