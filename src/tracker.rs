use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::TaskKind;

/// Point-in-time view of cluster capacity, composed by the JobTracker
/// and passed in with each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub max_map_slots: u32,
    pub max_reduce_slots: u32,
    pub num_trackers: u32,
    pub num_unique_hosts: u32,
}

/// Slots on a worker held for a high-memory job until enough free up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotReservation {
    pub job_id: Uuid,
    pub slots: u32,
}

/// The scheduler's view of one worker node.
///
/// Slot occupancy and committed memory are reported by the JobTracker
/// between heartbeats; the scheduler itself only touches the per-kind
/// fallow-slot reservation.
#[derive(Debug, Clone)]
pub struct TaskTracker {
    name: String,
    host: String,
    max_map_slots: u32,
    max_reduce_slots: u32,
    occupied_map_slots: u32,
    occupied_reduce_slots: u32,
    committed_map_memory_mb: u64,
    committed_reduce_memory_mb: u64,
    map_reservation: Option<SlotReservation>,
    reduce_reservation: Option<SlotReservation>,
}

impl TaskTracker {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        max_map_slots: u32,
        max_reduce_slots: u32,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            max_map_slots,
            max_reduce_slots,
            occupied_map_slots: 0,
            occupied_reduce_slots: 0,
            committed_map_memory_mb: 0,
            committed_reduce_memory_mb: 0,
            map_reservation: None,
            reduce_reservation: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn max_slots(&self, kind: TaskKind) -> u32 {
        match kind {
            TaskKind::Map => self.max_map_slots,
            TaskKind::Reduce => self.max_reduce_slots,
        }
    }

    pub fn occupied_slots(&self, kind: TaskKind) -> u32 {
        match kind {
            TaskKind::Map => self.occupied_map_slots,
            TaskKind::Reduce => self.occupied_reduce_slots,
        }
    }

    pub fn set_occupied_slots(&mut self, kind: TaskKind, slots: u32) {
        match kind {
            TaskKind::Map => self.occupied_map_slots = slots,
            TaskKind::Reduce => self.occupied_reduce_slots = slots,
        }
    }

    /// Memory already promised to tasks on this tracker, in MB.
    pub fn committed_memory_mb(&self, kind: TaskKind) -> u64 {
        match kind {
            TaskKind::Map => self.committed_map_memory_mb,
            TaskKind::Reduce => self.committed_reduce_memory_mb,
        }
    }

    pub fn set_committed_memory_mb(&mut self, kind: TaskKind, mb: u64) {
        match kind {
            TaskKind::Map => self.committed_map_memory_mb = mb,
            TaskKind::Reduce => self.committed_reduce_memory_mb = mb,
        }
    }

    pub fn available_slots(&self, kind: TaskKind) -> u32 {
        self.max_slots(kind).saturating_sub(self.occupied_slots(kind))
    }

    /// The job holding this tracker's fallow slots for the given kind,
    /// if any.
    pub fn reservation(&self, kind: TaskKind) -> Option<&SlotReservation> {
        match kind {
            TaskKind::Map => self.map_reservation.as_ref(),
            TaskKind::Reduce => self.reduce_reservation.as_ref(),
        }
    }

    pub fn reserve_slots(&mut self, kind: TaskKind, job_id: Uuid, slots: u32) {
        tracing::info!(
            tracker = %self.name,
            job_id = %job_id,
            kind = %kind,
            slots,
            "Reserving slots"
        );
        let reservation = SlotReservation { job_id, slots };
        match kind {
            TaskKind::Map => self.map_reservation = Some(reservation),
            TaskKind::Reduce => self.reduce_reservation = Some(reservation),
        }
    }

    pub fn unreserve_slots(&mut self, kind: TaskKind, job_id: Uuid) {
        let slot = match kind {
            TaskKind::Map => &mut self.map_reservation,
            TaskKind::Reduce => &mut self.reduce_reservation,
        };
        if slot.as_ref().map(|r| r.job_id) == Some(job_id) {
            tracing::debug!(
                tracker = %self.name,
                job_id = %job_id,
                kind = %kind,
                "Releasing reserved slots"
            );
            *slot = None;
        }
    }
}
