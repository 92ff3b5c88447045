use std::collections::HashMap;

use uuid::Uuid;

use crate::job::TaskKind;

/// Scheduler-side record of which trackers hold fallow slots for which
/// job, per task kind.
///
/// The tracker itself carries the authoritative `SlotReservation`; the
/// ledger exists so a job's reserved trackers count toward its occupied
/// slots and so the scheduler can tell when a job already has enough
/// trackers reserved to cover its pending tasks.
#[derive(Debug, Default)]
pub(crate) struct ReservationLedger {
    map: HashMap<Uuid, HashMap<String, u32>>,
    reduce: HashMap<Uuid, HashMap<String, u32>>,
}

impl ReservationLedger {
    fn by_kind(&self, kind: TaskKind) -> &HashMap<Uuid, HashMap<String, u32>> {
        match kind {
            TaskKind::Map => &self.map,
            TaskKind::Reduce => &self.reduce,
        }
    }

    fn by_kind_mut(&mut self, kind: TaskKind) -> &mut HashMap<Uuid, HashMap<String, u32>> {
        match kind {
            TaskKind::Map => &mut self.map,
            TaskKind::Reduce => &mut self.reduce,
        }
    }

    pub(crate) fn record(&mut self, kind: TaskKind, job_id: Uuid, tracker: &str, slots: u32) {
        self.by_kind_mut(kind)
            .entry(job_id)
            .or_default()
            .insert(tracker.to_string(), slots);
    }

    pub(crate) fn release(&mut self, kind: TaskKind, job_id: Uuid, tracker: &str) {
        let jobs = self.by_kind_mut(kind);
        if let Some(trackers) = jobs.get_mut(&job_id) {
            trackers.remove(tracker);
            if trackers.is_empty() {
                jobs.remove(&job_id);
            }
        }
    }

    /// Drop every reservation held for the job, e.g. on completion.
    pub(crate) fn release_job(&mut self, job_id: Uuid) {
        self.map.remove(&job_id);
        self.reduce.remove(&job_id);
    }

    /// Drop every reservation held on the tracker, e.g. when the worker
    /// disconnects.
    pub(crate) fn release_tracker(&mut self, tracker: &str) {
        for jobs in [&mut self.map, &mut self.reduce] {
            jobs.retain(|_, trackers| {
                trackers.remove(tracker);
                !trackers.is_empty()
            });
        }
    }

    /// Number of trackers currently reserved for the job.
    pub(crate) fn reserved_trackers(&self, kind: TaskKind, job_id: Uuid) -> u32 {
        self.by_kind(kind)
            .get(&job_id)
            .map(|trackers| trackers.len() as u32)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_tracks_reservations_per_kind() {
        let mut ledger = ReservationLedger::default();
        let job = Uuid::new_v4();

        ledger.record(TaskKind::Map, job, "tt1", 2);
        ledger.record(TaskKind::Map, job, "tt2", 1);
        ledger.record(TaskKind::Reduce, job, "tt1", 1);
        assert_eq!(ledger.reserved_trackers(TaskKind::Map, job), 2);
        assert_eq!(ledger.reserved_trackers(TaskKind::Reduce, job), 1);

        // re-reserving the same tracker replaces, not adds
        ledger.record(TaskKind::Map, job, "tt1", 1);
        assert_eq!(ledger.reserved_trackers(TaskKind::Map, job), 2);

        ledger.release(TaskKind::Map, job, "tt1");
        assert_eq!(ledger.reserved_trackers(TaskKind::Map, job), 1);

        ledger.release_tracker("tt2");
        assert_eq!(ledger.reserved_trackers(TaskKind::Map, job), 0);
        assert_eq!(ledger.reserved_trackers(TaskKind::Reduce, job), 1);

        ledger.release_job(job);
        assert_eq!(ledger.reserved_trackers(TaskKind::Reduce, job), 0);
    }
}
