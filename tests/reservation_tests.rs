
use capacity_scheduler::config::QueueConfig;
use capacity_scheduler::job::TaskKind;
use capacity_scheduler::scheduler::CapacityScheduler;
use sim_harness::{cluster, init_tracing, memory_aware_config, submit_running, tracker, SimJob};

fn memory_aware_scheduler() -> CapacityScheduler<SimJob> {
    init_tracing();
    let mut sched = CapacityScheduler::new(memory_aware_config(vec![
        QueueConfig::new("q").with_capacity(100.0)
    ]));
    sched.start().unwrap();
    sched
}

#[test]
fn high_memory_job_reserves_a_cramped_worker() {
    let mut sched = memory_aware_scheduler();
    // 1024 MB maps on 512 MB slots: two slots per task
    let big = submit_running(&mut sched, SimJob::new("q", "alice").with_map_memory(1024).with_maps(5));
    submit_running(&mut sched, SimJob::new("q", "bob").with_maps(5));

    let mut tt = tracker("tt1", 2, 0);
    tt.set_occupied_slots(TaskKind::Map, 1);
    tt.set_committed_memory_mb(TaskKind::Map, 512);

    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 2)).unwrap();

    // nothing dispatched, not even bob's small maps: the free slot is
    // held for the high-memory job instead of letting small jobs starve it
    assert!(tasks.is_empty());
    let reservation = tt.reservation(TaskKind::Map).expect("slot reserved");
    assert_eq!(reservation.job_id, big);
    assert_eq!(reservation.slots, 1);
}

#[test]
fn reserved_worker_feeds_the_job_once_slots_free_up() {
    let mut sched = memory_aware_scheduler();
    let big = submit_running(&mut sched, SimJob::new("q", "alice").with_map_memory(1024).with_maps(5));
    submit_running(&mut sched, SimJob::new("q", "bob").with_maps(5));

    let mut tt = tracker("tt1", 2, 0);
    tt.set_occupied_slots(TaskKind::Map, 1);
    tt.set_committed_memory_mb(TaskKind::Map, 512);
    assert!(sched.assign_tasks(&mut tt, &cluster(4, 0, 2)).unwrap().is_empty());

    // the running task finished: both slots and all memory are free
    tt.set_occupied_slots(TaskKind::Map, 0);
    tt.set_committed_memory_mb(TaskKind::Map, 0);
    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 2)).unwrap();

    // the reservation is redeemed before any queue is consulted
    assert_eq!(tasks.first().map(|t| t.job_id), Some(big));
    assert_eq!(tasks[0].slots_required, 2);
    assert!(tt.reservation(TaskKind::Map).is_none());
    assert!(sched.job(&big).unwrap().locality_overridden);
}

#[test]
fn short_reservation_is_renewed_not_redeemed() {
    let mut sched = memory_aware_scheduler();
    let big = submit_running(&mut sched, SimJob::new("q", "alice").with_map_memory(1024).with_maps(5));

    let mut tt = tracker("tt1", 2, 0);
    tt.set_occupied_slots(TaskKind::Map, 1);
    tt.set_committed_memory_mb(TaskKind::Map, 512);
    assert!(sched.assign_tasks(&mut tt, &cluster(4, 0, 2)).unwrap().is_empty());

    // still only one slot free: the reservation is refreshed and the
    // worker stays blocked
    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 2)).unwrap();
    assert!(tasks.is_empty());
    assert_eq!(tt.reservation(TaskKind::Map).unwrap().job_id, big);
}

#[test]
fn reserved_trackers_count_as_occupied_capacity() {
    let mut sched = memory_aware_scheduler();
    submit_running(&mut sched, SimJob::new("q", "alice").with_map_memory(1024).with_maps(5));

    let mut tt = tracker("tt1", 2, 0);
    tt.set_occupied_slots(TaskKind::Map, 1);
    tt.set_committed_memory_mb(TaskKind::Map, 512);
    sched.assign_tasks(&mut tt, &cluster(4, 0, 2)).unwrap();

    // rebuilt accounting counts the reserved tracker's two-slot task
    sched.refresh_metrics(&cluster(4, 0, 2)).unwrap();
    assert_eq!(sched.queue_state("q").unwrap().map.slots_occupied, 2);
}

#[test]
fn completed_job_releases_its_reservation_lazily() {
    let mut sched = memory_aware_scheduler();
    let big = submit_running(&mut sched, SimJob::new("q", "alice").with_map_memory(1024).with_maps(5));
    let small = submit_running(&mut sched, SimJob::new("q", "bob").with_maps(5));

    let mut tt = tracker("tt1", 2, 0);
    tt.set_occupied_slots(TaskKind::Map, 1);
    tt.set_committed_memory_mb(TaskKind::Map, 512);
    sched.assign_tasks(&mut tt, &cluster(4, 0, 2)).unwrap();
    assert!(tt.reservation(TaskKind::Map).is_some());

    sched.job_completed(big).unwrap();

    // next heartbeat clears the stale reservation and serves other jobs
    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 2)).unwrap();
    assert!(tt.reservation(TaskKind::Map).is_none());
    assert_eq!(tasks.first().map(|t| t.job_id), Some(small));
}

#[test]
fn no_reservation_once_the_job_has_enough_trackers() {
    let mut sched = memory_aware_scheduler();
    // one pending high-memory map: a single reserved tracker suffices
    submit_running(&mut sched, SimJob::new("q", "alice").with_map_memory(1024).with_maps(1));

    let mut tt1 = tracker("tt1", 2, 0);
    tt1.set_occupied_slots(TaskKind::Map, 1);
    tt1.set_committed_memory_mb(TaskKind::Map, 512);
    sched.assign_tasks(&mut tt1, &cluster(6, 0, 3)).unwrap();
    assert!(tt1.reservation(TaskKind::Map).is_some());

    let mut tt2 = tracker("tt2", 2, 0);
    tt2.set_occupied_slots(TaskKind::Map, 1);
    tt2.set_committed_memory_mb(TaskKind::Map, 512);
    sched.assign_tasks(&mut tt2, &cluster(6, 0, 3)).unwrap();
    assert!(
        tt2.reservation(TaskKind::Map).is_none(),
        "pending work is already covered by the first reservation"
    );
}

#[test]
fn removed_tracker_frees_its_ledger_entries() {
    let mut sched = memory_aware_scheduler();
    submit_running(&mut sched, SimJob::new("q", "alice").with_map_memory(1024).with_maps(1));

    let mut tt1 = tracker("tt1", 2, 0);
    tt1.set_occupied_slots(TaskKind::Map, 1);
    tt1.set_committed_memory_mb(TaskKind::Map, 512);
    sched.assign_tasks(&mut tt1, &cluster(6, 0, 3)).unwrap();
    assert!(tt1.reservation(TaskKind::Map).is_some());

    sched.tracker_removed("tt1");

    // the job has pending work and no reserved trackers again, so a new
    // worker in the same bind is reserved
    let mut tt2 = tracker("tt2", 2, 0);
    tt2.set_occupied_slots(TaskKind::Map, 1);
    tt2.set_committed_memory_mb(TaskKind::Map, 512);
    sched.assign_tasks(&mut tt2, &cluster(6, 0, 3)).unwrap();
    assert!(tt2.reservation(TaskKind::Map).is_some());
}
