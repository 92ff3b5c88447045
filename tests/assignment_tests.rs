
use capacity_scheduler::config::QueueConfig;
use capacity_scheduler::error::SchedulerError;
use capacity_scheduler::job::TaskKind;
use sim_harness::{cluster, scheduler, single_queue_scheduler, submit_running, tracker, SimJob};

#[test]
fn single_queue_fills_the_worker_in_one_heartbeat() {
    let mut sched = single_queue_scheduler("default");
    let job_id = submit_running(&mut sched, SimJob::new("default", "alice").with_maps(10));

    let mut tt = tracker("tt1", 4, 0);
    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 1)).unwrap();

    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t.job_id == job_id));
    assert!(tasks.iter().all(|t| t.kind == TaskKind::Map));
    assert_eq!(sched.job(&job_id).unwrap().running_maps, 4);
}

#[test]
fn idle_queue_donates_its_capacity() {
    let mut sched = scheduler(vec![
        QueueConfig::new("a").with_capacity(50.0),
        QueueConfig::new("b").with_capacity(50.0),
    ]);
    let job_id = submit_running(&mut sched, SimJob::new("a", "alice").with_maps(100));

    let mut tt = tracker("tt1", 10, 0);
    let tasks = sched.assign_tasks(&mut tt, &cluster(10, 0, 1)).unwrap();

    // b has no demand, so a takes the whole cluster
    assert_eq!(tasks.len(), 10);
    assert!(tasks.iter().all(|t| t.job_id == job_id));
}

#[test]
fn maximum_capacity_caps_donated_slots() {
    let mut sched = scheduler(vec![
        QueueConfig::new("a").with_capacity(50.0).with_max_capacity(60.0),
        QueueConfig::new("b").with_capacity(50.0),
    ]);
    submit_running(&mut sched, SimJob::new("a", "alice").with_maps(100));

    let mut tt = tracker("tt1", 10, 0);
    let tasks = sched.assign_tasks(&mut tt, &cluster(10, 0, 1)).unwrap();

    // 60% of 10 slots; the remaining 4 stay idle
    assert_eq!(tasks.len(), 6);
    assert_eq!(sched.queue_state("a").unwrap().map.slots_occupied, 6);
}

#[test]
fn at_most_one_reduce_per_heartbeat() {
    let mut sched = single_queue_scheduler("default");
    let job_id = submit_running(
        &mut sched,
        SimJob::new("default", "alice").with_reduces(10),
    );

    let mut tt = tracker("tt1", 0, 4);
    let tasks = sched.assign_tasks(&mut tt, &cluster(0, 4, 1)).unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].kind, TaskKind::Reduce);
    assert_eq!(tasks[0].job_id, job_id);
}

#[test]
fn maps_and_reduce_share_a_heartbeat() {
    let mut sched = single_queue_scheduler("default");
    submit_running(
        &mut sched,
        SimJob::new("default", "alice").with_maps(10).with_reduces(10),
    );

    let mut tt = tracker("tt1", 3, 2);
    let tasks = sched.assign_tasks(&mut tt, &cluster(3, 2, 1)).unwrap();

    let maps = tasks.iter().filter(|t| t.kind == TaskKind::Map).count();
    let reduces = tasks.iter().filter(|t| t.kind == TaskKind::Reduce).count();
    assert_eq!(maps, 3);
    assert_eq!(reduces, 1);
}

#[test]
fn off_switch_budget_is_one_per_heartbeat() {
    let mut sched = single_queue_scheduler("default");
    submit_running(
        &mut sched,
        SimJob::new("default", "alice").with_off_switch_maps(10),
    );

    let mut tt = tracker("tt1", 4, 0);
    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 1)).unwrap();

    // only data-remote maps available: one is let through, then the
    // heartbeat's budget is spent
    assert_eq!(tasks.len(), 1);
}

#[test]
fn local_maps_do_not_consume_the_off_switch_budget() {
    let mut sched = single_queue_scheduler("default");
    submit_running(
        &mut sched,
        SimJob::new("default", "alice")
            .with_maps(2)
            .with_off_switch_maps(10),
    );

    let mut tt = tracker("tt1", 4, 0);
    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 1)).unwrap();

    // 2 local maps, then 1 off-switch, then the budget is gone
    assert_eq!(tasks.len(), 3);
}

#[test]
fn off_switch_maps_wait_when_the_job_declines() {
    let mut sched = single_queue_scheduler("default");
    submit_running(
        &mut sched,
        SimJob::new("default", "alice")
            .with_off_switch_maps(10)
            .no_off_switch(),
    );

    let mut tt = tracker("tt1", 4, 0);
    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 1)).unwrap();
    assert!(tasks.is_empty());
}

#[test]
fn occupied_slots_limit_new_work() {
    let mut sched = single_queue_scheduler("default");
    submit_running(&mut sched, SimJob::new("default", "alice").with_maps(10));

    let mut tt = tracker("tt1", 4, 0);
    tt.set_occupied_slots(TaskKind::Map, 3);
    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 1)).unwrap();
    assert_eq!(tasks.len(), 1);
}

#[test]
fn assign_before_start_is_an_error() {
    let mut sched = capacity_scheduler::scheduler::CapacityScheduler::<SimJob>::new(
        capacity_scheduler::config::SchedulerConfig::new(vec![QueueConfig::new("default")
            .with_capacity(100.0)]),
    );
    let mut tt = tracker("tt1", 4, 0);
    let err = sched.assign_tasks(&mut tt, &cluster(4, 0, 1)).unwrap_err();
    assert!(matches!(err, SchedulerError::NotStarted));
}

#[test]
fn zero_capacity_queue_never_sources_tasks() {
    let mut sched = scheduler(vec![
        QueueConfig::new("a").with_capacity(100.0),
        QueueConfig::new("b").with_capacity(0.0),
    ]);
    submit_running(&mut sched, SimJob::new("b", "bob").with_maps(10));

    let mut tt = tracker("tt1", 4, 0);
    let tasks = sched.assign_tasks(&mut tt, &cluster(4, 0, 1)).unwrap();
    assert!(tasks.is_empty());
}
