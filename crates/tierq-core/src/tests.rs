use std::time::{Duration, Instant};

use crate::{
    CloseMode, ConfigError, EnqueueResult, EntryId, GateError, JobKind, LoadLevel, Outcome,
    QueueConfig, RejectReason, Scheduler, Tier, priority_of,
};

fn config(capacity: usize) -> QueueConfig {
    QueueConfig {
        capacity,
        ..QueueConfig::default()
    }
}

fn enqueue(scheduler: &Scheduler<u64>, requester: &str, tier: Tier, payload: u64) -> EntryId {
    match scheduler.enqueue(requester.into(), tier, JobKind::Text, payload) {
        EnqueueResult::Enqueued(id) => id,
        other => panic!("expected enqueue to succeed, got {:?}", other),
    }
}

fn drain_order(scheduler: &Scheduler<u64>) -> Vec<u64> {
    let mut order = Vec::new();
    while let Some(dispatch) = scheduler.try_dispatch() {
        order.push(dispatch.payload);
        scheduler
            .release(&dispatch.id, Outcome::Succeeded, None)
            .expect("release");
    }
    order
}

#[test]
fn tier_tags_map_to_three_ranks() {
    assert_eq!(priority_of("pro").rank(), 1);
    assert_eq!(priority_of("student").rank(), 2);
    assert_eq!(priority_of("free").rank(), 3);
    assert_eq!(priority_of(" PRO ").rank(), 1);
}

#[test]
fn unknown_tier_falls_back_to_lowest_priority() {
    assert_eq!(priority_of("enterprise").rank(), 3);
    assert_eq!(priority_of("").rank(), 3);
    assert_eq!(Tier::from("platinum"), Tier::Free);
}

#[test]
fn waiting_list_orders_by_priority_then_arrival() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    enqueue(&scheduler, "f1", Tier::Free, 1);
    enqueue(&scheduler, "s1", Tier::Student, 2);
    enqueue(&scheduler, "f2", Tier::Free, 3);
    enqueue(&scheduler, "p1", Tier::Pro, 4);
    enqueue(&scheduler, "s2", Tier::Student, 5);
    enqueue(&scheduler, "p2", Tier::Pro, 6);

    let order: Vec<String> = scheduler
        .waiting_order()
        .into_iter()
        .map(|(requester, _)| requester.to_string())
        .collect();
    assert_eq!(order, vec!["p1", "p2", "s1", "s2", "f1", "f2"]);
}

#[test]
fn saturated_gate_serves_pro_then_student_then_free() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    enqueue(&scheduler, "long", Tier::Free, 0);
    let long = scheduler.try_dispatch().expect("long job dispatched");

    enqueue(&scheduler, "free", Tier::Free, 1);
    enqueue(&scheduler, "student", Tier::Student, 2);
    enqueue(&scheduler, "pro", Tier::Pro, 3);
    assert!(scheduler.try_dispatch().is_none(), "gate is saturated");

    scheduler
        .release(&long.id, Outcome::Succeeded, None)
        .expect("release");
    assert_eq!(drain_order(&scheduler), vec![3, 2, 1]);
}

#[test]
fn burst_never_exceeds_capacity() {
    let scheduler = Scheduler::new(config(3)).expect("valid config");
    for i in 0..10 {
        enqueue(&scheduler, &format!("r{i}"), Tier::Free, i);
    }

    let mut running = Vec::new();
    while let Some(dispatch) = scheduler.try_dispatch() {
        running.push(dispatch);
    }
    assert_eq!(running.len(), 3);
    assert_eq!(scheduler.load().running, 3);
    assert_eq!(scheduler.waiting_len(), 7);

    let first = running.remove(0);
    scheduler
        .release(&first.id, Outcome::Failed, None)
        .expect("release");
    assert!(scheduler.try_dispatch().is_some());
    assert!(scheduler.try_dispatch().is_none());
    assert_eq!(scheduler.load().running, 3);
}

#[test]
fn mixed_burst_puts_pro_in_first_dispatch_round() {
    let scheduler = Scheduler::new(config(2)).expect("valid config");
    for i in 0..5 {
        enqueue(&scheduler, &format!("free-{i}"), Tier::Free, i);
    }
    enqueue(&scheduler, "pro", Tier::Pro, 100);

    let first = scheduler.try_dispatch().expect("first");
    let second = scheduler.try_dispatch().expect("second");
    assert_eq!(first.payload, 100);
    assert_eq!(second.payload, 0);

    scheduler
        .release(&first.id, Outcome::Succeeded, None)
        .expect("release");
    scheduler
        .release(&second.id, Outcome::Succeeded, None)
        .expect("release");
    assert_eq!(drain_order(&scheduler), vec![1, 2, 3, 4]);
}

#[test]
fn cancel_removes_only_waiting_entries() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    enqueue(&scheduler, "alice", Tier::Pro, 1);
    let running = scheduler.try_dispatch().expect("alice runs");

    enqueue(&scheduler, "bob", Tier::Free, 2);
    assert_eq!(scheduler.position_of("bob"), Some(1));

    // alice is running, not waiting
    assert!(scheduler.cancel("alice").is_none());
    let cancelled = scheduler.cancel("bob").expect("bob was waiting");
    assert_eq!(cancelled.payload, 2);
    assert_eq!(scheduler.position_of("bob"), None);
    assert!(scheduler.cancel("bob").is_none());

    scheduler
        .release(&running.id, Outcome::Succeeded, None)
        .expect("release");
    assert!(scheduler.try_dispatch().is_none(), "bob must never dispatch");
    assert_eq!(scheduler.stats(None).counters.cancelled, 1);
}

#[test]
fn same_requester_entries_are_tracked_by_id() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    enqueue(&scheduler, "busy", Tier::Free, 0);
    let _running = scheduler.try_dispatch();

    let first = enqueue(&scheduler, "carol", Tier::Free, 1);
    let second = enqueue(&scheduler, "carol", Tier::Free, 2);
    assert_ne!(first, second);
    assert_eq!(scheduler.position_of_entry(&second), Some(2));

    let removed = scheduler.cancel_entry(&second).expect("second waiting");
    assert_eq!(removed.payload, 2);
    assert_eq!(scheduler.position_of("carol"), Some(1));
    assert_eq!(scheduler.position_of_entry(&first), Some(1));
}

#[test]
fn double_release_is_reported() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    enqueue(&scheduler, "a", Tier::Free, 1);
    let dispatch = scheduler.try_dispatch().expect("dispatch");

    scheduler
        .release(&dispatch.id, Outcome::Succeeded, None)
        .expect("first release");
    let err = scheduler
        .release(&dispatch.id, Outcome::Succeeded, None)
        .unwrap_err();
    assert_eq!(err, GateError::NotRunning(dispatch.id.clone()));
    assert_eq!(scheduler.load().running, 0);
    assert_eq!(scheduler.stats(None).counters.succeeded, 1);
}

#[test]
fn moving_average_converges_geometrically() {
    let scheduler = Scheduler::<u64>::new(QueueConfig::default()).expect("valid config");
    let target = 30.0;
    let mut gap = (90.0f64 - target).abs();
    for _ in 0..40 {
        scheduler.report_duration(Duration::from_secs_f64(target));
        gap *= 0.8;
        let average = scheduler.average_processing_time().as_secs_f64();
        assert!((average - target).abs() <= gap + 1e-6);
    }
    let average = scheduler.average_processing_time().as_secs_f64();
    assert!((average - target).abs() < 0.01);
}

#[test]
fn release_feeds_the_moving_average() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    enqueue(&scheduler, "a", Tier::Free, 1);
    let dispatch = scheduler.try_dispatch().expect("dispatch");
    scheduler
        .release(&dispatch.id, Outcome::Failed, Some(Duration::from_secs(40)))
        .expect("release");
    // 0.8 * 90 + 0.2 * 40
    let average = scheduler.average_processing_time().as_secs_f64();
    assert!((average - 80.0).abs() < 1e-9);

    enqueue(&scheduler, "b", Tier::Free, 2);
    let dispatch = scheduler.try_dispatch().expect("dispatch");
    scheduler
        .release(&dispatch.id, Outcome::Aborted, Some(Duration::from_secs(1)))
        .expect("release");
    let average = scheduler.average_processing_time().as_secs_f64();
    assert!((average - 80.0).abs() < 1e-9, "aborted work is not sampled");
}

#[test]
fn disabled_recording_ignores_dispatch_durations() {
    let scheduler = Scheduler::new(QueueConfig {
        capacity: 1,
        record_durations: false,
        ..QueueConfig::default()
    })
    .expect("valid config");
    enqueue(&scheduler, "a", Tier::Free, 1);
    let dispatch = scheduler.try_dispatch().expect("dispatch");
    scheduler
        .release(&dispatch.id, Outcome::Succeeded, Some(Duration::from_secs(10)))
        .expect("release");
    assert_eq!(scheduler.average_processing_time(), Duration::from_secs(90));

    scheduler.report_duration(Duration::from_secs(10));
    let average = scheduler.average_processing_time().as_secs_f64();
    assert!((average - 74.0).abs() < 1e-9);
}

#[test]
fn stats_estimate_wait_from_position_or_queue_depth() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    enqueue(&scheduler, "running", Tier::Free, 0);
    let _running = scheduler.try_dispatch();
    enqueue(&scheduler, "f", Tier::Free, 1);
    enqueue(&scheduler, "s", Tier::Student, 2);
    enqueue(&scheduler, "p", Tier::Pro, 3);

    let stats = scheduler.stats(Some("f"));
    assert_eq!(stats.total_waiting, 3);
    assert_eq!(stats.position, Some(3));
    assert_eq!(stats.estimated_wait_secs, 270.0);
    assert_eq!(stats.per_tier.pro, 1);
    assert_eq!(stats.per_tier.student, 1);
    assert_eq!(stats.per_tier.free, 1);
    assert_eq!(stats.per_tier.total(), 3);
    assert_eq!(stats.load.running, 1);
    assert_eq!(stats.load.capacity, 1);
    assert_eq!(stats.load.load_percentage, 100.0);
    assert_eq!(stats.load.level(), LoadLevel::High);

    let stats = scheduler.stats(Some("p"));
    assert_eq!(stats.position, Some(1));
    assert_eq!(stats.estimated_wait_secs, 90.0);

    let stats = scheduler.stats(Some("nobody"));
    assert_eq!(stats.position, None);
    assert_eq!(stats.estimated_wait_secs, 270.0);
}

#[test]
fn oldest_wait_tracks_the_front_entry() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    assert_eq!(scheduler.stats(None).oldest_wait_secs, 0.0);

    enqueue(&scheduler, "early", Tier::Free, 1);
    std::thread::sleep(Duration::from_millis(30));
    let before_pro = Instant::now();
    enqueue(&scheduler, "late", Tier::Pro, 2);
    std::thread::sleep(Duration::from_millis(30));

    let oldest = scheduler.stats(None).oldest_wait_secs;
    let pro_age_bound = before_pro.elapsed().as_secs_f64();
    // front is the pro entry: at least its sleep, never the older free entry's age
    assert!(oldest >= 0.03, "oldest wait {oldest}");
    assert!(oldest <= pro_age_bound, "oldest wait {oldest} > {pro_age_bound}");

    let _running = scheduler.try_dispatch().expect("dispatch");
    let _ = scheduler.close(CloseMode::Immediate);
    assert_eq!(scheduler.stats(None).oldest_wait_secs, 0.0);
}

#[test]
fn invalid_config_is_refused_at_construction() {
    for config in [
        QueueConfig {
            default_processing_secs: f64::INFINITY,
            ..QueueConfig::default()
        },
        QueueConfig {
            smoothing: 1.5,
            ..QueueConfig::default()
        },
        QueueConfig {
            capacity: 0,
            ..QueueConfig::default()
        },
    ] {
        assert!(matches!(
            Scheduler::<u64>::new(config),
            Err(ConfigError::Invalid(_))
        ));
    }
}

#[test]
fn load_levels_follow_thresholds() {
    assert_eq!(LoadLevel::from_percentage(0.0), LoadLevel::Calm);
    assert_eq!(LoadLevel::from_percentage(49.9), LoadLevel::Calm);
    assert_eq!(LoadLevel::from_percentage(50.0), LoadLevel::Moderate);
    assert_eq!(LoadLevel::from_percentage(79.9), LoadLevel::Moderate);
    assert_eq!(LoadLevel::from_percentage(80.0), LoadLevel::High);
}

#[test]
fn max_waiting_rejects_and_hands_payload_back() {
    let scheduler = Scheduler::new(QueueConfig {
        capacity: 1,
        max_waiting: Some(1),
        ..QueueConfig::default()
    })
    .expect("valid config");
    enqueue(&scheduler, "a", Tier::Free, 1);
    match scheduler.enqueue("b".into(), Tier::Pro, JobKind::Video, 2) {
        EnqueueResult::Rejected { reason, payload } => {
            assert_eq!(reason, RejectReason::QueueFull);
            assert_eq!(payload, 2);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(scheduler.stats(None).counters.rejected, 1);

    // dispatching frees room in the waiting list
    let _running = scheduler.try_dispatch();
    enqueue(&scheduler, "b", Tier::Pro, 2);
}

#[test]
fn drain_close_keeps_waiting_entries_dispatchable() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    enqueue(&scheduler, "a", Tier::Free, 1);
    enqueue(&scheduler, "b", Tier::Free, 2);

    assert!(scheduler.close(CloseMode::Drain).is_empty());
    assert!(scheduler.is_closed());
    assert!(matches!(
        scheduler.enqueue("c".into(), Tier::Pro, JobKind::Text, 3),
        EnqueueResult::Closed(3)
    ));
    assert_eq!(drain_order(&scheduler), vec![1, 2]);
}

#[test]
fn immediate_close_hands_back_waiting_entries() {
    let scheduler = Scheduler::new(config(1)).expect("valid config");
    enqueue(&scheduler, "a", Tier::Free, 1);
    let running = scheduler.try_dispatch().expect("dispatch");
    enqueue(&scheduler, "b", Tier::Free, 2);
    enqueue(&scheduler, "c", Tier::Pro, 3);

    let drained: Vec<u64> = scheduler
        .close(CloseMode::Immediate)
        .into_iter()
        .map(|entry| entry.payload)
        .collect();
    assert_eq!(drained, vec![3, 2]);
    assert_eq!(scheduler.waiting_len(), 0);
    let counters = scheduler.stats(None).counters;
    assert_eq!(counters.closed, 2);
    assert_eq!(counters.cancelled, 0);
    // running work is left alone
    assert_eq!(scheduler.load().running, 1);
    scheduler
        .release(&running.id, Outcome::Succeeded, None)
        .expect("release");
}

#[test]
fn stats_serialize_to_json() {
    let scheduler = Scheduler::<u64>::new(QueueConfig::default()).expect("valid config");
    let json = serde_json::to_value(scheduler.stats(None)).expect("serialize");
    assert_eq!(json["total_waiting"], 0);
    assert_eq!(json["load"]["capacity"], 2);
    assert_eq!(json["per_tier"]["pro"], 0);
}
