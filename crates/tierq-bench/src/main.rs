use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::thread;
use std::time::{Duration, Instant};

use tierq_core::{
    CloseMode, EnqueueResult, JobKind, Outcome, QueueConfig, RequesterId, Scheduler, Tier,
};

#[derive(Default)]
struct TierTotals {
    dispatched: [AtomicU64; 3],
    waited_ns: [AtomicU64; 3],
}

fn main() {
    let run_seconds = 5u64;
    let worker_count = 4usize;
    let users_per_tier = 20u64;

    let scheduler = Arc::new(Scheduler::new(QueueConfig {
        capacity: worker_count,
        max_waiting: Some(5_000),
        ..QueueConfig::default()
    })
    .expect("bench config is valid"));

    let running = Arc::new(AtomicBool::new(true));
    let produced_total = Arc::new(AtomicU64::new(0));
    let dropped_total = Arc::new(AtomicU64::new(0));
    let totals = Arc::new(TierTotals::default());

    let mut handles = Vec::new();

    // one free user flooding the queue
    handles.push(spawn_producer(
        Arc::clone(&scheduler),
        Arc::clone(&running),
        Arc::clone(&produced_total),
        Arc::clone(&dropped_total),
        RequesterId::from("flood"),
        Tier::Free,
        0,
    ));

    for tier in Tier::ordered() {
        for n in 0..users_per_tier {
            handles.push(spawn_producer(
                Arc::clone(&scheduler),
                Arc::clone(&running),
                Arc::clone(&produced_total),
                Arc::clone(&dropped_total),
                RequesterId::from(format!("{tier}-{n}")),
                tier,
                10,
            ));
        }
    }

    for _ in 0..worker_count {
        handles.push(spawn_worker(
            Arc::clone(&scheduler),
            Arc::clone(&running),
            Arc::clone(&totals),
        ));
    }

    println!(
        "bench: flood user vs {} users per tier ({} workers, {}s)",
        users_per_tier, worker_count, run_seconds
    );
    let start = Instant::now();
    thread::sleep(Duration::from_secs(run_seconds));
    let elapsed = start.elapsed().as_secs_f64();

    running.store(false, Ordering::Relaxed);
    let leftover = scheduler.close(CloseMode::Immediate).len();

    for handle in handles {
        let _ = handle.join();
    }

    let stats = scheduler.stats(None);
    let throughput = if elapsed > 0.0 {
        stats.counters.dispatched as f64 / elapsed
    } else {
        0.0
    };

    println!(
        "stats: enq={} dispatched={} rejected={} closed={} leftover={}",
        stats.counters.enqueued,
        stats.counters.dispatched,
        stats.counters.rejected,
        stats.counters.closed,
        leftover
    );
    println!("derived: throughput={:.1} ops/s", throughput);
    for tier in Tier::ordered() {
        let served = totals.dispatched[tier.index()].load(Ordering::Relaxed);
        let waited_ns = totals.waited_ns[tier.index()].load(Ordering::Relaxed);
        let avg_wait_ms = if served > 0 {
            waited_ns as f64 / served as f64 / 1_000_000.0
        } else {
            0.0
        };
        println!(
            "  {:<7} dispatched={} avg_wait_ms={:.3}",
            tier.as_str(),
            served,
            avg_wait_ms
        );
    }
    println!(
        "produced_total={} dropped_total={}",
        produced_total.load(Ordering::Relaxed),
        dropped_total.load(Ordering::Relaxed)
    );
}

fn spawn_producer(
    scheduler: Arc<Scheduler<u64>>,
    running: Arc<AtomicBool>,
    produced_total: Arc<AtomicU64>,
    dropped_total: Arc<AtomicU64>,
    requester: RequesterId,
    tier: Tier,
    interval_ms: u64,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut seq = 0u64;
        while running.load(Ordering::Relaxed) {
            seq += 1;
            produced_total.fetch_add(1, Ordering::Relaxed);
            match scheduler.enqueue(requester.clone(), tier, JobKind::Other, seq) {
                EnqueueResult::Enqueued(_) => {}
                EnqueueResult::Rejected { .. } => {
                    dropped_total.fetch_add(1, Ordering::Relaxed);
                    thread::yield_now();
                }
                EnqueueResult::Closed(_) => break,
            }
            if interval_ms > 0 {
                thread::sleep(Duration::from_millis(interval_ms));
            }
        }
    })
}

fn spawn_worker(
    scheduler: Arc<Scheduler<u64>>,
    running: Arc<AtomicBool>,
    totals: Arc<TierTotals>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::Relaxed) {
            let Some(dispatch) = scheduler.try_dispatch() else {
                thread::yield_now();
                continue;
            };
            let index = dispatch.tier.index();
            let waited_ns = dispatch.waited.as_nanos().min(u128::from(u64::MAX)) as u64;
            totals.dispatched[index].fetch_add(1, Ordering::Relaxed);
            totals.waited_ns[index].fetch_add(waited_ns, Ordering::Relaxed);
            let started = Instant::now();
            std::hint::black_box(dispatch.payload);
            if let Err(err) =
                scheduler.release(&dispatch.id, Outcome::Succeeded, Some(started.elapsed()))
            {
                eprintln!("slot accounting broken: {err}");
                debug_assert!(false, "slot accounting broken: {err}");
            }
        }
    })
}
