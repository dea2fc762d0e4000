use std::time::{Duration, Instant};

use anyhow::Context;
use rand::Rng;
use tierq_async::{CloseMode, JobError, JobKind, JobQueue, QueueConfig, Tier};
use tokio::task::JoinSet;
use tracing::{info, warn};

// Note-ingestion simulation: 24 users across three tiers submit video, file
// and text extraction jobs into a queue with 2 slots.

#[derive(Clone, Debug)]
struct UserProfile {
    name: String,
    tier: Tier,
    kind: JobKind,
    submit_every_ms: u64,
    submissions: u32,
}

#[derive(Debug)]
struct Extracted {
    chars: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tierq_demos::init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => QueueConfig::from_file(&path)
            .with_context(|| format!("loading queue config from {path}"))?,
        None => QueueConfig {
            max_waiting: Some(64),
            default_processing_secs: 0.4,
            ..QueueConfig::default()
        },
    };
    info!(
        capacity = config.capacity,
        max_waiting = ?config.max_waiting,
        "starting ingestion simulation"
    );

    let queue = JobQueue::new(config).context("invalid queue config")?;
    let profiles = user_profiles();
    let reporter = spawn_reporter(queue.clone(), Duration::from_secs(1));

    let started = Instant::now();
    let mut users = JoinSet::new();
    for profile in profiles {
        users.spawn(run_user(queue.clone(), profile));
    }

    let mut summary = Summary::default();
    while let Some(joined) = users.join_next().await {
        summary.merge(joined.context("user task panicked")?);
    }
    reporter.abort();

    queue.close(CloseMode::Drain);
    let stats = queue.stats(None);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!(
        "done in {:.1}s: ok={} failed={} rejected={} cancelled={} chars={}",
        started.elapsed().as_secs_f64(),
        summary.ok,
        summary.failed,
        summary.rejected,
        summary.cancelled,
        summary.chars
    );
    for tier in Tier::ordered() {
        let waited = summary.waited[tier.index()];
        let served = summary.served[tier.index()].max(1);
        println!(
            "  {:<7} served={} mean_turnaround={:.2}s",
            tier.as_str(),
            summary.served[tier.index()],
            waited.as_secs_f64() / served as f64
        );
    }
    Ok(())
}

fn user_profiles() -> Vec<UserProfile> {
    let mut profiles = Vec::with_capacity(24);
    for (tier, count, every_ms) in [
        (Tier::Pro, 4, 700),
        (Tier::Student, 8, 500),
        (Tier::Free, 12, 350),
    ] {
        for i in 0..count {
            let kind = match i % 3 {
                0 => JobKind::Video,
                1 => JobKind::File,
                _ => JobKind::Text,
            };
            profiles.push(UserProfile {
                name: format!("{tier}-{:02}", i + 1),
                tier,
                kind,
                submit_every_ms: every_ms,
                submissions: 4,
            });
        }
    }
    profiles
}

#[derive(Default)]
struct Summary {
    ok: u64,
    failed: u64,
    rejected: u64,
    cancelled: u64,
    chars: usize,
    served: [u64; 3],
    waited: [Duration; 3],
}

impl Summary {
    fn merge(&mut self, other: Summary) {
        self.ok += other.ok;
        self.failed += other.failed;
        self.rejected += other.rejected;
        self.cancelled += other.cancelled;
        self.chars += other.chars;
        for i in 0..3 {
            self.served[i] += other.served[i];
            self.waited[i] += other.waited[i];
        }
    }
}

async fn run_user(queue: JobQueue, profile: UserProfile) -> Summary {
    let mut summary = Summary::default();
    for round in 0..profile.submissions {
        let (work_ms, fails) = {
            let mut rng = rand::thread_rng();
            (job_cost_ms(profile.kind, &mut rng), rng.gen_bool(0.05))
        };
        let submitted = Instant::now();
        let ticket = queue.enqueue(
            profile.name.as_str(),
            profile.tier,
            profile.kind,
            move || async move {
                tokio::time::sleep(Duration::from_millis(work_ms)).await;
                if fails {
                    return Err(format!("extractor gave up after {work_ms}ms"));
                }
                Ok(Extracted {
                    chars: work_ms as usize * 12,
                })
            },
        );

        // free users occasionally give up on their last upload while it waits
        if profile.tier == Tier::Free && round + 1 == profile.submissions {
            if let Some(position) = queue.position_of(&profile.name) {
                if position > 10 {
                    queue.cancel(&profile.name);
                }
            }
        }

        match ticket.await {
            Ok(extracted) => {
                summary.ok += 1;
                summary.chars += extracted.chars;
                summary.served[profile.tier.index()] += 1;
                summary.waited[profile.tier.index()] += submitted.elapsed();
            }
            Err(JobError::Failed(reason)) => {
                warn!(user = %profile.name, %reason, "extraction failed");
                summary.failed += 1;
            }
            Err(JobError::Rejected(reason)) => {
                warn!(user = %profile.name, %reason, "submission rejected");
                summary.rejected += 1;
            }
            Err(JobError::Cancelled) => summary.cancelled += 1,
            Err(err) => warn!(user = %profile.name, error = %err, "job did not complete"),
        }
        tokio::time::sleep(Duration::from_millis(profile.submit_every_ms)).await;
    }
    summary
}

fn job_cost_ms(kind: JobKind, rng: &mut impl Rng) -> u64 {
    match kind {
        JobKind::Video => rng.gen_range(250..600),
        JobKind::File => rng.gen_range(80..200),
        JobKind::Text | JobKind::Other => rng.gen_range(20..60),
    }
}

fn spawn_reporter(queue: JobQueue, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = queue.stats(None);
            info!(
                waiting = stats.total_waiting,
                pro = stats.per_tier.pro,
                student = stats.per_tier.student,
                free = stats.per_tier.free,
                running = stats.load.running,
                load = ?stats.load.level(),
                avg_secs = stats.average_processing_secs,
                "queue snapshot"
            );
        }
    })
}
