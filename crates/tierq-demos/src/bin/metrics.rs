use std::time::Duration;

use tierq_core::{JobKind, QueueConfig, RequesterId, Scheduler, Tier, prometheus};
use tracing::info;

// Core-only example: fill a saturated queue, dispatch a few rounds by hand and
// print the Prometheus exposition a scrape endpoint would serve.

fn main() -> anyhow::Result<()> {
    tierq_demos::init_tracing();

    let config = QueueConfig::from_toml_str(
        r#"
        capacity = 3
        max_waiting = 20
        default_processing_secs = 90.0
        "#,
    )?;
    let scheduler: Scheduler<&'static str> = Scheduler::new(config)?;

    let burst = [
        ("ana", Tier::Free, JobKind::Video, "lecture.mp4"),
        ("ben", Tier::Student, JobKind::File, "notes.pdf"),
        ("cai", Tier::Pro, JobKind::Text, "summary.txt"),
        ("dee", Tier::Free, JobKind::File, "slides.pptx"),
        ("eli", Tier::Pro, JobKind::Video, "interview.mov"),
        ("fay", Tier::Student, JobKind::Text, "essay.md"),
        ("gus", Tier::Free, JobKind::Text, "draft.txt"),
    ];
    for (user, tier, kind, file) in burst {
        scheduler.enqueue(RequesterId::from(user), tier, kind, file);
    }

    let mut running = Vec::new();
    while let Some(dispatch) = scheduler.try_dispatch() {
        info!(
            user = %dispatch.requester,
            tier = %dispatch.tier,
            file = dispatch.payload,
            "dispatched"
        );
        running.push(dispatch.id);
    }

    // pretend the first job took a minute
    if let Some(id) = running.first() {
        scheduler.release(id, tierq_core::Outcome::Succeeded, Some(Duration::from_secs(60)))?;
    }
    scheduler.cancel("gus");

    let stats = scheduler.stats(Some("dee"));
    print!("{}", prometheus::render_stats(&stats, prometheus::DEFAULT_NAMESPACE));
    Ok(())
}
