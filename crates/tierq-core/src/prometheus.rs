//! Prometheus text exposition of a [`QueueStats`] snapshot.

use std::fmt::Write;

use crate::api::{QueueStats, Tier};

/// Metric prefix used when the caller passes an empty namespace.
pub const DEFAULT_NAMESPACE: &str = "tierq";

pub fn render_stats(stats: &QueueStats, namespace: &str) -> String {
    let ns = if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    };

    let mut out = String::new();
    let counters = &stats.counters;
    for (name, help, value) in [
        ("enqueued_total", "Total entries admitted", counters.enqueued),
        ("dispatched_total", "Total entries started", counters.dispatched),
        ("succeeded_total", "Total units of work that succeeded", counters.succeeded),
        ("failed_total", "Total units of work that failed", counters.failed),
        ("aborted_total", "Total units of work that panicked or were torn down", counters.aborted),
        ("cancelled_total", "Total waiting entries cancelled", counters.cancelled),
        ("closed_total", "Total waiting entries dropped by an immediate close", counters.closed),
        ("rejected_total", "Total entries rejected by the waiting bound", counters.rejected),
    ] {
        let _ = write!(
            out,
            "# HELP {ns}_{name} {help}\n# TYPE {ns}_{name} counter\n{ns}_{name} {value}\n"
        );
    }

    let _ = write!(
        out,
        "# HELP {ns}_waiting Entries waiting per tier\n# TYPE {ns}_waiting gauge\n"
    );
    for tier in Tier::ordered() {
        let _ = writeln!(
            out,
            "{ns}_waiting{{tier=\"{tier}\"}} {}",
            stats.per_tier.get(tier)
        );
    }

    for (name, help, value) in [
        ("running", "Units of work currently running", stats.load.running as f64),
        ("capacity", "Maximum concurrently running units of work", stats.load.capacity as f64),
        ("load_percentage", "Running units as a percentage of capacity", stats.load.load_percentage),
        ("average_processing_seconds", "Moving average of processing time", stats.average_processing_secs),
        ("estimated_wait_seconds", "Estimated wait for a new entry", stats.estimated_wait_secs),
        ("oldest_wait_seconds", "Age of the front waiting entry", stats.oldest_wait_secs),
    ] {
        let _ = write!(
            out,
            "# HELP {ns}_{name} {help}\n# TYPE {ns}_{name} gauge\n{ns}_{name} {value}\n"
        );
    }

    out
}
