//! Cleanup metrics derived from an episode trace.
//!
//! Every ratio is a count over the trace divided by its length `N` (an empty
//! trace counts as `N = 1`). The composite score is
//! `max(0, 1 - (open + active + unrestored + repeated + no_change) / 5)`.

use serde::{Deserialize, Serialize};

use crate::episode::StepRecord;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CleanupMetrics {
    pub cleanup_score: f64,
    pub open_items_ratio: f64,
    pub active_appliances_ratio: f64,
    pub other_unrestored_objects_ratio: f64,
    pub repeated_steps_ratio: f64,
    pub no_change_steps_ratio: f64,
}

pub fn compute_cleanup_metrics(trace: &[StepRecord]) -> CleanupMetrics {
    let n = trace.len().max(1) as f64;
    let ratio = |count: usize| count as f64 / n;

    let repeated = trace
        .windows(2)
        .filter(|pair| pair[0].action == pair[1].action)
        .count();
    let no_change = trace.iter().filter(|r| r.reward == 0.0).count();
    let open = count_actions(trace, |a| a.contains("open"));
    let active = count_actions(trace, |a| a.contains("turn on") || a.contains("switch on"));
    let unrestored = count_actions(trace, |a| a.contains("put") && !a.contains("sink"));

    let open_items_ratio = ratio(open);
    let active_appliances_ratio = ratio(active);
    let other_unrestored_objects_ratio = ratio(unrestored);
    let repeated_steps_ratio = ratio(repeated);
    let no_change_steps_ratio = ratio(no_change);

    let penalty = (open_items_ratio
        + active_appliances_ratio
        + other_unrestored_objects_ratio
        + repeated_steps_ratio
        + no_change_steps_ratio)
        / 5.0;

    CleanupMetrics {
        cleanup_score: (1.0 - penalty).max(0.0),
        open_items_ratio,
        active_appliances_ratio,
        other_unrestored_objects_ratio,
        repeated_steps_ratio,
        no_change_steps_ratio,
    }
}

fn count_actions(trace: &[StepRecord], pred: impl Fn(&str) -> bool) -> usize {
    trace.iter().filter(|r| pred(&r.action)).count()
}
