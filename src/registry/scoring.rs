//! Node Scoring System
//!
//! Tracks node health with a single non-negative score. A successful probe
//! adds a small increment up to a cap; a failed probe halves the score.
//! Regaining trust takes sustained reliability while flapping nodes drop fast.

use chrono::{DateTime, Duration, Utc};

use crate::config::ScoringConfig;
use crate::types::{NodeHealth, NodeRecord};

/// Outcome of probing a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The node answered the ping
    Alive,

    /// Timeout, rejection or transport error
    Failed,
}

/// Score after a successful probe
pub fn success_score(score: u32, config: &ScoringConfig) -> u32 {
    score.saturating_add(config.success_increment).min(config.max_score)
}

/// Score after a failed probe
pub fn failure_score(score: u32, config: &ScoringConfig) -> u32 {
    score / config.failure_divisor.max(2)
}

/// Apply a probe result to a record
pub fn apply_probe(record: &mut NodeRecord, outcome: ProbeOutcome, now: DateTime<Utc>, config: &ScoringConfig) {
    // keep found <= last_check even when the clock steps back
    let now = now.max(record.found);

    match outcome {
        ProbeOutcome::Alive => {
            record.score = success_score(record.score, config);
            record.last_response = Some(now);
        }
        ProbeOutcome::Failed => {
            record.score = failure_score(record.score, config);
        }
    }
    record.last_check = Some(now);
}

/// Interval in seconds as a time delta, `None` if it does not fit one
fn interval(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// Classify a record into its health band
pub fn health(record: &NodeRecord, now: DateTime<Utc>, config: &ScoringConfig) -> NodeHealth {
    // an unrepresentable window never expires
    let stale_after = interval(config.stale_after_secs);
    let within = |t: DateTime<Utc>| stale_after.map(|limit| now - t <= limit).unwrap_or(true);

    if record.score == 0 {
        return NodeHealth::Stale;
    }

    if !within(record.last_check.unwrap_or(record.found)) {
        return NodeHealth::Stale;
    }

    let responsive = record.last_response.map(within).unwrap_or(false);

    if record.score >= config.healthy_threshold && responsive {
        NodeHealth::Healthy
    } else {
        NodeHealth::Degraded
    }
}

/// Earliest time the record may be probed again, `None` if due right away.
///
/// An interval reaching past the end of time yields [`DateTime::MAX_UTC`],
/// so the record is never due again.
pub fn next_probe_at(record: &NodeRecord, config: &ScoringConfig) -> Option<DateTime<Utc>> {
    let last_check = record.last_check?;

    let secs = if record.score == 0 {
        config.backoff_interval_secs
    } else {
        config.min_probe_interval_secs
    };

    let at = interval(secs)
        .and_then(|delta| last_check.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    Some(at)
}

/// Whether the record should be probed at `now`
pub fn is_due(record: &NodeRecord, now: DateTime<Utc>, config: &ScoringConfig) -> bool {
    next_probe_at(record, config)
        .map(|at| at <= now)
        .unwrap_or(true)
}
