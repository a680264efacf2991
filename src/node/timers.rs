use std::collections::HashMap;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use super::effects::{TimerCmd, TimerKind};

const MIN_PERIOD: Duration = Duration::from_millis(1);
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// At most one pending timer per kind. Scheduling a kind replaces its entry,
/// so cancel-then-reschedule never leaves a stale fire behind.
#[derive(Debug, Default)]
pub struct Timers {
    entries: HashMap<TimerKind, Entry>,
}

#[derive(Debug)]
struct Entry {
    deadline: Instant,
    period: Duration,
}

impl Timers {
    pub fn new() -> Self {
        Timers::default()
    }

    pub fn apply(&mut self, cmd: TimerCmd) {
        match cmd {
            TimerCmd::Schedule { kind, after, period } => {
                let entry = Entry {
                    deadline: Instant::now() + after.min(MAX_DELAY),
                    period: period.clamp(MIN_PERIOD, MAX_DELAY),
                };
                self.entries.insert(kind, entry);
            }
            TimerCmd::Cancel(kind) => {
                self.entries.remove(&kind);
            }
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Waits for the earliest timer and re-arms it for its next period.
    /// Cancel safe: nothing changes unless the wait completes.
    pub async fn next(&mut self) -> TimerKind {
        let earliest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.deadline)
            .map(|(kind, entry)| (*kind, entry.deadline));
        let Some((kind, deadline)) = earliest else {
            return std::future::pending().await;
        };

        sleep_until(deadline).await;
        if let Some(entry) = self.entries.get_mut(&kind) {
            entry.deadline = deadline + entry.period;
        }
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_in_deadline_order_and_repeats() {
        let mut timers = Timers::new();
        timers.apply(TimerCmd::Schedule {
            kind: TimerKind::NewsPull,
            after: Duration::from_millis(500),
            period: Duration::from_millis(1000),
        });
        timers.apply(TimerCmd::Schedule {
            kind: TimerKind::LeaderPull,
            after: Duration::from_millis(700),
            period: Duration::from_millis(5000),
        });
        let start = Instant::now();

        assert_eq!(timers.next().await, TimerKind::NewsPull);
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(700));
        assert_eq!(timers.next().await, TimerKind::LeaderPull);
        assert_eq!(timers.next().await, TimerKind::NewsPull);
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_and_cancel_removes() {
        let mut timers = Timers::new();
        timers.apply(TimerCmd::Schedule {
            kind: TimerKind::FailureCheck,
            after: Duration::ZERO,
            period: Duration::from_millis(3000),
        });
        timers.apply(TimerCmd::Schedule {
            kind: TimerKind::FailureCheck,
            after: Duration::from_millis(3800),
            period: Duration::from_millis(3800),
        });
        let start = Instant::now();

        assert_eq!(timers.next().await, TimerKind::FailureCheck);
        assert!(start.elapsed() >= Duration::from_millis(3800));

        timers.apply(TimerCmd::Cancel(TimerKind::FailureCheck));
        assert!(!timers.is_armed(TimerKind::FailureCheck));

        let idle = tokio::time::timeout(Duration::from_secs(60), timers.next()).await;
        assert!(idle.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_is_clamped() {
        let mut timers = Timers::new();
        timers.apply(TimerCmd::Schedule {
            kind: TimerKind::NewsPull,
            after: Duration::MAX,
            period: Duration::MAX,
        });

        assert!(timers.is_armed(TimerKind::NewsPull));
        let idle = tokio::time::timeout(Duration::from_secs(60), timers.next()).await;
        assert!(idle.is_err());
    }
}
