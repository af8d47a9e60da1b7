//! Pool sizing decisions.
//!
//! Everything here is a pure function of a runner snapshot so the policy can
//! be checked exhaustively without a store or a backend.

use chrono::{DateTime, Duration, Utc};
use flotilla_core::config::Timers;
use flotilla_core::{Quantity, Runner};

/// Runner counts a sizing decision is based on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    /// Online, or provisioning (`creating`/`respawning`).
    pub warm: usize,
    pub running: usize,
    /// Subset of `warm` that has been provisioning past the timeout.
    pub stuck: usize,
}

impl PoolCounts {
    pub fn from_runners(runners: &[Runner], timers: &Timers, now: DateTime<Utc>) -> Self {
        let timeout = timers.timeout_runner();
        let mut counts = Self::default();
        for runner in runners {
            if runner.is_online() || runner.is_creating() {
                counts.warm += 1;
            }
            if runner.is_running() {
                counts.running += 1;
            }
            if runner.should_never_spawn(timeout, now) {
                counts.stuck += 1;
            }
        }
        counts
    }

    /// Runners holding a slot against `max`.
    pub fn occupied(&self) -> usize {
        self.running + self.warm
    }
}

/// Whether the pool should get one more runner.
///
/// Stuck runners always occupy a slot against `max`; whether they also count
/// as warm capacity toward `min` is a policy switch.
pub fn need_new_runner(counts: &PoolCounts, quantity: &Quantity, count_stuck_toward_min: bool) -> bool {
    let warm = if count_stuck_toward_min {
        counts.warm
    } else {
        counts.warm.saturating_sub(counts.stuck)
    };
    warm < quantity.min && counts.occupied() < quantity.max
}

/// How many more runners fit before the pool reaches `max`.
pub fn free_slots(counts: &PoolCounts, quantity: &Quantity) -> usize {
    quantity.max.saturating_sub(counts.occupied())
}

/// Idle runners to delete, oldest first, never taking the warm count below `min`.
pub fn idle_excess(
    runners: &[Runner],
    quantity: &Quantity,
    limit: Duration,
    now: DateTime<Utc>,
) -> Vec<Runner> {
    let warm = runners
        .iter()
        .filter(|r| r.is_online() || r.is_creating())
        .count();
    let excess = warm.saturating_sub(quantity.min);
    if excess == 0 {
        return Vec::new();
    }

    let mut idle: Vec<&Runner> = runners
        .iter()
        .filter(|r| r.idle_too_long(limit, now))
        .collect();
    idle.sort_by_key(|r| (r.started_at, r.created_at));
    idle.into_iter().take(excess).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::{RunnerStatus, Tags};
    use proptest::prelude::*;

    fn runner(name: &str, status: RunnerStatus, now: DateTime<Utc>) -> Runner {
        let mut r = Runner::new(name, Tags::new(["linux"]), now);
        r.status = status;
        r
    }

    fn quantity(min: usize, max: usize) -> Quantity {
        Quantity { min, max }
    }

    #[test]
    fn test_empty_pool_needs_runner() {
        assert!(need_new_runner(&PoolCounts::default(), &quantity(2, 4), true));
        assert!(!need_new_runner(&PoolCounts::default(), &quantity(0, 4), true));
    }

    #[test]
    fn test_running_runners_cap_at_max() {
        let counts = PoolCounts {
            warm: 1,
            running: 3,
            stuck: 0,
        };
        assert!(!need_new_runner(&counts, &quantity(2, 4), true));
        assert_eq!(free_slots(&counts, &quantity(2, 4)), 0);
    }

    #[test]
    fn test_stuck_runner_policy_switch() {
        let counts = PoolCounts {
            warm: 2,
            running: 0,
            stuck: 1,
        };
        assert!(!need_new_runner(&counts, &quantity(2, 4), true));
        assert!(need_new_runner(&counts, &quantity(2, 4), false));
    }

    #[test]
    fn test_counts_from_runners() {
        let now = Utc::now();
        let stuck = runner("s", RunnerStatus::Creating, now - Duration::hours(2));
        let runners = vec![
            runner("a", RunnerStatus::Online, now),
            runner("b", RunnerStatus::Running, now),
            runner("c", RunnerStatus::Respawning, now),
            runner("d", RunnerStatus::Offline, now),
            stuck,
        ];

        let counts = PoolCounts::from_runners(&runners, &Timers::default(), now);
        assert_eq!(
            counts,
            PoolCounts {
                warm: 3,
                running: 1,
                stuck: 1
            }
        );
    }

    #[test]
    fn test_idle_excess_keeps_min_and_takes_oldest() {
        let now = Utc::now();
        let limit = Duration::minutes(10);
        let mut runners = Vec::new();
        for (i, age) in [30, 50, 40].iter().enumerate() {
            let mut r = runner(&format!("r{}", i), RunnerStatus::Online, now);
            r.started_at = Some(now - Duration::minutes(*age));
            runners.push(r);
        }

        let victims = idle_excess(&runners, &quantity(1, 5), limit, now);
        let names: Vec<_> = victims.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["r1", "r2"]);

        assert!(idle_excess(&runners, &quantity(3, 5), limit, now).is_empty());
    }

    #[test]
    fn test_idle_excess_ignores_runners_that_worked() {
        let now = Utc::now();
        let mut r = runner("r", RunnerStatus::Running, now);
        r.started_at = Some(now - Duration::hours(1));
        r.update_status(RunnerStatus::Online, now);

        assert!(idle_excess(&[r], &quantity(0, 5), Duration::minutes(10), now).is_empty());
    }

    proptest! {
        #[test]
        fn prop_need_new_runner(
            min in 0usize..20,
            extra in 0usize..20,
            warm in 0usize..30,
            running in 0usize..30,
        ) {
            let q = quantity(min, min + extra);
            let counts = PoolCounts { warm, running, stuck: 0 };
            let need = need_new_runner(&counts, &q, true);

            if warm >= min {
                prop_assert!(!need);
            }
            if warm < min && running + warm < q.max {
                prop_assert!(need);
            }
            if need {
                prop_assert!(free_slots(&counts, &q) > 0);
            }
        }

        #[test]
        fn prop_stuck_exclusion_never_reduces_demand(
            min in 0usize..10,
            extra in 0usize..10,
            warm in 0usize..15,
            stuck_share in 0usize..15,
            running in 0usize..15,
        ) {
            let q = quantity(min, min + extra);
            let counts = PoolCounts { warm, running, stuck: stuck_share.min(warm) };
            if need_new_runner(&counts, &q, true) {
                prop_assert!(need_new_runner(&counts, &q, false));
            }
        }
    }
}
