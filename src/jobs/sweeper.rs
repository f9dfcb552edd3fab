//! Background job: drop idle progress entries and expired rate-limit windows
//! from the in-process store. Redis expires its own keys.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::progress::ProgressTracker;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the sweeper. Call this once at startup.
pub fn spawn(tracker: ProgressTracker, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let evicted = tracker.sweep();
            if evicted > 0 {
                tracing::debug!(evicted, "swept expired coordination entries");
            }
        }
    })
}
