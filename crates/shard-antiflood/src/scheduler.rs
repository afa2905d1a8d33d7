//! Background maintenance loops.
//!
//! One loop per quota tier at the tier's own interval, one loop resetting
//! topic counters every second, one loop sweeping expired bans and one loop
//! printing the debugger aggregates. Loops stop on the cancellation token.

use crate::debugger::AntifloodDebugger;
use crate::error::{AntifloodError, AntifloodResult};
use crate::quota::QuotaTier;
use crate::time_cache::Sweeper;
use crate::topic::TopicFloodPreventer;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Period of the expired-entry sweep over the time caches.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Period of the topic counter reset. Topic limits are per second.
pub const TOPIC_RESET_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the scheduler keeps fresh.
#[derive(Default)]
pub struct MaintenanceTargets {
    /// Quota tiers, each reset on its own configured interval.
    pub tiers: Vec<Arc<QuotaTier>>,
    /// Topic counters, reset every [`TOPIC_RESET_INTERVAL`].
    pub topics: Option<Arc<TopicFloodPreventer>>,
    /// Time caches swept every [`SWEEP_INTERVAL`].
    pub sweepers: Vec<Arc<dyn Sweeper>>,
    /// Debug recorder, flushed on its auto-print interval.
    pub debugger: Option<Arc<AntifloodDebugger>>,
}

/// Running maintenance loops.
pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the loops on the current tokio runtime.
    ///
    /// Every loop waits one full period before its first tick.
    pub fn start(targets: MaintenanceTargets, cancel: CancellationToken) -> AntifloodResult<Self> {
        let runtime = Handle::try_current().map_err(|_| AntifloodError::NoRuntime)?;
        let mut handles = Vec::new();

        for tier in targets.tiers {
            let period = tier.interval();
            handles.push(spawn_periodic(
                &runtime,
                tier.speed().as_str(),
                period,
                cancel.clone(),
                move || tier.reset(),
            ));
        }

        if let Some(topics) = targets.topics {
            handles.push(spawn_periodic(
                &runtime,
                "topic_reset",
                TOPIC_RESET_INTERVAL,
                cancel.clone(),
                move || {
                    topics.reset();
                    topics.reset_for_not_registered_topics();
                },
            ));
        }

        if !targets.sweepers.is_empty() {
            let sweepers = targets.sweepers;
            handles.push(spawn_periodic(
                &runtime,
                "sweep",
                SWEEP_INTERVAL,
                cancel.clone(),
                move || {
                    let removed: usize = sweepers.iter().map(|s| s.sweep()).sum();
                    if removed > 0 {
                        debug!(removed, "Swept expired antiflood entries");
                    }
                },
            ));
        }

        if let Some(debugger) = targets.debugger {
            let period = debugger.interval();
            handles.push(spawn_periodic(
                &runtime,
                "debug_print",
                period,
                cancel.clone(),
                move || {
                    debugger.print_and_clear();
                },
            ));
        }

        info!(loops = handles.len(), "Antiflood scheduler started");
        Ok(Self { cancel, handles })
    }

    /// Number of spawned loops.
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Token the loops listen on.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every loop and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Antiflood maintenance loop failed: {}", e);
            }
        }
        info!("Antiflood scheduler stopped");
    }
}

fn spawn_periodic<F>(
    runtime: &Handle,
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(task = name, ?period, "Maintenance loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // A failing pass must not kill the loop
                    if catch_unwind(AssertUnwindSafe(&task)).is_err() {
                        error!(task = name, "Maintenance pass panicked");
                    }
                }
            }
        }

        debug!(task = name, "Maintenance loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, FloodPreventerConfig, TopicAntifloodConfig};
    use crate::peer::{DisabledPeerValidatorMapper, PeerId};
    use crate::quota::ReactionSpeed;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSweeper {
        calls: AtomicUsize,
    }

    impl Sweeper for CountingSweeper {
        fn sweep(&self) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    struct PanickingSweeper {
        calls: AtomicUsize,
    }

    impl Sweeper for PanickingSweeper {
        fn sweep(&self) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("sweep failed");
        }
    }

    fn fast_tier() -> Arc<QuotaTier> {
        let mut config = FloodPreventerConfig::default();
        config.interval_in_seconds = 1;
        config.peer_max_input.base_messages_per_interval = 2;
        config.peer_max_input.total_size_per_interval = 1000;
        config.peer_max_input.increase_factor.factor = 1.0;
        config.black_list.threshold_num_messages_per_interval = 10;
        config.black_list.threshold_size_per_interval = 10_000;
        config.black_list.num_flooding_rounds = 2;
        config.black_list.peer_ban_duration_in_seconds = 60;
        Arc::new(
            QuotaTier::new(
                ReactionSpeed::Fast,
                &config,
                &CacheConfig::default(),
                Arc::new(DisabledPeerValidatorMapper),
                Vec::new(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_start_outside_runtime() {
        let result = Scheduler::start(MaintenanceTargets::default(), CancellationToken::new());
        assert!(matches!(result, Err(AntifloodError::NoRuntime)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tier_reset_loop() {
        let tier = fast_tier();
        let peer = PeerId::from("peer");
        let scheduler = Scheduler::start(
            MaintenanceTargets {
                tiers: vec![tier.clone()],
                ..Default::default()
            },
            CancellationToken::new(),
        )
        .unwrap();

        assert!(tier.try_consume(&peer, 1).is_admitted());
        assert!(tier.try_consume(&peer, 1).is_admitted());
        assert!(!tier.try_consume(&peer, 1).is_admitted());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(tier.try_consume(&peer, 1).is_admitted());

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_topic_reset_loop() {
        let topics = Arc::new(TopicFloodPreventer::new(&TopicAntifloodConfig::default()).unwrap());
        topics.increase_load("heartbeat", 30, 0).unwrap();
        topics.increase_load("unregistered", 1, 0).unwrap();

        let scheduler = Scheduler::start(
            MaintenanceTargets {
                topics: Some(topics.clone()),
                ..Default::default()
            },
            CancellationToken::new(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(topics.current_load("heartbeat"), 0);
        assert_eq!(topics.current_load("unregistered"), 0);
        topics.increase_load("heartbeat", 30, 0).unwrap();

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_and_shutdown() {
        let sweeper = Arc::new(CountingSweeper::default());
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::start(
            MaintenanceTargets {
                sweepers: vec![sweeper.clone()],
                ..Default::default()
            },
            cancel.clone(),
        )
        .unwrap();
        assert_eq!(scheduler.task_count(), 1);

        tokio::time::sleep(SWEEP_INTERVAL * 3 + Duration::from_millis(100)).await;
        assert_eq!(sweeper.calls.load(Ordering::SeqCst), 3);

        scheduler.shutdown().await;
        assert!(cancel.is_cancelled());

        tokio::time::sleep(SWEEP_INTERVAL * 3).await;
        assert_eq!(sweeper.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_panicking_pass() {
        let sweeper = Arc::new(PanickingSweeper {
            calls: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::start(
            MaintenanceTargets {
                sweepers: vec![sweeper.clone()],
                ..Default::default()
            },
            CancellationToken::new(),
        )
        .unwrap();

        tokio::time::sleep(SWEEP_INTERVAL * 2 + Duration::from_millis(100)).await;
        assert_eq!(sweeper.calls.load(Ordering::SeqCst), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_stops_loops() {
        let sweeper = Arc::new(CountingSweeper::default());
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::start(
            MaintenanceTargets {
                sweepers: vec![sweeper.clone()],
                ..Default::default()
            },
            cancel.clone(),
        )
        .unwrap();

        cancel.cancel();
        tokio::time::sleep(SWEEP_INTERVAL * 2).await;
        assert_eq!(sweeper.calls.load(Ordering::SeqCst), 0);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_from_scheduler_stops_loops() {
        let sweeper = Arc::new(CountingSweeper::default());
        let scheduler = Scheduler::start(
            MaintenanceTargets {
                sweepers: vec![sweeper.clone()],
                ..Default::default()
            },
            CancellationToken::new(),
        )
        .unwrap();

        let token = scheduler.cancellation_token();
        tokio::time::sleep(SWEEP_INTERVAL + Duration::from_millis(10)).await;
        assert_eq!(sweeper.calls.load(Ordering::SeqCst), 1);

        token.cancel();
        tokio::time::sleep(SWEEP_INTERVAL * 3).await;
        assert_eq!(sweeper.calls.load(Ordering::SeqCst), 1);
        scheduler.shutdown().await;
    }
}
