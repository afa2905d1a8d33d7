//! Wiring of the antiflood components.

use crate::antiflood::{AdmitChecker, P2PAntiflood};
use crate::blacklist::BlacklistProcessor;
use crate::blacklist_cache::{PeerBlacklistCache, PeerDenialEvaluator, PublicKeyCache};
use crate::config::{AntifloodConfig, AntifloodDebugConfig};
use crate::debugger::AntifloodDebugger;
use crate::disabled::DisabledAntiflood;
use crate::error::AntifloodResult;
use crate::metrics::{QuotaMetricsProcessor, StatusHandler};
use crate::peer::PeerValidatorMapper;
use crate::quota::{QuotaStatusHandler, QuotaTier};
use crate::scheduler::{MaintenanceTargets, Scheduler};
use crate::time_cache::Sweeper;
use crate::topic::TopicFloodPreventer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything the networking layer needs from antiflood.
pub struct AntifloodComponents {
    /// Message admission.
    pub antiflood: Arc<dyn AdmitChecker>,
    /// Banned peers. Shared with the connection layer.
    pub blacklist: Arc<PeerBlacklistCache>,
    /// Banned validator keys.
    pub public_keys: Arc<PublicKeyCache>,
    /// Connection-level deny check over both caches.
    pub denial_evaluator: Arc<PeerDenialEvaluator>,
    /// Quota tiers in evaluation order. Empty when disabled.
    pub tiers: Vec<Arc<QuotaTier>>,
    /// Blacklist processors, one per tier. Empty when disabled.
    pub blacklist_processors: Vec<Arc<BlacklistProcessor>>,
    /// Topic limiter. `None` when disabled.
    pub topics: Option<Arc<TopicFloodPreventer>>,
    /// Attached debugger, if any.
    pub debugger: Option<Arc<AntifloodDebugger>>,
    /// Maintenance loops. `None` when disabled.
    pub scheduler: Option<Scheduler>,
}

impl AntifloodComponents {
    /// Stop the maintenance loops.
    pub async fn shutdown(self) {
        if let Some(scheduler) = self.scheduler {
            scheduler.shutdown().await;
        }
    }
}

/// Build the antiflood stack from config.
///
/// A disabled config yields [`DisabledAntiflood`] and starts nothing.
/// Otherwise the maintenance loops are spawned on the current tokio runtime
/// and stop when `cancel` fires.
pub fn new_antiflood_components(
    config: &AntifloodConfig,
    debug: &AntifloodDebugConfig,
    status: Arc<dyn StatusHandler>,
    mapper: Arc<dyn PeerValidatorMapper>,
    cancel: CancellationToken,
) -> AntifloodResult<AntifloodComponents> {
    let blacklist = Arc::new(PeerBlacklistCache::new());
    let public_keys = Arc::new(PublicKeyCache::new());
    let denial_evaluator = Arc::new(PeerDenialEvaluator::new(
        blacklist.clone(),
        public_keys.clone(),
        mapper.clone(),
    ));

    if !config.enabled {
        info!("Antiflood disabled");
        return Ok(AntifloodComponents {
            antiflood: Arc::new(DisabledAntiflood),
            blacklist,
            public_keys,
            denial_evaluator,
            tiers: Vec::new(),
            blacklist_processors: Vec::new(),
            topics: None,
            debugger: None,
            scheduler: None,
        });
    }

    config.validate()?;
    debug.validate()?;

    let mut tiers = Vec::with_capacity(3);
    let mut blacklist_processors = Vec::with_capacity(3);
    for (speed, tier_config) in config.tiers() {
        let processor = Arc::new(BlacklistProcessor::new(
            speed,
            &tier_config.black_list,
            blacklist.clone(),
        )?);
        let handlers: Vec<Arc<dyn QuotaStatusHandler>> = vec![
            processor.clone(),
            Arc::new(QuotaMetricsProcessor::new(speed, status.clone())),
        ];
        tiers.push(Arc::new(QuotaTier::new(
            speed,
            tier_config,
            &config.cache,
            mapper.clone(),
            handlers,
        )?));
        blacklist_processors.push(processor);
    }

    let topics = Arc::new(TopicFloodPreventer::new(&config.topic)?);
    let antiflood = P2PAntiflood::new(blacklist.clone(), topics.clone(), tiers.clone())?;

    let debugger = if debug.enabled {
        let debugger = Arc::new(AntifloodDebugger::new(debug)?);
        antiflood.set_debugger(Some(debugger.clone()));
        Some(debugger)
    } else {
        None
    };

    let sweepers: Vec<Arc<dyn Sweeper>> = vec![blacklist.clone(), public_keys.clone()];
    let scheduler = Scheduler::start(
        MaintenanceTargets {
            tiers: tiers.clone(),
            topics: Some(topics.clone()),
            sweepers,
            debugger: debugger.clone(),
        },
        cancel,
    )?;

    info!(
        tiers = tiers.len(),
        debugger = debugger.is_some(),
        "Antiflood enabled"
    );

    Ok(AntifloodComponents {
        antiflood: Arc::new(antiflood),
        blacklist,
        public_keys,
        denial_evaluator,
        tiers,
        blacklist_processors,
        topics: Some(topics),
        debugger,
        scheduler: Some(scheduler),
    })
}
