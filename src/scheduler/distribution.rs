//! The distribution loop
//!
//! ```text
//!   ┌──────────┐  pool   ┌──────────────┐  report  ┌──────────┐
//!   │ Fetching ├────────►│ Distributing ├─────────►│ Sleeping │
//!   └────▲─────┘         └──────┬───────┘          └────┬─────┘
//!        │   empty pool / error │                       │
//!        │                      ▼                       │
//!        └──────────────────────────────────────────────┘
//! ```
//!
//! Per destination the loop takes the state lock only to evaluate the
//! [`RateGate`] and run the [`SelectionPolicy`]. The lock is released while
//! the transport delivers, then taken again to append the log entry and
//! advance the sequential cursor.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::error::{SchedulerError, SchedulerResult};
use super::rate_gate::{Admission, RateGate, DEFAULT_DAILY_CAP};
use super::selection::SelectionPolicy;
use crate::channels::{MessageSource, Transport};
use crate::error::{ClassifiedError, Error};
use crate::metrics;
use crate::models::{ContentItem, LogEntry, PeerId, SelectionMode};
use crate::storage::SharedState;

// ============================================================================
// Configuration
// ============================================================================

/// Tunables of the distribution loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionConfig {
    /// Maximum items requested from the source per cycle
    pub fetch_limit: usize,

    /// Sleep after a cycle that found no content
    pub empty_pool_backoff: Duration,

    /// Sleep after a cycle that failed
    pub recovery_backoff: Duration,

    /// Lower bound of the pause between two deliveries
    pub delivery_delay_min: Duration,

    /// Upper bound of the pause between two deliveries
    pub delivery_delay_max: Duration,

    pub default_daily_cap: u32,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            fetch_limit: 20,
            empty_pool_backoff: Duration::from_secs(60),
            recovery_backoff: Duration::from_secs(30),
            delivery_delay_min: Duration::from_secs(10),
            delivery_delay_max: Duration::from_secs(20),
            default_daily_cap: DEFAULT_DAILY_CAP,
        }
    }
}

impl DistributionConfig {
    /// Disable the pause between deliveries
    pub fn without_delivery_delay(mut self) -> Self {
        self.delivery_delay_min = Duration::ZERO;
        self.delivery_delay_max = Duration::ZERO;
        self
    }
}

// ============================================================================
// Loop State
// ============================================================================

/// Where the loop is between two steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopPhase {
    Fetching,
    Distributing(Vec<ContentItem>),
    Sleeping(Duration),
}

/// Summary of one distributing pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub pool_size: usize,
    pub destinations: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Delivered, but the log entry could not be persisted
    #[serde(default)]
    pub unrecorded: usize,
}

/// Work decided for one destination under the lock
enum Plan {
    Skip(&'static str),
    Send {
        item: ContentItem,
        mode: SelectionMode,
        cursor_before: usize,
        next_cursor: usize,
    },
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

// ============================================================================
// Distributor
// ============================================================================

/// Fetches content and fans it out to destinations, forever
pub struct Distributor {
    state: SharedState,
    source: Arc<dyn MessageSource>,
    transport: Arc<dyn Transport>,
    gate: RateGate,
    policy: SelectionPolicy,
    config: DistributionConfig,
    clock: Clock,
}

impl Distributor {
    pub fn new(
        state: SharedState,
        source: Arc<dyn MessageSource>,
        transport: Arc<dyn Transport>,
        config: DistributionConfig,
    ) -> Self {
        Self {
            state,
            source,
            transport,
            gate: RateGate::new(config.default_daily_cap),
            policy: SelectionPolicy::new(),
            config,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock used for gating and log timestamps
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            fetch_limit = self.config.fetch_limit,
            default_daily_cap = self.config.default_daily_cap,
            "Distribution loop started"
        );

        let mut phase = LoopPhase::Fetching;
        loop {
            if *shutdown.borrow() {
                break;
            }

            phase = match phase {
                LoopPhase::Fetching => match self.fetch().await {
                    Ok(pool) => LoopPhase::Distributing(pool),
                    Err(SchedulerError::EmptyPool) => {
                        tracing::info!(
                            backoff_secs = self.config.empty_pool_backoff.as_secs(),
                            "No content available, backing off"
                        );
                        LoopPhase::Sleeping(self.config.empty_pool_backoff)
                    }
                    Err(e) => {
                        log_failure("Fetch failed", e);
                        LoopPhase::Sleeping(self.config.recovery_backoff)
                    }
                },
                LoopPhase::Distributing(pool) => {
                    match self.distribute(&pool, &mut shutdown).await {
                        Ok(report) => {
                            tracing::info!(
                                pool = report.pool_size,
                                destinations = report.destinations,
                                delivered = report.delivered,
                                skipped = report.skipped,
                                failed = report.failed,
                                unrecorded = report.unrecorded,
                                "Cycle complete"
                            );
                            LoopPhase::Sleeping(self.cycle_period().await)
                        }
                        Err(e) => {
                            log_failure("Cycle failed", e);
                            LoopPhase::Sleeping(self.config.recovery_backoff)
                        }
                    }
                }
                LoopPhase::Sleeping(duration) => {
                    tracing::debug!(secs = duration.as_secs(), "Sleeping");
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => LoopPhase::Fetching,
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            LoopPhase::Fetching
                        }
                    }
                }
            };
        }

        tracing::info!("Distribution loop stopped");
    }

    /// One fetch plus one distributing pass, without the trailing sleep
    pub async fn run_cycle(&self) -> SchedulerResult<CycleReport> {
        let (_keep, mut shutdown) = watch::channel(false);
        let pool = self.fetch().await?;
        self.distribute(&pool, &mut shutdown).await
    }

    async fn fetch(&self) -> SchedulerResult<Vec<ContentItem>> {
        metrics::record_cycle();
        let pool = self
            .source
            .fetch(self.config.fetch_limit)
            .await
            .map_err(|e| SchedulerError::source_fetch(&e))?;

        if pool.is_empty() {
            return Err(SchedulerError::EmptyPool);
        }
        tracing::debug!(pool = pool.len(), "Content pool fetched");
        Ok(pool)
    }

    /// Effective destinations for this cycle, fixed at its start
    async fn destinations(&self) -> SchedulerResult<(Vec<PeerId>, bool)> {
        let (broadcast_all, registered) = self
            .state
            .read(|s| (s.broadcast_all, s.destinations.keys().copied().collect::<Vec<_>>()))
            .await;

        if !broadcast_all {
            return Ok((registered, false));
        }

        let groups = self
            .transport
            .enumerate_groups()
            .await
            .map_err(|e| SchedulerError::enumeration(&e))?;
        let mut seen = HashSet::new();
        let groups = groups.into_iter().filter(|id| seen.insert(*id)).collect();
        Ok((groups, true))
    }

    async fn distribute(
        &self,
        pool: &[ContentItem],
        shutdown: &mut watch::Receiver<bool>,
    ) -> SchedulerResult<CycleReport> {
        let (destinations, broadcast_all) = self.destinations().await?;
        metrics::set_active_destinations(destinations.len());

        let mut report = CycleReport {
            pool_size: pool.len(),
            destinations: destinations.len(),
            ..Default::default()
        };
        let mut attempted = false;

        for destination in destinations {
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested, ending cycle early");
                break;
            }

            let now = (self.clock)();
            let plan = self
                .state
                .read(|s| -> SchedulerResult<Plan> {
                    if !broadcast_all && !s.is_registered(destination) {
                        return Ok(Plan::Skip("removed"));
                    }
                    let admission = self.gate.check(s, destination, now);
                    if !admission.is_admitted() {
                        log_skip(destination, &admission);
                        return Ok(Plan::Skip(admission.reason()));
                    }
                    let selection = self.policy.next(pool, s.selection_mode, s.sequential_cursor)?;
                    Ok(Plan::Send {
                        item: selection.item.clone(),
                        mode: s.selection_mode,
                        cursor_before: s.sequential_cursor,
                        next_cursor: selection.next_cursor,
                    })
                })
                .await?;

            let (item, mode, cursor_before, next_cursor) = match plan {
                Plan::Skip(reason) => {
                    metrics::record_skip(reason);
                    report.skipped += 1;
                    continue;
                }
                Plan::Send {
                    item,
                    mode,
                    cursor_before,
                    next_cursor,
                } => (item, mode, cursor_before, next_cursor),
            };

            if attempted {
                let delay = self.delivery_delay();
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            tracing::info!("Shutdown requested, ending cycle early");
                            break;
                        }
                    }
                }
            }
            attempted = true;

            if let Err(e) = self.transport.deliver(destination, &item).await {
                let err = SchedulerError::delivery(destination, &e);
                tracing::warn!(destination, item = item.id, error = %err, "Delivery failed");
                metrics::record_delivery(false);
                report.failed += 1;
                continue;
            }

            tracing::info!(destination, item = item.id, "Delivered");
            metrics::record_delivery(true);
            report.delivered += 1;

            let sent_at = (self.clock)();
            let recorded = self
                .state
                .mutate(|s| {
                    s.record_send(LogEntry::new(sent_at, destination, item.id));
                    // Only advance a cursor nobody touched since it was read
                    if mode == SelectionMode::Sequential
                        && s.selection_mode == SelectionMode::Sequential
                        && s.sequential_cursor == cursor_before
                    {
                        s.sequential_cursor = next_cursor;
                    }
                    Ok::<_, SchedulerError>(())
                })
                .await;

            // The item already went out; keep going with the other destinations
            if let Err(e) = recorded {
                tracing::error!(
                    destination,
                    item = item.id,
                    error = %e,
                    "Delivery could not be recorded"
                );
                report.unrecorded += 1;
            }
        }

        Ok(report)
    }

    async fn cycle_period(&self) -> Duration {
        let minutes = self.state.read(|s| s.global_cadence_minutes).await;
        Duration::from_secs(u64::from(minutes) * 60)
    }

    fn delivery_delay(&self) -> Duration {
        let min = self.config.delivery_delay_min;
        let max = self.config.delivery_delay_max;
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

fn log_failure(message: &str, error: SchedulerError) {
    let error = Error::from(error);
    let category = error.category().as_str();
    if error.is_recoverable() {
        tracing::warn!(error = %error, category, "{message}, retrying after backoff");
    } else {
        tracing::error!(error = %error, category, "{message}");
    }
}

fn log_skip(destination: PeerId, admission: &Admission) {
    match admission {
        Admission::CadencePending { ready_at } => {
            tracing::debug!(destination, ready_at = %ready_at, "Skipped: cadence pending");
        }
        Admission::DailyCapReached { sent, cap } => {
            tracing::debug!(destination, sent, cap, "Skipped: daily cap reached");
        }
        Admission::Admitted => {}
    }
}
