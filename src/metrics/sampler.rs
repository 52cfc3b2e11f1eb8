//! Periodic sampling of the per-action counters
//!
//! One baseline sample is taken first; every later tick reports the packet
//! delta over the measured elapsed time since the previous sample.

use super::report::{ActionRate, ReportWriter};
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};
use xdpctl_common::{action_label, XdpAction};

/// Source of per-action packet counts
pub trait CounterSource {
    fn read(&mut self, action: u32) -> io::Result<u64>;
}

impl<C: CounterSource + ?Sized> CounterSource for Box<C> {
    fn read(&mut self, action: u32) -> io::Result<u64> {
        (**self).read(action)
    }
}

/// Monotonic time since an arbitrary origin
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Clock on tokio's monotonic instant, so paused test time applies
pub struct MonotonicClock {
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    pub count: u64,
    pub timestamp: Duration,
}

impl CounterRecord {
    /// Rate from `previous` to `self`; `None` when no time has passed
    pub fn rate_since(&self, previous: &CounterRecord, action: u32) -> Option<ActionRate> {
        let period = self.timestamp.checked_sub(previous.timestamp)?;
        if period.is_zero() {
            return None;
        }

        let packets = self.count.saturating_sub(previous.count);
        let period = period.as_secs_f64();

        Some(ActionRate {
            action,
            label: action_label(action),
            packets,
            period,
            pps: packets as f64 / period,
        })
    }
}

/// One sample of every tracked action, keyed by action code
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub records: BTreeMap<u32, CounterRecord>,
}

impl StatsSnapshot {
    /// Rates for every action present in both snapshots
    pub fn rates_since(&self, previous: &StatsSnapshot) -> Vec<ActionRate> {
        self.records
            .iter()
            .filter_map(|(action, current)| {
                let prev = previous.records.get(action)?;
                current.rate_since(prev, *action)
            })
            .collect()
    }
}

pub struct StatsSampler<S, C = MonotonicClock> {
    source: S,
    clock: C,
    actions: Vec<u32>,
    previous: Option<StatsSnapshot>,
}

impl<S: CounterSource> StatsSampler<S> {
    pub fn new(source: S) -> Self {
        Self::with_clock(source, MonotonicClock::new())
    }
}

impl<S: CounterSource, C: Clock> StatsSampler<S, C> {
    pub fn with_clock(source: S, clock: C) -> Self {
        Self {
            source,
            clock,
            actions: XdpAction::ALL.iter().map(|a| a.code()).collect(),
            previous: None,
        }
    }

    /// Restrict sampling to `actions`
    pub fn with_actions(mut self, actions: impl IntoIterator<Item = u32>) -> Self {
        self.actions = actions.into_iter().collect();
        self
    }

    /// Read every action once; failed reads keep the previous record
    fn sample(&mut self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();

        for &action in &self.actions {
            match self.source.read(action) {
                Ok(count) => {
                    let timestamp = self.clock.now();
                    snapshot
                        .records
                        .insert(action, CounterRecord { count, timestamp });
                }
                Err(e) => {
                    warn!("Failed to read counter for action {}: {}", action, e);
                    if let Some(prev) = self
                        .previous
                        .as_ref()
                        .and_then(|p| p.records.get(&action))
                    {
                        snapshot.records.insert(action, *prev);
                    }
                }
            }
        }

        snapshot
    }

    /// Take the baseline sample; reports nothing
    pub fn baseline(&mut self) {
        let snapshot = self.sample();
        debug!("Baseline sample of {} actions", snapshot.records.len());
        self.previous = Some(snapshot);
    }

    /// Sample and return the rates since the previous sample
    ///
    /// Without a baseline this only records one.
    pub fn tick(&mut self) -> Vec<ActionRate> {
        let current = self.sample();
        let rates = match &self.previous {
            Some(previous) => current.rates_since(previous),
            None => Vec::new(),
        };
        self.previous = Some(current);
        rates
    }

    /// Sample every `interval` forever, writing each report to `writer`
    pub async fn run<W: io::Write>(mut self, interval: Duration, mut writer: ReportWriter<W>) {
        self.baseline();

        loop {
            tokio::time::sleep(interval).await;

            let rates = self.tick();
            if rates.is_empty() {
                continue;
            }
            if let Err(e) = writer.write_report(&rates) {
                warn!("Failed to write stats report: {}", e);
            }
        }
    }
}
