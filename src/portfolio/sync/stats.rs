//! Counters for the portfolio engine.
//!
//! The `EngineStatsTracker` lives inside the serial executor and records how many commands were
//! processed, how often the item list was rebuilt, how many total recomputes happened and how
//! many stale facet events were dropped. Progress is logged at a configurable interval.

use tracing::info;

#[derive(Debug, Clone)]
pub struct EngineStatsTracker {
    commands_processed: u64,
    rebuilds: u64,
    total_recomputes: u64,
    item_updates: u64,
    stale_facet_events: u64,
    /// Log every N commands; 0 disables periodic logging
    log_interval: u64,
    last_logged_at: u64,
}

impl EngineStatsTracker {
    pub fn new(log_interval: u64) -> Self {
        Self {
            commands_processed: 0,
            rebuilds: 0,
            total_recomputes: 0,
            item_updates: 0,
            stale_facet_events: 0,
            log_interval,
            last_logged_at: 0,
        }
    }

    pub fn record_command(&mut self) {
        self.commands_processed += 1;
    }

    pub fn record_rebuild(&mut self) {
        self.rebuilds += 1;
    }

    pub fn record_total_recompute(&mut self) {
        self.total_recomputes += 1;
    }

    pub fn record_item_update(&mut self) {
        self.item_updates += 1;
    }

    pub fn record_stale_facet(&mut self) {
        self.stale_facet_events += 1;
    }

    /// Log counters when the interval has elapsed or when forced
    pub fn log_progress(&mut self, force: bool) {
        let since_last = self.commands_processed.saturating_sub(self.last_logged_at);
        let due = self.log_interval > 0 && since_last >= self.log_interval;

        if force || due {
            info!("Portfolio engine: {}", self.get_stats().summary());
            self.last_logged_at = self.commands_processed;
        }
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            commands_processed: self.commands_processed,
            rebuilds: self.rebuilds,
            total_recomputes: self.total_recomputes,
            item_updates: self.item_updates,
            stale_facet_events: self.stale_facet_events,
        }
    }
}

/// Snapshot of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub commands_processed: u64,
    pub rebuilds: u64,
    pub total_recomputes: u64,
    pub item_updates: u64,
    pub stale_facet_events: u64,
}

impl EngineStats {
    pub fn summary(&self) -> String {
        format!(
            "{} commands, {} rebuilds, {} total recomputes, {} item updates{}",
            self.commands_processed,
            self.rebuilds,
            self.total_recomputes,
            self.item_updates,
            if self.stale_facet_events == 0 {
                String::new()
            } else {
                format!(" ({} stale facet events dropped)", self.stale_facet_events)
            }
        )
    }
}
