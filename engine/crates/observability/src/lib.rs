use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `fmt` subscriber. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Summary of one NPC behavior tick.
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub tick_number: u64,
    pub duration_us: u128,
    /// NPCs eligible for a new path this tick.
    pub npcs_considered: usize,
    /// Movement instructions broadcast this tick.
    pub instructions_issued: usize,
    /// Connections open when the tick ran.
    pub connection_count: usize,
}

impl TickMetrics {
    /// Ticks longer than this stall the world thread enough to be visible to
    /// players.
    pub const TICK_BUDGET_US: u128 = 5_000;

    pub fn over_budget(&self) -> bool {
        self.duration_us > Self::TICK_BUDGET_US
    }

    pub fn log(&self) {
        if self.over_budget() {
            tracing::warn!(
                tick = self.tick_number,
                duration_us = self.duration_us,
                npcs = self.npcs_considered,
                instructions = self.instructions_issued,
                connections = self.connection_count,
                "npc tick exceeded budget ({}us > {}us)",
                self.duration_us,
                Self::TICK_BUDGET_US
            );
        } else {
            tracing::debug!(
                tick = self.tick_number,
                duration_us = self.duration_us,
                npcs = self.npcs_considered,
                instructions = self.instructions_issued,
                connections = self.connection_count,
                "npc tick completed"
            );
        }
    }
}
