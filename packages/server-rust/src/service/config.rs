use std::time::Duration;

/// Dispatch engine configuration.
///
/// Controls long-poll defaults, background sweep cadence, retention of closed
/// operations, and client-side concurrency limits.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Wait applied by pollers that do not specify their own deadline.
    pub default_poll_wait: Duration,
    /// Capacity of the channel carrying fired timers to the expiry worker.
    pub expiry_channel_capacity: usize,
    /// Interval between sweeps that evict closed operations, in milliseconds.
    pub sweep_interval_ms: u64,
    /// How long a closed operation stays addressable (answering `NotFound`
    /// with a precise reason) before it is evicted.
    pub closed_retention: Duration,
    /// Maximum number of concurrent schedule calls through a client stub
    /// before load shedding.
    pub max_in_flight_schedules: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_poll_wait: Duration::from_secs(60),
            expiry_channel_capacity: 1024,
            sweep_interval_ms: 5_000,
            closed_retention: Duration::from_secs(60),
            max_in_flight_schedules: 1000,
        }
    }
}
